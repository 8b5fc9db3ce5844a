use async_openai::config::Config;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;

const DASHSCOPE_API_BASE: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// Endpoint and key of an OpenAI compatible server.
///
/// Defaults to DashScope's compatible mode with the key from `DASHSCOPE_API_KEY`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CompatibleConfig {
    api_base: String,
    api_key: SecretString,
}

impl Default for CompatibleConfig {
    fn default() -> Self {
        Self {
            api_base: DASHSCOPE_API_BASE.to_string(),
            api_key: std::env::var("DASHSCOPE_API_KEY")
                .unwrap_or_default()
                .into(),
        }
    }
}

impl CompatibleConfig {
    pub fn new(api_base: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    #[must_use]
    pub fn with_api_key(&self, api_key: SecretString) -> Self {
        Self {
            api_base: self.api_base.clone(),
            api_key,
        }
    }
}

impl Config for CompatibleConfig {
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        // Local servers run without a key
        let key = self.api_key.expose_secret();
        if key.is_empty() {
            return headers;
        }
        match HeaderValue::from_str(&format!("Bearer {key}")) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => tracing::error!("API key is not a valid header value"),
        }
        headers
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn api_base(&self) -> &str {
        &self.api_base
    }

    fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    fn query(&self) -> Vec<(&str, &str)> {
        vec![]
    }
}
