//! Embedding and chat models behind an OpenAI compatible api.
//!
//! DashScope's compatible mode serves both the hosted embedding model and the chat model, a local
//! server exposes the same api for the local embedding path. [`CompatibleModel`] covers both, only
//! the [`CompatibleConfig`] differs.
use std::sync::Arc;

use archscout_core::{ModelError, Settings};
use async_openai::error::OpenAIError;
use derive_builder::Builder;
use secrecy::SecretString;

mod chat;
mod config;
mod embed;

pub use config::CompatibleConfig;

#[derive(Debug, Builder, Clone)]
#[builder(setter(into, strip_option))]
pub struct CompatibleModel {
    #[builder(default)]
    config: CompatibleConfig,

    #[builder(setter(skip), default = "self.client_from_config()")]
    client: Arc<async_openai::Client<CompatibleConfig>>,

    #[builder(default)]
    pub(crate) default_options: Options,
}

/// Model names used when a request does not bring its own
#[derive(Debug, Clone, Default, Builder)]
#[builder(setter(into, strip_option))]
pub struct Options {
    #[builder(default)]
    pub embed_model: Option<String>,
    #[builder(default)]
    pub chat_model: Option<String>,
    /// Output dimensions, for models that support shortening their vectors
    #[builder(default)]
    pub dimensions: Option<u32>,
}

impl Options {
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }
}

impl CompatibleModel {
    pub fn builder() -> CompatibleModelBuilder {
        CompatibleModelBuilder::default()
    }

    /// The hosted embedding and chat models, without a key yet.
    ///
    /// Keys are bound per worker through [`archscout_core::EmbeddingProvider`], the first
    /// configured key is used for chat.
    pub fn remote(settings: &Settings) -> Self {
        let api_key = settings
            .api_keys
            .first()
            .cloned()
            .unwrap_or_else(|| SecretString::from(""));

        Self::from_parts(
            CompatibleConfig::new(&settings.model_api_base, api_key),
            Options {
                embed_model: Some(settings.embed_model.clone()),
                chat_model: Some(settings.chat_model.clone()),
                dimensions: settings.embed_dimensions,
            },
        )
    }

    /// The locally served embedding model, no key needed
    pub fn local(settings: &Settings) -> Self {
        Self::from_parts(
            CompatibleConfig::new(&settings.local_model_api_base, SecretString::from("")),
            Options {
                embed_model: Some(settings.local_embed_model.clone()),
                ..Options::default()
            },
        )
    }

    fn from_parts(config: CompatibleConfig, default_options: Options) -> Self {
        Self {
            client: Arc::new(async_openai::Client::with_config(config.clone())),
            config,
            default_options,
        }
    }
}

impl CompatibleModelBuilder {
    fn client_from_config(&self) -> Arc<async_openai::Client<CompatibleConfig>> {
        Arc::new(async_openai::Client::with_config(
            self.config.clone().unwrap_or_default(),
        ))
    }

    pub fn default_embed_model(&mut self, model: impl Into<String>) -> &mut Self {
        self.default_options
            .get_or_insert_with(Options::default)
            .embed_model = Some(model.into());
        self
    }

    pub fn default_chat_model(&mut self, model: impl Into<String>) -> &mut Self {
        self.default_options
            .get_or_insert_with(Options::default)
            .chat_model = Some(model.into());
        self
    }
}

/// Maps client errors onto [`ModelError`], retryable failures become transient
pub fn openai_error_to_model_error(e: OpenAIError) -> ModelError {
    match e {
        OpenAIError::ApiError(api_error) => {
            if api_error.code.as_deref() == Some("context_length_exceeded") {
                ModelError::ContextLengthExceeded(OpenAIError::ApiError(api_error).into())
            } else {
                tracing::error!(error = ?api_error, "Model api error");
                ModelError::PermanentError(OpenAIError::ApiError(api_error).into())
            }
        }
        OpenAIError::Reqwest(e) => match e.status() {
            // A 429 mentioning quota will not recover by waiting
            Some(status) if status.as_u16() == 429 && !e.to_string().contains("quota") => {
                ModelError::TransientError(e.into())
            }
            Some(status) if status.is_server_error() => {
                tracing::warn!(status = status.as_u16(), "Model server error");
                ModelError::TransientError(e.into())
            }
            Some(status) => {
                tracing::error!(status = status.as_u16(), error = ?e, "Model client error");
                ModelError::PermanentError(e.into())
            }
            None => {
                tracing::error!(error = ?e, "Request to model failed");
                ModelError::TransientError(e.into())
            }
        },
        OpenAIError::JSONDeserialize(e) => {
            tracing::error!(error = ?e, "Model response could not be deserialized");
            ModelError::TransientError(e.into())
        }
        other => ModelError::PermanentError(other.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_models_from_settings() {
        let settings = Settings::default();

        let remote = CompatibleModel::remote(&settings);
        assert_eq!(
            remote.default_options.embed_model.as_deref(),
            Some("text-embedding-v3")
        );
        assert_eq!(remote.default_options.chat_model.as_deref(), Some("qwen-plus"));
        assert_eq!(remote.default_options.dimensions, Some(1024));

        let local = CompatibleModel::local(&settings);
        assert_eq!(
            local.default_options.embed_model.as_deref(),
            Some("gme-Qwen2-VL-2B-Instruct")
        );
        assert_eq!(local.default_options.chat_model, None);
    }

    #[test]
    fn test_builder_sets_models() {
        let model = CompatibleModel::builder()
            .default_chat_model("qwen-turbo")
            .default_embed_model("text-embedding-v2")
            .build()
            .unwrap();

        assert_eq!(model.default_options.chat_model.as_deref(), Some("qwen-turbo"));
        assert_eq!(
            model.default_options.embed_model.as_deref(),
            Some("text-embedding-v2")
        );
    }
}
