use anyhow::{Context as _, Result};
use archscout_core::Settings;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Builds the scraping client: the configured browser-like headers and the request timeout.
///
/// Invalid header names or values are skipped with a warning instead of failing the whole
/// client.
///
/// # Errors
///
/// Errors if the underlying client cannot be constructed.
pub fn scrape_client(settings: &Settings) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    for (name, value) in &settings.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid header"),
        }
    }

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(settings.request_timeout())
        .build()
        .context("Failed to build http client")
}
