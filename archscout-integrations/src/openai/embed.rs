use std::sync::Arc;

use archscout_core::{EmbeddingModel, EmbeddingProvider, Embeddings, ModelError};
use async_openai::types::CreateEmbeddingRequestArgs;
use async_trait::async_trait;
use secrecy::SecretString;

use super::{CompatibleModel, openai_error_to_model_error};

#[async_trait]
impl EmbeddingModel for CompatibleModel {
    async fn embed(&self, input: Vec<String>) -> Result<Embeddings, ModelError> {
        let model = self
            .default_options
            .embed_model
            .as_ref()
            .ok_or(ModelError::PermanentError("Model not set".into()))?;

        let mut args = CreateEmbeddingRequestArgs::default();
        args.model(model).input(&input);
        if let Some(dimensions) = self.default_options.dimensions {
            args.dimensions(dimensions);
        }
        let request = args.build().map_err(ModelError::permanent)?;

        tracing::debug!(num_chunks = input.len(), model = %model, "[Embed] Request");
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(openai_error_to_model_error)?;
        tracing::debug!(num_embeddings = response.data.len(), "[Embed] Response");

        let mut data = response.data;
        data.sort_by_key(|embedding| embedding.index);
        Ok(data.into_iter().map(|embedding| embedding.embedding).collect())
    }
}

impl EmbeddingProvider for CompatibleModel {
    fn with_api_key(&self, api_key: &SecretString) -> Arc<dyn EmbeddingModel> {
        let config = self.config.with_api_key(api_key.clone());
        Arc::new(Self::from_parts(config, self.default_options.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai::CompatibleConfig;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn model(server: &MockServer, key: &str) -> CompatibleModel {
        CompatibleModel::builder()
            .config(CompatibleConfig::new(server.uri(), SecretString::from(key)))
            .default_embed_model("text-embedding-v3")
            .build()
            .unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn test_embed_returns_error_when_model_missing() {
        let model = CompatibleModel::builder().build().unwrap();
        let err = model.embed(vec!["text".into()]).await.unwrap_err();
        assert!(matches!(err, ModelError::PermanentError(_)));
    }

    #[test_log::test(tokio::test)]
    async fn test_embed_orders_by_index() {
        let server = MockServer::start().await;

        struct ValidateRequest;

        impl Respond for ValidateRequest {
            fn respond(&self, request: &Request) -> ResponseTemplate {
                let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
                assert_eq!(body["model"], "text-embedding-v3");
                assert_eq!(body["input"], json!(["first", "second"]));
                ResponseTemplate::new(200).set_body_json(json!({
                    "data": [
                        {"embedding": [0.3, 0.4], "index": 1, "object": "embedding"},
                        {"embedding": [0.1, 0.2], "index": 0, "object": "embedding"}
                    ],
                    "model": "text-embedding-v3",
                    "object": "list",
                    "usage": {"prompt_tokens": 4, "total_tokens": 4}
                }))
            }
        }

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ValidateRequest)
            .expect(1)
            .mount(&server)
            .await;

        let embeddings = model(&server, "sk-1")
            .embed(vec!["first".into(), "second".into()])
            .await
            .unwrap();

        assert_eq!(embeddings, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[test_log::test(tokio::test)]
    async fn test_provider_binds_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer sk-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [1.0], "index": 0, "object": "embedding"}],
                "model": "text-embedding-v3",
                "object": "list",
                "usage": {"prompt_tokens": 1, "total_tokens": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let bound = model(&server, "sk-1").with_api_key(&SecretString::from("sk-2"));
        assert_eq!(bound.embed(vec!["x".into()]).await.unwrap(), vec![vec![1.0]]);
    }

    #[test_log::test(tokio::test)]
    async fn test_context_length_error_is_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "message": "Input is too long",
                    "type": "invalid_request_error",
                    "param": null,
                    "code": "context_length_exceeded"
                }
            })))
            .mount(&server)
            .await;

        let err = model(&server, "sk-1")
            .embed(vec!["very long".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::ContextLengthExceeded(_)));
    }
}
