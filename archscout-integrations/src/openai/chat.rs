use archscout_core::{ChatModel, ChatRequest, ModelError};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;

use super::{CompatibleModel, openai_error_to_model_error};

#[async_trait]
impl ChatModel for CompatibleModel {
    async fn complete(&self, request: ChatRequest) -> Result<String, ModelError> {
        let model = self
            .default_options
            .chat_model
            .as_ref()
            .ok_or(ModelError::PermanentError("Model not set".into()))?;

        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(2);
        if let Some(system) = request.system {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()
                    .map_err(openai_error_to_model_error)?
                    .into(),
            );
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.prompt)
                .build()
                .map_err(openai_error_to_model_error)?
                .into(),
        );

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(model).messages(messages);
        if let Some(temperature) = request.temperature {
            args.temperature(temperature);
        }
        let request = args.build().map_err(openai_error_to_model_error)?;

        tracing::debug!(model = %model, "[Chat] Request");
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(openai_error_to_model_error)?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ModelError::TransientError(
                "Expected content in response".into(),
            ))?;
        tracing::debug!(
            response = %archscout_core::util::log_preview(&content, 100),
            "[Chat] Response"
        );
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai::CompatibleConfig;
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    #[test_log::test(tokio::test)]
    async fn test_complete_with_system_prompt() {
        let server = MockServer::start().await;

        struct ValidateRequest;

        impl Respond for ValidateRequest {
            fn respond(&self, request: &Request) -> ResponseTemplate {
                let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
                assert_eq!(body["model"], "qwen-plus");
                assert_eq!(body["messages"][0]["role"], "system");
                assert_eq!(body["messages"][1]["content"], "List keywords");
                ResponseTemplate::new(200).set_body_json(json!({
                    "id": "chatcmpl-1",
                    "object": "chat.completion",
                    "created": 1,
                    "model": "qwen-plus",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": "timber, courtyard"},
                        "finish_reason": "stop"
                    }]
                }))
            }
        }

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ValidateRequest)
            .mount(&server)
            .await;

        let model = CompatibleModel::builder()
            .config(CompatibleConfig::new(server.uri(), SecretString::from("sk-1")))
            .default_chat_model("qwen-plus")
            .build()
            .unwrap();

        let request = ChatRequest::builder()
            .system("You are an architect")
            .prompt("List keywords")
            .build()
            .unwrap();

        assert_eq!(model.complete(request).await.unwrap(), "timber, courtyard");
    }
}
