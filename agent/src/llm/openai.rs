use crate::llm;
use crate::{Error, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs, Role,
    },
};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use std::sync::Arc;
use std::time::Duration;

const TOP_P: f32 = 0.7;

/// Completion backend for any OpenAI-compatible chat endpoint.
pub struct OpenAI {
    model: String,
    temperature: f32,
    client: Client<OpenAIConfig>,
}

impl OpenAI {
    pub fn with_endpoint(
        model: String,
        api_base: &str,
        api_key: &str,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Arc<Self>> {
        let config = OpenAIConfig::new()
            .with_api_base(api_base)
            .with_api_key(api_key);

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        // retries belong to the caller's RetryPolicy, the client gives up on the first error
        let no_retries = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();

        Ok(Arc::new(Self {
            model,
            temperature,
            client: Client::with_config(config)
                .with_http_client(http)
                .with_backoff(no_retries),
        }))
    }

    fn user_message(prompt: &str) -> ChatCompletionRequestMessage {
        ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
            name: None,
        })
    }
}

/// Server errors reach us as an `ApiError` carrying only the raw body; rate
/// limits carry a `rate_limit` type or code. Both are worth another attempt.
fn is_server_side(err: &ApiError) -> bool {
    let unstructured = err.r#type.is_none() && err.code.is_none() && err.param.is_none();
    let rate_limited = [err.r#type.as_deref(), err.code.as_deref()]
        .into_iter()
        .flatten()
        .any(|tag| tag.contains("rate_limit"));
    unstructured || rate_limited
}

fn classify(err: OpenAIError) -> Error {
    match err {
        OpenAIError::ApiError(api) if is_server_side(&api) => {
            Error::TransientServiceError(format!("completion service: {}", api.message))
        }
        err => err.into(),
    }
}

#[async_trait]
impl llm::LLM for OpenAI {
    async fn completion<'a>(
        &self,
        request: llm::CompletionRequest<'a>,
    ) -> Result<llm::CompletionResponse> {
        let mut completion = CreateChatCompletionRequestArgs::default();
        completion
            .model(&self.model)
            .messages(vec![Self::user_message(request.prompt)])
            .temperature(self.temperature)
            .top_p(TOP_P);

        // compatible servers (Together, vLLM) only understand max_tokens
        #[allow(deprecated)]
        completion.max_tokens(request.max_tokens);

        let completion = completion.build()?;

        let res = self
            .client
            .chat()
            .create(completion)
            .await
            .map_err(classify)?;

        let choice = res
            .choices
            .first()
            .ok_or(Error::LLMResponseError("choices is empty".to_string()))?;

        if choice.message.role != Role::Assistant {
            return Err(Error::LLMResponseError(
                "expected role to be assistant".to_string(),
            ));
        }

        let content = choice
            .message
            .content
            .as_ref()
            .ok_or(Error::LLMResponseError("content is empty".to_string()))?;

        Ok(llm::CompletionResponse {
            content: content.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{OpenAI, classify};
    use crate::llm::{CompletionRequest, LLM};
    use crate::testing::serve;
    use crate::{Error, Result, RetryPolicy};
    use async_openai::error::{ApiError, OpenAIError};
    use std::time::Duration;

    fn api_error(r#type: Option<&str>, code: Option<&str>) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: "failed".to_string(),
            r#type: r#type.map(str::to_string),
            param: None,
            code: code.map(str::to_string),
        })
    }

    #[test]
    fn test_classify_api_errors() {
        assert!(classify(api_error(None, None)).is_transient());
        assert!(classify(api_error(Some("requests"), Some("rate_limit_exceeded"))).is_transient());
        assert!(!classify(api_error(Some("invalid_request_error"), Some("invalid_api_key"))).is_transient());
        assert!(!classify(api_error(Some("insufficient_quota"), None)).is_transient());
    }

    #[tokio::test]
    async fn test_server_errors_follow_retry_policy() -> Result<()> {
        let server = serve("503 Service Unavailable", r#"{"error": {"message": "overloaded"}}"#).await?;
        let llm = OpenAI::with_endpoint(
            "test-model".to_string(),
            &format!("{}/v1", server.url),
            "test-key",
            0.7,
            Duration::from_secs(5),
        )?;

        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let call = policy.run("completion", || {
            llm.completion(CompletionRequest {
                prompt: "Summarize solar power",
                max_tokens: 16,
            })
        });
        let result = tokio::time::timeout(Duration::from_secs(20), call)
            .await
            .expect("retries are bounded");

        assert!(matches!(result, Err(Error::TransientServiceError(_))));
        assert_eq!(server.hits(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() -> Result<()> {
        let server = serve(
            "401 Unauthorized",
            r#"{"error": {"message": "bad key", "type": "invalid_request_error", "code": "invalid_api_key"}}"#,
        )
        .await?;
        let llm = OpenAI::with_endpoint(
            "test-model".to_string(),
            &format!("{}/v1", server.url),
            "test-key",
            0.7,
            Duration::from_secs(5),
        )?;

        let result = RetryPolicy::new(2, Duration::from_millis(1))
            .run("completion", || {
                llm.completion(CompletionRequest {
                    prompt: "Summarize solar power",
                    max_tokens: 16,
                })
            })
            .await;

        assert!(matches!(result, Err(Error::OpenaiError(_))));
        assert_eq!(server.hits(), 1);
        Ok(())
    }
}
