//! OpenAI-compatible adapter implementation.
//!
//! Works with: OpenAI, OpenRouter, DeepSeek, Groq, Mistral, Together,
//! Fireworks, Ollama, and any endpoint exposing an OpenAI-compatible
//! `/chat/completions` route. Credentials and base URL arrive resolved in
//! the request; one adapter instance serves any number of vendors.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use agentmux_core::adapter::{AdapterRequest, ProviderAdapter};
use agentmux_core::error::DispatchError;

/// An OpenAI-compatible LLM adapter.
pub struct OpenAiCompatAdapter {
    name: String,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    /// Create a new adapter named after the provider key it serves.
    pub fn new(name: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            client,
        }
    }

    async fn send(&self, request: &AdapterRequest) -> Result<String, DispatchError> {
        let url = format!(
            "{}/chat/completions",
            request.base_url.trim_end_matches('/')
        );

        let body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": false,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", request.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(DispatchError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(DispatchError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "provider returned error");
            return Err(DispatchError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| DispatchError::Api {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        extract_text(&self.name, api_response)
    }
}

/// Pull the completion text out of a parsed body, converting error
/// envelopes and empty bodies into errors instead of empty strings.
fn extract_text(provider: &str, response: ApiResponse) -> Result<String, DispatchError> {
    if let Some(envelope) = response.error {
        warn!(provider = %provider, message = %envelope.message, "provider error envelope");
        return Err(DispatchError::ErrorEnvelope(envelope.message));
    }

    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content);

    match content {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(DispatchError::Api {
            status_code: 200,
            message: "No completion content in response".into(),
        }),
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call_llm(
        &self,
        request: AdapterRequest,
        cancel: CancellationToken,
    ) -> Result<String, DispatchError> {
        debug!(provider = %self.name, model = %request.model, "sending completion request");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
            result = self.send(&request) => result,
        }
    }
}

// --- OpenAI API response types (internal) ---

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    error: Option<ApiErrorEnvelope>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> ApiResponse {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn extracts_completion_text() {
        let response = parse(r#"{"choices":[{"message":{"content":"Hello!"}}]}"#);
        assert_eq!(extract_text("openai", response).unwrap(), "Hello!");
    }

    #[test]
    fn error_envelope_becomes_error() {
        let response =
            parse(r#"{"choices":[],"error":{"message":"model overloaded","type":"server_error"}}"#);
        let err = extract_text("openai", response).unwrap_err();
        assert!(matches!(err, DispatchError::ErrorEnvelope(m) if m.contains("overloaded")));
    }

    #[test]
    fn empty_choices_is_an_error_not_empty_string() {
        let response = parse(r#"{"choices":[]}"#);
        let err = extract_text("openai", response).unwrap_err();
        assert!(matches!(err, DispatchError::Api { .. }));
    }

    #[test]
    fn empty_content_is_an_error() {
        let response = parse(r#"{"choices":[{"message":{"content":""}}]}"#);
        assert!(extract_text("openai", response).is_err());
    }

    #[tokio::test]
    async fn pre_cancelled_token_short_circuits() {
        let adapter = OpenAiCompatAdapter::new("openai");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = AdapterRequest {
            model: "gpt-4o".into(),
            messages: vec![],
            api_key: "sk-test".into(),
            // Unroutable; the cancelled token must win before any I/O.
            base_url: "http://192.0.2.1:1".into(),
        };
        let err = adapter.call_llm(request, cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
