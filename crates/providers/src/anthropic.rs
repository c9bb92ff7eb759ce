//! Anthropic native adapter implementation.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible
//! proxy):
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as a top-level field, lifted out of the message list

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use agentmux_core::adapter::{AdapterRequest, ProviderAdapter, WireMessage};
use agentmux_core::error::DispatchError;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API adapter.
pub struct AnthropicAdapter {
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    /// Split wire messages into the top-level system prompt and the
    /// remaining dialogue turns.
    fn extract_system(messages: &[WireMessage]) -> (Option<String>, Vec<&WireMessage>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut turns: Vec<&WireMessage> = Vec::new();

        for msg in messages {
            if msg.role == "system" {
                system_parts.push(&msg.content);
            } else {
                turns.push(msg);
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, turns)
    }

    async fn send(&self, request: &AdapterRequest) -> Result<String, DispatchError> {
        let url = format!("{}/messages", request.base_url.trim_end_matches('/'));
        let (system, turns) = Self::extract_system(&request.messages);

        let api_messages: Vec<serde_json::Value> = turns
            .iter()
            .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": api_messages,
            "max_tokens": DEFAULT_MAX_TOKENS,
        });
        if let Some(ref sys) = system {
            body["system"] = serde_json::json!(sys);
        }

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &request.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
            warn!(provider = "anthropic", status, body = %error_body, "provider returned error");
            return Err(DispatchError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: MessagesResponse =
            response.json().await.map_err(|e| DispatchError::Api {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        extract_text(api_response)
    }
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_text(response: MessagesResponse) -> Result<String, DispatchError> {
    if let Some(envelope) = response.error {
        warn!(provider = "anthropic", message = %envelope.message, "provider error envelope");
        return Err(DispatchError::ErrorEnvelope(envelope.message));
    }

    let text: String = response
        .content
        .iter()
        .filter_map(|block| block.text.as_deref())
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() {
        return Err(DispatchError::Api {
            status_code: 200,
            message: "No text content blocks in response".into(),
        });
    }
    Ok(text)
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn call_llm(
        &self,
        request: AdapterRequest,
        cancel: CancellationToken,
    ) -> Result<String, DispatchError> {
        debug!(provider = "anthropic", model = %request.model, "sending completion request");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
            result = self.send(&request) => result,
        }
    }
}

// --- Anthropic API response types (internal) ---

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    error: Option<ApiErrorEnvelope>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    message: String,
}
