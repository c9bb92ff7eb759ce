//! ProviderAdapter trait: the abstraction over LLM backends.
//!
//! An adapter knows how to send an already-wire-shaped request to one
//! vendor API and return the completion text. It is a black box to the
//! rest of the system: the dispatch layer resolves credentials, maps the
//! internal conversation into wire roles, and races the call against a
//! cancellation token; the adapter only speaks HTTP.
//!
//! Implementations: OpenAI-compatible, Anthropic native, host-registered
//! custom adapters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;

/// A message in the adapter's wire vocabulary.
///
/// Roles here are the provider-side strings ("system", "user",
/// "assistant"), produced by the dispatch layer from the internal
/// `Conversation`. Adapters never see the internal role enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

impl WireMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// A fully-resolved request for one adapter call.
///
/// Credentials and base URL are resolved by the agent registry before this
/// struct is built; the adapter applies them verbatim.
#[derive(Clone)]
pub struct AdapterRequest {
    /// The model to call (e.g. "gpt-4o", "claude-sonnet-4").
    pub model: String,

    /// Wire-shaped messages, in conversation order.
    pub messages: Vec<WireMessage>,

    /// API key to authenticate with.
    pub api_key: String,

    /// Base URL of the endpoint (no trailing slash).
    pub base_url: String,
}

impl std::fmt::Debug for AdapterRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRequest")
            .field("model", &self.model)
            .field("messages", &self.messages.len())
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// The core adapter trait.
///
/// At most one adapter is registered per provider key. The dispatch layer
/// additionally races every call against the shared cancellation token, so
/// an adapter that ignores `cancel` is still interruptible; well-behaved
/// adapters poll it themselves to abort the underlying request early.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// A human-readable name for this adapter (e.g. "openai", "anthropic").
    fn name(&self) -> &str;

    /// The wire role this provider uses for system instructions.
    fn system_role(&self) -> &str {
        "system"
    }

    /// Send the request and return the completion text.
    async fn call_llm(
        &self,
        request: AdapterRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<String, DispatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_debug_redacts_api_key() {
        let req = AdapterRequest {
            model: "gpt-4o".into(),
            messages: vec![WireMessage::new("user", "hi")],
            api_key: "sk-secret".into(),
            base_url: "https://api.openai.com/v1".into(),
        };
        let rendered = format!("{req:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn wire_message_serialization() {
        let msg = WireMessage::new("assistant", "done");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"assistant\""));
    }
}
