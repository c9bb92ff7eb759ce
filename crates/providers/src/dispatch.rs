//! Low-level dispatch: one cancellable outbound call per invocation.
//!
//! The dispatcher owns the role mapping from the internal conversation
//! (system/human/ai) to the adapter's wire vocabulary, applies the
//! already-resolved credential triple, and races every call against the
//! process-wide cancellation scope. Credential *resolution* is the agent
//! registry's job; by the time a call reaches this layer the api key,
//! base URL, and provider key are final.

use std::sync::Arc;
use tracing::debug;

use agentmux_core::adapter::{AdapterRequest, WireMessage};
use agentmux_core::cancel::CancelScope;
use agentmux_core::error::DispatchError;
use agentmux_core::message::{Conversation, Role};

use crate::registry::AdapterRegistry;

/// The resolved credential triple for one call.
#[derive(Clone)]
pub struct CallOptions {
    /// Provider key used to look up the adapter.
    pub provider: String,

    /// API key, already resolved from the environment.
    pub api_key: String,

    /// Base URL, already resolved from catalog overrides or defaults.
    pub base_url: String,
}

impl std::fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOptions")
            .field("provider", &self.provider)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Converts conversations into wire calls and tracks one cancellation
/// domain across all in-flight dispatches.
pub struct Dispatcher {
    adapters: Arc<AdapterRegistry>,
    scope: CancelScope,
}

impl Dispatcher {
    pub fn new(adapters: Arc<AdapterRegistry>) -> Self {
        Self {
            adapters,
            scope: CancelScope::new(),
        }
    }

    /// Perform one call against the given model with resolved options.
    ///
    /// `prompt_override`, when present, replaces every system message in
    /// the wire copy. The caller's conversation is never mutated.
    pub async fn call_llm_with_model(
        &self,
        model: &str,
        conversation: &Conversation,
        prompt_override: Option<&str>,
        options: &CallOptions,
    ) -> Result<String, DispatchError> {
        let adapter = self
            .adapters
            .get(&options.provider)
            .ok_or_else(|| DispatchError::NoAdapter(options.provider.clone()))?;

        let messages = to_wire(conversation, prompt_override, adapter.system_role());

        let request = AdapterRequest {
            model: model.to_string(),
            messages,
            api_key: options.api_key.clone(),
            base_url: options.base_url.clone(),
        };

        debug!(
            provider = %options.provider,
            model = %model,
            messages = request.messages.len(),
            "dispatching call"
        );

        // Calls in flight keep the token they grabbed; cancel_requests
        // trips them all and installs a fresh token for later calls.
        let token = self.scope.token();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(DispatchError::Cancelled),
            result = adapter.call_llm(request, token.clone()) => result,
        }
    }

    /// Cancel every currently in-flight dispatch. Each one fails with
    /// `DispatchError::Cancelled`; calls started afterwards are unaffected.
    pub fn cancel_requests(&self) {
        debug!("cancelling all in-flight dispatches");
        self.scope.cancel();
    }

    /// The adapter registry this dispatcher routes through.
    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }
}

/// Produce the adapter's wire copy of a conversation.
///
/// Fixed three-way role mapping: human → "user", ai → "assistant",
/// system → the adapter's system-equivalent role. A prompt override
/// replaces all system messages and is placed first.
fn to_wire(
    conversation: &Conversation,
    prompt_override: Option<&str>,
    system_role: &str,
) -> Vec<WireMessage> {
    let mut wire = Vec::with_capacity(conversation.len() + 1);

    if let Some(prompt) = prompt_override {
        wire.push(WireMessage::new(system_role, prompt));
    }

    for message in &conversation.messages {
        let role = match message.role {
            Role::Human => "user",
            Role::Ai => "assistant",
            Role::System => {
                if prompt_override.is_some() {
                    continue; // replaced by the override
                }
                system_role
            }
        };
        wire.push(WireMessage::new(role, message.content.clone()));
    }

    wire
}
