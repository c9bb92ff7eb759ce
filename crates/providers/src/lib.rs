//! LLM provider adapters and the low-level dispatch layer for Agentmux.
//!
//! Two halves:
//! - `registry`: the process-wide map from provider key to adapter, with
//!   built-in adapters for the well-known vendors and explicit host
//!   registration for everything else.
//! - `dispatch`: converts the internal conversation into an adapter's wire
//!   vocabulary, performs the call with resolved credentials, and supports
//!   cooperative cancellation of all in-flight calls.

pub mod anthropic;
pub mod dispatch;
pub mod openai_compat;
pub mod registry;

pub use anthropic::AnthropicAdapter;
pub use dispatch::{CallOptions, Dispatcher};
pub use openai_compat::OpenAiCompatAdapter;
pub use registry::{AdapterRegistry, RegistryError};

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("https://api.openai.com/v1"),
        "anthropic" => Some("https://api.anthropic.com/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "mistral" => Some("https://api.mistral.ai/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        "fireworks" => Some("https://api.fireworks.ai/inference/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openai").unwrap().contains("api.openai.com"));
        assert!(default_base_url("ollama").unwrap().contains("localhost:11434"));
        assert!(default_base_url("acme").is_none());
    }
}
