//! Adapter registry: the lookup from provider key to adapter.
//!
//! At most one adapter per key. Duplicate registration is rejected unless
//! the caller explicitly overrides; built-in registration is idempotent so
//! hosts can call it freely before adding their own adapters. A provider
//! whose adapter key never shows up here is simply inactive later ("no
//! adapter"), never a crash.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use agentmux_core::adapter::ProviderAdapter;

use crate::anthropic::AnthropicAdapter;
use crate::openai_compat::OpenAiCompatAdapter;

/// Provider keys that get an OpenAI-compatible built-in adapter.
const OPENAI_COMPAT_BUILTINS: &[&str] = &[
    "openai",
    "openrouter",
    "deepseek",
    "groq",
    "mistral",
    "together",
    "fireworks",
    "ollama",
];

/// Adapter registration errors.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("adapter already registered for provider key {0:?}")]
    Duplicate(String),
}

/// The process-wide adapter lookup.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with the built-in adapters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_builtins();
        registry
    }

    /// Register the built-in adapters for well-known vendors.
    ///
    /// Idempotent: keys that already have an adapter (built-in or
    /// host-supplied) are left untouched.
    pub fn register_builtins(&mut self) {
        for key in OPENAI_COMPAT_BUILTINS {
            self.adapters
                .entry((*key).to_string())
                .or_insert_with(|| Arc::new(OpenAiCompatAdapter::new(*key)));
        }
        self.adapters
            .entry("anthropic".to_string())
            .or_insert_with(|| Arc::new(AnthropicAdapter::new()));
    }

    /// Register an adapter under a provider key. Errors if the key is
    /// already bound.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Result<(), RegistryError> {
        let key = key.into();
        if self.adapters.contains_key(&key) {
            return Err(RegistryError::Duplicate(key));
        }
        tracing::debug!(provider = %key, adapter = %adapter.name(), "adapter registered");
        self.adapters.insert(key, adapter);
        Ok(())
    }

    /// Register an adapter, replacing any existing binding for the key.
    pub fn register_override(
        &mut self,
        key: impl Into<String>,
        adapter: Arc<dyn ProviderAdapter>,
    ) {
        let key = key.into();
        tracing::debug!(provider = %key, adapter = %adapter.name(), "adapter registered (override)");
        self.adapters.insert(key, adapter);
    }

    /// Get the adapter for a provider key.
    pub fn get(&self, key: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(key).cloned()
    }

    /// Whether an adapter is bound for the key.
    pub fn has(&self, key: &str) -> bool {
        self.adapters.contains_key(key)
    }

    /// All registered provider keys, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.adapters.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmux_core::adapter::AdapterRequest;
    use agentmux_core::error::DispatchError;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct StubAdapter;

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn name(&self) -> &str {
            "stub"
        }

        async fn call_llm(
            &self,
            _request: AdapterRequest,
            _cancel: CancellationToken,
        ) -> Result<String, DispatchError> {
            Ok("stub reply".into())
        }
    }

    #[test]
    fn builtins_cover_well_known_vendors() {
        let registry = AdapterRegistry::with_builtins();
        assert!(registry.has("openai"));
        assert!(registry.has("anthropic"));
        assert!(registry.has("ollama"));
        assert!(!registry.has("acme"));
    }

    #[test]
    fn builtin_registration_is_idempotent() {
        let mut registry = AdapterRegistry::new();
        registry.register("openai", Arc::new(StubAdapter)).unwrap();
        registry.register_builtins();
        registry.register_builtins();

        // The host's adapter survives builtin passes.
        assert_eq!(registry.get("openai").unwrap().name(), "stub");
    }

    #[test]
    fn duplicate_registration_rejected_without_override() {
        let mut registry = AdapterRegistry::new();
        registry.register("acme", Arc::new(StubAdapter)).unwrap();

        let result = registry.register("acme", Arc::new(StubAdapter));
        assert!(matches!(result, Err(RegistryError::Duplicate(_))));

        registry.register_override("acme", Arc::new(StubAdapter));
        assert!(registry.has("acme"));
    }

    #[test]
    fn list_is_sorted() {
        let mut registry = AdapterRegistry::new();
        registry.register("zeta", Arc::new(StubAdapter)).unwrap();
        registry.register("alpha", Arc::new(StubAdapter)).unwrap();
        assert_eq!(registry.list(), vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
