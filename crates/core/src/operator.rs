//! Operator trait and catalog: named capabilities the engine can
//! recommend.
//!
//! Operators are externally supplied callables registered by the host
//! application. The task engine never executes them on its own; it asks an
//! agent to *select* suitable ones for a task, and the host decides what
//! to do with the selection (possibly via `call`).

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::OperatorError;

/// The core Operator trait.
#[async_trait]
pub trait Operator: Send + Sync {
    /// The unique name of this operator (identifier pattern).
    fn name(&self) -> &str;

    /// A description of what this operator does (shown to the agent
    /// during selection).
    fn description(&self) -> &str;

    /// Execute the operator with the given parameters.
    async fn execute(
        &self,
        params: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, OperatorError>;
}

type OperatorFuture =
    Pin<Box<dyn Future<Output = std::result::Result<serde_json::Value, OperatorError>> + Send>>;

/// An operator backed by a host-supplied closure.
///
/// Lets embedders register plain async functions without writing a trait
/// impl per capability.
pub struct FnOperator {
    name: String,
    description: String,
    func: Box<dyn Fn(serde_json::Value) -> OperatorFuture + Send + Sync>,
}

impl FnOperator {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        func: F,
    ) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<serde_json::Value, OperatorError>>
            + Send
            + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            func: Box::new(move |params| Box::pin(func(params))),
        }
    }
}

#[async_trait]
impl Operator for FnOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(
        &self,
        params: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, OperatorError> {
        (self.func)(params).await
    }
}

/// Whether a name matches the operator identifier pattern
/// `[A-Za-z_][A-Za-z0-9_]*`.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A registry of available operators.
///
/// Pure in-memory catalog; one registration per name, duplicates are an
/// error (unlike tool registries that allow replacement, a silently
/// shadowed operator would change what the agent was told it selected).
#[derive(Default)]
pub struct OperatorCatalog {
    operators: HashMap<String, Arc<dyn Operator>>,
    // Registration order, for stable presentation to agents.
    order: Vec<String>,
}

impl OperatorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operator. Errors on an invalid name or a duplicate.
    pub fn register(
        &mut self,
        operator: Arc<dyn Operator>,
    ) -> std::result::Result<(), OperatorError> {
        let name = operator.name().to_string();
        if !is_valid_name(&name) {
            return Err(OperatorError::InvalidName(name));
        }
        if self.operators.contains_key(&name) {
            return Err(OperatorError::Duplicate(name));
        }
        tracing::debug!(operator = %name, "operator registered");
        self.order.push(name.clone());
        self.operators.insert(name, operator);
        Ok(())
    }

    /// Convenience: register a closure-backed operator.
    pub fn register_fn<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        func: F,
    ) -> std::result::Result<(), OperatorError>
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<serde_json::Value, OperatorError>>
            + Send
            + 'static,
    {
        self.register(Arc::new(FnOperator::new(name, description, func)))
    }

    /// Get an operator by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Operator>> {
        self.operators.get(name).cloned()
    }

    /// Execute an operator by name.
    pub async fn call(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, OperatorError> {
        let operator = self
            .get(name)
            .ok_or_else(|| OperatorError::NotFound(name.to_string()))?;
        operator.execute(params).await
    }

    /// All (name, description) pairs, in registration order.
    pub fn descriptions(&self) -> Vec<(String, String)> {
        self.order
            .iter()
            .filter_map(|name| {
                self.operators
                    .get(name)
                    .map(|op| (name.clone(), op.description().to_string()))
            })
            .collect()
    }

    /// Number of registered operators.
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_catalog() -> OperatorCatalog {
        let mut catalog = OperatorCatalog::new();
        catalog
            .register_fn("echo", "Echoes back the input", |params| async move {
                Ok(params)
            })
            .unwrap();
        catalog
    }

    #[test]
    fn register_and_lookup() {
        let catalog = echo_catalog();
        assert!(catalog.get("echo").is_some());
        assert!(catalog.get("nonexistent").is_none());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn duplicate_registration_is_error() {
        let mut catalog = echo_catalog();
        let result =
            catalog.register_fn("echo", "Another echo", |params| async move { Ok(params) });
        assert!(matches!(result, Err(OperatorError::Duplicate(_))));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn invalid_names_rejected() {
        let mut catalog = OperatorCatalog::new();
        for bad in ["", "9lives", "has space", "dash-ed"] {
            let result = catalog.register_fn(bad, "bad", |p| async move { Ok(p) });
            assert!(
                matches!(result, Err(OperatorError::InvalidName(_))),
                "expected {bad:?} to be rejected"
            );
        }
        assert!(catalog.register_fn("_ok_2", "fine", |p| async move { Ok(p) }).is_ok());
    }

    #[tokio::test]
    async fn call_executes_operator() {
        let catalog = echo_catalog();
        let result = catalog.call("echo", json!({"x": 1})).await.unwrap();
        assert_eq!(result, json!({"x": 1}));
    }

    #[tokio::test]
    async fn call_missing_operator() {
        let catalog = OperatorCatalog::new();
        let err = catalog.call("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, OperatorError::NotFound(_)));
    }

    #[test]
    fn descriptions_in_registration_order() {
        let mut catalog = echo_catalog();
        catalog
            .register_fn("summarize", "Summarizes text", |p| async move { Ok(p) })
            .unwrap();
        let descs = catalog.descriptions();
        assert_eq!(descs.len(), 2);
        assert_eq!(descs[0].0, "echo");
        assert_eq!(descs[1].0, "summarize");
    }
}
