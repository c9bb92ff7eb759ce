//! Environment access seam.
//!
//! The registry reads credentials through this trait instead of touching
//! `std::env` directly, so availability logic is testable without
//! mutating process-wide state.

use std::collections::BTreeMap;

/// A source of environment variables.
pub trait EnvSource: Send + Sync {
    /// Look up a variable. Empty values count as absent.
    fn var(&self, name: &str) -> Option<String>;

    /// All variable names, for prefix scans (custom agent declarations).
    fn names(&self) -> Vec<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }

    fn names(&self) -> Vec<String> {
        std::env::vars().map(|(name, _)| name).collect()
    }
}

/// An in-memory environment, for tests and embedding hosts that manage
/// credentials themselves.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: BTreeMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl EnvSource for MapEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).filter(|v| !v.is_empty()).cloned()
    }

    fn names(&self) -> Vec<String> {
        self.vars.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_env_lookup() {
        let env = MapEnv::new().with("OPENAI_API_KEY", "sk-test");
        assert_eq!(env.var("OPENAI_API_KEY").as_deref(), Some("sk-test"));
        assert!(env.var("MISSING").is_none());
    }

    #[test]
    fn empty_values_count_as_absent() {
        let env = MapEnv::new().with("OPENAI_API_KEY", "");
        assert!(env.var("OPENAI_API_KEY").is_none());
    }

    #[test]
    fn names_lists_all_keys() {
        let env = MapEnv::new().with("A", "1").with("B", "2");
        assert_eq!(env.names(), vec!["A".to_string(), "B".to_string()]);
    }
}
