//! Provider/model catalog loading and normalization for Agentmux.
//!
//! The catalog is a declarative JSON document naming providers and the
//! models they serve. Normalization turns it into validated in-memory
//! records plus a non-fatal diagnostics list: malformed *content* never
//! aborts construction; a broken provider simply ends up inactive later,
//! and even an unreadable document yields an empty catalog with a single
//! recorded error rather than a failure.

mod normalize;

pub use normalize::normalize;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Execution strategy a model is suited to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    /// Single-shot execution
    Fast,
    /// Plan-then-execute
    Deep,
}

impl TaskMode {
    /// Parse a mode string, case-insensitively. Unknown strings are `None`
    /// (the normalizer downgrades them to `Fast` with a warning).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Some(TaskMode::Fast),
            "deep" => Some(TaskMode::Deep),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskMode::Fast => write!(f, "fast"),
            TaskMode::Deep => write!(f, "deep"),
        }
    }
}

/// Ordered, non-fatal problems accumulated during normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Diagnostics {
    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(kind = "error", %message, "catalog diagnostic");
        self.errors.push(message);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(kind = "warning", %message, "catalog diagnostic");
        self.warnings.push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

/// A normalized provider record. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// The provider key (e.g. "openai", "anthropic").
    pub key: String,

    /// Environment variable holding the API key, if known.
    pub api_key_env: Option<String>,

    /// Base URL override; providers without one fall back to the
    /// well-known default for their key.
    pub base_url: Option<String>,

    /// Declared default model name, if any.
    pub default_model: Option<String>,

    /// Adapter registry key the host must register for this provider.
    /// Absent means the built-in adapter for `key` is expected.
    pub adapter: Option<String>,
}

/// A normalized model record. Many per provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// The model name callers address (e.g. "gpt-4o").
    pub name: String,

    /// Owning provider key. May name a provider absent from the catalog
    /// (kept dangling, with a warning).
    pub provider: String,

    /// Execution mode this model is suited to.
    pub mode: TaskMode,

    /// Model-level API key env override (takes precedence over the
    /// provider-level name).
    pub api_key_env: Option<String>,

    /// Model-level base URL override.
    pub base_url: Option<String>,

    /// Optional alias callers may address this model by.
    pub alias: Option<String>,
}

/// The normalized catalog: validated records plus accumulated diagnostics.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub providers: BTreeMap<String, ProviderConfig>,
    pub models: BTreeMap<String, ModelConfig>,

    /// Models grouped by the provider key they reference (including
    /// dangling references to unconfigured providers).
    pub provider_models: BTreeMap<String, Vec<ModelConfig>>,

    pub issues: Diagnostics,
}

impl Catalog {
    /// Load and normalize a catalog from a JSON file.
    ///
    /// I/O and parse failures are recorded as a single diagnostic error
    /// with providers/models left empty; this function never fails.
    pub fn load_from(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                let mut catalog = Catalog::default();
                catalog
                    .issues
                    .error(format!("failed to read catalog at {}: {e}", path.display()));
                return catalog;
            }
        };
        Self::from_json_str(&content)
    }

    /// Normalize a catalog from a JSON string.
    pub fn from_json_str(content: &str) -> Self {
        match serde_json::from_str::<RawCatalog>(content) {
            Ok(raw) => normalize(raw),
            Err(e) => {
                let mut catalog = Catalog::default();
                catalog.issues.error(format!("failed to parse catalog: {e}"));
                catalog
            }
        }
    }

    /// Models referencing the given provider key.
    pub fn models_for(&self, provider: &str) -> &[ModelConfig] {
        self.provider_models
            .get(provider)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Default API key environment variable names for well-known vendors.
///
/// Used when a provider declaration omits `apiKeyEnv`.
pub fn default_api_key_env(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "google" => Some("GOOGLE_API_KEY"),
        "mistral" => Some("MISTRAL_API_KEY"),
        "deepseek" => Some("DEEPSEEK_API_KEY"),
        "groq" => Some("GROQ_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        "together" => Some("TOGETHER_API_KEY"),
        "fireworks" => Some("FIREWORKS_API_KEY"),
        _ => None,
    }
}

// --- Raw document shapes (as written by users) ---

/// The raw catalog document, before normalization.
#[derive(Debug, Deserialize)]
pub struct RawCatalog {
    #[serde(default)]
    pub providers: BTreeMap<String, RawProvider>,

    #[serde(default)]
    pub models: BTreeMap<String, RawModel>,
}

#[derive(Debug, Deserialize)]
pub struct RawProvider {
    #[serde(rename = "baseURL")]
    pub base_url: Option<String>,

    #[serde(rename = "apiKeyEnv")]
    pub api_key_env: Option<String>,

    #[serde(rename = "defaultModel")]
    pub default_model: Option<String>,

    /// Adapter registry key. `module` is accepted for compatibility with
    /// catalogs that predate explicit adapter registration.
    #[serde(alias = "module")]
    pub adapter: Option<String>,

    /// Provider-specific extras, carried but not interpreted here.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A model entry: either a bare provider-key string (shorthand for
/// `{"provider": key}`) or a full declaration.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawModel {
    Shorthand(String),
    Full(RawModelFull),
}

#[derive(Debug, Deserialize)]
pub struct RawModelFull {
    pub provider: Option<String>,

    pub mode: Option<RawMode>,

    #[serde(rename = "apiKeyEnv")]
    pub api_key_env: Option<String>,

    #[serde(rename = "baseURL")]
    pub base_url: Option<String>,

    pub alias: Option<String>,
}

/// A mode field: a single string or an array of candidates.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawMode {
    One(String),
    Many(Vec<String>),
}
