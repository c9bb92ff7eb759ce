//! The agent registry and alias index.
//!
//! Built once from the normalized catalog plus the environment, then
//! read-only. Construction never fails: providers without usable
//! credentials, adapters, or models become inactive entries with a
//! recorded reason instead of errors.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use agentmux_config::{Catalog, ModelConfig, TaskMode};
use agentmux_core::error::AgentError;
use agentmux_providers::dispatch::CallOptions;
use agentmux_providers::registry::AdapterRegistry;
use agentmux_providers::default_base_url;

use crate::env::EnvSource;

/// Prefix/suffix identifying ad-hoc custom agent declarations in the
/// environment: `CUSTOM_LLM_<NAME>_API_KEY` plus sibling `_BASE_URL` and
/// `_MODEL` variables.
const CUSTOM_PREFIX: &str = "CUSTOM_LLM_";
const CUSTOM_KEY_SUFFIX: &str = "_API_KEY";

/// Fixed provider ordering used to pick the process-wide default agent.
const PROVIDER_PRIORITY: &[&str] = &[
    "anthropic",
    "openai",
    "google",
    "mistral",
    "deepseek",
    "groq",
    "openrouter",
    "ollama",
];

/// A model an agent can actually serve: catalog record plus resolved
/// credentials.
#[derive(Clone)]
pub struct AvailableModel {
    pub config: ModelConfig,
    pub api_key: String,
    pub base_url: String,
}

impl std::fmt::Debug for AvailableModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailableModel")
            .field("config", &self.config)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// The unit callers address task requests to.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    /// Registry key (lowercase).
    pub name: String,

    /// Display name as declared (provider key, or custom agent name).
    pub canonical_name: String,

    /// Owning provider key from the catalog.
    pub provider: String,

    /// Adapter registry key dispatches route through.
    pub adapter: String,

    /// Env var name the default model's key was resolved from.
    pub api_key_env: String,

    /// Default model name.
    pub default_model: String,

    /// Models with present credentials, catalog order.
    pub models: Vec<AvailableModel>,
}

impl AgentRecord {
    /// Whether any available model supports the given mode.
    pub fn supports(&self, mode: TaskMode) -> bool {
        self.models.iter().any(|m| m.config.mode == mode)
    }

    /// The model to use for a resolved mode: the default model when it
    /// matches, else the first available model with that mode, else the
    /// default model regardless.
    pub fn model_for(&self, mode: TaskMode) -> &AvailableModel {
        if let Some(default) = self.default() {
            if default.config.mode == mode {
                return default;
            }
        }
        self.models
            .iter()
            .find(|m| m.config.mode == mode)
            .or_else(|| self.default())
            .unwrap_or(&self.models[0])
    }

    /// The default model's record.
    pub fn default(&self) -> Option<&AvailableModel> {
        self.models
            .iter()
            .find(|m| m.config.name == self.default_model)
    }

    /// Resolved credential triple for one of this agent's models.
    pub fn call_options(&self, model: &AvailableModel) -> CallOptions {
        CallOptions {
            provider: self.adapter.clone(),
            api_key: model.api_key.clone(),
            base_url: model.base_url.clone(),
        }
    }
}

/// One line of the registry's introspectable build summary.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentStatus {
    pub name: String,
    pub provider: String,
    pub active: bool,
    /// Why the agent is unavailable; `None` when active.
    pub reason: Option<String>,
    pub default_model: Option<String>,
}

/// The process-wide set of usable agents.
pub struct AgentRegistry {
    agents: HashMap<String, AgentRecord>,
    /// Insertion order, for default fallback and round-robin fan-out.
    order: Vec<String>,
    /// Case-insensitive alias → agent key; first writer wins.
    aliases: HashMap<String, String>,
    default_agent: Option<String>,
    statuses: Vec<AgentStatus>,
}

impl AgentRegistry {
    /// Build the registry. Never fails; see `statuses()` for skips.
    pub fn build(catalog: &Catalog, env: &dyn EnvSource, adapters: &AdapterRegistry) -> Self {
        let mut registry = Self {
            agents: HashMap::new(),
            order: Vec::new(),
            aliases: HashMap::new(),
            default_agent: None,
            statuses: Vec::new(),
        };

        registry.build_provider_agents(catalog, env, adapters);
        registry.build_custom_agents(catalog, env, adapters);
        registry.build_alias_index();
        registry.choose_default();

        info!(
            active = registry.order.len(),
            inactive = registry.statuses.iter().filter(|s| !s.active).count(),
            default = registry.default_agent.as_deref().unwrap_or("-"),
            "agent registry built"
        );
        registry
    }

    fn build_provider_agents(
        &mut self,
        catalog: &Catalog,
        env: &dyn EnvSource,
        adapters: &AdapterRegistry,
    ) {
        for (key, provider) in &catalog.providers {
            let models = catalog.models_for(key);
            if models.is_empty() {
                self.skip(key, key, "no models");
                continue;
            }

            let adapter_key = provider.adapter.clone().unwrap_or_else(|| key.clone());
            if !adapters.has(&adapter_key) {
                self.skip(key, key, "no adapter");
                continue;
            }

            // Model-level key-env overrides take precedence over the
            // provider-level name (including provider-level absence).
            let resolvable: Vec<&ModelConfig> = models
                .iter()
                .filter(|m| m.api_key_env.is_some() || provider.api_key_env.is_some())
                .collect();
            if resolvable.is_empty() {
                self.skip(key, key, "no resolvable API key name");
                continue;
            }

            let mut available = Vec::new();
            let mut key_env_used = None;
            let mut key_absent = false;
            let mut base_url_absent = false;
            for model in resolvable {
                let env_name = model
                    .api_key_env
                    .as_deref()
                    .or(provider.api_key_env.as_deref())
                    .unwrap_or_default();
                let Some(api_key) = env.var(env_name) else {
                    key_absent = true;
                    continue;
                };
                let Some(base_url) = model
                    .base_url
                    .clone()
                    .or_else(|| provider.base_url.clone())
                    .or_else(|| default_base_url(key).map(String::from))
                else {
                    base_url_absent = true;
                    continue;
                };
                key_env_used.get_or_insert_with(|| env_name.to_string());
                available.push(AvailableModel {
                    config: model.clone(),
                    api_key,
                    base_url,
                });
            }
            if available.is_empty() {
                let reason = if key_absent || !base_url_absent {
                    "missing API keys"
                } else {
                    "no base URL"
                };
                self.skip(key, key, reason);
                continue;
            }

            let default_model = select_default_model(provider.default_model.as_deref(), &available);

            self.insert(AgentRecord {
                name: key.to_lowercase(),
                canonical_name: key.clone(),
                provider: key.clone(),
                adapter: adapter_key,
                api_key_env: key_env_used.unwrap_or_default(),
                default_model,
                models: available,
            });
        }
    }

    fn build_custom_agents(
        &mut self,
        catalog: &Catalog,
        env: &dyn EnvSource,
        adapters: &AdapterRegistry,
    ) {
        let mut names: Vec<String> = env
            .names()
            .into_iter()
            .filter_map(|var| {
                let middle = var
                    .strip_prefix(CUSTOM_PREFIX)?
                    .strip_suffix(CUSTOM_KEY_SUFFIX)?;
                if middle.is_empty() {
                    return None;
                }
                Some(middle.to_string())
            })
            .collect();
        names.sort();

        for custom in names {
            let agent_name = custom.to_lowercase();
            let key_var = format!("{CUSTOM_PREFIX}{custom}{CUSTOM_KEY_SUFFIX}");

            let Some(api_key) = env.var(&key_var) else {
                self.skip(&agent_name, "custom", "empty API key");
                continue;
            };
            let Some(model_name) = env.var(&format!("{CUSTOM_PREFIX}{custom}_MODEL")) else {
                self.skip(&agent_name, "custom", "no model declared");
                continue;
            };
            let Some(model) = catalog.models.get(&model_name) else {
                self.skip(
                    &agent_name,
                    "custom",
                    format!("unknown model {model_name:?}"),
                );
                continue;
            };

            let provider_key = model.provider.clone();
            let adapter_key = catalog
                .providers
                .get(&provider_key)
                .and_then(|p| p.adapter.clone())
                .unwrap_or_else(|| provider_key.clone());
            if !adapters.has(&adapter_key) {
                self.skip(&agent_name, &provider_key, "no adapter");
                continue;
            }

            let base_url = env
                .var(&format!("{CUSTOM_PREFIX}{custom}_BASE_URL"))
                .or_else(|| model.base_url.clone())
                .or_else(|| {
                    catalog
                        .providers
                        .get(&provider_key)
                        .and_then(|p| p.base_url.clone())
                })
                .or_else(|| default_base_url(&provider_key).map(String::from));
            let Some(base_url) = base_url else {
                self.skip(&agent_name, &provider_key, "no base URL");
                continue;
            };

            if self.agents.contains_key(&agent_name) {
                self.skip(&agent_name, &provider_key, "name collides with existing agent");
                continue;
            }

            self.insert(AgentRecord {
                name: agent_name,
                canonical_name: custom.clone(),
                provider: provider_key,
                adapter: adapter_key,
                api_key_env: key_var,
                default_model: model_name.clone(),
                models: vec![AvailableModel {
                    config: model.clone(),
                    api_key,
                    base_url,
                }],
            });
        }
    }

    fn build_alias_index(&mut self) {
        for name in &self.order {
            let agent = &self.agents[name];
            let mut candidates = vec![
                agent.name.clone(),
                agent.canonical_name.to_lowercase(),
                agent.provider.to_lowercase(),
            ];
            for model in &agent.models {
                candidates.push(model.config.name.to_lowercase());
                if let Some(ref alias) = model.config.alias {
                    candidates.push(alias.to_lowercase());
                }
            }
            for alias in candidates {
                match self.aliases.entry(alias) {
                    // First writer wins; a losing claim from another agent
                    // is recorded so the ambiguity stays introspectable.
                    Entry::Occupied(existing) => {
                        let winner = existing.get().clone();
                        if winner != *name {
                            let alias = existing.key().clone();
                            warn!(%alias, %winner, loser = %name, "ambiguous alias, first writer kept");
                            self.statuses.push(AgentStatus {
                                name: alias,
                                provider: winner.clone(),
                                active: false,
                                reason: Some(format!(
                                    "ambiguous alias: resolves to agent {winner:?}, also claimed by {name:?}"
                                )),
                                default_model: None,
                            });
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(name.clone());
                    }
                }
            }
        }
    }

    fn choose_default(&mut self) {
        for provider in PROVIDER_PRIORITY {
            if let Some(name) = self
                .order
                .iter()
                .find(|n| self.agents[*n].provider == *provider)
            {
                self.default_agent = Some(name.clone());
                return;
            }
        }
        self.default_agent = self.order.first().cloned();
    }

    fn insert(&mut self, record: AgentRecord) {
        debug!(agent = %record.name, provider = %record.provider, model = %record.default_model, "agent active");
        self.statuses.push(AgentStatus {
            name: record.name.clone(),
            provider: record.provider.clone(),
            active: true,
            reason: None,
            default_model: Some(record.default_model.clone()),
        });
        self.order.push(record.name.clone());
        self.agents.insert(record.name.clone(), record);
    }

    fn skip(&mut self, name: &str, provider: &str, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(agent = %name, provider = %provider, %reason, "agent inactive");
        self.statuses.push(AgentStatus {
            name: name.to_string(),
            provider: provider.to_string(),
            active: false,
            reason: Some(reason),
            default_model: None,
        });
    }

    /// Resolve an agent by name, alias, or the process default.
    ///
    /// Order: exact registry key (case-insensitive) → alias index →
    /// process default.
    pub fn get(&self, name: Option<&str>) -> Result<&AgentRecord, AgentError> {
        if self.agents.is_empty() {
            return Err(AgentError::NoAgentsConfigured);
        }

        if let Some(name) = name {
            let key = name.to_lowercase();
            if let Some(agent) = self.agents.get(&key) {
                return Ok(agent);
            }
            if let Some(owner) = self.aliases.get(&key) {
                return Ok(&self.agents[owner]);
            }
        }

        self.default_agent
            .as_deref()
            .and_then(|name| self.agents.get(name))
            .ok_or(AgentError::DefaultAgentNotConfigured)
    }

    /// Active agents in insertion order (brainstorm round-robin order).
    pub fn active_agents(&self) -> Vec<&AgentRecord> {
        self.order.iter().map(|n| &self.agents[n]).collect()
    }

    /// The structured build summary: one entry per considered agent,
    /// active or not. Never fails.
    pub fn statuses(&self) -> &[AgentStatus] {
        &self.statuses
    }

    /// The process-wide default agent's registry key.
    pub fn default_agent(&self) -> Option<&str> {
        self.default_agent.as_deref()
    }

    /// Number of active agents.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no agents are active.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Default model priority: provider-declared default (when present in the
/// available set) → first deep → first fast → first available.
fn select_default_model(declared: Option<&str>, available: &[AvailableModel]) -> String {
    if let Some(declared) = declared {
        if available.iter().any(|m| m.config.name == declared) {
            return declared.to_string();
        }
    }
    available
        .iter()
        .find(|m| m.config.mode == TaskMode::Deep)
        .or_else(|| available.iter().find(|m| m.config.mode == TaskMode::Fast))
        .or_else(|| available.first())
        .map(|m| m.config.name.clone())
        .unwrap_or_default()
}

/// A lazily-built, resettable handle to the process-wide registry.
///
/// The original built its registry in module-level state with no guard
/// against a concurrent double build; this cell serializes the first
/// build and exposes an explicit reset for test isolation.
#[derive(Default)]
pub struct SharedRegistry {
    cell: RwLock<Option<Arc<AgentRegistry>>>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the registry, building it on first use. Concurrent callers
    /// during the first build all observe the same instance.
    pub fn get_or_build(&self, build: impl FnOnce() -> AgentRegistry) -> Arc<AgentRegistry> {
        if let Some(existing) = self
            .cell
            .read()
            .expect("registry cell lock poisoned")
            .as_ref()
        {
            return existing.clone();
        }

        let mut guard = self.cell.write().expect("registry cell lock poisoned");
        if let Some(existing) = guard.as_ref() {
            return existing.clone();
        }
        let built = Arc::new(build());
        *guard = Some(built.clone());
        built
    }

    /// Drop the cached registry so the next access rebuilds. Test hook.
    pub fn reset(&self) {
        *self.cell.write().expect("registry cell lock poisoned") = None;
    }
}
