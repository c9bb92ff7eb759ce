//! Catalog normalization rules.
//!
//! Policy: malformed content is downgraded, never fatal.
//! - A model with no provider reference is an error and is dropped.
//! - A model naming an unknown provider is kept with a warning.
//! - A provider with no resolvable API-key env name gets a warning only.
//! - Mode problems (absent, invalid, multi-valued) normalize to `fast`
//!   with exactly one warning per model.

use std::collections::BTreeMap;

use crate::{
    Catalog, Diagnostics, ModelConfig, ProviderConfig, RawCatalog, RawMode, RawModel,
    RawModelFull, TaskMode, default_api_key_env,
};

/// Normalize a raw catalog document into validated records plus
/// diagnostics. Never fails.
pub fn normalize(raw: RawCatalog) -> Catalog {
    let mut issues = Diagnostics::default();

    let mut models: BTreeMap<String, ModelConfig> = BTreeMap::new();
    for (name, raw_model) in raw.models {
        match normalize_model(&name, raw_model, &mut issues) {
            Some(model) => {
                models.insert(name, model);
            }
            None => {} // dropped, error already recorded
        }
    }

    let mut providers: BTreeMap<String, ProviderConfig> = BTreeMap::new();
    for (key, raw_provider) in raw.providers {
        let api_key_env = raw_provider
            .api_key_env
            .or_else(|| default_api_key_env(&key).map(String::from));
        if api_key_env.is_none() {
            issues.warning(format!(
                "provider {key:?}: no API key environment variable declared and no default known"
            ));
        }

        if let Some(ref default_model) = raw_provider.default_model {
            match models.get(default_model) {
                None => issues.warning(format!(
                    "provider {key:?}: default model {default_model:?} is not in the catalog"
                )),
                Some(model) if model.provider != key => issues.warning(format!(
                    "provider {key:?}: default model {default_model:?} belongs to provider {:?}",
                    model.provider
                )),
                Some(_) => {}
            }
        }

        providers.insert(
            key.clone(),
            ProviderConfig {
                key,
                api_key_env,
                base_url: raw_provider.base_url,
                default_model: raw_provider.default_model,
                adapter: raw_provider.adapter,
            },
        );
    }

    // Warn about models whose provider link dangles; keep them anyway.
    for model in models.values() {
        if !providers.contains_key(&model.provider) {
            issues.warning(format!(
                "model {:?}: references unknown provider {:?}",
                model.name, model.provider
            ));
        }
    }

    let mut provider_models: BTreeMap<String, Vec<ModelConfig>> = BTreeMap::new();
    for model in models.values() {
        provider_models
            .entry(model.provider.clone())
            .or_default()
            .push(model.clone());
    }

    Catalog {
        providers,
        models,
        provider_models,
        issues,
    }
}

/// Normalize one model entry. `None` means the model was dropped.
fn normalize_model(name: &str, raw: RawModel, issues: &mut Diagnostics) -> Option<ModelConfig> {
    let full = match raw {
        RawModel::Shorthand(provider) => RawModelFull {
            provider: Some(provider),
            mode: None,
            api_key_env: None,
            base_url: None,
            alias: None,
        },
        RawModel::Full(full) => full,
    };

    let Some(provider) = full.provider else {
        issues.error(format!("model {name:?}: missing provider reference, dropped"));
        return None;
    };

    let mode = normalize_mode(name, full.mode, issues);

    Some(ModelConfig {
        name: name.to_string(),
        provider,
        mode,
        api_key_env: full.api_key_env,
        base_url: full.base_url,
        alias: full.alias,
    })
}

/// Collapse a raw mode field into a single `TaskMode`, recording exactly
/// one warning when anything about it was off.
fn normalize_mode(name: &str, raw: Option<RawMode>, issues: &mut Diagnostics) -> TaskMode {
    match raw {
        None => {
            issues.warning(format!("model {name:?}: no mode declared, defaulting to fast"));
            TaskMode::Fast
        }
        Some(RawMode::One(s)) => match TaskMode::parse(&s) {
            Some(mode) => mode,
            None => {
                issues.warning(format!(
                    "model {name:?}: unrecognized mode {s:?}, defaulting to fast"
                ));
                TaskMode::Fast
            }
        },
        Some(RawMode::Many(candidates)) => {
            let first_valid = candidates.iter().find_map(|s| TaskMode::parse(s));
            match first_valid {
                Some(mode) => {
                    if candidates.len() > 1 {
                        issues.warning(format!(
                            "model {name:?}: multiple modes declared, using {mode}"
                        ));
                    }
                    mode
                }
                None => {
                    issues.warning(format!(
                        "model {name:?}: no recognizable mode in {candidates:?}, defaulting to fast"
                    ));
                    TaskMode::Fast
                }
            }
        }
    }
}
