//! Built-in provider and model catalog
//!
//! Providers, their models and list prices are loaded from the embedded
//! `builtin_models.toml`. User-defined models from the settings form an extra
//! "Custom" group and are routed to a provider by prefix or name.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::core::cost::{CostTable, ModelPrice};

pub const CUSTOM_GROUP: &str = "Custom";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinProvider {
    pub id: String,
    pub display_name: String,
    pub group: String,
    pub base_url: String,
    pub mode: Option<String>,
    pub prefix: Option<String>,
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BuiltinCatalogFile {
    providers: Vec<BuiltinProvider>,
    #[serde(default)]
    pricing: HashMap<String, ModelPrice>,
}

impl BuiltinProvider {
    /// Get the authentication mode for this provider
    pub fn auth_mode(&self) -> &str {
        self.mode.as_deref().unwrap_or("openai")
    }

    /// Check if this provider uses Anthropic-style authentication
    pub fn is_anthropic_mode(&self) -> bool {
        self.auth_mode() == "anthropic"
    }

    pub fn requires_api_key(&self) -> bool {
        self.api_key_env.is_some()
    }

    /// Model name as the provider expects it, without the routing prefix.
    pub fn wire_model_name<'a>(&self, model: &'a str) -> &'a str {
        self.prefix
            .as_deref()
            .and_then(|prefix| model.strip_prefix(prefix))
            .unwrap_or(model)
    }
}

fn builtin_catalog_file() -> &'static BuiltinCatalogFile {
    static CATALOG: OnceLock<BuiltinCatalogFile> = OnceLock::new();
    CATALOG.get_or_init(|| {
        const CONFIG_CONTENT: &str = include_str!("../builtin_models.toml");
        toml::from_str(CONFIG_CONTENT).expect("Failed to parse builtin_models.toml")
    })
}

pub fn load_builtin_providers() -> Vec<BuiltinProvider> {
    builtin_catalog_file().providers.clone()
}

/// List prices for the built-in models, with `overrides` layered on top.
pub fn builtin_cost_table(overrides: &HashMap<String, ModelPrice>) -> CostTable {
    CostTable::new(builtin_catalog_file().pricing.clone()).with_overrides(overrides)
}

/// Provider and provider-side model name for a user-facing model identifier.
#[derive(Debug, Clone, Copy)]
pub struct ModelRoute<'a> {
    pub provider: &'a BuiltinProvider,
    pub wire_model: &'a str,
}

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    providers: Vec<BuiltinProvider>,
    custom_models: Vec<String>,
}

impl ModelCatalog {
    pub fn new(custom_models: Vec<String>) -> Self {
        Self {
            providers: load_builtin_providers(),
            custom_models,
        }
    }

    /// Replace the custom model list, e.g. after the settings changed.
    pub fn reload(&mut self, custom_models: Vec<String>) {
        self.custom_models = custom_models;
    }

    pub fn providers(&self) -> &[BuiltinProvider] {
        &self.providers
    }

    pub fn find_provider(&self, id: &str) -> Option<&BuiltinProvider> {
        self.providers
            .iter()
            .find(|provider| provider.id.eq_ignore_ascii_case(id))
    }

    /// Display groups in catalog order, "Custom" last when present.
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = Vec::new();
        for provider in &self.providers {
            if !groups.contains(&provider.group) {
                groups.push(provider.group.clone());
            }
        }
        if !self.custom_models.is_empty() {
            groups.push(CUSTOM_GROUP.to_string());
        }
        groups
    }

    pub fn models_for(&self, group: &str) -> Vec<String> {
        if group == CUSTOM_GROUP {
            return self.custom_models.clone();
        }
        self.providers
            .iter()
            .filter(|provider| provider.group == group)
            .flat_map(|provider| provider.models.iter().cloned())
            .collect()
    }

    pub fn all_models(&self) -> Vec<(String, Vec<String>)> {
        self.groups()
            .into_iter()
            .map(|group| {
                let models = self.models_for(&group);
                (group, models)
            })
            .collect()
    }

    pub fn is_valid_model(&self, model: &str) -> bool {
        self.group_for_model(model).is_some()
    }

    pub fn group_for_model(&self, model: &str) -> Option<String> {
        self.providers
            .iter()
            .find(|provider| provider.models.iter().any(|m| m == model))
            .map(|provider| provider.group.clone())
            .or_else(|| {
                self.custom_models
                    .iter()
                    .any(|m| m == model)
                    .then(|| CUSTOM_GROUP.to_string())
            })
    }

    /// Picks the provider for `model`: an exact catalog entry first, then a
    /// routing prefix, then the model family name. Anything else goes to the
    /// first provider (OpenAI).
    pub fn route<'a>(&'a self, model: &'a str) -> Option<ModelRoute<'a>> {
        let by_listing = self
            .providers
            .iter()
            .find(|provider| provider.models.iter().any(|m| m == model));
        let by_prefix = || {
            self.providers.iter().find(|provider| {
                provider
                    .prefix
                    .as_deref()
                    .is_some_and(|prefix| model.starts_with(prefix))
            })
        };
        let by_family = || {
            let family = if model.starts_with("claude") {
                "anthropic"
            } else if model.starts_with("gemini") {
                "google"
            } else {
                "openai"
            };
            self.find_provider(family)
        };

        let provider = by_listing
            .or_else(by_prefix)
            .or_else(by_family)
            .or_else(|| self.providers.first())?;

        Some(ModelRoute {
            provider,
            wire_model: provider.wire_model_name(model),
        })
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
