use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::core::cost::ModelPrice;

pub const DEFAULT_MAX_TOKENS: u32 = 2000;
pub const DEFAULT_FONT_SIZE: u32 = 10;

/// User settings persisted as `config.toml`.
///
/// Every field has a default, so a partial or missing file loads cleanly.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Upper bound sent as `max_tokens` with every completion request
    pub max_tokens: u32,
    /// Overrides the provider endpoint when non-empty (e.g. a local proxy)
    pub api_base_url: String,
    pub auto_scroll: bool,
    /// Stamp new messages with the local time
    pub show_timestamps: bool,
    pub dark_mode: bool,
    pub font_size: u32,
    /// Newline-delimited model identifiers shown in the "Custom" group
    pub custom_models: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    /// Per-model prices that add to or override the built-in table
    pub pricing: HashMap<String, ModelPrice>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            api_base_url: String::new(),
            auto_scroll: true,
            show_timestamps: true,
            dark_mode: false,
            font_size: DEFAULT_FONT_SIZE,
            custom_models: String::new(),
            default_model: None,
            pricing: HashMap::new(),
        }
    }
}

/// Keys accepted by `chatdesk set` / `chatdesk get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    MaxTokens,
    ApiBaseUrl,
    AutoScroll,
    ShowTimestamps,
    DarkMode,
    FontSize,
    CustomModels,
    DefaultModel,
}

impl SettingKey {
    pub const ALL: [SettingKey; 8] = [
        SettingKey::MaxTokens,
        SettingKey::ApiBaseUrl,
        SettingKey::AutoScroll,
        SettingKey::ShowTimestamps,
        SettingKey::DarkMode,
        SettingKey::FontSize,
        SettingKey::CustomModels,
        SettingKey::DefaultModel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::MaxTokens => "max-tokens",
            SettingKey::ApiBaseUrl => "api-base-url",
            SettingKey::AutoScroll => "auto-scroll",
            SettingKey::ShowTimestamps => "show-timestamps",
            SettingKey::DarkMode => "dark-mode",
            SettingKey::FontSize => "font-size",
            SettingKey::CustomModels => "custom-models",
            SettingKey::DefaultModel => "default-model",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        SettingKey::ALL
            .into_iter()
            .find(|key| key.as_str() == normalized)
            .ok_or_else(|| SettingsError::UnknownKey(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    UnknownKey(String),
    InvalidValue {
        key: SettingKey,
        value: String,
        expected: &'static str,
    },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::UnknownKey(key) => {
                let known: Vec<&str> = SettingKey::ALL.iter().map(|k| k.as_str()).collect();
                write!(f, "Unknown setting '{key}'. Known settings: {}", known.join(", "))
            }
            SettingsError::InvalidValue {
                key,
                value,
                expected,
            } => write!(f, "Invalid value '{value}' for {key}: expected {expected}"),
        }
    }
}

impl StdError for SettingsError {}

fn parse_bool(key: SettingKey, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(SettingsError::InvalidValue {
            key,
            value: value.to_string(),
            expected: "true or false",
        }),
    }
}

fn parse_positive(key: SettingKey, value: &str) -> Result<u32, SettingsError> {
    value
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| SettingsError::InvalidValue {
            key,
            value: value.to_string(),
            expected: "a positive whole number",
        })
}

impl Settings {
    /// Custom model identifiers, one per non-blank line.
    pub fn custom_model_list(&self) -> Vec<String> {
        self.custom_models
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn max_tokens_limit(&self) -> Option<u32> {
        (self.max_tokens > 0).then_some(self.max_tokens)
    }

    pub fn get(&self, key: SettingKey) -> String {
        match key {
            SettingKey::MaxTokens => self.max_tokens.to_string(),
            SettingKey::ApiBaseUrl => self.api_base_url.clone(),
            SettingKey::AutoScroll => self.auto_scroll.to_string(),
            SettingKey::ShowTimestamps => self.show_timestamps.to_string(),
            SettingKey::DarkMode => self.dark_mode.to_string(),
            SettingKey::FontSize => self.font_size.to_string(),
            SettingKey::CustomModels => self.custom_models.clone(),
            SettingKey::DefaultModel => self.default_model.clone().unwrap_or_default(),
        }
    }

    /// Set a value from its string form. `custom-models` accepts `,` or `;`
    /// as separators in addition to newlines.
    pub fn set(&mut self, key: SettingKey, value: &str) -> Result<(), SettingsError> {
        match key {
            SettingKey::MaxTokens => self.max_tokens = parse_positive(key, value)?,
            SettingKey::ApiBaseUrl => self.api_base_url = value.trim().to_string(),
            SettingKey::AutoScroll => self.auto_scroll = parse_bool(key, value)?,
            SettingKey::ShowTimestamps => self.show_timestamps = parse_bool(key, value)?,
            SettingKey::DarkMode => self.dark_mode = parse_bool(key, value)?,
            SettingKey::FontSize => self.font_size = parse_positive(key, value)?,
            SettingKey::CustomModels => {
                self.custom_models = value
                    .split(['\n', ',', ';'])
                    .map(str::trim)
                    .filter(|model| !model.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");
            }
            SettingKey::DefaultModel => {
                let model = value.trim();
                self.default_model = (!model.is_empty()).then(|| model.to_string());
            }
        }
        Ok(())
    }
}

/// Get a user-friendly display string for a path, using `~` for the home
/// directory on Unix-like systems.
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
