use super::data::{SettingKey, Settings, SettingsError, DEFAULT_MAX_TOKENS};
use super::io::ConfigError;
use crate::core::cost::ModelPrice;
use tempfile::TempDir;

#[test]
fn test_load_nonexistent_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nonexistent_config.toml");

    let settings = Settings::load_from_path(&config_path).expect("Failed to load settings");

    assert_eq!(settings, Settings::default());
    assert_eq!(settings.max_tokens, DEFAULT_MAX_TOKENS);
    assert!(settings.api_base_url.is_empty());
    assert!(settings.auto_scroll);
    assert!(settings.show_timestamps);
}

#[test]
fn test_settings_persistence_lifecycle() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nested").join("config.toml");

    let mut settings = Settings::default();
    settings.set(SettingKey::MaxTokens, "512").unwrap();
    settings
        .set(SettingKey::CustomModels, "ollama/mistral, my-finetune")
        .unwrap();
    settings.set(SettingKey::DefaultModel, "gpt-4o").unwrap();
    settings.pricing.insert(
        "my-finetune".to_string(),
        ModelPrice {
            input_cost_per_token: 0.000001,
            output_cost_per_token: 0.000002,
        },
    );
    settings.save_to_path(&config_path).expect("save failed");

    let loaded = Settings::load_from_path(&config_path).expect("load failed");
    assert_eq!(loaded, settings);
    assert_eq!(loaded.custom_model_list(), vec!["ollama/mistral", "my-finetune"]);

    let mut cleared = loaded;
    cleared.set(SettingKey::DefaultModel, "  ").unwrap();
    cleared.save_to_path(&config_path).expect("save failed");
    let reloaded = Settings::load_from_path(&config_path).expect("load failed");
    assert_eq!(reloaded.default_model, None);
}

#[test]
fn partial_files_fill_in_defaults() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        "dark_mode = true\ncustom_models = \"\"\"\nalpha\n\n  beta  \n\"\"\"\n",
    )
    .unwrap();

    let settings = Settings::load_from_path(&config_path).expect("load failed");
    assert!(settings.dark_mode);
    assert_eq!(settings.max_tokens, DEFAULT_MAX_TOKENS);
    assert_eq!(settings.custom_model_list(), vec!["alpha", "beta"]);
}

#[test]
fn invalid_toml_reports_the_path() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, "max_tokens = \"lots\"").unwrap();

    let err = Settings::load_from_path(&config_path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("Failed to parse config at"));
}

#[test]
fn setting_keys_accept_both_spellings() {
    assert_eq!("max-tokens".parse::<SettingKey>(), Ok(SettingKey::MaxTokens));
    assert_eq!("API_BASE_URL".parse::<SettingKey>(), Ok(SettingKey::ApiBaseUrl));
    assert!(matches!(
        "theme".parse::<SettingKey>(),
        Err(SettingsError::UnknownKey(_))
    ));
}

#[test]
fn set_validates_values() {
    let mut settings = Settings::default();
    settings.set(SettingKey::AutoScroll, "off").unwrap();
    assert!(!settings.auto_scroll);
    assert_eq!(settings.get(SettingKey::AutoScroll), "false");

    let err = settings.set(SettingKey::FontSize, "0").unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid value '0' for font-size: expected a positive whole number"
    );
    assert!(settings.set(SettingKey::DarkMode, "maybe").is_err());
    assert_eq!(settings.font_size, 10);
    assert_eq!(settings.max_tokens_limit(), Some(DEFAULT_MAX_TOKENS));
}
