//! `set` and `get` commands for the persisted settings.

use std::error::Error;

use crate::core::config::data::path_display;
use crate::core::config::{SettingKey, Settings};

/// Apply `key = value` to `settings`, returning the confirmation line.
fn apply_setting(settings: &mut Settings, key: &str, value: &str) -> Result<String, Box<dyn Error>> {
    let key: SettingKey = key.parse()?;
    settings.set(key, value)?;
    let shown = settings.get(key);
    Ok(if shown.is_empty() {
        format!("✅ Cleared {key}")
    } else {
        format!("✅ Set {key} to: {}", shown.replace('\n', ", "))
    })
}

fn format_all(settings: &Settings) -> Vec<String> {
    SettingKey::ALL
        .iter()
        .map(|key| {
            let value = settings.get(*key).replace('\n', ", ");
            if value.is_empty() {
                format!("  {key}: (unset)")
            } else {
                format!("  {key}: {value}")
            }
        })
        .collect()
}

pub fn run_set(key: &str, value: &str) -> Result<(), Box<dyn Error>> {
    let mut settings = Settings::load()?;
    let message = apply_setting(&mut settings, key, value)?;
    settings.save()?;
    println!("{message}");
    Ok(())
}

pub fn run_get(key: Option<&str>) -> Result<(), Box<dyn Error>> {
    let settings = Settings::load()?;
    match key {
        Some(key) => {
            let key: SettingKey = key.parse()?;
            println!("{}", settings.get(key));
        }
        None => {
            println!("Current configuration ({}):", path_display(Settings::config_path()?));
            for line in format_all(&settings) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reports_the_stored_value() {
        let mut settings = Settings::default();
        let message = apply_setting(&mut settings, "custom_models", "a; b").unwrap();
        assert_eq!(message, "✅ Set custom-models to: a, b");
        assert_eq!(settings.custom_model_list(), vec!["a", "b"]);

        let message = apply_setting(&mut settings, "default-model", " ").unwrap();
        assert_eq!(message, "✅ Cleared default-model");

        assert!(apply_setting(&mut settings, "max-tokens", "0").is_err());
        assert!(apply_setting(&mut settings, "theme", "dark").is_err());
    }

    #[test]
    fn listing_covers_every_key() {
        let lines = format_all(&Settings::default());
        assert_eq!(lines.len(), SettingKey::ALL.len());
        assert!(lines.contains(&"  max-tokens: 2000".to_string()));
        assert!(lines.contains(&"  default-model: (unset)".to_string()));
    }
}
