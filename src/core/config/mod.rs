pub mod data;
pub mod io;

pub use data::{SettingKey, Settings, SettingsError};
pub use io::ConfigError;

#[cfg(test)]
pub mod tests;
