//! Provider API keys: system keyring first, environment variable second.

use std::error::Error;
use std::fmt;

use keyring::Entry;
use tracing::debug;

use crate::core::catalog::BuiltinProvider;

const KEYRING_SERVICE: &str = "chatdesk";

/// Describes failures when attempting to access the system keyring.
///
/// Recoverable errors indicate that the credential backend was
/// temporarily unavailable (for example when the keychain service is
/// locked or inaccessible). Permanent errors surface the underlying
/// cause directly so callers can report them to the user.
#[derive(Debug)]
pub enum KeyringAccessError {
    Recoverable(keyring::Error),
    Permanent(keyring::Error),
}

impl KeyringAccessError {
    fn inner(&self) -> &keyring::Error {
        match self {
            KeyringAccessError::Recoverable(err) | KeyringAccessError::Permanent(err) => err,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, KeyringAccessError::Recoverable(_))
    }
}

impl From<keyring::Error> for KeyringAccessError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
                KeyringAccessError::Recoverable(err)
            }
            other => KeyringAccessError::Permanent(other),
        }
    }
}

impl fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "keyring unavailable: {}", self.inner())
    }
}

impl Error for KeyringAccessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner())
    }
}

/// Looks up API keys per provider id.
#[derive(Debug, Clone)]
pub struct ApiKeys {
    use_keyring: bool,
}

impl ApiKeys {
    pub fn new() -> Self {
        Self { use_keyring: true }
    }

    /// Environment variables only; used by tests and `--env-only` style setups.
    pub fn env_only() -> Self {
        Self { use_keyring: false }
    }

    fn keyring_entry(provider_id: &str) -> Result<Entry, KeyringAccessError> {
        Ok(Entry::new(KEYRING_SERVICE, &provider_id.to_lowercase())?)
    }

    fn from_keyring(&self, provider_id: &str) -> Option<String> {
        if !self.use_keyring {
            return None;
        }
        let lookup = Self::keyring_entry(provider_id).and_then(|entry| {
            entry
                .get_password()
                .map_err(KeyringAccessError::from)
        });
        match lookup {
            Ok(key) if !key.trim().is_empty() => Some(key),
            Ok(_) => None,
            Err(KeyringAccessError::Permanent(keyring::Error::NoEntry)) => None,
            Err(err) => {
                debug!(provider = provider_id, error = %err, "Keyring lookup failed");
                None
            }
        }
    }

    pub fn resolve(&self, provider: &BuiltinProvider) -> Option<String> {
        self.from_keyring(&provider.id).or_else(|| {
            provider
                .api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|key| !key.trim().is_empty())
        })
    }

    pub fn store(&self, provider_id: &str, key: &str) -> Result<(), KeyringAccessError> {
        Self::keyring_entry(provider_id)?.set_password(key.trim())?;
        Ok(())
    }

    pub fn remove(&self, provider_id: &str) -> Result<(), KeyringAccessError> {
        match Self::keyring_entry(provider_id)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Default for ApiKeys {
    fn default() -> Self {
        Self::new()
    }
}
