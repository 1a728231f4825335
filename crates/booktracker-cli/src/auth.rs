//! Notion API token storage in the OS keychain.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(not(test))]
use keyring::Entry;

use booktracker_core::util::normalize_text_option;

use crate::error::CliError;

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "booktracker";
const TOKEN_USERNAME: &str = "notion_api_token";

pub const ENV_API_KEY: &str = "NOTION_API_KEY";

/// Where the token used by sync came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Keychain,
    Environment,
}

impl TokenSource {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Keychain => "OS keychain",
            Self::Environment => ENV_API_KEY,
        }
    }
}

#[derive(Clone)]
struct TokenStore {
    username: String,
}

impl TokenStore {
    fn new() -> Self {
        Self {
            username: TOKEN_USERNAME.to_string(),
        }
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(&self) -> Result<Entry, CliError> {
        Entry::new(KEYRING_SERVICE_NAME, &self.username)
            .map_err(|error| CliError::SecureStorage(error.to_string()))
    }

    #[cfg(not(test))]
    fn load(&self) -> Result<Option<String>, CliError> {
        match self.entry()?.get_password() {
            Ok(token) => Ok(normalize_text_option(Some(token))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(CliError::SecureStorage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn load(&self) -> Result<Option<String>, CliError> {
        let guard = Self::test_store()
            .lock()
            .map_err(|error| CliError::SecureStorage(error.to_string()))?;
        Ok(normalize_text_option(guard.get(&self.username).cloned()))
    }

    #[cfg(not(test))]
    fn save(&self, token: &str) -> Result<(), CliError> {
        self.entry()?
            .set_password(token)
            .map_err(|error| CliError::SecureStorage(error.to_string()))
    }

    #[cfg(test)]
    fn save(&self, token: &str) -> Result<(), CliError> {
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| CliError::SecureStorage(error.to_string()))?;
        guard.insert(self.username.clone(), token.to_string());
        Ok(())
    }

    #[cfg(not(test))]
    fn clear(&self) -> Result<(), CliError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(CliError::SecureStorage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn clear(&self) -> Result<(), CliError> {
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| CliError::SecureStorage(error.to_string()))?;
        guard.remove(&self.username);
        Ok(())
    }
}

pub fn load_stored_token() -> Result<Option<String>, CliError> {
    TokenStore::new().load()
}

pub fn save_token(token: &str) -> Result<(), CliError> {
    let token = normalize_text_option(Some(token.to_string()))
        .ok_or_else(|| CliError::Config("Notion token cannot be empty".to_string()))?;
    TokenStore::new().save(&token)
}

pub fn clear_stored_token() -> Result<(), CliError> {
    TokenStore::new().clear()
}

/// Keychain first, then `NOTION_API_KEY`
pub fn resolve_token() -> Result<Option<(String, TokenSource)>, CliError> {
    if let Some(token) = load_stored_token()? {
        return Ok(Some((token, TokenSource::Keychain)));
    }
    Ok(normalize_text_option(std::env::var(ENV_API_KEY).ok())
        .map(|token| (token, TokenSource::Environment)))
}

/// Short, non-reversible rendering of a token for status output
pub fn mask_token(token: &str) -> String {
    let count = token.chars().count();
    if count <= 8 {
        return "[REDACTED]".to_string();
    }
    let tail: String = token.chars().skip(count - 4).collect();
    format!("[REDACTED]...{tail}")
}
