//! Sync settings.
//!
//! Shared by the CLI and tests. Values are safe to persist in plain JSON; the
//! Notion API token is never stored here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::{AutoResolvePolicy, RetryPolicy, SyncOptions};
use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_NOTION_API_BASE_URL: &str = "https://api.notion.com";
pub const DEFAULT_NOTION_VERSION: &str = "2022-06-28";

/// Tunables for talking to Notion and running syncs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    pub notion_database_id: Option<String>,
    pub notion_api_base_url: String,
    pub notion_version: String,
    pub request_timeout_secs: u64,
    /// About three requests per second by default, Notion's documented limit
    pub min_request_interval_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_backoff_multiplier: f64,
    pub retry_max_delay_ms: u64,
    /// Policy used when `sync --auto-resolve` is given without a winner
    pub auto_resolve_policy: AutoResolvePolicy,
    pub stale_lock_after_secs: u64,
    pub unavailable_after: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            notion_database_id: None,
            notion_api_base_url: DEFAULT_NOTION_API_BASE_URL.to_string(),
            notion_version: DEFAULT_NOTION_VERSION.to_string(),
            request_timeout_secs: 30,
            min_request_interval_ms: 350,
            retry_max_attempts: 5,
            retry_initial_delay_ms: 1_000,
            retry_backoff_multiplier: 2.0,
            retry_max_delay_ms: 8_000,
            auto_resolve_policy: AutoResolvePolicy::default(),
            stale_lock_after_secs: 30 * 60,
            unavailable_after: 3,
        }
    }
}

impl SyncSettings {
    /// Parse settings from JSON, filling defaults for missing keys
    pub fn from_json(payload: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid settings JSON: {error}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Trim text values and drop empty ones
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.notion_database_id = normalize_text_option(self.notion_database_id);
        self.notion_api_base_url = normalize_text_option(Some(self.notion_api_base_url))
            .map_or_else(
                || DEFAULT_NOTION_API_BASE_URL.to_string(),
                |url| url.trim_end_matches('/').to_string(),
            );
        self.notion_version = normalize_text_option(Some(self.notion_version))
            .unwrap_or_else(|| DEFAULT_NOTION_VERSION.to_string());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !is_http_url(&self.notion_api_base_url) {
            return Err(Error::Config(
                "notion_api_base_url must include http:// or https://".to_string(),
            ));
        }
        if self.retry_max_attempts == 0 {
            return Err(Error::Config("retry_max_attempts must be at least 1".to_string()));
        }
        if !self.retry_backoff_multiplier.is_finite() || self.retry_backoff_multiplier < 1.0 {
            return Err(Error::Config(
                "retry_backoff_multiplier must be a number >= 1".to_string(),
            ));
        }
        if self.retry_max_delay_ms < self.retry_initial_delay_ms {
            return Err(Error::Config(
                "retry_max_delay_ms must not be smaller than retry_initial_delay_ms".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be positive".to_string()));
        }
        if self.unavailable_after == 0 {
            return Err(Error::Config("unavailable_after must be at least 1".to_string()));
        }
        Ok(())
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max_attempts)
            .with_initial_delay(Duration::from_millis(self.retry_initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
            .with_backoff_multiplier(self.retry_backoff_multiplier)
    }

    pub const fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            unavailable_after: self.unavailable_after,
            stale_lock_after: Duration::from_secs(self.stale_lock_after_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_notion_limits() {
        let settings = SyncSettings::default();
        assert_eq!(settings.notion_api_base_url, "https://api.notion.com");
        assert_eq!(settings.min_request_interval(), Duration::from_millis(350));
        assert_eq!(settings.auto_resolve_policy, AutoResolvePolicy::Remote);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn default_retry_policy_backs_off_one_to_eight_seconds() {
        let policy = SyncSettings::default().retry_policy();
        assert_eq!(policy, RetryPolicy::default());
        let delays: Vec<_> = (1..=4).map(|n| policy.delay_after_attempt(n)).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8].map(Duration::from_secs).to_vec()
        );
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings =
            SyncSettings::from_json(r#"{"notion_database_id":"abc123","auto_resolve_policy":"none"}"#)
                .unwrap();
        assert_eq!(settings.notion_database_id.as_deref(), Some("abc123"));
        assert_eq!(settings.auto_resolve_policy, AutoResolvePolicy::None);
        assert_eq!(settings.unavailable_after, 3);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        assert!(SyncSettings::from_json(r#"{"notion_token":"secret"}"#).is_err());
        assert!(SyncSettings::from_json(r#"{"notion_api_base_url":"api.notion.com"}"#).is_err());
        assert!(SyncSettings::from_json(r#"{"retry_max_attempts":0}"#).is_err());
        assert!(SyncSettings::from_json(r#"{"retry_backoff_multiplier":0.5}"#).is_err());
    }

    #[test]
    fn normalized_trims_values() {
        let settings = SyncSettings {
            notion_database_id: Some("  ".to_string()),
            notion_api_base_url: " https://example.test/ ".to_string(),
            notion_version: String::new(),
            ..SyncSettings::default()
        }
        .normalized();

        assert_eq!(settings.notion_database_id, None);
        assert_eq!(settings.notion_api_base_url, "https://example.test");
        assert_eq!(settings.notion_version, DEFAULT_NOTION_VERSION);
    }
}
