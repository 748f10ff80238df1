//! Sync configuration shared by the CLI and any embedding client.
//!
//! `SyncSettings` controls the scheduler cadence and remote call timeout.
//! `RemoteConfig` says where the shared copy lives: another `SQLite` file
//! (useful for a folder synced by other means, and for tests) or a relay
//! reachable over HTTP.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_INTERVAL_SECS: u64 = 60;
const DEFAULT_DEBOUNCE_MS: u64 = 1500;
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;

/// Timing knobs for the sync engine and its scheduler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SyncSettings {
    /// Periodic pass interval; 0 disables the timer
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Quiet period after a local mutation before a pass is triggered
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Upper bound on a single remote call
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
        }
    }
}

impl SyncSettings {
    /// `None` when periodic sync is disabled.
    pub const fn interval(&self) -> Option<Duration> {
        if self.interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.interval_secs))
        }
    }

    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub const fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.remote_timeout_secs == 0 {
            return Err("remote_timeout_secs must be greater than zero".to_string());
        }
        if self.interval_secs > 0 && self.interval_secs * 1000 < self.debounce_ms {
            return Err(format!(
                "interval_secs ({}) must not be shorter than debounce_ms ({})",
                self.interval_secs, self.debounce_ms
            ));
        }
        Ok(())
    }
}

const fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

const fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

const fn default_remote_timeout_secs() -> u64 {
    DEFAULT_REMOTE_TIMEOUT_SECS
}

/// Where the shared copy of the records lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteConfig {
    Http { url: String, token: Option<String> },
    Sqlite { path: PathBuf },
}

impl RemoteConfig {
    /// Build from loosely provided values, preferring the HTTP relay.
    pub fn from_parts(
        url: Option<String>,
        token: Option<String>,
        db_path: Option<PathBuf>,
    ) -> Result<Option<Self>, String> {
        if let Some(url) = normalize_text_option(url) {
            if !is_http_url(&url) {
                return Err(format!("remote url '{url}' must include http:// or https://"));
            }
            return Ok(Some(Self::Http {
                url: url.trim_end_matches('/').to_string(),
                token: normalize_text_option(token),
            }));
        }
        Ok(db_path.map(|path| Self::Sqlite { path }))
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Http { url, .. } => url.clone(),
            Self::Sqlite { path } => format!("sqlite:{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_defaults_fill_missing_fields() {
        let parsed: SyncSettings = serde_json::from_str(r#"{ "interval_secs": 10 }"#).unwrap();
        assert_eq!(parsed.interval_secs, 10);
        assert_eq!(parsed.debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert_eq!(parsed.remote_timeout(), Duration::from_secs(30));
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn settings_reject_unknown_fields() {
        let error = serde_json::from_str::<SyncSettings>(r#"{ "retries": 3 }"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn settings_validation_catches_inconsistent_timing() {
        let settings = SyncSettings {
            interval_secs: 1,
            debounce_ms: 5000,
            ..SyncSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = SyncSettings {
            remote_timeout_secs: 0,
            ..SyncSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = SyncSettings {
            interval_secs: 0,
            ..SyncSettings::default()
        };
        assert!(settings.validate().is_ok());
        assert_eq!(settings.interval(), None);
    }

    #[test]
    fn remote_config_prefers_http_url() {
        let config = RemoteConfig::from_parts(
            Some(" https://relay.example.com/ ".to_string()),
            Some("  ".to_string()),
            Some(PathBuf::from("/tmp/remote.db")),
        )
        .unwrap();
        assert_eq!(
            config,
            Some(RemoteConfig::Http {
                url: "https://relay.example.com".to_string(),
                token: None,
            })
        );
    }

    #[test]
    fn remote_config_rejects_schemeless_url() {
        assert!(RemoteConfig::from_parts(Some("relay.example.com".to_string()), None, None).is_err());
        assert_eq!(RemoteConfig::from_parts(None, None, None), Ok(None));
    }
}
