//! Minimal runtime configuration helpers.
//! Defaults match the Rachio public API and the hub's customary poll periods.

use std::time::Duration;
use std::{fs, path::Path};

use crate::client::DEFAULT_BASE_URL;

pub const DEFAULT_SHORT_POLL_SECS: u64 = 30;
pub const DEFAULT_LONG_POLL_SECS: u64 = 300;
pub const DEFAULT_DISCOVERY_RETRY_SECS: u64 = 60;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const API_KEY_FILE: &str = "api_key.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Rachio API key (bearer token) from the web app's account settings.
    pub api_key: String,
    pub api_url: String,
    /// Diff-only poll cadence.
    pub short_poll: Duration,
    /// Forced refresh cadence.
    pub long_poll: Duration,
    /// Wait between failed discovery attempts.
    pub discovery_retry: Duration,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok(), Path::new(API_KEY_FILE))
    }

    /// Build a config from `lookup` (an environment), falling back to the first line of
    /// `key_file` when no API key variable is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, key_file: &Path) -> Result<Self, String> {
        // Prefer env var; fallback to api_key.txt in working directory
        let api_key = match lookup("RACHIO_API_KEY") {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => match fs::read_to_string(key_file) {
                Ok(s) if !s.trim().is_empty() => s.lines().next().unwrap_or_default().trim().to_string(),
                _ => {
                    return Err(format!(
                        "Missing API key: set RACHIO_API_KEY or provide {} in working directory",
                        key_file.display()
                    ));
                }
            },
        };

        let api_url = lookup("RACHIO_API_URL")
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let secs = |key: &str, default: u64| -> Result<Duration, String> {
            match lookup(key) {
                Some(s) if !s.trim().is_empty() => s
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|v| *v > 0)
                    .map(Duration::from_secs)
                    .ok_or_else(|| format!("{} must be a positive number of seconds, got {:?}", key, s)),
                _ => Ok(Duration::from_secs(default)),
            }
        };

        Ok(Config {
            api_key,
            api_url,
            short_poll: secs("SHORT_POLL_SECS", DEFAULT_SHORT_POLL_SECS)?,
            long_poll: secs("LONG_POLL_SECS", DEFAULT_LONG_POLL_SECS)?,
            discovery_retry: secs("DISCOVERY_RETRY_SECS", DEFAULT_DISCOVERY_RETRY_SECS)?,
            request_timeout: secs("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
        })
    }
}
