//! Settings file
//!
//! A small JSON file holding the base URL of the application under test and
//! the wait presets. Every field is optional; missing ones take the defaults.
//!
//! ```json
//! {
//!   "base_url": "http://localhost:8080",
//!   "timeouts": { "short_ms": 3000, "poll_interval_ms": 50 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::page::WaitPresets;
use crate::wait::{WaitSpec, DEFAULT_POLL_INTERVAL};

/// Wait preset durations in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub short_ms: u64,
    pub standard_ms: u64,
    pub long_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            short_ms: 5_000,
            standard_ms: 10_000,
            long_ms: 30_000,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl TimeoutSettings {
    fn spec(&self, timeout_ms: u64) -> WaitSpec {
        WaitSpec::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(self.poll_interval_ms),
        )
    }

    pub fn presets(&self) -> WaitPresets {
        WaitPresets {
            short: self.spec(self.short_ms),
            standard: self.spec(self.standard_ms),
            long: self.spec(self.long_ms),
        }
    }
}

/// Contents of a settings file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root URL relative paths are resolved against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub timeouts: TimeoutSettings,
}

impl Settings {
    /// Read settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let settings = serde_json::from_str(&raw)?;
        tracing::debug!(path = %path.as_ref().display(), "settings loaded");
        Ok(settings)
    }

    /// Write settings as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), raw)?;
        Ok(())
    }

    pub fn presets(&self) -> WaitPresets {
        self.timeouts.presets()
    }

    /// Join `path` onto the base URL; absolute URLs pass through
    pub fn url(&self, path: &str) -> String {
        if path.contains("://") {
            return path.to_string();
        }
        match &self.base_url {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
            None => path.to_string(),
        }
    }
}

impl From<&Settings> for WaitPresets {
    fn from(settings: &Settings) -> Self {
        settings.presets()
    }
}
