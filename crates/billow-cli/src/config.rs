//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use billow_core::{ConfidencePolicy, SessionizerConfig};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

const GRAPH_CALENDAR_VIEW: &str = "https://graph.microsoft.com/v1.0/me/calendarView";

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    pub tracking: TrackingConfig,
    pub idle: IdleConfig,
    pub relay: RelayConfig,
    pub calendar: CalendarConfig,
    pub confidence: ConfidencePolicy,
}

/// Segment qualification and merge thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub min_focus_seconds: u32,
    pub merge_gap_seconds: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_focus_seconds: 15,
            merge_gap_seconds: 120,
        }
    }
}

/// Idle detection from the input heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    pub enabled: bool,
    pub threshold_seconds: u32,
    /// How often the idle state is re-evaluated.
    pub poll_seconds: u32,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_seconds: 240,
            poll_seconds: 3,
        }
    }
}

impl IdleConfig {
    pub fn threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.threshold_seconds))
    }

    pub fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(u64::from(self.poll_seconds.max(1)))
    }
}

/// WebSocket listener for the browser extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "127.0.0.1:57451".to_string(),
        }
    }
}

/// Online-meeting calendar sync.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub endpoint: String,
    /// Bearer token for the calendar API. Sync is disabled without one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Case-insensitive substring of the online meeting provider to keep.
    pub provider_filter: String,
    pub sync_interval_minutes: u32,
}

impl fmt::Debug for CalendarConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalendarConfig")
            .field("endpoint", &self.endpoint)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("provider_filter", &self.provider_filter)
            .field("sync_interval_minutes", &self.sync_interval_minutes)
            .finish()
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            endpoint: GRAPH_CALENDAR_VIEW.to_string(),
            access_token: None,
            provider_filter: "teams".to_string(),
            sync_interval_minutes: 30,
        }
    }
}

impl CalendarConfig {
    pub fn sync_interval(&self) -> StdDuration {
        StdDuration::from_secs(u64::from(self.sync_interval_minutes.max(1)) * 60)
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("billow.db"),
            tracking: TrackingConfig::default(),
            idle: IdleConfig::default(),
            relay: RelayConfig::default(),
            calendar: CalendarConfig::default(),
            confidence: ConfidencePolicy::default(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // BILLOW_IDLE__ENABLED=false sets idle.enabled
        figment = figment.merge(Env::prefixed("BILLOW_").split("__"));

        figment.extract()
    }

    pub fn sessionizer_config(&self) -> SessionizerConfig {
        SessionizerConfig {
            min_focus: chrono::Duration::seconds(i64::from(self.tracking.min_focus_seconds)),
            merge_gap: chrono::Duration::seconds(i64::from(self.tracking.merge_gap_seconds)),
            confidence: self.confidence,
        }
    }
}

/// Returns the platform-specific config directory for billow.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("billow"))
}

/// Returns the platform-specific data directory for billow.
///
/// On Linux: `~/.local/share/billow`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("billow"))
}
