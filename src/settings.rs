//! Settings
//!
//! Client configuration stored as a JSON document. Every field has a default so
//! partial files (or no file at all) work.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};

use crate::models::DownloadFormat;

/// Environment variable overriding `server.base_url`.
pub const SERVER_ENV: &str = "FETCHDECK_SERVER";

const SETTINGS_FILE: &str = "settings.json";

/// All configurable options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub notifications: NotificationSettings,
}

/// General application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Where retrieved files are written.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Format selected when the controller starts.
    #[serde(default)]
    pub default_format: DownloadFormat,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            default_format: DownloadFormat::default(),
        }
    }
}

/// Conversion service location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds (0 = no timeout).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Job polling cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingSettings {
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,

    /// Delay between a finished job and the view returning to results.
    #[serde(default = "default_finish_reset_delay")]
    pub finish_reset_delay_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            finish_reset_delay_ms: default_finish_reset_delay(),
        }
    }
}

/// Banner behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_hide_after")]
    pub hide_after_ms: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            hide_after_ms: default_hide_after(),
        }
    }
}

fn default_download_dir() -> PathBuf {
    UserDirs::new()
        .and_then(|d| d.download_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_finish_reset_delay() -> u64 {
    2000
}

fn default_hide_after() -> u64 {
    5000
}

/// Per-user config directory.
///
/// Linux:  ~/.config/fetchdeck
/// macOS:  ~/Library/Application Support/fetchdeck
pub fn config_dir() -> Result<PathBuf> {
    ProjectDirs::from("com", "fetchdeck", "fetchdeck")
        .map(|d| d.config_dir().to_path_buf())
        .ok_or_else(|| anyhow!("failed to resolve per-user config directory"))
}

/// Default location of the settings file.
pub fn settings_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(SETTINGS_FILE))
}

impl Settings {
    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read settings: {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("parse settings: {}", path.display()))?;
        Ok(settings)
    }

    /// Load from the explicit path, or the per-user default, then apply env overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let settings = match explicit {
            Some(path) => Self::load_from(path)?,
            None => match settings_path() {
                Ok(path) => Self::load_from(&path)?,
                Err(e) => {
                    log::warn!("{e}; using default settings");
                    Self::default()
                }
            },
        };
        Ok(settings.with_env_overrides(|key| std::env::var(key).ok()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create config dir: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("write settings: {}", path.display()))
    }

    /// Apply environment overrides through `lookup` (injected for tests).
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(server) = lookup(SERVER_ENV).filter(|s| !s.trim().is_empty()) {
            self.server.base_url = server;
        }
        self
    }

    pub fn with_server(mut self, base_url: impl Into<String>) -> Self {
        self.server.base_url = base_url.into();
        self
    }

    pub fn with_download_dir(mut self, dir: PathBuf) -> Self {
        self.general.download_dir = dir;
        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        match self.server.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        // A zero period would spin; tokio's interval panics on it.
        Duration::from_millis(self.polling.interval_ms.max(1))
    }

    pub fn finish_reset_delay(&self) -> Duration {
        Duration::from_millis(self.polling.finish_reset_delay_ms)
    }

    pub fn notification_hide_after(&self) -> Duration {
        Duration::from_millis(self.notifications.hide_after_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.base_url, "http://127.0.0.1:5000");
        assert_eq!(settings.poll_interval(), Duration::from_millis(1000));
        assert_eq!(settings.finish_reset_delay(), Duration::from_millis(2000));
        assert_eq!(settings.notification_hide_after(), Duration::from_millis(5000));
        assert_eq!(settings.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(settings.general.default_format, DownloadFormat::Audio);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let raw = r#"{"polling":{"interval_ms":250},"general":{"default_format":"video"}}"#;
        let settings: Settings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.polling.interval_ms, 250);
        assert_eq!(settings.polling.finish_reset_delay_ms, 2000);
        assert_eq!(settings.general.default_format, DownloadFormat::Video);
        assert_eq!(settings.server.request_timeout_secs, 30);
    }

    #[test]
    fn test_settings_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let settings = Settings::default()
            .with_server("http://media.local:8080")
            .with_download_dir(PathBuf::from("/custom/path"));
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Settings::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, Settings::default());
    }

    #[test]
    fn test_env_override() {
        let settings = Settings::default().with_env_overrides(|key| {
            (key == SERVER_ENV).then(|| "http://override:9000".to_string())
        });
        assert_eq!(settings.server.base_url, "http://override:9000");

        let settings = Settings::default().with_env_overrides(|_| Some("  ".to_string()));
        assert_eq!(settings.server.base_url, "http://127.0.0.1:5000");
    }

    #[test]
    fn test_zero_timeout_disables() {
        let mut settings = Settings::default();
        settings.server.request_timeout_secs = 0;
        settings.polling.interval_ms = 0;
        assert_eq!(settings.request_timeout(), None);
        assert_eq!(settings.poll_interval(), Duration::from_millis(1));
    }
}
