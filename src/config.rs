use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TICK_MS: u64 = 100;
// Ticks at or above this period are rejected in favour of the default.
pub const MAX_TICK_MS: u64 = 200;
pub const DEFAULT_BACKUP_KEEP: usize = 10;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub profiles_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub active_marker_path: PathBuf,
    pub create_backups: bool,
    pub backup_keep_count: usize,
    pub tick_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profiles_dir: paths::profiles_dir(),
            backup_dir: paths::backups_dir(),
            active_marker_path: paths::active_marker_path(),
            create_backups: true,
            backup_keep_count: DEFAULT_BACKUP_KEEP,
            tick_ms: DEFAULT_TICK_MS,
        }
    }
}

impl Settings {
    // Settings rooted at `home`, for tests and portable installs.
    pub fn rooted_at(home: &Path) -> Self {
        Self {
            profiles_dir: home.join("gpu_profiles"),
            backup_dir: home.join("backups"),
            active_marker_path: home.join("active_profile.json"),
            ..Self::default()
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    // Defaults, the settings file if present, then environment overrides.
    pub fn load() -> Self {
        let path = paths::settings_path();
        let base = if path.exists() {
            match Self::from_file(&path) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("ignoring settings file: {e}");
                    Self::default()
                }
            }
        } else {
            Self::default()
        };
        base.with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = env_path("GPU_SIM_PROFILES_DIR") {
            self.profiles_dir = dir;
        }
        if let Some(dir) = env_path("GPU_SIM_BACKUP_DIR") {
            self.backup_dir = dir;
        }
        if let Some(path) = env_path("GPU_SIM_ACTIVE_MARKER") {
            self.active_marker_path = path;
        }
        if let Some(ms) = std::env::var("GPU_SIM_TICK_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.tick_ms = ms;
        }
        if env_flag("GPU_SIM_NO_BACKUP") {
            self.create_backups = false;
        }
        self
    }

    // Telemetry period; out-of-range values fall back to the default.
    pub fn tick_interval(&self) -> Duration {
        let ms = if self.tick_ms == 0 || self.tick_ms >= MAX_TICK_MS {
            DEFAULT_TICK_MS
        } else {
            self.tick_ms
        };
        Duration::from_millis(ms)
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_interval_rejects_slow_or_zero_periods() {
        let mut s = Settings::rooted_at(Path::new("/tmp/gpusim"));
        assert_eq!(s.tick_interval(), Duration::from_millis(100));
        s.tick_ms = 50;
        assert_eq!(s.tick_interval(), Duration::from_millis(50));
        s.tick_ms = 250;
        assert_eq!(s.tick_interval(), Duration::from_millis(100));
        s.tick_ms = 0;
        assert_eq!(s.tick_interval(), Duration::from_millis(100));
    }

    #[test]
    fn partial_settings_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"tick_ms": 40, "create_backups": false}"#).unwrap();

        let s = Settings::from_file(&path).unwrap();
        assert_eq!(s.tick_ms, 40);
        assert!(!s.create_backups);
        assert_eq!(s.backup_keep_count, DEFAULT_BACKUP_KEEP);
    }

    #[test]
    fn malformed_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Settings::from_file(&path),
            Err(SettingsError::Parse { .. })
        ));
    }
}
