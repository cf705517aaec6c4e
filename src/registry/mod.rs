pub mod backup;
pub mod hive;
pub mod memory;
pub mod regfile;
pub mod value;
#[cfg(windows)]
pub mod windows;

pub use backup::{BackupManager, RestoreReport};
pub use hive::{KeyWriter, RegistryHive, ValueMap};
pub use memory::MemoryHive;
pub use value::{encode_entry, RegValue};

use crate::config::Settings;
use crate::profile::GpuProfile;
use crate::projection;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub const VIDEO_PATH: &str = r"SYSTEM\CurrentControlSet\Control\Video";
pub const DISPLAY_CLASS_GUID: &str = "{4d36e968-e325-11ce-bfc1-08002be10318}";
pub const DISPLAY_CLASS_PATH: &str =
    r"SYSTEM\CurrentControlSet\Control\Class\{4d36e968-e325-11ce-bfc1-08002be10318}";
pub const GRAPHICS_DRIVERS_PATH: &str = r"SYSTEM\CurrentControlSet\Control\GraphicsDrivers";
pub const DEFAULT_ADAPTER: &str = "0000";

// Driver descriptions that identify a virtual display driver.
pub const VDD_SIGNATURES: [&str; 4] = ["Virtual Display", "IddSample", "Parsec", "GPU-SIM"];

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("access denied to HKLM\\{path}; administrator privileges are required")]
    AccessDenied { path: String },

    #[error("registry key HKLM\\{path} is unavailable: {reason}")]
    KeyUnavailable { path: String, reason: String },

    #[error("cannot encode {name}: negative value {value}")]
    NegativeValue { name: String, value: i64 },

    #[error("registry error on HKLM\\{path}: {source}")]
    Os {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed registry file at line {line}: {reason}")]
    MalformedBackup { line: usize, reason: String },

    #[error("the system registry is only available on Windows")]
    Unsupported,
}

impl RegistryError {
    pub fn is_access_denied(&self) -> bool {
        matches!(self, RegistryError::AccessDenied { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPhase {
    Idle,
    BackingUp,
    Writing,
    Committed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Committed,
    CompletedWithFailures(usize),
}

#[derive(Debug)]
pub struct FieldFailure {
    pub name: String,
    pub error: RegistryError,
}

// What one apply did. Backup problems are recorded here and never stop the
// write.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub adapter_path: String,
    pub written: Vec<String>,
    pub failures: Vec<FieldFailure>,
    pub backups: Vec<PathBuf>,
    pub backup_error: Option<String>,
}

impl ApplyReport {
    pub fn outcome(&self) -> ApplyOutcome {
        if self.failures.is_empty() {
            ApplyOutcome::Committed
        } else {
            ApplyOutcome::CompletedWithFailures(self.failures.len())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdapterInfo {
    pub index: String,
    pub path: String,
    pub values: ValueMap,
}

impl AdapterInfo {
    pub fn text(&self, name: &str) -> Option<String> {
        self.values
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_text())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentGpuInfo {
    pub name: String,
    pub manufacturer: String,
    pub driver_version: String,
    pub driver_date: String,
    pub device_id: String,
    pub hardware_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoController {
    pub guid: String,
    pub path: String,
    pub values: ValueMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDisplayDriver {
    pub name: String,
    pub adapter_index: String,
}

pub struct GpuRegistry {
    hive: Arc<dyn RegistryHive>,
    backups: Option<BackupManager>,
    phase: ApplyPhase,
}

impl GpuRegistry {
    // `backups: None` disables backup-before-write.
    pub fn new(hive: Arc<dyn RegistryHive>, backups: Option<BackupManager>) -> Self {
        Self {
            hive,
            backups,
            phase: ApplyPhase::Idle,
        }
    }

    pub fn from_settings(hive: Arc<dyn RegistryHive>, settings: &Settings) -> Self {
        let backups = settings
            .create_backups
            .then(|| BackupManager::from_settings(settings));
        Self::new(hive, backups)
    }

    pub fn hive(&self) -> &dyn RegistryHive {
        self.hive.as_ref()
    }

    pub fn backup_manager(&self) -> Option<&BackupManager> {
        self.backups.as_ref()
    }

    pub fn phase(&self) -> ApplyPhase {
        self.phase
    }

    pub fn apply_profile(&mut self, profile: &GpuProfile) -> Result<ApplyReport, RegistryError> {
        self.apply_profile_to(profile, DEFAULT_ADAPTER)
    }

    // Backs up, then writes `registry_entries(profile)` to adapter
    // `adapter_index`.
    // Fails only when the adapter key cannot be opened, or when every field
    // was refused with access denied. Other per-field failures are counted
    // in the report.
    pub fn apply_profile_to(
        &mut self,
        profile: &GpuProfile,
        adapter_index: &str,
    ) -> Result<ApplyReport, RegistryError> {
        let mut report = ApplyReport {
            adapter_path: hive::join_path(DISPLAY_CLASS_PATH, adapter_index),
            ..Default::default()
        };

        self.phase = ApplyPhase::BackingUp;
        if let Some(manager) = &self.backups {
            tracing::info!("creating backup before applying {}", profile.name);
            match manager.create_full_backup(self.hive.as_ref()) {
                Ok(paths) => {
                    report.backups = paths;
                    manager.cleanup_old_backups(manager.keep_count());
                }
                Err(e) => {
                    tracing::warn!("backup failed, continuing with the write: {e}");
                    report.backup_error = Some(e.to_string());
                }
            }
        }

        self.phase = ApplyPhase::Writing;
        let mut writer = match self.hive.open_for_write(&report.adapter_path, false) {
            Ok(w) => w,
            Err(e) => {
                self.phase = ApplyPhase::Failed;
                tracing::error!("could not open adapter key for writing: {e}");
                return Err(match e {
                    denied @ RegistryError::AccessDenied { .. } => denied,
                    RegistryError::KeyUnavailable { .. } => e,
                    other => RegistryError::KeyUnavailable {
                        path: report.adapter_path.clone(),
                        reason: other.to_string(),
                    },
                });
            }
        };

        for (name, entry) in projection::registry_entries(profile) {
            let result = encode_entry(&name, &entry).and_then(|v| writer.set_value(&name, &v));
            match result {
                Ok(()) => {
                    tracing::debug!("set registry value {name}");
                    report.written.push(name);
                }
                Err(error) => {
                    tracing::error!("failed to set {name}: {error}");
                    report.failures.push(FieldFailure { name, error });
                }
            }
        }
        drop(writer);

        let all_denied = !report.failures.is_empty()
            && report.failures.iter().all(|f| f.error.is_access_denied());
        if report.written.is_empty() && all_denied {
            self.phase = ApplyPhase::Failed;
            tracing::error!("every registry write was denied; run as administrator");
            return Err(RegistryError::AccessDenied {
                path: report.adapter_path,
            });
        }

        self.phase = ApplyPhase::Committed;
        match report.outcome() {
            ApplyOutcome::Committed => {
                tracing::info!("applied GPU profile {} ({} values)", profile.name, report.written.len())
            }
            ApplyOutcome::CompletedWithFailures(n) => tracing::warn!(
                "applied GPU profile {} with {n} failed values",
                profile.name
            ),
        }
        Ok(report)
    }

    // Numbered adapter subkeys of the display class key, in index order.
    pub fn display_adapters(&self) -> Vec<AdapterInfo> {
        let subkeys = match self.hive.subkeys(DISPLAY_CLASS_PATH) {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("could not open display class key: {e}");
                return Vec::new();
            }
        };

        let mut adapters: Vec<AdapterInfo> = subkeys
            .into_iter()
            .filter(|k| !k.is_empty() && k.chars().all(|c| c.is_ascii_digit()))
            .filter_map(|index| {
                let path = hive::join_path(DISPLAY_CLASS_PATH, &index);
                match self.hive.values(&path) {
                    Ok(values) => Some(AdapterInfo {
                        index,
                        path,
                        values,
                    }),
                    Err(e) => {
                        tracing::debug!("skipping adapter {index}: {e}");
                        None
                    }
                }
            })
            .collect();
        adapters.sort_by(|a, b| a.index.cmp(&b.index));

        tracing::info!("found {} display adapters in registry", adapters.len());
        adapters
    }

    pub fn current_gpu_info(&self) -> Option<CurrentGpuInfo> {
        let primary = self.display_adapters().into_iter().next()?;
        let text = |name: &str, default: &str| primary.text(name).unwrap_or_else(|| default.to_string());
        Some(CurrentGpuInfo {
            name: text("DriverDesc", "Unknown GPU"),
            manufacturer: text("ProviderName", "Unknown"),
            driver_version: text("DriverVersion", "Unknown"),
            driver_date: text("DriverDate", ""),
            device_id: text("MatchingDeviceId", ""),
            hardware_id: text("HardwareID", ""),
        })
    }

    // `Control\Video\{guid}\0000` for every controller GUID.
    pub fn video_controllers(&self) -> Vec<VideoController> {
        let Ok(guids) = self.hive.subkeys(VIDEO_PATH) else {
            return Vec::new();
        };
        guids
            .into_iter()
            .filter(|g| g.starts_with('{'))
            .filter_map(|guid| {
                let path = hive::join_path(&hive::join_path(VIDEO_PATH, &guid), "0000");
                let values = self.hive.values(&path).ok()?;
                Some(VideoController { guid, path, values })
            })
            .collect()
    }

    pub fn graphics_drivers_config(&self) -> ValueMap {
        self.hive.values(GRAPHICS_DRIVERS_PATH).unwrap_or_default()
    }

    pub fn detect_virtual_display_driver(&self) -> Option<VirtualDisplayDriver> {
        self.display_adapters().into_iter().find_map(|adapter| {
            let desc = adapter.text("DriverDesc")?;
            let lower = desc.to_lowercase();
            VDD_SIGNATURES
                .iter()
                .any(|sig| lower.contains(&sig.to_lowercase()))
                .then(|| {
                    tracing::info!("found virtual display driver: {desc}");
                    VirtualDisplayDriver {
                        name: desc,
                        adapter_index: adapter.index,
                    }
                })
        })
    }
}

#[cfg(windows)]
pub fn system_hive() -> Result<Arc<dyn RegistryHive>, RegistryError> {
    Ok(Arc::new(windows::WindowsHive::local_machine()))
}

#[cfg(not(windows))]
pub fn system_hive() -> Result<Arc<dyn RegistryHive>, RegistryError> {
    Err(RegistryError::Unsupported)
}
