use super::hive::{join_path, RegistryHive};
use super::regfile::{self, RegKeyDump, HKLM_PREFIX};
use super::{FieldFailure, RegistryError, DISPLAY_CLASS_PATH, GRAPHICS_DRIVERS_PATH, VIDEO_PATH};
use crate::config::Settings;
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

// Subtrees captured before every apply
pub const BACKUP_ROOTS: [&str; 3] = [VIDEO_PATH, DISPLAY_CLASS_PATH, GRAPHICS_DRIVERS_PATH];

// What one restore wrote back. Failed keys and values are listed by their
// HKLM-relative path.
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored: usize,
    pub failures: Vec<FieldFailure>,
}

pub struct BackupManager {
    dir: PathBuf,
    keep: usize,
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>, keep: usize) -> Self {
        let dir = dir.into();
        tracing::info!("backup directory {}", dir.display());
        Self { dir, keep }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.backup_dir, settings.backup_keep_count)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn keep_count(&self) -> usize {
        self.keep
    }

    fn timestamp() -> String {
        Local::now().format("%Y%m%d_%H%M%S_%3f").to_string()
    }

    // Exports `path` (relative to HKLM) and everything below it. Without
    // `name` the file is called `<sanitized path>_<timestamp>.reg`.
    pub fn create_backup(
        &self,
        hive: &dyn RegistryHive,
        path: &str,
        name: Option<&str>,
    ) -> Result<PathBuf, RegistryError> {
        let filename = match name {
            Some(n) if n.ends_with(".reg") => n.to_string(),
            Some(n) => format!("{n}.reg"),
            None => {
                let safe: String = path
                    .replace('\\', "_")
                    .chars()
                    .filter(|c| *c != '{' && *c != '}')
                    .take(50)
                    .collect();
                format!("{safe}_{}.reg", Self::timestamp())
            }
        };

        let mut dumps = Vec::new();
        dump_tree(hive, path, &mut dumps)?;

        fs::create_dir_all(&self.dir).map_err(|source| RegistryError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let dest = self.dir.join(filename);
        fs::write(&dest, regfile::render(&dumps)).map_err(|source| RegistryError::Io {
            path: dest.clone(),
            source,
        })?;

        tracing::info!("created backup {} ({} keys)", dest.display(), dumps.len());
        Ok(dest)
    }

    // Backs up every root in `BACKUP_ROOTS` under one shared timestamp.
    // Individual roots that fail are logged; the call fails only when none
    // could be written.
    pub fn create_full_backup(&self, hive: &dyn RegistryHive) -> Result<Vec<PathBuf>, RegistryError> {
        let stamp = Self::timestamp();
        let mut created = Vec::new();
        let mut last_error = None;

        for root in BACKUP_ROOTS {
            let leaf: String = root
                .rsplit('\\')
                .next()
                .unwrap_or(root)
                .chars()
                .filter(|c| *c != '{' && *c != '}')
                .take(30)
                .collect();
            let name = format!("gpu_{leaf}_{stamp}.reg");
            match self.create_backup(hive, root, Some(&name)) {
                Ok(p) => created.push(p),
                Err(e) => {
                    tracing::warn!("could not back up HKLM\\{root}: {e}");
                    last_error = Some(e);
                }
            }
        }

        match (created.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => {
                tracing::info!("created {} GPU registry backups", created.len());
                Ok(created)
            }
        }
    }

    // Writes every value in a `.reg` snapshot back into `hive`. Keys outside
    // HKLM are skipped. A key or value that cannot be written is recorded in
    // the report and the rest of the snapshot is still restored; the call
    // fails only when the file is unreadable or every write was denied.
    pub fn restore_backup(
        &self,
        hive: &dyn RegistryHive,
        path: &Path,
    ) -> Result<RestoreReport, RegistryError> {
        let raw = fs::read(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let dumps = regfile::parse(&regfile::decode_file(&raw)?)?;

        let mut report = RestoreReport::default();
        for dump in dumps {
            let Some(relative) = strip_hklm(&dump.path) else {
                tracing::warn!("skipping non-HKLM key {} in {}", dump.path, path.display());
                continue;
            };
            let mut writer = match hive.open_for_write(relative, true) {
                Ok(w) => w,
                Err(error) => {
                    tracing::error!("failed to open {relative} for restore: {error}");
                    report.failures.push(FieldFailure {
                        name: relative.to_string(),
                        error,
                    });
                    continue;
                }
            };
            for (name, value) in &dump.values {
                match writer.set_value(name, value) {
                    Ok(()) => report.restored += 1,
                    Err(error) => {
                        tracing::error!("failed to restore {relative}\\{name}: {error}");
                        report.failures.push(FieldFailure {
                            name: join_path(relative, name),
                            error,
                        });
                    }
                }
            }
        }

        let all_denied = !report.failures.is_empty()
            && report.failures.iter().all(|f| f.error.is_access_denied());
        if report.restored == 0 && all_denied {
            tracing::error!("every restore write was denied; run as administrator");
            return Err(RegistryError::AccessDenied {
                path: report.failures.remove(0).name,
            });
        }

        if report.failures.is_empty() {
            tracing::info!("restored {} values from {}", report.restored, path.display());
        } else {
            tracing::warn!(
                "restored {} values from {}, {} failed",
                report.restored,
                path.display(),
                report.failures.len()
            );
        }
        Ok(report)
    }

    // newest first
    pub fn list_backups(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut files: Vec<(SystemTime, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "reg"))
            .map(|p| {
                let modified = fs::metadata(&p)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, p)
            })
            .collect();
        files.sort_by(|a, b| b.cmp(a));
        files.into_iter().map(|(_, p)| p).collect()
    }

    pub fn latest_backup(&self, prefix: &str) -> Option<PathBuf> {
        self.list_backups().into_iter().find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
    }

    // Returns how many were deleted.
    pub fn cleanup_old_backups(&self, keep: usize) -> usize {
        let mut deleted = 0;
        for old in self.list_backups().into_iter().skip(keep) {
            match fs::remove_file(&old) {
                Ok(()) => {
                    tracing::debug!("deleted old backup {}", old.display());
                    deleted += 1;
                }
                Err(e) => tracing::error!("failed to delete backup {}: {e}", old.display()),
            }
        }
        if deleted > 0 {
            tracing::info!("cleaned up {deleted} old backups");
        }
        deleted
    }
}

fn dump_tree(hive: &dyn RegistryHive, path: &str, out: &mut Vec<RegKeyDump>) -> Result<(), RegistryError> {
    out.push(RegKeyDump {
        path: join_path(HKLM_PREFIX, path),
        values: hive.values(path)?,
    });
    for child in hive.subkeys(path)? {
        dump_tree(hive, &join_path(path, &child), out)?;
    }
    Ok(())
}

fn strip_hklm(path: &str) -> Option<&str> {
    ["HKEY_LOCAL_MACHINE\\", "HKLM\\"].iter().find_map(|prefix| {
        path.get(..prefix.len())
            .filter(|head| head.eq_ignore_ascii_case(prefix))
            .map(|_| &path[prefix.len()..])
    })
}
