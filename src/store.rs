use crate::config::Settings;
use crate::profile::GpuProfile;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const EXPORT_METADATA_KEY: &str = "_export_metadata";
const EXPORT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("profile not found: {0}")]
    NotFound(String),

    #[error("invalid profile id {0:?}")]
    InvalidId(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid profile document {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode profile {id}: {source}")]
    Encode {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Serialize, Deserialize)]
struct ActiveMarker {
    active_profile_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExportMetadata {
    exported_at: String,
    original_id: String,
    application: String,
    format_version: u32,
}

pub struct ProfileStore {
    dir: PathBuf,
    marker_path: PathBuf,
    profiles: BTreeMap<String, GpuProfile>,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>, marker_path: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        tracing::info!("profile store at {}", dir.display());
        Self {
            dir,
            marker_path: marker_path.into(),
            profiles: BTreeMap::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.profiles_dir, &settings.active_marker_path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    fn profile_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    // Replaces the in-memory set with every parsable `*.json` in `dir` and
    // makes `dir` the store's directory.
    pub fn load(&mut self, dir: impl AsRef<Path>) -> usize {
        self.dir = dir.as_ref().to_path_buf();
        self.reload()
    }

    pub fn reload(&mut self) -> usize {
        self.profiles.clear();

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("profiles directory unavailable {}: {e}", self.dir.display());
                return 0;
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        for path in files {
            match read_profile_file(&path) {
                Ok(profile) => {
                    tracing::debug!("loaded profile {} from {}", profile.id, path.display());
                    if let Some(previous) = self.profiles.insert(profile.id.clone(), profile) {
                        tracing::warn!(
                            "duplicate profile id {} in {}, keeping the later document",
                            previous.id,
                            path.display()
                        );
                    }
                }
                Err(e) => tracing::error!("skipping profile document: {e}"),
            }
        }

        tracing::info!("loaded {} GPU profiles", self.profiles.len());
        self.profiles.len()
    }

    pub fn get(&self, id: &str) -> Option<&GpuProfile> {
        self.profiles.get(id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&GpuProfile> {
        let wanted = name.to_lowercase();
        self.profiles
            .values()
            .find(|p| p.name.to_lowercase() == wanted)
    }

    pub fn list(&self) -> Vec<&GpuProfile> {
        self.profiles.values().collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn nvidia_profiles(&self) -> Vec<&GpuProfile> {
        self.profiles.values().filter(|p| p.is_nvidia()).collect()
    }

    pub fn amd_profiles(&self) -> Vec<&GpuProfile> {
        self.profiles.values().filter(|p| p.is_amd()).collect()
    }

    // Writes `<dir>/<id>.json`. Returns false when the file exists and
    // `overwrite` is not set, or when the write fails.
    pub fn save(&mut self, profile: GpuProfile, overwrite: bool) -> bool {
        match self.try_save(profile, overwrite) {
            Ok(saved) => saved,
            Err(e) => {
                tracing::error!("failed to save profile: {e}");
                false
            }
        }
    }

    fn try_save(&mut self, profile: GpuProfile, overwrite: bool) -> Result<bool> {
        validate_id(&profile.id)?;
        let path = self.profile_path(&profile.id);
        if path.exists() && !overwrite {
            tracing::warn!("profile file already exists: {}", path.display());
            return Ok(false);
        }

        let body = serde_json::to_vec_pretty(&profile).map_err(|source| StoreError::Encode {
            id: profile.id.clone(),
            source,
        })?;
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        write_atomic(&self.dir.join(format!(".{}.json.tmp", profile.id)), &path, &body)?;

        tracing::info!("saved profile {} ({})", profile.name, profile.id);
        self.profiles.insert(profile.id.clone(), profile);
        Ok(true)
    }

    // Removes the document and the in-memory entry. Returns false when there
    // was nothing to remove or the file could not be deleted.
    pub fn delete(&mut self, id: &str) -> bool {
        if validate_id(id).is_err() {
            return false;
        }
        let path = self.profile_path(id);
        let mut removed = false;

        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                tracing::error!("failed to delete {}: {e}", path.display());
                return false;
            }
            removed = true;
        }
        removed |= self.profiles.remove(id).is_some();

        if self.active_id().as_deref() == Some(id) {
            self.clear_active();
        }
        if removed {
            tracing::info!("deleted profile {id}");
        }
        removed
    }

    // Writes the profile plus an `_export_metadata` envelope to `path`.
    pub fn export(&self, id: &str, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        let profile = self
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut doc = profile.to_value().map_err(|source| StoreError::Encode {
            id: id.to_string(),
            source,
        })?;
        let meta = ExportMetadata {
            exported_at: Utc::now().to_rfc3339(),
            original_id: profile.id.clone(),
            application: "GPU-SIM".to_string(),
            format_version: EXPORT_FORMAT_VERSION,
        };
        if let Value::Object(map) = &mut doc {
            map.insert(
                EXPORT_METADATA_KEY.to_string(),
                serde_json::to_value(meta).unwrap_or_default(),
            );
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let body = serde_json::to_vec_pretty(&doc).map_err(|source| StoreError::Encode {
            id: id.to_string(),
            source,
        })?;
        fs::write(path, body).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!("exported profile {id} to {}", path.display());
        Ok(path.to_path_buf())
    }

    // Imports an exported (or plain) profile document.
    // On an id collision without `overwrite` the profile is stored under a
    // fresh `<id>_<suffix>` id instead; an existing profile is never replaced
    // unless `overwrite` is set.
    pub fn import(&mut self, path: impl AsRef<Path>, overwrite: bool) -> Option<GpuProfile> {
        let path = path.as_ref();
        let mut profile = match read_import_document(path) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("import failed: {e}");
                return None;
            }
        };

        if !overwrite && self.id_taken(&profile.id) {
            let fresh = self.mint_id(&profile.id);
            tracing::info!("profile id {} already exists, importing as {fresh}", profile.id);
            profile = profile.with_id(fresh);
        }

        if self.save(profile.clone(), true) {
            tracing::info!("imported profile {} from {}", profile.id, path.display());
            Some(profile)
        } else {
            None
        }
    }

    fn id_taken(&self, id: &str) -> bool {
        self.profiles.contains_key(id) || self.profile_path(id).exists()
    }

    fn mint_id(&self, base: &str) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let candidate = format!("{base}_{:08x}", rng.gen::<u32>());
            if !self.id_taken(&candidate) {
                return candidate;
            }
        }
    }

    // Records `id` as the active profile. The id must be known to the store.
    pub fn set_active(&self, id: &str) -> bool {
        if !self.profiles.contains_key(id) {
            tracing::warn!("cannot activate unknown profile {id}");
            return false;
        }
        let marker = ActiveMarker {
            active_profile_id: id.to_string(),
        };
        let result = (|| -> Result<()> {
            if let Some(parent) = self.marker_path.parent() {
                fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            let body = serde_json::to_vec(&marker).map_err(|source| StoreError::Parse {
                path: self.marker_path.clone(),
                source,
            })?;
            fs::write(&self.marker_path, body).map_err(|source| StoreError::Io {
                path: self.marker_path.clone(),
                source,
            })
        })();

        match result {
            Ok(()) => {
                tracing::info!("active profile set to {id}");
                true
            }
            Err(e) => {
                tracing::error!("failed to record active profile: {e}");
                false
            }
        }
    }

    pub fn active_id(&self) -> Option<String> {
        let raw = fs::read(&self.marker_path).ok()?;
        let marker: ActiveMarker = serde_json::from_slice(&raw).ok()?;
        Some(marker.active_profile_id)
    }

    // Best-effort lookup of the active profile: `None` when the marker is
    // missing, unreadable or names a profile that no longer exists.
    pub fn active(&self) -> Option<GpuProfile> {
        let id = self.active_id()?;
        if let Some(p) = self.profiles.get(&id) {
            return Some(p.clone());
        }
        validate_id(&id).ok()?;
        read_profile_file(&self.profile_path(&id)).ok()
    }

    pub fn clear_active(&self) -> bool {
        match fs::remove_file(&self.marker_path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::error!("failed to clear active profile marker: {e}");
                false
            }
        }
    }
}

fn validate_id(id: &str) -> Result<()> {
    let bad = id.trim().is_empty()
        || id.contains(['/', '\\'])
        || id == "."
        || id == ".."
        || id.starts_with('.');
    if bad {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

fn read_profile_file(path: &Path) -> Result<GpuProfile> {
    let raw = fs::read(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn read_import_document(path: &Path) -> Result<GpuProfile> {
    let raw = fs::read(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut doc: Value = serde_json::from_slice(&raw).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if let Value::Object(map) = &mut doc {
        map.remove(EXPORT_METADATA_KEY);
    }
    GpuProfile::from_value(doc).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn write_atomic(tmp: &Path, dest: &Path, body: &[u8]) -> Result<()> {
    fs::write(tmp, body).map_err(|source| StoreError::Io {
        path: tmp.to_path_buf(),
        source,
    })?;
    fs::rename(tmp, dest).map_err(|source| StoreError::Io {
        path: dest.to_path_buf(),
        source,
    })
}
