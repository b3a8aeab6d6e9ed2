// ABOUTME: Named and anonymous volumes stored under volumes/<ns>/<name>/.
// ABOUTME: Content lives in _data/, metadata in volume.json; removal skips referenced volumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{DirLock, StoreError};
use crate::types::{Identifier, random_hex_id};

const DATA_DIR: &str = "_data";
const META_FILE: &str = "volume.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct VolumeMeta {
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    anonymous: bool,
}

/// A volume as seen by `volume ls` and `volume inspect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Volume {
    pub name: String,
    /// Host directory mounted into containers.
    pub mountpoint: PathBuf,
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub anonymous: bool,
    /// Bytes used under `_data/`, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct VolumeStore {
    dir: PathBuf,
}

impl VolumeStore {
    pub fn new(data_store: &Path, namespace: &str) -> Result<Self, StoreError> {
        let dir = data_store.join("volumes").join(namespace);
        std::fs::create_dir_all(&dir)
            .map_err(|e| StoreError::io(format!("failed to create {}", dir.display()), e))?;
        Ok(Self { dir })
    }

    /// Create `name`, or an anonymous volume with a generated name when `None`.
    /// Creating an existing volume returns it unchanged.
    pub fn create(
        &self,
        name: Option<&str>,
        labels: BTreeMap<String, String>,
    ) -> Result<Volume, StoreError> {
        let (name, anonymous) = match name {
            Some(name) => (Identifier::new(name)?.as_str().to_string(), false),
            None => (random_hex_id(), true),
        };

        let _lock = DirLock::acquire(&self.dir)?;
        let volume_dir = self.dir.join(&name);
        if volume_dir.join(META_FILE).exists() {
            return self.load(&name, false);
        }

        let data_dir = volume_dir.join(DATA_DIR);
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| StoreError::io(format!("failed to create {}", data_dir.display()), e))?;

        let meta = VolumeMeta {
            labels,
            created_at: Some(Utc::now()),
            anonymous,
        };
        let meta_path = volume_dir.join(META_FILE);
        let data = serde_json::to_vec_pretty(&meta).map_err(|e| StoreError::Metadata {
            path: meta_path.clone(),
            source: e,
        })?;
        std::fs::write(&meta_path, data)
            .map_err(|e| StoreError::io(format!("failed to write {}", meta_path.display()), e))?;

        tracing::debug!("created volume {}", name);
        self.load(&name, false)
    }

    pub fn get(&self, name: &str) -> Result<Volume, StoreError> {
        self.load(name, false)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.dir.join(name).join(META_FILE).is_file()
    }

    /// All volumes, optionally with disk usage.
    pub fn list(&self, size: bool) -> Result<Vec<Volume>, StoreError> {
        let mut volumes = Vec::new();
        for name in self.names()? {
            match self.load(&name, size) {
                Ok(volume) => volumes.push(volume),
                Err(e) => tracing::warn!("skipping volume {}: {}", name, e),
            }
        }
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }

    /// Number of volumes without reading metadata.
    pub fn count(&self) -> Result<usize, StoreError> {
        Ok(self.names()?.len())
    }

    /// Remove each unreferenced volume in `names`.
    /// Returns the removed names and one error per volume that was kept.
    pub fn remove(
        &self,
        names: &[String],
        in_use: &HashSet<String>,
    ) -> Result<(Vec<String>, Vec<StoreError>), StoreError> {
        let _lock = DirLock::acquire(&self.dir)?;
        let mut removed = Vec::new();
        let mut errors = Vec::new();
        for name in names {
            if !self.exists(name) {
                errors.push(StoreError::VolumeNotFound(name.clone()));
                continue;
            }
            if in_use.contains(name) {
                errors.push(StoreError::VolumeInUse(name.clone()));
                continue;
            }
            match self.remove_dir(name) {
                Ok(()) => removed.push(name.clone()),
                Err(e) => errors.push(e),
            }
        }
        Ok((removed, errors))
    }

    /// Remove every volume not in `in_use`.
    pub fn prune(&self, in_use: &HashSet<String>) -> Result<Vec<String>, StoreError> {
        let candidates: Vec<String> = self
            .names()?
            .into_iter()
            .filter(|n| !in_use.contains(n))
            .collect();
        let (removed, errors) = self.remove(&candidates, in_use)?;
        for e in errors {
            tracing::warn!("prune: {}", e);
        }
        Ok(removed)
    }

    fn remove_dir(&self, name: &str) -> Result<(), StoreError> {
        let path = self.dir.join(name);
        std::fs::remove_dir_all(&path)
            .map_err(|e| StoreError::io(format!("failed to remove {}", path.display()), e))?;
        tracing::debug!("removed volume {}", name);
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>, StoreError> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| StoreError::io(format!("failed to read {}", self.dir.display()), e))?;
        Ok(entries
            .flatten()
            .filter(|e| e.path().join(META_FILE).is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect())
    }

    fn load(&self, name: &str, size: bool) -> Result<Volume, StoreError> {
        let volume_dir = self.dir.join(name);
        let meta_path = volume_dir.join(META_FILE);
        let data = match std::fs::read(&meta_path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::VolumeNotFound(name.to_string()));
            }
            Err(e) => {
                return Err(StoreError::io(
                    format!("failed to read {}", meta_path.display()),
                    e,
                ));
            }
        };
        let meta: VolumeMeta = serde_json::from_slice(&data).map_err(|e| StoreError::Metadata {
            path: meta_path,
            source: e,
        })?;
        let mountpoint = volume_dir.join(DATA_DIR);
        let size = size.then(|| disk_usage(&mountpoint));
        Ok(Volume {
            name: name.to_string(),
            mountpoint,
            labels: meta.labels,
            created_at: meta.created_at,
            anonymous: meta.anonymous,
            size,
        })
    }
}

fn disk_usage(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}
