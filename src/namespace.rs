// ABOUTME: Namespace management: list with resource counts, create, update, remove and inspect.
// ABOUTME: Counting failures are reported as warnings so one broken namespace does not hide the rest.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::diagnostics::{Diagnostics, Warning};
use crate::error::{Error, Result};
use crate::runtime::{Runtime, is_rootless};
use crate::store::VolumeStore;
use crate::types::Identifier;

/// cgroup v2 mount point.
const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// One row of `namespace ls`. Counts are `None` when they could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceSummary {
    pub name: String,
    pub containers: Option<usize>,
    pub images: Option<usize>,
    pub volumes: Option<usize>,
    pub labels: BTreeMap<String, String>,
}

/// JSON document printed by `namespace inspect`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct NamespaceDocument {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

/// Parse `key=value` labels; a bare key means `key=true`.
pub fn parse_labels(args: &[String]) -> Result<HashMap<String, String>> {
    let mut labels = HashMap::new();
    for arg in args {
        let (key, value) = match arg.split_once('=') {
            Some((key, value)) => (key, value),
            None => (arg.as_str(), "true"),
        };
        if key.is_empty() {
            return Err(Error::InvalidArgument(format!("invalid label {:?}", arg)));
        }
        labels.insert(key.to_string(), value.to_string());
    }
    Ok(labels)
}

pub struct NamespaceManager<'a, R: Runtime> {
    runtime: &'a R,
    data_store: PathBuf,
    cgroup_root: PathBuf,
}

impl<'a, R: Runtime> NamespaceManager<'a, R> {
    pub fn new(runtime: &'a R, data_store: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            data_store: data_store.into(),
            cgroup_root: PathBuf::from(CGROUP_ROOT),
        }
    }

    /// Use `root` instead of the system cgroup mount.
    pub fn with_cgroup_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cgroup_root = root.into();
        self
    }

    fn volumes_dir(&self, name: &str) -> PathBuf {
        self.data_store.join("volumes").join(name)
    }

    fn count_volumes(&self, name: &str) -> Result<usize> {
        if !self.volumes_dir(name).is_dir() {
            return Ok(0);
        }
        Ok(VolumeStore::new(&self.data_store, name)?.count()?)
    }

    /// Every namespace with its container, image and volume counts, sorted by name.
    pub async fn list(&self, diagnostics: &mut Diagnostics) -> Result<Vec<NamespaceSummary>> {
        let mut namespaces = self.runtime.list_namespaces().await?;
        namespaces.sort_by(|a, b| a.name.cmp(&b.name));

        let mut rows = Vec::with_capacity(namespaces.len());
        for ns in namespaces {
            let containers = match self.runtime.list_containers(&ns.name).await {
                Ok(records) => Some(records.len()),
                Err(e) => {
                    diagnostics.warn(Warning::namespace_count(format!(
                        "failed to count containers in namespace {}: {}",
                        ns.name, e
                    )));
                    None
                }
            };
            let images = match self.runtime.list_images(&ns.name).await {
                Ok(names) => Some(names.len()),
                Err(e) => {
                    diagnostics.warn(Warning::namespace_count(format!(
                        "failed to count images in namespace {}: {}",
                        ns.name, e
                    )));
                    None
                }
            };
            let volumes = match self.count_volumes(&ns.name) {
                Ok(n) => Some(n),
                Err(e) => {
                    diagnostics.warn(Warning::namespace_count(format!(
                        "failed to count volumes in namespace {}: {}",
                        ns.name, e
                    )));
                    None
                }
            };
            rows.push(NamespaceSummary {
                name: ns.name,
                containers,
                images,
                volumes,
                labels: ns.labels.into_iter().collect(),
            });
        }
        Ok(rows)
    }

    /// Create `name`, which must be a valid identifier.
    pub async fn create(&self, name: &str, labels: &[String]) -> Result<()> {
        let name = Identifier::new(name)?;
        let name = name.as_str();
        let labels = parse_labels(labels)?;
        self.runtime.create_namespace(name, &labels).await?;
        tracing::info!("created namespace {}", name);
        Ok(())
    }

    /// Set labels on an existing namespace.
    pub async fn update(&self, name: &str, labels: &[String]) -> Result<()> {
        let labels = parse_labels(labels)?;
        self.runtime.get_namespace(name).await.map_err(|e| {
            if e.is_not_found() {
                Error::NotFound(format!("namespace {} not found", name))
            } else {
                e.into()
            }
        })?;
        self.runtime.update_namespace(name, &labels).await?;
        Ok(())
    }

    /// Remove each namespace in `names`, returning those removed.
    /// Namespaces holding volumes are kept; the runtime refuses non-empty ones.
    pub async fn remove(
        &self,
        names: &[String],
        remove_cgroup: bool,
        diagnostics: &mut Diagnostics,
    ) -> (Vec<String>, Result<()>) {
        let mut removed = Vec::new();
        let mut errors = Vec::new();
        for name in names {
            match self.remove_one(name, remove_cgroup, diagnostics).await {
                Ok(()) => removed.push(name.clone()),
                Err(e) => errors.push(e),
            }
        }
        (removed, Error::join(errors))
    }

    async fn remove_one(
        &self,
        name: &str,
        remove_cgroup: bool,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        match self.runtime.get_namespace(name).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Err(Error::NotFound(format!("namespace {} not found", name)));
            }
            Err(e) => return Err(e.into()),
        }
        let volumes = self.count_volumes(name)?;
        if volumes > 0 {
            return Err(Error::PreconditionFailed(format!(
                "namespace {} still has {} volume(s)",
                name, volumes
            )));
        }
        self.runtime.delete_namespace(name).await?;
        let dir = self.volumes_dir(name);
        if dir.is_dir()
            && let Err(e) = std::fs::remove_dir(&dir)
        {
            tracing::debug!("leaving {}: {}", dir.display(), e);
        }
        if remove_cgroup {
            if is_rootless() {
                diagnostics.warn(Warning::cleanup(format!(
                    "cgroup of namespace {} is not removed in rootless mode",
                    name
                )));
            } else if let Err(e) = remove_cgroup_dir(&self.cgroup_root, name) {
                diagnostics.warn(Warning::cleanup(format!(
                    "failed to remove cgroup of namespace {}: {}",
                    name, e
                )));
            }
        }
        tracing::info!("removed namespace {}", name);
        Ok(())
    }

    /// Documents for `names`; unknown names are errors, known ones are still returned.
    pub async fn inspect(&self, names: &[String]) -> (Vec<NamespaceDocument>, Result<()>) {
        let mut docs = Vec::new();
        let mut errors = Vec::new();
        for name in names {
            match self.runtime.get_namespace(name).await {
                Ok(ns) => docs.push(NamespaceDocument {
                    name: ns.name,
                    labels: ns.labels.into_iter().collect(),
                }),
                Err(e) if e.is_not_found() => {
                    errors.push(Error::NotFound(format!("namespace {} not found", name)))
                }
                Err(e) => errors.push(e.into()),
            }
        }
        (docs, Error::join(errors))
    }
}

fn remove_cgroup_dir(root: &Path, name: &str) -> std::io::Result<()> {
    match std::fs::remove_dir(root.join(name)) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_label_keys_mean_true() {
        let labels = parse_labels(&["team=infra".into(), "critical".into(), "x=".into()]).unwrap();
        assert_eq!(labels["team"], "infra");
        assert_eq!(labels["critical"], "true");
        assert_eq!(labels["x"], "");
    }

    #[test]
    fn empty_label_keys_are_rejected() {
        let err = parse_labels(&["=value".into()]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn missing_cgroup_is_already_removed() {
        let root = tempfile::tempdir().unwrap();
        remove_cgroup_dir(root.path(), "absent").unwrap();
        std::fs::create_dir(root.path().join("present")).unwrap();
        remove_cgroup_dir(root.path(), "present").unwrap();
        assert!(!root.path().join("present").exists());
    }
}
