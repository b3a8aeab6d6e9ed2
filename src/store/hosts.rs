// ABOUTME: Central store of per-container /etc/hosts files for a namespace.
// ABOUTME: Re-synthesizes every hosts file when a container's reachable identity changes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use super::{DirLock, StoreError};

pub const HOSTS_SECTION_BEGIN: &str = "# <highk>";
pub const HOSTS_SECTION_END: &str = "# </highk>";

const HOSTS_FILE: &str = "hosts";
const META_FILE: &str = "meta.json";

/// Host-reachable identity of one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostsMeta {
    pub id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Network name to the addresses assigned on it.
    #[serde(default)]
    pub networks: BTreeMap<String, Vec<String>>,
    /// `--add-host` entries, host to address.
    #[serde(default)]
    pub extra_hosts: BTreeMap<String, String>,
}

impl HostsMeta {
    fn addresses(&self) -> impl Iterator<Item = &String> {
        self.networks.values().flatten()
    }

    fn aliases(&self) -> Vec<&str> {
        let mut aliases: Vec<&str> = Vec::new();
        if !self.hostname.is_empty() {
            aliases.push(&self.hostname);
        }
        if let Some(ref name) = self.name
            && !aliases.contains(&name.as_str())
        {
            aliases.push(name);
        }
        aliases
    }
}

/// Hosts files under `etchosts/<ns>/<id>/`.
#[derive(Debug, Clone)]
pub struct HostsStore {
    dir: PathBuf,
}

impl HostsStore {
    pub fn new(data_store: &Path, namespace: &str) -> Result<Self, StoreError> {
        let dir = data_store.join("etchosts").join(namespace);
        std::fs::create_dir_all(&dir)
            .map_err(|e| StoreError::io(format!("failed to create {}", dir.display()), e))?;
        Ok(Self { dir })
    }

    pub fn hosts_path(&self, id: &str) -> PathBuf {
        self.dir.join(id).join(HOSTS_FILE)
    }

    /// Create the hosts file for `id` with `seed` and return its absolute path.
    pub fn alloc_hosts_file(&self, id: &str, seed: &[u8]) -> Result<PathBuf, StoreError> {
        let _lock = DirLock::acquire(&self.dir)?;
        let container_dir = self.dir.join(id);
        std::fs::create_dir_all(&container_dir).map_err(|e| {
            StoreError::io(format!("failed to create {}", container_dir.display()), e)
        })?;
        let path = container_dir.join(HOSTS_FILE);
        std::fs::write(&path, seed)
            .map_err(|e| StoreError::io(format!("failed to write {}", path.display()), e))?;
        Ok(path)
    }

    /// Remove the hosts tree of `id`. Missing trees are fine.
    pub fn dealloc_hosts_file(&self, id: &str) -> Result<(), StoreError> {
        let _lock = DirLock::acquire(&self.dir)?;
        let container_dir = self.dir.join(id);
        match std::fs::remove_dir_all(&container_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(
                format!("failed to remove {}", container_dir.display()),
                e,
            )),
        }
    }

    /// Record `meta` and rewrite every hosts file in the namespace.
    pub fn acquire(&self, meta: &HostsMeta) -> Result<(), StoreError> {
        let _lock = DirLock::acquire(&self.dir)?;
        let container_dir = self.dir.join(&meta.id);
        std::fs::create_dir_all(&container_dir).map_err(|e| {
            StoreError::io(format!("failed to create {}", container_dir.display()), e)
        })?;
        let path = container_dir.join(META_FILE);
        let data = serde_json::to_vec_pretty(meta).map_err(|e| StoreError::Metadata {
            path: path.clone(),
            source: e,
        })?;
        std::fs::write(&path, data)
            .map_err(|e| StoreError::io(format!("failed to write {}", path.display()), e))?;
        self.update_all()
    }

    /// Forget the identity of `id` and rewrite the remaining hosts files.
    pub fn release(&self, id: &str) -> Result<(), StoreError> {
        let _lock = DirLock::acquire(&self.dir)?;
        let path = self.dir.join(id).join(META_FILE);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StoreError::io(
                    format!("failed to remove {}", path.display()),
                    e,
                ));
            }
        }
        self.update_all()
    }

    /// Recorded identity of `id`, if any.
    pub fn meta(&self, id: &str) -> Result<Option<HostsMeta>, StoreError> {
        read_meta(&self.dir.join(id).join(META_FILE))
    }

    fn all_meta(&self) -> Result<Vec<HostsMeta>, StoreError> {
        let mut metas = Vec::new();
        for id in self.container_ids()? {
            if let Some(meta) = read_meta(&self.dir.join(&id).join(META_FILE))? {
                metas.push(meta);
            }
        }
        metas.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(metas)
    }

    fn container_ids(&self) -> Result<Vec<String>, StoreError> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| StoreError::io(format!("failed to read {}", self.dir.display()), e))?;
        Ok(entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect())
    }

    fn update_all(&self) -> Result<(), StoreError> {
        let metas = self.all_meta()?;
        for id in self.container_ids()? {
            let path = self.dir.join(&id).join(HOSTS_FILE);
            let current = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StoreError::io(
                        format!("failed to read {}", path.display()),
                        e,
                    ));
                }
            };
            let own = metas.iter().find(|m| m.id == id);
            let content = render_hosts(&current, own, &metas);
            std::fs::write(&path, content)
                .map_err(|e| StoreError::io(format!("failed to write {}", path.display()), e))?;
        }
        Ok(())
    }
}

fn read_meta(path: &Path) -> Result<Option<HostsMeta>, StoreError> {
    match std::fs::read(path) {
        Ok(data) => serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| StoreError::Metadata {
                path: path.to_path_buf(),
                source: e,
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(format!("failed to read {}", path.display()), e)),
    }
}

/// Seed content with the generated section replaced.
fn render_hosts(current: &str, own: Option<&HostsMeta>, all: &[HostsMeta]) -> String {
    let mut seed = String::new();
    let mut in_section = false;
    for line in current.lines() {
        match line.trim() {
            HOSTS_SECTION_BEGIN => in_section = true,
            HOSTS_SECTION_END => in_section = false,
            _ if !in_section => {
                seed.push_str(line);
                seed.push('\n');
            }
            _ => {}
        }
    }

    let mut section = String::new();
    if let Some(own) = own {
        for addr in own.addresses() {
            let _ = writeln!(section, "{}\t{}", addr, own.aliases().join(" "));
        }
        for (host, addr) in &own.extra_hosts {
            let _ = writeln!(section, "{}\t{}", addr, host);
        }
    }
    for peer in all {
        if own.is_some_and(|o| o.id == peer.id) {
            continue;
        }
        let aliases = peer.aliases();
        if aliases.is_empty() {
            continue;
        }
        for addr in peer.addresses() {
            let _ = writeln!(section, "{}\t{}", addr, aliases.join(" "));
        }
    }

    if section.is_empty() {
        return seed;
    }
    format!("{seed}{HOSTS_SECTION_BEGIN}\n{section}{HOSTS_SECTION_END}\n")
}
