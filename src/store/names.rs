// ABOUTME: Per-namespace container name ownership on disk.
// ABOUTME: names/<ns>/<name> holds the owning container id; mutations take a directory lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{DirLock, StoreError};
use crate::types::ContainerName;

/// Exclusive ownership of container names within one namespace.
#[derive(Debug, Clone)]
pub struct NameStore {
    dir: PathBuf,
}

impl NameStore {
    pub fn new(data_store: &Path, namespace: &str) -> Result<Self, StoreError> {
        let dir = data_store.join("names").join(namespace);
        std::fs::create_dir_all(&dir)
            .map_err(|e| StoreError::io(format!("failed to create {}", dir.display()), e))?;
        Ok(Self { dir })
    }

    /// Claim `name` for `id`. Re-acquiring by the current owner is a no-op.
    pub fn acquire(&self, name: &str, id: &str) -> Result<(), StoreError> {
        ContainerName::new(name)?;
        let _lock = DirLock::acquire(&self.dir)?;

        match self.read_owner(name)? {
            Some(owner) if owner == id => Ok(()),
            Some(owner) => Err(StoreError::NameInUse {
                name: name.to_string(),
                owner,
            }),
            None => self.write_owner(name, id),
        }
    }

    /// Give up `name`. Empty names and names already gone are no-ops.
    pub fn release(&self, name: &str, id: &str) -> Result<(), StoreError> {
        if name.is_empty() {
            return Ok(());
        }
        ContainerName::new(name)?;
        let _lock = DirLock::acquire(&self.dir)?;

        match self.read_owner(name)? {
            None => Ok(()),
            Some(owner) if owner != id => Err(StoreError::NameNotOwned {
                name: name.to_string(),
                owner,
                id: id.to_string(),
            }),
            Some(_) => {
                let path = self.dir.join(name);
                std::fs::remove_file(&path)
                    .map_err(|e| StoreError::io(format!("failed to remove {}", path.display()), e))
            }
        }
    }

    /// Move `old` (owned by `id`) to the free name `new`.
    pub fn rename(&self, old: &str, id: &str, new: &str) -> Result<(), StoreError> {
        ContainerName::new(old)?;
        ContainerName::new(new)?;
        let _lock = DirLock::acquire(&self.dir)?;

        match self.read_owner(old)? {
            Some(owner) if owner == id => {}
            Some(owner) => {
                return Err(StoreError::NameNotOwned {
                    name: old.to_string(),
                    owner,
                    id: id.to_string(),
                });
            }
            None => {
                return Err(StoreError::NameNotOwned {
                    name: old.to_string(),
                    owner: String::new(),
                    id: id.to_string(),
                });
            }
        }

        if let Some(owner) = self.read_owner(new)? {
            return Err(StoreError::NameInUse {
                name: new.to_string(),
                owner,
            });
        }

        let from = self.dir.join(old);
        let to = self.dir.join(new);
        std::fs::rename(&from, &to).map_err(|e| {
            StoreError::io(
                format!("failed to rename {} to {}", from.display(), to.display()),
                e,
            )
        })
    }

    /// Owner of `name`, read without locking.
    pub fn lookup(&self, name: &str) -> Result<Option<String>, StoreError> {
        if ContainerName::new(name).is_err() {
            return Ok(None);
        }
        self.read_owner(name)
    }

    /// Every name record in the namespace.
    pub fn list(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let mut names = BTreeMap::new();
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| StoreError::io(format!("failed to read {}", self.dir.display()), e))?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if let Some(owner) = self.read_owner(&name)? {
                names.insert(name, owner);
            }
        }
        Ok(names)
    }

    fn read_owner(&self, name: &str) -> Result<Option<String>, StoreError> {
        let path = self.dir.join(name);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(format!("failed to read {}", path.display()), e)),
        }
    }

    fn write_owner(&self, name: &str, id: &str) -> Result<(), StoreError> {
        let path = self.dir.join(name);
        std::fs::write(&path, id)
            .map_err(|e| StoreError::io(format!("failed to write {}", path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, NameStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = NameStore::new(dir.path(), "default").unwrap();
        (dir, store)
    }

    #[test]
    fn acquire_writes_owner_file() {
        let (dir, store) = store();
        store.acquire("box", "id1").unwrap();
        let content = std::fs::read_to_string(dir.path().join("names/default/box")).unwrap();
        assert_eq!(content, "id1");
    }

    #[test]
    fn reacquire_by_owner_is_noop() {
        let (_dir, store) = store();
        store.acquire("box", "id1").unwrap();
        store.acquire("box", "id1").unwrap();
        assert_eq!(store.lookup("box").unwrap().as_deref(), Some("id1"));
    }

    #[test]
    fn acquire_by_other_id_fails() {
        let (_dir, store) = store();
        store.acquire("box", "id1").unwrap();
        let err = store.acquire("box", "id2").unwrap_err();
        assert!(matches!(err, StoreError::NameInUse { ref owner, .. } if owner == "id1"));
    }

    #[test]
    fn release_requires_ownership() {
        let (_dir, store) = store();
        store.acquire("box", "id1").unwrap();
        assert!(store.release("box", "id2").is_err());
        store.release("box", "id1").unwrap();
        assert!(store.lookup("box").unwrap().is_none());
    }

    #[test]
    fn release_of_empty_name_is_silent() {
        let (_dir, store) = store();
        store.release("", "id1").unwrap();
    }

    #[test]
    fn rename_to_taken_name_leaves_store_unchanged() {
        let (_dir, store) = store();
        store.acquire("a", "id1").unwrap();
        store.acquire("b", "id2").unwrap();

        let err = store.rename("a", "id1", "b").unwrap_err();
        assert!(matches!(err, StoreError::NameInUse { .. }));
        assert_eq!(store.lookup("a").unwrap().as_deref(), Some("id1"));
        assert_eq!(store.lookup("b").unwrap().as_deref(), Some("id2"));
    }

    #[test]
    fn rename_moves_record() {
        let (_dir, store) = store();
        store.acquire("a", "id1").unwrap();
        store.rename("a", "id1", "c").unwrap();
        assert!(store.lookup("a").unwrap().is_none());
        assert_eq!(store.lookup("c").unwrap().as_deref(), Some("id1"));
    }

    #[test]
    fn names_with_separators_are_rejected() {
        let (_dir, store) = store();
        for bad in ["a/b", "a:b", "a\\b", "-a"] {
            assert!(store.acquire(bad, "id1").is_err(), "{bad} should be rejected");
        }
    }
}
