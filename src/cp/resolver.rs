// ABOUTME: Resolves container paths to host paths by walking symlinks in userland against the mount map.
// ABOUTME: Symlink targets are interpreted inside the container, so results never leave the rootfs or mounts.

use oci_spec::runtime::Spec;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};

use super::CopyError;

/// Symlinks followed before giving up, as Linux does.
pub const MAX_SYMLINKS: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
struct MountEntry {
    /// Container-side destination, normalized, `/` for the rootfs.
    destination: String,
    source: PathBuf,
    readonly: bool,
}

impl MountEntry {
    fn covers(&self, container_path: &str) -> bool {
        self.destination == "/"
            || container_path == self.destination
            || container_path
                .strip_prefix(&self.destination)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// A container path mapped onto the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Fully resolved container-side path.
    pub container_path: String,
    pub host_path: PathBuf,
    pub readonly: bool,
    /// False when only the parent exists.
    pub exists: bool,
}

/// Maps container paths through the rootfs and bind mounts of one container.
#[derive(Debug, Clone)]
pub struct PathResolver {
    /// Longest destination first.
    mounts: Vec<MountEntry>,
}

fn normalize(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    format!("/{}", parts.join("/"))
}

fn join(components: &[String]) -> String {
    format!("/{}", components.join("/"))
}

fn components(path: &str) -> impl Iterator<Item = String> + '_ {
    path.split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .map(String::from)
}

impl PathResolver {
    /// `mounts` holds (container destination, host source, read-only).
    pub fn new(rootfs: &Path, rootfs_readonly: bool, mounts: Vec<(String, PathBuf, bool)>) -> Self {
        let mut entries: Vec<MountEntry> = mounts
            .into_iter()
            .map(|(destination, source, readonly)| MountEntry {
                destination: normalize(&destination),
                source,
                readonly,
            })
            .filter(|m| m.destination != "/")
            .collect();
        entries.push(MountEntry {
            destination: "/".to_string(),
            source: rootfs.to_path_buf(),
            readonly: rootfs_readonly,
        });
        entries.sort_by(|a, b| b.destination.len().cmp(&a.destination.len()));
        Self { mounts: entries }
    }

    /// Resolver for a container's spec with its root filesystem at `rootfs`.
    /// Only bind mounts have host-visible sources; others are ignored.
    pub fn from_spec(spec: &Spec, rootfs: &Path) -> Self {
        let rootfs_readonly = spec
            .root()
            .as_ref()
            .and_then(|r| r.readonly())
            .unwrap_or(false);
        let mounts = spec
            .mounts()
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| {
                let options = m.options().clone().unwrap_or_default();
                let is_bind = m.typ().as_deref() == Some("bind")
                    || options.iter().any(|o| o == "bind" || o == "rbind");
                if !is_bind {
                    return None;
                }
                let source = m.source().clone()?;
                let readonly = options.iter().any(|o| o == "ro");
                Some((m.destination().display().to_string(), source, readonly))
            })
            .collect();
        Self::new(rootfs, rootfs_readonly, mounts)
    }

    fn owner(&self, container_path: &str) -> &MountEntry {
        self.mounts
            .iter()
            .find(|m| m.covers(container_path))
            .unwrap_or_else(|| &self.mounts[self.mounts.len() - 1])
    }

    /// Host location of an already resolved container path.
    fn host_path(&self, container_path: &str) -> (PathBuf, bool) {
        let mount = self.owner(container_path);
        let sub = if mount.destination == "/" {
            container_path.trim_start_matches('/')
        } else {
            container_path[mount.destination.len()..].trim_start_matches('/')
        };
        let host = if sub.is_empty() {
            mount.source.clone()
        } else {
            mount.source.join(sub)
        };
        (host, mount.readonly)
    }

    /// Resolve `path`; a final symlink is followed only with `follow_final`.
    pub fn resolve(&self, path: &str, follow_final: bool) -> Result<ResolvedPath, CopyError> {
        let mut resolved: Vec<String> = Vec::new();
        let mut pending: VecDeque<String> = components(path).collect();
        let mut links = 0;

        while let Some(component) = pending.pop_front() {
            if component == ".." {
                resolved.pop();
                continue;
            }
            resolved.push(component);
            let current = join(&resolved);
            let (host, _) = self.host_path(&current);
            let last = pending.is_empty();

            let meta = match std::fs::symlink_metadata(&host) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound && last => {
                    let (host_path, readonly) = self.host_path(&current);
                    return Ok(ResolvedPath {
                        container_path: current,
                        host_path,
                        readonly,
                        exists: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(CopyError::DoesNotExist(current));
                }
                Err(e) if e.raw_os_error() == Some(nix::libc::ENOTDIR) => {
                    return Err(CopyError::IsNotADir(current));
                }
                Err(e) => return Err(CopyError::io(format!("failed to stat {}", host.display()), e)),
            };

            if meta.file_type().is_symlink() && (!last || follow_final) {
                links += 1;
                if links > MAX_SYMLINKS {
                    return Err(CopyError::TooManyLinks(path.to_string()));
                }
                let target = std::fs::read_link(&host)
                    .map_err(|e| CopyError::io(format!("failed to read link {}", host.display()), e))?;
                let target = target.to_string_lossy().into_owned();
                resolved.pop();
                if target.starts_with('/') {
                    resolved.clear();
                }
                for part in components(&target).collect::<Vec<_>>().into_iter().rev() {
                    pending.push_front(part);
                }
                continue;
            }

            if !last && !meta.is_dir() {
                return Err(CopyError::IsNotADir(current));
            }
        }

        let container_path = join(&resolved);
        let (host_path, readonly) = self.host_path(&container_path);
        Ok(ResolvedPath {
            container_path,
            host_path,
            readonly,
            exists: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn rootfs() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("etc")).unwrap();
        std::fs::write(root.join("etc/os-release"), "ID=test\n").unwrap();
        std::fs::create_dir_all(root.join("usr/share")).unwrap();
        symlink("/usr/share", root.join("share")).unwrap();
        symlink("../etc/os-release", root.join("usr/os-release")).unwrap();
        symlink("/../../../..", root.join("escape")).unwrap();
        symlink("loop", root.join("loop")).unwrap();
        dir
    }

    #[test]
    fn plain_path_maps_into_rootfs() {
        let root = rootfs();
        let resolver = PathResolver::new(root.path(), false, vec![]);
        let r = resolver.resolve("etc/os-release", false).unwrap();
        assert_eq!(r.container_path, "/etc/os-release");
        assert_eq!(r.host_path, root.path().join("etc/os-release"));
        assert!(r.exists);
        assert!(!r.readonly);
    }

    #[test]
    fn absolute_symlinks_re_anchor_at_container_root() {
        let root = rootfs();
        let resolver = PathResolver::new(root.path(), false, vec![]);
        let r = resolver.resolve("/share", true).unwrap();
        assert_eq!(r.container_path, "/usr/share");
        assert_eq!(r.host_path, root.path().join("usr/share"));

        let r = resolver.resolve("/usr/os-release", true).unwrap();
        assert_eq!(r.container_path, "/etc/os-release");
    }

    #[test]
    fn final_symlink_kept_without_follow() {
        let root = rootfs();
        let resolver = PathResolver::new(root.path(), false, vec![]);
        let r = resolver.resolve("/share", false).unwrap();
        assert_eq!(r.container_path, "/share");
    }

    #[test]
    fn dot_dot_cannot_climb_above_root() {
        let root = rootfs();
        let resolver = PathResolver::new(root.path(), false, vec![]);
        let r = resolver.resolve("/../../etc/../etc/os-release", false).unwrap();
        assert_eq!(r.host_path, root.path().join("etc/os-release"));

        let r = resolver.resolve("/escape", true).unwrap();
        assert_eq!(r.container_path, "/");
        assert_eq!(r.host_path, root.path());
    }

    #[test]
    fn symlink_loops_are_bounded() {
        let root = rootfs();
        let resolver = PathResolver::new(root.path(), false, vec![]);
        assert!(matches!(
            resolver.resolve("/loop", true),
            Err(CopyError::TooManyLinks(_))
        ));
    }

    #[test]
    fn missing_leaf_returns_parent_and_base() {
        let root = rootfs();
        let resolver = PathResolver::new(root.path(), false, vec![]);
        let r = resolver.resolve("/share/new.txt", true).unwrap();
        assert!(!r.exists);
        assert_eq!(r.host_path, root.path().join("usr/share/new.txt"));

        assert!(matches!(
            resolver.resolve("/missing/new.txt", true),
            Err(CopyError::DoesNotExist(_))
        ));
        assert!(matches!(
            resolver.resolve("/etc/os-release/x", true),
            Err(CopyError::IsNotADir(_))
        ));
    }

    #[test]
    fn longest_mount_wins_and_carries_read_only() {
        let root = rootfs();
        let data = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(data.path().join("inner")).unwrap();
        let resolver = PathResolver::new(
            root.path(),
            true,
            vec![("/usr/share/data".to_string(), data.path().to_path_buf(), false)],
        );
        std::fs::create_dir_all(root.path().join("usr/share/data")).unwrap();

        let r = resolver.resolve("/share/data/inner", true).unwrap();
        assert_eq!(r.host_path, data.path().join("inner"));
        assert!(!r.readonly);

        let r = resolver.resolve("/etc", true).unwrap();
        assert!(r.readonly);
    }
}
