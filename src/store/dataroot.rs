// ABOUTME: Resolves the per-endpoint data store under the data root.
// ABOUTME: <dataRoot>/<first 8 hex chars of sha256(resolved socket path)>, mode 0700.

use sha2::{Digest, Sha256};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use super::StoreError;

/// Data root used when running as root.
pub const ROOTFUL_DATA_ROOT: &str = "/var/lib/highk";

/// Docker-managed containerd, suggested when the configured socket is missing.
pub const DOCKER_CONTAINERD_SOCKET: &str = "/var/run/docker/containerd/containerd.sock";

const UNIX_SCHEME: &str = "unix://";

/// Default data root: system-wide for root, XDG data dir otherwise.
pub fn default_data_root() -> PathBuf {
    if nix::unistd::geteuid().is_root() {
        return PathBuf::from(ROOTFUL_DATA_ROOT);
    }
    dirs::data_dir()
        .map(|d| d.join("highk"))
        .unwrap_or_else(|| PathBuf::from(ROOTFUL_DATA_ROOT))
}

/// Strip the `unix://` scheme and resolve symlinks when the socket exists.
pub fn resolve_address(address: &str) -> PathBuf {
    let path = Path::new(address.strip_prefix(UNIX_SCHEME).unwrap_or(address));
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Compute and create the data store for `address` under `data_root`.
pub fn data_store(data_root: &Path, address: &str) -> Result<PathBuf, StoreError> {
    let socket = Path::new(address.strip_prefix(UNIX_SCHEME).unwrap_or(address));
    let alternate = Path::new(DOCKER_CONTAINERD_SOCKET);
    if socket != alternate && std::fs::metadata(socket).is_err() && alternate.exists() {
        return Err(StoreError::EndpointInaccessible {
            address: socket.display().to_string(),
            alternate: DOCKER_CONTAINERD_SOCKET.to_string(),
        });
    }

    let resolved = resolve_address(address);
    let digest = Sha256::digest(resolved.as_os_str().as_encoded_bytes());
    let hash = hex::encode(digest);

    ensure_private_dir(data_root)?;
    let store = data_root.join(&hash[..8]);
    ensure_private_dir(&store)?;
    tracing::debug!("data store for {} is {}", resolved.display(), store.display());
    Ok(store)
}

/// Create `path` (and parents) with mode 0700 and force the mode on the leaf.
pub fn ensure_private_dir(path: &Path) -> Result<(), StoreError> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
        .map_err(|e| StoreError::io(format!("failed to create {}", path.display()), e))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| StoreError::io(format!("failed to chmod {}", path.display()), e))
}

/// `<dataStore>/containers/<ns>/<id>`.
pub fn container_state_dir(data_store: &Path, namespace: &str, id: &str) -> PathBuf {
    data_store.join("containers").join(namespace).join(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_store_is_eight_hex_chars_under_root() {
        let root = tempfile::tempdir().unwrap();
        let store = data_store(root.path(), "unix:///nonexistent/containerd.sock").unwrap();

        let leaf = store.file_name().unwrap().to_str().unwrap();
        assert_eq!(leaf.len(), 8);
        assert!(leaf.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(store.parent().unwrap(), root.path());

        let mode = std::fs::metadata(&store).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[test]
    fn scheme_prefix_does_not_change_the_store() {
        let root = tempfile::tempdir().unwrap();
        let a = data_store(root.path(), "unix:///run/x/containerd.sock").unwrap();
        let b = data_store(root.path(), "/run/x/containerd.sock").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn symlinked_socket_resolves_to_target_store() {
        let root = tempfile::tempdir().unwrap();
        let sockets = tempfile::tempdir().unwrap();
        let real = sockets.path().join("real.sock");
        std::fs::write(&real, b"").unwrap();
        let link = sockets.path().join("link.sock");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let via_link = data_store(root.path(), link.to_str().unwrap()).unwrap();
        let direct = data_store(root.path(), real.to_str().unwrap()).unwrap();
        assert_eq!(via_link, direct);
    }

    #[test]
    fn state_dir_layout() {
        let dir = container_state_dir(Path::new("/d"), "default", "abc");
        assert_eq!(dir, PathBuf::from("/d/containers/default/abc"));
    }
}
