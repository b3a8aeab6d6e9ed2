// ABOUTME: Default containerd socket detection for rootful and rootless users.
// ABOUTME: Prefers the per-user socket under XDG_RUNTIME_DIR when not running as root.

use std::path::{Path, PathBuf};

/// System containerd socket.
pub const ROOTFUL_CONTAINERD: &str = "/run/containerd/containerd.sock";

/// Detect the containerd address to use when none is configured.
///
/// Detection order:
/// 1. `$XDG_RUNTIME_DIR/containerd/containerd.sock` for non-root users, when present
/// 2. `/run/containerd/containerd.sock`
pub fn default_address() -> String {
    if !nix::unistd::geteuid().is_root()
        && let Some(socket) = rootless_socket()
        && socket.exists()
    {
        return socket.display().to_string();
    }
    ROOTFUL_CONTAINERD.to_string()
}

fn rootless_socket() -> Option<PathBuf> {
    let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR")?;
    Some(Path::new(&runtime_dir).join("containerd/containerd.sock"))
}

/// Whether the current process runs without root privileges.
pub fn is_rootless() -> bool {
    !nix::unistd::geteuid().is_root()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rootless_socket_follows_xdg_runtime_dir() {
        temp_env::with_var("XDG_RUNTIME_DIR", Some("/run/user/1000"), || {
            assert_eq!(
                rootless_socket(),
                Some(PathBuf::from("/run/user/1000/containerd/containerd.sock"))
            );
        });
    }

    #[test]
    fn missing_xdg_runtime_dir_has_no_rootless_socket() {
        temp_env::with_var_unset("XDG_RUNTIME_DIR", || {
            assert_eq!(rootless_socket(), None);
        });
    }
}
