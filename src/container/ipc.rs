// ABOUTME: IPC namespace modes: private, shareable, host, or joined from another container.
// ABOUTME: Shareable containers get a tmpfs /dev/shm in their state dir, unmounted on stop.

use nix::mount::{MntFlags, MsFlags};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const SHM_DIR: &str = "shm";
const SHM_OPTIONS: &str = "mode=1777,size=64m";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IpcMode {
    #[default]
    Private,
    Shareable,
    Host,
    Container(String),
}

impl IpcMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "" | "private" => Ok(IpcMode::Private),
            "shareable" => Ok(IpcMode::Shareable),
            "host" => Ok(IpcMode::Host),
            v => match v.strip_prefix("container:") {
                Some(target) if !target.is_empty() => Ok(IpcMode::Container(target.to_string())),
                _ => Err(Error::InvalidArgument(format!("invalid ipc mode {:?}", v))),
            },
        }
    }
}

/// Shared memory directory of a shareable container.
pub fn shm_path(state_dir: &Path) -> PathBuf {
    state_dir.join(SHM_DIR)
}

/// Mount a private tmpfs for a shareable container's /dev/shm.
pub fn prepare_shm(state_dir: &Path) -> Result<PathBuf> {
    let path = shm_path(state_dir);
    std::fs::create_dir_all(&path).map_err(Error::Io)?;
    nix::mount::mount(
        Some("shm"),
        &path,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        Some(SHM_OPTIONS),
    )
    .map_err(|e| Error::SystemBroken(format!("failed to mount {}: {}", path.display(), e)))?;
    Ok(path)
}

/// Unmount and remove the shareable /dev/shm, if any.
pub fn cleanup(state_dir: &Path) -> Result<()> {
    let path = shm_path(state_dir);
    if !path.exists() {
        return Ok(());
    }
    match nix::mount::umount2(&path, MntFlags::MNT_DETACH) {
        Ok(()) | Err(nix::errno::Errno::EINVAL) => {}
        Err(e) => {
            return Err(Error::SystemBroken(format!(
                "failed to unmount {}: {}",
                path.display(),
                e
            )));
        }
    }
    std::fs::remove_dir(&path).or_else(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Ok(()),
        _ => Err(Error::Io(e)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_parse() {
        assert_eq!(IpcMode::parse("").unwrap(), IpcMode::Private);
        assert_eq!(IpcMode::parse("shareable").unwrap(), IpcMode::Shareable);
        assert_eq!(IpcMode::parse("host").unwrap(), IpcMode::Host);
        assert_eq!(
            IpcMode::parse("container:db").unwrap(),
            IpcMode::Container("db".into())
        );
        assert!(IpcMode::parse("container:").is_err());
        assert!(IpcMode::parse("bogus").is_err());
    }

    #[test]
    fn cleanup_without_shm_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        cleanup(dir.path()).unwrap();
    }
}
