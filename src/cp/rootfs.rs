// ABOUTME: Temporarily mounts a stopped container's snapshot so cp can reach its files.
// ABOUTME: The mounts are detached when the guard drops.

use nix::mount::{MntFlags, MsFlags};
use std::path::Path;

use super::CopyError;
use crate::runtime::RootfsMount;

/// A snapshot mounted on a private temporary directory.
pub(super) struct MountedRootfs {
    dir: tempfile::TempDir,
    mounted: usize,
}

/// Split mount options into flags and filesystem data.
fn mount_flags(options: &[String]) -> (MsFlags, String) {
    let mut flags = MsFlags::empty();
    let mut data = Vec::new();
    for option in options {
        match option.as_str() {
            "ro" => flags |= MsFlags::MS_RDONLY,
            "rw" => {}
            "bind" => flags |= MsFlags::MS_BIND,
            "rbind" => flags |= MsFlags::MS_BIND | MsFlags::MS_REC,
            "nosuid" => flags |= MsFlags::MS_NOSUID,
            "nodev" => flags |= MsFlags::MS_NODEV,
            "noexec" => flags |= MsFlags::MS_NOEXEC,
            "noatime" => flags |= MsFlags::MS_NOATIME,
            other => data.push(other),
        }
    }
    (flags, data.join(","))
}

impl MountedRootfs {
    pub(super) fn mount(mounts: &[RootfsMount]) -> Result<Self, CopyError> {
        let dir = tempfile::Builder::new()
            .prefix("highk-cp-")
            .tempdir()
            .map_err(|e| CopyError::io("failed to create mount point", e))?;
        let mut guard = MountedRootfs { dir, mounted: 0 };
        for m in mounts {
            let (flags, data) = mount_flags(&m.options);
            let typ = (m.typ != "bind").then_some(m.typ.as_str());
            nix::mount::mount(
                Some(m.source.as_str()),
                guard.dir.path(),
                typ,
                flags,
                (!data.is_empty()).then_some(data.as_str()),
            )
            .map_err(|source| CopyError::Mount {
                target: guard.dir.path().to_path_buf(),
                source,
            })?;
            guard.mounted += 1;
        }
        Ok(guard)
    }

    pub(super) fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for MountedRootfs {
    fn drop(&mut self) {
        for _ in 0..self.mounted {
            if let Err(e) = nix::mount::umount2(self.dir.path(), MntFlags::MNT_DETACH) {
                tracing::warn!("failed to unmount {}: {}", self.dir.path().display(), e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_options_become_data() {
        let options = vec![
            "ro".to_string(),
            "index=off".to_string(),
            "lowerdir=/a:/b".to_string(),
        ];
        let (flags, data) = mount_flags(&options);
        assert_eq!(flags, MsFlags::MS_RDONLY);
        assert_eq!(data, "index=off,lowerdir=/a:/b");
    }

    #[test]
    fn bind_options_set_flags() {
        let (flags, data) = mount_flags(&["rbind".to_string(), "rw".to_string()]);
        assert!(flags.contains(MsFlags::MS_BIND | MsFlags::MS_REC));
        assert!(data.is_empty());
    }

    #[test]
    fn nothing_to_mount_is_an_empty_directory() {
        let rootfs = MountedRootfs::mount(&[]).unwrap();
        assert!(rootfs.path().is_dir());
    }
}
