// ABOUTME: Copies files between the host and a container filesystem with tar.
// ABOUTME: Container paths are resolved in userland so symlinks cannot escape the container.

mod archive;
mod resolver;
mod rootfs;

pub use archive::{PathInfo, TarPlan, plan_copy, tar_program};
pub use resolver::{MAX_SYMLINKS, PathResolver, ResolvedPath};

use std::path::{Path, PathBuf};

use crate::container::{ContainerManager, LookupError};
use crate::error::ErrorKind;
use crate::runtime::{Runtime, RuntimeServiceError, TaskStatus, is_rootless};
use archive::run_pipeline;
use rootfs::MountedRootfs;

#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("no such file or directory: {0}")]
    DoesNotExist(String),

    #[error("not a directory: {0}")]
    IsNotADir(String),

    #[error("too many levels of symbolic links: {0}")]
    TooManyLinks(String),

    #[error("container path {0} is on a read-only file system")]
    ReadOnly(String),

    #[error("destination directory {0} does not exist")]
    DestinationDirMissing(String),

    #[error("cannot copy a directory to a file: {0}")]
    DirectoryOverFile(String),

    #[error("{0}")]
    InvalidEndpoints(String),

    #[error("{command} failed ({status}): {stderr}")]
    Tar {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("failed to mount container filesystem on {}: {source}", target.display())]
    Mount {
        target: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Runtime(#[from] RuntimeServiceError),

    #[error(transparent)]
    Lookup(#[from] LookupError),
}

impl CopyError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CopyError::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CopyError::DoesNotExist(_) | CopyError::DestinationDirMissing(_) => {
                ErrorKind::NotFound
            }
            CopyError::IsNotADir(_)
            | CopyError::TooManyLinks(_)
            | CopyError::DirectoryOverFile(_)
            | CopyError::InvalidEndpoints(_) => ErrorKind::InvalidArgument,
            CopyError::ReadOnly(_) => ErrorKind::PreconditionFailed,
            CopyError::Tar { .. } | CopyError::Mount { .. } | CopyError::Io { .. } => {
                ErrorKind::SystemBroken
            }
            CopyError::Runtime(e) => e.kind(),
            CopyError::Lookup(e) => e.kind(),
        }
    }
}

/// One side of a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyEndpoint {
    Host(String),
    Container { reference: String, path: String },
}

impl CopyEndpoint {
    /// Parse `CONTAINER:PATH` or a local path. Paths starting with `/` or `.`
    /// and paths with a `/` before the first `:` are always local.
    pub fn parse(arg: &str) -> Self {
        if arg.starts_with('/') || arg.starts_with('.') {
            return CopyEndpoint::Host(arg.to_string());
        }
        match arg.split_once(':') {
            Some((reference, path)) if !reference.is_empty() && !reference.contains('/') => {
                CopyEndpoint::Container {
                    reference: reference.to_string(),
                    path: if path.is_empty() { "/".to_string() } else { path.to_string() },
                }
            }
            _ => CopyEndpoint::Host(arg.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub src: CopyEndpoint,
    pub dst: CopyEndpoint,
    /// Follow a symlink given as the source.
    pub follow_link: bool,
}

enum Direction {
    IntoContainer,
    FromContainer,
}

/// Copy between the host and a container according to `request`.
pub async fn copy<R: Runtime>(
    manager: &ContainerManager<'_, R>,
    request: &CopyRequest,
) -> Result<(), CopyError> {
    let (reference, container_path, host_path, direction) = match (&request.src, &request.dst) {
        (CopyEndpoint::Host(host), CopyEndpoint::Container { reference, path }) => {
            (reference, path, host, Direction::IntoContainer)
        }
        (CopyEndpoint::Container { reference, path }, CopyEndpoint::Host(host)) => {
            (reference, path, host, Direction::FromContainer)
        }
        (CopyEndpoint::Host(_), CopyEndpoint::Host(_)) => {
            return Err(CopyError::InvalidEndpoints(
                "one of src or dest must be a container path".to_string(),
            ));
        }
        _ => {
            return Err(CopyError::InvalidEndpoints(
                "copying between containers is not supported".to_string(),
            ));
        }
    };

    let runtime = manager.runtime();
    let namespace = manager.namespace();
    let record = crate::container::find_container(runtime, namespace, reference).await?;
    let running_pid = match runtime.task_state(namespace, &record.id).await {
        Ok(state) if matches!(state.status, TaskStatus::Running | TaskStatus::Paused) => {
            Some(state.pid)
        }
        Ok(_) => None,
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e.into()),
    };

    let (rootfs, _mounted) = match running_pid {
        Some(pid) => (PathBuf::from(format!("/proc/{}/root", pid)), None),
        None => {
            let mounts = runtime
                .snapshot_mounts(namespace, &record.snapshotter, &record.snapshot_key)
                .await?;
            let mounted = MountedRootfs::mount(&mounts)?;
            (mounted.path().to_path_buf(), Some(mounted))
        }
    };
    tracing::debug!(
        "copying with container {} rootfs at {}",
        record.id.short(),
        rootfs.display()
    );

    let resolver = PathResolver::from_spec(&record.spec, &rootfs);
    let container_prefix = match running_pid {
        Some(pid) if is_rootless() => nsenter_prefix(pid),
        _ => Vec::new(),
    };

    match direction {
        Direction::IntoContainer => {
            let src = host_info(host_path, request.follow_link)?;
            let resolved = resolver.resolve(container_path, true)?;
            if resolved.readonly {
                return Err(CopyError::ReadOnly(container_path.clone()));
            }
            let dst = container_info(&resolved)?;
            let plan = plan_copy(&src, host_path, &dst, container_path)?;
            run_pipeline(&plan, &[], &container_prefix).await
        }
        Direction::FromContainer => {
            let resolved = resolver.resolve(container_path, request.follow_link)?;
            if !resolved.exists {
                return Err(CopyError::DoesNotExist(container_path.clone()));
            }
            let mut src = container_info(&resolved)?;
            if request.follow_link
                && let Some(name) = base_name(container_path)
            {
                src.name = name;
            }
            let dst = host_info(host_path, true)?;
            let plan = plan_copy(&src, container_path, &dst, host_path)?;
            run_pipeline(&plan, &container_prefix, &[]).await
        }
    }
}

fn nsenter_prefix(pid: u32) -> Vec<String> {
    [
        "nsenter",
        "-t",
        &pid.to_string(),
        "-U",
        "--preserve-credentials",
        "--",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn base_name(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

fn host_info(raw: &str, follow: bool) -> Result<PathInfo, CopyError> {
    let absolute = std::path::absolute(raw)
        .map_err(|e| CopyError::io(format!("invalid path {}", raw), e))?;
    let name = base_name(raw).unwrap_or_default();
    let meta = if follow {
        std::fs::metadata(&absolute)
    } else {
        std::fs::symlink_metadata(&absolute)
    };
    match meta {
        Ok(meta) => {
            let host_path = if follow {
                std::fs::canonicalize(&absolute)
                    .map_err(|e| CopyError::io(format!("failed to resolve {}", raw), e))?
            } else {
                absolute
            };
            Ok(PathInfo {
                host_path,
                exists: true,
                is_dir: meta.is_dir(),
                name,
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PathInfo {
            host_path: absolute,
            exists: false,
            is_dir: false,
            name,
        }),
        Err(e) => Err(CopyError::io(format!("failed to stat {}", raw), e)),
    }
}

fn container_info(resolved: &ResolvedPath) -> Result<PathInfo, CopyError> {
    let name = base_name(&resolved.container_path).unwrap_or_default();
    let is_dir = if resolved.exists {
        std::fs::symlink_metadata(&resolved.host_path)
            .map_err(|e| {
                CopyError::io(format!("failed to stat {}", resolved.container_path), e)
            })?
            .is_dir()
    } else {
        false
    };
    Ok(PathInfo {
        host_path: resolved.host_path.clone(),
        exists: resolved.exists,
        is_dir,
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_endpoints_need_a_reference_before_the_colon() {
        assert_eq!(
            CopyEndpoint::parse("web:/etc/hosts"),
            CopyEndpoint::Container {
                reference: "web".into(),
                path: "/etc/hosts".into()
            }
        );
        assert_eq!(
            CopyEndpoint::parse("web:"),
            CopyEndpoint::Container {
                reference: "web".into(),
                path: "/".into()
            }
        );
        assert_eq!(
            CopyEndpoint::parse("/tmp/a:b"),
            CopyEndpoint::Host("/tmp/a:b".into())
        );
        assert_eq!(
            CopyEndpoint::parse("./a:b"),
            CopyEndpoint::Host("./a:b".into())
        );
        assert_eq!(
            CopyEndpoint::parse("dir/a:b"),
            CopyEndpoint::Host("dir/a:b".into())
        );
        assert_eq!(CopyEndpoint::parse("file"), CopyEndpoint::Host("file".into()));
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            CopyError::DestinationDirMissing("/dst/".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CopyError::ReadOnly("/etc".into()).kind(),
            ErrorKind::PreconditionFailed
        );
        assert_eq!(
            CopyError::TooManyLinks("/loop".into()).kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn host_info_reports_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let info = host_info(missing.to_str().unwrap(), true).unwrap();
        assert!(!info.exists);
        assert_eq!(info.name, "nope");

        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let info = host_info(dir.path().join("sub").to_str().unwrap(), true).unwrap();
        assert!(info.exists && info.is_dir);
    }

    #[test]
    fn rootless_copies_enter_the_user_namespace() {
        assert_eq!(
            nsenter_prefix(42),
            vec!["nsenter", "-t", "42", "-U", "--preserve-credentials", "--"]
        );
    }
}
