// ABOUTME: Persistent bookkeeping kept beside the runtime service.
// ABOUTME: Data-store root, name store, hosts-file store and volume store.

mod dataroot;
mod hosts;
mod lock;
mod names;
mod volumes;

pub use dataroot::{
    DOCKER_CONTAINERD_SOCKET, ROOTFUL_DATA_ROOT, container_state_dir, data_store,
    default_data_root, ensure_private_dir, resolve_address,
};
pub use hosts::{HOSTS_SECTION_BEGIN, HOSTS_SECTION_END, HostsMeta, HostsStore};
pub use lock::{DirLock, LockInfo, SentinelLock};
pub use names::NameStore;
pub use volumes::{Volume, VolumeStore};

use crate::error::ErrorKind;
use crate::types::{ContainerNameError, IdentifierError};
use std::path::PathBuf;

/// Errors from the on-disk stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("name {name:?} is already used by container {owner}")]
    NameInUse { name: String, owner: String },

    #[error("name {name:?} is owned by container {owner}, not {id}")]
    NameNotOwned {
        name: String,
        owner: String,
        id: String,
    },

    #[error(transparent)]
    InvalidName(#[from] ContainerNameError),

    #[error(transparent)]
    InvalidIdentifier(#[from] IdentifierError),

    #[error("no such volume: {0}")]
    VolumeNotFound(String),

    #[error("volume {0:?} is in use")]
    VolumeInUse(String),

    #[error(
        "cannot access containerd socket {address:?} (hint: try running with `--address {alternate}` to connect to Docker-managed containerd)"
    )]
    EndpointInaccessible { address: String, alternate: String },

    #[error("lock {path} is held by {holder} (pid {pid})")]
    LockBusy {
        path: PathBuf,
        holder: String,
        pid: u32,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt metadata in {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NameInUse { .. } => ErrorKind::AlreadyExists,
            StoreError::NameNotOwned { .. } => ErrorKind::PreconditionFailed,
            StoreError::InvalidName(_) | StoreError::InvalidIdentifier(_) => {
                ErrorKind::InvalidArgument
            }
            StoreError::VolumeNotFound(_) => ErrorKind::NotFound,
            StoreError::VolumeInUse(_) | StoreError::LockBusy { .. } => ErrorKind::ResourceBusy,
            StoreError::EndpointInaccessible { .. } => ErrorKind::ConnectionFailed,
            StoreError::Io { .. } | StoreError::Metadata { .. } => ErrorKind::SystemBroken,
        }
    }
}
