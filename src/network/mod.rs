// ABOUTME: Container networking: options, CNI networks, per-mode managers and the OCI hook.
// ABOUTME: Also builds the resolv.conf, hosts and hostname files a container sees.

pub mod cni;
mod files;
mod hook;
mod manager;
mod options;
mod ports;

pub use cni::{AddResult, Attachment, CniEnv, CreateNetworkOptions, NetworkConfig};
pub use files::{
    HOST_HOSTS, HOST_RESOLV_CONF, HOSTS_SEED, build_resolv, copy_host_file, resolv_contents,
    write_etc_hostname,
};
pub use hook::{HookEvent, run_oci_hook};
pub use manager::{
    NamespaceJoin, NetworkContext, NetworkOptionsManager, SpecFragments, network_manager,
    recorded_options, uses_network,
};
pub use options::{DEFAULT_NETWORK, NetworkMode, NetworkingOptions};
pub use ports::{PortMapping, parse_port_spec};

use crate::container::LookupError;
use crate::error::ErrorKind;
use crate::runtime::RuntimeServiceError;
use crate::store::StoreError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("{0}")]
    InvalidOptions(String),

    #[error("network {0:?} not found")]
    UnknownNetwork(String),

    #[error("network {0:?} already exists")]
    NetworkExists(String),

    #[error("network {name:?} is in use by {}", containers.join(", "))]
    NetworkInUse {
        name: String,
        containers: Vec<String>,
    },

    #[error("container {0} is not running")]
    ContainerNotRunning(String),

    #[error("CNI plugin {plugin:?} not found in {}", path.display())]
    PluginNotFound { plugin: String, path: PathBuf },

    #[error("CNI plugin {plugin} failed (code {code}): {message}")]
    Plugin {
        plugin: String,
        code: i64,
        message: String,
    },

    #[error("malformed network configuration {}: {source}", path.display())]
    MalformedConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Runtime(#[from] RuntimeServiceError),

    #[error(transparent)]
    Lookup(#[from] LookupError),
}

impl NetworkError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        NetworkError::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NetworkError::InvalidOptions(_) => ErrorKind::InvalidArgument,
            NetworkError::UnknownNetwork(_) => ErrorKind::NotFound,
            NetworkError::NetworkExists(_) => ErrorKind::AlreadyExists,
            NetworkError::NetworkInUse { .. } => ErrorKind::ResourceBusy,
            NetworkError::ContainerNotRunning(_) => ErrorKind::PreconditionFailed,
            NetworkError::PluginNotFound { .. } => ErrorKind::NotFound,
            NetworkError::Plugin { .. } => ErrorKind::Other,
            NetworkError::MalformedConfig { .. } | NetworkError::Io { .. } => {
                ErrorKind::SystemBroken
            }
            NetworkError::Store(e) => e.kind(),
            NetworkError::Runtime(e) => e.kind(),
            NetworkError::Lookup(e) => e.kind(),
        }
    }
}
