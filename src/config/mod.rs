// ABOUTME: Configuration types and parsing for highk.yml.
// ABOUTME: YAML file lookup for rootful and rootless users, with CLI overrides applied on top.

mod deserialize;
mod env_value;
mod healthcheck;
mod restart_policy;
mod stop;

pub use env_value::{EnvValue, resolve_env};
pub use healthcheck::HealthcheckConfig;
pub use restart_policy::RestartPolicy;
pub use stop::{DEFAULT_STOP_SIGNAL, DEFAULT_STOP_TIMEOUT, parse_signal};

use crate::error::{Error, Result};
use crate::types::Identifier;
use deserialize::{default_namespace, deserialize_namespace};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "highk.yml";
pub const ROOTFUL_CONFIG_DIR: &str = "/etc/highk";
pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_CNI_PATH: &str = "/opt/cni/bin";
pub const DEFAULT_CNI_NETCONFPATH: &str = "/etc/cni/net.d";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// containerd socket; detected when unset.
    #[serde(default)]
    pub address: Option<String>,

    #[serde(
        default = "default_namespace",
        deserialize_with = "deserialize_namespace"
    )]
    pub namespace: Identifier,

    /// Data root; `/var/lib/highk` or the XDG data dir when unset.
    #[serde(default)]
    pub data_root: Option<PathBuf>,

    #[serde(default = "default_snapshotter")]
    pub snapshotter: String,

    #[serde(default = "default_cni_path")]
    pub cni_path: PathBuf,

    #[serde(default)]
    pub cni_netconfpath: Option<PathBuf>,

    #[serde(default)]
    pub insecure_registry: bool,

    #[serde(default)]
    pub experimental: bool,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_stop_timeout", with = "humantime_serde")]
    pub stop_timeout: Duration,

    #[serde(default)]
    pub default_restart_policy: RestartPolicy,
}

fn default_snapshotter() -> String {
    crate::runtime::DEFAULT_SNAPSHOTTER.to_string()
}

fn default_cni_path() -> PathBuf {
    PathBuf::from(DEFAULT_CNI_PATH)
}

fn default_stop_timeout() -> Duration {
    DEFAULT_STOP_TIMEOUT
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: None,
            namespace: default_namespace(),
            data_root: None,
            snapshotter: default_snapshotter(),
            cni_path: default_cni_path(),
            cni_netconfpath: None,
            insecure_registry: false,
            experimental: false,
            debug: false,
            stop_timeout: default_stop_timeout(),
            default_restart_policy: RestartPolicy::No,
        }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::ConfigNotFound(path.to_path_buf()),
            _ => Error::Io(e),
        })?;
        Self::from_yaml(&content)
    }

    /// Load `explicit` when given (it must exist), else the default location
    /// if present, else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let path = default_config_path();
        if path.exists() {
            tracing::debug!("loading configuration from {}", path.display());
            return Self::load(&path);
        }
        Ok(Config::default())
    }

    /// CNI configuration directory, honoring rootless defaults.
    pub fn cni_netconfpath(&self) -> PathBuf {
        if let Some(ref path) = self.cni_netconfpath {
            return path.clone();
        }
        if crate::runtime::is_rootless()
            && let Some(config) = dirs::config_dir()
        {
            return config.join("cni/net.d");
        }
        PathBuf::from(DEFAULT_CNI_NETCONFPATH)
    }
}

/// `$XDG_CONFIG_HOME/highk/highk.yml` for rootless users, `/etc/highk/highk.yml` for root.
pub fn default_config_path() -> PathBuf {
    if crate::runtime::is_rootless()
        && let Some(config) = dirs::config_dir()
    {
        return config.join("highk").join(CONFIG_FILENAME);
    }
    Path::new(ROOTFUL_CONFIG_DIR).join(CONFIG_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_means_defaults() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config.namespace.as_str(), "default");
        assert_eq!(config.stop_timeout, Duration::from_secs(10));
        assert_eq!(config.snapshotter, "overlayfs");
    }

    #[test]
    fn fields_are_parsed() {
        let config = Config::from_yaml(
            r#"
address: /run/k3s/containerd/containerd.sock
namespace: k8s-io
stop_timeout: 30s
insecure_registry: true
default_restart_policy: unless-stopped
"#,
        )
        .unwrap();
        assert_eq!(
            config.address.as_deref(),
            Some("/run/k3s/containerd/containerd.sock")
        );
        assert_eq!(config.namespace.as_str(), "k8s-io");
        assert_eq!(config.stop_timeout, Duration::from_secs(30));
        assert!(config.insecure_registry);
        assert_eq!(config.default_restart_policy, RestartPolicy::UnlessStopped);
    }

    #[test]
    fn invalid_namespace_is_rejected() {
        assert!(Config::from_yaml("namespace: Bad/NS").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::discover(Some(&dir.path().join("nope.yml"))).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound(_)));
    }
}
