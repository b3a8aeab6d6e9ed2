// ABOUTME: Shared command context: configuration with CLI overrides applied, plus connection helpers.
// ABOUTME: Resolves the containerd address, data store, CNI environment and OCI hook command.

use crate::cli::GlobalArgs;
use highk::config::Config;
use highk::container::ContainerManager;
use highk::error::Result;
use highk::network::CniEnv;
use highk::runtime::{self, ContainerdRuntime, Runtime};
use highk::store::{data_store, default_data_root};
use highk::types::Identifier;
use std::path::PathBuf;

/// Effective settings for one invocation.
pub struct Context {
    pub config: Config,
    pub address: String,
    pub data_root: PathBuf,
}

impl Context {
    /// Load the configuration file and apply global flags on top.
    pub fn load(global: &GlobalArgs) -> Result<Self> {
        let mut config = Config::discover(global.config.as_deref())?;
        if let Some(ref namespace) = global.namespace {
            config.namespace = Identifier::new(namespace)?;
        }
        if let Some(ref snapshotter) = global.snapshotter {
            config.snapshotter = snapshotter.clone();
        }
        if let Some(ref path) = global.cni_path {
            config.cni_path = path.clone();
        }
        if global.cni_netconfpath.is_some() {
            config.cni_netconfpath = global.cni_netconfpath.clone();
        }
        config.insecure_registry |= global.insecure_registry;
        config.experimental |= global.experimental;
        config.debug |= global.debug;

        let address = global
            .address
            .clone()
            .or_else(|| config.address.clone())
            .unwrap_or_else(runtime::default_address);
        let data_root = global
            .data_root
            .clone()
            .or_else(|| config.data_root.clone())
            .unwrap_or_else(default_data_root);

        Ok(Self {
            config,
            address,
            data_root,
        })
    }

    pub fn namespace(&self) -> &str {
        self.config.namespace.as_str()
    }

    /// Per-endpoint data store, created on first use.
    pub fn data_store(&self) -> Result<PathBuf> {
        Ok(data_store(&self.data_root, &self.address)?)
    }

    pub async fn connect(&self) -> Result<ContainerdRuntime> {
        tracing::debug!("connecting to containerd at {}", self.address);
        Ok(runtime::connect(&self.address).await?)
    }

    pub fn cni(&self) -> Result<CniEnv> {
        Ok(CniEnv::load(
            &self.config.cni_path,
            &self.config.cni_netconfpath(),
        )?)
    }

    /// This binary plus the global flags the OCI hook needs to find the same state.
    pub fn hook_command(&self) -> Result<Vec<String>> {
        let exe = std::env::current_exe()?;
        Ok(vec![
            exe.display().to_string(),
            "--address".to_string(),
            self.address.clone(),
            "--data-root".to_string(),
            self.data_root.display().to_string(),
            "--cni-path".to_string(),
            self.config.cni_path.display().to_string(),
            "--cni-netconfpath".to_string(),
            self.config.cni_netconfpath().display().to_string(),
        ])
    }

    /// Container manager for the configured namespace.
    pub fn manager<'a, R: Runtime>(
        &self,
        runtime: &'a R,
        cni: &'a CniEnv,
    ) -> Result<ContainerManager<'a, R>> {
        Ok(ContainerManager::new(runtime, self.namespace(), self.data_store()?)
            .with_cni(cni)
            .with_hook_command(self.hook_command()?)
            .with_snapshotter(self.config.snapshotter.clone())
            .with_stop_timeout(self.config.stop_timeout))
    }
}
