// ABOUTME: Network options managers for none, host, container-shared and CNI networking.
// ABOUTME: Each verifies options, prepares per-container files and produces OCI spec fragments.

use async_trait::async_trait;
use oci_spec::runtime::{Hook, Hooks, Mount};
use std::path::{Path, PathBuf};

use super::cni::CniEnv;
use super::files::{
    HOST_HOSTS, HOST_RESOLV_CONF, HOSTS_SEED, build_resolv, copy_host_file, write_etc_hostname,
};
use super::options::{NetworkMode, NetworkingOptions};
use super::NetworkError;
use crate::container::find_container;
use crate::container::labels::{ContainerLabels, keys};
use crate::container::spec::bind_mount;
use crate::runtime::{ContainerRecord, Runtime, TaskStatus};
use crate::store::{HostsMeta, HostsStore, container_state_dir};
use crate::types::ContainerId;

const RESOLV_FILE: &str = "resolv.conf";
const HOSTNAME_FILE: &str = "hostname";
const HOSTS_FILE: &str = "hosts";

/// How the container joins a network namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NamespaceJoin {
    /// A fresh namespace.
    #[default]
    New,
    /// The host namespace (no namespace entry in the OCI spec).
    Host,
    /// An existing namespace at this path.
    Path(PathBuf),
}

/// OCI spec pieces contributed by networking.
#[derive(Debug, Clone, Default)]
pub struct SpecFragments {
    pub mounts: Vec<Mount>,
    pub hostname: String,
    pub domainname: String,
    pub network_namespace: NamespaceJoin,
    pub uts_host: bool,
    pub hooks: Option<Hooks>,
    pub resolv_conf_path: Option<PathBuf>,
    pub hostname_path: Option<PathBuf>,
    pub hosts_path: Option<PathBuf>,
}

/// What a manager needs from its surroundings.
pub struct NetworkContext<'a> {
    pub runtime: &'a dyn Runtime,
    pub namespace: &'a str,
    pub data_store: &'a Path,
    pub cni: Option<&'a CniEnv>,
    /// Program and global arguments for `internal oci-hook <event>`.
    pub hook_command: Vec<String>,
    pub container_name: Option<String>,
}

impl NetworkContext<'_> {
    fn state_dir(&self, id: &ContainerId) -> PathBuf {
        container_state_dir(self.data_store, self.namespace, id.as_str())
    }

    fn hosts(&self) -> Result<HostsStore, NetworkError> {
        Ok(HostsStore::new(self.data_store, self.namespace)?)
    }
}

#[async_trait]
pub trait NetworkOptionsManager: Send + Sync {
    fn options(&self) -> &NetworkingOptions;

    /// Reject option combinations this networking mode cannot honor.
    async fn verify_network_options(&self) -> Result<(), NetworkError>;

    /// Work done on the host before the task starts.
    async fn setup_networking(&self, id: &ContainerId) -> Result<(), NetworkError>;

    /// Undo `setup_networking` once the container is gone.
    async fn cleanup_networking(&self, container: &ContainerRecord) -> Result<(), NetworkError>;

    /// Networking options to record with the container.
    async fn internal_labels(&self) -> Result<NetworkingOptions, NetworkError>;

    /// Files, mounts and namespace settings for the OCI spec.
    async fn container_networking_fragments(
        &self,
        id: &ContainerId,
    ) -> Result<SpecFragments, NetworkError>;
}

/// Select the manager for `options` by its first network.
pub fn network_manager<'a>(
    options: NetworkingOptions,
    ctx: NetworkContext<'a>,
) -> Result<Box<dyn NetworkOptionsManager + 'a>, NetworkError> {
    Ok(match options.mode()? {
        NetworkMode::None => Box::new(NoneManager { options, ctx }),
        NetworkMode::Host { netns } => Box::new(HostManager {
            options,
            ctx,
            netns,
        }),
        NetworkMode::Container(target) => Box::new(ContainerSharedManager {
            options,
            ctx,
            target,
        }),
        NetworkMode::Cni(networks) => Box::new(CniManager {
            options,
            ctx,
            networks,
        }),
    })
}

fn default_hostname(options: &NetworkingOptions, id: &ContainerId) -> String {
    if options.hostname.is_empty() {
        id.short().to_string()
    } else {
        options.hostname.clone()
    }
}

fn host_hostname() -> Result<String, NetworkError> {
    gethostname::gethostname()
        .into_string()
        .map_err(|_| NetworkError::InvalidOptions("host name is not valid UTF-8".to_string()))
}

fn hosts_meta(
    options: &NetworkingOptions,
    ctx: &NetworkContext<'_>,
    id: &ContainerId,
    hostname: String,
) -> Result<HostsMeta, NetworkError> {
    Ok(HostsMeta {
        id: id.to_string(),
        hostname,
        name: ctx.container_name.clone(),
        networks: Default::default(),
        extra_hosts: options.extra_hosts()?.into_iter().collect(),
    })
}

/// resolv.conf, hosts and hostname private to the container, as CNI and none use.
fn private_files(
    options: &NetworkingOptions,
    ctx: &NetworkContext<'_>,
    id: &ContainerId,
) -> Result<SpecFragments, NetworkError> {
    let state_dir = ctx.state_dir(id);

    let resolv = state_dir.join(RESOLV_FILE);
    build_resolv(
        &resolv,
        &options.dns_servers,
        &options.dns_search,
        &options.dns_options,
    )?;

    let hosts = ctx.hosts()?.alloc_hosts_file(id.as_str(), HOSTS_SEED.as_bytes())?;

    let (hostname, uts_host) = if options.uts_is_host() {
        (host_hostname()?, true)
    } else {
        (default_hostname(options, id), false)
    };
    let hostname_path = state_dir.join(HOSTNAME_FILE);
    write_etc_hostname(&hostname_path, &hostname)?;

    Ok(SpecFragments {
        mounts: vec![
            bind_mount(&resolv, "/etc/resolv.conf", false),
            bind_mount(&hosts, "/etc/hosts", false),
            bind_mount(&hostname_path, "/etc/hostname", false),
        ],
        hostname,
        domainname: options.domainname.clone(),
        network_namespace: NamespaceJoin::New,
        uts_host,
        hooks: None,
        resolv_conf_path: Some(resolv),
        hostname_path: Some(hostname_path),
        hosts_path: Some(hosts),
    })
}

fn reject(condition: bool, what: &str, mode: &str) -> Result<(), NetworkError> {
    if condition {
        return Err(NetworkError::InvalidOptions(format!(
            "conflicting options: {} cannot be used with {} networking",
            what, mode
        )));
    }
    Ok(())
}

struct NoneManager<'a> {
    options: NetworkingOptions,
    ctx: NetworkContext<'a>,
}

#[async_trait]
impl NetworkOptionsManager for NoneManager<'_> {
    fn options(&self) -> &NetworkingOptions {
        &self.options
    }

    async fn verify_network_options(&self) -> Result<(), NetworkError> {
        self.options.verify_uts()?;
        self.options.extra_hosts()?;
        Ok(())
    }

    async fn setup_networking(&self, id: &ContainerId) -> Result<(), NetworkError> {
        let meta = hosts_meta(
            &self.options,
            &self.ctx,
            id,
            default_hostname(&self.options, id),
        )?;
        Ok(self.ctx.hosts()?.acquire(&meta)?)
    }

    async fn cleanup_networking(&self, container: &ContainerRecord) -> Result<(), NetworkError> {
        Ok(self.ctx.hosts()?.release(container.id.as_str())?)
    }

    async fn internal_labels(&self) -> Result<NetworkingOptions, NetworkError> {
        Ok(self.options.clone())
    }

    async fn container_networking_fragments(
        &self,
        id: &ContainerId,
    ) -> Result<SpecFragments, NetworkError> {
        private_files(&self.options, &self.ctx, id)
    }
}

struct HostManager<'a> {
    options: NetworkingOptions,
    ctx: NetworkContext<'a>,
    netns: Option<PathBuf>,
}

#[async_trait]
impl NetworkOptionsManager for HostManager<'_> {
    fn options(&self) -> &NetworkingOptions {
        &self.options
    }

    async fn verify_network_options(&self) -> Result<(), NetworkError> {
        reject(cfg!(windows), "the host network", "Windows")?;
        reject(self.options.mac_address.is_some(), "--mac-address", "host")?;
        self.options.verify_uts()?;
        self.options.extra_hosts()?;
        if !self.options.port_mappings.is_empty() {
            tracing::warn!("published ports are discarded when using host network mode");
        }
        Ok(())
    }

    async fn setup_networking(&self, id: &ContainerId) -> Result<(), NetworkError> {
        let hostname = if self.options.hostname.is_empty() {
            host_hostname()?
        } else {
            self.options.hostname.clone()
        };
        let meta = hosts_meta(&self.options, &self.ctx, id, hostname)?;
        Ok(self.ctx.hosts()?.acquire(&meta)?)
    }

    async fn cleanup_networking(&self, container: &ContainerRecord) -> Result<(), NetworkError> {
        Ok(self.ctx.hosts()?.release(container.id.as_str())?)
    }

    async fn internal_labels(&self) -> Result<NetworkingOptions, NetworkError> {
        let mut options = self.options.clone();
        options.port_mappings.clear();
        Ok(options)
    }

    async fn container_networking_fragments(
        &self,
        id: &ContainerId,
    ) -> Result<SpecFragments, NetworkError> {
        let state_dir = self.ctx.state_dir(id);

        let resolv = state_dir.join(RESOLV_FILE);
        copy_host_file(Path::new(HOST_RESOLV_CONF), &resolv)?;
        let hosts = state_dir.join(HOSTS_FILE);
        copy_host_file(Path::new(HOST_HOSTS), &hosts)?;

        let hostname = if self.options.hostname.is_empty() {
            host_hostname()?
        } else {
            self.options.hostname.clone()
        };
        let hostname_path = state_dir.join(HOSTNAME_FILE);
        write_etc_hostname(&hostname_path, &hostname)?;

        let network_namespace = match self.netns {
            Some(ref path) => NamespaceJoin::Path(path.clone()),
            None => NamespaceJoin::Host,
        };

        Ok(SpecFragments {
            mounts: vec![
                bind_mount(&resolv, "/etc/resolv.conf", false),
                bind_mount(&hosts, "/etc/hosts", false),
                bind_mount(&hostname_path, "/etc/hostname", false),
            ],
            hostname,
            domainname: self.options.domainname.clone(),
            network_namespace,
            uts_host: self.options.uts_is_host(),
            hooks: None,
            resolv_conf_path: Some(resolv),
            hostname_path: Some(hostname_path),
            hosts_path: Some(hosts),
        })
    }
}

struct ContainerSharedManager<'a> {
    options: NetworkingOptions,
    ctx: NetworkContext<'a>,
    target: String,
}

impl ContainerSharedManager<'_> {
    async fn target(&self) -> Result<ContainerRecord, NetworkError> {
        Ok(find_container(self.ctx.runtime, self.ctx.namespace, &self.target).await?)
    }
}

#[async_trait]
impl NetworkOptionsManager for ContainerSharedManager<'_> {
    fn options(&self) -> &NetworkingOptions {
        &self.options
    }

    async fn verify_network_options(&self) -> Result<(), NetworkError> {
        let o = &self.options;
        let mode = "container";
        reject(!o.hostname.is_empty(), "--hostname", mode)?;
        reject(!o.domainname.is_empty(), "--domainname", mode)?;
        reject(!o.port_mappings.is_empty(), "--publish", mode)?;
        reject(!o.dns_servers.is_empty(), "--dns", mode)?;
        reject(!o.dns_search.is_empty(), "--dns-search", mode)?;
        reject(!o.dns_options.is_empty(), "--dns-option", mode)?;
        reject(!o.add_hosts.is_empty(), "--add-host", mode)?;
        reject(o.mac_address.is_some(), "--mac-address", mode)?;
        o.verify_uts()
    }

    async fn setup_networking(&self, _id: &ContainerId) -> Result<(), NetworkError> {
        Ok(())
    }

    async fn cleanup_networking(&self, _container: &ContainerRecord) -> Result<(), NetworkError> {
        Ok(())
    }

    async fn internal_labels(&self) -> Result<NetworkingOptions, NetworkError> {
        let target = self.target().await?;
        let mut options = self.options.clone();
        options.networks = vec![format!("container:{}", target.id)];
        Ok(options)
    }

    async fn container_networking_fragments(
        &self,
        _id: &ContainerId,
    ) -> Result<SpecFragments, NetworkError> {
        let target = self.target().await?;
        let task = self
            .ctx
            .runtime
            .task_state(self.ctx.namespace, &target.id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    NetworkError::ContainerNotRunning(target.id.to_string())
                } else {
                    e.into()
                }
            })?;
        if task.status != TaskStatus::Running {
            return Err(NetworkError::ContainerNotRunning(target.id.to_string()));
        }

        let target_labels = ContainerLabels::decode(&target.labels);
        let target_state = self.ctx.state_dir(&target.id);
        let resolv = target_state.join(RESOLV_FILE);
        let hostname_path = target_state.join(HOSTNAME_FILE);
        let managed_hosts = self.ctx.hosts()?.hosts_path(target.id.as_str());
        let hosts = if managed_hosts.exists() {
            managed_hosts
        } else {
            target_state.join(HOSTS_FILE)
        };

        let mut mounts = Vec::new();
        for (source, destination) in [
            (&resolv, "/etc/resolv.conf"),
            (&hosts, "/etc/hosts"),
            (&hostname_path, "/etc/hostname"),
        ] {
            if source.exists() {
                mounts.push(bind_mount(source, destination, false));
            }
        }

        Ok(SpecFragments {
            mounts,
            hostname: target_labels.hostname,
            domainname: target_labels.domainname,
            network_namespace: NamespaceJoin::Path(PathBuf::from(format!(
                "/proc/{}/ns/net",
                task.pid
            ))),
            uts_host: false,
            hooks: None,
            resolv_conf_path: Some(resolv),
            hostname_path: Some(hostname_path),
            hosts_path: Some(hosts),
        })
    }
}

struct CniManager<'a> {
    options: NetworkingOptions,
    ctx: NetworkContext<'a>,
    networks: Vec<String>,
}

impl CniManager<'_> {
    fn hook(&self, event: &str) -> Option<Hook> {
        let (program, _) = self.ctx.hook_command.split_first()?;
        let mut args = self.ctx.hook_command.clone();
        args.extend(["internal", "oci-hook", event].map(String::from));
        let mut hook = Hook::default();
        hook.set_path(PathBuf::from(program));
        hook.set_args(Some(args));
        Some(hook)
    }
}

#[async_trait]
impl NetworkOptionsManager for CniManager<'_> {
    fn options(&self) -> &NetworkingOptions {
        &self.options
    }

    async fn verify_network_options(&self) -> Result<(), NetworkError> {
        let cni = self.ctx.cni.ok_or_else(|| {
            NetworkError::InvalidOptions("no CNI environment configured".to_string())
        })?;
        for name in &self.networks {
            let network = cni
                .get(name)
                .ok_or_else(|| NetworkError::UnknownNetwork(name.clone()))?;
            if self.options.mac_address.is_some()
                && !matches!(network.main_plugin().as_deref(), Some("bridge" | "macvlan"))
            {
                return Err(NetworkError::InvalidOptions(format!(
                    "--mac-address is only supported on bridge and macvlan networks, not {}",
                    name
                )));
            }
        }
        if self.networks.len() > 1
            && (self.options.ipv4.is_some() || self.options.ipv6.is_some())
        {
            return Err(NetworkError::InvalidOptions(
                "--ip and --ip6 need exactly one network".to_string(),
            ));
        }
        self.options.verify_uts()?;
        self.options.extra_hosts()?;
        Ok(())
    }

    async fn setup_networking(&self, _id: &ContainerId) -> Result<(), NetworkError> {
        // Interfaces are configured by the createRuntime hook
        Ok(())
    }

    async fn cleanup_networking(&self, _container: &ContainerRecord) -> Result<(), NetworkError> {
        Ok(())
    }

    async fn internal_labels(&self) -> Result<NetworkingOptions, NetworkError> {
        let mut options = self.options.clone();
        options.networks = self.networks.clone();
        Ok(options)
    }

    async fn container_networking_fragments(
        &self,
        id: &ContainerId,
    ) -> Result<SpecFragments, NetworkError> {
        let mut fragments = private_files(&self.options, &self.ctx, id)?;

        let mut hooks = Hooks::default();
        hooks.set_create_runtime(self.hook("createRuntime").map(|h| vec![h]));
        hooks.set_poststop(self.hook("postStop").map(|h| vec![h]));
        fragments.hooks = Some(hooks);
        Ok(fragments)
    }
}

/// Labels on `record` that name the networking options it was created with.
pub fn recorded_options(record: &ContainerRecord) -> NetworkingOptions {
    ContainerLabels::decode(&record.labels).networking
}

/// Whether `record` is attached to the CNI network `network`.
pub fn uses_network(record: &ContainerRecord, network: &str) -> bool {
    record.labels.contains_key(keys::NETWORKING)
        && recorded_options(record)
            .effective_networks()
            .iter()
            .any(|n| n == network)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MemoryRuntime;
    use crate::store::ensure_private_dir;

    fn context<'a>(rt: &'a MemoryRuntime, data_store: &'a Path, cni: &'a CniEnv) -> NetworkContext<'a> {
        NetworkContext {
            runtime: rt,
            namespace: "default",
            data_store,
            cni: Some(cni),
            hook_command: vec!["/usr/bin/highk".to_string(), "--data-root".to_string(), "/x".to_string()],
            container_name: Some("web".to_string()),
        }
    }

    fn options(networks: &[&str]) -> NetworkingOptions {
        NetworkingOptions {
            networks: networks.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn cni_rejects_unknown_networks_and_mac_on_other_drivers() {
        let dir = tempfile::tempdir().unwrap();
        let netconf = dir.path().join("net.d");
        std::fs::create_dir(&netconf).unwrap();
        std::fs::write(
            netconf.join("ipv.conflist"),
            r#"{"cniVersion":"1.0.0","name":"ipv","plugins":[{"type":"ipvlan"}]}"#,
        )
        .unwrap();
        let cni = CniEnv::load(Path::new("/opt/cni/bin"), &netconf).unwrap();
        let rt = MemoryRuntime::new();

        let manager = network_manager(options(&["nope"]), context(&rt, dir.path(), &cni)).unwrap();
        assert!(matches!(
            manager.verify_network_options().await,
            Err(NetworkError::UnknownNetwork(_))
        ));

        let mut o = options(&["ipv"]);
        o.mac_address = Some("02:00:00:00:00:01".to_string());
        let manager = network_manager(o.clone(), context(&rt, dir.path(), &cni)).unwrap();
        assert!(manager.verify_network_options().await.is_err());

        o.networks = vec!["bridge".to_string()];
        let manager = network_manager(o, context(&rt, dir.path(), &cni)).unwrap();
        assert!(manager.verify_network_options().await.is_ok());
    }

    #[tokio::test]
    async fn host_rejects_mac_address() {
        let dir = tempfile::tempdir().unwrap();
        let cni = CniEnv::load(Path::new("/opt/cni/bin"), dir.path()).unwrap();
        let rt = MemoryRuntime::new();
        let mut o = options(&["host"]);
        o.mac_address = Some("02:00:00:00:00:01".to_string());
        let manager = network_manager(o, context(&rt, dir.path(), &cni)).unwrap();
        assert!(manager.verify_network_options().await.is_err());
    }

    #[tokio::test]
    async fn container_sharing_rejects_own_dns_and_ports() {
        let dir = tempfile::tempdir().unwrap();
        let cni = CniEnv::load(Path::new("/opt/cni/bin"), dir.path()).unwrap();
        let rt = MemoryRuntime::new();
        let mut o = options(&["container:web"]);
        o.dns_servers = vec!["1.1.1.1".to_string()];
        let manager = network_manager(o, context(&rt, dir.path(), &cni)).unwrap();
        assert!(manager.verify_network_options().await.is_err());
    }

    #[tokio::test]
    async fn cni_fragments_write_files_and_install_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let cni = CniEnv::load(Path::new("/opt/cni/bin"), &dir.path().join("net.d")).unwrap();
        let rt = MemoryRuntime::new();
        let id = ContainerId::generate();
        let state_dir = container_state_dir(dir.path(), "default", id.as_str());
        std::fs::create_dir_all(state_dir.parent().unwrap()).unwrap();
        ensure_private_dir(&state_dir).unwrap();

        let manager = network_manager(options(&[]), context(&rt, dir.path(), &cni)).unwrap();
        let fragments = manager.container_networking_fragments(&id).await.unwrap();

        assert_eq!(fragments.hostname, id.short());
        assert_eq!(
            std::fs::read_to_string(state_dir.join("hostname")).unwrap(),
            format!("{}\n", id.short())
        );
        assert!(state_dir.join("resolv.conf").is_file());
        assert!(fragments.hosts_path.as_ref().unwrap().is_file());
        assert_eq!(fragments.mounts.len(), 3);

        let hooks = fragments.hooks.unwrap();
        let create = &hooks.create_runtime().as_ref().unwrap()[0];
        assert_eq!(create.path(), Path::new("/usr/bin/highk"));
        assert_eq!(
            create.args().as_ref().unwrap().last().map(String::as_str),
            Some("createRuntime")
        );
        assert!(hooks.poststop().is_some());
    }

    #[tokio::test]
    async fn none_setup_records_hosts_identity() {
        let dir = tempfile::tempdir().unwrap();
        let cni = CniEnv::load(Path::new("/opt/cni/bin"), dir.path()).unwrap();
        let rt = MemoryRuntime::new();
        let id = ContainerId::generate();
        let mut o = options(&["none"]);
        o.add_hosts = vec!["db:10.0.0.9".to_string()];

        let manager = network_manager(o, context(&rt, dir.path(), &cni)).unwrap();
        manager.setup_networking(&id).await.unwrap();

        let hosts = HostsStore::new(dir.path(), "default").unwrap();
        let meta = hosts.meta(id.as_str()).unwrap().unwrap();
        assert_eq!(meta.name.as_deref(), Some("web"));
        assert_eq!(meta.extra_hosts.get("db").map(String::as_str), Some("10.0.0.9"));
    }
}
