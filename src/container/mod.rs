// ABOUTME: Container lifecycle controller: create, start, stop, remove and friends.
// ABOUTME: Keeps local bookkeeping (names, hosts files, state dirs, volumes) in step with the runtime.

mod attach;
mod create;
pub mod filter;
mod inspect;
mod ipc;
pub mod labels;
mod lookup;
pub mod mounts;
mod ops;
mod remove;
pub mod spec;
mod start;
mod stop;

pub use attach::{AttachOutcome, DEFAULT_DETACH_KEYS, DetachMatcher, Matched, parse_detach_keys};
pub use create::CreateOptions;
pub use filter::ContainerFilter;
pub use inspect::{ContainerSummary, InspectDocument, human_duration};
pub use ipc::IpcMode;
pub use lookup::{LookupError, find_container};
pub use start::StartOptions;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::DEFAULT_STOP_TIMEOUT;
use crate::error::{Error, Result};
use crate::network::{
    CniEnv, NetworkContext, NetworkOptionsManager, NetworkingOptions, network_manager,
};
use crate::runtime::{ContainerRecord, DEFAULT_SNAPSHOTTER, Runtime, TaskState, TaskStatus};
use crate::store::{
    DirLock, HostsStore, NameStore, VolumeStore, container_state_dir, ensure_private_dir,
};
use crate::types::ContainerId;
use labels::ContainerLabels;

const OPLOCK_FILE: &str = "oplock";

/// Runs lifecycle operations for one namespace against one runtime service.
pub struct ContainerManager<'a, R: Runtime> {
    runtime: &'a R,
    namespace: String,
    data_store: PathBuf,
    cni: Option<&'a CniEnv>,
    hook_command: Vec<String>,
    snapshotter: String,
    stop_timeout: Duration,
}

impl<'a, R: Runtime> ContainerManager<'a, R> {
    pub fn new(runtime: &'a R, namespace: impl Into<String>, data_store: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            namespace: namespace.into(),
            data_store: data_store.into(),
            cni: None,
            hook_command: Vec::new(),
            snapshotter: DEFAULT_SNAPSHOTTER.to_string(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// CNI environment used for bridge and user-defined networks.
    pub fn with_cni(mut self, cni: &'a CniEnv) -> Self {
        self.cni = Some(cni);
        self
    }

    /// Program and global flags the OCI hook re-invokes.
    pub fn with_hook_command(mut self, command: Vec<String>) -> Self {
        self.hook_command = command;
        self
    }

    pub fn with_snapshotter(mut self, snapshotter: impl Into<String>) -> Self {
        self.snapshotter = snapshotter.into();
        self
    }

    /// Stop timeout for containers without their own.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn runtime(&self) -> &'a R {
        self.runtime
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn data_store(&self) -> &Path {
        &self.data_store
    }

    /// Resolve a user-supplied reference by id, name or unique id prefix.
    pub async fn find(&self, reference: &str) -> Result<ContainerRecord> {
        Ok(find_container(self.runtime, &self.namespace, reference).await?)
    }

    pub fn state_dir(&self, id: &ContainerId) -> PathBuf {
        container_state_dir(&self.data_store, &self.namespace, id.as_str())
    }

    fn names(&self) -> Result<NameStore> {
        Ok(NameStore::new(&self.data_store, &self.namespace)?)
    }

    fn hosts(&self) -> Result<HostsStore> {
        Ok(HostsStore::new(&self.data_store, &self.namespace)?)
    }

    pub fn volumes(&self) -> Result<VolumeStore> {
        Ok(VolumeStore::new(&self.data_store, &self.namespace)?)
    }

    fn network(
        &self,
        options: NetworkingOptions,
        name: Option<String>,
    ) -> Result<Box<dyn NetworkOptionsManager + '_>> {
        let ctx = NetworkContext {
            runtime: self.runtime,
            namespace: &self.namespace,
            data_store: &self.data_store,
            cni: self.cni,
            hook_command: self.hook_command.clone(),
            container_name: name,
        };
        Ok(network_manager(options, ctx)?)
    }

    /// Current task state, `None` when the container has no task.
    async fn task(&self, id: &ContainerId) -> Result<Option<TaskState>> {
        match self.runtime.task_state(&self.namespace, id).await {
            Ok(state) => Ok(Some(state)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// A container whose task is running, with the task's pid.
    async fn running_task(&self, reference: &str) -> Result<(ContainerRecord, u32)> {
        let target = self.find(reference).await?;
        match self.task(&target.id).await? {
            Some(state) if state.status == TaskStatus::Running => {
                let pid = state.pid;
                Ok((target, pid))
            }
            _ => Err(Error::PreconditionFailed(format!(
                "container {} is not running",
                target.id.short()
            ))),
        }
    }

    /// Serialize operations on one container across processes.
    async fn oplock(&self, id: &ContainerId) -> Result<DirLock> {
        let dir = self.state_dir(id);
        ensure_private_dir(&dir)?;
        let path = dir.join(OPLOCK_FILE);
        if !path.exists() {
            std::fs::File::create(&path).map_err(Error::Io)?;
        }
        Ok(DirLock::acquire_async(path).await?)
    }

    async fn save_labels(&self, id: &ContainerId, labels: &ContainerLabels) -> Result<()> {
        let encoded = labels.encode()?;
        self.runtime
            .update_labels(&self.namespace, id, &encoded)
            .await?;
        Ok(())
    }

    /// Store `result`'s error in the error label before handing it back.
    async fn recording_errors<T>(&self, id: &ContainerId, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            match self.runtime.get_container(&self.namespace, id).await {
                Ok(record) => {
                    let mut labels = ContainerLabels::decode(&record.labels);
                    labels.error = Some(e.to_string());
                    if let Err(save) = self.save_labels(id, &labels).await {
                        tracing::warn!("failed to record error on {}: {}", id.short(), save);
                    }
                }
                Err(get) if get.is_not_found() => {}
                Err(get) => tracing::warn!("failed to record error on {}: {}", id.short(), get),
            }
        }
        result
    }
}
