// ABOUTME: In-process runtime backend holding containers, tasks, images and snapshots in memory.
// ABOUTME: Used by tests; simulates task signals, pause/resume and exit notification.

use async_trait::async_trait;
use oci_spec::runtime::Spec;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::watch;

use super::error::RuntimeServiceError;
use super::traits::sealed::Sealed;
use super::traits::{
    ContainerOps, ContainerRecord, ExitStatus, ImageInfo, ImageOps, NamespaceInfo, NamespaceOps,
    RootfsMount, SnapshotOps, TaskIo, TaskOps, TaskState, TaskStatus,
};
use crate::types::{ContainerId, ImageRef};

const SIGKILL: i32 = 9;
const SIGTERM: i32 = 15;
const FIRST_PID: u32 = 40000;

/// How a simulated task reacts to signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskBehavior {
    /// SIGTERM exits 0, SIGKILL exits 137, other signals exit 128 + signo.
    #[default]
    Graceful,
    /// Only SIGKILL terminates the task; other signals are recorded.
    IgnoreTerm,
}

struct MemTask {
    pid: u32,
    status: TaskStatus,
    exit: Option<ExitStatus>,
    exit_tx: watch::Sender<Option<ExitStatus>>,
    io: TaskIo,
    held_signals: Vec<i32>,
    received: Vec<i32>,
    console: Option<(u16, u16)>,
}

impl MemTask {
    fn finish(&mut self, code: u32) {
        let exit = ExitStatus::new(code);
        self.status = TaskStatus::Stopped;
        self.exit = Some(exit);
        self.exit_tx.send_replace(Some(exit));
    }

    fn deliver(&mut self, signal: i32, behavior: TaskBehavior) {
        self.received.push(signal);
        let code = match (behavior, signal) {
            (_, SIGKILL) => Some(128 + SIGKILL as u32),
            (TaskBehavior::Graceful, SIGTERM) => Some(0),
            (TaskBehavior::Graceful, 0) => None,
            (TaskBehavior::Graceful, signo) => u32::try_from(signo).ok().map(|s| 128 + s),
            (TaskBehavior::IgnoreTerm, _) => None,
        };
        if let Some(code) = code {
            self.finish(code);
        }
    }
}

#[derive(Default)]
struct NamespaceState {
    labels: HashMap<String, String>,
    containers: BTreeMap<String, ContainerRecord>,
    tasks: HashMap<String, MemTask>,
    images: HashMap<String, ImageInfo>,
    snapshots: HashMap<(String, String), Vec<RootfsMount>>,
}

#[derive(Default)]
struct State {
    namespaces: BTreeMap<String, NamespaceState>,
    registry: HashMap<String, ImageInfo>,
    behaviors: HashMap<String, TaskBehavior>,
    next_pid: u32,
}

impl State {
    fn namespace(&mut self, name: &str) -> &mut NamespaceState {
        self.namespaces.entry(name.to_string()).or_default()
    }
}

/// Runtime backend that keeps everything in process memory.
#[derive(Clone, Default)]
pub struct MemoryRuntime {
    state: Arc<Mutex<State>>,
}

impl Sealed for MemoryRuntime {}

impl std::fmt::Debug for MemoryRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRuntime").finish_non_exhaustive()
    }
}

fn not_found(what: &str, id: impl std::fmt::Display) -> RuntimeServiceError {
    RuntimeServiceError::NotFound(format!("{} {}", what, id))
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `image` available to `pull_image` under its name.
    pub fn publish_image(&self, image: ImageInfo) {
        self.state.lock().registry.insert(image.name.clone(), image);
    }

    /// Store `image` locally in `namespace`, as if already pulled.
    pub fn add_image(&self, namespace: &str, image: ImageInfo) {
        self.state
            .lock()
            .namespace(namespace)
            .images
            .insert(image.name.clone(), image);
    }

    /// Choose how the task of container `id` reacts to signals.
    pub fn set_task_behavior(&self, id: &ContainerId, behavior: TaskBehavior) {
        self.state
            .lock()
            .behaviors
            .insert(id.to_string(), behavior);
    }

    /// Simulate the task's process exiting on its own.
    pub fn exit_task(
        &self,
        namespace: &str,
        id: &ContainerId,
        code: u32,
    ) -> Result<(), RuntimeServiceError> {
        let mut state = self.state.lock();
        let task = state
            .namespace(namespace)
            .tasks
            .get_mut(id.as_str())
            .ok_or_else(|| not_found("task", id))?;
        task.finish(code);
        Ok(())
    }

    /// Signals delivered to the task so far.
    pub fn received_signals(&self, namespace: &str, id: &ContainerId) -> Vec<i32> {
        let mut state = self.state.lock();
        state
            .namespace(namespace)
            .tasks
            .get(id.as_str())
            .map(|t| t.received.clone())
            .unwrap_or_default()
    }

    /// Stdio wiring the task was created with.
    pub fn task_io(&self, namespace: &str, id: &ContainerId) -> Option<TaskIo> {
        let mut state = self.state.lock();
        state
            .namespace(namespace)
            .tasks
            .get(id.as_str())
            .map(|t| t.io.clone())
    }

    /// Last console size set through `resize_pty`.
    pub fn console_size(&self, namespace: &str, id: &ContainerId) -> Option<(u16, u16)> {
        let mut state = self.state.lock();
        state
            .namespace(namespace)
            .tasks
            .get(id.as_str())
            .and_then(|t| t.console)
    }

    /// Whether snapshot `key` exists.
    pub fn has_snapshot(&self, namespace: &str, snapshotter: &str, key: &str) -> bool {
        let mut state = self.state.lock();
        state
            .namespace(namespace)
            .snapshots
            .contains_key(&(snapshotter.to_string(), key.to_string()))
    }
}

#[async_trait]
impl ContainerOps for MemoryRuntime {
    async fn create_container(
        &self,
        namespace: &str,
        record: &ContainerRecord,
    ) -> Result<(), RuntimeServiceError> {
        let mut state = self.state.lock();
        let ns = state.namespace(namespace);
        if ns.containers.contains_key(record.id.as_str()) {
            return Err(RuntimeServiceError::AlreadyExists(format!(
                "container {}",
                record.id
            )));
        }
        ns.containers.insert(record.id.to_string(), record.clone());
        Ok(())
    }

    async fn get_container(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<ContainerRecord, RuntimeServiceError> {
        let mut state = self.state.lock();
        state
            .namespace(namespace)
            .containers
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| not_found("container", id))
    }

    async fn list_containers(
        &self,
        namespace: &str,
    ) -> Result<Vec<ContainerRecord>, RuntimeServiceError> {
        let mut state = self.state.lock();
        Ok(state
            .namespace(namespace)
            .containers
            .values()
            .cloned()
            .collect())
    }

    async fn update_labels(
        &self,
        namespace: &str,
        id: &ContainerId,
        labels: &HashMap<String, String>,
    ) -> Result<(), RuntimeServiceError> {
        let mut state = self.state.lock();
        let record = state
            .namespace(namespace)
            .containers
            .get_mut(id.as_str())
            .ok_or_else(|| not_found("container", id))?;
        record.labels = labels.clone();
        Ok(())
    }

    async fn update_spec(
        &self,
        namespace: &str,
        id: &ContainerId,
        spec: &Spec,
    ) -> Result<(), RuntimeServiceError> {
        let mut state = self.state.lock();
        let record = state
            .namespace(namespace)
            .containers
            .get_mut(id.as_str())
            .ok_or_else(|| not_found("container", id))?;
        record.spec = spec.clone();
        Ok(())
    }

    async fn delete_container(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<(), RuntimeServiceError> {
        let mut state = self.state.lock();
        let ns = state.namespace(namespace);
        if ns.tasks.contains_key(id.as_str()) {
            return Err(RuntimeServiceError::FailedPrecondition(format!(
                "cannot delete container {}: task must be deleted first",
                id
            )));
        }
        ns.containers
            .remove(id.as_str())
            .map(|_| ())
            .ok_or_else(|| not_found("container", id))
    }
}

#[async_trait]
impl TaskOps for MemoryRuntime {
    async fn create_task(
        &self,
        namespace: &str,
        id: &ContainerId,
        io: &TaskIo,
    ) -> Result<TaskState, RuntimeServiceError> {
        let mut state = self.state.lock();
        state.next_pid = state.next_pid.max(FIRST_PID) + 1;
        let pid = state.next_pid;

        let ns = state.namespace(namespace);
        let record = ns
            .containers
            .get(id.as_str())
            .ok_or_else(|| not_found("container", id))?;
        let snapshot = (record.snapshotter.clone(), record.snapshot_key.clone());
        if !ns.snapshots.contains_key(&snapshot) {
            return Err(not_found("snapshot", &snapshot.1));
        }
        if ns.tasks.contains_key(id.as_str()) {
            return Err(RuntimeServiceError::AlreadyExists(format!("task {}", id)));
        }

        let (exit_tx, _) = watch::channel(None);
        ns.tasks.insert(
            id.to_string(),
            MemTask {
                pid,
                status: TaskStatus::Created,
                exit: None,
                exit_tx,
                io: io.clone(),
                held_signals: Vec::new(),
                received: Vec::new(),
                console: None,
            },
        );
        Ok(TaskState {
            pid,
            status: TaskStatus::Created,
            exit_status: None,
        })
    }

    async fn start_task(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<(), RuntimeServiceError> {
        let mut state = self.state.lock();
        let task = state
            .namespace(namespace)
            .tasks
            .get_mut(id.as_str())
            .ok_or_else(|| not_found("task", id))?;
        if task.status != TaskStatus::Created {
            return Err(RuntimeServiceError::FailedPrecondition(format!(
                "task {} is {}",
                id, task.status
            )));
        }
        task.status = TaskStatus::Running;
        Ok(())
    }

    async fn task_state(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<TaskState, RuntimeServiceError> {
        let mut state = self.state.lock();
        let task = state
            .namespace(namespace)
            .tasks
            .get(id.as_str())
            .ok_or_else(|| not_found("task", id))?;
        Ok(TaskState {
            pid: task.pid,
            status: task.status,
            exit_status: task.exit,
        })
    }

    async fn kill_task(
        &self,
        namespace: &str,
        id: &ContainerId,
        signal: i32,
        _all: bool,
    ) -> Result<(), RuntimeServiceError> {
        let mut state = self.state.lock();
        let behavior = state
            .behaviors
            .get(id.as_str())
            .copied()
            .unwrap_or_default();
        let task = state
            .namespace(namespace)
            .tasks
            .get_mut(id.as_str())
            .ok_or_else(|| not_found("task", id))?;

        match task.status {
            TaskStatus::Stopped => Err(RuntimeServiceError::NotFound(format!(
                "process {} already finished",
                id
            ))),
            TaskStatus::Paused | TaskStatus::Pausing if signal != SIGKILL => {
                task.held_signals.push(signal);
                Ok(())
            }
            _ => {
                task.deliver(signal, behavior);
                Ok(())
            }
        }
    }

    async fn pause_task(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<(), RuntimeServiceError> {
        let mut state = self.state.lock();
        let task = state
            .namespace(namespace)
            .tasks
            .get_mut(id.as_str())
            .ok_or_else(|| not_found("task", id))?;
        if task.status != TaskStatus::Running {
            return Err(RuntimeServiceError::FailedPrecondition(format!(
                "task {} is {}",
                id, task.status
            )));
        }
        task.status = TaskStatus::Paused;
        Ok(())
    }

    async fn resume_task(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<(), RuntimeServiceError> {
        let mut state = self.state.lock();
        let behavior = state
            .behaviors
            .get(id.as_str())
            .copied()
            .unwrap_or_default();
        let task = state
            .namespace(namespace)
            .tasks
            .get_mut(id.as_str())
            .ok_or_else(|| not_found("task", id))?;
        if task.status != TaskStatus::Paused {
            return Err(RuntimeServiceError::FailedPrecondition(format!(
                "task {} is {}",
                id, task.status
            )));
        }
        task.status = TaskStatus::Running;
        for signal in std::mem::take(&mut task.held_signals) {
            if task.status == TaskStatus::Running {
                task.deliver(signal, behavior);
            }
        }
        Ok(())
    }

    async fn wait_task(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<ExitStatus, RuntimeServiceError> {
        let mut rx = {
            let mut state = self.state.lock();
            let task = state
                .namespace(namespace)
                .tasks
                .get(id.as_str())
                .ok_or_else(|| not_found("task", id))?;
            task.exit_tx.subscribe()
        };

        let exit = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| RuntimeServiceError::Canceled(format!("task {} was deleted", id)))?;
        (*exit).ok_or_else(|| RuntimeServiceError::Internal(format!("task {} lost its exit", id)))
    }

    async fn delete_task(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<ExitStatus, RuntimeServiceError> {
        let mut state = self.state.lock();
        let ns = state.namespace(namespace);
        let task = ns
            .tasks
            .get(id.as_str())
            .ok_or_else(|| not_found("task", id))?;
        if !matches!(task.status, TaskStatus::Created | TaskStatus::Stopped) {
            return Err(RuntimeServiceError::FailedPrecondition(format!(
                "cannot delete task {} while {}",
                id, task.status
            )));
        }
        let exit = task.exit.unwrap_or_else(|| ExitStatus::new(0));
        ns.tasks.remove(id.as_str());
        Ok(exit)
    }

    async fn resize_pty(
        &self,
        namespace: &str,
        id: &ContainerId,
        width: u16,
        height: u16,
    ) -> Result<(), RuntimeServiceError> {
        let mut state = self.state.lock();
        let task = state
            .namespace(namespace)
            .tasks
            .get_mut(id.as_str())
            .ok_or_else(|| not_found("task", id))?;
        task.console = Some((width, height));
        Ok(())
    }
}

#[async_trait]
impl ImageOps for MemoryRuntime {
    async fn get_image(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ImageInfo, RuntimeServiceError> {
        let mut state = self.state.lock();
        state
            .namespace(namespace)
            .images
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("image", name))
    }

    async fn pull_image(
        &self,
        namespace: &str,
        reference: &ImageRef,
        _snapshotter: &str,
    ) -> Result<ImageInfo, RuntimeServiceError> {
        let name = reference.normalized();
        let mut state = self.state.lock();
        let image = state
            .registry
            .get(&name)
            .cloned()
            .ok_or_else(|| not_found("image", format!("{} in registry", name)))?;
        state
            .namespace(namespace)
            .images
            .insert(name, image.clone());
        Ok(image)
    }

    async fn list_images(&self, namespace: &str) -> Result<Vec<String>, RuntimeServiceError> {
        let mut state = self.state.lock();
        let mut names: Vec<String> = state.namespace(namespace).images.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl SnapshotOps for MemoryRuntime {
    async fn prepare_snapshot(
        &self,
        namespace: &str,
        snapshotter: &str,
        key: &str,
        _parent: &str,
    ) -> Result<Vec<RootfsMount>, RuntimeServiceError> {
        let mut state = self.state.lock();
        let snapshots = &mut state.namespace(namespace).snapshots;
        let slot = (snapshotter.to_string(), key.to_string());
        if snapshots.contains_key(&slot) {
            return Err(RuntimeServiceError::AlreadyExists(format!("snapshot {}", key)));
        }
        let mounts = vec![RootfsMount {
            typ: "bind".to_string(),
            source: format!("/memory/snapshots/{}", key),
            options: vec!["rbind".to_string(), "rw".to_string()],
        }];
        snapshots.insert(slot, mounts.clone());
        Ok(mounts)
    }

    async fn snapshot_mounts(
        &self,
        namespace: &str,
        snapshotter: &str,
        key: &str,
    ) -> Result<Vec<RootfsMount>, RuntimeServiceError> {
        let mut state = self.state.lock();
        state
            .namespace(namespace)
            .snapshots
            .get(&(snapshotter.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| not_found("snapshot", key))
    }

    async fn remove_snapshot(
        &self,
        namespace: &str,
        snapshotter: &str,
        key: &str,
    ) -> Result<(), RuntimeServiceError> {
        let mut state = self.state.lock();
        state
            .namespace(namespace)
            .snapshots
            .remove(&(snapshotter.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found("snapshot", key))
    }
}

#[async_trait]
impl NamespaceOps for MemoryRuntime {
    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>, RuntimeServiceError> {
        let state = self.state.lock();
        Ok(state
            .namespaces
            .iter()
            .map(|(name, ns)| NamespaceInfo {
                name: name.clone(),
                labels: ns.labels.clone(),
            })
            .collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<NamespaceInfo, RuntimeServiceError> {
        let state = self.state.lock();
        state
            .namespaces
            .get(name)
            .map(|ns| NamespaceInfo {
                name: name.to_string(),
                labels: ns.labels.clone(),
            })
            .ok_or_else(|| not_found("namespace", name))
    }

    async fn create_namespace(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<(), RuntimeServiceError> {
        let mut state = self.state.lock();
        if state.namespaces.contains_key(name) {
            return Err(RuntimeServiceError::AlreadyExists(format!(
                "namespace {}",
                name
            )));
        }
        state.namespace(name).labels = labels.clone();
        Ok(())
    }

    async fn update_namespace(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<(), RuntimeServiceError> {
        let mut state = self.state.lock();
        let ns = state
            .namespaces
            .get_mut(name)
            .ok_or_else(|| not_found("namespace", name))?;
        ns.labels
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), RuntimeServiceError> {
        let mut state = self.state.lock();
        let ns = state
            .namespaces
            .get(name)
            .ok_or_else(|| not_found("namespace", name))?;
        if !ns.containers.is_empty() || !ns.images.is_empty() {
            return Err(RuntimeServiceError::FailedPrecondition(format!(
                "namespace {} must be empty, but it still has containers or images",
                name
            )));
        }
        state.namespaces.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::DEFAULT_SNAPSHOTTER;
    use chrono::Utc;

    async fn runtime_with_container(id: &ContainerId) -> MemoryRuntime {
        let rt = MemoryRuntime::new();
        rt.prepare_snapshot("default", DEFAULT_SNAPSHOTTER, id.as_str(), "")
            .await
            .unwrap();
        let record = ContainerRecord {
            id: id.clone(),
            image: "docker.io/library/alpine:latest".to_string(),
            labels: HashMap::new(),
            spec: Spec::default(),
            snapshotter: DEFAULT_SNAPSHOTTER.to_string(),
            snapshot_key: id.to_string(),
            runtime: crate::runtime::DEFAULT_RUNTIME.to_string(),
            created_at: Utc::now(),
        };
        rt.create_container("default", &record).await.unwrap();
        rt
    }

    #[tokio::test]
    async fn task_lifecycle_reports_exit_to_waiters() {
        let id = ContainerId::generate();
        let rt = runtime_with_container(&id).await;
        rt.create_task("default", &id, &TaskIo::default())
            .await
            .unwrap();
        rt.start_task("default", &id).await.unwrap();

        let waiter = {
            let rt = rt.clone();
            let id = id.clone();
            tokio::spawn(async move { rt.wait_task("default", &id).await })
        };
        rt.kill_task("default", &id, SIGTERM, false).await.unwrap();

        let exit = waiter.await.unwrap().unwrap();
        assert_eq!(exit.code(), 0);
        assert_eq!(
            rt.task_state("default", &id).await.unwrap().status,
            TaskStatus::Stopped
        );
        rt.delete_task("default", &id).await.unwrap();
    }

    #[tokio::test]
    async fn signals_to_paused_tasks_wait_for_resume() {
        let id = ContainerId::generate();
        let rt = runtime_with_container(&id).await;
        rt.create_task("default", &id, &TaskIo::default())
            .await
            .unwrap();
        rt.start_task("default", &id).await.unwrap();
        rt.pause_task("default", &id).await.unwrap();

        rt.kill_task("default", &id, SIGTERM, false).await.unwrap();
        assert_eq!(
            rt.task_state("default", &id).await.unwrap().status,
            TaskStatus::Paused
        );

        rt.resume_task("default", &id).await.unwrap();
        assert_eq!(
            rt.task_state("default", &id).await.unwrap().status,
            TaskStatus::Stopped
        );
    }

    #[tokio::test]
    async fn running_task_blocks_container_delete() {
        let id = ContainerId::generate();
        let rt = runtime_with_container(&id).await;
        rt.create_task("default", &id, &TaskIo::default())
            .await
            .unwrap();
        rt.start_task("default", &id).await.unwrap();

        let err = rt.delete_task("default", &id).await.unwrap_err();
        assert!(matches!(err, RuntimeServiceError::FailedPrecondition(_)));
        let err = rt.delete_container("default", &id).await.unwrap_err();
        assert!(matches!(err, RuntimeServiceError::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn pull_fetches_published_images() {
        let rt = MemoryRuntime::new();
        let reference = ImageRef::parse("alpine").unwrap();
        assert!(
            rt.pull_image("default", &reference, DEFAULT_SNAPSHOTTER)
                .await
                .unwrap_err()
                .is_not_found()
        );

        rt.publish_image(ImageInfo {
            name: reference.normalized(),
            chain_id: "sha256:abc".to_string(),
            ..Default::default()
        });
        rt.pull_image("default", &reference, DEFAULT_SNAPSHOTTER)
            .await
            .unwrap();
        assert_eq!(
            rt.list_images("default").await.unwrap(),
            vec!["docker.io/library/alpine:latest".to_string()]
        );
    }

    #[tokio::test]
    async fn non_empty_namespaces_cannot_be_deleted() {
        let id = ContainerId::generate();
        let rt = runtime_with_container(&id).await;
        let err = rt.delete_namespace("default").await.unwrap_err();
        assert!(matches!(err, RuntimeServiceError::FailedPrecondition(_)));
    }
}
