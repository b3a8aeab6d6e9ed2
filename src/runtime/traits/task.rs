// ABOUTME: Task (running process) operations against the runtime service.
// ABOUTME: Create, start, signal, pause, resume, wait, resize and delete tasks.

use super::sealed::Sealed;
use super::shared_types::{ExitStatus, TaskIo, TaskState};
use crate::runtime::RuntimeServiceError;
use crate::types::ContainerId;
use async_trait::async_trait;

/// Operations on the init process of a container.
#[async_trait]
pub trait TaskOps: Sealed + Send + Sync {
    /// Create the task from the container's rootfs snapshot.
    async fn create_task(
        &self,
        namespace: &str,
        id: &ContainerId,
        io: &TaskIo,
    ) -> Result<TaskState, RuntimeServiceError>;

    async fn start_task(&self, namespace: &str, id: &ContainerId)
    -> Result<(), RuntimeServiceError>;

    /// Current state. NotFound when the container has no task.
    async fn task_state(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<TaskState, RuntimeServiceError>;

    /// Send `signal`; `all` targets every process in the container.
    async fn kill_task(
        &self,
        namespace: &str,
        id: &ContainerId,
        signal: i32,
        all: bool,
    ) -> Result<(), RuntimeServiceError>;

    async fn pause_task(&self, namespace: &str, id: &ContainerId)
    -> Result<(), RuntimeServiceError>;

    async fn resume_task(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<(), RuntimeServiceError>;

    /// Block until the task exits.
    async fn wait_task(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<ExitStatus, RuntimeServiceError>;

    /// Delete a stopped or created task.
    async fn delete_task(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<ExitStatus, RuntimeServiceError>;

    /// Propagate a console size change.
    async fn resize_pty(
        &self,
        namespace: &str,
        id: &ContainerId,
        width: u16,
        height: u16,
    ) -> Result<(), RuntimeServiceError>;
}
