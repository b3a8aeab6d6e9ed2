// ABOUTME: Smaller lifecycle operations: pause, unpause, kill, rename, wait and restart.
// ABOUTME: Each checks the task state first and reports a precondition failure otherwise.

use nix::sys::signal::Signal;
use std::time::Duration;

use super::ContainerManager;
use super::StartOptions;
use super::labels::ContainerLabels;
use crate::error::{Error, Result};
use crate::runtime::{ExitStatus, Runtime, TaskStatus};
use crate::types::{ContainerId, ContainerName};

impl<R: Runtime> ContainerManager<'_, R> {
    pub async fn pause(&self, reference: &str) -> Result<ContainerId> {
        let record = self.find(reference).await?;
        let id = record.id;
        match self.task(&id).await?.map(|t| t.status) {
            Some(TaskStatus::Running) => {
                self.runtime.pause_task(&self.namespace, &id).await?;
                Ok(id)
            }
            Some(TaskStatus::Paused | TaskStatus::Pausing) => Err(Error::PreconditionFailed(
                format!("container {} is already paused", id.short()),
            )),
            _ => Err(Error::PreconditionFailed(format!(
                "container {} is not running",
                id.short()
            ))),
        }
    }

    pub async fn unpause(&self, reference: &str) -> Result<ContainerId> {
        let record = self.find(reference).await?;
        let id = record.id;
        match self.task(&id).await?.map(|t| t.status) {
            Some(TaskStatus::Paused) => {
                self.runtime.resume_task(&self.namespace, &id).await?;
                Ok(id)
            }
            _ => Err(Error::PreconditionFailed(format!(
                "container {} is not paused",
                id.short()
            ))),
        }
    }

    /// Send `signal` to every process of a running container.
    pub async fn kill(&self, reference: &str, signal: Signal) -> Result<ContainerId> {
        let record = self.find(reference).await?;
        let id = record.id;
        match self.task(&id).await?.map(|t| t.status) {
            Some(TaskStatus::Running | TaskStatus::Paused | TaskStatus::Pausing) => {
                self.runtime
                    .kill_task(&self.namespace, &id, signal as i32, true)
                    .await?;
                tracing::debug!("sent {} to {}", signal, id.short());
                Ok(id)
            }
            _ => Err(Error::PreconditionFailed(format!(
                "cannot kill container {}: container is not running",
                id.short()
            ))),
        }
    }

    /// Move the container to `new_name`, keeping names, labels and hosts files in step.
    pub async fn rename(&self, reference: &str, new_name: &str) -> Result<()> {
        ContainerName::new(new_name)?;
        let record = self.find(reference).await?;
        let id = record.id.clone();
        let mut labels = ContainerLabels::decode(&record.labels);
        let old_name = labels.name.clone();
        if old_name.as_deref() == Some(new_name) {
            return Err(Error::InvalidArgument(format!(
                "renaming a container with the same name as its current name: {}",
                new_name
            )));
        }

        let names = self.names()?;
        match old_name {
            Some(ref old) => names.rename(old, id.as_str(), new_name)?,
            None => names.acquire(new_name, id.as_str())?,
        }

        labels.name = Some(new_name.to_string());
        if let Err(e) = self.save_labels(&id, &labels).await {
            let undo = match old_name {
                Some(ref old) => names.rename(new_name, id.as_str(), old),
                None => names.release(new_name, id.as_str()),
            };
            if let Err(undo) = undo {
                tracing::warn!("failed to restore name of {}: {}", id.short(), undo);
            }
            return Err(e);
        }

        let hosts = self.hosts()?;
        if let Some(mut meta) = hosts.meta(id.as_str())? {
            meta.name = Some(new_name.to_string());
            hosts.acquire(&meta)?;
        }
        tracing::info!("renamed container {} to {}", id.short(), new_name);
        Ok(())
    }

    /// Block until the container's task exits.
    pub async fn wait(&self, reference: &str) -> Result<ExitStatus> {
        let record = self.find(reference).await?;
        let id = record.id;
        if self.task(&id).await?.is_none() {
            return Err(Error::PreconditionFailed(format!(
                "container {} has no task to wait for",
                id.short()
            )));
        }
        Ok(self.runtime.wait_task(&self.namespace, &id).await?)
    }

    /// Stop, then start detached.
    pub async fn restart(&self, reference: &str, timeout: Option<Duration>) -> Result<()> {
        self.stop(reference, timeout).await?;
        self.start(reference, &StartOptions::default()).await?;
        Ok(())
    }
}
