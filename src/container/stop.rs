// ABOUTME: Graceful stop: stop signal, bounded wait, then SIGKILL.
// ABOUTME: Marks the container explicitly stopped so restart policies leave it alone.

use nix::sys::signal::Signal;
use std::time::Duration;

use super::ContainerManager;
use super::ipc;
use super::labels::{ContainerLabels, DesiredStatus};
use crate::config::{DEFAULT_STOP_SIGNAL, parse_signal};
use crate::error::{Error, Result};
use crate::runtime::{ContainerRecord, Runtime, TaskStatus};
use crate::types::ContainerId;

impl<R: Runtime> ContainerManager<'_, R> {
    /// Stop the container `reference` names; `timeout` overrides its own.
    pub async fn stop(&self, reference: &str, timeout: Option<Duration>) -> Result<()> {
        let record = self.find(reference).await?;
        let id = record.id.clone();
        let result = self.stop_record(record, timeout).await;
        let cleanup = ipc::cleanup(&self.state_dir(&id));
        let result = result.and(cleanup);
        self.recording_errors(&id, result).await
    }

    async fn stop_record(&self, record: ContainerRecord, timeout: Option<Duration>) -> Result<()> {
        let id = record.id.clone();
        let mut labels = ContainerLabels::decode(&record.labels);
        let _lock = self.oplock(&id).await?;

        labels.explicitly_stopped = true;
        labels.desired_status = Some(DesiredStatus::Stopped);
        self.save_labels(&id, &labels).await?;

        let timeout = timeout
            .or_else(|| labels.stop_timeout.map(Duration::from_secs))
            .unwrap_or(self.stop_timeout);

        let Some(state) = self.task(&id).await? else {
            return Ok(());
        };
        if matches!(state.status, TaskStatus::Created | TaskStatus::Stopped) {
            return Ok(());
        }

        let signal = match labels.stop_signal {
            Some(ref s) => parse_signal(s).map_err(Error::InvalidArgument)?,
            None => DEFAULT_STOP_SIGNAL,
        };
        let paused = matches!(state.status, TaskStatus::Paused | TaskStatus::Pausing);
        self.terminate(&id, signal, timeout, paused).await
    }

    /// Send `signal`, wait up to `timeout`, then SIGKILL.
    async fn terminate(
        &self,
        id: &ContainerId,
        signal: Signal,
        timeout: Duration,
        paused: bool,
    ) -> Result<()> {
        let first = if timeout.is_zero() {
            Signal::SIGKILL
        } else {
            signal
        };
        self.signal(id, first).await?;
        if paused && let Err(e) = self.runtime.resume_task(&self.namespace, id).await {
            tracing::debug!("resuming {} after signalling failed: {}", id.short(), e);
        }

        if timeout.is_zero() {
            self.runtime.wait_task(&self.namespace, id).await?;
        } else if let Ok(exit) =
            tokio::time::timeout(timeout, self.runtime.wait_task(&self.namespace, id)).await
        {
            exit?;
        } else {
            tracing::info!(
                "container {} did not stop within {:?}, sending SIGKILL",
                id.short(),
                timeout
            );
            self.signal(id, Signal::SIGKILL).await?;
            self.runtime.wait_task(&self.namespace, id).await?;
        }
        tracing::info!("stopped container {}", id.short());
        Ok(())
    }

    /// Signal the task; one that already exited is not an error.
    async fn signal(&self, id: &ContainerId, signal: Signal) -> Result<()> {
        match self
            .runtime
            .kill_task(&self.namespace, id, signal as i32, true)
            .await
        {
            Err(e) if !e.is_not_found() => Err(e.into()),
            _ => Ok(()),
        }
    }
}
