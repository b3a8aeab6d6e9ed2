// ABOUTME: Starting a created or stopped container, optionally attached to its stdio.
// ABOUTME: Re-joins namespaces of other containers, since their pids change across restarts.

use oci_spec::runtime::LinuxNamespaceType;
use std::path::PathBuf;

use super::attach::{AttachIo, AttachOutcome, Fifos, attach};
use super::create::{detach_keys_of, ignore_not_found};
use super::ipc;
use super::labels::{ContainerLabels, DesiredStatus};
use super::spec::{apply_fragments, set_mounts, set_namespace};
use super::ContainerManager;
use crate::config::RestartPolicy;
use crate::error::{Error, Result};
use crate::network::NetworkMode;
use crate::runtime::{ContainerRecord, Runtime, RuntimeServiceError, TaskIo, TaskStatus};

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Relay the container's output and wait for it to exit.
    pub attach: bool,
    /// Also relay stdin.
    pub interactive: bool,
    /// Overrides the keys recorded at create time.
    pub detach_keys: Option<String>,
}

fn terminal(record: &ContainerRecord) -> bool {
    record
        .spec
        .process()
        .as_ref()
        .and_then(|p| p.terminal())
        .unwrap_or(false)
}

impl<R: Runtime> ContainerManager<'_, R> {
    /// Start the container `reference` names.
    pub async fn start(&self, reference: &str, options: &StartOptions) -> Result<AttachOutcome> {
        let record = self.find(reference).await?;
        let id = record.id.clone();
        let result = self.start_record(record, options).await;
        self.recording_errors(&id, result).await
    }

    async fn start_record(
        &self,
        record: ContainerRecord,
        options: &StartOptions,
    ) -> Result<AttachOutcome> {
        let id = record.id.clone();
        let mut labels = ContainerLabels::decode(&record.labels);
        let lock = self.oplock(&id).await?;

        if let Some(state) = self.task(&id).await? {
            if matches!(
                state.status,
                TaskStatus::Running | TaskStatus::Paused | TaskStatus::Pausing
            ) {
                return Err(Error::PreconditionFailed(format!(
                    "container {} is already running",
                    id.short()
                )));
            }
            ignore_not_found(
                self.runtime
                    .delete_task(&self.namespace, &id)
                    .await
                    .map(|_| ()),
            )?;
        }

        self.rematerialize(&record, &labels).await?;

        labels.explicitly_stopped = false;
        labels.error = None;
        if labels
            .restart_policy
            .as_ref()
            .is_some_and(RestartPolicy::is_enabled)
        {
            labels.desired_status = Some(DesiredStatus::Running);
        }
        self.save_labels(&id, &labels).await?;

        self.network(labels.networking.clone(), labels.name.clone())?
            .setup_networking(&id)
            .await?;

        let state_dir = self.state_dir(&id);
        if labels.ipc.as_deref() == Some("shareable") {
            ipc::prepare_shm(&state_dir)?;
        }

        let terminal = terminal(&record);
        let (io, attached) = if options.attach {
            let fifos = Fifos::create(&state_dir, &id, options.interactive, terminal)?;
            let attach_io = AttachIo::open(&fifos)?;
            (fifos.task_io(terminal), Some((fifos, attach_io)))
        } else {
            let io = TaskIo {
                stdin: String::new(),
                stdout: labels.log_uri.clone(),
                stderr: labels.log_uri.clone(),
                terminal,
            };
            (io, None)
        };

        let task = self
            .runtime
            .create_task(&self.namespace, &id, &io)
            .await
            .map_err(classify_task_error)?;
        if let Some(ref pid_file) = labels.pid_file {
            std::fs::write(pid_file, task.pid.to_string()).map_err(Error::Io)?;
        }
        self.runtime
            .start_task(&self.namespace, &id)
            .await
            .map_err(classify_task_error)?;
        drop(lock);
        tracing::info!("started container {}", id.short());

        let Some((fifos, attach_io)) = attached else {
            return Ok(AttachOutcome::Detached);
        };
        let keys = options
            .detach_keys
            .as_deref()
            .unwrap_or_else(|| detach_keys_of(&labels));
        let outcome = attach(self.runtime, &self.namespace, &id, attach_io, terminal, keys).await;
        fifos.remove();
        outcome
    }

    /// Point namespace joins and shared files at the current tasks of other containers.
    async fn rematerialize(&self, record: &ContainerRecord, labels: &ContainerLabels) -> Result<()> {
        let mut spec = record.spec.clone();
        let mut changed = false;

        if let Ok(NetworkMode::Container(_)) = labels.networking.mode() {
            let fragments = self
                .network(labels.networking.clone(), labels.name.clone())?
                .container_networking_fragments(&record.id)
                .await?;
            apply_fragments(&mut spec, &fragments)?;
            set_mounts(&mut spec, fragments.mounts);
            changed = true;
        }

        if let Some(ref target) = labels.pid_container {
            let (_, pid) = self.running_task(target).await?;
            let path = PathBuf::from(format!("/proc/{}/ns/pid", pid));
            set_namespace(&mut spec, LinuxNamespaceType::Pid, Some(path))?;
            changed = true;
        }

        if let Some(target) = labels
            .ipc
            .as_deref()
            .and_then(|mode| mode.strip_prefix("container:"))
        {
            let (_, pid) = self.running_task(target).await?;
            let path = PathBuf::from(format!("/proc/{}/ns/ipc", pid));
            set_namespace(&mut spec, LinuxNamespaceType::Ipc, Some(path))?;
            changed = true;
        }

        if changed {
            self.runtime
                .update_spec(&self.namespace, &record.id, &spec)
                .await?;
        }
        Ok(())
    }
}

/// Map exec failures reported by the shim onto the 127/126 exit conventions.
fn classify_task_error(err: RuntimeServiceError) -> Error {
    let message = err.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("executable file not found") || lower.contains("no such file or directory") {
        Error::CommandNotFound(message)
    } else if lower.contains("permission denied") || lower.contains("exec format error") {
        Error::CannotExecute(message)
    } else {
        err.into()
    }
}
