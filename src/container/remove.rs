// ABOUTME: Container removal: task, record and snapshot, then local bookkeeping.
// ABOUTME: Service-side NotFound counts as already removed so repeated removal converges.

use nix::sys::signal::Signal;
use std::collections::HashSet;

use super::ContainerManager;
use super::create::ignore_not_found;
use super::ipc;
use super::labels::{ContainerLabels, DesiredStatus};
use crate::error::{Error, ErrorKind, Result};
use crate::runtime::{ContainerRecord, Runtime, TaskStatus};

impl<R: Runtime> ContainerManager<'_, R> {
    /// Remove the container `reference` names. Running containers need `force`.
    /// With `force`, a container that no longer exists counts as removed.
    pub async fn remove(&self, reference: &str, force: bool, remove_volumes: bool) -> Result<()> {
        let record = match self.find(reference).await {
            Ok(record) => record,
            Err(e) if force && e.kind() == ErrorKind::NotFound => {
                tracing::debug!("{} is already removed", reference);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let id = record.id.clone();
        let result = self.remove_record(record, force, remove_volumes).await;
        self.recording_errors(&id, result).await
    }

    pub(super) async fn remove_record(
        &self,
        record: ContainerRecord,
        force: bool,
        remove_volumes: bool,
    ) -> Result<()> {
        let id = record.id.clone();
        let mut labels = ContainerLabels::decode(&record.labels);

        {
            let _lock = self.oplock(&id).await?;
            labels.desired_status = Some(DesiredStatus::Stopped);
            ignore_not_found(
                self.runtime
                    .update_labels(&self.namespace, &id, &labels.encode()?)
                    .await,
            )?;

            if let Some(state) = self.task(&id).await? {
                match state.status {
                    TaskStatus::Created | TaskStatus::Stopped => {}
                    TaskStatus::Paused | TaskStatus::Pausing if !force => {
                        return Err(Error::PreconditionFailed(format!(
                            "cannot remove paused container {}: unpause and stop it first, or use --force",
                            id.short()
                        )));
                    }
                    _ if !force => {
                        return Err(Error::PreconditionFailed(format!(
                            "cannot remove running container {}: stop it first, or use --force",
                            id.short()
                        )));
                    }
                    status => {
                        ignore_not_found(
                            self.runtime
                                .kill_task(&self.namespace, &id, Signal::SIGKILL as i32, true)
                                .await,
                        )?;
                        if matches!(status, TaskStatus::Paused | TaskStatus::Pausing)
                            && let Err(e) = self.runtime.resume_task(&self.namespace, &id).await
                        {
                            tracing::debug!("resuming {} after SIGKILL failed: {}", id.short(), e);
                        }
                        match self.runtime.wait_task(&self.namespace, &id).await {
                            Err(e) if !e.is_not_found() => return Err(e.into()),
                            _ => {}
                        }
                    }
                }
                ignore_not_found(
                    self.runtime
                        .delete_task(&self.namespace, &id)
                        .await
                        .map(|_| ()),
                )?;
            }

            ignore_not_found(self.runtime.delete_container(&self.namespace, &id).await)?;
            ignore_not_found(
                self.runtime
                    .remove_snapshot(&self.namespace, &record.snapshotter, &record.snapshot_key)
                    .await,
            )?;
        }

        let mut errors = Vec::new();
        let state_dir = self.state_dir(&id);
        if let Err(e) = ipc::cleanup(&state_dir) {
            errors.push(e);
        }
        match std::fs::remove_dir_all(&state_dir) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => errors.push(Error::Io(e)),
            _ => {}
        }
        if let Some(ref name) = labels.name
            && let Err(e) = self.names().and_then(|n| Ok(n.release(name, id.as_str())?))
        {
            errors.push(e);
        }
        match self.network(labels.networking.clone(), labels.name.clone()) {
            Ok(network) => {
                if let Err(e) = network.cleanup_networking(&record).await {
                    errors.push(e.into());
                }
            }
            Err(e) => errors.push(e),
        }
        if let Err(e) = self.hosts().and_then(|hosts| {
            hosts.release(id.as_str())?;
            Ok(hosts.dealloc_hosts_file(id.as_str())?)
        }) {
            errors.push(e);
        }
        if remove_volumes && !labels.anonymous_volumes.is_empty() {
            self.remove_anonymous_volumes(&labels.anonymous_volumes).await;
        }

        if errors.is_empty() {
            tracing::info!("removed container {}", id.short());
        }
        Error::join(errors)
    }

    /// Volume names mounted by any container in the namespace.
    pub async fn volumes_in_use(&self) -> Result<HashSet<String>> {
        let records = self.runtime.list_containers(&self.namespace).await?;
        Ok(records
            .iter()
            .flat_map(|r| ContainerLabels::decode(&r.labels).mounts)
            .filter(|m| m.typ == "volume")
            .map(|m| m.name)
            .collect())
    }

    /// Remove volumes no remaining container mounts; the rest are kept with a warning.
    async fn remove_anonymous_volumes(&self, names: &[String]) {
        let in_use = match self.volumes_in_use().await {
            Ok(in_use) => in_use,
            Err(e) => {
                tracing::warn!("keeping anonymous volumes, containers unavailable: {}", e);
                return;
            }
        };
        let outcome = self.volumes().and_then(|v| Ok(v.remove(names, &in_use)?));
        match outcome {
            Ok((_, errors)) => {
                for e in errors {
                    tracing::warn!("volume not removed: {}", e);
                }
            }
            Err(e) => tracing::warn!("failed to remove anonymous volumes: {}", e),
        }
    }
}
