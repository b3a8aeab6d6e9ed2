// ABOUTME: Docker-shaped inspect documents and ps rows built from labels and task state.
// ABOUTME: Listing applies filters and probes tasks concurrently with a per-task timeout.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;

use super::ContainerManager;
use super::filter::{ContainerFilter, TASK_PROBE_TIMEOUT, probe_task};
use super::labels::{ContainerLabels, MountPoint};
use crate::diagnostics::{Diagnostics, Warning};
use crate::error::Result;
use crate::network::{NetworkMode, PortMapping};
use crate::runtime::{ContainerRecord, Runtime, TaskState, TaskStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectState {
    /// created, running, paused, pausing, exited or unknown.
    pub status: String,
    pub running: bool,
    pub paused: bool,
    pub restarting: bool,
    pub pid: u32,
    pub exit_code: u32,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectConfig {
    pub hostname: String,
    pub domainname: String,
    pub user: String,
    pub tty: bool,
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    pub image: String,
    pub working_dir: String,
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortBinding {
    #[serde(rename = "HostIp")]
    pub host_ip: String,
    #[serde(rename = "HostPort")]
    pub host_port: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    pub ports: BTreeMap<String, Vec<PortBinding>>,
    pub networks: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    pub restart_policy: String,
    pub auto_remove: bool,
    pub ipc_mode: String,
    pub pid_mode: String,
    pub log_config: serde_json::Value,
}

/// What `inspect` prints for one container.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectDocument {
    pub id: String,
    pub created: DateTime<Utc>,
    pub path: String,
    pub args: Vec<String>,
    pub state: InspectState,
    pub image: String,
    pub resolv_conf_path: String,
    pub hostname_path: String,
    pub log_path: String,
    pub name: String,
    pub restart_count: u32,
    pub driver: String,
    pub platform: String,
    pub mounts: Vec<MountPoint>,
    pub config: InspectConfig,
    pub host_config: HostConfig,
    pub network_settings: NetworkSettings,
}

/// One `ps` row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    #[serde(rename = "ID")]
    pub id: String,
    pub image: String,
    pub command: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub ports: String,
    pub names: String,
    pub labels: BTreeMap<String, String>,
}

fn status_name(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Stopped => "exited",
        TaskStatus::Created => "created",
        TaskStatus::Running => "running",
        TaskStatus::Paused => "paused",
        TaskStatus::Pausing => "pausing",
        TaskStatus::Unknown => "unknown",
    }
}

/// `Up`, `Exited (0) 3 minutes ago` style status for ps.
fn human_status(state: Option<&TaskState>, now: DateTime<Utc>) -> String {
    let Some(state) = state else {
        return "Unknown".to_string();
    };
    match state.status {
        TaskStatus::Running => "Up".to_string(),
        TaskStatus::Paused => "Up (Paused)".to_string(),
        TaskStatus::Created => "Created".to_string(),
        TaskStatus::Stopped => {
            let code = state.exit_status.map(|e| e.code).unwrap_or_default();
            match state.exit_status.and_then(|e| e.exited_at) {
                Some(at) => format!("Exited ({}) {} ago", code, human_duration(now - at)),
                None => format!("Exited ({})", code),
            }
        }
        other => other.to_string(),
    }
}

pub fn human_duration(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    match secs {
        0 => "Less than a second".to_string(),
        1..60 => format!("{} seconds", secs),
        60..3600 => format!("{} minutes", secs / 60),
        3600..86400 => format!("{} hours", secs / 3600),
        _ => format!("{} days", secs / 86400),
    }
}

/// `0.0.0.0:8080->80/tcp` style ports for ps.
pub fn format_ports(ports: &[PortMapping]) -> String {
    ports
        .iter()
        .map(|p| {
            let ip = if p.host_ip.is_empty() { "0.0.0.0" } else { p.host_ip.as_str() };
            format!("{}:{}->{}/{}", ip, p.host_port, p.container_port, p.protocol)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn process_args(record: &ContainerRecord) -> Vec<String> {
    record
        .spec
        .process()
        .as_ref()
        .and_then(|p| p.args().clone())
        .unwrap_or_default()
}

/// Build the inspect document from a record and its task, if any.
pub fn inspect_document(record: &ContainerRecord, task: Option<&TaskState>) -> InspectDocument {
    let labels = ContainerLabels::decode(&record.labels);
    let args = process_args(record);
    let process = record.spec.process().clone().unwrap_or_default();

    let status = task.map(|t| t.status).unwrap_or(TaskStatus::Created);
    let exit = task.and_then(|t| t.exit_status);
    let state = InspectState {
        status: status_name(status).to_string(),
        running: status == TaskStatus::Running,
        paused: status == TaskStatus::Paused,
        restarting: false,
        pid: task
            .filter(|t| t.status != TaskStatus::Stopped)
            .map(|t| t.pid)
            .unwrap_or_default(),
        exit_code: exit.map(|e| e.code).unwrap_or_default(),
        error: labels.error.clone().unwrap_or_default(),
        finished_at: exit.and_then(|e| e.exited_at),
    };

    let mut ports: BTreeMap<String, Vec<PortBinding>> = BTreeMap::new();
    for p in &labels.networking.port_mappings {
        ports
            .entry(format!("{}/{}", p.container_port, p.protocol))
            .or_default()
            .push(PortBinding {
                host_ip: if p.host_ip.is_empty() {
                    "0.0.0.0".to_string()
                } else {
                    p.host_ip.clone()
                },
                host_port: p.host_port.to_string(),
            });
    }
    let networks = match labels.networking.mode() {
        Ok(NetworkMode::Cni(names)) => names
            .into_iter()
            .map(|n| (n, serde_json::json!({})))
            .collect(),
        _ => BTreeMap::new(),
    };

    let state_dir = std::path::Path::new(&labels.state_dir);
    let file = |name: &str| {
        if labels.state_dir.is_empty() {
            String::new()
        } else {
            state_dir.join(name).display().to_string()
        }
    };

    InspectDocument {
        id: record.id.to_string(),
        created: record.created_at,
        path: args.first().cloned().unwrap_or_default(),
        args: args.iter().skip(1).cloned().collect(),
        state,
        image: record.image.clone(),
        resolv_conf_path: file("resolv.conf"),
        hostname_path: file("hostname"),
        log_path: labels
            .log_uri
            .strip_prefix("file://")
            .unwrap_or_default()
            .to_string(),
        name: labels.name.clone().unwrap_or_default(),
        restart_count: 0,
        driver: record.snapshotter.clone(),
        platform: labels.platform.clone().unwrap_or_else(|| "linux".to_string()),
        mounts: labels.mounts.clone(),
        config: InspectConfig {
            hostname: labels.hostname.clone(),
            domainname: labels.domainname.clone(),
            user: format!("{}:{}", process.user().uid(), process.user().gid()),
            tty: process.terminal().unwrap_or(false),
            env: process.env().clone().unwrap_or_default(),
            cmd: args,
            image: record.image.clone(),
            working_dir: process.cwd().display().to_string(),
            labels: labels.user.clone(),
            stop_signal: labels.stop_signal.clone(),
        },
        host_config: HostConfig {
            restart_policy: labels
                .restart_policy
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "no".to_string()),
            auto_remove: labels.auto_remove,
            ipc_mode: labels.ipc.clone().unwrap_or_else(|| "private".to_string()),
            pid_mode: labels
                .pid_container
                .as_ref()
                .map(|id| format!("container:{}", id))
                .unwrap_or_default(),
            log_config: labels
                .log_config
                .as_ref()
                .and_then(|c| serde_json::to_value(c).ok())
                .unwrap_or(serde_json::Value::Null),
        },
        network_settings: NetworkSettings { ports, networks },
    }
}

fn summary(record: &ContainerRecord, task: Option<&TaskState>, now: DateTime<Utc>) -> ContainerSummary {
    let labels = ContainerLabels::decode(&record.labels);
    ContainerSummary {
        id: record.id.to_string(),
        image: record.image.clone(),
        command: process_args(record).join(" "),
        created_at: record.created_at,
        status: human_status(task, now),
        ports: format_ports(&labels.networking.port_mappings),
        names: labels.name.unwrap_or_default(),
        labels: labels.user,
    }
}

impl<R: Runtime> ContainerManager<'_, R> {
    /// Inspect document for the container `reference` names.
    pub async fn inspect(&self, reference: &str) -> Result<InspectDocument> {
        let record = self.find(reference).await?;
        let task = self.task(&record.id).await?;
        Ok(inspect_document(&record, task.as_ref()))
    }

    /// Containers for ps: running ones only unless `all`, narrowed by `filters`.
    pub async fn list(
        &self,
        all: bool,
        filters: &[String],
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<ContainerSummary>> {
        let mut records = self.runtime.list_containers(&self.namespace).await?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let filter = ContainerFilter::parse(filters, &records, diagnostics)?;
        let records = filter
            .apply(self.runtime, &self.namespace, records, diagnostics)
            .await;

        let probes = join_all(
            records
                .iter()
                .map(|r| probe_task(self.runtime, &self.namespace, r, TASK_PROBE_TIMEOUT)),
        )
        .await;

        let now = Utc::now();
        let mut rows = Vec::new();
        for (record, probe) in records.iter().zip(probes) {
            let task = match probe {
                Ok(state) => Some(state),
                Err(message) => {
                    diagnostics.warn(Warning::task_probe(message));
                    None
                }
            };
            let running = task
                .as_ref()
                .is_some_and(|t| matches!(t.status, TaskStatus::Running | TaskStatus::Paused));
            if all || running {
                rows.push(summary(record, task.as_ref(), now));
            }
        }
        Ok(rows)
    }
}
