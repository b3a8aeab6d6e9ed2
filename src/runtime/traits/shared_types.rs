// ABOUTME: Shared types used across runtime trait definitions.
// ABOUTME: ContainerRecord, TaskState, TaskIo, ImageInfo, RootfsMount, NamespaceInfo.

use crate::types::ContainerId;
use chrono::{DateTime, Utc};
use oci_spec::runtime::Spec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A container as stored by the runtime service.
#[derive(Debug, Clone)]
pub struct ContainerRecord {
    /// Container ID.
    pub id: ContainerId,
    /// Normalized image name.
    pub image: String,
    /// Label map, including the annotations written by this tool.
    pub labels: HashMap<String, String>,
    /// OCI runtime spec.
    pub spec: Spec,
    /// Snapshotter holding the rootfs.
    pub snapshotter: String,
    /// Key of the rootfs snapshot.
    pub snapshot_key: String,
    /// Runtime (shim) name.
    pub runtime: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Process status as observed from a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskStatus {
    #[default]
    Unknown,
    Created,
    Running,
    Stopped,
    Paused,
    Pausing,
}

impl TaskStatus {
    /// Map the numeric status used on the wire.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => TaskStatus::Created,
            2 => TaskStatus::Running,
            3 => TaskStatus::Stopped,
            4 => TaskStatus::Paused,
            5 => TaskStatus::Pausing,
            _ => TaskStatus::Unknown,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Unknown => "unknown",
            TaskStatus::Created => "created",
            TaskStatus::Running => "running",
            TaskStatus::Stopped => "stopped",
            TaskStatus::Paused => "paused",
            TaskStatus::Pausing => "pausing",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(TaskStatus::Unknown),
            "created" => Ok(TaskStatus::Created),
            "running" => Ok(TaskStatus::Running),
            "stopped" => Ok(TaskStatus::Stopped),
            "paused" => Ok(TaskStatus::Paused),
            "pausing" => Ok(TaskStatus::Pausing),
            _ => Err(format!("unknown task status: {}", s)),
        }
    }
}

/// How a task exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code; 128 + signal number for signal deaths.
    pub code: u32,
    pub exited_at: Option<DateTime<Utc>>,
}

impl ExitStatus {
    pub fn new(code: u32) -> Self {
        Self {
            code,
            exited_at: Some(Utc::now()),
        }
    }

    /// Exit code as a process exit status.
    pub fn code(&self) -> i32 {
        i32::try_from(self.code).unwrap_or(i32::MAX)
    }

    /// Name of the fatal signal, when the code encodes one.
    pub fn signal_name(&self) -> Option<&'static str> {
        let signo = self.code.checked_sub(128)?;
        let signo = i32::try_from(signo).ok()?;
        nix::sys::signal::Signal::try_from(signo)
            .ok()
            .map(|s| s.as_str())
    }
}

/// Current task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskState {
    pub pid: u32,
    pub status: TaskStatus,
    /// Set once the task has stopped.
    pub exit_status: Option<ExitStatus>,
}

/// Stdio wiring for a new task. Empty strings mean "not connected".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskIo {
    /// FIFO path for stdin.
    pub stdin: String,
    /// FIFO path or `file://` URI for stdout.
    pub stdout: String,
    /// FIFO path or `file://` URI for stderr.
    pub stderr: String,
    pub terminal: bool,
}

/// Image configuration relevant to running a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub working_dir: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub stop_signal: Option<String>,
    /// Container paths declared as volumes.
    #[serde(default)]
    pub volumes: Vec<String>,
}

/// A locally available image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageInfo {
    /// Normalized image name.
    pub name: String,
    /// Manifest digest.
    pub digest: String,
    /// Snapshot parent for the rootfs.
    pub chain_id: String,
    pub config: ImageConfig,
}

/// When to contact the registry before creating a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    #[default]
    Missing,
    Always,
    Never,
}

impl FromStr for PullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "missing" => Ok(PullPolicy::Missing),
            "always" => Ok(PullPolicy::Always),
            "never" => Ok(PullPolicy::Never),
            _ => Err(format!("unknown pull policy: {}", s)),
        }
    }
}

/// A mount making up a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootfsMount {
    pub typ: String,
    pub source: String,
    pub options: Vec<String>,
}

/// A namespace and its labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceInfo {
    pub name: String,
    pub labels: HashMap<String, String>,
}
