// ABOUTME: `ps --filter` predicates over container records and task status.
// ABOUTME: Metadata filters run first; task filters probe tasks concurrently with a timeout.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::time::Duration;

use super::labels::{ContainerLabels, keys};
use crate::diagnostics::{Diagnostics, Warning};
use crate::error::{Error, Result};
use crate::network::uses_network;
use crate::runtime::{ContainerRecord, TaskOps, TaskState, TaskStatus};

/// Longest wait for one task status while filtering.
pub const TASK_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const IGNORED_STATUSES: &[&str] = &["restarting", "removing", "dead"];

/// Parsed `ps --filter` arguments. Values of one key are alternatives; keys combine.
#[derive(Debug, Clone, Default)]
pub struct ContainerFilter {
    ids: Vec<String>,
    names: Vec<String>,
    labels: Vec<(String, Option<String>)>,
    statuses: Vec<TaskStatus>,
    exited: Vec<u32>,
    since: Vec<DateTime<Utc>>,
    before: Vec<DateTime<Utc>>,
    volumes: Vec<String>,
    networks: Vec<String>,
}

impl ContainerFilter {
    /// Parse `key=value` filters; `since` and `before` resolve against `containers`.
    pub fn parse(
        filters: &[String],
        containers: &[ContainerRecord],
        diagnostics: &mut Diagnostics,
    ) -> Result<Self> {
        let mut filter = Self::default();
        for raw in filters {
            let (key, value) = raw.split_once('=').ok_or_else(|| {
                Error::InvalidArgument(format!("invalid filter {:?}: expected key=value", raw))
            })?;
            match key {
                "id" => filter.ids.push(value.to_string()),
                "name" => filter.names.push(value.to_string()),
                "label" => filter.labels.push(match value.split_once('=') {
                    Some((k, v)) => (k.to_string(), Some(v.to_string())),
                    None => (value.to_string(), None),
                }),
                "status" => match value {
                    "exited" => filter.statuses.push(TaskStatus::Stopped),
                    v if IGNORED_STATUSES.contains(&v) => diagnostics.warn(
                        Warning::ignored_filter(format!("status={} is not supported and ignored", v)),
                    ),
                    v => filter.statuses.push(v.parse().map_err(|_| {
                        Error::InvalidArgument(format!("invalid status filter {:?}", v))
                    })?),
                },
                "exited" => filter.exited.push(value.parse().map_err(|_| {
                    Error::InvalidArgument(format!("invalid exited filter {:?}", value))
                })?),
                "since" => filter.since.push(reference_time(value, containers)?),
                "before" => filter.before.push(reference_time(value, containers)?),
                "volume" => filter.volumes.push(value.to_string()),
                "network" => filter.networks.push(value.to_string()),
                other => {
                    return Err(Error::InvalidArgument(format!(
                        "invalid filter key {:?}",
                        other
                    )));
                }
            }
        }
        Ok(filter)
    }

    fn needs_task(&self) -> bool {
        !self.statuses.is_empty() || !self.exited.is_empty()
    }

    /// Predicates that need only the container record.
    pub fn matches_info(&self, record: &ContainerRecord) -> bool {
        let labels = ContainerLabels::decode(&record.labels);

        if !self.ids.is_empty()
            && !self
                .ids
                .iter()
                .any(|id| !id.is_empty() && record.id.as_str().starts_with(id.as_str()))
        {
            return false;
        }

        if !self.names.is_empty() {
            let name = labels.name.as_deref().unwrap_or("");
            if !self.names.iter().any(|n| name.contains(n.as_str())) {
                return false;
            }
        }

        for (key, value) in &self.labels {
            match (record.labels.get(key), value) {
                (None, _) => return false,
                (Some(actual), Some(expected)) if actual != expected => return false,
                _ => {}
            }
        }

        if self.since.iter().any(|t| record.created_at <= *t)
            || self.before.iter().any(|t| record.created_at >= *t)
        {
            return false;
        }

        if !self.volumes.is_empty()
            && !self.volumes.iter().any(|v| {
                labels
                    .mounts
                    .iter()
                    .any(|m| &m.source == v || &m.destination == v || &m.name == v)
            })
        {
            return false;
        }

        if !self.networks.is_empty() && !self.networks.iter().any(|n| uses_network(record, n)) {
            return false;
        }

        true
    }

    /// Predicates on the task state.
    pub fn matches_task(&self, state: &TaskState) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&state.status) {
            return false;
        }
        if !self.exited.is_empty() {
            let code = match (state.status, state.exit_status) {
                (TaskStatus::Stopped, Some(exit)) => exit.code,
                _ => return false,
            };
            if !self.exited.contains(&code) {
                return false;
            }
        }
        true
    }

    /// Keep the containers every predicate accepts, in input order.
    pub async fn apply<R>(
        &self,
        runtime: &R,
        namespace: &str,
        containers: Vec<ContainerRecord>,
        diagnostics: &mut Diagnostics,
    ) -> Vec<ContainerRecord>
    where
        R: TaskOps + ?Sized,
    {
        let candidates: Vec<ContainerRecord> =
            containers.into_iter().filter(|c| self.matches_info(c)).collect();
        if !self.needs_task() {
            return candidates;
        }

        let probes = join_all(
            candidates
                .iter()
                .map(|c| probe_task(runtime, namespace, c, TASK_PROBE_TIMEOUT)),
        )
        .await;

        let mut kept = Vec::new();
        for (record, probe) in candidates.into_iter().zip(probes) {
            match probe {
                Ok(state) if self.matches_task(&state) => kept.push(record),
                Ok(_) => {}
                Err(message) => diagnostics.warn(Warning::task_probe(message)),
            }
        }
        kept
    }
}

fn reference_time(reference: &str, containers: &[ContainerRecord]) -> Result<DateTime<Utc>> {
    containers
        .iter()
        .find(|c| {
            c.labels.get(keys::NAME).map(String::as_str) == Some(reference)
                || (!reference.is_empty() && c.id.as_str().starts_with(reference))
        })
        .map(|c| c.created_at)
        .ok_or_else(|| Error::NotFound(format!("no such container: {}", reference)))
}

/// Task state of `record`, with a missing task reported as created.
pub async fn probe_task<R>(
    runtime: &R,
    namespace: &str,
    record: &ContainerRecord,
    timeout: Duration,
) -> std::result::Result<TaskState, String>
where
    R: TaskOps + ?Sized,
{
    match tokio::time::timeout(timeout, runtime.task_state(namespace, &record.id)).await {
        Ok(Ok(state)) => Ok(state),
        Ok(Err(e)) if e.is_not_found() => Ok(TaskState {
            pid: 0,
            status: TaskStatus::Created,
            exit_status: None,
        }),
        Ok(Err(e)) => Err(format!("failed to get task of {}: {}", record.id.short(), e)),
        Err(_) => Err(format!("timed out getting task of {}", record.id.short())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::labels::MountPoint;
    use crate::runtime::{ContainerOps, DEFAULT_RUNTIME, MemoryRuntime, SnapshotOps, TaskIo};
    use crate::types::ContainerId;
    use chrono::TimeZone;

    fn record(id: &str, name: &str, minute: u32) -> ContainerRecord {
        let labels = ContainerLabels {
            name: Some(name.to_string()),
            mounts: vec![MountPoint {
                typ: "volume".into(),
                name: format!("{}-data", name),
                source: format!("/vols/{}", name),
                destination: "/data".into(),
                rw: true,
                ..Default::default()
            }],
            ..Default::default()
        };
        let mut labels = labels.encode().unwrap();
        labels.insert("tier".into(), if name == "web" { "front" } else { "back" }.into());
        ContainerRecord {
            id: ContainerId::new(id),
            image: "docker.io/library/alpine:latest".into(),
            labels,
            spec: Default::default(),
            snapshotter: "overlayfs".into(),
            snapshot_key: id.to_string(),
            runtime: DEFAULT_RUNTIME.into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
        }
    }

    fn fixtures() -> Vec<ContainerRecord> {
        vec![record("aaa111", "web", 1), record("bbb222", "db", 2), record("ccc333", "cache", 3)]
    }

    fn ids(records: &[ContainerRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    fn parse(filters: &[&str]) -> Result<ContainerFilter> {
        let filters: Vec<String> = filters.iter().map(|s| s.to_string()).collect();
        ContainerFilter::parse(&filters, &fixtures(), &mut Diagnostics::default())
    }

    fn info(filter: &ContainerFilter) -> Vec<String> {
        fixtures()
            .into_iter()
            .filter(|r| filter.matches_info(r))
            .map(|r| r.id.to_string())
            .collect()
    }

    #[test]
    fn id_prefix_and_name_substring() {
        assert_eq!(info(&parse(&["id=bb"]).unwrap()), vec!["bbb222"]);
        assert!(info(&parse(&["id="]).unwrap()).is_empty());
        assert_eq!(info(&parse(&["name=ca"]).unwrap()), vec!["ccc333"]);
        assert_eq!(info(&parse(&["name="]).unwrap()).len(), 3);
    }

    #[test]
    fn labels_must_all_hold() {
        assert_eq!(info(&parse(&["label=tier=front"]).unwrap()), vec!["aaa111"]);
        assert_eq!(info(&parse(&["label=tier"]).unwrap()).len(), 3);
        assert!(info(&parse(&["label=tier", "label=missing"]).unwrap()).is_empty());
    }

    #[test]
    fn since_and_before_compare_creation_time() {
        assert_eq!(info(&parse(&["since=web"]).unwrap()), vec!["bbb222", "ccc333"]);
        assert_eq!(info(&parse(&["before=ccc"]).unwrap()), vec!["aaa111", "bbb222"]);
        assert!(parse(&["since=nothing"]).is_err());
    }

    #[test]
    fn volume_matches_source_destination_or_name() {
        assert_eq!(info(&parse(&["volume=db-data"]).unwrap()), vec!["bbb222"]);
        assert_eq!(info(&parse(&["volume=/vols/web"]).unwrap()), vec!["aaa111"]);
        assert_eq!(info(&parse(&["volume=/data"]).unwrap()).len(), 3);
    }

    #[test]
    fn network_defaults_to_bridge() {
        assert_eq!(info(&parse(&["network=bridge"]).unwrap()).len(), 3);
        assert!(info(&parse(&["network=lan"]).unwrap()).is_empty());
    }

    #[test]
    fn unknown_keys_and_statuses_are_rejected() {
        assert!(parse(&["color=red"]).is_err());
        assert!(parse(&["status=sleeping"]).is_err());
        assert!(parse(&["exited=abc"]).is_err());
        assert!(parse(&["noequals"]).is_err());
    }

    #[test]
    fn unsupported_statuses_warn_and_match_everything() {
        let mut diagnostics = Diagnostics::default();
        let filter =
            ContainerFilter::parse(&["status=dead".to_string()], &fixtures(), &mut diagnostics)
                .unwrap();
        assert!(diagnostics.has_warnings());
        assert!(!filter.needs_task());
    }

    #[tokio::test]
    async fn status_and_exit_code_filters_probe_tasks() {
        let rt = MemoryRuntime::new();
        for r in fixtures() {
            rt.create_container("default", &r).await.unwrap();
        }
        for id in ["aaa111", "bbb222"] {
            let id = ContainerId::new(id);
            rt.prepare_snapshot("default", "overlayfs", id.as_str(), "")
                .await
                .unwrap();
            rt.create_task("default", &id, &TaskIo::default()).await.unwrap();
            rt.start_task("default", &id).await.unwrap();
        }
        rt.exit_task("default", &ContainerId::new("bbb222"), 3).unwrap();

        let mut diagnostics = Diagnostics::default();
        let running = parse(&["status=running"]).unwrap();
        let kept = running.apply(&rt, "default", fixtures(), &mut diagnostics).await;
        assert_eq!(ids(&kept), vec!["aaa111"]);

        let exited = parse(&["status=exited", "exited=3"]).unwrap();
        let kept = exited.apply(&rt, "default", fixtures(), &mut diagnostics).await;
        assert_eq!(ids(&kept), vec!["bbb222"]);

        let created = parse(&["status=created"]).unwrap();
        let kept = created.apply(&rt, "default", fixtures(), &mut diagnostics).await;
        assert_eq!(ids(&kept), vec!["ccc333"]);
        assert!(!diagnostics.has_warnings());
    }

    #[test]
    fn task_predicates_need_a_stopped_task_for_exit_codes() {
        let filter = parse(&["exited=0"]).unwrap();
        let running = TaskState {
            pid: 1,
            status: TaskStatus::Running,
            exit_status: None,
        };
        assert!(!filter.matches_task(&running));
    }
}
