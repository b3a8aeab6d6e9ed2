// ABOUTME: Encodes per-container bookkeeping into the runtime's flat label map and back.
// ABOUTME: Decoding is permissive: unknown keys are ignored and malformed values become defaults.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::config::{HealthcheckConfig, RestartPolicy};
use crate::network::NetworkingOptions;

/// Prefix reserved for labels written by highk.
pub const PREFIX: &str = "highk/";

pub mod keys {
    pub const NAME: &str = "highk/name";
    pub const NAMESPACE: &str = "highk/namespace";
    pub const HOSTNAME: &str = "highk/hostname";
    pub const DOMAINNAME: &str = "highk/domainname";
    pub const NETWORKING: &str = "highk/networking";
    pub const MOUNTS: &str = "highk/mounts";
    pub const ANONYMOUS_VOLUMES: &str = "highk/anonymous-volumes";
    pub const STATE_DIR: &str = "highk/state-dir";
    pub const LOG_URI: &str = "highk/log-uri";
    pub const LOG_CONFIG: &str = "highk/log-config";
    pub const HEALTHCHECK: &str = "highk/healthcheck";
    pub const STOP_SIGNAL: &str = "highk/stop-signal";
    pub const STOP_TIMEOUT: &str = "highk/stop-timeout";
    pub const RESTART_POLICY: &str = "highk/restart-policy";
    pub const DESIRED_STATUS: &str = "highk/desired-status";
    pub const EXPLICITLY_STOPPED: &str = "highk/explicitly-stopped";
    pub const ERROR: &str = "highk/error";
    pub const AUTO_REMOVE: &str = "highk/auto-remove";
    pub const CID_FILE: &str = "highk/cid-file";
    pub const PID_FILE: &str = "highk/pid-file";
    pub const DETACH_KEYS: &str = "highk/detach-keys";
    pub const PID_CONTAINER: &str = "highk/pid-container";
    pub const IPC: &str = "highk/ipc";
    pub const PLATFORM: &str = "highk/platform";

    /// Mirrors read by containerd's restart monitor.
    pub const CONTAINERD_RESTART_POLICY: &str = "containerd.io/restart.policy";
    pub const CONTAINERD_RESTART_STATUS: &str = "containerd.io/restart.status";
}

/// A mount as shown by `inspect`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountPoint {
    /// bind, volume or tmpfs.
    #[serde(rename = "Type")]
    pub typ: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub mode: String,
    #[serde(rename = "RW")]
    pub rw: bool,
    #[serde(default)]
    pub propagation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub driver: String,
    #[serde(default)]
    pub opts: BTreeMap<String, String>,
}

/// Status the restart monitor should maintain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredStatus {
    Running,
    Stopped,
}

impl fmt::Display for DesiredStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DesiredStatus::Running => f.write_str("running"),
            DesiredStatus::Stopped => f.write_str("stopped"),
        }
    }
}

impl FromStr for DesiredStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(DesiredStatus::Running),
            "stopped" => Ok(DesiredStatus::Stopped),
            _ => Err(format!("unknown desired status: {}", s)),
        }
    }
}

/// Everything highk keeps about a container beside the OCI spec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLabels {
    pub name: Option<String>,
    pub namespace: String,
    pub hostname: String,
    pub domainname: String,
    pub networking: NetworkingOptions,
    pub mounts: Vec<MountPoint>,
    pub anonymous_volumes: Vec<String>,
    pub state_dir: String,
    pub log_uri: String,
    pub log_config: Option<LogConfig>,
    pub healthcheck: Option<HealthcheckConfig>,
    pub stop_signal: Option<String>,
    /// Seconds.
    pub stop_timeout: Option<u64>,
    pub restart_policy: Option<RestartPolicy>,
    pub desired_status: Option<DesiredStatus>,
    pub explicitly_stopped: bool,
    pub error: Option<String>,
    pub auto_remove: bool,
    pub cid_file: Option<String>,
    pub pid_file: Option<String>,
    pub detach_keys: Option<String>,
    pub pid_container: Option<String>,
    pub ipc: Option<String>,
    pub platform: Option<String>,
    /// Labels given with --label.
    pub user: BTreeMap<String, String>,
}

/// Reject user labels that collide with the reserved prefix.
pub fn validate_user_labels<'a>(
    labels: impl IntoIterator<Item = &'a String>,
) -> Result<(), String> {
    for key in labels {
        if key.starts_with(PREFIX) {
            return Err(format!(
                "label key {:?} uses the reserved prefix {:?}",
                key, PREFIX
            ));
        }
    }
    Ok(())
}

fn decode_json<T: DeserializeOwned + Default>(labels: &HashMap<String, String>, key: &str) -> T {
    let Some(raw) = labels.get(key) else {
        return T::default();
    };
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("ignoring malformed label {}: {}", key, e);
            T::default()
        }
    }
}

fn decode_parsed<T: FromStr>(labels: &HashMap<String, String>, key: &str) -> Option<T>
where
    T::Err: fmt::Display,
{
    let raw = labels.get(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("ignoring malformed label {}={:?}: {}", key, raw, e);
            None
        }
    }
}

impl ContainerLabels {
    pub fn decode(labels: &HashMap<String, String>) -> Self {
        let text = |key: &str| labels.get(key).cloned();
        let flag = |key: &str| labels.get(key).map(String::as_str) == Some("true");

        let user = labels
            .iter()
            .filter(|(k, _)| {
                !k.starts_with(PREFIX)
                    && k.as_str() != keys::CONTAINERD_RESTART_POLICY
                    && k.as_str() != keys::CONTAINERD_RESTART_STATUS
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        ContainerLabels {
            name: text(keys::NAME),
            namespace: text(keys::NAMESPACE).unwrap_or_default(),
            hostname: text(keys::HOSTNAME).unwrap_or_default(),
            domainname: text(keys::DOMAINNAME).unwrap_or_default(),
            networking: decode_json(labels, keys::NETWORKING),
            mounts: decode_json(labels, keys::MOUNTS),
            anonymous_volumes: decode_json(labels, keys::ANONYMOUS_VOLUMES),
            state_dir: text(keys::STATE_DIR).unwrap_or_default(),
            log_uri: text(keys::LOG_URI).unwrap_or_default(),
            log_config: decode_json(labels, keys::LOG_CONFIG),
            healthcheck: decode_json(labels, keys::HEALTHCHECK),
            stop_signal: text(keys::STOP_SIGNAL),
            stop_timeout: decode_parsed(labels, keys::STOP_TIMEOUT),
            restart_policy: decode_parsed(labels, keys::RESTART_POLICY),
            desired_status: decode_parsed(labels, keys::DESIRED_STATUS),
            explicitly_stopped: flag(keys::EXPLICITLY_STOPPED),
            error: text(keys::ERROR),
            auto_remove: flag(keys::AUTO_REMOVE),
            cid_file: text(keys::CID_FILE),
            pid_file: text(keys::PID_FILE),
            detach_keys: text(keys::DETACH_KEYS),
            pid_container: text(keys::PID_CONTAINER),
            ipc: text(keys::IPC),
            platform: text(keys::PLATFORM),
            user,
        }
    }

    /// The full label map, replacing whatever the container carried before.
    pub fn encode(&self) -> Result<HashMap<String, String>, serde_json::Error> {
        let mut labels: HashMap<String, String> = self.user.clone().into_iter().collect();
        let mut put = |key: &str, value: String| {
            labels.insert(key.to_string(), value);
        };

        let optional = [
            (keys::NAME, &self.name),
            (keys::STOP_SIGNAL, &self.stop_signal),
            (keys::ERROR, &self.error),
            (keys::CID_FILE, &self.cid_file),
            (keys::PID_FILE, &self.pid_file),
            (keys::DETACH_KEYS, &self.detach_keys),
            (keys::PID_CONTAINER, &self.pid_container),
            (keys::IPC, &self.ipc),
            (keys::PLATFORM, &self.platform),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                put(key, value.clone());
            }
        }

        let text = [
            (keys::NAMESPACE, &self.namespace),
            (keys::HOSTNAME, &self.hostname),
            (keys::DOMAINNAME, &self.domainname),
            (keys::STATE_DIR, &self.state_dir),
            (keys::LOG_URI, &self.log_uri),
        ];
        for (key, value) in text {
            if !value.is_empty() {
                put(key, value.clone());
            }
        }

        put(keys::NETWORKING, serde_json::to_string(&self.networking)?);
        if !self.mounts.is_empty() {
            put(keys::MOUNTS, serde_json::to_string(&self.mounts)?);
        }
        if !self.anonymous_volumes.is_empty() {
            put(
                keys::ANONYMOUS_VOLUMES,
                serde_json::to_string(&self.anonymous_volumes)?,
            );
        }
        if let Some(ref log_config) = self.log_config {
            put(keys::LOG_CONFIG, serde_json::to_string(log_config)?);
        }
        if let Some(ref healthcheck) = self.healthcheck {
            put(keys::HEALTHCHECK, serde_json::to_string(healthcheck)?);
        }
        if let Some(timeout) = self.stop_timeout {
            put(keys::STOP_TIMEOUT, timeout.to_string());
        }
        if let Some(ref policy) = self.restart_policy {
            put(keys::RESTART_POLICY, policy.to_string());
            if policy.is_enabled() {
                put(keys::CONTAINERD_RESTART_POLICY, policy.to_string());
            }
        }
        if let Some(status) = self.desired_status {
            put(keys::DESIRED_STATUS, status.to_string());
            if self.restart_policy.as_ref().is_some_and(RestartPolicy::is_enabled) {
                put(keys::CONTAINERD_RESTART_STATUS, status.to_string());
            }
        }
        if self.explicitly_stopped {
            put(keys::EXPLICITLY_STOPPED, "true".to_string());
        }
        if self.auto_remove {
            put(keys::AUTO_REMOVE, "true".to_string());
        }

        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::PortMapping;
    use proptest::prelude::*;
    use std::time::Duration;

    fn word() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,10}"
    }

    prop_compose! {
        fn networking()(
            networks in prop::collection::vec(word(), 0..3),
            hostname in word(),
            dns in prop::collection::vec("[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}", 0..3),
            host_port in 1u16..,
            container_port in 1u16..,
        ) -> NetworkingOptions {
            NetworkingOptions {
                networks,
                hostname,
                dns_servers: dns,
                port_mappings: vec![PortMapping {
                    host_port,
                    container_port,
                    protocol: "tcp".to_string(),
                    host_ip: String::new(),
                }],
                ..Default::default()
            }
        }
    }

    prop_compose! {
        fn mount()(name in word(), dest in word(), rw in any::<bool>()) -> MountPoint {
            MountPoint {
                typ: "volume".to_string(),
                source: format!("/data/{}", name),
                name,
                destination: format!("/{}", dest),
                mode: String::new(),
                rw,
                propagation: "rprivate".to_string(),
            }
        }
    }

    prop_compose! {
        fn populated()(
            name in word(),
            hostname in word(),
            networking in networking(),
            mounts in prop::collection::vec(mount(), 1..3),
            anon in prop::collection::vec("[0-9a-f]{64}", 1..3),
            timeout in any::<u64>(),
            explicitly_stopped in any::<bool>(),
            auto_remove in any::<bool>(),
            running in any::<bool>(),
            user in prop::collection::btree_map("[a-z]{1,6}\\.[a-z]{1,6}", ".{0,12}", 0..4),
        ) -> ContainerLabels {
            ContainerLabels {
                name: Some(name),
                namespace: "default".to_string(),
                hostname,
                domainname: "example.com".to_string(),
                networking,
                mounts,
                anonymous_volumes: anon,
                state_dir: "/var/lib/highk/1234abcd/containers/default/x".to_string(),
                log_uri: "file:///var/lib/highk/x.log".to_string(),
                log_config: Some(LogConfig { driver: "json-file".to_string(), opts: BTreeMap::new() }),
                healthcheck: Some(HealthcheckConfig::shell("true")),
                stop_signal: Some("SIGQUIT".to_string()),
                stop_timeout: Some(timeout),
                restart_policy: Some(RestartPolicy::OnFailure { max_retries: Some(3) }),
                desired_status: Some(if running { DesiredStatus::Running } else { DesiredStatus::Stopped }),
                explicitly_stopped,
                error: Some("boom".to_string()),
                auto_remove,
                cid_file: Some("/tmp/cid".to_string()),
                pid_file: Some("/tmp/pid".to_string()),
                detach_keys: Some("ctrl-a,x".to_string()),
                pid_container: Some("abc".to_string()),
                ipc: Some("shareable".to_string()),
                platform: Some("linux/amd64".to_string()),
                user,
            }
        }
    }

    proptest! {
        #[test]
        fn populated_records_round_trip(labels in populated()) {
            let encoded = labels.encode().unwrap();
            prop_assert_eq!(ContainerLabels::decode(&encoded), labels);
        }
    }

    #[test]
    fn default_record_round_trips() {
        let labels = ContainerLabels::default();
        assert_eq!(ContainerLabels::decode(&labels.encode().unwrap()), labels);
    }

    #[test]
    fn malformed_json_decodes_to_default() {
        let raw = HashMap::from([
            (keys::MOUNTS.to_string(), "{not json".to_string()),
            (keys::STOP_TIMEOUT.to_string(), "soon".to_string()),
            (keys::NAME.to_string(), "web".to_string()),
            ("highk/unknown-key".to_string(), "x".to_string()),
        ]);
        let labels = ContainerLabels::decode(&raw);
        assert!(labels.mounts.is_empty());
        assert_eq!(labels.stop_timeout, None);
        assert_eq!(labels.name.as_deref(), Some("web"));
        assert!(labels.user.is_empty());
    }

    #[test]
    fn restart_policy_is_mirrored_for_containerd() {
        let labels = ContainerLabels {
            restart_policy: Some(RestartPolicy::Always),
            desired_status: Some(DesiredStatus::Running),
            ..Default::default()
        };
        let encoded = labels.encode().unwrap();
        assert_eq!(
            encoded.get(keys::CONTAINERD_RESTART_POLICY).map(String::as_str),
            Some("always")
        );
        assert_eq!(
            encoded.get(keys::CONTAINERD_RESTART_STATUS).map(String::as_str),
            Some("running")
        );

        let no = ContainerLabels {
            restart_policy: Some(RestartPolicy::No),
            ..Default::default()
        };
        assert!(!no.encode().unwrap().contains_key(keys::CONTAINERD_RESTART_POLICY));
    }

    #[test]
    fn reserved_prefix_is_rejected_for_user_labels() {
        let ok = ["app".to_string(), "com.example/tier".to_string()];
        assert!(validate_user_labels(&ok).is_ok());
        let bad = ["highk/name".to_string()];
        assert!(validate_user_labels(&bad).is_err());
    }

    #[test]
    fn healthcheck_durations_survive_encoding() {
        let mut hc = HealthcheckConfig::shell("curl -f localhost");
        hc.interval = Duration::from_secs(7);
        let labels = ContainerLabels {
            healthcheck: Some(hc.clone()),
            ..Default::default()
        };
        let decoded = ContainerLabels::decode(&labels.encode().unwrap());
        assert_eq!(decoded.healthcheck, Some(hc));
    }
}
