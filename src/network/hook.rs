// ABOUTME: OCI runtime hook run by the shim around a CNI-networked container.
// ABOUTME: createRuntime attaches networks and publishes hosts entries; postStop undoes both.

use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use super::NetworkError;
use super::cni::{Attachment, CniEnv};
use super::options::{NetworkMode, NetworkingOptions};
use crate::container::labels::keys;
use crate::store::{HostsMeta, HostsStore};

/// Lifecycle point the hook was invoked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    CreateRuntime,
    PostStop,
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookEvent::CreateRuntime => "createRuntime",
            HookEvent::PostStop => "postStop",
        })
    }
}

impl FromStr for HookEvent {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createRuntime" => Ok(HookEvent::CreateRuntime),
            "postStop" => Ok(HookEvent::PostStop),
            other => Err(NetworkError::InvalidOptions(format!(
                "unexpected hook event {:?}",
                other
            ))),
        }
    }
}

/// The container state document the runtime writes to hook stdin.
#[derive(Debug, Deserialize)]
struct OciState {
    id: String,
    #[serde(default)]
    pid: u32,
    #[serde(default)]
    annotations: HashMap<String, String>,
}

struct HookTarget {
    id: String,
    pid: u32,
    namespace: String,
    name: Option<String>,
    hostname: String,
    pid_file: Option<String>,
    options: NetworkingOptions,
    networks: Vec<String>,
}

impl HookTarget {
    fn parse(state: &str) -> Result<Self, NetworkError> {
        let state: OciState = serde_json::from_str(state).map_err(|e| {
            NetworkError::InvalidOptions(format!("invalid container state on stdin: {}", e))
        })?;
        let annotation = |key: &str| state.annotations.get(key).filter(|v| !v.is_empty()).cloned();

        let options: NetworkingOptions = match annotation(keys::NETWORKING) {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                NetworkError::InvalidOptions(format!("invalid {} annotation: {}", keys::NETWORKING, e))
            })?,
            None => NetworkingOptions::default(),
        };
        let networks = match options.mode()? {
            NetworkMode::Cni(networks) => networks,
            _ => Vec::new(),
        };

        Ok(Self {
            namespace: annotation(keys::NAMESPACE).unwrap_or_else(|| "default".to_string()),
            name: annotation(keys::NAME),
            hostname: annotation(keys::HOSTNAME).unwrap_or_default(),
            pid_file: annotation(keys::PID_FILE),
            id: state.id,
            pid: state.pid,
            options,
            networks,
        })
    }

    fn attachment(&self, index: usize) -> Attachment {
        let mut capability_args = serde_json::Map::new();
        if !self.options.port_mappings.is_empty() {
            capability_args.insert(
                "portMappings".to_string(),
                serde_json::to_value(&self.options.port_mappings).unwrap_or(Value::Null),
            );
        }
        let ips: Vec<&String> = self
            .options
            .ipv4
            .iter()
            .chain(self.options.ipv6.iter())
            .collect();
        if !ips.is_empty() {
            capability_args.insert("ips".to_string(), json!(ips));
        }
        if let Some(ref mac) = self.options.mac_address {
            capability_args.insert("mac".to_string(), json!(mac));
        }
        Attachment {
            container_id: self.id.clone(),
            netns: format!("/proc/{}/ns/net", self.pid),
            ifname: format!("eth{}", index),
            capability_args,
        }
    }
}

/// Handle one hook invocation with the OCI `state` read from stdin.
pub async fn run_oci_hook(
    event: HookEvent,
    state: &str,
    data_store: &Path,
    cni: &CniEnv,
) -> Result<(), NetworkError> {
    let target = HookTarget::parse(state)?;
    tracing::debug!("oci hook {} for {}", event, target.id);
    match event {
        HookEvent::CreateRuntime => create_runtime(&target, data_store, cni).await,
        HookEvent::PostStop => post_stop(&target, data_store, cni).await,
    }
}

async fn create_runtime(
    target: &HookTarget,
    data_store: &Path,
    cni: &CniEnv,
) -> Result<(), NetworkError> {
    if target.pid == 0 {
        return Err(NetworkError::InvalidOptions(
            "container state carries no pid".to_string(),
        ));
    }

    let mut attached: Vec<(usize, &String)> = Vec::new();
    let mut addresses = BTreeMap::new();
    for (index, network) in target.networks.iter().enumerate() {
        match cni.add(network, &target.attachment(index)).await {
            Ok(result) => {
                attached.push((index, network));
                addresses.insert(network.clone(), result.ips);
            }
            Err(e) => {
                for (index, network) in attached.into_iter().rev() {
                    if let Err(del) = cni.del(network, &target.attachment(index)).await {
                        tracing::warn!("rollback of network {} failed: {}", network, del);
                    }
                }
                return Err(e);
            }
        }
    }

    let meta = HostsMeta {
        id: target.id.clone(),
        hostname: target.hostname.clone(),
        name: target.name.clone(),
        networks: addresses,
        extra_hosts: target.options.extra_hosts()?.into_iter().collect(),
    };
    HostsStore::new(data_store, &target.namespace)?.acquire(&meta)?;

    if let Some(ref pid_file) = target.pid_file {
        std::fs::write(pid_file, target.pid.to_string())
            .map_err(|e| NetworkError::io(format!("failed to write pid file {}", pid_file), e))?;
    }
    Ok(())
}

async fn post_stop(
    target: &HookTarget,
    data_store: &Path,
    cni: &CniEnv,
) -> Result<(), NetworkError> {
    for (index, network) in target.networks.iter().enumerate().rev() {
        if let Err(e) = cni.del(network, &target.attachment(index)).await {
            tracing::warn!("failed to detach {} from {}: {}", target.id, network, e);
        }
    }
    HostsStore::new(data_store, &target.namespace)?.release(&target.id)?;
    Ok(())
}
