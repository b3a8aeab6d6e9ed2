// ABOUTME: CNI environment: network configuration lists on disk plus plugin invocation.
// ABOUTME: Synthesizes the default bridge network and runs ADD/DEL chains per the CNI protocol.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

use super::NetworkError;
use super::options::DEFAULT_NETWORK;

pub const CNI_VERSION: &str = "1.0.0";
pub const DEFAULT_BRIDGE: &str = "highk0";
pub const DEFAULT_SUBNET: &str = "10.4.0.0/24";
const FILE_PREFIX: &str = "highk-";

/// A network known to the CNI environment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkConfig {
    pub name: String,
    /// Backing file; `None` for the built-in default network.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(rename = "Config")]
    pub conflist: Value,
}

impl NetworkConfig {
    fn plugins(&self) -> Vec<Value> {
        self.conflist["plugins"]
            .as_array()
            .cloned()
            .unwrap_or_default()
    }

    /// Type of the first plugin in the chain.
    pub fn main_plugin(&self) -> Option<String> {
        self.plugins()
            .first()
            .and_then(|p| p["type"].as_str())
            .map(String::from)
    }

    /// Labels recorded under `highk.labels` in the conflist.
    pub fn labels(&self) -> BTreeMap<String, String> {
        serde_json::from_value(self.conflist["highk.labels"].clone()).unwrap_or_default()
    }

    pub fn subnets(&self) -> Vec<String> {
        let mut subnets = Vec::new();
        for plugin in self.plugins() {
            if let Some(ranges) = plugin["ipam"]["ranges"].as_array() {
                for range in ranges.iter().filter_map(Value::as_array).flatten() {
                    if let Some(subnet) = range["subnet"].as_str() {
                        subnets.push(subnet.to_string());
                    }
                }
            }
        }
        subnets
    }
}

/// Options for `network create`.
#[derive(Debug, Clone, Default)]
pub struct CreateNetworkOptions {
    pub name: String,
    /// bridge, macvlan or ipvlan.
    pub driver: String,
    pub subnet: Option<String>,
    pub gateway: Option<String>,
    /// Parent interface for macvlan and ipvlan.
    pub parent: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// Networks found in the netconf directory and the plugin search path.
#[derive(Debug, Clone)]
pub struct CniEnv {
    pub plugin_path: PathBuf,
    pub netconf_path: PathBuf,
    networks: BTreeMap<String, NetworkConfig>,
}

fn json_error(path: &Path, source: serde_json::Error) -> NetworkError {
    NetworkError::MalformedConfig {
        path: path.to_path_buf(),
        source,
    }
}

pub fn default_bridge_conflist() -> Value {
    bridge_conflist(DEFAULT_NETWORK, DEFAULT_BRIDGE, DEFAULT_SUBNET, None)
}

fn bridge_conflist(name: &str, bridge: &str, subnet: &str, gateway: Option<&str>) -> Value {
    let mut range = json!({ "subnet": subnet });
    if let Some(gateway) = gateway {
        range["gateway"] = json!(gateway);
    }
    json!({
        "cniVersion": CNI_VERSION,
        "name": name,
        "plugins": [
            {
                "type": "bridge",
                "bridge": bridge,
                "isGateway": true,
                "ipMasq": true,
                "hairpinMode": true,
                "ipam": {
                    "type": "host-local",
                    "ranges": [[range]],
                    "routes": [{ "dst": "0.0.0.0/0" }]
                }
            },
            { "type": "portmap", "capabilities": { "portMappings": true } },
            { "type": "firewall" },
            { "type": "tuning" }
        ]
    })
}

impl CniEnv {
    /// Load `*.conflist`, `*.conf` and `*.json` from `netconf_path`.
    pub fn load(plugin_path: &Path, netconf_path: &Path) -> Result<Self, NetworkError> {
        let mut networks = BTreeMap::new();

        let mut files: Vec<PathBuf> = match std::fs::read_dir(netconf_path) {
            Ok(entries) => entries.flatten().map(|e| e.path()).collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(NetworkError::io(
                    format!("failed to read {}", netconf_path.display()),
                    e,
                ));
            }
        };
        files.sort();

        for file in files {
            let ext = file.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !matches!(ext, "conflist" | "conf" | "json") {
                continue;
            }
            let data = std::fs::read(&file)
                .map_err(|e| NetworkError::io(format!("failed to read {}", file.display()), e))?;
            let mut value: Value =
                serde_json::from_slice(&data).map_err(|e| json_error(&file, e))?;

            if ext != "conflist" && value.get("plugins").is_none() {
                // Single plugin configuration; wrap it into a list
                let name = value["name"].clone();
                let version = value["cniVersion"].clone();
                value = json!({ "cniVersion": version, "name": name, "plugins": [value] });
            }

            let Some(name) = value["name"].as_str().map(String::from) else {
                tracing::warn!("ignoring CNI config {} without a name", file.display());
                continue;
            };
            if networks.contains_key(&name) {
                tracing::warn!("duplicate CNI network {} in {}", name, file.display());
                continue;
            }
            networks.insert(
                name.clone(),
                NetworkConfig {
                    name,
                    file: Some(file),
                    conflist: value,
                },
            );
        }

        networks
            .entry(DEFAULT_NETWORK.to_string())
            .or_insert_with(|| NetworkConfig {
                name: DEFAULT_NETWORK.to_string(),
                file: None,
                conflist: default_bridge_conflist(),
            });

        Ok(Self {
            plugin_path: plugin_path.to_path_buf(),
            netconf_path: netconf_path.to_path_buf(),
            networks,
        })
    }

    pub fn get(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks.get(name)
    }

    pub fn networks(&self) -> impl Iterator<Item = &NetworkConfig> {
        self.networks.values()
    }

    fn free_subnet(&self) -> Result<String, NetworkError> {
        let used: Vec<String> = self.networks.values().flat_map(|n| n.subnets()).collect();
        (1..=255u16)
            .map(|n| format!("10.4.{}.0/24", n))
            .find(|s| !used.contains(s))
            .ok_or_else(|| NetworkError::InvalidOptions("no free subnet under 10.4.0.0/16".into()))
    }

    /// Write `highk-<name>.conflist` for a new network.
    pub fn create_network(
        &mut self,
        opts: &CreateNetworkOptions,
    ) -> Result<NetworkConfig, NetworkError> {
        crate::types::validate_identifier(&opts.name)
            .map_err(|e| NetworkError::InvalidOptions(e.to_string()))?;
        if matches!(opts.name.as_str(), "host" | "none") || self.networks.contains_key(&opts.name)
        {
            return Err(NetworkError::NetworkExists(opts.name.clone()));
        }

        let subnet = match opts.subnet {
            Some(ref subnet) => subnet.clone(),
            None => self.free_subnet()?,
        };
        let id = hex::encode(Sha256::digest(opts.name.as_bytes()));

        let mut conflist = match opts.driver.as_str() {
            "" | "bridge" => bridge_conflist(
                &opts.name,
                &format!("br-{}", &id[..12]),
                &subnet,
                opts.gateway.as_deref(),
            ),
            driver @ ("macvlan" | "ipvlan") => {
                let mut range = json!({ "subnet": subnet });
                if let Some(ref gateway) = opts.gateway {
                    range["gateway"] = json!(gateway);
                }
                let mut plugin = json!({
                    "type": driver,
                    "ipam": { "type": "host-local", "ranges": [[range]] }
                });
                if let Some(ref parent) = opts.parent {
                    plugin["master"] = json!(parent);
                }
                json!({ "cniVersion": CNI_VERSION, "name": opts.name, "plugins": [plugin] })
            }
            other => {
                return Err(NetworkError::InvalidOptions(format!(
                    "unsupported network driver {:?}",
                    other
                )));
            }
        };
        conflist["highk.id"] = json!(id);
        if !opts.labels.is_empty() {
            conflist["highk.labels"] = json!(opts.labels);
        }

        std::fs::create_dir_all(&self.netconf_path).map_err(|e| {
            NetworkError::io(
                format!("failed to create {}", self.netconf_path.display()),
                e,
            )
        })?;
        let file = self
            .netconf_path
            .join(format!("{}{}.conflist", FILE_PREFIX, opts.name));
        let data = serde_json::to_vec_pretty(&conflist).map_err(|e| json_error(&file, e))?;
        std::fs::write(&file, data)
            .map_err(|e| NetworkError::io(format!("failed to write {}", file.display()), e))?;

        let network = NetworkConfig {
            name: opts.name.clone(),
            file: Some(file),
            conflist,
        };
        self.networks.insert(opts.name.clone(), network.clone());
        tracing::debug!("created network {}", opts.name);
        Ok(network)
    }

    /// Delete the configuration file of `name`. Callers check usage first.
    pub fn remove_network(&mut self, name: &str) -> Result<(), NetworkError> {
        let network = self
            .networks
            .get(name)
            .ok_or_else(|| NetworkError::UnknownNetwork(name.to_string()))?;
        let Some(ref file) = network.file else {
            return Err(NetworkError::InvalidOptions(format!(
                "{} is the default network and cannot be removed",
                name
            )));
        };
        if name == DEFAULT_NETWORK {
            return Err(NetworkError::InvalidOptions(format!(
                "{} is the default network and cannot be removed",
                name
            )));
        }
        std::fs::remove_file(file)
            .map_err(|e| NetworkError::io(format!("failed to remove {}", file.display()), e))?;
        self.networks.remove(name);
        Ok(())
    }

    /// Run the plugin chain of `network` for one container interface.
    pub async fn add(
        &self,
        network: &str,
        attachment: &Attachment,
    ) -> Result<AddResult, NetworkError> {
        let config = self
            .get(network)
            .ok_or_else(|| NetworkError::UnknownNetwork(network.to_string()))?;

        let mut prev_result: Option<Value> = None;
        for plugin in config.plugins() {
            let conf = plugin_conf(config, &plugin, attachment, prev_result.as_ref());
            let output = self.exec_plugin(&plugin, "ADD", attachment, &conf).await?;
            if !output.is_null() {
                prev_result = Some(output);
            }
        }
        Ok(AddResult::from_result(prev_result.unwrap_or(Value::Null)))
    }

    /// Run the plugin chain of `network` in reverse with DEL.
    pub async fn del(&self, network: &str, attachment: &Attachment) -> Result<(), NetworkError> {
        let config = self
            .get(network)
            .ok_or_else(|| NetworkError::UnknownNetwork(network.to_string()))?;

        let mut errors = Vec::new();
        for plugin in config.plugins().iter().rev() {
            let conf = plugin_conf(config, plugin, attachment, None);
            if let Err(e) = self.exec_plugin(plugin, "DEL", attachment, &conf).await {
                tracing::warn!("CNI DEL for {} on {}: {}", attachment.container_id, network, e);
                errors.push(e);
            }
        }
        match errors.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn exec_plugin(
        &self,
        plugin: &Value,
        command: &str,
        attachment: &Attachment,
        conf: &Value,
    ) -> Result<Value, NetworkError> {
        let plugin_type = plugin["type"].as_str().unwrap_or_default().to_string();
        let binary = self.plugin_path.join(&plugin_type);
        if plugin_type.is_empty() || !binary.is_file() {
            return Err(NetworkError::PluginNotFound {
                plugin: plugin_type,
                path: self.plugin_path.clone(),
            });
        }

        let stdin = serde_json::to_vec(conf).map_err(|e| json_error(&binary, e))?;
        tracing::debug!("CNI {} {} for {}", command, plugin_type, attachment.container_id);

        let mut child = tokio::process::Command::new(&binary)
            .env("CNI_COMMAND", command)
            .env("CNI_CONTAINERID", &attachment.container_id)
            .env("CNI_NETNS", &attachment.netns)
            .env("CNI_IFNAME", &attachment.ifname)
            .env("CNI_PATH", &self.plugin_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| NetworkError::io(format!("failed to run {}", binary.display()), e))?;

        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(&stdin).await.map_err(|e| {
                NetworkError::io(format!("failed to write to {}", binary.display()), e)
            })?;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| NetworkError::io(format!("failed to wait for {}", binary.display()), e))?;

        if !output.status.success() {
            let error: PluginError = serde_json::from_slice(&output.stdout).unwrap_or_else(|_| {
                PluginError {
                    code: output.status.code().unwrap_or(-1) as i64,
                    msg: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    details: String::new(),
                }
            });
            return Err(NetworkError::Plugin {
                plugin: plugin_type,
                code: error.code,
                message: if error.details.is_empty() {
                    error.msg
                } else {
                    format!("{}: {}", error.msg, error.details)
                },
            });
        }

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&output.stdout).map_err(|e| json_error(&binary, e))
    }
}

#[derive(Deserialize)]
struct PluginError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    details: String,
}

/// One container interface attached to a network.
#[derive(Debug, Clone, Default)]
pub struct Attachment {
    pub container_id: String,
    pub netns: String,
    pub ifname: String,
    /// Runtime capability arguments, such as `portMappings`, `ips` or `mac`.
    pub capability_args: serde_json::Map<String, Value>,
}

/// Addresses assigned by a successful ADD.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddResult {
    pub ips: Vec<String>,
    pub mac: Option<String>,
}

impl AddResult {
    fn from_result(result: Value) -> Self {
        let ips = result["ips"]
            .as_array()
            .map(|ips| {
                ips.iter()
                    .filter_map(|ip| ip["address"].as_str())
                    .map(|addr| addr.split('/').next().unwrap_or(addr).to_string())
                    .collect()
            })
            .unwrap_or_default();
        let mac = result["interfaces"]
            .as_array()
            .and_then(|ifs| ifs.iter().find(|i| i["sandbox"].is_string()))
            .and_then(|i| i["mac"].as_str())
            .map(String::from);
        Self { ips, mac }
    }
}

/// Per-plugin network configuration passed on stdin.
fn plugin_conf(
    config: &NetworkConfig,
    plugin: &Value,
    attachment: &Attachment,
    prev_result: Option<&Value>,
) -> Value {
    let mut conf = plugin.clone();
    conf["name"] = config.conflist["name"].clone();
    conf["cniVersion"] = config.conflist["cniVersion"].clone();

    let mut runtime_config = serde_json::Map::new();
    if let Some(caps) = plugin["capabilities"].as_object() {
        for (cap, enabled) in caps {
            if enabled.as_bool() == Some(true)
                && let Some(arg) = attachment.capability_args.get(cap)
            {
                runtime_config.insert(cap.clone(), arg.clone());
            }
        }
    }
    if !runtime_config.is_empty() {
        conf["runtimeConfig"] = Value::Object(runtime_config);
    }
    if let Some(prev) = prev_result {
        conf["prevResult"] = prev.clone();
    }
    conf
}
