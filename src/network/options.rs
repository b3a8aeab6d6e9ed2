// ABOUTME: Networking options recorded with each container and the mode they select.
// ABOUTME: The first network picks none, host, container-shared or CNI networking.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::NetworkError;
use super::ports::PortMapping;

pub const DEFAULT_NETWORK: &str = "bridge";

/// Networking options as given on the command line, stored as JSON in a label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingOptions {
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub domainname: String,
    /// `host` to share the host UTS namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uts: Option<String>,
    #[serde(default)]
    pub dns_servers: Vec<String>,
    #[serde(default)]
    pub dns_search: Vec<String>,
    #[serde(default)]
    pub dns_options: Vec<String>,
    /// `host:ip` entries from --add-host.
    #[serde(default)]
    pub add_hosts: Vec<String>,
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
}

/// Networking mode selected by the network list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMode {
    None,
    /// Host network namespace, or the namespace at `netns` for `host:ns:<path>`.
    Host { netns: Option<PathBuf> },
    /// Network namespace of another container.
    Container(String),
    Cni(Vec<String>),
}

impl NetworkingOptions {
    /// Network list with the default applied.
    pub fn effective_networks(&self) -> Vec<String> {
        if self.networks.is_empty() {
            vec![DEFAULT_NETWORK.to_string()]
        } else {
            self.networks.clone()
        }
    }

    pub fn mode(&self) -> Result<NetworkMode, NetworkError> {
        let networks = self.effective_networks();
        let first = networks[0].as_str();

        let single = |mode: &str| {
            if networks.len() > 1 {
                Err(NetworkError::InvalidOptions(format!(
                    "network {:?} cannot be combined with other networks",
                    mode
                )))
            } else {
                Ok(())
            }
        };

        if first == "none" {
            single(first)?;
            return Ok(NetworkMode::None);
        }
        if first == "host" {
            single(first)?;
            return Ok(NetworkMode::Host { netns: None });
        }
        if let Some(rest) = first.strip_prefix("host:").or_else(|| {
            first.starts_with("ns:").then_some(first)
        }) {
            single(first)?;
            let path = rest.strip_prefix("ns:").ok_or_else(|| {
                NetworkError::InvalidOptions(format!("invalid host network {:?}", first))
            })?;
            return Ok(NetworkMode::Host {
                netns: Some(PathBuf::from(path)),
            });
        }
        if let Some(target) = first.strip_prefix("container:") {
            if networks.len() > 1 {
                return Err(NetworkError::InvalidOptions(
                    "only one container network can be specified".to_string(),
                ));
            }
            if target.is_empty() {
                return Err(NetworkError::InvalidOptions(
                    "container network needs a container reference".to_string(),
                ));
            }
            return Ok(NetworkMode::Container(target.to_string()));
        }

        for network in &networks {
            if network == "none"
                || network == "host"
                || network.starts_with("host:")
                || network.starts_with("container:")
            {
                return Err(NetworkError::InvalidOptions(format!(
                    "network {:?} cannot be combined with other networks",
                    network
                )));
            }
        }
        Ok(NetworkMode::Cni(networks))
    }

    pub fn uts_is_host(&self) -> bool {
        self.uts.as_deref() == Some("host")
    }

    /// UTS=host forbids setting hostname or domainname.
    pub fn verify_uts(&self) -> Result<(), NetworkError> {
        if let Some(ref uts) = self.uts
            && uts != "host"
            && !uts.is_empty()
        {
            return Err(NetworkError::InvalidOptions(format!(
                "unknown UTS mode {:?}",
                uts
            )));
        }
        if self.uts_is_host() && (!self.hostname.is_empty() || !self.domainname.is_empty()) {
            return Err(NetworkError::InvalidOptions(
                "conflicting options: hostname and domainname cannot be set with UTS=host"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Parsed `--add-host` entries.
    pub fn extra_hosts(&self) -> Result<Vec<(String, String)>, NetworkError> {
        self.add_hosts
            .iter()
            .map(|entry| {
                entry
                    .split_once(':')
                    .filter(|(host, ip)| !host.is_empty() && !ip.is_empty())
                    .map(|(host, ip)| (host.to_string(), ip.to_string()))
                    .ok_or_else(|| {
                        NetworkError::InvalidOptions(format!("invalid --add-host {:?}", entry))
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(networks: &[&str]) -> NetworkingOptions {
        NetworkingOptions {
            networks: networks.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn default_network_is_bridge() {
        assert_eq!(
            opts(&[]).mode().unwrap(),
            NetworkMode::Cni(vec!["bridge".to_string()])
        );
    }

    #[test]
    fn first_network_selects_mode() {
        assert_eq!(opts(&["none"]).mode().unwrap(), NetworkMode::None);
        assert_eq!(
            opts(&["host"]).mode().unwrap(),
            NetworkMode::Host { netns: None }
        );
        assert_eq!(
            opts(&["host:ns:/run/netns/x"]).mode().unwrap(),
            NetworkMode::Host {
                netns: Some(PathBuf::from("/run/netns/x"))
            }
        );
        assert_eq!(
            opts(&["container:web"]).mode().unwrap(),
            NetworkMode::Container("web".to_string())
        );
    }

    #[test]
    fn special_modes_do_not_mix() {
        assert!(opts(&["host", "bridge"]).mode().is_err());
        assert!(opts(&["bridge", "none"]).mode().is_err());
        assert!(opts(&["container:a", "container:b"]).mode().is_err());
    }

    #[test]
    fn uts_host_forbids_hostname() {
        let mut o = opts(&[]);
        o.uts = Some("host".to_string());
        assert!(o.verify_uts().is_ok());
        o.hostname = "web".to_string();
        assert!(o.verify_uts().is_err());
    }

    #[test]
    fn add_host_needs_host_and_ip() {
        let mut o = opts(&[]);
        o.add_hosts = vec!["db:10.0.0.2".to_string()];
        assert_eq!(
            o.extra_hosts().unwrap(),
            vec![("db".to_string(), "10.0.0.2".to_string())]
        );
        o.add_hosts = vec!["db".to_string()];
        assert!(o.extra_hosts().is_err());
    }
}
