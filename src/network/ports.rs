// ABOUTME: Port publishing specs from -p, mapped to the CNI portMappings capability.
// ABOUTME: Accepts [ip:][hostPort:]containerPort[/proto] with equal-length ranges.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, TcpListener, UdpSocket};

use super::NetworkError;

/// One published port, shaped like a CNI `portMappings` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: String,
    #[serde(rename = "hostIP", default, skip_serializing_if = "String::is_empty")]
    pub host_ip: String,
}

fn invalid(spec: &str, why: &str) -> NetworkError {
    NetworkError::InvalidOptions(format!("invalid port spec {:?}: {}", spec, why))
}

fn parse_range(spec: &str, range: &str) -> Result<(u16, u16), NetworkError> {
    let (start, end) = match range.split_once('-') {
        Some((start, end)) => (start, end),
        None => (range, range),
    };
    let start: u16 = start.parse().map_err(|_| invalid(spec, "bad port number"))?;
    let end: u16 = end.parse().map_err(|_| invalid(spec, "bad port number"))?;
    if start == 0 || end < start {
        return Err(invalid(spec, "bad port range"));
    }
    Ok((start, end))
}

fn free_port(host_ip: &str, protocol: &str) -> Result<u16, NetworkError> {
    let ip: IpAddr = if host_ip.is_empty() {
        IpAddr::from([0, 0, 0, 0])
    } else {
        host_ip
            .parse()
            .map_err(|_| NetworkError::InvalidOptions(format!("invalid host IP {}", host_ip)))?
    };
    let port = match protocol {
        "udp" => UdpSocket::bind((ip, 0)).and_then(|s| s.local_addr()),
        _ => TcpListener::bind((ip, 0)).and_then(|s| s.local_addr()),
    }
    .map_err(|e| NetworkError::io("failed to allocate a host port", e))?
    .port();
    Ok(port)
}

/// Parse one `-p` value into its mappings.
pub fn parse_port_spec(spec: &str) -> Result<Vec<PortMapping>, NetworkError> {
    let (ports, protocol) = match spec.rsplit_once('/') {
        Some((ports, proto)) => (ports, proto.to_ascii_lowercase()),
        None => (spec, "tcp".to_string()),
    };
    if !matches!(protocol.as_str(), "tcp" | "udp" | "sctp") {
        return Err(invalid(spec, "unknown protocol"));
    }

    // IPv6 host addresses come bracketed: [::1]:8080:80
    let (host_ip, rest) = if let Some(stripped) = ports.strip_prefix('[') {
        let (ip, rest) = stripped
            .split_once("]:")
            .ok_or_else(|| invalid(spec, "unterminated IPv6 address"))?;
        (ip.to_string(), rest.to_string())
    } else {
        let parts: Vec<&str> = ports.split(':').collect();
        match parts.as_slice() {
            [_] | [_, _] => (String::new(), ports.to_string()),
            [ip, host, container] => (ip.to_string(), format!("{}:{}", host, container)),
            _ => return Err(invalid(spec, "too many colons")),
        }
    };

    let (host_range, container_range) = match rest.split_once(':') {
        Some((host, container)) => (Some(host), container),
        None => (None, rest.as_str()),
    };
    let (c_start, c_end) = parse_range(spec, container_range)?;

    let host_ports: Vec<u16> = match host_range {
        Some(host) if !host.is_empty() => {
            let (h_start, h_end) = parse_range(spec, host)?;
            if h_end - h_start != c_end - c_start {
                return Err(invalid(spec, "host and container ranges differ in size"));
            }
            (h_start..=h_end).collect()
        }
        _ => (c_start..=c_end)
            .map(|_| free_port(&host_ip, &protocol))
            .collect::<Result<_, _>>()?,
    };

    Ok(host_ports
        .into_iter()
        .zip(c_start..=c_end)
        .map(|(host_port, container_port)| PortMapping {
            host_port,
            container_port,
            protocol: protocol.clone(),
            host_ip: host_ip.clone(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_and_container_ports() {
        let mappings = parse_port_spec("8080:80").unwrap();
        assert_eq!(
            mappings,
            vec![PortMapping {
                host_port: 8080,
                container_port: 80,
                protocol: "tcp".to_string(),
                host_ip: String::new(),
            }]
        );
    }

    #[test]
    fn ip_range_and_protocol() {
        let mappings = parse_port_spec("127.0.0.1:9000-9001:53-54/udp").unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[1].host_port, 9001);
        assert_eq!(mappings[1].container_port, 54);
        assert_eq!(mappings[0].protocol, "udp");
        assert_eq!(mappings[0].host_ip, "127.0.0.1");
    }

    #[test]
    fn bracketed_ipv6_host() {
        let mappings = parse_port_spec("[::1]:8443:443").unwrap();
        assert_eq!(mappings[0].host_ip, "::1");
        assert_eq!(mappings[0].host_port, 8443);
    }

    #[test]
    fn container_port_only_picks_a_host_port() {
        let mappings = parse_port_spec("127.0.0.1::80").unwrap();
        assert_ne!(mappings[0].host_port, 0);
    }

    #[test]
    fn rejects_bad_specs() {
        assert!(parse_port_spec("80/icmp").is_err());
        assert!(parse_port_spec("1-3:80-81").is_err());
        assert!(parse_port_spec("abc").is_err());
        assert!(parse_port_spec("0").is_err());
    }

    #[test]
    fn serializes_as_cni_capability() {
        let json = serde_json::to_value(&parse_port_spec("1.2.3.4:8080:80").unwrap()[0]).unwrap();
        assert_eq!(json["hostPort"], 8080);
        assert_eq!(json["containerPort"], 80);
        assert_eq!(json["hostIP"], "1.2.3.4");
    }
}
