// ABOUTME: Builds resolv.conf, /etc/hostname and hosts seed files for containers.
// ABOUTME: Explicit DNS settings win over the host's resolv.conf, which wins over public defaults.

use std::fs::{OpenOptions, Permissions};
use std::io::Write;
use std::net::IpAddr;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use super::NetworkError;

pub const HOST_RESOLV_CONF: &str = "/etc/resolv.conf";
pub const HOST_HOSTS: &str = "/etc/hosts";

const DEFAULT_NAMESERVERS: [&str; 2] = ["8.8.8.8", "8.8.4.4"];

/// Seed for newly allocated hosts files.
pub const HOSTS_SEED: &str = "127.0.0.1\tlocalhost localhost.localdomain\n::1\tlocalhost localhost.localdomain\n";

#[derive(Debug, Default, PartialEq, Eq)]
struct ResolvConf {
    nameservers: Vec<String>,
    search: Vec<String>,
    options: Vec<String>,
}

fn parse_resolv(content: &str) -> ResolvConf {
    let mut conf = ResolvConf::default();
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("nameserver") => conf.nameservers.extend(fields.next().map(String::from)),
            Some("search") | Some("domain") => {
                conf.search = fields.map(String::from).collect();
            }
            Some("options") => conf.options.extend(fields.map(String::from)),
            _ => {}
        }
    }
    conf
}

fn is_localhost(server: &str) -> bool {
    server
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// resolv.conf content for a container.
pub fn resolv_contents(
    host: Option<&str>,
    servers: &[String],
    search: &[String],
    options: &[String],
) -> String {
    let host = host.map(parse_resolv).unwrap_or_default();

    let nameservers: Vec<String> = if !servers.is_empty() {
        servers.to_vec()
    } else {
        let filtered: Vec<String> = host
            .nameservers
            .into_iter()
            .filter(|s| !is_localhost(s))
            .collect();
        if filtered.is_empty() {
            DEFAULT_NAMESERVERS.iter().map(|s| s.to_string()).collect()
        } else {
            filtered
        }
    };
    let search = if search.is_empty() {
        host.search
    } else {
        search.to_vec()
    };
    let options = if options.is_empty() {
        host.options
    } else {
        options.to_vec()
    };

    let mut content = String::new();
    if !search.is_empty() && search != ["."] {
        content.push_str(&format!("search {}\n", search.join(" ")));
    }
    for server in &nameservers {
        content.push_str(&format!("nameserver {}\n", server));
    }
    if !options.is_empty() {
        content.push_str(&format!("options {}\n", options.join(" ")));
    }
    content
}

/// Write a container resolv.conf at `path`, merging the host's settings.
pub fn build_resolv(
    path: &Path,
    servers: &[String],
    search: &[String],
    options: &[String],
) -> Result<(), NetworkError> {
    let host = match std::fs::read_to_string(HOST_RESOLV_CONF) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(NetworkError::io(
                format!("failed to read {}", HOST_RESOLV_CONF),
                e,
            ));
        }
    };
    let content = resolv_contents(host.as_deref(), servers, search, options);
    write_file(path, content.as_bytes())
}

/// Write `hostname` plus newline to `path` with mode 0644.
pub fn write_etc_hostname(path: &Path, hostname: &str) -> Result<(), NetworkError> {
    write_file(path, format!("{}\n", hostname).as_bytes())
}

fn write_file(path: &Path, content: &[u8]) -> Result<(), NetworkError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .map_err(|e| NetworkError::io(format!("failed to open {}", path.display()), e))?;
    file.write_all(content)
        .map_err(|e| NetworkError::io(format!("failed to write {}", path.display()), e))?;
    // umask may have narrowed the creation mode
    std::fs::set_permissions(path, Permissions::from_mode(0o644))
        .map_err(|e| NetworkError::io(format!("failed to chmod {}", path.display()), e))
}

/// Copy a host file such as /etc/hosts into the container state directory.
pub fn copy_host_file(src: &Path, dst: &Path) -> Result<(), NetworkError> {
    let content = std::fs::read(src)
        .map_err(|e| NetworkError::io(format!("failed to read {}", src.display()), e))?;
    write_file(dst, &content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "# generated\nnameserver 127.0.0.53\nnameserver 10.0.0.1\nsearch corp.example\noptions edns0\n";

    #[test]
    fn explicit_values_win() {
        let content = resolv_contents(
            Some(HOST),
            &["1.1.1.1".to_string()],
            &["svc.local".to_string()],
            &["ndots:2".to_string()],
        );
        assert_eq!(
            content,
            "search svc.local\nnameserver 1.1.1.1\noptions ndots:2\n"
        );
    }

    #[test]
    fn host_values_drop_localhost_servers() {
        let content = resolv_contents(Some(HOST), &[], &[], &[]);
        assert_eq!(
            content,
            "search corp.example\nnameserver 10.0.0.1\noptions edns0\n"
        );
    }

    #[test]
    fn defaults_when_host_only_has_localhost() {
        let content = resolv_contents(Some("nameserver 127.0.0.1\n"), &[], &[], &[]);
        assert_eq!(content, "nameserver 8.8.8.8\nnameserver 8.8.4.4\n");
        let content = resolv_contents(None, &[], &[], &[]);
        assert_eq!(content, "nameserver 8.8.8.8\nnameserver 8.8.4.4\n");
    }

    #[test]
    fn hostname_file_is_world_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostname");
        write_etc_hostname(&path, "web").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "web\n");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn copy_fails_for_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        assert!(copy_host_file(&dir.path().join("nope"), &dir.path().join("dst")).is_err());
    }
}
