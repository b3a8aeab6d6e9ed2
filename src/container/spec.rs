// ABOUTME: OCI runtime spec assembly for new containers.
// ABOUTME: Process, mounts, namespace joins, hooks and the annotations the OCI hook reads.

use oci_spec::runtime::{
    LinuxNamespace, LinuxNamespaceBuilder, LinuxNamespaceType, Mount, Spec, User,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::network::{NamespaceJoin, SpecFragments};

const DEFAULT_PATH: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// A bind mount of `source` at `destination`.
pub fn bind_mount(source: &Path, destination: &str, readonly: bool) -> Mount {
    let mut options = vec!["rbind".to_string(), "rprivate".to_string()];
    options.push(if readonly { "ro" } else { "rw" }.to_string());
    let mut mount = Mount::default();
    mount
        .set_destination(PathBuf::from(destination))
        .set_typ(Some("bind".to_string()))
        .set_source(Some(source.to_path_buf()))
        .set_options(Some(options));
    mount
}

/// Process and filesystem settings of a new container.
#[derive(Debug, Clone, Default)]
pub struct SpecOptions {
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
    pub user: String,
    pub terminal: bool,
    pub read_only: bool,
    pub mounts: Vec<Mount>,
    pub annotations: HashMap<String, String>,
}

/// `uid[:gid]`, numeric or `root`.
pub fn parse_user(user: &str) -> Result<(u32, u32)> {
    if user.is_empty() {
        return Ok((0, 0));
    }
    let (uid, gid) = match user.split_once(':') {
        Some((uid, gid)) => (uid, Some(gid)),
        None => (user, None),
    };
    let id = |s: &str| -> Result<u32> {
        if s == "root" {
            return Ok(0);
        }
        s.parse().map_err(|_| {
            Error::InvalidArgument(format!(
                "user {:?} must be numeric (uid[:gid]) or root",
                user
            ))
        })
    };
    let uid = id(uid)?;
    let gid = match gid {
        Some(gid) => id(gid)?,
        None => uid,
    };
    Ok((uid, gid))
}

/// Build the spec for a container from `options` and the networking fragments.
pub fn build_spec(options: &SpecOptions, fragments: &SpecFragments) -> Result<Spec> {
    let mut spec = Spec::default();

    let (uid, gid) = parse_user(&options.user)?;
    let mut user = User::default();
    user.set_uid(uid).set_gid(gid);

    let mut env = options.env.clone();
    if !env.iter().any(|e| e.starts_with("PATH=")) {
        env.insert(0, DEFAULT_PATH.to_string());
    }
    if !fragments.hostname.is_empty() && !env.iter().any(|e| e.starts_with("HOSTNAME=")) {
        env.push(format!("HOSTNAME={}", fragments.hostname));
    }
    if options.terminal && !env.iter().any(|e| e.starts_with("TERM=")) {
        env.push("TERM=xterm".to_string());
    }

    let mut process = spec.process().clone().unwrap_or_default();
    process
        .set_args(Some(options.args.clone()))
        .set_env(Some(env))
        .set_cwd(PathBuf::from(if options.cwd.is_empty() {
            "/"
        } else {
            &options.cwd
        }))
        .set_terminal(Some(options.terminal))
        .set_user(user);
    spec.set_process(Some(process));

    if let Some(mut root) = spec.root().clone() {
        root.set_readonly(Some(options.read_only));
        spec.set_root(Some(root));
    }

    let mut mounts = options.mounts.clone();
    mounts.extend(fragments.mounts.iter().cloned());
    set_mounts(&mut spec, mounts);

    spec.set_annotations(Some(options.annotations.clone()));
    apply_fragments(&mut spec, fragments)?;
    Ok(spec)
}

/// Add `mounts`, replacing defaults at the same destinations.
pub fn set_mounts(spec: &mut Spec, mounts: Vec<Mount>) {
    let mut all: Vec<Mount> = spec
        .mounts()
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|m| !mounts.iter().any(|n| n.destination() == m.destination()))
        .collect();
    all.extend(mounts);
    spec.set_mounts(Some(all));
}

/// Hostname, network and UTS namespaces, and hooks from networking.
pub fn apply_fragments(spec: &mut Spec, fragments: &SpecFragments) -> Result<()> {
    spec.set_hostname((!fragments.hostname.is_empty()).then(|| fragments.hostname.clone()));
    spec.set_domainname((!fragments.domainname.is_empty()).then(|| fragments.domainname.clone()));

    match fragments.network_namespace {
        NamespaceJoin::New => set_namespace(spec, LinuxNamespaceType::Network, None)?,
        NamespaceJoin::Host => remove_namespace(spec, LinuxNamespaceType::Network),
        NamespaceJoin::Path(ref path) => {
            set_namespace(spec, LinuxNamespaceType::Network, Some(path.clone()))?
        }
    }
    if fragments.uts_host {
        remove_namespace(spec, LinuxNamespaceType::Uts);
    } else {
        set_namespace(spec, LinuxNamespaceType::Uts, None)?;
    }

    spec.set_hooks(fragments.hooks.clone());
    Ok(())
}

fn namespaces(spec: &Spec) -> Vec<LinuxNamespace> {
    spec.linux()
        .as_ref()
        .and_then(|l| l.namespaces().clone())
        .unwrap_or_default()
}

fn store_namespaces(spec: &mut Spec, namespaces: Vec<LinuxNamespace>) {
    let mut linux = spec.linux().clone().unwrap_or_default();
    linux.set_namespaces(Some(namespaces));
    spec.set_linux(Some(linux));
}

/// Use a new namespace of `typ`, or join the one at `path`.
pub fn set_namespace(spec: &mut Spec, typ: LinuxNamespaceType, path: Option<PathBuf>) -> Result<()> {
    let mut builder = LinuxNamespaceBuilder::default().typ(typ);
    if let Some(path) = path {
        builder = builder.path(path);
    }
    let namespace = builder
        .build()
        .map_err(|e| Error::InvalidArgument(format!("failed to build namespace: {}", e)))?;

    let mut all = namespaces(spec);
    all.retain(|n| n.typ() != typ);
    all.push(namespace);
    store_namespaces(spec, all);
    Ok(())
}

/// Share the host namespace of `typ`.
pub fn remove_namespace(spec: &mut Spec, typ: LinuxNamespaceType) {
    let mut all = namespaces(spec);
    all.retain(|n| n.typ() != typ);
    store_namespaces(spec, all);
}

/// Path of the namespace of `typ` the spec joins, if any.
pub fn namespace_path(spec: &Spec, typ: LinuxNamespaceType) -> Option<PathBuf> {
    namespaces(spec)
        .into_iter()
        .find(|n| n.typ() == typ)
        .and_then(|n| n.path().clone())
}

/// Whether the spec has its own namespace of `typ`.
pub fn has_namespace(spec: &Spec, typ: LinuxNamespaceType) -> bool {
    namespaces(spec).iter().any(|n| n.typ() == typ)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> SpecOptions {
        SpecOptions {
            args: vec!["sleep".into(), "10".into()],
            env: vec!["A=1".into()],
            ..Default::default()
        }
    }

    #[test]
    fn users_parse_numeric_and_root() {
        assert_eq!(parse_user("").unwrap(), (0, 0));
        assert_eq!(parse_user("1000").unwrap(), (1000, 1000));
        assert_eq!(parse_user("1000:50").unwrap(), (1000, 50));
        assert_eq!(parse_user("root:0").unwrap(), (0, 0));
        assert!(parse_user("nobody").is_err());
    }

    #[test]
    fn process_gets_args_env_and_defaults() {
        let fragments = SpecFragments {
            hostname: "web".into(),
            ..Default::default()
        };
        let spec = build_spec(&options(), &fragments).unwrap();
        let process = spec.process().as_ref().unwrap();
        assert_eq!(process.args().as_ref().unwrap(), &vec!["sleep".to_string(), "10".to_string()]);
        let env = process.env().as_ref().unwrap();
        assert!(env[0].starts_with("PATH="));
        assert!(env.contains(&"A=1".to_string()));
        assert!(env.contains(&"HOSTNAME=web".to_string()));
        assert_eq!(process.cwd(), Path::new("/"));
        assert_eq!(spec.hostname().as_deref(), Some("web"));
    }

    #[test]
    fn host_networking_drops_the_network_namespace() {
        let fragments = SpecFragments {
            network_namespace: NamespaceJoin::Host,
            uts_host: true,
            ..Default::default()
        };
        let spec = build_spec(&options(), &fragments).unwrap();
        assert!(!has_namespace(&spec, LinuxNamespaceType::Network));
        assert!(!has_namespace(&spec, LinuxNamespaceType::Uts));
        assert!(has_namespace(&spec, LinuxNamespaceType::Pid));
    }

    #[test]
    fn joined_namespaces_carry_their_path() {
        let fragments = SpecFragments {
            network_namespace: NamespaceJoin::Path(PathBuf::from("/proc/7/ns/net")),
            ..Default::default()
        };
        let spec = build_spec(&options(), &fragments).unwrap();
        assert_eq!(
            namespace_path(&spec, LinuxNamespaceType::Network),
            Some(PathBuf::from("/proc/7/ns/net"))
        );
    }

    #[test]
    fn user_mounts_replace_defaults_at_the_same_destination() {
        let mut opts = options();
        opts.mounts = vec![bind_mount(Path::new("/srv/shm"), "/dev/shm", false)];
        let spec = build_spec(&opts, &SpecFragments::default()).unwrap();
        let shm: Vec<_> = spec
            .mounts()
            .as_ref()
            .unwrap()
            .iter()
            .filter(|m| m.destination() == Path::new("/dev/shm"))
            .collect();
        assert_eq!(shm.len(), 1);
        assert_eq!(shm[0].source().as_deref(), Some(Path::new("/srv/shm")));
    }
}
