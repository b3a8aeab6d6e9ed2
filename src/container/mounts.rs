// ABOUTME: Parses -v volume arguments into bind mounts and named or anonymous volumes.
// ABOUTME: Image-declared volumes become anonymous volumes unless a user mount covers them.

use oci_spec::runtime::Mount;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::labels::MountPoint;
use crate::error::{Error, Result};
use crate::store::VolumeStore;

const PROPAGATIONS: &[&str] = &["private", "rprivate", "shared", "rshared", "slave", "rslave"];

/// Where a -v argument takes its content from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSource {
    /// Fresh anonymous volume.
    Anonymous,
    Named(String),
    Bind(PathBuf),
}

/// A parsed -v argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub source: VolumeSource,
    pub destination: String,
    pub readonly: bool,
    pub propagation: Option<String>,
    /// Options as given, for `inspect`.
    pub mode: String,
}

/// Parse `[src:]dst[:opts]`.
pub fn parse_volume(arg: &str) -> Result<VolumeSpec> {
    let invalid = |why: &str| Error::InvalidArgument(format!("invalid volume {:?}: {}", arg, why));
    let parts: Vec<&str> = arg.split(':').collect();
    let (source, destination, mode) = match parts.as_slice() {
        [dst] => (None, *dst, ""),
        [src, dst] if dst.starts_with('/') => (Some(*src), *dst, ""),
        [dst, mode] => (None, *dst, *mode),
        [src, dst, mode] => (Some(*src), *dst, *mode),
        _ => return Err(invalid("too many colons")),
    };
    if !destination.starts_with('/') {
        return Err(invalid("destination must be an absolute path"));
    }
    if destination == "/" {
        return Err(invalid("destination cannot be /"));
    }

    let mut readonly = false;
    let mut propagation = None;
    for opt in mode.split(',').filter(|o| !o.is_empty()) {
        match opt {
            "ro" => readonly = true,
            "rw" => readonly = false,
            // SELinux relabeling is left to the runtime
            "z" | "Z" => {}
            p if PROPAGATIONS.contains(&p) => propagation = Some(p.to_string()),
            other => return Err(invalid(&format!("unknown option {:?}", other))),
        }
    }

    let source = match source {
        None => VolumeSource::Anonymous,
        Some(src) if src.starts_with('/') || src.starts_with('.') => {
            VolumeSource::Bind(PathBuf::from(src))
        }
        Some("") => return Err(invalid("empty source")),
        Some(name) => VolumeSource::Named(name.to_string()),
    };

    Ok(VolumeSpec {
        source,
        destination: destination.to_string(),
        readonly,
        propagation,
        mode: mode.to_string(),
    })
}

/// Mounts resolved for one container.
#[derive(Debug, Clone, Default)]
pub struct ResolvedMounts {
    pub oci: Vec<Mount>,
    pub points: Vec<MountPoint>,
    /// Anonymous volumes created for this container.
    pub anonymous: Vec<String>,
}

/// Resolve -v arguments plus image volumes, creating volumes on demand.
pub fn resolve_mounts(
    volumes: &VolumeStore,
    args: &[String],
    image_volumes: &[String],
) -> Result<ResolvedMounts> {
    let mut specs = args
        .iter()
        .map(|a| parse_volume(a))
        .collect::<Result<Vec<_>>>()?;
    for destination in image_volumes {
        if !specs.iter().any(|s| &s.destination == destination) {
            specs.push(VolumeSpec {
                source: VolumeSource::Anonymous,
                destination: destination.clone(),
                readonly: false,
                propagation: None,
                mode: String::new(),
            });
        }
    }

    let mut resolved = ResolvedMounts::default();
    for spec in specs {
        let (typ, name, source) = match spec.source {
            VolumeSource::Anonymous => {
                let volume = volumes.create(None, BTreeMap::new())?;
                resolved.anonymous.push(volume.name.clone());
                ("volume", volume.name, volume.mountpoint)
            }
            VolumeSource::Named(ref name) => {
                let volume = volumes.create(Some(name), BTreeMap::new())?;
                ("volume", volume.name, volume.mountpoint)
            }
            VolumeSource::Bind(ref path) => {
                let path = std::path::absolute(path).map_err(Error::Io)?;
                if !path.exists() {
                    std::fs::create_dir_all(&path).map_err(Error::Io)?;
                }
                ("bind", String::new(), path)
            }
        };

        let propagation = spec.propagation.clone().unwrap_or_else(|| "rprivate".to_string());
        let mut oci = Mount::default();
        oci.set_destination(PathBuf::from(&spec.destination))
            .set_typ(Some("bind".to_string()))
            .set_source(Some(source.clone()))
            .set_options(Some(vec![
                "rbind".to_string(),
                propagation.clone(),
                if spec.readonly { "ro" } else { "rw" }.to_string(),
            ]));
        resolved.oci.push(oci);

        resolved.points.push(MountPoint {
            typ: typ.to_string(),
            name,
            source: source.display().to_string(),
            destination: spec.destination,
            mode: spec.mode,
            rw: !spec.readonly,
            propagation,
        });
    }
    Ok(resolved)
}

/// Host path and read-only flag for each mount, longest destination first.
pub fn mount_table(points: &[MountPoint]) -> Vec<(String, PathBuf, bool)> {
    let mut table: Vec<_> = points
        .iter()
        .map(|p| (p.destination.clone(), Path::new(&p.source).to_path_buf(), !p.rw))
        .collect();
    table.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_argument_shapes() {
        let v = parse_volume("/data").unwrap();
        assert_eq!(v.source, VolumeSource::Anonymous);
        assert_eq!(v.destination, "/data");

        let v = parse_volume("cache:/var/cache:ro").unwrap();
        assert_eq!(v.source, VolumeSource::Named("cache".into()));
        assert!(v.readonly);

        let v = parse_volume("/srv/www:/usr/share/nginx/html:rshared").unwrap();
        assert_eq!(v.source, VolumeSource::Bind(PathBuf::from("/srv/www")));
        assert_eq!(v.propagation.as_deref(), Some("rshared"));

        let v = parse_volume("/data:ro").unwrap();
        assert_eq!(v.source, VolumeSource::Anonymous);
        assert!(v.readonly);
    }

    #[test]
    fn bad_volume_arguments_are_rejected() {
        assert!(parse_volume("relative").is_err());
        assert!(parse_volume("x:/").is_err());
        assert!(parse_volume("x:/y:bogus").is_err());
        assert!(parse_volume("a:/b:ro:extra").is_err());
    }

    #[test]
    fn image_volumes_become_anonymous_unless_covered() {
        let dir = tempfile::tempdir().unwrap();
        let store = VolumeStore::new(dir.path(), "default").unwrap();
        let resolved = resolve_mounts(
            &store,
            &["data:/var/lib/db".to_string()],
            &["/var/lib/db".to_string(), "/logs".to_string()],
        )
        .unwrap();

        assert_eq!(resolved.points.len(), 2);
        assert_eq!(resolved.points[0].name, "data");
        assert_eq!(resolved.anonymous.len(), 1);
        assert_eq!(resolved.points[1].destination, "/logs");
        assert!(store.exists("data"));
        assert!(store.exists(&resolved.anonymous[0]));
    }

    #[test]
    fn bind_sources_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let store = VolumeStore::new(&dir.path().join("store"), "default").unwrap();
        let host = dir.path().join("host/sub");
        let arg = format!("{}:/mnt:ro", host.display());
        let resolved = resolve_mounts(&store, &[arg], &[]).unwrap();
        assert!(host.is_dir());
        assert_eq!(resolved.points[0].typ, "bind");
        assert!(!resolved.points[0].rw);
    }
}
