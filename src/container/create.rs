// ABOUTME: Container creation: image, name, state dir, networking, mounts, spec and record.
// ABOUTME: Every step registers its undo so a failure leaves nothing behind.

use chrono::Utc;
use oci_spec::runtime::{LinuxNamespaceType, Spec};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use super::ipc::{self, IpcMode};
use super::labels::{ContainerLabels, LogConfig, keys, validate_user_labels};
use super::mounts::resolve_mounts;
use super::spec::{SpecOptions, bind_mount, build_spec, remove_namespace, set_namespace};
use super::{ContainerManager, DEFAULT_DETACH_KEYS, parse_detach_keys};
use crate::config::{HealthcheckConfig, RestartPolicy, parse_signal, resolve_env};
use crate::error::{Error, Result};
use crate::network::NetworkingOptions;
use crate::runtime::{
    ContainerRecord, DEFAULT_RUNTIME, ImageConfig, ImageInfo, PullPolicy, Runtime, RuntimeServiceError,
};
use crate::types::{ContainerId, ContainerName, ImageRef};

/// Everything `create` and `run` accept.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub image: String,
    /// Arguments after the image; replaces the image CMD when non-empty.
    pub command: Vec<String>,
    /// Replaces the image ENTRYPOINT; an empty list clears it.
    pub entrypoint: Option<Vec<String>>,
    pub name: Option<String>,
    /// `-e` arguments, `KEY=value` or bare `KEY`.
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub workdir: Option<String>,
    pub user: Option<String>,
    pub tty: bool,
    pub interactive: bool,
    pub networking: NetworkingOptions,
    /// `-v` arguments.
    pub volumes: Vec<String>,
    pub restart: RestartPolicy,
    pub stop_signal: Option<String>,
    /// Seconds.
    pub stop_timeout: Option<u64>,
    pub healthcheck: Option<HealthcheckConfig>,
    pub log_config: Option<LogConfig>,
    pub detach_keys: Option<String>,
    pub cid_file: Option<PathBuf>,
    pub pid_file: Option<PathBuf>,
    /// `host` or `container:<ref>`.
    pub pid: Option<String>,
    pub ipc: Option<String>,
    pub read_only: bool,
    pub pull: PullPolicy,
    pub auto_remove: bool,
    pub platform: Option<String>,
}

/// Steps to reverse when creation fails, undone last to first.
#[derive(Debug)]
enum Undo {
    Name(String),
    StateDir(PathBuf),
    HostsFile,
    Volumes(Vec<String>),
    Snapshot(String),
    Container,
    CidFile(PathBuf),
}

/// Entrypoint and command merged Docker-style.
fn process_args(options: &CreateOptions, image: &ImageConfig) -> Result<Vec<String>> {
    let (entrypoint, cmd) = match options.entrypoint {
        Some(ref entrypoint) => (entrypoint.clone(), options.command.clone()),
        None if options.command.is_empty() => (image.entrypoint.clone(), image.cmd.clone()),
        None => (image.entrypoint.clone(), options.command.clone()),
    };
    let args: Vec<String> = entrypoint.into_iter().chain(cmd).collect();
    if args.is_empty() {
        return Err(Error::InvalidArgument(
            "no command specified and the image has no default command".to_string(),
        ));
    }
    Ok(args)
}

fn write_cid_file(path: &Path, id: &ContainerId) -> Result<()> {
    if path.exists() {
        return Err(Error::AlreadyExists(format!(
            "container ID file found, make sure the other container isn't running or delete {}",
            path.display()
        )));
    }
    std::fs::write(path, id.as_str()).map_err(Error::Io)
}

impl<R: Runtime> ContainerManager<'_, R> {
    /// Create a container without starting it.
    pub async fn create(&self, options: &CreateOptions) -> Result<ContainerId> {
        if let Some(ref name) = options.name {
            ContainerName::new(name)?;
        }
        validate_user_labels(options.labels.keys()).map_err(Error::InvalidArgument)?;
        if let Some(ref keys) = options.detach_keys {
            parse_detach_keys(keys)?;
        }
        if let Some(ref signal) = options.stop_signal {
            parse_signal(signal).map_err(Error::InvalidArgument)?;
        }

        let reference = ImageRef::parse(&options.image)?;
        let image = self
            .runtime
            .ensure_image(&self.namespace, &reference, &self.snapshotter, options.pull)
            .await?;

        let id = ContainerId::generate();
        let mut undo = Vec::new();
        match self.create_steps(&id, options, &image, &mut undo).await {
            Ok(()) => {
                tracing::info!("created container {}", id.short());
                Ok(id)
            }
            Err(e) => {
                self.rollback(&id, undo).await;
                Err(e)
            }
        }
    }

    async fn create_steps(
        &self,
        id: &ContainerId,
        options: &CreateOptions,
        image_info: &ImageInfo,
        undo: &mut Vec<Undo>,
    ) -> Result<()> {
        let image = &image_info.config;
        if let Some(ref name) = options.name {
            self.names()?.acquire(name, id.as_str())?;
            undo.push(Undo::Name(name.clone()));
        }

        let state_dir = self.state_dir(id);
        crate::store::ensure_private_dir(&state_dir)?;
        undo.push(Undo::StateDir(state_dir.clone()));

        let network = self.network(options.networking.clone(), options.name.clone())?;
        network.verify_network_options().await?;
        let networking = network.internal_labels().await?;
        undo.push(Undo::HostsFile);
        let fragments = network.container_networking_fragments(id).await?;

        let volumes = self.volumes()?;
        let resolved = resolve_mounts(&volumes, &options.volumes, &image.volumes)?;
        undo.push(Undo::Volumes(resolved.anonymous.clone()));

        let env = resolve_env(&image.env, &options.env)?;
        let args = process_args(options, image)?;

        let mut spec_mounts = resolved.oci.clone();
        let ipc_mode = IpcMode::parse(options.ipc.as_deref().unwrap_or_default())?;
        let (ipc_label, ipc_join) = self.ipc_join(&ipc_mode, &state_dir, &mut spec_mounts).await?;
        let pid_join = match options.pid.as_deref() {
            None | Some("") => None,
            Some(mode) => Some(self.pid_join(mode).await?),
        };

        let pid_file = options
            .pid_file
            .as_ref()
            .map(std::path::absolute)
            .transpose()
            .map_err(Error::Io)?;

        let mut labels = ContainerLabels {
            name: options.name.clone(),
            namespace: self.namespace.clone(),
            hostname: fragments.hostname.clone(),
            domainname: fragments.domainname.clone(),
            networking,
            mounts: resolved.points.clone(),
            anonymous_volumes: resolved.anonymous.clone(),
            state_dir: state_dir.display().to_string(),
            log_uri: format!("file://{}", state_dir.join(format!("{}.log", id)).display()),
            log_config: options.log_config.clone(),
            healthcheck: options.healthcheck.clone(),
            stop_signal: options.stop_signal.clone().or_else(|| image.stop_signal.clone()),
            stop_timeout: options.stop_timeout,
            restart_policy: Some(options.restart.clone()),
            desired_status: None,
            explicitly_stopped: false,
            error: None,
            auto_remove: options.auto_remove,
            cid_file: options.cid_file.as_ref().map(|p| p.display().to_string()),
            pid_file: pid_file.as_ref().map(|p| p.display().to_string()),
            detach_keys: options.detach_keys.clone(),
            pid_container: None,
            ipc: ipc_label,
            platform: options.platform.clone(),
            user: options.labels.clone(),
        };
        if let Some(PidJoin::Container(ref target, _)) = pid_join {
            labels.pid_container = Some(target.to_string());
        }

        let spec_options = SpecOptions {
            args,
            env,
            cwd: options
                .workdir
                .clone()
                .unwrap_or_else(|| image.working_dir.clone()),
            user: options.user.clone().unwrap_or_else(|| image.user.clone()),
            terminal: options.tty,
            read_only: options.read_only,
            mounts: spec_mounts,
            annotations: hook_annotations(&labels)?,
        };
        let mut spec = build_spec(&spec_options, &fragments)?;
        apply_ipc(&mut spec, &ipc_mode, ipc_join)?;
        apply_pid(&mut spec, pid_join)?;

        self.runtime
            .prepare_snapshot(
                &self.namespace,
                &self.snapshotter,
                id.as_str(),
                &image_info.chain_id,
            )
            .await?;
        undo.push(Undo::Snapshot(id.to_string()));

        let record = ContainerRecord {
            id: id.clone(),
            image: image_info.name.clone(),
            labels: labels.encode()?,
            spec,
            snapshotter: self.snapshotter.clone(),
            snapshot_key: id.to_string(),
            runtime: DEFAULT_RUNTIME.to_string(),
            created_at: Utc::now(),
        };
        self.runtime.create_container(&self.namespace, &record).await?;
        undo.push(Undo::Container);

        if let Some(ref path) = options.cid_file {
            write_cid_file(path, id)?;
            undo.push(Undo::CidFile(path.clone()));
        }
        Ok(())
    }

    /// IPC label and the namespace to join, adding /dev/shm mounts as needed.
    async fn ipc_join(
        &self,
        mode: &IpcMode,
        state_dir: &Path,
        mounts: &mut Vec<oci_spec::runtime::Mount>,
    ) -> Result<(Option<String>, Option<PathBuf>)> {
        match mode {
            IpcMode::Private => Ok((None, None)),
            IpcMode::Shareable => {
                mounts.push(bind_mount(&ipc::shm_path(state_dir), "/dev/shm", false));
                Ok((Some("shareable".to_string()), None))
            }
            IpcMode::Host => {
                mounts.push(bind_mount(Path::new("/dev/shm"), "/dev/shm", false));
                Ok((Some("host".to_string()), None))
            }
            IpcMode::Container(reference) => {
                let (target, pid) = self.running_task(reference).await?;
                let target_labels = ContainerLabels::decode(&target.labels);
                if target_labels.ipc.as_deref() != Some("shareable") {
                    return Err(Error::PreconditionFailed(format!(
                        "container {} does not share its IPC namespace (use --ipc=shareable)",
                        target.id.short()
                    )));
                }
                let shm = ipc::shm_path(&self.state_dir(&target.id));
                if shm.exists() {
                    mounts.push(bind_mount(&shm, "/dev/shm", false));
                }
                Ok((
                    Some(format!("container:{}", target.id)),
                    Some(PathBuf::from(format!("/proc/{}/ns/ipc", pid))),
                ))
            }
        }
    }

    async fn pid_join(&self, mode: &str) -> Result<PidJoin> {
        if mode == "host" {
            return Ok(PidJoin::Host);
        }
        let Some(reference) = mode.strip_prefix("container:").filter(|r| !r.is_empty()) else {
            return Err(Error::InvalidArgument(format!("invalid pid mode {:?}", mode)));
        };
        let (target, pid) = self.running_task(reference).await?;
        Ok(PidJoin::Container(
            target.id,
            PathBuf::from(format!("/proc/{}/ns/pid", pid)),
        ))
    }

    async fn rollback(&self, id: &ContainerId, undo: Vec<Undo>) {
        for step in undo.into_iter().rev() {
            tracing::debug!("rolling back {:?} for {}", step, id.short());
            let result: Result<()> = match step {
                Undo::Name(ref name) => self
                    .names()
                    .and_then(|n| Ok(n.release(name, id.as_str())?)),
                Undo::StateDir(ref dir) => match std::fs::remove_dir_all(dir) {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::Io(e)),
                    _ => Ok(()),
                },
                Undo::HostsFile => self
                    .hosts()
                    .and_then(|h| Ok(h.dealloc_hosts_file(id.as_str())?)),
                Undo::Volumes(ref names) if names.is_empty() => Ok(()),
                Undo::Volumes(ref names) => self.volumes().and_then(|v| {
                    let (_, errors) = v.remove(names, &Default::default())?;
                    Error::join(errors.into_iter().map(Error::from).collect())
                }),
                Undo::Snapshot(ref key) => ignore_not_found(
                    self.runtime
                        .remove_snapshot(&self.namespace, &self.snapshotter, key)
                        .await,
                ),
                Undo::Container => {
                    ignore_not_found(self.runtime.delete_container(&self.namespace, id).await)
                }
                Undo::CidFile(ref path) => std::fs::remove_file(path).map_err(Error::Io),
            };
            if let Err(e) = result {
                tracing::warn!("rollback of {} failed: {}", id.short(), e);
            }
        }
    }
}

pub(super) fn ignore_not_found(result: std::result::Result<(), RuntimeServiceError>) -> Result<()> {
    match result {
        Err(e) if !e.is_not_found() => Err(e.into()),
        _ => Ok(()),
    }
}

#[derive(Debug)]
enum PidJoin {
    Host,
    Container(ContainerId, PathBuf),
}

fn apply_pid(spec: &mut Spec, join: Option<PidJoin>) -> Result<()> {
    match join {
        None => Ok(()),
        Some(PidJoin::Host) => {
            remove_namespace(spec, LinuxNamespaceType::Pid);
            Ok(())
        }
        Some(PidJoin::Container(_, path)) => set_namespace(spec, LinuxNamespaceType::Pid, Some(path)),
    }
}

fn apply_ipc(spec: &mut Spec, mode: &IpcMode, join: Option<PathBuf>) -> Result<()> {
    match (mode, join) {
        (IpcMode::Host, _) => {
            remove_namespace(spec, LinuxNamespaceType::Ipc);
            Ok(())
        }
        (_, Some(path)) => set_namespace(spec, LinuxNamespaceType::Ipc, Some(path)),
        _ => Ok(()),
    }
}

/// Annotations the OCI hook reads back from the runtime state.
fn hook_annotations(labels: &ContainerLabels) -> Result<HashMap<String, String>> {
    let mut annotations = HashMap::new();
    annotations.insert(
        keys::NETWORKING.to_string(),
        serde_json::to_string(&labels.networking)?,
    );
    annotations.insert(keys::NAMESPACE.to_string(), labels.namespace.clone());
    annotations.insert(keys::HOSTNAME.to_string(), labels.hostname.clone());
    if let Some(ref name) = labels.name {
        annotations.insert(keys::NAME.to_string(), name.clone());
    }
    if let Some(ref pid_file) = labels.pid_file {
        annotations.insert(keys::PID_FILE.to_string(), pid_file.clone());
    }
    Ok(annotations)
}

/// Detach keys a container was created with.
pub(super) fn detach_keys_of(labels: &ContainerLabels) -> &str {
    labels.detach_keys.as_deref().unwrap_or(DEFAULT_DETACH_KEYS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(entrypoint: &[&str], cmd: &[&str]) -> ImageConfig {
        ImageConfig {
            entrypoint: entrypoint.iter().map(|s| s.to_string()).collect(),
            cmd: cmd.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn command_replaces_image_cmd_only() {
        let options = CreateOptions {
            command: vec!["-c".into(), "true".into()],
            ..Default::default()
        };
        let args = process_args(&options, &image(&["/bin/sh"], &["-l"])).unwrap();
        assert_eq!(args, vec!["/bin/sh", "-c", "true"]);
    }

    #[test]
    fn entrypoint_override_drops_image_cmd() {
        let options = CreateOptions {
            entrypoint: Some(vec!["env".into()]),
            ..Default::default()
        };
        let args = process_args(&options, &image(&["/bin/sh"], &["-l"])).unwrap();
        assert_eq!(args, vec!["env"]);
    }

    #[test]
    fn nothing_to_run_is_rejected() {
        let err = process_args(&CreateOptions::default(), &image(&[], &[])).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn existing_cid_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cid");
        std::fs::write(&path, "old").unwrap();
        let err = write_cid_file(&path, &ContainerId::new("abc")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AlreadyExists);
    }
}
