// ABOUTME: containerd gRPC backend implementing the runtime capability traits.
// ABOUTME: Containers, tasks, images, snapshots and namespaces over the containerd socket.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use containerd_client::services::v1::container::Runtime as ContainerRuntime;
use containerd_client::services::v1::containers_client::ContainersClient;
use containerd_client::services::v1::content_client::ContentClient;
use containerd_client::services::v1::images_client::ImagesClient;
use containerd_client::services::v1::namespaces_client::NamespacesClient;
use containerd_client::services::v1::snapshots::snapshots_client::SnapshotsClient;
use containerd_client::services::v1::snapshots::{
    MountsRequest, PrepareSnapshotRequest, RemoveSnapshotRequest,
};
use containerd_client::services::v1::tasks_client::TasksClient;
use containerd_client::services::v1::transfer_client::TransferClient;
use containerd_client::services::v1::{
    Container, CreateContainerRequest, CreateNamespaceRequest, CreateTaskRequest,
    DeleteContainerRequest, DeleteNamespaceRequest, DeleteTaskRequest, GetContainerRequest,
    GetImageRequest, GetNamespaceRequest, GetRequest as GetTaskRequest, KillRequest,
    ListContainersRequest, ListImagesRequest, ListNamespacesRequest, Namespace, PauseTaskRequest,
    ReadContentRequest, ResizePtyRequest, ResumeTaskRequest, StartRequest, TransferRequest,
    UpdateContainerRequest, UpdateNamespaceRequest, WaitRequest,
};
use containerd_client::types::transfer::{ImageStore, OciRegistry, UnpackConfiguration};
use containerd_client::types::{Mount, Platform};
use containerd_client::{connect, to_any, with_namespace};
use oci_spec::runtime::Spec;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use snafu::ResultExt;
use std::collections::HashMap;
// Required for with_namespace! macro
use tonic::Request;
use tonic::transport::Channel;

use super::error::{ConnectError, RuntimeServiceError, TransportSnafu};
use super::traits::sealed::Sealed;
use super::traits::{
    ContainerOps, ContainerRecord, ExitStatus, ImageConfig, ImageInfo, ImageOps, NamespaceInfo,
    NamespaceOps, RootfsMount, SnapshotOps, TaskIo, TaskOps, TaskState, TaskStatus,
};
use crate::types::{ContainerId, ImageRef};

const SPEC_TYPE_URL: &str = "types.containerd.io/opencontainers/runtime-spec/1/Spec";

const INDEX_MEDIA_TYPES: [&str; 2] = [
    "application/vnd.oci.image.index.v1+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
];

/// Runtime backed by a containerd daemon.
#[derive(Clone)]
pub struct ContainerdRuntime {
    channel: Channel,
    address: String,
}

impl Sealed for ContainerdRuntime {}

impl std::fmt::Debug for ContainerdRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerdRuntime")
            .field("address", &self.address)
            .finish()
    }
}

impl ContainerdRuntime {
    /// Connect to the containerd socket at `address` (optionally `unix://`-prefixed).
    pub async fn connect(address: &str) -> Result<Self, ConnectError> {
        let path = match address.strip_prefix("unix://") {
            Some(path) => path,
            None if address.contains("://") => {
                return Err(ConnectError::UnsupportedAddress {
                    address: address.to_string(),
                });
            }
            None => address,
        };

        let channel = connect(path).await.context(TransportSnafu {
            address: address.to_string(),
        })?;
        tracing::debug!("connected to containerd at {}", path);

        Ok(Self {
            channel,
            address: address.to_string(),
        })
    }

    async fn read_content(
        &self,
        namespace: &str,
        digest: &str,
    ) -> Result<Vec<u8>, RuntimeServiceError> {
        let mut client = ContentClient::new(self.channel.clone());
        let request = with_namespace!(
            ReadContentRequest {
                digest: digest.to_string(),
                offset: 0,
                size: 0,
            },
            namespace
        );

        let mut stream = client.read(request).await?.into_inner();
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.message().await? {
            bytes.extend_from_slice(&chunk.data);
        }
        Ok(bytes)
    }

    /// Resolve manifest (through an index when needed) and config for an image target.
    async fn image_info(
        &self,
        namespace: &str,
        name: &str,
        media_type: &str,
        digest: &str,
    ) -> Result<ImageInfo, RuntimeServiceError> {
        let mut manifest_digest = digest.to_string();
        if INDEX_MEDIA_TYPES.contains(&media_type) {
            let index: ImageIndex = parse_json(&self.read_content(namespace, digest).await?)?;
            manifest_digest = index
                .select_platform(&platform())
                .ok_or_else(|| {
                    RuntimeServiceError::NotFound(format!(
                        "no manifest for platform {}/{} in {}",
                        platform().os,
                        platform().architecture,
                        name
                    ))
                })?
                .to_string();
        }

        let manifest: ImageManifest =
            parse_json(&self.read_content(namespace, &manifest_digest).await?)?;
        let config: ImageConfigBlob =
            parse_json(&self.read_content(namespace, &manifest.config.digest).await?)?;

        Ok(ImageInfo {
            name: name.to_string(),
            digest: manifest_digest,
            chain_id: compute_chain_id(&config.rootfs.diff_ids),
            config: config.config.into(),
        })
    }

    fn tasks(&self) -> TasksClient<Channel> {
        TasksClient::new(self.channel.clone())
    }

    fn containers(&self) -> ContainersClient<Channel> {
        ContainersClient::new(self.channel.clone())
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, RuntimeServiceError> {
    serde_json::from_slice(bytes)
        .map_err(|e| RuntimeServiceError::Internal(format!("malformed image content: {}", e)))
}

fn platform() -> Platform {
    // Map Rust architecture names to OCI platform architecture names
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        arch => arch,
    }
    .to_string();

    Platform {
        os: "linux".to_string(),
        architecture: arch,
        variant: String::new(),
        os_version: String::new(),
    }
}

/// Compute the chain ID from diff IDs (OCI image spec algorithm)
fn compute_chain_id(diff_ids: &[String]) -> String {
    let mut chain_id = String::new();
    for diff_id in diff_ids {
        if chain_id.is_empty() {
            chain_id = diff_id.clone();
        } else {
            let digest = Sha256::digest(format!("{} {}", chain_id, diff_id).as_bytes());
            chain_id = format!("sha256:{}", hex::encode(digest));
        }
    }
    chain_id
}

fn timestamp(ts: Option<prost_types::Timestamp>) -> Option<DateTime<Utc>> {
    let ts = ts?;
    DateTime::from_timestamp(ts.seconds, u32::try_from(ts.nanos).unwrap_or(0))
}

fn record_from_proto(container: Container) -> Result<ContainerRecord, RuntimeServiceError> {
    let spec = match container.spec {
        Some(any) => serde_json::from_slice::<Spec>(&any.value).map_err(|e| {
            RuntimeServiceError::Internal(format!(
                "container {} has a malformed spec: {}",
                container.id, e
            ))
        })?,
        None => Spec::default(),
    };

    Ok(ContainerRecord {
        id: ContainerId::new(container.id),
        image: container.image,
        labels: container.labels,
        spec,
        snapshotter: container.snapshotter,
        snapshot_key: container.snapshot_key,
        runtime: container.runtime.map(|r| r.name).unwrap_or_default(),
        created_at: timestamp(container.created_at).unwrap_or_else(Utc::now),
    })
}

fn rootfs_from_proto(mounts: Vec<Mount>) -> Vec<RootfsMount> {
    mounts
        .into_iter()
        .map(|m| RootfsMount {
            typ: m.r#type,
            source: m.source,
            options: m.options,
        })
        .collect()
}

#[derive(Deserialize)]
struct Descriptor {
    digest: String,
    #[serde(default)]
    platform: Option<DescriptorPlatform>,
}

#[derive(Deserialize)]
struct DescriptorPlatform {
    os: String,
    architecture: String,
}

#[derive(Deserialize)]
struct ImageIndex {
    manifests: Vec<Descriptor>,
}

impl ImageIndex {
    fn select_platform(&self, platform: &Platform) -> Option<&str> {
        self.manifests
            .iter()
            .find(|m| {
                m.platform.as_ref().is_some_and(|p| {
                    p.os == platform.os && p.architecture == platform.architecture
                })
            })
            .map(|m| m.digest.as_str())
    }
}

#[derive(Deserialize)]
struct ImageManifest {
    config: Descriptor,
}

#[derive(Deserialize)]
struct ImageConfigBlob {
    #[serde(default)]
    config: RawImageConfig,
    rootfs: RootFs,
}

#[derive(Deserialize)]
struct RootFs {
    #[serde(default)]
    diff_ids: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct RawImageConfig {
    #[serde(default)]
    entrypoint: Option<Vec<String>>,
    #[serde(default)]
    cmd: Option<Vec<String>>,
    #[serde(default)]
    env: Option<Vec<String>>,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    stop_signal: Option<String>,
    #[serde(default)]
    volumes: Option<HashMap<String, serde_json::Value>>,
}

impl From<RawImageConfig> for ImageConfig {
    fn from(raw: RawImageConfig) -> Self {
        let mut volumes: Vec<String> = raw.volumes.unwrap_or_default().into_keys().collect();
        volumes.sort();
        ImageConfig {
            entrypoint: raw.entrypoint.unwrap_or_default(),
            cmd: raw.cmd.unwrap_or_default(),
            env: raw.env.unwrap_or_default(),
            working_dir: raw.working_dir.unwrap_or_default(),
            user: raw.user.unwrap_or_default(),
            stop_signal: raw.stop_signal.filter(|s| !s.is_empty()),
            volumes,
        }
    }
}

#[async_trait]
impl ContainerOps for ContainerdRuntime {
    async fn create_container(
        &self,
        namespace: &str,
        record: &ContainerRecord,
    ) -> Result<(), RuntimeServiceError> {
        let spec_json = serde_json::to_vec(&record.spec).map_err(|e| {
            RuntimeServiceError::InvalidArgument(format!("failed to serialize OCI spec: {}", e))
        })?;

        let container = Container {
            id: record.id.to_string(),
            labels: record.labels.clone(),
            image: record.image.clone(),
            runtime: Some(ContainerRuntime {
                name: record.runtime.clone(),
                options: None,
            }),
            spec: Some(prost_types::Any {
                type_url: SPEC_TYPE_URL.to_string(),
                value: spec_json,
            }),
            snapshotter: record.snapshotter.clone(),
            snapshot_key: record.snapshot_key.clone(),
            extensions: HashMap::new(),
            sandbox: String::new(),
            created_at: None,
            updated_at: None,
        };

        let request = with_namespace!(
            CreateContainerRequest {
                container: Some(container),
            },
            namespace
        );
        self.containers().create(request).await?;
        Ok(())
    }

    async fn get_container(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<ContainerRecord, RuntimeServiceError> {
        let request = with_namespace!(
            GetContainerRequest {
                id: id.to_string()
            },
            namespace
        );
        let container = self
            .containers()
            .get(request)
            .await?
            .into_inner()
            .container
            .ok_or_else(|| RuntimeServiceError::NotFound(format!("container {}", id)))?;
        record_from_proto(container)
    }

    async fn list_containers(
        &self,
        namespace: &str,
    ) -> Result<Vec<ContainerRecord>, RuntimeServiceError> {
        let request = with_namespace!(ListContainersRequest { filters: vec![] }, namespace);
        let containers = self.containers().list(request).await?.into_inner().containers;

        let mut records = Vec::with_capacity(containers.len());
        for container in containers {
            let id = container.id.clone();
            match record_from_proto(container) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("skipping container {}: {}", id, e),
            }
        }
        Ok(records)
    }

    async fn update_labels(
        &self,
        namespace: &str,
        id: &ContainerId,
        labels: &HashMap<String, String>,
    ) -> Result<(), RuntimeServiceError> {
        let request = with_namespace!(
            UpdateContainerRequest {
                container: Some(Container {
                    id: id.to_string(),
                    labels: labels.clone(),
                    ..Default::default()
                }),
                update_mask: Some(prost_types::FieldMask {
                    paths: vec!["labels".to_string()],
                }),
            },
            namespace
        );
        self.containers().update(request).await?;
        Ok(())
    }

    async fn update_spec(
        &self,
        namespace: &str,
        id: &ContainerId,
        spec: &Spec,
    ) -> Result<(), RuntimeServiceError> {
        let spec_json = serde_json::to_vec(spec).map_err(|e| {
            RuntimeServiceError::InvalidArgument(format!("failed to serialize OCI spec: {}", e))
        })?;
        let request = with_namespace!(
            UpdateContainerRequest {
                container: Some(Container {
                    id: id.to_string(),
                    spec: Some(prost_types::Any {
                        type_url: SPEC_TYPE_URL.to_string(),
                        value: spec_json,
                    }),
                    ..Default::default()
                }),
                update_mask: Some(prost_types::FieldMask {
                    paths: vec!["spec".to_string()],
                }),
            },
            namespace
        );
        self.containers().update(request).await?;
        Ok(())
    }

    async fn delete_container(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<(), RuntimeServiceError> {
        let request = with_namespace!(
            DeleteContainerRequest {
                id: id.to_string()
            },
            namespace
        );
        self.containers().delete(request).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskOps for ContainerdRuntime {
    async fn create_task(
        &self,
        namespace: &str,
        id: &ContainerId,
        io: &TaskIo,
    ) -> Result<TaskState, RuntimeServiceError> {
        let record = self.get_container(namespace, id).await?;

        let mut snapshots = SnapshotsClient::new(self.channel.clone());
        let request = with_namespace!(
            MountsRequest {
                snapshotter: record.snapshotter.clone(),
                key: record.snapshot_key.clone(),
            },
            namespace
        );
        let rootfs = snapshots.mounts(request).await?.into_inner().mounts;

        let request = with_namespace!(
            CreateTaskRequest {
                container_id: id.to_string(),
                rootfs,
                stdin: io.stdin.clone(),
                stdout: io.stdout.clone(),
                stderr: io.stderr.clone(),
                terminal: io.terminal,
                checkpoint: None,
                options: None,
                runtime_path: String::new(),
            },
            namespace
        );
        let response = self.tasks().create(request).await?.into_inner();

        Ok(TaskState {
            pid: response.pid,
            status: TaskStatus::Created,
            exit_status: None,
        })
    }

    async fn start_task(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<(), RuntimeServiceError> {
        let request = with_namespace!(
            StartRequest {
                container_id: id.to_string(),
                exec_id: String::new(),
            },
            namespace
        );
        self.tasks().start(request).await?;
        Ok(())
    }

    async fn task_state(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<TaskState, RuntimeServiceError> {
        let request = with_namespace!(
            GetTaskRequest {
                container_id: id.to_string(),
                exec_id: String::new(),
            },
            namespace
        );
        let process = self
            .tasks()
            .get(request)
            .await?
            .into_inner()
            .process
            .ok_or_else(|| RuntimeServiceError::NotFound(format!("task {}", id)))?;

        let status = TaskStatus::from_code(process.status);
        let exit_status = (status == TaskStatus::Stopped).then(|| ExitStatus {
            code: process.exit_status,
            exited_at: timestamp(process.exited_at),
        });
        Ok(TaskState {
            pid: process.pid,
            status,
            exit_status,
        })
    }

    async fn kill_task(
        &self,
        namespace: &str,
        id: &ContainerId,
        signal: i32,
        all: bool,
    ) -> Result<(), RuntimeServiceError> {
        let signal = u32::try_from(signal)
            .map_err(|_| RuntimeServiceError::InvalidArgument(format!("signal {}", signal)))?;
        let request = with_namespace!(
            KillRequest {
                container_id: id.to_string(),
                exec_id: String::new(),
                signal,
                all,
            },
            namespace
        );
        self.tasks().kill(request).await?;
        Ok(())
    }

    async fn pause_task(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<(), RuntimeServiceError> {
        let request = with_namespace!(
            PauseTaskRequest {
                container_id: id.to_string(),
            },
            namespace
        );
        self.tasks().pause(request).await?;
        Ok(())
    }

    async fn resume_task(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<(), RuntimeServiceError> {
        let request = with_namespace!(
            ResumeTaskRequest {
                container_id: id.to_string(),
            },
            namespace
        );
        self.tasks().resume(request).await?;
        Ok(())
    }

    async fn wait_task(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<ExitStatus, RuntimeServiceError> {
        let request = with_namespace!(
            WaitRequest {
                container_id: id.to_string(),
                exec_id: String::new(),
            },
            namespace
        );
        let response = self.tasks().wait(request).await?.into_inner();
        Ok(ExitStatus {
            code: response.exit_status,
            exited_at: timestamp(response.exited_at),
        })
    }

    async fn delete_task(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<ExitStatus, RuntimeServiceError> {
        let request = with_namespace!(
            DeleteTaskRequest {
                container_id: id.to_string(),
            },
            namespace
        );
        let response = self.tasks().delete(request).await?.into_inner();
        Ok(ExitStatus {
            code: response.exit_status,
            exited_at: timestamp(response.exited_at),
        })
    }

    async fn resize_pty(
        &self,
        namespace: &str,
        id: &ContainerId,
        width: u16,
        height: u16,
    ) -> Result<(), RuntimeServiceError> {
        let request = with_namespace!(
            ResizePtyRequest {
                container_id: id.to_string(),
                exec_id: String::new(),
                width: u32::from(width),
                height: u32::from(height),
            },
            namespace
        );
        self.tasks().resize_pty(request).await?;
        Ok(())
    }
}

#[async_trait]
impl ImageOps for ContainerdRuntime {
    async fn get_image(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ImageInfo, RuntimeServiceError> {
        let mut client = ImagesClient::new(self.channel.clone());
        let request = with_namespace!(
            GetImageRequest {
                name: name.to_string()
            },
            namespace
        );
        let image = client
            .get(request)
            .await?
            .into_inner()
            .image
            .ok_or_else(|| RuntimeServiceError::NotFound(format!("image {}", name)))?;
        let target = image
            .target
            .ok_or_else(|| RuntimeServiceError::Internal(format!("image {} has no target", name)))?;

        self.image_info(namespace, name, &target.media_type, &target.digest)
            .await
    }

    async fn pull_image(
        &self,
        namespace: &str,
        reference: &ImageRef,
        snapshotter: &str,
    ) -> Result<ImageInfo, RuntimeServiceError> {
        let name = reference.normalized();
        tracing::info!("pulling {}", name);

        let source = OciRegistry {
            reference: name.clone(),
            resolver: None,
        };
        let destination = ImageStore {
            name: name.clone(),
            labels: HashMap::new(),
            platforms: vec![platform()],
            all_metadata: false,
            manifest_limit: 0,
            extra_references: vec![],
            unpacks: vec![UnpackConfiguration {
                platform: Some(platform()),
                snapshotter: snapshotter.to_string(),
            }],
        };
        let request = with_namespace!(
            TransferRequest {
                source: Some(to_any(&source)),
                destination: Some(to_any(&destination)),
                options: None,
            },
            namespace
        );

        let mut client = TransferClient::new(self.channel.clone());
        client.transfer(request).await?;

        self.get_image(namespace, &name).await
    }

    async fn list_images(&self, namespace: &str) -> Result<Vec<String>, RuntimeServiceError> {
        let mut client = ImagesClient::new(self.channel.clone());
        let request = with_namespace!(ListImagesRequest { filters: vec![] }, namespace);
        let images = client.list(request).await?.into_inner().images;
        Ok(images.into_iter().map(|i| i.name).collect())
    }
}

#[async_trait]
impl SnapshotOps for ContainerdRuntime {
    async fn prepare_snapshot(
        &self,
        namespace: &str,
        snapshotter: &str,
        key: &str,
        parent: &str,
    ) -> Result<Vec<RootfsMount>, RuntimeServiceError> {
        let mut client = SnapshotsClient::new(self.channel.clone());
        let request = with_namespace!(
            PrepareSnapshotRequest {
                snapshotter: snapshotter.to_string(),
                key: key.to_string(),
                parent: parent.to_string(),
                labels: HashMap::new(),
            },
            namespace
        );
        let mounts = client.prepare(request).await?.into_inner().mounts;
        Ok(rootfs_from_proto(mounts))
    }

    async fn snapshot_mounts(
        &self,
        namespace: &str,
        snapshotter: &str,
        key: &str,
    ) -> Result<Vec<RootfsMount>, RuntimeServiceError> {
        let mut client = SnapshotsClient::new(self.channel.clone());
        let request = with_namespace!(
            MountsRequest {
                snapshotter: snapshotter.to_string(),
                key: key.to_string(),
            },
            namespace
        );
        let mounts = client.mounts(request).await?.into_inner().mounts;
        Ok(rootfs_from_proto(mounts))
    }

    async fn remove_snapshot(
        &self,
        namespace: &str,
        snapshotter: &str,
        key: &str,
    ) -> Result<(), RuntimeServiceError> {
        let mut client = SnapshotsClient::new(self.channel.clone());
        let request = with_namespace!(
            RemoveSnapshotRequest {
                snapshotter: snapshotter.to_string(),
                key: key.to_string(),
            },
            namespace
        );
        client.remove(request).await?;
        Ok(())
    }
}

#[async_trait]
impl NamespaceOps for ContainerdRuntime {
    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>, RuntimeServiceError> {
        let mut client = NamespacesClient::new(self.channel.clone());
        let response = client
            .list(ListNamespacesRequest {
                filter: String::new(),
            })
            .await?
            .into_inner();
        Ok(response
            .namespaces
            .into_iter()
            .map(|n| NamespaceInfo {
                name: n.name,
                labels: n.labels,
            })
            .collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<NamespaceInfo, RuntimeServiceError> {
        let mut client = NamespacesClient::new(self.channel.clone());
        let namespace = client
            .get(GetNamespaceRequest {
                name: name.to_string(),
            })
            .await?
            .into_inner()
            .namespace
            .ok_or_else(|| RuntimeServiceError::NotFound(format!("namespace {}", name)))?;
        Ok(NamespaceInfo {
            name: namespace.name,
            labels: namespace.labels,
        })
    }

    async fn create_namespace(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<(), RuntimeServiceError> {
        let mut client = NamespacesClient::new(self.channel.clone());
        client
            .create(CreateNamespaceRequest {
                namespace: Some(Namespace {
                    name: name.to_string(),
                    labels: labels.clone(),
                }),
            })
            .await?;
        Ok(())
    }

    async fn update_namespace(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<(), RuntimeServiceError> {
        let mut client = NamespacesClient::new(self.channel.clone());
        let paths = labels.keys().map(|k| format!("labels.{}", k)).collect();
        client
            .update(UpdateNamespaceRequest {
                namespace: Some(Namespace {
                    name: name.to_string(),
                    labels: labels.clone(),
                }),
                update_mask: Some(prost_types::FieldMask { paths }),
            })
            .await?;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), RuntimeServiceError> {
        let mut client = NamespacesClient::new(self.channel.clone());
        client
            .delete(DeleteNamespaceRequest {
                name: name.to_string(),
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_id_of_single_layer_is_its_diff_id() {
        let ids = vec!["sha256:aaa".to_string()];
        assert_eq!(compute_chain_id(&ids), "sha256:aaa");
    }

    #[test]
    fn chain_id_hashes_successive_layers() {
        let ids = vec!["sha256:aaa".to_string(), "sha256:bbb".to_string()];
        let expected = format!(
            "sha256:{}",
            hex::encode(Sha256::digest(b"sha256:aaa sha256:bbb"))
        );
        assert_eq!(compute_chain_id(&ids), expected);
    }

    #[test]
    fn image_config_extracts_runtime_fields() {
        let blob = br#"{
            "config": {
                "Entrypoint": ["/docker-entrypoint.sh"],
                "Cmd": ["nginx", "-g", "daemon off;"],
                "Env": ["PATH=/usr/bin"],
                "WorkingDir": "/srv",
                "StopSignal": "SIGQUIT",
                "Volumes": {"/var/cache/nginx": {}}
            },
            "rootfs": {"type": "layers", "diff_ids": ["sha256:aaa"]}
        }"#;
        let parsed: ImageConfigBlob = serde_json::from_slice(blob).unwrap();
        let config: ImageConfig = parsed.config.into();
        assert_eq!(config.entrypoint, vec!["/docker-entrypoint.sh"]);
        assert_eq!(config.cmd.len(), 3);
        assert_eq!(config.working_dir, "/srv");
        assert_eq!(config.stop_signal.as_deref(), Some("SIGQUIT"));
        assert_eq!(config.volumes, vec!["/var/cache/nginx"]);
    }

    #[test]
    fn index_selects_matching_platform() {
        let index: ImageIndex = serde_json::from_slice(
            br#"{"manifests": [
                {"digest": "sha256:arm", "platform": {"os": "linux", "architecture": "arm64"}},
                {"digest": "sha256:amd", "platform": {"os": "linux", "architecture": "amd64"}}
            ]}"#,
        )
        .unwrap();
        let amd64 = Platform {
            os: "linux".to_string(),
            architecture: "amd64".to_string(),
            variant: String::new(),
            os_version: String::new(),
        };
        assert_eq!(index.select_platform(&amd64), Some("sha256:amd"));
    }

    #[tokio::test]
    async fn connect_rejects_unknown_schemes() {
        let err = ContainerdRuntime::connect("tcp://127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, ConnectError::UnsupportedAddress { .. }));
    }
}
