// ABOUTME: Runtime service client: capability traits plus containerd and in-memory backends.
// ABOUTME: Also detects the default containerd address for rootful and rootless users.

mod containerd;
mod detection;
mod error;
mod memory;
pub mod traits;

pub use containerd::ContainerdRuntime;
pub use detection::{ROOTFUL_CONTAINERD, default_address, is_rootless};
pub use error::{ConnectError, ConnectErrorKind, RuntimeServiceError};
pub use memory::{MemoryRuntime, TaskBehavior};
pub use traits::{
    ContainerOps, ContainerRecord, ExitStatus, ImageConfig, ImageInfo, ImageOps, NamespaceInfo,
    NamespaceOps, PullPolicy, RootfsMount, Runtime, SnapshotOps, TaskIo, TaskOps, TaskState,
    TaskStatus,
};

/// Default OCI runtime shim.
pub const DEFAULT_RUNTIME: &str = "io.containerd.runc.v2";

/// Default snapshotter.
pub const DEFAULT_SNAPSHOTTER: &str = "overlayfs";

/// Connect to the containerd service at `address`.
pub async fn connect(address: &str) -> Result<ContainerdRuntime, ConnectError> {
    ContainerdRuntime::connect(address).await
}
