// ABOUTME: Snapshot operations trait for container root filesystems.
// ABOUTME: Prepare, look up mounts for, and remove active snapshots.

use super::sealed::Sealed;
use super::shared_types::RootfsMount;
use crate::runtime::RuntimeServiceError;
use async_trait::async_trait;

#[async_trait]
pub trait SnapshotOps: Sealed + Send + Sync {
    /// Create a writable snapshot `key` on top of `parent`.
    async fn prepare_snapshot(
        &self,
        namespace: &str,
        snapshotter: &str,
        key: &str,
        parent: &str,
    ) -> Result<Vec<RootfsMount>, RuntimeServiceError>;

    /// Mounts that assemble snapshot `key`.
    async fn snapshot_mounts(
        &self,
        namespace: &str,
        snapshotter: &str,
        key: &str,
    ) -> Result<Vec<RootfsMount>, RuntimeServiceError>;

    async fn remove_snapshot(
        &self,
        namespace: &str,
        snapshotter: &str,
        key: &str,
    ) -> Result<(), RuntimeServiceError>;
}
