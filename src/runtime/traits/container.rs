// ABOUTME: Container record operations against the runtime service.
// ABOUTME: Create, get, list, update labels or spec, and delete container records.

use super::sealed::Sealed;
use super::shared_types::ContainerRecord;
use crate::runtime::RuntimeServiceError;
use crate::types::ContainerId;
use async_trait::async_trait;
use oci_spec::runtime::Spec;
use std::collections::HashMap;

/// Container metadata operations. Records carry no running process; see `TaskOps`.
#[async_trait]
pub trait ContainerOps: Sealed + Send + Sync {
    /// Store a new container record.
    async fn create_container(
        &self,
        namespace: &str,
        record: &ContainerRecord,
    ) -> Result<(), RuntimeServiceError>;

    /// Fetch one container record.
    async fn get_container(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<ContainerRecord, RuntimeServiceError>;

    /// All container records in the namespace.
    async fn list_containers(
        &self,
        namespace: &str,
    ) -> Result<Vec<ContainerRecord>, RuntimeServiceError>;

    /// Replace the whole label map in one update.
    async fn update_labels(
        &self,
        namespace: &str,
        id: &ContainerId,
        labels: &HashMap<String, String>,
    ) -> Result<(), RuntimeServiceError>;

    /// Replace the OCI spec.
    async fn update_spec(
        &self,
        namespace: &str,
        id: &ContainerId,
        spec: &Spec,
    ) -> Result<(), RuntimeServiceError>;

    /// Delete a container record.
    async fn delete_container(
        &self,
        namespace: &str,
        id: &ContainerId,
    ) -> Result<(), RuntimeServiceError>;
}
