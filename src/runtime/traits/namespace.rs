// ABOUTME: Namespace operations trait for the runtime service.
// ABOUTME: List, get, create, relabel and delete namespaces.

use super::sealed::Sealed;
use super::shared_types::NamespaceInfo;
use crate::runtime::RuntimeServiceError;
use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait NamespaceOps: Sealed + Send + Sync {
    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>, RuntimeServiceError>;

    async fn get_namespace(&self, name: &str) -> Result<NamespaceInfo, RuntimeServiceError>;

    async fn create_namespace(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<(), RuntimeServiceError>;

    /// Set `labels` on the namespace, keeping labels not mentioned.
    async fn update_namespace(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<(), RuntimeServiceError>;

    /// Delete an empty namespace. FailedPrecondition when it still holds resources.
    async fn delete_namespace(&self, name: &str) -> Result<(), RuntimeServiceError>;
}
