// ABOUTME: Image operations trait for the runtime service.
// ABOUTME: Resolve local images, pull missing ones, and list names for counting.

use super::sealed::Sealed;
use super::shared_types::{ImageInfo, PullPolicy};
use crate::runtime::RuntimeServiceError;
use crate::types::ImageRef;
use async_trait::async_trait;

/// Image operations: resolve, pull, list.
#[async_trait]
pub trait ImageOps: Sealed + Send + Sync {
    /// Resolve a locally stored image by normalized name.
    async fn get_image(&self, namespace: &str, name: &str)
    -> Result<ImageInfo, RuntimeServiceError>;

    /// Fetch and unpack an image from its registry.
    async fn pull_image(
        &self,
        namespace: &str,
        reference: &ImageRef,
        snapshotter: &str,
    ) -> Result<ImageInfo, RuntimeServiceError>;

    /// Names of all images in the namespace.
    async fn list_images(&self, namespace: &str) -> Result<Vec<String>, RuntimeServiceError>;

    /// Make `reference` locally available according to `policy`.
    async fn ensure_image(
        &self,
        namespace: &str,
        reference: &ImageRef,
        snapshotter: &str,
        policy: PullPolicy,
    ) -> Result<ImageInfo, RuntimeServiceError> {
        let name = reference.normalized();
        match policy {
            PullPolicy::Always => self.pull_image(namespace, reference, snapshotter).await,
            PullPolicy::Never => self.get_image(namespace, &name).await,
            PullPolicy::Missing => match self.get_image(namespace, &name).await {
                Ok(image) => Ok(image),
                Err(RuntimeServiceError::NotFound(_)) => {
                    tracing::debug!("image {} not present, pulling", name);
                    self.pull_image(namespace, reference, snapshotter).await
                }
                Err(e) => Err(e),
            },
        }
    }
}
