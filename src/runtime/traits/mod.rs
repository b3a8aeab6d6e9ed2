// ABOUTME: Composable capability traits for the runtime service.
// ABOUTME: Defines ContainerOps, TaskOps, ImageOps, SnapshotOps, NamespaceOps and Runtime.

mod container;
mod image;
mod namespace;
pub(crate) mod sealed;
mod shared_types;
mod snapshot;
mod task;

pub use container::ContainerOps;
pub use image::ImageOps;
pub use namespace::NamespaceOps;
pub use shared_types::*;
pub use snapshot::SnapshotOps;
pub use task::TaskOps;

/// Everything the lifecycle controller needs from a runtime service.
pub trait Runtime: ContainerOps + TaskOps + ImageOps + SnapshotOps + NamespaceOps {}

impl<T> Runtime for T where T: ContainerOps + TaskOps + ImageOps + SnapshotOps + NamespaceOps {}
