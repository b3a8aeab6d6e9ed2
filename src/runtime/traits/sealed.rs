// ABOUTME: Sealed trait pattern for runtime traits.
// ABOUTME: Prevents external implementations, allowing non-breaking evolution.

/// Sealed trait to prevent external implementations.
///
/// Only the runtime backends in this crate (containerd and in-memory)
/// implement Sealed, so the capability traits can grow methods freely.
pub trait Sealed {}
