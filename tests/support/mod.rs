// ABOUTME: Test support utilities.
// ABOUTME: Tracing setup and an in-memory runtime preloaded with a small image.

use highk::runtime::{ImageConfig, ImageInfo, MemoryRuntime};
use std::sync::Once;

static TRACING_INIT: Once = Once::new();

#[allow(dead_code)]
pub const IMAGE: &str = "alpine:3.20";

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("highk=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Memory runtime with `alpine:3.20` present in `namespace`.
#[allow(dead_code)]
pub fn runtime_with_alpine(namespace: &str) -> MemoryRuntime {
    let runtime = MemoryRuntime::new();
    runtime.add_image(
        namespace,
        ImageInfo {
            name: "docker.io/library/alpine:3.20".to_string(),
            digest: "sha256:aaaa".to_string(),
            chain_id: "sha256:chain".to_string(),
            config: ImageConfig {
                cmd: vec!["sh".to_string()],
                ..Default::default()
            },
        },
    );
    runtime
}
