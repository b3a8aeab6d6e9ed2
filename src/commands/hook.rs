// ABOUTME: Hidden `internal oci-hook` handler the runtime shim invokes around CNI containers.
// ABOUTME: Reads the OCI state document from stdin and attaches or detaches networks.

use super::context::Context;
use highk::error::Result;
use highk::network::{HookEvent, run_oci_hook};
use tokio::io::AsyncReadExt;

pub async fn oci_hook(ctx: &Context, event: &str) -> Result<()> {
    let event: HookEvent = event.parse()?;
    let mut state = String::new();
    tokio::io::stdin().read_to_string(&mut state).await?;
    let cni = ctx.cni()?;
    run_oci_hook(event, &state, &ctx.data_store()?, &cni).await?;
    Ok(())
}
