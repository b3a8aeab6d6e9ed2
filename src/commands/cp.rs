// ABOUTME: cp command handler.
// ABOUTME: Parses CONTAINER:PATH endpoints and hands the copy to the path resolver and tar pipeline.

use super::context::Context;
use highk::cp::{CopyEndpoint, CopyRequest, copy};
use highk::error::Result;

pub async fn cp(ctx: &Context, source: &str, destination: &str, follow_link: bool) -> Result<()> {
    let request = CopyRequest {
        src: CopyEndpoint::parse(source),
        dst: CopyEndpoint::parse(destination),
        follow_link,
    };
    let runtime = ctx.connect().await?;
    let cni = ctx.cni()?;
    let manager = ctx.manager(&runtime, &cni)?;
    copy(&manager, &request).await?;
    Ok(())
}
