// ABOUTME: volume command handlers: create, ls, inspect, rm and prune.
// ABOUTME: Listing and creation work offline; rm and prune ask containerd which volumes are mounted.

use super::container::parse_key_values;
use super::context::Context;
use crate::cli::Format;
use highk::error::{Error, Result};
use highk::output::{Output, OutputMode};
use highk::store::{Volume, VolumeStore};
use std::io::{BufRead, Write};

fn store(ctx: &Context) -> Result<VolumeStore> {
    Ok(VolumeStore::new(&ctx.data_store()?, ctx.namespace())?)
}

pub fn create(ctx: &Context, name: Option<&str>, labels: &[String]) -> Result<()> {
    let volume = store(ctx)?.create(name, parse_key_values(labels))?;
    println!("{}", volume.name);
    Ok(())
}

fn row(volume: &Volume, size: bool) -> Vec<String> {
    let mut row = vec![volume.name.clone(), volume.mountpoint.display().to_string()];
    if size {
        row.push(volume.size.map(|s| s.to_string()).unwrap_or_default());
    }
    row
}

pub fn ls(ctx: &Context, quiet: bool, size: bool, format: Format) -> Result<()> {
    let volumes = store(ctx)?.list(size)?;
    let mode = match (quiet, format) {
        (true, _) => OutputMode::Quiet,
        (false, Format::Json) => OutputMode::Json,
        (false, Format::Table) => OutputMode::Normal,
    };
    let mut headers = vec!["VOLUME NAME", "DIRECTORY"];
    if size {
        headers.push("SIZE");
    }
    Output::new(mode).listing(&headers, &volumes, |v| row(v, size));
    Ok(())
}

pub fn inspect(ctx: &Context, names: &[String]) -> Result<()> {
    let store = store(ctx)?;
    let mut volumes = Vec::new();
    let mut errors = Vec::new();
    for name in names {
        match store.get(name) {
            Ok(volume) => volumes.push(volume),
            Err(e) => errors.push(Error::from(e)),
        }
    }
    Output::new(OutputMode::Normal).document(&volumes)?;
    Error::join(errors)
}

pub async fn rm(ctx: &Context, names: &[String]) -> Result<()> {
    let runtime = ctx.connect().await?;
    let cni = ctx.cni()?;
    let manager = ctx.manager(&runtime, &cni)?;
    let in_use = manager.volumes_in_use().await?;
    let (removed, errors) = manager.volumes()?.remove(names, &in_use)?;
    for name in removed {
        println!("{name}");
    }
    Error::join(errors.into_iter().map(Error::from).collect())
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N] ");
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

pub async fn prune(ctx: &Context, force: bool) -> Result<()> {
    if !force
        && !confirm(
            "WARNING! This will remove all volumes not used by at least one container.\nAre you sure you want to continue?",
        )?
    {
        return Ok(());
    }
    let runtime = ctx.connect().await?;
    let cni = ctx.cni()?;
    let manager = ctx.manager(&runtime, &cni)?;
    let in_use = manager.volumes_in_use().await?;
    let removed = manager.volumes()?.prune(&in_use)?;
    if !removed.is_empty() {
        println!("Deleted Volumes:");
        for name in &removed {
            println!("{name}");
        }
    }
    Ok(())
}
