// ABOUTME: network command handlers over CNI configuration files: ls, create, inspect and rm.
// ABOUTME: Removal refuses networks that containers in the namespace still reference.

use super::container::parse_key_values;
use super::context::Context;
use crate::cli::Format;
use highk::container::labels::ContainerLabels;
use highk::error::{Error, Result};
use highk::network::{CreateNetworkOptions, NetworkConfig, NetworkError, uses_network};
use highk::output::{Output, OutputMode};
use highk::runtime::ContainerOps;

fn short_id(network: &NetworkConfig) -> String {
    network.conflist["highk.id"]
        .as_str()
        .map(|id| id.chars().take(12).collect())
        .unwrap_or_default()
}

fn row(network: &NetworkConfig) -> Vec<String> {
    vec![
        short_id(network),
        network.name.clone(),
        network
            .file
            .as_ref()
            .map(|f| f.display().to_string())
            .unwrap_or_default(),
    ]
}

pub fn ls(ctx: &Context, quiet: bool, format: Format) -> Result<()> {
    let cni = ctx.cni()?;
    let networks: Vec<NetworkConfig> = cni.networks().cloned().collect();
    let output = match (quiet, format) {
        (true, _) => Output::new(OutputMode::Quiet),
        (false, Format::Json) => Output::new(OutputMode::Json),
        (false, Format::Table) => Output::new(OutputMode::Normal),
    };
    output.listing(&["NETWORK ID", "NAME", "FILE"], &networks, row);
    Ok(())
}

pub fn create(
    ctx: &Context,
    name: &str,
    driver: &str,
    subnet: Option<String>,
    gateway: Option<String>,
    opts: &[String],
    labels: &[String],
) -> Result<()> {
    let opts = parse_key_values(opts);
    let mut parent = None;
    for (key, value) in opts {
        match key.as_str() {
            "parent" => parent = Some(value),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unsupported network option {:?}",
                    other
                )));
            }
        }
    }
    let mut cni = ctx.cni()?;
    let network = cni.create_network(&CreateNetworkOptions {
        name: name.to_string(),
        driver: driver.to_string(),
        subnet,
        gateway,
        parent,
        labels: parse_key_values(labels),
    })?;
    println!("{}", short_id(&network));
    Ok(())
}

pub fn inspect(ctx: &Context, names: &[String]) -> Result<()> {
    let cni = ctx.cni()?;
    let mut documents = Vec::new();
    let mut errors = Vec::new();
    for name in names {
        match cni.get(name) {
            Some(network) => documents.push(network.clone()),
            None => errors.push(Error::from(NetworkError::UnknownNetwork(name.clone()))),
        }
    }
    Output::new(OutputMode::Normal).document(&documents)?;
    Error::join(errors)
}

pub async fn rm(ctx: &Context, names: &[String]) -> Result<()> {
    let mut cni = ctx.cni()?;
    let runtime = ctx.connect().await?;
    let records = runtime.list_containers(ctx.namespace()).await?;

    let mut errors = Vec::new();
    for name in names {
        let users: Vec<String> = records
            .iter()
            .filter(|r| uses_network(r, name))
            .map(|r| {
                ContainerLabels::decode(&r.labels)
                    .name
                    .unwrap_or_else(|| r.id.short().to_string())
            })
            .collect();
        let result = if users.is_empty() {
            cni.remove_network(name)
        } else {
            Err(NetworkError::NetworkInUse {
                name: name.clone(),
                containers: users,
            })
        };
        match result {
            Ok(()) => println!("{name}"),
            Err(e) => errors.push(e.into()),
        }
    }
    Error::join(errors)
}
