// ABOUTME: Container command handlers: create, run, start, stop, rm, ps, inspect and friends.
// ABOUTME: Batch commands act on every reference and report all failures together.

use super::context::Context;
use crate::cli::{CreateArgs, Format, RunArgs};
use chrono::Utc;
use highk::config::{HealthcheckConfig, parse_signal};
use highk::container::labels::LogConfig;
use highk::container::{
    AttachOutcome, ContainerManager, ContainerSummary, CreateOptions, StartOptions,
    human_duration,
};
use highk::diagnostics::Diagnostics;
use highk::error::{Error, Result};
use highk::network::{NetworkingOptions, parse_port_spec};
use highk::output::{Output, OutputMode};
use highk::runtime::Runtime;
use highk::types::SHORT_ID_LEN;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// `KEY=value` pairs; a bare `KEY` maps to an empty value.
pub fn parse_key_values(args: &[String]) -> BTreeMap<String, String> {
    args.iter()
        .map(|arg| match arg.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (arg.clone(), String::new()),
        })
        .collect()
}

fn healthcheck(args: &CreateArgs) -> Result<Option<HealthcheckConfig>> {
    let tuned = args.health_interval.is_some()
        || args.health_timeout.is_some()
        || args.health_retries.is_some()
        || args.health_start_period.is_some();
    if args.no_healthcheck {
        if args.health_cmd.is_some() || tuned {
            return Err(Error::InvalidArgument(
                "--no-healthcheck conflicts with --health-* options".to_string(),
            ));
        }
        return Ok(Some(HealthcheckConfig::disabled()));
    }
    let Some(ref cmd) = args.health_cmd else {
        if tuned {
            return Err(Error::InvalidArgument(
                "--health-* options need --health-cmd".to_string(),
            ));
        }
        return Ok(None);
    };
    let mut check = HealthcheckConfig::shell(cmd);
    if let Some(interval) = args.health_interval {
        check.interval = interval;
    }
    if let Some(timeout) = args.health_timeout {
        check.timeout = timeout;
    }
    if let Some(retries) = args.health_retries {
        check.retries = retries;
    }
    if let Some(period) = args.health_start_period {
        check.start_period = period;
    }
    Ok(Some(check))
}

fn log_config(args: &CreateArgs) -> Result<Option<LogConfig>> {
    if args.log_driver.is_none() && args.log_opts.is_empty() {
        return Ok(None);
    }
    let mut opts = BTreeMap::new();
    for opt in &args.log_opts {
        let (k, v) = opt.split_once('=').ok_or_else(|| {
            Error::InvalidArgument(format!("invalid log option {:?}: expected key=value", opt))
        })?;
        opts.insert(k.to_string(), v.to_string());
    }
    Ok(Some(LogConfig {
        driver: args.log_driver.clone().unwrap_or_else(|| "json-file".to_string()),
        opts,
    }))
}

/// Translate parsed flags into lifecycle options.
pub fn create_options(ctx: &Context, args: &CreateArgs, auto_remove: bool) -> Result<CreateOptions> {
    let mut port_mappings = Vec::new();
    for spec in &args.publish {
        port_mappings.extend(parse_port_spec(spec)?);
    }
    let networking = NetworkingOptions {
        networks: args.networks.clone(),
        ipv4: args.ip.clone(),
        ipv6: args.ip6.clone(),
        mac_address: args.mac_address.clone(),
        hostname: args.hostname.clone().unwrap_or_default(),
        domainname: args.domainname.clone().unwrap_or_default(),
        uts: args.uts.clone(),
        dns_servers: args.dns.clone(),
        dns_search: args.dns_search.clone(),
        dns_options: args.dns_options.clone(),
        add_hosts: args.add_hosts.clone(),
        port_mappings,
    };

    Ok(CreateOptions {
        image: args.image.clone(),
        command: args.command.clone(),
        entrypoint: args.entrypoint.as_ref().map(|e| match e.as_str() {
            "" => Vec::new(),
            e => vec![e.to_string()],
        }),
        name: args.name.clone(),
        env: args.env.clone(),
        labels: parse_key_values(&args.labels),
        workdir: args.workdir.clone(),
        user: args.user.clone(),
        tty: args.tty,
        interactive: args.interactive,
        networking,
        volumes: args.volumes.clone(),
        restart: args
            .restart
            .clone()
            .unwrap_or_else(|| ctx.config.default_restart_policy.clone()),
        stop_signal: args.stop_signal.clone(),
        stop_timeout: args.stop_timeout,
        healthcheck: healthcheck(args)?,
        log_config: log_config(args)?,
        detach_keys: args.detach_keys.clone(),
        cid_file: args.cidfile.clone(),
        pid_file: args.pidfile.clone(),
        pid: args.pid.clone(),
        ipc: args.ipc.clone(),
        read_only: args.read_only,
        pull: args.pull,
        auto_remove,
        platform: args.platform.clone(),
    })
}

/// Run `op` for every reference, print the ones that succeeded, and join the failures.
async fn each<'r, F, Fut>(references: &'r [String], op: F) -> Result<()>
where
    F: Fn(&'r str) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut errors = Vec::new();
    for reference in references {
        match op(reference.as_str()).await {
            Ok(()) => println!("{reference}"),
            Err(e) => errors.push(e),
        }
    }
    Error::join(errors)
}

pub async fn create(ctx: &Context, args: &CreateArgs) -> Result<()> {
    let options = create_options(ctx, args, false)?;
    let runtime = ctx.connect().await?;
    let cni = ctx.cni()?;
    let manager = ctx.manager(&runtime, &cni)?;
    let id = manager.create(&options).await?;
    println!("{id}");
    Ok(())
}

pub async fn run(ctx: &Context, args: &RunArgs) -> Result<()> {
    if args.detach && args.rm {
        return Err(Error::InvalidArgument(
            "flags -d and --rm cannot be specified together".to_string(),
        ));
    }
    let options = create_options(ctx, &args.create, args.rm)?;
    let runtime = ctx.connect().await?;
    let cni = ctx.cni()?;
    let manager = ctx.manager(&runtime, &cni)?;
    let id = manager.create(&options).await?;

    let start = StartOptions {
        attach: !args.detach,
        interactive: options.interactive,
        detach_keys: None,
    };
    let outcome = match manager.start(id.as_str(), &start).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if args.rm {
                auto_remove(&manager, id.as_str()).await;
            }
            return Err(e);
        }
    };

    match outcome {
        AttachOutcome::Detached => {
            if args.detach {
                println!("{id}");
            }
            Ok(())
        }
        AttachOutcome::Exited(status) => {
            if args.rm {
                auto_remove(&manager, id.as_str()).await;
            }
            match status.code() {
                0 => Ok(()),
                code => Err(Error::ContainerExit(code)),
            }
        }
    }
}

async fn auto_remove<R: Runtime>(manager: &ContainerManager<'_, R>, id: &str) {
    if let Err(e) = manager.remove(id, true, true).await {
        tracing::warn!("failed to remove container {}: {}", id, e);
    }
}

pub async fn start(
    ctx: &Context,
    containers: &[String],
    attach: bool,
    interactive: bool,
    detach_keys: Option<String>,
) -> Result<()> {
    if attach && containers.len() > 1 {
        return Err(Error::InvalidArgument(
            "you cannot attach to multiple containers at once".to_string(),
        ));
    }
    let runtime = ctx.connect().await?;
    let cni = ctx.cni()?;
    let manager = ctx.manager(&runtime, &cni)?;
    let options = StartOptions {
        attach,
        interactive,
        detach_keys,
    };

    if attach {
        return match manager.start(&containers[0], &options).await? {
            AttachOutcome::Exited(status) if status.code() != 0 => {
                Err(Error::ContainerExit(status.code()))
            }
            _ => Ok(()),
        };
    }
    let (manager, options) = (&manager, &options);
    each(containers, |reference| async move {
        manager.start(reference, options).await.map(|_| ())
    })
    .await
}

pub async fn stop(ctx: &Context, containers: &[String], time: Option<u64>) -> Result<()> {
    let runtime = ctx.connect().await?;
    let cni = ctx.cni()?;
    let manager = ctx.manager(&runtime, &cni)?;
    let timeout = time.map(Duration::from_secs);
    each(containers, |reference| manager.stop(reference, timeout)).await
}

pub async fn restart(ctx: &Context, containers: &[String], time: Option<u64>) -> Result<()> {
    let runtime = ctx.connect().await?;
    let cni = ctx.cni()?;
    let manager = ctx.manager(&runtime, &cni)?;
    let timeout = time.map(Duration::from_secs);
    each(containers, |reference| manager.restart(reference, timeout)).await
}

pub async fn kill(ctx: &Context, containers: &[String], signal: &str) -> Result<()> {
    let signal = parse_signal(signal).map_err(Error::InvalidArgument)?;
    let runtime = ctx.connect().await?;
    let cni = ctx.cni()?;
    let manager = &ctx.manager(&runtime, &cni)?;
    each(containers, |reference| async move {
        manager.kill(reference, signal).await.map(|_| ())
    })
    .await
}

pub async fn pause(ctx: &Context, containers: &[String]) -> Result<()> {
    let runtime = ctx.connect().await?;
    let cni = ctx.cni()?;
    let manager = &ctx.manager(&runtime, &cni)?;
    each(containers, |reference| async move {
        manager.pause(reference).await.map(|_| ())
    })
    .await
}

pub async fn unpause(ctx: &Context, containers: &[String]) -> Result<()> {
    let runtime = ctx.connect().await?;
    let cni = ctx.cni()?;
    let manager = &ctx.manager(&runtime, &cni)?;
    each(containers, |reference| async move {
        manager.unpause(reference).await.map(|_| ())
    })
    .await
}

pub async fn rm(ctx: &Context, containers: &[String], force: bool, volumes: bool) -> Result<()> {
    let runtime = ctx.connect().await?;
    let cni = ctx.cni()?;
    let manager = ctx.manager(&runtime, &cni)?;
    each(containers, |reference| manager.remove(reference, force, volumes)).await
}

pub async fn rename(ctx: &Context, container: &str, new_name: &str) -> Result<()> {
    let runtime = ctx.connect().await?;
    let cni = ctx.cni()?;
    let manager = ctx.manager(&runtime, &cni)?;
    manager.rename(container, new_name).await
}

pub async fn wait(ctx: &Context, containers: &[String]) -> Result<()> {
    let runtime = ctx.connect().await?;
    let cni = ctx.cni()?;
    let manager = ctx.manager(&runtime, &cni)?;
    let mut errors = Vec::new();
    for reference in containers {
        match manager.wait(reference).await {
            Ok(status) => println!("{}", status.code()),
            Err(e) => errors.push(e),
        }
    }
    Error::join(errors)
}

pub async fn inspect(ctx: &Context, containers: &[String]) -> Result<()> {
    let runtime = ctx.connect().await?;
    let cni = ctx.cni()?;
    let manager = ctx.manager(&runtime, &cni)?;
    let mut documents = Vec::new();
    let mut errors = Vec::new();
    for reference in containers {
        match manager.inspect(reference).await {
            Ok(doc) => documents.push(doc),
            Err(e) => errors.push(e),
        }
    }
    Output::new(OutputMode::Normal).document(&documents)?;
    Error::join(errors)
}

fn ps_row(summary: &ContainerSummary, no_trunc: bool) -> Vec<String> {
    let (id, command) = if no_trunc {
        (summary.id.clone(), summary.command.clone())
    } else {
        let id = summary.id.chars().take(SHORT_ID_LEN).collect();
        let command = if summary.command.chars().count() > 20 {
            let short: String = summary.command.chars().take(17).collect();
            format!("{short}...")
        } else {
            summary.command.clone()
        };
        (id, command)
    };
    vec![
        id,
        summary.image.clone(),
        format!("{command:?}"),
        format!("{} ago", human_duration(Utc::now() - summary.created_at)),
        summary.status.clone(),
        summary.ports.clone(),
        summary.names.clone(),
    ]
}

pub async fn ps(
    ctx: &Context,
    all: bool,
    quiet: bool,
    filters: &[String],
    no_trunc: bool,
    format: Format,
) -> Result<()> {
    let runtime = ctx.connect().await?;
    let cni = ctx.cni()?;
    let manager = ctx.manager(&runtime, &cni)?;
    let mut diag = Diagnostics::default();
    let rows = manager.list(all, filters, &mut diag).await?;

    let mode = match (quiet, format) {
        (true, _) => OutputMode::Quiet,
        (false, Format::Json) => OutputMode::Json,
        (false, Format::Table) => OutputMode::Normal,
    };
    let output = Output::new(mode);
    output.warnings(&diag);
    output.listing(
        &[
            "CONTAINER ID",
            "IMAGE",
            "COMMAND",
            "CREATED",
            "STATUS",
            "PORTS",
            "NAMES",
        ],
        &rows,
        |s| ps_row(s, no_trunc),
    );
    Ok(())
}
