// ABOUTME: Entry point for the highk CLI application.
// ABOUTME: Parses arguments, sets up tracing, and dispatches to command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, InternalCommands, NamespaceCommands, NetworkCommands, VolumeCommands};
use commands::Context;
use highk::error::{Error, Result};
use highk::output::{Output, OutputMode};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let ctx = match Context::load(&cli.global) {
        Ok(ctx) => ctx,
        Err(e) => exit_with(e),
    };

    let filter = if ctx.config.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    if let Err(e) = run(&ctx, cli.command).await {
        exit_with(e);
    }
}

fn exit_with(e: Error) -> ! {
    Output::new(OutputMode::Normal).error(&e.to_string());
    std::process::exit(e.exit_code());
}

async fn run(ctx: &Context, command: Commands) -> Result<()> {
    match command {
        Commands::Create(args) => commands::create(ctx, &args).await,
        Commands::Run(args) => commands::run(ctx, &args).await,
        Commands::Start {
            attach,
            interactive,
            detach_keys,
            containers,
        } => commands::start(ctx, &containers, attach, interactive, detach_keys).await,
        Commands::Stop { time, containers } => commands::stop(ctx, &containers, time).await,
        Commands::Restart { time, containers } => {
            commands::restart(ctx, &containers, time).await
        }
        Commands::Kill { signal, containers } => {
            commands::kill(ctx, &containers, &signal).await
        }
        Commands::Pause { containers } => commands::pause(ctx, &containers).await,
        Commands::Unpause { containers } => commands::unpause(ctx, &containers).await,
        Commands::Rm {
            force,
            volumes,
            containers,
        } => commands::rm(ctx, &containers, force, volumes).await,
        Commands::Rename {
            container,
            new_name,
        } => commands::rename(ctx, &container, &new_name).await,
        Commands::Ps {
            all,
            quiet,
            filters,
            no_trunc,
            format,
        } => commands::ps(ctx, all, quiet, &filters, no_trunc, format).await,
        Commands::Inspect { containers } => commands::inspect(ctx, &containers).await,
        Commands::Wait { containers } => commands::wait(ctx, &containers).await,
        Commands::Cp {
            follow_link,
            source,
            destination,
        } => commands::cp(ctx, &source, &destination, follow_link).await,
        Commands::Volume(command) => match command {
            VolumeCommands::Create { name, labels } => {
                commands::volume::create(ctx, name.as_deref(), &labels)
            }
            VolumeCommands::Ls {
                quiet,
                size,
                format,
            } => commands::volume::ls(ctx, quiet, size, format),
            VolumeCommands::Inspect { volumes } => commands::volume::inspect(ctx, &volumes),
            VolumeCommands::Rm { volumes } => commands::volume::rm(ctx, &volumes).await,
            VolumeCommands::Prune { force } => commands::volume::prune(ctx, force).await,
        },
        Commands::Network(command) => match command {
            NetworkCommands::Ls { quiet, format } => commands::network::ls(ctx, quiet, format),
            NetworkCommands::Create {
                name,
                driver,
                subnet,
                gateway,
                opts,
                labels,
            } => commands::network::create(ctx, &name, &driver, subnet, gateway, &opts, &labels),
            NetworkCommands::Inspect { networks } => commands::network::inspect(ctx, &networks),
            NetworkCommands::Rm { networks } => commands::network::rm(ctx, &networks).await,
        },
        Commands::Namespace(command) => match command {
            NamespaceCommands::Ls { quiet } => commands::namespace::ls(ctx, quiet).await,
            NamespaceCommands::Create { name, labels } => {
                commands::namespace::create(ctx, &name, &labels).await
            }
            NamespaceCommands::Update { name, labels } => {
                commands::namespace::update(ctx, &name, &labels).await
            }
            NamespaceCommands::Rm { cgroup, names } => {
                commands::namespace::rm(ctx, &names, cgroup).await
            }
            NamespaceCommands::Inspect { names } => {
                commands::namespace::inspect(ctx, &names).await
            }
        },
        Commands::Login {
            server,
            username,
            password,
            password_stdin,
        } => commands::login(ctx, server, username, password, password_stdin).await,
        Commands::Logout { server } => commands::logout(server.as_deref()).await,
        Commands::Internal(InternalCommands::OciHook { event }) => {
            commands::oci_hook(ctx, &event).await
        }
    }
}
