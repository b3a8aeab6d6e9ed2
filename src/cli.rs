// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines global flags, container commands and the volume/network/namespace groups.

use clap::{Args, Parser, Subcommand};
use highk::config::RestartPolicy;
use highk::runtime::PullPolicy;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "highk")]
#[command(about = "Docker-compatible container manager for containerd")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// containerd address
    #[arg(long, global = true, env = "HIGHK_ADDRESS")]
    pub address: Option<String>,

    /// containerd namespace
    #[arg(long, short = 'n', global = true, env = "HIGHK_NAMESPACE")]
    pub namespace: Option<String>,

    /// Root directory of persistent highk state
    #[arg(long, global = true)]
    pub data_root: Option<PathBuf>,

    /// containerd snapshotter
    #[arg(long, global = true)]
    pub snapshotter: Option<String>,

    /// CNI plugin binary directory
    #[arg(long, global = true)]
    pub cni_path: Option<PathBuf>,

    /// CNI configuration directory
    #[arg(long, global = true)]
    pub cni_netconfpath: Option<PathBuf>,

    /// Allow plain HTTP registries
    #[arg(long, global = true)]
    pub insecure_registry: bool,

    #[arg(long, global = true)]
    pub experimental: bool,

    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Configuration file
    #[arg(long, global = true, env = "HIGHK_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new container
    Create(CreateArgs),

    /// Create and start a container
    Run(RunArgs),

    /// Start one or more stopped containers
    Start {
        /// Attach to the container's output
        #[arg(short, long)]
        attach: bool,

        /// Attach stdin
        #[arg(short, long)]
        interactive: bool,

        /// Key sequence for detaching
        #[arg(long)]
        detach_keys: Option<String>,

        #[arg(required = true)]
        containers: Vec<String>,
    },

    /// Stop one or more running containers
    Stop {
        /// Seconds to wait before killing
        #[arg(short, long)]
        time: Option<u64>,

        #[arg(required = true)]
        containers: Vec<String>,
    },

    /// Restart one or more containers
    Restart {
        #[arg(short, long)]
        time: Option<u64>,

        #[arg(required = true)]
        containers: Vec<String>,
    },

    /// Send a signal to running containers
    Kill {
        #[arg(short, long, default_value = "KILL")]
        signal: String,

        #[arg(required = true)]
        containers: Vec<String>,
    },

    /// Pause all processes in containers
    Pause {
        #[arg(required = true)]
        containers: Vec<String>,
    },

    /// Unpause all processes in containers
    Unpause {
        #[arg(required = true)]
        containers: Vec<String>,
    },

    /// Remove one or more containers
    Rm {
        /// Remove running containers
        #[arg(short, long)]
        force: bool,

        /// Remove anonymous volumes
        #[arg(short, long)]
        volumes: bool,

        #[arg(required = true)]
        containers: Vec<String>,
    },

    /// Rename a container
    Rename { container: String, new_name: String },

    /// List containers
    Ps {
        /// Show all containers
        #[arg(short, long)]
        all: bool,

        /// Only display container IDs
        #[arg(short, long)]
        quiet: bool,

        /// Filter output (key=value)
        #[arg(short, long = "filter")]
        filters: Vec<String>,

        #[arg(long)]
        no_trunc: bool,

        /// `table` or `json`
        #[arg(long, default_value = "table")]
        format: Format,
    },

    /// Display detailed information on containers
    Inspect {
        #[arg(required = true)]
        containers: Vec<String>,
    },

    /// Block until containers stop, then print their exit codes
    Wait {
        #[arg(required = true)]
        containers: Vec<String>,
    },

    /// Copy files between a container and the local filesystem
    Cp {
        /// Follow symbolic links in the source path
        #[arg(short = 'L', long)]
        follow_link: bool,

        source: String,
        destination: String,
    },

    /// Manage volumes
    #[command(subcommand)]
    Volume(VolumeCommands),

    /// Manage networks
    #[command(subcommand)]
    Network(NetworkCommands),

    /// Manage containerd namespaces
    #[command(subcommand, alias = "ns")]
    Namespace(NamespaceCommands),

    /// Log in to a registry
    Login {
        server: Option<String>,

        #[arg(short, long)]
        username: Option<String>,

        #[arg(short, long)]
        password: Option<String>,

        /// Take the password from stdin
        #[arg(long)]
        password_stdin: bool,
    },

    /// Log out from a registry
    Logout { server: Option<String> },

    #[command(subcommand, hide = true)]
    Internal(InternalCommands),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Table,
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Run in the background and print the container ID
    #[arg(short, long)]
    pub detach: bool,

    /// Remove the container when it exits
    #[arg(long)]
    pub rm: bool,

    #[command(flatten)]
    pub create: CreateArgs,
}

#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    /// Keep stdin open
    #[arg(short, long)]
    pub interactive: bool,

    /// Allocate a pseudo-TTY
    #[arg(short, long)]
    pub tty: bool,

    #[arg(long)]
    pub name: Option<String>,

    /// Networks to connect, or host, none, container:<ref>
    #[arg(long = "network", alias = "net")]
    pub networks: Vec<String>,

    /// Publish a container port (hostIP:hostPort:containerPort/proto)
    #[arg(short = 'p', long = "publish")]
    pub publish: Vec<String>,

    /// Bind mount or volume (src:dst[:opts])
    #[arg(short = 'v', long = "volume")]
    pub volumes: Vec<String>,

    /// Environment variables
    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,

    #[arg(short = 'l', long = "label")]
    pub labels: Vec<String>,

    /// Overwrite the image entrypoint; empty clears it
    #[arg(long)]
    pub entrypoint: Option<String>,

    #[arg(short = 'w', long)]
    pub workdir: Option<String>,

    #[arg(short = 'u', long)]
    pub user: Option<String>,

    #[arg(long)]
    pub hostname: Option<String>,

    #[arg(long)]
    pub domainname: Option<String>,

    /// `host` to share the host UTS namespace
    #[arg(long)]
    pub uts: Option<String>,

    #[arg(long = "dns")]
    pub dns: Vec<String>,

    #[arg(long = "dns-search")]
    pub dns_search: Vec<String>,

    #[arg(long = "dns-option", alias = "dns-opt")]
    pub dns_options: Vec<String>,

    /// Custom host-to-IP mapping (host:ip)
    #[arg(long = "add-host")]
    pub add_hosts: Vec<String>,

    #[arg(long)]
    pub mac_address: Option<String>,

    #[arg(long)]
    pub ip: Option<String>,

    #[arg(long)]
    pub ip6: Option<String>,

    /// no, always, unless-stopped, on-failure[:max-retries]
    #[arg(long)]
    pub restart: Option<RestartPolicy>,

    #[arg(long)]
    pub stop_signal: Option<String>,

    /// Seconds
    #[arg(long)]
    pub stop_timeout: Option<u64>,

    #[arg(long)]
    pub detach_keys: Option<String>,

    /// Write the container ID to a file
    #[arg(long)]
    pub cidfile: Option<PathBuf>,

    /// Write the container pid to a file
    #[arg(long)]
    pub pidfile: Option<PathBuf>,

    /// PID namespace: host or container:<ref>
    #[arg(long)]
    pub pid: Option<String>,

    /// IPC namespace: private, shareable, host or container:<ref>
    #[arg(long)]
    pub ipc: Option<String>,

    /// Mount the root filesystem read-only
    #[arg(long)]
    pub read_only: bool,

    /// missing, always or never
    #[arg(long, default_value = "missing")]
    pub pull: PullPolicy,

    #[arg(long)]
    pub platform: Option<String>,

    #[arg(long)]
    pub health_cmd: Option<String>,

    #[arg(long, value_parser = parse_duration)]
    pub health_interval: Option<Duration>,

    #[arg(long, value_parser = parse_duration)]
    pub health_timeout: Option<Duration>,

    #[arg(long)]
    pub health_retries: Option<u32>,

    #[arg(long, value_parser = parse_duration)]
    pub health_start_period: Option<Duration>,

    #[arg(long)]
    pub no_healthcheck: bool,

    #[arg(long)]
    pub log_driver: Option<String>,

    #[arg(long = "log-opt")]
    pub log_opts: Vec<String>,

    pub image: String,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

#[derive(Subcommand)]
pub enum VolumeCommands {
    /// Create a volume
    Create {
        name: Option<String>,

        #[arg(long = "label")]
        labels: Vec<String>,
    },

    /// List volumes
    #[command(alias = "list")]
    Ls {
        #[arg(short, long)]
        quiet: bool,

        /// Show disk usage
        #[arg(short, long)]
        size: bool,

        #[arg(long, default_value = "table")]
        format: Format,
    },

    /// Display detailed information on volumes
    Inspect {
        #[arg(required = true)]
        volumes: Vec<String>,
    },

    /// Remove volumes
    Rm {
        #[arg(required = true)]
        volumes: Vec<String>,
    },

    /// Remove all unused volumes
    Prune {
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum NetworkCommands {
    /// List networks
    #[command(alias = "list")]
    Ls {
        #[arg(short, long)]
        quiet: bool,

        #[arg(long, default_value = "table")]
        format: Format,
    },

    /// Create a network
    Create {
        name: String,

        /// bridge, macvlan or ipvlan
        #[arg(short, long, default_value = "bridge")]
        driver: String,

        #[arg(long)]
        subnet: Option<String>,

        #[arg(long)]
        gateway: Option<String>,

        /// Parent interface for macvlan and ipvlan (-o parent=eth0)
        #[arg(short = 'o', long = "opt")]
        opts: Vec<String>,

        #[arg(long = "label")]
        labels: Vec<String>,
    },

    /// Display detailed information on networks
    Inspect {
        #[arg(required = true)]
        networks: Vec<String>,
    },

    /// Remove networks
    Rm {
        #[arg(required = true)]
        networks: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum NamespaceCommands {
    /// List namespaces
    #[command(alias = "list")]
    Ls {
        #[arg(short, long)]
        quiet: bool,
    },

    /// Create a namespace
    Create {
        name: String,

        #[arg(long = "label")]
        labels: Vec<String>,
    },

    /// Replace namespace labels
    Update {
        name: String,

        #[arg(long = "label")]
        labels: Vec<String>,
    },

    /// Remove namespaces
    #[command(alias = "remove")]
    Rm {
        /// Also remove the namespace cgroup
        #[arg(short, long)]
        cgroup: bool,

        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Display detailed information on namespaces
    Inspect {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum InternalCommands {
    /// Network setup invoked as an OCI hook; reads the container state from stdin
    OciHook { event: String },
}
