//! Command-line interface definitions for the `ddcloud-machine` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `ddcloud-machine` binary.
#[derive(Debug, Parser)]
#[command(
    name = "ddcloud-machine",
    about = "Provision and manage Docker hosts on Dimension Data CloudControl",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Deploy, expose and bootstrap a machine. Running it again for an
    /// existing machine resumes with the recorded settings.
    #[command(name = "create", about = "Deploy, expose and bootstrap a machine")]
    Create(CreateCommand),
    /// Print the state of a machine's server.
    #[command(name = "state", about = "Print the state of a machine's server")]
    State(MachineArgs),
    /// Print the Docker endpoint URL of a machine.
    #[command(name = "url", about = "Print the Docker endpoint URL of a machine")]
    Url(MachineArgs),
    /// Delete a machine's server, rules and local files.
    #[command(name = "rm", about = "Delete a machine's server, rules and local files")]
    Remove(MachineArgs),
    /// Power a machine on.
    #[command(name = "start", about = "Power a machine on")]
    Start(MachineArgs),
    /// Shut a machine down gracefully.
    #[command(name = "stop", about = "Shut a machine down gracefully")]
    Stop(MachineArgs),
    /// Stop then start a machine.
    #[command(name = "restart", about = "Stop then start a machine")]
    Restart(MachineArgs),
    /// Power a machine off without a guest shutdown.
    #[command(name = "kill", about = "Power a machine off without a guest shutdown")]
    Kill(MachineArgs),
    /// Print the address SSH sessions connect to.
    #[command(name = "ssh-hostname", about = "Print the address SSH sessions connect to")]
    SshHostname(MachineArgs),
    /// Print the path of the machine's private key.
    #[command(name = "ssh-key-path", about = "Print the path of the machine's private key")]
    SshKeyPath(MachineArgs),
}

/// Names the machine an operation applies to.
#[derive(Debug, Args)]
pub(crate) struct MachineArgs {
    /// Machine name.
    #[arg(value_name = "NAME")]
    pub(crate) name: String,
}

/// Arguments for the `ddcloud-machine create` subcommand.
///
/// Each flag overrides the matching configuration value for this machine.
#[derive(Debug, Args)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "flags mirror the boolean configuration toggles"
)]
pub(crate) struct CreateCommand {
    /// Machine name; also used as the server name.
    #[arg(value_name = "NAME")]
    pub(crate) name: String,
    /// Network domain to deploy into.
    #[arg(long, value_name = "NAME")]
    pub(crate) network_domain: Option<String>,
    /// Data centre identifier, for example `AU9`.
    #[arg(long, value_name = "ID")]
    pub(crate) datacenter: Option<String>,
    /// VLAN to attach the server to.
    #[arg(long, value_name = "NAME")]
    pub(crate) vlan: Option<String>,
    /// OS image name.
    #[arg(long, value_name = "NAME")]
    pub(crate) image: Option<String>,
    /// Explicit private IPv4 address; places the server by address.
    #[arg(long, value_name = "IPV4")]
    pub(crate) private_ip: Option<String>,
    /// SSH login user.
    #[arg(long, value_name = "USER")]
    pub(crate) ssh_user: Option<String>,
    /// SSH port.
    #[arg(long, value_name = "PORT")]
    pub(crate) ssh_port: Option<u16>,
    /// Existing private key to import; `<PATH>.pub` must exist too.
    #[arg(long, value_name = "PATH")]
    pub(crate) ssh_key: Option<String>,
    /// Initial administrator password; generated when omitted.
    #[arg(long, value_name = "PASSWORD")]
    pub(crate) ssh_bootstrap_password: Option<String>,
    /// Create a firewall rule admitting SSH from this client.
    #[arg(long)]
    pub(crate) create_ssh_firewall_rule: bool,
    /// Create a firewall rule admitting Docker from this client.
    #[arg(long)]
    pub(crate) create_docker_firewall_rule: bool,
    /// Client public IPv4 address used in firewall rules; detected when
    /// omitted.
    #[arg(long, value_name = "IPV4")]
    pub(crate) client_public_ip: Option<String>,
    /// Reach the server by its private address; no NAT or firewall rules.
    #[arg(long)]
    pub(crate) use_private_ip: bool,
    /// Virtual CPU count.
    #[arg(long, value_name = "COUNT")]
    pub(crate) cpu_count: Option<u32>,
    /// Memory in gigabytes.
    #[arg(long, value_name = "GB")]
    pub(crate) memory_gb: Option<u32>,
    /// Cores per CPU socket.
    #[arg(long, value_name = "COUNT")]
    pub(crate) cores_per_socket: Option<u32>,
}
