//! Binary entry point for the `ddcloud-machine` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use ddcloud_machine::{
    CloudControlClient, CloudControlConfig, ComputeError, ConfigError, IfconfigDetector, Machine,
    MachineState, MachineStore, ProcessCommandRunner, ProvisionError, Provisioner, SshClient,
    StoreError,
};

mod cli;

use cli::{Cli, CreateCommand};

type LiveProvisioner = Provisioner<CloudControlClient, ProcessCommandRunner, IfconfigDetector>;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("CloudControl connection failed: {0}")]
    Connect(#[from] ComputeError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli, &mut io::stdout()).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli, out: &mut impl Write) -> Result<(), CliError> {
    let mut config = CloudControlConfig::load_without_cli_args()?;
    let store = MachineStore::new(config.storage_root()?);

    match cli {
        Cli::Create(args) => {
            apply_create_overrides(&args, &mut config);
            let machine = create(&config, &store, &args.name).await?;
            if let Some(url) = machine.url() {
                writeln!(out, "{url}")?;
            }
        }
        Cli::State(args) => {
            let machine = store.load(&args.name)?;
            let state = if machine.server_id.is_resolved() {
                connect(&config).await?.state(&machine).await?
            } else {
                MachineState::None
            };
            writeln!(out, "{state}")?;
        }
        Cli::Url(args) => {
            let machine = store.load(&args.name)?;
            writeln!(out, "{}", machine.url().unwrap_or_default())?;
        }
        Cli::SshHostname(args) => {
            writeln!(out, "{}", store.load(&args.name)?.ssh_hostname()?)?;
        }
        Cli::SshKeyPath(args) => {
            writeln!(out, "{}", store.load(&args.name)?.key_path())?;
        }
        Cli::Remove(args) => remove(&config, &store, &args.name).await?,
        Cli::Start(args) => {
            let machine = store.load(&args.name)?;
            connect(&config).await?.start(&machine).await?;
        }
        Cli::Stop(args) => {
            let machine = store.load(&args.name)?;
            connect(&config).await?.stop(&machine).await?;
        }
        Cli::Restart(args) => {
            let machine = store.load(&args.name)?;
            connect(&config).await?.restart(&machine).await?;
        }
        Cli::Kill(args) => {
            let machine = store.load(&args.name)?;
            connect(&config).await?.kill(&machine).await?;
        }
    }
    Ok(())
}

async fn connect(config: &CloudControlConfig) -> Result<LiveProvisioner, CliError> {
    let client = CloudControlClient::connect(config.cloudcontrol_settings()?).await?;
    debug!(organization_id = client.organization_id(), "connected to CloudControl");
    let detector = IfconfigDetector::new().map_err(ProvisionError::from)?;
    Ok(Provisioner::new(
        client,
        SshClient::with_process_runner(config.ssh_tools()),
        detector,
    ))
}

async fn create(
    config: &CloudControlConfig,
    store: &MachineStore,
    name: &str,
) -> Result<Machine, CliError> {
    let mut machine = if store.exists(name)? {
        let recorded = store.load(name)?;
        debug!(machine = name, "resuming from the recorded machine");
        recorded
    } else {
        let settings = config.machine_settings()?;
        let dir = store.create_dir(name)?;
        let mut fresh = Machine::new(name, dir, settings);
        fresh.bootstrap_password = config.bootstrap_password();
        fresh
    };
    let provisioner = connect(config).await?;
    store.save(&machine)?;

    let outcome = provisioner.create(&mut machine).await;
    store.save(&machine)?;
    outcome?;
    Ok(machine)
}

async fn remove(
    config: &CloudControlConfig,
    store: &MachineStore,
    name: &str,
) -> Result<(), CliError> {
    let mut machine = store.load(name)?;
    if machine.server_id.is_resolved() {
        let outcome = connect(config).await?.remove(&mut machine).await;
        if let Err(err) = outcome {
            store.save(&machine)?;
            return Err(err.into());
        }
    }
    store.delete(name)?;
    Ok(())
}

fn apply_create_overrides(args: &CreateCommand, config: &mut CloudControlConfig) {
    let strings = [
        (&args.network_domain, &mut config.network_domain),
        (&args.datacenter, &mut config.datacenter),
        (&args.vlan, &mut config.vlan),
        (&args.image, &mut config.image),
        (&args.ssh_user, &mut config.ssh_user),
    ];
    for (flag, target) in strings {
        if let Some(value) = flag {
            value.clone_into(target);
        }
    }

    let optional_strings = [
        (&args.private_ip, &mut config.private_ip),
        (&args.ssh_key, &mut config.ssh_key),
        (&args.ssh_bootstrap_password, &mut config.ssh_bootstrap_password),
        (&args.client_public_ip, &mut config.client_public_ip),
    ];
    for (flag, target) in optional_strings {
        if flag.is_some() {
            target.clone_from(flag);
        }
    }

    let optional_numbers = [
        (args.cpu_count, &mut config.cpu_count),
        (args.memory_gb, &mut config.memory_gb),
        (args.cores_per_socket, &mut config.cores_per_socket),
    ];
    for (flag, target) in optional_numbers {
        if flag.is_some() {
            *target = flag;
        }
    }

    if let Some(port) = args.ssh_port {
        config.ssh_port = port;
    }
    let toggles = [
        (args.create_ssh_firewall_rule, &mut config.create_ssh_firewall_rule),
        (args.create_docker_firewall_rule, &mut config.create_docker_firewall_rule),
        (args.use_private_ip, &mut config.use_private_ip),
    ];
    for (flag, target) in toggles {
        if flag {
            *target = Some(true);
        }
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
