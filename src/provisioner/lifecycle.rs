//! State queries, power control and teardown.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{info, warn};

use super::{ProvisionError, Provisioner, ResourceKind};
use crate::compute::{ComputeApi, Server};
use crate::machine::Machine;
use crate::public_ip::PublicIpDetector;
use crate::ssh::CommandRunner;

/// Observed state of a machine's server.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MachineState {
    /// No server exists.
    None,
    /// The server is still deploying.
    Starting,
    /// The server is deployed and powered on.
    Running,
    /// The server is deployed and powered off.
    Stopped,
}

impl MachineState {
    /// Maps a server record to a machine state.
    #[must_use]
    pub const fn of(server: Option<&Server>) -> Self {
        match server {
            None => Self::None,
            Some(found) if !found.deployed => Self::Starting,
            Some(found) if found.started => Self::Running,
            Some(_) => Self::Stopped,
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "None",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
        };
        formatter.write_str(label)
    }
}

/// Power transition requested of a server.
#[derive(Clone, Copy, Debug)]
enum PowerAction {
    Start,
    Shutdown,
    PowerOff,
}

impl PowerAction {
    const fn label(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Shutdown => "shutdown",
            Self::PowerOff => "power off",
        }
    }

    const fn wants_started(self) -> bool {
        matches!(self, Self::Start)
    }
}

impl<C, R, D> Provisioner<C, R, D>
where
    C: ComputeApi,
    R: CommandRunner,
    D: PublicIpDetector,
{
    /// Reports the state of the machine's server.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Compute`] when the server cannot be fetched.
    pub async fn state(&self, machine: &Machine) -> Result<MachineState, ProvisionError> {
        let Some(server_id) = machine.server_id.as_deref() else {
            return Ok(MachineState::None);
        };
        let server = self.compute.get_server(server_id).await?;
        Ok(MachineState::of(server.as_ref()))
    }

    /// Powers the server on and waits until it reports started.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotCreated`] when no server is recorded,
    /// [`ProvisionError::NotFound`] when it no longer exists, or
    /// [`ProvisionError::Timeout`] when it does not start in time.
    pub async fn start(&self, machine: &Machine) -> Result<(), ProvisionError> {
        self.change_power(machine, PowerAction::Start, self.timeouts.start)
            .await
    }

    /// Shuts the server down gracefully and waits until it reports stopped.
    ///
    /// # Errors
    ///
    /// As for [`Provisioner::start`].
    pub async fn stop(&self, machine: &Machine) -> Result<(), ProvisionError> {
        self.change_power(machine, PowerAction::Shutdown, self.timeouts.stop)
            .await
    }

    /// Powers the server off without a guest shutdown.
    ///
    /// # Errors
    ///
    /// As for [`Provisioner::start`].
    pub async fn kill(&self, machine: &Machine) -> Result<(), ProvisionError> {
        self.change_power(machine, PowerAction::PowerOff, self.timeouts.power_off)
            .await
    }

    /// Stops then starts the server.
    ///
    /// # Errors
    ///
    /// As for [`Provisioner::start`].
    pub async fn restart(&self, machine: &Machine) -> Result<(), ProvisionError> {
        self.stop(machine).await?;
        self.start(machine).await
    }

    async fn change_power(
        &self,
        machine: &Machine,
        action: PowerAction,
        timeout: Duration,
    ) -> Result<(), ProvisionError> {
        let server_id = created_server(machine)?;
        let server = self
            .compute
            .get_server(server_id)
            .await?
            .ok_or_else(|| ProvisionError::NotFound {
                kind: ResourceKind::Server,
                name: server_id.to_owned(),
                scope: format!("machine {}", machine.name),
            })?;
        let wants_started = action.wants_started();
        if server.started == wants_started {
            info!(server_id, action = action.label(), "server already in requested state");
            return Ok(());
        }

        info!(server_id, action = action.label(), "changing server power state");
        match action {
            PowerAction::Start => self.compute.start_server(server_id).await?,
            PowerAction::Shutdown => self.compute.shutdown_server(server_id).await?,
            PowerAction::PowerOff => self.compute.power_off_server(server_id).await?,
        }
        self.wait_for_server(server_id, action.label(), timeout, |current| {
            current.is_some_and(|found| found.started == wants_started)
        })
        .await?;
        Ok(())
    }

    /// Deletes the server and every rule created for it.
    ///
    /// Identifiers are cleared as each resource is deleted, so a failed
    /// removal can be retried. A machine that never got a server, or whose
    /// server is already gone, is removed without error.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Compute`] when a delete call fails, or
    /// [`ProvisionError::Timeout`] when the server outlives its deadline.
    pub async fn remove(&self, machine: &mut Machine) -> Result<(), ProvisionError> {
        let Some(server_id) = machine.server_id.as_deref().map(str::to_owned) else {
            info!(machine = %machine.name, "no server recorded; nothing to remove");
            return Ok(());
        };
        let Some(server) = self.compute.get_server(&server_id).await? else {
            warn!(server_id = %server_id, "server already deleted");
            machine.server_id.clear();
            return Ok(());
        };

        if server.started {
            info!(server_id = %server_id, "stopping server before removal");
            self.compute.shutdown_server(&server_id).await?;
            self.wait_for_server(&server_id, "shutdown", self.timeouts.stop, |current| {
                current.is_none_or(|found| !found.started)
            })
            .await?;
        }

        if let Some(rule_id) = machine.ssh_firewall_rule_id.as_deref() {
            info!(firewall_rule_id = %rule_id, "deleting SSH firewall rule");
            self.compute.delete_firewall_rule(rule_id).await?;
            machine.ssh_firewall_rule_id.clear();
        }
        if let Some(rule_id) = machine.docker_firewall_rule_id.as_deref() {
            info!(firewall_rule_id = %rule_id, "deleting Docker firewall rule");
            self.compute.delete_firewall_rule(rule_id).await?;
            machine.docker_firewall_rule_id.clear();
        }
        self.remove_nat_rule(machine).await?;

        info!(server_id = %server_id, "deleting server");
        self.compute.delete_server(&server_id).await?;
        self.wait_for_server(&server_id, "deletion", self.timeouts.delete, |current| {
            current.is_none()
        })
        .await?;
        machine.server_id.clear();
        info!(machine = %machine.name, "machine removed");
        Ok(())
    }

    async fn remove_nat_rule(&self, machine: &mut Machine) -> Result<(), ProvisionError> {
        let Some(rule_id) = machine.nat_rule_id.as_deref() else {
            return Ok(());
        };
        if self.compute.get_nat_rule(rule_id).await?.is_some() {
            info!(nat_rule_id = %rule_id, "deleting NAT rule");
            self.compute.delete_nat_rule(rule_id).await?;
        } else {
            warn!(nat_rule_id = %rule_id, "NAT rule already deleted");
        }
        machine.nat_rule_id.clear();
        Ok(())
    }
}

impl Machine {
    /// Address to open SSH sessions against.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotCreated`] when no server has been
    /// created or no address is known yet.
    pub fn ssh_hostname(&self) -> Result<Ipv4Addr, ProvisionError> {
        match (self.server_id.is_resolved(), self.public_ip) {
            (true, Some(address)) => Ok(address),
            _ => Err(ProvisionError::NotCreated {
                name: self.name.clone(),
            }),
        }
    }
}

fn created_server(machine: &Machine) -> Result<&str, ProvisionError> {
    machine
        .server_id
        .as_deref()
        .ok_or_else(|| ProvisionError::NotCreated {
            name: machine.name.clone(),
        })
}
