//! Server provisioning lifecycle orchestration.
//!
//! [`Provisioner`] sequences resource resolution, deployment, exposure, SSH
//! bootstrap and teardown against a [`ComputeApi`]. Every step records what
//! it created in the [`Machine`](crate::machine::Machine) record before
//! moving on, so a failed run leaves enough state for `remove` to clean up.

use std::time::Duration;

use crate::compute::{ComputeApi, Server};
use crate::public_ip::PublicIpDetector;
use crate::ssh::{CommandRunner, SshClient};
use crate::wait::{POLL_INTERVAL, WaitError, WaitPolicy, poll_until};

mod create;
mod error;
mod expose;
mod lifecycle;
mod resolve;

pub use error::{ProvisionError, ResourceKind};
pub use lifecycle::MachineState;

/// Deadlines for the asynchronous provider operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timeouts {
    /// Server deployment.
    pub deploy: Duration,
    /// Server deletion.
    pub delete: Duration,
    /// Power on.
    pub start: Duration,
    /// Graceful shutdown.
    pub stop: Duration,
    /// Hard power off.
    pub power_off: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            deploy: Duration::from_secs(15 * 60),
            delete: Duration::from_secs(10 * 60),
            start: Duration::from_secs(3 * 60),
            stop: Duration::from_secs(3 * 60),
            power_off: Duration::from_secs(2 * 60),
        }
    }
}

/// Drives a machine through its lifecycle.
#[derive(Clone, Debug)]
pub struct Provisioner<C, R, D>
where
    C: ComputeApi,
    R: CommandRunner,
    D: PublicIpDetector,
{
    compute: C,
    ssh: SshClient<R>,
    detector: D,
    timeouts: Timeouts,
    poll_interval: Duration,
}

impl<C, R, D> Provisioner<C, R, D>
where
    C: ComputeApi,
    R: CommandRunner,
    D: PublicIpDetector,
{
    /// Creates a provisioner with default timeouts.
    #[must_use]
    pub fn new(compute: C, ssh: SshClient<R>, detector: D) -> Self {
        Self {
            compute,
            ssh,
            detector,
            timeouts: Timeouts::default(),
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Overrides the operation deadlines.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Overrides the delay between status polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Returns the compute client.
    #[must_use]
    pub const fn compute(&self) -> &C {
        &self.compute
    }

    /// Polls the server until `is_done` accepts its record (`None` once the
    /// server no longer exists).
    async fn wait_for_server<P>(
        &self,
        server_id: &str,
        action: &'static str,
        timeout: Duration,
        is_done: P,
    ) -> Result<Option<Server>, ProvisionError>
    where
        P: Fn(Option<&Server>) -> bool,
    {
        let policy = WaitPolicy {
            interval: self.poll_interval,
            timeout,
        };
        poll_until(
            policy,
            || self.compute.get_server(server_id),
            |server: &Option<Server>| is_done(server.as_ref()),
        )
        .await
        .map_err(|err| match err {
            WaitError::Fetch(source) => ProvisionError::Compute(source),
            WaitError::Expired { timeout: expired } => ProvisionError::Timeout {
                action,
                resource_id: server_id.to_owned(),
                timeout: expired,
            },
        })
    }
}

#[cfg(test)]
mod tests;
