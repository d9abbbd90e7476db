//! Error type for provisioning operations.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::compute::ComputeError;
use crate::public_ip::PublicIpError;
use crate::ssh::SshError;

/// Kind of remote resource named in a lookup failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceKind {
    /// Network domain.
    NetworkDomain,
    /// VLAN.
    Vlan,
    /// OS image.
    Image,
    /// Server.
    Server,
    /// NAT rule.
    NatRule,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NetworkDomain => "network domain",
            Self::Vlan => "VLAN",
            Self::Image => "OS image",
            Self::Server => "server",
            Self::NatRule => "NAT rule",
        };
        formatter.write_str(label)
    }
}

/// Errors raised while provisioning or managing a machine.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// Raised before any remote call when a required setting is missing.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when a step runs before the step it depends on.
    #[error("{step} requires {prerequisite}")]
    MissingPrerequisite {
        /// Step being attempted.
        step: &'static str,
        /// What must exist first.
        prerequisite: &'static str,
    },
    /// Raised when a lookup matches nothing.
    #[error("{kind} '{name}' not found in {scope}")]
    NotFound {
        /// Kind of resource looked up.
        kind: ResourceKind,
        /// Name or identifier queried.
        name: String,
        /// Scope of the query, for example `data centre AU9`.
        scope: String,
    },
    /// Raised when an image's operating system family is not supported.
    #[error("OS image '{name}' has unsupported operating system family '{family}'")]
    UnsupportedImage {
        /// Image name.
        name: String,
        /// Reported family.
        family: String,
    },
    /// Raised when an operation needs a server that was never created.
    #[error("machine '{name}' has no server")]
    NotCreated {
        /// Machine name.
        name: String,
    },
    /// Raised when a deployed server reports no private address.
    #[error("server {server_id} has no private IPv4 address")]
    MissingPrivateIp {
        /// Server identifier.
        server_id: String,
    },
    /// Wrapper for compute API failures.
    #[error(transparent)]
    Compute(#[from] ComputeError),
    /// Raised when an asynchronous operation exceeds its deadline.
    #[error("timed out after {timeout:?} waiting for {action} on {resource_id}")]
    Timeout {
        /// Action being waited on.
        action: &'static str,
        /// Resource identifier.
        resource_id: String,
        /// Deadline that expired.
        timeout: Duration,
    },
    /// Wrapper for SSH failures.
    #[error(transparent)]
    Ssh(#[from] SshError),
    /// Wrapper for public address detection failures.
    #[error("unable to detect client public IP: {0}")]
    PublicIp(#[from] PublicIpError),
}
