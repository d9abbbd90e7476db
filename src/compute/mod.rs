//! Compute API abstraction used by the provisioner.
//!
//! The provisioner only speaks to CloudControl through [`ComputeApi`], so the
//! HTTP client and in-memory test doubles are interchangeable.

use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;

mod error;
mod types;

pub use error::ComputeError;
pub use types::{
    CpuOverrides, FirewallAction, FirewallProtocol, FirewallRuleRequest, NatRule, NatRulePage,
    NetworkDomain, OperatingSystem, OsImage, Paging, Server, ServerDeployment, Vlan,
};

/// Future returned by compute API operations.
pub type ComputeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ComputeError>> + Send + 'a>>;

/// Operations the provisioner needs from the compute provider.
///
/// Lookups that find nothing return `Ok(None)`; only transport and API
/// failures are errors.
pub trait ComputeApi {
    /// Finds a network domain by exact name within a data centre.
    fn find_network_domain<'a>(
        &'a self,
        name: &'a str,
        datacenter_id: &'a str,
    ) -> ComputeFuture<'a, Option<NetworkDomain>>;

    /// Finds a VLAN by exact name within a network domain.
    fn find_vlan<'a>(
        &'a self,
        name: &'a str,
        network_domain_id: &'a str,
    ) -> ComputeFuture<'a, Option<Vlan>>;

    /// Finds an OS image by exact name within a data centre.
    fn find_os_image<'a>(
        &'a self,
        name: &'a str,
        datacenter_id: &'a str,
    ) -> ComputeFuture<'a, Option<OsImage>>;

    /// Submits a deployment and returns the new server identifier.
    fn deploy_server<'a>(&'a self, deployment: &'a ServerDeployment) -> ComputeFuture<'a, String>;

    /// Fetches a server; `None` when it does not exist.
    fn get_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, Option<Server>>;

    /// Powers a server on.
    fn start_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, ()>;

    /// Gracefully shuts a server down.
    fn shutdown_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, ()>;

    /// Hard powers a server off.
    fn power_off_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, ()>;

    /// Deletes a server.
    fn delete_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, ()>;

    /// Lists one page of NAT rules in a network domain.
    fn list_nat_rules<'a>(
        &'a self,
        network_domain_id: &'a str,
        paging: Paging,
    ) -> ComputeFuture<'a, NatRulePage>;

    /// Creates a NAT rule for `internal_ip` and returns its identifier.
    fn add_nat_rule<'a>(
        &'a self,
        network_domain_id: &'a str,
        internal_ip: Ipv4Addr,
    ) -> ComputeFuture<'a, String>;

    /// Fetches a NAT rule; `None` when it does not exist.
    fn get_nat_rule<'a>(&'a self, nat_rule_id: &'a str) -> ComputeFuture<'a, Option<NatRule>>;

    /// Deletes a NAT rule.
    fn delete_nat_rule<'a>(&'a self, nat_rule_id: &'a str) -> ComputeFuture<'a, ()>;

    /// Lists public addresses in the domain's blocks that are not yet used.
    fn available_public_ips<'a>(
        &'a self,
        network_domain_id: &'a str,
    ) -> ComputeFuture<'a, Vec<Ipv4Addr>>;

    /// Allocates a new public IP block and returns its identifier.
    fn add_public_ip_block<'a>(&'a self, network_domain_id: &'a str) -> ComputeFuture<'a, String>;

    /// Creates a firewall rule and returns its identifier.
    fn create_firewall_rule<'a>(
        &'a self,
        rule: &'a FirewallRuleRequest,
    ) -> ComputeFuture<'a, String>;

    /// Deletes a firewall rule.
    fn delete_firewall_rule<'a>(&'a self, firewall_rule_id: &'a str) -> ComputeFuture<'a, ()>;
}
