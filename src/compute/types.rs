//! Provider-neutral views of CloudControl resources.

use std::net::Ipv4Addr;

/// A tenant-isolated network container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkDomain {
    /// Provider identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Data centre hosting the domain.
    pub datacenter_id: String,
}

/// A layer-2 subnet inside a network domain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Vlan {
    /// Provider identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Owning network domain.
    pub network_domain_id: String,
}

/// Operating system metadata attached to an image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperatingSystem {
    /// OS type tag, for example `UBUNTU1464` or `CENTOS764`.
    pub id: String,
    /// Family, for example `UNIX` or `WINDOWS`.
    pub family: String,
    /// Human readable name.
    pub display_name: String,
}

/// An OS image that servers are deployed from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OsImage {
    /// Provider identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Data centre holding the image.
    pub datacenter_id: String,
    /// Operating system the image carries.
    pub operating_system: OperatingSystem,
}

/// Snapshot of a server record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Server {
    /// Provider identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether deployment has completed.
    pub deployed: bool,
    /// Whether the server is powered on.
    pub started: bool,
    /// Private IPv4 address of the primary network adapter.
    pub private_ipv4: Option<Ipv4Addr>,
}

/// CPU overrides applied at deployment.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CpuOverrides {
    /// Virtual CPU count.
    pub count: Option<u32>,
    /// Cores per socket.
    pub cores_per_socket: Option<u32>,
}

/// Everything the provider needs to deploy a server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerDeployment {
    /// Server name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Image to deploy from.
    pub image_id: String,
    /// One-time administrator password.
    pub administrator_password: String,
    /// Target network domain.
    pub network_domain_id: String,
    /// Target VLAN for the primary adapter.
    pub vlan_id: String,
    /// Explicit private address; replaces VLAN placement when set.
    pub private_ipv4: Option<Ipv4Addr>,
    /// Primary DNS server.
    pub primary_dns: Ipv4Addr,
    /// Secondary DNS server.
    pub secondary_dns: Ipv4Addr,
    /// CPU overrides.
    pub cpu: CpuOverrides,
    /// Memory override in gigabytes.
    pub memory_gb: Option<u32>,
    /// Power on once deployed.
    pub start: bool,
}

/// Mapping from a public address to a server's private address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NatRule {
    /// Provider identifier.
    pub id: String,
    /// Private (internal) address.
    pub internal_ip: Ipv4Addr,
    /// Public (external) address.
    pub external_ip: Ipv4Addr,
}

/// Page selector for list operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Paging {
    /// One-based page number.
    pub page_number: u32,
    /// Items per page.
    pub page_size: u32,
}

impl Paging {
    /// Page size used by the provisioner when scanning lists.
    pub const DEFAULT_PAGE_SIZE: u32 = 50;

    /// Returns the first page.
    #[must_use]
    pub const fn first() -> Self {
        Self {
            page_number: 1,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }

    /// Returns the page after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self {
            page_number: self.page_number + 1,
            page_size: self.page_size,
        }
    }
}

/// One page of NAT rules.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NatRulePage {
    /// Rules on this page.
    pub rules: Vec<NatRule>,
    /// One-based number of this page.
    pub page_number: u32,
    /// Total number of pages available.
    pub page_count: u32,
}

impl NatRulePage {
    /// Returns `true` when no further page needs fetching.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.rules.is_empty() || self.page_number >= self.page_count
    }
}

/// Verdict applied by a firewall rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FirewallAction {
    /// Accept matching traffic and stop evaluating rules.
    AcceptDecisively,
    /// Drop matching traffic.
    Drop,
}

/// Transport protocol matched by a firewall rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FirewallProtocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

/// Desired firewall rule.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FirewallRuleRequest {
    /// Rule name, unique within the network domain.
    pub name: String,
    /// Owning network domain.
    pub network_domain_id: String,
    /// Verdict.
    pub action: FirewallAction,
    /// Protocol.
    pub protocol: FirewallProtocol,
    /// Source address to match.
    pub source_ip: Ipv4Addr,
    /// Destination address to match.
    pub destination_ip: Ipv4Addr,
    /// Destination port to match.
    pub destination_port: u16,
    /// Whether the rule is enabled on creation.
    pub enabled: bool,
    /// Place the rule ahead of all others.
    pub place_first: bool,
}
