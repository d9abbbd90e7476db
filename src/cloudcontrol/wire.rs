//! JSON payloads exchanged with the CloudControl 2.4 API.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::compute::{
    FirewallAction, FirewallProtocol, FirewallRuleRequest, NatRule, NetworkDomain,
    OperatingSystem, OsImage, Server, ServerDeployment, Vlan,
};

/// Standard envelope returned by mutating calls and by errors.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(super) struct ApiResponse {
    pub(super) operation: String,
    pub(super) response_code: String,
    pub(super) message: String,
    pub(super) info: Vec<NameValue>,
}

#[derive(Debug, Deserialize)]
pub(super) struct NameValue {
    pub(super) name: String,
    pub(super) value: String,
}

impl ApiResponse {
    pub(super) fn info_value(&self, name: &str) -> Option<&str> {
        self.info
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.value.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct NetworkDomainDto {
    id: String,
    name: String,
    datacenter_id: String,
}

impl From<NetworkDomainDto> for NetworkDomain {
    fn from(value: NetworkDomainDto) -> Self {
        Self {
            id: value.id,
            name: value.name,
            datacenter_id: value.datacenter_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct NetworkDomains {
    #[serde(default)]
    pub(super) network_domain: Vec<NetworkDomainDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct VlanDto {
    id: String,
    name: String,
    network_domain: Option<IdRef>,
}

#[derive(Debug, Deserialize)]
pub(super) struct IdRef {
    id: String,
}

impl From<VlanDto> for Vlan {
    fn from(value: VlanDto) -> Self {
        Self {
            id: value.id,
            name: value.name,
            network_domain_id: value.network_domain.map(|domain| domain.id).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct Vlans {
    #[serde(default)]
    pub(super) vlan: Vec<VlanDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct OperatingSystemDto {
    id: String,
    family: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct OsImageDto {
    id: String,
    name: String,
    #[serde(default)]
    datacenter_id: String,
    operating_system: OperatingSystemDto,
}

impl From<OsImageDto> for OsImage {
    fn from(value: OsImageDto) -> Self {
        Self {
            id: value.id,
            name: value.name,
            datacenter_id: value.datacenter_id,
            operating_system: OperatingSystem {
                id: value.operating_system.id,
                family: value.operating_system.family,
                display_name: value.operating_system.display_name,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct OsImages {
    #[serde(default)]
    pub(super) os_image: Vec<OsImageDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ServerDto {
    id: String,
    name: String,
    #[serde(default)]
    deployed: bool,
    #[serde(default)]
    started: bool,
    network_info: Option<ServerNetworkInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerNetworkInfo {
    primary_nic: Option<ServerNic>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerNic {
    private_ipv4: Option<Ipv4Addr>,
}

impl From<ServerDto> for Server {
    fn from(value: ServerDto) -> Self {
        Self {
            id: value.id,
            name: value.name,
            deployed: value.deployed,
            started: value.started,
            private_ipv4: value
                .network_info
                .and_then(|info| info.primary_nic)
                .and_then(|nic| nic.private_ipv4),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DeployServerBody<'a> {
    name: &'a str,
    description: &'a str,
    image_id: &'a str,
    start: bool,
    administrator_password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cpu: Option<CpuBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory_gb: Option<u32>,
    network_info: DeployNetworkInfo<'a>,
    primary_dns: String,
    secondary_dns: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CpuBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cores_per_socket: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeployNetworkInfo<'a> {
    network_domain_id: &'a str,
    primary_nic: DeployNic<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeployNic<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    vlan_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    private_ipv4: Option<String>,
}

impl<'a> From<&'a ServerDeployment> for DeployServerBody<'a> {
    fn from(value: &'a ServerDeployment) -> Self {
        let cpu = if value.cpu.count.is_some() || value.cpu.cores_per_socket.is_some() {
            Some(CpuBody {
                count: value.cpu.count,
                cores_per_socket: value.cpu.cores_per_socket,
            })
        } else {
            None
        };
        let primary_nic = match value.private_ipv4 {
            Some(address) => DeployNic {
                vlan_id: None,
                private_ipv4: Some(address.to_string()),
            },
            None => DeployNic {
                vlan_id: Some(value.vlan_id.as_str()),
                private_ipv4: None,
            },
        };

        Self {
            name: &value.name,
            description: &value.description,
            image_id: &value.image_id,
            start: value.start,
            administrator_password: &value.administrator_password,
            cpu,
            memory_gb: value.memory_gb,
            network_info: DeployNetworkInfo {
                network_domain_id: &value.network_domain_id,
                primary_nic,
            },
            primary_dns: value.primary_dns.to_string(),
            secondary_dns: value.secondary_dns.to_string(),
        }
    }
}

/// Body for actions that only carry a resource identifier.
#[derive(Debug, Serialize)]
pub(super) struct IdBody<'a> {
    pub(super) id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct NatRuleDto {
    id: String,
    internal_ip: Ipv4Addr,
    external_ip: Ipv4Addr,
}

impl From<NatRuleDto> for NatRule {
    fn from(value: NatRuleDto) -> Self {
        Self {
            id: value.id,
            internal_ip: value.internal_ip,
            external_ip: value.external_ip,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(super) struct NatRules {
    pub(super) nat_rule: Vec<NatRuleDto>,
    pub(super) page_number: u32,
    pub(super) page_count: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateNatRuleBody<'a> {
    pub(super) network_domain_id: &'a str,
    pub(super) internal_ip: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct NetworkDomainBody<'a> {
    pub(super) network_domain_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PublicIpBlockDto {
    pub(super) base_ip: Ipv4Addr,
    pub(super) size: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PublicIpBlocks {
    #[serde(default)]
    pub(super) public_ip_block: Vec<PublicIpBlockDto>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ReservedIpDto {
    pub(super) value: Ipv4Addr,
}

#[derive(Debug, Deserialize)]
pub(super) struct ReservedIps {
    #[serde(default)]
    pub(super) ip: Vec<ReservedIpDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateFirewallRuleBody<'a> {
    name: &'a str,
    action: &'static str,
    ip_version: &'static str,
    protocol: &'static str,
    source: FirewallEndpoint,
    destination: FirewallEndpoint,
    enabled: bool,
    placement: Placement,
    network_domain_id: &'a str,
}

#[derive(Debug, Serialize)]
struct FirewallEndpoint {
    ip: FirewallAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<FirewallPort>,
}

#[derive(Debug, Serialize)]
struct FirewallAddress {
    address: String,
}

#[derive(Debug, Serialize)]
struct FirewallPort {
    begin: u16,
}

#[derive(Debug, Serialize)]
struct Placement {
    position: &'static str,
}

impl<'a> From<&'a FirewallRuleRequest> for CreateFirewallRuleBody<'a> {
    fn from(value: &'a FirewallRuleRequest) -> Self {
        Self {
            name: &value.name,
            action: match value.action {
                FirewallAction::AcceptDecisively => "ACCEPT_DECISIVELY",
                FirewallAction::Drop => "DROP",
            },
            ip_version: "IPV4",
            protocol: match value.protocol {
                FirewallProtocol::Tcp => "TCP",
                FirewallProtocol::Udp => "UDP",
            },
            source: FirewallEndpoint {
                ip: FirewallAddress {
                    address: value.source_ip.to_string(),
                },
                port: None,
            },
            destination: FirewallEndpoint {
                ip: FirewallAddress {
                    address: value.destination_ip.to_string(),
                },
                port: Some(FirewallPort {
                    begin: value.destination_port,
                }),
            },
            enabled: value.enabled,
            placement: Placement {
                position: if value.place_first { "FIRST" } else { "LAST" },
            },
            network_domain_id: &value.network_domain_id,
        }
    }
}
