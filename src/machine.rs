//! Per-machine state record persisted between invocations.

use std::net::Ipv4Addr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::resource::ResourceId;

/// Image deployed when none is configured.
pub const DEFAULT_IMAGE: &str = "Ubuntu 14.04 2 CPU";
/// Default SSH login user.
pub const DEFAULT_SSH_USER: &str = "root";
/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;
/// Port the Docker daemon listens on with TLS.
pub const DOCKER_PORT: u16 = 2376;
/// File name of the machine-local private key.
pub const SSH_KEY_FILE_NAME: &str = "id_rsa";

/// Target selection and exposure options captured when the machine is
/// created.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "user-facing toggles mirror the configuration flags"
)]
pub struct MachineSettings {
    /// Network domain name.
    pub network_domain: String,
    /// Data centre identifier, for example `AU9`.
    pub datacenter: String,
    /// VLAN name.
    pub vlan: String,
    /// OS image name.
    pub image: String,
    /// Explicit private address; the server is placed by address instead of
    /// by VLAN when set.
    pub private_ip: Option<Ipv4Addr>,
    /// SSH login user.
    pub ssh_user: String,
    /// SSH port.
    pub ssh_port: u16,
    /// Existing private key to import instead of generating one.
    pub ssh_key: Option<Utf8PathBuf>,
    /// Create a firewall rule admitting SSH from the client.
    pub create_ssh_firewall_rule: bool,
    /// Create a firewall rule admitting Docker from the client.
    pub create_docker_firewall_rule: bool,
    /// Client public address; detected when absent and a rule needs it.
    pub client_public_ip: Option<Ipv4Addr>,
    /// Reach the server by its private address only.
    pub use_private_ip: bool,
    /// Virtual CPU count override.
    pub cpu_count: Option<u32>,
    /// Memory override in gigabytes.
    pub memory_gb: Option<u32>,
    /// Cores-per-socket override.
    pub cores_per_socket: Option<u32>,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            network_domain: String::new(),
            datacenter: String::new(),
            vlan: String::new(),
            image: String::from(DEFAULT_IMAGE),
            private_ip: None,
            ssh_user: String::from(DEFAULT_SSH_USER),
            ssh_port: DEFAULT_SSH_PORT,
            ssh_key: None,
            create_ssh_firewall_rule: false,
            create_docker_firewall_rule: false,
            client_public_ip: None,
            use_private_ip: false,
            cpu_count: None,
            memory_gb: None,
            cores_per_socket: None,
        }
    }
}

/// Mutable state of one managed machine.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Machine {
    /// Machine (and server) name.
    pub name: String,
    /// Directory holding this machine's files.
    pub machine_dir: Utf8PathBuf,
    /// Options captured at creation.
    pub settings: MachineSettings,
    /// Resolved network domain.
    #[serde(default)]
    pub network_domain_id: ResourceId,
    /// Resolved VLAN.
    #[serde(default)]
    pub vlan_id: ResourceId,
    /// Resolved OS image.
    #[serde(default)]
    pub image_id: ResourceId,
    /// OS type tag of the resolved image, for example `CENTOS764`.
    #[serde(default)]
    pub image_os_type: Option<String>,
    /// Deployed server.
    #[serde(default)]
    pub server_id: ResourceId,
    /// NAT rule exposing the server.
    #[serde(default)]
    pub nat_rule_id: ResourceId,
    /// Firewall rule admitting SSH.
    #[serde(default)]
    pub ssh_firewall_rule_id: ResourceId,
    /// Firewall rule admitting Docker.
    #[serde(default)]
    pub docker_firewall_rule_id: ResourceId,
    /// Private address of the server.
    #[serde(default)]
    pub private_ip: Option<Ipv4Addr>,
    /// Address used to reach the server: the NAT external address once a
    /// NAT rule exists, the private address before that.
    #[serde(default)]
    pub public_ip: Option<Ipv4Addr>,
    /// Client public address used for firewall rules.
    #[serde(default)]
    pub client_public_ip: Option<Ipv4Addr>,
    /// Machine-local private key.
    #[serde(default)]
    pub ssh_key_path: Option<Utf8PathBuf>,
    /// One-time password used to install the SSH key; cleared afterwards.
    #[serde(default)]
    pub bootstrap_password: Option<String>,
}

impl Machine {
    /// Creates an empty record for a machine stored in `machine_dir`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        machine_dir: impl Into<Utf8PathBuf>,
        settings: MachineSettings,
    ) -> Self {
        Self {
            name: name.into(),
            machine_dir: machine_dir.into(),
            settings,
            network_domain_id: ResourceId::Unresolved,
            vlan_id: ResourceId::Unresolved,
            image_id: ResourceId::Unresolved,
            image_os_type: None,
            server_id: ResourceId::Unresolved,
            nat_rule_id: ResourceId::Unresolved,
            ssh_firewall_rule_id: ResourceId::Unresolved,
            docker_firewall_rule_id: ResourceId::Unresolved,
            private_ip: None,
            public_ip: None,
            client_public_ip: None,
            ssh_key_path: None,
            bootstrap_password: None,
        }
    }

    /// Path where the machine-local private key lives.
    #[must_use]
    pub fn default_key_path(&self) -> Utf8PathBuf {
        self.machine_dir.join(SSH_KEY_FILE_NAME)
    }

    /// Returns the configured key path or the machine-local default.
    #[must_use]
    pub fn key_path(&self) -> Utf8PathBuf {
        self.ssh_key_path
            .clone()
            .unwrap_or_else(|| self.default_key_path())
    }

    /// Directory containing the machine's files.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.machine_dir
    }

    /// Docker endpoint URL, when an address is known.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        self.public_ip
            .map(|address| format!("tcp://{address}:{DOCKER_PORT}"))
    }

    /// Base name for the machine's firewall rules: lower case, with every
    /// character other than ASCII letters and digits replaced by `.`.
    #[must_use]
    pub fn firewall_rule_prefix(&self) -> String {
        self.name
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() {
                    ch.to_ascii_lowercase()
                } else {
                    '.'
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn machine(name: &str) -> Machine {
        Machine::new(name, "/store/machines/m", MachineSettings::default())
    }

    #[rstest]
    #[case("Docker_Host-01", "docker.host.01")]
    #[case("plain", "plain")]
    #[case("a b", "a.b")]
    fn firewall_prefix_is_normalised(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(machine(name).firewall_rule_prefix(), expected);
    }

    #[test]
    fn url_requires_an_address() {
        let mut record = machine("m");
        assert_eq!(record.url(), None);
        record.public_ip = Some(Ipv4Addr::new(198, 51, 100, 4));
        assert_eq!(record.url().as_deref(), Some("tcp://198.51.100.4:2376"));
    }

    #[test]
    fn key_path_defaults_to_machine_dir() {
        let record = machine("m");
        assert_eq!(record.key_path(), Utf8PathBuf::from("/store/machines/m/id_rsa"));
    }

    #[test]
    fn unresolved_ids_persist_as_null() {
        let mut record = machine("m");
        record.server_id = ResourceId::resolved("srv-1");
        let json = serde_json::to_value(&record).expect("serialise");
        assert_eq!(json["server_id"], "srv-1");
        assert!(json["nat_rule_id"].is_null());

        let restored: Machine = serde_json::from_value(json).expect("deserialise");
        assert_eq!(restored, record);
    }

    #[test]
    fn older_records_without_optional_fields_load() {
        let json = serde_json::json!({
            "name": "m",
            "machine_dir": "/store/machines/m",
            "settings": serde_json::to_value(MachineSettings::default()).expect("settings"),
        });
        let restored: Machine = serde_json::from_value(json).expect("deserialise");
        assert!(!restored.server_id.is_resolved());
    }
}
