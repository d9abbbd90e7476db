//! Core library for the `ddcloud-machine` provisioning driver.
//!
//! The crate provisions Docker hosts on Dimension Data CloudControl: it
//! resolves the target network domain, VLAN and OS image, deploys a server,
//! exposes it through NAT and firewall rules, installs an SSH key over a
//! password session and tears everything down again. The provider is reached
//! through the [`ComputeApi`] seam, so the orchestration in [`Provisioner`]
//! runs unchanged against the HTTP client or an in-memory fake.

pub mod cloudcontrol;
pub mod compute;
pub mod config;
pub mod machine;
pub mod provisioner;
pub mod public_ip;
pub mod remediation;
pub mod resource;
pub mod ssh;
pub mod store;
pub mod test_support;
pub mod wait;

pub use cloudcontrol::{CloudControlClient, CloudControlSettings};
pub use compute::{ComputeApi, ComputeError};
pub use config::{CloudControlConfig, ConfigError};
pub use machine::{Machine, MachineSettings};
pub use provisioner::{MachineState, ProvisionError, Provisioner, Timeouts};
pub use public_ip::{IfconfigDetector, PublicIpDetector, PublicIpError};
pub use resource::ResourceId;
pub use ssh::{CommandRunner, ProcessCommandRunner, SshClient, SshError, SshTools};
pub use store::{MachineStore, StoreError};
