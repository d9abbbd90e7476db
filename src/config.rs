//! Configuration loading via `ortho-config`.
//!
//! Values merge defaults, `ddcloud-machine.toml`, and `DD_COMPUTE_*`
//! environment variables. Credentials stay in [`CloudControlConfig`] and are
//! never written to the machine record; target selection and exposure
//! options are captured into [`MachineSettings`] when a machine is created.

use std::net::Ipv4Addr;
use std::str::FromStr;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::cloudcontrol::CloudControlSettings;
use crate::machine::{DEFAULT_IMAGE, MachineSettings};
use crate::ssh::{SshTools, expand_tilde};

/// Default storage directory for machine records and keys.
pub const DEFAULT_STORAGE_PATH: &str = "~/.ddcloud-machine";
/// Default CloudControl region.
pub const DEFAULT_REGION: &str = "AU";

const CONFIG_FILE: &str = "ddcloud-machine.toml";

/// CloudControl credentials and machine defaults derived from environment
/// variables and configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "DD_COMPUTE",
    discovery(
        app_name = "ddcloud-machine",
        env_var = "DD_COMPUTE_CONFIG_PATH",
        config_file_name = "ddcloud-machine.toml",
        dotfile_name = ".ddcloud-machine.toml",
        project_file_name = "ddcloud-machine.toml"
    )
)]
pub struct CloudControlConfig {
    /// CloudControl user name. Required.
    #[ortho_config(default = String::new())]
    pub user: String,
    /// CloudControl password. Required.
    #[ortho_config(default = String::new())]
    pub password: String,
    /// Region code such as `AU`, `NA` or `EU`.
    #[ortho_config(default = DEFAULT_REGION.to_owned())]
    pub region: String,
    /// Custom API endpoint; overrides `region` when set.
    pub endpoint_uri: Option<String>,
    /// Organisation identifier; discovered from the account when absent.
    pub organization_id: Option<String>,
    /// Network domain the server is placed in.
    #[ortho_config(default = String::new())]
    pub network_domain: String,
    /// Data centre identifier, for example `AU9`.
    #[ortho_config(default = String::new())]
    pub datacenter: String,
    /// VLAN the server is attached to.
    #[ortho_config(default = String::new())]
    pub vlan: String,
    /// OS image name.
    #[ortho_config(default = DEFAULT_IMAGE.to_owned())]
    pub image: String,
    /// Explicit private IPv4 address for the server.
    pub private_ip: Option<String>,
    /// SSH login user.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// SSH port.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Existing private key to use instead of generating one. Supports tilde
    /// expansion; `<ssh_key>.pub` must exist alongside it.
    pub ssh_key: Option<String>,
    /// Initial administrator password; generated when absent.
    pub ssh_bootstrap_password: Option<String>,
    /// Create a firewall rule admitting SSH from the client address. Unset
    /// means `false`; kept optional so the CLI layer cannot mask the file or
    /// environment value.
    pub create_ssh_firewall_rule: Option<bool>,
    /// Create a firewall rule admitting Docker from the client address. Unset means `false`.
    pub create_docker_firewall_rule: Option<bool>,
    /// Client public IPv4 address; detected when absent.
    pub client_public_ip: Option<String>,
    /// Reach the server by its private address; skips NAT and firewall rules. Unset means `false`.
    pub use_private_ip: Option<bool>,
    /// Virtual CPU count override.
    pub cpu_count: Option<u32>,
    /// Memory override in gigabytes.
    pub memory_gb: Option<u32>,
    /// Cores-per-socket override.
    pub cores_per_socket: Option<u32>,
    /// Directory holding machine records and keys.
    #[ortho_config(default = DEFAULT_STORAGE_PATH.to_owned())]
    pub storage_path: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `sshpass` executable.
    #[ortho_config(default = "sshpass".to_owned())]
    pub sshpass_bin: String,
    /// Path to the `ssh-keygen` executable.
    #[ortho_config(default = "ssh-keygen".to_owned())]
    pub ssh_keygen_bin: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to {CONFIG_FILE}",
            self.description, self.env_var, self.toml_key
        ))
    }

    fn invalid(&self, value: &str, reason: &str) -> ConfigError {
        ConfigError::InvalidValue(format!(
            "invalid {} '{value}' ({reason}): check {} or {} in {CONFIG_FILE}",
            self.description, self.env_var, self.toml_key
        ))
    }
}

const USER: FieldMetadata = FieldMetadata::new("CloudControl user name", "DD_COMPUTE_USER", "user");
const PASSWORD: FieldMetadata =
    FieldMetadata::new("CloudControl password", "DD_COMPUTE_PASSWORD", "password");
const REGION: FieldMetadata =
    FieldMetadata::new("CloudControl region", "DD_COMPUTE_REGION", "region");
const PRIVATE_IP: FieldMetadata =
    FieldMetadata::new("private IPv4 address", "DD_COMPUTE_PRIVATE_IP", "private_ip");
const CLIENT_PUBLIC_IP: FieldMetadata = FieldMetadata::new(
    "client public IPv4 address",
    "DD_COMPUTE_CLIENT_PUBLIC_IP",
    "client_public_ip",
);
const SSH_PORT: FieldMetadata = FieldMetadata::new("SSH port", "DD_COMPUTE_SSH_PORT", "ssh_port");
const SSH_USER: FieldMetadata = FieldMetadata::new("SSH user", "DD_COMPUTE_SSH_USER", "ssh_user");
const STORAGE_PATH: FieldMetadata =
    FieldMetadata::new("storage path", "DD_COMPUTE_STORAGE_PATH", "storage_path");

impl CloudControlConfig {
    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("ddcloud-machine")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks the credentials needed before any remote call.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the environment variable
    /// and TOML key of the first missing value.
    pub fn validate_credentials(&self) -> Result<(), ConfigError> {
        require(&self.user, &USER)?;
        require(&self.password, &PASSWORD)?;
        if self.endpoint().is_none() {
            require(&self.region, &REGION)?;
        }
        Ok(())
    }

    fn endpoint(&self) -> Option<&str> {
        self.endpoint_uri
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Builds the API client settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when credentials are incomplete.
    pub fn cloudcontrol_settings(&self) -> Result<CloudControlSettings, ConfigError> {
        self.validate_credentials()?;
        let base_url = self.endpoint().map_or_else(
            || CloudControlSettings::region_base_url(&self.region),
            str::to_owned,
        );
        Ok(CloudControlSettings {
            base_url,
            user: self.user.trim().to_owned(),
            password: self.password.clone(),
            organization_id: self
                .organization_id
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned),
        })
    }

    /// Captures the target selection and exposure options for a new machine.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when an address or the SSH
    /// settings cannot be used.
    pub fn machine_settings(&self) -> Result<MachineSettings, ConfigError> {
        require(&self.ssh_user, &SSH_USER)?;
        if self.ssh_port == 0 {
            return Err(SSH_PORT.invalid("0", "port must be between 1 and 65535"));
        }

        Ok(MachineSettings {
            network_domain: self.network_domain.trim().to_owned(),
            datacenter: self.datacenter.trim().to_owned(),
            vlan: self.vlan.trim().to_owned(),
            image: self.image.trim().to_owned(),
            private_ip: parse_ipv4(self.private_ip.as_deref(), &PRIVATE_IP)?,
            ssh_user: self.ssh_user.trim().to_owned(),
            ssh_port: self.ssh_port,
            ssh_key: self
                .ssh_key
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(|value| Utf8PathBuf::from(expand_tilde(value))),
            create_ssh_firewall_rule: self.create_ssh_firewall_rule.unwrap_or(false),
            create_docker_firewall_rule: self.create_docker_firewall_rule.unwrap_or(false),
            client_public_ip: parse_ipv4(self.client_public_ip.as_deref(), &CLIENT_PUBLIC_IP)?,
            use_private_ip: self.use_private_ip.unwrap_or(false),
            cpu_count: self.cpu_count,
            memory_gb: self.memory_gb,
            cores_per_socket: self.cores_per_socket,
        })
    }

    /// Returns the configured bootstrap password, if any.
    #[must_use]
    pub fn bootstrap_password(&self) -> Option<String> {
        self.ssh_bootstrap_password
            .clone()
            .filter(|value| !value.is_empty())
    }

    /// Returns the paths of the local SSH tooling.
    #[must_use]
    pub fn ssh_tools(&self) -> SshTools {
        SshTools {
            ssh_bin: self.ssh_bin.clone(),
            sshpass_bin: self.sshpass_bin.clone(),
            ssh_keygen_bin: self.ssh_keygen_bin.clone(),
        }
    }

    /// Returns the storage directory with `~/` expanded.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the path is blank.
    pub fn storage_root(&self) -> Result<Utf8PathBuf, ConfigError> {
        require(&self.storage_path, &STORAGE_PATH)?;
        Ok(Utf8PathBuf::from(expand_tilde(self.storage_path.trim())))
    }
}

fn require(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(metadata.missing());
    }
    Ok(())
}

fn parse_ipv4(value: Option<&str>, metadata: &FieldMetadata) -> Result<Option<Ipv4Addr>, ConfigError> {
    let Some(raw) = value.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    Ipv4Addr::from_str(raw)
        .map(Some)
        .map_err(|err| metadata.invalid(raw, &err.to_string()))
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value cannot be used.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
