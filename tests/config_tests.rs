//! Integration tests for configuration loading and validation.

use std::net::Ipv4Addr;

use camino::Utf8PathBuf;
use ddcloud_machine::CloudControlConfig;
use ddcloud_machine::config::ConfigError;
use ddcloud_machine::test_support::EnvGuard;
use rstest::*;
use tempfile::TempDir;

#[fixture]
fn valid_config() -> CloudControlConfig {
    CloudControlConfig {
        user: String::from("docker-user"),
        password: String::from("s3cret"),
        region: String::from("AU"),
        endpoint_uri: None,
        organization_id: None,
        network_domain: String::from("docker-domain"),
        datacenter: String::from("AU9"),
        vlan: String::from("docker-vlan"),
        image: String::from("Ubuntu 14.04 2 CPU"),
        private_ip: None,
        ssh_user: String::from("root"),
        ssh_port: 22,
        ssh_key: None,
        ssh_bootstrap_password: None,
        create_ssh_firewall_rule: None,
        create_docker_firewall_rule: None,
        client_public_ip: None,
        use_private_ip: None,
        cpu_count: None,
        memory_gb: None,
        cores_per_socket: None,
        storage_path: String::from("/var/lib/ddcloud-machine"),
        ssh_bin: String::from("ssh"),
        sshpass_bin: String::from("sshpass"),
        ssh_keygen_bin: String::from("ssh-keygen"),
    }
}

/// Verifies that each missing credential produces an error naming both the
/// environment variable and the TOML key.
#[rstest]
#[case::user(|cfg: &mut CloudControlConfig| cfg.user.clear(), "DD_COMPUTE_USER", "user")]
#[case::password(|cfg: &mut CloudControlConfig| cfg.password.clear(), "DD_COMPUTE_PASSWORD", "password")]
#[case::region(|cfg: &mut CloudControlConfig| cfg.region.clear(), "DD_COMPUTE_REGION", "region")]
fn missing_credentials_are_actionable(
    valid_config: CloudControlConfig,
    #[case] mutate: fn(&mut CloudControlConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let error = cfg.validate_credentials().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("ddcloud-machine.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn custom_endpoint_replaces_region(valid_config: CloudControlConfig) {
    let cfg = CloudControlConfig {
        region: String::new(),
        endpoint_uri: Some(String::from("https://cloudcontrol.example.test")),
        organization_id: Some(String::from("  org-1  ")),
        ..valid_config
    };

    let settings = cfg
        .cloudcontrol_settings()
        .unwrap_or_else(|err| panic!("endpoint should satisfy validation: {err}"));

    assert_eq!(settings.base_url, "https://cloudcontrol.example.test");
    assert_eq!(settings.organization_id.as_deref(), Some("org-1"));
}

#[rstest]
fn region_selects_the_regional_endpoint(valid_config: CloudControlConfig) {
    let settings = CloudControlConfig {
        region: String::from("EU"),
        ..valid_config
    }
    .cloudcontrol_settings()
    .unwrap_or_else(|err| panic!("settings: {err}"));

    assert_eq!(settings.base_url, "https://api-eu.dimensiondata.com");
    assert_eq!(settings.organization_id, None);
}

#[rstest]
fn machine_settings_parse_addresses(valid_config: CloudControlConfig) {
    let cfg = CloudControlConfig {
        private_ip: Some(String::from("10.0.0.25")),
        client_public_ip: Some(String::from(" 192.0.2.10 ")),
        create_docker_firewall_rule: Some(true),
        memory_gb: Some(8),
        ..valid_config
    };

    let settings = cfg
        .machine_settings()
        .unwrap_or_else(|err| panic!("machine settings: {err}"));

    assert_eq!(settings.private_ip, Some(Ipv4Addr::new(10, 0, 0, 25)));
    assert_eq!(settings.client_public_ip, Some(Ipv4Addr::new(192, 0, 2, 10)));
    assert!(settings.create_docker_firewall_rule);
    assert_eq!(settings.memory_gb, Some(8));
    assert_eq!(settings.image, "Ubuntu 14.04 2 CPU");
}

#[rstest]
#[case::private(|cfg: &mut CloudControlConfig| cfg.private_ip = Some(String::from("10.0.0")), "DD_COMPUTE_PRIVATE_IP")]
#[case::client(|cfg: &mut CloudControlConfig| cfg.client_public_ip = Some(String::from("::1")), "DD_COMPUTE_CLIENT_PUBLIC_IP")]
#[case::port(|cfg: &mut CloudControlConfig| cfg.ssh_port = 0, "DD_COMPUTE_SSH_PORT")]
fn invalid_machine_settings_name_the_source(
    valid_config: CloudControlConfig,
    #[case] mutate: fn(&mut CloudControlConfig),
    #[case] env_var: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let error = cfg.machine_settings().expect_err("invalid value");
    assert!(
        matches!(error, ConfigError::InvalidValue(ref message) if message.contains(env_var)),
        "unexpected error: {error}"
    );
}

#[rstest]
fn blank_bootstrap_password_is_treated_as_absent(valid_config: CloudControlConfig) {
    let cfg = CloudControlConfig {
        ssh_bootstrap_password: Some(String::new()),
        ..valid_config
    };
    assert_eq!(cfg.bootstrap_password(), None);
}

#[tokio::test]
async fn storage_and_key_paths_expand_tilde() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let home = tmp.path().to_string_lossy().to_string();
    let _guard = EnvGuard::set_vars(&[("HOME", home.as_str())]).await;

    let cfg = CloudControlConfig {
        storage_path: String::from("~/.ddcloud-machine"),
        ssh_key: Some(String::from("~/.ssh/id_rsa")),
        ..valid_config()
    };

    let root = cfg
        .storage_root()
        .unwrap_or_else(|err| panic!("storage root: {err}"));
    let settings = cfg
        .machine_settings()
        .unwrap_or_else(|err| panic!("machine settings: {err}"));

    let home_path = Utf8PathBuf::from(home);
    assert_eq!(root, home_path.join(".ddcloud-machine"));
    assert_eq!(settings.ssh_key, Some(home_path.join(".ssh/id_rsa")));
}

#[tokio::test]
async fn environment_variables_populate_configuration() {
    let _guard = EnvGuard::set_vars(&[
        ("DD_COMPUTE_USER", "env-user"),
        ("DD_COMPUTE_PASSWORD", "env-password"),
        ("DD_COMPUTE_REGION", "NA"),
        ("DD_COMPUTE_DATACENTER", "NA9"),
        ("DD_COMPUTE_SSH_PORT", "2222"),
        ("DD_COMPUTE_USE_PRIVATE_IP", "true"),
    ])
    .await;

    let cfg = CloudControlConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load from env: {err}"));

    assert_eq!(cfg.user, "env-user");
    assert_eq!(cfg.password, "env-password");
    assert_eq!(cfg.region, "NA");
    assert_eq!(cfg.datacenter, "NA9");
    assert_eq!(cfg.ssh_port, 2222);
    assert_eq!(cfg.use_private_ip, Some(true));
    assert_eq!(cfg.image, "Ubuntu 14.04 2 CPU");
    assert_eq!(cfg.ssh_user, "root");
}

#[rstest]
#[case::ssh_rule("DD_COMPUTE_CREATE_SSH_FIREWALL_RULE")]
#[case::docker_rule("DD_COMPUTE_CREATE_DOCKER_FIREWALL_RULE")]
#[case::private_ip("DD_COMPUTE_USE_PRIVATE_IP")]
#[tokio::test]
async fn boolean_toggles_load_from_environment(#[case] env_var: &str) {
    let _guard = EnvGuard::set_vars(&[("DD_COMPUTE_VLAN", "env-vlan"), (env_var, "true")]).await;

    let cfg = CloudControlConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load from env: {err}"));
    let settings = cfg
        .machine_settings()
        .unwrap_or_else(|err| panic!("machine settings: {err}"));

    let toggles = [
        ("DD_COMPUTE_CREATE_SSH_FIREWALL_RULE", settings.create_ssh_firewall_rule),
        ("DD_COMPUTE_CREATE_DOCKER_FIREWALL_RULE", settings.create_docker_firewall_rule),
        ("DD_COMPUTE_USE_PRIVATE_IP", settings.use_private_ip),
    ];
    assert_eq!(settings.vlan, "env-vlan");
    for (name, value) in toggles {
        assert_eq!(value, name == env_var, "{name} should follow the environment");
    }
}

#[tokio::test]
async fn boolean_toggles_load_from_the_config_file() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = tmp.path().join("ddcloud-machine.toml");
    std::fs::write(
        &path,
        "create_ssh_firewall_rule = true\ncreate_docker_firewall_rule = true\nuse_private_ip = true\n",
    )
    .unwrap_or_else(|err| panic!("write config file: {err}"));
    let path_text = path.to_string_lossy().to_string();
    let _guard = EnvGuard::set_vars(&[("DD_COMPUTE_CONFIG_PATH", path_text.as_str())]).await;

    let cfg = CloudControlConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load from file: {err}"));

    assert_eq!(cfg.create_ssh_firewall_rule, Some(true));
    assert_eq!(cfg.create_docker_firewall_rule, Some(true));
    assert_eq!(cfg.use_private_ip, Some(true));
}

#[rstest]
fn unset_toggles_default_to_false(valid_config: CloudControlConfig) {
    let settings = valid_config
        .machine_settings()
        .unwrap_or_else(|err| panic!("machine settings: {err}"));
    assert!(!settings.create_ssh_firewall_rule);
    assert!(!settings.create_docker_firewall_rule);
    assert!(!settings.use_private_ip);
}
