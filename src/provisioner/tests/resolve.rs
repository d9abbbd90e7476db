//! Resolver behaviour.

use rstest::rstest;

use super::{compute, provisioner, target_settings};
use crate::compute::{OperatingSystem, OsImage};
use crate::machine::{Machine, MachineSettings};
use crate::provisioner::{ProvisionError, ResourceKind};
use crate::resource::ResourceId;
use crate::test_support::{FAKE_CENTOS_IMAGE, FAKE_DATACENTER, FakeCompute, ScriptedRunner};

fn machine(settings: MachineSettings) -> Machine {
    Machine::new("node-1", "/store/machines/node-1", settings)
}

#[rstest]
#[tokio::test]
async fn resolves_domain_vlan_and_image(compute: FakeCompute) {
    let provisioner = provisioner(&compute, &ScriptedRunner::new());
    let mut record = machine(MachineSettings {
        image: String::from(FAKE_CENTOS_IMAGE),
        ..target_settings()
    });

    provisioner.resolve_vlan(&mut record).await.expect("vlan");
    provisioner.resolve_image(&mut record).await.expect("image");

    assert_eq!(record.network_domain_id, ResourceId::resolved("nd-1"));
    assert_eq!(record.vlan_id, ResourceId::resolved("vlan-1"));
    assert_eq!(record.image_id, ResourceId::resolved("img-centos"));
    assert_eq!(record.image_os_type.as_deref(), Some("CENTOS764"));
    assert_eq!(
        compute.calls(),
        vec![
            "find_network_domain docker-domain",
            "find_vlan docker-vlan",
            "find_os_image CentOS 7 64-bit 2 CPU",
        ]
    );
}

#[rstest]
#[tokio::test]
async fn missing_network_domain_names_value_and_scope(compute: FakeCompute) {
    let provisioner = provisioner(&compute, &ScriptedRunner::new());
    let mut record = machine(MachineSettings {
        network_domain: String::from("nowhere"),
        ..target_settings()
    });
    record.network_domain_id = ResourceId::resolved("stale");

    let err = provisioner
        .resolve_network_domain(&mut record)
        .await
        .expect_err("unknown domain");

    assert_eq!(
        err,
        ProvisionError::NotFound {
            kind: ResourceKind::NetworkDomain,
            name: String::from("nowhere"),
            scope: format!("data centre {FAKE_DATACENTER}"),
        }
    );
    assert_eq!(
        err.to_string(),
        "network domain 'nowhere' not found in data centre AU9"
    );
    assert!(!record.network_domain_id.is_resolved());
}

#[rstest]
#[tokio::test]
async fn missing_vlan_is_scoped_to_the_domain(compute: FakeCompute) {
    let provisioner = provisioner(&compute, &ScriptedRunner::new());
    let mut record = machine(MachineSettings {
        vlan: String::from("missing-vlan"),
        ..target_settings()
    });

    let err = provisioner
        .resolve_vlan(&mut record)
        .await
        .expect_err("unknown vlan");

    assert_eq!(
        err,
        ProvisionError::NotFound {
            kind: ResourceKind::Vlan,
            name: String::from("missing-vlan"),
            scope: String::from("network domain nd-1"),
        }
    );
    assert_eq!(record.network_domain_id, ResourceId::resolved("nd-1"));
}

#[rstest]
#[tokio::test]
async fn vlan_reuses_a_resolved_domain(compute: FakeCompute) {
    let provisioner = provisioner(&compute, &ScriptedRunner::new());
    let mut record = machine(target_settings());
    record.network_domain_id = ResourceId::resolved("nd-1");

    provisioner.resolve_vlan(&mut record).await.expect("vlan");

    assert_eq!(compute.calls(), vec!["find_vlan docker-vlan"]);
}

#[rstest]
#[case::domain(MachineSettings { network_domain: String::new(), ..target_settings() }, "network domain name")]
#[case::datacenter(MachineSettings { datacenter: String::from("  "), ..target_settings() }, "data centre")]
#[case::vlan(MachineSettings { vlan: String::new(), ..target_settings() }, "VLAN name")]
#[tokio::test]
async fn blank_names_fail_before_any_remote_call(
    compute: FakeCompute,
    #[case] settings: MachineSettings,
    #[case] label: &str,
) {
    let provisioner = provisioner(&compute, &ScriptedRunner::new());
    let mut record = machine(settings);

    let err = provisioner
        .resolve_vlan(&mut record)
        .await
        .expect_err("blank name");

    assert_eq!(err, ProvisionError::Config(format!("{label} is required")));
    assert!(compute.is_untouched());
}

#[rstest]
#[tokio::test]
async fn blank_image_name_is_a_config_error(compute: FakeCompute) {
    let provisioner = provisioner(&compute, &ScriptedRunner::new());
    let mut record = machine(MachineSettings {
        image: String::new(),
        ..target_settings()
    });

    let err = provisioner
        .resolve_image(&mut record)
        .await
        .expect_err("blank image");

    assert_eq!(
        err,
        ProvisionError::Config(String::from("OS image name is required"))
    );
    assert!(compute.is_untouched());
}

#[rstest]
#[tokio::test]
async fn non_unix_images_are_rejected(compute: FakeCompute) {
    compute.add_image(OsImage {
        id: String::from("img-win"),
        name: String::from("Win2012 DC 2 CPU"),
        datacenter_id: String::from(FAKE_DATACENTER),
        operating_system: OperatingSystem {
            id: String::from("WIN2012DC64"),
            family: String::from("WINDOWS"),
            display_name: String::from("Windows 2012 Datacenter"),
        },
    });
    let provisioner = provisioner(&compute, &ScriptedRunner::new());
    let mut record = machine(MachineSettings {
        image: String::from("Win2012 DC 2 CPU"),
        ..target_settings()
    });

    let err = provisioner
        .resolve_image(&mut record)
        .await
        .expect_err("windows image");

    assert_eq!(
        err,
        ProvisionError::UnsupportedImage {
            name: String::from("Win2012 DC 2 CPU"),
            family: String::from("WINDOWS"),
        }
    );
    assert!(!record.image_id.is_resolved());
    assert_eq!(record.image_os_type, None);
}
