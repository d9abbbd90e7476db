//! Unit tests for the provisioner, driven through the in-memory compute fake.

use std::net::Ipv4Addr;
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::fixture;
use tempfile::TempDir;

use super::Provisioner;
use crate::machine::{Machine, MachineSettings};
use crate::ssh::{SshClient, SshTools};
use crate::test_support::{
    FAKE_DATACENTER, FAKE_NETWORK_DOMAIN, FAKE_VLAN, FakeCompute, FixedIpDetector, ScriptedRunner,
};

mod resolve;

pub(super) type TestProvisioner = Provisioner<FakeCompute, ScriptedRunner, FixedIpDetector>;

/// Address returned by the detector in every test.
pub(super) const DETECTED_CLIENT_IP: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 7);

/// Public key seeded into every sandbox.
pub(super) const PUBLIC_KEY: &str = "ssh-rsa AAAAB3NzaC1yc2E test@workstation";

pub(super) fn provisioner(compute: &FakeCompute, runner: &ScriptedRunner) -> TestProvisioner {
    Provisioner::new(
        compute.clone(),
        SshClient::new(runner.clone(), SshTools::default()),
        FixedIpDetector(DETECTED_CLIENT_IP),
    )
    .with_poll_interval(Duration::from_millis(1))
}

pub(super) fn target_settings() -> MachineSettings {
    MachineSettings {
        network_domain: String::from(FAKE_NETWORK_DOMAIN),
        datacenter: String::from(FAKE_DATACENTER),
        vlan: String::from(FAKE_VLAN),
        ..MachineSettings::default()
    }
}

/// Temporary storage holding a machine directory and a key pair to import.
pub(super) struct Sandbox {
    _tmp: TempDir,
    root: Utf8PathBuf,
}

impl Sandbox {
    pub(super) fn source_key(&self) -> Utf8PathBuf {
        self.root.join("keys/id_rsa")
    }

    /// Builds a machine whose settings import the sandbox key pair.
    pub(super) fn machine(&self, name: &str, settings: MachineSettings) -> Machine {
        let dir = self.root.join("machines").join(name);
        std::fs::create_dir_all(&dir).expect("machine dir");
        let mut machine = Machine::new(name, dir, settings);
        machine.settings.ssh_key = Some(self.source_key());
        machine
    }
}

#[fixture]
pub(super) fn sandbox() -> Sandbox {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    std::fs::create_dir_all(root.join("keys")).expect("keys dir");
    std::fs::write(root.join("keys/id_rsa"), "PRIVATE KEY").expect("private key");
    std::fs::write(root.join("keys/id_rsa.pub"), format!("{PUBLIC_KEY}\n")).expect("public key");
    Sandbox { _tmp: tmp, root }
}

#[fixture]
pub(super) fn compute() -> FakeCompute {
    FakeCompute::with_standard_topology()
}
