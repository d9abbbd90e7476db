//! Behavioural coverage for creating, inspecting and removing machines
//! against the in-memory CloudControl fake.

use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use camino::Utf8PathBuf;
use ddcloud_machine::compute::Server;
use ddcloud_machine::ssh::{SshClient, SshTools};
use ddcloud_machine::test_support::{
    FAKE_DATACENTER, FAKE_NETWORK_DOMAIN, FAKE_VLAN, FakeCompute, FixedIpDetector, ScriptedRunner,
};
use ddcloud_machine::{
    Machine, MachineSettings, MachineState, ProvisionError, Provisioner, ResourceId,
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;
use tokio::runtime::Runtime;

type FakeProvisioner = Provisioner<FakeCompute, ScriptedRunner, FixedIpDetector>;

#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error("fixture setup failed: {0}")]
    Setup(String),
}

#[derive(Clone, Debug)]
struct LifecycleContext {
    compute: FakeCompute,
    runner: ScriptedRunner,
    root: Utf8PathBuf,
    machine: Rc<RefCell<Option<Machine>>>,
    outcome: Rc<RefCell<Option<Result<(), ProvisionError>>>>,
    state: Rc<RefCell<Option<MachineState>>>,
    _tmp: Rc<TempDir>,
}

impl LifecycleContext {
    fn provisioner(&self) -> FakeProvisioner {
        Provisioner::new(
            self.compute.clone(),
            SshClient::new(self.runner.clone(), SshTools::default()),
            FixedIpDetector(Ipv4Addr::new(198, 51, 100, 7)),
        )
        .with_poll_interval(Duration::from_millis(1))
    }

    fn new_machine(&self, settings: MachineSettings) -> Machine {
        let dir = self.root.join("machines/node-1");
        std::fs::create_dir_all(&dir)
            .unwrap_or_else(|err| panic!("create machine directory {dir}: {err}"));
        Machine::new("node-1", dir, settings)
    }

    fn put_machine(&self, machine: Machine) {
        self.machine.replace(Some(machine));
    }

    fn take_machine(&self) -> Result<Machine, StepError> {
        self.machine
            .borrow_mut()
            .take()
            .ok_or_else(|| StepError::Assertion(String::from("no machine in context")))
    }

    fn with_machine<T>(&self, check: impl FnOnce(&Machine) -> T) -> Result<T, StepError> {
        self.machine
            .borrow()
            .as_ref()
            .map(check)
            .ok_or_else(|| StepError::Assertion(String::from("no machine in context")))
    }

    fn outcome(&self) -> Result<Result<(), ProvisionError>, StepError> {
        self.outcome
            .borrow()
            .clone()
            .ok_or_else(|| StepError::Assertion(String::from("no operation has run")))
    }

    fn with_server(&self, server_id: &str, started: bool) {
        self.compute.add_server(Server {
            id: server_id.to_owned(),
            name: String::from("node-1"),
            deployed: true,
            started,
            private_ipv4: Some(Ipv4Addr::new(10, 0, 0, 10)),
        });
        let mut machine = self.new_machine(MachineSettings::default());
        machine.server_id = ResourceId::resolved(server_id);
        self.put_machine(machine);
    }
}

fn block_on<F: Future>(future: F) -> Result<F::Output, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Setup(err.to_string()))?;
    Ok(runtime.block_on(future))
}

#[fixture]
fn lifecycle() -> LifecycleContext {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("create temp directory: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    LifecycleContext {
        compute: FakeCompute::with_standard_topology(),
        runner: ScriptedRunner::new(),
        root,
        machine: Rc::new(RefCell::new(None)),
        outcome: Rc::new(RefCell::new(None)),
        state: Rc::new(RefCell::new(None)),
        _tmp: Rc::new(tmp),
    }
}

#[given("a machine with no server")]
fn machine_without_server(lifecycle: &LifecycleContext) {
    lifecycle.put_machine(lifecycle.new_machine(MachineSettings::default()));
}

#[given("a machine whose server \"{server_id}\" was deleted out of band")]
fn machine_with_deleted_server(lifecycle: &LifecycleContext, server_id: String) {
    let mut machine = lifecycle.new_machine(MachineSettings::default());
    machine.server_id = ResourceId::resolved(server_id);
    lifecycle.put_machine(machine);
}

#[given("a machine with a running server \"{server_id}\"")]
fn machine_with_running_server(lifecycle: &LifecycleContext, server_id: String) {
    lifecycle.with_server(&server_id, true);
}

#[given("a machine with a stopped server \"{server_id}\"")]
fn machine_with_stopped_server(lifecycle: &LifecycleContext, server_id: String) {
    lifecycle.with_server(&server_id, false);
}

#[given("a new machine using image \"{image}\" on its private address")]
fn new_private_machine(lifecycle: &LifecycleContext, image: String) -> Result<(), StepError> {
    let keys = lifecycle.root.join("keys");
    std::fs::create_dir_all(&keys).map_err(|err| StepError::Setup(err.to_string()))?;
    std::fs::write(keys.join("id_rsa"), "PRIVATE KEY")
        .map_err(|err| StepError::Setup(err.to_string()))?;
    std::fs::write(keys.join("id_rsa.pub"), "ssh-rsa AAAAB3NzaC1yc2E bdd@workstation\n")
        .map_err(|err| StepError::Setup(err.to_string()))?;

    let settings = MachineSettings {
        network_domain: String::from(FAKE_NETWORK_DOMAIN),
        datacenter: String::from(FAKE_DATACENTER),
        vlan: String::from(FAKE_VLAN),
        image,
        ssh_key: Some(keys.join("id_rsa")),
        use_private_ip: true,
        create_ssh_firewall_rule: true,
        ..MachineSettings::default()
    };
    lifecycle.put_machine(lifecycle.new_machine(settings));
    Ok(())
}

#[when("I remove the machine")]
fn remove_machine(lifecycle: &LifecycleContext) -> Result<(), StepError> {
    let mut machine = lifecycle.take_machine()?;
    let provisioner = lifecycle.provisioner();
    let outcome = block_on(provisioner.remove(&mut machine))?;
    lifecycle.put_machine(machine);
    lifecycle.outcome.replace(Some(outcome));
    Ok(())
}

#[when("I create the machine")]
fn create_machine(lifecycle: &LifecycleContext) -> Result<(), StepError> {
    let mut machine = lifecycle.take_machine()?;
    let provisioner = lifecycle.provisioner();
    let outcome = block_on(provisioner.create(&mut machine))?;
    lifecycle.put_machine(machine);
    lifecycle.outcome.replace(Some(outcome));
    Ok(())
}

#[when("I query the machine state")]
fn query_state(lifecycle: &LifecycleContext) -> Result<(), StepError> {
    let machine = lifecycle.take_machine()?;
    let provisioner = lifecycle.provisioner();
    let state = block_on(provisioner.state(&machine))?
        .map_err(|err| StepError::Assertion(format!("state query failed: {err}")))?;
    lifecycle.put_machine(machine);
    lifecycle.state.replace(Some(state));
    Ok(())
}

#[then("the removal succeeds")]
fn removal_succeeds(lifecycle: &LifecycleContext) -> Result<(), StepError> {
    lifecycle
        .outcome()?
        .map_err(|err| StepError::Assertion(format!("expected removal to succeed: {err}")))
}

#[then("the creation succeeds")]
fn creation_succeeds(lifecycle: &LifecycleContext) -> Result<(), StepError> {
    lifecycle
        .outcome()?
        .map_err(|err| StepError::Assertion(format!("expected creation to succeed: {err}")))
}

#[then("the creation fails with \"{snippet}\"")]
fn creation_fails(lifecycle: &LifecycleContext, snippet: String) -> Result<(), StepError> {
    match lifecycle.outcome()? {
        Ok(()) => Err(StepError::Assertion(String::from(
            "expected creation to fail",
        ))),
        Err(err) if err.to_string().contains(&snippet) => Ok(()),
        Err(err) => Err(StepError::Assertion(format!(
            "expected error containing '{snippet}', got: {err}"
        ))),
    }
}

#[then("no CloudControl call is made")]
fn no_calls(lifecycle: &LifecycleContext) -> Result<(), StepError> {
    if lifecycle.compute.is_untouched() {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "expected no calls, got {:?}",
        lifecycle.compute.calls()
    )))
}

#[then("the machine no longer records a server")]
fn server_cleared(lifecycle: &LifecycleContext) -> Result<(), StepError> {
    if lifecycle.with_machine(|machine| machine.server_id.is_resolved())? {
        return Err(StepError::Assertion(String::from(
            "server id should be cleared",
        )));
    }
    Ok(())
}

#[then("the server \"{server_id}\" is shut down before it is deleted")]
fn shut_down_then_deleted(lifecycle: &LifecycleContext, server_id: String) -> Result<(), StepError> {
    let calls = lifecycle.compute.calls();
    let position = |call: String| calls.iter().position(|recorded| *recorded == call);
    let shutdown = position(format!("shutdown_server {server_id}"));
    let delete = position(format!("delete_server {server_id}"));
    match (shutdown, delete) {
        (Some(shutdown_at), Some(delete_at)) if shutdown_at < delete_at => Ok(()),
        _ => Err(StepError::Assertion(format!(
            "expected shutdown before delete, got {calls:?}"
        ))),
    }
}

#[then("the server \"{server_id}\" is deleted without a shutdown")]
fn deleted_without_shutdown(
    lifecycle: &LifecycleContext,
    server_id: String,
) -> Result<(), StepError> {
    let calls = lifecycle.compute.calls();
    let shut_down = calls.contains(&format!("shutdown_server {server_id}"));
    let deleted = calls.contains(&format!("delete_server {server_id}"));
    if deleted && !shut_down {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "expected a delete without shutdown, got {calls:?}"
    )))
}

#[then("the machine address is its private address")]
fn address_is_private(lifecycle: &LifecycleContext) -> Result<(), StepError> {
    let (private_ip, public_ip) =
        lifecycle.with_machine(|machine| (machine.private_ip, machine.public_ip))?;
    if private_ip.is_some() && private_ip == public_ip {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "expected public address {public_ip:?} to equal private address {private_ip:?}"
    )))
}

#[then("no NAT or firewall rule is created")]
fn no_rules(lifecycle: &LifecycleContext) -> Result<(), StepError> {
    let nat_rules = lifecycle.compute.nat_rules();
    let firewall_rules = lifecycle.compute.firewall_rules();
    if nat_rules.is_empty() && firewall_rules.is_empty() {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "expected no rules, got NAT {nat_rules:?} and firewall {firewall_rules:?}"
    )))
}

#[then("the state is reported as \"{expected}\"")]
fn state_reported(lifecycle: &LifecycleContext, expected: String) -> Result<(), StepError> {
    let state = lifecycle
        .state
        .borrow()
        .ok_or_else(|| StepError::Assertion(String::from("state was not queried")))?;
    if state.to_string() == expected {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "expected state '{expected}', got '{state}'"
    )))
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Removing a machine that never deployed"
)]
fn scenario_remove_never_deployed(lifecycle: LifecycleContext) {
    let _ = lifecycle;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Removing a machine whose server is already gone"
)]
fn scenario_remove_already_gone(lifecycle: LifecycleContext) {
    let _ = lifecycle;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Removing a running machine shuts it down first"
)]
fn scenario_remove_running(lifecycle: LifecycleContext) {
    let _ = lifecycle;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Removing a stopped machine skips the shutdown"
)]
fn scenario_remove_stopped(lifecycle: LifecycleContext) {
    let _ = lifecycle;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Creating a machine on its private address"
)]
fn scenario_create_private(lifecycle: LifecycleContext) {
    let _ = lifecycle;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Creating a machine from an unknown image"
)]
fn scenario_create_unknown_image(lifecycle: LifecycleContext) {
    let _ = lifecycle;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Reporting the state of a stopped machine"
)]
fn scenario_state_stopped(lifecycle: LifecycleContext) {
    let _ = lifecycle;
}
