//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::compute::{
    ComputeApi, ComputeError, ComputeFuture, FirewallRuleRequest, NatRule, NatRulePage,
    NetworkDomain, OperatingSystem, OsImage, Paging, Server, ServerDeployment, Vlan,
};
use crate::public_ip::{DetectFuture, PublicIpDetector};
use crate::ssh::{CommandOutput, CommandRunner, SshError};

/// Data centre used by [`FakeCompute::with_standard_topology`].
pub const FAKE_DATACENTER: &str = "AU9";
/// Network domain name used by [`FakeCompute::with_standard_topology`].
pub const FAKE_NETWORK_DOMAIN: &str = "docker-domain";
/// VLAN name used by [`FakeCompute::with_standard_topology`].
pub const FAKE_VLAN: &str = "docker-vlan";
/// Ubuntu image name used by [`FakeCompute::with_standard_topology`].
pub const FAKE_UBUNTU_IMAGE: &str = "Ubuntu 14.04 2 CPU";
/// CentOS image name used by [`FakeCompute::with_standard_topology`].
pub const FAKE_CENTOS_IMAGE: &str = "CentOS 7 64-bit 2 CPU";

#[derive(Debug, Default)]
struct FakeState {
    network_domains: Vec<NetworkDomain>,
    vlans: Vec<Vlan>,
    images: Vec<OsImage>,
    servers: BTreeMap<String, FakeServer>,
    deployments: Vec<ServerDeployment>,
    nat_rules: Vec<NatRule>,
    free_public_ips: Vec<Ipv4Addr>,
    firewall_rules: BTreeMap<String, FirewallRuleRequest>,
    failures: BTreeMap<String, ComputeError>,
    calls: Vec<String>,
    pending_deploy_polls: u32,
    pending_delete_polls: u32,
    next_id: u32,
    next_public_octet: u8,
}

#[derive(Clone, Debug)]
struct FakeServer {
    server: Server,
    polls_until_deployed: u32,
    polls_until_gone: Option<u32>,
}

impl FakeState {
    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn record(&mut self, operation: &str, detail: &str) -> Result<(), ComputeError> {
        self.calls.push(format!("{operation} {detail}").trim_end().to_owned());
        self.failures
            .get(operation)
            .cloned()
            .map_or(Ok(()), Err)
    }

    fn server_mut(&mut self, server_id: &str) -> Result<&mut FakeServer, ComputeError> {
        self.servers
            .get_mut(server_id)
            .ok_or_else(|| not_found(server_id))
    }
}

fn not_found(id: &str) -> ComputeError {
    ComputeError::Api {
        status: 400,
        response_code: String::from("RESOURCE_NOT_FOUND"),
        message: format!("{id} not found"),
    }
}

/// In-memory [`ComputeApi`] with a call log and injectable failures.
///
/// Power actions complete immediately; deployment and deletion can be
/// delayed by a number of `get_server` polls.
#[derive(Clone, Debug, Default)]
pub struct FakeCompute {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCompute {
    /// Creates an empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fake holding one network domain, one VLAN, an Ubuntu image
    /// and a CentOS 7 image in [`FAKE_DATACENTER`].
    #[must_use]
    pub fn with_standard_topology() -> Self {
        let fake = Self::new();
        fake.add_network_domain(NetworkDomain {
            id: String::from("nd-1"),
            name: String::from(FAKE_NETWORK_DOMAIN),
            datacenter_id: String::from(FAKE_DATACENTER),
        });
        fake.add_vlan(Vlan {
            id: String::from("vlan-1"),
            name: String::from(FAKE_VLAN),
            network_domain_id: String::from("nd-1"),
        });
        fake.add_image(image("img-ubuntu", FAKE_UBUNTU_IMAGE, "UBUNTU1464", "UNIX"));
        fake.add_image(image("img-centos", FAKE_CENTOS_IMAGE, "CENTOS764", "UNIX"));
        fake
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a network domain.
    pub fn add_network_domain(&self, domain: NetworkDomain) {
        self.lock().network_domains.push(domain);
    }

    /// Registers a VLAN.
    pub fn add_vlan(&self, vlan: Vlan) {
        self.lock().vlans.push(vlan);
    }

    /// Registers an OS image.
    pub fn add_image(&self, image: OsImage) {
        self.lock().images.push(image);
    }

    /// Registers an existing server.
    pub fn add_server(&self, server: Server) {
        self.lock().servers.insert(
            server.id.clone(),
            FakeServer {
                server,
                polls_until_deployed: 0,
                polls_until_gone: None,
            },
        );
    }

    /// Registers an existing NAT rule.
    pub fn add_nat_rule(&self, rule: NatRule) {
        self.lock().nat_rules.push(rule);
    }

    /// Adds an unused public address to the domain's pool.
    pub fn add_public_ip(&self, address: Ipv4Addr) {
        self.lock().free_public_ips.push(address);
    }

    /// Makes every later call of `operation` fail with `error`.
    pub fn fail_on(&self, operation: &str, error: ComputeError) {
        self.lock().failures.insert(operation.to_owned(), error);
    }

    /// Number of polls a newly deployed server reports `deployed = false`.
    pub fn set_deploy_polls(&self, polls: u32) {
        self.lock().pending_deploy_polls = polls;
    }

    /// Number of polls a deleted server stays visible.
    pub fn set_delete_polls(&self, polls: u32) {
        self.lock().pending_delete_polls = polls;
    }

    /// Returns the calls recorded so far as `"<operation> <argument>"`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Returns `true` when no call has been recorded.
    #[must_use]
    pub fn is_untouched(&self) -> bool {
        self.lock().calls.is_empty()
    }

    /// Returns the current record of a server.
    #[must_use]
    pub fn server(&self, server_id: &str) -> Option<Server> {
        self.lock()
            .servers
            .get(server_id)
            .map(|entry| entry.server.clone())
    }

    /// Returns every deployment submitted.
    #[must_use]
    pub fn deployments(&self) -> Vec<ServerDeployment> {
        self.lock().deployments.clone()
    }

    /// Returns the NAT rules currently present.
    #[must_use]
    pub fn nat_rules(&self) -> Vec<NatRule> {
        self.lock().nat_rules.clone()
    }

    /// Returns the firewall rules currently present, keyed by identifier.
    #[must_use]
    pub fn firewall_rules(&self) -> BTreeMap<String, FirewallRuleRequest> {
        self.lock().firewall_rules.clone()
    }
}

fn image(id: &str, name: &str, os_id: &str, family: &str) -> OsImage {
    OsImage {
        id: id.to_owned(),
        name: name.to_owned(),
        datacenter_id: String::from(FAKE_DATACENTER),
        operating_system: OperatingSystem {
            id: os_id.to_owned(),
            family: family.to_owned(),
            display_name: name.to_owned(),
        },
    }
}

impl ComputeApi for FakeCompute {
    fn find_network_domain<'a>(
        &'a self,
        name: &'a str,
        datacenter_id: &'a str,
    ) -> ComputeFuture<'a, Option<NetworkDomain>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("find_network_domain", name)?;
            Ok(state
                .network_domains
                .iter()
                .find(|domain| domain.name == name && domain.datacenter_id == datacenter_id)
                .cloned())
        })
    }

    fn find_vlan<'a>(
        &'a self,
        name: &'a str,
        network_domain_id: &'a str,
    ) -> ComputeFuture<'a, Option<Vlan>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("find_vlan", name)?;
            Ok(state
                .vlans
                .iter()
                .find(|vlan| vlan.name == name && vlan.network_domain_id == network_domain_id)
                .cloned())
        })
    }

    fn find_os_image<'a>(
        &'a self,
        name: &'a str,
        datacenter_id: &'a str,
    ) -> ComputeFuture<'a, Option<OsImage>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("find_os_image", name)?;
            Ok(state
                .images
                .iter()
                .find(|image| image.name == name && image.datacenter_id == datacenter_id)
                .cloned())
        })
    }

    fn deploy_server<'a>(&'a self, deployment: &'a ServerDeployment) -> ComputeFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("deploy_server", &deployment.name)?;
            let id = state.allocate_id("srv");
            let private_ipv4 = deployment.private_ipv4.unwrap_or_else(|| {
                let octet = u8::try_from(10 + state.servers.len()).unwrap_or(u8::MAX);
                Ipv4Addr::new(10, 0, 0, octet)
            });
            let polls = state.pending_deploy_polls;
            state.deployments.push(deployment.clone());
            state.servers.insert(
                id.clone(),
                FakeServer {
                    server: Server {
                        id: id.clone(),
                        name: deployment.name.clone(),
                        deployed: polls == 0,
                        started: deployment.start && polls == 0,
                        private_ipv4: Some(private_ipv4),
                    },
                    polls_until_deployed: polls,
                    polls_until_gone: None,
                },
            );
            Ok(id)
        })
    }

    fn get_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, Option<Server>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("get_server", server_id)?;
            let Some(entry) = state.servers.get_mut(server_id) else {
                return Ok(None);
            };
            if let Some(remaining) = entry.polls_until_gone {
                if remaining == 0 {
                    state.servers.remove(server_id);
                    return Ok(None);
                }
                entry.polls_until_gone = Some(remaining - 1);
            }
            if entry.polls_until_deployed > 0 {
                entry.polls_until_deployed -= 1;
                if entry.polls_until_deployed == 0 {
                    entry.server.deployed = true;
                    entry.server.started = true;
                }
            }
            Ok(Some(entry.server.clone()))
        })
    }

    fn start_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("start_server", server_id)?;
            state.server_mut(server_id)?.server.started = true;
            Ok(())
        })
    }

    fn shutdown_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("shutdown_server", server_id)?;
            state.server_mut(server_id)?.server.started = false;
            Ok(())
        })
    }

    fn power_off_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("power_off_server", server_id)?;
            state.server_mut(server_id)?.server.started = false;
            Ok(())
        })
    }

    fn delete_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("delete_server", server_id)?;
            let polls = state.pending_delete_polls;
            state.server_mut(server_id)?.polls_until_gone = Some(polls);
            Ok(())
        })
    }

    fn list_nat_rules<'a>(
        &'a self,
        _network_domain_id: &'a str,
        paging: Paging,
    ) -> ComputeFuture<'a, NatRulePage> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("list_nat_rules", &paging.page_number.to_string())?;
            let size = usize::try_from(paging.page_size.max(1)).unwrap_or(usize::MAX);
            let skip = usize::try_from(paging.page_number.saturating_sub(1))
                .unwrap_or(usize::MAX)
                .saturating_mul(size);
            let total = state.nat_rules.len();
            let page_count = u32::try_from(total.div_ceil(size)).unwrap_or(u32::MAX);
            Ok(NatRulePage {
                rules: state.nat_rules.iter().skip(skip).take(size).cloned().collect(),
                page_number: paging.page_number,
                page_count,
            })
        })
    }

    fn add_nat_rule<'a>(
        &'a self,
        network_domain_id: &'a str,
        internal_ip: Ipv4Addr,
    ) -> ComputeFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("add_nat_rule", &internal_ip.to_string())?;
            if state.free_public_ips.is_empty() {
                return Err(ComputeError::Api {
                    status: 400,
                    response_code: String::from("NO_IP_ADDRESS_AVAILABLE"),
                    message: format!("no public address left in {network_domain_id}"),
                });
            }
            let external_ip = state.free_public_ips.remove(0);
            let id = state.allocate_id("nat");
            state.nat_rules.push(NatRule {
                id: id.clone(),
                internal_ip,
                external_ip,
            });
            Ok(id)
        })
    }

    fn get_nat_rule<'a>(&'a self, nat_rule_id: &'a str) -> ComputeFuture<'a, Option<NatRule>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("get_nat_rule", nat_rule_id)?;
            Ok(state
                .nat_rules
                .iter()
                .find(|rule| rule.id == nat_rule_id)
                .cloned())
        })
    }

    fn delete_nat_rule<'a>(&'a self, nat_rule_id: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("delete_nat_rule", nat_rule_id)?;
            let before = state.nat_rules.len();
            state.nat_rules.retain(|rule| rule.id != nat_rule_id);
            if state.nat_rules.len() == before {
                return Err(not_found(nat_rule_id));
            }
            Ok(())
        })
    }

    fn available_public_ips<'a>(
        &'a self,
        network_domain_id: &'a str,
    ) -> ComputeFuture<'a, Vec<Ipv4Addr>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("available_public_ips", network_domain_id)?;
            Ok(state.free_public_ips.clone())
        })
    }

    fn add_public_ip_block<'a>(&'a self, network_domain_id: &'a str) -> ComputeFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("add_public_ip_block", network_domain_id)?;
            for _ in 0..2 {
                state.next_public_octet = state.next_public_octet.saturating_add(1);
                let address = Ipv4Addr::new(203, 0, 113, state.next_public_octet);
                state.free_public_ips.push(address);
            }
            Ok(state.allocate_id("block"))
        })
    }

    fn create_firewall_rule<'a>(
        &'a self,
        rule: &'a FirewallRuleRequest,
    ) -> ComputeFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("create_firewall_rule", &rule.name)?;
            let id = state.allocate_id("fw");
            state.firewall_rules.insert(id.clone(), rule.clone());
            Ok(id)
        })
    }

    fn delete_firewall_rule<'a>(&'a self, firewall_rule_id: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("delete_firewall_rule", firewall_rule_id)?;
            state
                .firewall_rules
                .remove(firewall_rule_id)
                .map(|_| ())
                .ok_or_else(|| not_found(firewall_rule_id))
        })
    }
}

/// Detector returning a fixed address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FixedIpDetector(pub Ipv4Addr);

impl PublicIpDetector for FixedIpDetector {
    fn detect(&self) -> DetectFuture<'_> {
        let address = self.0;
        Box::pin(async move { Ok(address) })
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// When the queue is empty every command succeeds with no output.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Extra environment passed to the program.
    pub env: Vec<(String, String)>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns the last argument, which is the remote command for `ssh`.
    #[must_use]
    pub fn last_arg(&self) -> Option<String> {
        self.args
            .last()
            .map(|arg| arg.to_string_lossy().into_owned())
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        env: &[(String, String)],
    ) -> Result<CommandOutput, SshError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            env: env.to_vec(),
        });
        Ok(self
            .responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| CommandOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            }))
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }

    /// Removes variables while holding the global mutex.
    pub async fn remove_vars(keys: &[&str]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(keys.len());
        for key in keys {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
