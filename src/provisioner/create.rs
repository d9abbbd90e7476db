//! Machine creation: precheck, key preparation, deployment and bootstrap.

use std::net::Ipv4Addr;

use tracing::{debug, info};
use uuid::Uuid;

use super::{ProvisionError, Provisioner, ResourceKind};
use crate::compute::{ComputeApi, CpuOverrides, ServerDeployment};
use crate::machine::Machine;
use crate::public_ip::PublicIpDetector;
use crate::remediation::QuirkyPlatform;
use crate::resource::ResourceId;
use crate::ssh::{
    CommandRunner, SshAuth, SshTarget, bootstrap_steps, import_key_pair, read_public_key,
};

const PRIMARY_DNS: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);
const SECONDARY_DNS: Ipv4Addr = Ipv4Addr::new(8, 8, 4, 4);

impl<C, R, D> Provisioner<C, R, D>
where
    C: ComputeApi,
    R: CommandRunner,
    D: PublicIpDetector,
{
    /// Creates the machine's server, exposes it and installs its SSH key.
    ///
    /// Every identifier is written to `machine` as soon as it is known. A
    /// failure part way through leaves those identifiers in place: running
    /// `create` again resumes against the recorded server, reusing its NAT
    /// and firewall rules, while [`Provisioner::remove`] deletes them.
    ///
    /// The SSH bootstrap runs only while the bootstrap password is still
    /// recorded; it is cleared once the key is installed.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] when the recorded server no longer
    /// exists, or the first error raised by resolution, key preparation,
    /// deployment, exposure, bootstrap or remediation.
    pub async fn create(&self, machine: &mut Machine) -> Result<(), ProvisionError> {
        info!(machine = %machine.name, "checking target resources");
        self.resolve_network_domain(machine).await?;
        self.resolve_vlan(machine).await?;
        self.resolve_image(machine).await?;

        let public_key = self.prepare_key(machine)?;
        if let Some(server_id) = machine.server_id.as_deref().map(str::to_owned) {
            info!(machine = %machine.name, server_id = %server_id, "resuming with recorded server");
            self.resume_deployment(machine, &server_id).await?;
        } else {
            let password = machine
                .bootstrap_password
                .get_or_insert_with(generate_password)
                .clone();
            self.deploy(machine, &password).await?;
        }

        if machine.settings.use_private_ip {
            info!(machine = %machine.name, "using private IP; skipping NAT and firewall rules");
        } else {
            self.ensure_nat_rule(machine).await?;
            self.create_firewall_rules(machine).await?;
        }

        if let Some(password) = machine.bootstrap_password.clone() {
            self.bootstrap(machine, &password, &public_key)?;
        } else {
            debug!(machine = %machine.name, "SSH key already installed");
        }
        self.remediate(machine)?;
        info!(machine = %machine.name, url = ?machine.url(), "machine created");
        Ok(())
    }

    /// Places the machine's key pair in its directory and returns the public
    /// key. A key pair left by an earlier attempt is reused.
    fn prepare_key(&self, machine: &mut Machine) -> Result<String, ProvisionError> {
        if let Some(existing) = machine.ssh_key_path.as_deref()
            && let Ok(public_key) = read_public_key(existing)
        {
            debug!(path = %existing, "reusing existing SSH key pair");
            return Ok(public_key);
        }

        let destination = machine.default_key_path();
        if let Some(source) = machine.settings.ssh_key.as_deref() {
            info!(source = %source, destination = %destination, "importing SSH key pair");
            import_key_pair(source, &destination)?;
        } else {
            info!(path = %destination, "generating SSH key pair");
            self.ssh.generate_key_pair(&destination)?;
        }
        let public_key = read_public_key(&destination)?;
        machine.ssh_key_path = Some(destination);
        Ok(public_key)
    }

    async fn deploy(&self, machine: &mut Machine, password: &str) -> Result<(), ProvisionError> {
        let deployment = deployment_for(machine, password)?;

        info!(
            machine = %machine.name,
            image = %machine.settings.image,
            "deploying server"
        );
        let server_id = self.compute.deploy_server(&deployment).await?;
        debug!(server_id = %server_id, "deployment accepted");
        machine.server_id = ResourceId::resolved(server_id.clone());
        self.await_deployment(machine, &server_id).await
    }

    async fn resume_deployment(
        &self,
        machine: &mut Machine,
        server_id: &str,
    ) -> Result<(), ProvisionError> {
        if self.compute.get_server(server_id).await?.is_none() {
            return Err(ProvisionError::NotFound {
                kind: ResourceKind::Server,
                name: server_id.to_owned(),
                scope: format!("machine {}", machine.name),
            });
        }
        self.await_deployment(machine, server_id).await
    }

    /// Waits for the server to report deployed and records its private
    /// address as the effective one until a NAT rule is in place.
    async fn await_deployment(
        &self,
        machine: &mut Machine,
        server_id: &str,
    ) -> Result<(), ProvisionError> {
        let server = self
            .wait_for_server(server_id, "deployment", self.timeouts.deploy, |server| {
                server.is_some_and(|found| found.deployed)
            })
            .await?;
        let private_ip = server
            .and_then(|found| found.private_ipv4)
            .or(machine.settings.private_ip)
            .ok_or_else(|| ProvisionError::MissingPrivateIp {
                server_id: server_id.to_owned(),
            })?;
        info!(server_id = %server_id, private_ip = %private_ip, "server deployed");
        machine.private_ip = Some(private_ip);
        machine.public_ip = Some(private_ip);
        Ok(())
    }

    fn bootstrap(
        &self,
        machine: &mut Machine,
        password: &str,
        public_key: &str,
    ) -> Result<(), ProvisionError> {
        let target = ssh_target(machine)?;
        info!(host = %target.host, user = %target.user, "installing SSH key");
        for step in bootstrap_steps(&target.user, public_key) {
            self.ssh.run_checked(
                &target,
                SshAuth::Password(password),
                step.description,
                &step.command,
            )?;
        }
        machine.bootstrap_password = None;
        Ok(())
    }

    fn remediate(&self, machine: &Machine) -> Result<(), ProvisionError> {
        let Some(platform) = machine
            .image_os_type
            .as_deref()
            .and_then(QuirkyPlatform::classify)
        else {
            return Ok(());
        };
        let target = ssh_target(machine)?;
        let key_path = machine.key_path();
        for hook in platform.hooks() {
            info!(?platform, hook = hook.description(), "applying post-provision fix");
            self.ssh.run_checked(
                &target,
                SshAuth::Key(&key_path),
                hook.description(),
                hook.command(),
            )?;
        }
        Ok(())
    }
}

fn deployment_for(machine: &Machine, password: &str) -> Result<ServerDeployment, ProvisionError> {
    let (Some(network_domain_id), Some(image_id)) = (
        machine.network_domain_id.as_deref(),
        machine.image_id.as_deref(),
    ) else {
        return Err(ProvisionError::MissingPrerequisite {
            step: "deployment",
            prerequisite: "a resolved network domain and OS image",
        });
    };
    let settings = &machine.settings;
    Ok(ServerDeployment {
        name: machine.name.clone(),
        description: format!("{} (created by Docker Machine).", machine.name),
        image_id: image_id.to_owned(),
        administrator_password: password.to_owned(),
        network_domain_id: network_domain_id.to_owned(),
        vlan_id: machine.vlan_id.as_deref().unwrap_or_default().to_owned(),
        private_ipv4: settings.private_ip,
        primary_dns: PRIMARY_DNS,
        secondary_dns: SECONDARY_DNS,
        cpu: CpuOverrides {
            count: settings.cpu_count,
            cores_per_socket: settings.cores_per_socket,
        },
        memory_gb: settings.memory_gb,
        start: true,
    })
}

fn ssh_target(machine: &Machine) -> Result<SshTarget, ProvisionError> {
    let host = machine
        .public_ip
        .ok_or(ProvisionError::MissingPrerequisite {
            step: "SSH bootstrap",
            prerequisite: "a server address",
        })?;
    Ok(SshTarget {
        host,
        port: machine.settings.ssh_port,
        user: machine.settings.ssh_user.clone(),
    })
}

/// Generates a one-time administrator password meeting CloudControl's
/// complexity rules.
fn generate_password() -> String {
    format!("Dm{}!", Uuid::new_v4().simple())
}
