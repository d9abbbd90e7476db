//! Public exposure of a deployed server through NAT and firewall rules.

use std::net::Ipv4Addr;

use tracing::{debug, info};

use super::{ProvisionError, Provisioner, ResourceKind};
use crate::compute::{
    ComputeApi, FirewallAction, FirewallProtocol, FirewallRuleRequest, NatRule, Paging,
};
use crate::machine::{DOCKER_PORT, Machine};
use crate::public_ip::PublicIpDetector;
use crate::resource::ResourceId;
use crate::ssh::CommandRunner;

/// Which firewall rule slot of the machine is being filled.
#[derive(Clone, Copy, Debug)]
enum RuleSlot {
    Ssh,
    Docker,
}

impl RuleSlot {
    const fn suffix(self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Docker => "docker",
        }
    }

    const fn id(self, machine: &mut Machine) -> &mut ResourceId {
        match self {
            Self::Ssh => &mut machine.ssh_firewall_rule_id,
            Self::Docker => &mut machine.docker_firewall_rule_id,
        }
    }
}

impl<C, R, D> Provisioner<C, R, D>
where
    C: ComputeApi,
    R: CommandRunner,
    D: PublicIpDetector,
{
    /// Maps a public address to the server's private address, reusing an
    /// existing NAT rule for that address when one is present.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::MissingPrerequisite`] when the server has
    /// not been deployed, or [`ProvisionError::Compute`] when a NAT or
    /// public IP call fails.
    pub async fn ensure_nat_rule(&self, machine: &mut Machine) -> Result<(), ProvisionError> {
        let (Some(domain_id), Some(private_ip)) = (
            machine.network_domain_id.as_deref().map(str::to_owned),
            machine.private_ip,
        ) else {
            return Err(ProvisionError::MissingPrerequisite {
                step: "NAT rule creation",
                prerequisite: "a deployed server with a private IP",
            });
        };

        let rule = if let Some(recorded) = self.recorded_nat_rule(machine).await? {
            recorded
        } else if let Some(existing) = self.find_nat_rule(&domain_id, private_ip).await? {
            info!(nat_rule_id = %existing.id, "reusing NAT rule for {private_ip}");
            existing
        } else {
            self.create_nat_rule(&domain_id, private_ip).await?
        };

        info!(
            nat_rule_id = %rule.id,
            public_ip = %rule.external_ip,
            private_ip = %private_ip,
            "server exposed"
        );
        machine.nat_rule_id = ResourceId::resolved(rule.id);
        machine.public_ip = Some(rule.external_ip);
        Ok(())
    }

    async fn recorded_nat_rule(&self, machine: &Machine) -> Result<Option<NatRule>, ProvisionError> {
        let Some(rule_id) = machine.nat_rule_id.as_deref() else {
            return Ok(None);
        };
        Ok(self.compute.get_nat_rule(rule_id).await?)
    }

    async fn find_nat_rule(
        &self,
        domain_id: &str,
        private_ip: Ipv4Addr,
    ) -> Result<Option<NatRule>, ProvisionError> {
        let mut paging = Paging::first();
        loop {
            let page = self.compute.list_nat_rules(domain_id, paging).await?;
            debug!(page = page.page_number, of = page.page_count, "scanned NAT rules");
            if let Some(rule) = page
                .rules
                .iter()
                .find(|rule| rule.internal_ip == private_ip)
            {
                return Ok(Some(rule.clone()));
            }
            if page.is_last() {
                return Ok(None);
            }
            paging = paging.next();
        }
    }

    async fn create_nat_rule(
        &self,
        domain_id: &str,
        private_ip: Ipv4Addr,
    ) -> Result<NatRule, ProvisionError> {
        if self.compute.available_public_ips(domain_id).await?.is_empty() {
            info!(network_domain_id = %domain_id, "allocating public IP block");
            let block_id = self.compute.add_public_ip_block(domain_id).await?;
            debug!(block_id = %block_id, "public IP block added");
        }

        let rule_id = self.compute.add_nat_rule(domain_id, private_ip).await?;
        debug!(nat_rule_id = %rule_id, "NAT rule created");
        self.compute
            .get_nat_rule(&rule_id)
            .await?
            .ok_or_else(|| ProvisionError::NotFound {
                kind: ResourceKind::NatRule,
                name: rule_id,
                scope: format!("network domain {domain_id}"),
            })
    }

    /// Creates the SSH and Docker firewall rules requested by the machine's
    /// settings, admitting the client's public address only.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::MissingPrerequisite`] when the server has
    /// no NAT rule, [`ProvisionError::PublicIp`] when the client address
    /// cannot be detected, or [`ProvisionError::Compute`] when rule creation
    /// fails.
    pub async fn create_firewall_rules(&self, machine: &mut Machine) -> Result<(), ProvisionError> {
        let wanted = [
            (RuleSlot::Ssh, machine.settings.create_ssh_firewall_rule, machine.settings.ssh_port),
            (RuleSlot::Docker, machine.settings.create_docker_firewall_rule, DOCKER_PORT),
        ];
        if wanted.iter().all(|(_, enabled, _)| !enabled) {
            return Ok(());
        }

        let (Some(domain_id), Some(public_ip), true) = (
            machine.network_domain_id.as_deref().map(str::to_owned),
            machine.public_ip,
            machine.nat_rule_id.is_resolved(),
        ) else {
            return Err(ProvisionError::MissingPrerequisite {
                step: "firewall rule creation",
                prerequisite: "a NAT rule exposing the server",
            });
        };
        let client_ip = self.client_public_ip(machine).await?;
        let prefix = machine.firewall_rule_prefix();

        for (slot, enabled, port) in wanted {
            if !enabled || slot.id(machine).is_resolved() {
                continue;
            }
            let request = FirewallRuleRequest {
                name: format!("{prefix}.{}", slot.suffix()),
                network_domain_id: domain_id.clone(),
                action: FirewallAction::AcceptDecisively,
                protocol: FirewallProtocol::Tcp,
                source_ip: client_ip,
                destination_ip: public_ip,
                destination_port: port,
                enabled: true,
                place_first: true,
            };
            let rule_id = self.compute.create_firewall_rule(&request).await?;
            info!(
                rule = %request.name,
                id = %rule_id,
                source = %client_ip,
                port,
                "firewall rule created"
            );
            *slot.id(machine) = ResourceId::resolved(rule_id);
        }
        Ok(())
    }

    async fn client_public_ip(&self, machine: &mut Machine) -> Result<Ipv4Addr, ProvisionError> {
        if let Some(address) = machine.settings.client_public_ip.or(machine.client_public_ip) {
            machine.client_public_ip = Some(address);
            return Ok(address);
        }
        let detected = self.detector.detect().await?;
        info!(client_ip = %detected, "detected client public IP");
        machine.client_public_ip = Some(detected);
        Ok(detected)
    }
}
