//! Resolution of configured names to CloudControl identifiers.
//!
//! Each resolver clears the cached identifier before querying, so a failed
//! lookup never leaves a stale value behind.

use tracing::info;

use super::{ProvisionError, Provisioner, ResourceKind};
use crate::compute::ComputeApi;
use crate::machine::Machine;
use crate::public_ip::PublicIpDetector;
use crate::resource::ResourceId;
use crate::ssh::CommandRunner;

/// Operating system family the bootstrap commands support.
const SUPPORTED_OS_FAMILY: &str = "UNIX";

impl<C, R, D> Provisioner<C, R, D>
where
    C: ComputeApi,
    R: CommandRunner,
    D: PublicIpDetector,
{
    /// Resolves the configured network domain within the data centre.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] when the domain or data centre name
    /// is empty, [`ProvisionError::NotFound`] when no domain matches, or
    /// [`ProvisionError::Compute`] when the lookup fails.
    pub async fn resolve_network_domain(&self, machine: &mut Machine) -> Result<(), ProvisionError> {
        let name = required(&machine.settings.network_domain, "network domain name")?;
        let datacenter = required(&machine.settings.datacenter, "data centre")?;
        machine.network_domain_id.clear();

        let domain = self
            .compute
            .find_network_domain(&name, &datacenter)
            .await?
            .ok_or_else(|| ProvisionError::NotFound {
                kind: ResourceKind::NetworkDomain,
                name: name.clone(),
                scope: format!("data centre {datacenter}"),
            })?;
        info!(network_domain = %name, id = %domain.id, "resolved network domain");
        machine.network_domain_id = ResourceId::resolved(domain.id);
        Ok(())
    }

    /// Resolves the configured VLAN, resolving the network domain first when
    /// it is not yet known.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] when the VLAN name is empty,
    /// [`ProvisionError::NotFound`] when no VLAN matches, or any error from
    /// [`Provisioner::resolve_network_domain`].
    pub async fn resolve_vlan(&self, machine: &mut Machine) -> Result<(), ProvisionError> {
        let name = required(&machine.settings.vlan, "VLAN name")?;
        if !machine.network_domain_id.is_resolved() {
            self.resolve_network_domain(machine).await?;
        }
        let Some(domain_id) = machine.network_domain_id.as_deref().map(str::to_owned) else {
            return Err(ProvisionError::MissingPrerequisite {
                step: "VLAN resolution",
                prerequisite: "a resolved network domain",
            });
        };
        machine.vlan_id.clear();

        let vlan = self
            .compute
            .find_vlan(&name, &domain_id)
            .await?
            .ok_or_else(|| ProvisionError::NotFound {
                kind: ResourceKind::Vlan,
                name: name.clone(),
                scope: format!("network domain {domain_id}"),
            })?;
        info!(vlan = %name, id = %vlan.id, "resolved VLAN");
        machine.vlan_id = ResourceId::resolved(vlan.id);
        Ok(())
    }

    /// Resolves the configured OS image within the data centre and records
    /// its OS type.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] when the image or data centre name
    /// is empty, [`ProvisionError::NotFound`] when no image matches,
    /// [`ProvisionError::UnsupportedImage`] when the image is not a UNIX
    /// image, or [`ProvisionError::Compute`] when the lookup fails.
    pub async fn resolve_image(&self, machine: &mut Machine) -> Result<(), ProvisionError> {
        let name = required(&machine.settings.image, "OS image name")?;
        let datacenter = required(&machine.settings.datacenter, "data centre")?;
        machine.image_id.clear();
        machine.image_os_type = None;

        let image = self
            .compute
            .find_os_image(&name, &datacenter)
            .await?
            .ok_or_else(|| ProvisionError::NotFound {
                kind: ResourceKind::Image,
                name: name.clone(),
                scope: format!("data centre {datacenter}"),
            })?;
        if image.operating_system.family != SUPPORTED_OS_FAMILY {
            return Err(ProvisionError::UnsupportedImage {
                name,
                family: image.operating_system.family,
            });
        }
        info!(
            image = %name,
            id = %image.id,
            os_type = %image.operating_system.id,
            "resolved OS image"
        );
        machine.image_id = ResourceId::resolved(image.id);
        machine.image_os_type = Some(image.operating_system.id);
        Ok(())
    }
}

fn required(value: &str, label: &str) -> Result<String, ProvisionError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ProvisionError::Config(format!("{label} is required")));
    }
    Ok(trimmed.to_owned())
}
