//! Platform-specific fixes applied after a server has been bootstrapped.
//!
//! Some images ship with a guest firewall that blocks the Docker port even
//! when the network domain firewall allows it. Each known platform maps to a
//! list of hooks run over a key-authenticated SSH session.

/// Image families needing post-provision fixes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QuirkyPlatform {
    /// Red Hat Enterprise Linux 7.
    RedHat7,
    /// CentOS 7.
    CentOs7,
}

/// A fix applied to a freshly provisioned guest.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RemediationHook {
    /// Flush every `iptables` rule in the guest.
    FlushGuestFirewall,
}

impl QuirkyPlatform {
    /// Classifies a CloudControl OS type tag such as `CENTOS764`.
    #[must_use]
    pub fn classify(os_type: &str) -> Option<Self> {
        let tag = os_type.trim().to_ascii_uppercase();
        if tag.starts_with("REDHAT7") {
            Some(Self::RedHat7)
        } else if tag.starts_with("CENTOS7") {
            Some(Self::CentOs7)
        } else {
            None
        }
    }

    /// Hooks to run for this platform, in order.
    #[must_use]
    pub const fn hooks(self) -> &'static [RemediationHook] {
        match self {
            Self::RedHat7 | Self::CentOs7 => &[RemediationHook::FlushGuestFirewall],
        }
    }
}

impl RemediationHook {
    /// Human readable name used in logs and errors.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::FlushGuestFirewall => "flush guest iptables rules",
        }
    }

    /// Shell command executed on the guest.
    #[must_use]
    pub const fn command(self) -> &'static str {
        match self {
            Self::FlushGuestFirewall => "iptables -F",
        }
    }
}
