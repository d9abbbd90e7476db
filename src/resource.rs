//! Typed identifiers for remote CloudControl resources.
//!
//! A resource is either not yet known locally or resolved to the opaque
//! identifier the provider assigned. The variant is the only existence
//! predicate used by the provisioner.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a remote resource that may not exist yet.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum ResourceId {
    /// The resource has not been resolved or created.
    #[default]
    Unresolved,
    /// The resource exists remotely under this identifier.
    Resolved(String),
}

impl ResourceId {
    /// Wraps a provider identifier; blank values stay unresolved.
    #[must_use]
    pub fn resolved(id: impl Into<String>) -> Self {
        let value = id.into();
        if value.trim().is_empty() {
            Self::Unresolved
        } else {
            Self::Resolved(value)
        }
    }

    /// Returns the identifier when resolved.
    #[must_use]
    pub fn as_deref(&self) -> Option<&str> {
        match self {
            Self::Unresolved => None,
            Self::Resolved(id) => Some(id.as_str()),
        }
    }

    /// Returns `true` once the resource has an identifier.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Resets the identifier, returning the previous value.
    pub fn clear(&mut self) -> Option<String> {
        match std::mem::take(self) {
            Self::Unresolved => None,
            Self::Resolved(id) => Some(id),
        }
    }
}

impl From<Option<String>> for ResourceId {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Unresolved, Self::resolved)
    }
}

impl From<ResourceId> for Option<String> {
    fn from(value: ResourceId) -> Self {
        match value {
            ResourceId::Unresolved => None,
            ResourceId::Resolved(id) => Some(id),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved => formatter.write_str("<unresolved>"),
            Self::Resolved(id) => formatter.write_str(id),
        }
    }
}
