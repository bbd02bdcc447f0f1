//! Error taxonomy for reconciliation and association.
//!
//! Every failure surfaced to the provisioning system or the event bus is one
//! of these kinds. Transient failures are retried internally and only show up
//! as [`InspectionError::Retryable`] once the retry budget is exhausted.

use inspection_types::{AvailabilityZone, Cidr, ParseError, RouteTarget};
use thiserror::Error;

use crate::cloud::{CloudError, ResourceKind};

/// Result type alias for inspection operations.
pub type InspectionResult<T> = Result<T, InspectionError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InspectionError {
    /// Bad event, bad request, or a required field missing. Never retried.
    #[error("Malformed input for {field}: {message}")]
    MalformedInput { field: String, message: String },

    /// No firewall endpoint exists in the subnet's AZ.
    #[error("No firewall endpoint in {az} for subnet {subnet_id}")]
    NoMatchingEndpoint {
        subnet_id: String,
        az: AvailabilityZone,
    },

    /// Two desired routes share a (route table, destination) key with
    /// different targets.
    #[error("Conflicting route {route_table_id}:{destination}: {existing} vs {requested}")]
    ConflictingRoute {
        route_table_id: String,
        destination: Cidr,
        existing: RouteTarget,
        requested: RouteTarget,
    },

    /// A route table or attachment was deleted out-of-band.
    #[error("{kind} '{id}' no longer exists")]
    ResourceGone { kind: ResourceKind, id: String },

    /// Transient failure (throttling, eventual consistency). Once
    /// `attempts` reaches the policy bound this is reported to the caller.
    #[error("{operation} failed after {attempts} attempt(s): {message}")]
    Retryable {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// Broken internal invariant.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl InspectionError {
    pub fn malformed(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedInput {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn resource_gone(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::ResourceGone {
            kind,
            id: id.into(),
        }
    }

    pub fn retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Retryable {
            operation: operation.into(),
            attempts: 1,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            InspectionError::MalformedInput { .. } => "MalformedInput",
            InspectionError::NoMatchingEndpoint { .. } => "NoMatchingEndpoint",
            InspectionError::ConflictingRoute { .. } => "ConflictingRoute",
            InspectionError::ResourceGone { .. } => "ResourceGone",
            InspectionError::Retryable { .. } => "Retryable",
            InspectionError::Internal { .. } => "Internal",
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InspectionError::Retryable { .. })
    }
}

impl From<CloudError> for InspectionError {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::Throttled { operation, message }
            | CloudError::Unavailable { operation, message } => {
                InspectionError::retryable(operation, message)
            }
            CloudError::NotFound { kind, id } => InspectionError::ResourceGone { kind, id },
            CloudError::InvalidRequest { operation, message } => {
                InspectionError::malformed(operation, message)
            }
            CloudError::AlreadyExists { kind, id } => {
                InspectionError::internal(format!("unexpected duplicate {} '{}'", kind, id))
            }
        }
    }
}

impl From<ParseError> for InspectionError {
    fn from(err: ParseError) -> Self {
        let field = match &err {
            ParseError::InvalidCidr(_) | ParseError::HostBitsSet(_) => "cidr",
            ParseError::InvalidSubnetGroup(_) => "subnet_group",
            ParseError::InvalidAttachmentState(_) => "attachment_state",
            ParseError::EmptyIdentifier(what) => *what,
        };
        InspectionError::malformed(field, err.to_string())
    }
}
