//! Cloud API seams.
//!
//! The reconciler and the associator only talk to the cloud through these
//! traits. Every mutating call is expected to be idempotent for identical
//! input: repeating an upsert leaves one entry, and deleting an absent entry
//! reports [`CloudError::NotFound`] rather than corrupting state.

mod memory;

use std::fmt;

use async_trait::async_trait;
use inspection_types::{Cidr, FirewallEndpoint, RouteEntry, TransitGatewayAttachment};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{CloudOperation, CloudState, InMemoryCloud};

/// Kind of cloud resource named in an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    RouteTable,
    Route,
    Firewall,
    Attachment,
    Association,
    Propagation,
    Export,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::RouteTable => "route table",
            ResourceKind::Route => "route",
            ResourceKind::Firewall => "firewall",
            ResourceKind::Attachment => "transit gateway attachment",
            ResourceKind::Association => "route table association",
            ResourceKind::Propagation => "route table propagation",
            ResourceKind::Export => "export",
        };
        f.write_str(s)
    }
}

/// Errors returned by a cloud backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    #[error("{operation} throttled: {message}")]
    Throttled { operation: String, message: String },

    #[error("{operation} unavailable: {message}")]
    Unavailable { operation: String, message: String },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: ResourceKind, id: String },

    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: ResourceKind, id: String },

    #[error("{operation} rejected: {message}")]
    InvalidRequest { operation: String, message: String },
}

impl CloudError {
    pub fn throttled(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Throttled {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn already_exists(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid_request(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns true for throttling and temporary unavailability.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CloudError::Throttled { .. } | CloudError::Unavailable { .. }
        )
    }

    /// Returns true if this is a `NotFound` for the given kind.
    pub fn is_not_found(&self, expected: ResourceKind) -> bool {
        matches!(self, CloudError::NotFound { kind, .. } if *kind == expected)
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, CloudError::AlreadyExists { .. })
    }
}

/// Result type for cloud calls.
pub type CloudResult<T> = Result<T, CloudError>;

/// Subnet route-table operations.
#[async_trait]
pub trait RouteTableApi: Send + Sync {
    /// Lists every route in a table. `NotFound(RouteTable)` if the table is gone.
    async fn describe_routes(&self, route_table_id: &str) -> CloudResult<Vec<RouteEntry>>;

    /// Creates the route or replaces the one with the same destination.
    async fn upsert_route(&self, entry: &RouteEntry) -> CloudResult<()>;

    /// Deletes a route. `NotFound(Route)` if absent, `NotFound(RouteTable)`
    /// if the table is gone.
    async fn delete_route(&self, route_table_id: &str, destination: &Cidr) -> CloudResult<()>;
}

/// Network firewall live state.
#[async_trait]
pub trait FirewallApi: Send + Sync {
    /// Lists the firewall's endpoints as currently synced, one per AZ in
    /// practice. Endpoints may appear after the firewall itself exists.
    async fn describe_endpoints(&self, firewall_arn: &str) -> CloudResult<Vec<FirewallEndpoint>>;
}

/// Transit gateway attachment and route table operations.
#[async_trait]
pub trait TransitGatewayApi: Send + Sync {
    async fn describe_attachment(&self, attachment_id: &str)
        -> CloudResult<TransitGatewayAttachment>;

    /// `AlreadyExists(Association)` if already associated with this table.
    async fn associate_route_table(
        &self,
        attachment_id: &str,
        route_table_id: &str,
    ) -> CloudResult<()>;

    async fn disassociate_route_table(
        &self,
        attachment_id: &str,
        route_table_id: &str,
    ) -> CloudResult<()>;

    /// `AlreadyExists(Propagation)` if propagation is already enabled.
    async fn enable_propagation(
        &self,
        route_table_id: &str,
        attachment_id: &str,
    ) -> CloudResult<()>;
}

/// Everything both daemons need from one backend.
pub trait CloudApi:
    RouteTableApi + FirewallApi + TransitGatewayApi + crate::exports::ExportRegistry
{
}

impl<T> CloudApi for T where
    T: RouteTableApi + FirewallApi + TransitGatewayApi + crate::exports::ExportRegistry
{
}
