//! Value types for the hub-and-spoke inspection topology.
//!
//! Everything the reconciler and the attachment associator exchange with the
//! cloud is expressed with the types in this crate:
//!
//! - [`Cidr`]: canonical IPv4/IPv6 destination prefixes
//! - [`AvailabilityZone`], [`Subnet`], [`SubnetGroup`]: the read-only subnet snapshot
//! - [`FirewallEndpoint`]: per-AZ firewall endpoints discovered from live state
//! - [`RouteEntry`], [`RouteKey`], [`RouteTarget`]: route-table entries
//! - [`TransitGatewayAttachment`], [`AttachmentState`]: VPC attachments

mod attachment;
mod cidr;
mod route;
mod topology;

pub use attachment::{AttachmentState, TransitGatewayAttachment, TransitGatewayRouteTableId};
pub use cidr::Cidr;
pub use route::{RouteEntry, RouteKey, RouteTarget};
pub use topology::{AvailabilityZone, FirewallEndpoint, Subnet, SubnetGroup};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid CIDR block: {0}")]
    InvalidCidr(String),

    #[error("CIDR block {0} has host bits set")]
    HostBitsSet(String),

    #[error("invalid subnet group: {0}")]
    InvalidSubnetGroup(String),

    #[error("invalid attachment state: {0}")]
    InvalidAttachmentState(String),

    #[error("empty {0}")]
    EmptyIdentifier(&'static str),
}
