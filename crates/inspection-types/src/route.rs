//! Route-table entries.

use crate::Cidr;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a route sends traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RouteTarget {
    /// A firewall (VPC) endpoint. Bound to a single AZ.
    FirewallEndpoint(String),
    /// A transit gateway or transit gateway attachment. Shared across AZs.
    TransitGateway(String),
}

impl RouteTarget {
    pub fn id(&self) -> &str {
        match self {
            RouteTarget::FirewallEndpoint(id) | RouteTarget::TransitGateway(id) => id,
        }
    }

    /// Returns true if the target lives in exactly one AZ, in which case a
    /// route to it must come from a subnet in the same AZ.
    pub const fn is_az_bound(&self) -> bool {
        matches!(self, RouteTarget::FirewallEndpoint(_))
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Identity of a route: one entry per (route table, destination).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteKey {
    pub route_table_id: String,
    pub destination: Cidr,
}

impl RouteKey {
    pub fn new(route_table_id: impl Into<String>, destination: Cidr) -> Self {
        Self {
            route_table_id: route_table_id.into(),
            destination,
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.route_table_id, self.destination)
    }
}

/// A single route in a subnet route table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteEntry {
    pub route_table_id: String,
    pub destination: Cidr,
    pub target: RouteTarget,
}

impl RouteEntry {
    pub fn new(route_table_id: impl Into<String>, destination: Cidr, target: RouteTarget) -> Self {
        Self {
            route_table_id: route_table_id.into(),
            destination,
            target,
        }
    }

    pub fn key(&self) -> RouteKey {
        RouteKey::new(self.route_table_id.clone(), self.destination)
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}",
            self.route_table_id, self.destination, self.target
        )
    }
}
