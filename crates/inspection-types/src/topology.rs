//! Subnet and firewall endpoint snapshot types.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Availability zone identifier (e.g. `us-east-1a`).
///
/// Opaque: the only operation that matters is equality, which keys every
/// AZ-affinity decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AvailabilityZone(String);

impl AvailabilityZone {
    pub fn new(name: impl Into<String>) -> Self {
        AvailabilityZone(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the zone name is empty or whitespace.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for AvailabilityZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AvailabilityZone {
    fn from(name: &str) -> Self {
        AvailabilityZone::new(name)
    }
}

impl From<String> for AvailabilityZone {
    fn from(name: String) -> Self {
        AvailabilityZone(name)
    }
}

/// Subnet group inside the inspection topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetGroup {
    /// Transit gateway attachment subnets of the inspection VPC.
    Tgw,
    /// Subnets hosting the firewall endpoints.
    Firewall,
    /// Public (NAT/egress) subnets of the inspection VPC.
    Public,
    /// Private subnets of a workload VPC.
    Workload,
}

impl SubnetGroup {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SubnetGroup::Tgw => "tgw",
            SubnetGroup::Firewall => "firewall",
            SubnetGroup::Public => "public",
            SubnetGroup::Workload => "workload",
        }
    }

    /// Returns true for groups whose route tables may hold at most one
    /// default route pointing at the firewall.
    pub const fn is_inspected(&self) -> bool {
        matches!(self, SubnetGroup::Tgw | SubnetGroup::Public)
    }
}

impl fmt::Display for SubnetGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubnetGroup {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tgw" | "tgw_subnet" | "tgw-subnet" => Ok(SubnetGroup::Tgw),
            "firewall" | "firewall_subnet" | "firewall-subnet" => Ok(SubnetGroup::Firewall),
            "public" | "public_subnet" | "public-subnet" => Ok(SubnetGroup::Public),
            "workload" | "private" | "workload-subnet" => Ok(SubnetGroup::Workload),
            _ => Err(ParseError::InvalidSubnetGroup(s.to_string())),
        }
    }
}

/// A subnet as read from the cloud. Never created or mutated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub az: AvailabilityZone,
    pub route_table_id: String,
    pub group: SubnetGroup,
}

impl Subnet {
    pub fn new(
        id: impl Into<String>,
        az: impl Into<AvailabilityZone>,
        route_table_id: impl Into<String>,
        group: SubnetGroup,
    ) -> Self {
        Self {
            id: id.into(),
            az: az.into(),
            route_table_id: route_table_id.into(),
            group,
        }
    }
}

/// A firewall endpoint, one per AZ of the firewall VPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallEndpoint {
    pub id: String,
    pub az: AvailabilityZone,
    pub firewall_arn: String,
}

impl FirewallEndpoint {
    pub fn new(
        id: impl Into<String>,
        az: impl Into<AvailabilityZone>,
        firewall_arn: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            az: az.into(),
            firewall_arn: firewall_arn.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_group_parse() {
        assert_eq!("tgw_subnet".parse::<SubnetGroup>(), Ok(SubnetGroup::Tgw));
        assert_eq!("Firewall".parse::<SubnetGroup>(), Ok(SubnetGroup::Firewall));
        assert_eq!("private".parse::<SubnetGroup>(), Ok(SubnetGroup::Workload));
        assert!("dmz".parse::<SubnetGroup>().is_err());
    }

    #[test]
    fn test_subnet_group_inspected() {
        assert!(SubnetGroup::Tgw.is_inspected());
        assert!(SubnetGroup::Public.is_inspected());
        assert!(!SubnetGroup::Firewall.is_inspected());
        assert!(!SubnetGroup::Workload.is_inspected());
    }

    #[test]
    fn test_empty_zone() {
        assert!(AvailabilityZone::new("").is_empty());
        assert!(AvailabilityZone::new("  ").is_empty());
        assert!(!AvailabilityZone::new("us-east-1a").is_empty());
    }
}
