//! Desired route state as a pure function of a topology snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use inspection_common::{InspectionError, InspectionResult};
use inspection_types::{Cidr, RouteEntry, RouteKey, RouteTarget, Subnet, SubnetGroup};
use tracing::debug;

use crate::topology_index::TopologyIndex;

/// Routing intent for the inspection VPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionIntent {
    /// Organisation supernet; return traffic to it goes through the firewall.
    pub org_cidr: Cidr,
    pub transit_gateway_id: String,
}

/// Set of desired routes keyed by (route table, destination).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutePlan {
    entries: BTreeMap<RouteKey, RouteTarget>,
}

impl RoutePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry. Returns `false` if the identical entry was already
    /// planned. The same key with another target is `ConflictingRoute`.
    pub fn insert(&mut self, entry: RouteEntry) -> InspectionResult<bool> {
        let key = entry.key();
        match self.entries.get(&key) {
            Some(existing) if *existing == entry.target => Ok(false),
            Some(existing) => Err(InspectionError::ConflictingRoute {
                route_table_id: key.route_table_id,
                destination: key.destination,
                existing: existing.clone(),
                requested: entry.target,
            }),
            None => {
                self.entries.insert(key, entry.target);
                Ok(true)
            }
        }
    }

    pub fn get(&self, key: &RouteKey) -> Option<&RouteTarget> {
        self.entries.get(key)
    }

    /// Planned entries in (route table, destination) order.
    pub fn entries(&self) -> impl Iterator<Item = RouteEntry> + '_ {
        self.entries
            .iter()
            .map(|(key, target)| RouteEntry::new(key.route_table_id.clone(), key.destination, target.clone()))
    }

    pub fn route_table_ids(&self) -> BTreeSet<&str> {
        self.entries
            .keys()
            .map(|key| key.route_table_id.as_str())
            .collect()
    }

    /// Entry a packet to `addr` would take out of `route_table_id`.
    /// The most specific matching destination wins.
    pub fn resolve(&self, route_table_id: &str, addr: IpAddr) -> Option<RouteEntry> {
        self.entries
            .iter()
            .filter(|(key, _)| key.route_table_id == route_table_id && key.destination.contains(addr))
            .max_by_key(|(key, _)| key.destination.prefix_len())
            .map(|(key, target)| RouteEntry::new(key.route_table_id.clone(), key.destination, target.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Route from `subnet`'s table to the firewall endpoint in the subnet's AZ.
///
/// `NoMatchingEndpoint` if no endpoint has synced in that AZ.
pub fn plan_default_route(
    subnet: &Subnet,
    index: &TopologyIndex,
    destination: Cidr,
) -> InspectionResult<RouteEntry> {
    let endpoint = index
        .endpoint_for(&subnet.az)
        .ok_or_else(|| InspectionError::NoMatchingEndpoint {
            subnet_id: subnet.id.clone(),
            az: subnet.az.clone(),
        })?;

    // A route must never cross AZs.
    if endpoint.az != subnet.az {
        return Err(InspectionError::internal(format!(
            "endpoint {} in {} indexed under {}",
            endpoint.id, endpoint.az, subnet.az
        )));
    }

    Ok(RouteEntry::new(
        subnet.route_table_id.clone(),
        destination,
        RouteTarget::FirewallEndpoint(endpoint.id.clone()),
    ))
}

/// Full desired route set of the inspection topology:
///
/// | group    | destination | target                  |
/// |----------|-------------|-------------------------|
/// | tgw      | 0.0.0.0/0   | firewall endpoint, same AZ |
/// | public   | org CIDR    | firewall endpoint, same AZ |
/// | firewall | org CIDR    | transit gateway         |
/// | workload | 0.0.0.0/0   | transit gateway         |
pub fn plan_inspection_routes(
    subnets: &[Subnet],
    index: &TopologyIndex,
    intent: &InspectionIntent,
) -> InspectionResult<RoutePlan> {
    let mut plan = RoutePlan::new();
    let transit_gateway = RouteTarget::TransitGateway(intent.transit_gateway_id.clone());

    for subnet in subnets {
        let entry = match subnet.group {
            SubnetGroup::Tgw => plan_default_route(subnet, index, Cidr::DEFAULT_V4)?,
            SubnetGroup::Public => plan_default_route(subnet, index, intent.org_cidr)?,
            SubnetGroup::Firewall => RouteEntry::new(
                subnet.route_table_id.clone(),
                intent.org_cidr,
                transit_gateway.clone(),
            ),
            SubnetGroup::Workload => RouteEntry::new(
                subnet.route_table_id.clone(),
                Cidr::DEFAULT_V4,
                transit_gateway.clone(),
            ),
        };
        if !plan.insert(entry)? {
            debug!(subnet = %subnet.id, "Route already planned by a subnet sharing the table");
        }
    }

    Ok(plan)
}
