//! Per-AZ index over a topology snapshot.
//!
//! Built once per invocation from the subnets and firewall endpoints read
//! from the cloud, so targets can be resolved without a query per subnet.
//! Never cached across invocations.

use std::collections::BTreeMap;

use inspection_common::{InspectionError, InspectionResult};
use inspection_types::{AvailabilityZone, FirewallEndpoint, Subnet};
use tracing::warn;

/// Everything the index knows about one AZ.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AzBinding {
    pub subnet_ids: Vec<String>,
    pub route_table_ids: Vec<String>,
    pub endpoint: Option<FirewallEndpoint>,
}

impl AzBinding {
    pub fn endpoint_id(&self) -> Option<&str> {
        self.endpoint.as_ref().map(|e| e.id.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyIndex {
    zones: BTreeMap<AvailabilityZone, AzBinding>,
}

impl TopologyIndex {
    /// Builds the index. Subnets and endpoints without an AZ are rejected.
    ///
    /// Endpoint policy: last-write-wins by input order. The firewall reports
    /// one endpoint per AZ in practice; a duplicate replaces the earlier one
    /// and is logged.
    pub fn build(subnets: &[Subnet], endpoints: &[FirewallEndpoint]) -> InspectionResult<Self> {
        let mut zones: BTreeMap<AvailabilityZone, AzBinding> = BTreeMap::new();

        for subnet in subnets {
            if subnet.az.is_empty() {
                return Err(InspectionError::malformed(
                    "subnet.az",
                    format!("subnet {} has no availability zone", subnet.id),
                ));
            }
            let binding = zones.entry(subnet.az.clone()).or_default();
            binding.subnet_ids.push(subnet.id.clone());
            if !binding.route_table_ids.contains(&subnet.route_table_id) {
                binding.route_table_ids.push(subnet.route_table_id.clone());
            }
        }

        for endpoint in endpoints {
            if endpoint.az.is_empty() {
                return Err(InspectionError::malformed(
                    "endpoint.az",
                    format!("firewall endpoint {} has no availability zone", endpoint.id),
                ));
            }
            let binding = zones.entry(endpoint.az.clone()).or_default();
            if let Some(previous) = binding.endpoint.replace(endpoint.clone()) {
                if previous.id != endpoint.id {
                    warn!(
                        az = %endpoint.az,
                        previous = %previous.id,
                        current = %endpoint.id,
                        "Duplicate firewall endpoint for AZ, keeping the last one"
                    );
                }
            }
        }

        Ok(Self { zones })
    }

    pub fn binding(&self, az: &AvailabilityZone) -> Option<&AzBinding> {
        self.zones.get(az)
    }

    /// Firewall endpoint serving `az`, if one has synced.
    pub fn endpoint_for(&self, az: &AvailabilityZone) -> Option<&FirewallEndpoint> {
        self.zones.get(az).and_then(|b| b.endpoint.as_ref())
    }

    pub fn zones(&self) -> impl Iterator<Item = (&AvailabilityZone, &AzBinding)> {
        self.zones.iter()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
