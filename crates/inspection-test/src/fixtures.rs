//! Test fixtures for common inspection-routing scenarios

use inspection_common::InMemoryCloud;
use inspection_types::{
    AttachmentState, FirewallEndpoint, Subnet, SubnetGroup, TransitGatewayAttachment,
};
use serde_json::{json, Map, Value};

/// Firewall ARN used throughout the fixtures.
pub const FIREWALL_ARN: &str =
    "arn:aws:network-firewall:us-east-1:111122223333:firewall/inspection-firewall";

/// Transit gateway id used throughout the fixtures.
pub const TRANSIT_GATEWAY_ID: &str = "tgw-0123456789abcdef0";

/// Organisation supernet.
pub const ORG_CIDR: &str = "10.0.0.0/8";

pub const STACK_ID: &str =
    "arn:aws:cloudformation:us-east-1:111122223333:stack/inspection-vpc/4b1c9a10-0000-11ee-8000-0a1b2c3d4e5f";

/// Topology fixtures
pub mod topology_fixtures {
    use super::*;

    /// Route table id of a fixture subnet.
    pub fn route_table_for(subnet_id: &str) -> String {
        format!("rtb-{}", subnet_id)
    }

    /// Subnet whose route table id is derived from its id.
    pub fn subnet(id: &str, az: &str, group: SubnetGroup) -> Subnet {
        Subnet::new(id, az, route_table_for(id), group)
    }

    pub fn endpoint(id: &str, az: &str) -> FirewallEndpoint {
        FirewallEndpoint::new(id, az, FIREWALL_ARN)
    }

    /// Inspection VPC spread over two AZs: one subnet of every group per AZ.
    pub fn inspection_vpc_subnets() -> Vec<Subnet> {
        let mut subnets = Vec::new();
        for (suffix, az) in [("a", "us-east-1a"), ("b", "us-east-1b")] {
            subnets.push(subnet(&format!("tgw-{}", suffix), az, SubnetGroup::Tgw));
            subnets.push(subnet(&format!("fw-{}", suffix), az, SubnetGroup::Firewall));
            subnets.push(subnet(&format!("pub-{}", suffix), az, SubnetGroup::Public));
        }
        subnets
    }

    /// One firewall endpoint per inspection VPC AZ.
    pub fn inspection_vpc_endpoints() -> Vec<FirewallEndpoint> {
        vec![
            endpoint("vpce-a", "us-east-1a"),
            endpoint("vpce-b", "us-east-1b"),
        ]
    }

    /// An available attachment with no association.
    pub fn attachment(id: &str, vpc_id: &str) -> TransitGatewayAttachment {
        TransitGatewayAttachment::new(id, vpc_id, AttachmentState::Available)
    }
}

/// Pre-seeded cloud fixtures
pub mod cloud_fixtures {
    use super::*;

    /// Cloud holding the route table of every subnet and the firewall with
    /// the given endpoints.
    pub fn seeded_cloud(subnets: &[Subnet], endpoints: Vec<FirewallEndpoint>) -> InMemoryCloud {
        let cloud = InMemoryCloud::new();
        for subnet in subnets {
            cloud.add_route_table(&subnet.route_table_id);
        }
        cloud.add_firewall(FIREWALL_ARN, endpoints);
        cloud
    }

    /// The two-AZ inspection VPC with both firewall endpoints synced.
    pub fn inspection_cloud() -> InMemoryCloud {
        seeded_cloud(
            &topology_fixtures::inspection_vpc_subnets(),
            topology_fixtures::inspection_vpc_endpoints(),
        )
    }
}

/// Attachment-creation event fixtures
pub mod event_fixtures {
    use super::*;

    /// Event emitted when a VPC attachment is created, tagged with the VPC
    /// role when `role` is given.
    pub fn attachment_created(attachment_id: &str, vpc_id: &str, role: Option<&str>) -> Value {
        let mut request = Map::new();
        request.insert("VpcId".to_string(), json!(vpc_id));
        request.insert("TransitGatewayId".to_string(), json!(TRANSIT_GATEWAY_ID));
        if let Some(role) = role {
            request.insert(
                "TagSpecifications".to_string(),
                json!({
                    "ResourceType": "transit-gateway-attachment",
                    "tag": 1,
                    "Tag": { "Key": "routeTable", "Value": role }
                }),
            );
        }

        json!({
            "version": "0",
            "id": format!("event-{}", attachment_id),
            "detail-type": "AWS API Call via CloudTrail",
            "source": "aws.ec2",
            "region": "us-east-1",
            "detail": {
                "eventSource": "ec2.amazonaws.com",
                "eventName": "CreateTransitGatewayVpcAttachment",
                "requestParameters": {
                    "CreateTransitGatewayVpcAttachmentRequest": Value::Object(request)
                },
                "responseElements": {
                    "CreateTransitGatewayVpcAttachmentResponse": {
                        "transitGatewayVpcAttachment": {
                            "transitGatewayAttachmentId": attachment_id,
                            "vpcId": vpc_id,
                            "state": "pending"
                        }
                    }
                }
            }
        })
    }

    /// Same as [`attachment_created`] but with the tags given as a list.
    pub fn attachment_created_with_tags(
        attachment_id: &str,
        vpc_id: &str,
        tags: &[(&str, &str)],
    ) -> Value {
        let mut event = attachment_created(attachment_id, vpc_id, None);
        let tags: Vec<Value> = tags
            .iter()
            .map(|(key, value)| json!({ "Key": key, "Value": value }))
            .collect();
        event["detail"]["requestParameters"]["CreateTransitGatewayVpcAttachmentRequest"]
            ["TagSpecifications"] = json!({ "ResourceType": "transit-gateway-attachment", "Tag": tags });
        event
    }
}

/// Lifecycle request fixtures
pub mod lifecycle_fixtures {
    use super::*;

    /// Builder for provisioning-system custom resource requests.
    #[derive(Debug, Clone)]
    pub struct LifecycleRequestBuilder {
        request_type: String,
        logical_id: String,
        physical_id: Option<String>,
        properties: Map<String, Value>,
        old_properties: Option<Map<String, Value>>,
    }

    impl LifecycleRequestBuilder {
        pub fn new(request_type: &str, logical_id: &str) -> Self {
            Self {
                request_type: request_type.to_string(),
                logical_id: logical_id.to_string(),
                physical_id: None,
                properties: Map::new(),
                old_properties: None,
            }
        }

        pub fn create(logical_id: &str) -> Self {
            Self::new("Create", logical_id)
        }

        pub fn update(logical_id: &str) -> Self {
            Self::new("Update", logical_id)
        }

        pub fn delete(logical_id: &str) -> Self {
            Self::new("Delete", logical_id)
        }

        pub fn with_physical_id(mut self, physical_id: &str) -> Self {
            self.physical_id = Some(physical_id.to_string());
            self
        }

        pub fn with_property(mut self, key: &str, value: &str) -> Self {
            self.properties.insert(key.to_string(), json!(value));
            self
        }

        pub fn with_old_property(mut self, key: &str, value: &str) -> Self {
            self.old_properties
                .get_or_insert_with(Map::new)
                .insert(key.to_string(), json!(value));
            self
        }

        /// Route via the firewall endpoint in `az`.
        pub fn firewall_route(self, route_table_id: &str, destination: &str, az: &str) -> Self {
            self.with_property("FirewallArn", FIREWALL_ARN)
                .with_property("RouteTableId", route_table_id)
                .with_property("DestinationCidr", destination)
                .with_property("SubnetAz", az)
        }

        /// Route via the transit gateway.
        pub fn transit_gateway_route(
            self,
            route_table_id: &str,
            destination: &str,
            az: &str,
        ) -> Self {
            self.with_property("TransitGatewayId", TRANSIT_GATEWAY_ID)
                .with_property("RouteTableId", route_table_id)
                .with_property("DestinationCidr", destination)
                .with_property("SubnetAz", az)
        }

        pub fn build(self) -> Value {
            let mut request = json!({
                "RequestType": self.request_type,
                "ServiceToken": "arn:aws:lambda:us-east-1:111122223333:function:routemgrd",
                "ResponseURL": "https://provisioning.invalid/response",
                "StackId": STACK_ID,
                "RequestId": format!("req-{}", self.logical_id),
                "LogicalResourceId": self.logical_id,
                "ResourceType": "Custom::InspectionRoute",
                "ResourceProperties": Value::Object(self.properties),
            });
            if let Some(physical_id) = self.physical_id {
                request["PhysicalResourceId"] = json!(physical_id);
            }
            if let Some(old) = self.old_properties {
                request["OldResourceProperties"] = Value::Object(old);
            }
            request
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_inspection_vpc_layout() {
        let subnets = topology_fixtures::inspection_vpc_subnets();
        assert_eq!(subnets.len(), 6);
        assert_eq!(subnets[0].route_table_id, "rtb-tgw-a");
        assert_eq!(subnets[0].group, SubnetGroup::Tgw);
    }

    #[test]
    fn test_attachment_event_shape() {
        let event = event_fixtures::attachment_created("tgw-attach-1", "vpc-1", Some("workload"));
        assert_eq!(event["detail"]["eventName"], "CreateTransitGatewayVpcAttachment");
        assert_eq!(
            event["detail"]["requestParameters"]["CreateTransitGatewayVpcAttachmentRequest"]
                ["TagSpecifications"]["Tag"]["Value"],
            "workload"
        );
    }

    #[test]
    fn test_lifecycle_builder() {
        let request = lifecycle_fixtures::LifecycleRequestBuilder::delete("TgwRouteA")
            .with_physical_id("inspection-vpc/TgwRouteA/route")
            .firewall_route("rtb-1", "0.0.0.0/0", "us-east-1a")
            .build();
        assert_eq!(request["RequestType"], "Delete");
        assert_eq!(request["PhysicalResourceId"], "inspection-vpc/TgwRouteA/route");
        assert_eq!(request["ResourceProperties"]["SubnetAz"], "us-east-1a");
        assert!(request.get("OldResourceProperties").is_none());
    }
}
