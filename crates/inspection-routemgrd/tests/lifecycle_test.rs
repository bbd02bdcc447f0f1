//! Lifecycle adapter integration tests
//!
//! Drive full Create/Update/Delete requests through the adapter against the
//! in-memory cloud and verify the resulting route tables.

use std::sync::Arc;
use std::time::{Duration, Instant};

use inspection_common::{
    CloudError, CloudOperation, InMemoryCloud, MissingEndpointPolicy, RetryPolicy,
};
use inspection_routemgrd::{
    LifecycleAdapter, LifecycleRequest, LifecycleSettings, ResponseStatus,
};
use inspection_test::{
    cloud_fixtures, lifecycle_fixtures::LifecycleRequestBuilder, topology_fixtures,
    CloudVerifier, TRANSIT_GATEWAY_ID,
};
use inspection_types::{Cidr, RouteTarget};
use pretty_assertions::assert_eq;
use serde_json::Value;

fn adapter(cloud: &Arc<InMemoryCloud>, missing_endpoint: MissingEndpointPolicy) -> LifecycleAdapter<InMemoryCloud> {
    LifecycleAdapter::new(
        Arc::clone(cloud),
        LifecycleSettings {
            retry: RetryPolicy::immediate(3),
            missing_endpoint,
            deadline: Duration::from_secs(5),
        },
    )
}

fn request(value: Value) -> LifecycleRequest {
    serde_json::from_value(value).unwrap()
}

fn endpoint(id: &str) -> RouteTarget {
    RouteTarget::FirewallEndpoint(id.to_string())
}

#[tokio::test]
async fn test_create_installs_az_matched_route() {
    let cloud = Arc::new(cloud_fixtures::inspection_cloud());
    let adapter = adapter(&cloud, MissingEndpointPolicy::Fail);

    let req = request(
        LifecycleRequestBuilder::create("TgwRouteB")
            .firewall_route("rtb-tgw-b", "0.0.0.0/0", "us-east-1b")
            .build(),
    );
    let response = adapter.handle(&req).await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.physical_resource_id, "inspection-vpc/TgwRouteB/route");
    assert_eq!(response.data["Target"], "vpce-b");
    assert_eq!(response.data["RouteTableId"], "rtb-tgw-b");
    assert_eq!(response.data["DestinationCidr"], "0.0.0.0/0");

    let verifier = CloudVerifier::new(&cloud);
    verifier
        .assert_route("rtb-tgw-b", &Cidr::DEFAULT_V4, &endpoint("vpce-b"))
        .unwrap();
    verifier.assert_route_count("rtb-tgw-b", 1).unwrap();
}

#[tokio::test]
async fn test_create_twice_is_idempotent() {
    let cloud = Arc::new(cloud_fixtures::inspection_cloud());
    let adapter = adapter(&cloud, MissingEndpointPolicy::Fail);
    let req = request(
        LifecycleRequestBuilder::create("TgwRouteA")
            .firewall_route("rtb-tgw-a", "0.0.0.0/0", "us-east-1a")
            .build(),
    );

    let first = adapter.handle(&req).await;
    let second = adapter.handle(&req).await;

    assert!(first.is_success());
    assert_eq!(first, second);
    CloudVerifier::new(&cloud)
        .assert_route_count("rtb-tgw-a", 1)
        .unwrap();
    assert_eq!(cloud.call_count(CloudOperation::UpsertRoute), 1);
}

#[tokio::test]
async fn test_transit_gateway_return_route() {
    let cloud = Arc::new(cloud_fixtures::inspection_cloud());
    let adapter = adapter(&cloud, MissingEndpointPolicy::Fail);
    let req = request(
        LifecycleRequestBuilder::create("FirewallRouteA")
            .transit_gateway_route("rtb-fw-a", "10.0.0.0/8", "us-east-1a")
            .build(),
    );

    let response = adapter.handle(&req).await;
    assert!(response.is_success());
    assert_eq!(response.data["Target"], TRANSIT_GATEWAY_ID);

    CloudVerifier::new(&cloud)
        .assert_route(
            "rtb-fw-a",
            &"10.0.0.0/8".parse().unwrap(),
            &RouteTarget::TransitGateway(TRANSIT_GATEWAY_ID.to_string()),
        )
        .unwrap();
    // Not AZ-matched, so the firewall is never consulted.
    assert_eq!(cloud.call_count(CloudOperation::DescribeEndpoints), 0);
}

#[tokio::test]
async fn test_missing_endpoint_fail_policy() {
    let subnets = topology_fixtures::inspection_vpc_subnets();
    let cloud = Arc::new(cloud_fixtures::seeded_cloud(
        &subnets,
        vec![topology_fixtures::endpoint("vpce-a", "us-east-1a")],
    ));
    let adapter = adapter(&cloud, MissingEndpointPolicy::Fail);
    let req = request(
        LifecycleRequestBuilder::create("TgwRouteB")
            .firewall_route("rtb-tgw-b", "0.0.0.0/0", "us-east-1b")
            .build(),
    );

    let response = adapter.handle(&req).await;
    assert_eq!(response.status, ResponseStatus::Failed);
    let reason = response.reason.unwrap_or_default();
    assert!(reason.starts_with("NoMatchingEndpoint"), "{}", reason);
    CloudVerifier::new(&cloud)
        .assert_route_count("rtb-tgw-b", 0)
        .unwrap();
    assert_eq!(cloud.call_count(CloudOperation::DescribeEndpoints), 1);
}

#[tokio::test]
async fn test_missing_endpoint_wait_policy_sees_late_endpoint() {
    let subnets = topology_fixtures::inspection_vpc_subnets();
    let cloud = Arc::new(cloud_fixtures::seeded_cloud(
        &subnets,
        vec![topology_fixtures::endpoint("vpce-a", "us-east-1a")],
    ));
    cloud.add_endpoint_after(topology_fixtures::endpoint("vpce-b", "us-east-1b"), 2);
    let adapter = adapter(&cloud, MissingEndpointPolicy::Wait);
    let req = request(
        LifecycleRequestBuilder::create("TgwRouteB")
            .firewall_route("rtb-tgw-b", "0.0.0.0/0", "us-east-1b")
            .build(),
    );

    let response = adapter.handle(&req).await;
    assert!(response.is_success(), "{:?}", response.reason);
    CloudVerifier::new(&cloud)
        .assert_route("rtb-tgw-b", &Cidr::DEFAULT_V4, &endpoint("vpce-b"))
        .unwrap();
    assert_eq!(cloud.call_count(CloudOperation::DescribeEndpoints), 3);
}

#[tokio::test]
async fn test_missing_endpoint_skip_policy() {
    let subnets = topology_fixtures::inspection_vpc_subnets();
    let cloud = Arc::new(cloud_fixtures::seeded_cloud(&subnets, Vec::new()));
    let adapter = adapter(&cloud, MissingEndpointPolicy::Skip);
    let req = request(
        LifecycleRequestBuilder::create("TgwRouteA")
            .firewall_route("rtb-tgw-a", "0.0.0.0/0", "us-east-1a")
            .build(),
    );

    let response = adapter.handle(&req).await;
    assert!(response.is_success());
    assert_eq!(response.data["Skipped"], "true");
    assert!(response.data.get("Target").is_none());
    CloudVerifier::new(&cloud)
        .assert_route_count("rtb-tgw-a", 0)
        .unwrap();
}

#[tokio::test]
async fn test_update_moves_route_to_new_key() {
    let cloud = Arc::new(cloud_fixtures::inspection_cloud());
    let adapter = adapter(&cloud, MissingEndpointPolicy::Fail);
    let org: Cidr = "10.0.0.0/8".parse().unwrap();

    let create = request(
        LifecycleRequestBuilder::create("PublicRouteA")
            .firewall_route("rtb-pub-a", "10.0.0.0/8", "us-east-1a")
            .build(),
    );
    assert!(adapter.handle(&create).await.is_success());

    let update = request(
        LifecycleRequestBuilder::update("PublicRouteA")
            .with_physical_id("inspection-vpc/PublicRouteA/route")
            .firewall_route("rtb-pub-a", "172.16.0.0/12", "us-east-1a")
            .with_old_property("FirewallArn", inspection_test::FIREWALL_ARN)
            .with_old_property("RouteTableId", "rtb-pub-a")
            .with_old_property("DestinationCidr", "10.0.0.0/8")
            .with_old_property("SubnetAz", "us-east-1a")
            .build(),
    );
    let response = adapter.handle(&update).await;
    assert!(response.is_success());
    assert_eq!(response.physical_resource_id, "inspection-vpc/PublicRouteA/route");

    let verifier = CloudVerifier::new(&cloud);
    verifier
        .assert_route("rtb-pub-a", &"172.16.0.0/12".parse().unwrap(), &endpoint("vpce-a"))
        .unwrap();
    verifier.assert_no_route("rtb-pub-a", &org).unwrap();
}

#[tokio::test]
async fn test_update_heals_drifted_route() {
    let cloud = Arc::new(cloud_fixtures::inspection_cloud());
    let adapter = adapter(&cloud, MissingEndpointPolicy::Fail);
    cloud.seed_route(inspection_types::RouteEntry::new(
        "rtb-tgw-a",
        Cidr::DEFAULT_V4,
        endpoint("vpce-b"),
    ));

    let update = request(
        LifecycleRequestBuilder::update("TgwRouteA")
            .with_physical_id("inspection-vpc/TgwRouteA/route")
            .firewall_route("rtb-tgw-a", "0.0.0.0/0", "us-east-1a")
            .build(),
    );
    assert!(adapter.handle(&update).await.is_success());
    CloudVerifier::new(&cloud)
        .assert_route("rtb-tgw-a", &Cidr::DEFAULT_V4, &endpoint("vpce-a"))
        .unwrap();
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let cloud = Arc::new(cloud_fixtures::inspection_cloud());
    let adapter = adapter(&cloud, MissingEndpointPolicy::Fail);
    let create = request(
        LifecycleRequestBuilder::create("TgwRouteA")
            .firewall_route("rtb-tgw-a", "0.0.0.0/0", "us-east-1a")
            .build(),
    );
    assert!(adapter.handle(&create).await.is_success());

    let delete = request(
        LifecycleRequestBuilder::delete("TgwRouteA")
            .with_physical_id("inspection-vpc/TgwRouteA/route")
            .firewall_route("rtb-tgw-a", "0.0.0.0/0", "us-east-1a")
            .build(),
    );
    for _ in 0..2 {
        let response = adapter.handle(&delete).await;
        assert!(response.is_success());
        assert_eq!(response.physical_resource_id, "inspection-vpc/TgwRouteA/route");
    }
    CloudVerifier::new(&cloud)
        .assert_no_route("rtb-tgw-a", &Cidr::DEFAULT_V4)
        .unwrap();

    // Table removed out-of-band: still nothing to do.
    cloud.remove_route_table("rtb-tgw-a");
    assert!(adapter.handle(&delete).await.is_success());
}

#[tokio::test]
async fn test_delete_after_rejected_create() {
    let cloud = Arc::new(cloud_fixtures::inspection_cloud());
    let adapter = adapter(&cloud, MissingEndpointPolicy::Fail);
    let bad = LifecycleRequestBuilder::create("Broken")
        .with_property("RouteTableId", "rtb-tgw-a")
        .build();

    let response = adapter.handle(&request(bad)).await;
    assert_eq!(response.status, ResponseStatus::Failed);

    let delete = LifecycleRequestBuilder::delete("Broken")
        .with_physical_id(&response.physical_resource_id)
        .with_property("RouteTableId", "rtb-tgw-a")
        .build();
    assert!(adapter.handle(&request(delete)).await.is_success());
}

#[tokio::test]
async fn test_vanished_route_table_fails_create() {
    let cloud = Arc::new(cloud_fixtures::inspection_cloud());
    cloud.remove_route_table("rtb-tgw-a");
    let adapter = adapter(&cloud, MissingEndpointPolicy::Fail);
    let req = request(
        LifecycleRequestBuilder::create("TgwRouteA")
            .firewall_route("rtb-tgw-a", "0.0.0.0/0", "us-east-1a")
            .build(),
    );

    let response = adapter.handle(&req).await;
    assert_eq!(response.status, ResponseStatus::Failed);
    assert!(response.reason.unwrap_or_default().starts_with("ResourceGone"));
    assert_eq!(cloud.call_count(CloudOperation::DescribeRoutes), 1);
}

#[tokio::test]
async fn test_throttling_exhaustion_reports_retryable() {
    let cloud = Arc::new(cloud_fixtures::inspection_cloud());
    cloud.inject_failures(
        CloudOperation::UpsertRoute,
        CloudError::throttled("CreateRoute", "Rate exceeded"),
        10,
    );
    let adapter = adapter(&cloud, MissingEndpointPolicy::Fail);
    let req = request(
        LifecycleRequestBuilder::create("TgwRouteA")
            .firewall_route("rtb-tgw-a", "0.0.0.0/0", "us-east-1a")
            .build(),
    );

    let response = adapter.handle(&req).await;
    assert_eq!(response.status, ResponseStatus::Failed);
    let reason = response.reason.unwrap_or_default();
    assert!(reason.contains("after 3 attempt(s)"), "{}", reason);
    assert_eq!(cloud.call_count(CloudOperation::UpsertRoute), 3);
}

#[tokio::test]
async fn test_request_gives_up_at_deadline() {
    let cloud = Arc::new(cloud_fixtures::seeded_cloud(
        &topology_fixtures::inspection_vpc_subnets(),
        Vec::new(),
    ));
    // Shows up on the fourth describe, after 100 + 200 + 400ms of backoff
    cloud.add_endpoint_after(topology_fixtures::endpoint("vpce-a", "us-east-1a"), 3);

    let adapter = LifecycleAdapter::new(
        Arc::clone(&cloud),
        LifecycleSettings {
            retry: RetryPolicy {
                max_attempts: 4,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(400),
                multiplier: 2.0,
                jitter: false,
            },
            missing_endpoint: MissingEndpointPolicy::Wait,
            deadline: Duration::from_millis(250),
        },
    );

    let req = request(
        LifecycleRequestBuilder::create("TgwRouteA")
            .firewall_route("rtb-tgw-a", "0.0.0.0/0", "us-east-1a")
            .build(),
    );
    let started = Instant::now();
    let response = adapter.handle(&req).await;

    assert!(started.elapsed() < Duration::from_millis(700));
    assert_eq!(response.status, ResponseStatus::Failed);
    assert!(response.reason.as_deref().unwrap_or_default().starts_with("Retryable"));
    assert_eq!(cloud.call_count(CloudOperation::UpsertRoute), 0);
    CloudVerifier::new(&cloud)
        .assert_route_count("rtb-tgw-a", 0)
        .unwrap();
}
