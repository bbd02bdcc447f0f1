//! Attachment associator integration tests

use std::sync::Arc;
use std::time::{Duration, Instant};

use inspection_attachd::{AssociationState, AssociatorSettings, AttachmentAssociator, VpcRole};
use inspection_common::{
    CloudError, CloudOperation, InMemoryCloud, InspectionError, ResourceKind, RetryPolicy,
    WorkloadPropagation, INSPECTION_ROUTE_TABLE_EXPORT, WORKLOAD_ROUTE_TABLE_EXPORT,
};
use inspection_test::{event_fixtures, topology_fixtures, CloudVerifier, InterleavingCloud};
use inspection_types::AttachmentState;
use pretty_assertions::assert_eq;
use serde_json::json;

const WORKLOAD_RT: &str = "tgw-rtb-workload";
const INSPECTION_RT: &str = "tgw-rtb-inspection";

fn settings(workload_propagation: WorkloadPropagation) -> AssociatorSettings {
    AssociatorSettings {
        retry: RetryPolicy::immediate(3),
        attachment_timeout: Duration::from_secs(5),
        workload_export: WORKLOAD_ROUTE_TABLE_EXPORT.to_string(),
        inspection_export: INSPECTION_ROUTE_TABLE_EXPORT.to_string(),
        workload_propagation,
        deadline: Duration::from_secs(10),
    }
}

fn setup() -> (Arc<InMemoryCloud>, AttachmentAssociator<InMemoryCloud>) {
    let cloud = Arc::new(InMemoryCloud::new());
    cloud.publish_export(WORKLOAD_ROUTE_TABLE_EXPORT, WORKLOAD_RT);
    cloud.publish_export(INSPECTION_ROUTE_TABLE_EXPORT, INSPECTION_RT);
    cloud.add_attachment(topology_fixtures::attachment("tgw-attach-1", "vpc-1"));
    let associator = AttachmentAssociator::new(
        Arc::clone(&cloud),
        settings(WorkloadPropagation::Association),
    );
    (cloud, associator)
}

#[tokio::test]
async fn test_workload_attachment_associates_and_propagates() {
    let (cloud, associator) = setup();
    let event = event_fixtures::attachment_created("tgw-attach-1", "vpc-1", Some("workload"));

    let outcome = associator.handle_event(&event).await.unwrap();

    assert_eq!(outcome.role, VpcRole::Workload);
    assert_eq!(outcome.route_table_id, WORKLOAD_RT);
    assert_eq!(outcome.propagated_into.as_deref(), Some(WORKLOAD_RT));
    assert_eq!(outcome.state, AssociationState::PropagationEnabled);

    let verifier = CloudVerifier::new(&cloud);
    verifier.assert_associated("tgw-attach-1", WORKLOAD_RT).unwrap();
    verifier.assert_propagations("tgw-attach-1", &[WORKLOAD_RT]).unwrap();
}

#[tokio::test]
async fn test_inspection_attachment_does_not_propagate() {
    let (cloud, associator) = setup();
    let event = event_fixtures::attachment_created("tgw-attach-1", "vpc-1", Some("inspection"));

    let outcome = associator.handle_event(&event).await.unwrap();

    assert_eq!(outcome.route_table_id, INSPECTION_RT);
    assert_eq!(outcome.propagated_into, None);
    assert_eq!(outcome.state, AssociationState::Associated);
    CloudVerifier::new(&cloud)
        .assert_propagations("tgw-attach-1", &[])
        .unwrap();
    assert_eq!(cloud.call_count(CloudOperation::EnablePropagation), 0);
}

#[tokio::test]
async fn test_workload_propagation_into_inspection_table() {
    let (cloud, _) = setup();
    let associator = AttachmentAssociator::new(
        Arc::clone(&cloud),
        settings(WorkloadPropagation::Inspection),
    );
    let event = event_fixtures::attachment_created("tgw-attach-1", "vpc-1", None);

    let outcome = associator.handle_event(&event).await.unwrap();

    assert_eq!(outcome.route_table_id, WORKLOAD_RT);
    assert_eq!(outcome.propagated_into.as_deref(), Some(INSPECTION_RT));
    let verifier = CloudVerifier::new(&cloud);
    verifier.assert_associated("tgw-attach-1", WORKLOAD_RT).unwrap();
    verifier.assert_propagations("tgw-attach-1", &[INSPECTION_RT]).unwrap();
}

#[tokio::test]
async fn test_duplicate_event_is_idempotent() {
    let (cloud, associator) = setup();
    let event = event_fixtures::attachment_created("tgw-attach-1", "vpc-1", Some("workload"));

    let first = associator.handle_event(&event).await.unwrap();
    let second = associator.handle_event(&event).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(cloud.call_count(CloudOperation::AssociateRouteTable), 1);
    assert_eq!(cloud.call_count(CloudOperation::EnablePropagation), 1);
    let verifier = CloudVerifier::new(&cloud);
    verifier.assert_associated("tgw-attach-1", WORKLOAD_RT).unwrap();
    verifier.assert_propagations("tgw-attach-1", &[WORKLOAD_RT]).unwrap();
}

#[tokio::test]
async fn test_concurrent_duplicates_converge() {
    let (cloud, associator) = setup();
    let event = event_fixtures::attachment_created("tgw-attach-1", "vpc-1", Some("workload"));

    let (a, b) = tokio::join!(associator.handle_event(&event), associator.handle_event(&event));

    assert_eq!(a.unwrap().state, AssociationState::PropagationEnabled);
    assert_eq!(b.unwrap().state, AssociationState::PropagationEnabled);
    let verifier = CloudVerifier::new(&cloud);
    verifier.assert_associated("tgw-attach-1", WORKLOAD_RT).unwrap();
    verifier.assert_propagations("tgw-attach-1", &[WORKLOAD_RT]).unwrap();
}

#[tokio::test]
async fn test_export_published_late() {
    let cloud = Arc::new(InMemoryCloud::new());
    cloud.publish_export_after(WORKLOAD_ROUTE_TABLE_EXPORT, "rtb-123", 1);
    cloud.add_attachment(topology_fixtures::attachment("tgw-attach-1", "vpc-1"));
    let associator = AttachmentAssociator::new(
        Arc::clone(&cloud),
        settings(WorkloadPropagation::Association),
    );

    let event = event_fixtures::attachment_created("tgw-attach-1", "vpc-1", Some("workload"));
    let outcome = associator.handle_event(&event).await.unwrap();

    assert_eq!(outcome.route_table_id, "rtb-123");
    assert_eq!(cloud.call_count(CloudOperation::GetExport), 2);
    CloudVerifier::new(&cloud)
        .assert_associated("tgw-attach-1", "rtb-123")
        .unwrap();
}

#[tokio::test]
async fn test_export_never_published() {
    let cloud = Arc::new(InMemoryCloud::new());
    cloud.add_attachment(topology_fixtures::attachment("tgw-attach-1", "vpc-1"));
    let associator = AttachmentAssociator::new(
        Arc::clone(&cloud),
        settings(WorkloadPropagation::Association),
    );

    let event = event_fixtures::attachment_created("tgw-attach-1", "vpc-1", None);
    let err = associator.handle_event(&event).await.unwrap_err();

    assert!(matches!(err, InspectionError::Retryable { attempts: 3, .. }));
    CloudVerifier::new(&cloud)
        .assert_not_associated("tgw-attach-1")
        .unwrap();
}

#[tokio::test]
async fn test_empty_export_is_malformed() {
    let (cloud, associator) = setup();
    cloud.publish_export(WORKLOAD_ROUTE_TABLE_EXPORT, "");

    let event = event_fixtures::attachment_created("tgw-attach-1", "vpc-1", None);
    let err = associator.handle_event(&event).await.unwrap_err();

    assert_eq!(err.kind(), "MalformedInput");
    assert_eq!(cloud.call_count(CloudOperation::GetExport), 1);
}

#[tokio::test]
async fn test_waits_for_pending_attachment() {
    let (cloud, associator) = setup();
    cloud.keep_attachment_pending("tgw-attach-1", 2);

    let event = event_fixtures::attachment_created("tgw-attach-1", "vpc-1", None);
    associator.handle_event(&event).await.unwrap();

    assert_eq!(cloud.call_count(CloudOperation::DescribeAttachment), 3);
    CloudVerifier::new(&cloud)
        .assert_associated("tgw-attach-1", WORKLOAD_RT)
        .unwrap();
}

#[tokio::test]
async fn test_attachment_stuck_pending_times_out() {
    let (cloud, _) = setup();
    cloud.keep_attachment_pending("tgw-attach-1", u32::MAX);
    let mut settings = settings(WorkloadPropagation::Association);
    settings.attachment_timeout = Duration::from_millis(50);
    settings.retry = RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(5),
        multiplier: 1.0,
        jitter: false,
    };
    let associator = AttachmentAssociator::new(Arc::clone(&cloud), settings);

    let event = event_fixtures::attachment_created("tgw-attach-1", "vpc-1", None);
    let err = associator.handle_event(&event).await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(cloud.call_count(CloudOperation::AssociateRouteTable), 0);
}

#[tokio::test]
async fn test_deleted_attachment_is_resource_gone() {
    let (cloud, associator) = setup();
    let mut attachment = topology_fixtures::attachment("tgw-attach-2", "vpc-2");
    attachment.state = AttachmentState::Deleting;
    cloud.add_attachment(attachment);

    let event = event_fixtures::attachment_created("tgw-attach-2", "vpc-2", None);
    let err = associator.handle_event(&event).await.unwrap_err();

    assert_eq!(
        err,
        InspectionError::resource_gone(ResourceKind::Attachment, "tgw-attach-2")
    );
}

#[tokio::test]
async fn test_unknown_attachment_is_resource_gone() {
    let (_, associator) = setup();
    let event = event_fixtures::attachment_created("tgw-attach-404", "vpc-404", None);
    let err = associator.handle_event(&event).await.unwrap_err();
    assert_eq!(err.kind(), "ResourceGone");
}

#[tokio::test]
async fn test_moves_attachment_from_another_table() {
    let (cloud, associator) = setup();
    let mut attachment = topology_fixtures::attachment("tgw-attach-3", "vpc-3");
    attachment.association = Some("tgw-rtb-default".to_string());
    cloud.add_attachment(attachment);

    let event = event_fixtures::attachment_created("tgw-attach-3", "vpc-3", Some("workload"));
    associator.handle_event(&event).await.unwrap();

    assert_eq!(cloud.call_count(CloudOperation::DisassociateRouteTable), 1);
    CloudVerifier::new(&cloud)
        .assert_associated("tgw-attach-3", WORKLOAD_RT)
        .unwrap();
}

#[tokio::test]
async fn test_throttled_association_is_retried() {
    let (cloud, associator) = setup();
    cloud.inject_failures(
        CloudOperation::AssociateRouteTable,
        CloudError::throttled("AssociateTransitGatewayRouteTable", "Rate exceeded"),
        2,
    );

    let event = event_fixtures::attachment_created("tgw-attach-1", "vpc-1", None);
    associator.handle_event(&event).await.unwrap();
    assert_eq!(cloud.call_count(CloudOperation::AssociateRouteTable), 3);
}

#[tokio::test]
async fn test_tag_list_event() {
    let (cloud, associator) = setup();
    let event = event_fixtures::attachment_created_with_tags(
        "tgw-attach-1",
        "vpc-1",
        &[("Name", "spoke"), ("routeTable", "inspection")],
    );

    let outcome = associator.handle_event(&event).await.unwrap();
    assert_eq!(outcome.role, VpcRole::Inspection);
    CloudVerifier::new(&cloud)
        .assert_associated("tgw-attach-1", INSPECTION_RT)
        .unwrap();
}

#[tokio::test]
async fn test_malformed_event_is_dropped() {
    let (cloud, associator) = setup();
    let err = associator
        .handle_event(&json!({ "source": "aws.ec2", "detail": { "eventName": "CreateTransitGatewayVpcAttachment" } }))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "MalformedInput");
    assert_eq!(cloud.call_count(CloudOperation::GetExport), 0);
    assert_eq!(cloud.call_count(CloudOperation::DescribeAttachment), 0);
}

#[tokio::test]
async fn test_duplicate_with_stale_read_after_move() {
    let (cloud, associator) = setup();
    let mut before_move = topology_fixtures::attachment("tgw-attach-1", "vpc-1");
    before_move.association = Some("tgw-rtb-default".to_string());
    cloud.add_attachment(before_move.clone());

    let event = event_fixtures::attachment_created("tgw-attach-1", "vpc-1", Some("workload"));
    let first = associator.handle_event(&event).await.unwrap();
    assert_eq!(first.state, AssociationState::PropagationEnabled);

    // The duplicate still sees the association from before the move
    let lagging = Arc::new(InterleavingCloud::new(Arc::clone(&cloud)));
    lagging.serve_stale(before_move);
    let duplicate_handler =
        AttachmentAssociator::new(lagging, settings(WorkloadPropagation::Association));

    let second = duplicate_handler.handle_event(&event).await.unwrap();

    assert_eq!(second.state, AssociationState::PropagationEnabled);
    assert_eq!(second.route_table_id, WORKLOAD_RT);
    assert_eq!(cloud.call_count(CloudOperation::AssociateRouteTable), 1);
    let verifier = CloudVerifier::new(&cloud);
    verifier.assert_associated("tgw-attach-1", WORKLOAD_RT).unwrap();
    verifier.assert_propagations("tgw-attach-1", &[WORKLOAD_RT]).unwrap();
}

#[tokio::test]
async fn test_interleaved_duplicates_move_from_another_table() {
    let (cloud, _) = setup();
    let mut attachment = topology_fixtures::attachment("tgw-attach-1", "vpc-1");
    attachment.association = Some("tgw-rtb-default".to_string());
    cloud.add_attachment(attachment);

    let interleaving = Arc::new(InterleavingCloud::new(Arc::clone(&cloud)).yielding());
    let associator =
        AttachmentAssociator::new(interleaving, settings(WorkloadPropagation::Association));
    let event = event_fixtures::attachment_created("tgw-attach-1", "vpc-1", Some("workload"));

    let (a, b) = tokio::join!(associator.handle_event(&event), associator.handle_event(&event));

    assert_eq!(a.unwrap().state, AssociationState::PropagationEnabled);
    assert_eq!(b.unwrap().state, AssociationState::PropagationEnabled);
    assert!(cloud.call_count(CloudOperation::DisassociateRouteTable) >= 1);
    let verifier = CloudVerifier::new(&cloud);
    verifier.assert_associated("tgw-attach-1", WORKLOAD_RT).unwrap();
    verifier.assert_propagations("tgw-attach-1", &[WORKLOAD_RT]).unwrap();
}

#[tokio::test]
async fn test_event_for_other_vpc_is_rejected() {
    let (cloud, associator) = setup();
    let event = event_fixtures::attachment_created("tgw-attach-1", "vpc-other", Some("workload"));

    let err = associator.handle_event(&event).await.unwrap_err();

    assert_eq!(err.kind(), "MalformedInput");
    assert_eq!(cloud.call_count(CloudOperation::AssociateRouteTable), 0);
    CloudVerifier::new(&cloud)
        .assert_not_associated("tgw-attach-1")
        .unwrap();
}

#[tokio::test]
async fn test_event_gives_up_at_deadline() {
    let (cloud, _) = setup();
    cloud.keep_attachment_pending("tgw-attach-1", u32::MAX);
    let mut settings = settings(WorkloadPropagation::Association);
    settings.retry = RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(5),
        multiplier: 1.0,
        jitter: false,
    };
    settings.attachment_timeout = Duration::from_secs(10);
    settings.deadline = Duration::from_millis(100);
    let associator = AttachmentAssociator::new(Arc::clone(&cloud), settings);

    let event = event_fixtures::attachment_created("tgw-attach-1", "vpc-1", None);
    let started = Instant::now();
    let err = associator.handle_event(&event).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(err.is_retryable());
    assert_eq!(cloud.call_count(CloudOperation::AssociateRouteTable), 0);
}
