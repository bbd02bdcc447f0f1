//! Inspection route manager
//!
//! Keeps subnet route tables of the inspection topology pointing at the
//! right next hop:
//!
//! - [`topology_index`]: per-AZ view of subnets and firewall endpoints
//! - [`plan`]: desired routes as a pure function of the topology
//! - [`reconciler`]: idempotent apply of desired routes
//! - [`lifecycle`]: the provisioning system's Create/Update/Delete contract
//! - [`responder`]: delivery of lifecycle responses

pub mod lifecycle;
pub mod plan;
pub mod reconciler;
pub mod responder;
pub mod topology_index;

pub use lifecycle::{
    physical_resource_id, LifecycleAdapter, LifecycleRequest, LifecycleResponse,
    LifecycleSettings, RequestType, ResponseStatus, RouteProperties, RouteVia,
};
pub use plan::{plan_default_route, plan_inspection_routes, InspectionIntent, RoutePlan};
pub use reconciler::{ApplyReport, RouteReconciler, TeardownOutcome, UpsertOutcome};
pub use responder::{HttpResponseSink, ResponseError, ResponseSink, StdoutSink};
pub use topology_index::{AzBinding, TopologyIndex};
