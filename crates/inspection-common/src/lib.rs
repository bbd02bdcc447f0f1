//! Shared infrastructure for the inspection route daemons.
//!
//! - [`error`]: the error taxonomy every operation reports through
//! - [`retry`]: bounded exponential backoff for cloud calls
//! - [`cloud`]: the cloud API seams plus a bundled in-memory backend
//! - [`exports`]: typed cross-stack export lookup
//! - [`config`]: TOML configuration with validated defaults
//!
//! # Architecture
//!
//! Both daemons are stateless per invocation. Every call re-reads the cloud,
//! computes desired state, and applies it through idempotent operations:
//!
//! 1. Read the snapshot (subnets, endpoints, attachment, exports)
//! 2. Compute desired state as a pure function of the snapshot
//! 3. Apply it through upsert / idempotent-delete calls wrapped in [`retry`]
//! 4. Report success or one [`InspectionError`] to the caller

pub mod cloud;
pub mod config;
pub mod error;
pub mod exports;
pub mod retry;

pub use cloud::{
    CloudApi, CloudError, CloudOperation, CloudResult, CloudState, FirewallApi, InMemoryCloud,
    ResourceKind, RouteTableApi, TransitGatewayApi,
};
pub use config::{
    AssociatorConfig, Config, ConfigError, ExportsConfig, LifecycleConfig, MissingEndpointPolicy,
    RetryConfig, WorkloadPropagation, ASSOCIATOR_RETRY_SEQUENCES, LIFECYCLE_RETRY_SEQUENCES,
};
pub use error::{InspectionError, InspectionResult};
pub use exports::{
    lookup_export, require_export, Export, ExportKey, ExportRegistry,
    INSPECTION_ROUTE_TABLE_EXPORT, WORKLOAD_ROUTE_TABLE_EXPORT,
};
pub use retry::{retry_with_backoff, retry_with_backoff_if, RetryPolicy};
