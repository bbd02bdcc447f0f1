//! Integration test infrastructure for the inspection route daemons
//!
//! Provides:
//! - Topology fixtures (subnets, firewall endpoints, attachments)
//! - Attachment-creation event and lifecycle request builders
//! - A pre-seeded in-memory cloud
//! - A cloud wrapper that interleaves concurrent handlers and serves stale reads
//! - Cloud state verification helpers

mod cloud;
pub mod fixtures;
mod verification;

pub use cloud::InterleavingCloud;
pub use fixtures::*;
pub use verification::*;
