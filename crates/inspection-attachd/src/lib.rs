//! Transit gateway attachment associator
//!
//! Handles `CreateTransitGatewayVpcAttachment` events: the new attachment is
//! associated with the route table published for its VPC's role and, for
//! workload VPCs, propagated.

pub mod associator;
pub mod event;
pub mod state;

pub use associator::{AssociationOutcome, AssociatorSettings, AttachmentAssociator};
pub use event::{AttachmentCreated, VpcRole, CREATE_ATTACHMENT_EVENT, EVENT_SOURCE};
pub use state::{AssociationMachine, AssociationState};
