//! Transit gateway VPC attachments.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a transit gateway attachment as reported by the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentState {
    Pending,
    Available,
    Modifying,
    Deleting,
    Deleted,
    Failed,
    Rejected,
}

impl AttachmentState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AttachmentState::Pending => "pending",
            AttachmentState::Available => "available",
            AttachmentState::Modifying => "modifying",
            AttachmentState::Deleting => "deleting",
            AttachmentState::Deleted => "deleted",
            AttachmentState::Failed => "failed",
            AttachmentState::Rejected => "rejected",
        }
    }

    /// Returns true while the attachment is still converging and route
    /// table operations should wait.
    pub const fn is_transitional(&self) -> bool {
        matches!(self, AttachmentState::Pending | AttachmentState::Modifying)
    }

    /// Returns true if the attachment will never become usable again.
    pub const fn is_gone(&self) -> bool {
        matches!(
            self,
            AttachmentState::Deleting
                | AttachmentState::Deleted
                | AttachmentState::Failed
                | AttachmentState::Rejected
        )
    }
}

impl fmt::Display for AttachmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttachmentState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" | "initiating" | "pendingacceptance" => Ok(AttachmentState::Pending),
            "available" => Ok(AttachmentState::Available),
            "modifying" => Ok(AttachmentState::Modifying),
            "deleting" => Ok(AttachmentState::Deleting),
            "deleted" => Ok(AttachmentState::Deleted),
            "failed" | "failing" => Ok(AttachmentState::Failed),
            "rejected" | "rejecting" => Ok(AttachmentState::Rejected),
            _ => Err(ParseError::InvalidAttachmentState(s.to_string())),
        }
    }
}

/// A transit gateway VPC attachment, created once per VPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitGatewayAttachment {
    pub id: String,
    pub vpc_id: String,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    pub state: AttachmentState,
    /// Route table the attachment is associated with, if any.
    #[serde(default)]
    pub association: Option<String>,
    /// Route tables this attachment propagates its routes into.
    #[serde(default)]
    pub propagations: BTreeSet<String>,
}

impl TransitGatewayAttachment {
    pub fn new(id: impl Into<String>, vpc_id: impl Into<String>, state: AttachmentState) -> Self {
        Self {
            id: id.into(),
            vpc_id: vpc_id.into(),
            subnet_ids: Vec::new(),
            state,
            association: None,
            propagations: BTreeSet::new(),
        }
    }

    pub fn is_associated_with(&self, route_table_id: &str) -> bool {
        self.association.as_deref() == Some(route_table_id)
    }

    pub fn propagates_into(&self, route_table_id: &str) -> bool {
        self.propagations.contains(route_table_id)
    }
}

/// Identifier of a transit gateway route table, as published through a
/// cross-stack export.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransitGatewayRouteTableId(String);

impl TransitGatewayRouteTableId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransitGatewayRouteTableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TransitGatewayRouteTableId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyIdentifier("transit gateway route table id"));
        }
        Ok(TransitGatewayRouteTableId(trimmed.to_string()))
    }
}
