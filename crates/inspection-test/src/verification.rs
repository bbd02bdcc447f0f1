//! Verification helpers for testing the inspection daemons
//!
//! Provides assertion helpers to verify routes, associations and
//! propagations held by the in-memory cloud

use inspection_common::InMemoryCloud;
use inspection_types::{Cidr, RouteTarget};
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug, PartialEq)]
pub enum VerificationError {
    #[error("Route table '{route_table_id}' not found")]
    RouteTableNotFound { route_table_id: String },

    #[error("Expected route {route_table_id}:{destination} not found")]
    RouteNotFound {
        route_table_id: String,
        destination: Cidr,
    },

    #[error("Unexpected route {route_table_id}:{destination} -> {target}")]
    UnexpectedRoute {
        route_table_id: String,
        destination: Cidr,
        target: RouteTarget,
    },

    #[error("Target mismatch for {route_table_id}:{destination}: expected '{expected}', got '{actual}'")]
    TargetMismatch {
        route_table_id: String,
        destination: Cidr,
        expected: RouteTarget,
        actual: RouteTarget,
    },

    #[error("Expected {expected} routes in '{route_table_id}', found {actual}")]
    RouteCountMismatch {
        route_table_id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Attachment '{attachment_id}' not found")]
    AttachmentNotFound { attachment_id: String },

    #[error("Association mismatch for '{attachment_id}': expected {expected:?}, got {actual:?}")]
    AssociationMismatch {
        attachment_id: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    #[error("Expected propagations of '{attachment_id}' to be {expected:?}, got {actual:?}")]
    PropagationMismatch {
        attachment_id: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Cloud state verification helper
pub struct CloudVerifier<'a> {
    cloud: &'a InMemoryCloud,
}

impl<'a> CloudVerifier<'a> {
    pub fn new(cloud: &'a InMemoryCloud) -> Self {
        Self { cloud }
    }

    /// Verify that a route exists with the given target
    pub fn assert_route(
        &self,
        route_table_id: &str,
        destination: &Cidr,
        expected: &RouteTarget,
    ) -> VerifyResult<()> {
        self.assert_table_exists(route_table_id)?;
        match self.cloud.route(route_table_id, destination) {
            None => Err(VerificationError::RouteNotFound {
                route_table_id: route_table_id.to_string(),
                destination: *destination,
            }),
            Some(actual) if &actual == expected => Ok(()),
            Some(actual) => Err(VerificationError::TargetMismatch {
                route_table_id: route_table_id.to_string(),
                destination: *destination,
                expected: expected.clone(),
                actual,
            }),
        }
    }

    /// Verify that no route exists for the key
    pub fn assert_no_route(&self, route_table_id: &str, destination: &Cidr) -> VerifyResult<()> {
        match self.cloud.route(route_table_id, destination) {
            None => Ok(()),
            Some(target) => Err(VerificationError::UnexpectedRoute {
                route_table_id: route_table_id.to_string(),
                destination: *destination,
                target,
            }),
        }
    }

    /// Verify the number of routes in a table
    pub fn assert_route_count(&self, route_table_id: &str, expected: usize) -> VerifyResult<()> {
        let actual = self.cloud.route_count(route_table_id).ok_or_else(|| {
            VerificationError::RouteTableNotFound {
                route_table_id: route_table_id.to_string(),
            }
        })?;
        if actual != expected {
            return Err(VerificationError::RouteCountMismatch {
                route_table_id: route_table_id.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify that an attachment is associated with exactly this table
    pub fn assert_associated(&self, attachment_id: &str, route_table_id: &str) -> VerifyResult<()> {
        self.assert_association(attachment_id, Some(route_table_id))
    }

    /// Verify that an attachment has no association
    pub fn assert_not_associated(&self, attachment_id: &str) -> VerifyResult<()> {
        self.assert_association(attachment_id, None)
    }

    /// Verify the exact set of tables an attachment propagates into
    pub fn assert_propagations(&self, attachment_id: &str, expected: &[&str]) -> VerifyResult<()> {
        let attachment = self.cloud.attachment(attachment_id).ok_or_else(|| {
            VerificationError::AttachmentNotFound {
                attachment_id: attachment_id.to_string(),
            }
        })?;

        let mut expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
        expected.sort();
        let actual: Vec<String> = attachment.propagations.into_iter().collect();

        if actual != expected {
            return Err(VerificationError::PropagationMismatch {
                attachment_id: attachment_id.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn assert_table_exists(&self, route_table_id: &str) -> VerifyResult<()> {
        if self.cloud.route_count(route_table_id).is_none() {
            return Err(VerificationError::RouteTableNotFound {
                route_table_id: route_table_id.to_string(),
            });
        }
        Ok(())
    }

    fn assert_association(&self, attachment_id: &str, expected: Option<&str>) -> VerifyResult<()> {
        let attachment = self.cloud.attachment(attachment_id).ok_or_else(|| {
            VerificationError::AttachmentNotFound {
                attachment_id: attachment_id.to_string(),
            }
        })?;
        if attachment.association.as_deref() != expected {
            return Err(VerificationError::AssociationMismatch {
                attachment_id: attachment_id.to_string(),
                expected: expected.map(str::to_string),
                actual: attachment.association,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inspection_types::RouteEntry;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_route_assertions() {
        let cloud = InMemoryCloud::new();
        let target = RouteTarget::FirewallEndpoint("vpce-a".to_string());
        cloud.seed_route(RouteEntry::new("rtb-1", Cidr::DEFAULT_V4, target.clone()));

        let verifier = CloudVerifier::new(&cloud);
        assert!(verifier.assert_route("rtb-1", &Cidr::DEFAULT_V4, &target).is_ok());
        assert!(verifier.assert_route_count("rtb-1", 1).is_ok());

        let other = RouteTarget::TransitGateway("tgw-1".to_string());
        assert_eq!(
            verifier.assert_route("rtb-1", &Cidr::DEFAULT_V4, &other),
            Err(VerificationError::TargetMismatch {
                route_table_id: "rtb-1".to_string(),
                destination: Cidr::DEFAULT_V4,
                expected: other.clone(),
                actual: target,
            })
        );
        assert!(verifier.assert_no_route("rtb-1", &Cidr::DEFAULT_V4).is_err());
        assert!(matches!(
            verifier.assert_route_count("rtb-missing", 0),
            Err(VerificationError::RouteTableNotFound { .. })
        ));
    }
}
