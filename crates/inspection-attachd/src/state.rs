//! Per-attachment association state machine.
//!
//! ```text
//! Pending -> Associated -> PropagationEnabled
//!    |           |
//!    +-----------+------> Failed
//! ```
//!
//! `Associated` is terminal for attachments that do not propagate.
//! Re-entering the current state is allowed so duplicate events converge.

use std::fmt;

use inspection_common::{InspectionError, InspectionResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationState {
    Pending,
    Associated,
    PropagationEnabled,
    Failed,
}

impl AssociationState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AssociationState::Pending => "pending",
            AssociationState::Associated => "associated",
            AssociationState::PropagationEnabled => "propagation_enabled",
            AssociationState::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: AssociationState) -> bool {
        use AssociationState::*;
        matches!(
            (self, next),
            (Pending, Associated)
                | (Associated, PropagationEnabled)
                | (Pending, Failed)
                | (Associated, Failed)
        ) || *self == next
    }
}

impl fmt::Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one attachment through association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationMachine {
    attachment_id: String,
    state: AssociationState,
}

impl AssociationMachine {
    pub fn new(attachment_id: impl Into<String>) -> Self {
        Self {
            attachment_id: attachment_id.into(),
            state: AssociationState::Pending,
        }
    }

    pub fn attachment_id(&self) -> &str {
        &self.attachment_id
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    pub fn transition(&mut self, next: AssociationState) -> InspectionResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(InspectionError::internal(format!(
                "attachment {}: invalid transition {} -> {}",
                self.attachment_id, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Moves to `Failed` unless already terminal-successful.
    pub fn fail(&mut self) {
        if self.state.can_transition_to(AssociationState::Failed) {
            self.state = AssociationState::Failed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut machine = AssociationMachine::new("tgw-attach-1");
        assert_eq!(machine.state(), AssociationState::Pending);
        machine.transition(AssociationState::Associated).unwrap();
        machine.transition(AssociationState::Associated).unwrap();
        machine.transition(AssociationState::PropagationEnabled).unwrap();
        assert_eq!(machine.state(), AssociationState::PropagationEnabled);
    }

    #[test]
    fn test_rejects_skipping_association() {
        let mut machine = AssociationMachine::new("tgw-attach-1");
        let err = machine
            .transition(AssociationState::PropagationEnabled)
            .unwrap_err();
        assert_eq!(err.kind(), "Internal");
        assert_eq!(machine.state(), AssociationState::Pending);
    }

    #[test]
    fn test_fail_is_terminal() {
        let mut machine = AssociationMachine::new("tgw-attach-1");
        machine.fail();
        assert_eq!(machine.state(), AssociationState::Failed);
        assert!(machine.transition(AssociationState::Associated).is_err());

        let mut done = AssociationMachine::new("tgw-attach-2");
        done.transition(AssociationState::Associated).unwrap();
        done.transition(AssociationState::PropagationEnabled).unwrap();
        done.fail();
        assert_eq!(done.state(), AssociationState::PropagationEnabled);
    }
}
