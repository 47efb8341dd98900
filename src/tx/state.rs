//! Per-attempt submission state machine

use crate::error::{RelayerError, RelayerResult};

use serde::Serialize;
use std::fmt;

/// Where a submission attempt currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    Building,
    Signed,
    Submitted,
    Confirmed,
    ConflictDetected,
    Retrying,
    OtherFailure,
    TimedOut,
    RetriesExhausted,
}

impl SubmissionState {
    /// Check if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionState::Confirmed
                | SubmissionState::OtherFailure
                | SubmissionState::TimedOut
                | SubmissionState::RetriesExhausted
        )
    }

    /// Check if the state machine allows `self -> next`
    pub fn can_transition_to(&self, next: SubmissionState) -> bool {
        use SubmissionState::*;

        match (self, next) {
            (Building, Signed) => true,
            (Signed, Submitted) => true,
            (Submitted, Confirmed) | (Submitted, TimedOut) => true,
            // Conflicts may surface while building (sequence read) or sending
            (Building, ConflictDetected) | (Signed, ConflictDetected) => true,
            (ConflictDetected, Retrying) | (ConflictDetected, RetriesExhausted) => true,
            (Retrying, Building) => true,
            (Building, OtherFailure) | (Signed, OtherFailure) | (Submitted, OtherFailure) => true,
            _ => false,
        }
    }

    /// Move to `next`, rejecting transitions the machine does not allow
    pub fn advance(&mut self, next: SubmissionState) -> RelayerResult<()> {
        if !self.can_transition_to(next) {
            return Err(RelayerError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubmissionState::Building => "building",
            SubmissionState::Signed => "signed",
            SubmissionState::Submitted => "submitted",
            SubmissionState::Confirmed => "confirmed",
            SubmissionState::ConflictDetected => "conflict_detected",
            SubmissionState::Retrying => "retrying",
            SubmissionState::OtherFailure => "other_failure",
            SubmissionState::TimedOut => "timed_out",
            SubmissionState::RetriesExhausted => "retries_exhausted",
        };
        f.write_str(name)
    }
}
