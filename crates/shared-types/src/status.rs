//! # Blob Status Machine
//!
//! Statuses only move forward one step at a time, or sideways into
//! `Failed` from any non-terminal status. `Finalized` and `Failed` are
//! terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entities::{ConfirmationInfo, DispatchInfo};

/// Lifecycle status of a blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlobStatus {
    Queued,
    Encoded,
    Dispatched,
    Confirmed,
    Finalized,
    Failed,
}

impl BlobStatus {
    pub const ALL: [BlobStatus; 6] = [
        BlobStatus::Queued,
        BlobStatus::Encoded,
        BlobStatus::Dispatched,
        BlobStatus::Confirmed,
        BlobStatus::Finalized,
        BlobStatus::Failed,
    ];

    /// Position on the happy path. `Failed` sits outside it.
    pub fn rank(self) -> Option<u8> {
        match self {
            BlobStatus::Queued => Some(0),
            BlobStatus::Encoded => Some(1),
            BlobStatus::Dispatched => Some(2),
            BlobStatus::Confirmed => Some(3),
            BlobStatus::Finalized => Some(4),
            BlobStatus::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BlobStatus::Finalized | BlobStatus::Failed)
    }

    pub fn can_transition_to(self, next: BlobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == BlobStatus::Failed {
            return true;
        }
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to == from + 1,
            _ => false,
        }
    }

    /// Stable lowercase label used in metrics and storage keys.
    pub fn as_str(self) -> &'static str {
        match self {
            BlobStatus::Queued => "queued",
            BlobStatus::Encoded => "encoded",
            BlobStatus::Dispatched => "dispatched",
            BlobStatus::Confirmed => "confirmed",
            BlobStatus::Finalized => "finalized",
            BlobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BlobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage at which a blob exhausted its retries or hit a permanent error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    EncodingFailed,
    DispatchFailed,
    ConfirmationFailed,
    FinalizationFailed,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::EncodingFailed => "encoding_failed",
            FailureReason::DispatchFailed => "dispatch_failed",
            FailureReason::ConfirmationFailed => "confirmation_failed",
            FailureReason::FinalizationFailed => "finalization_failed",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target status plus whatever stage record comes with it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusUpdate {
    pub to: BlobStatus,
    pub dispatch: Option<DispatchInfo>,
    pub confirmation: Option<ConfirmationInfo>,
    pub failure: Option<FailureReason>,
}

impl StatusUpdate {
    pub fn to(status: BlobStatus) -> Self {
        Self {
            to: status,
            dispatch: None,
            confirmation: None,
            failure: None,
        }
    }

    pub fn dispatched(info: DispatchInfo) -> Self {
        Self {
            dispatch: Some(info),
            ..Self::to(BlobStatus::Dispatched)
        }
    }

    pub fn confirmed(info: ConfirmationInfo) -> Self {
        Self {
            confirmation: Some(info),
            ..Self::to(BlobStatus::Confirmed)
        }
    }

    pub fn failed(reason: FailureReason) -> Self {
        Self {
            failure: Some(reason),
            ..Self::to(BlobStatus::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_happy_path_is_single_steps() {
        assert!(BlobStatus::Queued.can_transition_to(BlobStatus::Encoded));
        assert!(BlobStatus::Encoded.can_transition_to(BlobStatus::Dispatched));
        assert!(BlobStatus::Dispatched.can_transition_to(BlobStatus::Confirmed));
        assert!(BlobStatus::Confirmed.can_transition_to(BlobStatus::Finalized));

        assert!(!BlobStatus::Queued.can_transition_to(BlobStatus::Dispatched));
        assert!(!BlobStatus::Confirmed.can_transition_to(BlobStatus::Encoded));
        assert!(!BlobStatus::Encoded.can_transition_to(BlobStatus::Encoded));
    }

    #[test]
    fn test_terminal_statuses_are_sinks() {
        for next in BlobStatus::ALL {
            assert!(!BlobStatus::Finalized.can_transition_to(next));
            assert!(!BlobStatus::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_any_live_status_can_fail() {
        for status in BlobStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(status.can_transition_to(BlobStatus::Failed));
        }
    }

    fn any_status() -> impl Strategy<Value = BlobStatus> {
        prop::sample::select(BlobStatus::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_allowed_transitions_never_go_backwards(
            walk in prop::collection::vec(any_status(), 1..32)
        ) {
            let mut current = BlobStatus::Queued;
            let mut highest = current.rank();
            for next in walk {
                if current.can_transition_to(next) {
                    current = next;
                    if let Some(rank) = current.rank() {
                        prop_assert!(Some(rank) > highest);
                        highest = Some(rank);
                    }
                }
            }
            if current.is_terminal() {
                for next in BlobStatus::ALL {
                    prop_assert!(!current.can_transition_to(next));
                }
            }
        }
    }
}
