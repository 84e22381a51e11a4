use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::request::{RequestStatus, WorkflowSnapshot};
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowEvent {
    Submitted { approver: UserId },
    LevelAdvanced { level: u32, approver: UserId },
    Delegated { delegate: UserId },
    ChainCompleted,
    Rejected,
    Withdrawn,
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "submitted",
            Self::LevelAdvanced { .. } => "level_advanced",
            Self::Delegated { .. } => "delegated",
            Self::ChainCompleted => "chain_completed",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition from {status:?} using event `{event}`")]
    InvalidTransition { status: RequestStatus, event: &'static str },
    #[error("approval level must advance from {current} to {expected}, got {requested}")]
    LevelNotAdvancing { current: u32, expected: u32, requested: u32 },
}

/// The only producer of request snapshots. Keeps `approver.is_some() == (status == Pending)`
/// and never lowers the level.
pub fn transition(
    current: &WorkflowSnapshot,
    event: &WorkflowEvent,
) -> Result<WorkflowSnapshot, TransitionError> {
    use RequestStatus::{Cancelled, Draft, Pending, Rejected};

    let next = match (current.status, event) {
        (Draft, WorkflowEvent::Submitted { approver }) => {
            WorkflowSnapshot { status: Pending, level: 1, approver: Some(approver.clone()) }
        }
        (Pending, WorkflowEvent::LevelAdvanced { level, approver }) => {
            let expected = current.level + 1;
            if *level != expected {
                return Err(TransitionError::LevelNotAdvancing {
                    current: current.level,
                    expected,
                    requested: *level,
                });
            }
            WorkflowSnapshot { status: Pending, level: *level, approver: Some(approver.clone()) }
        }
        (Pending, WorkflowEvent::Delegated { delegate }) => WorkflowSnapshot {
            status: Pending,
            level: current.level,
            approver: Some(delegate.clone()),
        },
        (Pending, WorkflowEvent::ChainCompleted) => {
            WorkflowSnapshot { status: RequestStatus::Approved, level: current.level, approver: None }
        }
        (Pending, WorkflowEvent::Rejected) => {
            WorkflowSnapshot { status: Rejected, level: current.level, approver: None }
        }
        (Draft | Pending, WorkflowEvent::Withdrawn) => {
            WorkflowSnapshot { status: Cancelled, level: current.level, approver: None }
        }
        (status, event) => {
            return Err(TransitionError::InvalidTransition { status, event: event.name() });
        }
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use crate::approvals::transitions::{transition, TransitionError, WorkflowEvent};
    use crate::domain::request::{RequestStatus, WorkflowSnapshot};
    use crate::domain::user::UserId;

    fn pending(level: u32, approver: &str) -> WorkflowSnapshot {
        WorkflowSnapshot {
            status: RequestStatus::Pending,
            level,
            approver: Some(UserId::new(approver)),
        }
    }

    #[test]
    fn submit_opens_level_one() {
        let next = transition(
            &WorkflowSnapshot::draft(),
            &WorkflowEvent::Submitted { approver: UserId::new("mgr-1") },
        )
        .expect("draft -> pending");

        assert_eq!(next, pending(1, "mgr-1"));
    }

    #[test]
    fn advancing_must_move_exactly_one_level() {
        let error = transition(
            &pending(1, "mgr-1"),
            &WorkflowEvent::LevelAdvanced { level: 3, approver: UserId::new("lnd-1") },
        )
        .expect_err("skipping a level must fail");
        assert_eq!(
            error,
            TransitionError::LevelNotAdvancing { current: 1, expected: 2, requested: 3 }
        );

        let stale = transition(
            &pending(2, "hrbp-1"),
            &WorkflowEvent::LevelAdvanced { level: 2, approver: UserId::new("hrbp-2") },
        );
        assert!(stale.is_err());
    }

    #[test]
    fn delegation_keeps_level_and_swaps_approver() {
        let next = transition(
            &pending(2, "hrbp-x"),
            &WorkflowEvent::Delegated { delegate: UserId::new("hrbp-y") },
        )
        .expect("delegate");

        assert_eq!(next, pending(2, "hrbp-y"));
    }

    #[test]
    fn terminal_states_clear_the_approver() {
        for event in [WorkflowEvent::ChainCompleted, WorkflowEvent::Rejected, WorkflowEvent::Withdrawn]
        {
            let next = transition(&pending(3, "lnd-1"), &event).expect("terminal transition");
            assert!(next.status.is_terminal());
            assert_eq!(next.level, 3);
            assert_eq!(next.approver, None);
        }
    }

    #[test]
    fn rejected_request_accepts_no_further_events() {
        let rejected = transition(&pending(2, "hrbp-1"), &WorkflowEvent::Rejected).expect("reject");

        let events = [
            WorkflowEvent::LevelAdvanced { level: 3, approver: UserId::new("lnd-1") },
            WorkflowEvent::Delegated { delegate: UserId::new("hrbp-2") },
            WorkflowEvent::ChainCompleted,
            WorkflowEvent::Withdrawn,
        ];
        for event in &events {
            assert!(matches!(
                transition(&rejected, event),
                Err(TransitionError::InvalidTransition { status: RequestStatus::Rejected, .. })
            ));
        }
    }

    #[test]
    fn snapshot_invariant_holds_along_any_accepted_sequence() {
        let events = [
            WorkflowEvent::Submitted { approver: UserId::new("mgr-1") },
            WorkflowEvent::LevelAdvanced { level: 2, approver: UserId::new("hrbp-x") },
            WorkflowEvent::Delegated { delegate: UserId::new("hrbp-y") },
            WorkflowEvent::LevelAdvanced { level: 3, approver: UserId::new("lnd-1") },
            WorkflowEvent::ChainCompleted,
        ];

        let mut state = WorkflowSnapshot::draft();
        let mut levels = vec![state.level];
        for event in &events {
            state = transition(&state, event).expect("accepted sequence");
            assert_eq!(state.approver.is_some(), state.status == RequestStatus::Pending);
            levels.push(state.level);
        }

        assert!(levels.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(state.status, RequestStatus::Approved);
    }
}
