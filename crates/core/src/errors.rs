use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The entity was not in the state the requested transition needs. Nothing was written.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StateConflict {
    #[error("approval `{approval_id}` was already decided ({status})")]
    AlreadyDecided { approval_id: String, status: String },
    #[error("{scope} `{id}` is already finalized")]
    AlreadyFinalized { scope: &'static str, id: String },
    #[error("participant `{participant}` is already enrolled in session `{session_id}`")]
    DuplicateEnrollment { session_id: String, participant: String },
    #[error("{entity} `{id}` was modified concurrently; reload and retry")]
    ConcurrentModification { entity: &'static str, id: String },
    #[error("{entity} `{id}` is `{state}`; cannot {action}")]
    InvalidState { entity: &'static str, id: String, state: String, action: &'static str },
    #[error("session `{session_id}` has enrollments without a conclusive completion: {enrollment_ids:?}")]
    CompletionIncomplete { session_id: String, enrollment_ids: Vec<String> },
    #[error("attendance for enrollment `{enrollment_id}` is finalized")]
    AttendanceLocked { enrollment_id: String },
}

/// A routing dependency could not be satisfied. The request keeps its last valid state.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolutionFailure {
    #[error("requester `{requester}` has no assigned manager")]
    MissingApprover { requester: String },
    #[error("no {role} approver available for request `{request_id}` at level {level}")]
    NoApproverAvailable { request_id: String, level: u32, role: &'static str },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("validation failed: {message}")]
    Validation { message: String },
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    Conflict(#[from] StateConflict),
    #[error(transparent)]
    Resolution(#[from] ResolutionFailure),
    #[error("transient failure: {message}")]
    Transient { message: String },
}

impl WorkflowError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient { message: message.into() }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::NotFound { .. } => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::StateConflict,
            Self::Resolution(_) => ErrorKind::Resolution,
            Self::Transient { .. } => ErrorKind::Transient,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::Conflict(StateConflict::ConcurrentModification { .. })
        )
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        InterfaceError {
            kind: self.kind(),
            message: self.to_string(),
            correlation_id: correlation_id.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    StateConflict,
    Resolution,
    Transient,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::StateConflict => "state_conflict",
            Self::Resolution => "resolution",
            Self::Transient => "transient",
        }
    }
}

/// What the UI layer receives: kind plus a message it can render as a toast or banner.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct InterfaceError {
    pub kind: ErrorKind,
    pub message: String,
    pub correlation_id: String,
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            ErrorKind::Validation => "The request could not be processed. Check inputs and try again.",
            ErrorKind::StateConflict => {
                "This item was changed in the meantime. Refresh and try again."
            }
            ErrorKind::Resolution => {
                "No approver could be assigned for this step. Please contact HR."
            }
            ErrorKind::Transient => "The service is temporarily unavailable. Please retry shortly.",
        }
    }
}
