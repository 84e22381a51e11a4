use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::session::SessionId;
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnrollmentId(pub String);

impl std::fmt::Display for EnrollmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Seat status; after the session runs it doubles as the attendance outcome
/// (`completed`, `partial`, `absent`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Confirmed,
    Waitlisted,
    Cancelled,
    Completed,
    Absent,
    Partial,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Waitlisted => "waitlisted",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Absent => "absent",
            Self::Partial => "partial",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "confirmed" => Some(Self::Confirmed),
            "waitlisted" => Some(Self::Waitlisted),
            "cancelled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            "absent" => Some(Self::Absent),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }

    /// Holds a seat: counted against capacity.
    pub fn occupies_seat(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Completed | Self::Absent | Self::Partial)
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    NotEvaluated,
    Pending,
    Completed,
    NotCompleted,
    Failed,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotEvaluated => "not_evaluated",
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::NotCompleted => "not_completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "not_evaluated" => Some(Self::NotEvaluated),
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "not_completed" => Some(Self::NotCompleted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_conclusive(&self) -> bool {
        matches!(self, Self::Completed | Self::NotCompleted | Self::Failed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSource {
    Evaluator,
    Override,
}

impl CompletionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Evaluator => "evaluator",
            Self::Override => "override",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "evaluator" => Some(Self::Evaluator),
            "override" => Some(Self::Override),
            _ => None,
        }
    }
}

/// Who locked a set of fields, and when.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalization {
    pub by: UserId,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionEnrollment {
    pub id: EnrollmentId,
    pub session_id: SessionId,
    pub participant: UserId,
    pub status: EnrollmentStatus,
    pub waitlist_position: Option<u32>,
    pub attended_minutes: u32,
    pub score: Option<Decimal>,
    pub completion_status: CompletionStatus,
    pub passed: Option<bool>,
    pub completion_source: Option<CompletionSource>,
    pub attendance_final: Option<Finalization>,
    pub completion_final: Option<Finalization>,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionEnrollment {
    pub fn new(
        id: EnrollmentId,
        session_id: SessionId,
        participant: UserId,
        status: EnrollmentStatus,
        waitlist_position: Option<u32>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            session_id,
            participant,
            status,
            waitlist_position,
            attended_minutes: 0,
            score: None,
            completion_status: CompletionStatus::NotEvaluated,
            passed: None,
            completion_source: None,
            attendance_final: None,
            completion_final: None,
            cancellation_reason: None,
            cancelled_at: None,
            enrolled_at: now,
            updated_at: now,
        }
    }

    pub fn is_attendance_final(&self) -> bool {
        self.attendance_final.is_some()
    }

    pub fn is_completion_final(&self) -> bool {
        self.completion_final.is_some()
    }

    /// Took (or holds) a seat in the session and is therefore subject to completion rules.
    pub fn is_participant(&self) -> bool {
        self.status.occupies_seat()
    }
}
