use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::course::CourseId;
use crate::domain::session::SessionId;
use crate::domain::user::{EntityId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human-readable number shown to employees, e.g. `TR-2026-00042`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestNumber(pub String);

impl RequestNumber {
    pub fn format(year: i32, sequence: u32) -> Self {
        Self(format!("TR-{year}-{sequence:05}"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled | Self::Completed)
    }
}

/// The `(status, level, approver)` triple of a request. Only produced by
/// [`crate::approvals::transitions::transition`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub status: RequestStatus,
    pub level: u32,
    pub approver: Option<UserId>,
}

impl WorkflowSnapshot {
    pub fn draft() -> Self {
        Self { status: RequestStatus::Draft, level: 1, approver: None }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingRequest {
    pub id: RequestId,
    pub request_number: RequestNumber,
    pub requester: UserId,
    pub requester_entity: Option<EntityId>,
    pub course_id: CourseId,
    pub session_id: Option<SessionId>,
    pub justification: String,
    pub priority: Priority,
    pub estimated_cost: Decimal,
    pub workflow: WorkflowSnapshot,
    pub submitted_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrainingRequest {
    pub fn status(&self) -> RequestStatus {
        self.workflow.status
    }

    pub fn current_approval_level(&self) -> u32 {
        self.workflow.level
    }

    pub fn current_approver(&self) -> Option<&UserId> {
        self.workflow.approver.as_ref()
    }
}
