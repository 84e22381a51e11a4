use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::course::CourseId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Open,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Open => "open",
            Self::Confirmed => "confirmed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Some(Self::Scheduled),
            "open" => Some(Self::Open),
            "confirmed" => Some(Self::Confirmed),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn accepts_enrollment(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Open | Self::Confirmed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub course_id: CourseId,
    pub title: String,
    pub capacity: u32,
    pub enrolled_count: u32,
    pub waitlist_count: u32,
    pub status: SessionStatus,
    /// Planned duration; partial attendance is measured against it.
    pub expected_minutes: u32,
    pub starts_at: Option<DateTime<Utc>>,
    pub version: i64,
}
