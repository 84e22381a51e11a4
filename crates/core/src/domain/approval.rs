use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::request::RequestId;
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl std::fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Delegated,
    Cancelled,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Delegated => "delegated",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "delegated" => Some(Self::Delegated),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// One step of an approval chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverRole {
    Manager,
    Hrbp,
    LearningAndDevelopment,
    Chro,
}

impl ApproverRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Hrbp => "hrbp",
            Self::LearningAndDevelopment => "learning_and_development",
            Self::Chro => "chro",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "manager" => Some(Self::Manager),
            "hrbp" => Some(Self::Hrbp),
            "learning_and_development" | "l&d" | "lnd" => Some(Self::LearningAndDevelopment),
            "chro" => Some(Self::Chro),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Manager => "Manager",
            Self::Hrbp => "HRBP",
            Self::LearningAndDevelopment => "L&D",
            Self::Chro => "CHRO",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub request_id: RequestId,
    pub approver: UserId,
    pub level: u32,
    pub role: ApproverRole,
    pub status: ApprovalStatus,
    pub comments: Option<String>,
    pub delegated_from: Option<ApprovalId>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Approval {
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
}
