use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourseId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingLocation {
    Internal,
    Domestic,
    Abroad,
    Online,
}

impl TrainingLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Domestic => "domestic",
            Self::Abroad => "abroad",
            Self::Online => "online",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "internal" => Some(Self::Internal),
            "domestic" | "local" => Some(Self::Domestic),
            "abroad" | "international" => Some(Self::Abroad),
            "online" => Some(Self::Online),
            _ => None,
        }
    }
}

/// Ordered so that policy thresholds can compare with `>=`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl CostLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "very_high" | "very-high" => Some(Self::VeryHigh),
            _ => None,
        }
    }
}

impl std::str::FromStr for CostLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| {
            format!("unsupported cost level `{value}` (expected low|medium|high|very_high)")
        })
    }
}

/// Per-course policy fields consumed by the workflow engine. Read-only from its perspective.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoursePolicy {
    pub id: CourseId,
    pub title: String,
    pub training_location: TrainingLocation,
    pub cost_level: CostLevel,
    pub min_attendance_percent: Decimal,
    pub pass_score: Decimal,
    pub has_assessment: bool,
    pub require_both_attendance_and_assessment: bool,
}
