use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::course::CoursePolicy;
use crate::domain::enrollment::{CompletionStatus, EnrollmentStatus};

/// Completion thresholds of one course.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionPolicy {
    pub min_attendance_percent: Decimal,
    pub pass_score: Decimal,
    pub has_assessment: bool,
    pub require_both_attendance_and_assessment: bool,
}

impl From<&CoursePolicy> for CompletionPolicy {
    fn from(course: &CoursePolicy) -> Self {
        Self {
            min_attendance_percent: course.min_attendance_percent,
            pass_score: course.pass_score,
            has_assessment: course.has_assessment,
            require_both_attendance_and_assessment: course.require_both_attendance_and_assessment,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub status: EnrollmentStatus,
    pub attended_minutes: u32,
    pub expected_minutes: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: CompletionStatus,
    pub passed: Option<bool>,
}

impl Verdict {
    const COMPLETED: Self = Self { status: CompletionStatus::Completed, passed: Some(true) };
    const NOT_COMPLETED: Self = Self { status: CompletionStatus::NotCompleted, passed: Some(false) };
    const FAILED: Self = Self { status: CompletionStatus::Failed, passed: Some(false) };
    const PENDING: Self = Self { status: CompletionStatus::Pending, passed: None };

    /// The `passed` value a given status implies; used to validate manual overrides.
    pub fn for_status(status: CompletionStatus) -> Self {
        match status {
            CompletionStatus::Completed => Self::COMPLETED,
            CompletionStatus::NotCompleted => Self::NOT_COMPLETED,
            CompletionStatus::Failed => Self::FAILED,
            CompletionStatus::Pending => Self::PENDING,
            CompletionStatus::NotEvaluated => Self { status, passed: None },
        }
    }
}

/// Partial attendance counts only against a known planned duration.
fn attendance_met(record: &AttendanceRecord, policy: &CompletionPolicy) -> bool {
    match record.status {
        EnrollmentStatus::Confirmed | EnrollmentStatus::Completed => true,
        EnrollmentStatus::Partial => {
            if record.expected_minutes == 0 {
                return false;
            }
            let attended = Decimal::from(record.attended_minutes) * Decimal::ONE_HUNDRED;
            let required = policy.min_attendance_percent * Decimal::from(record.expected_minutes);
            attended >= required
        }
        EnrollmentStatus::Absent | EnrollmentStatus::Waitlisted | EnrollmentStatus::Cancelled => {
            false
        }
    }
}

/// Pure function of attendance, score and course policy.
pub fn evaluate(record: &AttendanceRecord, score: Option<Decimal>, policy: &CompletionPolicy) -> Verdict {
    if record.status == EnrollmentStatus::Absent {
        return Verdict::NOT_COMPLETED;
    }

    let attended = attendance_met(record, policy);
    let meets_assessment = score.map(|score| score >= policy.pass_score).unwrap_or(false);
    let scored_below = policy.has_assessment && score.is_some() && !meets_assessment;

    if policy.require_both_attendance_and_assessment {
        if attended && (!policy.has_assessment || meets_assessment) {
            Verdict::COMPLETED
        } else if !attended {
            Verdict::NOT_COMPLETED
        } else if scored_below {
            Verdict::FAILED
        } else {
            Verdict::PENDING
        }
    } else if attended || meets_assessment {
        Verdict::COMPLETED
    } else if scored_below {
        Verdict::FAILED
    } else {
        Verdict::PENDING
    }
}
