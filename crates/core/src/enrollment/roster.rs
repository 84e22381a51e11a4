use serde::{Deserialize, Serialize};

use crate::audit::{AuditBatch, AuditEntity};
use crate::domain::enrollment::{EnrollmentId, EnrollmentStatus, SessionEnrollment};
use crate::domain::session::Session;
use crate::domain::user::UserId;
use crate::errors::WorkflowError;

/// A session and all of its enrollment rows, loaded together so that counters can be
/// derived from the rows instead of trusted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRoster {
    pub session: Session,
    pub enrollments: Vec<SessionEnrollment>,
}

impl SessionRoster {
    pub fn new(session: Session, enrollments: Vec<SessionEnrollment>) -> Self {
        let mut roster = Self { session, enrollments };
        roster.recount();
        roster
    }

    pub fn recount(&mut self) {
        let enrolled = self.enrollments.iter().filter(|row| row.status.occupies_seat()).count();
        let waitlisted = self
            .enrollments
            .iter()
            .filter(|row| row.status == EnrollmentStatus::Waitlisted)
            .count();
        self.session.enrolled_count = u32::try_from(enrolled).unwrap_or(u32::MAX);
        self.session.waitlist_count = u32::try_from(waitlisted).unwrap_or(u32::MAX);
    }

    pub fn enrollment(&self, id: &EnrollmentId) -> Option<&SessionEnrollment> {
        self.enrollments.iter().find(|row| &row.id == id)
    }

    pub fn active_for(&self, participant: &UserId) -> Option<&SessionEnrollment> {
        self.enrollments.iter().find(|row| &row.participant == participant && row.status.is_active())
    }

    pub fn participants(&self) -> impl Iterator<Item = &SessionEnrollment> {
        self.enrollments.iter().filter(|row| row.is_participant())
    }

    pub fn has_free_seat(&self) -> bool {
        self.session.enrolled_count < self.session.capacity
    }

    pub(crate) fn index_of(&self, id: &EnrollmentId) -> Result<usize, WorkflowError> {
        self.enrollments
            .iter()
            .position(|row| &row.id == id)
            .ok_or_else(|| WorkflowError::not_found("enrollment", id.0.clone()))
    }

    /// Every broken capacity or waitlist rule, empty when the roster is consistent.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let session = &self.session;

        if session.enrolled_count > session.capacity {
            violations.push(format!(
                "enrolled_count {} exceeds capacity {}",
                session.enrolled_count, session.capacity
            ));
        }

        let mut positions = Vec::new();
        for row in &self.enrollments {
            match (row.status, row.waitlist_position) {
                (EnrollmentStatus::Waitlisted, Some(position)) => positions.push(position),
                (EnrollmentStatus::Waitlisted, None) => {
                    violations.push(format!("waitlisted enrollment `{}` has no position", row.id))
                }
                (_, Some(_)) => violations
                    .push(format!("enrollment `{}` has a position but is not waitlisted", row.id)),
                (_, None) => {}
            }
        }
        positions.sort_unstable();
        let expected: Vec<u32> = (1..=session.waitlist_count).collect();
        if positions != expected {
            violations.push(format!("waitlist positions {positions:?} are not {expected:?}"));
        }

        let mut active: Vec<&UserId> =
            self.enrollments.iter().filter(|row| row.status.is_active()).map(|row| &row.participant).collect();
        let total = active.len();
        active.sort();
        active.dedup();
        if active.len() != total {
            violations.push("a participant holds more than one active enrollment".to_owned());
        }
        if total as u64 != u64::from(session.enrolled_count) + u64::from(session.waitlist_count) {
            violations.push(format!(
                "{total} active enrollments but counters say {} + {}",
                session.enrolled_count, session.waitlist_count
            ));
        }

        violations
    }
}

fn display<T: ToString>(value: Option<T>) -> Option<String> {
    value.map(|value| value.to_string())
}

pub(crate) fn record_new_enrollment(batch: &mut AuditBatch<'_>, row: &SessionEnrollment) {
    batch
        .event(
            AuditEntity::Enrollment,
            &row.id.0,
            "status",
            None,
            Some(row.status.as_str().to_owned()),
            None,
        )
        .change(
            AuditEntity::Enrollment,
            &row.id.0,
            "waitlist_position",
            None,
            display(row.waitlist_position),
        );
}

pub(crate) fn record_enrollment_changes(
    batch: &mut AuditBatch<'_>,
    before: &SessionEnrollment,
    after: &SessionEnrollment,
) {
    let id = after.id.0.as_str();
    batch
        .change(
            AuditEntity::Enrollment,
            id,
            "status",
            Some(before.status.as_str().to_owned()),
            Some(after.status.as_str().to_owned()),
        )
        .change(
            AuditEntity::Enrollment,
            id,
            "waitlist_position",
            display(before.waitlist_position),
            display(after.waitlist_position),
        )
        .change(
            AuditEntity::Enrollment,
            id,
            "attended_minutes",
            Some(before.attended_minutes.to_string()),
            Some(after.attended_minutes.to_string()),
        )
        .change(AuditEntity::Enrollment, id, "score", display(before.score), display(after.score))
        .change(
            AuditEntity::Enrollment,
            id,
            "completion_status",
            Some(before.completion_status.as_str().to_owned()),
            Some(after.completion_status.as_str().to_owned()),
        )
        .change(AuditEntity::Enrollment, id, "passed", display(before.passed), display(after.passed))
        .change(
            AuditEntity::Enrollment,
            id,
            "is_attendance_final",
            Some(before.is_attendance_final().to_string()),
            Some(after.is_attendance_final().to_string()),
        )
        .change(
            AuditEntity::Enrollment,
            id,
            "is_completion_final",
            Some(before.is_completion_final().to_string()),
            Some(after.is_completion_final().to_string()),
        )
        .change(
            AuditEntity::Enrollment,
            id,
            "cancellation_reason",
            before.cancellation_reason.clone(),
            after.cancellation_reason.clone(),
        );
}

pub(crate) fn record_session_changes(batch: &mut AuditBatch<'_>, before: &Session, after: &Session) {
    let id = after.id.0.as_str();
    batch
        .change(
            AuditEntity::Session,
            id,
            "status",
            Some(before.status.as_str().to_owned()),
            Some(after.status.as_str().to_owned()),
        )
        .change(
            AuditEntity::Session,
            id,
            "enrolled_count",
            Some(before.enrolled_count.to_string()),
            Some(after.enrolled_count.to_string()),
        )
        .change(
            AuditEntity::Session,
            id,
            "waitlist_count",
            Some(before.waitlist_count.to_string()),
            Some(after.waitlist_count.to_string()),
        );
}
