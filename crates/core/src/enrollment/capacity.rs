use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditBatch, AuditContext, AuditRecorder};
use crate::domain::enrollment::{EnrollmentId, EnrollmentStatus, SessionEnrollment};
use crate::domain::session::SessionStatus;
use crate::domain::user::UserId;
use crate::enrollment::roster::{
    record_enrollment_changes, record_new_enrollment, record_session_changes, SessionRoster,
};
use crate::enrollment::waitlist::Waitlist;
use crate::errors::{StateConflict, WorkflowError};
use crate::notification::{NotificationRequest, NotificationType, SideEffect};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub enrollment_id: EnrollmentId,
    pub participant: UserId,
    pub status: EnrollmentStatus,
    pub waitlist_position: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RosterOutcome {
    pub roster: SessionRoster,
    pub placements: Vec<Placement>,
    pub promoted: Vec<EnrollmentId>,
    pub effects: Vec<SideEffect>,
}

/// Seats and waitlist of a session. Counters are recomputed from the rows after
/// every mutation; callers persist the returned roster as one unit.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnrollmentCapacityManager;

impl EnrollmentCapacityManager {
    pub fn new() -> Self {
        Self
    }

    pub fn enroll<R>(
        &self,
        roster: SessionRoster,
        participant: UserId,
        context: &AuditContext,
        recorder: &R,
    ) -> Result<RosterOutcome, WorkflowError>
    where
        R: AuditRecorder + ?Sized,
    {
        self.enroll_batch(roster, &[participant], context, recorder)
    }

    /// Places participants in input order. All or nothing: one duplicate fails the batch.
    pub fn enroll_batch<R>(
        &self,
        mut roster: SessionRoster,
        participants: &[UserId],
        context: &AuditContext,
        recorder: &R,
    ) -> Result<RosterOutcome, WorkflowError>
    where
        R: AuditRecorder + ?Sized,
    {
        if !roster.session.status.accepts_enrollment() {
            return Err(StateConflict::InvalidState {
                entity: "session",
                id: roster.session.id.0.clone(),
                state: roster.session.status.as_str().to_owned(),
                action: "enroll",
            }
            .into());
        }
        if roster.session.capacity == 0 {
            return Err(WorkflowError::validation(format!(
                "session `{}` has no seats; capacity must be at least one",
                roster.session.id
            )));
        }
        if participants.is_empty() {
            return Err(WorkflowError::validation("at least one participant is required"));
        }

        roster.recount();
        let before = roster.session.clone();
        let mut batch = AuditBatch::new(context);
        let mut placements = Vec::with_capacity(participants.len());
        let mut effects = Vec::new();

        for participant in participants {
            if participant.0.trim().is_empty() {
                return Err(WorkflowError::validation("participant id cannot be blank"));
            }
            if roster.active_for(participant).is_some() {
                return Err(StateConflict::DuplicateEnrollment {
                    session_id: roster.session.id.0.clone(),
                    participant: participant.0.clone(),
                }
                .into());
            }

            let row = SessionEnrollment::new(
                EnrollmentId(Uuid::new_v4().to_string()),
                roster.session.id.clone(),
                participant.clone(),
                EnrollmentStatus::Confirmed,
                None,
                context.at,
            );
            let seat_free = roster.has_free_seat();
            roster.enrollments.push(row);
            let index = roster.enrollments.len() - 1;
            if !seat_free {
                Waitlist::new(&mut roster.enrollments).insert_at_end(index);
            }
            roster.recount();

            let row = &roster.enrollments[index];
            record_new_enrollment(&mut batch, row);
            if row.status == EnrollmentStatus::Confirmed {
                effects.push(enrollment_confirmed(row, false));
            }
            placements.push(Placement {
                enrollment_id: row.id.clone(),
                participant: row.participant.clone(),
                status: row.status,
                waitlist_position: row.waitlist_position,
            });
        }

        record_session_changes(&mut batch, &before, &roster.session);
        batch.flush(recorder);

        info!(
            event_name = "workflow.enrollment.placed",
            correlation_id = %context.correlation_id,
            session_id = %roster.session.id,
            placed = placements.len(),
            enrolled_count = roster.session.enrolled_count,
            waitlist_count = roster.session.waitlist_count,
            "participants enrolled"
        );
        Ok(RosterOutcome { roster, placements, promoted: Vec::new(), effects })
    }

    pub fn cancel<R>(
        &self,
        mut roster: SessionRoster,
        enrollment_id: &EnrollmentId,
        reason: Option<String>,
        context: &AuditContext,
        recorder: &R,
    ) -> Result<RosterOutcome, WorkflowError>
    where
        R: AuditRecorder + ?Sized,
    {
        let index = roster.index_of(enrollment_id)?;
        let current = roster.enrollments[index].status;
        if !matches!(current, EnrollmentStatus::Confirmed | EnrollmentStatus::Waitlisted) {
            return Err(StateConflict::InvalidState {
                entity: "enrollment",
                id: enrollment_id.0.clone(),
                state: current.as_str().to_owned(),
                action: "cancel",
            }
            .into());
        }

        roster.recount();
        let before_session = roster.session.clone();
        let before_rows = roster.enrollments.clone();

        {
            let row = &mut roster.enrollments[index];
            row.status = EnrollmentStatus::Cancelled;
            row.waitlist_position = None;
            row.cancellation_reason =
                reason.map(|reason| reason.trim().to_owned()).filter(|reason| !reason.is_empty());
            row.cancelled_at = Some(context.at);
            row.updated_at = context.at;
        }
        roster.recount();

        let mut promoted = Vec::new();
        while roster.has_free_seat() {
            let Some(head) = Waitlist::new(&mut roster.enrollments).pop_front() else {
                break;
            };
            let row = &mut roster.enrollments[head];
            row.status = EnrollmentStatus::Confirmed;
            row.updated_at = context.at;
            promoted.push(head);
            roster.recount();
        }
        Waitlist::new(&mut roster.enrollments).renumber();

        let mut batch = AuditBatch::new(context);
        for (before, after) in before_rows.iter().zip(&roster.enrollments) {
            record_enrollment_changes(&mut batch, before, after);
        }
        record_session_changes(&mut batch, &before_session, &roster.session);
        batch.flush(recorder);

        let effects =
            promoted.iter().map(|index| enrollment_confirmed(&roster.enrollments[*index], true)).collect();
        let promoted: Vec<EnrollmentId> =
            promoted.into_iter().map(|index| roster.enrollments[index].id.clone()).collect();
        for id in &promoted {
            info!(
                event_name = "workflow.enrollment.promoted",
                correlation_id = %context.correlation_id,
                session_id = %roster.session.id,
                enrollment_id = %id,
                "waitlisted participant promoted"
            );
        }
        info!(
            event_name = "workflow.enrollment.cancelled",
            correlation_id = %context.correlation_id,
            session_id = %roster.session.id,
            enrollment_id = %enrollment_id,
            enrolled_count = roster.session.enrolled_count,
            waitlist_count = roster.session.waitlist_count,
            "enrollment cancelled"
        );
        Ok(RosterOutcome { roster, placements: Vec::new(), promoted, effects })
    }

    /// Cancels the session and every active enrollment in it.
    pub fn cancel_session<R>(
        &self,
        mut roster: SessionRoster,
        reason: Option<String>,
        context: &AuditContext,
        recorder: &R,
    ) -> Result<RosterOutcome, WorkflowError>
    where
        R: AuditRecorder + ?Sized,
    {
        let status = roster.session.status;
        if matches!(status, SessionStatus::Completed | SessionStatus::Cancelled) {
            return Err(StateConflict::InvalidState {
                entity: "session",
                id: roster.session.id.0.clone(),
                state: status.as_str().to_owned(),
                action: "cancel",
            }
            .into());
        }

        roster.recount();
        let before_session = roster.session.clone();
        let before_rows = roster.enrollments.clone();
        let reason = reason.map(|reason| reason.trim().to_owned()).filter(|reason| !reason.is_empty());

        roster.session.status = SessionStatus::Cancelled;
        let mut effects = Vec::new();
        for row in roster.enrollments.iter_mut().filter(|row| {
            matches!(row.status, EnrollmentStatus::Confirmed | EnrollmentStatus::Waitlisted)
        }) {
            row.status = EnrollmentStatus::Cancelled;
            row.waitlist_position = None;
            row.cancellation_reason = reason.clone();
            row.cancelled_at = Some(context.at);
            row.updated_at = context.at;
            effects.push(SideEffect::Notify(
                NotificationRequest::new(
                    row.participant.clone(),
                    NotificationType::SessionCancelled,
                    "Session cancelled",
                    format!("The session \"{}\" has been cancelled", roster.session.title),
                )
                .referencing("session", roster.session.id.0.clone()),
            ));
        }
        roster.recount();

        let mut batch = AuditBatch::new(context);
        for (before, after) in before_rows.iter().zip(&roster.enrollments) {
            record_enrollment_changes(&mut batch, before, after);
        }
        record_session_changes(&mut batch, &before_session, &roster.session);
        if let Some(reason) = reason.as_deref() {
            batch.with_reason(reason);
        }
        batch.flush(recorder);

        info!(
            event_name = "workflow.session.cancelled",
            correlation_id = %context.correlation_id,
            session_id = %roster.session.id,
            notified = effects.len(),
            "session cancelled"
        );
        Ok(RosterOutcome { roster, placements: Vec::new(), promoted: Vec::new(), effects })
    }
}

fn enrollment_confirmed(row: &SessionEnrollment, from_waitlist: bool) -> SideEffect {
    let message = if from_waitlist {
        "A seat became available: you have been moved from the waitlist to confirmed"
    } else {
        "Your seat in the session is confirmed"
    };
    SideEffect::Notify(
        NotificationRequest::new(
            row.participant.clone(),
            NotificationType::EnrollmentConfirmed,
            "Enrollment confirmed",
            message,
        )
        .referencing("enrollment", row.id.0.clone()),
    )
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::audit::{AuditContext, AuditEntity, InMemoryAuditRecorder};
    use crate::domain::course::CourseId;
    use crate::domain::enrollment::{EnrollmentStatus, SessionEnrollment};
    use crate::domain::session::{Session, SessionId, SessionStatus};
    use crate::domain::user::UserId;
    use crate::enrollment::capacity::EnrollmentCapacityManager;
    use crate::enrollment::roster::SessionRoster;
    use crate::errors::{StateConflict, WorkflowError};
    use crate::notification::NotificationType;

    fn context() -> AuditContext {
        AuditContext::new(UserId::new("lnd-admin"), "corr-enroll")
            .at(Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap())
    }

    fn roster(capacity: u32) -> SessionRoster {
        SessionRoster::new(
            Session {
                id: SessionId("s-1".to_owned()),
                course_id: CourseId("c-1".to_owned()),
                title: "Rust for services".to_owned(),
                capacity,
                enrolled_count: 0,
                waitlist_count: 0,
                status: SessionStatus::Open,
                expected_minutes: 480,
                starts_at: None,
                version: 1,
            },
            Vec::new(),
        )
    }

    fn users(ids: &[&str]) -> Vec<UserId> {
        ids.iter().map(|id| UserId::new(*id)).collect()
    }

    fn row_of<'a>(roster: &'a SessionRoster, participant: &str) -> &'a SessionEnrollment {
        roster
            .enrollments
            .iter()
            .find(|row| row.participant == UserId::new(participant))
            .expect("participant row")
    }

    #[test]
    fn third_participant_lands_on_the_waitlist() {
        let manager = EnrollmentCapacityManager::new();
        let outcome = manager
            .enroll_batch(roster(2), &users(&["p1", "p2", "p3"]), &context(), &InMemoryAuditRecorder::default())
            .expect("enroll");

        let statuses: Vec<_> = outcome.placements.iter().map(|p| (p.status, p.waitlist_position)).collect();
        assert_eq!(
            statuses,
            vec![
                (EnrollmentStatus::Confirmed, None),
                (EnrollmentStatus::Confirmed, None),
                (EnrollmentStatus::Waitlisted, Some(1)),
            ]
        );
        assert_eq!(outcome.roster.session.enrolled_count, 2);
        assert_eq!(outcome.roster.session.waitlist_count, 1);
        assert_eq!(outcome.effects.len(), 2);
        assert!(outcome.roster.invariant_violations().is_empty());
    }

    #[test]
    fn seatless_session_refuses_enrollment_instead_of_waitlisting() {
        let manager = EnrollmentCapacityManager::new();
        let recorder = InMemoryAuditRecorder::default();

        let error = manager
            .enroll(roster(0), UserId::new("p1"), &context(), &recorder)
            .expect_err("no seats");

        assert!(matches!(error, WorkflowError::Validation { ref message } if message.contains("capacity")));
        assert!(recorder.entries().is_empty());
    }

    #[test]
    fn cancelling_a_confirmed_seat_promotes_the_head_of_the_waitlist() {
        let manager = EnrollmentCapacityManager::new();
        let roster = manager
            .enroll_batch(roster(2), &users(&["p1", "p2", "p3", "p4"]), &context(), &InMemoryAuditRecorder::default())
            .expect("enroll")
            .roster;
        let p1 = row_of(&roster, "p1").id.clone();
        let recorder = InMemoryAuditRecorder::default();

        let outcome = manager
            .cancel(roster, &p1, Some("schedule clash".to_owned()), &context(), &recorder)
            .expect("cancel");

        let roster = &outcome.roster;
        assert_eq!(row_of(roster, "p1").status, EnrollmentStatus::Cancelled);
        assert_eq!(row_of(roster, "p1").cancellation_reason.as_deref(), Some("schedule clash"));
        assert_eq!(row_of(roster, "p3").status, EnrollmentStatus::Confirmed);
        assert_eq!(row_of(roster, "p3").waitlist_position, None);
        assert_eq!(row_of(roster, "p4").waitlist_position, Some(1));
        assert_eq!(roster.session.enrolled_count, 2);
        assert_eq!(roster.session.waitlist_count, 1);
        assert!(roster.invariant_violations().is_empty());

        assert_eq!(outcome.promoted, vec![row_of(roster, "p3").id.clone()]);
        let notice = outcome.effects[0].notification().expect("notice");
        assert_eq!(notice.kind, NotificationType::EnrollmentConfirmed);
        assert_eq!(notice.user_id, UserId::new("p3"));

        let session_fields: Vec<_> = recorder
            .entries()
            .into_iter()
            .filter(|entry| entry.entity == AuditEntity::Session)
            .map(|entry| entry.field)
            .collect();
        assert_eq!(session_fields, vec!["waitlist_count".to_owned()]);
    }

    #[test]
    fn promotion_follows_waitlist_order() {
        let manager = EnrollmentCapacityManager::new();
        let mut roster = manager
            .enroll_batch(roster(1), &users(&["seat", "a", "b"]), &context(), &InMemoryAuditRecorder::default())
            .expect("enroll")
            .roster;

        let seat = row_of(&roster, "seat").id.clone();
        roster = manager
            .cancel(roster, &seat, None, &context(), &InMemoryAuditRecorder::default())
            .expect("cancel seat")
            .roster;
        assert_eq!(row_of(&roster, "a").status, EnrollmentStatus::Confirmed);
        assert_eq!(row_of(&roster, "b").status, EnrollmentStatus::Waitlisted);
    }

    #[test]
    fn cancelling_a_waitlisted_row_keeps_positions_contiguous() {
        let manager = EnrollmentCapacityManager::new();
        let roster = manager
            .enroll_batch(roster(1), &users(&["seat", "w1", "w2", "w3"]), &context(), &InMemoryAuditRecorder::default())
            .expect("enroll")
            .roster;
        let w2 = row_of(&roster, "w2").id.clone();

        let outcome = manager
            .cancel(roster, &w2, None, &context(), &InMemoryAuditRecorder::default())
            .expect("cancel");

        assert!(outcome.promoted.is_empty());
        assert_eq!(row_of(&outcome.roster, "w1").waitlist_position, Some(1));
        assert_eq!(row_of(&outcome.roster, "w3").waitlist_position, Some(2));
        assert_eq!(outcome.roster.session.waitlist_count, 2);
        assert!(outcome.roster.invariant_violations().is_empty());
    }

    #[test]
    fn duplicate_enrollment_fails_the_whole_batch() {
        let manager = EnrollmentCapacityManager::new();
        let roster = manager
            .enroll(roster(5), UserId::new("p1"), &context(), &InMemoryAuditRecorder::default())
            .expect("enroll")
            .roster;
        let recorder = InMemoryAuditRecorder::default();

        let error = manager
            .enroll_batch(roster, &users(&["p2", "p1"]), &context(), &recorder)
            .expect_err("p1 already enrolled");

        assert!(matches!(
            error,
            WorkflowError::Conflict(StateConflict::DuplicateEnrollment { ref participant, .. })
                if participant == "p1"
        ));
        assert!(recorder.entries().is_empty());
    }

    #[test]
    fn cancelled_participant_may_enroll_again() {
        let manager = EnrollmentCapacityManager::new();
        let roster = manager
            .enroll(roster(1), UserId::new("p1"), &context(), &InMemoryAuditRecorder::default())
            .expect("enroll")
            .roster;
        let first = row_of(&roster, "p1").id.clone();
        let roster = manager
            .cancel(roster, &first, None, &context(), &InMemoryAuditRecorder::default())
            .expect("cancel")
            .roster;

        let outcome = manager
            .enroll(roster, UserId::new("p1"), &context(), &InMemoryAuditRecorder::default())
            .expect("re-enroll");
        assert_eq!(outcome.placements[0].status, EnrollmentStatus::Confirmed);
        assert_eq!(outcome.roster.enrollments.len(), 2);
    }

    #[test]
    fn closed_sessions_reject_enrollment_and_cancelled_rows_cannot_be_cancelled() {
        let manager = EnrollmentCapacityManager::new();
        let mut closed = roster(3);
        closed.session.status = SessionStatus::InProgress;
        let error = manager
            .enroll(closed, UserId::new("p1"), &context(), &InMemoryAuditRecorder::default())
            .expect_err("in progress");
        assert!(matches!(error, WorkflowError::Conflict(StateConflict::InvalidState { .. })));

        let roster = manager
            .enroll(roster(3), UserId::new("p1"), &context(), &InMemoryAuditRecorder::default())
            .expect("enroll")
            .roster;
        let id = row_of(&roster, "p1").id.clone();
        let roster = manager
            .cancel(roster, &id, None, &context(), &InMemoryAuditRecorder::default())
            .expect("cancel")
            .roster;
        let again = manager.cancel(roster, &id, None, &context(), &InMemoryAuditRecorder::default());
        assert!(matches!(again, Err(WorkflowError::Conflict(StateConflict::InvalidState { .. }))));
    }

    #[test]
    fn cancelling_the_session_releases_every_seat() {
        let manager = EnrollmentCapacityManager::new();
        let roster = manager
            .enroll_batch(roster(2), &users(&["p1", "p2", "p3"]), &context(), &InMemoryAuditRecorder::default())
            .expect("enroll")
            .roster;

        let outcome = manager
            .cancel_session(roster, Some("trainer unavailable".to_owned()), &context(), &InMemoryAuditRecorder::default())
            .expect("cancel session");

        assert_eq!(outcome.roster.session.status, SessionStatus::Cancelled);
        assert_eq!(outcome.roster.session.enrolled_count, 0);
        assert_eq!(outcome.roster.session.waitlist_count, 0);
        assert!(outcome.roster.enrollments.iter().all(|row| row.status == EnrollmentStatus::Cancelled));
        assert_eq!(outcome.effects.len(), 3);
        assert!(outcome
            .effects
            .iter()
            .all(|effect| effect.notification().map(|n| n.kind) == Some(NotificationType::SessionCancelled)));
        assert!(outcome.roster.invariant_violations().is_empty());
    }
}
