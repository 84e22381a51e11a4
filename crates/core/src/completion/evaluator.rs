use rust_decimal::Decimal;
use tracing::info;

use crate::audit::{AuditBatch, AuditContext, AuditRecorder};
use crate::completion::rules::{evaluate, AttendanceRecord, CompletionPolicy, Verdict};
use crate::domain::course::CourseId;
use crate::domain::enrollment::{
    CompletionSource, CompletionStatus, EnrollmentId, EnrollmentStatus, Finalization,
    SessionEnrollment,
};
use crate::domain::session::SessionStatus;
use crate::enrollment::roster::{record_enrollment_changes, record_session_changes, SessionRoster};
use crate::errors::{StateConflict, WorkflowError};
use crate::notification::{CertificateRequest, NotificationRequest, NotificationType, SideEffect};

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionOutcome {
    pub roster: SessionRoster,
    pub changed: Vec<EnrollmentId>,
    pub effects: Vec<SideEffect>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CompletionRuleEvaluator;

impl CompletionRuleEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        enrollment: &SessionEnrollment,
        expected_minutes: u32,
        policy: &CompletionPolicy,
    ) -> Verdict {
        let record = AttendanceRecord {
            status: enrollment.status,
            attended_minutes: enrollment.attended_minutes,
            expected_minutes,
        };
        evaluate(&record, enrollment.score, policy)
    }

    /// Re-evaluates every participant whose completion is neither finalized nor
    /// manually overridden.
    pub fn apply_to_session<R>(
        &self,
        mut roster: SessionRoster,
        policy: &CompletionPolicy,
        context: &AuditContext,
        recorder: &R,
    ) -> Result<CompletionOutcome, WorkflowError>
    where
        R: AuditRecorder + ?Sized,
    {
        let expected_minutes = roster.session.expected_minutes;
        let mut batch = AuditBatch::new(context);
        let mut changed = Vec::new();

        for row in roster.enrollments.iter_mut() {
            if !row.is_participant()
                || row.is_completion_final()
                || row.completion_source == Some(CompletionSource::Override)
            {
                continue;
            }
            let verdict = self.evaluate(row, expected_minutes, policy);
            if verdict.status == row.completion_status && verdict.passed == row.passed {
                continue;
            }

            let before = row.clone();
            row.completion_status = verdict.status;
            row.passed = verdict.passed;
            row.completion_source = Some(CompletionSource::Evaluator);
            row.updated_at = context.at;
            record_enrollment_changes(&mut batch, &before, row);
            changed.push(row.id.clone());
        }
        batch.flush(recorder);

        info!(
            event_name = "workflow.completion.evaluated",
            correlation_id = %context.correlation_id,
            session_id = %roster.session.id,
            changed = changed.len(),
            "completion rules applied"
        );
        Ok(CompletionOutcome { roster, changed, effects: Vec::new() })
    }

    pub fn record_attendance<R>(
        &self,
        mut roster: SessionRoster,
        enrollment_id: &EnrollmentId,
        status: EnrollmentStatus,
        attended_minutes: u32,
        context: &AuditContext,
        recorder: &R,
    ) -> Result<CompletionOutcome, WorkflowError>
    where
        R: AuditRecorder + ?Sized,
    {
        if !status.occupies_seat() {
            return Err(WorkflowError::validation(format!(
                "`{}` is not an attendance outcome (expected confirmed, completed, partial or absent)",
                status.as_str()
            )));
        }
        if roster.session.status == SessionStatus::Cancelled {
            return Err(session_state(&roster, "record attendance"));
        }

        let index = roster.index_of(enrollment_id)?;
        let row = &mut roster.enrollments[index];
        require_participant(row, "record attendance")?;
        if row.is_attendance_final() || row.is_completion_final() {
            return Err(StateConflict::AttendanceLocked { enrollment_id: row.id.0.clone() }.into());
        }

        let before = row.clone();
        row.status = status;
        row.attended_minutes = if status == EnrollmentStatus::Absent { 0 } else { attended_minutes };
        row.updated_at = context.at;

        let mut batch = AuditBatch::new(context);
        record_enrollment_changes(&mut batch, &before, row);
        roster.recount();
        batch.flush(recorder);

        Ok(CompletionOutcome { roster, changed: vec![enrollment_id.clone()], effects: Vec::new() })
    }

    pub fn record_score<R>(
        &self,
        mut roster: SessionRoster,
        enrollment_id: &EnrollmentId,
        score: Option<Decimal>,
        context: &AuditContext,
        recorder: &R,
    ) -> Result<CompletionOutcome, WorkflowError>
    where
        R: AuditRecorder + ?Sized,
    {
        if score.is_some_and(|score| score < Decimal::ZERO) {
            return Err(WorkflowError::validation("score cannot be negative"));
        }

        let index = roster.index_of(enrollment_id)?;
        let row = &mut roster.enrollments[index];
        require_participant(row, "record score")?;
        if row.is_completion_final() {
            return Err(StateConflict::AlreadyFinalized { scope: "completion", id: row.id.0.clone() }
                .into());
        }

        let before = row.clone();
        row.score = score;
        row.updated_at = context.at;

        let mut batch = AuditBatch::new(context);
        record_enrollment_changes(&mut batch, &before, row);
        batch.flush(recorder);

        Ok(CompletionOutcome { roster, changed: vec![enrollment_id.clone()], effects: Vec::new() })
    }

    pub fn finalize_attendance<R>(
        &self,
        mut roster: SessionRoster,
        context: &AuditContext,
        recorder: &R,
    ) -> Result<CompletionOutcome, WorkflowError>
    where
        R: AuditRecorder + ?Sized,
    {
        if roster.participants().any(SessionEnrollment::is_attendance_final) {
            return Err(StateConflict::AlreadyFinalized {
                scope: "attendance",
                id: roster.session.id.0.clone(),
            }
            .into());
        }

        let mut batch = AuditBatch::new(context);
        let mut changed = Vec::new();
        for row in roster.enrollments.iter_mut().filter(|row| row.is_participant()) {
            let before = row.clone();
            row.attendance_final = Some(Finalization { by: context.actor.clone(), at: context.at });
            row.updated_at = context.at;
            record_enrollment_changes(&mut batch, &before, row);
            changed.push(row.id.clone());
        }
        batch.flush(recorder);

        info!(
            event_name = "workflow.attendance.finalized",
            correlation_id = %context.correlation_id,
            session_id = %roster.session.id,
            locked = changed.len(),
            "attendance finalized"
        );
        Ok(CompletionOutcome { roster, changed, effects: Vec::new() })
    }

    /// Locks completion for every participant. Refuses while any participant still
    /// lacks a conclusive result.
    pub fn finalize<R>(
        &self,
        mut roster: SessionRoster,
        course_id: &CourseId,
        context: &AuditContext,
        recorder: &R,
    ) -> Result<CompletionOutcome, WorkflowError>
    where
        R: AuditRecorder + ?Sized,
    {
        // A completed session stays locked even when it had no participants.
        if roster.session.status == SessionStatus::Completed
            || roster.participants().any(SessionEnrollment::is_completion_final)
        {
            return Err(StateConflict::AlreadyFinalized {
                scope: "completion",
                id: roster.session.id.0.clone(),
            }
            .into());
        }
        if roster.session.status == SessionStatus::Cancelled {
            return Err(session_state(&roster, "finalize"));
        }

        let unresolved: Vec<String> = roster
            .participants()
            .filter(|row| !row.completion_status.is_conclusive())
            .map(|row| row.id.0.clone())
            .collect();
        if !unresolved.is_empty() {
            return Err(StateConflict::CompletionIncomplete {
                session_id: roster.session.id.0.clone(),
                enrollment_ids: unresolved,
            }
            .into());
        }

        let stamp = Finalization { by: context.actor.clone(), at: context.at };
        let mut batch = AuditBatch::new(context);
        let mut changed = Vec::new();
        let mut effects = Vec::new();
        for row in roster.enrollments.iter_mut().filter(|row| row.is_participant()) {
            let before = row.clone();
            row.completion_final = Some(stamp.clone());
            if row.attendance_final.is_none() {
                row.attendance_final = Some(stamp.clone());
            }
            row.updated_at = context.at;
            record_enrollment_changes(&mut batch, &before, row);
            changed.push(row.id.clone());

            if row.completion_status == CompletionStatus::Completed && row.passed == Some(true) {
                effects.push(SideEffect::Notify(
                    NotificationRequest::new(
                        row.participant.clone(),
                        NotificationType::TrainingCompleted,
                        "Training completed",
                        format!("You have completed \"{}\"", roster.session.title),
                    )
                    .referencing("enrollment", row.id.0.clone()),
                ));
                effects.push(SideEffect::IssueCertificate(CertificateRequest {
                    enrollment_id: row.id.clone(),
                    participant: row.participant.clone(),
                    course_id: course_id.clone(),
                }));
            }
        }

        let session_before = roster.session.clone();
        roster.session.status = SessionStatus::Completed;
        record_session_changes(&mut batch, &session_before, &roster.session);
        batch.flush(recorder);

        info!(
            event_name = "workflow.completion.finalized",
            correlation_id = %context.correlation_id,
            session_id = %roster.session.id,
            locked = changed.len(),
            certificates = effects.len() / 2,
            "completion finalized"
        );
        Ok(CompletionOutcome { roster, changed, effects })
    }

    /// Manual correction. The reason is mandatory and the audit entries are written
    /// before the enrollment changes.
    pub fn override_completion<R>(
        &self,
        mut roster: SessionRoster,
        enrollment_id: &EnrollmentId,
        status: CompletionStatus,
        reason: &str,
        context: &AuditContext,
        recorder: &R,
    ) -> Result<CompletionOutcome, WorkflowError>
    where
        R: AuditRecorder + ?Sized,
    {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(WorkflowError::validation("a reason is required to override completion"));
        }
        if status == CompletionStatus::NotEvaluated {
            return Err(WorkflowError::validation("completion cannot be reset to not_evaluated"));
        }

        let index = roster.index_of(enrollment_id)?;
        let row = &mut roster.enrollments[index];
        require_participant(row, "override completion")?;

        let verdict = Verdict::for_status(status);
        let mut after = row.clone();
        after.completion_status = verdict.status;
        after.passed = verdict.passed;
        after.completion_source = Some(CompletionSource::Override);
        after.updated_at = context.at;

        let mut batch = AuditBatch::new(context);
        record_enrollment_changes(&mut batch, row, &after);
        if batch.is_empty() {
            return Err(WorkflowError::validation(format!(
                "enrollment `{}` already has completion `{}`",
                row.id,
                status.as_str()
            )));
        }
        batch.with_reason(reason);
        batch.flush(recorder);
        *row = after;

        info!(
            event_name = "workflow.completion.overridden",
            correlation_id = %context.correlation_id,
            enrollment_id = %enrollment_id,
            status = status.as_str(),
            "completion overridden"
        );
        Ok(CompletionOutcome { roster, changed: vec![enrollment_id.clone()], effects: Vec::new() })
    }
}

fn require_participant(row: &SessionEnrollment, action: &'static str) -> Result<(), WorkflowError> {
    if row.is_participant() {
        Ok(())
    } else {
        Err(StateConflict::InvalidState {
            entity: "enrollment",
            id: row.id.0.clone(),
            state: row.status.as_str().to_owned(),
            action,
        }
        .into())
    }
}

fn session_state(roster: &SessionRoster, action: &'static str) -> WorkflowError {
    StateConflict::InvalidState {
        entity: "session",
        id: roster.session.id.0.clone(),
        state: roster.session.status.as_str().to_owned(),
        action,
    }
    .into()
}
