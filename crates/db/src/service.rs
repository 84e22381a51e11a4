use std::sync::Arc;

use chrono::Datelike;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{info, warn};
use uuid::Uuid;

use skillpath_core::approvals::{ApprovalRouter, BulkApprovalReport, RequestCase, RequestDraft};
use skillpath_core::audit::{AuditContext, AuditLogEntry, InMemoryAuditRecorder};
use skillpath_core::catalog::{CourseAttributes, RuleCatalog, WorkflowPolicy};
use skillpath_core::completion::{CompletionOutcome, CompletionPolicy, CompletionRuleEvaluator};
use skillpath_core::config::{AppConfig, MIN_POOL_CONNECTIONS};
use skillpath_core::domain::approval::{Approval, ApprovalId, Decision};
use skillpath_core::domain::course::{CourseId, CoursePolicy};
use skillpath_core::domain::enrollment::{CompletionStatus, EnrollmentId, EnrollmentStatus};
use skillpath_core::domain::request::{Priority, RequestId, RequestStatus, TrainingRequest};
use skillpath_core::domain::session::SessionId;
use skillpath_core::domain::user::UserId;
use skillpath_core::enrollment::{EnrollmentCapacityManager, RosterOutcome, SessionRoster};
use skillpath_core::errors::WorkflowError;
use skillpath_core::notification::{dispatch, CertificateIssuer, NotificationService, SideEffect};

use crate::repositories::{
    audit, course, request, session, AuditLogRepository, RepositoryError, SqlAuditLogRepository,
    SqlCertificateQueue, SqlDirectory, SqlNotificationOutbox,
};
use crate::DbPool;

/// Caller input for a new training request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewRequest {
    pub requester: UserId,
    pub course_id: CourseId,
    pub session_id: Option<SessionId>,
    pub justification: String,
    pub priority: Priority,
    pub estimated_cost: Decimal,
}

/// Result types of the roster engines, persisted the same way.
trait RosterChange {
    fn roster_mut(&mut self) -> &mut SessionRoster;
    fn effects(&self) -> &[SideEffect];
}

impl RosterChange for RosterOutcome {
    fn roster_mut(&mut self) -> &mut SessionRoster {
        &mut self.roster
    }

    fn effects(&self) -> &[SideEffect] {
        &self.effects
    }
}

impl RosterChange for CompletionOutcome {
    fn roster_mut(&mut self) -> &mut SessionRoster {
        &mut self.roster
    }

    fn effects(&self) -> &[SideEffect] {
        &self.effects
    }
}

fn store(error: sqlx::Error) -> WorkflowError {
    RepositoryError::from(error).into()
}

/// Runs every workflow operation as one SQLite transaction: load, run the engine,
/// write back with a version check, append the audit rows, commit. Side effects are
/// dispatched only after commit and never fail the operation.
///
/// Approver lookups go through a second pooled connection while the transaction is
/// open, so construction refuses a pool smaller than [`MIN_POOL_CONNECTIONS`].
pub struct WorkflowService {
    pool: DbPool,
    router: ApprovalRouter<SqlDirectory>,
    capacity: EnrollmentCapacityManager,
    completion: CompletionRuleEvaluator,
    notifier: Arc<dyn NotificationService>,
    issuer: Arc<dyn CertificateIssuer>,
}

impl WorkflowService {
    pub fn new(pool: DbPool, config: &AppConfig) -> Result<Self, WorkflowError> {
        Self::with_policy(pool, config.workflow.clone(), config.notifications.enabled)
    }

    pub fn with_policy(
        pool: DbPool,
        policy: WorkflowPolicy,
        notifications_enabled: bool,
    ) -> Result<Self, WorkflowError> {
        let max_connections = pool.options().get_max_connections();
        if max_connections < MIN_POOL_CONNECTIONS {
            return Err(WorkflowError::validation(format!(
                "workflow service needs a pool of at least {MIN_POOL_CONNECTIONS} connections, got {max_connections}"
            )));
        }

        Ok(Self {
            router: ApprovalRouter::new(RuleCatalog::new(policy), SqlDirectory::new(pool.clone())),
            capacity: EnrollmentCapacityManager::new(),
            completion: CompletionRuleEvaluator::new(),
            notifier: Arc::new(SqlNotificationOutbox::new(pool.clone(), notifications_enabled)),
            issuer: Arc::new(SqlCertificateQueue::new(pool.clone())),
            pool,
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationService>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_certificate_issuer(mut self, issuer: Arc<dyn CertificateIssuer>) -> Self {
        self.issuer = issuer;
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn create_draft(
        &self,
        input: NewRequest,
        context: &AuditContext,
    ) -> Result<TrainingRequest, WorkflowError> {
        let audit = InMemoryAuditRecorder::default();
        let mut tx = self.pool.begin().await.map_err(store)?;
        let request = self.insert_draft(&mut *tx, input, context, &audit).await?;
        commit(tx, &audit).await?;

        info!(
            event_name = "workflow.request.drafted",
            correlation_id = %context.correlation_id,
            request_id = %request.id,
            request_number = %request.request_number.0,
            "training request drafted"
        );
        Ok(request)
    }

    /// Creates and submits a request in one step.
    pub async fn submit_new(
        &self,
        input: NewRequest,
        context: &AuditContext,
    ) -> Result<RequestCase, WorkflowError> {
        let audit = InMemoryAuditRecorder::default();
        let mut tx = self.pool.begin().await.map_err(store)?;
        let draft = self.insert_draft(&mut *tx, input, context, &audit).await?;
        let (case, effects) = self.submit_loaded(&mut *tx, draft, context, &audit).await?;
        commit(tx, &audit).await?;
        self.dispatch(&effects, context).await;
        Ok(case)
    }

    pub async fn submit(
        &self,
        request_id: &RequestId,
        context: &AuditContext,
    ) -> Result<RequestCase, WorkflowError> {
        let audit = InMemoryAuditRecorder::default();
        let mut tx = self.pool.begin().await.map_err(store)?;
        let loaded = request::load_case(&mut *tx, request_id).await?;
        let (case, effects) = self.submit_loaded(&mut *tx, loaded.request, context, &audit).await?;
        commit(tx, &audit).await?;
        self.dispatch(&effects, context).await;
        Ok(case)
    }

    pub async fn decide(
        &self,
        approval_id: &ApprovalId,
        decision: Decision,
        comments: Option<String>,
        context: &AuditContext,
    ) -> Result<RequestCase, WorkflowError> {
        let audit = InMemoryAuditRecorder::default();
        let mut tx = self.pool.begin().await.map_err(store)?;
        let request_id = request::request_id_for_approval(&mut *tx, approval_id).await?;
        let case = request::load_case(&mut *tx, &request_id).await?;
        let loaded = case.request.clone();
        let course = course::load_policy(&mut *tx, &loaded.course_id).await?;

        let outcome = self
            .router
            .decide(
                case,
                approval_id,
                decision,
                comments,
                CourseAttributes::from(&course),
                context,
                &audit,
            )
            .await?;
        let mut case = outcome.case;
        let mut effects = outcome.effects;
        case.request.version = request::save_case(&mut *tx, &case, &loaded).await?;
        self.enroll_on_approval(&mut *tx, &case, context, &audit, &mut effects).await?;
        commit(tx, &audit).await?;

        self.dispatch(&effects, context).await;
        Ok(case)
    }

    pub async fn delegate(
        &self,
        approval_id: &ApprovalId,
        delegate: UserId,
        comments: Option<String>,
        context: &AuditContext,
    ) -> Result<RequestCase, WorkflowError> {
        let audit = InMemoryAuditRecorder::default();
        let mut tx = self.pool.begin().await.map_err(store)?;
        let request_id = request::request_id_for_approval(&mut *tx, approval_id).await?;
        let case = request::load_case(&mut *tx, &request_id).await?;
        let loaded = case.request.clone();

        let outcome = self.router.delegate(case, approval_id, delegate, comments, context, &audit)?;
        let mut case = outcome.case;
        case.request.version = request::save_case(&mut *tx, &case, &loaded).await?;
        commit(tx, &audit).await?;

        self.dispatch(&outcome.effects, context).await;
        Ok(case)
    }

    /// Approves each approval in its own transaction. A failed item is reported and
    /// does not roll back or stop the others.
    pub async fn bulk_approve(
        &self,
        approval_ids: &[ApprovalId],
        comments: Option<String>,
        context: &AuditContext,
    ) -> BulkApprovalReport {
        let mut report = BulkApprovalReport::default();
        for approval_id in approval_ids {
            let outcome = self
                .decide(approval_id, Decision::Approve, comments.clone(), context)
                .await
                .map(|case| case.request.status());
            if let Err(error) = &outcome {
                warn!(
                    event_name = "workflow.approval.bulk_item_failed",
                    correlation_id = %context.correlation_id,
                    approval_id = %approval_id,
                    error_kind = error.kind().as_str(),
                    error = %error,
                    "bulk approval item failed"
                );
            }
            report.push(approval_id.clone(), outcome);
        }

        info!(
            event_name = "workflow.approval.bulk_completed",
            correlation_id = %context.correlation_id,
            requested = approval_ids.len(),
            succeeded = report.succeeded(),
            "bulk approval finished"
        );
        report
    }

    pub async fn withdraw(
        &self,
        request_id: &RequestId,
        reason: Option<String>,
        context: &AuditContext,
    ) -> Result<RequestCase, WorkflowError> {
        let audit = InMemoryAuditRecorder::default();
        let mut tx = self.pool.begin().await.map_err(store)?;
        let case = request::load_case(&mut *tx, request_id).await?;
        let loaded = case.request.clone();

        let outcome = self.router.withdraw(case, reason, context, &audit)?;
        let mut case = outcome.case;
        case.request.version = request::save_case(&mut *tx, &case, &loaded).await?;
        commit(tx, &audit).await?;

        self.dispatch(&outcome.effects, context).await;
        Ok(case)
    }

    pub async fn enroll(
        &self,
        session_id: &SessionId,
        participant: UserId,
        context: &AuditContext,
    ) -> Result<RosterOutcome, WorkflowError> {
        self.enroll_batch(session_id, &[participant], context).await
    }

    pub async fn enroll_batch(
        &self,
        session_id: &SessionId,
        participants: &[UserId],
        context: &AuditContext,
    ) -> Result<RosterOutcome, WorkflowError> {
        self.change_roster(session_id, context, |roster, _, audit| {
            self.capacity.enroll_batch(roster, participants, context, audit)
        })
        .await
    }

    pub async fn cancel_enrollment(
        &self,
        enrollment_id: &EnrollmentId,
        reason: Option<String>,
        context: &AuditContext,
    ) -> Result<RosterOutcome, WorkflowError> {
        let session_id = self.session_of(enrollment_id).await?;
        self.change_roster(&session_id, context, |roster, _, audit| {
            self.capacity.cancel(roster, enrollment_id, reason, context, audit)
        })
        .await
    }

    pub async fn cancel_session(
        &self,
        session_id: &SessionId,
        reason: Option<String>,
        context: &AuditContext,
    ) -> Result<RosterOutcome, WorkflowError> {
        self.change_roster(session_id, context, |roster, _, audit| {
            self.capacity.cancel_session(roster, reason, context, audit)
        })
        .await
    }

    pub async fn record_attendance(
        &self,
        enrollment_id: &EnrollmentId,
        status: EnrollmentStatus,
        attended_minutes: u32,
        context: &AuditContext,
    ) -> Result<CompletionOutcome, WorkflowError> {
        let session_id = self.session_of(enrollment_id).await?;
        self.change_roster(&session_id, context, |roster, _, audit| {
            self.completion.record_attendance(
                roster,
                enrollment_id,
                status,
                attended_minutes,
                context,
                audit,
            )
        })
        .await
    }

    pub async fn record_score(
        &self,
        enrollment_id: &EnrollmentId,
        score: Option<Decimal>,
        context: &AuditContext,
    ) -> Result<CompletionOutcome, WorkflowError> {
        let session_id = self.session_of(enrollment_id).await?;
        self.change_roster(&session_id, context, |roster, _, audit| {
            self.completion.record_score(roster, enrollment_id, score, context, audit)
        })
        .await
    }

    /// Re-evaluates completion for the session's open enrollments.
    pub async fn apply_completion(
        &self,
        session_id: &SessionId,
        context: &AuditContext,
    ) -> Result<CompletionOutcome, WorkflowError> {
        self.change_roster(session_id, context, |roster, course, audit| {
            self.completion.apply_to_session(roster, &CompletionPolicy::from(course), context, audit)
        })
        .await
    }

    pub async fn finalize_attendance(
        &self,
        session_id: &SessionId,
        context: &AuditContext,
    ) -> Result<CompletionOutcome, WorkflowError> {
        self.change_roster(session_id, context, |roster, _, audit| {
            self.completion.finalize_attendance(roster, context, audit)
        })
        .await
    }

    /// Evaluates and then locks completion, in the same transaction.
    pub async fn finalize(
        &self,
        session_id: &SessionId,
        context: &AuditContext,
    ) -> Result<CompletionOutcome, WorkflowError> {
        self.change_roster(session_id, context, |roster, course, audit| {
            let evaluated = self.completion.apply_to_session(
                roster,
                &CompletionPolicy::from(course),
                context,
                audit,
            )?;
            self.completion.finalize(evaluated.roster, &course.id, context, audit)
        })
        .await
    }

    pub async fn override_completion(
        &self,
        enrollment_id: &EnrollmentId,
        status: CompletionStatus,
        reason: &str,
        context: &AuditContext,
    ) -> Result<CompletionOutcome, WorkflowError> {
        let session_id = self.session_of(enrollment_id).await?;
        self.change_roster(&session_id, context, |roster, _, audit| {
            self.completion.override_completion(roster, enrollment_id, status, reason, context, audit)
        })
        .await
    }

    pub async fn request_case(&self, id: &RequestId) -> Result<RequestCase, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(store)?;
        Ok(request::load_case(&mut conn, id).await?)
    }

    pub async fn roster(&self, id: &SessionId) -> Result<SessionRoster, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(store)?;
        Ok(session::load_roster(&mut conn, id).await?)
    }

    pub async fn pending_approvals_for(&self, approver: &UserId) -> Result<Vec<Approval>, WorkflowError> {
        Ok(request::SqlRequestRepository::new(self.pool.clone()).pending_for_approver(approver).await?)
    }

    pub async fn audit_for(&self, entity_id: &str) -> Result<Vec<AuditLogEntry>, WorkflowError> {
        Ok(SqlAuditLogRepository::new(self.pool.clone()).list_for_entity(entity_id).await?)
    }

    async fn insert_draft(
        &self,
        conn: &mut SqliteConnection,
        input: NewRequest,
        context: &AuditContext,
        audit: &InMemoryAuditRecorder,
    ) -> Result<TrainingRequest, WorkflowError> {
        course::load_policy(conn, &input.course_id).await?;
        if let Some(session_id) = &input.session_id {
            let roster = session::load_roster(conn, session_id).await?;
            if roster.session.course_id != input.course_id {
                return Err(WorkflowError::validation(format!(
                    "session `{session_id}` does not run course `{}`",
                    input.course_id.0
                )));
            }
        }

        let request_number = request::next_request_number(conn, context.at.year()).await?;
        let draft = RequestDraft {
            id: RequestId(Uuid::new_v4().to_string()),
            request_number,
            requester: input.requester,
            course_id: input.course_id,
            session_id: input.session_id,
            justification: input.justification,
            priority: input.priority,
            estimated_cost: input.estimated_cost,
        };
        let request = self.router.draft(draft, context, audit)?;
        request::insert_request(conn, &request).await?;
        Ok(request)
    }

    async fn submit_loaded(
        &self,
        conn: &mut SqliteConnection,
        loaded: TrainingRequest,
        context: &AuditContext,
        audit: &InMemoryAuditRecorder,
    ) -> Result<(RequestCase, Vec<SideEffect>), WorkflowError> {
        let course = course::load_policy(conn, &loaded.course_id).await?;
        let outcome = self
            .router
            .submit(loaded.clone(), CourseAttributes::from(&course), context, audit)
            .await?;

        let mut case = outcome.case;
        let mut effects = outcome.effects;
        case.request.version = request::save_case(conn, &case, &loaded).await?;
        self.enroll_on_approval(conn, &case, context, audit, &mut effects).await?;
        Ok((case, effects))
    }

    /// An approved request that names a session seats (or waitlists) its requester,
    /// unless they already hold an active enrollment there.
    async fn enroll_on_approval(
        &self,
        conn: &mut SqliteConnection,
        case: &RequestCase,
        context: &AuditContext,
        audit: &InMemoryAuditRecorder,
        effects: &mut Vec<SideEffect>,
    ) -> Result<(), WorkflowError> {
        if case.request.status() != RequestStatus::Approved {
            return Ok(());
        }
        let Some(session_id) = case.request.session_id.as_ref() else {
            return Ok(());
        };

        let roster = session::load_roster(conn, session_id).await?;
        if roster.active_for(&case.request.requester).is_some() {
            return Ok(());
        }
        if !roster.session.status.accepts_enrollment() {
            warn!(
                event_name = "workflow.request.enrollment_skipped",
                correlation_id = %context.correlation_id,
                request_id = %case.request.id,
                session_id = %session_id,
                session_status = roster.session.status.as_str(),
                "approved request names a session that no longer takes enrollments"
            );
            return Ok(());
        }

        let loaded_version = roster.session.version;
        let outcome =
            self.capacity.enroll(roster, case.request.requester.clone(), context, audit)?;
        session::save_roster(conn, &outcome.roster, loaded_version).await?;
        effects.extend(outcome.effects);

        info!(
            event_name = "workflow.request.enrolled",
            correlation_id = %context.correlation_id,
            request_id = %case.request.id,
            session_id = %session_id,
            "approved request enrolled into its session"
        );
        Ok(())
    }

    async fn change_roster<O, F>(
        &self,
        session_id: &SessionId,
        context: &AuditContext,
        change: F,
    ) -> Result<O, WorkflowError>
    where
        O: RosterChange,
        F: FnOnce(SessionRoster, &CoursePolicy, &InMemoryAuditRecorder) -> Result<O, WorkflowError>,
    {
        let audit = InMemoryAuditRecorder::default();
        let mut tx = self.pool.begin().await.map_err(store)?;
        let roster = session::load_roster(&mut *tx, session_id).await?;
        let course = course::load_policy(&mut *tx, &roster.session.course_id).await?;
        let loaded_version = roster.session.version;

        let mut outcome = change(roster, &course, &audit)?;
        let version = session::save_roster(&mut *tx, outcome.roster_mut(), loaded_version).await?;
        outcome.roster_mut().session.version = version;
        commit(tx, &audit).await?;

        self.dispatch(outcome.effects(), context).await;
        Ok(outcome)
    }

    async fn session_of(&self, enrollment_id: &EnrollmentId) -> Result<SessionId, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(store)?;
        Ok(session::session_id_for_enrollment(&mut conn, enrollment_id).await?)
    }

    async fn dispatch(&self, effects: &[SideEffect], context: &AuditContext) {
        if effects.is_empty() {
            return;
        }
        dispatch(effects, &*self.notifier, &*self.issuer, &context.correlation_id)
            .await;
    }
}

/// Appends the operation's audit entries and commits. Dropping `tx` on any earlier
/// error rolls everything back, audit rows included.
async fn commit(
    mut tx: sqlx::Transaction<'_, sqlx::Sqlite>,
    recorder: &InMemoryAuditRecorder,
) -> Result<(), WorkflowError> {
    audit::append_entries(&mut *tx, &recorder.take()).await?;
    tx.commit().await.map_err(store)
}
