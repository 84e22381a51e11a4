use std::sync::Arc;

use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use tempfile::TempDir;

use skillpath_core::audit::AuditContext;
use skillpath_core::catalog::WorkflowPolicy;
use skillpath_core::domain::approval::{ApprovalId, ApprovalStatus, ApproverRole, Decision};
use skillpath_core::domain::course::{CostLevel, CourseId, CoursePolicy, TrainingLocation};
use skillpath_core::domain::enrollment::{CompletionStatus, EnrollmentId, EnrollmentStatus};
use skillpath_core::domain::request::{Priority, RequestStatus};
use skillpath_core::domain::session::{Session, SessionId, SessionStatus};
use skillpath_core::domain::user::UserId;
use skillpath_core::errors::{StateConflict, WorkflowError};
use skillpath_core::notification::{
    InMemoryCertificateIssuer, InMemoryNotificationService, NotificationType,
};
use skillpath_db::repositories::{
    request, CourseRepository, RepositoryError, SqlCourseRepository, SqlSessionRepository,
};
use skillpath_db::{
    connect_with_settings, migrations, DbPool, EmployeeRecord, EmployeeRole, NewRequest,
    SqlDirectory, WorkflowService,
};

struct Harness {
    _dir: TempDir,
    pool: DbPool,
    service: WorkflowService,
    notifier: InMemoryNotificationService,
    issuer: InMemoryCertificateIssuer,
}

async fn harness() -> Harness {
    harness_with_notifier(InMemoryNotificationService::default()).await
}

async fn harness_with_notifier(notifier: InMemoryNotificationService) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("workflow.db").display());
    let pool = connect_with_settings(&url, 4, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");

    let directory = SqlDirectory::new(pool.clone());
    for employee in [
        EmployeeRecord::new("emp-1", EmployeeRole::Employee).reporting_to("mgr-1").in_entity("de"),
        EmployeeRecord::new("emp-2", EmployeeRole::Employee).reporting_to("mgr-1").in_entity("de"),
        EmployeeRecord::new("emp-orphan", EmployeeRole::Employee).in_entity("de"),
        EmployeeRecord::new("mgr-1", EmployeeRole::Employee).in_entity("de"),
        EmployeeRecord::new("hrbp-de", EmployeeRole::Hrbp).in_entity("de"),
        EmployeeRecord::new("lnd-1", EmployeeRole::LearningAndDevelopment),
    ] {
        directory.upsert_employee(&employee).await.expect("seed employee");
    }

    let courses = SqlCourseRepository::new(pool.clone());
    courses.save(&course("c-std", TrainingLocation::Internal, CostLevel::Low)).await.expect("course");
    courses
        .save(&course("c-abroad", TrainingLocation::Abroad, CostLevel::Medium))
        .await
        .expect("course");

    let sessions = SqlSessionRepository::new(pool.clone());
    sessions.create(&session("s-std", "c-std", 1)).await.expect("session");
    sessions.create(&session("s-small", "c-std", 1)).await.expect("session");
    sessions.create(&session("s-cert", "c-std", 3)).await.expect("session");

    let issuer = InMemoryCertificateIssuer::default();
    let service = WorkflowService::with_policy(pool.clone(), WorkflowPolicy::default(), true)
        .expect("service")
        .with_notifier(Arc::new(notifier.clone()))
        .with_certificate_issuer(Arc::new(issuer.clone()));

    Harness { _dir: dir, pool, service, notifier, issuer }
}

fn course(id: &str, location: TrainingLocation, cost_level: CostLevel) -> CoursePolicy {
    CoursePolicy {
        id: CourseId(id.to_owned()),
        title: format!("Course {id}"),
        training_location: location,
        cost_level,
        min_attendance_percent: Decimal::from(80),
        pass_score: Decimal::from(70),
        has_assessment: true,
        require_both_attendance_and_assessment: true,
    }
}

fn session(id: &str, course_id: &str, capacity: u32) -> Session {
    Session {
        id: SessionId(id.to_owned()),
        course_id: CourseId(course_id.to_owned()),
        title: format!("Session {id}"),
        capacity,
        enrolled_count: 0,
        waitlist_count: 0,
        status: SessionStatus::Open,
        expected_minutes: 480,
        starts_at: None,
        version: 0,
    }
}

fn ctx(actor: &str) -> AuditContext {
    AuditContext::new(UserId::new(actor), format!("corr-{actor}"))
}

fn new_request(requester: &str, course_id: &str, session_id: Option<&str>) -> NewRequest {
    NewRequest {
        requester: UserId::new(requester),
        course_id: CourseId(course_id.to_owned()),
        session_id: session_id.map(|id| SessionId(id.to_owned())),
        justification: "Needed for the Q3 rollout".to_owned(),
        priority: Priority::Normal,
        estimated_cost: Decimal::new(120_000, 2),
    }
}

async fn audit_count(pool: &DbPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM audit_log").fetch_one(pool).await.expect("count")
}

#[tokio::test]
async fn standard_request_is_approved_by_the_manager_and_enrolled() {
    let h = harness().await;

    let case = h
        .service
        .submit_new(new_request("emp-1", "c-std", Some("s-std")), &ctx("emp-1"))
        .await
        .expect("submit");
    assert_eq!(case.request.status(), RequestStatus::Pending);
    assert_eq!(case.request.current_approver(), Some(&UserId::new("mgr-1")));
    assert_eq!(
        case.request.request_number.0,
        format!("TR-{}-00001", Utc::now().year())
    );
    let approval = case.pending_approval().expect("manager approval").id.clone();

    let decided = h
        .service
        .decide(&approval, Decision::Approve, None, &ctx("mgr-1"))
        .await
        .expect("approve");
    assert_eq!(decided.request.status(), RequestStatus::Approved);
    assert_eq!(decided.request.current_approval_level(), 1);
    assert_eq!(decided.request.version, 2);

    let roster = h.service.roster(&SessionId("s-std".to_owned())).await.expect("roster");
    let seat = roster.active_for(&UserId::new("emp-1")).expect("requester enrolled");
    assert_eq!(seat.status, EnrollmentStatus::Confirmed);
    assert_eq!(roster.session.enrolled_count, 1);

    let kinds: Vec<_> = h.notifier.sent().iter().map(|sent| sent.kind).collect();
    assert_eq!(
        kinds,
        vec![
            NotificationType::ApprovalRequired,
            NotificationType::RequestApproved,
            NotificationType::EnrollmentConfirmed,
        ]
    );

    let trail = h.service.audit_for(&decided.request.id.0).await.expect("audit");
    assert!(trail.iter().any(|entry| entry.field == "status"
        && entry.new_value.as_deref() == Some("approved")
        && entry.actor == UserId::new("mgr-1")));
}

#[tokio::test]
async fn single_connection_pool_is_refused() {
    let narrow = connect_with_settings("sqlite::memory:", 1, 1).await.expect("connect");

    let error = WorkflowService::with_policy(narrow.clone(), WorkflowPolicy::default(), true)
        .err()
        .expect("one connection cannot serve a transaction and a directory lookup");
    assert!(matches!(error, WorkflowError::Validation { ref message } if message.contains("pool")));
    narrow.close().await;
}

#[tokio::test]
async fn abroad_request_walks_the_extended_chain() {
    let h = harness().await;
    let case = h
        .service
        .submit_new(new_request("emp-1", "c-abroad", None), &ctx("emp-1"))
        .await
        .expect("submit");

    let mut current = case;
    for (approver, role) in [
        ("mgr-1", ApproverRole::Manager),
        ("hrbp-de", ApproverRole::Hrbp),
        ("lnd-1", ApproverRole::LearningAndDevelopment),
    ] {
        let pending = current.pending_approval().expect("pending approval").clone();
        assert_eq!(pending.approver, UserId::new(approver));
        assert_eq!(pending.role, role);
        current = h
            .service
            .decide(&pending.id, Decision::Approve, Some("ok".to_owned()), &ctx(approver))
            .await
            .expect("approve level");
    }

    assert_eq!(current.request.status(), RequestStatus::Approved);
    assert_eq!(current.request.current_approval_level(), 3);
    let levels: Vec<_> = current.approvals.iter().map(|approval| approval.level).collect();
    assert_eq!(levels, vec![1, 2, 3]);
    assert!(current.approvals.iter().all(|approval| approval.status == ApprovalStatus::Approved));
}

#[tokio::test]
async fn rejection_without_comments_changes_nothing() {
    let h = harness().await;
    let case = h
        .service
        .submit_new(new_request("emp-1", "c-std", None), &ctx("emp-1"))
        .await
        .expect("submit");
    let approval = case.pending_approval().expect("pending").id.clone();
    let audit_before = audit_count(&h.pool).await;

    let error = h
        .service
        .decide(&approval, Decision::Reject, Some("   ".to_owned()), &ctx("mgr-1"))
        .await
        .expect_err("blank comments must be refused");
    assert!(matches!(error, WorkflowError::Validation { .. }));

    let unchanged = h.service.request_case(&case.request.id).await.expect("reload");
    assert_eq!(unchanged.request.status(), RequestStatus::Pending);
    assert_eq!(unchanged.request.version, case.request.version);
    assert_eq!(unchanged.approvals.len(), 1);
    assert!(unchanged.approvals[0].is_pending());
    assert_eq!(audit_count(&h.pool).await, audit_before);

    let rejected = h
        .service
        .decide(&approval, Decision::Reject, Some("Budget frozen".to_owned()), &ctx("mgr-1"))
        .await
        .expect("reject");
    assert_eq!(rejected.request.status(), RequestStatus::Rejected);
    assert_eq!(rejected.request.current_approver(), None);
}

#[tokio::test]
async fn missing_manager_leaves_the_draft_untouched() {
    let h = harness().await;
    let draft = h
        .service
        .create_draft(new_request("emp-orphan", "c-std", None), &ctx("emp-orphan"))
        .await
        .expect("draft");

    let error = h.service.submit(&draft.id, &ctx("emp-orphan")).await.expect_err("no manager");
    assert_eq!(error.kind(), skillpath_core::errors::ErrorKind::Resolution);

    let reloaded = h.service.request_case(&draft.id).await.expect("reload");
    assert_eq!(reloaded.request.status(), RequestStatus::Draft);
    assert!(reloaded.approvals.is_empty());
}

#[tokio::test]
async fn bulk_approval_reports_each_item_independently() {
    let h = harness().await;
    let first = h
        .service
        .submit_new(new_request("emp-1", "c-std", None), &ctx("emp-1"))
        .await
        .expect("first");
    let second = h
        .service
        .submit_new(new_request("emp-2", "c-std", None), &ctx("emp-2"))
        .await
        .expect("second");
    let first_approval = first.pending_approval().expect("pending").id.clone();
    let second_approval = second.pending_approval().expect("pending").id.clone();

    h.service
        .decide(&first_approval, Decision::Reject, Some("duplicate".to_owned()), &ctx("mgr-1"))
        .await
        .expect("reject first");

    let missing = ApprovalId("a-missing".to_owned());
    let report = h
        .service
        .bulk_approve(
            &[first_approval.clone(), second_approval.clone(), missing.clone()],
            None,
            &ctx("mgr-1"),
        )
        .await;

    assert_eq!(report.items.len(), 3);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.items[1].outcome, Ok(RequestStatus::Approved));
    let failures: Vec<_> = report.failures().map(|(id, error)| (id.clone(), error.clone())).collect();
    assert!(matches!(
        failures[0],
        (ref id, WorkflowError::Conflict(StateConflict::AlreadyDecided { .. })) if *id == first_approval
    ));
    assert!(matches!(
        failures[1],
        (ref id, WorkflowError::NotFound { entity: "approval", .. }) if *id == missing
    ));
}

#[tokio::test]
async fn concurrent_decisions_advance_the_request_once() {
    let h = harness().await;
    let case = h
        .service
        .submit_new(new_request("emp-1", "c-abroad", None), &ctx("emp-1"))
        .await
        .expect("submit");
    let approval = case.pending_approval().expect("pending").id.clone();

    let manager = ctx("mgr-1");
    let (left, right) = tokio::join!(
        h.service.decide(&approval, Decision::Approve, None, &manager),
        h.service.decide(&approval, Decision::Approve, None, &manager),
    );
    assert_eq!([left.is_ok(), right.is_ok()].iter().filter(|ok| **ok).count(), 1);

    let reloaded = h.service.request_case(&case.request.id).await.expect("reload");
    assert_eq!(reloaded.request.current_approval_level(), 2);
    assert_eq!(reloaded.approvals.iter().filter(|approval| approval.level == 2).count(), 1);
}

#[tokio::test]
async fn stale_request_write_is_a_concurrent_modification() {
    let h = harness().await;
    let case = h
        .service
        .submit_new(new_request("emp-1", "c-std", None), &ctx("emp-1"))
        .await
        .expect("submit");

    let mut conn = h.pool.acquire().await.expect("acquire");
    let loaded = request::load_case(&mut conn, &case.request.id).await.expect("load");
    request::save_case(&mut conn, &loaded, &loaded.request).await.expect("first write");
    let stale = request::save_case(&mut conn, &loaded, &loaded.request).await;

    let error = stale.expect_err("stale version");
    assert!(matches!(error, RepositoryError::Conflict { .. }));
    assert!(WorkflowError::from(error).is_retryable());
}

#[tokio::test]
async fn cancellation_promotes_the_waitlist_in_order() {
    let h = harness().await;
    let small = SessionId("s-small".to_owned());
    let placed = h
        .service
        .enroll_batch(
            &small,
            &[UserId::new("emp-a"), UserId::new("emp-b"), UserId::new("emp-c")],
            &ctx("hr-admin"),
        )
        .await
        .expect("enroll");
    let statuses: Vec<_> =
        placed.placements.iter().map(|p| (p.status, p.waitlist_position)).collect();
    assert_eq!(
        statuses,
        vec![
            (EnrollmentStatus::Confirmed, None),
            (EnrollmentStatus::Waitlisted, Some(1)),
            (EnrollmentStatus::Waitlisted, Some(2)),
        ]
    );

    let outcome = h
        .service
        .cancel_enrollment(&placed.placements[0].enrollment_id, Some("sick".to_owned()), &ctx("emp-a"))
        .await
        .expect("cancel");
    assert_eq!(outcome.promoted, vec![placed.placements[1].enrollment_id.clone()]);

    let roster = h.service.roster(&small).await.expect("roster");
    assert_eq!(roster.session.enrolled_count, 1);
    assert_eq!(roster.session.waitlist_count, 1);
    assert_eq!(roster.active_for(&UserId::new("emp-b")).map(|row| row.status), Some(EnrollmentStatus::Confirmed));
    assert_eq!(roster.active_for(&UserId::new("emp-c")).and_then(|row| row.waitlist_position), Some(1));
    assert!(roster.invariant_violations().is_empty());
    assert!(h
        .notifier
        .sent()
        .iter()
        .any(|sent| sent.user_id == UserId::new("emp-b")
            && sent.kind == NotificationType::EnrollmentConfirmed));
}

#[tokio::test]
async fn concurrent_cancellations_promote_each_waitlisted_row_once() {
    let h = harness().await;
    let cert = SessionId("s-cert".to_owned());
    let placed = h
        .service
        .enroll_batch(
            &cert,
            &["emp-a", "emp-b", "emp-c", "emp-d", "emp-e"].map(UserId::new),
            &ctx("hr-admin"),
        )
        .await
        .expect("enroll");
    let [a, b] = [0, 1].map(|i| placed.placements[i].enrollment_id.clone());
    let [d, e] = [3, 4].map(|i| placed.placements[i].enrollment_id.clone());

    let (ctx_a, ctx_b) = (ctx("emp-a"), ctx("emp-b"));
    let (left, right) = tokio::join!(
        h.service.cancel_enrollment(&a, None, &ctx_a),
        h.service.cancel_enrollment(&b, None, &ctx_b),
    );
    let mut promoted = Vec::new();
    let mut cancelled = 0;
    for outcome in [left, right] {
        match outcome {
            Ok(outcome) => {
                cancelled += 1;
                promoted.extend(outcome.promoted);
            }
            Err(error) => assert!(error.is_retryable(), "unexpected error: {error:?}"),
        }
    }
    assert!(cancelled >= 1);
    assert_eq!(promoted.len(), cancelled);
    if cancelled == 2 {
        assert_ne!(promoted[0], promoted[1]);
        assert!(promoted.contains(&d) && promoted.contains(&e));
    } else {
        assert_eq!(promoted, vec![d.clone()]);
    }

    let roster = h.service.roster(&cert).await.expect("roster");
    assert!(roster.invariant_violations().is_empty());
    assert_eq!(roster.session.enrolled_count, 3);
    assert_eq!(roster.session.waitlist_count, 2 - cancelled as u32);
    let confirmed = roster
        .enrollments
        .iter()
        .filter(|row| row.status == EnrollmentStatus::Confirmed)
        .count();
    assert_eq!(confirmed, 3);
}

#[tokio::test]
async fn rejection_at_level_two_stops_the_chain() {
    let h = harness().await;
    let case = h
        .service
        .submit_new(new_request("emp-1", "c-abroad", None), &ctx("emp-1"))
        .await
        .expect("submit");
    let level_one = case.pending_approval().expect("level 1").id.clone();
    let advanced = h
        .service
        .decide(&level_one, Decision::Approve, None, &ctx("mgr-1"))
        .await
        .expect("level 2");
    let level_two = advanced.pending_approval().expect("level 2").id.clone();

    let rejected = h
        .service
        .decide(&level_two, Decision::Reject, Some("budget".to_owned()), &ctx("hrbp-de"))
        .await
        .expect("reject");
    assert_eq!(rejected.request.status(), RequestStatus::Rejected);
    assert_eq!(rejected.request.current_approval_level(), 2);
    assert!(rejected.pending_approval().is_none());

    let stale = h.service.decide(&level_one, Decision::Approve, None, &ctx("mgr-1")).await;
    assert!(matches!(
        stale,
        Err(WorkflowError::Conflict(StateConflict::AlreadyDecided { .. }))
    ));
    assert!(h
        .notifier
        .sent()
        .iter()
        .any(|sent| sent.user_id == UserId::new("emp-1")
            && sent.kind == NotificationType::RequestRejected));
}

#[tokio::test]
async fn failed_batch_enrollment_writes_nothing() {
    let h = harness().await;
    let small = SessionId("s-small".to_owned());
    h.service.enroll(&small, UserId::new("emp-a"), &ctx("hr-admin")).await.expect("enroll");
    let before = h.service.roster(&small).await.expect("roster");
    let audit_before = audit_count(&h.pool).await;

    let error = h
        .service
        .enroll_batch(&small, &[UserId::new("emp-b"), UserId::new("emp-a")], &ctx("hr-admin"))
        .await
        .expect_err("duplicate participant");
    assert!(matches!(error, WorkflowError::Conflict(StateConflict::DuplicateEnrollment { .. })));

    assert_eq!(h.service.roster(&small).await.expect("roster"), before);
    assert_eq!(audit_count(&h.pool).await, audit_before);
}

#[tokio::test]
async fn cancelled_session_refuses_enrollment() {
    let h = harness().await;
    let small = SessionId("s-small".to_owned());
    h.service.enroll(&small, UserId::new("emp-a"), &ctx("hr-admin")).await.expect("enroll");
    h.service
        .cancel_session(&small, Some("trainer unavailable".to_owned()), &ctx("hr-admin"))
        .await
        .expect("cancel session");

    let error = h
        .service
        .enroll(&small, UserId::new("emp-b"), &ctx("hr-admin"))
        .await
        .expect_err("cancelled session");
    assert!(matches!(error, WorkflowError::Conflict(StateConflict::InvalidState { .. })));

    let roster = h.service.roster(&small).await.expect("roster");
    assert_eq!(roster.session.status, SessionStatus::Cancelled);
    assert_eq!(roster.session.enrolled_count, 0);
    assert!(h
        .notifier
        .sent()
        .iter()
        .any(|sent| sent.kind == NotificationType::SessionCancelled));
}

#[tokio::test]
async fn finalize_requires_conclusive_results_and_requests_certificates() {
    let h = harness().await;
    let cert = SessionId("s-cert".to_owned());
    let placed = h
        .service
        .enroll_batch(
            &cert,
            &[UserId::new("emp-a"), UserId::new("emp-b"), UserId::new("emp-c")],
            &ctx("hr-admin"),
        )
        .await
        .expect("enroll");
    let [a, b, c] = [0, 1, 2].map(|i| placed.placements[i].enrollment_id.clone());
    let trainer = ctx("trainer-1");

    h.service.record_attendance(&a, EnrollmentStatus::Completed, 480, &trainer).await.expect("a");
    h.service.record_attendance(&b, EnrollmentStatus::Partial, 400, &trainer).await.expect("b");
    h.service.record_attendance(&c, EnrollmentStatus::Absent, 0, &trainer).await.expect("c");
    h.service.record_score(&a, Some(Decimal::from(85)), &trainer).await.expect("score a");

    let error = h.service.finalize(&cert, &trainer).await.expect_err("b has no score yet");
    match error {
        WorkflowError::Conflict(StateConflict::CompletionIncomplete { enrollment_ids, .. }) => {
            assert_eq!(enrollment_ids, vec![b.0.clone()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    h.service.record_score(&b, Some(Decimal::from(60)), &trainer).await.expect("score b");
    let finalized = h.service.finalize(&cert, &trainer).await.expect("finalize");

    let status_of = |id: &EnrollmentId| {
        finalized.roster.enrollment(id).map(|row| (row.completion_status, row.passed))
    };
    assert_eq!(status_of(&a), Some((CompletionStatus::Completed, Some(true))));
    assert_eq!(status_of(&b), Some((CompletionStatus::Failed, Some(false))));
    assert_eq!(status_of(&c), Some((CompletionStatus::NotCompleted, Some(false))));

    let certificates = h.issuer.requested();
    assert_eq!(certificates.len(), 1);
    assert_eq!(certificates[0].participant, UserId::new("emp-a"));

    let locked = h.service.record_score(&a, Some(Decimal::from(99)), &trainer).await;
    assert!(matches!(
        locked,
        Err(WorkflowError::Conflict(StateConflict::AlreadyFinalized { .. }))
    ));

    let overridden = h
        .service
        .override_completion(&b, CompletionStatus::Completed, "retake accepted by L&D", &ctx("lnd-1"))
        .await
        .expect("override");
    assert_eq!(
        overridden.roster.enrollment(&b).map(|row| row.completion_status),
        Some(CompletionStatus::Completed)
    );
    let trail = h.service.audit_for(&b.0).await.expect("audit");
    assert!(trail
        .iter()
        .filter(|entry| entry.actor == UserId::new("lnd-1"))
        .all(|entry| entry.reason.as_deref() == Some("retake accepted by L&D")));
}

#[tokio::test]
async fn finalized_session_is_closed_to_new_participants() {
    let h = harness().await;
    let cert = SessionId("s-cert".to_owned());
    let trainer = ctx("trainer-1");
    let first = h.service.enroll(&cert, UserId::new("emp-a"), &ctx("hr-admin")).await.expect("enroll");
    let seat = first.placements[0].enrollment_id.clone();
    h.service.record_attendance(&seat, EnrollmentStatus::Completed, 480, &trainer).await.expect("attend");
    h.service.record_score(&seat, Some(Decimal::from(90)), &trainer).await.expect("score");
    h.service.finalize(&cert, &trainer).await.expect("finalize");

    let late = h
        .service
        .enroll(&cert, UserId::new("emp-b"), &ctx("hr-admin"))
        .await
        .expect_err("finalized session");
    assert!(matches!(late, WorkflowError::Conflict(StateConflict::InvalidState { .. })));

    let roster = h.service.roster(&cert).await.expect("roster");
    assert_eq!(roster.session.status, SessionStatus::Completed);
    assert!(roster.active_for(&UserId::new("emp-b")).is_none());
    let trail = h.service.audit_for(&cert.0).await.expect("audit");
    assert!(trail.iter().any(|entry| entry.field == "status"
        && entry.new_value.as_deref() == Some("completed")));
}

#[tokio::test]
async fn empty_session_finalizes_once() {
    let h = harness().await;
    let small = SessionId("s-small".to_owned());
    let trainer = ctx("trainer-1");

    h.service.finalize(&small, &trainer).await.expect("first finalize");
    let again = h.service.finalize(&small, &trainer).await;
    assert!(matches!(
        again,
        Err(WorkflowError::Conflict(StateConflict::AlreadyFinalized { scope: "completion", .. }))
    ));
}

#[tokio::test]
async fn notification_failure_does_not_fail_the_operation() {
    let h = harness_with_notifier(InMemoryNotificationService::failing_for("mgr-1")).await;

    let case = h
        .service
        .submit_new(new_request("emp-1", "c-std", None), &ctx("emp-1"))
        .await
        .expect("submit despite notification failure");

    assert_eq!(case.request.status(), RequestStatus::Pending);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn withdrawn_request_closes_its_open_approval() {
    let h = harness().await;
    let case = h
        .service
        .submit_new(new_request("emp-1", "c-std", None), &ctx("emp-1"))
        .await
        .expect("submit");

    let withdrawn = h
        .service
        .withdraw(&case.request.id, Some("plans changed".to_owned()), &ctx("emp-1"))
        .await
        .expect("withdraw");
    assert_eq!(withdrawn.request.status(), RequestStatus::Cancelled);
    assert!(withdrawn.approvals.iter().all(|approval| approval.status == ApprovalStatus::Cancelled));
    assert!(h.service.pending_approvals_for(&UserId::new("mgr-1")).await.expect("inbox").is_empty());

    let again = h.service.withdraw(&case.request.id, None, &ctx("emp-1")).await;
    assert!(matches!(again, Err(WorkflowError::Conflict(StateConflict::InvalidState { .. }))));
}
