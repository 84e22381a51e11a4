use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::approvals::transitions::{transition, TransitionError, WorkflowEvent};
use crate::audit::{AuditBatch, AuditContext, AuditEntity, AuditRecorder};
use crate::catalog::{CourseAttributes, RuleCatalog, WorkflowTier};
use crate::directory::{DirectoryError, DirectoryLookup};
use crate::domain::approval::{Approval, ApprovalId, ApprovalStatus, ApproverRole, Decision};
use crate::domain::course::CourseId;
use crate::domain::request::{
    Priority, RequestId, RequestNumber, RequestStatus, TrainingRequest, WorkflowSnapshot,
};
use crate::domain::session::SessionId;
use crate::domain::user::UserId;
use crate::errors::{ResolutionFailure, StateConflict, WorkflowError};
use crate::notification::{NotificationRequest, NotificationType, SideEffect};

const MANAGER_AUTO_APPROVAL: &str = "auto-approved: submitted by manager";

/// Caller input for a new request. Ids and numbers are assigned by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestDraft {
    pub id: RequestId,
    pub request_number: RequestNumber,
    pub requester: UserId,
    pub course_id: CourseId,
    pub session_id: Option<SessionId>,
    pub justification: String,
    pub priority: Priority,
    pub estimated_cost: Decimal,
}

/// A request together with every approval row it has produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestCase {
    pub request: TrainingRequest,
    pub approvals: Vec<Approval>,
}

impl RequestCase {
    pub fn new(request: TrainingRequest) -> Self {
        Self { request, approvals: Vec::new() }
    }

    pub fn approval(&self, id: &ApprovalId) -> Option<&Approval> {
        self.approvals.iter().find(|approval| &approval.id == id)
    }

    pub fn pending_approval(&self) -> Option<&Approval> {
        self.approvals.iter().find(|approval| approval.is_pending())
    }

    fn approval_index(&self, id: &ApprovalId) -> Result<usize, WorkflowError> {
        self.approvals
            .iter()
            .position(|approval| &approval.id == id)
            .ok_or_else(|| WorkflowError::not_found("approval", id.0.clone()))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoutingOutcome {
    pub case: RequestCase,
    pub effects: Vec<SideEffect>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BulkItemResult {
    pub approval_id: ApprovalId,
    pub outcome: Result<RequestStatus, WorkflowError>,
}

/// Per-item results of a bulk approval. One failure never affects another item.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BulkApprovalReport {
    pub items: Vec<BulkItemResult>,
}

impl BulkApprovalReport {
    pub fn push(&mut self, approval_id: ApprovalId, outcome: Result<RequestStatus, WorkflowError>) {
        self.items.push(BulkItemResult { approval_id, outcome });
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.outcome.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ApprovalId, &WorkflowError)> {
        self.items.iter().filter_map(|item| match &item.outcome {
            Ok(_) => None,
            Err(error) => Some((&item.approval_id, error)),
        })
    }
}

/// Drives requests through their approval chain. Every operation takes the case by
/// value and returns the new case only on success, so a failed call leaves the
/// caller's copy untouched and records no audit entries.
pub struct ApprovalRouter<D> {
    catalog: RuleCatalog,
    directory: D,
}

impl<D> ApprovalRouter<D>
where
    D: DirectoryLookup,
{
    pub fn new(catalog: RuleCatalog, directory: D) -> Self {
        Self { catalog, directory }
    }

    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn draft<R>(
        &self,
        draft: RequestDraft,
        context: &AuditContext,
        recorder: &R,
    ) -> Result<TrainingRequest, WorkflowError>
    where
        R: AuditRecorder + ?Sized,
    {
        if draft.estimated_cost < Decimal::ZERO {
            return Err(WorkflowError::validation("estimated cost cannot be negative"));
        }

        let request = TrainingRequest {
            id: draft.id,
            request_number: draft.request_number,
            requester: draft.requester,
            requester_entity: None,
            course_id: draft.course_id,
            session_id: draft.session_id,
            justification: draft.justification.trim().to_owned(),
            priority: draft.priority,
            estimated_cost: draft.estimated_cost,
            workflow: WorkflowSnapshot::draft(),
            submitted_at: None,
            version: 0,
            created_at: context.at,
            updated_at: context.at,
        };

        let mut batch = AuditBatch::new(context);
        batch.event(
            AuditEntity::TrainingRequest,
            &request.id.0,
            "status",
            None,
            Some(RequestStatus::Draft.as_str().to_owned()),
            None,
        );
        batch.flush(recorder);

        Ok(request)
    }

    pub async fn submit<R>(
        &self,
        request: TrainingRequest,
        course: CourseAttributes,
        context: &AuditContext,
        recorder: &R,
    ) -> Result<RoutingOutcome, WorkflowError>
    where
        R: AuditRecorder + ?Sized,
    {
        if request.status() != RequestStatus::Draft {
            return Err(invalid_request_state(&request, "submit"));
        }
        if request.justification.trim().is_empty() {
            return Err(WorkflowError::validation("a justification is required to submit"));
        }

        let manager = self.directory.manager_of(&request.requester).await?.ok_or_else(|| {
            ResolutionFailure::MissingApprover { requester: request.requester.0.clone() }
        })?;
        let entity = self.directory.entity_of(&request.requester).await?;
        let tier = self.catalog.tier_for(course);

        let before = request.workflow.clone();
        let mut case = RequestCase::new(request);
        let mut batch = AuditBatch::new(context);
        let mut effects = Vec::new();

        case.request.requester_entity = entity;
        case.request.submitted_at = Some(context.at);
        case.request.workflow =
            apply(&case.request, &WorkflowEvent::Submitted { approver: manager.clone() })?;
        let mut first = open_approval(&case.request, ApproverRole::Manager, manager, None, context);
        batch.event(
            AuditEntity::Approval,
            &first.id.0,
            "status",
            None,
            Some(ApprovalStatus::Pending.as_str().to_owned()),
            None,
        );

        if first.approver == context.actor {
            close_approval(
                &mut first,
                ApprovalStatus::Approved,
                Some(MANAGER_AUTO_APPROVAL.to_owned()),
                context,
                &mut batch,
            );
            case.approvals.push(first);
            self.advance(&mut case, tier, context, &mut batch, &mut effects).await?;
        } else {
            effects.push(approval_required(&case.request, &first));
            case.approvals.push(first);
        }

        record_workflow_change(&mut batch, &case.request, &before);
        batch.change(
            AuditEntity::TrainingRequest,
            &case.request.id.0,
            "submitted_at",
            None,
            case.request.submitted_at.map(|at| at.to_rfc3339()),
        );
        case.request.updated_at = context.at;
        batch.flush(recorder);

        info!(
            event_name = "workflow.request.submitted",
            correlation_id = %context.correlation_id,
            request_id = %case.request.id,
            tier = ?tier,
            status = case.request.status().as_str(),
            "training request submitted"
        );
        Ok(RoutingOutcome { case, effects })
    }

    pub async fn decide<R>(
        &self,
        mut case: RequestCase,
        approval_id: &ApprovalId,
        decision: Decision,
        comments: Option<String>,
        course: CourseAttributes,
        context: &AuditContext,
        recorder: &R,
    ) -> Result<RoutingOutcome, WorkflowError>
    where
        R: AuditRecorder + ?Sized,
    {
        let comments = normalize_comments(comments);
        let index = case.approval_index(approval_id)?;
        let approval = &case.approvals[index];
        if !approval.is_pending() {
            return Err(StateConflict::AlreadyDecided {
                approval_id: approval.id.0.clone(),
                status: approval.status.as_str().to_owned(),
            }
            .into());
        }
        if decision == Decision::Reject && comments.is_none() {
            return Err(WorkflowError::validation("comments are required when rejecting"));
        }
        if case.request.status() != RequestStatus::Pending
            || approval.level != case.request.current_approval_level()
        {
            return Err(invalid_request_state(&case.request, "decide approval"));
        }

        let tier = self.catalog.tier_for(course);
        let before = case.request.workflow.clone();
        let mut batch = AuditBatch::new(context);
        let mut effects = Vec::new();

        match decision {
            Decision::Approve => {
                close_approval(
                    &mut case.approvals[index],
                    ApprovalStatus::Approved,
                    comments,
                    context,
                    &mut batch,
                );
                self.advance(&mut case, tier, context, &mut batch, &mut effects).await?;
            }
            Decision::Reject => {
                close_approval(
                    &mut case.approvals[index],
                    ApprovalStatus::Rejected,
                    comments.clone(),
                    context,
                    &mut batch,
                );
                case.request.workflow = apply(&case.request, &WorkflowEvent::Rejected)?;
                let message = format!(
                    "Training request {} was rejected: {}",
                    case.request.request_number.0,
                    comments.unwrap_or_default()
                );
                effects.push(requester_notice(
                    &case.request,
                    NotificationType::RequestRejected,
                    "Training request rejected",
                    message,
                ));
            }
        }

        record_workflow_change(&mut batch, &case.request, &before);
        case.request.updated_at = context.at;
        batch.flush(recorder);

        info!(
            event_name = "workflow.approval.decided",
            correlation_id = %context.correlation_id,
            request_id = %case.request.id,
            approval_id = %approval_id,
            decision = ?decision,
            level = before.level,
            status = case.request.status().as_str(),
            "approval decided"
        );
        Ok(RoutingOutcome { case, effects })
    }

    pub fn delegate<R>(
        &self,
        mut case: RequestCase,
        approval_id: &ApprovalId,
        delegate: UserId,
        comments: Option<String>,
        context: &AuditContext,
        recorder: &R,
    ) -> Result<RoutingOutcome, WorkflowError>
    where
        R: AuditRecorder + ?Sized,
    {
        let index = case.approval_index(approval_id)?;
        let original = &case.approvals[index];
        if !original.is_pending() {
            return Err(WorkflowError::validation(format!(
                "approval `{}` is {}; only pending approvals can be delegated",
                original.id,
                original.status.as_str()
            )));
        }
        if delegate.0.trim().is_empty() {
            return Err(WorkflowError::validation("a delegate is required"));
        }
        if delegate == original.approver {
            return Err(WorkflowError::validation("cannot delegate an approval to its own approver"));
        }

        let before = case.request.workflow.clone();
        let mut batch = AuditBatch::new(context);
        case.request.workflow =
            apply(&case.request, &WorkflowEvent::Delegated { delegate: delegate.clone() })?;

        let role = original.role;
        let delegated_from = original.id.clone();
        close_approval(
            &mut case.approvals[index],
            ApprovalStatus::Delegated,
            normalize_comments(comments),
            context,
            &mut batch,
        );
        let replacement =
            open_approval(&case.request, role, delegate, Some(delegated_from), context);
        batch.event(
            AuditEntity::Approval,
            &replacement.id.0,
            "status",
            None,
            Some(ApprovalStatus::Pending.as_str().to_owned()),
            None,
        );
        let effects = vec![approval_required(&case.request, &replacement)];
        case.approvals.push(replacement);

        record_workflow_change(&mut batch, &case.request, &before);
        case.request.updated_at = context.at;
        batch.flush(recorder);

        info!(
            event_name = "workflow.approval.delegated",
            correlation_id = %context.correlation_id,
            request_id = %case.request.id,
            approval_id = %approval_id,
            level = before.level,
            "approval delegated"
        );
        Ok(RoutingOutcome { case, effects })
    }

    pub fn withdraw<R>(
        &self,
        mut case: RequestCase,
        reason: Option<String>,
        context: &AuditContext,
        recorder: &R,
    ) -> Result<RoutingOutcome, WorkflowError>
    where
        R: AuditRecorder + ?Sized,
    {
        let before = case.request.workflow.clone();
        case.request.workflow = apply(&case.request, &WorkflowEvent::Withdrawn)?;

        let mut batch = AuditBatch::new(context);
        let reason = normalize_comments(reason);
        for approval in case.approvals.iter_mut().filter(|approval| approval.is_pending()) {
            close_approval(approval, ApprovalStatus::Cancelled, reason.clone(), context, &mut batch);
        }
        record_workflow_change(&mut batch, &case.request, &before);
        if let Some(reason) = reason.as_deref() {
            batch.with_reason(reason);
        }
        case.request.updated_at = context.at;
        batch.flush(recorder);

        info!(
            event_name = "workflow.request.withdrawn",
            correlation_id = %context.correlation_id,
            request_id = %case.request.id,
            "training request withdrawn"
        );
        Ok(RoutingOutcome { case, effects: Vec::new() })
    }

    /// Opens the next level of the chain, or completes the request when none is left.
    async fn advance(
        &self,
        case: &mut RequestCase,
        tier: WorkflowTier,
        context: &AuditContext,
        batch: &mut AuditBatch<'_>,
        effects: &mut Vec<SideEffect>,
    ) -> Result<(), WorkflowError> {
        let next_level = case.request.current_approval_level() + 1;
        let Some(role) = tier.step_at(next_level) else {
            case.request.workflow = apply(&case.request, &WorkflowEvent::ChainCompleted)?;
            let message =
                format!("Training request {} was approved", case.request.request_number.0);
            effects.push(requester_notice(
                &case.request,
                NotificationType::RequestApproved,
                "Training request approved",
                message,
            ));
            return Ok(());
        };

        let approver = self.resolve(role, &case.request, next_level).await?;
        case.request.workflow = apply(
            &case.request,
            &WorkflowEvent::LevelAdvanced { level: next_level, approver: approver.clone() },
        )?;
        let approval = open_approval(&case.request, role, approver, None, context);
        batch.event(
            AuditEntity::Approval,
            &approval.id.0,
            "status",
            None,
            Some(ApprovalStatus::Pending.as_str().to_owned()),
            None,
        );
        effects.push(approval_required(&case.request, &approval));
        case.approvals.push(approval);
        Ok(())
    }

    async fn resolve(
        &self,
        role: ApproverRole,
        request: &TrainingRequest,
        level: u32,
    ) -> Result<UserId, WorkflowError> {
        let resolved = match role {
            ApproverRole::Manager => {
                return self.directory.manager_of(&request.requester).await?.ok_or_else(|| {
                    ResolutionFailure::MissingApprover { requester: request.requester.0.clone() }
                        .into()
                });
            }
            ApproverRole::Hrbp => self.resolve_hrbp(request).await?,
            ApproverRole::LearningAndDevelopment => {
                self.directory.any_learning_and_development().await?
            }
            ApproverRole::Chro => self.directory.any_chro().await?,
        };

        resolved.ok_or_else(|| {
            warn!(
                event_name = "workflow.approval.unresolved",
                request_id = %request.id,
                level = level,
                role = role.label(),
                "no approver available; request stays at its current level"
            );
            ResolutionFailure::NoApproverAvailable {
                request_id: request.id.0.clone(),
                level,
                role: role.label(),
            }
            .into()
        })
    }

    /// Entity HRBP, then any HRBP, then any L&D user.
    async fn resolve_hrbp(
        &self,
        request: &TrainingRequest,
    ) -> Result<Option<UserId>, DirectoryError> {
        if let Some(entity) = request.requester_entity.as_ref() {
            if let Some(hrbp) = self.directory.hrbp_for_entity(entity).await? {
                return Ok(Some(hrbp));
            }
        }

        if let Some(hrbp) = self.directory.any_hrbp().await? {
            info!(
                event_name = "workflow.approval.fallback",
                request_id = %request.id,
                fallback = "any_hrbp",
                "no HRBP for requester entity"
            );
            return Ok(Some(hrbp));
        }

        let learning_and_development = self.directory.any_learning_and_development().await?;
        if learning_and_development.is_some() {
            info!(
                event_name = "workflow.approval.fallback",
                request_id = %request.id,
                fallback = "learning_and_development",
                "no HRBP configured; routing HRBP level to L&D"
            );
        }
        Ok(learning_and_development)
    }
}

fn apply(request: &TrainingRequest, event: &WorkflowEvent) -> Result<WorkflowSnapshot, WorkflowError> {
    transition(&request.workflow, event).map_err(|error| match error {
        TransitionError::InvalidTransition { status, event } => StateConflict::InvalidState {
            entity: "training request",
            id: request.id.0.clone(),
            state: status.as_str().to_owned(),
            action: event,
        }
        .into(),
        TransitionError::LevelNotAdvancing { .. } => StateConflict::ConcurrentModification {
            entity: "training request",
            id: request.id.0.clone(),
        }
        .into(),
    })
}

fn invalid_request_state(request: &TrainingRequest, action: &'static str) -> WorkflowError {
    StateConflict::InvalidState {
        entity: "training request",
        id: request.id.0.clone(),
        state: request.status().as_str().to_owned(),
        action,
    }
    .into()
}

fn normalize_comments(comments: Option<String>) -> Option<String> {
    comments.map(|comments| comments.trim().to_owned()).filter(|comments| !comments.is_empty())
}

fn open_approval(
    request: &TrainingRequest,
    role: ApproverRole,
    approver: UserId,
    delegated_from: Option<ApprovalId>,
    context: &AuditContext,
) -> Approval {
    Approval {
        id: ApprovalId(Uuid::new_v4().to_string()),
        request_id: request.id.clone(),
        approver,
        level: request.current_approval_level(),
        role,
        status: ApprovalStatus::Pending,
        comments: None,
        delegated_from,
        decided_at: None,
        created_at: context.at,
    }
}

fn close_approval(
    approval: &mut Approval,
    status: ApprovalStatus,
    comments: Option<String>,
    context: &AuditContext,
    batch: &mut AuditBatch<'_>,
) {
    batch
        .change(
            AuditEntity::Approval,
            &approval.id.0,
            "status",
            Some(approval.status.as_str().to_owned()),
            Some(status.as_str().to_owned()),
        )
        .change(AuditEntity::Approval, &approval.id.0, "comments", approval.comments.clone(), comments.clone());
    approval.status = status;
    approval.comments = comments;
    approval.decided_at = Some(context.at);
}

fn record_workflow_change(
    batch: &mut AuditBatch<'_>,
    request: &TrainingRequest,
    before: &WorkflowSnapshot,
) {
    let after = &request.workflow;
    batch
        .change(
            AuditEntity::TrainingRequest,
            &request.id.0,
            "status",
            Some(before.status.as_str().to_owned()),
            Some(after.status.as_str().to_owned()),
        )
        .change(
            AuditEntity::TrainingRequest,
            &request.id.0,
            "current_approval_level",
            Some(before.level.to_string()),
            Some(after.level.to_string()),
        )
        .change(
            AuditEntity::TrainingRequest,
            &request.id.0,
            "current_approver",
            before.approver.as_ref().map(|user| user.0.clone()),
            after.approver.as_ref().map(|user| user.0.clone()),
        );
}

fn approval_required(request: &TrainingRequest, approval: &Approval) -> SideEffect {
    SideEffect::Notify(
        NotificationRequest::new(
            approval.approver.clone(),
            NotificationType::ApprovalRequired,
            "Approval required",
            format!(
                "Training request {} from {} needs your {} approval (level {})",
                request.request_number.0,
                request.requester,
                approval.role.label(),
                approval.level
            ),
        )
        .referencing("approval", approval.id.0.clone()),
    )
}

fn requester_notice(
    request: &TrainingRequest,
    kind: NotificationType,
    title: &str,
    message: String,
) -> SideEffect {
    SideEffect::Notify(
        NotificationRequest::new(request.requester.clone(), kind, title, message)
            .referencing("training_request", request.id.0.clone()),
    )
}
