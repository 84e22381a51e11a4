use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::course::CourseId;
use crate::domain::enrollment::EnrollmentId;
use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ApprovalRequired,
    RequestApproved,
    RequestRejected,
    EnrollmentConfirmed,
    SessionCancelled,
    SessionScheduled,
    TrainingCompleted,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApprovalRequired => "approval_required",
            Self::RequestApproved => "request_approved",
            Self::RequestRejected => "request_rejected",
            Self::EnrollmentConfirmed => "enrollment_confirmed",
            Self::SessionCancelled => "session_cancelled",
            Self::SessionScheduled => "session_scheduled",
            Self::TrainingCompleted => "training_completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approval_required" => Some(Self::ApprovalRequired),
            "request_approved" => Some(Self::RequestApproved),
            "request_rejected" => Some(Self::RequestRejected),
            "enrollment_confirmed" => Some(Self::EnrollmentConfirmed),
            "session_cancelled" => Some(Self::SessionCancelled),
            "session_scheduled" => Some(Self::SessionScheduled),
            "training_completed" => Some(Self::TrainingCompleted),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub kind: NotificationType,
    pub reference_type: String,
    pub reference_id: String,
}

impl NotificationRequest {
    pub fn new(
        user_id: UserId,
        kind: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            title: title.into(),
            message: message.into(),
            kind,
            reference_type: String::new(),
            reference_id: String::new(),
        }
    }

    pub fn referencing(mut self, reference_type: &str, reference_id: impl Into<String>) -> Self {
        self.reference_type = reference_type.to_owned();
        self.reference_id = reference_id.into();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub enrollment_id: EnrollmentId,
    pub participant: UserId,
    pub course_id: CourseId,
}

/// Work a committed operation hands to external collaborators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideEffect {
    Notify(NotificationRequest),
    IssueCertificate(CertificateRequest),
}

impl SideEffect {
    pub fn notification(&self) -> Option<&NotificationRequest> {
        match self {
            Self::Notify(request) => Some(request),
            Self::IssueCertificate(_) => None,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn create(&self, request: &NotificationRequest) -> Result<(), DeliveryError>;
}

#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    async fn request_certificate(&self, request: &CertificateRequest) -> Result<(), DeliveryError>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Fire-and-forget delivery. Failures are logged and never reach the originating operation.
pub async fn dispatch<N, C>(
    effects: &[SideEffect],
    notifier: &N,
    issuer: &C,
    correlation_id: &str,
) -> DispatchReport
where
    N: NotificationService + ?Sized,
    C: CertificateIssuer + ?Sized,
{
    let mut report = DispatchReport::default();
    for effect in effects {
        let (target, result) = match effect {
            SideEffect::Notify(request) => (request.user_id.0.as_str(), notifier.create(request).await),
            SideEffect::IssueCertificate(request) => {
                (request.participant.0.as_str(), issuer.request_certificate(request).await)
            }
        };

        match result {
            Ok(()) => {
                report.delivered += 1;
                debug!(
                    event_name = "workflow.notification.delivered",
                    correlation_id,
                    recipient = target,
                    "side effect delivered"
                );
            }
            Err(error) => {
                report.failed += 1;
                warn!(
                    event_name = "workflow.notification.delivery_failed",
                    correlation_id,
                    recipient = target,
                    error = %error,
                    "side effect delivery failed; ignoring"
                );
            }
        }
    }
    report
}

#[derive(Clone, Default)]
pub struct InMemoryNotificationService {
    sent: Arc<Mutex<Vec<NotificationRequest>>>,
    fail_for: Option<UserId>,
}

impl InMemoryNotificationService {
    /// Rejects every notification addressed to `user`.
    pub fn failing_for(user: &str) -> Self {
        Self { sent: Arc::default(), fail_for: Some(UserId::new(user)) }
    }

    pub fn sent(&self) -> Vec<NotificationRequest> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl NotificationService for InMemoryNotificationService {
    async fn create(&self, request: &NotificationRequest) -> Result<(), DeliveryError> {
        if self.fail_for.as_ref() == Some(&request.user_id) {
            return Err(DeliveryError::Unavailable(format!("mailbox of {}", request.user_id)));
        }
        match self.sent.lock() {
            Ok(mut sent) => sent.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCertificateIssuer {
    requested: Arc<Mutex<Vec<CertificateRequest>>>,
}

impl InMemoryCertificateIssuer {
    pub fn requested(&self) -> Vec<CertificateRequest> {
        match self.requested.lock() {
            Ok(requested) => requested.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl CertificateIssuer for InMemoryCertificateIssuer {
    async fn request_certificate(&self, request: &CertificateRequest) -> Result<(), DeliveryError> {
        match self.requested.lock() {
            Ok(mut requested) => requested.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::course::CourseId;
    use crate::domain::enrollment::EnrollmentId;
    use crate::domain::user::UserId;
    use crate::notification::{
        dispatch, CertificateRequest, InMemoryCertificateIssuer, InMemoryNotificationService,
        NotificationRequest, NotificationType, SideEffect,
    };

    fn notify(user: &str) -> SideEffect {
        SideEffect::Notify(
            NotificationRequest::new(
                UserId::new(user),
                NotificationType::ApprovalRequired,
                "Approval required",
                "A training request is waiting for you",
            )
            .referencing("training_request", "r-1"),
        )
    }

    #[tokio::test]
    async fn delivery_failure_is_counted_but_does_not_stop_the_rest() {
        let notifier = InMemoryNotificationService::failing_for("hrbp-x");
        let issuer = InMemoryCertificateIssuer::default();
        let effects = vec![
            notify("hrbp-x"),
            notify("manager-1"),
            SideEffect::IssueCertificate(CertificateRequest {
                enrollment_id: EnrollmentId("e-1".to_owned()),
                participant: UserId::new("emp-1"),
                course_id: CourseId("c-1".to_owned()),
            }),
        ];

        let report = dispatch(&effects, &notifier, &issuer, "req-9").await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 2);
        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(notifier.sent()[0].user_id, UserId::new("manager-1"));
        assert_eq!(issuer.requested().len(), 1);
    }
}
