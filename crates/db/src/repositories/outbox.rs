use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use skillpath_core::domain::course::CourseId;
use skillpath_core::domain::enrollment::EnrollmentId;
use skillpath_core::domain::user::UserId;
use skillpath_core::notification::{
    CertificateIssuer, CertificateRequest, DeliveryError, NotificationRequest, NotificationService,
    NotificationType,
};

use super::{column, parse_enum, timestamp, RepositoryError};
use crate::DbPool;

/// Writes notification requests to the `notification` table, from which the
/// in-app inbox reads. When disabled, requests are logged and dropped.
#[derive(Clone)]
pub struct SqlNotificationOutbox {
    pool: DbPool,
    enabled: bool,
}

impl SqlNotificationOutbox {
    pub fn new(pool: DbPool, enabled: bool) -> Self {
        Self { pool, enabled }
    }

    pub async fn inbox(&self, user: &UserId) -> Result<Vec<NotificationRequest>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT user_id, kind, title, message, reference_type, reference_id
             FROM notification WHERE user_id = ? ORDER BY created_at, rowid",
        )
        .bind(&user.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<NotificationRequest, RepositoryError> {
                let kind: String = column(row, "kind")?;
                Ok(NotificationRequest {
                    user_id: UserId(column(row, "user_id")?),
                    title: column(row, "title")?,
                    message: column(row, "message")?,
                    kind: parse_enum("kind", &kind, NotificationType::parse)?,
                    reference_type: column(row, "reference_type")?,
                    reference_id: column(row, "reference_id")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl NotificationService for SqlNotificationOutbox {
    async fn create(&self, request: &NotificationRequest) -> Result<(), DeliveryError> {
        if !self.enabled {
            debug!(
                event_name = "workflow.notification.suppressed",
                recipient = %request.user_id,
                kind = request.kind.as_str(),
                "notifications disabled; dropping request"
            );
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO notification
                (id, user_id, kind, title, message, reference_type, reference_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&request.user_id.0)
        .bind(request.kind.as_str())
        .bind(&request.title)
        .bind(&request.message)
        .bind(&request.reference_type)
        .bind(&request.reference_id)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| DeliveryError::Unavailable(e.to_string()))?;

        Ok(())
    }
}

/// Queue read by the certificate service. One request per enrollment.
#[derive(Clone)]
pub struct SqlCertificateQueue {
    pool: DbPool,
}

impl SqlCertificateQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn requested(&self) -> Result<Vec<CertificateRequest>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT enrollment_id, participant_id, course_id FROM certificate_request
             WHERE status = 'requested' ORDER BY requested_at, rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<CertificateRequest, RepositoryError> {
                Ok(CertificateRequest {
                    enrollment_id: EnrollmentId(column(row, "enrollment_id")?),
                    participant: UserId(column(row, "participant_id")?),
                    course_id: CourseId(column(row, "course_id")?),
                })
            })
            .collect()
    }
}

#[async_trait]
impl CertificateIssuer for SqlCertificateQueue {
    async fn request_certificate(&self, request: &CertificateRequest) -> Result<(), DeliveryError> {
        sqlx::query(
            "INSERT INTO certificate_request (id, enrollment_id, participant_id, course_id, requested_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(enrollment_id) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&request.enrollment_id.0)
        .bind(&request.participant.0)
        .bind(&request.course_id.0)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| DeliveryError::Unavailable(e.to_string()))?;

        Ok(())
    }
}
