use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thiserror::Error;

use skillpath_core::audit::AuditLogEntry;
use skillpath_core::domain::course::{CourseId, CoursePolicy};
use skillpath_core::errors::{StateConflict, WorkflowError};

pub mod audit;
pub mod course;
pub mod directory;
pub mod outbox;
pub mod request;
pub mod session;

pub use audit::SqlAuditLogRepository;
pub use course::SqlCourseRepository;
pub use directory::{EmployeeRecord, EmployeeRole, SqlDirectory};
pub use outbox::{SqlCertificateQueue, SqlNotificationOutbox};
pub use request::SqlRequestRepository;
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} `{id}` changed since it was loaded")]
    Conflict { entity: &'static str, id: String },
    #[error("{0}")]
    Invalid(String),
}

impl From<RepositoryError> for WorkflowError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound { entity, id } => WorkflowError::not_found(entity, id),
            RepositoryError::Conflict { entity, id } => {
                StateConflict::ConcurrentModification { entity, id }.into()
            }
            RepositoryError::Invalid(message) => WorkflowError::validation(message),
            RepositoryError::Database(_) | RepositoryError::Decode(_) => {
                WorkflowError::transient(value.to_string())
            }
        }
    }
}

#[async_trait]
pub trait CourseRepository: Send + Sync {
    async fn find_by_id(&self, id: &CourseId) -> Result<Option<CoursePolicy>, RepositoryError>;
    async fn save(&self, course: &CoursePolicy) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn list_for_entity(&self, entity_id: &str) -> Result<Vec<AuditLogEntry>, RepositoryError>;
    async fn list_for_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError>;
}

/// Fixed-width UTC so that stored timestamps sort lexicographically.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(e.to_string()))
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: invalid timestamp `{value}`: {e}")))
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|value| parse_timestamp(column, &value)).transpose()
}

pub(crate) fn parse_decimal(column: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value)
        .map_err(|e| RepositoryError::Decode(format!("{column}: invalid decimal `{value}`: {e}")))
}

pub(crate) fn parse_enum<T>(
    column: &str,
    value: &str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    parse(value).ok_or_else(|| RepositoryError::Decode(format!("{column}: unknown value `{value}`")))
}

pub(crate) fn parse_count(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{column}: out of range value {value}")))
}
