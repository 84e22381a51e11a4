use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use skillpath_core::audit::{AuditEntity, AuditLogEntry};
use skillpath_core::domain::user::UserId;

use super::{column, parse_enum, parse_timestamp, timestamp, AuditLogRepository, RepositoryError};
use crate::DbPool;

const AUDIT_COLUMNS: &str = "id, entity_type, entity_id, field, old_value, new_value, reason,
     actor_id, correlation_id, occurred_at";

fn row_to_entry(row: &SqliteRow) -> Result<AuditLogEntry, RepositoryError> {
    let entity: String = column(row, "entity_type")?;
    let occurred_at: String = column(row, "occurred_at")?;

    Ok(AuditLogEntry {
        entry_id: column(row, "id")?,
        entity: parse_enum("entity_type", &entity, AuditEntity::parse)?,
        entity_id: column(row, "entity_id")?,
        field: column(row, "field")?,
        old_value: column(row, "old_value")?,
        new_value: column(row, "new_value")?,
        reason: column(row, "reason")?,
        actor: UserId(column(row, "actor_id")?),
        correlation_id: column(row, "correlation_id")?,
        occurred_at: parse_timestamp("occurred_at", &occurred_at)?,
    })
}

/// Appends in the given order; the audit log is never updated or deleted from.
pub async fn append_entries(
    conn: &mut SqliteConnection,
    entries: &[AuditLogEntry],
) -> Result<(), RepositoryError> {
    for entry in entries {
        sqlx::query(&format!(
            "INSERT INTO audit_log ({AUDIT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&entry.entry_id)
        .bind(entry.entity.as_str())
        .bind(&entry.entity_id)
        .bind(&entry.field)
        .bind(entry.old_value.as_deref())
        .bind(entry.new_value.as_deref())
        .bind(entry.reason.as_deref())
        .bind(&entry.actor.0)
        .bind(&entry.correlation_id)
        .bind(timestamp(entry.occurred_at))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

pub struct SqlAuditLogRepository {
    pool: DbPool,
}

impl SqlAuditLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AuditLogRepository for SqlAuditLogRepository {
    async fn list_for_entity(&self, entity_id: &str) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log WHERE entity_id = ? ORDER BY occurred_at, rowid"
        ))
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn list_for_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log
             WHERE correlation_id = ? ORDER BY occurred_at, rowid"
        ))
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use skillpath_core::audit::{AuditContext, AuditEntity, AuditLogEntry};
    use skillpath_core::domain::user::UserId;

    use super::{append_entries, SqlAuditLogRepository};
    use crate::repositories::AuditLogRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn entries_are_listed_in_chronological_order() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let submit = AuditContext::new(UserId::new("emp-1"), "req-1").at(start);
        let decide =
            AuditContext::new(UserId::new("mgr-1"), "req-2").at(start + Duration::milliseconds(250));
        let entries = vec![
            AuditLogEntry::field_change(
                &decide,
                AuditEntity::TrainingRequest,
                "r-1",
                "status",
                Some("pending".to_owned()),
                Some("approved".to_owned()),
            ),
            AuditLogEntry::field_change(
                &submit,
                AuditEntity::TrainingRequest,
                "r-1",
                "status",
                Some("draft".to_owned()),
                Some("pending".to_owned()),
            ),
            AuditLogEntry::field_change(
                &submit,
                AuditEntity::TrainingRequest,
                "r-1",
                "current_approver",
                None,
                Some("mgr-1".to_owned()),
            )
            .with_reason("initial routing"),
        ];

        let mut conn = pool.acquire().await.expect("acquire");
        append_entries(&mut conn, &entries).await.expect("append");
        drop(conn);

        let repo = SqlAuditLogRepository::new(pool);
        let listed = repo.list_for_entity("r-1").await.expect("list");
        let fields: Vec<_> =
            listed.iter().map(|entry| (entry.correlation_id.as_str(), entry.field.as_str())).collect();
        assert_eq!(
            fields,
            vec![("req-1", "status"), ("req-1", "current_approver"), ("req-2", "status")]
        );
        assert_eq!(listed[1].reason.as_deref(), Some("initial routing"));
        assert_eq!(listed[2].occurred_at, start + Duration::milliseconds(250));

        assert_eq!(repo.list_for_correlation("req-2").await.expect("by correlation").len(), 1);
    }
}
