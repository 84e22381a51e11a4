use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use skillpath_core::approvals::RequestCase;
use skillpath_core::domain::approval::{Approval, ApprovalId, ApprovalStatus, ApproverRole};
use skillpath_core::domain::course::CourseId;
use skillpath_core::domain::request::{
    Priority, RequestId, RequestNumber, RequestStatus, TrainingRequest, WorkflowSnapshot,
};
use skillpath_core::domain::session::SessionId;
use skillpath_core::domain::user::{EntityId, UserId};

use super::{
    column, parse_count, parse_decimal, parse_enum, parse_optional_timestamp, parse_timestamp,
    timestamp, RepositoryError,
};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, request_number, requester_id, requester_entity_id, course_id,
     session_id, justification, priority, estimated_cost, status, current_approval_level,
     current_approver_id, submitted_at, version, created_at, updated_at";

const APPROVAL_COLUMNS: &str = "id, request_id, approver_id, level, role, status, comments,
     delegated_from_id, decided_at, created_at";

fn row_to_request(row: &SqliteRow) -> Result<TrainingRequest, RepositoryError> {
    let priority: String = column(row, "priority")?;
    let estimated_cost: String = column(row, "estimated_cost")?;
    let status: String = column(row, "status")?;
    let level: i64 = column(row, "current_approval_level")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(TrainingRequest {
        id: RequestId(column(row, "id")?),
        request_number: RequestNumber(column(row, "request_number")?),
        requester: UserId(column(row, "requester_id")?),
        requester_entity: column::<Option<String>>(row, "requester_entity_id")?.map(EntityId),
        course_id: CourseId(column(row, "course_id")?),
        session_id: column::<Option<String>>(row, "session_id")?.map(SessionId),
        justification: column(row, "justification")?,
        priority: parse_enum("priority", &priority, Priority::parse)?,
        estimated_cost: parse_decimal("estimated_cost", &estimated_cost)?,
        workflow: WorkflowSnapshot {
            status: parse_enum("status", &status, RequestStatus::parse)?,
            level: parse_count("current_approval_level", level)?,
            approver: column::<Option<String>>(row, "current_approver_id")?.map(UserId),
        },
        submitted_at: parse_optional_timestamp("submitted_at", column(row, "submitted_at")?)?,
        version: column(row, "version")?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

fn row_to_approval(row: &SqliteRow) -> Result<Approval, RepositoryError> {
    let level: i64 = column(row, "level")?;
    let role: String = column(row, "role")?;
    let status: String = column(row, "status")?;
    let created_at: String = column(row, "created_at")?;

    Ok(Approval {
        id: ApprovalId(column(row, "id")?),
        request_id: RequestId(column(row, "request_id")?),
        approver: UserId(column(row, "approver_id")?),
        level: parse_count("level", level)?,
        role: parse_enum("role", &role, ApproverRole::parse)?,
        status: parse_enum("status", &status, ApprovalStatus::parse)?,
        comments: column(row, "comments")?,
        delegated_from: column::<Option<String>>(row, "delegated_from_id")?.map(ApprovalId),
        decided_at: parse_optional_timestamp("decided_at", column(row, "decided_at")?)?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

/// Next `TR-<year>-<seq>` number. Runs inside the caller's transaction so that a
/// rolled-back draft does not consume a number.
pub async fn next_request_number(
    conn: &mut SqliteConnection,
    year: i32,
) -> Result<RequestNumber, RepositoryError> {
    let sequence: i64 = sqlx::query_scalar(
        "INSERT INTO request_number_sequence (year, last_value) VALUES (?, 1)
         ON CONFLICT(year) DO UPDATE SET last_value = last_value + 1
         RETURNING last_value",
    )
    .bind(year)
    .fetch_one(&mut *conn)
    .await?;

    Ok(RequestNumber::format(year, parse_count("last_value", sequence)?))
}

pub async fn insert_request(
    conn: &mut SqliteConnection,
    request: &TrainingRequest,
) -> Result<(), RepositoryError> {
    sqlx::query(&format!(
        "INSERT INTO training_request ({REQUEST_COLUMNS})
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&request.id.0)
    .bind(&request.request_number.0)
    .bind(&request.requester.0)
    .bind(request.requester_entity.as_ref().map(|entity| entity.0.as_str()))
    .bind(&request.course_id.0)
    .bind(request.session_id.as_ref().map(|session| session.0.as_str()))
    .bind(&request.justification)
    .bind(request.priority.as_str())
    .bind(request.estimated_cost.to_string())
    .bind(request.status().as_str())
    .bind(request.current_approval_level())
    .bind(request.current_approver().map(|approver| approver.0.as_str()))
    .bind(request.submitted_at.map(timestamp))
    .bind(request.version)
    .bind(timestamp(request.created_at))
    .bind(timestamp(request.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn load_case(
    conn: &mut SqliteConnection,
    id: &RequestId,
) -> Result<RequestCase, RepositoryError> {
    let row =
        sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM training_request WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&mut *conn)
            .await?;
    let request = match row {
        Some(ref row) => row_to_request(row)?,
        None => {
            return Err(RepositoryError::NotFound { entity: "training request", id: id.0.clone() })
        }
    };

    let rows = sqlx::query(&format!(
        "SELECT {APPROVAL_COLUMNS} FROM approval WHERE request_id = ? ORDER BY created_at, rowid"
    ))
    .bind(&id.0)
    .fetch_all(&mut *conn)
    .await?;
    let approvals = rows.iter().map(row_to_approval).collect::<Result<Vec<_>, _>>()?;

    Ok(RequestCase { request, approvals })
}

pub async fn request_id_for_approval(
    conn: &mut SqliteConnection,
    approval_id: &ApprovalId,
) -> Result<RequestId, RepositoryError> {
    let request_id: Option<String> =
        sqlx::query_scalar("SELECT request_id FROM approval WHERE id = ?")
            .bind(&approval_id.0)
            .fetch_optional(&mut *conn)
            .await?;

    request_id
        .map(RequestId)
        .ok_or_else(|| RepositoryError::NotFound { entity: "approval", id: approval_id.0.clone() })
}

/// Writes the case back. The request row only changes if nobody else moved its
/// version or approval level since `loaded` was read. Returns the new version.
pub async fn save_case(
    conn: &mut SqliteConnection,
    case: &RequestCase,
    loaded: &TrainingRequest,
) -> Result<i64, RepositoryError> {
    let request = &case.request;
    let next_version = loaded.version + 1;
    let updated = sqlx::query(
        "UPDATE training_request
         SET requester_entity_id = ?, status = ?, current_approval_level = ?,
             current_approver_id = ?, submitted_at = ?, justification = ?,
             version = ?, updated_at = ?
         WHERE id = ? AND version = ? AND current_approval_level = ?",
    )
    .bind(request.requester_entity.as_ref().map(|entity| entity.0.as_str()))
    .bind(request.status().as_str())
    .bind(request.current_approval_level())
    .bind(request.current_approver().map(|approver| approver.0.as_str()))
    .bind(request.submitted_at.map(timestamp))
    .bind(&request.justification)
    .bind(next_version)
    .bind(timestamp(request.updated_at))
    .bind(&request.id.0)
    .bind(loaded.version)
    .bind(loaded.current_approval_level())
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(RepositoryError::Conflict { entity: "training request", id: request.id.0.clone() });
    }

    for approval in &case.approvals {
        upsert_approval(conn, approval).await?;
    }

    Ok(next_version)
}

async fn upsert_approval(
    conn: &mut SqliteConnection,
    approval: &Approval,
) -> Result<(), RepositoryError> {
    sqlx::query(&format!(
        "INSERT INTO approval ({APPROVAL_COLUMNS})
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             status = excluded.status,
             comments = excluded.comments,
             decided_at = excluded.decided_at"
    ))
    .bind(&approval.id.0)
    .bind(&approval.request_id.0)
    .bind(&approval.approver.0)
    .bind(approval.level)
    .bind(approval.role.as_str())
    .bind(approval.status.as_str())
    .bind(approval.comments.as_deref())
    .bind(approval.delegated_from.as_ref().map(|id| id.0.as_str()))
    .bind(approval.decided_at.map(timestamp))
    .bind(timestamp(approval.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Read side of requests and approvals, outside any workflow transaction.
pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_case(&self, id: &RequestId) -> Result<Option<RequestCase>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        match load_case(&mut conn, id).await {
            Ok(case) => Ok(Some(case)),
            Err(RepositoryError::NotFound { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Maps a human-facing number such as `TR-2026-00001` to the request id.
    pub async fn find_id_by_number(
        &self,
        number: &RequestNumber,
    ) -> Result<Option<RequestId>, RepositoryError> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT id FROM training_request WHERE request_number = ?")
                .bind(&number.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id.map(RequestId))
    }

    /// Open approvals assigned to `approver`, oldest first.
    pub async fn pending_for_approver(
        &self,
        approver: &UserId,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval
             WHERE approver_id = ? AND status = 'pending'
             ORDER BY created_at, rowid"
        ))
        .bind(&approver.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_approval).collect()
    }
}
