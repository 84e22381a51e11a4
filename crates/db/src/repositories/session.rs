use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use skillpath_core::domain::course::CourseId;
use skillpath_core::domain::enrollment::{
    CompletionSource, CompletionStatus, EnrollmentId, EnrollmentStatus, Finalization,
    SessionEnrollment,
};
use skillpath_core::domain::session::{Session, SessionId, SessionStatus};
use skillpath_core::domain::user::UserId;
use skillpath_core::enrollment::SessionRoster;

use super::{
    column, parse_count, parse_decimal, parse_enum, parse_optional_timestamp, parse_timestamp,
    timestamp, RepositoryError,
};
use crate::DbPool;

const SESSION_COLUMNS: &str = "id, course_id, title, capacity, enrolled_count, waitlist_count,
     status, expected_minutes, starts_at, version";

const ENROLLMENT_COLUMNS: &str = "id, session_id, participant_id, status, waitlist_position,
     attended_minutes, score, completion_status, passed, completion_source,
     attendance_finalized_by, attendance_finalized_at, completion_finalized_by,
     completion_finalized_at, cancellation_reason, cancelled_at, enrolled_at, updated_at";

fn row_to_session(row: &SqliteRow) -> Result<Session, RepositoryError> {
    let status: String = column(row, "status")?;

    Ok(Session {
        id: SessionId(column(row, "id")?),
        course_id: CourseId(column(row, "course_id")?),
        title: column(row, "title")?,
        capacity: parse_count("capacity", column(row, "capacity")?)?,
        enrolled_count: parse_count("enrolled_count", column(row, "enrolled_count")?)?,
        waitlist_count: parse_count("waitlist_count", column(row, "waitlist_count")?)?,
        status: parse_enum("status", &status, SessionStatus::parse)?,
        expected_minutes: parse_count("expected_minutes", column(row, "expected_minutes")?)?,
        starts_at: parse_optional_timestamp("starts_at", column(row, "starts_at")?)?,
        version: column(row, "version")?,
    })
}

fn finalization(
    row: &SqliteRow,
    by_column: &str,
    at_column: &str,
) -> Result<Option<Finalization>, RepositoryError> {
    let by: Option<String> = column(row, by_column)?;
    let at = parse_optional_timestamp(at_column, column(row, at_column)?)?;
    match (by, at) {
        (Some(by), Some(at)) => Ok(Some(Finalization { by: UserId(by), at })),
        (None, None) => Ok(None),
        _ => Err(RepositoryError::Decode(format!(
            "{by_column}/{at_column}: finalization must set both columns or neither"
        ))),
    }
}

fn row_to_enrollment(row: &SqliteRow) -> Result<SessionEnrollment, RepositoryError> {
    let status: String = column(row, "status")?;
    let completion_status: String = column(row, "completion_status")?;
    let completion_source: Option<String> = column(row, "completion_source")?;
    let score: Option<String> = column(row, "score")?;
    let waitlist_position: Option<i64> = column(row, "waitlist_position")?;
    let enrolled_at: String = column(row, "enrolled_at")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(SessionEnrollment {
        id: EnrollmentId(column(row, "id")?),
        session_id: SessionId(column(row, "session_id")?),
        participant: UserId(column(row, "participant_id")?),
        status: parse_enum("status", &status, EnrollmentStatus::parse)?,
        waitlist_position: waitlist_position
            .map(|position| parse_count("waitlist_position", position))
            .transpose()?,
        attended_minutes: parse_count("attended_minutes", column(row, "attended_minutes")?)?,
        score: score.map(|score| parse_decimal("score", &score)).transpose()?,
        completion_status: parse_enum(
            "completion_status",
            &completion_status,
            CompletionStatus::parse,
        )?,
        passed: column(row, "passed")?,
        completion_source: completion_source
            .map(|source| parse_enum("completion_source", &source, CompletionSource::parse))
            .transpose()?,
        attendance_final: finalization(row, "attendance_finalized_by", "attendance_finalized_at")?,
        completion_final: finalization(row, "completion_finalized_by", "completion_finalized_at")?,
        cancellation_reason: column(row, "cancellation_reason")?,
        cancelled_at: parse_optional_timestamp("cancelled_at", column(row, "cancelled_at")?)?,
        enrolled_at: parse_timestamp("enrolled_at", &enrolled_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

pub async fn insert_session(
    conn: &mut SqliteConnection,
    session: &Session,
) -> Result<(), RepositoryError> {
    if session.capacity == 0 {
        return Err(RepositoryError::Invalid(format!(
            "session `{}` must have a capacity of at least one seat",
            session.id
        )));
    }

    sqlx::query(&format!(
        "INSERT INTO training_session ({SESSION_COLUMNS}, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&session.id.0)
    .bind(&session.course_id.0)
    .bind(&session.title)
    .bind(session.capacity)
    .bind(session.enrolled_count)
    .bind(session.waitlist_count)
    .bind(session.status.as_str())
    .bind(session.expected_minutes)
    .bind(session.starts_at.map(timestamp))
    .bind(session.version)
    .bind(timestamp(chrono::Utc::now()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Session plus every enrollment row, cancelled ones included.
pub async fn load_roster(
    conn: &mut SqliteConnection,
    id: &SessionId,
) -> Result<SessionRoster, RepositoryError> {
    let row =
        sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM training_session WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&mut *conn)
            .await?;
    let session = match row {
        Some(ref row) => row_to_session(row)?,
        None => return Err(RepositoryError::NotFound { entity: "session", id: id.0.clone() }),
    };

    let rows = sqlx::query(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM session_enrollment
         WHERE session_id = ? ORDER BY enrolled_at, rowid"
    ))
    .bind(&id.0)
    .fetch_all(&mut *conn)
    .await?;
    let enrollments = rows.iter().map(row_to_enrollment).collect::<Result<Vec<_>, _>>()?;

    Ok(SessionRoster::new(session, enrollments))
}

pub async fn session_id_for_enrollment(
    conn: &mut SqliteConnection,
    enrollment_id: &EnrollmentId,
) -> Result<SessionId, RepositoryError> {
    let session_id: Option<String> =
        sqlx::query_scalar("SELECT session_id FROM session_enrollment WHERE id = ?")
            .bind(&enrollment_id.0)
            .fetch_optional(&mut *conn)
            .await?;

    session_id.map(SessionId).ok_or_else(|| RepositoryError::NotFound {
        entity: "enrollment",
        id: enrollment_id.0.clone(),
    })
}

/// Writes the roster back as one unit. The counters written are those derived from
/// the rows; the session row only changes if its version is still `loaded_version`.
pub async fn save_roster(
    conn: &mut SqliteConnection,
    roster: &SessionRoster,
    loaded_version: i64,
) -> Result<i64, RepositoryError> {
    let mut derived = roster.clone();
    derived.recount();
    let session = &derived.session;
    let next_version = loaded_version + 1;

    let updated = sqlx::query(
        "UPDATE training_session
         SET enrolled_count = ?, waitlist_count = ?, status = ?, version = ?, updated_at = ?
         WHERE id = ? AND version = ?",
    )
    .bind(session.enrolled_count)
    .bind(session.waitlist_count)
    .bind(session.status.as_str())
    .bind(next_version)
    .bind(timestamp(chrono::Utc::now()))
    .bind(&session.id.0)
    .bind(loaded_version)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(RepositoryError::Conflict { entity: "session", id: session.id.0.clone() });
    }

    for enrollment in &derived.enrollments {
        upsert_enrollment(conn, enrollment).await?;
    }

    Ok(next_version)
}

async fn upsert_enrollment(
    conn: &mut SqliteConnection,
    enrollment: &SessionEnrollment,
) -> Result<(), RepositoryError> {
    let (attendance_by, attendance_at) = split_finalization(enrollment.attendance_final.as_ref());
    let (completion_by, completion_at) = split_finalization(enrollment.completion_final.as_ref());

    sqlx::query(&format!(
        "INSERT INTO session_enrollment ({ENROLLMENT_COLUMNS})
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             status = excluded.status,
             waitlist_position = excluded.waitlist_position,
             attended_minutes = excluded.attended_minutes,
             score = excluded.score,
             completion_status = excluded.completion_status,
             passed = excluded.passed,
             completion_source = excluded.completion_source,
             attendance_finalized_by = excluded.attendance_finalized_by,
             attendance_finalized_at = excluded.attendance_finalized_at,
             completion_finalized_by = excluded.completion_finalized_by,
             completion_finalized_at = excluded.completion_finalized_at,
             cancellation_reason = excluded.cancellation_reason,
             cancelled_at = excluded.cancelled_at,
             updated_at = excluded.updated_at"
    ))
    .bind(&enrollment.id.0)
    .bind(&enrollment.session_id.0)
    .bind(&enrollment.participant.0)
    .bind(enrollment.status.as_str())
    .bind(enrollment.waitlist_position)
    .bind(enrollment.attended_minutes)
    .bind(enrollment.score.map(|score| score.to_string()))
    .bind(enrollment.completion_status.as_str())
    .bind(enrollment.passed)
    .bind(enrollment.completion_source.map(|source| source.as_str()))
    .bind(attendance_by)
    .bind(attendance_at)
    .bind(completion_by)
    .bind(completion_at)
    .bind(enrollment.cancellation_reason.as_deref())
    .bind(enrollment.cancelled_at.map(timestamp))
    .bind(timestamp(enrollment.enrolled_at))
    .bind(timestamp(enrollment.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn split_finalization(finalization: Option<&Finalization>) -> (Option<String>, Option<String>) {
    match finalization {
        Some(finalization) => (Some(finalization.by.0.clone()), Some(timestamp(finalization.at))),
        None => (None, None),
    }
}

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_roster(&self, id: &SessionId) -> Result<Option<SessionRoster>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        match load_roster(&mut conn, id).await {
            Ok(roster) => Ok(Some(roster)),
            Err(RepositoryError::NotFound { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    pub async fn create(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        insert_session(&mut conn, session).await
    }
}
