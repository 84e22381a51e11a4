use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use skillpath_core::domain::course::{CostLevel, CourseId, CoursePolicy, TrainingLocation};

use super::{column, parse_decimal, parse_enum, timestamp, CourseRepository, RepositoryError};
use crate::DbPool;

const COURSE_COLUMNS: &str = "id, title, training_location, cost_level, min_attendance_percent,
     pass_score, has_assessment, require_both_attendance_and_assessment";

fn row_to_course(row: &SqliteRow) -> Result<CoursePolicy, RepositoryError> {
    let location: String = column(row, "training_location")?;
    let cost_level: String = column(row, "cost_level")?;
    let min_attendance: String = column(row, "min_attendance_percent")?;
    let pass_score: String = column(row, "pass_score")?;

    Ok(CoursePolicy {
        id: CourseId(column(row, "id")?),
        title: column(row, "title")?,
        training_location: parse_enum("training_location", &location, TrainingLocation::parse)?,
        cost_level: parse_enum("cost_level", &cost_level, CostLevel::parse)?,
        min_attendance_percent: parse_decimal("min_attendance_percent", &min_attendance)?,
        pass_score: parse_decimal("pass_score", &pass_score)?,
        has_assessment: column(row, "has_assessment")?,
        require_both_attendance_and_assessment: column(
            row,
            "require_both_attendance_and_assessment",
        )?,
    })
}

pub async fn load_policy(
    conn: &mut SqliteConnection,
    id: &CourseId,
) -> Result<CoursePolicy, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {COURSE_COLUMNS} FROM course WHERE id = ?"))
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(ref row) => row_to_course(row),
        None => Err(RepositoryError::NotFound { entity: "course", id: id.0.clone() }),
    }
}

/// Course catalog maintenance. The workflow itself only reads courses.
pub struct SqlCourseRepository {
    pool: DbPool,
}

impl SqlCourseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CourseRepository for SqlCourseRepository {
    async fn find_by_id(&self, id: &CourseId) -> Result<Option<CoursePolicy>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COURSE_COLUMNS} FROM course WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_course).transpose()
    }

    async fn save(&self, course: &CoursePolicy) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO course (id, title, training_location, cost_level, min_attendance_percent,
                                 pass_score, has_assessment, require_both_attendance_and_assessment,
                                 created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 training_location = excluded.training_location,
                 cost_level = excluded.cost_level,
                 min_attendance_percent = excluded.min_attendance_percent,
                 pass_score = excluded.pass_score,
                 has_assessment = excluded.has_assessment,
                 require_both_attendance_and_assessment = excluded.require_both_attendance_and_assessment",
        )
        .bind(&course.id.0)
        .bind(&course.title)
        .bind(course.training_location.as_str())
        .bind(course.cost_level.as_str())
        .bind(course.min_attendance_percent.to_string())
        .bind(course.pass_score.to_string())
        .bind(course.has_assessment)
        .bind(course.require_both_attendance_and_assessment)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
