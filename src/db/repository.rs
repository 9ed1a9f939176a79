use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Enrollment, EnrollmentStatus, SectionProgress};

#[derive(sqlx::FromRow)]
struct EnrollmentRow {
    id: String,
    user_id: String,
    course_id: String,
    live_run_id: Option<String>,
    base_price: f64,
    final_price: f64,
    discounts_applied: String,
    status: EnrollmentStatus,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    progress: i64,
    sections_progress: String,
    revision: i64,
    updated_at: DateTime<Utc>,
}

const ENROLLMENT_COLUMNS: &str = "id, user_id, course_id, live_run_id, base_price, final_price, \
     discounts_applied, status, started_at, completed_at, progress, sections_progress, revision, updated_at";

impl EnrollmentRow {
    fn into_enrollment(self) -> Result<Enrollment, AppError> {
        let sections_progress: Vec<SectionProgress> = serde_json::from_str(&self.sections_progress)?;
        Ok(Enrollment {
            id: parse_id(&self.id)?,
            user_id: parse_id(&self.user_id)?,
            course_id: parse_id(&self.course_id)?,
            live_run_id: self.live_run_id.as_deref().map(parse_id).transpose()?,
            base_price: self.base_price,
            final_price: self.final_price,
            discounts_applied: serde_json::from_str(&self.discounts_applied)?,
            status: self.status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            progress: self.progress.clamp(0, 100) as u8,
            sections_progress,
            revision: self.revision,
            updated_at: self.updated_at,
        })
    }
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw)
        .map_err(|e| AppError::Validation(format!("malformed id in stored enrollment: {raw}: {e}")))
}

/// The UNIQUE (user_id, course_id) index is what enforces one enrollment per
/// learner per course; a duplicate insert surfaces as Conflict without any
/// racy pre-check.
pub async fn insert_enrollment(db: &SqlitePool, enrollment: &Enrollment) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO enrollments
            (id, user_id, course_id, live_run_id, base_price, final_price,
            discounts_applied, status, started_at, completed_at, progress,
            sections_progress, revision, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
    )
    .bind(enrollment.id.to_string())
    .bind(enrollment.user_id.to_string())
    .bind(enrollment.course_id.to_string())
    .bind(enrollment.live_run_id.map(|id| id.to_string()))
    .bind(enrollment.base_price)
    .bind(enrollment.final_price)
    .bind(serde_json::to_string(&enrollment.discounts_applied)?)
    .bind(enrollment.status)
    .bind(enrollment.started_at)
    .bind(enrollment.completed_at)
    .bind(enrollment.progress as i64)
    .bind(serde_json::to_string(&enrollment.sections_progress)?)
    .bind(enrollment.revision)
    .bind(enrollment.updated_at)
    .execute(db)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => AppError::Conflict(
            format!(
                "user {} is already enrolled in course {}",
                enrollment.user_id, enrollment.course_id
            ),
        ),
        other => AppError::Database(other),
    })?;

    Ok(())
}

pub async fn fetch_enrollment(
    db: &SqlitePool,
    id: Uuid,
) -> Result<Option<Enrollment>, AppError> {
    let row = sqlx::query_as::<_, EnrollmentRow>(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = ?"
    ))
    .bind(id.to_string())
    .fetch_optional(db)
    .await?;

    row.map(EnrollmentRow::into_enrollment).transpose()
}

pub async fn fetch_enrollment_by_course(
    db: &SqlitePool,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<Option<Enrollment>, AppError> {
    let row = sqlx::query_as::<_, EnrollmentRow>(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE user_id = ? AND course_id = ?"
    ))
    .bind(user_id.to_string())
    .bind(course_id.to_string())
    .fetch_optional(db)
    .await?;

    row.map(EnrollmentRow::into_enrollment).transpose()
}

pub async fn fetch_enrollments(
    db: &SqlitePool,
    user_id: Uuid,
    course_id: Option<Uuid>,
) -> Result<Vec<Enrollment>, AppError> {
    let rows = match course_id {
        Some(course_id) => {
            sqlx::query_as::<_, EnrollmentRow>(&format!(
                "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE user_id = ? AND course_id = ? ORDER BY started_at DESC"
            ))
            .bind(user_id.to_string())
            .bind(course_id.to_string())
            .fetch_all(db)
            .await?
        }
        None => {
            sqlx::query_as::<_, EnrollmentRow>(&format!(
                "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE user_id = ? ORDER BY started_at DESC"
            ))
            .bind(user_id.to_string())
            .fetch_all(db)
            .await?
        }
    };

    rows.into_iter().map(EnrollmentRow::into_enrollment).collect()
}

/// Revision-guarded write of every mutable field. Zero rows affected means a
/// concurrent writer got there first (or the row is gone); the caller's state
/// is stale and nothing was applied.
pub async fn update_enrollment(
    db: &SqlitePool,
    enrollment: &mut Enrollment,
) -> Result<(), AppError> {
    enrollment.updated_at = Utc::now();

    let result = sqlx::query(
        r#"
        UPDATE enrollments
        SET status = ?1,
            completed_at = ?2,
            progress = ?3,
            sections_progress = ?4,
            revision = revision + 1,
            updated_at = ?5
        WHERE id = ?6 AND revision = ?7
        "#,
    )
    .bind(enrollment.status)
    .bind(enrollment.completed_at)
    .bind(enrollment.progress as i64)
    .bind(serde_json::to_string(&enrollment.sections_progress)?)
    .bind(enrollment.updated_at)
    .bind(enrollment.id.to_string())
    .bind(enrollment.revision)
    .execute(db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict(format!(
            "enrollment {} was modified concurrently",
            enrollment.id
        )));
    }

    enrollment.revision += 1;
    Ok(())
}
