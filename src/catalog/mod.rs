use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{CourseSection, CourseSnapshot, Discount, DiscountKind};

/// Read side of the catalog collaborator. The enrollment core only ever
/// reads courses and discount records; authoring and usage accounting live
/// with whoever owns the catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn fetch_course(&self, course_id: Uuid) -> Result<Option<CourseSnapshot>, AppError>;
    async fn fetch_discount(&self, discount_id: Uuid) -> Result<Option<Discount>, AppError>;
}

pub struct SqliteCatalogStore {
    db: SqlitePool,
}

impl SqliteCatalogStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[derive(sqlx::FromRow)]
struct CourseRow {
    id: String,
    title: String,
    price: f64,
    curriculum: String,
    discount_ids: String,
    page_discount_ids: String,
}

#[derive(sqlx::FromRow)]
struct DiscountRow {
    id: String,
    code: String,
    kind: DiscountKind,
    value: f64,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    usage_limit: Option<i64>,
    used_count: i64,
    course_ids: String,
    active: bool,
}

impl CourseRow {
    fn into_snapshot(self) -> Result<CourseSnapshot, AppError> {
        let curriculum: Vec<CourseSection> = serde_json::from_str(&self.curriculum)?;
        Ok(CourseSnapshot {
            id: parse_id(&self.id)?,
            title: self.title,
            price: self.price,
            curriculum,
            discount_ids: serde_json::from_str(&self.discount_ids)?,
            page_discount_ids: serde_json::from_str(&self.page_discount_ids)?,
        })
    }
}

impl DiscountRow {
    fn into_discount(self) -> Result<Discount, AppError> {
        Ok(Discount {
            id: parse_id(&self.id)?,
            code: self.code,
            kind: self.kind,
            value: self.value,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            usage_limit: self.usage_limit,
            used_count: self.used_count,
            course_ids: serde_json::from_str(&self.course_ids)?,
            active: self.active,
        })
    }
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw)
        .map_err(|e| AppError::Validation(format!("malformed id in catalog record: {raw}: {e}")))
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn fetch_course(&self, course_id: Uuid) -> Result<Option<CourseSnapshot>, AppError> {
        let row = sqlx::query_as::<_, CourseRow>(
            "SELECT id, title, price, curriculum, discount_ids, page_discount_ids FROM courses WHERE id = ?",
        )
        .bind(course_id.to_string())
        .fetch_optional(&self.db)
        .await?;

        row.map(CourseRow::into_snapshot).transpose()
    }

    async fn fetch_discount(&self, discount_id: Uuid) -> Result<Option<Discount>, AppError> {
        let row = sqlx::query_as::<_, DiscountRow>(
            "SELECT id, code, kind, value, starts_at, ends_at, usage_limit, used_count, course_ids, active FROM discounts WHERE id = ?",
        )
        .bind(discount_id.to_string())
        .fetch_optional(&self.db)
        .await?;

        row.map(DiscountRow::into_discount).transpose()
    }
}

/// Canned in-memory catalog for tests and local experiments.
pub struct FixedCatalog {
    courses: Vec<CourseSnapshot>,
    discounts: Vec<Discount>,
}

impl FixedCatalog {
    pub fn new(courses: Vec<CourseSnapshot>, discounts: Vec<Discount>) -> Self {
        Self { courses, discounts }
    }
}

#[async_trait]
impl CatalogStore for FixedCatalog {
    async fn fetch_course(&self, course_id: Uuid) -> Result<Option<CourseSnapshot>, AppError> {
        Ok(self.courses.iter().find(|c| c.id == course_id).cloned())
    }

    async fn fetch_discount(&self, discount_id: Uuid) -> Result<Option<Discount>, AppError> {
        Ok(self.discounts.iter().find(|d| d.id == discount_id).cloned())
    }
}
