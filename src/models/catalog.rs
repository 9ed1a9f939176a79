use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Read-only view of a course as the catalog collaborator supplies it.
/// Checkout freezes `curriculum` into the enrollment; nothing here is
/// consulted again for an existing enrollment except display pricing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseSnapshot {
    pub id: Uuid,
    pub title: String,
    pub price: f64,
    pub curriculum: Vec<CourseSection>,
    /// Discount ids a learner may explicitly request at checkout.
    pub discount_ids: Vec<Uuid>,
    /// Course-page discounts, applied to every checkout and to display pricing.
    pub page_discount_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseSection {
    pub id: Uuid,
    pub contents: Vec<CourseContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseContent {
    pub id: Uuid,
    pub kind: ContentKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Session,
    Quiz,
    Assessment,
}

impl ContentKind {
    /// Sessions complete on attendance alone; only quiz and assessment
    /// attempts go through instructor review.
    pub fn reviewable(&self) -> bool {
        !matches!(self, ContentKind::Session)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DiscountKind {
    Percentage,
    Fixed,
}

/// Discount record, managed elsewhere. `used_count`/`usage_limit` are
/// carried as data but never enforced here; accounting belongs to the
/// collaborator that owns the records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discount {
    pub id: Uuid,
    pub code: String,
    pub kind: DiscountKind,
    pub value: f64,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub usage_limit: Option<i64>,
    pub used_count: i64,
    /// Empty means the discount applies to every course.
    pub course_ids: Vec<Uuid>,
    pub active: bool,
}

impl Discount {
    pub fn applies_to(&self, course_id: Uuid, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        if self.starts_at.is_some_and(|s| now < s) {
            return false;
        }
        if self.ends_at.is_some_and(|e| now > e) {
            return false;
        }
        self.course_ids.is_empty() || self.course_ids.contains(&course_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn discount(active: bool, course_ids: Vec<Uuid>) -> Discount {
        Discount {
            id: Uuid::new_v4(),
            code: "WELCOME10".to_string(),
            kind: DiscountKind::Percentage,
            value: 10.0,
            starts_at: None,
            ends_at: None,
            usage_limit: None,
            used_count: 0,
            course_ids,
            active,
        }
    }

    #[test]
    fn unrestricted_discount_applies_to_any_course() {
        let d = discount(true, vec![]);
        assert!(d.applies_to(Uuid::new_v4(), Utc::now()));
    }

    #[test]
    fn inactive_discount_never_applies() {
        let d = discount(false, vec![]);
        assert!(!d.applies_to(Uuid::new_v4(), Utc::now()));
    }

    #[test]
    fn course_restriction_is_honored() {
        let course = Uuid::new_v4();
        let d = discount(true, vec![course]);
        assert!(d.applies_to(course, Utc::now()));
        assert!(!d.applies_to(Uuid::new_v4(), Utc::now()));
    }

    #[test]
    fn validity_window_is_honored() {
        let now = Utc::now();
        let mut d = discount(true, vec![]);
        d.starts_at = Some(now + Duration::days(1));
        assert!(!d.applies_to(Uuid::new_v4(), now));

        d.starts_at = Some(now - Duration::days(2));
        d.ends_at = Some(now - Duration::days(1));
        assert!(!d.applies_to(Uuid::new_v4(), now));

        d.ends_at = Some(now + Duration::days(1));
        assert!(d.applies_to(Uuid::new_v4(), now));
    }
}
