use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::CatalogStore;
use crate::db::repository;
use crate::error::AppError;
use crate::models::{
    Attempt, CheckoutRequest, CourseSnapshot, Discount, Enrollment, EnrollmentStatus,
    PendingContent, ReviewAttemptRequest, SectionProgress, SubmitAttemptRequest,
};
use crate::pricing;

pub struct EnrollmentService {
    db: SqlitePool,
    catalog: Arc<dyn CatalogStore>,
}

/// Result of an explicit completion request. When the enrollment is not done
/// yet this is a report, never a forced transition.
#[derive(Debug, Serialize)]
pub struct CompletionOutcome {
    pub completed: bool,
    pub enrollment: Enrollment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<Vec<PendingContent>>,
}

/// Course header with display-time pricing, recomputed from the current page
/// discounts rather than the price frozen at checkout.
#[derive(Debug, Clone, Serialize)]
pub struct CourseSummary {
    pub id: Uuid,
    pub title: String,
    pub base_price: f64,
    pub final_price: f64,
}

#[derive(Debug, Serialize)]
pub struct EnrolledCourse {
    pub enrollment: Enrollment,
    /// None when the course has disappeared from the catalog since checkout.
    pub course: Option<CourseSummary>,
}

impl EnrollmentService {
    pub fn new(db: SqlitePool, catalog: Arc<dyn CatalogStore>) -> Self {
        Self { db, catalog }
    }

    /// Enrolls a learner: price the course with the resolved discount stack,
    /// freeze the curriculum into progress records, insert. A second checkout
    /// for the same (user, course) pair fails with Conflict at the storage
    /// layer.
    pub async fn checkout(&self, req: CheckoutRequest) -> Result<Enrollment, AppError> {
        let course = self
            .catalog
            .fetch_course(req.course_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("course {} not found", req.course_id)))?;

        let discounts = self.applicable_discounts(&course, &req.discount_ids).await?;
        let final_price = pricing::final_price(course.price, &discounts);
        let discounts_applied: Vec<Uuid> = discounts.iter().map(|d| d.id).collect();

        let sections_progress = SectionProgress::initialize(&course.curriculum);
        let enrollment = Enrollment::new(
            req.user_id,
            course.id,
            req.live_run_id,
            course.price,
            final_price,
            discounts_applied,
            sections_progress,
        );
        enrollment.validate()?;

        repository::insert_enrollment(&self.db, &enrollment).await?;
        info!(
            enrollment_id = %enrollment.id,
            user_id = %enrollment.user_id,
            course_id = %enrollment.course_id,
            base_price = enrollment.base_price,
            final_price = enrollment.final_price,
            "enrollment created"
        );
        Ok(enrollment)
    }

    /// Appends an attempt and re-derives progress in one guarded write.
    pub async fn submit_attempt(
        &self,
        enrollment_id: Uuid,
        req: SubmitAttemptRequest,
    ) -> Result<Vec<Attempt>, AppError> {
        let mut enrollment = self.load(enrollment_id).await?;

        let attempts =
            enrollment.record_attempt(req.section_id, req.content_id, req.answers, req.files)?;
        enrollment.validate()?;
        repository::update_enrollment(&self.db, &mut enrollment).await?;

        info!(
            enrollment_id = %enrollment_id,
            content_id = %req.content_id,
            attempt_number = attempts.len(),
            progress = enrollment.progress,
            "attempt recorded"
        );
        Ok(attempts)
    }

    /// Instructor grading of one attempt; completion and progress follow.
    pub async fn review_attempt(
        &self,
        enrollment_id: Uuid,
        req: ReviewAttemptRequest,
    ) -> Result<Enrollment, AppError> {
        let mut enrollment = self.load(enrollment_id).await?;

        enrollment.apply_review(
            req.section_id,
            req.content_id,
            req.attempt_index,
            req.score,
            req.passed,
            req.feedback,
            req.instructor_id,
        )?;
        enrollment.validate()?;
        repository::update_enrollment(&self.db, &mut enrollment).await?;

        info!(
            enrollment_id = %enrollment_id,
            content_id = %req.content_id,
            score = req.score,
            passed = req.passed,
            progress = enrollment.progress,
            "attempt reviewed"
        );
        Ok(enrollment)
    }

    /// All file references ever submitted for one content item, flattened
    /// across attempts.
    pub async fn assessment_files(
        &self,
        enrollment_id: Uuid,
        section_id: Uuid,
        content_id: Uuid,
    ) -> Result<Vec<String>, AppError> {
        let enrollment = self.load(enrollment_id).await?;
        let content = enrollment.content(section_id, content_id)?;
        Ok(content
            .attempts
            .iter()
            .flat_map(|a| a.submitted_files.iter().cloned())
            .collect())
    }

    /// Idempotent completion: already-completed enrollments come back
    /// unchanged, a lagging status catches up when progress is 100, and
    /// anything else yields a pending-work report.
    pub async fn complete_enrollment(
        &self,
        enrollment_id: Uuid,
    ) -> Result<CompletionOutcome, AppError> {
        let mut enrollment = self.load(enrollment_id).await?;

        if enrollment.status == EnrollmentStatus::Completed {
            return Ok(CompletionOutcome {
                completed: true,
                enrollment,
                message: None,
                pending: None,
            });
        }

        if enrollment.progress == 100 && enrollment.status == EnrollmentStatus::InProgress {
            enrollment.status = EnrollmentStatus::Completed;
            if enrollment.completed_at.is_none() {
                enrollment.completed_at = Some(Utc::now());
            }
            repository::update_enrollment(&self.db, &mut enrollment).await?;
            info!(enrollment_id = %enrollment_id, "enrollment completed");
            return Ok(CompletionOutcome {
                completed: true,
                enrollment,
                message: None,
                pending: None,
            });
        }

        let pending = enrollment.pending_contents();
        Ok(CompletionOutcome {
            completed: false,
            message: Some("Course not fully completed yet".to_string()),
            pending: Some(pending),
            enrollment,
        })
    }

    /// Explicit learner/admin withdrawal. Terminal states stay terminal.
    pub async fn drop_enrollment(&self, enrollment_id: Uuid) -> Result<Enrollment, AppError> {
        let mut enrollment = self.load(enrollment_id).await?;

        if enrollment.status.is_terminal() {
            return Err(AppError::InvalidOperation(format!(
                "enrollment {enrollment_id} is already {}",
                enrollment.status
            )));
        }

        enrollment.status = EnrollmentStatus::Dropped;
        repository::update_enrollment(&self.db, &mut enrollment).await?;
        info!(enrollment_id = %enrollment_id, "enrollment dropped");
        Ok(enrollment)
    }

    /// A learner's enrollments, each with its course header priced live from
    /// the current page discounts. The frozen checkout price on the
    /// enrollment itself is untouched.
    pub async fn list_enrollments(
        &self,
        user_id: Uuid,
        course_id: Option<Uuid>,
    ) -> Result<Vec<EnrolledCourse>, AppError> {
        let enrollments = repository::fetch_enrollments(&self.db, user_id, course_id).await?;

        let mut summaries: HashMap<Uuid, Option<CourseSummary>> = HashMap::new();
        for enrollment in &enrollments {
            if summaries.contains_key(&enrollment.course_id) {
                continue;
            }
            let summary = match self.catalog.fetch_course(enrollment.course_id).await? {
                Some(course) => {
                    let page_discounts = self
                        .applicable_discounts(&course, &[])
                        .await?;
                    let final_price = pricing::final_price(course.price, &page_discounts);
                    Some(CourseSummary {
                        id: course.id,
                        title: course.title,
                        base_price: course.price,
                        final_price,
                    })
                }
                None => {
                    warn!(course_id = %enrollment.course_id, "enrolled course missing from catalog");
                    None
                }
            };
            summaries.insert(enrollment.course_id, summary);
        }

        Ok(enrollments
            .into_iter()
            .map(|enrollment| {
                let course = summaries
                    .get(&enrollment.course_id)
                    .cloned()
                    .flatten();
                EnrolledCourse { enrollment, course }
            })
            .collect())
    }

    pub async fn enrollment_by_course(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Enrollment, AppError> {
        repository::fetch_enrollment_by_course(&self.db, user_id, course_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no enrollment for user {user_id} in course {course_id}"
                ))
            })
    }

    pub async fn enrollment(&self, enrollment_id: Uuid) -> Result<Enrollment, AppError> {
        self.load(enrollment_id).await
    }

    async fn load(&self, enrollment_id: Uuid) -> Result<Enrollment, AppError> {
        repository::fetch_enrollment(&self.db, enrollment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("enrollment {enrollment_id} not found")))
    }

    /// Resolves the discount stack for a course: requested ids admitted by
    /// the allow-list, then the always-on page discounts. Records that are
    /// missing, inactive, expired, or scoped to another course are skipped
    /// rather than failing the checkout.
    async fn applicable_discounts(
        &self,
        course: &CourseSnapshot,
        requested: &[Uuid],
    ) -> Result<Vec<Discount>, AppError> {
        let now = Utc::now();
        let mut discounts = Vec::new();
        for id in pricing::resolve_discount_ids(course, requested) {
            match self.catalog.fetch_discount(id).await? {
                Some(discount) if discount.applies_to(course.id, now) => discounts.push(discount),
                Some(discount) => {
                    warn!(code = %discount.code, course_id = %course.id, "skipping inapplicable discount");
                }
                None => {
                    warn!(discount_id = %id, "discount not found in catalog");
                }
            }
        }
        Ok(discounts)
    }
}
