use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::catalog::{ContentKind, CourseSection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    InProgress,
    Completed,
    Dropped,
}

impl EnrollmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EnrollmentStatus::Completed | EnrollmentStatus::Dropped)
    }
}

impl std::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EnrollmentStatus::InProgress => "in_progress",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Dropped => "dropped",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptAnswer {
    pub question_id: Uuid,
    /// Free-form answer payload: text, choice index, whatever the question takes.
    pub answer: Value,
    /// Flagged at submission time where the question is auto-gradable.
    pub correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// 1-based, strictly sequential within a content's attempt list.
    pub attempt_number: u32,
    #[serde(default)]
    pub answers: Vec<AttemptAnswer>,
    /// Opaque references into the file-storage collaborator.
    #[serde(default)]
    pub submitted_files: Vec<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentProgress {
    pub content_id: Uuid,
    pub kind: ContentKind,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    #[serde(default)]
    pub attempts: Vec<Attempt>,
}

impl ContentProgress {
    /// Completion predicate used by progress aggregation: assessments must
    /// additionally be passed, quizzes and sessions count on `completed` alone.
    pub fn counts_toward_completion(&self) -> bool {
        match self.kind {
            ContentKind::Assessment => self.completed && self.passed == Some(true),
            ContentKind::Quiz | ContentKind::Session => self.completed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionProgress {
    pub section_id: Uuid,
    pub contents: Vec<ContentProgress>,
}

impl SectionProgress {
    /// One progress record per curriculum content item, nothing attempted.
    /// Called once at checkout; the result is the enrollment's frozen snapshot.
    pub fn initialize(curriculum: &[CourseSection]) -> Vec<SectionProgress> {
        curriculum
            .iter()
            .map(|section| SectionProgress {
                section_id: section.id,
                contents: section
                    .contents
                    .iter()
                    .map(|content| ContentProgress {
                        content_id: content.id,
                        kind: content.kind,
                        completed: false,
                        score: None,
                        passed: None,
                        attempts: Vec::new(),
                    })
                    .collect(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingStatus {
    #[serde(rename = "not attempted")]
    NotAttempted,
    #[serde(rename = "awaiting review")]
    AwaitingReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingContent {
    pub section_id: Uuid,
    pub content_id: Uuid,
    pub kind: ContentKind,
    pub status: PendingStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub live_run_id: Option<Uuid>,
    pub base_price: f64,
    /// Frozen at checkout; display pricing is recomputed live, separately.
    pub final_price: f64,
    pub discounts_applied: Vec<Uuid>,
    pub status: EnrollmentStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Derived 0-100, never accepted from a client.
    pub progress: u8,
    pub sections_progress: Vec<SectionProgress>,
    /// Optimistic-concurrency counter, bumped on every persisted mutation.
    pub revision: i64,
    pub updated_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn new(
        user_id: Uuid,
        course_id: Uuid,
        live_run_id: Option<Uuid>,
        base_price: f64,
        final_price: f64,
        discounts_applied: Vec<Uuid>,
        sections_progress: Vec<SectionProgress>,
    ) -> Self {
        let now = Utc::now();
        Enrollment {
            id: Uuid::new_v4(),
            user_id,
            course_id,
            live_run_id,
            base_price,
            final_price,
            discounts_applied,
            status: EnrollmentStatus::InProgress,
            started_at: now,
            completed_at: None,
            progress: 0,
            sections_progress,
            revision: 0,
            updated_at: now,
        }
    }

    pub fn content(&self, section_id: Uuid, content_id: Uuid) -> Result<&ContentProgress, AppError> {
        let section = self
            .sections_progress
            .iter()
            .find(|s| s.section_id == section_id)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "section {section_id} not found in enrollment {}",
                    self.id
                ))
            })?;
        section
            .contents
            .iter()
            .find(|c| c.content_id == content_id)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "content {content_id} not found in enrollment {}",
                    self.id
                ))
            })
    }

    fn content_mut(
        &mut self,
        section_id: Uuid,
        content_id: Uuid,
    ) -> Result<&mut ContentProgress, AppError> {
        let enrollment_id = self.id;
        let section = self
            .sections_progress
            .iter_mut()
            .find(|s| s.section_id == section_id)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "section {section_id} not found in enrollment {enrollment_id}"
                ))
            })?;
        section
            .contents
            .iter_mut()
            .find(|c| c.content_id == content_id)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "content {content_id} not found in enrollment {enrollment_id}"
                ))
            })
    }

    /// Appends an attempt to the addressed content. The stored snapshot is
    /// authoritative: ids that were not part of the curriculum at checkout
    /// are NotFound even if the live course has since gained them.
    pub fn record_attempt(
        &mut self,
        section_id: Uuid,
        content_id: Uuid,
        answers: Vec<AttemptAnswer>,
        submitted_files: Vec<String>,
    ) -> Result<Vec<Attempt>, AppError> {
        let content = self.content_mut(section_id, content_id)?;

        let attempt = Attempt {
            attempt_number: content.attempts.len() as u32 + 1,
            answers,
            submitted_files,
            submitted_at: Utc::now(),
            score: None,
            passed: None,
            feedback: None,
            reviewed_by: None,
            reviewed_at: None,
        };
        content.attempts.push(attempt);

        // Attendance is the whole requirement for a session; graded kinds
        // stay incomplete until an instructor reviews an attempt.
        if content.kind == ContentKind::Session {
            content.completed = true;
        }

        let attempts = content.attempts.clone();
        self.recalculate_progress();
        Ok(attempts)
    }

    /// Grades one attempt. A reviewed attempt marks the content completed
    /// whether or not it passed; whether that counts toward progress is up
    /// to `counts_toward_completion`.
    pub fn apply_review(
        &mut self,
        section_id: Uuid,
        content_id: Uuid,
        attempt_index: usize,
        score: u8,
        passed: bool,
        feedback: Option<String>,
        instructor_id: Uuid,
    ) -> Result<(), AppError> {
        if score > 100 {
            return Err(AppError::Validation(format!(
                "score must be between 0 and 100, got {score}"
            )));
        }

        let enrollment_id = self.id;
        let content = self.content_mut(section_id, content_id)?;

        if !content.kind.reviewable() {
            return Err(AppError::InvalidOperation(format!(
                "content {content_id} is a session; only quiz and assessment attempts are reviewable"
            )));
        }

        let attempt = content.attempts.get_mut(attempt_index).ok_or_else(|| {
            AppError::NotFound(format!(
                "attempt {attempt_index} not found for content {content_id} in enrollment {enrollment_id}"
            ))
        })?;

        attempt.score = Some(score);
        attempt.passed = Some(passed);
        attempt.feedback = feedback;
        attempt.reviewed_by = Some(instructor_id);
        attempt.reviewed_at = Some(Utc::now());

        content.score = Some(score);
        content.passed = Some(passed);
        content.completed = true;

        self.recalculate_progress();
        Ok(())
    }

    /// Recomputes the aggregate percentage from the completion predicate and
    /// drives the in_progress -> completed transition when it reaches 100.
    /// `completed_at` is only ever set once.
    pub fn recalculate_progress(&mut self) {
        let total: usize = self.sections_progress.iter().map(|s| s.contents.len()).sum();
        if total == 0 {
            self.progress = 0;
            return;
        }

        let completed = self
            .sections_progress
            .iter()
            .flat_map(|s| s.contents.iter())
            .filter(|c| c.counts_toward_completion())
            .count();
        self.progress = ((completed as f64 / total as f64) * 100.0).round() as u8;

        if self.progress == 100 && self.status == EnrollmentStatus::InProgress {
            self.status = EnrollmentStatus::Completed;
            if self.completed_at.is_none() {
                self.completed_at = Some(Utc::now());
            }
        }
    }

    /// Everything still standing between this enrollment and completion.
    pub fn pending_contents(&self) -> Vec<PendingContent> {
        self.sections_progress
            .iter()
            .flat_map(|section| {
                section.contents.iter().filter_map(|content| {
                    if content.counts_toward_completion() {
                        return None;
                    }
                    Some(PendingContent {
                        section_id: section.section_id,
                        content_id: content.content_id,
                        kind: content.kind,
                        status: if content.attempts.is_empty() {
                            PendingStatus::NotAttempted
                        } else {
                            PendingStatus::AwaitingReview
                        },
                    })
                })
            })
            .collect()
    }

    /// Structural invariants checked before every persist. A violation means
    /// a bug upstream; nothing gets written.
    pub fn validate(&self) -> Result<(), AppError> {
        for section in &self.sections_progress {
            for content in &section.contents {
                for (i, attempt) in content.attempts.iter().enumerate() {
                    if attempt.attempt_number as usize != i + 1 {
                        return Err(AppError::Validation(format!(
                            "attempt numbers for content {} must be sequential, found {} at position {}",
                            content.content_id,
                            attempt.attempt_number,
                            i + 1
                        )));
                    }
                    if attempt.score.is_some_and(|s| s > 100) {
                        return Err(AppError::Validation(format!(
                            "attempt score out of range for content {}",
                            content.content_id
                        )));
                    }
                }
                if content.score.is_some_and(|s| s > 100) {
                    return Err(AppError::Validation(format!(
                        "score out of range for content {}",
                        content.content_id
                    )));
                }
            }
        }
        if self.progress > 100 {
            return Err(AppError::Validation(format!(
                "progress {} out of range for enrollment {}",
                self.progress, self.id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub live_run_id: Option<Uuid>,
    #[serde(default)]
    pub discount_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitAttemptRequest {
    pub section_id: Uuid,
    pub content_id: Uuid,
    #[serde(default)]
    pub answers: Vec<AttemptAnswer>,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewAttemptRequest {
    pub section_id: Uuid,
    pub content_id: Uuid,
    pub attempt_index: usize,
    pub score: u8,
    pub passed: bool,
    pub feedback: Option<String>,
    pub instructor_id: Uuid,
}
