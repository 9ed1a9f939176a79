use axum::Json;
use axum::extract::{Path, Query};
use axum::routing::post;
use axum::{Router, extract::State, http::StatusCode, routing::get};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::*;
use crate::services::{CompletionOutcome, EnrolledCourse, EnrollmentService};
use crate::state::AppState;

#[derive(Deserialize)]
struct ListEnrollmentsParams {
    user_id: Uuid,
    course_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct ByCourseParams {
    user_id: Uuid,
    course_id: Uuid,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/enrollments", get(list_enrollments))
        .route("/enrollments/checkout", post(checkout))
        .route("/enrollments/by-course", get(enrollment_by_course))
        .route("/enrollments/{id}", get(get_enrollment))
        .route("/enrollments/{id}/attempts", post(submit_attempt))
        .route("/enrollments/{id}/review", post(review_attempt))
        .route("/enrollments/{id}/complete", post(complete_enrollment))
        .route("/enrollments/{id}/drop", post(drop_enrollment))
        .route(
            "/enrollments/{id}/sections/{section_id}/contents/{content_id}/files",
            get(assessment_files),
        )
        .with_state(state)
}

fn service(state: &AppState) -> EnrollmentService {
    EnrollmentService::new(state.db.clone(), state.catalog.clone())
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1").execute(&state.db).await?;
    Ok(StatusCode::OK)
}

async fn checkout(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<Enrollment>), AppError> {
    let enrollment = service(&state).checkout(req).await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

async fn list_enrollments(
    State(state): State<AppState>,
    Query(params): Query<ListEnrollmentsParams>,
) -> Result<Json<Vec<EnrolledCourse>>, AppError> {
    let enrollments = service(&state)
        .list_enrollments(params.user_id, params.course_id)
        .await?;
    Ok(Json(enrollments))
}

async fn enrollment_by_course(
    State(state): State<AppState>,
    Query(params): Query<ByCourseParams>,
) -> Result<Json<Enrollment>, AppError> {
    let enrollment = service(&state)
        .enrollment_by_course(params.user_id, params.course_id)
        .await?;
    Ok(Json(enrollment))
}

async fn get_enrollment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Enrollment>, AppError> {
    let enrollment = service(&state).enrollment(id).await?;
    Ok(Json(enrollment))
}

async fn submit_attempt(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SubmitAttemptRequest>,
) -> Result<Json<Vec<Attempt>>, AppError> {
    let attempts = service(&state).submit_attempt(id, req).await?;
    Ok(Json(attempts))
}

async fn review_attempt(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewAttemptRequest>,
) -> Result<Json<Enrollment>, AppError> {
    let enrollment = service(&state).review_attempt(id, req).await?;
    Ok(Json(enrollment))
}

async fn complete_enrollment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CompletionOutcome>, AppError> {
    let outcome = service(&state).complete_enrollment(id).await?;
    Ok(Json(outcome))
}

async fn drop_enrollment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Enrollment>, AppError> {
    let enrollment = service(&state).drop_enrollment(id).await?;
    Ok(Json(enrollment))
}

async fn assessment_files(
    State(state): State<AppState>,
    Path((id, section_id, content_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<Json<Vec<String>>, AppError> {
    let files = service(&state)
        .assessment_files(id, section_id, content_id)
        .await?;
    Ok(Json(files))
}
