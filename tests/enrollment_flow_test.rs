use std::sync::Arc;

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

use coursehub::catalog::{FixedCatalog, SqliteCatalogStore};
use coursehub::error::AppError;
use coursehub::models::{
    CheckoutRequest, ContentKind, CourseContent, CourseSection, CourseSnapshot, Discount,
    DiscountKind, EnrollmentStatus, PendingStatus, ReviewAttemptRequest, SubmitAttemptRequest,
};
use coursehub::services::EnrollmentService;

async fn setup_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

fn course(sections: Vec<Vec<ContentKind>>, price: f64) -> CourseSnapshot {
    CourseSnapshot {
        id: Uuid::new_v4(),
        title: "Woodwind Repair Fundamentals".to_string(),
        price,
        curriculum: sections
            .into_iter()
            .map(|kinds| CourseSection {
                id: Uuid::new_v4(),
                contents: kinds
                    .into_iter()
                    .map(|kind| CourseContent {
                        id: Uuid::new_v4(),
                        kind,
                    })
                    .collect(),
            })
            .collect(),
        discount_ids: Vec::new(),
        page_discount_ids: Vec::new(),
    }
}

fn discount(code: &str, kind: DiscountKind, value: f64) -> Discount {
    Discount {
        id: Uuid::new_v4(),
        code: code.to_string(),
        kind,
        value,
        starts_at: None,
        ends_at: None,
        usage_limit: None,
        used_count: 0,
        course_ids: Vec::new(),
        active: true,
    }
}

/// Service backed by a canned catalog; the pool only holds enrollments.
async fn fixed_service(
    courses: Vec<CourseSnapshot>,
    discounts: Vec<Discount>,
) -> (SqlitePool, EnrollmentService) {
    let pool = setup_pool().await;
    let catalog = Arc::new(FixedCatalog::new(courses, discounts));
    let service = EnrollmentService::new(pool.clone(), catalog);
    (pool, service)
}

/// Service backed by the sqlite catalog, with the given records seeded.
async fn sqlite_service(
    courses: &[CourseSnapshot],
    discounts: &[Discount],
) -> (SqlitePool, EnrollmentService) {
    let pool = setup_pool().await;
    for course in courses {
        seed_course(&pool, course).await;
    }
    for discount in discounts {
        seed_discount(&pool, discount).await;
    }
    let catalog = Arc::new(SqliteCatalogStore::new(pool.clone()));
    let service = EnrollmentService::new(pool.clone(), catalog);
    (pool, service)
}

async fn seed_course(pool: &SqlitePool, course: &CourseSnapshot) {
    sqlx::query(
        "INSERT INTO courses (id, title, price, curriculum, discount_ids, page_discount_ids) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(course.id.to_string())
    .bind(&course.title)
    .bind(course.price)
    .bind(serde_json::to_string(&course.curriculum).expect("curriculum json"))
    .bind(serde_json::to_string(&course.discount_ids).expect("discount ids json"))
    .bind(serde_json::to_string(&course.page_discount_ids).expect("page discount ids json"))
    .execute(pool)
    .await
    .expect("Failed to seed course");
}

async fn seed_discount(pool: &SqlitePool, discount: &Discount) {
    sqlx::query(
        "INSERT INTO discounts (id, code, kind, value, starts_at, ends_at, usage_limit, used_count, course_ids, active) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(discount.id.to_string())
    .bind(&discount.code)
    .bind(discount.kind)
    .bind(discount.value)
    .bind(discount.starts_at)
    .bind(discount.ends_at)
    .bind(discount.usage_limit)
    .bind(discount.used_count)
    .bind(serde_json::to_string(&discount.course_ids).expect("course ids json"))
    .bind(discount.active)
    .execute(pool)
    .await
    .expect("Failed to seed discount");
}

fn checkout_request(user_id: Uuid, course: &CourseSnapshot, discount_ids: Vec<Uuid>) -> CheckoutRequest {
    CheckoutRequest {
        user_id,
        course_id: course.id,
        live_run_id: None,
        discount_ids,
    }
}

#[tokio::test]
async fn checkout_prices_with_stacked_discounts() {
    let ten_percent = discount("LAUNCH10", DiscountKind::Percentage, 10.0);
    let twenty_off = discount("PAGE20", DiscountKind::Fixed, 20.0);
    let mut course = course(vec![vec![ContentKind::Session]], 100.0);
    course.discount_ids = vec![ten_percent.id];
    course.page_discount_ids = vec![twenty_off.id];

    let (_pool, service) =
        sqlite_service(&[course.clone()], &[ten_percent.clone(), twenty_off.clone()]).await;

    let enrollment = service
        .checkout(checkout_request(Uuid::new_v4(), &course, vec![ten_percent.id]))
        .await
        .expect("checkout");

    // 100 -> 90 (10%) -> 70 (fixed 20), requested discount first.
    assert_eq!(enrollment.base_price, 100.0);
    assert_eq!(enrollment.final_price, 70.0);
    assert_eq!(enrollment.discounts_applied, vec![ten_percent.id, twenty_off.id]);
    assert_eq!(enrollment.status, EnrollmentStatus::InProgress);
    assert_eq!(enrollment.progress, 0);
    assert_eq!(enrollment.sections_progress.len(), 1);
    assert_eq!(enrollment.sections_progress[0].contents.len(), 1);
}

#[tokio::test]
async fn checkout_skips_inapplicable_discounts() {
    let mut inactive = discount("OLD50", DiscountKind::Percentage, 50.0);
    inactive.active = false;
    let mut foreign = discount("OTHER30", DiscountKind::Fixed, 30.0);
    foreign.course_ids = vec![Uuid::new_v4()];
    let mut expired = discount("GONE20", DiscountKind::Fixed, 20.0);
    expired.ends_at = Some(chrono::Utc::now() - chrono::Duration::days(1));

    let mut course = course(vec![vec![ContentKind::Quiz]], 80.0);
    course.page_discount_ids = vec![inactive.id, foreign.id, expired.id];

    let (_pool, service) =
        sqlite_service(&[course.clone()], &[inactive, foreign, expired]).await;

    let enrollment = service
        .checkout(checkout_request(Uuid::new_v4(), &course, vec![]))
        .await
        .expect("checkout");

    assert_eq!(enrollment.final_price, 80.0);
    assert!(enrollment.discounts_applied.is_empty());
}

#[tokio::test]
async fn checkout_unknown_course_is_not_found() {
    let (_pool, service) = fixed_service(vec![], vec![]).await;

    let err = service
        .checkout(CheckoutRequest {
            user_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            live_run_id: None,
            discount_ids: vec![],
        })
        .await
        .expect_err("no such course");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn duplicate_checkout_conflicts() {
    let course = course(vec![vec![ContentKind::Session]], 50.0);
    let (_pool, service) = fixed_service(vec![course.clone()], vec![]).await;
    let user_id = Uuid::new_v4();

    service
        .checkout(checkout_request(user_id, &course, vec![]))
        .await
        .expect("first checkout");
    let err = service
        .checkout(checkout_request(user_id, &course, vec![]))
        .await
        .expect_err("second checkout for the same user and course");
    assert!(matches!(err, AppError::Conflict(_)));

    let enrollments = service
        .list_enrollments(user_id, Some(course.id))
        .await
        .expect("list");
    assert_eq!(enrollments.len(), 1);
}

#[tokio::test]
async fn completion_workflow_requires_a_passed_assessment() {
    let course = course(
        vec![vec![ContentKind::Session], vec![ContentKind::Assessment]],
        100.0,
    );
    let (_pool, service) = fixed_service(vec![course.clone()], vec![]).await;
    let instructor = Uuid::new_v4();

    let enrollment = service
        .checkout(checkout_request(Uuid::new_v4(), &course, vec![]))
        .await
        .expect("checkout");
    assert_eq!(enrollment.progress, 0);

    let session_section = course.curriculum[0].id;
    let session_content = course.curriculum[0].contents[0].id;
    let assessment_section = course.curriculum[1].id;
    let assessment_content = course.curriculum[1].contents[0].id;

    // Attending the session is enough to complete it.
    service
        .submit_attempt(
            enrollment.id,
            SubmitAttemptRequest {
                section_id: session_section,
                content_id: session_content,
                answers: vec![],
                files: vec![],
            },
        )
        .await
        .expect("session attempt");
    let current = service.enrollment(enrollment.id).await.expect("reload");
    assert_eq!(current.progress, 50);

    // A failed assessment review completes the content but not the course.
    service
        .submit_attempt(
            enrollment.id,
            SubmitAttemptRequest {
                section_id: assessment_section,
                content_id: assessment_content,
                answers: vec![],
                files: vec![],
            },
        )
        .await
        .expect("assessment attempt");
    let reviewed = service
        .review_attempt(
            enrollment.id,
            ReviewAttemptRequest {
                section_id: assessment_section,
                content_id: assessment_content,
                attempt_index: 0,
                score: 40,
                passed: false,
                feedback: Some("Rework the tone-hole measurements".to_string()),
                instructor_id: instructor,
            },
        )
        .await
        .expect("failing review");
    assert_eq!(reviewed.progress, 50);
    assert_eq!(reviewed.status, EnrollmentStatus::InProgress);

    // Explicit completion is a report while work is pending.
    let outcome = service
        .complete_enrollment(enrollment.id)
        .await
        .expect("completion report");
    assert!(!outcome.completed);
    let pending = outcome.pending.expect("pending list");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].content_id, assessment_content);
    assert_eq!(pending[0].status, PendingStatus::AwaitingReview);

    // A passing second attempt completes the enrollment.
    service
        .submit_attempt(
            enrollment.id,
            SubmitAttemptRequest {
                section_id: assessment_section,
                content_id: assessment_content,
                answers: vec![],
                files: vec![],
            },
        )
        .await
        .expect("second attempt");
    let reviewed = service
        .review_attempt(
            enrollment.id,
            ReviewAttemptRequest {
                section_id: assessment_section,
                content_id: assessment_content,
                attempt_index: 1,
                score: 85,
                passed: true,
                feedback: None,
                instructor_id: instructor,
            },
        )
        .await
        .expect("passing review");
    assert_eq!(reviewed.progress, 100);
    assert_eq!(reviewed.status, EnrollmentStatus::Completed);
    let completed_at = reviewed.completed_at.expect("completed_at set");

    let numbers: Vec<u32> = reviewed.sections_progress[1].contents[0]
        .attempts
        .iter()
        .map(|a| a.attempt_number)
        .collect();
    assert_eq!(numbers, vec![1, 2]);

    // Completion is idempotent and never touches completed_at again.
    let first = service.complete_enrollment(enrollment.id).await.expect("complete");
    let second = service.complete_enrollment(enrollment.id).await.expect("complete again");
    assert!(first.completed && second.completed);
    assert_eq!(first.enrollment.completed_at, Some(completed_at));
    assert_eq!(second.enrollment.completed_at, Some(completed_at));
}

#[tokio::test]
async fn submitted_files_flatten_across_attempts() {
    let course = course(vec![vec![ContentKind::Assessment]], 60.0);
    let (_pool, service) = fixed_service(vec![course.clone()], vec![]).await;

    let enrollment = service
        .checkout(checkout_request(Uuid::new_v4(), &course, vec![]))
        .await
        .expect("checkout");
    let section_id = course.curriculum[0].id;
    let content_id = course.curriculum[0].contents[0].id;

    for files in [vec!["draft.pdf", "sketch.png"], vec!["final.pdf"]] {
        service
            .submit_attempt(
                enrollment.id,
                SubmitAttemptRequest {
                    section_id,
                    content_id,
                    answers: vec![],
                    files: files.into_iter().map(String::from).collect(),
                },
            )
            .await
            .expect("attempt");
    }

    let files = service
        .assessment_files(enrollment.id, section_id, content_id)
        .await
        .expect("files");
    assert_eq!(files, vec!["draft.pdf", "sketch.png", "final.pdf"]);

    let err = service
        .assessment_files(enrollment.id, section_id, Uuid::new_v4())
        .await
        .expect_err("unknown content");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn drop_enrollment_is_terminal() {
    let course = course(vec![vec![ContentKind::Session]], 40.0);
    let (_pool, service) = fixed_service(vec![course.clone()], vec![]).await;

    let enrollment = service
        .checkout(checkout_request(Uuid::new_v4(), &course, vec![]))
        .await
        .expect("checkout");

    let dropped = service.drop_enrollment(enrollment.id).await.expect("drop");
    assert_eq!(dropped.status, EnrollmentStatus::Dropped);

    let err = service
        .drop_enrollment(enrollment.id)
        .await
        .expect_err("already dropped");
    assert!(matches!(err, AppError::InvalidOperation(_)));
}

#[tokio::test]
async fn listing_recomputes_display_price_from_current_page_discounts() {
    let twenty_off = discount("PAGE20", DiscountKind::Fixed, 20.0);
    let mut course = course(vec![vec![ContentKind::Session]], 100.0);
    course.page_discount_ids = vec![twenty_off.id];

    let (pool, service) = sqlite_service(&[course.clone()], &[twenty_off.clone()]).await;
    let user_id = Uuid::new_v4();

    let enrollment = service
        .checkout(checkout_request(user_id, &course, vec![]))
        .await
        .expect("checkout");
    assert_eq!(enrollment.final_price, 80.0);

    // The catalog price changes after checkout; the stored price must not.
    sqlx::query("UPDATE discounts SET value = 50 WHERE id = ?")
        .bind(twenty_off.id.to_string())
        .execute(&pool)
        .await
        .expect("grow the page discount");

    let listed = service
        .list_enrollments(user_id, None)
        .await
        .expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].enrollment.final_price, 80.0);
    let summary = listed[0].course.as_ref().expect("course summary");
    assert_eq!(summary.base_price, 100.0);
    assert_eq!(summary.final_price, 50.0);

    let by_course = service
        .enrollment_by_course(user_id, course.id)
        .await
        .expect("by course");
    assert_eq!(by_course.id, enrollment.id);
}
