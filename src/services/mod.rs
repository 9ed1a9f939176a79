pub mod enrollment_service;

pub use enrollment_service::{CompletionOutcome, CourseSummary, EnrollmentService, EnrolledCourse};
