pub mod catalog;
pub mod enrollment;

pub use catalog::{ContentKind, CourseContent, CourseSection, CourseSnapshot, Discount, DiscountKind};
pub use enrollment::{
    Attempt, AttemptAnswer, CheckoutRequest, ContentProgress, Enrollment, EnrollmentStatus,
    PendingContent, PendingStatus, ReviewAttemptRequest, SectionProgress, SubmitAttemptRequest,
};
