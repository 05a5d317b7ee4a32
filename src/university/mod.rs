//! University enrollment service built on the transaction layer.
//!
//! Students, courses, enrollments and an audit log, each in its own table.
//! The service operations declare how they take part in the caller's
//! transaction:
//!
//! | Operation                              | Propagation   | Isolation       |
//! |----------------------------------------|---------------|-----------------|
//! | `enroll_student_in_course`             | REQUIRED      | SERIALIZABLE    |
//! | `remove_student_enrollment_from_course`| MANDATORY     | -               |
//! | `get_students_for_course`              | REQUIRED      | READ COMMITTED  |
//! | `add_new_course`                       | NOT_SUPPORTED | -               |
//! | `update_course_and_enrollments`        | REQUIRED      | REPEATABLE READ |
//! | `update_enrollments`                   | NESTED        | REPEATABLE READ |
//! | `log_action`                           | REQUIRES_NEW  | -               |

mod error;
mod model;
mod repository;
mod service;

pub use error::{ServiceError, ServiceResult};
pub use model::{Course, Enrollment, LogEntry, Record, Student};
pub use repository::Repository;
pub use service::{CourseUpdate, UniversityService, MAX_GRADE};
