//! University service error types.

use thiserror::Error;

use crate::storage::{RowKey, StorageError};
use crate::transaction::{ErrorKind, TransactionError};

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: RowKey },

    #[error("Course is already full.")]
    CourseFull { course: RowKey },

    #[error("student {student} is already enrolled in course {course}")]
    AlreadyEnrolled { student: RowKey, course: RowKey },

    #[error("No enrollments found for student with ID {student}")]
    NoEnrollments { student: RowKey },

    #[error("Student with ID {student} is not enrolled in course with ID {course}")]
    NotEnrolled { student: RowKey, course: RowKey },

    #[error("grade {grade} of enrollment {enrollment} exceeds the maximum of {max}")]
    GradeOutOfRange {
        enrollment: RowKey,
        grade: u32,
        max: u32,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ServiceError {
    pub fn not_found(entity: &'static str, id: &RowKey) -> Self {
        ServiceError::NotFound {
            entity,
            id: id.clone(),
        }
    }

    /// Classify this error the way the transaction layer does.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Transaction(e) => e.kind(),
            _ => ErrorKind::Business,
        }
    }

    /// Check if the caller may retry the operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Transaction(e) => e.is_retryable(),
            ServiceError::Storage(e) => e.is_retriable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Propagation;

    #[test]
    fn test_kinds() {
        let full = ServiceError::CourseFull {
            course: RowKey::new("c1").unwrap(),
        };
        assert_eq!(full.kind(), ErrorKind::Business);
        assert_eq!(full.to_string(), "Course is already full.");

        let config: ServiceError =
            TransactionError::NoExistingTransaction(Propagation::Mandatory).into();
        assert_eq!(config.kind(), ErrorKind::Configuration);
        assert!(!config.is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let err = ServiceError::not_found("Student", &RowKey::new("s1").unwrap());
        assert_eq!(err.to_string(), "Student not found: s1");
    }
}
