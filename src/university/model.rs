//! Plain data records stored by the university service.
//!
//! Relations are ids, never embedded records: loading an enrollment does not
//! load its student or course.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::RowKey;

/// A record stored in its own table, keyed by its `id`.
pub trait Record: Serialize + serde::de::DeserializeOwned {
    /// Table the records live in.
    const TABLE: &'static str;
    /// Name used in error messages.
    const ENTITY: &'static str;

    fn id(&self) -> &RowKey;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: RowKey,
    pub name: String,
    pub email: String,
    pub major: String,
    pub year: u32,
    #[serde(default)]
    pub international: bool,
}

impl Student {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        major: impl Into<String>,
        year: u32,
    ) -> Self {
        Self {
            id: RowKey::generate(),
            name: name.into(),
            email: email.into(),
            major: major.into(),
            year,
            international: false,
        }
    }
}

impl Record for Student {
    const TABLE: &'static str = "students";
    const ENTITY: &'static str = "Student";

    fn id(&self) -> &RowKey {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: RowKey,
    pub title: String,
    #[serde(default)]
    pub instructor: Option<String>,
    /// Seats left. Enrolling takes one.
    pub capacity: u32,
    #[serde(default)]
    pub online: bool,
}

impl Course {
    pub fn new(title: impl Into<String>, capacity: u32) -> Self {
        Self {
            id: RowKey::generate(),
            title: title.into(),
            instructor: None,
            capacity,
            online: false,
        }
    }

    pub fn with_instructor(mut self, instructor: impl Into<String>) -> Self {
        self.instructor = Some(instructor.into());
        self
    }
}

impl Record for Course {
    const TABLE: &'static str = "courses";
    const ENTITY: &'static str = "Course";

    fn id(&self) -> &RowKey {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: RowKey,
    pub student_id: RowKey,
    pub course_id: RowKey,
    pub enrolled_at: DateTime<Utc>,
    pub grade: u32,
}

impl Enrollment {
    pub fn new(student_id: RowKey, course_id: RowKey) -> Self {
        Self {
            id: RowKey::generate(),
            student_id,
            course_id,
            enrolled_at: Utc::now(),
            grade: 0,
        }
    }
}

impl Record for Enrollment {
    const TABLE: &'static str = "enrollments";
    const ENTITY: &'static str = "Enrollment";

    fn id(&self) -> &RowKey {
        &self.id
    }
}

/// One audit log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: RowKey,
    pub action: String,
    /// "Success" or "Failure: <reason>".
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(action: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self {
            id: RowKey::generate(),
            action: action.into(),
            outcome: outcome.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == "Success"
    }
}

impl Record for LogEntry {
    const TABLE: &'static str = "logs";
    const ENTITY: &'static str = "Log";

    fn id(&self) -> &RowKey {
        &self.id
    }
}
