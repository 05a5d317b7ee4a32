//! enrolldb - declarative transactions for a university enrollment service
//!
//! This crate coordinates units of work that declare a propagation mode and
//! an isolation level: joining an open transaction, suspending it for an
//! independent one, nesting through savepoints, or running without one.
//! The call path's transaction state is an explicit [`transaction::Session`]
//! rather than thread-local state.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use enrolldb::storage::MemoryStore;
//! use enrolldb::transaction::TransactionManager;
//! use enrolldb::university::{Student, UniversityService};
//!
//! let manager = TransactionManager::new(Arc::new(MemoryStore::new()));
//! let service = UniversityService::new(manager).unwrap();
//! let mut session = service.session();
//!
//! let alice = service
//!     .create_student(&mut session, Student::new("Alice", "alice@example.edu", "Physics", 1))
//!     .unwrap();
//! let course = service.add_new_course(&mut session, "Databases", 30).unwrap();
//! service
//!     .enroll_student_in_course(&mut session, &alice.id, &course.id)
//!     .unwrap();
//! ```

pub mod storage;
pub mod transaction;
pub mod university;
