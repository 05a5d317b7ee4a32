//! University enrollment service.
//!
//! Every public operation runs as a unit of work on the caller's session
//! with the propagation and isolation it declares. Most of them record an
//! audit entry through [`UniversityService::log_action`], which always runs
//! in its own physical transaction, so the entry survives when the
//! operation itself rolls back.

use log::{debug, warn};

use crate::storage::RowKey;
use crate::transaction::{
    IsolationLevel, Session, TransactionDefinition, TransactionManager,
};
use crate::university::error::{ServiceError, ServiceResult};
use crate::university::model::{Course, Enrollment, LogEntry, Student};
use crate::university::repository::Repository;

/// Highest grade an enrollment can hold.
pub const MAX_GRADE: u32 = 100;

const SUCCESS: &str = "Success";

/// Outcome of [`UniversityService::update_course_and_enrollments`].
#[derive(Debug)]
pub struct CourseUpdate {
    pub course: Course,
    /// Enrollments whose grade was raised, zero if the nested update failed.
    pub enrollments_updated: usize,
    /// Why the nested enrollment update was rolled back, if it was.
    pub enrollment_error: Option<ServiceError>,
}

pub struct UniversityService {
    manager: TransactionManager,
    students: Repository<Student>,
    courses: Repository<Course>,
    enrollments: Repository<Enrollment>,
    logs: Repository<LogEntry>,
}

impl UniversityService {
    pub fn new(manager: TransactionManager) -> ServiceResult<Self> {
        Ok(Self {
            manager,
            students: Repository::new()?,
            courses: Repository::new()?,
            enrollments: Repository::new()?,
            logs: Repository::new()?,
        })
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// Open a new call path.
    pub fn session(&self) -> Session {
        self.manager.session()
    }

    /// Enroll a student, taking one seat of the course.
    ///
    /// REQUIRED, SERIALIZABLE. The attempt is logged either way.
    pub fn enroll_student_in_course(
        &self,
        session: &mut Session,
        student_id: &RowKey,
        course_id: &RowKey,
    ) -> ServiceResult<Enrollment> {
        let def = TransactionDefinition::required()
            .isolation(IsolationLevel::Serializable)
            .named("enroll_student_in_course");
        session.run(&def, |s| {
            let result = self.enroll(s, student_id, course_id);
            self.audit(s, "Enroll Student", result)
        })
    }

    fn enroll(
        &self,
        session: &Session,
        student_id: &RowKey,
        course_id: &RowKey,
    ) -> ServiceResult<Enrollment> {
        let student = self.students.get(session, student_id)?;
        let mut course = self.courses.get(session, course_id)?;

        if course.capacity == 0 {
            return Err(ServiceError::CourseFull {
                course: course.id,
            });
        }
        let enrolled = self
            .enrollments
            .find_by_student(session, &student.id)?
            .iter()
            .any(|e| e.course_id == course.id);
        if enrolled {
            return Err(ServiceError::AlreadyEnrolled {
                student: student.id,
                course: course.id,
            });
        }

        let enrollment = Enrollment::new(student.id, course.id.clone());
        self.enrollments.insert(session, &enrollment)?;
        course.capacity -= 1;
        self.courses.update(session, &course)?;
        debug!("Enrolled {} in {}", enrollment.student_id, course.title);
        Ok(enrollment)
    }

    /// Remove a student from a course, giving the seat back.
    ///
    /// MANDATORY: must be called inside an open transaction.
    pub fn remove_student_enrollment_from_course(
        &self,
        session: &mut Session,
        student_id: &RowKey,
        course_id: &RowKey,
    ) -> ServiceResult<usize> {
        let def = TransactionDefinition::mandatory().named("remove_student_enrollment_from_course");
        session.run(&def, |s| {
            let result = self.unenroll(s, student_id, course_id);
            self.audit(s, "Delete Enrollment", result)
        })
    }

    fn unenroll(&self, session: &Session, student_id: &RowKey, course_id: &RowKey) -> ServiceResult<usize> {
        self.students.get(session, student_id)?;
        let mut course = self.courses.get(session, course_id)?;

        let enrollments = self.enrollments.find_by_student(session, student_id)?;
        if enrollments.is_empty() {
            return Err(ServiceError::NoEnrollments {
                student: student_id.clone(),
            });
        }
        let matching: Vec<_> = enrollments
            .into_iter()
            .filter(|e| &e.course_id == course_id)
            .collect();
        if matching.is_empty() {
            return Err(ServiceError::NotEnrolled {
                student: student_id.clone(),
                course: course_id.clone(),
            });
        }

        course.capacity = u32::try_from(matching.len())
            .ok()
            .and_then(|seats| course.capacity.checked_add(seats))
            .ok_or_else(|| {
                ServiceError::Validation(format!(
                    "returning {} seat(s) would overflow the capacity of course {}",
                    matching.len(),
                    course_id
                ))
            })?;
        for enrollment in &matching {
            self.enrollments.delete(session, &enrollment.id)?;
        }
        self.courses.update(session, &course)?;
        Ok(matching.len())
    }

    /// Students enrolled in a course.
    ///
    /// REQUIRED, READ_COMMITTED, read-only.
    pub fn get_students_for_course(
        &self,
        session: &mut Session,
        course_id: &RowKey,
    ) -> ServiceResult<Vec<Student>> {
        let def = TransactionDefinition::required()
            .isolation(IsolationLevel::ReadCommitted)
            .read_only(true)
            .named("get_students_for_course");
        session.run(&def, |s| {
            let result = self.students_for_course(s, course_id);
            self.audit(s, "Retrieve Students for Course", result)
        })
    }

    fn students_for_course(&self, session: &Session, course_id: &RowKey) -> ServiceResult<Vec<Student>> {
        let mut students = Vec::new();
        for enrollment in self.enrollments.find_by_course(session, course_id)? {
            if let Some(student) = self.students.find_by_id(session, &enrollment.student_id)? {
                students.push(student);
            }
        }
        Ok(students)
    }

    /// Add a course outside of any transaction.
    ///
    /// NOT_SUPPORTED: an open transaction is suspended, and the course is
    /// visible to everyone as soon as this returns.
    pub fn add_new_course(
        &self,
        session: &mut Session,
        title: &str,
        capacity: u32,
    ) -> ServiceResult<Course> {
        let def = TransactionDefinition::not_supported().named("add_new_course");
        session.run(&def, |s| {
            let course = Course::new(title, capacity);
            let result = self.courses.insert(s, &course).map(|()| course);
            self.audit(s, "Add New Course", result)
        })
    }

    /// Rename a course and raise the grade of each of its enrollments.
    ///
    /// REQUIRED, REPEATABLE_READ. The grade update runs as a nested unit; if
    /// it fails, only its own changes are undone and the rename still
    /// commits.
    pub fn update_course_and_enrollments(
        &self,
        session: &mut Session,
        course_id: &RowKey,
        new_title: &str,
    ) -> ServiceResult<CourseUpdate> {
        let def = TransactionDefinition::required()
            .isolation(IsolationLevel::RepeatableRead)
            .named("update_course_and_enrollments");
        session.run(&def, |s| {
            let result = self.rename_course(s, course_id, new_title);
            let result = match result {
                Ok(course) => match self.update_enrollments(s, course_id) {
                    Ok(updated) => Ok(CourseUpdate {
                        course,
                        enrollments_updated: updated,
                        enrollment_error: None,
                    }),
                    Err(e) => {
                        warn!("Enrollment update for {} rolled back: {}", course_id, e);
                        Ok(CourseUpdate {
                            course,
                            enrollments_updated: 0,
                            enrollment_error: Some(e),
                        })
                    }
                },
                Err(e) => Err(e),
            };
            self.audit(s, "Update Course and Enrollments", result)
        })
    }

    fn rename_course(&self, session: &Session, course_id: &RowKey, new_title: &str) -> ServiceResult<Course> {
        let mut course = self.courses.get(session, course_id)?;
        course.title = new_title.to_string();
        self.courses.update(session, &course)?;
        Ok(course)
    }

    /// Raise the grade of every enrollment in a course by one.
    ///
    /// NESTED, REPEATABLE_READ. Fails on the first grade that would pass
    /// [`MAX_GRADE`], undoing the increments already made.
    pub fn update_enrollments(&self, session: &mut Session, course_id: &RowKey) -> ServiceResult<usize> {
        let def = TransactionDefinition::nested()
            .isolation(IsolationLevel::RepeatableRead)
            .named("update_enrollments");
        session.run(&def, |s| {
            let result = self.raise_grades(s, course_id);
            self.audit(s, "Update Enrollments", result)
        })
    }

    fn raise_grades(&self, session: &Session, course_id: &RowKey) -> ServiceResult<usize> {
        let enrollments = self.enrollments.find_by_course(session, course_id)?;
        for mut enrollment in enrollments.iter().cloned() {
            let grade = enrollment.grade + 1;
            if grade > MAX_GRADE {
                return Err(ServiceError::GradeOutOfRange {
                    enrollment: enrollment.id,
                    grade,
                    max: MAX_GRADE,
                });
            }
            enrollment.grade = grade;
            self.enrollments.update(session, &enrollment)?;
        }
        Ok(enrollments.len())
    }

    /// Work that needs no transaction at all; only the audit entry is written.
    pub fn perform_non_transactional_operation(&self, session: &mut Session) -> ServiceResult<()> {
        self.audit(session, "Perform Non-Transactional Operation", Ok(()))
    }

    /// Record an audit entry.
    ///
    /// REQUIRES_NEW: commits on its own, whatever happens to the caller.
    pub fn log_action(&self, session: &mut Session, action: &str, outcome: &str) -> ServiceResult<LogEntry> {
        let def = TransactionDefinition::requires_new().named("log_action");
        session.run(&def, |s| {
            let entry = LogEntry::new(action, outcome);
            self.logs.insert(s, &entry)?;
            Ok(entry)
        })
    }

    /// Log the outcome of `result` and hand it back unchanged.
    ///
    /// A failure to write the entry is only logged.
    fn audit<T>(&self, session: &mut Session, action: &str, result: ServiceResult<T>) -> ServiceResult<T> {
        let outcome = match &result {
            Ok(_) => SUCCESS.to_string(),
            Err(e) => format!("Failure: {}", e),
        };
        if let Err(e) = self.log_action(session, action, &outcome) {
            warn!("Could not record audit entry '{}' ({}): {}", action, outcome, e);
        }
        result
    }

    // Student operations

    /// REQUIRED.
    pub fn create_student(&self, session: &mut Session, student: Student) -> ServiceResult<Student> {
        if student.name.trim().is_empty() || !student.email.contains('@') {
            return Err(ServiceError::Validation(format!(
                "student needs a name and a valid email, got '{}' <{}>",
                student.name, student.email
            )));
        }
        let def = TransactionDefinition::required().named("create_student");
        session.run(&def, |s| {
            self.students.insert(s, &student)?;
            Ok(student)
        })
    }

    /// SUPPORTS, READ_COMMITTED.
    pub fn get_student(&self, session: &mut Session, student_id: &RowKey) -> ServiceResult<Option<Student>> {
        let def = TransactionDefinition::supports()
            .isolation(IsolationLevel::ReadCommitted)
            .named("get_student");
        session.run(&def, |s| self.students.find_by_id(s, student_id))
    }

    /// REQUIRES_NEW, SERIALIZABLE.
    pub fn update_student_major(
        &self,
        session: &mut Session,
        student_id: &RowKey,
        major: &str,
    ) -> ServiceResult<Student> {
        let def = TransactionDefinition::requires_new()
            .isolation(IsolationLevel::Serializable)
            .named("update_student_major");
        session.run(&def, |s| {
            let mut student = self.students.get(s, student_id)?;
            student.major = major.to_string();
            self.students.update(s, &student)?;
            Ok(student)
        })
    }

    /// Delete a student and their enrollments.
    ///
    /// NOT_SUPPORTED, READ_COMMITTED: each delete commits on its own.
    pub fn delete_student(&self, session: &mut Session, student_id: &RowKey) -> ServiceResult<()> {
        let def = TransactionDefinition::not_supported()
            .isolation(IsolationLevel::ReadCommitted)
            .named("delete_student");
        session.run(&def, |s| {
            self.students.get(s, student_id)?;
            for enrollment in self.enrollments.find_by_student(s, student_id)? {
                self.enrollments.delete(s, &enrollment.id)?;
            }
            self.students.delete(s, student_id)
        })
    }

    // Course operations

    /// SUPPORTS.
    pub fn get_course(&self, session: &mut Session, course_id: &RowKey) -> ServiceResult<Option<Course>> {
        let def = TransactionDefinition::supports().named("get_course");
        session.run(&def, |s| self.courses.find_by_id(s, course_id))
    }

    /// SUPPORTS.
    pub fn get_all_courses(&self, session: &mut Session) -> ServiceResult<Vec<Course>> {
        let def = TransactionDefinition::supports().named("get_all_courses");
        session.run(&def, |s| self.courses.find_all(s))
    }

    /// REQUIRES_NEW, REPEATABLE_READ.
    pub fn update_course_capacity(
        &self,
        session: &mut Session,
        course_id: &RowKey,
        capacity: u32,
    ) -> ServiceResult<Course> {
        let def = TransactionDefinition::requires_new()
            .isolation(IsolationLevel::RepeatableRead)
            .named("update_course_capacity");
        session.run(&def, |s| {
            let mut course = self.courses.get(s, course_id)?;
            course.capacity = capacity;
            self.courses.update(s, &course)?;
            Ok(course)
        })
    }

    /// Delete a course and its enrollments.
    ///
    /// REQUIRED, READ_COMMITTED.
    pub fn delete_course(&self, session: &mut Session, course_id: &RowKey) -> ServiceResult<usize> {
        let def = TransactionDefinition::required()
            .isolation(IsolationLevel::ReadCommitted)
            .named("delete_course");
        session.run(&def, |s| {
            self.courses.get(s, course_id)?;
            let enrollments = self.enrollments.find_by_course(s, course_id)?;
            for enrollment in &enrollments {
                self.enrollments.delete(s, &enrollment.id)?;
            }
            self.courses.delete(s, course_id)?;
            Ok(enrollments.len())
        })
    }

    // Enrollment queries

    /// SUPPORTS, READ_COMMITTED, read-only.
    pub fn get_enrollments_by_course(
        &self,
        session: &mut Session,
        course_id: &RowKey,
    ) -> ServiceResult<Vec<Enrollment>> {
        session.run(&Self::enrollment_query("get_enrollments_by_course"), |s| {
            self.enrollments.find_by_course(s, course_id)
        })
    }

    /// SUPPORTS, READ_COMMITTED, read-only.
    pub fn get_enrollments_by_student(
        &self,
        session: &mut Session,
        student_id: &RowKey,
    ) -> ServiceResult<Vec<Enrollment>> {
        session.run(&Self::enrollment_query("get_enrollments_by_student"), |s| {
            self.enrollments.find_by_student(s, student_id)
        })
    }

    fn enrollment_query(name: &str) -> TransactionDefinition {
        TransactionDefinition::supports()
            .isolation(IsolationLevel::ReadCommitted)
            .read_only(true)
            .named(name)
    }

    /// The audit log, oldest first.
    pub fn get_logs(&self, session: &mut Session) -> ServiceResult<Vec<LogEntry>> {
        let def = TransactionDefinition::supports().read_only(true).named("get_logs");
        session.run(&def, |s| {
            let mut logs = self.logs.find_all(s)?;
            logs.sort_by_key(|entry| entry.timestamp);
            Ok(logs)
        })
    }
}
