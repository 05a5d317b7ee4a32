//! Table access for records.
//!
//! Every call goes through the session it is given, so it reads and writes
//! on whatever transaction (or autocommit) the calling unit runs in.

use std::marker::PhantomData;

use log::trace;

use crate::storage::{Row, RowKey, StorageError, TableName};
use crate::transaction::Session;
use crate::university::error::{ServiceError, ServiceResult};
use crate::university::model::{Enrollment, Record};

pub struct Repository<T: Record> {
    table: TableName,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Repository<T> {
    pub fn new() -> ServiceResult<Self> {
        let table = TableName::new(T::TABLE).map_err(StorageError::from)?;
        Ok(Self {
            table,
            _record: PhantomData,
        })
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn find_by_id(&self, session: &Session, id: &RowKey) -> ServiceResult<Option<T>> {
        match session.read(&self.table, id)? {
            Some(row) => Ok(Some(row.to_record()?)),
            None => Ok(None),
        }
    }

    /// Like [`find_by_id`](Self::find_by_id), failing with `NotFound`.
    pub fn get(&self, session: &Session, id: &RowKey) -> ServiceResult<T> {
        self.find_by_id(session, id)?
            .ok_or_else(|| ServiceError::not_found(T::ENTITY, id))
    }

    pub fn find_all(&self, session: &Session) -> ServiceResult<Vec<T>> {
        session
            .scan(&self.table)?
            .iter()
            .map(|row| row.to_record().map_err(ServiceError::from))
            .collect()
    }

    pub fn insert(&self, session: &Session, record: &T) -> ServiceResult<()> {
        trace!("insert {} {}", T::ENTITY, record.id());
        let row = Row::from_record(record.id().clone(), record)?;
        session.insert(&self.table, row)?;
        Ok(())
    }

    pub fn update(&self, session: &Session, record: &T) -> ServiceResult<()> {
        trace!("update {} {}", T::ENTITY, record.id());
        let row = Row::from_record(record.id().clone(), record)?;
        match session.update(&self.table, row) {
            Err(e) if e.is_not_found() => Err(ServiceError::not_found(T::ENTITY, record.id())),
            other => Ok(other?),
        }
    }

    pub fn delete(&self, session: &Session, id: &RowKey) -> ServiceResult<()> {
        match session.delete(&self.table, id) {
            Err(e) if e.is_not_found() => Err(ServiceError::not_found(T::ENTITY, id)),
            other => Ok(other?),
        }
    }
}

impl Repository<Enrollment> {
    pub fn find_by_course(&self, session: &Session, course: &RowKey) -> ServiceResult<Vec<Enrollment>> {
        let mut found: Vec<_> = self
            .find_all(session)?
            .into_iter()
            .filter(|e| &e.course_id == course)
            .collect();
        found.sort_by_key(|e| e.enrolled_at);
        Ok(found)
    }

    pub fn find_by_student(&self, session: &Session, student: &RowKey) -> ServiceResult<Vec<Enrollment>> {
        let mut found: Vec<_> = self
            .find_all(session)?
            .into_iter()
            .filter(|e| &e.student_id == student)
            .collect();
        found.sort_by_key(|e| e.enrolled_at);
        Ok(found)
    }
}
