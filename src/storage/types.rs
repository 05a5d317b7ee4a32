//! Identifiers handed around by the storage layer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Identifies one open physical connection inside a storage backend.
///
/// This makes sure a savepoint ID is never passed where a connection is
/// expected. Values are only minted by the backend that owns the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A savepoint name within one connection, e.g. `sp_3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SavepointId(String);

impl SavepointId {
    pub(crate) fn numbered(n: u32) -> Self {
        Self(format!("sp_{}", n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SavepointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Characters allowed in table names and row keys.
fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn check_name(value: &str, max_len: usize) -> Result<(), InvalidNameError> {
    if value.is_empty() {
        return Err(InvalidNameError::Empty);
    }
    if value.len() > max_len {
        return Err(InvalidNameError::TooLong {
            len: value.len(),
            max: max_len,
        });
    }
    match value.char_indices().find(|(_, c)| !is_name_char(*c)) {
        Some((position, char)) => Err(InvalidNameError::InvalidCharacter { char, position }),
        None => Ok(()),
    }
}

/// Name of a table in a storage backend.
///
/// Up to 64 name characters (letters, digits, `_`, `-`), not starting with
/// a digit or hyphen. Names the backend keeps for itself are refused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName(String);

impl TableName {
    const MAX_LEN: usize = 64;
    const RESERVED: &'static [&'static str] = &["_schema", "_meta", "_system"];

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        check_name(&name, Self::MAX_LEN)?;

        if let Some(first) = name.chars().next().filter(|c| c.is_ascii_digit() || *c == '-') {
            return Err(InvalidNameError::InvalidStart(first));
        }
        if Self::RESERVED.contains(&name.to_ascii_lowercase().as_str()) {
            return Err(InvalidNameError::Reserved(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Primary key of a row, usually a lowercase ULID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey(String);

impl RowKey {
    const MAX_LEN: usize = 128;

    pub fn new(key: impl Into<String>) -> Result<Self, InvalidNameError> {
        let key = key.into();
        check_name(&key, Self::MAX_LEN)?;
        Ok(Self(key))
    }

    pub fn generate() -> Self {
        ulid::Ulid::new().into()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<ulid::Ulid> for RowKey {
    fn from(id: ulid::Ulid) -> Self {
        Self(id.to_string().to_lowercase())
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RowKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidNameError {
    #[error("name is empty")]
    Empty,
    #[error("name is {len} characters, at most {max} allowed")]
    TooLong { len: usize, max: usize },
    #[error("table name may not start with '{0}'")]
    InvalidStart(char),
    #[error("'{char}' at position {position} is not allowed in a name")]
    InvalidCharacter { char: char, position: usize },
    #[error("'{0}' is reserved")]
    Reserved(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        for name in ["students", "course_logs", "Course2024", "_audit", "grade-book"] {
            assert_eq!(TableName::new(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn test_table_name_invalid() {
        assert!(TableName::new("").is_err());
        assert!(TableName::new("123courses").is_err());
        assert!(TableName::new("courses/admin").is_err());
        assert_eq!(
            TableName::new("_Schema"),
            Err(InvalidNameError::Reserved("_Schema".into()))
        );
        assert_eq!(
            TableName::new("a".repeat(65)),
            Err(InvalidNameError::TooLong { len: 65, max: 64 })
        );
    }

    #[test]
    fn test_row_keys() {
        assert_ne!(RowKey::generate(), RowKey::generate());
        assert_eq!(RowKey::generate().as_str().len(), 26);
        assert!(RowKey::new("42").is_ok());
        assert_eq!(
            RowKey::new("a b"),
            Err(InvalidNameError::InvalidCharacter { char: ' ', position: 1 })
        );
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert_eq!(SavepointId::numbered(2).as_str(), "sp_2");
    }
}
