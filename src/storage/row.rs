//! Row format for the storage layer.
//!
//! Each row is a JSON object with metadata for version tracking and
//! conflict detection, plus the user columns.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::RowKey;

/// One stored record: its key, bookkeeping columns and the record fields.
///
/// Serialized form:
/// ```text
/// {
///   "_pk": "abc123",
///   "_version": 1,
///   "_created_at": "xxxx-xx-xxT00:00:00Z",
///   "_updated_at": "xxxx-xx-xxT00:00:00Z",
///   "name": "Databases 101",
///   "capacity": 30
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// primary key
    pub key: RowKey,
    /// version number, bumped on every update
    pub version: u64,
    /// creation timestamp
    pub created_at: String,
    /// last update timestamp
    pub updated_at: String,
    /// data (column values)
    pub data: BTreeMap<String, Value>,
}

impl Row {
    /// Version 1, stamped now.
    pub fn new(key: RowKey, data: BTreeMap<String, Value>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            key,
            version: 1,
            created_at: now.clone(),
            updated_at: now,
            data,
        }
    }

    /// `value` must be a JSON object; its members become the columns.
    pub fn from_value(key: RowKey, value: Value) -> StorageResult<Self> {
        let data = match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => {
                return Err(StorageError::SchemaViolation(
                    "row data must be a JSON object".to_string(),
                ))
            }
        };
        Ok(Self::new(key, data))
    }

    pub fn from_record<T: Serialize>(key: RowKey, record: &T) -> StorageResult<Self> {
        Self::from_value(key, serde_json::to_value(record)?)
    }

    /// Decode the columns back into a record.
    pub fn to_record<T: DeserializeOwned>(&self) -> StorageResult<T> {
        let object: serde_json::Map<String, Value> = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(serde_json::from_value(Value::Object(object))?)
    }

    /// Replace the columns, bumping the version and `updated_at`.
    pub fn with_update(self, new_data: BTreeMap<String, Value>) -> Self {
        Self {
            key: self.key,
            version: self.version + 1,
            created_at: self.created_at,
            updated_at: chrono::Utc::now().to_rfc3339(),
            data: new_data,
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.data.get(column)
    }
}

/// On-disk shape; bookkeeping keys carry a `_` prefix so they never clash
/// with record fields.
#[derive(Serialize, Deserialize)]
struct RowJson {
    #[serde(rename = "_pk")]
    pk: String,
    #[serde(rename = "_version")]
    version: u64,
    #[serde(rename = "_created_at")]
    created_at: String,
    #[serde(rename = "_updated_at")]
    updated_at: String,
    #[serde(flatten)]
    data: BTreeMap<String, Value>,
}

/// Flatten a row into the JSON object written by exports.
pub fn serialize_row(row: &Row) -> StorageResult<Value> {
    let json = RowJson {
        pk: row.key.as_str().to_string(),
        version: row.version,
        created_at: row.created_at.clone(),
        updated_at: row.updated_at.clone(),
        data: row.data.clone(),
    };
    Ok(serde_json::to_value(json)?)
}

pub fn deserialize_row(value: Value) -> StorageResult<Row> {
    let json: RowJson = serde_json::from_value(value)?;
    Ok(Row {
        key: RowKey::new(json.pk)?,
        version: json.version,
        created_at: json.created_at,
        updated_at: json.updated_at,
        data: json.data,
    })
}
