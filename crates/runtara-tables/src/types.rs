// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request and response types shared by the record service and persistence backends.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TableError;
use crate::filter::RecordFilter;

/// A field (column) definition of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FieldRecord {
    /// Unique field identifier.
    pub id: String,
    /// Table the field belongs to.
    pub table_id: String,
    /// Project the table belongs to.
    pub project_id: String,
    /// Field name, unique within (table_id, project_id).
    pub name: String,
    /// When the field was created.
    pub created_at: DateTime<Utc>,
}

/// One `{key, value}` entry of a submitted record, where `key` is a field name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellInput {
    /// Field name the value is for.
    pub key: String,
    /// Cell value.
    pub value: String,
}

impl CellInput {
    /// Convenience constructor.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Request body for updating a single record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRecordRequest {
    /// Table the record must belong to.
    pub table_id: String,
    /// Cells to upsert; `None` leaves the cells untouched.
    pub cells: Option<Vec<CellInput>>,
}

/// Options for listing records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListRecordsOptions {
    /// Conjunctive per-field filters.
    #[serde(default)]
    pub filters: Vec<RecordFilter>,
    /// Maximum number of records to return.
    pub limit: Option<i64>,
}

/// A cell as returned to callers, keyed by field id in [`PopulatedRecord::cells`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulatedCell {
    /// Name of the field this cell holds a value for.
    pub field_name: String,
    /// Cell value.
    pub value: String,
    /// When the cell was first written.
    pub created_at: DateTime<Utc>,
    /// When the cell was last written.
    pub updated_at: DateTime<Utc>,
}

/// A record together with its full set of cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulatedRecord {
    /// Unique record identifier.
    pub id: String,
    /// Table the record belongs to.
    pub table_id: String,
    /// Project the table belongs to.
    pub project_id: String,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record or one of its cells was last written.
    pub updated_at: DateTime<Utc>,
    /// Cells keyed by field id.
    pub cells: BTreeMap<String, PopulatedCell>,
}

impl PopulatedRecord {
    /// Look up a cell value by field name.
    pub fn value_of(&self, field_name: &str) -> Option<&str> {
        self.cells
            .values()
            .find(|cell| cell.field_name == field_name)
            .map(|cell| cell.value.as_str())
    }
}

/// A page of results with opaque seek cursors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekPage<T> {
    /// Items on this page.
    pub data: Vec<T>,
    /// Cursor for the following page.
    pub next: Option<String>,
    /// Cursor for the preceding page.
    pub previous: Option<String>,
}

/// Record-level events flows can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableWebhookEventType {
    /// One or more records were created.
    RecordCreated,
    /// A record was updated.
    RecordUpdated,
    /// One or more records were deleted.
    RecordDeleted,
}

impl TableWebhookEventType {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecordCreated => "RECORD_CREATED",
            Self::RecordUpdated => "RECORD_UPDATED",
            Self::RecordDeleted => "RECORD_DELETED",
        }
    }
}

impl fmt::Display for TableWebhookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableWebhookEventType {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECORD_CREATED" => Ok(Self::RecordCreated),
            "RECORD_UPDATED" => Ok(Self::RecordUpdated),
            "RECORD_DELETED" => Ok(Self::RecordDeleted),
            other => Err(TableError::Validation {
                field: "event_type".to_string(),
                message: format!("unknown table webhook event '{}'", other),
            }),
        }
    }
}

/// A flow subscribed to record events of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableWebhookRecord {
    /// Unique subscription identifier.
    pub id: String,
    /// Project the table belongs to.
    pub project_id: String,
    /// Table being watched.
    pub table_id: String,
    /// Event the flow is subscribed to.
    pub event_type: TableWebhookEventType,
    /// Flow to trigger.
    pub flow_id: String,
    /// When the subscription was created.
    pub created_at: DateTime<Utc>,
}

/// A new record row, produced by the service before insertion.
#[derive(Debug, Clone)]
pub struct NewRecord {
    /// Generated record id.
    pub id: String,
    /// Table the record belongs to.
    pub table_id: String,
    /// Project the table belongs to.
    pub project_id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A cell row to insert or upsert, with its field id already resolved.
#[derive(Debug, Clone)]
pub struct NewCell {
    /// Generated cell id (ignored when an upsert hits an existing row).
    pub id: String,
    /// Project the record belongs to.
    pub project_id: String,
    /// Resolved field id.
    pub field_id: String,
    /// Record the cell belongs to.
    pub record_id: String,
    /// Cell value.
    pub value: String,
    /// Write timestamp.
    pub written_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trips_through_storage_name() {
        for event in [
            TableWebhookEventType::RecordCreated,
            TableWebhookEventType::RecordUpdated,
            TableWebhookEventType::RecordDeleted,
        ] {
            assert_eq!(event.as_str().parse::<TableWebhookEventType>().unwrap(), event);
        }
        assert!("RECORD_MOVED".parse::<TableWebhookEventType>().is_err());
    }

    #[test]
    fn test_event_type_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&TableWebhookEventType::RecordUpdated).unwrap();
        assert_eq!(json, "\"RECORD_UPDATED\"");
    }

    #[test]
    fn test_value_of_looks_up_by_field_name() {
        let now = Utc::now();
        let mut cells = BTreeMap::new();
        cells.insert(
            "fld-1".to_string(),
            PopulatedCell {
                field_name: "age".to_string(),
                value: "30".to_string(),
                created_at: now,
                updated_at: now,
            },
        );
        let record = PopulatedRecord {
            id: "rec-1".to_string(),
            table_id: "tbl".to_string(),
            project_id: "prj".to_string(),
            created_at: now,
            updated_at: now,
            cells,
        };

        assert_eq!(record.value_of("age"), Some("30"));
        assert_eq!(record.value_of("name"), None);
    }
}
