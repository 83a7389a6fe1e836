// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for runtara-tables.
//!
//! The record service only talks to the traits defined here. Multi-statement
//! writes go through an explicit [`RecordTransaction`] obtained from
//! [`RecordPersistence::begin`]; dropping a transaction without calling
//! [`RecordTransaction::commit`] rolls it back.

pub mod postgres;
mod query;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::TableError;
use crate::filter::RecordFilter;
use crate::types::{
    FieldRecord, NewCell, NewRecord, PopulatedCell, PopulatedRecord, TableWebhookEventType,
    TableWebhookRecord,
};

/// Flag holding the platform's public base URL.
pub const PUBLIC_URL_FLAG: &str = "PUBLIC_URL";

/// Rows per multi-row INSERT. Cells bind seven parameters per row, which keeps
/// every statement well under SQLite's and Postgres' bind limits.
pub(crate) const INSERT_CHUNK_SIZE: usize = 500;

/// Ids per `IN (...)` list.
pub(crate) const ID_CHUNK_SIZE: usize = 1000;

/// One row of `records LEFT JOIN cells LEFT JOIN fields`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecordCellRow {
    /// Record id.
    pub id: String,
    /// Insertion counter, breaks ties between records sharing `created_at`.
    pub seq: i64,
    /// Record table id.
    pub table_id: String,
    /// Record project id.
    pub project_id: String,
    /// Record creation time.
    pub created_at: DateTime<Utc>,
    /// Record last update time.
    pub updated_at: DateTime<Utc>,
    /// Cell field id (None when the record has no cells).
    pub field_id: Option<String>,
    /// Cell field name.
    pub field_name: Option<String>,
    /// Cell value.
    pub value: Option<String>,
    /// Cell creation time.
    pub cell_created_at: Option<DateTime<Utc>>,
    /// Cell last update time.
    pub cell_updated_at: Option<DateTime<Utc>>,
}

/// Table webhook row as stored (event type is text).
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct TableWebhookRow {
    pub id: String,
    pub project_id: String,
    pub table_id: String,
    pub event_type: String,
    pub flow_id: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TableWebhookRow> for TableWebhookRecord {
    type Error = TableError;

    fn try_from(row: TableWebhookRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            project_id: row.project_id,
            table_id: row.table_id,
            event_type: row.event_type.parse()?,
            flow_id: row.flow_id,
            created_at: row.created_at,
        })
    }
}

/// Fold joined rows into populated records, keeping the row order of records.
pub fn assemble_populated(rows: Vec<RecordCellRow>) -> Vec<PopulatedRecord> {
    let mut records: Vec<PopulatedRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let idx = match index.get(&row.id) {
            Some(&idx) => idx,
            None => {
                index.insert(row.id.clone(), records.len());
                records.push(PopulatedRecord {
                    id: row.id.clone(),
                    table_id: row.table_id.clone(),
                    project_id: row.project_id.clone(),
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                    cells: BTreeMap::new(),
                });
                records.len() - 1
            }
        };

        if let (Some(field_id), Some(field_name), Some(value)) =
            (row.field_id, row.field_name, row.value)
        {
            let created_at = row.cell_created_at.unwrap_or(row.created_at);
            records[idx].cells.insert(
                field_id,
                PopulatedCell {
                    field_name,
                    value,
                    created_at,
                    updated_at: row.cell_updated_at.unwrap_or(created_at),
                },
            );
        }
    }

    records
}

/// Restore oldest-first order after concatenating per-chunk rows.
///
/// Rows of one record share both keys and stay adjacent.
pub(crate) fn sort_rows_oldest_first(rows: &mut [RecordCellRow]) {
    rows.sort_by_key(|row| (row.created_at, row.seq));
}

/// Resolves which fields exist for a table.
#[async_trait]
pub trait FieldRegistry: Send + Sync {
    /// All fields of (table_id, project_id).
    async fn find_fields(
        &self,
        table_id: &str,
        project_id: &str,
    ) -> Result<Vec<FieldRecord>, TableError>;
}

/// Looks up flows subscribed to record events.
#[async_trait]
pub trait TableWebhookLookup: Send + Sync {
    /// Subscriptions for (project_id, table_id, event_type).
    async fn get_webhooks(
        &self,
        project_id: &str,
        table_id: &str,
        event_type: TableWebhookEventType,
    ) -> Result<Vec<TableWebhookRecord>, TableError>;
}

/// Reads platform flags.
#[async_trait]
pub trait FlagLookup: Send + Sync {
    /// Value of a flag, or None when it was never set.
    async fn get_flag(&self, flag_id: &str) -> Result<Option<String>, TableError>;
}

/// Read and delete access to records, plus the entry point for transactions.
#[allow(missing_docs)]
#[async_trait]
pub trait RecordPersistence: Send + Sync {
    /// Open a transaction scope for a multi-statement write.
    async fn begin(&self) -> Result<Box<dyn RecordTransaction>, TableError>;

    /// Populated records of a table matching every filter, oldest first.
    async fn list_records(
        &self,
        table_id: &str,
        project_id: &str,
        filters: &[RecordFilter],
        limit: Option<i64>,
    ) -> Result<Vec<PopulatedRecord>, TableError>;

    async fn get_record(
        &self,
        id: &str,
        project_id: &str,
    ) -> Result<Option<PopulatedRecord>, TableError>;

    /// Populated records among `ids` that belong to the project, oldest first.
    async fn find_records(
        &self,
        ids: &[String],
        project_id: &str,
    ) -> Result<Vec<PopulatedRecord>, TableError>;

    /// Delete records among `ids` that belong to the project. Returns rows deleted.
    async fn delete_records(&self, ids: &[String], project_id: &str) -> Result<u64, TableError>;

    async fn count_records(&self, table_id: &str, project_id: &str) -> Result<i64, TableError>;
}

/// An open transaction scope. All statements run on the same connection.
#[async_trait]
pub trait RecordTransaction: Send {
    /// All fields of (table_id, project_id), read inside the transaction.
    async fn find_fields(
        &mut self,
        table_id: &str,
        project_id: &str,
    ) -> Result<Vec<FieldRecord>, TableError>;

    /// Whether a record exists under (project_id, table_id, id).
    async fn record_exists(
        &mut self,
        id: &str,
        project_id: &str,
        table_id: &str,
    ) -> Result<bool, TableError>;

    /// Bulk insert records in the given order.
    async fn insert_records(&mut self, records: &[NewRecord]) -> Result<(), TableError>;

    /// Bulk insert cells. Fails on a (project_id, field_id, record_id) conflict.
    async fn insert_cells(&mut self, cells: &[NewCell]) -> Result<(), TableError>;

    /// Insert cells, overwriting value and updated_at on a
    /// (project_id, field_id, record_id) conflict.
    async fn upsert_cells(&mut self, cells: &[NewCell]) -> Result<(), TableError>;

    /// Set a record's updated_at.
    async fn touch_record(
        &mut self,
        id: &str,
        project_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), TableError>;

    /// Populated records among `ids` that belong to the project, oldest first.
    async fn find_records(
        &mut self,
        ids: &[String],
        project_id: &str,
    ) -> Result<Vec<PopulatedRecord>, TableError>;

    /// Make every statement of this scope durable.
    async fn commit(self: Box<Self>) -> Result<(), TableError>;
}

/// Everything a backend provides: records, the field registry, webhook
/// subscriptions, flags, and the administration operations that populate them.
#[allow(missing_docs)]
#[async_trait]
pub trait TablePersistence:
    RecordPersistence + FieldRegistry + TableWebhookLookup + FlagLookup
{
    /// Define a field on a table. Fails on an empty or duplicate name.
    async fn create_field(
        &self,
        table_id: &str,
        project_id: &str,
        name: &str,
    ) -> Result<FieldRecord, TableError>;

    /// Remove a field and every cell holding a value for it.
    async fn delete_field(&self, field_id: &str, project_id: &str) -> Result<(), TableError>;

    /// Subscribe a flow to a record event of a table.
    async fn create_webhook(
        &self,
        project_id: &str,
        table_id: &str,
        event_type: TableWebhookEventType,
        flow_id: &str,
    ) -> Result<TableWebhookRecord, TableError>;

    async fn delete_webhook(&self, id: &str, project_id: &str) -> Result<(), TableError>;

    /// Create or overwrite a flag.
    async fn set_flag(&self, flag_id: &str, value: &str) -> Result<(), TableError>;

    async fn health_check_db(&self) -> Result<bool, TableError>;
}

/// Reject empty field names before they reach storage.
pub(crate) fn validate_field_name(name: &str) -> Result<&str, TableError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TableError::Validation {
            field: "name".to_string(),
            message: "field name must not be empty".to_string(),
        });
    }
    Ok(trimmed)
}
