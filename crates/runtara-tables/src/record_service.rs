// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Record service: create, list, get, update and delete records of a table.
//!
//! Cells are submitted as `{key, value}` pairs keyed by field name. Keys that do
//! not name a field of the table are dropped silently. Create and update run in
//! a single transaction scope; delete is a snapshot read followed by a delete.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{Result, TableError};
use crate::fields::{FieldSet, ResolvedCell};
use crate::persistence::{FieldRegistry, RecordPersistence, TablePersistence};
use crate::types::{
    CellInput, ListRecordsOptions, NewCell, NewRecord, PopulatedRecord, SeekPage,
    TableWebhookEventType, UpdateRecordRequest,
};
use crate::webhooks::{DispatchSummary, JoinPolicy, WebhookDelivery, WebhookDispatcher};

/// Record operations over an injected persistence backend.
pub struct RecordService {
    records: Arc<dyn RecordPersistence>,
    fields: Arc<dyn FieldRegistry>,
    webhooks: WebhookDispatcher,
}

impl RecordService {
    /// Create a service from its collaborators.
    pub fn new(
        records: Arc<dyn RecordPersistence>,
        fields: Arc<dyn FieldRegistry>,
        webhooks: WebhookDispatcher,
    ) -> Self {
        Self {
            records,
            fields,
            webhooks,
        }
    }

    /// Create a service whose collaborators are all served by one backend.
    pub fn from_persistence<P>(
        persistence: Arc<P>,
        delivery: Arc<dyn WebhookDelivery>,
        policy: JoinPolicy,
    ) -> Self
    where
        P: TablePersistence + 'static,
    {
        let webhooks =
            WebhookDispatcher::new(persistence.clone(), persistence.clone(), delivery, policy);
        Self::new(persistence.clone(), persistence, webhooks)
    }

    // ========================================================================
    // Create
    // ========================================================================

    /// Insert one record per entry of `records`, with their known cells.
    ///
    /// Every input yields a record, even one whose cells were all dropped.
    /// Returns the created records oldest first, in input order.
    #[instrument(skip(self, records), fields(table_id = %table_id, project_id = %project_id, count = records.len()))]
    pub async fn create(
        &self,
        table_id: &str,
        project_id: &str,
        records: Vec<Vec<CellInput>>,
    ) -> Result<Vec<PopulatedRecord>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        // 1. Resolve field names for this table
        let field_set = FieldSet::new(self.fields.find_fields(table_id, project_id).await?);
        if field_set.is_empty() {
            debug!("Table has no fields, records are created without cells");
        }

        // 2. Build record and cell rows
        let now = Utc::now();
        let mut new_records = Vec::with_capacity(records.len());
        let mut new_cells = Vec::new();
        let mut dropped = 0;

        for cells in &records {
            let record_id = Uuid::new_v4().to_string();
            let resolved = field_set.resolve(cells);
            dropped += resolved.dropped;

            new_cells.extend(
                resolved
                    .cells
                    .into_iter()
                    .map(|cell| new_cell(project_id, &record_id, cell, now)),
            );
            new_records.push(NewRecord {
                id: record_id,
                table_id: table_id.to_string(),
                project_id: project_id.to_string(),
                created_at: now,
            });
        }

        if dropped > 0 {
            debug!(
                dropped,
                fields = field_set.len(),
                "Dropped cells naming unknown fields"
            );
        }

        // 3. Write everything in one transaction scope
        let mut tx = self.records.begin().await?;
        tx.insert_records(&new_records).await?;
        if !new_cells.is_empty() {
            tx.insert_cells(&new_cells).await?;
        }

        let ids: Vec<String> = new_records.into_iter().map(|r| r.id).collect();
        let created = tx.find_records(&ids, project_id).await?;
        tx.commit().await?;

        info!(
            records = created.len(),
            cells = new_cells.len(),
            "Records created"
        );
        Ok(created)
    }

    // ========================================================================
    // Read
    // ========================================================================

    /// Records of a table matching every filter, oldest first.
    ///
    /// Pagination cursors are never produced; `next` and `previous` are `None`.
    #[instrument(skip(self, options), fields(table_id = %table_id, project_id = %project_id, filters = options.filters.len()))]
    pub async fn list(
        &self,
        table_id: &str,
        project_id: &str,
        options: ListRecordsOptions,
    ) -> Result<SeekPage<PopulatedRecord>> {
        let data = self
            .records
            .list_records(table_id, project_id, &options.filters, options.limit)
            .await?;

        debug!(records = data.len(), "Records listed");
        Ok(SeekPage {
            data,
            next: None,
            previous: None,
        })
    }

    /// A record with its cells, or `EntityNotFound` when it is not in the project.
    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: &str, project_id: &str) -> Result<PopulatedRecord> {
        self.records
            .get_record(id, project_id)
            .await?
            .ok_or_else(|| TableError::record_not_found(id))
    }

    /// Number of records in a table.
    #[instrument(skip(self))]
    pub async fn count(&self, table_id: &str, project_id: &str) -> Result<i64> {
        self.records.count_records(table_id, project_id).await
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Upsert the known cells of one record and return it.
    ///
    /// With `cells` absent the record is returned unchanged. The record must
    /// belong to `request.table_id` within the project.
    #[instrument(skip(self, request), fields(table_id = %request.table_id))]
    pub async fn update(
        &self,
        id: &str,
        project_id: &str,
        request: UpdateRecordRequest,
    ) -> Result<PopulatedRecord> {
        let mut tx = self.records.begin().await?;

        // 1. The record must exist in this table
        if !tx.record_exists(id, project_id, &request.table_id).await? {
            return Err(TableError::record_not_found(id));
        }

        // 2. Upsert known cells
        if let Some(cells) = request.cells.as_deref() {
            let field_set = FieldSet::new(tx.find_fields(&request.table_id, project_id).await?);
            let resolved = field_set.resolve(cells);
            if resolved.dropped > 0 {
                debug!(
                    dropped = resolved.dropped,
                    "Dropped cells naming unknown fields"
                );
            }

            let now = Utc::now();
            let new_cells: Vec<NewCell> = resolved
                .cells
                .into_iter()
                .map(|cell| new_cell(project_id, id, cell, now))
                .collect();

            if !new_cells.is_empty() {
                tx.upsert_cells(&new_cells).await?;
                tx.touch_record(id, project_id, now).await?;
            }
            debug!(cells = new_cells.len(), "Cells upserted");
        }

        // 3. Re-read the populated record
        let record = tx
            .find_records(&[id.to_string()], project_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TableError::record_not_found(id))?;
        tx.commit().await?;

        info!(record_id = %id, "Record updated");
        Ok(record)
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Delete records by id and return them as they were before deletion.
    ///
    /// Ids not found in the project are ignored. The snapshot read and the
    /// delete are separate statements, so a record written in between is
    /// deleted in its newer state but reported in its older one.
    #[instrument(skip(self, ids), fields(project_id = %project_id, count = ids.len()))]
    pub async fn delete(&self, ids: &[String], project_id: &str) -> Result<Vec<PopulatedRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let snapshot = self.records.find_records(ids, project_id).await?;
        let deleted = self.records.delete_records(ids, project_id).await?;

        info!(deleted, "Records deleted");
        Ok(snapshot)
    }

    // ========================================================================
    // Webhooks
    // ========================================================================

    /// Notify flows subscribed to `event_type` on the table.
    pub async fn trigger_webhooks(
        &self,
        project_id: &str,
        table_id: &str,
        event_type: TableWebhookEventType,
        payload: serde_json::Value,
        authorization: &str,
    ) -> Result<DispatchSummary> {
        self.webhooks
            .trigger(project_id, table_id, event_type, payload, authorization)
            .await
    }
}

fn new_cell(
    project_id: &str,
    record_id: &str,
    cell: ResolvedCell,
    written_at: DateTime<Utc>,
) -> NewCell {
    NewCell {
        id: Uuid::new_v4().to_string(),
        project_id: project_id.to_string(),
        field_id: cell.field_id,
        record_id: record_id.to_string(),
        value: cell.value,
        written_at,
    }
}
