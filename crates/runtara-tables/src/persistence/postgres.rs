// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed persistence implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres};
use uuid::Uuid;

use crate::error::{EntityType, TableError};
use crate::filter::RecordFilter;
use crate::migrations;
use crate::types::{
    FieldRecord, NewCell, NewRecord, PopulatedRecord, TableWebhookEventType, TableWebhookRecord,
};

use super::{
    FieldRegistry, FlagLookup, ID_CHUNK_SIZE, INSERT_CHUNK_SIZE, RecordCellRow, RecordPersistence,
    RecordTransaction, TablePersistence, TableWebhookLookup, TableWebhookRow, assemble_populated,
    query, sort_rows_oldest_first, validate_field_name,
};

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation from a migrated pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `url`, run migrations and return the provider.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, TableError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        migrations::run_postgres(&pool).await?;
        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Shared statements (pool and transaction)
// ============================================================================

async fn fetch_fields(
    conn: &mut PgConnection,
    table_id: &str,
    project_id: &str,
) -> Result<Vec<FieldRecord>, TableError> {
    let fields = sqlx::query_as::<_, FieldRecord>(
        r#"
        SELECT id, table_id, project_id, name, created_at
        FROM fields
        WHERE table_id = $1 AND project_id = $2
        ORDER BY created_at ASC, name ASC
        "#,
    )
    .bind(table_id)
    .bind(project_id)
    .fetch_all(conn)
    .await?;

    Ok(fields)
}

async fn fetch_populated_by_ids(
    conn: &mut PgConnection,
    ids: &[String],
    project_id: &str,
) -> Result<Vec<PopulatedRecord>, TableError> {
    let mut rows = Vec::new();
    for chunk in ids.chunks(ID_CHUNK_SIZE) {
        let chunk_rows = query::populated_by_ids::<Postgres>(chunk, project_id)
            .build_query_as::<RecordCellRow>()
            .fetch_all(&mut *conn)
            .await?;
        rows.extend(chunk_rows);
    }
    sort_rows_oldest_first(&mut rows);
    Ok(assemble_populated(rows))
}

async fn write_cells(
    conn: &mut PgConnection,
    cells: &[NewCell],
    upsert: bool,
) -> Result<(), TableError> {
    for chunk in cells.chunks(INSERT_CHUNK_SIZE) {
        query::insert_cells::<Postgres>(chunk, upsert)
            .build()
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

// ============================================================================
// Transaction scope
// ============================================================================

/// Transaction scope over one pooled Postgres connection.
pub struct PostgresRecordTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl RecordTransaction for PostgresRecordTransaction {
    async fn find_fields(
        &mut self,
        table_id: &str,
        project_id: &str,
    ) -> Result<Vec<FieldRecord>, TableError> {
        fetch_fields(&mut self.tx, table_id, project_id).await
    }

    async fn record_exists(
        &mut self,
        id: &str,
        project_id: &str,
        table_id: &str,
    ) -> Result<bool, TableError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM records
            WHERE id = $1 AND project_id = $2 AND table_id = $3
            "#,
        )
        .bind(id)
        .bind(project_id)
        .bind(table_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(count > 0)
    }

    async fn insert_records(&mut self, records: &[NewRecord]) -> Result<(), TableError> {
        for chunk in records.chunks(INSERT_CHUNK_SIZE) {
            query::insert_records::<Postgres>(chunk)
                .build()
                .execute(&mut *self.tx)
                .await?;
        }
        Ok(())
    }

    async fn insert_cells(&mut self, cells: &[NewCell]) -> Result<(), TableError> {
        write_cells(&mut self.tx, cells, false).await
    }

    async fn upsert_cells(&mut self, cells: &[NewCell]) -> Result<(), TableError> {
        write_cells(&mut self.tx, cells, true).await
    }

    async fn touch_record(
        &mut self,
        id: &str,
        project_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), TableError> {
        sqlx::query("UPDATE records SET updated_at = $1 WHERE id = $2 AND project_id = $3")
            .bind(at)
            .bind(id)
            .bind(project_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_records(
        &mut self,
        ids: &[String],
        project_id: &str,
    ) -> Result<Vec<PopulatedRecord>, TableError> {
        fetch_populated_by_ids(&mut self.tx, ids, project_id).await
    }

    async fn commit(self: Box<Self>) -> Result<(), TableError> {
        self.tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// Records
// ============================================================================

#[async_trait]
impl RecordPersistence for PostgresPersistence {
    async fn begin(&self) -> Result<Box<dyn RecordTransaction>, TableError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresRecordTransaction { tx }))
    }

    async fn list_records(
        &self,
        table_id: &str,
        project_id: &str,
        filters: &[RecordFilter],
        limit: Option<i64>,
    ) -> Result<Vec<PopulatedRecord>, TableError> {
        let rows = query::populated_by_filters::<Postgres>(table_id, project_id, filters, limit)
            .build_query_as::<RecordCellRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(assemble_populated(rows))
    }

    async fn get_record(
        &self,
        id: &str,
        project_id: &str,
    ) -> Result<Option<PopulatedRecord>, TableError> {
        let mut conn = self.pool.acquire().await?;
        let records = fetch_populated_by_ids(&mut conn, &[id.to_string()], project_id).await?;
        Ok(records.into_iter().next())
    }

    async fn find_records(
        &self,
        ids: &[String],
        project_id: &str,
    ) -> Result<Vec<PopulatedRecord>, TableError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.acquire().await?;
        fetch_populated_by_ids(&mut conn, ids, project_id).await
    }

    async fn delete_records(&self, ids: &[String], project_id: &str) -> Result<u64, TableError> {
        let mut deleted = 0;
        for chunk in ids.chunks(ID_CHUNK_SIZE) {
            let result = query::delete_by_ids::<Postgres>(chunk, project_id)
                .build()
                .execute(&self.pool)
                .await?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }

    async fn count_records(&self, table_id: &str, project_id: &str) -> Result<i64, TableError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM records WHERE table_id = $1 AND project_id = $2")
                .bind(table_id)
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

// ============================================================================
// Fields, webhooks, flags
// ============================================================================

#[async_trait]
impl FieldRegistry for PostgresPersistence {
    async fn find_fields(
        &self,
        table_id: &str,
        project_id: &str,
    ) -> Result<Vec<FieldRecord>, TableError> {
        let mut conn = self.pool.acquire().await?;
        fetch_fields(&mut conn, table_id, project_id).await
    }
}

#[async_trait]
impl TableWebhookLookup for PostgresPersistence {
    async fn get_webhooks(
        &self,
        project_id: &str,
        table_id: &str,
        event_type: TableWebhookEventType,
    ) -> Result<Vec<TableWebhookRecord>, TableError> {
        let rows = sqlx::query_as::<_, TableWebhookRow>(
            r#"
            SELECT id, project_id, table_id, event_type, flow_id, created_at
            FROM table_webhooks
            WHERE project_id = $1 AND table_id = $2 AND event_type = $3
            ORDER BY created_at ASC
            "#,
        )
        .bind(project_id)
        .bind(table_id)
        .bind(event_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TableWebhookRecord::try_from).collect()
    }
}

#[async_trait]
impl FlagLookup for PostgresPersistence {
    async fn get_flag(&self, flag_id: &str) -> Result<Option<String>, TableError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM flags WHERE id = $1")
            .bind(flag_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.0))
    }
}

#[async_trait]
impl TablePersistence for PostgresPersistence {
    async fn create_field(
        &self,
        table_id: &str,
        project_id: &str,
        name: &str,
    ) -> Result<FieldRecord, TableError> {
        let field = FieldRecord {
            id: Uuid::new_v4().to_string(),
            table_id: table_id.to_string(),
            project_id: project_id.to_string(),
            name: validate_field_name(name)?.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO fields (id, table_id, project_id, name, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&field.id)
        .bind(&field.table_id)
        .bind(&field.project_id)
        .bind(&field.name)
        .bind(field.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => TableError::Validation {
                field: "name".to_string(),
                message: format!("field '{}' already exists on this table", field.name),
            },
            other => TableError::Database(other),
        })?;

        Ok(field)
    }

    async fn delete_field(&self, field_id: &str, project_id: &str) -> Result<(), TableError> {
        let result = sqlx::query("DELETE FROM fields WHERE id = $1 AND project_id = $2")
            .bind(field_id)
            .bind(project_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(TableError::EntityNotFound {
                entity_type: EntityType::Field,
                entity_id: field_id.to_string(),
            });
        }
        Ok(())
    }

    async fn create_webhook(
        &self,
        project_id: &str,
        table_id: &str,
        event_type: TableWebhookEventType,
        flow_id: &str,
    ) -> Result<TableWebhookRecord, TableError> {
        let webhook = TableWebhookRecord {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            table_id: table_id.to_string(),
            event_type,
            flow_id: flow_id.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO table_webhooks (id, project_id, table_id, event_type, flow_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&webhook.id)
        .bind(&webhook.project_id)
        .bind(&webhook.table_id)
        .bind(webhook.event_type.as_str())
        .bind(&webhook.flow_id)
        .bind(webhook.created_at)
        .execute(&self.pool)
        .await?;

        Ok(webhook)
    }

    async fn delete_webhook(&self, id: &str, project_id: &str) -> Result<(), TableError> {
        let result = sqlx::query("DELETE FROM table_webhooks WHERE id = $1 AND project_id = $2")
            .bind(id)
            .bind(project_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(TableError::EntityNotFound {
                entity_type: EntityType::TableWebhook,
                entity_id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn set_flag(&self, flag_id: &str, value: &str) -> Result<(), TableError> {
        sqlx::query(
            r#"
            INSERT INTO flags (id, value, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(flag_id)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn health_check_db(&self) -> Result<bool, TableError> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}

