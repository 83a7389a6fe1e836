// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
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

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `url`, run migrations and return the provider.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, TableError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        migrations::run_sqlite(&pool).await?;
        Ok(Self { pool })
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file if needed, then runs
    /// all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| TableError::Validation {
                field: "path".to_string(),
                message: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}", path.to_string_lossy());
        Self::connect(&url, 5).await
    }

    /// A private in-memory database, migrated and ready.
    ///
    /// Every connection to `sqlite::memory:` is a separate database, so the pool
    /// is pinned to one connection that is never recycled.
    pub async fn in_memory() -> Result<Self, TableError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        migrations::run_sqlite(&pool).await?;
        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ============================================================================
// Shared statements (pool and transaction)
// ============================================================================

async fn fetch_fields(
    conn: &mut SqliteConnection,
    table_id: &str,
    project_id: &str,
) -> Result<Vec<FieldRecord>, TableError> {
    let fields = sqlx::query_as::<_, FieldRecord>(
        r#"
        SELECT id, table_id, project_id, name, created_at
        FROM fields
        WHERE table_id = ? AND project_id = ?
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
    conn: &mut SqliteConnection,
    ids: &[String],
    project_id: &str,
) -> Result<Vec<PopulatedRecord>, TableError> {
    let mut rows = Vec::new();
    for chunk in ids.chunks(ID_CHUNK_SIZE) {
        let chunk_rows = query::populated_by_ids::<Sqlite>(chunk, project_id)
            .build_query_as::<RecordCellRow>()
            .fetch_all(&mut *conn)
            .await?;
        rows.extend(chunk_rows);
    }
    sort_rows_oldest_first(&mut rows);
    Ok(assemble_populated(rows))
}

async fn write_cells(
    conn: &mut SqliteConnection,
    cells: &[NewCell],
    upsert: bool,
) -> Result<(), TableError> {
    for chunk in cells.chunks(INSERT_CHUNK_SIZE) {
        query::insert_cells::<Sqlite>(chunk, upsert)
            .build()
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

// ============================================================================
// Transaction scope
// ============================================================================

/// Transaction scope over one pooled SQLite connection.
pub struct SqliteRecordTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl RecordTransaction for SqliteRecordTransaction {
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
            WHERE id = ? AND project_id = ? AND table_id = ?
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
            query::insert_records::<Sqlite>(chunk)
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
        sqlx::query("UPDATE records SET updated_at = ? WHERE id = ? AND project_id = ?")
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
impl RecordPersistence for SqlitePersistence {
    async fn begin(&self) -> Result<Box<dyn RecordTransaction>, TableError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteRecordTransaction { tx }))
    }

    async fn list_records(
        &self,
        table_id: &str,
        project_id: &str,
        filters: &[RecordFilter],
        limit: Option<i64>,
    ) -> Result<Vec<PopulatedRecord>, TableError> {
        let rows = query::populated_by_filters::<Sqlite>(table_id, project_id, filters, limit)
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
            let result = query::delete_by_ids::<Sqlite>(chunk, project_id)
                .build()
                .execute(&self.pool)
                .await?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }

    async fn count_records(&self, table_id: &str, project_id: &str) -> Result<i64, TableError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM records WHERE table_id = ? AND project_id = ?")
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
impl FieldRegistry for SqlitePersistence {
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
impl TableWebhookLookup for SqlitePersistence {
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
            WHERE project_id = ? AND table_id = ? AND event_type = ?
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
impl FlagLookup for SqlitePersistence {
    async fn get_flag(&self, flag_id: &str) -> Result<Option<String>, TableError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM flags WHERE id = ?")
            .bind(flag_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.0))
    }
}

#[async_trait]
impl TablePersistence for SqlitePersistence {
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
            VALUES (?, ?, ?, ?, ?)
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
        let result = sqlx::query("DELETE FROM fields WHERE id = ? AND project_id = ?")
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
            VALUES (?, ?, ?, ?, ?, ?)
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
        let result = sqlx::query("DELETE FROM table_webhooks WHERE id = ? AND project_id = ?")
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
            VALUES (?, ?, ?)
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
        let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_persistence() -> SqlitePersistence {
        SqlitePersistence::in_memory()
            .await
            .expect("Failed to create in-memory SQLite persistence")
    }

    fn new_record(table_id: &str, project_id: &str) -> NewRecord {
        NewRecord {
            id: Uuid::new_v4().to_string(),
            table_id: table_id.to_string(),
            project_id: project_id.to_string(),
            created_at: Utc::now(),
        }
    }

    fn new_cell(project_id: &str, field_id: &str, record_id: &str, value: &str) -> NewCell {
        NewCell {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            field_id: field_id.to_string(),
            record_id: record_id.to_string(),
            value: value.to_string(),
            written_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_find_fields() {
        let persistence = test_persistence().await;

        persistence.create_field("tbl", "prj", "name").await.unwrap();
        persistence.create_field("tbl", "prj", " age ").await.unwrap();
        persistence.create_field("other", "prj", "name").await.unwrap();

        let fields = persistence.find_fields("tbl", "prj").await.unwrap();
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(fields.len(), 2);
        assert!(names.contains(&"name"));
        assert!(names.contains(&"age"));
    }

    #[tokio::test]
    async fn test_duplicate_field_name_is_validation_error() {
        let persistence = test_persistence().await;

        persistence.create_field("tbl", "prj", "name").await.unwrap();
        let err = persistence
            .create_field("tbl", "prj", "name")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let persistence = test_persistence().await;
        let record = new_record("tbl", "prj");

        {
            let mut tx = persistence.begin().await.unwrap();
            tx.insert_records(std::slice::from_ref(&record)).await.unwrap();
            // dropped without commit
        }

        assert!(persistence.get_record(&record.id, "prj").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_cells_rejects_duplicate_triple() {
        let persistence = test_persistence().await;
        let field = persistence.create_field("tbl", "prj", "name").await.unwrap();
        let record = new_record("tbl", "prj");

        let mut tx = persistence.begin().await.unwrap();
        tx.insert_records(std::slice::from_ref(&record)).await.unwrap();
        tx.insert_cells(&[new_cell("prj", &field.id, &record.id, "a")])
            .await
            .unwrap();
        let err = tx
            .insert_cells(&[new_cell("prj", &field.id, &record.id, "b")])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "DATABASE_ERROR");
    }

    #[tokio::test]
    async fn test_delete_field_cascades_to_cells() {
        let persistence = test_persistence().await;
        let name = persistence.create_field("tbl", "prj", "name").await.unwrap();
        let age = persistence.create_field("tbl", "prj", "age").await.unwrap();
        let record = new_record("tbl", "prj");

        let mut tx = persistence.begin().await.unwrap();
        tx.insert_records(std::slice::from_ref(&record)).await.unwrap();
        tx.insert_cells(&[
            new_cell("prj", &name.id, &record.id, "Ada"),
            new_cell("prj", &age.id, &record.id, "36"),
        ])
        .await
        .unwrap();
        tx.commit().await.unwrap();

        persistence.delete_field(&age.id, "prj").await.unwrap();

        let record = persistence.get_record(&record.id, "prj").await.unwrap().unwrap();
        assert_eq!(record.cells.len(), 1);
        assert_eq!(record.value_of("name"), Some("Ada"));

        let err = persistence.delete_field(&age.id, "prj").await.unwrap_err();
        assert!(err.is_not_found(EntityType::Field));
    }

    #[tokio::test]
    async fn test_bulk_insert_spans_multiple_chunks() {
        let persistence = test_persistence().await;
        let records: Vec<_> = (0..(INSERT_CHUNK_SIZE * 2 + 7))
            .map(|_| new_record("tbl", "prj"))
            .collect();

        let mut tx = persistence.begin().await.unwrap();
        tx.insert_records(&records).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            persistence.count_records("tbl", "prj").await.unwrap(),
            records.len() as i64
        );
    }

    #[tokio::test]
    async fn test_find_records_across_chunks_keeps_insertion_order() {
        let persistence = test_persistence().await;
        let created_at = Utc::now();
        let records: Vec<_> = (0..(ID_CHUNK_SIZE + 5))
            .map(|_| NewRecord {
                created_at,
                ..new_record("tbl", "prj")
            })
            .collect();

        let mut tx = persistence.begin().await.unwrap();
        tx.insert_records(&records).await.unwrap();
        tx.commit().await.unwrap();

        let mut ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        ids.reverse();
        let found = persistence.find_records(&ids, "prj").await.unwrap();

        let found_ids: Vec<&str> = found.iter().map(|r| r.id.as_str()).collect();
        let inserted_ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(found_ids, inserted_ids);
    }

    #[tokio::test]
    async fn test_flags_and_webhooks() {
        let persistence = test_persistence().await;

        assert_eq!(persistence.get_flag("PUBLIC_URL").await.unwrap(), None);
        persistence.set_flag("PUBLIC_URL", "http://a").await.unwrap();
        persistence.set_flag("PUBLIC_URL", "http://b").await.unwrap();
        assert_eq!(
            persistence.get_flag("PUBLIC_URL").await.unwrap().as_deref(),
            Some("http://b")
        );

        let hook = persistence
            .create_webhook("prj", "tbl", TableWebhookEventType::RecordCreated, "flow-1")
            .await
            .unwrap();
        persistence
            .create_webhook("prj", "tbl", TableWebhookEventType::RecordDeleted, "flow-2")
            .await
            .unwrap();

        let created = persistence
            .get_webhooks("prj", "tbl", TableWebhookEventType::RecordCreated)
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].flow_id, "flow-1");

        persistence.delete_webhook(&hook.id, "prj").await.unwrap();
        assert!(
            persistence
                .get_webhooks("prj", "tbl", TableWebhookEventType::RecordCreated)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_health_check() {
        let persistence = test_persistence().await;
        assert!(persistence.health_check_db().await.unwrap());
    }

    #[tokio::test]
    async fn test_from_path_creates_parent_dirs_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tables.db");

        let persistence = SqlitePersistence::from_path(&path).await.unwrap();
        persistence.set_flag("PUBLIC_URL", "https://flows.example.com").await.unwrap();
        persistence.pool().close().await;
        assert!(path.exists());

        let reopened = SqlitePersistence::from_path(&path).await.unwrap();
        assert_eq!(
            reopened.get_flag("PUBLIC_URL").await.unwrap().as_deref(),
            Some("https://flows.example.com")
        );
    }
}
