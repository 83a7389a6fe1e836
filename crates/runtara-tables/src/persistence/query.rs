// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQL builders shared by the SQLite and PostgreSQL backends.
//!
//! Placeholders are emitted by [`QueryBuilder`] in each backend's own syntax, so
//! the statement text is written once.

use chrono::{DateTime, Utc};
use sqlx::{Database, Encode, QueryBuilder, Type};

use crate::filter::{RecordFilter, push_filter_predicates};
use crate::types::{NewCell, NewRecord};

/// Columns and joins producing [`super::RecordCellRow`]s. Records are aliased `r`.
const POPULATED_SELECT: &str = r#"
SELECT r.id, r.seq, r.table_id, r.project_id, r.created_at, r.updated_at,
       c.field_id, f.name AS field_name, c.value,
       c.created_at AS cell_created_at, c.updated_at AS cell_updated_at
FROM records r
LEFT JOIN cells c ON c.record_id = r.id
LEFT JOIN fields f ON f.id = c.field_id
"#;

const OLDEST_FIRST: &str = " ORDER BY r.created_at ASC, r.seq ASC";

/// Populated rows for `ids` within a project.
///
/// `ids` must not be empty.
pub(crate) fn populated_by_ids<'a, DB>(ids: &[String], project_id: &str) -> QueryBuilder<'a, DB>
where
    DB: Database,
    <DB as Database>::Arguments<'a>: Default,
    String: Encode<'a, DB> + Type<DB>,
{
    let mut builder = QueryBuilder::new(POPULATED_SELECT);
    builder.push(" WHERE r.project_id = ");
    builder.push_bind(project_id.to_string());
    builder.push(" AND r.id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.clone());
    }
    separated.push_unseparated(")");
    builder.push(OLDEST_FIRST);
    builder
}

/// Populated rows of a table's records matching every filter.
///
/// Filters and the limit apply to records in an inner query so that `limit`
/// counts records, not joined cell rows.
pub(crate) fn populated_by_filters<'a, DB>(
    table_id: &str,
    project_id: &str,
    filters: &[RecordFilter],
    limit: Option<i64>,
) -> QueryBuilder<'a, DB>
where
    DB: Database,
    <DB as Database>::Arguments<'a>: Default,
    String: Encode<'a, DB> + Type<DB>,
    i64: Encode<'a, DB> + Type<DB>,
{
    let mut builder = QueryBuilder::new(POPULATED_SELECT);
    builder.push(" WHERE r.id IN (SELECT r.id FROM records r WHERE r.table_id = ");
    builder.push_bind(table_id.to_string());
    builder.push(" AND r.project_id = ");
    builder.push_bind(project_id.to_string());
    push_filter_predicates(&mut builder, project_id, filters);
    if let Some(limit) = limit {
        builder.push(OLDEST_FIRST);
        builder.push(" LIMIT ");
        builder.push_bind(limit.max(0));
    }
    builder.push(")");
    builder.push(OLDEST_FIRST);
    builder
}

/// Multi-row insert of records, in slice order.
///
/// `records` must not be empty.
pub(crate) fn insert_records<'a, DB>(records: &[NewRecord]) -> QueryBuilder<'a, DB>
where
    DB: Database,
    <DB as Database>::Arguments<'a>: Default,
    String: Encode<'a, DB> + Type<DB>,
    DateTime<Utc>: Encode<'a, DB> + Type<DB>,
{
    let mut builder =
        QueryBuilder::new("INSERT INTO records (id, table_id, project_id, created_at, updated_at) ");
    builder.push_values(records, |mut row, record| {
        row.push_bind(record.id.clone())
            .push_bind(record.table_id.clone())
            .push_bind(record.project_id.clone())
            .push_bind(record.created_at)
            .push_bind(record.created_at);
    });
    builder
}

/// Multi-row insert of cells. With `upsert`, a conflict on
/// (project_id, field_id, record_id) overwrites value and updated_at.
///
/// `cells` must not be empty and must not repeat a conflict key.
pub(crate) fn insert_cells<'a, DB>(cells: &[NewCell], upsert: bool) -> QueryBuilder<'a, DB>
where
    DB: Database,
    <DB as Database>::Arguments<'a>: Default,
    String: Encode<'a, DB> + Type<DB>,
    DateTime<Utc>: Encode<'a, DB> + Type<DB>,
{
    let mut builder = QueryBuilder::new(
        "INSERT INTO cells (id, project_id, field_id, record_id, value, created_at, updated_at) ",
    );
    builder.push_values(cells, |mut row, cell| {
        row.push_bind(cell.id.clone())
            .push_bind(cell.project_id.clone())
            .push_bind(cell.field_id.clone())
            .push_bind(cell.record_id.clone())
            .push_bind(cell.value.clone())
            .push_bind(cell.written_at)
            .push_bind(cell.written_at);
    });
    if upsert {
        builder.push(
            " ON CONFLICT (project_id, field_id, record_id) DO UPDATE \
             SET value = excluded.value, updated_at = excluded.updated_at",
        );
    }
    builder
}

/// Delete records among `ids` within a project.
///
/// `ids` must not be empty.
pub(crate) fn delete_by_ids<'a, DB>(ids: &[String], project_id: &str) -> QueryBuilder<'a, DB>
where
    DB: Database,
    <DB as Database>::Arguments<'a>: Default,
    String: Encode<'a, DB> + Type<DB>,
{
    let mut builder = QueryBuilder::new("DELETE FROM records WHERE project_id = ");
    builder.push_bind(project_id.to_string());
    builder.push(" AND id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.clone());
    }
    separated.push_unseparated(")");
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOperator;
    use sqlx::{Postgres, Sqlite};

    #[test]
    fn test_populated_by_ids_binds_every_id() {
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let builder = populated_by_ids::<Postgres>(&ids, "prj");
        let sql = builder.sql();
        assert!(sql.contains("r.project_id = $1"));
        assert!(sql.contains("r.id IN ($2, $3, $4)"));
        assert!(sql.trim_end().ends_with("ORDER BY r.created_at ASC, r.seq ASC"));
    }

    #[test]
    fn test_populated_by_filters_limits_records_in_inner_query() {
        let filters = vec![RecordFilter::new("f-age", FilterOperator::Gte, "28")];
        let builder = populated_by_filters::<Sqlite>("tbl", "prj", &filters, Some(10));
        let sql = builder.sql();

        let inner_start = sql.find("IN (SELECT r.id").expect("inner query");
        let limit_at = sql.find("LIMIT").expect("limit");
        let exists_at = sql.find("EXISTS").expect("filter predicate");
        assert!(inner_start < exists_at && exists_at < limit_at);
        assert_eq!(sql.matches("ORDER BY").count(), 2);
    }

    #[test]
    fn test_populated_by_filters_without_limit() {
        let builder = populated_by_filters::<Sqlite>("tbl", "prj", &[], None);
        let sql = builder.sql();
        assert!(!sql.contains("LIMIT"));
        assert!(!sql.contains("EXISTS"));
    }

    #[test]
    fn test_upsert_targets_cell_conflict_key() {
        let cell = NewCell {
            id: "c1".to_string(),
            project_id: "prj".to_string(),
            field_id: "f".to_string(),
            record_id: "r".to_string(),
            value: "v".to_string(),
            written_at: Utc::now(),
        };

        let insert = insert_cells::<Sqlite>(std::slice::from_ref(&cell), false);
        assert!(!insert.sql().contains("ON CONFLICT"));

        let upsert = insert_cells::<Postgres>(std::slice::from_ref(&cell), true);
        let sql = upsert.sql();
        assert!(sql.contains("ON CONFLICT (project_id, field_id, record_id) DO UPDATE"));
        assert!(sql.contains("($1, $2, $3, $4, $5, $6, $7)"));
    }
}
