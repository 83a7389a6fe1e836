// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Filter translation for record queries.
//!
//! Each [`RecordFilter`] becomes one `EXISTS` sub-query against the cells table:
//!
//! ```text
//! AND EXISTS (
//!     SELECT 1 FROM cells fc
//!     WHERE fc.record_id = r.id
//!       AND fc.field_id = ?
//!       AND fc.project_id = ?
//!       AND fc.value <op> ?
//! )
//! ```
//!
//! Filters are conjunctive. Field ids, the project id and values are always
//! bound parameters; only the operator token comes from a closed enum. The
//! outer query must alias the records table as `r`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::{Database, Encode, QueryBuilder, Type};

use crate::error::TableError;

/// Comparison operator applied to a cell value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterOperator {
    /// Equal.
    #[default]
    Eq,
    /// Not equal.
    Neq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
}

impl FilterOperator {
    /// SQL comparison token for this operator.
    pub fn sql_operator(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "EQ",
            Self::Neq => "NEQ",
            Self::Gt => "GT",
            Self::Gte => "GTE",
            Self::Lt => "LT",
            Self::Lte => "LTE",
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOperator {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EQ" => Ok(Self::Eq),
            "NEQ" => Ok(Self::Neq),
            "GT" => Ok(Self::Gt),
            "GTE" => Ok(Self::Gte),
            "LT" => Ok(Self::Lt),
            "LTE" => Ok(Self::Lte),
            other => Err(TableError::InvalidFilter(format!(
                "unsupported operator '{}'",
                other
            ))),
        }
    }
}

/// A declarative per-field condition on records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Field whose cell is compared.
    pub field_id: String,
    /// Comparison operator; equality when absent.
    #[serde(default)]
    pub operator: Option<FilterOperator>,
    /// Value the cell is compared against.
    pub value: String,
}

impl RecordFilter {
    /// Build a filter with an explicit operator.
    pub fn new(
        field_id: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<String>,
    ) -> Self {
        Self {
            field_id: field_id.into(),
            operator: Some(operator),
            value: value.into(),
        }
    }

    /// Build an equality filter.
    pub fn eq(field_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            operator: None,
            value: value.into(),
        }
    }

    /// Operator actually applied.
    pub fn effective_operator(&self) -> FilterOperator {
        self.operator.unwrap_or_default()
    }
}

/// Append one `EXISTS` predicate per filter to `builder`.
///
/// The caller is responsible for having opened a `WHERE` clause; every
/// predicate is prefixed with `AND`.
pub fn push_filter_predicates<'args, DB>(
    builder: &mut QueryBuilder<'args, DB>,
    project_id: &str,
    filters: &[RecordFilter],
) where
    DB: Database,
    String: Encode<'args, DB> + Type<DB>,
{
    for filter in filters {
        builder.push(
            " AND EXISTS (SELECT 1 FROM cells fc WHERE fc.record_id = r.id AND fc.field_id = ",
        );
        builder.push_bind(filter.field_id.clone());
        builder.push(" AND fc.project_id = ");
        builder.push_bind(project_id.to_string());
        builder.push(" AND fc.value ");
        builder.push(filter.effective_operator().sql_operator());
        builder.push(" ");
        builder.push_bind(filter.value.clone());
        builder.push(")");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::{Postgres, Sqlite};

    #[test]
    fn test_operator_parsing_is_case_insensitive() {
        assert_eq!("gte".parse::<FilterOperator>().unwrap(), FilterOperator::Gte);
        assert_eq!(" NEQ ".parse::<FilterOperator>().unwrap(), FilterOperator::Neq);
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let err = "LIKE".parse::<FilterOperator>().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_FILTER");
        assert!(err.to_string().contains("LIKE"));
    }

    #[test]
    fn test_missing_operator_defaults_to_equality() {
        let filter: RecordFilter =
            serde_json::from_str(r#"{"field_id":"f-age","value":"30"}"#).unwrap();
        assert_eq!(filter.effective_operator(), FilterOperator::Eq);

        let filter: RecordFilter =
            serde_json::from_str(r#"{"field_id":"f-age","operator":"LT","value":"30"}"#).unwrap();
        assert_eq!(filter.effective_operator(), FilterOperator::Lt);
    }

    #[test]
    fn test_unknown_operator_fails_deserialization() {
        let result: Result<RecordFilter, _> =
            serde_json::from_str(r#"{"field_id":"f","operator":"CONTAINS","value":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_every_operator_maps_to_a_comparison() {
        let ops = [
            (FilterOperator::Eq, "="),
            (FilterOperator::Neq, "<>"),
            (FilterOperator::Gt, ">"),
            (FilterOperator::Gte, ">="),
            (FilterOperator::Lt, "<"),
            (FilterOperator::Lte, "<="),
        ];
        for (op, sql) in ops {
            assert_eq!(op.sql_operator(), sql);
            assert_eq!(op.as_str().parse::<FilterOperator>().unwrap(), op);
        }
    }

    #[test]
    fn test_predicates_bind_values_sqlite() {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT r.id FROM records r WHERE r.table_id = ");
        builder.push_bind("tbl".to_string());

        push_filter_predicates(
            &mut builder,
            "prj",
            &[
                RecordFilter::new("f-age", FilterOperator::Gte, "28"),
                RecordFilter::eq("f-name", "x'; DROP TABLE records; --"),
            ],
        );

        let sql = builder.sql();
        assert_eq!(sql.matches("EXISTS").count(), 2);
        assert!(sql.contains("fc.value >= ?"));
        assert!(sql.contains("fc.value = ?"));
        assert!(!sql.contains("DROP TABLE"));
    }

    #[test]
    fn test_predicates_number_placeholders_postgres() {
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT r.id FROM records r WHERE r.table_id = ");
        builder.push_bind("tbl".to_string());

        push_filter_predicates(
            &mut builder,
            "prj",
            &[RecordFilter::new("f-age", FilterOperator::Lt, "40")],
        );

        let sql = builder.sql();
        assert!(sql.contains("fc.field_id = $2"));
        assert!(sql.contains("fc.project_id = $3"));
        assert!(sql.contains("fc.value < $4"));
    }

    #[test]
    fn test_no_filters_leaves_query_untouched() {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT r.id FROM records r WHERE 1 = 1");
        push_filter_predicates(&mut builder, "prj", &[]);
        assert_eq!(builder.sql(), "SELECT r.id FROM records r WHERE 1 = 1");
    }
}
