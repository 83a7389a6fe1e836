// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for runtara-tables.
//!
//! Provides a unified error type with stable error codes for API responses.

use std::fmt;

use thiserror::Error;

/// Result type using TableError
pub type Result<T> = std::result::Result<T, TableError>;

/// Kind of entity referenced by [`TableError::EntityNotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    /// A table record.
    Record,
    /// A table field (column).
    Field,
    /// A table webhook subscription.
    TableWebhook,
    /// A platform flag (e.g. the public URL).
    Flag,
}

impl EntityType {
    /// Lowercase name used in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Field => "field",
            Self::TableWebhook => "table_webhook",
            Self::Flag => "flag",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during table and record operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TableError {
    /// The requested entity does not exist (or not within the caller's project).
    #[error("Entity '{entity_type}' with id '{entity_id}' not found")]
    EntityNotFound {
        /// Kind of entity that was looked up.
        entity_type: EntityType,
        /// The identifier that was looked up.
        entity_id: String,
    },

    /// A filter could not be translated into a predicate.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Input validation failed.
    #[error("Validation error for '{field}': {message}")]
    Validation {
        /// The input that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Running migrations failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Delivering a webhook to a flow failed.
    #[error("Webhook delivery to flow '{flow_id}' failed: {reason}")]
    WebhookDelivery {
        /// The flow the webhook was addressed to.
        flow_id: String,
        /// The reason for failure.
        reason: String,
    },
}

impl TableError {
    /// Shorthand for a missing record.
    pub fn record_not_found(id: impl Into<String>) -> Self {
        Self::EntityNotFound {
            entity_type: EntityType::Record,
            entity_id: id.into(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EntityNotFound { .. } => "ENTITY_NOT_FOUND",
            Self::InvalidFilter(_) => "INVALID_FILTER",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::WebhookDelivery { .. } => "WEBHOOK_DELIVERY_FAILED",
        }
    }

    /// Whether this is an [`TableError::EntityNotFound`] for the given entity type.
    pub fn is_not_found(&self, expected: EntityType) -> bool {
        matches!(self, Self::EntityNotFound { entity_type, .. } if *entity_type == expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let test_cases = vec![
            (TableError::record_not_found("rec-1"), "ENTITY_NOT_FOUND"),
            (
                TableError::InvalidFilter("unknown operator 'LIKE'".to_string()),
                "INVALID_FILTER",
            ),
            (
                TableError::Validation {
                    field: "name".to_string(),
                    message: "must not be empty".to_string(),
                },
                "VALIDATION_ERROR",
            ),
            (
                TableError::Database(sqlx::Error::RowNotFound),
                "DATABASE_ERROR",
            ),
            (
                TableError::WebhookDelivery {
                    flow_id: "flow-1".to_string(),
                    reason: "connection refused".to_string(),
                },
                "WEBHOOK_DELIVERY_FAILED",
            ),
        ];

        for (error, expected_code) in test_cases {
            assert_eq!(
                error.error_code(),
                expected_code,
                "Error {:?} should have code {}",
                error,
                expected_code
            );
            assert!(!error.to_string().is_empty(), "Message should not be empty");
        }
    }

    #[test]
    fn test_error_display() {
        let err = TableError::record_not_found("abc-123");
        assert_eq!(
            err.to_string(),
            "Entity 'record' with id 'abc-123' not found"
        );

        let err = TableError::EntityNotFound {
            entity_type: EntityType::Flag,
            entity_id: "PUBLIC_URL".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Entity 'flag' with id 'PUBLIC_URL' not found"
        );

        let err = TableError::WebhookDelivery {
            flow_id: "flow-9".to_string(),
            reason: "HTTP 500".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Webhook delivery to flow 'flow-9' failed: HTTP 500"
        );
    }

    #[test]
    fn test_is_not_found() {
        let err = TableError::record_not_found("x");
        assert!(err.is_not_found(EntityType::Record));
        assert!(!err.is_not_found(EntityType::Flag));
        assert!(!TableError::InvalidFilter("x".to_string()).is_not_found(EntityType::Record));
    }
}
