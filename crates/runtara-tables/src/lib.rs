// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtara Tables - Record Store for User-Defined Tables
//!
//! Tables are made of fields (columns). A record is one row, and each of its
//! values is stored as a cell keyed by (project, field, record). Flows can
//! subscribe to record events and are triggered through their webhooks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        RecordService                          │
//! │   create / list / get_by_id / update / delete / count         │
//! └──────────────────────────────────────────────────────────────┘
//!          │                                        │
//!          │ RecordPersistence                      │ trigger_webhooks
//!          │ FieldRegistry                          ▼
//!          ▼                              ┌────────────────────────┐
//! ┌───────────────────────┐               │   WebhookDispatcher    │
//! │  SQLite / PostgreSQL  │◄──────────────│  (join_all fan-out)    │
//! │ fields records cells  │  lookups      └────────────────────────┘
//! │ table_webhooks flags  │                          │
//! └───────────────────────┘                          ▼
//!                                         ┌────────────────────────┐
//!                                         │    WebhookDelivery     │
//!                                         │  (HTTP POST to flows)  │
//!                                         └────────────────────────┘
//! ```
//!
//! # Filters
//!
//! | Operator | SQL |
//! |----------|-----|
//! | `EQ` (default) | `=` |
//! | `NEQ` | `<>` |
//! | `GT` / `GTE` | `>` / `>=` |
//! | `LT` / `LTE` | `<` / `<=` |
//!
//! Cell values are text, so comparisons are text comparisons.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use runtara_tables::persistence::{SqlitePersistence, TablePersistence};
//! use runtara_tables::record_service::RecordService;
//! use runtara_tables::types::CellInput;
//! use runtara_tables::webhooks::{HttpWebhookDelivery, JoinPolicy};
//!
//! let persistence = Arc::new(SqlitePersistence::in_memory().await?);
//! persistence.create_field("tbl", "prj", "name").await?;
//!
//! let delivery = Arc::new(HttpWebhookDelivery::new(std::time::Duration::from_secs(30))?);
//! let service = RecordService::from_persistence(persistence, delivery, JoinPolicy::BestEffort);
//! let created = service
//!     .create("tbl", "prj", vec![vec![CellInput::new("name", "Alice")]])
//!     .await?;
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod fields;
pub mod filter;
pub mod migrations;
pub mod persistence;
pub mod record_service;
pub mod types;
pub mod webhooks;

pub use error::{EntityType, Result, TableError};
pub use record_service::RecordService;
