// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for runtara-tables integration tests.
//!
//! Provides TestContext wiring a RecordService to a private in-memory SQLite
//! database and a recording webhook delivery.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use runtara_tables::TableError;
use runtara_tables::persistence::{PostgresPersistence, SqlitePersistence, TablePersistence};
use runtara_tables::record_service::RecordService;
use runtara_tables::types::{CellInput, FieldRecord};
use runtara_tables::webhooks::{JoinPolicy, WebhookDelivery, WebhookRequest};

pub const TABLE: &str = "tbl-people";
pub const PROJECT: &str = "prj-1";

/// Webhook delivery that records every request and fails for chosen flows.
#[derive(Default)]
pub struct RecordingDelivery {
    pub requests: Mutex<Vec<WebhookRequest>>,
    pub failing_flows: Vec<String>,
}

impl RecordingDelivery {
    pub fn failing(flows: &[&str]) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            failing_flows: flows.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn requests(&self) -> Vec<WebhookRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookDelivery for RecordingDelivery {
    async fn handle_webhook(&self, request: WebhookRequest) -> Result<(), TableError> {
        let flow_id = request.flow_id.clone();
        self.requests.lock().unwrap().push(request);
        if self.failing_flows.contains(&flow_id) {
            return Err(TableError::WebhookDelivery {
                flow_id,
                reason: "HTTP 500 Internal Server Error".to_string(),
            });
        }
        Ok(())
    }
}

/// Test context: persistence, service and delivery sharing one database.
pub struct TestContext<P> {
    pub persistence: Arc<P>,
    pub service: RecordService,
    pub delivery: Arc<RecordingDelivery>,
}

impl TestContext<SqlitePersistence> {
    /// Fresh in-memory database with a best-effort dispatcher.
    pub async fn sqlite() -> Self {
        Self::sqlite_with(RecordingDelivery::default(), JoinPolicy::BestEffort).await
    }

    pub async fn sqlite_with(delivery: RecordingDelivery, policy: JoinPolicy) -> Self {
        let persistence = Arc::new(
            SqlitePersistence::in_memory()
                .await
                .expect("Failed to create in-memory database"),
        );
        Self::build(persistence, delivery, policy)
    }
}

impl TestContext<PostgresPersistence> {
    /// Connect to TEST_DATABASE_URL, or None when it is unset or unreachable.
    pub async fn postgres() -> Option<Self> {
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
        let persistence = PostgresPersistence::connect(&database_url, 5).await.ok()?;
        Some(Self::build(
            Arc::new(persistence),
            RecordingDelivery::default(),
            JoinPolicy::BestEffort,
        ))
    }
}

impl<P: TablePersistence + 'static> TestContext<P> {
    fn build(persistence: Arc<P>, delivery: RecordingDelivery, policy: JoinPolicy) -> Self {
        let delivery = Arc::new(delivery);
        let service = RecordService::from_persistence(persistence.clone(), delivery.clone(), policy);
        Self {
            persistence,
            service,
            delivery,
        }
    }

    /// Define fields on a table and return them in the given order.
    pub async fn fields(&self, table_id: &str, project_id: &str, names: &[&str]) -> Vec<FieldRecord> {
        let mut fields = Vec::with_capacity(names.len());
        for name in names {
            fields.push(
                self.persistence
                    .create_field(table_id, project_id, name)
                    .await
                    .expect("Failed to create field"),
            );
        }
        fields
    }
}

/// Build one record's cells from `(key, value)` pairs.
pub fn cells(pairs: &[(&str, &str)]) -> Vec<CellInput> {
    pairs.iter().map(|(k, v)| CellInput::new(*k, *v)).collect()
}

/// A project id no other test uses, for tests sharing a real database.
pub fn unique_project() -> String {
    format!("prj-{}", uuid::Uuid::new_v4())
}

/// Skip the test if TEST_DATABASE_URL is not set.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}
