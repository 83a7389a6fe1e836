// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Record webhook fan-out.
//!
//! Flows subscribe to record events of a table. When an event fires, the
//! dispatcher builds one synthetic `POST` request per subscription and hands
//! them to a [`WebhookDelivery`] concurrently. Every delivery is awaited; what
//! happens to a failed delivery is decided by the [`JoinPolicy`] given at
//! construction.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{EntityType, TableError};
use crate::persistence::{FlagLookup, PUBLIC_URL_FLAG, TableWebhookLookup};
use crate::types::TableWebhookEventType;

/// What a dispatch does when some deliveries fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinPolicy {
    /// Wait for every delivery, then return the first failure (if any).
    WaitForAll,
    /// Wait for every delivery, log failures, and report success.
    #[default]
    BestEffort,
}

/// The HTTP request a flow webhook would have received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticRequest {
    /// Always `POST`.
    pub method: String,
    /// Webhook URL of the flow.
    pub url: String,
    /// Request headers (lower-case names).
    pub headers: BTreeMap<String, String>,
    /// Request body.
    pub body: serde_json::Value,
    /// Query parameters.
    pub query_params: BTreeMap<String, String>,
}

/// One delivery handed to a [`WebhookDelivery`].
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    /// Flow to trigger.
    pub flow_id: String,
    /// Whether the caller should not wait for the flow's response.
    pub is_async: bool,
    /// The request the flow receives.
    pub payload: SyntheticRequest,
}

/// Triggers a flow through its webhook.
#[async_trait]
pub trait WebhookDelivery: Send + Sync {
    /// Deliver one request.
    async fn handle_webhook(&self, request: WebhookRequest) -> Result<(), TableError>;
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Deliveries that succeeded.
    pub delivered: usize,
    /// Deliveries that failed.
    pub failed: usize,
}

/// Webhook URL of a flow under the platform's public base URL.
pub fn flow_webhook_url(public_url: &str, flow_id: &str) -> String {
    format!("{}/v1/webhooks/{}", public_url.trim_end_matches('/'), flow_id)
}

/// Fans record events out to subscribed flows.
pub struct WebhookDispatcher {
    webhooks: Arc<dyn TableWebhookLookup>,
    flags: Arc<dyn FlagLookup>,
    delivery: Arc<dyn WebhookDelivery>,
    policy: JoinPolicy,
}

impl WebhookDispatcher {
    /// Create a dispatcher with an explicit join policy.
    pub fn new(
        webhooks: Arc<dyn TableWebhookLookup>,
        flags: Arc<dyn FlagLookup>,
        delivery: Arc<dyn WebhookDelivery>,
        policy: JoinPolicy,
    ) -> Self {
        Self {
            webhooks,
            flags,
            delivery,
            policy,
        }
    }

    /// Notify every flow subscribed to `event_type` on the table.
    ///
    /// With no subscriptions this returns immediately without reading the
    /// public URL flag. Otherwise a missing `PUBLIC_URL` flag fails the whole
    /// dispatch before any delivery starts.
    #[instrument(skip(self, payload, authorization), fields(event = %event_type))]
    pub async fn trigger(
        &self,
        project_id: &str,
        table_id: &str,
        event_type: TableWebhookEventType,
        payload: serde_json::Value,
        authorization: &str,
    ) -> Result<DispatchSummary, TableError> {
        let webhooks = self
            .webhooks
            .get_webhooks(project_id, table_id, event_type)
            .await?;

        if webhooks.is_empty() {
            debug!("No webhook subscriptions");
            return Ok(DispatchSummary::default());
        }

        let public_url = self.flags.get_flag(PUBLIC_URL_FLAG).await?.ok_or_else(|| {
            TableError::EntityNotFound {
                entity_type: EntityType::Flag,
                entity_id: PUBLIC_URL_FLAG.to_string(),
            }
        })?;

        let mut headers = BTreeMap::new();
        headers.insert("authorization".to_string(), authorization.to_string());

        let deliveries = webhooks.iter().map(|webhook| {
            let request = WebhookRequest {
                flow_id: webhook.flow_id.clone(),
                is_async: true,
                payload: SyntheticRequest {
                    method: "POST".to_string(),
                    url: flow_webhook_url(&public_url, &webhook.flow_id),
                    headers: headers.clone(),
                    body: payload.clone(),
                    query_params: BTreeMap::new(),
                },
            };
            let flow_id = webhook.flow_id.clone();
            async move { (flow_id, self.delivery.handle_webhook(request).await) }
        });

        let results = join_all(deliveries).await;

        let mut summary = DispatchSummary::default();
        let mut first_error = None;
        for (flow_id, result) in results {
            match result {
                Ok(()) => summary.delivered += 1,
                Err(e) => {
                    warn!(flow_id = %flow_id, error = %e, "Webhook delivery failed");
                    summary.failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        info!(
            delivered = summary.delivered,
            failed = summary.failed,
            "Webhooks dispatched"
        );

        match (self.policy, first_error) {
            (JoinPolicy::WaitForAll, Some(e)) => Err(e),
            _ => Ok(summary),
        }
    }
}

/// Delivers webhooks by POSTing the synthetic request over HTTP.
#[derive(Clone)]
pub struct HttpWebhookDelivery {
    client: reqwest::Client,
}

impl HttpWebhookDelivery {
    /// Create a delivery with a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, TableError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TableError::Validation {
                field: "webhook_timeout".to_string(),
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookDelivery for HttpWebhookDelivery {
    #[instrument(skip(self, request), fields(flow_id = %request.flow_id))]
    async fn handle_webhook(&self, request: WebhookRequest) -> Result<(), TableError> {
        let url = if request.is_async {
            request.payload.url.clone()
        } else {
            format!("{}/sync", request.payload.url)
        };

        let mut builder = self
            .client
            .post(&url)
            .query(&request.payload.query_params)
            .json(&request.payload.body);
        for (name, value) in &request.payload.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TableError::WebhookDelivery {
                flow_id: request.flow_id.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TableError::WebhookDelivery {
                flow_id: request.flow_id,
                reason: format!("HTTP {}", status),
            });
        }

        debug!(status = %status, "Webhook delivered");
        Ok(())
    }
}
