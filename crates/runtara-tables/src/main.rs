// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtara Tables - database bootstrap
//!
//! Connects to the configured database, applies migrations, seeds the
//! `PUBLIC_URL` flag used to address flow webhooks, and verifies the record
//! service can reach storage.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use runtara_tables::config::Config;
use runtara_tables::persistence::{
    PUBLIC_URL_FLAG, PostgresPersistence, SqlitePersistence, TablePersistence,
};
use runtara_tables::record_service::RecordService;
use runtara_tables::webhooks::HttpWebhookDelivery;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("runtara_tables=info".parse()?),
        )
        .init();

    info!("Starting Runtara Tables");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        max_connections = config.max_connections,
        webhook_timeout_secs = config.webhook_timeout.as_secs(),
        join_policy = ?config.webhook_join_policy,
        "Configuration loaded"
    );

    // Connect and migrate
    info!("Connecting to database...");
    if config.is_sqlite() {
        let persistence =
            SqlitePersistence::connect(&config.database_url, config.max_connections).await?;
        bootstrap(Arc::new(persistence), &config).await
    } else {
        let persistence =
            PostgresPersistence::connect(&config.database_url, config.max_connections).await?;
        bootstrap(Arc::new(persistence), &config).await
    }
}

async fn bootstrap<P>(persistence: Arc<P>, config: &Config) -> Result<()>
where
    P: TablePersistence + 'static,
{
    info!("Database connection established, migrations applied");

    match &config.public_url {
        Some(url) => {
            persistence.set_flag(PUBLIC_URL_FLAG, url).await?;
            info!(public_url = %url, "Public URL flag set");
        }
        None => {
            if persistence.get_flag(PUBLIC_URL_FLAG).await?.is_none() {
                warn!("RUNTARA_PUBLIC_URL is not set; record webhooks cannot be delivered");
            }
        }
    }

    if !persistence.health_check_db().await? {
        anyhow::bail!("Database health check failed");
    }
    info!("Database health check passed");

    let delivery = Arc::new(HttpWebhookDelivery::new(config.webhook_timeout)?);
    let _service =
        RecordService::from_persistence(persistence, delivery, config.webhook_join_policy);

    info!("Runtara Tables initialized successfully");
    Ok(())
}
