//! Process wiring shared by `billing-api` and `billing-cycle`

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use domain_billing::adapters::{HttpMailChannel, ProcessorClient};
use domain_billing::DailyCycle;
use infra_db::{PostgresInvoiceStore, PostgresSettingsSource};

use crate::config::BillingAppConfig;
use crate::AppState;

/// Connects to the database, applies migrations and builds the cycle with its adapters
pub async fn connect(config: &BillingAppConfig) -> anyhow::Result<AppState> {
    let timezone = config.timezone()?;

    info!("Connecting to database...");
    let pool = infra_db::open(&config.database_config())
        .await
        .context("opening the billing database")?;
    info!("Database ready");

    let store = Arc::new(PostgresInvoiceStore::new(pool.clone()));
    let settings = Arc::new(PostgresSettingsSource::new(pool));
    let gateway = Arc::new(
        ProcessorClient::new(config.processor_config()).context("configuring the payment processor client")?,
    );
    let channel = Arc::new(HttpMailChannel::new(config.mail_config()).context("configuring the mail channel")?);

    let cycle = DailyCycle::new(store.clone(), gateway.clone(), channel, settings);

    Ok(AppState::new(cycle, timezone)
        .with_health_check(store)
        .with_health_check(gateway))
}
