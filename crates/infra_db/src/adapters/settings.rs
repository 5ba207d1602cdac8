//! PostgreSQL Settings Source

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};

use core_kernel::{DomainPort, PortError};
use domain_billing::SettingsSource;

use crate::repositories::settings::SettingsRepository;

/// Reads the billing configuration from `billing_settings`
#[derive(Debug, Clone)]
pub struct PostgresSettingsSource {
    repository: SettingsRepository,
}

impl PostgresSettingsSource {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: SettingsRepository::new(pool),
        }
    }

    pub fn repository(&self) -> &SettingsRepository {
        &self.repository
    }
}

impl DomainPort for PostgresSettingsSource {}

#[async_trait]
impl SettingsSource for PostgresSettingsSource {
    #[instrument(skip(self))]
    async fn load_settings(&self) -> Result<HashMap<String, String>, PortError> {
        let rows = self.repository.load_all().await?;
        debug!(count = rows.len(), "Loaded billing settings");
        Ok(rows.into_iter().map(|row| (row.key, row.value)).collect())
    }
}
