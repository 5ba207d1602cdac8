//! Process configuration
//!
//! Loaded from `BILLING_*` environment variables (after `.env` is read by
//! the binaries). Nested sections use a double underscore, for example
//! `BILLING_PROCESSOR__CLIENT_ID` or `BILLING_MAIL__API_KEY`.
//!
//! Business rules (reminder offsets, fees, throttling) are not here: they
//! live in the settings table and are read at the start of every run.

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use serde::Deserialize;

use domain_billing::adapters::{MailConfig, ProcessorConfig};
use infra_db::DatabaseConfig;

/// Top-level process configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BillingAppConfig {
    /// Bind host of the HTTP server
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_acquire_timeout_secs: u64,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,
    /// IANA name of the timezone whose calendar day a run bills for
    pub timezone: String,
    pub processor: ProcessorSettings,
    pub mail: MailSettings,
}

impl Default for BillingAppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: "postgres://localhost/billing".to_string(),
            database_max_connections: 10,
            database_acquire_timeout_secs: 30,
            log_level: "info".to_string(),
            log_json: false,
            timezone: "America/Sao_Paulo".to_string(),
            processor: ProcessorSettings::default(),
            mail: MailSettings::default(),
        }
    }
}

/// Payment processor section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
    pub base_url: String,
    pub token_url: Option<String>,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub certificate_path: Option<PathBuf>,
    pub private_key_path: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        let defaults = ProcessorConfig::default();
        Self {
            base_url: defaults.base_url,
            token_url: defaults.token_url,
            client_id: defaults.client_id,
            client_secret: defaults.client_secret,
            certificate_path: defaults.certificate_path,
            private_key_path: defaults.private_key_path,
            timeout_secs: defaults.timeout_secs,
        }
    }
}

/// Transactional mail section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    pub endpoint: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for MailSettings {
    fn default() -> Self {
        let defaults = MailConfig::default();
        Self {
            endpoint: defaults.endpoint,
            api_key: defaults.api_key,
            timeout_secs: defaults.timeout_secs,
        }
    }
}

/// Errors raised while assembling the process configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),

    #[error("Unknown timezone '{0}'")]
    Timezone(String),
}

impl BillingAppConfig {
    /// Loads configuration from environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("BILLING")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Self>()?;
        config.timezone()?;
        Ok(config)
    }

    /// Returns the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Timezone(self.timezone.clone()))
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig::new(&self.database_url)
            .max_connections(self.database_max_connections)
            .acquire_timeout(Duration::from_secs(self.database_acquire_timeout_secs))
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        let settings = &self.processor;
        ProcessorConfig {
            base_url: settings.base_url.clone(),
            token_url: settings.token_url.clone(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            certificate_path: settings.certificate_path.clone(),
            private_key_path: settings.private_key_path.clone(),
            timeout_secs: settings.timeout_secs,
            ..ProcessorConfig::default()
        }
    }

    pub fn mail_config(&self) -> MailConfig {
        MailConfig {
            endpoint: self.mail.endpoint.clone(),
            api_key: self.mail.api_key.clone(),
            timeout_secs: self.mail.timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BillingAppConfig::default();

        assert_eq!(config.server_addr(), "0.0.0.0:8080");
        assert_eq!(config.database_config().acquire_timeout, Duration::from_secs(30));
        assert_eq!(config.timezone().unwrap(), chrono_tz::America::Sao_Paulo);
        assert_eq!(config.processor_config().timeout_secs, 30);
        assert!(config.processor_config().circuit_breaker.is_some());
        assert_eq!(config.mail_config().timeout_secs, 15);
    }

    #[test]
    fn test_unknown_timezone_is_rejected() {
        let config = BillingAppConfig {
            timezone: "Mars/Olympus".to_string(),
            ..BillingAppConfig::default()
        };
        assert!(matches!(config.timezone(), Err(ConfigError::Timezone(_))));
    }
}
