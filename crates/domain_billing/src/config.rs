//! Business configuration for a billing run
//!
//! Built once at the start of a run from the key-value settings store and
//! passed explicitly into every phase.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use core_kernel::{Currency, Rate};

use crate::error::BillingError;
use crate::invoice::PaymentTerms;
use crate::notification::SenderIdentity;

/// Settings keys understood by [`BillingConfig::from_settings`]
pub mod keys {
    pub const REMINDER_DAYS: &str = "reminder_days";
    pub const OVERDUE_DAYS: &str = "overdue_days";
    pub const MAX_COLLECTION_ATTEMPTS: &str = "max_collection_attempts";
    pub const SENDER_NAME: &str = "sender_name";
    pub const SENDER_EMAIL: &str = "sender_email";
    pub const LATE_FEE_PERCENT: &str = "late_fee_percent";
    pub const DAILY_INTEREST_PERCENT: &str = "daily_interest_percent";
    pub const RECONCILE_BATCH_LIMIT: &str = "reconcile_batch_limit";
    pub const RECONCILE_SPACING_MS: &str = "reconcile_spacing_ms";
    pub const GATEWAY_TIMEOUT_SECS: &str = "gateway_timeout_secs";
    pub const WORKER_CONCURRENCY: &str = "worker_concurrency";
    pub const CURRENCY: &str = "currency";
}

/// Configuration for one billing run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Days before the due date a reminder is sent, largest first
    pub reminder_days: Vec<i64>,
    /// Days past the due date a collection notice is sent, smallest first
    pub overdue_days: Vec<i64>,
    pub max_collection_attempts: u32,
    pub sender: SenderIdentity,
    pub late_fee: Rate,
    pub daily_interest: Rate,
    pub reconcile_batch_limit: u32,
    /// Minimum spacing between two processor queries
    pub reconcile_spacing: Duration,
    pub gateway_timeout: Duration,
    pub worker_concurrency: usize,
    pub currency: Currency,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            reminder_days: vec![7, 3, 1],
            overdue_days: vec![5, 10, 15, 30],
            max_collection_attempts: 3,
            sender: SenderIdentity::default(),
            late_fee: Rate::from_percentage(dec!(2.00)),
            daily_interest: Rate::from_percentage(dec!(0.0333)),
            reconcile_batch_limit: 100,
            reconcile_spacing: Duration::from_millis(200),
            gateway_timeout: Duration::from_secs(30),
            worker_concurrency: 4,
            currency: Currency::BRL,
        }
    }
}

impl BillingConfig {
    /// Builds the configuration from settings, falling back to defaults
    ///
    /// Unknown keys are ignored. A present but malformed value is an error.
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self, BillingError> {
        let defaults = Self::default();
        let get = |key: &str| settings.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let mut reminder_days = match get(keys::REMINDER_DAYS) {
            Some(raw) => parse_offsets(keys::REMINDER_DAYS, raw)?,
            None => defaults.reminder_days,
        };
        reminder_days.sort_unstable_by(|a, b| b.cmp(a));

        let mut overdue_days = match get(keys::OVERDUE_DAYS) {
            Some(raw) => parse_offsets(keys::OVERDUE_DAYS, raw)?,
            None => defaults.overdue_days,
        };
        overdue_days.sort_unstable();

        let sender = SenderIdentity {
            name: get(keys::SENDER_NAME).map(str::to_string).unwrap_or(defaults.sender.name),
            email: get(keys::SENDER_EMAIL).map(str::to_string).unwrap_or(defaults.sender.email),
        };

        let worker_concurrency = parse_or(get(keys::WORKER_CONCURRENCY), keys::WORKER_CONCURRENCY, defaults.worker_concurrency)?;
        if worker_concurrency == 0 {
            return Err(BillingError::configuration("worker_concurrency must be at least 1"));
        }

        Ok(Self {
            reminder_days,
            overdue_days,
            max_collection_attempts: parse_or(
                get(keys::MAX_COLLECTION_ATTEMPTS),
                keys::MAX_COLLECTION_ATTEMPTS,
                defaults.max_collection_attempts,
            )?,
            sender,
            late_fee: parse_percent(get(keys::LATE_FEE_PERCENT), keys::LATE_FEE_PERCENT, defaults.late_fee)?,
            daily_interest: parse_percent(
                get(keys::DAILY_INTEREST_PERCENT),
                keys::DAILY_INTEREST_PERCENT,
                defaults.daily_interest,
            )?,
            reconcile_batch_limit: parse_or(
                get(keys::RECONCILE_BATCH_LIMIT),
                keys::RECONCILE_BATCH_LIMIT,
                defaults.reconcile_batch_limit,
            )?,
            reconcile_spacing: get(keys::RECONCILE_SPACING_MS)
                .map(|raw| parse_value::<u64>(keys::RECONCILE_SPACING_MS, raw).map(Duration::from_millis))
                .transpose()?
                .unwrap_or(defaults.reconcile_spacing),
            gateway_timeout: get(keys::GATEWAY_TIMEOUT_SECS)
                .map(|raw| parse_value::<u64>(keys::GATEWAY_TIMEOUT_SECS, raw).map(Duration::from_secs))
                .transpose()?
                .unwrap_or(defaults.gateway_timeout),
            worker_concurrency,
            currency: match get(keys::CURRENCY) {
                Some(raw) => Currency::from_str(raw)
                    .map_err(|e| BillingError::configuration(format!("{}: {}", keys::CURRENCY, e)))?,
                None => defaults.currency,
            },
        })
    }

    /// Terms applied to newly issued invoices
    pub fn default_terms(&self) -> PaymentTerms {
        PaymentTerms {
            late_fee: self.late_fee,
            daily_interest: self.daily_interest,
            discount: None,
        }
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, BillingError> {
    raw.parse::<T>()
        .map_err(|_| BillingError::configuration(format!("{}: invalid value '{}'", key, raw)))
}

fn parse_or<T: FromStr>(raw: Option<&str>, key: &str, default: T) -> Result<T, BillingError> {
    raw.map(|raw| parse_value(key, raw)).transpose().map(|v| v.unwrap_or(default))
}

fn parse_percent(raw: Option<&str>, key: &str, default: Rate) -> Result<Rate, BillingError> {
    match raw {
        None => Ok(default),
        Some(raw) => {
            let percent: Decimal = parse_value(key, raw)?;
            if percent.is_sign_negative() {
                return Err(BillingError::configuration(format!("{}: must not be negative", key)));
            }
            Ok(Rate::from_percentage(percent))
        }
    }
}

/// Largest reminder or overdue offset, ten years of days
const MAX_OFFSET_DAYS: i64 = 3650;

/// Parses a comma-separated list of day offsets in 1..=3650, dropping duplicates
fn parse_offsets(key: &str, raw: &str) -> Result<Vec<i64>, BillingError> {
    let mut offsets = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let days: i64 = parse_value(key, part)?;
        if !(1..=MAX_OFFSET_DAYS).contains(&days) {
            return Err(BillingError::configuration(format!(
                "{}: offsets must be between 1 and {}, got {}",
                key, MAX_OFFSET_DAYS, days
            )));
        }
        if !offsets.contains(&days) {
            offsets.push(days);
        }
    }
    Ok(offsets)
}
