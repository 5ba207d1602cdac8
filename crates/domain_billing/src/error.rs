//! Billing domain errors
//!
//! Two layers of failure exist in a billing run. `BillingError` is the
//! `Result` error of individual operations and of a whole run; `ItemFailure`
//! is a per-item record collected into a phase report, so one bad
//! subscription or invoice never aborts the batch.

use core_kernel::{CalendarError, MoneyError, PortError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::cycle::Phase;

/// Errors that can occur in the billing domain
#[derive(Debug, Error)]
pub enum BillingError {
    /// Malformed subscription or invoice input, rejected before any external call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Calendar arithmetic failed (invalid billing day, date overflow)
    #[error("Calendar error: {0}")]
    Calendar(#[from] CalendarError),

    /// Money arithmetic failed
    #[error("Calculation error: {0}")]
    Money(#[from] MoneyError),

    /// Payment gateway create/query/cancel failure
    #[error("Gateway error: {0}")]
    Gateway(#[source] PortError),

    /// Notification channel could not deliver a message
    #[error("Notification delivery failed: {0}")]
    Notification(#[source] PortError),

    /// Invoice store read or write failure
    #[error("Persistence error: {0}")]
    Persistence(#[source] PortError),

    /// Business configuration could not be loaded or parsed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invoice not found
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    /// Operation not allowed in the invoice's current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A phase could not run at all; the daily run is aborted
    #[error("Billing run failed during {phase}: {source}")]
    RunFailed {
        phase: Phase,
        #[source]
        source: Box<BillingError>,
    },
}

impl BillingError {
    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        BillingError::Configuration(message.into())
    }

    /// Wraps a catastrophic error as a top-level run failure
    pub fn run_failed(phase: Phase, source: BillingError) -> Self {
        BillingError::RunFailed {
            phase,
            source: Box::new(source),
        }
    }

    /// Classifies this error for a per-item failure record
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            BillingError::Validation(_)
            | BillingError::Calendar(_)
            | BillingError::Money(_)
            | BillingError::InvalidOperation(_) => FailureKind::Validation,
            BillingError::Gateway(_) => FailureKind::Gateway,
            BillingError::Notification(_) => FailureKind::Notification,
            BillingError::Persistence(_)
            | BillingError::InvoiceNotFound(_) => FailureKind::Persistence,
            BillingError::Configuration(_) | BillingError::RunFailed { .. } => FailureKind::Internal,
        }
    }
}

/// Category of a per-item failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Input rejected before any external call
    Validation,
    /// Remote payment gateway failure or timeout; retried on the next run
    Gateway,
    /// Message not delivered; no record written, re-evaluated on the next run
    Notification,
    /// Store write failed and was rolled back
    Persistence,
    /// Worker task aborted unexpectedly
    Internal,
}

/// Step of the daily cycle an item failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generation,
    Reminder,
    DueToday,
    Overdue,
    Reconciliation,
    PaymentConfirmation,
    Cancellation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Generation => "generation",
            Stage::Reminder => "reminder",
            Stage::DueToday => "due_today",
            Stage::Overdue => "overdue",
            Stage::Reconciliation => "reconciliation",
            Stage::PaymentConfirmation => "payment_confirmation",
            Stage::Cancellation => "cancellation",
        };
        f.write_str(name)
    }
}

/// A single item that could not be processed, with enough context to replay it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Subscription or invoice identifier
    pub item: String,
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
}

impl ItemFailure {
    pub fn new(item: impl fmt::Display, stage: Stage, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            item: item.to_string(),
            stage,
            kind,
            message: message.into(),
        }
    }

    /// Builds a failure record from a domain error
    pub fn from_error(item: impl fmt::Display, stage: Stage, error: &BillingError) -> Self {
        Self::new(item, stage, error.failure_kind(), error.to_string())
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{:?}] {}: {}", self.stage, self.kind, self.item, self.message)
    }
}
