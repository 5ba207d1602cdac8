//! Notification records
//!
//! A record is written right after a message was delivered. Its key
//! (invoice, kind, day) is the de-duplication mechanism: at most one message
//! of each kind reaches a customer per invoice per calendar day.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{InvoiceId, NotificationId};

use crate::error::{BillingError, Stage};

/// Kind of customer notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Reminder,
    DueToday,
    Overdue,
    PaymentConfirmed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Reminder => "reminder",
            NotificationKind::DueToday => "due_today",
            NotificationKind::Overdue => "overdue",
            NotificationKind::PaymentConfirmed => "payment_confirmed",
        }
    }

    /// Cycle stage that sends this kind
    pub fn stage(&self) -> Stage {
        match self {
            NotificationKind::Reminder => Stage::Reminder,
            NotificationKind::DueToday => Stage::DueToday,
            NotificationKind::Overdue => Stage::Overdue,
            NotificationKind::PaymentConfirmed => Stage::PaymentConfirmation,
        }
    }
}

impl FromStr for NotificationKind {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reminder" => Ok(NotificationKind::Reminder),
            "due_today" => Ok(NotificationKind::DueToday),
            "overdue" => Ok(NotificationKind::Overdue),
            "payment_confirmed" => Ok(NotificationKind::PaymentConfirmed),
            other => Err(BillingError::validation(format!("unknown notification kind '{}'", other))),
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Idempotency key of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationKey {
    pub invoice_id: InvoiceId,
    pub kind: NotificationKind,
    pub day: NaiveDate,
}

impl NotificationKey {
    pub fn new(invoice_id: InvoiceId, kind: NotificationKind, day: NaiveDate) -> Self {
        Self { invoice_id, kind, day }
    }
}

impl fmt::Display for NotificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.invoice_id, self.kind, self.day)
    }
}

/// A delivered notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: NotificationId,
    pub key: NotificationKey,
    /// Delivery channel, e.g. "email"
    pub channel: String,
    pub recipient: String,
    pub subject: String,
    pub sent_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Records a message delivered for `key`
    pub fn delivered(key: NotificationKey, message: &OutboundMessage) -> Self {
        Self {
            id: NotificationId::new_v7(),
            key,
            channel: "email".to_string(),
            recipient: message.recipient.clone(),
            subject: message.subject.clone(),
            sent_at: Utc::now(),
        }
    }
}

/// Sender shown on outgoing mail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub name: String,
    pub email: String,
}

impl Default for SenderIdentity {
    fn default() -> Self {
        Self {
            name: "Billing".to_string(),
            email: "billing@localhost".to_string(),
        }
    }
}

/// A rendered plain-text message ready for the notification channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub sender: SenderIdentity,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}
