//! Observability port
//!
//! Billing components report what they did as typed events instead of
//! logging inline. `TracingEvents` turns each event into one structured
//! `tracing` record; tests inject a recorder and assert on the events.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use core_kernel::{InvoiceId, Money, SubscriptionId};

use crate::cycle::Phase;
use crate::error::ItemFailure;
use crate::invoice::InvoiceStatus;
use crate::notification::NotificationKind;

/// Something worth recording that happened during billing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BillingEvent {
    RunStarted {
        date: NaiveDate,
    },
    PhaseCompleted {
        phase: Phase,
        processed: usize,
        failed: usize,
    },
    RunAborted {
        after: Phase,
    },
    RunFinished {
        date: NaiveDate,
        processed: usize,
        failed: usize,
        elapsed_ms: u64,
    },
    InvoiceIssued {
        invoice_id: InvoiceId,
        reference: String,
        subscription_id: Option<SubscriptionId>,
        due_date: NaiveDate,
        amount: Money,
    },
    InvoiceCancelled {
        invoice_id: InvoiceId,
        reason: String,
    },
    /// The processor accepted an invoice we could not store; it was voided remotely
    OrphanCompensated {
        reference: String,
        succeeded: bool,
    },
    RemoteCancelFailed {
        reference: String,
        message: String,
    },
    NotificationSent {
        invoice_id: InvoiceId,
        kind: NotificationKind,
        recipient: String,
    },
    NotificationSkipped {
        invoice_id: InvoiceId,
        kind: NotificationKind,
        reason: String,
    },
    StatusChanged {
        invoice_id: InvoiceId,
        from: InvoiceStatus,
        to: InvoiceStatus,
    },
    /// The processor reported a status that would move the invoice backwards
    StatusRegressionIgnored {
        invoice_id: InvoiceId,
        local: InvoiceStatus,
        remote: InvoiceStatus,
    },
    ItemFailed(ItemFailure),
}

/// Sink for billing events
pub trait BillingEvents: Send + Sync {
    fn emit(&self, event: BillingEvent);
}

/// Emits every event as a structured tracing record
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl BillingEvents for TracingEvents {
    fn emit(&self, event: BillingEvent) {
        match event {
            BillingEvent::RunStarted { date } => info!(%date, "Billing cycle started"),
            BillingEvent::PhaseCompleted { phase, processed, failed } => {
                if failed > 0 {
                    warn!(%phase, processed, failed, "Billing phase completed with failures");
                } else {
                    info!(%phase, processed, "Billing phase completed");
                }
            }
            BillingEvent::RunAborted { after } => warn!(phase = %after, "Billing cycle aborted between phases"),
            BillingEvent::RunFinished { date, processed, failed, elapsed_ms } => {
                info!(%date, processed, failed, elapsed_ms, "Billing cycle finished")
            }
            BillingEvent::InvoiceIssued { invoice_id, reference, subscription_id, due_date, amount } => info!(
                %invoice_id,
                %reference,
                subscription_id = subscription_id.map(|id| id.to_string()),
                %due_date,
                %amount,
                "Invoice issued"
            ),
            BillingEvent::InvoiceCancelled { invoice_id, reason } => info!(%invoice_id, %reason, "Invoice cancelled"),
            BillingEvent::OrphanCompensated { reference, succeeded } => {
                if succeeded {
                    warn!(%reference, "Remote invoice voided after local persistence failed");
                } else {
                    error!(%reference, "Remote invoice left orphaned: local persistence and remote cancel both failed");
                }
            }
            BillingEvent::RemoteCancelFailed { reference, message } => {
                warn!(%reference, error = %message, "Remote cancellation failed; cancelled locally only")
            }
            BillingEvent::NotificationSent { invoice_id, kind, recipient } => {
                info!(%invoice_id, %kind, %recipient, "Notification sent")
            }
            BillingEvent::NotificationSkipped { invoice_id, kind, reason } => {
                debug!(%invoice_id, %kind, %reason, "Notification skipped")
            }
            BillingEvent::StatusChanged { invoice_id, from, to } => {
                info!(%invoice_id, %from, %to, "Invoice status updated")
            }
            BillingEvent::StatusRegressionIgnored { invoice_id, local, remote } => {
                debug!(%invoice_id, %local, %remote, "Ignoring backward status from processor")
            }
            BillingEvent::ItemFailed(failure) => warn!(
                item = %failure.item,
                stage = %failure.stage,
                kind = ?failure.kind,
                error = %failure.message,
                "Billing item failed"
            ),
        }
    }
}
