//! Status reconciliation against the payment processor
//!
//! The processor is the authority on whether an invoice was paid. Open
//! invoices are queried one by one, spaced by a shared [`Throttle`], and any
//! forward status change is persisted. The first move into `paid` also sends
//! the payment confirmation.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;

use core_kernel::InvoiceId;

use crate::config::BillingConfig;
use crate::cycle::PhaseReport;
use crate::error::{BillingError, FailureKind, ItemFailure, Stage};
use crate::events::{BillingEvent, BillingEvents, TracingEvents};
use crate::invoice::{CustomerInvoice, InvoiceStatus, StatusChange};
use crate::messages::{self, Notice};
use crate::notification::{NotificationKey, NotificationKind, NotificationRecord, SenderIdentity};
use crate::ports::{InvoiceStore, NotificationChannel, PaymentGateway};
use crate::workers::{run_bounded, with_timeout, Throttle};

/// Result of reconciling one invoice
#[derive(Debug)]
pub enum Reconciled {
    Unchanged,
    /// The processor reported a status behind ours; ignored
    Regression {
        invoice_id: InvoiceId,
        local: InvoiceStatus,
        remote: InvoiceStatus,
    },
    Updated {
        change: StatusChange,
        confirmation_sent_to: Option<String>,
        /// The transition was committed but the confirmation was not delivered
        confirmation_error: Option<BillingError>,
    },
}

/// Applies the processor's authoritative status to open invoices
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn InvoiceStore>,
    gateway: Arc<dyn PaymentGateway>,
    channel: Arc<dyn NotificationChannel>,
    events: Arc<dyn BillingEvents>,
}

#[derive(Clone)]
struct Collaborators {
    store: Arc<dyn InvoiceStore>,
    gateway: Arc<dyn PaymentGateway>,
    channel: Arc<dyn NotificationChannel>,
    throttle: Arc<Throttle>,
    sender: SenderIdentity,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        gateway: Arc<dyn PaymentGateway>,
        channel: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            store,
            gateway,
            channel,
            events: Arc::new(TracingEvents),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn BillingEvents>) -> Self {
        self.events = events;
        self
    }

    /// Reconciles up to `config.reconcile_batch_limit` open invoices
    pub async fn reconcile(&self, today: NaiveDate, config: &BillingConfig) -> Result<PhaseReport, BillingError> {
        let open = self
            .store
            .invoices_to_reconcile(config.reconcile_batch_limit)
            .await
            .map_err(BillingError::Persistence)?;

        let items = open
            .into_iter()
            .map(|target| (target.invoice.id.to_string(), target))
            .collect();

        let collaborators = Collaborators {
            store: Arc::clone(&self.store),
            gateway: Arc::clone(&self.gateway),
            channel: Arc::clone(&self.channel),
            throttle: Arc::new(Throttle::new(config.reconcile_spacing)),
            sender: config.sender.clone(),
            timeout: config.gateway_timeout,
        };
        let results = run_bounded(items, config.worker_concurrency, move |target: CustomerInvoice| {
            let collaborators = collaborators.clone();
            async move { reconcile_one(&collaborators, target, today).await }
        })
        .await;

        let mut report = PhaseReport::default();
        for (item, result) in results {
            match result {
                Ok(Ok(Reconciled::Unchanged)) => report.skipped += 1,
                Ok(Ok(Reconciled::Regression { invoice_id, local, remote })) => {
                    report.skipped += 1;
                    self.events.emit(BillingEvent::StatusRegressionIgnored { invoice_id, local, remote });
                }
                Ok(Ok(Reconciled::Updated { change, confirmation_sent_to, confirmation_error })) => {
                    report.processed += 1;
                    self.events.emit(BillingEvent::StatusChanged {
                        invoice_id: change.invoice_id,
                        from: change.from,
                        to: change.to,
                    });
                    if let Some(recipient) = confirmation_sent_to {
                        self.events.emit(BillingEvent::NotificationSent {
                            invoice_id: change.invoice_id,
                            kind: NotificationKind::PaymentConfirmed,
                            recipient,
                        });
                    }
                    if let Some(e) = confirmation_error {
                        self.fail(&mut report, ItemFailure::from_error(item, Stage::PaymentConfirmation, &e));
                    }
                }
                Ok(Err(e)) => self.fail(&mut report, ItemFailure::from_error(item, Stage::Reconciliation, &e)),
                Err(aborted) => self.fail(
                    &mut report,
                    ItemFailure::new(item, Stage::Reconciliation, FailureKind::Internal, aborted),
                ),
            }
        }
        Ok(report)
    }

    fn fail(&self, report: &mut PhaseReport, failure: ItemFailure) {
        self.events.emit(BillingEvent::ItemFailed(failure.clone()));
        report.errors.push(failure);
    }
}

async fn reconcile_one(
    c: &Collaborators,
    target: CustomerInvoice,
    today: NaiveDate,
) -> Result<Reconciled, BillingError> {
    let CustomerInvoice { mut invoice, customer } = target;

    c.throttle.acquire().await;
    let raw = with_timeout("query_invoice", c.timeout, c.gateway.query_invoice(&invoice.reference))
        .await
        .map_err(BillingError::Gateway)?;

    let remote = InvoiceStatus::from_processor(&raw);
    if remote == invoice.status {
        return Ok(Reconciled::Unchanged);
    }
    if !invoice.status.can_transition_to(remote) {
        return Ok(Reconciled::Regression {
            invoice_id: invoice.id,
            local: invoice.status,
            remote,
        });
    }

    let now = Utc::now();
    let change = invoice.transition_to(remote, now)?;

    if remote == InvoiceStatus::Paid {
        if let Some(recipient) = customer.contact_address() {
            let key = NotificationKey::new(invoice.id, NotificationKind::PaymentConfirmed, today);
            let already_sent = c.store.notification_exists(&key).await.map_err(BillingError::Persistence)?;
            if !already_sent {
                let notice = Notice::PaymentConfirmed { paid_at: now };
                let message = messages::render(&notice, &invoice, &customer, recipient, &c.sender, today);
                let sent = with_timeout("send_notification", c.timeout, c.channel.send(&message)).await;

                return match sent {
                    Ok(()) => {
                        let record = NotificationRecord::delivered(key, &message);
                        c.store
                            .apply_status_change(&change, Some(&record))
                            .await
                            .map_err(BillingError::Persistence)?;
                        Ok(Reconciled::Updated {
                            change,
                            confirmation_sent_to: Some(recipient.to_string()),
                            confirmation_error: None,
                        })
                    }
                    Err(e) => {
                        c.store
                            .apply_status_change(&change, None)
                            .await
                            .map_err(BillingError::Persistence)?;
                        Ok(Reconciled::Updated {
                            change,
                            confirmation_sent_to: None,
                            confirmation_error: Some(BillingError::Notification(e)),
                        })
                    }
                };
            }
        }
    }

    c.store
        .apply_status_change(&change, None)
        .await
        .map_err(BillingError::Persistence)?;
    Ok(Reconciled::Updated {
        change,
        confirmation_sent_to: None,
        confirmation_error: None,
    })
}
