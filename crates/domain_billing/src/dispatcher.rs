//! Payment reminder and collection notices
//!
//! Each invoice moves through three stages keyed by its days-to-due:
//!
//! | stage     | days-to-due              | statuses          | extra condition         |
//! |-----------|--------------------------|-------------------|-------------------------|
//! | reminder  | one of `reminder_days`   | pending           |                         |
//! | due today | 0                        | pending           |                         |
//! | overdue   | minus one of `overdue_days` | pending, overdue | attempts below the cap |
//!
//! A message is only sent when no record exists for (invoice, kind, today),
//! and the record is written right after a successful send. Re-running the
//! phase on the same day therefore sends nothing new.

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;

use core_kernel::calendar;

use crate::config::BillingConfig;
use crate::cycle::PhaseReport;
use crate::error::{BillingError, FailureKind, ItemFailure, Stage};
use crate::events::{BillingEvent, BillingEvents, TracingEvents};
use crate::invoice::{CustomerInvoice, InvoiceStatus};
use crate::messages::{self, Notice};
use crate::notification::{NotificationKey, NotificationKind, NotificationRecord, SenderIdentity};
use crate::ports::{InvoiceStore, NotificationChannel};
use crate::workers::{run_bounded, with_timeout};

/// What happened to one candidate notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent { recipient: String },
    Skipped { reason: &'static str },
}

/// Sends reminder, due-today and overdue notices
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn InvoiceStore>,
    channel: Arc<dyn NotificationChannel>,
    events: Arc<dyn BillingEvents>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn InvoiceStore>, channel: Arc<dyn NotificationChannel>) -> Self {
        Self {
            store,
            channel,
            events: Arc::new(TracingEvents),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn BillingEvents>) -> Self {
        self.events = events;
        self
    }

    /// Sends every notice due on `today`
    pub async fn dispatch(&self, today: NaiveDate, config: &BillingConfig) -> Result<PhaseReport, BillingError> {
        let mut report = PhaseReport::default();
        let candidates = self.candidates(today, config, &mut report).await?;

        let stages: Vec<Stage> = candidates.iter().map(|(notice, _)| notice.kind().stage()).collect();
        let items = candidates
            .into_iter()
            .map(|(notice, target)| (target.invoice.id.to_string(), (notice, target)))
            .collect();

        let store = Arc::clone(&self.store);
        let channel = Arc::clone(&self.channel);
        let sender = config.sender.clone();
        let timeout = config.gateway_timeout;
        let results = run_bounded(items, config.worker_concurrency, move |(notice, target): (Notice, CustomerInvoice)| {
            let store = Arc::clone(&store);
            let channel = Arc::clone(&channel);
            let sender = sender.clone();
            async move {
                let outcome = deliver(store.as_ref(), channel.as_ref(), &notice, &target, &sender, today, timeout).await;
                (notice.kind(), target.invoice.id, outcome)
            }
        })
        .await;

        for ((item, result), stage) in results.into_iter().zip(stages) {
            match result {
                Ok((kind, invoice_id, Ok(Delivery::Sent { recipient }))) => {
                    report.processed += 1;
                    self.events.emit(BillingEvent::NotificationSent { invoice_id, kind, recipient });
                }
                Ok((kind, invoice_id, Ok(Delivery::Skipped { reason }))) => {
                    report.skipped += 1;
                    self.events.emit(BillingEvent::NotificationSkipped {
                        invoice_id,
                        kind,
                        reason: reason.to_string(),
                    });
                }
                Ok((_, _, Err(e))) => self.fail(&mut report, ItemFailure::from_error(item, stage, &e)),
                Err(aborted) => self.fail(
                    &mut report,
                    ItemFailure::new(item, stage, FailureKind::Internal, aborted),
                ),
            }
        }
        Ok(report)
    }

    /// Lists the notices to attempt today, in stage order
    async fn candidates(
        &self,
        today: NaiveDate,
        config: &BillingConfig,
        report: &mut PhaseReport,
    ) -> Result<Vec<(Notice, CustomerInvoice)>, BillingError> {
        let mut candidates = Vec::new();

        for &days_left in &config.reminder_days {
            let due = calendar::offset_days(today, days_left)?;
            for target in self.due_on(due, &[InvoiceStatus::Pending]).await? {
                candidates.push((Notice::Reminder { days_left }, target));
            }
        }

        for target in self.due_on(today, &[InvoiceStatus::Pending]).await? {
            candidates.push((Notice::DueToday, target));
        }

        for &days_overdue in &config.overdue_days {
            let due = calendar::offset_days(today, -days_overdue)?;
            for target in self.due_on(due, &[InvoiceStatus::Pending, InvoiceStatus::Overdue]).await? {
                if target.invoice.collection_attempts >= config.max_collection_attempts {
                    report.skipped += 1;
                    self.events.emit(BillingEvent::NotificationSkipped {
                        invoice_id: target.invoice.id,
                        kind: NotificationKind::Overdue,
                        reason: "collection attempts exhausted".to_string(),
                    });
                    continue;
                }
                match target.invoice.overdue_charges(today) {
                    Ok(charges) => candidates.push((Notice::Overdue(charges), target)),
                    Err(e) => self.fail(
                        report,
                        ItemFailure::from_error(target.invoice.id, Stage::Overdue, &BillingError::Money(e)),
                    ),
                }
            }
        }

        Ok(candidates)
    }

    async fn due_on(&self, due: NaiveDate, statuses: &[InvoiceStatus]) -> Result<Vec<CustomerInvoice>, BillingError> {
        self.store
            .invoices_due_on(due, statuses)
            .await
            .map_err(BillingError::Persistence)
    }

    fn fail(&self, report: &mut PhaseReport, failure: ItemFailure) {
        self.events.emit(BillingEvent::ItemFailed(failure.clone()));
        report.errors.push(failure);
    }
}

/// Sends one notice unless it was already sent today, then records it
async fn deliver(
    store: &dyn InvoiceStore,
    channel: &dyn NotificationChannel,
    notice: &Notice,
    target: &CustomerInvoice,
    sender: &SenderIdentity,
    today: NaiveDate,
    timeout: Duration,
) -> Result<Delivery, BillingError> {
    let Some(recipient) = target.customer.contact_address() else {
        return Ok(Delivery::Skipped { reason: "no usable contact address" });
    };

    let key = NotificationKey::new(target.invoice.id, notice.kind(), today);
    if store.notification_exists(&key).await.map_err(BillingError::Persistence)? {
        return Ok(Delivery::Skipped { reason: "already sent today" });
    }

    let message = messages::render(notice, &target.invoice, &target.customer, recipient, sender, today);
    with_timeout("send_notification", timeout, channel.send(&message))
        .await
        .map_err(BillingError::Notification)?;

    let record = NotificationRecord::delivered(key, &message);
    match notice {
        Notice::Overdue(_) => store.record_collection_notice(&record).await.map(|_| ()),
        _ => store.record_notification(&record).await,
    }
    .map_err(BillingError::Persistence)?;

    Ok(Delivery::Sent {
        recipient: recipient.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{Invoice, InvoiceRequest, PaymentArtifacts};
    use crate::ports::mock::{InMemoryInvoiceStore, RecordingChannel, RecordingEvents};
    use crate::subscription::Customer;
    use core_kernel::{Currency, Money};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn seed(store: &InMemoryInvoiceStore, email: &str, due: NaiveDate) -> Invoice {
        let customer = Customer::new("Customer", "12345678909").with_email(email);
        store.add_customer(customer.clone()).await;
        let request = InvoiceRequest::one_off(customer, Money::new(dec!(100.00), Currency::BRL), "Service", due);
        let invoice = Invoice::issued(
            &request,
            crate::invoice::generate_reference(date(2024, 1, 1)),
            date(2024, 1, 1),
            "ext".into(),
            PaymentArtifacts::default(),
        );
        store.put_invoice(invoice.clone()).await;
        invoice
    }

    fn dispatcher(store: &InMemoryInvoiceStore, channel: &RecordingChannel) -> Dispatcher {
        Dispatcher::new(Arc::new(store.clone()), Arc::new(channel.clone())).with_events(Arc::new(RecordingEvents::new()))
    }

    #[tokio::test]
    async fn test_reminder_only_on_configured_offsets() {
        let store = InMemoryInvoiceStore::new();
        let channel = RecordingChannel::new();
        seed(&store, "a@example.test", date(2024, 3, 17)).await;
        let dispatcher = dispatcher(&store, &channel);
        let config = BillingConfig::default();

        let day7 = dispatcher.dispatch(date(2024, 3, 10), &config).await.unwrap();
        let day6 = dispatcher.dispatch(date(2024, 3, 11), &config).await.unwrap();
        let day5 = dispatcher.dispatch(date(2024, 3, 12), &config).await.unwrap();

        assert_eq!(day7.processed, 1);
        assert_eq!(day6.processed, 0);
        assert_eq!(day5.processed, 0);
        let sent = channel.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Reminder: invoice due in 7 days");
    }

    #[tokio::test]
    async fn test_second_dispatch_same_day_sends_nothing() {
        let store = InMemoryInvoiceStore::new();
        let channel = RecordingChannel::new();
        seed(&store, "a@example.test", date(2024, 3, 10)).await;
        seed(&store, "b@example.test", date(2024, 3, 13)).await;
        let dispatcher = dispatcher(&store, &channel);
        let config = BillingConfig::default();

        let first = dispatcher.dispatch(date(2024, 3, 10), &config).await.unwrap();
        let second = dispatcher.dispatch(date(2024, 3, 10), &config).await.unwrap();

        assert_eq!(first.processed, 2);
        assert_eq!(second.processed, 0);
        assert_eq!(channel.sent().await.len(), 2);
        assert_eq!(store.notifications().await.len(), 2);
    }

    #[tokio::test]
    async fn test_uncontactable_customer_is_skipped() {
        let store = InMemoryInvoiceStore::new();
        let channel = RecordingChannel::new();
        seed(&store, "   ", date(2024, 3, 10)).await;

        let report = dispatcher(&store, &channel)
            .dispatch(date(2024, 3, 10), &BillingConfig::default())
            .await
            .unwrap();

        assert_eq!(report.processed, 0);
        assert_eq!(report.skipped, 1);
        assert!(store.notifications().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_writes_no_record() {
        let store = InMemoryInvoiceStore::new();
        let channel = RecordingChannel::new();
        channel.fail_for("down@example.test").await;
        seed(&store, "down@example.test", date(2024, 3, 10)).await;
        seed(&store, "up@example.test", date(2024, 3, 10)).await;

        let report = dispatcher(&store, &channel)
            .dispatch(date(2024, 3, 10), &BillingConfig::default())
            .await
            .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, FailureKind::Notification);
        assert_eq!(report.errors[0].stage, Stage::DueToday);
        assert_eq!(store.notifications().await.len(), 1);
    }

    #[tokio::test]
    async fn test_overdue_notice_increments_attempts_and_caps() {
        let store = InMemoryInvoiceStore::new();
        let channel = RecordingChannel::new();
        let invoice = seed(&store, "late@example.test", date(2024, 3, 1)).await;
        let dispatcher = dispatcher(&store, &channel);
        let config = BillingConfig::default();

        for day in [date(2024, 3, 6), date(2024, 3, 11), date(2024, 3, 16), date(2024, 3, 31)] {
            dispatcher.dispatch(day, &config).await.unwrap();
        }

        let stored = store.invoice(invoice.id).await.unwrap();
        assert_eq!(stored.collection_attempts, 3);
        assert_eq!(stored.amount.amount(), dec!(100.00));
        let overdue: Vec<_> = channel
            .sent()
            .await
            .into_iter()
            .filter(|m| m.subject.starts_with("Collection notice"))
            .collect();
        assert_eq!(overdue.len(), 3);
        assert!(overdue[1].body.contains("Updated amount: R$ 102.33"));
    }
}
