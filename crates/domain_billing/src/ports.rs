//! Billing Domain Ports
//!
//! Collaborator interfaces the billing cycle depends on:
//!
//! - [`InvoiceStore`]: persistence of subscriptions, invoices and notification records
//! - [`PaymentGateway`]: the remote payment processor (create/query/cancel)
//! - [`NotificationChannel`]: delivery of rendered messages
//! - [`SettingsSource`]: the key-value business configuration
//!
//! Adapters live in `infra_db` (PostgreSQL) and [`crate::adapters`] (HTTP).
//! In-memory doubles for tests are in [`mock`].
//!
//! ```rust,ignore
//! let cycle = DailyCycle::new(
//!     Arc::new(PostgresInvoiceStore::new(pool.clone())),
//!     Arc::new(ProcessorClient::new(processor_config)?),
//!     Arc::new(HttpMailChannel::new(mail_config)?),
//!     Arc::new(PostgresSettingsSource::new(pool)),
//! );
//! let summary = cycle.run(today).await?;
//! ```

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use core_kernel::{DomainPort, InvoiceId, Money, PortError, SubscriptionId, YearMonth};

use crate::invoice::{
    CustomerInvoice, Invoice, InvoiceQuery, InvoiceStatus, PaymentArtifacts, PaymentTerms, StatusChange, StatusTotal,
};
use crate::notification::{NotificationKey, NotificationRecord, OutboundMessage};
use crate::subscription::{BillableSubscription, Customer, PostalAddress};

/// Persistence port for the billing cycle
///
/// Every method that writes more than one row is atomic: it either
/// commits all of its writes or none.
#[async_trait]
pub trait InvoiceStore: DomainPort {
    /// Active subscriptions of active customers whose start/end window covers `today`
    async fn billable_subscriptions(&self, today: NaiveDate) -> Result<Vec<BillableSubscription>, PortError>;

    /// Due date of the subscription's latest non-cancelled invoice
    async fn last_due_date(&self, subscription_id: SubscriptionId) -> Result<Option<NaiveDate>, PortError>;

    /// Whether a non-cancelled invoice of the subscription falls due in `month`
    async fn invoice_exists_for_month(
        &self,
        subscription_id: SubscriptionId,
        month: YearMonth,
    ) -> Result<bool, PortError>;

    /// Stores an issued invoice together with its payment artifacts
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), PortError>;

    async fn get_invoice(&self, id: InvoiceId) -> Result<Invoice, PortError>;

    /// Lists invoices matching the query, most recent due date first
    async fn list_invoices(&self, query: &InvoiceQuery) -> Result<Vec<Invoice>, PortError>;

    /// Invoices due on `due_date` in one of `statuses`, joined with their customer
    async fn invoices_due_on(
        &self,
        due_date: NaiveDate,
        statuses: &[InvoiceStatus],
    ) -> Result<Vec<CustomerInvoice>, PortError>;

    async fn notification_exists(&self, key: &NotificationKey) -> Result<bool, PortError>;

    /// Records a delivered notification; a duplicate key is a `PortError::Conflict`
    async fn record_notification(&self, record: &NotificationRecord) -> Result<(), PortError>;

    /// Records a collection notice and increments the invoice's attempt counter
    ///
    /// Returns the new attempt count.
    async fn record_collection_notice(&self, record: &NotificationRecord) -> Result<u32, PortError>;

    /// Pending or overdue invoices with a processor id, most recent first
    async fn invoices_to_reconcile(&self, limit: u32) -> Result<Vec<CustomerInvoice>, PortError>;

    /// Applies a status transition, optionally with the notification that announced it
    ///
    /// The update only applies while the stored status still equals
    /// `change.from`; otherwise it fails with `PortError::Conflict`.
    async fn apply_status_change(
        &self,
        change: &StatusChange,
        notification: Option<&NotificationRecord>,
    ) -> Result<(), PortError>;

    /// Count and amount per status of invoices issued in `[since, until]`
    async fn status_totals(&self, since: NaiveDate, until: NaiveDate) -> Result<Vec<StatusTotal>, PortError>;
}

/// Payer data sent to the processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerInfo {
    pub name: String,
    /// Document digits only
    pub document: String,
    pub email: Option<String>,
    pub address: Option<PostalAddress>,
}

impl From<&Customer> for PayerInfo {
    fn from(customer: &Customer) -> Self {
        Self {
            name: customer.name.clone(),
            document: customer.document_digits(),
            email: customer.contact_address().map(str::to_string),
            address: customer.address.clone(),
        }
    }
}

/// Invoice creation request sent to the processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteInvoiceRequest {
    /// Our idempotent reference
    pub reference: String,
    pub amount: Money,
    pub due_date: NaiveDate,
    pub description: String,
    pub payer: PayerInfo,
    pub terms: PaymentTerms,
}

/// The processor's answer to a creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteInvoice {
    pub external_id: String,
    pub artifacts: PaymentArtifacts,
}

/// Remote payment processor
#[async_trait]
pub trait PaymentGateway: DomainPort {
    async fn create_invoice(&self, request: &RemoteInvoiceRequest) -> Result<RemoteInvoice, PortError>;

    /// The processor's raw status word for the invoice with our `reference`
    async fn query_invoice(&self, reference: &str) -> Result<String, PortError>;

    async fn cancel_invoice(&self, reference: &str) -> Result<(), PortError>;
}

/// Outbound message delivery
#[async_trait]
pub trait NotificationChannel: DomainPort {
    async fn send(&self, message: &OutboundMessage) -> Result<(), PortError>;
}

/// Key-value business settings
#[async_trait]
pub trait SettingsSource: DomainPort {
    async fn load_settings(&self) -> Result<HashMap<String, String>, PortError>;
}

/// In-memory doubles of the billing ports
///
/// Each double records what it was asked to do and can be told to fail,
/// so tests can drive every failure path deterministically.
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::RwLock;
    use tokio::time::Instant;

    use core_kernel::{AdapterHealth, CustomerId, HealthCheckResult, HealthCheckable};

    use crate::events::{BillingEvent, BillingEvents};

    #[derive(Debug, Default)]
    struct StoreState {
        subscriptions: Vec<BillableSubscription>,
        customers: HashMap<CustomerId, Customer>,
        invoices: HashMap<InvoiceId, Invoice>,
        notifications: Vec<NotificationRecord>,
    }

    /// In-memory invoice store
    #[derive(Debug, Default, Clone)]
    pub struct InMemoryInvoiceStore {
        state: Arc<RwLock<StoreState>>,
        fail_writes: Arc<AtomicBool>,
        unavailable: Arc<AtomicBool>,
    }

    impl InMemoryInvoiceStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Registers a subscription and its customer
        pub async fn add_subscription(&self, subscription: BillableSubscription) {
            let mut state = self.state.write().await;
            state.customers.insert(subscription.customer.id, subscription.customer.clone());
            state.subscriptions.retain(|s| s.subscription.id != subscription.subscription.id);
            state.subscriptions.push(subscription);
        }

        pub async fn add_customer(&self, customer: Customer) {
            self.state.write().await.customers.insert(customer.id, customer);
        }

        /// Seeds an invoice directly, bypassing the gateway
        pub async fn put_invoice(&self, invoice: Invoice) {
            self.state.write().await.invoices.insert(invoice.id, invoice);
        }

        pub async fn invoices(&self) -> Vec<Invoice> {
            let mut invoices: Vec<_> = self.state.read().await.invoices.values().cloned().collect();
            invoices.sort_by_key(|i| (i.due_date, i.created_at));
            invoices
        }

        pub async fn invoice(&self, id: InvoiceId) -> Option<Invoice> {
            self.state.read().await.invoices.get(&id).cloned()
        }

        pub async fn notifications(&self) -> Vec<NotificationRecord> {
            self.state.read().await.notifications.clone()
        }

        /// Makes every write fail with an internal error
        pub fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        /// Makes every call fail as if the database were unreachable
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        fn check_available(&self) -> Result<(), PortError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(PortError::connection("in-memory store marked unavailable"));
            }
            Ok(())
        }

        fn check_writable(&self) -> Result<(), PortError> {
            self.check_available()?;
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(PortError::internal("in-memory store rejected the write"));
            }
            Ok(())
        }

        fn join(state: &StoreState, invoice: &Invoice) -> Result<CustomerInvoice, PortError> {
            let customer = state
                .customers
                .get(&invoice.customer_id)
                .cloned()
                .ok_or_else(|| PortError::not_found("Customer", invoice.customer_id))?;
            Ok(CustomerInvoice { invoice: invoice.clone(), customer })
        }
    }

    impl DomainPort for InMemoryInvoiceStore {}

    #[async_trait]
    impl HealthCheckable for InMemoryInvoiceStore {
        async fn health_check(&self) -> HealthCheckResult {
            let status = if self.unavailable.load(Ordering::SeqCst) {
                AdapterHealth::Unhealthy
            } else {
                AdapterHealth::Healthy
            };
            HealthCheckResult {
                adapter_id: "in-memory-invoice-store".to_string(),
                status,
                latency_ms: 0,
                message: None,
                checked_at: chrono::Utc::now(),
            }
        }
    }

    #[async_trait]
    impl InvoiceStore for InMemoryInvoiceStore {
        async fn billable_subscriptions(&self, today: NaiveDate) -> Result<Vec<BillableSubscription>, PortError> {
            self.check_available()?;
            let state = self.state.read().await;
            Ok(state
                .subscriptions
                .iter()
                .filter(|s| s.subscription.is_billable_on(today))
                .filter(|s| {
                    state
                        .customers
                        .get(&s.customer.id)
                        .map_or(false, |c| c.status == crate::subscription::CustomerStatus::Active)
                })
                .cloned()
                .collect())
        }

        async fn last_due_date(&self, subscription_id: SubscriptionId) -> Result<Option<NaiveDate>, PortError> {
            self.check_available()?;
            Ok(self
                .state
                .read()
                .await
                .invoices
                .values()
                .filter(|i| i.subscription_id == Some(subscription_id) && i.status != InvoiceStatus::Cancelled)
                .map(|i| i.due_date)
                .max())
        }

        async fn invoice_exists_for_month(
            &self,
            subscription_id: SubscriptionId,
            month: YearMonth,
        ) -> Result<bool, PortError> {
            self.check_available()?;
            Ok(self.state.read().await.invoices.values().any(|i| {
                i.subscription_id == Some(subscription_id)
                    && i.status != InvoiceStatus::Cancelled
                    && month.contains(i.due_date)
            }))
        }

        async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), PortError> {
            self.check_writable()?;
            let mut state = self.state.write().await;
            if state.invoices.values().any(|i| i.reference == invoice.reference) {
                return Err(PortError::conflict(format!("invoice reference {} already exists", invoice.reference)));
            }
            state.invoices.insert(invoice.id, invoice.clone());
            Ok(())
        }

        async fn get_invoice(&self, id: InvoiceId) -> Result<Invoice, PortError> {
            self.check_available()?;
            self.state
                .read()
                .await
                .invoices
                .get(&id)
                .cloned()
                .ok_or_else(|| PortError::not_found("Invoice", id))
        }

        async fn list_invoices(&self, query: &InvoiceQuery) -> Result<Vec<Invoice>, PortError> {
            self.check_available()?;
            let state = self.state.read().await;
            let mut invoices: Vec<_> = state.invoices.values().filter(|i| query.matches(i)).cloned().collect();
            invoices.sort_by(|a, b| b.due_date.cmp(&a.due_date).then(b.created_at.cmp(&a.created_at)));
            invoices.truncate(query.effective_limit() as usize);
            Ok(invoices)
        }

        async fn invoices_due_on(
            &self,
            due_date: NaiveDate,
            statuses: &[InvoiceStatus],
        ) -> Result<Vec<CustomerInvoice>, PortError> {
            self.check_available()?;
            let state = self.state.read().await;
            state
                .invoices
                .values()
                .filter(|i| i.due_date == due_date && statuses.contains(&i.status))
                .map(|i| Self::join(&state, i))
                .collect()
        }

        async fn notification_exists(&self, key: &NotificationKey) -> Result<bool, PortError> {
            self.check_available()?;
            Ok(self.state.read().await.notifications.iter().any(|n| &n.key == key))
        }

        async fn record_notification(&self, record: &NotificationRecord) -> Result<(), PortError> {
            self.check_writable()?;
            let mut state = self.state.write().await;
            if state.notifications.iter().any(|n| n.key == record.key) {
                return Err(PortError::conflict(format!("notification {} already recorded", record.key)));
            }
            state.notifications.push(record.clone());
            Ok(())
        }

        async fn record_collection_notice(&self, record: &NotificationRecord) -> Result<u32, PortError> {
            self.check_writable()?;
            let mut state = self.state.write().await;
            if state.notifications.iter().any(|n| n.key == record.key) {
                return Err(PortError::conflict(format!("notification {} already recorded", record.key)));
            }
            let invoice = state
                .invoices
                .get_mut(&record.key.invoice_id)
                .ok_or_else(|| PortError::not_found("Invoice", record.key.invoice_id))?;
            invoice.collection_attempts += 1;
            let attempts = invoice.collection_attempts;
            state.notifications.push(record.clone());
            Ok(attempts)
        }

        async fn invoices_to_reconcile(&self, limit: u32) -> Result<Vec<CustomerInvoice>, PortError> {
            self.check_available()?;
            let state = self.state.read().await;
            let mut open: Vec<_> = state
                .invoices
                .values()
                .filter(|i| i.status.is_open() && i.external_id.is_some())
                .collect();
            open.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            open.into_iter()
                .take(limit as usize)
                .map(|i| Self::join(&state, i))
                .collect()
        }

        async fn apply_status_change(
            &self,
            change: &StatusChange,
            notification: Option<&NotificationRecord>,
        ) -> Result<(), PortError> {
            self.check_writable()?;
            let mut state = self.state.write().await;
            if let Some(record) = notification {
                if state.notifications.iter().any(|n| n.key == record.key) {
                    return Err(PortError::conflict(format!("notification {} already recorded", record.key)));
                }
            }
            let invoice = state
                .invoices
                .get_mut(&change.invoice_id)
                .ok_or_else(|| PortError::not_found("Invoice", change.invoice_id))?;
            if invoice.status != change.from {
                return Err(PortError::conflict(format!(
                    "invoice {} is {}, expected {}",
                    change.invoice_id, invoice.status, change.from
                )));
            }
            invoice.status = change.to;
            if change.paid_at.is_some() {
                invoice.paid_at = change.paid_at;
            }
            invoice.updated_at = chrono::Utc::now();
            if let Some(record) = notification {
                state.notifications.push(record.clone());
            }
            Ok(())
        }

        async fn status_totals(&self, since: NaiveDate, until: NaiveDate) -> Result<Vec<StatusTotal>, PortError> {
            self.check_available()?;
            let state = self.state.read().await;
            Ok(InvoiceStatus::ALL
                .iter()
                .filter_map(|status| {
                    let matching: Vec<_> = state
                        .invoices
                        .values()
                        .filter(|i| i.status == *status && i.issue_date >= since && i.issue_date <= until)
                        .collect();
                    (!matching.is_empty()).then(|| StatusTotal {
                        status: *status,
                        count: matching.len() as u64,
                        amount: matching.iter().map(|i| i.amount.amount()).sum(),
                    })
                })
                .collect())
        }
    }

    #[derive(Debug, Default)]
    struct GatewayState {
        statuses: HashMap<String, String>,
        created: Vec<RemoteInvoiceRequest>,
        cancelled: Vec<String>,
        query_log: Vec<(String, Instant)>,
        failing_documents: HashSet<String>,
        failing_references: HashSet<String>,
    }

    /// Scriptable payment processor
    #[derive(Debug, Default, Clone)]
    pub struct MockPaymentGateway {
        state: Arc<RwLock<GatewayState>>,
        latency: Arc<Mutex<Option<Duration>>>,
        fail_cancels: Arc<AtomicBool>,
        sequence: Arc<AtomicUsize>,
    }

    impl MockPaymentGateway {
        pub fn new() -> Self {
            Self::default()
        }

        /// Delays every call, for timeout tests
        pub fn with_latency(self, latency: Duration) -> Self {
            if let Ok(mut slot) = self.latency.lock() {
                *slot = Some(latency);
            }
            self
        }

        /// Sets the status the processor reports for `reference`
        pub async fn set_remote_status(&self, reference: &str, status: &str) {
            self.state.write().await.statuses.insert(reference.to_string(), status.to_string());
        }

        /// Rejects creation requests for a payer document
        pub async fn fail_creates_for(&self, document: &str) {
            self.state.write().await.failing_documents.insert(document.to_string());
        }

        /// Fails status queries for `reference`
        pub async fn fail_queries_for(&self, reference: &str) {
            self.state.write().await.failing_references.insert(reference.to_string());
        }

        pub fn set_fail_cancels(&self, fail: bool) {
            self.fail_cancels.store(fail, Ordering::SeqCst);
        }

        pub async fn created(&self) -> Vec<RemoteInvoiceRequest> {
            self.state.read().await.created.clone()
        }

        pub async fn cancelled(&self) -> Vec<String> {
            self.state.read().await.cancelled.clone()
        }

        /// References queried, with the instant of each call
        pub async fn query_log(&self) -> Vec<(String, Instant)> {
            self.state.read().await.query_log.clone()
        }

        async fn simulate_latency(&self) {
            let latency = self.latency.lock().ok().and_then(|slot| *slot);
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
        }
    }

    impl DomainPort for MockPaymentGateway {}

    #[async_trait]
    impl PaymentGateway for MockPaymentGateway {
        async fn create_invoice(&self, request: &RemoteInvoiceRequest) -> Result<RemoteInvoice, PortError> {
            self.simulate_latency().await;
            let mut state = self.state.write().await;
            if state.failing_documents.contains(&request.payer.document) {
                return Err(PortError::remote(422, format!("payer document {} rejected", request.payer.document)));
            }
            let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            state.statuses.insert(request.reference.clone(), "OPEN".to_string());
            state.created.push(request.clone());
            Ok(RemoteInvoice {
                external_id: format!("inv_mock_{:06}", n),
                artifacts: PaymentArtifacts {
                    digitable_line: Some(format!("00190.00009 {:05}.{:06}", n, n)),
                    barcode: Some(format!("0019{:040}", n)),
                    qr_payload: Some(format!("pix://mock/{}", request.reference)),
                    document_url: Some(format!("https://processor.test/invoices/{}.pdf", request.reference)),
                },
            })
        }

        async fn query_invoice(&self, reference: &str) -> Result<String, PortError> {
            self.simulate_latency().await;
            let mut state = self.state.write().await;
            state.query_log.push((reference.to_string(), Instant::now()));
            if state.failing_references.contains(reference) {
                return Err(PortError::ServiceUnavailable { service: "mock-processor".to_string() });
            }
            state
                .statuses
                .get(reference)
                .cloned()
                .ok_or_else(|| PortError::not_found("RemoteInvoice", reference))
        }

        async fn cancel_invoice(&self, reference: &str) -> Result<(), PortError> {
            self.simulate_latency().await;
            if self.fail_cancels.load(Ordering::SeqCst) {
                return Err(PortError::remote(502, "cancel rejected"));
            }
            let mut state = self.state.write().await;
            state.statuses.insert(reference.to_string(), "CANCELLED".to_string());
            state.cancelled.push(reference.to_string());
            Ok(())
        }
    }

    /// Notification channel that keeps every delivered message
    #[derive(Debug, Default, Clone)]
    pub struct RecordingChannel {
        sent: Arc<RwLock<Vec<OutboundMessage>>>,
        failing_recipients: Arc<RwLock<HashSet<String>>>,
    }

    impl RecordingChannel {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn fail_for(&self, recipient: &str) {
            self.failing_recipients.write().await.insert(recipient.to_string());
        }

        pub async fn sent(&self) -> Vec<OutboundMessage> {
            self.sent.read().await.clone()
        }
    }

    impl DomainPort for RecordingChannel {}

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn send(&self, message: &OutboundMessage) -> Result<(), PortError> {
            if self.failing_recipients.read().await.contains(&message.recipient) {
                return Err(PortError::connection(format!("mailbox {} unreachable", message.recipient)));
            }
            self.sent.write().await.push(message.clone());
            Ok(())
        }
    }

    /// Event sink that keeps every event
    #[derive(Debug, Default, Clone)]
    pub struct RecordingEvents {
        events: Arc<Mutex<Vec<BillingEvent>>>,
    }

    impl RecordingEvents {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<BillingEvent> {
            self.events.lock().map(|events| events.clone()).unwrap_or_default()
        }
    }

    impl BillingEvents for RecordingEvents {
        fn emit(&self, event: BillingEvent) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event);
            }
        }
    }

    /// Fixed settings
    #[derive(Debug, Default, Clone)]
    pub struct StaticSettings {
        values: HashMap<String, String>,
        unavailable: bool,
    }

    impl StaticSettings {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, key: &str, value: &str) -> Self {
            self.values.insert(key.to_string(), value.to_string());
            self
        }

        pub fn unavailable() -> Self {
            Self {
                values: HashMap::new(),
                unavailable: true,
            }
        }
    }

    impl DomainPort for StaticSettings {}

    #[async_trait]
    impl SettingsSource for StaticSettings {
        async fn load_settings(&self) -> Result<HashMap<String, String>, PortError> {
            if self.unavailable {
                return Err(PortError::connection("settings store unreachable"));
            }
            Ok(self.values.clone())
        }
    }
}
