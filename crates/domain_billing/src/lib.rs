//! Billing Domain - Recurring Billing Cycle Engine
//!
//! This crate turns active subscriptions into periodic invoices, drives the
//! payment reminder and collection workflow, and keeps local invoice status
//! in sync with the external payment processor.
//!
//! # Daily Cycle
//!
//! A run of [`DailyCycle`] executes three phases in order:
//!
//! 1. **Generation**: issues the invoice for every subscription whose due
//!    month has arrived and has no invoice yet
//! 2. **Notification**: sends reminders, due-today notices and escalating
//!    overdue collection notices, at most once per invoice, kind and day
//! 3. **Reconciliation**: queries the processor for open invoices and
//!    applies the authoritative status, confirming first-time payments
//!
//! Per-item failures are collected in the [`CycleSummary`]; they never stop
//! the rest of the batch.
//!
//! # Ports
//!
//! Storage, the payment processor, outbound mail and the business settings
//! are reached through the traits in [`ports`]. HTTP implementations live in
//! [`adapters`]; the PostgreSQL store lives in `infra_db`.
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::DailyCycle;
//!
//! let cycle = DailyCycle::new(store, gateway, channel, settings);
//! let summary = cycle.run(today).await?;
//! println!("{} processed, {} failed", summary.total_processed(), summary.total_failures());
//! ```

pub mod adapters;
pub mod config;
pub mod cycle;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod generator;
pub mod invoice;
pub mod messages;
pub mod notification;
pub mod ports;
pub mod reconciler;
pub mod service;
pub mod subscription;
pub mod workers;

pub use config::BillingConfig;
pub use cycle::{CycleSummary, DailyCycle, Phase, PhaseReport, RunControl};
pub use dispatcher::{Delivery, Dispatcher};
pub use error::{BillingError, FailureKind, ItemFailure, Stage};
pub use events::{BillingEvent, BillingEvents, TracingEvents};
pub use generator::Generator;
pub use invoice::{
    CustomerInvoice, EarlyPaymentDiscount, Invoice, InvoiceKind, InvoiceQuery, InvoiceRequest,
    InvoiceStatistics, InvoiceStatus, OverdueCharges, PaymentArtifacts, PaymentTerms, StatusChange,
};
pub use notification::{NotificationKey, NotificationKind, NotificationRecord, OutboundMessage, SenderIdentity};
pub use ports::{InvoiceStore, NotificationChannel, PayerInfo, PaymentGateway, RemoteInvoice, RemoteInvoiceRequest, SettingsSource};
pub use reconciler::{Reconciled, Reconciler};
pub use service::InvoiceService;
pub use subscription::{BillableSubscription, Customer, CustomerStatus, Plan, PostalAddress, Subscription, SubscriptionStatus};

#[cfg(any(test, feature = "mock"))]
pub use ports::mock::{InMemoryInvoiceStore, MockPaymentGateway, RecordingChannel, RecordingEvents, StaticSettings};
