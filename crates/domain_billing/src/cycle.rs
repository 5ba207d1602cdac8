//! The daily billing cycle
//!
//! Runs the three phases in order: generation, notification,
//! reconciliation. Each phase depends on what the previous one persisted, so
//! they never overlap. Within a phase items are processed independently and
//! a failing item never stops the others.
//!
//! A run can be aborted between phases through [`RunControl`]. Every item
//! commit is atomic, so a run stopped at a phase boundary leaves consistent
//! state and can simply be re-run.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::BillingConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{BillingError, ItemFailure};
use crate::events::{BillingEvent, BillingEvents, TracingEvents};
use crate::generator::Generator;
use crate::ports::{InvoiceStore, NotificationChannel, PaymentGateway, SettingsSource};
use crate::reconciler::Reconciler;
use crate::service::InvoiceService;

/// Step of a daily run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Loading the business configuration
    Configuration,
    Generation,
    Notification,
    Reconciliation,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Configuration => "configuration",
            Phase::Generation => "generation",
            Phase::Notification => "notification",
            Phase::Reconciliation => "reconciliation",
        };
        f.write_str(name)
    }
}

/// Outcome of one phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    /// Items that produced their side effect (invoice issued, message sent, status updated)
    pub processed: usize,
    /// Items examined that needed nothing this run
    pub skipped: usize,
    pub errors: Vec<ItemFailure>,
}

impl PhaseReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Structured result of a daily run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub date: NaiveDate,
    pub generation: PhaseReport,
    /// `None` when the run was aborted before this phase
    pub notifications: Option<PhaseReport>,
    pub reconciliation: Option<PhaseReport>,
    /// Last completed phase when the run was aborted
    pub aborted_after: Option<Phase>,
    pub elapsed_ms: u64,
}

impl CycleSummary {
    fn reports(&self) -> impl Iterator<Item = &PhaseReport> {
        std::iter::once(&self.generation)
            .chain(self.notifications.as_ref())
            .chain(self.reconciliation.as_ref())
    }

    pub fn total_processed(&self) -> usize {
        self.reports().map(|r| r.processed).sum()
    }

    pub fn total_failures(&self) -> usize {
        self.reports().map(|r| r.errors.len()).sum()
    }

    /// Every failure of the run, in phase order
    pub fn failures(&self) -> Vec<&ItemFailure> {
        self.reports().flat_map(|r| r.errors.iter()).collect()
    }
}

/// Cooperative abort flag checked between phases
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    aborted: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Entry point of the daily billing run
#[derive(Clone)]
pub struct DailyCycle {
    store: Arc<dyn InvoiceStore>,
    gateway: Arc<dyn PaymentGateway>,
    channel: Arc<dyn NotificationChannel>,
    settings: Arc<dyn SettingsSource>,
    events: Arc<dyn BillingEvents>,
}

impl DailyCycle {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        gateway: Arc<dyn PaymentGateway>,
        channel: Arc<dyn NotificationChannel>,
        settings: Arc<dyn SettingsSource>,
    ) -> Self {
        Self {
            store,
            gateway,
            channel,
            settings,
            events: Arc::new(TracingEvents),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn BillingEvents>) -> Self {
        self.events = events;
        self
    }

    /// Reads the business configuration for a run
    pub async fn load_config(&self) -> Result<BillingConfig, BillingError> {
        let settings = self
            .settings
            .load_settings()
            .await
            .map_err(|e| BillingError::configuration(format!("settings unavailable: {}", e)))?;
        BillingConfig::from_settings(&settings)
    }

    /// Invoice service wired to the same collaborators as the cycle
    pub fn invoice_service(&self, config: &BillingConfig) -> InvoiceService {
        InvoiceService::new(Arc::clone(&self.store), Arc::clone(&self.gateway))
            .with_events(Arc::clone(&self.events))
            .with_gateway_timeout(config.gateway_timeout)
    }

    /// Runs the whole cycle for `date`
    pub async fn run(&self, date: NaiveDate) -> Result<CycleSummary, BillingError> {
        self.run_with(date, &RunControl::new()).await
    }

    /// Runs the cycle for `date`, stopping at the first phase boundary after `control` is aborted
    ///
    /// Per-item failures are collected in the summary. Only a failure that
    /// prevents a phase from running at all (configuration unreadable,
    /// candidate listing failed) aborts the run with `BillingError::RunFailed`.
    pub async fn run_with(&self, date: NaiveDate, control: &RunControl) -> Result<CycleSummary, BillingError> {
        let started = Instant::now();
        self.events.emit(BillingEvent::RunStarted { date });

        let config = self
            .load_config()
            .await
            .map_err(|e| BillingError::run_failed(Phase::Configuration, e))?;

        let generator = Generator::new(Arc::clone(&self.store), self.invoice_service(&config))
            .with_events(Arc::clone(&self.events));
        let generation = generator
            .generate(date, &config)
            .await
            .map_err(|e| BillingError::run_failed(Phase::Generation, e))?;
        self.phase_completed(Phase::Generation, &generation);

        let mut summary = CycleSummary {
            date,
            generation,
            notifications: None,
            reconciliation: None,
            aborted_after: None,
            elapsed_ms: 0,
        };

        if control.is_aborted() {
            return Ok(self.aborted(summary, Phase::Generation, started));
        }

        let dispatcher = Dispatcher::new(Arc::clone(&self.store), Arc::clone(&self.channel))
            .with_events(Arc::clone(&self.events));
        let notifications = dispatcher
            .dispatch(date, &config)
            .await
            .map_err(|e| BillingError::run_failed(Phase::Notification, e))?;
        self.phase_completed(Phase::Notification, &notifications);
        summary.notifications = Some(notifications);

        if control.is_aborted() {
            return Ok(self.aborted(summary, Phase::Notification, started));
        }

        let reconciler = Reconciler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.gateway),
            Arc::clone(&self.channel),
        )
        .with_events(Arc::clone(&self.events));
        let reconciliation = reconciler
            .reconcile(date, &config)
            .await
            .map_err(|e| BillingError::run_failed(Phase::Reconciliation, e))?;
        self.phase_completed(Phase::Reconciliation, &reconciliation);
        summary.reconciliation = Some(reconciliation);

        summary.elapsed_ms = elapsed_ms(started);
        self.events.emit(BillingEvent::RunFinished {
            date,
            processed: summary.total_processed(),
            failed: summary.total_failures(),
            elapsed_ms: summary.elapsed_ms,
        });
        Ok(summary)
    }

    fn phase_completed(&self, phase: Phase, report: &PhaseReport) {
        self.events.emit(BillingEvent::PhaseCompleted {
            phase,
            processed: report.processed,
            failed: report.errors.len(),
        });
    }

    fn aborted(&self, mut summary: CycleSummary, after: Phase, started: Instant) -> CycleSummary {
        self.events.emit(BillingEvent::RunAborted { after });
        summary.aborted_after = Some(after);
        summary.elapsed_ms = elapsed_ms(started);
        summary
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
