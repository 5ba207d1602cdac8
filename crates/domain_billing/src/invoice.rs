//! Invoices
//!
//! An invoice is one billable document with a due date. Its status is only
//! advanced by reconciliation against the payment processor or by explicit
//! cancellation; `paid` and `cancelled` are terminal.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use core_kernel::calendar;
use core_kernel::{Currency, CustomerId, InvoiceId, Money, MoneyError, PlanId, Rate, SubscriptionId};

use crate::error::BillingError;
use crate::subscription::Customer;

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Issued, awaiting payment
    Pending,
    /// Settled at the processor
    Paid,
    /// Past due date according to the processor
    Overdue,
    /// Voided
    Cancelled,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 4] = [
        InvoiceStatus::Pending,
        InvoiceStatus::Paid,
        InvoiceStatus::Overdue,
        InvoiceStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    /// Maps a payment processor status onto the local vocabulary
    ///
    /// Anything the processor reports that is not paid, overdue or
    /// cancelled is treated as still pending.
    pub fn from_processor(remote: &str) -> Self {
        match remote.trim().to_ascii_lowercase().as_str() {
            "paid" => InvoiceStatus::Paid,
            "overdue" | "late" => InvoiceStatus::Overdue,
            "cancelled" | "canceled" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }

    /// Open invoices are still collectable
    pub fn is_open(&self) -> bool {
        matches!(self, InvoiceStatus::Pending | InvoiceStatus::Overdue)
    }

    /// Status only ever moves forward through the lifecycle
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, next),
            (Pending, Paid) | (Pending, Overdue) | (Pending, Cancelled) | (Overdue, Paid) | (Overdue, Cancelled)
        )
    }
}

impl FromStr for InvoiceStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvoiceStatus::Pending),
            "paid" => Ok(InvoiceStatus::Paid),
            "overdue" => Ok(InvoiceStatus::Overdue),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            other => Err(BillingError::validation(format!("unknown invoice status '{}'", other))),
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an invoice was produced by a subscription schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    Recurring,
    OneOff,
}

impl InvoiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceKind::Recurring => "recurring",
            InvoiceKind::OneOff => "one_off",
        }
    }
}

impl FromStr for InvoiceKind {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recurring" => Ok(InvoiceKind::Recurring),
            "one_off" => Ok(InvoiceKind::OneOff),
            other => Err(BillingError::validation(format!("unknown invoice kind '{}'", other))),
        }
    }
}

/// Early-payment discount, valid up to and including `deadline`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarlyPaymentDiscount {
    pub amount: Money,
    pub deadline: NaiveDate,
}

/// Late-payment and discount terms printed on the invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTerms {
    pub late_fee: Rate,
    pub daily_interest: Rate,
    pub discount: Option<EarlyPaymentDiscount>,
}

impl Default for PaymentTerms {
    fn default() -> Self {
        Self {
            late_fee: Rate::from_percentage(dec!(2.00)),
            daily_interest: Rate::from_percentage(dec!(0.0333)),
            discount: None,
        }
    }
}

impl PaymentTerms {
    /// Discount still claimable on `today`
    pub fn discount_on(&self, today: NaiveDate) -> Option<EarlyPaymentDiscount> {
        self.discount.filter(|discount| discount.deadline >= today)
    }
}

/// Rendered payment artifacts returned by the processor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentArtifacts {
    /// Human-readable payment code
    pub digitable_line: Option<String>,
    pub barcode: Option<String>,
    /// Instant-payment QR payload
    pub qr_payload: Option<String>,
    pub document_url: Option<String>,
}

/// Late fee and accrued interest on an overdue invoice
///
/// Presentation only: the invoice's stored amount is never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverdueCharges {
    pub principal: Money,
    pub late_fee: Money,
    pub interest: Money,
    pub total: Money,
    pub days_overdue: i64,
}

impl OverdueCharges {
    /// Computes charges for `days_overdue` days, each rounded to the currency unit
    pub fn compute(principal: Money, terms: &PaymentTerms, days_overdue: i64) -> Result<Self, MoneyError> {
        let days = Decimal::from(days_overdue.max(0));
        let late_fee = terms.late_fee.apply(&principal).round_to_currency();
        let interest = principal
            .multiply(terms.daily_interest.as_decimal() * days)
            .round_to_currency();
        let total = principal
            .round_to_currency()
            .checked_add(&late_fee)?
            .checked_add(&interest)?;

        Ok(Self {
            principal,
            late_fee,
            interest,
            total,
            days_overdue: days_overdue.max(0),
        })
    }
}

/// An issued invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    /// Our number; the idempotent reference shared with the processor
    pub reference: String,
    pub customer_id: CustomerId,
    pub subscription_id: Option<SubscriptionId>,
    pub plan_id: Option<PlanId>,
    pub kind: InvoiceKind,
    pub amount: Money,
    pub description: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub terms: PaymentTerms,
    /// Identifier assigned by the processor
    pub external_id: Option<String>,
    pub collection_attempts: u32,
    pub artifacts: PaymentArtifacts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Builds the local record of an invoice the processor has accepted
    pub fn issued(
        request: &InvoiceRequest,
        reference: String,
        issue_date: NaiveDate,
        external_id: String,
        artifacts: PaymentArtifacts,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: InvoiceId::new_v7(),
            reference,
            customer_id: request.customer.id,
            subscription_id: request.subscription_id,
            plan_id: request.plan_id,
            kind: request.kind,
            amount: request.amount,
            description: request.description.clone(),
            issue_date,
            due_date: request.due_date,
            status: InvoiceStatus::Pending,
            paid_at: None,
            terms: request.terms,
            external_id: Some(external_id),
            collection_attempts: 0,
            artifacts,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn currency(&self) -> Currency {
        self.amount.currency()
    }

    /// Signed days from `today` until the due date
    pub fn days_until_due(&self, today: NaiveDate) -> i64 {
        calendar::days_until(self.due_date, today)
    }

    /// Charges owed when paying on `today`
    pub fn overdue_charges(&self, today: NaiveDate) -> Result<OverdueCharges, MoneyError> {
        OverdueCharges::compute(self.amount, &self.terms, calendar::days_overdue(self.due_date, today))
    }

    /// Applies a forward status transition
    pub fn transition_to(&mut self, next: InvoiceStatus, at: DateTime<Utc>) -> Result<StatusChange, BillingError> {
        if !self.status.can_transition_to(next) {
            return Err(BillingError::InvalidOperation(format!(
                "invoice {} cannot move from {} to {}",
                self.reference, self.status, next
            )));
        }
        let change = StatusChange {
            invoice_id: self.id,
            from: self.status,
            to: next,
            paid_at: (next == InvoiceStatus::Paid).then_some(at),
        };
        self.status = next;
        if change.paid_at.is_some() {
            self.paid_at = change.paid_at;
        }
        self.updated_at = at;
        Ok(change)
    }
}

/// A status transition ready to persist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub invoice_id: InvoiceId,
    pub from: InvoiceStatus,
    pub to: InvoiceStatus,
    /// Set on the transition into paid
    pub paid_at: Option<DateTime<Utc>>,
}

/// Everything needed to issue an invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct InvoiceRequest {
    pub customer: Customer,
    pub subscription_id: Option<SubscriptionId>,
    pub plan_id: Option<PlanId>,
    pub kind: InvoiceKind,
    pub amount: Money,
    /// Shown on the payment slip; the processor truncates longer text
    #[validate(length(min = 1, max = 200))]
    pub description: String,
    pub due_date: NaiveDate,
    pub terms: PaymentTerms,
}

impl InvoiceRequest {
    /// A one-off invoice outside any subscription
    pub fn one_off(customer: Customer, amount: Money, description: impl Into<String>, due_date: NaiveDate) -> Self {
        Self {
            customer,
            subscription_id: None,
            plan_id: None,
            kind: InvoiceKind::OneOff,
            amount,
            description: description.into().trim().to_string(),
            due_date,
            terms: PaymentTerms::default(),
        }
    }

    pub fn with_terms(mut self, terms: PaymentTerms) -> Self {
        self.terms = terms;
        self
    }

    pub fn validate(&self, today: NaiveDate) -> Result<(), BillingError> {
        Validate::validate(self).map_err(|e| BillingError::validation(e.to_string()))?;
        if !self.amount.is_positive() {
            return Err(BillingError::validation(format!("invoice amount must be positive, got {}", self.amount)));
        }
        if self.customer.document_digits().is_empty() {
            return Err(BillingError::validation(format!("customer {} has no payer document", self.customer.id)));
        }
        if self.due_date < today {
            return Err(BillingError::validation(format!("due date {} is in the past", self.due_date)));
        }
        if let Some(discount) = self.terms.discount {
            if discount.amount.currency() != self.amount.currency() || discount.amount.amount() >= self.amount.amount() {
                return Err(BillingError::validation("discount must be smaller than the invoice amount"));
            }
        }
        Ok(())
    }
}

/// Generates the reference shared with the processor: `SB`, the issue date and 8 hex digits
pub fn generate_reference(issue_date: NaiveDate) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase();
    format!("SB{}{}", issue_date.format("%Y%m%d"), suffix)
}

/// An open invoice joined with the customer to notify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInvoice {
    pub invoice: Invoice,
    pub customer: Customer,
}

/// Filter for listing invoices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceQuery {
    pub status: Option<InvoiceStatus>,
    pub customer_id: Option<CustomerId>,
    pub due_from: Option<NaiveDate>,
    pub due_to: Option<NaiveDate>,
    pub limit: Option<u32>,
}

impl InvoiceQuery {
    pub const DEFAULT_LIMIT: u32 = 50;

    pub fn matches(&self, invoice: &Invoice) -> bool {
        self.status.map_or(true, |status| invoice.status == status)
            && self.customer_id.map_or(true, |id| invoice.customer_id == id)
            && self.due_from.map_or(true, |from| invoice.due_date >= from)
            && self.due_to.map_or(true, |to| invoice.due_date <= to)
    }

    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, 500)
    }
}

/// Count and summed amount of the invoices in one status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTotal {
    pub status: InvoiceStatus,
    pub count: u64,
    pub amount: Decimal,
}

/// Aggregate figures over invoices issued in a window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceStatistics {
    pub since: NaiveDate,
    pub until: NaiveDate,
    pub total: u64,
    pub pending: u64,
    pub paid: u64,
    pub overdue: u64,
    pub cancelled: u64,
    pub issued_amount: Money,
    pub received_amount: Money,
    pub outstanding_amount: Money,
    /// Paid invoices as a percentage of all invoices, two decimals
    pub payment_rate: Decimal,
}

impl InvoiceStatistics {
    pub fn from_totals(since: NaiveDate, until: NaiveDate, currency: Currency, totals: &[StatusTotal]) -> Self {
        let count = |status: InvoiceStatus| {
            totals.iter().filter(|t| t.status == status).map(|t| t.count).sum::<u64>()
        };
        let amount = |pred: &dyn Fn(InvoiceStatus) -> bool| {
            Money::new(
                totals.iter().filter(|t| pred(t.status)).map(|t| t.amount).sum::<Decimal>(),
                currency,
            )
        };

        let total = totals.iter().map(|t| t.count).sum::<u64>();
        let paid = count(InvoiceStatus::Paid);
        let payment_rate = if total == 0 {
            Decimal::ZERO
        } else {
            (Decimal::from(paid) * dec!(100) / Decimal::from(total)).round_dp(2)
        };

        Self {
            since,
            until,
            total,
            pending: count(InvoiceStatus::Pending),
            paid,
            overdue: count(InvoiceStatus::Overdue),
            cancelled: count(InvoiceStatus::Cancelled),
            issued_amount: amount(&|_| true),
            received_amount: amount(&|s| s == InvoiceStatus::Paid),
            outstanding_amount: amount(&|s| s.is_open()),
            payment_rate,
        }
    }
}
