//! Subscriptions, plans and customers
//!
//! A subscription pairs a customer with a plan and carries the billing
//! schedule: a billing day-of-month and a periodicity. Subscriptions are
//! never deleted; they leave the billable set through status transitions or
//! by reaching their end date.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::ValidateEmail;

use core_kernel::calendar::{self, Periodicity, YearMonth};
use core_kernel::{CustomerId, Money, PlanId, SubscriptionId};

use crate::error::BillingError;

/// Subscription lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Cancelled and expired subscriptions never come back
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Cancelled | SubscriptionStatus::Expired)
    }
}

impl FromStr for SubscriptionStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "paused" => Ok(SubscriptionStatus::Paused),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(BillingError::validation(format!("unknown subscription status '{}'", other))),
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Customer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    Active,
    Inactive,
}

/// Postal address sent to the payment processor with the payer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

/// A billed customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Tax document (CPF/CNPJ or equivalent) identifying the payer
    pub document: String,
    pub address: Option<PostalAddress>,
    pub status: CustomerStatus,
}

impl Customer {
    pub fn new(name: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            id: CustomerId::new_v7(),
            name: name.into(),
            email: None,
            phone: None,
            document: document.into(),
            address: None,
            status: CustomerStatus::Active,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// E-mail address usable for notifications, if any
    pub fn contact_address(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| email.to_string().validate_email())
    }

    /// Document with punctuation stripped, as the processor expects it
    pub fn document_digits(&self) -> String {
        self.document.chars().filter(char::is_ascii_digit).collect()
    }
}

/// A priced plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub amount: Money,
}

/// A recurring billing arrangement between a customer and a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub customer_id: CustomerId,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    /// Day of month (1-31) the invoice falls due
    pub billing_day: u32,
    pub periodicity: Periodicity,
    /// Overrides the plan amount when set
    pub custom_amount: Option<Money>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Creates an active subscription
    pub fn new(
        customer_id: CustomerId,
        plan_id: PlanId,
        start_date: NaiveDate,
        billing_day: u32,
        periodicity: Periodicity,
    ) -> Self {
        Self {
            id: SubscriptionId::new_v7(),
            customer_id,
            plan_id,
            status: SubscriptionStatus::Active,
            start_date,
            end_date: None,
            billing_day,
            periodicity,
            custom_amount: None,
            created_at: Utc::now(),
        }
    }

    /// Returns true if the subscription should be billed on `today`
    pub fn is_billable_on(&self, today: NaiveDate) -> bool {
        self.status == SubscriptionStatus::Active
            && self.start_date <= today
            && self.end_date.map_or(true, |end| end >= today)
    }

    /// Suspends billing
    pub fn pause(&mut self) -> Result<(), BillingError> {
        self.transition(SubscriptionStatus::Active, SubscriptionStatus::Paused)
    }

    /// Resumes a paused subscription
    pub fn resume(&mut self) -> Result<(), BillingError> {
        self.transition(SubscriptionStatus::Paused, SubscriptionStatus::Active)
    }

    /// Terminates the subscription
    pub fn cancel(&mut self) -> Result<(), BillingError> {
        if self.status.is_terminal() {
            return Err(BillingError::InvalidOperation(format!(
                "subscription {} is already {}",
                self.id, self.status
            )));
        }
        self.status = SubscriptionStatus::Cancelled;
        Ok(())
    }

    /// Marks the subscription expired once its end date has passed
    ///
    /// Returns true when the status changed.
    pub fn expire_if_ended(&mut self, today: NaiveDate) -> bool {
        match self.end_date {
            Some(end) if end < today && !self.status.is_terminal() => {
                self.status = SubscriptionStatus::Expired;
                true
            }
            _ => false,
        }
    }

    fn transition(&mut self, from: SubscriptionStatus, to: SubscriptionStatus) -> Result<(), BillingError> {
        if self.status != from {
            return Err(BillingError::InvalidOperation(format!(
                "cannot move subscription {} from {} to {}",
                self.id, self.status, to
            )));
        }
        self.status = to;
        Ok(())
    }
}

/// An active subscription joined with its customer and plan, ready to bill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillableSubscription {
    pub subscription: Subscription,
    pub customer: Customer,
    pub plan: Plan,
}

impl BillableSubscription {
    /// Amount billed per cycle: the subscription override, else the plan price
    pub fn amount(&self) -> Money {
        self.subscription.custom_amount.unwrap_or(self.plan.amount)
    }

    /// Rejects input that must never reach the payment gateway
    pub fn validate(&self) -> Result<(), BillingError> {
        calendar::validate_billing_day(self.subscription.billing_day)?;
        if !self.amount().is_positive() {
            return Err(BillingError::validation(format!(
                "subscription {} has non-positive amount {}",
                self.subscription.id,
                self.amount()
            )));
        }
        if self.customer.document_digits().is_empty() {
            return Err(BillingError::validation(format!(
                "customer {} has no payer document",
                self.customer.id
            )));
        }
        Ok(())
    }

    /// Due date of the invoice to issue on `today`, if one is due
    ///
    /// `last_due` is the due date of the subscription's most recent
    /// non-cancelled invoice. Without one, the first due date is computed
    /// from today. Otherwise the schedule is anchored on `last_due` and
    /// stepped by the periodicity; a due date already in the past is skipped
    /// (no back-billing). The next invoice is issued once its due month has
    /// arrived, or right away when the period falling in the current month
    /// was skipped, so that month is not left without an invoice.
    pub fn scheduled_due_date(
        &self,
        last_due: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<Option<NaiveDate>, BillingError> {
        let sub = &self.subscription;
        let Some(previous) = last_due else {
            return Ok(Some(calendar::next_due_date(sub.periodicity, sub.billing_day, today)?));
        };

        let current_month = YearMonth::of(today);
        let mut skipped_current_month = false;
        let mut next = calendar::following_due_date(sub.periodicity, sub.billing_day, previous)?;
        while next < today {
            skipped_current_month |= YearMonth::of(next) == current_month;
            next = calendar::following_due_date(sub.periodicity, sub.billing_day, next)?;
        }

        if YearMonth::of(next) <= current_month || skipped_current_month {
            Ok(Some(next))
        } else {
            Ok(None)
        }
    }

    /// Invoice description naming the plan and the billed month
    pub fn description_for(&self, due_date: NaiveDate) -> String {
        format!("Subscription {} - {}", self.plan.name, due_date.format("%m/%Y"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Currency;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn billable(billing_day: u32, periodicity: Periodicity) -> BillableSubscription {
        let customer = Customer::new("Acme Ltda", "12.345.678/0001-90").with_email("billing@acme.test");
        let plan = Plan {
            id: PlanId::new(),
            name: "Monitoring".to_string(),
            amount: Money::new(dec!(50.00), Currency::BRL),
        };
        let subscription = Subscription::new(customer.id, plan.id, date(2024, 1, 1), billing_day, periodicity);
        BillableSubscription { subscription, customer, plan }
    }

    #[test]
    fn test_first_invoice_is_scheduled_from_today() {
        let sub = billable(10, Periodicity::Monthly);
        assert_eq!(sub.scheduled_due_date(None, date(2024, 1, 10)).unwrap(), Some(date(2024, 1, 10)));
        assert_eq!(sub.scheduled_due_date(None, date(2024, 1, 11)).unwrap(), Some(date(2024, 2, 10)));
    }

    #[test]
    fn test_next_invoice_waits_for_its_month() {
        let sub = billable(10, Periodicity::Monthly);
        let last = Some(date(2024, 1, 10));
        assert_eq!(sub.scheduled_due_date(last, date(2024, 1, 10)).unwrap(), None);
        assert_eq!(sub.scheduled_due_date(last, date(2024, 1, 31)).unwrap(), None);
        assert_eq!(sub.scheduled_due_date(last, date(2024, 2, 1)).unwrap(), Some(date(2024, 2, 10)));
        assert_eq!(sub.scheduled_due_date(last, date(2024, 2, 10)).unwrap(), Some(date(2024, 2, 10)));
    }

    #[test]
    fn test_missed_cycles_are_not_back_billed() {
        let sub = billable(10, Periodicity::Monthly);
        let last = Some(date(2024, 1, 10));
        assert_eq!(sub.scheduled_due_date(last, date(2024, 4, 5)).unwrap(), Some(date(2024, 4, 10)));
        assert_eq!(sub.scheduled_due_date(last, date(2024, 4, 20)).unwrap(), Some(date(2024, 5, 10)));
    }

    #[test]
    fn test_missed_billing_day_rolls_to_next_month() {
        let sub = billable(10, Periodicity::Monthly);
        let last = Some(date(2024, 1, 10));
        assert_eq!(sub.scheduled_due_date(last, date(2024, 2, 11)).unwrap(), Some(date(2024, 3, 10)));
        // Once issued, the rolled invoice anchors the schedule
        assert_eq!(sub.scheduled_due_date(Some(date(2024, 3, 10)), date(2024, 2, 12)).unwrap(), None);
    }

    #[test]
    fn test_quarterly_gap_does_not_issue_early() {
        let sub = billable(15, Periodicity::Quarterly);
        let last = Some(date(2024, 1, 15));
        assert_eq!(sub.scheduled_due_date(last, date(2024, 3, 20)).unwrap(), None);
        assert_eq!(sub.scheduled_due_date(last, date(2024, 4, 20)).unwrap(), Some(date(2024, 7, 15)));
    }

    #[test]
    fn test_quarterly_schedule_is_anchored_on_previous_due() {
        let sub = billable(31, Periodicity::Quarterly);
        let last = Some(date(2024, 1, 31));
        assert_eq!(sub.scheduled_due_date(last, date(2024, 2, 15)).unwrap(), None);
        assert_eq!(sub.scheduled_due_date(last, date(2024, 4, 1)).unwrap(), Some(date(2024, 4, 30)));
    }

    #[test]
    fn test_validation_rejects_bad_input() {
        let mut sub = billable(10, Periodicity::Monthly);
        sub.subscription.billing_day = 0;
        assert!(matches!(sub.validate(), Err(BillingError::Calendar(_))));

        let mut sub = billable(10, Periodicity::Monthly);
        sub.subscription.custom_amount = Some(Money::zero(Currency::BRL));
        assert!(matches!(sub.validate(), Err(BillingError::Validation(_))));

        let mut sub = billable(10, Periodicity::Monthly);
        sub.customer.document = "--".to_string();
        assert!(matches!(sub.validate(), Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_amount_prefers_override() {
        let mut sub = billable(10, Periodicity::Monthly);
        assert_eq!(sub.amount().amount(), dec!(50.00));
        sub.subscription.custom_amount = Some(Money::new(dec!(42.00), Currency::BRL));
        assert_eq!(sub.amount().amount(), dec!(42.00));
    }

    #[test]
    fn test_billable_window() {
        let mut sub = billable(10, Periodicity::Monthly).subscription;
        sub.end_date = Some(date(2024, 6, 30));
        assert!(!sub.is_billable_on(date(2023, 12, 31)));
        assert!(sub.is_billable_on(date(2024, 6, 30)));
        assert!(!sub.is_billable_on(date(2024, 7, 1)));

        sub.pause().unwrap();
        assert!(!sub.is_billable_on(date(2024, 3, 1)));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut sub = billable(10, Periodicity::Monthly).subscription;
        assert!(sub.resume().is_err());
        sub.pause().unwrap();
        sub.resume().unwrap();
        sub.end_date = Some(date(2024, 2, 1));
        assert!(sub.expire_if_ended(date(2024, 2, 2)));
        assert_eq!(sub.status, SubscriptionStatus::Expired);
        assert!(sub.cancel().is_err());
    }

    #[test]
    fn test_contact_address() {
        let customer = Customer::new("A", "1").with_email("  ");
        assert_eq!(customer.contact_address(), None);
        let customer = Customer::new("A", "1").with_email("not-an-address");
        assert_eq!(customer.contact_address(), None);
        let customer = Customer::new("A", "1").with_email("someone@");
        assert_eq!(customer.contact_address(), None);
        let customer = Customer::new("A", "1").with_email("@example.test");
        assert_eq!(customer.contact_address(), None);
        let customer = Customer::new("A", "1").with_email(" a@b.test ");
        assert_eq!(customer.contact_address(), Some("a@b.test"));
    }

    #[test]
    fn test_description_names_plan_and_month() {
        let sub = billable(10, Periodicity::Monthly);
        assert_eq!(sub.description_for(date(2024, 2, 10)), "Subscription Monitoring - 02/2024");
    }
}
