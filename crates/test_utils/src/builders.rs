//! Test Data Builders
//!
//! Provides builder patterns for constructing test data with sensible defaults.
//! These builders allow tests to specify only the relevant fields while using
//! defaults for everything else.

use chrono::{NaiveDate, Utc};
use core_kernel::{InvoiceId, Money, Periodicity};
use domain_billing::invoice::generate_reference;
use domain_billing::{
    BillableSubscription, Customer, Invoice, InvoiceKind, InvoiceStatus, PaymentArtifacts, PaymentTerms, Plan,
    Subscription, SubscriptionStatus,
};

use crate::fixtures::{MoneyFixtures, PartyFixtures, TemporalFixtures};

/// Builder for a subscription together with its customer and plan
pub struct SubscriptionBuilder {
    customer: Customer,
    plan: Plan,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    billing_day: u32,
    periodicity: Periodicity,
    status: SubscriptionStatus,
    custom_amount: Option<Money>,
}

impl Default for SubscriptionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionBuilder {
    /// Monthly subscription on day 10, 50.00, active from Jan 1, 2024
    pub fn new() -> Self {
        Self {
            customer: PartyFixtures::customer(),
            plan: PartyFixtures::basic_plan(),
            start_date: TemporalFixtures::subscription_start(),
            end_date: None,
            billing_day: 10,
            periodicity: Periodicity::Monthly,
            status: SubscriptionStatus::Active,
            custom_amount: None,
        }
    }

    pub fn with_customer(mut self, customer: Customer) -> Self {
        self.customer = customer;
        self
    }

    /// Sets the plan price
    pub fn with_plan_amount(mut self, amount: Money) -> Self {
        self.plan.amount = amount;
        self
    }

    pub fn with_start_date(mut self, date: NaiveDate) -> Self {
        self.start_date = date;
        self
    }

    pub fn with_end_date(mut self, date: NaiveDate) -> Self {
        self.end_date = Some(date);
        self
    }

    pub fn with_billing_day(mut self, day: u32) -> Self {
        self.billing_day = day;
        self
    }

    pub fn with_periodicity(mut self, periodicity: Periodicity) -> Self {
        self.periodicity = periodicity;
        self
    }

    pub fn with_status(mut self, status: SubscriptionStatus) -> Self {
        self.status = status;
        self
    }

    /// Overrides the plan price for this subscription only
    pub fn with_custom_amount(mut self, amount: Money) -> Self {
        self.custom_amount = Some(amount);
        self
    }

    pub fn build(self) -> BillableSubscription {
        let mut subscription = Subscription::new(
            self.customer.id,
            self.plan.id,
            self.start_date,
            self.billing_day,
            self.periodicity,
        );
        subscription.status = self.status;
        subscription.end_date = self.end_date;
        subscription.custom_amount = self.custom_amount;

        BillableSubscription {
            subscription,
            customer: self.customer,
            plan: self.plan,
        }
    }
}

/// Builder for invoices already known to the processor
pub struct InvoiceBuilder {
    customer: Customer,
    amount: Money,
    issue_date: NaiveDate,
    due_date: NaiveDate,
    status: InvoiceStatus,
    terms: PaymentTerms,
    external_id: Option<String>,
    collection_attempts: u32,
    description: String,
}

impl Default for InvoiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InvoiceBuilder {
    /// Pending one-off invoice of 100.00 due Jan 10, 2024
    pub fn new() -> Self {
        Self {
            customer: PartyFixtures::customer(),
            amount: MoneyFixtures::brl_100(),
            issue_date: TemporalFixtures::subscription_start(),
            due_date: TemporalFixtures::first_due(),
            status: InvoiceStatus::Pending,
            terms: PaymentTerms::default(),
            external_id: Some("inv_fixture_000001".to_string()),
            collection_attempts: 0,
            description: "Monitoring services".to_string(),
        }
    }

    pub fn with_customer(mut self, customer: Customer) -> Self {
        self.customer = customer;
        self
    }

    pub fn with_amount(mut self, amount: Money) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_issue_date(mut self, date: NaiveDate) -> Self {
        self.issue_date = date;
        self
    }

    pub fn with_due_date(mut self, date: NaiveDate) -> Self {
        self.due_date = date;
        self
    }

    pub fn with_status(mut self, status: InvoiceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_terms(mut self, terms: PaymentTerms) -> Self {
        self.terms = terms;
        self
    }

    /// Marks the invoice as never registered at the processor
    pub fn without_external_id(mut self) -> Self {
        self.external_id = None;
        self
    }

    pub fn with_collection_attempts(mut self, attempts: u32) -> Self {
        self.collection_attempts = attempts;
        self
    }

    /// Customer the invoice is billed to
    pub fn customer(&self) -> &Customer {
        &self.customer
    }

    pub fn build(self) -> Invoice {
        let now = Utc::now();
        Invoice {
            id: InvoiceId::new_v7(),
            reference: generate_reference(self.issue_date),
            customer_id: self.customer.id,
            subscription_id: None,
            plan_id: None,
            kind: InvoiceKind::OneOff,
            amount: self.amount,
            description: self.description,
            issue_date: self.issue_date,
            due_date: self.due_date,
            status: self.status,
            paid_at: (self.status == InvoiceStatus::Paid).then_some(now),
            terms: self.terms,
            external_id: self.external_id,
            collection_attempts: self.collection_attempts,
            artifacts: PaymentArtifacts {
                digitable_line: Some("23790.12345 60000.000000 00000.000000 1 00000000010000".to_string()),
                barcode: Some("23791000000000100001234560000000000000000000".to_string()),
                qr_payload: None,
                document_url: Some("https://processor.test/invoices/fixture.pdf".to_string()),
            },
            created_at: now,
            updated_at: now,
        }
    }
}
