//! Pre-built Test Fixtures
//!
//! Provides ready-to-use test data for the billing domain. These fixtures
//! are consistent and predictable so tests can assert on exact values.

use chrono::NaiveDate;
use core_kernel::{Currency, CustomerId, InvoiceId, Money, PlanId, SubscriptionId};
use domain_billing::config::keys;
use domain_billing::{Customer, Plan, PostalAddress, StaticSettings};
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Shorthand for a calendar date in tests
///
/// # Panics
///
/// Panics if the date does not exist
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Fixture for Money test data
pub struct MoneyFixtures;

impl MoneyFixtures {
    pub fn brl(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::BRL)
    }

    /// Standard monthly plan price
    pub fn brl_50() -> Money {
        Money::new(dec!(50.00), Currency::BRL)
    }

    /// Principal used in the overdue charge scenarios
    pub fn brl_100() -> Money {
        Money::new(dec!(100.00), Currency::BRL)
    }

    pub fn brl_zero() -> Money {
        Money::zero(Currency::BRL)
    }
}

/// Fixture for the calendar used across scenarios
pub struct TemporalFixtures;

impl TemporalFixtures {
    /// Subscription start (Jan 1, 2024)
    pub fn subscription_start() -> NaiveDate {
        date(2024, 1, 1)
    }

    /// First monthly due date for billing day 10
    pub fn first_due() -> NaiveDate {
        date(2024, 1, 10)
    }

    /// Second monthly due date for billing day 10
    pub fn second_due() -> NaiveDate {
        date(2024, 2, 10)
    }

    /// Leap-year end of February
    pub fn leap_february_end() -> NaiveDate {
        date(2024, 2, 29)
    }
}

/// Fixture for identifier test data
pub struct IdFixtures;

impl IdFixtures {
    pub fn customer_id() -> CustomerId {
        CustomerId::from_uuid(Uuid::parse_str("550e8400-e29b-41d4-a716-446655440001").unwrap())
    }

    pub fn plan_id() -> PlanId {
        PlanId::from_uuid(Uuid::parse_str("550e8400-e29b-41d4-a716-446655440002").unwrap())
    }

    pub fn subscription_id() -> SubscriptionId {
        SubscriptionId::from_uuid(Uuid::parse_str("550e8400-e29b-41d4-a716-446655440003").unwrap())
    }

    pub fn invoice_id() -> InvoiceId {
        InvoiceId::from_uuid(Uuid::parse_str("550e8400-e29b-41d4-a716-446655440004").unwrap())
    }
}

/// Fixture for customers and plans
pub struct PartyFixtures;

impl PartyFixtures {
    /// Individual customer with a usable e-mail
    pub fn customer() -> Customer {
        let mut customer = Customer::new("Maria Souza", "123.456.789-00").with_email("maria@example.test");
        customer.phone = Some("+55 11 98888-0000".to_string());
        customer.address = Some(Self::address());
        customer
    }

    /// Company customer with a usable e-mail
    pub fn company() -> Customer {
        Customer::new("Acme Monitoramento Ltda", "12.345.678/0001-90").with_email("finance@acme.test")
    }

    /// Customer with no way to receive notices
    pub fn uncontactable() -> Customer {
        Customer::new("No Mail", "987.654.321-00")
    }

    pub fn address() -> PostalAddress {
        PostalAddress {
            street: "Rua das Flores, 100".to_string(),
            city: "Sao Paulo".to_string(),
            state: "SP".to_string(),
            zip_code: "01000-000".to_string(),
        }
    }

    /// Monthly plan priced at 50.00
    pub fn basic_plan() -> Plan {
        Plan {
            id: PlanId::new(),
            name: "Basic".to_string(),
            amount: MoneyFixtures::brl_50(),
        }
    }
}

/// Fixture for business settings
pub struct SettingsFixtures;

impl SettingsFixtures {
    /// Default settings with no spacing between processor queries
    pub fn fast() -> StaticSettings {
        StaticSettings::new()
            .with(keys::RECONCILE_SPACING_MS, "0")
            .with(keys::SENDER_NAME, "Billing Team")
            .with(keys::SENDER_EMAIL, "billing@example.test")
    }

    /// Settings whose reminder schedule is a single offset
    pub fn single_reminder(days: i64) -> StaticSettings {
        Self::fast().with(keys::REMINDER_DAYS, &days.to_string())
    }
}
