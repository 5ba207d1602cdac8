//! Property-Based Test Generators
//!
//! Provides proptest strategies for generating random billing data
//! that maintains domain invariants.

use chrono::NaiveDate;
use core_kernel::{Currency, Money, Periodicity};
use domain_billing::InvoiceStatus;
use proptest::prelude::*;

/// Strategy for a valid billing day of month
pub fn billing_day_strategy() -> impl Strategy<Value = u32> {
    1u32..=31
}

/// Strategy for any date between 2000 and 2099
pub fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    (2000i32..2100, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN))
}

/// Strategy for every supported periodicity
pub fn periodicity_strategy() -> impl Strategy<Value = Periodicity> {
    prop_oneof![
        Just(Periodicity::Monthly),
        Just(Periodicity::Bimonthly),
        Just(Periodicity::Quarterly),
        Just(Periodicity::Semiannual),
        Just(Periodicity::Annual),
    ]
}

/// Strategy for positive amounts in minor units
pub fn positive_amount_minor_strategy() -> impl Strategy<Value = i64> {
    1i64..100_000_000i64
}

/// Strategy for positive BRL amounts
pub fn brl_money_strategy() -> impl Strategy<Value = Money> {
    positive_amount_minor_strategy().prop_map(|minor| Money::from_minor(minor, Currency::BRL))
}

/// Strategy for days past due
pub fn days_overdue_strategy() -> impl Strategy<Value = i64> {
    0i64..3650
}

/// Strategy for any invoice status
pub fn invoice_status_strategy() -> impl Strategy<Value = InvoiceStatus> {
    prop_oneof![
        Just(InvoiceStatus::Pending),
        Just(InvoiceStatus::Paid),
        Just(InvoiceStatus::Overdue),
        Just(InvoiceStatus::Cancelled),
    ]
}

/// Strategy for raw status strings a processor might report
pub fn processor_status_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("paid".to_string()),
        Just("PAID".to_string()),
        Just("overdue".to_string()),
        Just("cancelled".to_string()),
        Just("OPEN".to_string()),
        "[a-z]{0,12}",
    ]
}
