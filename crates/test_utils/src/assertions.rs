//! Custom Test Assertions
//!
//! Provides specialized assertion helpers for billing types that give
//! more meaningful error messages than standard assertions.

use core_kernel::Money;
use domain_billing::{CycleSummary, FailureKind, Invoice, InvoiceStatus, OutboundMessage, Stage};
use rust_decimal::Decimal;

/// Asserts that a Money value has exactly the given amount
///
/// # Panics
///
/// Panics if the amounts differ
pub fn assert_money_eq(actual: &Money, expected: Decimal) {
    assert_eq!(
        actual.amount(),
        expected,
        "Money mismatch: actual={} {}, expected={}",
        actual.currency().symbol(),
        actual.amount(),
        expected
    );
}

/// Asserts that two Money values are approximately equal within a tolerance
pub fn assert_money_approx_eq(actual: &Money, expected: &Money, tolerance: Decimal) {
    assert_eq!(
        actual.currency(),
        expected.currency(),
        "Currency mismatch: actual={}, expected={}",
        actual.currency(),
        expected.currency()
    );

    let diff = (actual.amount() - expected.amount()).abs();
    assert!(
        diff <= tolerance,
        "Money amounts differ by more than tolerance: actual={}, expected={}, diff={}, tolerance={}",
        actual.amount(),
        expected.amount(),
        diff,
        tolerance
    );
}

/// Asserts that a run finished every phase without item failures
pub fn assert_clean_run(summary: &CycleSummary) {
    assert!(
        summary.aborted_after.is_none(),
        "Run was aborted after {:?}",
        summary.aborted_after
    );
    let failures = summary.failures();
    assert!(failures.is_empty(), "Expected a clean run, got failures: {:#?}", failures);
}

/// Asserts that the run reported a failure for `item` at `stage` with `kind`
pub fn assert_has_failure(summary: &CycleSummary, item: &str, stage: Stage, kind: FailureKind) {
    let failures = summary.failures();
    assert!(
        failures
            .iter()
            .any(|f| f.item == item && f.stage == stage && f.kind == kind),
        "Expected a {:?}/{:?} failure for {}, got: {:#?}",
        stage,
        kind,
        item,
        failures
    );
}

/// Asserts an invoice's status
pub fn assert_invoice_status(invoice: &Invoice, expected: InvoiceStatus) {
    assert_eq!(
        invoice.status, expected,
        "Invoice {} has status {}, expected {}",
        invoice.reference, invoice.status, expected
    );
}

/// Asserts that exactly `expected` messages went to `recipient`
pub fn assert_sent_count(sent: &[OutboundMessage], recipient: &str, expected: usize) {
    let count = sent.iter().filter(|m| m.recipient == recipient).count();
    assert_eq!(
        count,
        expected,
        "Expected {} message(s) to {}, got {}: {:?}",
        expected,
        recipient,
        count,
        sent.iter().map(|m| &m.subject).collect::<Vec<_>>()
    );
}

/// Asserts that a message body contains every fragment
pub fn assert_body_contains(message: &OutboundMessage, fragments: &[&str]) {
    for fragment in fragments {
        assert!(
            message.body.contains(fragment),
            "Message '{}' does not contain '{}':\n{}",
            message.subject,
            fragment,
            message.body
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::MoneyFixtures;
    use rust_decimal_macros::dec;

    #[test]
    fn test_assert_money_eq_passes() {
        assert_money_eq(&MoneyFixtures::brl_50(), dec!(50.00));
    }

    #[test]
    #[should_panic(expected = "Money mismatch")]
    fn test_assert_money_eq_fails() {
        assert_money_eq(&MoneyFixtures::brl_50(), dec!(49.99));
    }

    #[test]
    fn test_assert_money_approx_eq_within_tolerance() {
        assert_money_approx_eq(
            &MoneyFixtures::brl(dec!(100.004)),
            &MoneyFixtures::brl_100(),
            dec!(0.01),
        );
    }
}
