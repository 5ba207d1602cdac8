//! Plain-text rendering of customer notifications

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt::Write;

use crate::invoice::{Invoice, OverdueCharges};
use crate::notification::{NotificationKind, OutboundMessage, SenderIdentity};
use crate::subscription::Customer;

/// What a message announces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Reminder { days_left: i64 },
    DueToday,
    Overdue(OverdueCharges),
    PaymentConfirmed { paid_at: DateTime<Utc> },
}

impl Notice {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notice::Reminder { .. } => NotificationKind::Reminder,
            Notice::DueToday => NotificationKind::DueToday,
            Notice::Overdue(_) => NotificationKind::Overdue,
            Notice::PaymentConfirmed { .. } => NotificationKind::PaymentConfirmed,
        }
    }

    pub fn subject(&self) -> String {
        match self {
            Notice::Reminder { days_left } => format!("Reminder: invoice due in {}", days(*days_left)),
            Notice::DueToday => "URGENT: invoice due today".to_string(),
            Notice::Overdue(charges) => format!("Collection notice: invoice {} overdue", days(charges.days_overdue)),
            Notice::PaymentConfirmed { .. } => "Payment confirmed".to_string(),
        }
    }
}

fn days(n: i64) -> String {
    if n == 1 {
        "1 day".to_string()
    } else {
        format!("{} days", n)
    }
}

/// Renders `notice` for `invoice`, addressed to `recipient`
pub fn render(
    notice: &Notice,
    invoice: &Invoice,
    customer: &Customer,
    recipient: &str,
    sender: &SenderIdentity,
    today: NaiveDate,
) -> OutboundMessage {
    let mut body = String::new();
    let _ = writeln!(body, "Hello {},", customer.name);
    let _ = writeln!(body);

    match notice {
        Notice::Reminder { days_left } => {
            let _ = writeln!(
                body,
                "Your invoice {} is due in {}, on {}.",
                invoice.reference,
                days(*days_left),
                invoice.due_date.format("%d/%m/%Y")
            );
            let _ = writeln!(body, "Amount: {}", invoice.amount);
            if let Some(discount) = invoice.terms.discount_on(today) {
                let _ = writeln!(
                    body,
                    "Pay by {} to receive a discount of {}.",
                    discount.deadline.format("%d/%m/%Y"),
                    discount.amount
                );
            }
            let _ = writeln!(body, "Paying on time avoids late fees and interest.");
        }
        Notice::DueToday => {
            let _ = writeln!(body, "Your invoice {} is due today.", invoice.reference);
            let _ = writeln!(body, "Amount: {}", invoice.amount);
            let _ = writeln!(body, "Pay today to avoid late fees and interest.");
        }
        Notice::Overdue(charges) => {
            let _ = writeln!(
                body,
                "Your invoice {} due on {} is {} overdue.",
                invoice.reference,
                invoice.due_date.format("%d/%m/%Y"),
                days(charges.days_overdue)
            );
            let _ = writeln!(body);
            let _ = writeln!(body, "Original amount: {}", charges.principal);
            let _ = writeln!(body, "Late fee ({}): {}", invoice.terms.late_fee, charges.late_fee);
            let _ = writeln!(body, "Interest ({}): {}", days(charges.days_overdue), charges.interest);
            let _ = writeln!(body, "Updated amount: {}", charges.total);
        }
        Notice::PaymentConfirmed { paid_at } => {
            let _ = writeln!(
                body,
                "We received your payment of {} for invoice {}.",
                invoice.amount, invoice.reference
            );
            let _ = writeln!(body, "Payment date: {}", paid_at.format("%d/%m/%Y %H:%M"));
            let _ = writeln!(body, "Thank you!");
        }
    }

    if !matches!(notice, Notice::PaymentConfirmed { .. }) {
        let _ = writeln!(body);
        if let Some(line) = &invoice.artifacts.digitable_line {
            let _ = writeln!(body, "Payment code: {}", line);
        }
        if let Some(qr) = &invoice.artifacts.qr_payload {
            let _ = writeln!(body, "Instant payment: {}", qr);
        }
        if let Some(url) = &invoice.artifacts.document_url {
            let _ = writeln!(body, "Invoice document: {}", url);
        }
    }

    let _ = writeln!(body);
    let _ = write!(body, "{}", sender.name);

    OutboundMessage {
        sender: sender.clone(),
        recipient: recipient.to_string(),
        subject: notice.subject(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{InvoiceRequest, PaymentArtifacts, PaymentTerms};
    use core_kernel::{Currency, Money};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn invoice() -> (Invoice, Customer) {
        let customer = Customer::new("Maria Silva", "12345678909").with_email("maria@example.test");
        let request = InvoiceRequest::one_off(
            customer.clone(),
            Money::new(dec!(100.00), Currency::BRL),
            "Subscription Pro - 03/2024",
            date(2024, 3, 10),
        );
        let artifacts = PaymentArtifacts {
            digitable_line: Some("00190.00009 01234.567890".into()),
            ..Default::default()
        };
        (Invoice::issued(&request, "SB20240301ABCDEF01".into(), date(2024, 3, 1), "ext".into(), artifacts), customer)
    }

    #[test]
    fn test_subjects() {
        assert_eq!(Notice::Reminder { days_left: 1 }.subject(), "Reminder: invoice due in 1 day");
        assert_eq!(Notice::Reminder { days_left: 7 }.subject(), "Reminder: invoice due in 7 days");
        assert_eq!(Notice::DueToday.subject(), "URGENT: invoice due today");
        assert_eq!(Notice::PaymentConfirmed { paid_at: Utc::now() }.subject(), "Payment confirmed");
    }

    #[test]
    fn test_overdue_body_shows_breakdown() {
        let (invoice, customer) = invoice();
        let charges = OverdueCharges::compute(invoice.amount, &PaymentTerms::default(), 10).unwrap();
        let message = render(
            &Notice::Overdue(charges),
            &invoice,
            &customer,
            "maria@example.test",
            &SenderIdentity::default(),
            date(2024, 3, 20),
        );

        assert_eq!(message.subject, "Collection notice: invoice 10 days overdue");
        assert!(message.body.contains("Original amount: R$ 100.00"));
        assert!(message.body.contains("Late fee (2%): R$ 2.00"));
        assert!(message.body.contains("Interest (10 days): R$ 0.33"));
        assert!(message.body.contains("Updated amount: R$ 102.33"));
        assert!(message.body.contains("Payment code: 00190.00009 01234.567890"));
    }

    #[test]
    fn test_reminder_mentions_due_date() {
        let (invoice, customer) = invoice();
        let message = render(
            &Notice::Reminder { days_left: 3 },
            &invoice,
            &customer,
            "maria@example.test",
            &SenderIdentity::default(),
            date(2024, 3, 7),
        );
        assert_eq!(message.recipient, "maria@example.test");
        assert!(message.body.starts_with("Hello Maria Silva,"));
        assert!(message.body.contains("due in 3 days, on 10/03/2024"));
    }
}
