//! End-to-end tests for the daily billing cycle

use std::sync::Arc;

use rust_decimal_macros::dec;

use domain_billing::config::keys;
use domain_billing::{
    BillingError, DailyCycle, FailureKind, InMemoryInvoiceStore, InvoiceStatus, MockPaymentGateway, Phase,
    RecordingChannel, RecordingEvents, RunControl, StaticSettings, Stage, BillingEvent,
};
use test_utils::{
    assert_body_contains, assert_clean_run, assert_has_failure, assert_invoice_status, assert_money_eq,
    assert_sent_count, date, InvoiceBuilder, PartyFixtures, SettingsFixtures, SubscriptionBuilder,
};

struct Harness {
    store: InMemoryInvoiceStore,
    gateway: MockPaymentGateway,
    channel: RecordingChannel,
    events: RecordingEvents,
    cycle: DailyCycle,
}

fn harness_with(settings: StaticSettings) -> Harness {
    let store = InMemoryInvoiceStore::new();
    let gateway = MockPaymentGateway::new();
    let channel = RecordingChannel::new();
    let events = RecordingEvents::new();
    let cycle = DailyCycle::new(
        Arc::new(store.clone()),
        Arc::new(gateway.clone()),
        Arc::new(channel.clone()),
        Arc::new(settings),
    )
    .with_events(Arc::new(events.clone()));
    Harness {
        store,
        gateway,
        channel,
        events,
        cycle,
    }
}

fn harness() -> Harness {
    harness_with(SettingsFixtures::fast())
}

// ============================================================================
// Daily Cycle Tests
// ============================================================================

mod daily_cycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_monthly_subscription_over_two_cycles() {
        let h = harness();
        h.store.add_subscription(SubscriptionBuilder::new().build()).await;

        let first = h.cycle.run(date(2024, 1, 10)).await.unwrap();
        assert_clean_run(&first);
        assert_eq!(first.generation.processed, 1);

        let invoices = h.store.invoices().await;
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].due_date, date(2024, 1, 10));
        assert_invoice_status(&invoices[0], InvoiceStatus::Pending);
        assert_money_eq(&invoices[0].amount, dec!(50.00));
        assert_eq!(invoices[0].description, "Subscription Basic - 01/2024");

        // Same day again: nothing new is issued or sent
        let rerun = h.cycle.run(date(2024, 1, 10)).await.unwrap();
        assert_eq!(rerun.generation.processed, 0);
        assert_eq!(rerun.notifications.as_ref().map(|n| n.processed), Some(0));
        assert_eq!(h.store.invoices().await.len(), 1);

        let second = h.cycle.run(date(2024, 2, 10)).await.unwrap();
        assert_eq!(second.generation.processed, 1);
        let due: Vec<_> = h.store.invoices().await.iter().map(|i| i.due_date).collect();
        assert_eq!(due, vec![date(2024, 1, 10), date(2024, 2, 10)]);
    }

    #[tokio::test]
    async fn test_due_today_notice_is_sent_once() {
        let h = harness();
        h.store.add_subscription(SubscriptionBuilder::new().build()).await;

        h.cycle.run(date(2024, 1, 10)).await.unwrap();
        h.cycle.run(date(2024, 1, 10)).await.unwrap();

        let sent = h.channel.sent().await;
        assert_sent_count(&sent, "maria@example.test", 1);
        assert_eq!(sent[0].subject, "URGENT: invoice due today");
        assert_eq!(sent[0].sender.email, "billing@example.test");
        assert_eq!(h.store.notifications().await.len(), 1);
    }

    #[tokio::test]
    async fn test_reminder_offsets_follow_settings() {
        let h = harness_with(SettingsFixtures::single_reminder(3));
        h.store.add_subscription(SubscriptionBuilder::new().with_billing_day(20).build()).await;

        h.cycle.run(date(2024, 1, 15)).await.unwrap();
        assert!(h.channel.sent().await.is_empty());

        h.cycle.run(date(2024, 1, 17)).await.unwrap();
        let sent = h.channel.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Reminder: invoice due in 3 days");
    }

    #[tokio::test]
    async fn test_payment_is_confirmed_exactly_once() {
        let h = harness();
        h.store.add_subscription(SubscriptionBuilder::new().build()).await;
        h.cycle.run(date(2024, 1, 10)).await.unwrap();

        let invoice = h.store.invoices().await.remove(0);
        h.gateway.set_remote_status(&invoice.reference, "paid").await;

        let summary = h.cycle.run(date(2024, 1, 11)).await.unwrap();
        assert_eq!(summary.reconciliation.as_ref().map(|r| r.processed), Some(1));

        let paid = h.store.invoice(invoice.id).await.unwrap();
        assert_invoice_status(&paid, InvoiceStatus::Paid);
        assert!(paid.paid_at.is_some());

        h.cycle.run(date(2024, 1, 12)).await.unwrap();
        let confirmations: Vec<_> = h
            .channel
            .sent()
            .await
            .into_iter()
            .filter(|m| m.subject == "Payment confirmed")
            .collect();
        assert_eq!(confirmations.len(), 1);
    }

    #[tokio::test]
    async fn test_collection_notices_escalate_up_to_the_cap() {
        let h = harness();
        let builder = InvoiceBuilder::new().with_due_date(date(2024, 1, 10));
        h.store.add_customer(builder.customer().clone()).await;
        let invoice = builder.build();
        h.gateway.set_remote_status(&invoice.reference, "OPEN").await;
        h.store.put_invoice(invoice.clone()).await;

        for day in [date(2024, 1, 15), date(2024, 1, 20), date(2024, 1, 25), date(2024, 2, 9)] {
            let summary = h.cycle.run(day).await.unwrap();
            assert_clean_run(&summary);
        }

        let notices: Vec<_> = h
            .channel
            .sent()
            .await
            .into_iter()
            .filter(|m| m.subject.starts_with("Collection notice"))
            .collect();
        assert_eq!(notices.len(), 3);
        assert_eq!(notices[1].subject, "Collection notice: invoice 10 days overdue");
        assert_body_contains(
            &notices[1],
            &[
                "Original amount: R$ 100.00",
                "Late fee (2%): R$ 2.00",
                "Interest (10 days): R$ 0.33",
                "Updated amount: R$ 102.33",
            ],
        );
        assert_eq!(h.store.invoice(invoice.id).await.unwrap().collection_attempts, 3);
    }

    #[tokio::test]
    async fn test_uncontactable_customer_is_skipped_not_failed() {
        let h = harness();
        h.store
            .add_subscription(SubscriptionBuilder::new().with_customer(PartyFixtures::uncontactable()).build())
            .await;

        let summary = h.cycle.run(date(2024, 1, 10)).await.unwrap();

        assert_clean_run(&summary);
        assert_eq!(summary.generation.processed, 1);
        assert_eq!(summary.notifications.as_ref().map(|n| n.skipped), Some(1));
        assert!(h.channel.sent().await.is_empty());
    }
}

// ============================================================================
// Failure Handling Tests
// ============================================================================

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_unreadable_settings_fail_the_run() {
        let h = harness_with(StaticSettings::unavailable());
        h.store.add_subscription(SubscriptionBuilder::new().build()).await;

        let result = h.cycle.run(date(2024, 1, 10)).await;

        assert!(matches!(
            result,
            Err(BillingError::RunFailed { phase: Phase::Configuration, .. })
        ));
        assert!(h.store.invoices().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_setting_fails_the_run() {
        let h = harness_with(SettingsFixtures::fast().with(keys::REMINDER_DAYS, "soon"));
        let result = h.cycle.run(date(2024, 1, 10)).await;
        assert!(matches!(
            result,
            Err(BillingError::RunFailed { phase: Phase::Configuration, .. })
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_offset_fails_before_any_phase() {
        let h = harness_with(SettingsFixtures::fast().with(keys::REMINDER_DAYS, "1000000000000"));
        h.store.add_subscription(SubscriptionBuilder::new().build()).await;

        let result = h.cycle.run(date(2024, 1, 10)).await;

        assert!(matches!(
            result,
            Err(BillingError::RunFailed { phase: Phase::Configuration, .. })
        ));
        assert!(h.store.invoices().await.is_empty());
        assert!(h.gateway.created().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_generation() {
        let h = harness();
        h.store.set_unavailable(true);

        let err = h.cycle.run(date(2024, 1, 10)).await.unwrap_err();

        assert!(matches!(err, BillingError::RunFailed { phase: Phase::Generation, .. }));
        assert!(err.to_string().contains("generation"));
    }

    #[tokio::test]
    async fn test_gateway_failure_is_isolated_to_its_item() {
        let h = harness();
        let healthy = SubscriptionBuilder::new().build();
        let rejected = SubscriptionBuilder::new().with_customer(PartyFixtures::company()).build();
        let rejected_id = rejected.subscription.id.to_string();
        h.store.add_subscription(healthy).await;
        h.store.add_subscription(rejected).await;
        h.gateway.fail_creates_for("12345678000190").await;

        let summary = h.cycle.run(date(2024, 1, 10)).await.unwrap();

        assert_eq!(summary.generation.processed, 1);
        assert_has_failure(&summary, &rejected_id, Stage::Generation, FailureKind::Gateway);
        assert!(summary.notifications.is_some());
        assert!(summary.reconciliation.is_some());
        assert_eq!(summary.total_failures(), 1);
    }

    #[tokio::test]
    async fn test_failed_send_is_retried_next_run() {
        let h = harness();
        h.store.add_subscription(SubscriptionBuilder::new().build()).await;
        h.channel.fail_for("maria@example.test").await;

        let summary = h.cycle.run(date(2024, 1, 10)).await.unwrap();
        assert_eq!(summary.notifications.as_ref().map(|n| n.errors.len()), Some(1));
        assert!(h.store.notifications().await.is_empty());
    }

    #[tokio::test]
    async fn test_abort_stops_at_phase_boundary() {
        let h = harness();
        h.store.add_subscription(SubscriptionBuilder::new().build()).await;
        let control = RunControl::new();
        control.abort();

        let summary = h.cycle.run_with(date(2024, 1, 10), &control).await.unwrap();

        assert_eq!(summary.aborted_after, Some(Phase::Generation));
        assert_eq!(summary.generation.processed, 1);
        assert!(summary.notifications.is_none());
        assert!(summary.reconciliation.is_none());
        assert!(h.channel.sent().await.is_empty());
        assert!(h
            .events
            .events()
            .iter()
            .any(|e| matches!(e, BillingEvent::RunAborted { after: Phase::Generation })));
    }
}

// ============================================================================
// Summary Tests
// ============================================================================

mod summary_tests {
    use super::*;

    #[tokio::test]
    async fn test_summary_serializes_to_json() {
        let h = harness();
        h.store.add_subscription(SubscriptionBuilder::new().build()).await;

        let summary = h.cycle.run(date(2024, 1, 10)).await.unwrap();
        let json = serde_json::to_value(&summary).unwrap();

        assert_eq!(json["date"], "2024-01-10");
        assert_eq!(json["generation"]["processed"], 1);
        assert_eq!(json["notifications"]["processed"], 1);
        assert!(json["aborted_after"].is_null());
        assert!(json["reconciliation"]["errors"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_emits_lifecycle_events() {
        let h = harness();
        h.cycle.run(date(2024, 1, 10)).await.unwrap();

        let events = h.events.events();
        assert!(matches!(events.first(), Some(BillingEvent::RunStarted { .. })));
        assert!(matches!(events.last(), Some(BillingEvent::RunFinished { .. })));
        let phases = events
            .iter()
            .filter(|e| matches!(e, BillingEvent::PhaseCompleted { .. }))
            .count();
        assert_eq!(phases, 3);
    }
}
