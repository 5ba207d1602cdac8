//! PostgreSQL store integration tests
//!
//! These start a PostgreSQL container and are ignored by default.
//! Run with `cargo test -p infra_db -- --ignored`.

use chrono::Utc;

use core_kernel::{PortError, YearMonth};
use domain_billing::{
    BillableSubscription, Customer, InvoiceQuery, InvoiceStatus, InvoiceStore, NotificationKey, NotificationKind,
    NotificationRecord, SettingsSource,
};
use infra_db::adapters::billing::{customer_to_row, plan_to_row, subscription_to_row};
use infra_db::{PostgresInvoiceStore, PostgresSettingsSource};
use test_utils::{create_isolated_test_database, date, InvoiceBuilder, PartyFixtures, SubscriptionBuilder, TestDatabase};

async fn database() -> TestDatabase {
    create_isolated_test_database()
        .await
        .expect("Failed to create test database")
}

async fn seed_customer(store: &PostgresInvoiceStore, customer: &Customer) {
    store
        .repository()
        .insert_customer(&customer_to_row(customer))
        .await
        .unwrap();
}

async fn seed_subscription(store: &PostgresInvoiceStore, billable: &BillableSubscription) {
    seed_customer(store, &billable.customer).await;
    store.repository().insert_plan(&plan_to_row(&billable.plan)).await.unwrap();
    store
        .repository()
        .insert_subscription(&subscription_to_row(&billable.subscription))
        .await
        .unwrap();
}

fn record(invoice_id: core_kernel::InvoiceId, kind: NotificationKind) -> NotificationRecord {
    NotificationRecord {
        id: core_kernel::NotificationId::new_v7(),
        key: NotificationKey::new(invoice_id, kind, date(2024, 1, 15)),
        channel: "email".to_string(),
        recipient: "maria@example.test".to_string(),
        subject: "Collection notice".to_string(),
        sent_at: Utc::now(),
    }
}

mod subscription_book_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_billable_subscriptions_are_joined_with_customer_and_plan() {
        let db = database().await;
        let store = PostgresInvoiceStore::new(db.pool().clone());
        let billable = SubscriptionBuilder::new().build();
        seed_subscription(&store, &billable).await;

        let loaded = store.billable_subscriptions(date(2024, 1, 10)).await.unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].subscription.id, billable.subscription.id);
        assert_eq!(loaded[0].customer.email.as_deref(), Some("maria@example.test"));
        assert_eq!(loaded[0].customer.address, billable.customer.address);
        assert_eq!(loaded[0].plan.amount, billable.plan.amount);
        assert_eq!(loaded[0].subscription.billing_day, 10);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_subscriptions_outside_their_window_are_not_billable() {
        let db = database().await;
        let store = PostgresInvoiceStore::new(db.pool().clone());
        let ended = SubscriptionBuilder::new().with_end_date(date(2024, 1, 31)).build();
        seed_subscription(&store, &ended).await;

        assert_eq!(store.billable_subscriptions(date(2024, 1, 31)).await.unwrap().len(), 1);
        assert!(store.billable_subscriptions(date(2024, 2, 1)).await.unwrap().is_empty());
        assert!(store.billable_subscriptions(date(2023, 12, 31)).await.unwrap().is_empty());
    }
}

mod invoice_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_invoice_is_stored_with_terms_and_artifacts() {
        let db = database().await;
        let store = PostgresInvoiceStore::new(db.pool().clone());
        let builder = InvoiceBuilder::new();
        seed_customer(&store, builder.customer()).await;
        let invoice = builder.build();

        store.insert_invoice(&invoice).await.unwrap();
        let loaded = store.get_invoice(invoice.id).await.unwrap();

        assert_eq!(loaded.reference, invoice.reference);
        assert_eq!(loaded.amount, invoice.amount);
        assert_eq!(loaded.terms, invoice.terms);
        assert_eq!(loaded.artifacts, invoice.artifacts);
        assert_eq!(loaded.status, InvoiceStatus::Pending);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_one_live_invoice_per_subscription_month() {
        let db = database().await;
        let store = PostgresInvoiceStore::new(db.pool().clone());
        let billable = SubscriptionBuilder::new().build();
        seed_subscription(&store, &billable).await;

        let mut first = InvoiceBuilder::new().with_customer(billable.customer.clone()).build();
        first.subscription_id = Some(billable.subscription.id);
        store.insert_invoice(&first).await.unwrap();

        let mut second = InvoiceBuilder::new()
            .with_customer(billable.customer.clone())
            .with_due_date(date(2024, 1, 25))
            .build();
        second.subscription_id = Some(billable.subscription.id);
        let err = store.insert_invoice(&second).await.unwrap_err();

        assert!(matches!(err, PortError::Conflict { .. }));
        assert!(store
            .invoice_exists_for_month(billable.subscription.id, YearMonth::new(2024, 1))
            .await
            .unwrap());
        assert_eq!(
            store.last_due_date(billable.subscription.id).await.unwrap(),
            Some(date(2024, 1, 10))
        );
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_open_invoices_are_listed_for_reconciliation() {
        let db = database().await;
        let store = PostgresInvoiceStore::new(db.pool().clone());
        let builder = InvoiceBuilder::new();
        seed_customer(&store, builder.customer()).await;
        let customer = builder.customer().clone();
        let open = builder.build();
        let unsent = InvoiceBuilder::new().with_customer(customer.clone()).without_external_id().build();
        let paid = InvoiceBuilder::new()
            .with_customer(customer)
            .with_status(InvoiceStatus::Paid)
            .build();
        for invoice in [&open, &unsent, &paid] {
            store.insert_invoice(invoice).await.unwrap();
        }

        let to_reconcile = store.invoices_to_reconcile(100).await.unwrap();
        assert_eq!(to_reconcile.len(), 1);
        assert_eq!(to_reconcile[0].invoice.id, open.id);
        assert_eq!(to_reconcile[0].customer.name, "Maria Souza");

        let listed = store
            .list_invoices(&InvoiceQuery {
                status: Some(InvoiceStatus::Paid),
                ..InvoiceQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, paid.id);
    }
}

mod status_and_notification_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_duplicate_notification_is_a_conflict() {
        let db = database().await;
        let store = PostgresInvoiceStore::new(db.pool().clone());
        let builder = InvoiceBuilder::new();
        seed_customer(&store, builder.customer()).await;
        let invoice = builder.build();
        store.insert_invoice(&invoice).await.unwrap();

        let first = record(invoice.id, NotificationKind::Overdue);
        assert_eq!(store.record_collection_notice(&first).await.unwrap(), 1);
        assert!(store.notification_exists(&first.key).await.unwrap());

        let mut again = record(invoice.id, NotificationKind::Overdue);
        again.key = first.key;
        let err = store.record_collection_notice(&again).await.unwrap_err();

        assert!(matches!(err, PortError::Conflict { .. }));
        assert_eq!(store.get_invoice(invoice.id).await.unwrap().collection_attempts, 1);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_status_change_is_guarded_by_current_status() {
        let db = database().await;
        let store = PostgresInvoiceStore::new(db.pool().clone());
        let builder = InvoiceBuilder::new();
        seed_customer(&store, builder.customer()).await;
        let mut invoice = builder.build();
        store.insert_invoice(&invoice).await.unwrap();

        let change = invoice.transition_to(InvoiceStatus::Paid, Utc::now()).unwrap();
        let confirmation = record(invoice.id, NotificationKind::PaymentConfirmed);
        store.apply_status_change(&change, Some(&confirmation)).await.unwrap();

        let stored = store.get_invoice(invoice.id).await.unwrap();
        assert_eq!(stored.status, InvoiceStatus::Paid);
        assert!(stored.paid_at.is_some());
        assert!(store.notification_exists(&confirmation.key).await.unwrap());

        // Replaying the same transition finds the invoice already paid
        let err = store.apply_status_change(&change, None).await.unwrap_err();
        assert!(matches!(err, PortError::Conflict { .. }));
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_status_totals_group_by_status() {
        let db = database().await;
        let store = PostgresInvoiceStore::new(db.pool().clone());
        let builder = InvoiceBuilder::new();
        seed_customer(&store, builder.customer()).await;
        let customer = builder.customer().clone();
        store.insert_invoice(&builder.build()).await.unwrap();
        store
            .insert_invoice(
                &InvoiceBuilder::new()
                    .with_customer(customer)
                    .with_status(InvoiceStatus::Paid)
                    .build(),
            )
            .await
            .unwrap();

        let totals = store.status_totals(date(2024, 1, 1), date(2024, 1, 31)).await.unwrap();

        assert_eq!(totals.len(), 2);
        assert!(totals.iter().all(|t| t.count == 1));
    }
}

mod settings_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_seeded_defaults_are_loaded_and_overridable() {
        let db = database().await;
        let settings = PostgresSettingsSource::new(db.pool().clone());

        let loaded = settings.load_settings().await.unwrap();
        assert_eq!(loaded.get("reminder_days").map(String::as_str), Some("7,3,1"));

        settings.repository().upsert("reminder_days", "5").await.unwrap();
        let loaded = settings.load_settings().await.unwrap();
        assert_eq!(loaded.get("reminder_days").map(String::as_str), Some("5"));
    }
}

mod daily_cycle_tests {
    use super::*;
    use std::sync::Arc;
    use domain_billing::{DailyCycle, MockPaymentGateway, RecordingChannel};

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_cycle_on_postgres_is_idempotent_within_a_day() {
        let db = database().await;
        let store = PostgresInvoiceStore::new(db.pool().clone());
        seed_subscription(&store, &SubscriptionBuilder::new().build()).await;
        let channel = RecordingChannel::new();
        let cycle = DailyCycle::new(
            Arc::new(store.clone()),
            Arc::new(MockPaymentGateway::new()),
            Arc::new(channel.clone()),
            Arc::new(PostgresSettingsSource::new(db.pool().clone())),
        );

        let first = cycle.run(date(2024, 1, 10)).await.unwrap();
        let second = cycle.run(date(2024, 1, 10)).await.unwrap();

        assert_eq!(first.generation.processed, 1);
        assert_eq!(second.generation.processed, 0);
        assert_eq!(channel.sent().await.len(), 1);
        let invoices = store.list_invoices(&InvoiceQuery::default()).await.unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].description, "Subscription Basic - 01/2024");
    }
}

mod health_tests {
    use super::*;
    use core_kernel::{AdapterHealth, HealthCheckable};

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_health_check_reports_healthy() {
        let db = database().await;
        let store = PostgresInvoiceStore::new(db.pool().clone());

        let result = store.health_check().await;

        assert_eq!(result.status, AdapterHealth::Healthy);
        assert_eq!(result.adapter_id, "postgres-invoice-store");
    }

    #[test]
    fn test_company_without_address_maps_to_row() {
        let row = customer_to_row(&PartyFixtures::company());
        assert_eq!(row.status, "active");
        assert!(row.street.is_none());
    }
}
