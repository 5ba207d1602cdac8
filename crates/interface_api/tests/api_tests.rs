//! HTTP surface tests against in-memory adapters

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{json, Value};

use domain_billing::{
    DailyCycle, InMemoryInvoiceStore, InvoiceStatus, MockPaymentGateway, RecordingChannel,
};
use interface_api::dto::billing::InvoiceResponse;
use interface_api::{create_router, AppState};
use test_utils::{date, InvoiceBuilder, SettingsFixtures, SubscriptionBuilder};

struct Harness {
    store: InMemoryInvoiceStore,
    gateway: MockPaymentGateway,
    server: TestServer,
}

fn harness() -> Harness {
    let store = InMemoryInvoiceStore::new();
    let gateway = MockPaymentGateway::new();
    let cycle = DailyCycle::new(
        Arc::new(store.clone()),
        Arc::new(gateway.clone()),
        Arc::new(RecordingChannel::new()),
        Arc::new(SettingsFixtures::fast()),
    );
    let state = AppState::new(cycle, chrono_tz::America::Sao_Paulo).with_health_check(Arc::new(store.clone()));
    let server = TestServer::new(create_router(state)).unwrap();
    Harness { store, gateway, server }
}

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_reports_adapters() {
        let h = harness();

        let response = h.server.get("/health").await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["adapters"][0]["adapter_id"], "in-memory-invoice-store");
    }

    #[tokio::test]
    async fn test_unreachable_store_is_unhealthy() {
        let h = harness();
        h.store.set_unavailable(true);

        let response = h.server.get("/health").await;

        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.json::<Value>()["status"], "unhealthy");
    }
}

mod cycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_run_returns_summary() {
        let h = harness();
        h.store.add_subscription(SubscriptionBuilder::new().build()).await;

        let response = h
            .server
            .post("/api/v1/billing/cycle/run")
            .json(&json!({ "date": "2024-01-10" }))
            .await;

        response.assert_status_ok();
        let summary: Value = response.json();
        assert_eq!(summary["date"], "2024-01-10");
        assert_eq!(summary["generation"]["processed"], 1);
        assert_eq!(h.gateway.created().await.len(), 1);
    }

    #[tokio::test]
    async fn test_run_failure_is_service_unavailable() {
        let h = harness();
        h.store.set_unavailable(true);

        let response = h
            .server
            .post("/api/v1/billing/cycle/run")
            .json(&json!({ "date": "2024-01-10" }))
            .await;

        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.json::<Value>()["error"], "unavailable");
    }
}

mod invoice_tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_open_invoice() {
        let h = harness();
        let invoice = InvoiceBuilder::new().build();
        h.store.put_invoice(invoice.clone()).await;

        let response = h
            .server
            .post(&format!("/api/v1/billing/invoices/{}/cancel", invoice.id))
            .json(&json!({ "reason": "customer request" }))
            .await;

        response.assert_status_ok();
        let body: InvoiceResponse = response.json();
        assert_eq!(body.status, InvoiceStatus::Cancelled);
        assert_eq!(h.gateway.cancelled().await, vec![invoice.reference]);
    }

    #[tokio::test]
    async fn test_cancel_paid_invoice_is_conflict() {
        let h = harness();
        let invoice = InvoiceBuilder::new().with_status(InvoiceStatus::Paid).build();
        h.store.put_invoice(invoice.clone()).await;

        let response = h
            .server
            .post(&format!("/api/v1/billing/invoices/{}/cancel", invoice.id))
            .await;

        response.assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_cancel_unknown_invoice_is_not_found() {
        let h = harness();

        let response = h
            .server
            .post(&format!("/api/v1/billing/invoices/{}/cancel", uuid::Uuid::new_v4()))
            .await;

        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let h = harness();
        h.store.put_invoice(InvoiceBuilder::new().build()).await;
        h.store
            .put_invoice(InvoiceBuilder::new().with_status(InvoiceStatus::Paid).build())
            .await;

        let response = h
            .server
            .get("/api/v1/billing/invoices")
            .add_query_param("status", "paid")
            .await;

        response.assert_status_ok();
        let invoices: Vec<InvoiceResponse> = response.json();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn test_list_limit_is_validated() {
        let h = harness();

        let response = h
            .server
            .get("/api/v1/billing/invoices")
            .add_query_param("limit", "0")
            .await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.json::<Value>()["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_list_rejects_inverted_range() {
        let h = harness();

        let response = h
            .server
            .get("/api/v1/billing/invoices")
            .add_query_param("from", "2024-02-01")
            .add_query_param("to", "2024-01-01")
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
    }
}

mod statistics_tests {
    use super::*;

    #[tokio::test]
    async fn test_statistics_over_window() {
        let h = harness();
        h.store
            .put_invoice(InvoiceBuilder::new().with_issue_date(date(2024, 1, 5)).build())
            .await;
        h.store
            .put_invoice(
                InvoiceBuilder::new()
                    .with_issue_date(date(2024, 1, 6))
                    .with_status(InvoiceStatus::Paid)
                    .build(),
            )
            .await;

        let response = h
            .server
            .get("/api/v1/billing/statistics")
            .add_query_param("days", "30")
            .add_query_param("until", "2024-01-15")
            .await;

        response.assert_status_ok();
        let report: Value = response.json();
        assert_eq!(report["total"], 2);
        assert_eq!(report["pending"], 1);
        assert_eq!(report["paid"], 1);
    }

    #[tokio::test]
    async fn test_statistics_window_is_validated() {
        let h = harness();

        let response = h
            .server
            .get("/api/v1/billing/statistics")
            .add_query_param("days", "0")
            .await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

        let response = h
            .server
            .get("/api/v1/billing/statistics")
            .add_query_param("days", "367")
            .await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }
}
