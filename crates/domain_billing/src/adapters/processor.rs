//! Payment processor adapter
//!
//! REST client for the bank-slip processor. It implements `PaymentGateway`
//! over three calls (create, query, cancel) keyed by our invoice reference.
//!
//! # Authentication
//!
//! Every call carries a bearer token obtained through the OAuth2
//! client-credentials grant. The token is cached until shortly before it
//! expires. The processor also requires mutual TLS, so the client is built
//! with the certificate and private key configured in `ProcessorConfig`.
//!
//! # Error Handling
//!
//! HTTP failures are mapped to `PortError` variants:
//! - 404 -> `PortError::NotFound`
//! - 401/403 -> `PortError::Unauthorized`
//! - 429 -> `PortError::RateLimited`
//! - 5xx -> `PortError::ServiceUnavailable`
//! - Timeouts -> `PortError::Timeout`
//! - Other -> `PortError::Internal`
//!
//! Transient failures count against the circuit breaker; while it is open
//! calls fail fast with `ServiceUnavailable`.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Identity, RequestBuilder, Response, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

use core_kernel::{AdapterHealth, CircuitBreakerConfig, DomainPort, HealthCheckResult, HealthCheckable, PortError};

use crate::invoice::PaymentArtifacts;
use crate::ports::{PaymentGateway, RemoteInvoice, RemoteInvoiceRequest};

const ADAPTER_ID: &str = "payment-processor";

/// Tokens are refreshed this long before the processor says they expire
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Connection settings for the payment processor
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Base URL of the processor API, without trailing slash
    pub base_url: String,
    /// Token endpoint; defaults to `{base_url}/token`
    pub token_url: Option<String>,
    pub client_id: String,
    pub client_secret: Option<String>,
    /// PEM client certificate for mutual TLS
    pub certificate_path: Option<PathBuf>,
    /// PEM private key matching `certificate_path`
    pub private_key_path: Option<PathBuf>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://matls-clients.api.cora.com.br".to_string(),
            token_url: None,
            client_id: String::new(),
            client_secret: None,
            certificate_path: None,
            private_key_path: None,
            timeout_secs: 30,
            circuit_breaker: Some(CircuitBreakerConfig {
                failure_threshold: 5,
                success_threshold: 3,
                reset_timeout_secs: 60,
            }),
        }
    }
}

impl ProcessorConfig {
    fn token_endpoint(&self) -> String {
        self.token_url
            .clone()
            .unwrap_or_else(|| format!("{}/token", self.base_url.trim_end_matches('/')))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    /// Reads the mutual-TLS identity, if both PEM files are configured
    fn identity(&self) -> Result<Option<Identity>, PortError> {
        let (Some(cert), Some(key)) = (&self.certificate_path, &self.private_key_path) else {
            return Ok(None);
        };
        let mut pem = std::fs::read(cert).map_err(|e| {
            PortError::connection(format!("cannot read client certificate {}: {}", cert.display(), e))
        })?;
        let key_pem = std::fs::read(key).map_err(|e| {
            PortError::connection(format!("cannot read client key {}: {}", key.display(), e))
        })?;
        pem.push(b'\n');
        pem.extend_from_slice(&key_pem);
        Identity::from_pem(&pem)
            .map(Some)
            .map_err(|e| PortError::connection(format!("invalid client identity: {}", e)))
    }
}

/// Circuit breaker state for fault tolerance
#[derive(Debug)]
struct CircuitBreaker {
    config: CircuitBreakerConfig,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    is_open: AtomicBool,
    last_failure_time: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            is_open: AtomicBool::new(false),
            last_failure_time: RwLock::new(None),
        }
    }

    async fn is_available(&self) -> bool {
        if !self.is_open.load(Ordering::Relaxed) {
            return true;
        }

        let last_failure = self.last_failure_time.read().await;
        match *last_failure {
            // Half-open: let requests probe the processor again
            Some(time) => time.elapsed() > Duration::from_secs(self.config.reset_timeout_secs),
            None => false,
        }
    }

    fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        if !self.is_open.load(Ordering::Relaxed) {
            return;
        }
        let success = self.success_count.fetch_add(1, Ordering::Relaxed) + 1;
        if success >= u64::from(self.config.success_threshold) {
            self.is_open.store(false, Ordering::Relaxed);
            self.success_count.store(0, Ordering::Relaxed);
        }
    }

    async fn record_failure(&self) {
        self.success_count.store(0, Ordering::Relaxed);
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= u64::from(self.config.failure_threshold) {
            self.is_open.store(true, Ordering::Relaxed);
            *self.last_failure_time.write().await = Some(Instant::now());
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
struct WireAddress<'a> {
    street: &'a str,
    city: &'a str,
    state: &'a str,
    zip_code: &'a str,
}

#[derive(Debug, Serialize)]
struct WireCustomer<'a> {
    name: &'a str,
    document: &'a str,
    email: Option<&'a str>,
    address: Option<WireAddress<'a>>,
}

#[derive(Debug, Serialize)]
struct CreateInvoiceBody<'a> {
    invoice_id: &'a str,
    /// Minor units
    amount: i64,
    due_date: String,
    customer: WireCustomer<'a>,
    description: &'a str,
    fine_percentage: f64,
    interest_per_day: f64,
    /// Minor units; zero when no discount applies
    discount_amount: i64,
    discount_due_date: Option<String>,
}

impl<'a> CreateInvoiceBody<'a> {
    fn from_request(request: &'a RemoteInvoiceRequest) -> Result<Self, PortError> {
        let amount = request
            .amount
            .to_minor()
            .map_err(|e| PortError::Transformation { message: e.to_string() })?;
        let (discount_amount, discount_due_date) = match &request.terms.discount {
            Some(discount) => (
                discount
                    .amount
                    .to_minor()
                    .map_err(|e| PortError::Transformation { message: e.to_string() })?,
                Some(discount.deadline.to_string()),
            ),
            None => (0, None),
        };
        let payer = &request.payer;

        Ok(Self {
            invoice_id: &request.reference,
            amount,
            due_date: request.due_date.to_string(),
            customer: WireCustomer {
                name: &payer.name,
                document: &payer.document,
                email: payer.email.as_deref(),
                address: payer.address.as_ref().map(|a| WireAddress {
                    street: &a.street,
                    city: &a.city,
                    state: &a.state,
                    zip_code: &a.zip_code,
                }),
            },
            description: &request.description,
            fine_percentage: request.terms.late_fee.as_percentage().to_f64().unwrap_or_default(),
            interest_per_day: request.terms.daily_interest.as_percentage().to_f64().unwrap_or_default(),
            discount_amount,
            discount_due_date,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CreateInvoiceResponse {
    id: Option<String>,
    #[serde(default)]
    bar_code: Option<String>,
    #[serde(default)]
    digitable_line: Option<String>,
    #[serde(default)]
    qr_code: Option<String>,
    #[serde(default)]
    pdf_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceStatusResponse {
    #[serde(default)]
    status: Option<String>,
}

/// `PaymentGateway` backed by the processor's REST API
#[derive(Debug)]
pub struct ProcessorClient {
    config: ProcessorConfig,
    http: Client,
    token: Mutex<Option<CachedToken>>,
    circuit_breaker: Option<CircuitBreaker>,
}

impl ProcessorClient {
    /// Builds the HTTP client, loading the mutual-TLS identity when configured
    pub fn new(config: ProcessorConfig) -> Result<Self, PortError> {
        let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_secs));
        if let Some(identity) = config.identity()? {
            builder = builder.identity(identity);
        }
        let http = builder
            .build()
            .map_err(|e| PortError::connection(format!("cannot build processor client: {}", e)))?;
        let circuit_breaker = config.circuit_breaker.clone().map(CircuitBreaker::new);

        Ok(Self {
            config,
            http,
            token: Mutex::new(None),
            circuit_breaker,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Checks if the circuit breaker is open (blocking requests)
    pub async fn is_circuit_open(&self) -> bool {
        match &self.circuit_breaker {
            Some(cb) => !cb.is_available().await,
            None => false,
        }
    }

    async fn access_token(&self) -> Result<String, PortError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = self
            .http
            .post(self.config.token_endpoint())
            .form(&form)
            .send()
            .await
            .map_err(|e| self.transport_error("token", e))?;
        let body: TokenResponse = check_status(response).await?.json().await.map_err(|e| {
            PortError::Transformation {
                message: format!("invalid token response: {}", e),
            }
        })?;

        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(3600));
        let token = CachedToken {
            value: body.access_token,
            expires_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        };
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Sends an authenticated request through the circuit breaker
    async fn execute(&self, operation: &str, request: RequestBuilder) -> Result<Response, PortError> {
        if let Some(cb) = &self.circuit_breaker {
            if !cb.is_available().await {
                return Err(PortError::ServiceUnavailable {
                    service: "Circuit breaker is open".to_string(),
                });
            }
        }

        let result = self.send_authenticated(operation, request).await;

        if let Some(cb) = &self.circuit_breaker {
            match &result {
                Err(e) if e.is_transient() => cb.record_failure().await,
                _ => cb.record_success(),
            }
        }
        result
    }

    async fn send_authenticated(&self, operation: &str, request: RequestBuilder) -> Result<Response, PortError> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.transport_error(operation, e))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            // Token revoked early; the next call fetches a fresh one
            *self.token.lock().await = None;
        }
        check_status(response).await
    }

    fn transport_error(&self, operation: &str, error: reqwest::Error) -> PortError {
        if error.is_timeout() {
            PortError::timeout(operation, Duration::from_secs(self.config.timeout_secs))
        } else {
            PortError::Connection {
                message: format!("{} request failed: {}", operation, error),
                source: Some(Box::new(error)),
            }
        }
    }
}

/// Maps non-success statuses to `PortError`
async fn check_status(response: Response) -> Result<Response, PortError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after_secs = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(60);
    let path = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();

    Err(match status {
        StatusCode::NOT_FOUND => PortError::not_found("RemoteInvoice", path),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortError::Unauthorized {
            message: format!("HTTP {}: {}", status.as_u16(), body),
        },
        StatusCode::TOO_MANY_REQUESTS => PortError::RateLimited { retry_after_secs },
        s if s.is_server_error() => PortError::ServiceUnavailable {
            service: format!("{} (HTTP {})", ADAPTER_ID, s.as_u16()),
        },
        s => PortError::internal(format!("HTTP {} - {}", s.as_u16(), body)),
    })
}

impl DomainPort for ProcessorClient {}

#[async_trait]
impl PaymentGateway for ProcessorClient {
    async fn create_invoice(&self, request: &RemoteInvoiceRequest) -> Result<RemoteInvoice, PortError> {
        let body = CreateInvoiceBody::from_request(request)?;
        let response = self
            .execute("create_invoice", self.http.post(self.config.url("invoices")).json(&body))
            .await?;
        let created: CreateInvoiceResponse = response.json().await.map_err(|e| PortError::Transformation {
            message: format!("invalid create response: {}", e),
        })?;

        tracing::info!(reference = %request.reference, amount = %request.amount, "Processor invoice created");

        Ok(RemoteInvoice {
            external_id: created.id.unwrap_or_else(|| request.reference.clone()),
            artifacts: PaymentArtifacts {
                digitable_line: created.digitable_line,
                barcode: created.bar_code,
                qr_payload: created.qr_code,
                document_url: created.pdf_url,
            },
        })
    }

    async fn query_invoice(&self, reference: &str) -> Result<String, PortError> {
        let response = self
            .execute(
                "query_invoice",
                self.http.get(self.config.url(&format!("invoices/{}", reference))),
            )
            .await?;
        let body: InvoiceStatusResponse = response.json().await.map_err(|e| PortError::Transformation {
            message: format!("invalid status response: {}", e),
        })?;
        Ok(body.status.unwrap_or_else(|| "pending".to_string()))
    }

    async fn cancel_invoice(&self, reference: &str) -> Result<(), PortError> {
        self.execute(
            "cancel_invoice",
            self.http.post(self.config.url(&format!("invoices/{}/cancel", reference))),
        )
        .await?;
        tracing::info!(reference, "Processor invoice cancelled");
        Ok(())
    }
}

#[async_trait]
impl HealthCheckable for ProcessorClient {
    /// Probes the token endpoint, which exercises TLS and credentials
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();

        if self.is_circuit_open().await {
            return HealthCheckResult {
                adapter_id: ADAPTER_ID.to_string(),
                status: AdapterHealth::Degraded,
                latency_ms: 0,
                message: Some("Circuit breaker is open".to_string()),
                checked_at: Utc::now(),
            };
        }

        let result = self.access_token().await;
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let (status, message) = match result {
            Ok(_) => (AdapterHealth::Healthy, None),
            Err(e) => (AdapterHealth::Unhealthy, Some(e.to_string())),
        };

        HealthCheckResult {
            adapter_id: ADAPTER_ID.to_string(),
            status,
            latency_ms,
            message,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{EarlyPaymentDiscount, PaymentTerms};
    use crate::ports::PayerInfo;
    use chrono::NaiveDate;
    use core_kernel::{Currency, Money};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> ProcessorConfig {
        ProcessorConfig {
            base_url: server.uri(),
            client_id: "client-123".into(),
            timeout_secs: 2,
            ..Default::default()
        }
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok-1",
                "expires_in": 3600
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    fn request() -> RemoteInvoiceRequest {
        RemoteInvoiceRequest {
            reference: "SB20240110ABCDEF01".into(),
            amount: Money::new(dec!(50.00), Currency::BRL),
            due_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            description: "Subscription Basic - 01/2024".into(),
            payer: PayerInfo {
                name: "Maria".into(),
                document: "12345678900".into(),
                email: Some("maria@example.test".into()),
                address: None,
            },
            terms: PaymentTerms {
                discount: Some(EarlyPaymentDiscount {
                    amount: Money::new(dec!(5), Currency::BRL),
                    deadline: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
                }),
                ..PaymentTerms::default()
            },
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = ProcessorConfig::default();
        assert_eq!(config.timeout_secs, 30);
        assert!(config.circuit_breaker.is_some());
        assert_eq!(config.token_endpoint(), "https://matls-clients.api.cora.com.br/token");
        assert_eq!(config.url("/invoices/X"), "https://matls-clients.api.cora.com.br/invoices/X");
    }

    #[tokio::test]
    async fn test_create_sends_minor_units_and_maps_artifacts() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/invoices"))
            .and(header("authorization", "Bearer tok-1"))
            .and(body_partial_json(json!({
                "invoice_id": "SB20240110ABCDEF01",
                "amount": 5000,
                "due_date": "2024-01-10",
                "discount_amount": 500,
                "discount_due_date": "2024-01-05",
                "customer": { "document": "12345678900" }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "inv_remote_1",
                "bar_code": "2379000",
                "digitable_line": "23790.00000 00000.000000",
                "qr_code": "000201...",
                "pdf_url": "https://pdf.example/1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProcessorClient::new(config(&server)).unwrap();
        let remote = client.create_invoice(&request()).await.unwrap();

        assert_eq!(remote.external_id, "inv_remote_1");
        assert_eq!(remote.artifacts.barcode.as_deref(), Some("2379000"));
        assert_eq!(remote.artifacts.document_url.as_deref(), Some("https://pdf.example/1"));
    }

    #[tokio::test]
    async fn test_token_is_cached_between_calls() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/invoices/SB1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "paid" })))
            .expect(2)
            .mount(&server)
            .await;

        let client = ProcessorClient::new(config(&server)).unwrap();
        assert_eq!(client.query_invoice("SB1").await.unwrap(), "paid");
        assert_eq!(client.query_invoice("SB1").await.unwrap(), "paid");
    }

    #[tokio::test]
    async fn test_missing_status_reads_as_pending() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/invoices/SB2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let client = ProcessorClient::new(config(&server)).unwrap();
        assert_eq!(client.query_invoice("SB2").await.unwrap(), "pending");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        for (reference, status) in [("A", 404u16), ("B", 403), ("C", 429), ("D", 503), ("E", 422)] {
            Mock::given(method("GET"))
                .and(path(format!("/invoices/{}", reference)))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
        }

        let client = ProcessorClient::new(ProcessorConfig {
            circuit_breaker: None,
            ..config(&server)
        })
        .unwrap();

        assert!(matches!(client.query_invoice("A").await, Err(PortError::NotFound { .. })));
        assert!(matches!(client.query_invoice("B").await, Err(PortError::Unauthorized { .. })));
        assert!(matches!(client.query_invoice("C").await, Err(PortError::RateLimited { .. })));
        assert!(matches!(client.query_invoice("D").await, Err(PortError::ServiceUnavailable { .. })));
        assert!(matches!(client.query_invoice("E").await, Err(PortError::Internal { .. })));
    }

    #[tokio::test]
    async fn test_slow_processor_times_out() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/invoices/SLOW"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let client = ProcessorClient::new(ProcessorConfig {
            timeout_secs: 1,
            ..config(&server)
        })
        .unwrap();
        assert!(matches!(client.query_invoice("SLOW").await, Err(PortError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_circuit_opens_after_repeated_server_errors() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/invoices/SB9/cancel"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let client = ProcessorClient::new(ProcessorConfig {
            circuit_breaker: Some(CircuitBreakerConfig {
                failure_threshold: 2,
                success_threshold: 1,
                reset_timeout_secs: 60,
            }),
            ..config(&server)
        })
        .unwrap();

        assert!(!client.is_circuit_open().await);
        let _ = client.cancel_invoice("SB9").await;
        let _ = client.cancel_invoice("SB9").await;
        assert!(client.is_circuit_open().await);

        let blocked = client.cancel_invoice("SB9").await;
        assert!(matches!(blocked, Err(PortError::ServiceUnavailable { .. })));

        let health = client.health_check().await;
        assert_eq!(health.status, AdapterHealth::Degraded);
    }

    #[tokio::test]
    async fn test_health_check_reports_token_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = ProcessorClient::new(config(&server)).unwrap();
        let health = client.health_check().await;

        assert_eq!(health.adapter_id, "payment-processor");
        assert_eq!(health.status, AdapterHealth::Unhealthy);
    }

    #[test]
    fn test_missing_identity_files_fail_construction() {
        let result = ProcessorClient::new(ProcessorConfig {
            certificate_path: Some("/nonexistent/cert.pem".into()),
            private_key_path: Some("/nonexistent/key.pem".into()),
            ..Default::default()
        });
        assert!(matches!(result, Err(PortError::Connection { .. })));
    }
}
