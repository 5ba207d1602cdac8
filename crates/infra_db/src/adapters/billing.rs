//! PostgreSQL Invoice Store
//!
//! Implements the billing domain's `InvoiceStore` port on top of
//! [`BillingRepository`], converting between row types and domain models.
//!
//! ```rust,ignore
//! use infra_db::adapters::PostgresInvoiceStore;
//! use domain_billing::InvoiceStore;
//!
//! let store: Arc<dyn InvoiceStore> = Arc::new(PostgresInvoiceStore::new(pool));
//! let open = store.invoices_to_reconcile(100).await?;
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::{
    AdapterHealth, Currency, CustomerId, DomainPort, HealthCheckResult, HealthCheckable, InvoiceId, Money,
    Periodicity, PlanId, PortError, Rate, SubscriptionId, YearMonth,
};
use domain_billing::{
    BillableSubscription, Customer, CustomerInvoice, CustomerStatus, EarlyPaymentDiscount, Invoice, InvoiceKind,
    InvoiceQuery, InvoiceStatus, InvoiceStore, NotificationKey, NotificationKind, NotificationRecord,
    PaymentArtifacts, PaymentTerms, Plan, PostalAddress, StatusChange, Subscription, SubscriptionStatus,
};
use domain_billing::invoice::StatusTotal;

use crate::error::DatabaseError;
use crate::repositories::billing::{
    BillingRepository, CustomerRow, InvoiceFilter, InvoiceRow, NotificationRow, PlanRow, StatusChangeRow,
    SubscriptionRow,
};

const ADAPTER_ID: &str = "postgres-invoice-store";

/// PostgreSQL-backed implementation of the `InvoiceStore` port
#[derive(Debug, Clone)]
pub struct PostgresInvoiceStore {
    repository: BillingRepository,
    pool: PgPool,
}

impl PostgresInvoiceStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: BillingRepository::new(pool.clone()),
            pool,
        }
    }

    /// Returns the underlying repository, used for seeding and admin tasks
    pub fn repository(&self) -> &BillingRepository {
        &self.repository
    }

    /// Loads the customers of `rows` and pairs each invoice with its payer
    async fn with_customers(&self, rows: Vec<InvoiceRow>) -> Result<Vec<CustomerInvoice>, PortError> {
        let ids = unique(rows.iter().map(|r| r.customer_id));
        let customers: HashMap<Uuid, CustomerRow> = self
            .repository
            .customers_by_ids(&ids)
            .await?
            .into_iter()
            .map(|c| (c.customer_id, c))
            .collect();

        rows.into_iter()
            .map(|row| {
                let customer = customers
                    .get(&row.customer_id)
                    .ok_or_else(|| DatabaseError::not_found("Customer", row.customer_id))?;
                Ok(CustomerInvoice {
                    customer: row_to_customer(customer)?,
                    invoice: row_to_invoice(row)?,
                })
            })
            .collect::<Result<Vec<_>, DatabaseError>>()
            .map_err(PortError::from)
    }
}

impl DomainPort for PostgresInvoiceStore {}

#[async_trait]
impl HealthCheckable for PostgresInvoiceStore {
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();

        let result = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool).await;

        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(_) => HealthCheckResult {
                adapter_id: ADAPTER_ID.to_string(),
                status: AdapterHealth::Healthy,
                latency_ms,
                message: None,
                checked_at: Utc::now(),
            },
            Err(e) => HealthCheckResult {
                adapter_id: ADAPTER_ID.to_string(),
                status: AdapterHealth::Unhealthy,
                latency_ms,
                message: Some(format!("Database error: {}", e)),
                checked_at: Utc::now(),
            },
        }
    }
}

#[async_trait]
impl InvoiceStore for PostgresInvoiceStore {
    #[instrument(skip(self))]
    async fn billable_subscriptions(&self, today: NaiveDate) -> Result<Vec<BillableSubscription>, PortError> {
        debug!("Loading billable subscriptions");

        let subscriptions = self.repository.billable_subscriptions(today).await?;
        if subscriptions.is_empty() {
            return Ok(Vec::new());
        }

        let customer_ids = unique(subscriptions.iter().map(|s| s.customer_id));
        let plan_ids = unique(subscriptions.iter().map(|s| s.plan_id));
        let customers: HashMap<Uuid, CustomerRow> = self
            .repository
            .customers_by_ids(&customer_ids)
            .await?
            .into_iter()
            .map(|c| (c.customer_id, c))
            .collect();
        let plans: HashMap<Uuid, PlanRow> = self
            .repository
            .plans_by_ids(&plan_ids)
            .await?
            .into_iter()
            .map(|p| (p.plan_id, p))
            .collect();

        subscriptions
            .into_iter()
            .map(|row| {
                let customer = customers
                    .get(&row.customer_id)
                    .ok_or_else(|| DatabaseError::not_found("Customer", row.customer_id))?;
                let plan = plans
                    .get(&row.plan_id)
                    .ok_or_else(|| DatabaseError::not_found("Plan", row.plan_id))?;
                let plan = row_to_plan(plan)?;
                Ok(BillableSubscription {
                    customer: row_to_customer(customer)?,
                    subscription: row_to_subscription(row, plan.amount.currency())?,
                    plan,
                })
            })
            .collect::<Result<Vec<_>, DatabaseError>>()
            .map_err(PortError::from)
    }

    async fn last_due_date(&self, subscription_id: SubscriptionId) -> Result<Option<NaiveDate>, PortError> {
        Ok(self.repository.last_due_date(subscription_id.into()).await?)
    }

    async fn invoice_exists_for_month(
        &self,
        subscription_id: SubscriptionId,
        month: YearMonth,
    ) -> Result<bool, PortError> {
        let first = month.first_day().map_err(|e| PortError::validation(e.to_string()))?;
        let last = month.last_day().map_err(|e| PortError::validation(e.to_string()))?;
        Ok(self
            .repository
            .invoice_exists_between(subscription_id.into(), first, last)
            .await?)
    }

    #[instrument(skip(self, invoice), fields(reference = %invoice.reference))]
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), PortError> {
        debug!("Inserting invoice");
        Ok(self.repository.insert_invoice(&invoice_to_row(invoice)).await?)
    }

    async fn get_invoice(&self, id: InvoiceId) -> Result<Invoice, PortError> {
        let row = self.repository.get_invoice(id.into()).await?;
        Ok(row_to_invoice(row)?)
    }

    async fn list_invoices(&self, query: &InvoiceQuery) -> Result<Vec<Invoice>, PortError> {
        let filter = InvoiceFilter {
            status: query.status.map(|s| s.as_str().to_string()),
            customer_id: query.customer_id.map(Uuid::from),
            due_from: query.due_from,
            due_to: query.due_to,
            limit: i64::from(query.effective_limit()),
        };
        self.repository
            .list_invoices(&filter)
            .await?
            .into_iter()
            .map(row_to_invoice)
            .collect::<Result<Vec<_>, DatabaseError>>()
            .map_err(PortError::from)
    }

    async fn invoices_due_on(
        &self,
        due_date: NaiveDate,
        statuses: &[InvoiceStatus],
    ) -> Result<Vec<CustomerInvoice>, PortError> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows = self.repository.invoices_due_on(due_date, &statuses).await?;
        self.with_customers(rows).await
    }

    async fn notification_exists(&self, key: &NotificationKey) -> Result<bool, PortError> {
        Ok(self
            .repository
            .notification_exists(key.invoice_id.into(), key.kind.as_str(), key.day)
            .await?)
    }

    #[instrument(skip(self, record), fields(key = %record.key))]
    async fn record_notification(&self, record: &NotificationRecord) -> Result<(), PortError> {
        Ok(self.repository.record_notification(&notification_to_row(record)).await?)
    }

    #[instrument(skip(self, record), fields(key = %record.key))]
    async fn record_collection_notice(&self, record: &NotificationRecord) -> Result<u32, PortError> {
        let attempts = self
            .repository
            .record_collection_notice(&notification_to_row(record))
            .await?;
        Ok(u32::try_from(attempts).unwrap_or(0))
    }

    async fn invoices_to_reconcile(&self, limit: u32) -> Result<Vec<CustomerInvoice>, PortError> {
        let rows = self.repository.invoices_to_reconcile(i64::from(limit)).await?;
        self.with_customers(rows).await
    }

    #[instrument(skip(self, change, notification), fields(invoice_id = %change.invoice_id, to = %change.to))]
    async fn apply_status_change(
        &self,
        change: &StatusChange,
        notification: Option<&NotificationRecord>,
    ) -> Result<(), PortError> {
        debug!(from = %change.from, "Applying status change");
        let row = StatusChangeRow {
            invoice_id: change.invoice_id.into(),
            from_status: change.from.as_str().to_string(),
            to_status: change.to.as_str().to_string(),
            paid_at: change.paid_at,
        };
        let notification = notification.map(notification_to_row);
        Ok(self.repository.apply_status_change(&row, notification.as_ref()).await?)
    }

    async fn status_totals(&self, since: NaiveDate, until: NaiveDate) -> Result<Vec<StatusTotal>, PortError> {
        self.repository
            .status_totals(since, until)
            .await?
            .into_iter()
            .map(|row| {
                Ok(StatusTotal {
                    status: parse_status(&row.status)?,
                    count: u64::try_from(row.count).unwrap_or(0),
                    amount: row.amount,
                })
            })
            .collect::<Result<Vec<_>, DatabaseError>>()
            .map_err(PortError::from)
    }
}

// ============================================================================
// Row conversion
// ============================================================================

fn unique(ids: impl Iterator<Item = Uuid>) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = ids.collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn decode_error(field: &str, value: &str, error: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::SerializationError(format!("invalid {} '{}': {}", field, value, error))
}

fn parse_currency(value: &str) -> Result<Currency, DatabaseError> {
    value
        .trim()
        .parse::<Currency>()
        .map_err(|e| decode_error("currency", value, e))
}

fn parse_status(value: &str) -> Result<InvoiceStatus, DatabaseError> {
    value
        .parse::<InvoiceStatus>()
        .map_err(|e| decode_error("invoice status", value, e))
}

fn row_to_customer(row: &CustomerRow) -> Result<Customer, DatabaseError> {
    let status = match row.status.as_str() {
        "active" => CustomerStatus::Active,
        "inactive" => CustomerStatus::Inactive,
        other => return Err(decode_error("customer status", other, "unknown value")),
    };
    let address = match (&row.street, &row.city, &row.state, &row.zip_code) {
        (Some(street), Some(city), Some(state), Some(zip_code)) => Some(PostalAddress {
            street: street.clone(),
            city: city.clone(),
            state: state.clone(),
            zip_code: zip_code.clone(),
        }),
        _ => None,
    };
    Ok(Customer {
        id: CustomerId::from_uuid(row.customer_id),
        name: row.name.clone(),
        email: row.email.clone(),
        phone: row.phone.clone(),
        document: row.document.clone(),
        address,
        status,
    })
}

fn row_to_plan(row: &PlanRow) -> Result<Plan, DatabaseError> {
    Ok(Plan {
        id: PlanId::from_uuid(row.plan_id),
        name: row.name.clone(),
        amount: Money::new(row.amount, parse_currency(&row.currency)?),
    })
}

/// Custom amounts are billed in the plan's currency
fn row_to_subscription(row: SubscriptionRow, currency: Currency) -> Result<Subscription, DatabaseError> {
    let status = row
        .status
        .parse::<SubscriptionStatus>()
        .map_err(|e| decode_error("subscription status", &row.status, e))?;
    let periodicity = row
        .periodicity
        .parse::<Periodicity>()
        .map_err(|e| decode_error("periodicity", &row.periodicity, e))?;
    let billing_day =
        u32::try_from(row.billing_day).map_err(|e| decode_error("billing day", &row.billing_day.to_string(), e))?;
    let custom_amount = row.custom_amount.map(|amount| Money::new(amount, currency));

    Ok(Subscription {
        id: SubscriptionId::from_uuid(row.subscription_id),
        customer_id: CustomerId::from_uuid(row.customer_id),
        plan_id: PlanId::from_uuid(row.plan_id),
        status,
        start_date: row.start_date,
        end_date: row.end_date,
        billing_day,
        periodicity,
        custom_amount,
        created_at: row.created_at,
    })
}

fn row_to_invoice(row: InvoiceRow) -> Result<Invoice, DatabaseError> {
    let currency = parse_currency(&row.currency)?;
    let kind = row
        .kind
        .parse::<InvoiceKind>()
        .map_err(|e| decode_error("invoice kind", &row.kind, e))?;
    let discount = match (row.discount_amount, row.discount_deadline) {
        (Some(amount), Some(deadline)) => Some(EarlyPaymentDiscount {
            amount: Money::new(amount, currency),
            deadline,
        }),
        _ => None,
    };

    Ok(Invoice {
        id: InvoiceId::from_uuid(row.invoice_id),
        reference: row.reference,
        customer_id: CustomerId::from_uuid(row.customer_id),
        subscription_id: row.subscription_id.map(SubscriptionId::from_uuid),
        plan_id: row.plan_id.map(PlanId::from_uuid),
        kind,
        amount: Money::new(row.amount, currency),
        description: row.description,
        issue_date: row.issue_date,
        due_date: row.due_date,
        status: parse_status(&row.status)?,
        paid_at: row.paid_at,
        terms: PaymentTerms {
            late_fee: Rate::new(row.late_fee_rate),
            daily_interest: Rate::new(row.daily_interest_rate),
            discount,
        },
        external_id: row.external_id,
        collection_attempts: u32::try_from(row.collection_attempts).unwrap_or(0),
        artifacts: PaymentArtifacts {
            digitable_line: row.digitable_line,
            barcode: row.barcode,
            qr_payload: row.qr_payload,
            document_url: row.document_url,
        },
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn invoice_to_row(invoice: &Invoice) -> InvoiceRow {
    InvoiceRow {
        invoice_id: invoice.id.into(),
        reference: invoice.reference.clone(),
        customer_id: invoice.customer_id.into(),
        subscription_id: invoice.subscription_id.map(Uuid::from),
        plan_id: invoice.plan_id.map(Uuid::from),
        kind: invoice.kind.as_str().to_string(),
        amount: invoice.amount.amount(),
        currency: invoice.currency().code().to_string(),
        description: invoice.description.clone(),
        issue_date: invoice.issue_date,
        due_date: invoice.due_date,
        status: invoice.status.as_str().to_string(),
        paid_at: invoice.paid_at,
        late_fee_rate: invoice.terms.late_fee.as_decimal(),
        daily_interest_rate: invoice.terms.daily_interest.as_decimal(),
        discount_amount: invoice.terms.discount.map(|d| d.amount.amount()),
        discount_deadline: invoice.terms.discount.map(|d| d.deadline),
        external_id: invoice.external_id.clone(),
        collection_attempts: i32::try_from(invoice.collection_attempts).unwrap_or(i32::MAX),
        digitable_line: invoice.artifacts.digitable_line.clone(),
        barcode: invoice.artifacts.barcode.clone(),
        qr_payload: invoice.artifacts.qr_payload.clone(),
        document_url: invoice.artifacts.document_url.clone(),
        created_at: invoice.created_at,
        updated_at: invoice.updated_at,
    }
}

fn notification_to_row(record: &NotificationRecord) -> NotificationRow {
    NotificationRow {
        notification_id: record.id.into(),
        invoice_id: record.key.invoice_id.into(),
        kind: record.key.kind.as_str().to_string(),
        sent_on: record.key.day,
        channel: record.channel.clone(),
        recipient: record.recipient.clone(),
        subject: record.subject.clone(),
        sent_at: record.sent_at,
    }
}

/// Inverse of [`notification_to_row`], used by tests and admin tooling
pub fn row_to_notification(row: &NotificationRow) -> Result<NotificationRecord, DatabaseError> {
    let kind = row
        .kind
        .parse::<NotificationKind>()
        .map_err(|e| decode_error("notification kind", &row.kind, e))?;
    Ok(NotificationRecord {
        id: row.notification_id.into(),
        key: NotificationKey::new(InvoiceId::from_uuid(row.invoice_id), kind, row.sent_on),
        channel: row.channel.clone(),
        recipient: row.recipient.clone(),
        subject: row.subject.clone(),
        sent_at: row.sent_at,
    })
}

/// Domain customer to row, used when seeding the subscription book
pub fn customer_to_row(customer: &Customer) -> CustomerRow {
    let address = customer.address.as_ref();
    CustomerRow {
        customer_id: customer.id.into(),
        name: customer.name.clone(),
        email: customer.email.clone(),
        phone: customer.phone.clone(),
        document: customer.document.clone(),
        street: address.map(|a| a.street.clone()),
        city: address.map(|a| a.city.clone()),
        state: address.map(|a| a.state.clone()),
        zip_code: address.map(|a| a.zip_code.clone()),
        status: match customer.status {
            CustomerStatus::Active => "active",
            CustomerStatus::Inactive => "inactive",
        }
        .to_string(),
    }
}

pub fn plan_to_row(plan: &Plan) -> PlanRow {
    PlanRow {
        plan_id: plan.id.into(),
        name: plan.name.clone(),
        amount: plan.amount.amount(),
        currency: plan.amount.currency().code().to_string(),
    }
}

pub fn subscription_to_row(subscription: &Subscription) -> SubscriptionRow {
    SubscriptionRow {
        subscription_id: subscription.id.into(),
        customer_id: subscription.customer_id.into(),
        plan_id: subscription.plan_id.into(),
        status: subscription.status.as_str().to_string(),
        start_date: subscription.start_date,
        end_date: subscription.end_date,
        billing_day: i16::try_from(subscription.billing_day).unwrap_or(i16::MAX),
        periodicity: subscription.periodicity.as_str().to_string(),
        custom_amount: subscription.custom_amount.map(|m| m.amount()),
        created_at: subscription.created_at,
    }
}
