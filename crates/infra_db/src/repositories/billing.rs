//! Billing repository implementation
//!
//! This module provides database access for the billing cycle: the
//! subscription book (customers, plans, subscriptions), invoices and the
//! notification log that de-duplicates customer messages.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::DatabaseError;

const INVOICE_COLUMNS: &str = r#"
    invoice_id, reference, customer_id, subscription_id, plan_id, kind,
    amount, currency, description, issue_date, due_date, status, paid_at,
    late_fee_rate, daily_interest_rate, discount_amount, discount_deadline,
    external_id, collection_attempts, digitable_line, barcode, qr_payload,
    document_url, created_at, updated_at
"#;

/// Repository for the billing tables
///
/// Every multi-statement write runs in a single transaction so a failure
/// leaves no partial state behind.
#[derive(Debug, Clone)]
pub struct BillingRepository {
    pool: PgPool,
}

impl BillingRepository {
    /// Creates a new BillingRepository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Subscription book
    // ------------------------------------------------------------------

    pub async fn insert_customer(&self, customer: &CustomerRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO customers (
                customer_id, name, email, phone, document,
                street, city, state, zip_code, status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(customer.customer_id)
        .bind(&customer.name)
        .bind(&customer.email)
        .bind(&customer.phone)
        .bind(&customer.document)
        .bind(&customer.street)
        .bind(&customer.city)
        .bind(&customer.state)
        .bind(&customer.zip_code)
        .bind(&customer.status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_plan(&self, plan: &PlanRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO plans (plan_id, name, amount, currency)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(plan.plan_id)
        .bind(&plan.name)
        .bind(plan.amount)
        .bind(&plan.currency)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_subscription(&self, subscription: &SubscriptionRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                subscription_id, customer_id, plan_id, status, start_date,
                end_date, billing_day, periodicity, custom_amount, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(subscription.subscription_id)
        .bind(subscription.customer_id)
        .bind(subscription.plan_id)
        .bind(&subscription.status)
        .bind(subscription.start_date)
        .bind(subscription.end_date)
        .bind(subscription.billing_day)
        .bind(&subscription.periodicity)
        .bind(subscription.custom_amount)
        .bind(subscription.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Active subscriptions of active customers whose validity covers `today`
    pub async fn billable_subscriptions(&self, today: NaiveDate) -> Result<Vec<SubscriptionRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT
                s.subscription_id, s.customer_id, s.plan_id, s.status, s.start_date,
                s.end_date, s.billing_day, s.periodicity, s.custom_amount, s.created_at
            FROM subscriptions s
            JOIN customers c ON c.customer_id = s.customer_id
            WHERE s.status = 'active'
              AND c.status = 'active'
              AND s.start_date <= $1
              AND (s.end_date IS NULL OR s.end_date >= $1)
            ORDER BY s.created_at
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn customers_by_ids(&self, ids: &[Uuid]) -> Result<Vec<CustomerRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, CustomerRow>(
            r#"
            SELECT customer_id, name, email, phone, document,
                   street, city, state, zip_code, status
            FROM customers
            WHERE customer_id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn plans_by_ids(&self, ids: &[Uuid]) -> Result<Vec<PlanRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, PlanRow>(
            r#"
            SELECT plan_id, name, amount, currency
            FROM plans
            WHERE plan_id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Invoices
    // ------------------------------------------------------------------

    /// Due date of the subscription's latest non-cancelled invoice
    pub async fn last_due_date(&self, subscription_id: Uuid) -> Result<Option<NaiveDate>, DatabaseError> {
        let due = sqlx::query_scalar::<_, Option<NaiveDate>>(
            r#"
            SELECT MAX(due_date)
            FROM invoices
            WHERE subscription_id = $1 AND status <> 'cancelled'
            "#,
        )
        .bind(subscription_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(due)
    }

    /// True if a non-cancelled invoice is due between `first` and `last` inclusive
    pub async fn invoice_exists_between(
        &self,
        subscription_id: Uuid,
        first: NaiveDate,
        last: NaiveDate,
    ) -> Result<bool, DatabaseError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM invoices
                WHERE subscription_id = $1
                  AND status <> 'cancelled'
                  AND due_date BETWEEN $2 AND $3
            )
            "#,
        )
        .bind(subscription_id)
        .bind(first)
        .bind(last)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    pub async fn insert_invoice(&self, invoice: &InvoiceRow) -> Result<(), DatabaseError> {
        sqlx::query(&format!(
            "INSERT INTO invoices ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, \
              $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25)",
            INVOICE_COLUMNS
        ))
        .bind(invoice.invoice_id)
        .bind(&invoice.reference)
        .bind(invoice.customer_id)
        .bind(invoice.subscription_id)
        .bind(invoice.plan_id)
        .bind(&invoice.kind)
        .bind(invoice.amount)
        .bind(&invoice.currency)
        .bind(&invoice.description)
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(&invoice.status)
        .bind(invoice.paid_at)
        .bind(invoice.late_fee_rate)
        .bind(invoice.daily_interest_rate)
        .bind(invoice.discount_amount)
        .bind(invoice.discount_deadline)
        .bind(&invoice.external_id)
        .bind(invoice.collection_attempts)
        .bind(&invoice.digitable_line)
        .bind(&invoice.barcode)
        .bind(&invoice.qr_payload)
        .bind(&invoice.document_url)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<InvoiceRow, DatabaseError> {
        sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {} FROM invoices WHERE invoice_id = $1",
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Invoice", invoice_id))
    }

    /// Filtered listing, most recent due date first
    pub async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<InvoiceRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            r#"
            SELECT {} FROM invoices
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR customer_id = $2)
              AND ($3::date IS NULL OR due_date >= $3)
              AND ($4::date IS NULL OR due_date <= $4)
            ORDER BY due_date DESC, created_at DESC
            LIMIT $5
            "#,
            INVOICE_COLUMNS
        ))
        .bind(&filter.status)
        .bind(filter.customer_id)
        .bind(filter.due_from)
        .bind(filter.due_to)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn invoices_due_on(
        &self,
        due_date: NaiveDate,
        statuses: &[String],
    ) -> Result<Vec<InvoiceRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {} FROM invoices WHERE due_date = $1 AND status = ANY($2) ORDER BY created_at",
            INVOICE_COLUMNS
        ))
        .bind(due_date)
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Open invoices known to the processor, newest first
    pub async fn invoices_to_reconcile(&self, limit: i64) -> Result<Vec<InvoiceRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            r#"
            SELECT {} FROM invoices
            WHERE status IN ('pending', 'overdue') AND external_id IS NOT NULL
            ORDER BY created_at DESC
            LIMIT $1
            "#,
            INVOICE_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Moves an invoice from `from` to `to`, optionally logging a notification
    ///
    /// The update is guarded on the current status; if another writer moved
    /// the invoice first, nothing is written and `StaleState` is returned.
    pub async fn apply_status_change(
        &self,
        change: &StatusChangeRow,
        notification: Option<&NotificationRow>,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE invoices
            SET status = $3, paid_at = COALESCE($4, paid_at), updated_at = NOW()
            WHERE invoice_id = $1 AND status = $2
            "#,
        )
        .bind(change.invoice_id)
        .bind(&change.from_status)
        .bind(&change.to_status)
        .bind(change.paid_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let current = sqlx::query_scalar::<_, String>("SELECT status FROM invoices WHERE invoice_id = $1")
                .bind(change.invoice_id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match current {
                None => DatabaseError::not_found("Invoice", change.invoice_id),
                Some(status) => DatabaseError::StaleState(format!(
                    "invoice {} is {}, expected {}",
                    change.invoice_id, status, change.from_status
                )),
            });
        }

        if let Some(record) = notification {
            insert_notification(&mut tx, record).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Per-status count and amount of invoices issued in the window
    pub async fn status_totals(&self, since: NaiveDate, until: NaiveDate) -> Result<Vec<StatusTotalRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, StatusTotalRow>(
            r#"
            SELECT status, COUNT(*) AS count, COALESCE(SUM(amount), 0) AS amount
            FROM invoices
            WHERE issue_date BETWEEN $1 AND $2
            GROUP BY status
            "#,
        )
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Notification log
    // ------------------------------------------------------------------

    pub async fn notification_exists(
        &self,
        invoice_id: Uuid,
        kind: &str,
        sent_on: NaiveDate,
    ) -> Result<bool, DatabaseError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM notifications
                WHERE invoice_id = $1 AND kind = $2 AND sent_on = $3
            )
            "#,
        )
        .bind(invoice_id)
        .bind(kind)
        .bind(sent_on)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    pub async fn record_notification(&self, record: &NotificationRow) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        insert_notification(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Logs a collection notice and bumps the invoice's attempt counter
    ///
    /// Returns the attempt count after the increment.
    pub async fn record_collection_notice(&self, record: &NotificationRow) -> Result<i32, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        insert_notification(&mut tx, record).await?;

        let attempts = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE invoices
            SET collection_attempts = collection_attempts + 1, updated_at = NOW()
            WHERE invoice_id = $1
            RETURNING collection_attempts
            "#,
        )
        .bind(record.invoice_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Invoice", record.invoice_id))?;

        tx.commit().await?;
        Ok(attempts)
    }
}

async fn insert_notification(
    tx: &mut Transaction<'_, Postgres>,
    record: &NotificationRow,
) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO notifications (
            notification_id, invoice_id, kind, sent_on,
            channel, recipient, subject, sent_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(record.notification_id)
    .bind(record.invoice_id)
    .bind(&record.kind)
    .bind(record.sent_on)
    .bind(&record.channel)
    .bind(&record.recipient)
    .bind(&record.subject)
    .bind(record.sent_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Customer row
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct CustomerRow {
    pub customer_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub document: String,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub status: String,
}

/// Plan row
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct PlanRow {
    pub plan_id: Uuid,
    pub name: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Subscription row
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct SubscriptionRow {
    pub subscription_id: Uuid,
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub billing_day: i16,
    pub periodicity: String,
    pub custom_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

/// Invoice row
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct InvoiceRow {
    pub invoice_id: Uuid,
    pub reference: String,
    pub customer_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub plan_id: Option<Uuid>,
    pub kind: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub late_fee_rate: Decimal,
    pub daily_interest_rate: Decimal,
    pub discount_amount: Option<Decimal>,
    pub discount_deadline: Option<NaiveDate>,
    pub external_id: Option<String>,
    pub collection_attempts: i32,
    pub digitable_line: Option<String>,
    pub barcode: Option<String>,
    pub qr_payload: Option<String>,
    pub document_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Notification log row
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct NotificationRow {
    pub notification_id: Uuid,
    pub invoice_id: Uuid,
    pub kind: String,
    pub sent_on: NaiveDate,
    pub channel: String,
    pub recipient: String,
    pub subject: String,
    pub sent_at: DateTime<Utc>,
}

/// Guarded status transition
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChangeRow {
    pub invoice_id: Uuid,
    pub from_status: String,
    pub to_status: String,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Aggregate per status
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StatusTotalRow {
    pub status: String,
    pub count: i64,
    pub amount: Decimal,
}

/// Invoice listing filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvoiceFilter {
    pub status: Option<String>,
    pub customer_id: Option<Uuid>,
    pub due_from: Option<NaiveDate>,
    pub due_to: Option<NaiveDate>,
    pub limit: i64,
}
