//! Billing DTOs

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use core_kernel::CustomerId;
use domain_billing::{Invoice, InvoiceQuery, InvoiceStatus};

/// Body of `POST /billing/cycle/run`; without a date the run bills for today
#[derive(Debug, Default, Deserialize)]
pub struct RunCycleRequest {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelInvoiceRequest {
    pub reason: Option<String>,
}

/// Query string of `GET /billing/invoices`
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ListInvoicesParams {
    pub status: Option<InvoiceStatus>,
    pub customer_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    #[validate(range(min = 1, max = 1000))]
    pub limit: Option<u32>,
}

impl From<ListInvoicesParams> for InvoiceQuery {
    fn from(params: ListInvoicesParams) -> Self {
        InvoiceQuery {
            status: params.status,
            customer_id: params.customer_id.map(CustomerId::from_uuid),
            due_from: params.from,
            due_to: params.to,
            limit: params.limit,
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct StatisticsParams {
    /// Window length in days, up to a leap year
    #[validate(range(min = 1, max = 366))]
    pub days: Option<u32>,
    pub until: Option<NaiveDate>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvoiceResponse {
    pub id: Uuid,
    pub reference: String,
    pub customer_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub status: InvoiceStatus,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub paid_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub collection_attempts: u32,
    pub digitable_line: Option<String>,
    pub document_url: Option<String>,
}

impl From<Invoice> for InvoiceResponse {
    fn from(invoice: Invoice) -> Self {
        Self {
            id: invoice.id.into(),
            currency: invoice.currency().code().to_string(),
            reference: invoice.reference,
            customer_id: invoice.customer_id.into(),
            subscription_id: invoice.subscription_id.map(Uuid::from),
            status: invoice.status,
            amount: invoice.amount.amount(),
            description: invoice.description,
            issue_date: invoice.issue_date,
            due_date: invoice.due_date,
            paid_at: invoice.paid_at,
            external_id: invoice.external_id,
            collection_attempts: invoice.collection_attempts,
            digitable_line: invoice.artifacts.digitable_line,
            document_url: invoice.artifacts.document_url,
        }
    }
}
