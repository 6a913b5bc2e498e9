use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    entities::invoices::InvoiceEntity,
    value_objects::enums::invoice_statuses::InvoiceStatus,
};

#[derive(Debug, Serialize)]
pub struct InvoiceDto {
    pub id: Uuid,
    pub invoice_number: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_minor: i64,
    pub paid_minor: i64,
    pub currency: String,
    pub status: InvoiceStatus,
    pub due_at: DateTime<Utc>,
    pub payment_link_url: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<InvoiceEntity> for InvoiceDto {
    fn from(value: InvoiceEntity) -> Self {
        let status = value.status_enum();
        Self {
            id: value.id,
            invoice_number: value.invoice_number,
            period_start: value.period_start,
            period_end: value.period_end,
            total_minor: value.total_minor,
            paid_minor: value.paid_minor,
            currency: value.currency,
            status,
            due_at: value.due_at,
            payment_link_url: value.payment_link_url,
            paid_at: value.paid_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateInvoiceRequest {
    pub year: i32,
    pub month: u32,
}

/// How an invoice payment attempt concluded. Both variants are success paths:
/// either the stored method was charged, or a hosted payment link was issued
/// for the customer to pay manually.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoicePaymentOutcome {
    Charged,
    LinkIssued(String),
}

#[derive(Debug, Serialize)]
pub struct InvoicePaymentDto {
    pub invoice_id: Uuid,
    pub outcome: &'static str,
    pub payment_link_url: Option<String>,
}

impl InvoicePaymentDto {
    pub fn from_outcome(invoice_id: Uuid, outcome: InvoicePaymentOutcome) -> Self {
        match outcome {
            InvoicePaymentOutcome::Charged => Self {
                invoice_id,
                outcome: "CHARGED",
                payment_link_url: None,
            },
            InvoicePaymentOutcome::LinkIssued(url) => Self {
                invoice_id,
                outcome: "LINK_ISSUED",
                payment_link_url: Some(url),
            },
        }
    }
}
