use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infrastructure::postgres::schema::payment_methods;

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = payment_methods)]
pub struct PaymentMethodEntity {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub provider: String,
    pub provider_ref: String,
    pub method_type: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = payment_methods)]
pub struct InsertPaymentMethodEntity {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub provider: String,
    pub provider_ref: String,
    pub method_type: String,
    pub is_default: bool,
}
