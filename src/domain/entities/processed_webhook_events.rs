use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infrastructure::postgres::schema::processed_webhook_events;

/// Insert-only deduplication log; (provider, event_id) is unique so a redelivered
/// webhook can never be applied twice.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = processed_webhook_events)]
pub struct ProcessedWebhookEventEntity {
    pub id: Uuid,
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub external_subscription_id: Option<String>,
    pub outcome: String,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = processed_webhook_events)]
pub struct InsertProcessedWebhookEventEntity {
    pub id: Uuid,
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub external_subscription_id: Option<String>,
    pub outcome: String,
}
