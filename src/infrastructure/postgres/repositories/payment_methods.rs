use anyhow::Result;
use async_trait::async_trait;
use diesel::{Connection, insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::{
        entities::payment_methods::{InsertPaymentMethodEntity, PaymentMethodEntity},
        repositories::payment_methods::PaymentMethodRepository,
    },
    infrastructure::postgres::{postgres_connection::PgPoolSquad, schema::payment_methods},
};

pub struct PaymentMethodPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl PaymentMethodPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl PaymentMethodRepository for PaymentMethodPostgres {
    async fn find_default(&self, workspace_id: Uuid) -> Result<Option<PaymentMethodEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = payment_methods::table
            .filter(payment_methods::workspace_id.eq(workspace_id))
            .filter(payment_methods::is_default.eq(true))
            .select(PaymentMethodEntity::as_select())
            .first::<PaymentMethodEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn save(&self, insert_entity: InsertPaymentMethodEntity) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = conn.transaction::<Uuid, diesel::result::Error, _>(|tx| {
            if insert_entity.is_default {
                update(payment_methods::table)
                    .filter(payment_methods::workspace_id.eq(insert_entity.workspace_id))
                    .filter(payment_methods::is_default.eq(true))
                    .set(payment_methods::is_default.eq(false))
                    .execute(tx)?;
            }

            let id = insert_into(payment_methods::table)
                .values(&insert_entity)
                .returning(payment_methods::id)
                .get_result::<Uuid>(tx)?;

            Ok(id)
        })?;

        Ok(result)
    }
}
