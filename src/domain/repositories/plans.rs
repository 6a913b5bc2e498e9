use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

use crate::domain::entities::plans::PlanEntity;

#[automock]
#[async_trait]
pub trait PlanRepository {
    async fn find_by_code(&self, plan_code: &str) -> Result<Option<PlanEntity>>;

    async fn list_active(&self) -> Result<Vec<PlanEntity>>;
}
