//! AutomationRun repository

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::automation_run::{self, Entity as AutomationRun};

#[derive(Debug, Clone)]
pub struct AutomationRunRepository {
    db: DatabaseConnection,
}

impl AutomationRunRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Open an audit row for a job execution.
    pub async fn create(
        &self,
        job_id: Uuid,
        connection_id: Uuid,
        run_type: &str,
    ) -> Result<Uuid, DbErr> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let model = automation_run::ActiveModel {
            id: Set(id),
            job_id: Set(job_id),
            connection_id: Set(connection_id),
            run_type: Set(run_type.to_string()),
            status: Set("running".to_string()),
            started_at: Set(now.into()),
            completed_at: Set(None),
            results: Set(None),
            created_at: Set(now.into()),
        };
        model.insert(&self.db).await?;
        Ok(id)
    }

    /// Close an audit row with its final status and results payload.
    pub async fn finish(
        &self,
        run_id: Uuid,
        status: &str,
        results: Option<JsonValue>,
    ) -> Result<(), DbErr> {
        let active = automation_run::ActiveModel {
            status: Set(status.to_string()),
            completed_at: Set(Some(Utc::now().into())),
            results: Set(results),
            ..Default::default()
        };
        AutomationRun::update_many()
            .set(active)
            .filter(automation_run::Column::Id.eq(run_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn list(
        &self,
        connection_id: Option<Uuid>,
        limit: u64,
    ) -> Result<Vec<automation_run::Model>, DbErr> {
        let mut query = AutomationRun::find().order_by_desc(automation_run::Column::StartedAt);
        if let Some(connection_id) = connection_id {
            query = query.filter(automation_run::Column::ConnectionId.eq(connection_id));
        }
        query.limit(limit).all(&self.db).await
    }
}
