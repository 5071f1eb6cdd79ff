//! ScheduledJob repository
//!
//! Queries over the materialised next-run rows the orchestrator polls.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    Set,
};
use uuid::Uuid;

use crate::models::scheduled_job::{self, Entity as ScheduledJob};

#[derive(Debug, Clone)]
pub struct ScheduledJobRepository {
    db: DatabaseConnection,
}

impl ScheduledJobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<scheduled_job::Model>, DbErr> {
        ScheduledJob::find_by_id(id).one(&self.db).await
    }

    /// Enabled jobs whose next_run_at falls within +/- buffer of `now`.
    pub async fn find_due(
        &self,
        now: DateTime<Utc>,
        buffer_minutes: i64,
    ) -> Result<Vec<scheduled_job::Model>, DbErr> {
        let buffer = Duration::minutes(buffer_minutes);
        ScheduledJob::find()
            .filter(scheduled_job::Column::Enabled.eq(true))
            .filter(scheduled_job::Column::NextRunAt.gte(now - buffer))
            .filter(scheduled_job::Column::NextRunAt.lte(now + buffer))
            .order_by_asc(scheduled_job::Column::NextRunAt)
            .all(&self.db)
            .await
    }

    pub async fn list_by_connection(
        &self,
        connection_id: Uuid,
    ) -> Result<Vec<scheduled_job::Model>, DbErr> {
        ScheduledJob::find()
            .filter(scheduled_job::Column::ConnectionId.eq(connection_id))
            .order_by_asc(scheduled_job::Column::AutomationType)
            .all(&self.db)
            .await
    }

    pub async fn count_enabled(&self) -> Result<u64, DbErr> {
        ScheduledJob::find()
            .filter(scheduled_job::Column::Enabled.eq(true))
            .count(&self.db)
            .await
    }

    /// Record an execution: stamp last_run_at and store the recomputed
    /// next_run_at.
    pub async fn record_execution(
        &self,
        id: Uuid,
        executed_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), DbErr> {
        let active = scheduled_job::ActiveModel {
            last_run_at: Set(Some(executed_at.into())),
            next_run_at: Set(next_run_at.map(Into::into)),
            updated_at: Set(executed_at.into()),
            ..Default::default()
        };

        ScheduledJob::update_many()
            .set(active)
            .filter(scheduled_job::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}
