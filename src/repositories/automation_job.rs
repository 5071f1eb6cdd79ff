//! AutomationJob repository
//!
//! Job lifecycle writes with monotonic status transitions enforced as
//! conditional UPDATEs: a transition only lands when the row is still in
//! one of the allowed predecessor states, so concurrent writers cannot
//! move a job backwards.

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::automation::types::JobStatus;
use crate::models::automation_job::{self, Entity as AutomationJob};

#[derive(Debug, Clone)]
pub struct AutomationJobRepository {
    db: DatabaseConnection,
}

impl AutomationJobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<automation_job::Model>, DbErr> {
        AutomationJob::find_by_id(id).one(&self.db).await
    }

    /// Insert a new job in `scheduled` state.
    pub async fn insert_scheduled(
        &self,
        connection_id: Uuid,
        job_type: &str,
        job_config: Option<JsonValue>,
    ) -> Result<automation_job::Model, DbErr> {
        let now = Utc::now();
        let model = automation_job::ActiveModel {
            id: Set(Uuid::new_v4()),
            connection_id: Set(connection_id),
            job_type: Set(job_type.to_string()),
            status: Set(JobStatus::Scheduled.as_str().to_string()),
            scheduled_at: Set(now.into()),
            started_at: Set(None),
            completed_at: Set(None),
            job_config: Set(job_config),
            result_summary: Set(None),
            error_message: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        model.insert(&self.db).await
    }

    /// Conditionally transition a job to `status`, honouring the allowed
    /// predecessor states. Returns whether the transition landed.
    pub async fn transition(
        &self,
        job_id: Uuid,
        status: JobStatus,
        result_summary: Option<JsonValue>,
        error_message: Option<String>,
    ) -> Result<bool, DbErr> {
        let now = Utc::now();
        let predecessors: Vec<String> = status
            .allowed_predecessors()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let mut update = AutomationJob::update_many()
            .col_expr(
                automation_job::Column::Status,
                Expr::value(status.as_str()),
            )
            .col_expr(automation_job::Column::UpdatedAt, Expr::value(now))
            .filter(automation_job::Column::Id.eq(job_id))
            .filter(automation_job::Column::Status.is_in(predecessors));

        if status == JobStatus::Running {
            update = update.col_expr(automation_job::Column::StartedAt, Expr::value(now));
        }
        if status.is_terminal() {
            update = update.col_expr(automation_job::Column::CompletedAt, Expr::value(now));
        }
        if let Some(summary) = result_summary {
            update = update.col_expr(
                automation_job::Column::ResultSummary,
                Expr::value(summary),
            );
        }
        if let Some(message) = error_message {
            update = update.col_expr(
                automation_job::Column::ErrorMessage,
                Expr::value(message),
            );
        }

        let result = update.exec(&self.db).await?;
        Ok(result.rows_affected > 0)
    }

    /// Count jobs for (connection, type) currently in `running`.
    pub async fn count_running(&self, connection_id: Uuid, job_type: &str) -> Result<u64, DbErr> {
        AutomationJob::find()
            .filter(automation_job::Column::ConnectionId.eq(connection_id))
            .filter(automation_job::Column::JobType.eq(job_type))
            .filter(automation_job::Column::Status.eq(JobStatus::Running.as_str()))
            .count(&self.db)
            .await
    }

    /// Count jobs for (connection, type) scheduled within the last
    /// `minutes`.
    pub async fn count_recent(
        &self,
        connection_id: Uuid,
        job_type: &str,
        minutes: i64,
    ) -> Result<u64, DbErr> {
        let cutoff = Utc::now() - Duration::minutes(minutes);
        AutomationJob::find()
            .filter(automation_job::Column::ConnectionId.eq(connection_id))
            .filter(automation_job::Column::JobType.eq(job_type))
            .filter(automation_job::Column::ScheduledAt.gte(cutoff))
            .count(&self.db)
            .await
    }

    /// Delete terminal jobs older than `retention_days`. Returns the
    /// number purged.
    pub async fn purge_terminal(&self, retention_days: i64) -> Result<u64, DbErr> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let result = AutomationJob::delete_many()
            .filter(automation_job::Column::Status.is_in(vec![
                JobStatus::Completed.as_str(),
                JobStatus::Failed.as_str(),
                JobStatus::Cancelled.as_str(),
            ]))
            .filter(automation_job::Column::CreatedAt.lt(cutoff))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Jobs for a connection scheduled within the last `hours`, newest
    /// first.
    pub async fn list_since(
        &self,
        connection_id: Uuid,
        hours: i64,
    ) -> Result<Vec<automation_job::Model>, DbErr> {
        let cutoff = Utc::now() - Duration::hours(hours);
        AutomationJob::find()
            .filter(automation_job::Column::ConnectionId.eq(connection_id))
            .filter(automation_job::Column::ScheduledAt.gte(cutoff))
            .order_by_desc(automation_job::Column::ScheduledAt)
            .all(&self.db)
            .await
    }

    /// History listing with optional filters, newest first.
    pub async fn list(
        &self,
        connection_id: Option<Uuid>,
        status: Option<&str>,
        limit: u64,
    ) -> Result<Vec<automation_job::Model>, DbErr> {
        let mut query = AutomationJob::find().order_by_desc(automation_job::Column::ScheduledAt);
        if let Some(connection_id) = connection_id {
            query = query.filter(automation_job::Column::ConnectionId.eq(connection_id));
        }
        if let Some(status) = status {
            query = query.filter(automation_job::Column::Status.eq(status));
        }
        query.limit(limit).all(&self.db).await
    }

    /// Count of jobs currently in `running` across all connections.
    pub async fn count_all_running(&self) -> Result<u64, DbErr> {
        AutomationJob::find()
            .filter(automation_job::Column::Status.eq(JobStatus::Running.as_str()))
            .count(&self.db)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup() -> (AutomationJobRepository, Uuid) {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");

        let organization_id = Uuid::new_v4();
        let org = crate::models::organization::ActiveModel {
            id: Set(organization_id),
            name: Set("Test Org".to_string()),
            created_at: Set(Utc::now().into()),
            updated_at: Set(Utc::now().into()),
        };
        org.insert(&db).await.expect("insert organization");

        let connection_id = Uuid::new_v4();
        let connection = crate::models::connection::ActiveModel {
            id: Set(connection_id),
            organization_id: Set(organization_id),
            name: Set("warehouse".to_string()),
            connection_type: Set("postgresql".to_string()),
            credentials_ciphertext: Set(None),
            is_default: Set(false),
            created_at: Set(Utc::now().into()),
            updated_at: Set(Utc::now().into()),
        };
        connection.insert(&db).await.expect("insert connection");

        (AutomationJobRepository::new(db), connection_id)
    }

    #[tokio::test]
    async fn transitions_follow_the_lifecycle() {
        let (repo, connection_id) = setup().await;

        let job = repo
            .insert_scheduled(connection_id, "metadata_refresh", None)
            .await
            .expect("insert job");

        assert!(
            repo.transition(job.id, JobStatus::Running, None, None)
                .await
                .expect("transition to running")
        );
        assert!(
            repo.transition(job.id, JobStatus::Completed, None, None)
                .await
                .expect("transition to completed")
        );

        // Terminal jobs cannot move backwards.
        assert!(
            !repo
                .transition(job.id, JobStatus::Running, None, None)
                .await
                .expect("attempt backwards transition")
        );
        assert!(
            !repo
                .transition(job.id, JobStatus::Failed, None, None)
                .await
                .expect("attempt terminal-to-terminal transition")
        );
    }

    #[tokio::test]
    async fn scheduled_job_can_fail_directly() {
        let (repo, connection_id) = setup().await;

        let job = repo
            .insert_scheduled(connection_id, "validation_automation", None)
            .await
            .expect("insert job");

        assert!(
            repo.transition(
                job.id,
                JobStatus::Failed,
                None,
                Some("worker pool rejected submission".to_string()),
            )
            .await
            .expect("fail from scheduled")
        );

        let stored = repo.get_by_id(job.id).await.expect("fetch").expect("exists");
        assert_eq!(stored.status, "failed");
        assert!(stored.completed_at.is_some());
        assert_eq!(
            stored.error_message.as_deref(),
            Some("worker pool rejected submission")
        );
    }

    #[tokio::test]
    async fn running_and_recent_guards_observe_rows() {
        let (repo, connection_id) = setup().await;

        let job = repo
            .insert_scheduled(connection_id, "metadata_refresh", None)
            .await
            .expect("insert job");
        repo.transition(job.id, JobStatus::Running, None, None)
            .await
            .expect("mark running");

        assert_eq!(
            repo.count_running(connection_id, "metadata_refresh")
                .await
                .expect("count running"),
            1
        );
        assert_eq!(
            repo.count_recent(connection_id, "metadata_refresh", 5)
                .await
                .expect("count recent"),
            1
        );
        assert_eq!(
            repo.count_running(connection_id, "validation_automation")
                .await
                .expect("count other type"),
            0
        );
    }
}
