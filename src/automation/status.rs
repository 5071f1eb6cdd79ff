//! Task status tracker
//!
//! Job lifecycle writes plus the duplicate and running-job guards the
//! orchestrator filters with. Guard reads fail open: a transient store
//! error reports "not running" rather than starving the scheduler.

use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;
use tracing::{error, warn};
use uuid::Uuid;

use super::types::JobStatus;
use crate::repositories::automation_job::AutomationJobRepository;

#[derive(Debug, Clone)]
pub struct StatusTracker {
    jobs: AutomationJobRepository,
}

impl StatusTracker {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            jobs: AutomationJobRepository::new(db),
        }
    }

    /// Whether a job of this type is currently running for the connection.
    pub async fn is_job_running(&self, connection_id: Uuid, automation_type: &str) -> bool {
        match self.jobs.count_running(connection_id, automation_type).await {
            Ok(count) => count > 0,
            Err(err) => {
                warn!(
                    connection_id = %connection_id,
                    automation_type,
                    error = %err,
                    "Running-job check failed; assuming not running"
                );
                false
            }
        }
    }

    /// Whether a job of this type was scheduled within the last `minutes`.
    pub async fn has_recent_job(
        &self,
        connection_id: Uuid,
        automation_type: &str,
        minutes: i64,
    ) -> bool {
        match self
            .jobs
            .count_recent(connection_id, automation_type, minutes)
            .await
        {
            Ok(count) => count > 0,
            Err(err) => {
                warn!(
                    connection_id = %connection_id,
                    automation_type,
                    error = %err,
                    "Recent-job check failed; assuming none"
                );
                false
            }
        }
    }

    /// Transition a job to running. Returns false when the job is no
    /// longer in a state that allows it.
    pub async fn mark_job_running(&self, job_id: Uuid) -> bool {
        self.transition(job_id, JobStatus::Running, None, None).await
    }

    pub async fn mark_job_completed(
        &self,
        job_id: Uuid,
        result_summary: Option<JsonValue>,
    ) -> bool {
        self.transition(job_id, JobStatus::Completed, result_summary, None)
            .await
    }

    pub async fn mark_job_failed(&self, job_id: Uuid, error_message: &str) -> bool {
        self.transition(
            job_id,
            JobStatus::Failed,
            None,
            Some(error_message.to_string()),
        )
        .await
    }

    pub async fn mark_job_cancelled(&self, job_id: Uuid) -> bool {
        self.transition(job_id, JobStatus::Cancelled, None, None).await
    }

    async fn transition(
        &self,
        job_id: Uuid,
        status: JobStatus,
        result_summary: Option<JsonValue>,
        error_message: Option<String>,
    ) -> bool {
        match self
            .jobs
            .transition(job_id, status, result_summary, error_message)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                warn!(
                    job_id = %job_id,
                    status = %status,
                    "Status transition rejected; job not in an allowed predecessor state"
                );
                false
            }
            Err(err) => {
                error!(job_id = %job_id, status = %status, error = %err, "Status write failed");
                false
            }
        }
    }

    /// Whether the job row has been cancelled in the store. Executors poll
    /// this between subtasks; cancellation is cooperative.
    pub async fn is_job_cancelled(&self, job_id: Uuid) -> bool {
        match self.jobs.get_by_id(job_id).await {
            Ok(Some(job)) => job.status == JobStatus::Cancelled.as_str(),
            Ok(None) => false,
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "Cancellation check failed");
                false
            }
        }
    }

    /// Per-connection job statistics over the last `hours`.
    pub async fn connection_job_summary(
        &self,
        connection_id: Uuid,
        hours: i64,
    ) -> JsonValue {
        let jobs = match self.jobs.list_since(connection_id, hours).await {
            Ok(jobs) => jobs,
            Err(err) => {
                error!(connection_id = %connection_id, error = %err, "Job summary read failed");
                return json!({
                    "connection_id": connection_id,
                    "time_period_hours": hours,
                    "total_jobs": 0,
                    "error": err.to_string(),
                });
            }
        };

        let mut by_status: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
        let mut last_job_time: Option<DateTime<Utc>> = None;

        for job in &jobs {
            *by_status.entry(job.status.clone()).or_default() += 1;
            *by_type.entry(job.job_type.clone()).or_default() += 1;

            let scheduled_at = job.scheduled_at.with_timezone(&Utc);
            if last_job_time.map(|t| scheduled_at > t).unwrap_or(true) {
                last_job_time = Some(scheduled_at);
            }
        }

        json!({
            "connection_id": connection_id,
            "time_period_hours": hours,
            "total_jobs": jobs.len(),
            "by_status": by_status,
            "by_type": by_type,
            "last_job_time": last_job_time.map(|t| t.to_rfc3339()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ActiveModelTrait, Database, Set};

    async fn setup() -> (StatusTracker, AutomationJobRepository, Uuid) {
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

        (
            StatusTracker::new(db.clone()),
            AutomationJobRepository::new(db),
            connection_id,
        )
    }

    #[tokio::test]
    async fn running_guard_sees_only_running_jobs() {
        let (tracker, repo, connection_id) = setup().await;

        let job = repo
            .insert_scheduled(connection_id, "metadata_refresh", None)
            .await
            .expect("insert job");
        assert!(!tracker.is_job_running(connection_id, "metadata_refresh").await);

        assert!(tracker.mark_job_running(job.id).await);
        assert!(tracker.is_job_running(connection_id, "metadata_refresh").await);

        assert!(tracker.mark_job_completed(job.id, None).await);
        assert!(!tracker.is_job_running(connection_id, "metadata_refresh").await);
    }

    #[tokio::test]
    async fn backwards_transitions_are_rejected() {
        let (tracker, repo, connection_id) = setup().await;

        let job = repo
            .insert_scheduled(connection_id, "metadata_refresh", None)
            .await
            .expect("insert job");
        assert!(tracker.mark_job_running(job.id).await);
        assert!(tracker.mark_job_failed(job.id, "boom").await);

        // Terminal state is final.
        assert!(!tracker.mark_job_running(job.id).await);
        assert!(!tracker.mark_job_completed(job.id, None).await);
    }

    #[tokio::test]
    async fn summary_counts_by_status_and_type() {
        let (tracker, repo, connection_id) = setup().await;

        let first = repo
            .insert_scheduled(connection_id, "metadata_refresh", None)
            .await
            .expect("insert job");
        tracker.mark_job_running(first.id).await;
        tracker.mark_job_completed(first.id, None).await;

        repo.insert_scheduled(connection_id, "validation_automation", None)
            .await
            .expect("insert job");

        let summary = tracker.connection_job_summary(connection_id, 24).await;
        assert_eq!(summary["total_jobs"], 2);
        assert_eq!(summary["by_status"]["completed"], 1);
        assert_eq!(summary["by_status"]["scheduled"], 1);
        assert_eq!(summary["by_type"]["metadata_refresh"], 1);
        assert!(summary["last_job_time"].is_string());
    }
}
