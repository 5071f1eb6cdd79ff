//! Task executors
//!
//! Per-job logic for the three automation types. Each execution opens an
//! automation_runs audit row, performs its work through the persistence
//! gateway, publishes the relevant events, and reports success or failure
//! back to the orchestrator. Cancellation is cooperative: the store's
//! cancelled flag is observed between subtasks, never mid-query.

use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use serde_json::{Value as JsonValue, json};
use tokio::time::sleep;
use tracing::{error, info};
use uuid::Uuid;

use super::events::{AutomationEvent, EventBus, EventType};
use super::status::StatusTracker;
use super::types::AutomationType;
use crate::connectors::ConnectorRegistry;
use crate::crypto::CryptoKey;
use crate::error::TaskError;
use crate::metadata::detector::SchemaChangeDetector;
use crate::metadata::worker::{CollectionParams, MetadataTaskManager, TaskState};
use crate::repositories::automation_run::AutomationRunRepository;
use crate::repositories::connection::ConnectionRepository;
use crate::validations::ValidationRunner;

/// Grace period after submission before the fire-and-forget check.
const SUBMIT_SETTLE_DELAY: Duration = Duration::from_secs(2);

pub struct TaskExecutor {
    connections: ConnectionRepository,
    runs: AutomationRunRepository,
    status: StatusTracker,
    detector: SchemaChangeDetector,
    validations: ValidationRunner,
    metadata_tasks: Arc<MetadataTaskManager>,
    bus: Arc<EventBus>,
}

impl TaskExecutor {
    pub fn new(
        db: DatabaseConnection,
        crypto_key: Option<CryptoKey>,
        registry: Arc<ConnectorRegistry>,
        metadata_tasks: Arc<MetadataTaskManager>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            connections: ConnectionRepository::new(db.clone(), crypto_key.clone()),
            runs: AutomationRunRepository::new(db.clone()),
            status: StatusTracker::new(db.clone()),
            detector: SchemaChangeDetector::new(db.clone(), crypto_key.clone(), registry.clone()),
            validations: ValidationRunner::new(db, crypto_key, registry, bus.clone()),
            metadata_tasks,
            bus,
        }
    }

    /// Execute one automation job. Returns the result summary on success;
    /// errors are fully described in the returned `TaskError` and the
    /// failure event has already been published.
    pub async fn execute(
        &self,
        job_id: Uuid,
        connection_id: Uuid,
        automation_type: AutomationType,
    ) -> Result<JsonValue, TaskError> {
        let run_id = self
            .runs
            .create(job_id, connection_id, automation_type.as_str())
            .await
            .ok();

        let outcome = match automation_type {
            AutomationType::MetadataRefresh => {
                self.execute_metadata_refresh(job_id, connection_id).await
            }
            AutomationType::SchemaChangeDetection => {
                self.execute_schema_detection(job_id, connection_id).await
            }
            AutomationType::ValidationAutomation => {
                self.execute_validation_run(job_id, connection_id).await
            }
        };

        match outcome {
            Ok(results) => {
                if let Some(run_id) = run_id {
                    let _ = self
                        .runs
                        .finish(run_id, "completed", Some(results.clone()))
                        .await;
                }
                Ok(results)
            }
            Err(TaskError::Cancelled) => {
                info!(job_id = %job_id, "Automation task observed cancellation");
                if let Some(run_id) = run_id {
                    let _ = self.runs.finish(run_id, "cancelled", None).await;
                }
                Err(TaskError::Cancelled)
            }
            Err(err) => {
                error!(
                    job_id = %job_id,
                    automation_type = %automation_type,
                    error = %err,
                    "Automation task failed"
                );
                if let Some(run_id) = run_id {
                    let _ = self
                        .runs
                        .finish(run_id, "failed", Some(json!({ "error": err.to_string() })))
                        .await;
                }
                self.bus
                    .publish(
                        AutomationEvent::new(
                            EventType::JobFailed,
                            json!({
                                "job_id": job_id,
                                "task_type": automation_type.as_str(),
                                "error": err.to_string(),
                            }),
                        )
                        .for_connection(connection_id),
                    )
                    .await;
                Err(err)
            }
        }
    }

    /// Metadata refresh: delegate collection to the metadata task manager
    /// and trust it to complete. Success means the submission was
    /// accepted.
    async fn execute_metadata_refresh(
        &self,
        job_id: Uuid,
        connection_id: Uuid,
    ) -> Result<JsonValue, TaskError> {
        let connection = self
            .connections
            .get_by_id(connection_id)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?
            .ok_or(TaskError::ConnectionNotFound(connection_id))?;

        info!(
            job_id = %job_id,
            connection = %connection.name,
            "Submitting metadata collection task"
        );

        let task_id = self
            .metadata_tasks
            .submit_collection_task(connection_id, CollectionParams::comprehensive(Some(job_id)))
            .map_err(|e| TaskError::Upstream(e.to_string()))?;

        // Give the worker a moment to pick the task up, then confirm the
        // submission did not immediately fail.
        sleep(SUBMIT_SETTLE_DELAY).await;

        if self.status.is_job_cancelled(job_id).await {
            return Err(TaskError::Cancelled);
        }

        if let Some(status) = self.metadata_tasks.task_status(task_id)
            && status.state == TaskState::Failed
        {
            return Err(TaskError::Upstream(
                status
                    .error
                    .unwrap_or_else(|| "metadata task failed".to_string()),
            ));
        }

        let results = json!({
            "metadata_task_id": task_id,
            "statistics_collected": true,
            "success": true,
            "trigger": "user_schedule",
        });

        self.bus
            .publish(
                AutomationEvent::new(EventType::MetadataRefreshed, results.clone())
                    .for_connection(connection_id),
            )
            .await;

        info!(job_id = %job_id, task_id = %task_id, "Metadata refresh submitted");
        Ok(results)
    }

    /// Schema change detection over a fresh snapshot.
    async fn execute_schema_detection(
        &self,
        job_id: Uuid,
        connection_id: Uuid,
    ) -> Result<JsonValue, TaskError> {
        if self.status.is_job_cancelled(job_id).await {
            return Err(TaskError::Cancelled);
        }

        let outcome = self.detector.detect_for_connection(connection_id).await?;

        let results = json!({
            "changes_detected": outcome.changes.len(),
            "changes_stored": outcome.stored,
            "skipped_duplicates": outcome.skipped_duplicates,
            "important_changes": outcome.requires_refresh,
            "baseline_stored": outcome.baseline_stored,
            "trigger": "user_schedule",
        });

        if outcome.stored > 0 {
            self.bus
                .publish(
                    AutomationEvent::new(EventType::SchemaChangesDetected, results.clone())
                        .for_connection(connection_id),
                )
                .await;
        }

        info!(
            job_id = %job_id,
            changes = outcome.changes.len(),
            "Schema detection finished"
        );
        Ok(results)
    }

    /// Validation automation across every table with active rules.
    async fn execute_validation_run(
        &self,
        job_id: Uuid,
        connection_id: Uuid,
    ) -> Result<JsonValue, TaskError> {
        let connection = self
            .connections
            .get_by_id(connection_id)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?
            .ok_or(TaskError::ConnectionNotFound(connection_id))?;

        if self.status.is_job_cancelled(job_id).await {
            return Err(TaskError::Cancelled);
        }

        let summary = self
            .validations
            .run_for_connection(connection.organization_id, connection_id)
            .await?;

        let mut results = summary.to_json();
        results["trigger"] = json!("user_schedule");

        if summary.failed_rules > 0 {
            self.bus
                .publish(
                    AutomationEvent::new(EventType::ValidationFailuresDetected, results.clone())
                        .for_connection(connection_id)
                        .for_organization(connection.organization_id),
                )
                .await;
        }

        info!(
            job_id = %job_id,
            total = summary.total_rules,
            failed = summary.failed_rules,
            "Validation run finished"
        );
        Ok(results)
    }
}
