//! Metadata collection worker
//!
//! The metadata task manager: a bounded in-process queue the executors
//! submit collection tasks to. Submission is fire-and-forget; callers can
//! poll task status but are not expected to block on completion. The
//! worker also reacts to metadata events (validation failures that smell
//! like schema drift, detected schema changes) by queueing targeted
//! refreshes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::DatabaseConnection;
use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::automation::events::{AutomationEvent, EventHandler, EventType};
use crate::connectors::ConnectorRegistry;
use crate::crypto::CryptoKey;
use crate::metadata::schema_diff::MetadataType;
use crate::metadata::storage::MetadataStorageService;
use crate::repositories::connection::ConnectionRepository;

/// Queue capacity before submissions are rejected.
const QUEUE_CAPACITY: usize = 64;

/// Parameters of one collection task.
#[derive(Debug, Clone)]
pub struct CollectionParams {
    pub depth: String,
    pub table_limit: usize,
    pub timeout: Duration,
    pub refresh_types: Vec<MetadataType>,
    pub trigger: String,
    pub automation_job_id: Option<Uuid>,
}

impl CollectionParams {
    /// The parameter set the metadata-refresh executor submits.
    pub fn comprehensive(automation_job_id: Option<Uuid>) -> Self {
        Self {
            depth: "comprehensive".to_string(),
            table_limit: 50,
            timeout: Duration::from_secs(45 * 60),
            refresh_types: vec![
                MetadataType::Tables,
                MetadataType::Columns,
                MetadataType::Statistics,
            ],
            trigger: "user_schedule".to_string(),
            automation_job_id,
        }
    }

    /// Narrow refresh used when an event points at one drifted table.
    pub fn targeted(trigger: &str) -> Self {
        Self {
            depth: "standard".to_string(),
            table_limit: 50,
            timeout: Duration::from_secs(10 * 60),
            refresh_types: vec![MetadataType::Tables, MetadataType::Columns],
            trigger: trigger.to_string(),
            automation_job_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub state: TaskState,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("metadata task queue is full")]
    QueueFull,
    #[error("metadata task manager is shut down")]
    ShutDown,
}

struct CollectionTask {
    id: Uuid,
    connection_id: Uuid,
    params: CollectionParams,
}

/// Handle to the metadata collection worker.
pub struct MetadataTaskManager {
    tx: mpsc::Sender<CollectionTask>,
    statuses: Arc<Mutex<HashMap<Uuid, TaskStatus>>>,
}

impl MetadataTaskManager {
    /// Spawn the worker loop and return the submission handle.
    pub fn start(
        db: DatabaseConnection,
        crypto_key: Option<CryptoKey>,
        registry: Arc<ConnectorRegistry>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let statuses: Arc<Mutex<HashMap<Uuid, TaskStatus>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let worker = Worker {
            connections: ConnectionRepository::new(db.clone(), crypto_key),
            storage: MetadataStorageService::new(db),
            registry,
            statuses: statuses.clone(),
        };
        tokio::spawn(worker.run(rx, shutdown));

        Arc::new(Self { tx, statuses })
    }

    /// Queue a collection task. Returns the task id on acceptance.
    pub fn submit_collection_task(
        &self,
        connection_id: Uuid,
        params: CollectionParams,
    ) -> Result<Uuid, SubmitError> {
        let id = Uuid::new_v4();
        let task = CollectionTask {
            id,
            connection_id,
            params,
        };

        match self.tx.try_send(task) {
            Ok(()) => {
                if let Ok(mut statuses) = self.statuses.lock() {
                    statuses.insert(
                        id,
                        TaskStatus {
                            state: TaskState::Queued,
                            error: None,
                            submitted_at: Utc::now(),
                            finished_at: None,
                        },
                    );
                }
                counter!("metadata_tasks_submitted_total").increment(1);
                Ok(id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(SubmitError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SubmitError::ShutDown),
        }
    }

    pub fn task_status(&self, task_id: Uuid) -> Option<TaskStatus> {
        self.statuses
            .lock()
            .ok()
            .and_then(|statuses| statuses.get(&task_id).cloned())
    }

    /// React to a metadata event. Validation failures flagged as schema
    /// mismatch and detected schema changes trigger a targeted refresh.
    pub fn handle_metadata_event(
        &self,
        event_type: EventType,
        connection_id: Uuid,
        details: &JsonValue,
    ) -> Option<Uuid> {
        let trigger = match event_type {
            EventType::ValidationFailure => {
                let reason = details.get("reason").and_then(JsonValue::as_str);
                if reason != Some("schema_mismatch") {
                    return None;
                }
                "validation_schema_mismatch"
            }
            EventType::SchemaChange => "schema_change",
            EventType::SystemRefresh | EventType::UserRequest => "requested_refresh",
            _ => return None,
        };

        match self.submit_collection_task(connection_id, CollectionParams::targeted(trigger)) {
            Ok(task_id) => {
                info!(
                    connection_id = %connection_id,
                    task_id = %task_id,
                    trigger,
                    "Queued targeted metadata refresh"
                );
                Some(task_id)
            }
            Err(err) => {
                warn!(
                    connection_id = %connection_id,
                    error = %err,
                    "Could not queue targeted metadata refresh"
                );
                None
            }
        }
    }
}

struct Worker {
    connections: ConnectionRepository,
    storage: MetadataStorageService,
    registry: Arc<ConnectorRegistry>,
    statuses: Arc<Mutex<HashMap<Uuid, TaskStatus>>>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<CollectionTask>, shutdown: CancellationToken) {
        info!("Metadata collection worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Metadata collection worker shutdown requested");
                    break;
                }
                task = rx.recv() => {
                    let Some(task) = task else { break };
                    self.set_state(task.id, TaskState::Running, None);

                    let timeout = task.params.timeout;
                    let outcome =
                        tokio::time::timeout(timeout, self.collect(&task)).await;

                    match outcome {
                        Ok(Ok(())) => {
                            self.set_state(task.id, TaskState::Completed, None);
                            counter!("metadata_tasks_completed_total").increment(1);
                        }
                        Ok(Err(err)) => {
                            error!(task_id = %task.id, error = %err, "Metadata collection failed");
                            self.set_state(task.id, TaskState::Failed, Some(err));
                            counter!("metadata_tasks_failed_total").increment(1);
                        }
                        Err(_) => {
                            error!(task_id = %task.id, "Metadata collection timed out");
                            self.set_state(
                                task.id,
                                TaskState::Failed,
                                Some(format!("timed out after {:?}", timeout)),
                            );
                            counter!("metadata_tasks_failed_total").increment(1);
                        }
                    }
                }
            }
        }

        info!("Metadata collection worker stopped");
    }

    async fn collect(&self, task: &CollectionTask) -> Result<(), String> {
        let connection = self
            .connections
            .get_by_id(task.connection_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("connection {} not found", task.connection_id))?;

        let credentials = self
            .connections
            .decrypt_credentials(&connection)
            .await
            .map_err(|e| e.to_string())?;
        let connector = self
            .registry
            .create(&connection, &credentials)
            .map_err(|e| e.to_string())?;

        let wants_schema = task
            .params
            .refresh_types
            .iter()
            .any(|t| matches!(t, MetadataType::Tables | MetadataType::Columns));
        let wants_statistics = task
            .params
            .refresh_types
            .contains(&MetadataType::Statistics);

        let mut snapshot = None;
        if wants_schema {
            let collected = connector
                .fetch_schema_snapshot(task.params.table_limit)
                .await
                .map_err(|e| e.to_string())?;

            let verified = self
                .storage
                .store_schema_snapshot(connection.id, &collected)
                .await
                .map_err(|e| e.to_string())?;
            if !verified {
                return Err("schema snapshot verification failed".to_string());
            }

            self.registry.cache_snapshot(connection.id, collected.clone());
            snapshot = Some(collected);
        }

        if wants_statistics {
            let tables: Vec<String> = match &snapshot {
                Some(snapshot) => snapshot
                    .tables
                    .iter()
                    .map(|table| table.name.clone())
                    .collect(),
                None => self
                    .storage
                    .load_schema_snapshot(connection.id)
                    .await
                    .map_err(|e| e.to_string())?
                    .map(|snapshot| {
                        snapshot
                            .tables
                            .iter()
                            .map(|table| table.name.clone())
                            .collect()
                    })
                    .unwrap_or_else(Vec::new),
            };

            let mut row_counts = serde_json::Map::new();
            for table in tables.iter().take(task.params.table_limit) {
                let query = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
                match connector
                    .fetch_scalar(&query, Duration::from_secs(60))
                    .await
                {
                    Ok(value) => {
                        row_counts.insert(table.clone(), value);
                    }
                    Err(err) => {
                        warn!(table = %table, error = %err, "Failed to collect row count");
                    }
                }
            }

            let payload = json!({
                "row_counts": row_counts,
                "count": row_counts.len(),
                "depth": task.params.depth,
                "trigger": task.params.trigger,
            });
            let verified = self
                .storage
                .store_verified(connection.id, MetadataType::Statistics, payload)
                .await
                .map_err(|e| e.to_string())?;
            if !verified {
                return Err("statistics snapshot verification failed".to_string());
            }
        }

        Ok(())
    }

    fn set_state(&self, task_id: Uuid, state: TaskState, error: Option<String>) {
        if let Ok(mut statuses) = self.statuses.lock()
            && let Some(status) = statuses.get_mut(&task_id)
        {
            status.state = state;
            status.error = error;
            if matches!(state, TaskState::Completed | TaskState::Failed) {
                status.finished_at = Some(Utc::now());
            }
        }
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Bridges the event bus into the metadata worker.
pub struct MetadataEventHandler {
    manager: Arc<MetadataTaskManager>,
}

impl MetadataEventHandler {
    pub fn new(manager: Arc<MetadataTaskManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl EventHandler for MetadataEventHandler {
    fn name(&self) -> &'static str {
        "metadata_refresh_trigger"
    }

    async fn handle(&self, event: &AutomationEvent) -> anyhow::Result<()> {
        let Some(connection_id) = event.connection_id else {
            return Ok(());
        };
        self.manager
            .handle_metadata_event(event.event_type, connection_id, &event.data);
        Ok(())
    }
}
