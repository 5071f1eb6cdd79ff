//! Automation orchestrator
//!
//! The single control loop of the automation core: one long-lived ticker
//! discovers due scheduled jobs every minute, filters duplicates through
//! the status tracker, and dispatches survivors onto a bounded worker
//! pool. The ticker never waits on task completion and never dies on a
//! per-job error.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use metrics::{counter, gauge, histogram};
use sea_orm::DatabaseConnection;
use serde_json::{Value as JsonValue, json};
use tokio::sync::Semaphore;
use tokio::time::{Duration, Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::events::{AutomationEvent, EventBus, EventType};
use super::executor::TaskExecutor;
use super::schedule::ScheduleManager;
use super::status::StatusTracker;
use super::types::AutomationType;
use crate::config::SchedulerConfig;
use crate::error::TaskError;
use crate::metadata::analytics::ChangeAnalytics;
use crate::repositories::automation_job::AutomationJobRepository;
use crate::repositories::scheduled_job::ScheduledJobRepository;

/// Change-analytics counters idle longer than this are dropped during the
/// periodic purge.
const ANALYTICS_RETENTION_DAYS: i64 = 90;

/// Result of an immediate (manual) run request.
#[derive(Debug, Default)]
pub struct ImmediateRunOutcome {
    pub jobs_created: Vec<Uuid>,
    pub prevented_duplicates: Vec<String>,
}

#[derive(Debug, Default)]
struct TickStats {
    due: u64,
    dispatched: u64,
    skipped_batch_duplicate: u64,
    skipped_running: u64,
    skipped_recent: u64,
    errors: u64,
}

// Cloned into spawned tasks; every field is a cheap handle.
#[derive(Clone)]
pub struct Orchestrator {
    config: SchedulerConfig,
    enabled: bool,
    schedule_manager: ScheduleManager,
    status: StatusTracker,
    executor: Arc<TaskExecutor>,
    jobs: AutomationJobRepository,
    scheduled: ScheduledJobRepository,
    analytics: ChangeAnalytics,
    bus: Arc<EventBus>,
    workers: Arc<Semaphore>,
    cancellations: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    shutdown: CancellationToken,
    running: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        db: DatabaseConnection,
        config: SchedulerConfig,
        enabled: bool,
        executor: Arc<TaskExecutor>,
        bus: Arc<EventBus>,
    ) -> Self {
        let worker_count = config.worker_count.max(1);
        Self {
            config,
            enabled,
            schedule_manager: ScheduleManager::new(db.clone()),
            status: StatusTracker::new(db.clone()),
            executor,
            jobs: AutomationJobRepository::new(db.clone()),
            scheduled: ScheduledJobRepository::new(db.clone()),
            analytics: ChangeAnalytics::new(db),
            bus,
            workers: Arc::new(Semaphore::new(worker_count)),
            cancellations: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn schedule_manager(&self) -> &ScheduleManager {
        &self.schedule_manager
    }

    pub fn status_tracker(&self) -> &StatusTracker {
        &self.status
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the ticker. Idempotent; a no-op when gating disabled the
    /// scheduler for this environment.
    pub fn start(&self) {
        if !self.enabled {
            info!("Automation orchestrator disabled for this environment");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Automation orchestrator already running");
            return;
        }

        info!(
            workers = self.config.worker_count,
            tick_seconds = self.config.tick_interval_seconds,
            "Starting automation orchestrator"
        );
        let orchestrator = self.clone();
        tokio::spawn(orchestrator.run());
    }

    /// Signal the ticker and workers to quiesce and wait up to the
    /// configured grace for in-flight work before abandoning it.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping automation orchestrator");
        self.shutdown.cancel();

        let worker_count = self.config.worker_count.max(1) as u32;
        let grace = Duration::from_secs(self.config.shutdown_grace_seconds);
        match timeout(grace, self.workers.acquire_many(worker_count)).await {
            Ok(Ok(_permits)) => info!("All automation workers drained"),
            Ok(Err(_)) => {}
            Err(_) => warn!(
                grace_seconds = self.config.shutdown_grace_seconds,
                "Workers still busy after shutdown grace; abandoning"
            ),
        }
        self.workers.close();

        info!("Automation orchestrator stopped");
    }

    async fn run(self) {
        info!("Automation orchestrator loop started");
        let tick_interval = Duration::from_secs(self.config.tick_interval_seconds);
        let purge_interval = Duration::from_secs(self.config.purge_interval_seconds);
        let mut last_purge = Instant::now();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Automation orchestrator shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "Orchestrator tick failed");
                    }
                    histogram!("automation_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);

                    if last_purge.elapsed() >= purge_interval {
                        self.purge_old_jobs().await;
                        last_purge = Instant::now();
                    }
                }
            }
        }

        info!("Automation orchestrator loop stopped");
    }

    #[instrument(skip_all)]
    async fn tick(&self) -> Result<(), sea_orm::DbErr> {
        let due_jobs = self
            .schedule_manager
            .get_due_jobs(self.config.due_buffer_minutes)
            .await?;

        let mut stats = TickStats {
            due: due_jobs.len() as u64,
            ..TickStats::default()
        };

        let mut seen: HashSet<(Uuid, String)> = HashSet::new();

        for scheduled_job in due_jobs {
            let key = (
                scheduled_job.connection_id,
                scheduled_job.automation_type.clone(),
            );
            if seen.contains(&key) {
                stats.skipped_batch_duplicate += 1;
                continue;
            }

            if self
                .status
                .is_job_running(scheduled_job.connection_id, &scheduled_job.automation_type)
                .await
            {
                stats.skipped_running += 1;
                continue;
            }

            if self
                .status
                .has_recent_job(
                    scheduled_job.connection_id,
                    &scheduled_job.automation_type,
                    self.config.recent_job_minutes,
                )
                .await
            {
                stats.skipped_recent += 1;
                continue;
            }

            let Ok(automation_type) = scheduled_job.automation_type.parse::<AutomationType>()
            else {
                warn!(
                    automation_type = %scheduled_job.automation_type,
                    "Scheduled job carries unknown automation type"
                );
                stats.errors += 1;
                continue;
            };

            match self
                .dispatch(
                    scheduled_job.connection_id,
                    automation_type,
                    json!({
                        "trigger": "user_schedule",
                        "scheduled_job_id": scheduled_job.id,
                    }),
                )
                .await
            {
                Ok(_job_id) => {
                    stats.dispatched += 1;
                    seen.insert(key);
                    if let Err(err) = self
                        .schedule_manager
                        .mark_job_executed(scheduled_job.id)
                        .await
                    {
                        error!(
                            scheduled_job_id = %scheduled_job.id,
                            error = %err,
                            "Failed to mark scheduled job as executed"
                        );
                    }
                }
                Err(err) => {
                    stats.errors += 1;
                    error!(
                        connection_id = %scheduled_job.connection_id,
                        automation_type = %scheduled_job.automation_type,
                        error = %err,
                        "Failed to dispatch scheduled job"
                    );
                }
            }
        }

        counter!("automation_jobs_dispatched_total").increment(stats.dispatched);
        gauge!("automation_workers_available")
            .set(self.workers.available_permits() as f64);

        if stats.due > 0 {
            debug!(
                due = stats.due,
                dispatched = stats.dispatched,
                skipped_batch = stats.skipped_batch_duplicate,
                skipped_running = stats.skipped_running,
                skipped_recent = stats.skipped_recent,
                errors = stats.errors,
                "Orchestrator tick completed"
            );
        }

        Ok(())
    }

    /// Create the job row and hand it to the worker pool. The ticker does
    /// not wait for a permit; queueing happens inside the spawned task.
    async fn dispatch(
        &self,
        connection_id: Uuid,
        automation_type: AutomationType,
        job_config: JsonValue,
    ) -> Result<Uuid, sea_orm::DbErr> {
        let job = self
            .jobs
            .insert_scheduled(connection_id, automation_type.as_str(), Some(job_config))
            .await?;

        self.bus
            .publish(
                AutomationEvent::new(
                    EventType::JobScheduled,
                    json!({
                        "job_id": job.id,
                        "automation_type": automation_type.as_str(),
                    }),
                )
                .for_connection(connection_id),
            )
            .await;

        let token = CancellationToken::new();
        if let Ok(mut cancellations) = self.cancellations.lock() {
            cancellations.insert(job.id, token.clone());
        }

        let orchestrator = self.clone();
        let job_id = job.id;
        tokio::spawn(async move {
            let permit = match orchestrator.workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    // Pool closed during shutdown; the job fails
                    // immediately rather than lingering as scheduled.
                    orchestrator
                        .status
                        .mark_job_failed(job_id, "worker pool unavailable")
                        .await;
                    orchestrator.forget_cancellation(job_id);
                    return;
                }
            };

            orchestrator
                .run_job(job_id, connection_id, automation_type, token)
                .await;

            drop(permit);
            orchestrator.forget_cancellation(job_id);
        });

        Ok(job_id)
    }

    async fn run_job(
        &self,
        job_id: Uuid,
        connection_id: Uuid,
        automation_type: AutomationType,
        token: CancellationToken,
    ) {
        if token.is_cancelled() {
            self.status.mark_job_cancelled(job_id).await;
            return;
        }

        if !self.status.mark_job_running(job_id).await {
            // Cancelled (or otherwise finalised) between dispatch and
            // pickup; nothing to run.
            debug!(job_id = %job_id, "Job no longer runnable at pickup");
            return;
        }

        self.bus
            .publish(
                AutomationEvent::new(
                    EventType::JobStarted,
                    json!({
                        "job_id": job_id,
                        "automation_type": automation_type.as_str(),
                    }),
                )
                .for_connection(connection_id),
            )
            .await;

        let result = tokio::select! {
            _ = token.cancelled() => Err(TaskError::Cancelled),
            result = self.executor.execute(job_id, connection_id, automation_type) => result,
        };

        match result {
            Ok(summary) => {
                self.status.mark_job_completed(job_id, Some(summary)).await;
                self.bus
                    .publish(
                        AutomationEvent::new(
                            EventType::JobCompleted,
                            json!({
                                "job_id": job_id,
                                "automation_type": automation_type.as_str(),
                            }),
                        )
                        .for_connection(connection_id),
                    )
                    .await;
                counter!("automation_jobs_completed_total").increment(1);
            }
            Err(TaskError::Cancelled) => {
                self.status.mark_job_cancelled(job_id).await;
                counter!("automation_jobs_cancelled_total").increment(1);
            }
            Err(err) => {
                self.status.mark_job_failed(job_id, &err.to_string()).await;
                counter!("automation_jobs_failed_total").increment(1);
            }
        }
    }

    /// Create and dispatch jobs outside the ticker, subject to the same
    /// duplicate and recent-job filters (with the tighter manual window).
    pub async fn schedule_immediate_run(
        &self,
        connection_id: Uuid,
        automation_type: Option<AutomationType>,
        user_id: Option<Uuid>,
    ) -> ImmediateRunOutcome {
        let types: Vec<AutomationType> = match automation_type {
            Some(automation_type) => vec![automation_type],
            None => AutomationType::ALL.to_vec(),
        };

        let mut outcome = ImmediateRunOutcome::default();

        for automation_type in types {
            if self
                .status
                .is_job_running(connection_id, automation_type.as_str())
                .await
            {
                outcome
                    .prevented_duplicates
                    .push(automation_type.as_str().to_string());
                continue;
            }
            if self
                .status
                .has_recent_job(
                    connection_id,
                    automation_type.as_str(),
                    self.config.immediate_recent_minutes,
                )
                .await
            {
                outcome
                    .prevented_duplicates
                    .push(automation_type.as_str().to_string());
                continue;
            }

            match self
                .dispatch(
                    connection_id,
                    automation_type,
                    json!({ "trigger": "manual", "user_id": user_id }),
                )
                .await
            {
                Ok(job_id) => outcome.jobs_created.push(job_id),
                Err(err) => {
                    error!(
                        connection_id = %connection_id,
                        automation_type = %automation_type,
                        error = %err,
                        "Failed to create immediate job"
                    );
                }
            }
        }

        let mut event = AutomationEvent::new(
            EventType::ManualTrigger,
            json!({
                "jobs_created": outcome.jobs_created,
                "prevented_duplicates": outcome.prevented_duplicates,
            }),
        )
        .for_connection(connection_id);
        if let Some(user_id) = user_id {
            event = event.by_user(user_id);
        }
        self.bus.publish(event).await;

        outcome
    }

    /// Cancel a job: flip the store row and fire the in-memory token so a
    /// running executor observes it at its next suspension point.
    pub async fn cancel_job(&self, job_id: Uuid) -> bool {
        let cancelled = self.status.mark_job_cancelled(job_id).await;

        let token = self
            .cancellations
            .lock()
            .ok()
            .and_then(|cancellations| cancellations.get(&job_id).cloned());
        if let Some(token) = token {
            token.cancel();
        }

        if cancelled {
            self.bus
                .publish(AutomationEvent::new(
                    EventType::JobCancelled,
                    json!({ "job_id": job_id }),
                ))
                .await;
        }

        cancelled
    }

    pub(crate) async fn purge_old_jobs(&self) {
        match self
            .jobs
            .purge_terminal(self.config.purge_retention_days)
            .await
        {
            Ok(0) => {}
            Ok(purged) => info!(purged, "Purged old automation jobs"),
            Err(err) => error!(error = %err, "Failed to purge old jobs"),
        }

        match self.analytics.prune_stale(ANALYTICS_RETENTION_DAYS).await {
            Ok(0) => {}
            Ok(pruned) => info!(pruned, "Pruned stale change analytics"),
            Err(err) => error!(error = %err, "Failed to prune change analytics"),
        }
    }

    /// Snapshot of orchestrator state for the status endpoints.
    pub async fn stats(&self) -> JsonValue {
        let scheduled_jobs = self.scheduled.count_enabled().await.unwrap_or(0);
        let running_jobs = self.jobs.count_all_running().await.unwrap_or(0);
        let worker_count = self.config.worker_count.max(1);
        let active_workers = worker_count - self.workers.available_permits().min(worker_count);

        json!({
            "running": self.is_running(),
            "scheduler_enabled": self.enabled,
            "worker_count": self.config.worker_count,
            "active_workers": active_workers,
            "running_jobs": running_jobs,
            "scheduled_jobs_count": scheduled_jobs,
            "tick_interval_seconds": self.config.tick_interval_seconds,
        })
    }

    fn forget_cancellation(&self, job_id: Uuid) {
        if let Ok(mut cancellations) = self.cancellations.lock() {
            cancellations.remove(&job_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::types::JobStatus;
    use crate::connectors::ConnectorRegistry;
    use crate::metadata::worker::MetadataTaskManager;
    use chrono::Utc;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ActiveModelTrait, Database, Set};

    async fn build_orchestrator(db: &DatabaseConnection, enabled: bool) -> Orchestrator {
        let registry = Arc::new(ConnectorRegistry::new());
        let bus = Arc::new(EventBus::new(db.clone()));
        let metadata_tasks = MetadataTaskManager::start(
            db.clone(),
            None,
            registry.clone(),
            CancellationToken::new(),
        );
        let executor = Arc::new(TaskExecutor::new(
            db.clone(),
            None,
            registry,
            metadata_tasks,
            bus.clone(),
        ));

        Orchestrator::new(db.clone(), SchedulerConfig::default(), enabled, executor, bus)
    }

    async fn setup() -> (DatabaseConnection, Orchestrator, Uuid) {
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

        let orchestrator = build_orchestrator(&db, true).await;
        (db, orchestrator, connection_id)
    }

    #[tokio::test]
    async fn immediate_run_prevents_duplicates_within_window() {
        let (_db, orchestrator, connection_id) = setup().await;

        let first = orchestrator
            .schedule_immediate_run(
                connection_id,
                Some(AutomationType::SchemaChangeDetection),
                None,
            )
            .await;
        assert_eq!(first.jobs_created.len(), 1);
        assert!(first.prevented_duplicates.is_empty());

        let second = orchestrator
            .schedule_immediate_run(
                connection_id,
                Some(AutomationType::SchemaChangeDetection),
                None,
            )
            .await;
        assert!(second.jobs_created.is_empty());
        assert_eq!(
            second.prevented_duplicates,
            vec!["schema_change_detection".to_string()]
        );
    }

    #[tokio::test]
    async fn immediate_run_without_type_covers_all_automations() {
        let (_db, orchestrator, connection_id) = setup().await;

        let outcome = orchestrator
            .schedule_immediate_run(connection_id, None, None)
            .await;
        assert_eq!(outcome.jobs_created.len(), 3);
        assert!(outcome.prevented_duplicates.is_empty());
    }

    #[tokio::test]
    async fn tick_skips_running_and_batch_duplicates() {
        let (db, orchestrator, connection_id) = setup().await;

        // Two due rows for the same (connection, type) pair; invariant
        // violations in the store must not double-dispatch.
        let now = Utc::now();
        for _ in 0..2 {
            let row = crate::models::scheduled_job::ActiveModel {
                id: Set(Uuid::new_v4()),
                connection_id: Set(connection_id),
                automation_type: Set("validation_automation".to_string()),
                schedule_type: Set("daily".to_string()),
                scheduled_time: Set("02:00".to_string()),
                timezone: Set("UTC".to_string()),
                days_of_week: Set(None),
                enabled: Set(true),
                next_run_at: Set(Some(now.into())),
                last_run_at: Set(None),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            };
            row.insert(&db).await.expect("insert scheduled job");
        }

        orchestrator.tick().await.expect("tick");

        let jobs = AutomationJobRepository::new(db.clone())
            .list(Some(connection_id), None, 10)
            .await
            .expect("list jobs");
        assert_eq!(jobs.len(), 1, "batch duplicate must be filtered");

        // A second tick inside the rate-limit window dispatches nothing.
        orchestrator.tick().await.expect("second tick");
        let jobs = AutomationJobRepository::new(db)
            .list(Some(connection_id), None, 10)
            .await
            .expect("list jobs");
        assert_eq!(jobs.len(), 1, "recent-job filter must hold");
    }

    #[tokio::test]
    async fn cancel_flips_scheduled_job_to_cancelled() {
        let (db, orchestrator, connection_id) = setup().await;

        let repo = AutomationJobRepository::new(db);
        let job = repo
            .insert_scheduled(connection_id, "metadata_refresh", None)
            .await
            .expect("insert job");

        assert!(orchestrator.cancel_job(job.id).await);

        let stored = repo.get_by_id(job.id).await.expect("fetch").expect("exists");
        assert_eq!(stored.status, JobStatus::Cancelled.as_str());
    }

    #[tokio::test]
    async fn start_is_gated_and_idempotent() {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");

        let gated = build_orchestrator(&db, false).await;
        gated.start();
        assert!(!gated.is_running());

        let enabled = build_orchestrator(&db, true).await;
        enabled.start();
        assert!(enabled.is_running());
        enabled.start();
        assert!(enabled.is_running());
        enabled.stop().await;
        assert!(!enabled.is_running());
    }

    #[tokio::test]
    async fn purge_removes_only_old_terminal_jobs() {
        let (db, orchestrator, connection_id) = setup().await;

        let repo = AutomationJobRepository::new(db.clone());
        let old_job = repo
            .insert_scheduled(connection_id, "metadata_refresh", None)
            .await
            .expect("insert job");
        repo.transition(old_job.id, JobStatus::Failed, None, None)
            .await
            .expect("fail job");

        // Age the terminal job past the retention window.
        use crate::models::automation_job;
        use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
        let cutoff = Utc::now() - chrono::Duration::days(8);
        let aged = automation_job::ActiveModel {
            created_at: Set(cutoff.into()),
            ..Default::default()
        };
        automation_job::Entity::update_many()
            .set(aged)
            .filter(automation_job::Column::Id.eq(old_job.id))
            .exec(&db)
            .await
            .expect("age job");

        let fresh_job = repo
            .insert_scheduled(connection_id, "validation_automation", None)
            .await
            .expect("insert fresh job");

        orchestrator.purge_old_jobs().await;

        assert!(repo.get_by_id(old_job.id).await.expect("fetch").is_none());
        assert!(repo.get_by_id(fresh_job.id).await.expect("fetch").is_some());
    }
}
