//! End-to-end automation flow tests against an in-memory store.

use std::sync::Arc;

use chrono::Utc;
use datawatch::automation::events::EventBus;
use datawatch::automation::executor::TaskExecutor;
use datawatch::automation::orchestrator::Orchestrator;
use datawatch::automation::schedule::ScheduleManager;
use datawatch::automation::types::ScheduleConfig;
use datawatch::config::SchedulerConfig;
use datawatch::connectors::ConnectorRegistry;
use datawatch::metadata::worker::MetadataTaskManager;
use datawatch::repositories::automation_job::AutomationJobRepository;
use datawatch::repositories::scheduled_job::ScheduledJobRepository;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

async fn seed_connection(db: &DatabaseConnection) -> Uuid {
    let organization_id = Uuid::new_v4();
    let org = datawatch::models::organization::ActiveModel {
        id: Set(organization_id),
        name: Set("Acme Analytics".to_string()),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
    };
    org.insert(db).await.expect("insert organization");

    let connection_id = Uuid::new_v4();
    let connection = datawatch::models::connection::ActiveModel {
        id: Set(connection_id),
        organization_id: Set(organization_id),
        name: Set("warehouse".to_string()),
        connection_type: Set("postgresql".to_string()),
        credentials_ciphertext: Set(None),
        is_default: Set(true),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
    };
    connection.insert(db).await.expect("insert connection");

    connection_id
}

async fn build_orchestrator(db: &DatabaseConnection) -> Orchestrator {
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
    Orchestrator::new(db.clone(), SchedulerConfig::default(), true, executor, bus)
}

#[tokio::test]
async fn enabled_types_materialise_exactly_one_row_each() {
    let db = Database::connect("sqlite::memory:").await.expect("connect");
    Migrator::up(&db, None).await.expect("migrate");
    let connection_id = seed_connection(&db).await;

    let manager = ScheduleManager::new(db.clone());
    let config = ScheduleConfig::from_json(&json!({
        "metadata_refresh": {
            "enabled": true,
            "schedule_type": "daily",
            "time": "02:00",
            "timezone": "America/New_York"
        },
        "schema_change_detection": {
            "enabled": true,
            "schedule_type": "daily",
            "time": "03:00",
            "timezone": "UTC"
        },
        "validation_automation": { "enabled": false }
    }))
    .expect("valid config");

    manager
        .update_connection_schedule(connection_id, &config, None)
        .await
        .expect("update schedule");

    let rows = ScheduledJobRepository::new(db.clone())
        .list_by_connection(connection_id)
        .await
        .expect("list rows");
    assert_eq!(rows.len(), 2);

    let mut pairs: Vec<(Uuid, String)> = rows
        .iter()
        .map(|row| (row.connection_id, row.automation_type.clone()))
        .collect();
    pairs.sort();
    pairs.dedup();
    assert_eq!(pairs.len(), 2, "pairs must be unique");

    let now = Utc::now();
    for row in &rows {
        let next_run = row.next_run_at.expect("next run set").with_timezone(&Utc);
        assert!(next_run > now, "next run must be strictly in the future");
    }
}

#[tokio::test]
async fn due_job_is_dispatched_once_and_rescheduled() {
    let db = Database::connect("sqlite::memory:").await.expect("connect");
    Migrator::up(&db, None).await.expect("migrate");
    let connection_id = seed_connection(&db).await;
    let orchestrator = build_orchestrator(&db).await;

    // Materialise a scheduled row that is due right now. The wall-clock
    // time sits hours behind now so the recomputed next run lands well
    // outside the due window.
    let now = Utc::now();
    let wall_clock = (now - chrono::Duration::hours(6)).format("%H:%M").to_string();
    let scheduled_id = Uuid::new_v4();
    let row = datawatch::models::scheduled_job::ActiveModel {
        id: Set(scheduled_id),
        connection_id: Set(connection_id),
        automation_type: Set("schema_change_detection".to_string()),
        schedule_type: Set("daily".to_string()),
        scheduled_time: Set(wall_clock),
        timezone: Set("UTC".to_string()),
        days_of_week: Set(None),
        enabled: Set(true),
        next_run_at: Set(Some(now.into())),
        last_run_at: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    };
    row.insert(&db).await.expect("insert scheduled job");

    let manager = ScheduleManager::new(db.clone());
    let due = manager.get_due_jobs(5).await.expect("due jobs");
    assert_eq!(due.len(), 1);

    let outcome = orchestrator
        .schedule_immediate_run(
            connection_id,
            Some(datawatch::automation::types::AutomationType::SchemaChangeDetection),
            None,
        )
        .await;
    assert_eq!(outcome.jobs_created.len(), 1);

    manager
        .mark_job_executed(scheduled_id)
        .await
        .expect("mark executed");

    let updated = ScheduledJobRepository::new(db.clone())
        .get_by_id(scheduled_id)
        .await
        .expect("fetch")
        .expect("exists");
    assert!(updated.last_run_at.is_some());
    assert!(updated.next_run_at.expect("next run").with_timezone(&Utc) > now);

    // With the job executed, the row leaves the due window.
    let due_after = manager.get_due_jobs(5).await.expect("due jobs");
    assert!(due_after.is_empty());

    // Exactly one job row exists for the pair.
    let jobs = AutomationJobRepository::new(db)
        .list(Some(connection_id), None, 10)
        .await
        .expect("list jobs");
    assert_eq!(jobs.len(), 1);
}
