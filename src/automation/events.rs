//! Automation event bus
//!
//! Process-local, synchronous pub/sub. Every published event is persisted
//! to the automation_events table (resolving the organization from the
//! connection when not supplied) before handlers run; handler errors are
//! logged and never reach publishers.

use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use metrics::counter;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde_json::Value as JsonValue;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::models::connection::Entity as Connection;
use crate::repositories::automation_event::AutomationEventRepository;

/// The closed set of events the automation and metadata subsystems emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    MetadataRefreshed,
    SchemaChangesDetected,
    ValidationFailuresDetected,
    JobScheduled,
    JobStarted,
    JobCompleted,
    JobFailed,
    JobCancelled,
    ConfigCreated,
    ConfigUpdated,
    ConfigDeleted,
    ValidationFailure,
    ProfileCompletion,
    SchemaChange,
    UserRequest,
    SystemRefresh,
    ManualTrigger,
    AutomationEnabled,
    AutomationDisabled,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MetadataRefreshed => "metadata_refreshed",
            EventType::SchemaChangesDetected => "schema_changes_detected",
            EventType::ValidationFailuresDetected => "validation_failures_detected",
            EventType::JobScheduled => "job_scheduled",
            EventType::JobStarted => "job_started",
            EventType::JobCompleted => "job_completed",
            EventType::JobFailed => "job_failed",
            EventType::JobCancelled => "job_cancelled",
            EventType::ConfigCreated => "config_created",
            EventType::ConfigUpdated => "config_updated",
            EventType::ConfigDeleted => "config_deleted",
            EventType::ValidationFailure => "validation_failure",
            EventType::ProfileCompletion => "profile_completion",
            EventType::SchemaChange => "schema_change",
            EventType::UserRequest => "user_request",
            EventType::SystemRefresh => "system_refresh",
            EventType::ManualTrigger => "manual_trigger",
            EventType::AutomationEnabled => "automation_enabled",
            EventType::AutomationDisabled => "automation_disabled",
        }
    }

    /// Coarse automation category recorded alongside the event row.
    pub fn automation_category(&self) -> &'static str {
        match self {
            EventType::MetadataRefreshed | EventType::SystemRefresh => "metadata_refresh",
            EventType::SchemaChangesDetected | EventType::SchemaChange => "schema_detection",
            EventType::ValidationFailuresDetected | EventType::ValidationFailure => {
                "validation_run"
            }
            EventType::ProfileCompletion => "profiling",
            _ => "general",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event travelling over the bus.
#[derive(Debug, Clone)]
pub struct AutomationEvent {
    pub event_type: EventType,
    pub data: JsonValue,
    pub connection_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
}

impl AutomationEvent {
    pub fn new(event_type: EventType, data: JsonValue) -> Self {
        Self {
            event_type,
            data,
            connection_id: None,
            organization_id: None,
            user_id: None,
        }
    }

    pub fn for_connection(mut self, connection_id: Uuid) -> Self {
        self.connection_id = Some(connection_id);
        self
    }

    pub fn for_organization(mut self, organization_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    pub fn by_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// A subscriber on the bus. Handlers run inline on the publisher's task;
/// failures are contained here.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &AutomationEvent) -> anyhow::Result<()>;
}

/// Process-local event bus backed by the automation_events table.
pub struct EventBus {
    db: DatabaseConnection,
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn register_handler(&self, handler: Arc<dyn EventHandler>) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.push(handler);
        }
    }

    /// Persist and fan out an event. Returns whether the event row was
    /// stored; handler failures do not affect the result.
    pub async fn publish(&self, mut event: AutomationEvent) -> bool {
        // Resolve the owning organization from the connection when the
        // publisher did not carry it.
        if event.organization_id.is_none()
            && let Some(connection_id) = event.connection_id
        {
            match Connection::find_by_id(connection_id).one(&self.db).await {
                Ok(Some(connection)) => {
                    event.organization_id = Some(connection.organization_id);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        connection_id = %connection_id,
                        error = %err,
                        "Could not resolve organization for event"
                    );
                }
            }
        }

        let repo = AutomationEventRepository::new(self.db.clone());
        let stored = match repo
            .insert(
                event.event_type.as_str(),
                event.event_type.automation_category(),
                event.connection_id,
                event.organization_id,
                event.user_id,
                Some(event.data.clone()),
            )
            .await
        {
            Ok(_) => true,
            Err(err) => {
                error!(
                    event_type = %event.event_type,
                    error = %err,
                    "Failed to store automation event"
                );
                false
            }
        };

        counter!(
            "automation_events_published_total",
            "event_type" => event.event_type.as_str()
        )
        .increment(1);

        let handlers: Vec<Arc<dyn EventHandler>> = match self.handlers.read() {
            Ok(handlers) => handlers.clone(),
            Err(_) => Vec::new(),
        };

        for handler in handlers {
            if let Err(err) = handler.handle(&event).await {
                error!(
                    handler = handler.name(),
                    event_type = %event.event_type,
                    error = %err,
                    "Event handler failed"
                );
            } else {
                debug!(
                    handler = handler.name(),
                    event_type = %event.event_type,
                    "Event handled"
                );
            }
        }

        stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ActiveModelTrait, Database, Set};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle(&self, _event: &AutomationEvent) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("handler exploded");
            }
            Ok(())
        }
    }

    async fn setup() -> (DatabaseConnection, Uuid, Uuid) {
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

        (db, connection_id, organization_id)
    }

    #[tokio::test]
    async fn events_are_persisted_with_resolved_organization() {
        let (db, connection_id, organization_id) = setup().await;
        let bus = EventBus::new(db.clone());

        let stored = bus
            .publish(
                AutomationEvent::new(EventType::MetadataRefreshed, json!({"tables": 5}))
                    .for_connection(connection_id),
            )
            .await;
        assert!(stored);

        let repo = AutomationEventRepository::new(db);
        let events = repo
            .list(None, Some(organization_id), None, 10)
            .await
            .expect("list events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "metadata_refreshed");
        assert_eq!(events[0].automation_type, "metadata_refresh");
        assert_eq!(events[0].organization_id, Some(organization_id));
    }

    #[tokio::test]
    async fn handler_failure_does_not_reach_publisher() {
        let (db, connection_id, _) = setup().await;
        let bus = EventBus::new(db);

        let failing = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let healthy = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        bus.register_handler(failing.clone());
        bus.register_handler(healthy.clone());

        let stored = bus
            .publish(
                AutomationEvent::new(EventType::JobFailed, json!({"error": "boom"}))
                    .for_connection(connection_id),
            )
            .await;

        assert!(stored);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
    }
}
