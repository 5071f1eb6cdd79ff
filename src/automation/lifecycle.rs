//! Automation service lifecycle
//!
//! The composition root of the automation core: builds the event bus,
//! connector registry, metadata worker, executors and orchestrator once,
//! wires the event handlers, and owns ordered startup and shutdown.
//! Environment gating is decided here and passed down as plain
//! constructor state.

use std::sync::Arc;

use anyhow::Context;
use sea_orm::DatabaseConnection;
use serde_json::{Value as JsonValue, json};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::events::EventBus;
use super::executor::TaskExecutor;
use super::notifier::WebhookNotifier;
use super::orchestrator::Orchestrator;
use crate::config::AppConfig;
use crate::connectors::ConnectorRegistry;
use crate::crypto::CryptoKey;
use crate::metadata::worker::{MetadataEventHandler, MetadataTaskManager};
use crate::repositories::automation_config::AutomationConfigRepository;

pub struct AutomationService {
    environment: String,
    scheduler_enabled: bool,
    db: DatabaseConnection,
    orchestrator: Orchestrator,
    bus: Arc<EventBus>,
    registry: Arc<ConnectorRegistry>,
    metadata_tasks: Arc<MetadataTaskManager>,
    metadata_shutdown: CancellationToken,
    crypto_key: Option<CryptoKey>,
}

impl AutomationService {
    /// Build the whole automation stack. Subsystems start in order:
    /// (1) the HTTP layer registers routes against this service,
    /// (2) `start_all` starts the orchestrator (gated by environment),
    /// (3) the metadata integration hook is live once the bus handlers
    /// are registered here.
    pub fn new(db: DatabaseConnection, config: &AppConfig) -> anyhow::Result<Self> {
        let crypto_key = match &config.crypto_key {
            Some(bytes) => {
                Some(CryptoKey::new(bytes.clone()).context("invalid credential crypto key")?)
            }
            None => None,
        };

        let registry = Arc::new(ConnectorRegistry::new());
        let bus = Arc::new(EventBus::new(db.clone()));

        let metadata_shutdown = CancellationToken::new();
        let metadata_tasks = MetadataTaskManager::start(
            db.clone(),
            crypto_key.clone(),
            registry.clone(),
            metadata_shutdown.clone(),
        );

        bus.register_handler(Arc::new(WebhookNotifier::new(
            db.clone(),
            config.notification_webhook_secret.clone(),
        )));
        bus.register_handler(Arc::new(MetadataEventHandler::new(metadata_tasks.clone())));

        let executor = Arc::new(TaskExecutor::new(
            db.clone(),
            crypto_key.clone(),
            registry.clone(),
            metadata_tasks.clone(),
            bus.clone(),
        ));

        let scheduler_enabled = config.scheduler_enabled();
        let orchestrator = Orchestrator::new(
            db.clone(),
            config.scheduler.clone(),
            scheduler_enabled,
            executor,
            bus.clone(),
        );

        info!(
            environment = %config.environment,
            scheduler_enabled,
            "Automation service initialised"
        );

        Ok(Self {
            environment: config.environment.clone(),
            scheduler_enabled,
            db,
            orchestrator,
            bus,
            registry,
            metadata_tasks,
            metadata_shutdown,
            crypto_key,
        })
    }

    /// Start every background subsystem. When gating disables the
    /// scheduler the call is a no-op and only the HTTP surface stays
    /// active.
    pub fn start_all(&self) {
        self.orchestrator.start();
    }

    /// Stop subsystems in reverse order: orchestrator (with its worker
    /// grace), then the metadata worker.
    pub async fn stop_all(&self) {
        self.orchestrator.stop().await;
        self.metadata_shutdown.cancel();
        info!("Automation service stopped");
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn registry(&self) -> Arc<ConnectorRegistry> {
        self.registry.clone()
    }

    pub fn metadata_tasks(&self) -> Arc<MetadataTaskManager> {
        self.metadata_tasks.clone()
    }

    pub fn crypto_key(&self) -> Option<CryptoKey> {
        self.crypto_key.clone()
    }

    /// Snapshot of system state for the status endpoints.
    pub async fn system_status(&self) -> JsonValue {
        let orchestrator = self.orchestrator.stats().await;
        let global_config = AutomationConfigRepository::new(self.db.clone())
            .get_global_config()
            .await
            .ok()
            .flatten();

        json!({
            "environment": self.environment,
            "scheduler_enabled": self.scheduler_enabled,
            "orchestrator": orchestrator,
            "global_config": global_config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    fn development_config() -> AppConfig {
        AppConfig {
            environment: "development".to_string(),
            enable_automation_scheduler: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn development_without_flag_keeps_scheduler_inert() {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");

        let service =
            AutomationService::new(db, &development_config()).expect("build service");
        service.start_all();
        assert!(!service.orchestrator().is_running());

        let status = service.system_status().await;
        assert_eq!(status["scheduler_enabled"], false);
        assert_eq!(status["environment"], "development");

        service.stop_all().await;
    }

    #[tokio::test]
    async fn production_starts_and_stops_cleanly() {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");

        let config = AppConfig {
            environment: "production".to_string(),
            ..Default::default()
        };
        let service = AutomationService::new(db, &config).expect("build service");

        service.start_all();
        assert!(service.orchestrator().is_running());

        service.stop_all().await;
        assert!(!service.orchestrator().is_running());
    }
}
