//! Profile history
//!
//! Ad-hoc table profiling plus storage and retrieval of point-in-time
//! profile snapshots with freshness bucketing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde_json::{Value as JsonValue, json};
use tracing::warn;
use uuid::Uuid;

use crate::automation::events::{AutomationEvent, EventBus, EventType};
use crate::connectors::ConnectorRegistry;
use crate::crypto::CryptoKey;
use crate::error::TaskError;
use crate::metadata::storage::Freshness;
use crate::repositories::connection::ConnectionRepository;
use crate::repositories::profile_history::ProfileHistoryRepository;

const PROFILE_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ProfileHistoryManager {
    connections: ConnectionRepository,
    history: ProfileHistoryRepository,
    registry: Arc<ConnectorRegistry>,
    bus: Arc<EventBus>,
}

impl ProfileHistoryManager {
    pub fn new(
        db: DatabaseConnection,
        crypto_key: Option<CryptoKey>,
        registry: Arc<ConnectorRegistry>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            connections: ConnectionRepository::new(db.clone(), crypto_key),
            history: ProfileHistoryRepository::new(db),
            registry,
            bus,
        }
    }

    /// Run an ad-hoc profile of one table against the target database,
    /// persist the snapshot, and return it.
    pub async fn profile_table(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
        table_name: &str,
    ) -> Result<JsonValue, TaskError> {
        let connection = self
            .connections
            .get_for_organization(organization_id, connection_id)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?
            .ok_or(TaskError::ConnectionNotFound(connection_id))?;

        let credentials = self
            .connections
            .decrypt_credentials(&connection)
            .await
            .map_err(|e| TaskError::Upstream(e.to_string()))?;
        let connector = self
            .registry
            .create(&connection, &credentials)
            .map_err(|e| TaskError::Upstream(e.to_string()))?;

        let quoted = quote_identifier(table_name);
        let row_count = connector
            .fetch_scalar(
                &format!("SELECT COUNT(*) FROM {}", quoted),
                PROFILE_QUERY_TIMEOUT,
            )
            .await
            .map_err(|e| TaskError::Upstream(e.to_string()))?;

        // Column-level stats ride on the latest schema snapshot when one
        // is cached; the profile stays useful without it.
        let column_count = self
            .registry
            .cached_snapshot(connection_id)
            .and_then(|snapshot| {
                snapshot
                    .tables
                    .iter()
                    .find(|table| table.name.eq_ignore_ascii_case(table_name))
                    .map(|table| table.columns.len())
            });

        let profile = json!({
            "table": table_name,
            "row_count": row_count,
            "column_count": column_count,
            "profiled_at": Utc::now().to_rfc3339(),
        });

        let profile_id = self
            .history
            .save(organization_id, connection_id, table_name, profile.clone())
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?;

        self.bus
            .publish(
                AutomationEvent::new(
                    EventType::ProfileCompletion,
                    json!({ "table_name": table_name, "profile_id": profile_id }),
                )
                .for_connection(connection_id)
                .for_organization(organization_id),
            )
            .await;

        Ok(json!({ "id": profile_id, "profile": profile }))
    }

    /// Profile history for a table, newest first, with freshness buckets.
    pub async fn list_history(
        &self,
        organization_id: Uuid,
        connection_id: Option<Uuid>,
        table_name: Option<&str>,
        limit: u64,
    ) -> Result<Vec<JsonValue>, TaskError> {
        let rows = self
            .history
            .list(organization_id, connection_id, table_name, limit)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?;

        let now = Utc::now();
        Ok(rows
            .into_iter()
            .map(|row| {
                let collected_at = row.collected_at.with_timezone(&Utc);
                json!({
                    "id": row.id,
                    "connection_id": row.connection_id,
                    "table_name": row.table_name,
                    "profile": row.profile,
                    "collected_at": collected_at.to_rfc3339(),
                    "freshness": Freshness::from_age(collected_at, now).as_str(),
                })
            })
            .collect())
    }

    /// The most recent profile of a table, if any.
    pub async fn latest(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
        table_name: &str,
    ) -> Result<Option<JsonValue>, TaskError> {
        let row = self
            .history
            .latest(organization_id, connection_id, table_name)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?;

        Ok(row.map(|row| {
            let collected_at = row.collected_at.with_timezone(&Utc);
            json!({
                "id": row.id,
                "profile": row.profile,
                "collected_at": collected_at.to_rfc3339(),
                "freshness": Freshness::from_age(collected_at, Utc::now()).as_str(),
            })
        }))
    }
}

fn quote_identifier(name: &str) -> String {
    let quoted = format!("\"{}\"", name.replace('"', "\"\""));
    if name.chars().any(|c| !c.is_ascii_alphanumeric() && c != '_') {
        warn!(table = %name, "Profiling table with non-standard identifier");
    }
    quoted
}
