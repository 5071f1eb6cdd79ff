//! Automation configuration repository
//!
//! Persistence for the three configuration levels (global, per-connection,
//! per-table) plus the transactional replacement of a connection's
//! schedule config together with its materialised scheduled jobs.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::automation_connection_config::{
    self, Entity as AutomationConnectionConfig,
};
use crate::models::automation_global_config::{self, Entity as AutomationGlobalConfig};
use crate::models::automation_table_config::{self, Entity as AutomationTableConfig};
use crate::models::scheduled_job::{self, Entity as ScheduledJob};

/// A scheduled-job row to materialise during a schedule replacement.
#[derive(Debug, Clone)]
pub struct NewScheduledJob {
    pub automation_type: String,
    pub schedule_type: String,
    pub scheduled_time: String,
    pub timezone: String,
    pub days_of_week: Option<JsonValue>,
    pub next_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct AutomationConfigRepository {
    db: DatabaseConnection,
}

impl AutomationConfigRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Fetch the stored schedule config for a connection, if any.
    pub async fn get_connection_config(
        &self,
        connection_id: Uuid,
    ) -> Result<Option<automation_connection_config::Model>, DbErr> {
        AutomationConnectionConfig::find()
            .filter(automation_connection_config::Column::ConnectionId.eq(connection_id))
            .one(&self.db)
            .await
    }

    /// Replace a connection's schedule config and its scheduled jobs as a
    /// single unit of work: upsert the config row, delete existing job
    /// rows, insert the recomputed set.
    pub async fn replace_schedule(
        &self,
        connection_id: Uuid,
        schedule_config: JsonValue,
        jobs: Vec<NewScheduledJob>,
    ) -> Result<(), DbErr> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let existing = AutomationConnectionConfig::find()
            .filter(automation_connection_config::Column::ConnectionId.eq(connection_id))
            .one(&txn)
            .await?;

        match existing {
            Some(model) => {
                let mut active: automation_connection_config::ActiveModel = model.into();
                active.schedule_config = Set(schedule_config);
                active.updated_at = Set(now.into());
                active.update(&txn).await?;
            }
            None => {
                let active = automation_connection_config::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    connection_id: Set(connection_id),
                    schedule_config: Set(schedule_config),
                    created_at: Set(now.into()),
                    updated_at: Set(now.into()),
                };
                active.insert(&txn).await?;
            }
        }

        ScheduledJob::delete_many()
            .filter(scheduled_job::Column::ConnectionId.eq(connection_id))
            .exec(&txn)
            .await?;

        for job in jobs {
            let active = scheduled_job::ActiveModel {
                id: Set(Uuid::new_v4()),
                connection_id: Set(connection_id),
                automation_type: Set(job.automation_type),
                schedule_type: Set(job.schedule_type),
                scheduled_time: Set(job.scheduled_time),
                timezone: Set(job.timezone),
                days_of_week: Set(job.days_of_week),
                enabled: Set(true),
                next_run_at: Set(job.next_run_at.map(Into::into)),
                last_run_at: Set(None),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            };
            active.insert(&txn).await?;
        }

        txn.commit().await
    }

    /// Fetch the singleton global config document, if present.
    pub async fn get_global_config(&self) -> Result<Option<JsonValue>, DbErr> {
        Ok(AutomationGlobalConfig::find()
            .one(&self.db)
            .await?
            .map(|model| model.config))
    }

    /// Fetch the per-table override config for (connection, table).
    pub async fn get_table_config(
        &self,
        connection_id: Uuid,
        table_name: &str,
    ) -> Result<Option<automation_table_config::Model>, DbErr> {
        AutomationTableConfig::find()
            .filter(automation_table_config::Column::ConnectionId.eq(connection_id))
            .filter(automation_table_config::Column::TableName.eq(table_name))
            .one(&self.db)
            .await
    }

    /// Whether an automation type is disabled for a table by its override
    /// config. Absent rows and absent keys mean enabled.
    pub async fn is_table_automation_disabled(
        &self,
        connection_id: Uuid,
        table_name: &str,
        automation_type: &str,
    ) -> Result<bool, DbErr> {
        let Some(model) = self.get_table_config(connection_id, table_name).await? else {
            return Ok(false);
        };

        Ok(model
            .config
            .get(automation_type)
            .and_then(|entry| entry.get("enabled"))
            .and_then(JsonValue::as_bool)
            == Some(false))
    }
}
