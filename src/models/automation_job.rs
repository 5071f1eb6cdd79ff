//! AutomationJob entity model
//!
//! This module contains the SeaORM entity model for the automation_jobs
//! table, one row per dispatched execution. Status transitions are
//! monotonic: scheduled -> running -> completed | failed | cancelled.

use super::connection::Entity as Connection;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "automation_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub connection_id: Uuid,

    /// Automation type this job executes
    pub job_type: String,

    /// scheduled | running | completed | failed | cancelled
    pub status: String,

    pub scheduled_at: DateTimeWithTimeZone,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub completed_at: Option<DateTimeWithTimeZone>,

    /// Trigger provenance (user schedule, manual, scheduled job id)
    #[sea_orm(column_type = "JsonBinary")]
    pub job_config: Option<JsonValue>,

    #[sea_orm(column_type = "JsonBinary")]
    pub result_summary: Option<JsonValue>,

    pub error_message: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Connection",
        from = "Column::ConnectionId",
        to = "super::connection::Column::Id"
    )]
    Connection,
}

impl Related<Connection> for Entity {
    fn to() -> RelationDef {
        Relation::Connection.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
