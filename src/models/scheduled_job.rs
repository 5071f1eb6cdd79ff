//! ScheduledJob entity model
//!
//! This module contains the SeaORM entity model for the
//! automation_scheduled_jobs table: the materialised "next run" rows the
//! orchestrator polls. At most one row exists per (connection, automation
//! type), enforced by a unique index.

use super::connection::Entity as Connection;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "automation_scheduled_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub connection_id: Uuid,

    /// metadata_refresh | schema_change_detection | validation_automation
    pub automation_type: String,

    /// daily | weekly
    pub schedule_type: String,

    /// Wall-clock time in the user's timezone, HH:MM
    pub scheduled_time: String,

    /// IANA timezone identifier the scheduled time is pinned to
    pub timezone: String,

    /// Weekday names for weekly schedules, JSON array of strings
    #[sea_orm(column_type = "JsonBinary")]
    pub days_of_week: Option<JsonValue>,

    pub enabled: bool,

    /// Next materialised run instant (UTC)
    pub next_run_at: Option<DateTimeWithTimeZone>,

    pub last_run_at: Option<DateTimeWithTimeZone>,

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
