//! AutomationEvent entity model
//!
//! Persisted event-bus records; every published event lands here before
//! any handler runs.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "automation_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub event_type: String,

    /// Coarse automation category derived from the event type
    pub automation_type: String,

    pub connection_id: Option<Uuid>,

    pub organization_id: Option<Uuid>,

    pub user_id: Option<Uuid>,

    #[sea_orm(column_type = "JsonBinary")]
    pub event_data: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
