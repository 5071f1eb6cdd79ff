//! AutomationRun entity model
//!
//! Per-job audit rows carrying the full results payload of one execution.

use super::automation_job::Entity as AutomationJob;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "automation_runs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub job_id: Uuid,

    pub connection_id: Uuid,

    pub run_type: String,

    pub status: String,

    pub started_at: DateTimeWithTimeZone,

    pub completed_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "JsonBinary")]
    pub results: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "AutomationJob",
        from = "Column::JobId",
        to = "super::automation_job::Column::Id"
    )]
    AutomationJob,
}

impl Related<AutomationJob> for Entity {
    fn to() -> RelationDef {
        Relation::AutomationJob.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
