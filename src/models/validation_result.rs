//! ValidationResult entity model

use super::validation_rule::Entity as ValidationRule;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "validation_results")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub organization_id: Uuid,

    pub rule_id: Uuid,

    pub connection_id: Option<Uuid>,

    pub is_valid: bool,

    #[sea_orm(column_type = "JsonBinary")]
    pub actual_value: Option<JsonValue>,

    /// Weak reference to the profile snapshot current at run time
    pub profile_history_id: Option<Uuid>,

    pub run_at: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "ValidationRule",
        from = "Column::RuleId",
        to = "super::validation_rule::Column::Id"
    )]
    ValidationRule,
}

impl Related<ValidationRule> for Entity {
    fn to() -> RelationDef {
        Relation::ValidationRule.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
