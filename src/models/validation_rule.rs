//! ValidationRule entity model
//!
//! A rule is an opaque scalar SQL query plus a comparison operator and
//! expected value, unique per (organization, connection, table, name).

use super::connection::Entity as Connection;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "validation_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub organization_id: Uuid,

    pub connection_id: Uuid,

    pub table_name: String,

    pub rule_name: String,

    pub description: Option<String>,

    /// Scalar SQL executed against the target database
    pub query: String,

    /// equals | greater_than | less_than | between
    pub operator: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub expected_value: JsonValue,

    pub is_active: bool,

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
