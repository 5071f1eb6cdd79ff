//! Connection entity model
//!
//! This module contains the SeaORM entity model for the
//! database_connections table, which stores organization-scoped
//! credentials for target databases. Credentials are stored as an
//! AES-256-GCM ciphertext and never serialised into API responses.

use super::organization::Entity as Organization;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Connection entity representing an organization-owned target database
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "database_connections")]
pub struct Model {
    /// Unique identifier for the connection (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning organization
    pub organization_id: Uuid,

    /// Display name, unique per organization by convention
    pub name: String,

    /// Target database flavour (snowflake | postgresql | duckdb)
    pub connection_type: String,

    /// Encrypted credentials payload (opaque JSON before encryption)
    pub credentials_ciphertext: Option<Vec<u8>>,

    /// Whether this is the organization's default connection; at most one
    /// row per organization may carry the flag
    pub is_default: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Organization",
        from = "Column::OrganizationId",
        to = "super::organization::Column::Id"
    )]
    Organization,
}

impl Related<Organization> for Entity {
    fn to() -> RelationDef {
        Relation::Organization.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
