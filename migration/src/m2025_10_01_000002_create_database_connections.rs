//! Migration to create the database_connections table.
//!
//! A connection stores organization-scoped credentials for a target
//! database. Credentials are encrypted at rest; at most one connection per
//! organization may be flagged as the default.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DatabaseConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DatabaseConnections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DatabaseConnections::OrganizationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DatabaseConnections::Name).text().not_null())
                    .col(
                        ColumnDef::new(DatabaseConnections::ConnectionType)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DatabaseConnections::CredentialsCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DatabaseConnections::IsDefault)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(DatabaseConnections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DatabaseConnections::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_database_connections_organization_id")
                            .from(
                                DatabaseConnections::Table,
                                DatabaseConnections::OrganizationId,
                            )
                            .to(Organizations::Table, Organizations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_database_connections_organization")
                    .table(DatabaseConnections::Table)
                    .col(DatabaseConnections::OrganizationId)
                    .col(DatabaseConnections::Name)
                    .to_owned(),
            )
            .await?;

        // Partial unique index enforcing at most one default connection per
        // organization.
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_database_connections_default_per_org \
                 ON database_connections (organization_id) WHERE is_default"
                    .to_string(),
            ))
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_database_connections_default_per_org")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_database_connections_organization")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(DatabaseConnections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DatabaseConnections {
    Table,
    Id,
    OrganizationId,
    Name,
    ConnectionType,
    CredentialsCiphertext,
    IsDefault,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Organizations {
    Table,
    Id,
}
