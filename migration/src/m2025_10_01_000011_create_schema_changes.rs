//! Migration to create the schema_changes table.
//!
//! Typed diffs between successive schema snapshots, deduplicated within a
//! 24-hour window on (connection, table, change type, column).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SchemaChanges::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SchemaChanges::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SchemaChanges::ConnectionId).uuid().not_null())
                    .col(ColumnDef::new(SchemaChanges::OrganizationId).uuid().not_null())
                    .col(ColumnDef::new(SchemaChanges::TableName).text().not_null())
                    .col(ColumnDef::new(SchemaChanges::ColumnName).text().null())
                    .col(ColumnDef::new(SchemaChanges::ChangeType).text().not_null())
                    .col(ColumnDef::new(SchemaChanges::Details).json_binary().null())
                    .col(
                        ColumnDef::new(SchemaChanges::Acknowledged)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SchemaChanges::DetectedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SchemaChanges::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_schema_changes_connection_id")
                            .from(SchemaChanges::Table, SchemaChanges::ConnectionId)
                            .to(DatabaseConnections::Table, DatabaseConnections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_schema_changes_dedup")
                    .table(SchemaChanges::Table)
                    .col(SchemaChanges::ConnectionId)
                    .col(SchemaChanges::TableName)
                    .col(SchemaChanges::ChangeType)
                    .col(SchemaChanges::DetectedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_schema_changes_org_detected")
                    .table(SchemaChanges::Table)
                    .col(SchemaChanges::OrganizationId)
                    .col(SchemaChanges::DetectedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_schema_changes_org_detected")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(Index::drop().name("idx_schema_changes_dedup").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SchemaChanges::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SchemaChanges {
    Table,
    Id,
    ConnectionId,
    OrganizationId,
    TableName,
    ColumnName,
    ChangeType,
    Details,
    Acknowledged,
    DetectedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum DatabaseConnections {
    Table,
    Id,
}
