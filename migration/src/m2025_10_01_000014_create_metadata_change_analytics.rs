//! Migration to create the metadata_change_analytics table.
//!
//! Rolling per-object change counters that feed refresh-interval
//! suggestions.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MetadataChangeAnalytics::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MetadataChangeAnalytics::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MetadataChangeAnalytics::ConnectionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MetadataChangeAnalytics::OrganizationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MetadataChangeAnalytics::TableName)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MetadataChangeAnalytics::ColumnName)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MetadataChangeAnalytics::ChangeType)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MetadataChangeAnalytics::ChangeCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MetadataChangeAnalytics::FirstDetectedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MetadataChangeAnalytics::LastDetectedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MetadataChangeAnalytics::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MetadataChangeAnalytics::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_metadata_change_analytics_connection_id")
                            .from(
                                MetadataChangeAnalytics::Table,
                                MetadataChangeAnalytics::ConnectionId,
                            )
                            .to(DatabaseConnections::Table, DatabaseConnections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_metadata_change_analytics_object")
                    .table(MetadataChangeAnalytics::Table)
                    .col(MetadataChangeAnalytics::ConnectionId)
                    .col(MetadataChangeAnalytics::TableName)
                    .col(MetadataChangeAnalytics::ChangeType)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_metadata_change_analytics_object")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(MetadataChangeAnalytics::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum MetadataChangeAnalytics {
    Table,
    Id,
    ConnectionId,
    OrganizationId,
    TableName,
    ColumnName,
    ChangeType,
    ChangeCount,
    FirstDetectedAt,
    LastDetectedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DatabaseConnections {
    Table,
    Id,
}
