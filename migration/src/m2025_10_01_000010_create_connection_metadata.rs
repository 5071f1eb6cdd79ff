//! Migration to create the connection_metadata table.
//!
//! Append-only snapshots of collected metadata per connection; the most
//! recent row of a given type is the current view.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ConnectionMetadata::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConnectionMetadata::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ConnectionMetadata::ConnectionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectionMetadata::MetadataType)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectionMetadata::Metadata)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectionMetadata::CollectedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ConnectionMetadata::RefreshFrequency)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ConnectionMetadata::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_connection_metadata_connection_id")
                            .from(ConnectionMetadata::Table, ConnectionMetadata::ConnectionId)
                            .to(DatabaseConnections::Table, DatabaseConnections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_connection_metadata_latest")
                    .table(ConnectionMetadata::Table)
                    .col(ConnectionMetadata::ConnectionId)
                    .col(ConnectionMetadata::MetadataType)
                    .col(ConnectionMetadata::CollectedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_connection_metadata_latest")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(ConnectionMetadata::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ConnectionMetadata {
    Table,
    Id,
    ConnectionId,
    MetadataType,
    Metadata,
    CollectedAt,
    RefreshFrequency,
    CreatedAt,
}

#[derive(DeriveIden)]
enum DatabaseConnections {
    Table,
    Id,
}
