//! Migration to create the profiling_history table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProfilingHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProfilingHistory::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ProfilingHistory::OrganizationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ProfilingHistory::ConnectionId).uuid().not_null())
                    .col(ColumnDef::new(ProfilingHistory::TableName).text().not_null())
                    .col(
                        ColumnDef::new(ProfilingHistory::Profile)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProfilingHistory::CollectedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ProfilingHistory::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_profiling_history_connection_id")
                            .from(ProfilingHistory::Table, ProfilingHistory::ConnectionId)
                            .to(DatabaseConnections::Table, DatabaseConnections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_profiling_history_org_table_collected")
                    .table(ProfilingHistory::Table)
                    .col(ProfilingHistory::OrganizationId)
                    .col(ProfilingHistory::TableName)
                    .col(ProfilingHistory::CollectedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_profiling_history_org_table_collected")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(ProfilingHistory::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ProfilingHistory {
    Table,
    Id,
    OrganizationId,
    ConnectionId,
    TableName,
    Profile,
    CollectedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum DatabaseConnections {
    Table,
    Id,
}
