//! Migration to create the automation_runs table.
//!
//! Per-job audit rows holding the detailed results payload of one run.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AutomationRuns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AutomationRuns::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AutomationRuns::JobId).uuid().not_null())
                    .col(ColumnDef::new(AutomationRuns::ConnectionId).uuid().not_null())
                    .col(ColumnDef::new(AutomationRuns::RunType).text().not_null())
                    .col(
                        ColumnDef::new(AutomationRuns::Status)
                            .text()
                            .not_null()
                            .default("running"),
                    )
                    .col(
                        ColumnDef::new(AutomationRuns::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AutomationRuns::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(AutomationRuns::Results).json_binary().null())
                    .col(
                        ColumnDef::new(AutomationRuns::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_automation_runs_job_id")
                            .from(AutomationRuns::Table, AutomationRuns::JobId)
                            .to(AutomationJobs::Table, AutomationJobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_automation_runs_connection_id")
                            .from(AutomationRuns::Table, AutomationRuns::ConnectionId)
                            .to(DatabaseConnections::Table, DatabaseConnections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_automation_runs_job")
                    .table(AutomationRuns::Table)
                    .col(AutomationRuns::JobId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_automation_runs_connection_started")
                    .table(AutomationRuns::Table)
                    .col(AutomationRuns::ConnectionId)
                    .col(AutomationRuns::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_automation_runs_connection_started")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(Index::drop().name("idx_automation_runs_job").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AutomationRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AutomationRuns {
    Table,
    Id,
    JobId,
    ConnectionId,
    RunType,
    Status,
    StartedAt,
    CompletedAt,
    Results,
    CreatedAt,
}

#[derive(DeriveIden)]
enum AutomationJobs {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum DatabaseConnections {
    Table,
    Id,
}
