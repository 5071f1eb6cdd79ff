//! Migration to create the automation_jobs table.
//!
//! One row per dispatched automation execution with a monotonic status
//! lifecycle: scheduled -> running -> completed | failed | cancelled.

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
                    .table(AutomationJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AutomationJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AutomationJobs::ConnectionId).uuid().not_null())
                    .col(ColumnDef::new(AutomationJobs::JobType).text().not_null())
                    .col(
                        ColumnDef::new(AutomationJobs::Status)
                            .text()
                            .not_null()
                            .default("scheduled"),
                    )
                    .col(
                        ColumnDef::new(AutomationJobs::ScheduledAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AutomationJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AutomationJobs::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(AutomationJobs::JobConfig).json_binary().null())
                    .col(
                        ColumnDef::new(AutomationJobs::ResultSummary)
                            .json_binary()
                            .null(),
                    )
                    .col(ColumnDef::new(AutomationJobs::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(AutomationJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AutomationJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_automation_jobs_connection_id")
                            .from(AutomationJobs::Table, AutomationJobs::ConnectionId)
                            .to(DatabaseConnections::Table, DatabaseConnections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Index backing the running-job and recent-job guards.
        manager
            .create_index(
                Index::create()
                    .name("idx_automation_jobs_connection_type_status")
                    .table(AutomationJobs::Table)
                    .col(AutomationJobs::ConnectionId)
                    .col(AutomationJobs::JobType)
                    .col(AutomationJobs::Status)
                    .to_owned(),
            )
            .await?;

        // Index backing terminal-job purges and history listings.
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_automation_jobs_status_created \
                 ON automation_jobs (status, created_at)"
                    .to_string(),
            ))
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_automation_jobs_scheduled_at")
                    .table(AutomationJobs::Table)
                    .col(AutomationJobs::ScheduledAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_automation_jobs_scheduled_at")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_automation_jobs_status_created")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_automation_jobs_connection_type_status")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(AutomationJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AutomationJobs {
    Table,
    Id,
    ConnectionId,
    JobType,
    Status,
    ScheduledAt,
    StartedAt,
    CompletedAt,
    JobConfig,
    ResultSummary,
    ErrorMessage,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DatabaseConnections {
    Table,
    Id,
}
