//! Migration to create the automation_scheduled_jobs table.
//!
//! One materialised row per (connection, automation type) when that
//! automation is enabled, carrying the computed next run timestamp.

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
                    .table(AutomationScheduledJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AutomationScheduledJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AutomationScheduledJobs::ConnectionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AutomationScheduledJobs::AutomationType)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AutomationScheduledJobs::ScheduleType)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AutomationScheduledJobs::ScheduledTime)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AutomationScheduledJobs::Timezone)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AutomationScheduledJobs::DaysOfWeek)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AutomationScheduledJobs::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(AutomationScheduledJobs::NextRunAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AutomationScheduledJobs::LastRunAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AutomationScheduledJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AutomationScheduledJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_automation_scheduled_jobs_connection_id")
                            .from(
                                AutomationScheduledJobs::Table,
                                AutomationScheduledJobs::ConnectionId,
                            )
                            .to(DatabaseConnections::Table, DatabaseConnections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one scheduled job per (connection, automation type).
        manager
            .create_index(
                Index::create()
                    .name("idx_automation_scheduled_jobs_connection_type")
                    .table(AutomationScheduledJobs::Table)
                    .col(AutomationScheduledJobs::ConnectionId)
                    .col(AutomationScheduledJobs::AutomationType)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index for the due-job window scan.
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_automation_scheduled_jobs_due \
                 ON automation_scheduled_jobs (enabled, next_run_at)"
                    .to_string(),
            ))
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_automation_scheduled_jobs_due")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_automation_scheduled_jobs_connection_type")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(AutomationScheduledJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AutomationScheduledJobs {
    Table,
    Id,
    ConnectionId,
    AutomationType,
    ScheduleType,
    ScheduledTime,
    Timezone,
    DaysOfWeek,
    Enabled,
    NextRunAt,
    LastRunAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DatabaseConnections {
    Table,
    Id,
}
