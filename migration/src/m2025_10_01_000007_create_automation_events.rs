//! Migration to create the automation_events table.
//!
//! Every published event is persisted here before handlers run, giving an
//! auditable timeline of the automation system per organization.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AutomationEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AutomationEvents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AutomationEvents::EventType).text().not_null())
                    .col(
                        ColumnDef::new(AutomationEvents::AutomationType)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AutomationEvents::ConnectionId).uuid().null())
                    .col(ColumnDef::new(AutomationEvents::OrganizationId).uuid().null())
                    .col(ColumnDef::new(AutomationEvents::UserId).uuid().null())
                    .col(ColumnDef::new(AutomationEvents::EventData).json_binary().null())
                    .col(
                        ColumnDef::new(AutomationEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_automation_events_org_created")
                    .table(AutomationEvents::Table)
                    .col(AutomationEvents::OrganizationId)
                    .col(AutomationEvents::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_automation_events_connection_created")
                    .table(AutomationEvents::Table)
                    .col(AutomationEvents::ConnectionId)
                    .col(AutomationEvents::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_automation_events_connection_created")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_automation_events_org_created")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(AutomationEvents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AutomationEvents {
    Table,
    Id,
    EventType,
    AutomationType,
    ConnectionId,
    OrganizationId,
    UserId,
    EventData,
    CreatedAt,
}
