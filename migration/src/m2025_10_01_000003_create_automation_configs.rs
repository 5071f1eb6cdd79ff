//! Migration to create the automation configuration tables.
//!
//! Three levels of configuration: a singleton global config row, one
//! schedule config per connection, and optional per-table overrides.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AutomationGlobalConfig::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AutomationGlobalConfig::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AutomationGlobalConfig::Config)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AutomationGlobalConfig::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AutomationConnectionConfigs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AutomationConnectionConfigs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AutomationConnectionConfigs::ConnectionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AutomationConnectionConfigs::ScheduleConfig)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AutomationConnectionConfigs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AutomationConnectionConfigs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_automation_connection_configs_connection_id")
                            .from(
                                AutomationConnectionConfigs::Table,
                                AutomationConnectionConfigs::ConnectionId,
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
                    .name("idx_automation_connection_configs_connection")
                    .table(AutomationConnectionConfigs::Table)
                    .col(AutomationConnectionConfigs::ConnectionId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AutomationTableConfigs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AutomationTableConfigs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AutomationTableConfigs::ConnectionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AutomationTableConfigs::TableName)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AutomationTableConfigs::Config)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AutomationTableConfigs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AutomationTableConfigs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_automation_table_configs_connection_id")
                            .from(
                                AutomationTableConfigs::Table,
                                AutomationTableConfigs::ConnectionId,
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
                    .name("idx_automation_table_configs_connection_table")
                    .table(AutomationTableConfigs::Table)
                    .col(AutomationTableConfigs::ConnectionId)
                    .col(AutomationTableConfigs::TableName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_automation_table_configs_connection_table")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(AutomationTableConfigs::Table).to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_automation_connection_configs_connection")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(AutomationConnectionConfigs::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(AutomationGlobalConfig::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AutomationGlobalConfig {
    Table,
    Id,
    Config,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum AutomationConnectionConfigs {
    Table,
    Id,
    ConnectionId,
    ScheduleConfig,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum AutomationTableConfigs {
    Table,
    Id,
    ConnectionId,
    TableName,
    Config,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DatabaseConnections {
    Table,
    Id,
}
