//! Migration to create the validation_rules table.
//!
//! A rule is a scalar SQL query plus an operator and expected value,
//! unique per (organization, connection, table, name).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ValidationRules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ValidationRules::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ValidationRules::OrganizationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ValidationRules::ConnectionId).uuid().not_null())
                    .col(ColumnDef::new(ValidationRules::TableName).text().not_null())
                    .col(ColumnDef::new(ValidationRules::RuleName).text().not_null())
                    .col(ColumnDef::new(ValidationRules::Description).text().null())
                    .col(ColumnDef::new(ValidationRules::Query).text().not_null())
                    .col(ColumnDef::new(ValidationRules::Operator).text().not_null())
                    .col(
                        ColumnDef::new(ValidationRules::ExpectedValue)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ValidationRules::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ValidationRules::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ValidationRules::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_validation_rules_organization_id")
                            .from(ValidationRules::Table, ValidationRules::OrganizationId)
                            .to(Organizations::Table, Organizations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_validation_rules_connection_id")
                            .from(ValidationRules::Table, ValidationRules::ConnectionId)
                            .to(DatabaseConnections::Table, DatabaseConnections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_validation_rules_unique_name")
                    .table(ValidationRules::Table)
                    .col(ValidationRules::OrganizationId)
                    .col(ValidationRules::ConnectionId)
                    .col(ValidationRules::TableName)
                    .col(ValidationRules::RuleName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_validation_rules_connection_table_active")
                    .table(ValidationRules::Table)
                    .col(ValidationRules::ConnectionId)
                    .col(ValidationRules::TableName)
                    .col(ValidationRules::IsActive)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_validation_rules_connection_table_active")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_validation_rules_unique_name")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(ValidationRules::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ValidationRules {
    Table,
    Id,
    OrganizationId,
    ConnectionId,
    TableName,
    RuleName,
    Description,
    Query,
    Operator,
    ExpectedValue,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Organizations {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum DatabaseConnections {
    Table,
    Id,
}
