//! Migration to create the validation_results table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ValidationResults::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ValidationResults::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ValidationResults::OrganizationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ValidationResults::RuleId).uuid().not_null())
                    .col(ColumnDef::new(ValidationResults::ConnectionId).uuid().null())
                    .col(ColumnDef::new(ValidationResults::IsValid).boolean().not_null())
                    .col(
                        ColumnDef::new(ValidationResults::ActualValue)
                            .json_binary()
                            .null(),
                    )
                    // Weak reference to the profile snapshot active at run time;
                    // intentionally not a foreign key.
                    .col(
                        ColumnDef::new(ValidationResults::ProfileHistoryId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ValidationResults::RunAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ValidationResults::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_validation_results_rule_id")
                            .from(ValidationResults::Table, ValidationResults::RuleId)
                            .to(ValidationRules::Table, ValidationRules::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_validation_results_rule_run")
                    .table(ValidationResults::Table)
                    .col(ValidationResults::RuleId)
                    .col(ValidationResults::RunAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_validation_results_org_run")
                    .table(ValidationResults::Table)
                    .col(ValidationResults::OrganizationId)
                    .col(ValidationResults::RunAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_validation_results_org_run")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_validation_results_rule_run")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(ValidationResults::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ValidationResults {
    Table,
    Id,
    OrganizationId,
    RuleId,
    ConnectionId,
    IsValid,
    ActualValue,
    ProfileHistoryId,
    RunAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum ValidationRules {
    Table,
    Id,
}
