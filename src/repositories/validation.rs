//! Validation repository
//!
//! CRUD for validation rules plus result persistence. Rule execution and
//! operator evaluation live in `validations`; this is the store access.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::validation_result::{self, Entity as ValidationResult};
use crate::models::validation_rule::{self, Entity as ValidationRule};

/// Fields of a rule supplied at creation time.
#[derive(Debug, Clone)]
pub struct NewRule {
    pub rule_name: String,
    pub description: Option<String>,
    pub query: String,
    pub operator: String,
    pub expected_value: JsonValue,
}

#[derive(Debug, Clone)]
pub struct ValidationRepository {
    db: DatabaseConnection,
}

impl ValidationRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get_rule(&self, rule_id: Uuid) -> Result<Option<validation_rule::Model>, DbErr> {
        ValidationRule::find_by_id(rule_id).one(&self.db).await
    }

    /// Active rules for one table of a connection.
    pub async fn active_rules(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
        table_name: &str,
    ) -> Result<Vec<validation_rule::Model>, DbErr> {
        ValidationRule::find()
            .filter(validation_rule::Column::OrganizationId.eq(organization_id))
            .filter(validation_rule::Column::ConnectionId.eq(connection_id))
            .filter(validation_rule::Column::TableName.eq(table_name))
            .filter(validation_rule::Column::IsActive.eq(true))
            .order_by_asc(validation_rule::Column::RuleName)
            .all(&self.db)
            .await
    }

    /// All rules for a connection, optionally narrowed to a table.
    pub async fn list_rules(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
        table_name: Option<&str>,
    ) -> Result<Vec<validation_rule::Model>, DbErr> {
        let mut query = ValidationRule::find()
            .filter(validation_rule::Column::OrganizationId.eq(organization_id))
            .filter(validation_rule::Column::ConnectionId.eq(connection_id))
            .order_by_asc(validation_rule::Column::TableName)
            .order_by_asc(validation_rule::Column::RuleName);
        if let Some(table_name) = table_name {
            query = query.filter(validation_rule::Column::TableName.eq(table_name));
        }
        query.all(&self.db).await
    }

    /// Distinct table names that have at least one active rule.
    pub async fn tables_with_active_rules(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
    ) -> Result<Vec<String>, DbErr> {
        let mut tables: Vec<String> = ValidationRule::find()
            .select_only()
            .column(validation_rule::Column::TableName)
            .filter(validation_rule::Column::OrganizationId.eq(organization_id))
            .filter(validation_rule::Column::ConnectionId.eq(connection_id))
            .filter(validation_rule::Column::IsActive.eq(true))
            .into_tuple::<String>()
            .all(&self.db)
            .await?;
        tables.sort();
        tables.dedup();
        Ok(tables)
    }

    pub async fn rule_exists(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
        table_name: &str,
        rule_name: &str,
    ) -> Result<bool, DbErr> {
        Ok(ValidationRule::find()
            .filter(validation_rule::Column::OrganizationId.eq(organization_id))
            .filter(validation_rule::Column::ConnectionId.eq(connection_id))
            .filter(validation_rule::Column::TableName.eq(table_name))
            .filter(validation_rule::Column::RuleName.eq(rule_name))
            .count(&self.db)
            .await?
            > 0)
    }

    pub async fn create_rule(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
        table_name: &str,
        rule: NewRule,
    ) -> Result<validation_rule::Model, DbErr> {
        let now = Utc::now();
        let model = validation_rule::ActiveModel {
            id: Set(Uuid::new_v4()),
            organization_id: Set(organization_id),
            connection_id: Set(connection_id),
            table_name: Set(table_name.to_string()),
            rule_name: Set(rule.rule_name),
            description: Set(rule.description),
            query: Set(rule.query),
            operator: Set(rule.operator),
            expected_value: Set(rule.expected_value),
            is_active: Set(true),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        model.insert(&self.db).await
    }

    pub async fn update_rule(
        &self,
        existing: validation_rule::Model,
        rule: NewRule,
        is_active: Option<bool>,
    ) -> Result<validation_rule::Model, DbErr> {
        let mut active: validation_rule::ActiveModel = existing.into();
        active.rule_name = Set(rule.rule_name);
        active.description = Set(rule.description);
        active.query = Set(rule.query);
        active.operator = Set(rule.operator);
        active.expected_value = Set(rule.expected_value);
        if let Some(flag) = is_active {
            active.is_active = Set(flag);
        }
        active.updated_at = Set(Utc::now().into());
        active.update(&self.db).await
    }

    pub async fn delete_rule(&self, rule_id: Uuid) -> Result<bool, DbErr> {
        let result = ValidationRule::delete_by_id(rule_id).exec(&self.db).await?;
        Ok(result.rows_affected > 0)
    }

    /// Soft-disable a rule without losing its history.
    pub async fn deactivate_rule(&self, rule_id: Uuid) -> Result<bool, DbErr> {
        let active = validation_rule::ActiveModel {
            is_active: Set(false),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        let result = ValidationRule::update_many()
            .set(active)
            .filter(validation_rule::Column::Id.eq(rule_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Persist one rule's outcome for a run.
    #[allow(clippy::too_many_arguments)]
    pub async fn store_result(
        &self,
        organization_id: Uuid,
        rule_id: Uuid,
        connection_id: Option<Uuid>,
        is_valid: bool,
        actual_value: Option<JsonValue>,
        profile_history_id: Option<Uuid>,
        run_at: DateTime<Utc>,
    ) -> Result<Uuid, DbErr> {
        let id = Uuid::new_v4();
        let model = validation_result::ActiveModel {
            id: Set(id),
            organization_id: Set(organization_id),
            rule_id: Set(rule_id),
            connection_id: Set(connection_id),
            is_valid: Set(is_valid),
            actual_value: Set(actual_value),
            profile_history_id: Set(profile_history_id),
            run_at: Set(run_at.into()),
            created_at: Set(Utc::now().into()),
        };
        model.insert(&self.db).await?;
        Ok(id)
    }

    /// Result history for a rule, newest first.
    pub async fn list_results(
        &self,
        organization_id: Uuid,
        rule_id: Option<Uuid>,
        limit: u64,
    ) -> Result<Vec<validation_result::Model>, DbErr> {
        let mut query = ValidationResult::find()
            .filter(validation_result::Column::OrganizationId.eq(organization_id))
            .order_by_desc(validation_result::Column::RunAt);
        if let Some(rule_id) = rule_id {
            query = query.filter(validation_result::Column::RuleId.eq(rule_id));
        }
        query.limit(limit).all(&self.db).await
    }
}
