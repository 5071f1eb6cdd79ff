//! Validation rules API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::profiles::map_task_error;
use crate::auth::AuthContext;
use crate::error::{ApiError, conflict, not_found, validation_error};
use crate::repositories::validation::{NewRule, ValidationRepository};
use crate::server::AppState;
use crate::validations::ValidationOperator;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListRulesQuery {
    pub connection_id: Uuid,
    pub table: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RuleBody {
    pub connection_id: Uuid,
    pub table: String,
    pub rule_name: String,
    pub description: Option<String>,
    pub query: String,
    pub operator: String,
    pub expected_value: JsonValue,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RunValidationsRequest {
    pub connection_id: Uuid,
    pub table: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GenerateDefaultsRequest {
    pub connection_id: Uuid,
    pub table: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RuleInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    #[schema(value_type = String)]
    pub connection_id: Uuid,
    pub table_name: String,
    pub rule_name: String,
    pub description: Option<String>,
    pub query: String,
    pub operator: String,
    pub expected_value: JsonValue,
    pub is_active: bool,
}

impl From<crate::models::validation_rule::Model> for RuleInfo {
    fn from(model: crate::models::validation_rule::Model) -> Self {
        Self {
            id: model.id,
            connection_id: model.connection_id,
            table_name: model.table_name,
            rule_name: model.rule_name,
            description: model.description,
            query: model.query,
            operator: model.operator,
            expected_value: model.expected_value,
            is_active: model.is_active,
        }
    }
}

fn validate_rule_body(body: &RuleBody) -> Result<ValidationOperator, ApiError> {
    if body.table.trim().is_empty() || body.rule_name.trim().is_empty() {
        return Err(validation_error(
            "table and rule_name are required",
            serde_json::json!({ "table": "required", "rule_name": "required" }),
        ));
    }
    if body.query.trim().is_empty() {
        return Err(validation_error(
            "query is required",
            serde_json::json!({ "query": "required" }),
        ));
    }
    body.operator.parse::<ValidationOperator>().map_err(|_| {
        validation_error(
            "unknown operator",
            serde_json::json!({
                "operator": "must be one of equals, greater_than, less_than, between"
            }),
        )
    })
}

pub async fn list_rules(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ListRulesQuery>,
) -> Result<Json<Vec<RuleInfo>>, ApiError> {
    let repo = ValidationRepository::new(state.db.clone());
    let rules = repo
        .list_rules(
            auth.organization_id,
            query.connection_id,
            query.table.as_deref(),
        )
        .await?;
    Ok(Json(rules.into_iter().map(RuleInfo::from).collect()))
}

/// Create a rule; (organization, connection, table, name) is unique.
pub async fn create_rule(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(body): Json<RuleBody>,
) -> Result<(StatusCode, Json<RuleInfo>), ApiError> {
    let operator = validate_rule_body(&body)?;

    let repo = ValidationRepository::new(state.db.clone());
    if repo
        .rule_exists(
            auth.organization_id,
            body.connection_id,
            body.table.trim(),
            body.rule_name.trim(),
        )
        .await?
    {
        return Err(conflict("a rule with this name already exists for the table"));
    }

    let created = repo
        .create_rule(
            auth.organization_id,
            body.connection_id,
            body.table.trim(),
            NewRule {
                rule_name: body.rule_name.trim().to_string(),
                description: body.description.clone(),
                query: body.query.clone(),
                operator: operator.as_str().to_string(),
                expected_value: body.expected_value.clone(),
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(RuleInfo::from(created))))
}

pub async fn update_rule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(rule_id): Path<Uuid>,
    Json(body): Json<RuleBody>,
) -> Result<Json<RuleInfo>, ApiError> {
    let operator = validate_rule_body(&body)?;

    let repo = ValidationRepository::new(state.db.clone());
    let existing = repo
        .get_rule(rule_id)
        .await?
        .filter(|rule| rule.organization_id == auth.organization_id)
        .ok_or_else(|| not_found("validation rule", rule_id))?;

    let updated = repo
        .update_rule(
            existing,
            NewRule {
                rule_name: body.rule_name.trim().to_string(),
                description: body.description.clone(),
                query: body.query.clone(),
                operator: operator.as_str().to_string(),
                expected_value: body.expected_value.clone(),
            },
            body.is_active,
        )
        .await?;

    Ok(Json(RuleInfo::from(updated)))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(rule_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let repo = ValidationRepository::new(state.db.clone());
    repo.get_rule(rule_id)
        .await?
        .filter(|rule| rule.organization_id == auth.organization_id)
        .ok_or_else(|| not_found("validation rule", rule_id))?;

    repo.delete_rule(rule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Soft-disable a rule, keeping its result history.
pub async fn deactivate_rule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(rule_id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    let repo = ValidationRepository::new(state.db.clone());
    repo.get_rule(rule_id)
        .await?
        .filter(|rule| rule.organization_id == auth.organization_id)
        .ok_or_else(|| not_found("validation rule", rule_id))?;

    repo.deactivate_rule(rule_id).await?;
    Ok(Json(serde_json::json!({ "id": rule_id, "is_active": false })))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ResultsQuery {
    pub rule_id: Option<Uuid>,
    pub limit: Option<u64>,
}

/// Validation result history, newest first.
pub async fn list_results(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<Vec<JsonValue>>, ApiError> {
    let results = ValidationRepository::new(state.db.clone())
        .list_results(
            auth.organization_id,
            query.rule_id,
            query.limit.unwrap_or(50).min(200),
        )
        .await?;

    Ok(Json(
        results
            .into_iter()
            .map(|result| {
                serde_json::json!({
                    "id": result.id,
                    "rule_id": result.rule_id,
                    "connection_id": result.connection_id,
                    "is_valid": result.is_valid,
                    "actual_value": result.actual_value,
                    "profile_history_id": result.profile_history_id,
                    "run_at": result.run_at.to_rfc3339(),
                })
            })
            .collect(),
    ))
}

/// Execute the active rules of one table immediately.
#[utoipa::path(
    post,
    path = "/api/run-validations",
    security(("bearer_auth" = [])),
    request_body = RunValidationsRequest,
    responses(
        (status = 200, description = "Rule outcomes"),
        (status = 404, description = "Unknown connection", body = ApiError),
        (status = 502, description = "Target database failure", body = ApiError)
    ),
    tag = "validations"
)]
pub async fn run_validations(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<RunValidationsRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let outcomes = state
        .validations
        .run_for_table(
            auth.organization_id,
            request.connection_id,
            request.table.trim(),
        )
        .await
        .map_err(map_task_error)?;

    let failed = outcomes.iter().filter(|o| !o.is_valid).count();
    let results: Vec<JsonValue> = outcomes
        .into_iter()
        .map(|outcome| {
            serde_json::json!({
                "rule_id": outcome.rule_id,
                "rule_name": outcome.rule_name,
                "is_valid": outcome.is_valid,
                "actual_value": outcome.actual_value,
                "error": outcome.error,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "table": request.table,
        "total_rules": results.len(),
        "failed_rules": failed,
        "results": results,
    })))
}

/// Create baseline rules for a table from its latest columns snapshot.
#[utoipa::path(
    post,
    path = "/api/generate-default-validations",
    security(("bearer_auth" = [])),
    request_body = GenerateDefaultsRequest,
    responses(
        (status = 200, description = "Created rule names")
    ),
    tag = "validations"
)]
pub async fn generate_default_validations(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<GenerateDefaultsRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let created = state
        .validations
        .generate_default_rules(
            auth.organization_id,
            request.connection_id,
            request.table.trim(),
        )
        .await
        .map_err(map_task_error)?;

    Ok(Json(serde_json::json!({
        "table": request.table,
        "created_rules": created,
    })))
}
