//! Profiling API handlers

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::error::{ApiError, TaskError, not_found, upstream_error, validation_error};
use crate::server::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ProfileQuery {
    pub connection_id: Uuid,
    pub table: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ProfileHistoryQuery {
    pub connection_id: Option<Uuid>,
    pub table: Option<String>,
    pub limit: Option<u64>,
    /// When true (and connection + table given), return only the newest
    /// snapshot.
    pub latest: Option<bool>,
}

pub(crate) fn map_task_error(err: TaskError) -> ApiError {
    match err {
        TaskError::ConnectionNotFound(id) => not_found("connection", id),
        TaskError::Upstream(message) => upstream_error("target database", &message),
        other => anyhow::anyhow!(other).into(),
    }
}

/// Run an ad-hoc profile of one table.
#[utoipa::path(
    get,
    path = "/api/profile",
    security(("bearer_auth" = [])),
    params(ProfileQuery),
    responses(
        (status = 200, description = "Profile snapshot"),
        (status = 404, description = "Unknown connection", body = ApiError),
        (status = 502, description = "Target database failure", body = ApiError)
    ),
    tag = "profiles"
)]
pub async fn run_profile(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ProfileQuery>,
) -> Result<Json<JsonValue>, ApiError> {
    if query.table.trim().is_empty() {
        return Err(validation_error(
            "table is required",
            serde_json::json!({ "table": "required" }),
        ));
    }

    let profile = state
        .profiles
        .profile_table(auth.organization_id, query.connection_id, query.table.trim())
        .await
        .map_err(map_task_error)?;

    Ok(Json(profile))
}

/// List stored profile snapshots.
#[utoipa::path(
    get,
    path = "/api/profile-history",
    security(("bearer_auth" = [])),
    params(ProfileHistoryQuery),
    responses(
        (status = 200, description = "Profile history entries")
    ),
    tag = "profiles"
)]
pub async fn profile_history(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ProfileHistoryQuery>,
) -> Result<Json<Vec<JsonValue>>, ApiError> {
    if query.latest == Some(true) {
        let (Some(connection_id), Some(table)) = (query.connection_id, query.table.as_deref())
        else {
            return Err(validation_error(
                "latest requires connection_id and table",
                serde_json::json!({ "connection_id": "required", "table": "required" }),
            ));
        };

        let latest = state
            .profiles
            .latest(auth.organization_id, connection_id, table)
            .await
            .map_err(map_task_error)?;
        return Ok(Json(latest.into_iter().collect()));
    }

    let limit = query.limit.unwrap_or(10).min(100);
    let history = state
        .profiles
        .list_history(
            auth.organization_id,
            query.connection_id,
            query.table.as_deref(),
            limit,
        )
        .await
        .map_err(map_task_error)?;

    Ok(Json(history))
}
