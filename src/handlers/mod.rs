//! # API Handlers
//!
//! Axum handlers for the datawatch HTTP surface. Input validation happens
//! here at the boundary; everything below works with typed values.

pub mod auth;
pub mod automation;
pub mod connections;
pub mod profiles;
pub mod validations;

use axum::extract::State;
use axum::response::Json;

use crate::error::ApiError;
use crate::models::ServiceInfo;
use crate::server::AppState;

/// Root service info endpoint
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "service"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness check hitting the store.
pub async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    crate::db::health_check(&state.db).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}
