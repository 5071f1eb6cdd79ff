//! Login handler

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{issue_token, verify_password};
use crate::error::{ApiError, unauthorized, validation_error};
use crate::repositories::profile::ProfileRepository;
use crate::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: String,
    pub organization_id: String,
    pub role: String,
}

/// Exchange credentials for a bearer token.
#[utoipa::path(
    post,
    path = "/api/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = LoginResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Invalid credentials", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(validation_error(
            "email and password are required",
            serde_json::json!({ "email": "required", "password": "required" }),
        ));
    }

    let profile = ProfileRepository::new(state.db.clone())
        .find_by_email(request.email.trim())
        .await?
        .ok_or_else(|| unauthorized(Some("Invalid email or password")))?;

    if !verify_password(&profile, &request.password) {
        return Err(unauthorized(Some("Invalid email or password")));
    }

    let token = issue_token(&state.config, &profile)?;
    Ok(Json(LoginResponse {
        token,
        user_id: profile.id.to_string(),
        organization_id: profile.organization_id.to_string(),
        role: profile.role,
    }))
}
