//! # Connections API Handlers
//!
//! CRUD over organization-owned target database connections. Credentials
//! are accepted on write and never returned; responses expose only a
//! `has_credentials` marker.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::connectors::{ConnectionType, build_connection_url};
use crate::connectors::SqlTargetConnector;
use crate::connectors::TargetConnector;
use crate::error::{ApiError, conflict, not_found, upstream_error, validation_error};
use crate::repositories::connection::ConnectionRepository;
use crate::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateConnectionRequest {
    pub name: String,
    pub connection_type: String,
    pub connection_details: Option<JsonValue>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateConnectionRequest {
    pub name: Option<String>,
    pub connection_details: Option<JsonValue>,
    pub is_default: Option<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TestConnectionRequest {
    pub connection_type: String,
    pub connection_details: JsonValue,
}

/// Connection information for API responses; credentials are sanitised
/// out.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub name: String,
    pub connection_type: String,
    pub is_default: bool,
    pub has_credentials: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<crate::models::connection::Model> for ConnectionInfo {
    fn from(model: crate::models::connection::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            connection_type: model.connection_type,
            is_default: model.is_default,
            has_credentials: model.credentials_ciphertext.is_some(),
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

fn validate_connection_type(value: &str) -> Result<ConnectionType, ApiError> {
    value.parse::<ConnectionType>().map_err(|_| {
        validation_error(
            "unknown connection type",
            serde_json::json!({
                "connection_type": "must be one of snowflake, postgresql, duckdb"
            }),
        )
    })
}

/// List the organization's connections.
#[utoipa::path(
    get,
    path = "/api/connections",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Connections for the organization", body = [ConnectionInfo]),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn list_connections(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<Vec<ConnectionInfo>>, ApiError> {
    let repo = ConnectionRepository::new(state.db.clone(), state.crypto_key());
    let connections = repo.list_by_organization(auth.organization_id).await?;
    Ok(Json(
        connections.into_iter().map(ConnectionInfo::from).collect(),
    ))
}

/// Create a connection.
#[utoipa::path(
    post,
    path = "/api/connections",
    security(("bearer_auth" = [])),
    request_body = CreateConnectionRequest,
    responses(
        (status = 201, description = "Connection created", body = ConnectionInfo),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 409, description = "Duplicate default connection", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn create_connection(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<CreateConnectionRequest>,
) -> Result<(StatusCode, Json<ConnectionInfo>), ApiError> {
    if request.name.trim().is_empty() {
        return Err(validation_error(
            "name is required",
            serde_json::json!({ "name": "required" }),
        ));
    }
    let connection_type = validate_connection_type(&request.connection_type)?;

    let repo = ConnectionRepository::new(state.db.clone(), state.crypto_key());
    let created = repo
        .create(
            auth.organization_id,
            request.name.trim(),
            connection_type.as_str(),
            request.connection_details.as_ref(),
            request.is_default,
        )
        .await
        .map_err(|err| {
            if err.to_string().contains("default connection") {
                conflict("organization already has a default connection")
            } else {
                err.into()
            }
        })?;

    Ok((StatusCode::CREATED, Json(ConnectionInfo::from(created))))
}

pub async fn get_connection(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionInfo>, ApiError> {
    let repo = ConnectionRepository::new(state.db.clone(), state.crypto_key());
    let connection = repo
        .get_for_organization(auth.organization_id, id)
        .await?
        .ok_or_else(|| not_found("connection", id))?;
    Ok(Json(ConnectionInfo::from(connection)))
}

pub async fn update_connection(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateConnectionRequest>,
) -> Result<Json<ConnectionInfo>, ApiError> {
    let repo = ConnectionRepository::new(state.db.clone(), state.crypto_key());
    let existing = repo
        .get_for_organization(auth.organization_id, id)
        .await?
        .ok_or_else(|| not_found("connection", id))?;

    let updated = repo
        .update(
            existing,
            request.name.as_deref(),
            request.connection_details.as_ref(),
            request.is_default,
        )
        .await
        .map_err(|err| {
            if err.to_string().contains("default connection") {
                conflict("organization already has a default connection")
            } else {
                err.into()
            }
        })?;

    Ok(Json(ConnectionInfo::from(updated)))
}

pub async fn delete_connection(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let repo = ConnectionRepository::new(state.db.clone(), state.crypto_key());
    repo.get_for_organization(auth.organization_id, id)
        .await?
        .ok_or_else(|| not_found("connection", id))?;

    repo.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct MetadataQuery {
    pub connection_id: Uuid,
    #[serde(rename = "type")]
    pub metadata_type: String,
}

/// Current metadata view of one type for a connection, with freshness.
pub async fn get_metadata(
    State(state): State<AppState>,
    auth: AuthContext,
    axum::extract::Query(query): axum::extract::Query<MetadataQuery>,
) -> Result<Json<JsonValue>, ApiError> {
    let repo = ConnectionRepository::new(state.db.clone(), state.crypto_key());
    repo.get_for_organization(auth.organization_id, query.connection_id)
        .await?
        .ok_or_else(|| not_found("connection", query.connection_id))?;

    let metadata_type = query
        .metadata_type
        .parse::<crate::metadata::schema_diff::MetadataType>()
        .map_err(|_| {
            validation_error(
                "unknown metadata type",
                serde_json::json!({ "type": "must be one of tables, columns, statistics" }),
            )
        })?;

    let current = crate::metadata::storage::MetadataStorageService::new(state.db.clone())
        .current_with_freshness(query.connection_id, metadata_type)
        .await?;

    match current {
        Some((payload, _freshness)) => Ok(Json(payload)),
        None => Err(not_found(
            "metadata snapshot",
            format!("{}/{}", query.connection_id, metadata_type),
        )),
    }
}

/// Test unsaved credentials by opening a connection and running a probe
/// query.
#[utoipa::path(
    post,
    path = "/api/connections/test",
    security(("bearer_auth" = [])),
    request_body = TestConnectionRequest,
    responses(
        (status = 200, description = "Connection reachable"),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 502, description = "Target unreachable", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn test_connection(
    State(state): State<AppState>,
    _auth: AuthContext,
    Json(request): Json<TestConnectionRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let connection_type = validate_connection_type(&request.connection_type)?;

    // Empty details fall back to the server's default connection string
    // when one is configured.
    let url = match build_connection_url(connection_type, &request.connection_details) {
        Ok(url) => url,
        Err(err) => match &state.config.default_connection_url {
            Some(default_url)
                if request
                    .connection_details
                    .as_object()
                    .is_some_and(|details| details.is_empty()) =>
            {
                default_url.clone()
            }
            _ => {
                return Err(validation_error(
                    "invalid connection details",
                    serde_json::json!({ "connection_details": err.to_string() }),
                ));
            }
        },
    };

    let connector = SqlTargetConnector::new(connection_type, url);
    connector
        .fetch_scalar("SELECT 1", Duration::from_secs(10))
        .await
        .map_err(|err| upstream_error(connection_type.as_str(), &err.to_string()))?;

    Ok(Json(serde_json::json!({ "success": true })))
}
