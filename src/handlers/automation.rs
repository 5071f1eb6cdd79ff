//! Automation API handlers
//!
//! Schedule configuration, manual triggers, system status and the
//! jobs/runs/events history listings.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::automation::events::{AutomationEvent, EventType};
use crate::automation::types::{AutomationType, ScheduleConfig};
use crate::error::{ApiError, not_found, validation_error};
use crate::metadata::analytics::ChangeAnalytics;
use crate::repositories::automation_config::AutomationConfigRepository;
use crate::repositories::automation_event::AutomationEventRepository;
use crate::repositories::automation_job::AutomationJobRepository;
use crate::repositories::automation_run::AutomationRunRepository;
use crate::repositories::connection::ConnectionRepository;
use crate::repositories::schema_change::SchemaChangeRepository;
use crate::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateScheduleRequest {
    pub schedule_config: JsonValue,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TriggerRequest {
    pub automation_type: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct HistoryQuery {
    pub connection_id: Option<Uuid>,
    pub status: Option<String>,
    pub event_type: Option<String>,
    pub limit: Option<u64>,
}

/// Ensure the connection exists and belongs to the caller's organization.
async fn authorize_connection(
    state: &AppState,
    auth: &AuthContext,
    connection_id: Uuid,
) -> Result<(), ApiError> {
    ConnectionRepository::new(state.db.clone(), state.crypto_key())
        .get_for_organization(auth.organization_id, connection_id)
        .await?
        .map(|_| ())
        .ok_or_else(|| not_found("connection", connection_id))
}

/// Get a connection's schedule configuration with computed next runs.
#[utoipa::path(
    get,
    path = "/api/automation/connection-configs/{id}",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Schedule configuration and next runs"),
        (status = 404, description = "Unknown connection", body = ApiError)
    ),
    tag = "automation"
)]
pub async fn get_connection_config(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(connection_id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    authorize_connection(&state, &auth, connection_id).await?;

    let view = state
        .automation
        .orchestrator()
        .schedule_manager()
        .get_connection_schedule(connection_id)
        .await?;

    Ok(Json(json!({
        "connection_id": connection_id,
        "schedule_config": view.schedule_config,
        "next_runs": view.next_runs,
    })))
}

/// Replace a connection's schedule configuration.
#[utoipa::path(
    put,
    path = "/api/automation/connection-configs/{id}",
    security(("bearer_auth" = [])),
    request_body = UpdateScheduleRequest,
    responses(
        (status = 200, description = "Updated configuration and next runs"),
        (status = 400, description = "Invalid schedule configuration", body = ApiError),
        (status = 404, description = "Unknown connection", body = ApiError)
    ),
    tag = "automation"
)]
pub async fn update_connection_config(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(connection_id): Path<Uuid>,
    Json(request): Json<UpdateScheduleRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    authorize_connection(&state, &auth, connection_id).await?;

    // The boundary parses into the typed config; nothing below revalidates.
    let config = ScheduleConfig::from_json(&request.schedule_config).map_err(|err| {
        validation_error(
            "invalid schedule configuration",
            json!({ "schedule_config": err.to_string() }),
        )
    })?;

    let previous = AutomationConfigRepository::new(state.db.clone())
        .get_connection_config(connection_id)
        .await?
        .and_then(|model| ScheduleConfig::from_json(&model.schedule_config).ok());

    let view = state
        .automation
        .orchestrator()
        .schedule_manager()
        .update_connection_schedule(connection_id, &config, Some(auth.user_id))
        .await?;

    publish_config_events(&state, &auth, connection_id, previous.as_ref(), &config).await;

    Ok(Json(json!({
        "connection_id": connection_id,
        "schedule_config": view.schedule_config,
        "next_runs": view.next_runs,
    })))
}

/// Publish the config lifecycle event plus per-type enable/disable
/// transitions derived from the previous configuration.
async fn publish_config_events(
    state: &AppState,
    auth: &AuthContext,
    connection_id: Uuid,
    previous: Option<&ScheduleConfig>,
    current: &ScheduleConfig,
) {
    let bus = state.automation.bus();

    let lifecycle = if previous.is_some() {
        EventType::ConfigUpdated
    } else {
        EventType::ConfigCreated
    };
    bus.publish(
        AutomationEvent::new(lifecycle, json!({ "schedule_config": current.to_json() }))
            .for_connection(connection_id)
            .for_organization(auth.organization_id)
            .by_user(auth.user_id),
    )
    .await;

    for automation_type in AutomationType::ALL {
        let was_enabled = previous
            .and_then(|config| config.0.get(&automation_type))
            .map(|entry| entry.enabled)
            .unwrap_or(false);
        let is_enabled = current
            .0
            .get(&automation_type)
            .map(|entry| entry.enabled)
            .unwrap_or(false);

        if was_enabled == is_enabled {
            continue;
        }
        let event_type = if is_enabled {
            EventType::AutomationEnabled
        } else {
            EventType::AutomationDisabled
        };
        bus.publish(
            AutomationEvent::new(
                event_type,
                json!({ "automation_type": automation_type.as_str() }),
            )
            .for_connection(connection_id)
            .for_organization(auth.organization_id)
            .by_user(auth.user_id),
        )
        .await;
    }
}

/// Trigger an immediate automation run for a connection.
#[utoipa::path(
    post,
    path = "/api/automation/trigger/{id}",
    security(("bearer_auth" = [])),
    request_body = TriggerRequest,
    responses(
        (status = 200, description = "Created and prevented jobs"),
        (status = 400, description = "Unknown automation type", body = ApiError),
        (status = 404, description = "Unknown connection", body = ApiError)
    ),
    tag = "automation"
)]
pub async fn trigger_automation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(connection_id): Path<Uuid>,
    request: Option<Json<TriggerRequest>>,
) -> Result<Json<JsonValue>, ApiError> {
    authorize_connection(&state, &auth, connection_id).await?;

    let request = request.map(|Json(body)| body).unwrap_or(TriggerRequest {
        automation_type: None,
    });
    let automation_type = match request.automation_type.as_deref() {
        Some(value) => Some(value.parse::<AutomationType>().map_err(|_| {
            validation_error(
                "unknown automation type",
                json!({ "automation_type": "must be one of metadata_refresh, schema_change_detection, validation_automation" }),
            )
        })?),
        None => None,
    };

    let outcome = state
        .automation
        .orchestrator()
        .schedule_immediate_run(connection_id, automation_type, Some(auth.user_id))
        .await;

    Ok(Json(json!({
        "success": true,
        "jobs_created": outcome.jobs_created,
        "prevented_duplicates": outcome.prevented_duplicates,
    })))
}

/// Snapshot of automation system state.
#[utoipa::path(
    get,
    path = "/api/automation/status",
    security(("bearer_auth" = [])),
    responses((status = 200, description = "System status")),
    tag = "automation"
)]
pub async fn automation_status(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<JsonValue>, ApiError> {
    Ok(Json(state.automation.system_status().await))
}

/// Enhanced status: system state plus per-connection job summaries.
pub async fn automation_status_enhanced(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<JsonValue>, ApiError> {
    let mut status = state.automation.system_status().await;

    let connections = ConnectionRepository::new(state.db.clone(), state.crypto_key())
        .list_by_organization(auth.organization_id)
        .await?;

    let tracker = state.automation.orchestrator().status_tracker();
    let mut summaries = Vec::with_capacity(connections.len());
    for connection in connections {
        let mut summary = tracker.connection_job_summary(connection.id, 24).await;
        summary["connection_name"] = json!(connection.name);
        summaries.push(summary);
    }

    status["connections"] = json!(summaries);
    Ok(Json(status))
}

/// Cancel a job; the running executor observes this cooperatively.
pub async fn cancel_job(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    let job = AutomationJobRepository::new(state.db.clone())
        .get_by_id(job_id)
        .await?
        .ok_or_else(|| not_found("automation job", job_id))?;
    authorize_connection(&state, &auth, job.connection_id).await?;

    let cancelled = state.automation.orchestrator().cancel_job(job_id).await;
    Ok(Json(json!({ "job_id": job_id, "cancelled": cancelled })))
}

/// Job history listing.
pub async fn list_jobs(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<JsonValue>>, ApiError> {
    if let Some(connection_id) = query.connection_id {
        authorize_connection(&state, &auth, connection_id).await?;
    }

    let jobs = AutomationJobRepository::new(state.db.clone())
        .list(
            query.connection_id,
            query.status.as_deref(),
            query.limit.unwrap_or(50).min(200),
        )
        .await?;

    Ok(Json(
        jobs.into_iter()
            .map(|job| {
                json!({
                    "id": job.id,
                    "connection_id": job.connection_id,
                    "job_type": job.job_type,
                    "status": job.status,
                    "scheduled_at": job.scheduled_at.to_rfc3339(),
                    "started_at": job.started_at.map(|t| t.to_rfc3339()),
                    "completed_at": job.completed_at.map(|t| t.to_rfc3339()),
                    "result_summary": job.result_summary,
                    "error_message": job.error_message,
                })
            })
            .collect(),
    ))
}

/// Run history listing.
pub async fn list_runs(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<JsonValue>>, ApiError> {
    if let Some(connection_id) = query.connection_id {
        authorize_connection(&state, &auth, connection_id).await?;
    }

    let runs = AutomationRunRepository::new(state.db.clone())
        .list(query.connection_id, query.limit.unwrap_or(50).min(200))
        .await?;

    Ok(Json(
        runs.into_iter()
            .map(|run| {
                json!({
                    "id": run.id,
                    "job_id": run.job_id,
                    "connection_id": run.connection_id,
                    "run_type": run.run_type,
                    "status": run.status,
                    "started_at": run.started_at.to_rfc3339(),
                    "completed_at": run.completed_at.map(|t| t.to_rfc3339()),
                    "results": run.results,
                })
            })
            .collect(),
    ))
}

/// Event timeline listing for the caller's organization.
pub async fn list_events(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<JsonValue>>, ApiError> {
    let events = AutomationEventRepository::new(state.db.clone())
        .list(
            query.connection_id,
            Some(auth.organization_id),
            query.event_type.as_deref(),
            query.limit.unwrap_or(50).min(200),
        )
        .await?;

    Ok(Json(
        events
            .into_iter()
            .map(|event| {
                json!({
                    "id": event.id,
                    "event_type": event.event_type,
                    "automation_type": event.automation_type,
                    "connection_id": event.connection_id,
                    "event_data": event.event_data,
                    "created_at": event.created_at.to_rfc3339(),
                })
            })
            .collect(),
    ))
}

/// Detected schema changes for a connection.
pub async fn list_schema_changes(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<JsonValue>>, ApiError> {
    let connection_id = query.connection_id.ok_or_else(|| {
        validation_error(
            "connection_id is required",
            json!({ "connection_id": "required" }),
        )
    })?;
    authorize_connection(&state, &auth, connection_id).await?;

    let changes = SchemaChangeRepository::new(state.db.clone())
        .list_by_connection(connection_id, query.limit.unwrap_or(50).min(200))
        .await?;

    Ok(Json(
        changes
            .into_iter()
            .map(|change| {
                json!({
                    "id": change.id,
                    "table_name": change.table_name,
                    "column_name": change.column_name,
                    "change_type": change.change_type,
                    "details": change.details,
                    "acknowledged": change.acknowledged,
                    "detected_at": change.detected_at.to_rfc3339(),
                })
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ChangeAnalyticsQuery {
    pub connection_id: Uuid,
    pub table: Option<String>,
    pub limit: Option<u64>,
}

/// Change analytics: per-table change frequency and refresh suggestion,
/// plus the organization's highest-churn objects.
pub async fn change_analytics(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ChangeAnalyticsQuery>,
) -> Result<Json<JsonValue>, ApiError> {
    authorize_connection(&state, &auth, query.connection_id).await?;

    let analytics = ChangeAnalytics::new(state.db.clone());

    let table_view = match query.table.as_deref() {
        Some(table) => {
            let per_day = analytics
                .change_frequency(query.connection_id, table)
                .await?;
            let suggestion = analytics
                .suggest_refresh_interval(query.connection_id, table)
                .await?;
            Some(json!({
                "table": table,
                "changes_per_day": per_day,
                "suggestion": suggestion.as_str(),
                "suggested_interval_hours": suggestion.interval_hours(),
            }))
        }
        None => None,
    };

    let high_impact = analytics
        .high_impact_objects(auth.organization_id, query.limit.unwrap_or(10).min(50))
        .await?;

    Ok(Json(json!({
        "connection_id": query.connection_id,
        "table": table_view,
        "high_impact_objects": high_impact
            .into_iter()
            .map(|row| {
                json!({
                    "table_name": row.table_name,
                    "column_name": row.column_name,
                    "change_type": row.change_type,
                    "change_count": row.change_count,
                    "last_detected_at": row.last_detected_at.to_rfc3339(),
                })
            })
            .collect::<Vec<_>>(),
    })))
}

/// Acknowledge one schema change.
pub async fn acknowledge_schema_change(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(change_id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    let acknowledged = SchemaChangeRepository::new(state.db.clone())
        .acknowledge(change_id)
        .await?;
    if !acknowledged {
        return Err(not_found("schema change", change_id));
    }
    Ok(Json(json!({ "id": change_id, "acknowledged": true })))
}
