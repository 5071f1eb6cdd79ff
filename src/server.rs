//! # Server Configuration
//!
//! Router assembly and server startup for the datawatch API.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::automation::lifecycle::AutomationService;
use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::handlers;
use crate::history::ProfileHistoryManager;
use crate::validations::ValidationRunner;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub automation: Arc<AutomationService>,
    pub validations: Arc<ValidationRunner>,
    pub profiles: Arc<ProfileHistoryManager>,
}

impl AppState {
    pub fn new(
        db: DatabaseConnection,
        config: Arc<AppConfig>,
        automation: Arc<AutomationService>,
    ) -> Self {
        let validations = Arc::new(ValidationRunner::new(
            db.clone(),
            automation.crypto_key(),
            automation.registry(),
            automation.bus(),
        ));
        let profiles = Arc::new(ProfileHistoryManager::new(
            db.clone(),
            automation.crypto_key(),
            automation.registry(),
            automation.bus(),
        ));

        Self {
            db,
            config,
            automation,
            validations,
            profiles,
        }
    }

    pub fn crypto_key(&self) -> Option<CryptoKey> {
        self.automation.crypto_key()
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/api/connections",
            get(handlers::connections::list_connections)
                .post(handlers::connections::create_connection),
        )
        .route(
            "/api/connections/test",
            post(handlers::connections::test_connection),
        )
        .route(
            "/api/connections/{id}",
            get(handlers::connections::get_connection)
                .put(handlers::connections::update_connection)
                .delete(handlers::connections::delete_connection),
        )
        .route("/api/profile", get(handlers::profiles::run_profile))
        .route(
            "/api/profile-history",
            get(handlers::profiles::profile_history),
        )
        .route(
            "/api/validations",
            get(handlers::validations::list_rules).post(handlers::validations::create_rule),
        )
        .route(
            "/api/validations/{id}",
            put(handlers::validations::update_rule).delete(handlers::validations::delete_rule),
        )
        .route(
            "/api/validations/{id}/deactivate",
            post(handlers::validations::deactivate_rule),
        )
        .route(
            "/api/validation-results",
            get(handlers::validations::list_results),
        )
        .route("/api/metadata", get(handlers::connections::get_metadata))
        .route(
            "/api/run-validations",
            post(handlers::validations::run_validations),
        )
        .route(
            "/api/generate-default-validations",
            post(handlers::validations::generate_default_validations),
        )
        .route(
            "/api/automation/connection-configs/{id}",
            get(handlers::automation::get_connection_config)
                .put(handlers::automation::update_connection_config),
        )
        .route(
            "/api/automation/trigger/{id}",
            post(handlers::automation::trigger_automation),
        )
        .route(
            "/api/automation/status",
            get(handlers::automation::automation_status),
        )
        .route(
            "/api/automation/status-enhanced",
            get(handlers::automation::automation_status_enhanced),
        )
        .route("/api/automation/jobs", get(handlers::automation::list_jobs))
        .route(
            "/api/automation/jobs/{id}/cancel",
            post(handlers::automation::cancel_job),
        )
        .route("/api/automation/runs", get(handlers::automation::list_runs))
        .route(
            "/api/automation/events",
            get(handlers::automation::list_events),
        )
        .route(
            "/api/automation/schema-changes",
            get(handlers::automation::list_schema_changes),
        )
        .route(
            "/api/automation/change-analytics",
            get(handlers::automation::change_analytics),
        )
        .route(
            "/api/automation/schema-changes/{id}/acknowledge",
            post(handlers::automation::acknowledge_schema_change),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/api/login", post(handlers::auth::login))
        .merge(protected)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Starts the server with the given configuration
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Arc::new(config);
    let automation = Arc::new(AutomationService::new(db.clone(), &config)?);

    // Route registration first, then background subsystems; gating keeps
    // the orchestrator inert in development unless explicitly enabled.
    let state = AppState::new(db, config.clone(), automation.clone());
    let app = create_app(state);

    automation.start_all();

    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    automation.stop_all().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::auth::login,
        crate::handlers::connections::list_connections,
        crate::handlers::connections::create_connection,
        crate::handlers::connections::test_connection,
        crate::handlers::profiles::run_profile,
        crate::handlers::profiles::profile_history,
        crate::handlers::validations::run_validations,
        crate::handlers::validations::generate_default_validations,
        crate::handlers::automation::get_connection_config,
        crate::handlers::automation::update_connection_config,
        crate::handlers::automation::trigger_automation,
        crate::handlers::automation::automation_status,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::auth::LoginRequest,
            crate::handlers::auth::LoginResponse,
            crate::handlers::connections::ConnectionInfo,
            crate::handlers::connections::CreateConnectionRequest,
            crate::handlers::connections::TestConnectionRequest,
            crate::handlers::validations::RunValidationsRequest,
            crate::handlers::validations::GenerateDefaultsRequest,
            crate::handlers::automation::UpdateScheduleRequest,
            crate::handlers::automation::TriggerRequest,
        )
    ),
    info(
        title = "Datawatch API",
        description = "Data-quality automation platform",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
