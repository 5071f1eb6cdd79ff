//! HTTP surface tests: login, auth enforcement, connections CRUD and
//! schedule configuration over an in-memory store.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use datawatch::auth::hash_password;
use datawatch::automation::lifecycle::AutomationService;
use datawatch::config::AppConfig;
use datawatch::server::{AppState, create_app};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use serde_json::{Value as JsonValue, json};
use tower::ServiceExt;
use uuid::Uuid;

struct TestContext {
    app: Router,
    organization_id: Uuid,
}

async fn body_json(response: axum::response::Response) -> JsonValue {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("parse json body")
}

async fn setup() -> TestContext {
    let db = Database::connect("sqlite::memory:").await.expect("connect");
    Migrator::up(&db, None).await.expect("migrate");

    let organization_id = seed_user(&db).await;

    let config = Arc::new(AppConfig::default());
    let automation =
        Arc::new(AutomationService::new(db.clone(), &config).expect("build automation"));
    let state = AppState::new(db, config, automation);

    TestContext {
        app: create_app(state),
        organization_id,
    }
}

async fn seed_user(db: &DatabaseConnection) -> Uuid {
    let organization_id = Uuid::new_v4();
    let org = datawatch::models::organization::ActiveModel {
        id: Set(organization_id),
        name: Set("Acme Analytics".to_string()),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
    };
    org.insert(db).await.expect("insert organization");

    let salt = "per-user-salt";
    let profile = datawatch::models::profile::ActiveModel {
        id: Set(Uuid::new_v4()),
        organization_id: Set(organization_id),
        email: Set("analyst@acme.test".to_string()),
        password_hash: Set(hash_password(salt, "opensesame")),
        password_salt: Set(salt.to_string()),
        role: Set("admin".to_string()),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
    };
    profile.insert(db).await.expect("insert profile");

    organization_id
}

async fn login(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"email": "analyst@acme.test", "password": "opensesame"}).to_string(),
                ))
                .expect("build request"),
        )
        .await
        .expect("send request");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    body["token"].as_str().expect("token in body").to_string()
}

#[tokio::test]
async fn login_rejects_bad_credentials() {
    let context = setup().await;

    let response = context
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"email": "analyst@acme.test", "password": "wrong"}).to_string(),
                ))
                .expect("build request"),
        )
        .await
        .expect("send request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let context = setup().await;

    let response = context
        .app
        .oneshot(
            Request::builder()
                .uri("/api/connections")
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("send request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn connection_crud_round_trip() {
    let context = setup().await;
    let token = login(&context.app).await;

    // Create.
    let response = context
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/connections")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::from(
                    json!({
                        "name": "warehouse",
                        "connection_type": "postgresql",
                        "connection_details": {"host": "db.internal", "password": "secret"}
                    })
                    .to_string(),
                ))
                .expect("build request"),
        )
        .await
        .expect("send request");
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["connection_type"], "postgresql");
    assert_eq!(created["has_credentials"], true);
    assert!(
        created.get("connection_details").is_none(),
        "credentials must never appear in responses"
    );
    let connection_id = created["id"].as_str().expect("id").to_string();

    // List.
    let response = context
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/connections")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("send request");
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().expect("array").len(), 1);

    // Delete.
    let response = context
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/connections/{}", connection_id))
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("send request");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let _ = context.organization_id;
}

#[tokio::test]
async fn invalid_connection_type_is_a_validation_error() {
    let context = setup().await;
    let token = login(&context.app).await;

    let response = context
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/connections")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::from(
                    json!({"name": "x", "connection_type": "oracle"}).to_string(),
                ))
                .expect("build request"),
        )
        .await
        .expect("send request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn schedule_config_put_then_get_round_trips() {
    let context = setup().await;
    let token = login(&context.app).await;

    // Create a connection to configure.
    let response = context
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/connections")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::from(
                    json!({"name": "warehouse", "connection_type": "postgresql"}).to_string(),
                ))
                .expect("build request"),
        )
        .await
        .expect("send request");
    let connection_id = body_json(response).await["id"]
        .as_str()
        .expect("id")
        .to_string();

    let schedule_config = json!({
        "metadata_refresh": {
            "enabled": true,
            "schedule_type": "weekly",
            "time": "4:30",
            "timezone": "America/New_York",
            "days": ["Monday", "THURSDAY"]
        }
    });

    let response = context
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!(
                    "/api/automation/connection-configs/{}",
                    connection_id
                ))
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::from(
                    json!({ "schedule_config": schedule_config }).to_string(),
                ))
                .expect("build request"),
        )
        .await
        .expect("send request");
    assert_eq!(response.status(), StatusCode::OK);

    let response = context
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/api/automation/connection-configs/{}",
                    connection_id
                ))
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("send request");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let entry = &body["schedule_config"]["metadata_refresh"];
    assert_eq!(entry["time"], "04:30", "time is zero-padded");
    assert_eq!(entry["days"], json!(["monday", "thursday"]));
    assert!(
        body["next_runs"]["metadata_refresh"]["next_run_iso"].is_string(),
        "next run is materialised"
    );

    // Invalid config is rejected at the boundary.
    let response = context
        .app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!(
                    "/api/automation/connection-configs/{}",
                    connection_id
                ))
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::from(
                    json!({
                        "schedule_config": {
                            "metadata_refresh": {
                                "enabled": true,
                                "schedule_type": "weekly",
                                "time": "02:00",
                                "timezone": "UTC",
                                "days": []
                            }
                        }
                    })
                    .to_string(),
                ))
                .expect("build request"),
        )
        .await
        .expect("send request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn automation_status_reports_gating() {
    let context = setup().await;
    let token = login(&context.app).await;

    let response = context
        .app
        .oneshot(
            Request::builder()
                .uri("/api/automation/status")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("send request");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    // Default config is development without the enable flag.
    assert_eq!(body["scheduler_enabled"], false);
    assert_eq!(body["orchestrator"]["running"], false);
}
