//! Schema-change dedup window tests.

use chrono::{Duration, Utc};
use datawatch::repositories::schema_change::SchemaChangeRepository;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use serde_json::json;
use uuid::Uuid;

async fn seed_connection(db: &DatabaseConnection) -> (Uuid, Uuid) {
    let organization_id = Uuid::new_v4();
    let org = datawatch::models::organization::ActiveModel {
        id: Set(organization_id),
        name: Set("Acme Analytics".to_string()),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
    };
    org.insert(db).await.expect("insert organization");

    let connection_id = Uuid::new_v4();
    let connection = datawatch::models::connection::ActiveModel {
        id: Set(connection_id),
        organization_id: Set(organization_id),
        name: Set("warehouse".to_string()),
        connection_type: Set("postgresql".to_string()),
        credentials_ciphertext: Set(None),
        is_default: Set(false),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
    };
    connection.insert(db).await.expect("insert connection");

    (connection_id, organization_id)
}

#[tokio::test]
async fn identical_change_within_window_is_a_duplicate() {
    let db = Database::connect("sqlite::memory:").await.expect("connect");
    Migrator::up(&db, None).await.expect("migrate");
    let (connection_id, organization_id) = seed_connection(&db).await;

    let repo = SchemaChangeRepository::new(db);
    let now = Utc::now();

    assert!(
        !repo
            .exists_recent(connection_id, "orders", "column_added", Some("currency"), now)
            .await
            .expect("dedup check")
    );

    repo.insert(
        connection_id,
        organization_id,
        "orders",
        Some("currency"),
        "column_added",
        Some(json!({"type": "VARCHAR"})),
        now,
    )
    .await
    .expect("insert change");

    // Same change inside the window is suppressed.
    assert!(
        repo.exists_recent(connection_id, "orders", "column_added", Some("currency"), now)
            .await
            .expect("dedup check")
    );

    // A different column or change type is not.
    assert!(
        !repo
            .exists_recent(connection_id, "orders", "column_added", Some("amount"), now)
            .await
            .expect("dedup check")
    );
    assert!(
        !repo
            .exists_recent(connection_id, "orders", "column_removed", Some("currency"), now)
            .await
            .expect("dedup check")
    );
}

#[tokio::test]
async fn window_expires_after_a_day() {
    let db = Database::connect("sqlite::memory:").await.expect("connect");
    Migrator::up(&db, None).await.expect("migrate");
    let (connection_id, organization_id) = seed_connection(&db).await;

    let repo = SchemaChangeRepository::new(db);
    let yesterday = Utc::now() - Duration::hours(25);

    repo.insert(
        connection_id,
        organization_id,
        "orders",
        None,
        "table_added",
        None,
        yesterday,
    )
    .await
    .expect("insert change");

    assert!(
        !repo
            .exists_recent(connection_id, "orders", "table_added", None, Utc::now())
            .await
            .expect("dedup check"),
        "a change older than the window does not suppress new rows"
    );
}

#[tokio::test]
async fn table_level_changes_dedup_on_null_column() {
    let db = Database::connect("sqlite::memory:").await.expect("connect");
    Migrator::up(&db, None).await.expect("migrate");
    let (connection_id, organization_id) = seed_connection(&db).await;

    let repo = SchemaChangeRepository::new(db);
    let now = Utc::now();

    repo.insert(
        connection_id,
        organization_id,
        "orders",
        None,
        "primary_key_changed",
        Some(json!({"new_columns": ["id", "region"]})),
        now,
    )
    .await
    .expect("insert change");

    assert!(
        repo.exists_recent(connection_id, "orders", "primary_key_changed", None, now)
            .await
            .expect("dedup check")
    );
    assert!(
        !repo
            .exists_recent(
                connection_id,
                "orders",
                "primary_key_changed",
                Some("id"),
                now
            )
            .await
            .expect("dedup check"),
        "column-scoped probe must not match a table-level change"
    );
}
