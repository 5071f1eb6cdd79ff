//! Notification dispatcher
//!
//! Event-bus handler that forwards alert-worthy events (failed jobs,
//! detected schema changes, validation failures) to the owning
//! organization's webhook. Payloads are optionally signed with a shared
//! secret so receivers can authenticate them.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sea_orm::DatabaseConnection;
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, info, warn};

use super::events::{AutomationEvent, EventHandler, EventType};
use crate::repositories::notification::NotificationRepository;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

type HmacSha256 = Hmac<Sha256>;

pub struct WebhookNotifier {
    settings: NotificationRepository,
    client: reqwest::Client,
    signing_secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(db: DatabaseConnection, signing_secret: Option<String>) -> Self {
        Self {
            settings: NotificationRepository::new(db),
            client: reqwest::Client::new(),
            signing_secret,
        }
    }

    fn is_notifiable(event_type: EventType) -> bool {
        matches!(
            event_type,
            EventType::JobFailed
                | EventType::SchemaChangesDetected
                | EventType::ValidationFailuresDetected
        )
    }

    fn sign(&self, body: &[u8]) -> Option<String> {
        let secret = self.signing_secret.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(body);
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl EventHandler for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook_notifier"
    }

    async fn handle(&self, event: &AutomationEvent) -> anyhow::Result<()> {
        if !Self::is_notifiable(event.event_type) {
            return Ok(());
        }

        let Some(organization_id) = event.organization_id else {
            debug!(
                event_type = %event.event_type,
                "Skipping notification; event has no organization"
            );
            return Ok(());
        };

        let Some(settings) = self.settings.get_for_organization(organization_id).await? else {
            return Ok(());
        };
        if !settings.webhook_enabled {
            return Ok(());
        }
        let Some(webhook_url) = settings.webhook_url.as_deref() else {
            warn!(
                organization_id = %organization_id,
                "Webhook notifications enabled without a URL"
            );
            return Ok(());
        };

        // Honour the per-organization event subscription list when set.
        if let Some(subscribed) = settings.events.as_ref().and_then(|v| v.as_array())
            && !subscribed
                .iter()
                .filter_map(|v| v.as_str())
                .any(|name| name == event.event_type.as_str())
        {
            return Ok(());
        }

        let payload = json!({
            "event_type": event.event_type.as_str(),
            "connection_id": event.connection_id,
            "organization_id": organization_id,
            "data": event.data,
        });
        let body = serde_json::to_vec(&payload)?;

        let mut request = self
            .client
            .post(webhook_url)
            .timeout(WEBHOOK_TIMEOUT)
            .header("content-type", "application/json");
        if let Some(signature) = self.sign(&body) {
            request = request.header("x-datawatch-signature", signature);
        }

        let response = request.body(body).send().await?;
        if !response.status().is_success() {
            anyhow::bail!(
                "webhook returned status {} for {}",
                response.status(),
                event.event_type
            );
        }

        info!(
            organization_id = %organization_id,
            event_type = %event.event_type,
            "Delivered webhook notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ActiveModelTrait, Database, Set};
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup(webhook_url: &str) -> (DatabaseConnection, Uuid) {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");

        let organization_id = Uuid::new_v4();
        let org = crate::models::organization::ActiveModel {
            id: Set(organization_id),
            name: Set("Test Org".to_string()),
            created_at: Set(Utc::now().into()),
            updated_at: Set(Utc::now().into()),
        };
        org.insert(&db).await.expect("insert organization");

        let settings = crate::models::notification_setting::ActiveModel {
            id: Set(Uuid::new_v4()),
            organization_id: Set(organization_id),
            email_enabled: Set(false),
            webhook_enabled: Set(true),
            webhook_url: Set(Some(webhook_url.to_string())),
            events: Set(None),
            created_at: Set(Utc::now().into()),
            updated_at: Set(Utc::now().into()),
        };
        settings.insert(&db).await.expect("insert settings");

        (db, organization_id)
    }

    #[tokio::test]
    async fn delivers_signed_webhook_for_failed_jobs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/datawatch"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (db, organization_id) = setup(&format!("{}/hooks/datawatch", server.uri())).await;
        let notifier = WebhookNotifier::new(db, Some("hook-secret".to_string()));

        let event = AutomationEvent::new(EventType::JobFailed, json!({"error": "boom"}))
            .for_organization(organization_id);
        notifier.handle(&event).await.expect("deliver webhook");

        let received = &server.received_requests().await.expect("requests")[0];
        assert!(received.headers.get("x-datawatch-signature").is_some());
    }

    #[tokio::test]
    async fn non_notifiable_events_are_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (db, organization_id) = setup(&server.uri()).await;
        let notifier = WebhookNotifier::new(db, None);

        let event = AutomationEvent::new(EventType::JobCompleted, json!({}))
            .for_organization(organization_id);
        notifier.handle(&event).await.expect("handle event");
    }
}
