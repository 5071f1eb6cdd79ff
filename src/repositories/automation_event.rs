//! AutomationEvent repository

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::automation_event::{self, Entity as AutomationEvent};

#[derive(Debug, Clone)]
pub struct AutomationEventRepository {
    db: DatabaseConnection,
}

impl AutomationEventRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        &self,
        event_type: &str,
        automation_type: &str,
        connection_id: Option<Uuid>,
        organization_id: Option<Uuid>,
        user_id: Option<Uuid>,
        event_data: Option<JsonValue>,
    ) -> Result<Uuid, DbErr> {
        let id = Uuid::new_v4();
        let model = automation_event::ActiveModel {
            id: Set(id),
            event_type: Set(event_type.to_string()),
            automation_type: Set(automation_type.to_string()),
            connection_id: Set(connection_id),
            organization_id: Set(organization_id),
            user_id: Set(user_id),
            event_data: Set(event_data),
            created_at: Set(Utc::now().into()),
        };
        model.insert(&self.db).await?;
        Ok(id)
    }

    /// Event timeline with optional filters, newest first.
    pub async fn list(
        &self,
        connection_id: Option<Uuid>,
        organization_id: Option<Uuid>,
        event_type: Option<&str>,
        limit: u64,
    ) -> Result<Vec<automation_event::Model>, DbErr> {
        let mut query = AutomationEvent::find().order_by_desc(automation_event::Column::CreatedAt);
        if let Some(connection_id) = connection_id {
            query = query.filter(automation_event::Column::ConnectionId.eq(connection_id));
        }
        if let Some(organization_id) = organization_id {
            query = query.filter(automation_event::Column::OrganizationId.eq(organization_id));
        }
        if let Some(event_type) = event_type {
            query = query.filter(automation_event::Column::EventType.eq(event_type));
        }
        query.limit(limit).all(&self.db).await
    }
}
