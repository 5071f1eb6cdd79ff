//! NotificationSetting repository

use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::models::notification_setting::{self, Entity as NotificationSetting};

#[derive(Debug, Clone)]
pub struct NotificationRepository {
    db: DatabaseConnection,
}

impl NotificationRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get_for_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<notification_setting::Model>, DbErr> {
        NotificationSetting::find()
            .filter(notification_setting::Column::OrganizationId.eq(organization_id))
            .one(&self.db)
            .await
    }
}
