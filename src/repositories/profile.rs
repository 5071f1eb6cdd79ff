//! Profile repository backing the authentication gateway.

use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};

use crate::models::profile::{self, Entity as Profile};

#[derive(Debug, Clone)]
pub struct ProfileRepository {
    db: DatabaseConnection,
}

impl ProfileRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<profile::Model>, DbErr> {
        Profile::find()
            .filter(profile::Column::Email.eq(email))
            .one(&self.db)
            .await
    }
}
