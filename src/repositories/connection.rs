//! Connection repository for database operations
//!
//! Encapsulates SeaORM operations for the database_connections table with
//! organization-aware methods. Credentials are encrypted before they touch
//! the store and decrypted only for task execution; API-facing reads never
//! see them.

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::crypto::{CryptoKey, decrypt_credentials, encrypt_credentials};
use crate::models::connection::{self, Entity as Connection};

/// Repository for connection database operations
#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    db: DatabaseConnection,
    crypto_key: Option<CryptoKey>,
}

impl ConnectionRepository {
    /// Creates a new ConnectionRepository instance
    pub fn new(db: DatabaseConnection, crypto_key: Option<CryptoKey>) -> Self {
        Self { db, crypto_key }
    }

    /// Fetch a connection by id.
    pub async fn get_by_id(&self, connection_id: Uuid) -> Result<Option<connection::Model>> {
        Ok(Connection::find_by_id(connection_id).one(&self.db).await?)
    }

    /// Fetch a connection by id, scoped to an organization.
    pub async fn get_for_organization(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
    ) -> Result<Option<connection::Model>> {
        Ok(Connection::find_by_id(connection_id)
            .filter(connection::Column::OrganizationId.eq(organization_id))
            .one(&self.db)
            .await?)
    }

    /// List an organization's connections ordered by creation time.
    pub async fn list_by_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<connection::Model>> {
        Ok(Connection::find()
            .filter(connection::Column::OrganizationId.eq(organization_id))
            .order_by_asc(connection::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    /// Create a connection, encrypting the supplied credentials.
    ///
    /// Setting `is_default` when another default exists for the
    /// organization is a conflict the caller surfaces as HTTP 409.
    pub async fn create(
        &self,
        organization_id: Uuid,
        name: &str,
        connection_type: &str,
        credentials: Option<&JsonValue>,
        is_default: bool,
    ) -> Result<connection::Model> {
        if is_default && self.default_exists(organization_id, None).await? {
            return Err(anyhow!("organization already has a default connection"));
        }

        let id = Uuid::new_v4();
        let ciphertext = self.encrypt(id, organization_id, credentials)?;
        let now = Utc::now();

        let model = connection::ActiveModel {
            id: Set(id),
            organization_id: Set(organization_id),
            name: Set(name.to_string()),
            connection_type: Set(connection_type.to_string()),
            credentials_ciphertext: Set(ciphertext),
            is_default: Set(is_default),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        Ok(model.insert(&self.db).await?)
    }

    /// Update name, credentials and default flag of an existing connection.
    pub async fn update(
        &self,
        existing: connection::Model,
        name: Option<&str>,
        credentials: Option<&JsonValue>,
        is_default: Option<bool>,
    ) -> Result<connection::Model> {
        if is_default == Some(true)
            && !existing.is_default
            && self
                .default_exists(existing.organization_id, Some(existing.id))
                .await?
        {
            return Err(anyhow!("organization already has a default connection"));
        }

        let id = existing.id;
        let organization_id = existing.organization_id;
        let mut active: connection::ActiveModel = existing.into();

        if let Some(name) = name {
            active.name = Set(name.to_string());
        }
        if credentials.is_some() {
            active.credentials_ciphertext = Set(self.encrypt(id, organization_id, credentials)?);
        }
        if let Some(flag) = is_default {
            active.is_default = Set(flag);
        }
        active.updated_at = Set(Utc::now().into());

        Ok(active.update(&self.db).await?)
    }

    /// Delete a connection; owned rows cascade in the store.
    pub async fn delete(&self, connection_id: Uuid) -> Result<bool> {
        let result = Connection::delete_by_id(connection_id).exec(&self.db).await?;
        Ok(result.rows_affected > 0)
    }

    /// Decrypt the stored credentials for task execution.
    pub async fn decrypt_credentials(&self, model: &connection::Model) -> Result<JsonValue> {
        let Some(ciphertext) = model.credentials_ciphertext.as_ref() else {
            return Ok(JsonValue::Null);
        };

        match &self.crypto_key {
            Some(key) => {
                decrypt_credentials(key, &model.id, &model.organization_id, ciphertext).map_err(
                    |e| {
                        tracing::error!(
                            connection_id = %model.id,
                            organization_id = %model.organization_id,
                            "Credential decryption failed"
                        );
                        anyhow!("credential decryption failed: {}", e)
                    },
                )
            }
            // Without a key the payload is stored as plain JSON bytes.
            None => Ok(serde_json::from_slice(ciphertext)?),
        }
    }

    async fn default_exists(&self, organization_id: Uuid, excluding: Option<Uuid>) -> Result<bool> {
        let mut query = Connection::find()
            .filter(connection::Column::OrganizationId.eq(organization_id))
            .filter(connection::Column::IsDefault.eq(true));
        if let Some(id) = excluding {
            query = query.filter(connection::Column::Id.ne(id));
        }
        Ok(query.count(&self.db).await? > 0)
    }

    fn encrypt(
        &self,
        connection_id: Uuid,
        organization_id: Uuid,
        credentials: Option<&JsonValue>,
    ) -> Result<Option<Vec<u8>>> {
        let Some(credentials) = credentials else {
            return Ok(None);
        };

        match &self.crypto_key {
            Some(key) => Ok(Some(
                encrypt_credentials(key, &connection_id, &organization_id, credentials)
                    .map_err(|e| anyhow!("credential encryption failed: {}", e))?,
            )),
            None => Ok(Some(serde_json::to_vec(credentials)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use serde_json::json;

    async fn setup() -> (DatabaseConnection, Uuid) {
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

        (db, organization_id)
    }

    #[tokio::test]
    async fn credentials_round_trip_through_store() {
        let (db, organization_id) = setup().await;
        let key = CryptoKey::new(vec![3u8; 32]).expect("valid key");
        let repo = ConnectionRepository::new(db, Some(key));

        let credentials = json!({"host": "warehouse", "password": "p@ss"});
        let created = repo
            .create(
                organization_id,
                "warehouse",
                "postgresql",
                Some(&credentials),
                false,
            )
            .await
            .expect("create connection");

        // Ciphertext in the store must not contain the plaintext password.
        let stored = created.credentials_ciphertext.as_ref().expect("ciphertext");
        assert!(!stored.windows(4).any(|w| w == b"p@ss"));

        let decrypted = repo
            .decrypt_credentials(&created)
            .await
            .expect("decrypt credentials");
        assert_eq!(decrypted, credentials);
    }

    #[tokio::test]
    async fn second_default_connection_is_rejected() {
        let (db, organization_id) = setup().await;
        let repo = ConnectionRepository::new(db, None);

        repo.create(organization_id, "first", "postgresql", None, true)
            .await
            .expect("create default connection");

        let result = repo
            .create(organization_id, "second", "postgresql", None, true)
            .await;
        assert!(result.is_err());
    }
}
