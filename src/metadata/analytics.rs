//! Metadata change analytics
//!
//! Rolling per-object change counters and the refresh-interval
//! suggestions derived from them.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use crate::models::metadata_change_analytics::{self, Entity as MetadataChangeAnalytics};

/// Suggested refresh cadence for an object based on its churn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSuggestion {
    /// At least daily churn: refresh every 6 hours.
    High,
    /// Weekly-ish churn: refresh daily.
    Moderate,
    /// Quiet objects: refresh every 3 days.
    Low,
}

impl RefreshSuggestion {
    pub fn interval_hours(&self) -> u32 {
        match self {
            RefreshSuggestion::High => 6,
            RefreshSuggestion::Moderate => 24,
            RefreshSuggestion::Low => 72,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshSuggestion::High => "high_churn",
            RefreshSuggestion::Moderate => "moderate_churn",
            RefreshSuggestion::Low => "low_churn",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeAnalytics {
    db: DatabaseConnection,
}

impl ChangeAnalytics {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Bump the counter for one detected change.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_change(
        &self,
        connection_id: Uuid,
        organization_id: Uuid,
        table_name: &str,
        column_name: Option<&str>,
        change_type: &str,
        detected_at: DateTime<Utc>,
    ) -> Result<(), DbErr> {
        let mut query = MetadataChangeAnalytics::find()
            .filter(metadata_change_analytics::Column::ConnectionId.eq(connection_id))
            .filter(metadata_change_analytics::Column::TableName.eq(table_name))
            .filter(metadata_change_analytics::Column::ChangeType.eq(change_type));
        query = match column_name {
            Some(column) => {
                query.filter(metadata_change_analytics::Column::ColumnName.eq(column))
            }
            None => query.filter(metadata_change_analytics::Column::ColumnName.is_null()),
        };

        match query.one(&self.db).await? {
            Some(existing) => {
                let count = existing.change_count + 1;
                let mut active: metadata_change_analytics::ActiveModel = existing.into();
                active.change_count = Set(count);
                active.last_detected_at = Set(detected_at.into());
                active.updated_at = Set(Utc::now().into());
                active.update(&self.db).await?;
            }
            None => {
                let active = metadata_change_analytics::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    connection_id: Set(connection_id),
                    organization_id: Set(organization_id),
                    table_name: Set(table_name.to_string()),
                    column_name: Set(column_name.map(str::to_string)),
                    change_type: Set(change_type.to_string()),
                    change_count: Set(1),
                    first_detected_at: Set(detected_at.into()),
                    last_detected_at: Set(detected_at.into()),
                    created_at: Set(Utc::now().into()),
                    updated_at: Set(Utc::now().into()),
                };
                active.insert(&self.db).await?;
            }
        }

        Ok(())
    }

    /// Average changes per day for a table across the observed window.
    pub async fn change_frequency(
        &self,
        connection_id: Uuid,
        table_name: &str,
    ) -> Result<f64, DbErr> {
        let rows = MetadataChangeAnalytics::find()
            .filter(metadata_change_analytics::Column::ConnectionId.eq(connection_id))
            .filter(metadata_change_analytics::Column::TableName.eq(table_name))
            .all(&self.db)
            .await?;

        if rows.is_empty() {
            return Ok(0.0);
        }

        let total: i64 = rows.iter().map(|row| row.change_count as i64).sum();
        let first = rows
            .iter()
            .map(|row| row.first_detected_at.with_timezone(&Utc))
            .min()
            .unwrap_or_else(Utc::now);
        let last = rows
            .iter()
            .map(|row| row.last_detected_at.with_timezone(&Utc))
            .max()
            .unwrap_or_else(Utc::now);

        let span_days = ((last - first).num_seconds() as f64 / 86_400.0).max(1.0);
        Ok(total as f64 / span_days)
    }

    /// Suggest a refresh interval for a table from its change frequency.
    pub async fn suggest_refresh_interval(
        &self,
        connection_id: Uuid,
        table_name: &str,
    ) -> Result<RefreshSuggestion, DbErr> {
        let per_day = self.change_frequency(connection_id, table_name).await?;

        Ok(if per_day >= 1.0 {
            RefreshSuggestion::High
        } else if per_day >= 1.0 / 7.0 {
            RefreshSuggestion::Moderate
        } else {
            RefreshSuggestion::Low
        })
    }

    /// Objects with the highest recorded churn, for the analytics API.
    pub async fn high_impact_objects(
        &self,
        organization_id: Uuid,
        limit: u64,
    ) -> Result<Vec<metadata_change_analytics::Model>, DbErr> {
        use sea_orm::QuerySelect;

        MetadataChangeAnalytics::find()
            .filter(metadata_change_analytics::Column::OrganizationId.eq(organization_id))
            .order_by_desc(metadata_change_analytics::Column::ChangeCount)
            .limit(limit)
            .all(&self.db)
            .await
    }

    /// Prune counters not updated within the retention window.
    pub async fn prune_stale(&self, retention_days: i64) -> Result<u64, DbErr> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let result = MetadataChangeAnalytics::delete_many()
            .filter(metadata_change_analytics::Column::LastDetectedAt.lt(cutoff))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup() -> (ChangeAnalytics, Uuid, Uuid) {
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

        let connection_id = Uuid::new_v4();
        let connection = crate::models::connection::ActiveModel {
            id: Set(connection_id),
            organization_id: Set(organization_id),
            name: Set("warehouse".to_string()),
            connection_type: Set("postgresql".to_string()),
            credentials_ciphertext: Set(None),
            is_default: Set(false),
            created_at: Set(Utc::now().into()),
            updated_at: Set(Utc::now().into()),
        };
        connection.insert(&db).await.expect("insert connection");

        (ChangeAnalytics::new(db), connection_id, organization_id)
    }

    #[tokio::test]
    async fn repeated_changes_bump_one_counter() {
        let (analytics, connection_id, organization_id) = setup().await;
        let now = Utc::now();

        for _ in 0..3 {
            analytics
                .record_change(
                    connection_id,
                    organization_id,
                    "orders",
                    Some("amount"),
                    "column_type_changed",
                    now,
                )
                .await
                .expect("record change");
        }

        let rows = analytics
            .high_impact_objects(organization_id, 10)
            .await
            .expect("list objects");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].change_count, 3);
    }

    #[tokio::test]
    async fn quiet_tables_suggest_low_churn() {
        let (analytics, connection_id, _) = setup().await;
        let suggestion = analytics
            .suggest_refresh_interval(connection_id, "orders")
            .await
            .expect("suggestion");
        assert_eq!(suggestion, RefreshSuggestion::Low);
        assert_eq!(suggestion.interval_hours(), 72);
    }
}
