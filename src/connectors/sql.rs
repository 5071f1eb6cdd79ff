//! SQL target connector
//!
//! Connects to a target database by URL through SeaORM and implements the
//! two core operations with raw statements. Snowflake sessions get the
//! statement timeout pinned server-side before user queries run.

use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, QueryResult, Statement, Value,
};
use serde_json::{Value as JsonValue, json};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::{ConnectionType, ConnectorError, TargetConnector};
use crate::metadata::schema_diff::{
    ColumnSchema, ForeignKeySchema, IndexSchema, SchemaSnapshot, TableSchema,
};

/// Statement timeout applied to every rule query, in seconds.
const STATEMENT_TIMEOUT_SECONDS: u64 = 60;

/// A connector talking plain SQL to the target over a URL.
pub struct SqlTargetConnector {
    connection_type: ConnectionType,
    url: String,
    conn: OnceCell<DatabaseConnection>,
}

impl SqlTargetConnector {
    pub fn new(connection_type: ConnectionType, url: String) -> Self {
        Self {
            connection_type,
            url,
            conn: OnceCell::new(),
        }
    }

    async fn connection(&self) -> Result<&DatabaseConnection, ConnectorError> {
        self.conn
            .get_or_try_init(|| async {
                let mut options = ConnectOptions::new(&self.url);
                options
                    .max_connections(2)
                    .acquire_timeout(Duration::from_secs(10))
                    .sqlx_logging(false);

                let conn = Database::connect(options)
                    .await
                    .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?;

                // Snowflake enforces the per-query deadline through a session
                // parameter rather than a driver-side deadline.
                if self.connection_type == ConnectionType::Snowflake {
                    let stmt = Statement::from_string(
                        conn.get_database_backend(),
                        format!(
                            "ALTER SESSION SET STATEMENT_TIMEOUT_IN_SECONDS = {}",
                            STATEMENT_TIMEOUT_SECONDS
                        ),
                    );
                    if let Err(err) = conn.execute(stmt).await {
                        warn!(error = %err, "Failed to set session statement timeout");
                    }
                }

                Ok(conn)
            })
            .await
    }

    async fn query_all(
        &self,
        sql: &str,
        values: Vec<Value>,
    ) -> Result<Vec<QueryResult>, ConnectorError> {
        let conn = self.connection().await?;
        let stmt = Statement::from_sql_and_values(conn.get_database_backend(), sql, values);
        conn.query_all(stmt)
            .await
            .map_err(|e| ConnectorError::QueryFailed(e.to_string()))
    }
}

#[async_trait]
impl TargetConnector for SqlTargetConnector {
    async fn fetch_scalar(
        &self,
        query: &str,
        timeout: Duration,
    ) -> Result<JsonValue, ConnectorError> {
        let conn = self.connection().await?;
        let stmt = Statement::from_string(conn.get_database_backend(), query.to_string());

        let row = tokio::time::timeout(timeout, conn.query_one(stmt))
            .await
            .map_err(|_| ConnectorError::Timeout(timeout))?
            .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;

        Ok(row.map(|row| scalar_from_row(&row)).unwrap_or(JsonValue::Null))
    }

    async fn fetch_schema_snapshot(
        &self,
        table_limit: usize,
    ) -> Result<SchemaSnapshot, ConnectorError> {
        let table_rows = self
            .query_all(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                Vec::new(),
            )
            .await?;

        let mut snapshot = SchemaSnapshot::default();

        for row in table_rows.into_iter().take(table_limit) {
            let table_name: String = row
                .try_get_by_index(0)
                .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;

            match self.collect_table(&table_name).await {
                Ok(table) => snapshot.tables.push(table),
                Err(err) => {
                    // One unreadable table must not sink the whole snapshot.
                    warn!(table = %table_name, error = %err, "Failed to collect table schema");
                }
            }
        }

        debug!(
            tables = snapshot.tables.len(),
            "Collected schema snapshot"
        );
        Ok(snapshot)
    }
}

impl SqlTargetConnector {
    async fn collect_table(&self, table_name: &str) -> Result<TableSchema, ConnectorError> {
        let column_rows = self
            .query_all(
                "SELECT column_name, data_type, is_nullable \
                 FROM information_schema.columns \
                 WHERE table_schema = 'public' AND table_name = $1 \
                 ORDER BY ordinal_position",
                vec![Value::from(table_name)],
            )
            .await?;

        let mut columns = Vec::with_capacity(column_rows.len());
        for row in column_rows {
            let name: String = row
                .try_get_by_index(0)
                .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;
            let data_type: String = row
                .try_get_by_index(1)
                .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;
            let is_nullable: String = row
                .try_get_by_index(2)
                .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;
            columns.push(ColumnSchema {
                name,
                data_type,
                nullable: Some(is_nullable.eq_ignore_ascii_case("yes")),
            });
        }

        let pk_rows = self
            .query_all(
                "SELECT kcu.column_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                  AND tc.table_schema = kcu.table_schema \
                 WHERE tc.table_schema = 'public' AND tc.table_name = $1 \
                   AND tc.constraint_type = 'PRIMARY KEY' \
                 ORDER BY kcu.ordinal_position",
                vec![Value::from(table_name)],
            )
            .await?;

        let mut primary_key = Vec::with_capacity(pk_rows.len());
        for row in pk_rows {
            let column: String = row
                .try_get_by_index(0)
                .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;
            primary_key.push(column);
        }

        let foreign_keys = self.collect_foreign_keys(table_name).await?;
        let indices = self.collect_indices(table_name).await?;

        Ok(TableSchema {
            name: table_name.to_string(),
            columns,
            primary_key,
            foreign_keys,
            indices,
        })
    }

    async fn collect_foreign_keys(
        &self,
        table_name: &str,
    ) -> Result<Vec<ForeignKeySchema>, ConnectorError> {
        let rows = self
            .query_all(
                "SELECT tc.constraint_name, kcu.column_name, \
                        ccu.table_name AS referred_table, ccu.column_name AS referred_column \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                  AND tc.table_schema = kcu.table_schema \
                 JOIN information_schema.constraint_column_usage ccu \
                   ON tc.constraint_name = ccu.constraint_name \
                  AND tc.table_schema = ccu.table_schema \
                 WHERE tc.table_schema = 'public' AND tc.table_name = $1 \
                   AND tc.constraint_type = 'FOREIGN KEY' \
                 ORDER BY tc.constraint_name",
                vec![Value::from(table_name)],
            )
            .await?;

        // Group columns per constraint to form one entry per foreign key.
        let mut grouped: Vec<(String, ForeignKeySchema)> = Vec::new();
        for row in rows {
            let constraint: String = row
                .try_get_by_index(0)
                .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;
            let column: String = row
                .try_get_by_index(1)
                .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;
            let referred_table: String = row
                .try_get_by_index(2)
                .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;
            let referred_column: String = row
                .try_get_by_index(3)
                .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;

            match grouped.iter_mut().find(|(name, _)| *name == constraint) {
                Some((_, fk)) => {
                    fk.constrained_columns.push(column);
                    fk.referred_columns.push(referred_column);
                }
                None => grouped.push((
                    constraint,
                    ForeignKeySchema {
                        constrained_columns: vec![column],
                        referred_table,
                        referred_columns: vec![referred_column],
                    },
                )),
            }
        }

        Ok(grouped.into_iter().map(|(_, fk)| fk).collect())
    }

    async fn collect_indices(&self, table_name: &str) -> Result<Vec<IndexSchema>, ConnectorError> {
        let rows = self
            .query_all(
                "SELECT i.relname AS index_name, a.attname AS column_name, ix.indisunique \
                 FROM pg_class t \
                 JOIN pg_index ix ON t.oid = ix.indrelid \
                 JOIN pg_class i ON i.oid = ix.indexrelid \
                 JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
                 WHERE t.relname = $1 AND t.relkind = 'r' \
                 ORDER BY i.relname",
                vec![Value::from(table_name)],
            )
            .await?;

        let mut grouped: Vec<IndexSchema> = Vec::new();
        for row in rows {
            let name: String = row
                .try_get_by_index(0)
                .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;
            let column: String = row
                .try_get_by_index(1)
                .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;
            let unique: bool = row
                .try_get_by_index(2)
                .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;

            match grouped.iter_mut().find(|idx| idx.name == name) {
                Some(index) => index.columns.push(column),
                None => grouped.push(IndexSchema {
                    name,
                    columns: vec![column],
                    unique,
                }),
            }
        }

        Ok(grouped)
    }
}

/// Extract the first column of a result row as JSON, trying the common
/// scalar shapes in order.
fn scalar_from_row(row: &QueryResult) -> JsonValue {
    if let Ok(value) = row.try_get_by_index::<Option<i64>>(0) {
        return value.map(JsonValue::from).unwrap_or(JsonValue::Null);
    }
    if let Ok(value) = row.try_get_by_index::<Option<f64>>(0) {
        return value.map(|v| json!(v)).unwrap_or(JsonValue::Null);
    }
    if let Ok(value) = row.try_get_by_index::<Option<bool>>(0) {
        return value.map(JsonValue::from).unwrap_or(JsonValue::Null);
    }
    if let Ok(value) = row.try_get_by_index::<Option<String>>(0) {
        return value.map(JsonValue::from).unwrap_or(JsonValue::Null);
    }
    JsonValue::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::ConnectionTrait;

    async fn sqlite_connector(setup_sql: &[&str]) -> (DatabaseConnection, SqlTargetConnector) {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        for sql in setup_sql {
            db.execute(Statement::from_string(
                db.get_database_backend(),
                sql.to_string(),
            ))
            .await
            .expect("setup statement");
        }

        let connector =
            SqlTargetConnector::new(ConnectionType::Postgresql, String::new());
        connector.conn.set(db.clone()).expect("prime connection");
        (db, connector)
    }

    #[tokio::test]
    async fn scalar_returns_first_column_of_first_row() {
        let (_db, connector) = sqlite_connector(&[
            "CREATE TABLE orders (amount INTEGER)",
            "INSERT INTO orders (amount) VALUES (15), (99)",
        ])
        .await;

        let value = connector
            .fetch_scalar(
                "SELECT amount FROM orders ORDER BY amount",
                Duration::from_secs(60),
            )
            .await
            .expect("scalar query");
        assert_eq!(value, json!(15));
    }

    #[tokio::test]
    async fn scalar_of_empty_result_is_null() {
        let (_db, connector) =
            sqlite_connector(&["CREATE TABLE orders (amount INTEGER)"]).await;

        let value = connector
            .fetch_scalar("SELECT amount FROM orders", Duration::from_secs(60))
            .await
            .expect("scalar query");
        assert_eq!(value, JsonValue::Null);
    }

    #[tokio::test]
    async fn failed_query_surfaces_as_query_error() {
        let (_db, connector) = sqlite_connector(&[]).await;

        let result = connector
            .fetch_scalar("SELECT amount FROM missing", Duration::from_secs(60))
            .await;
        assert!(matches!(result, Err(ConnectorError::QueryFailed(_))));
    }
}
