//! Target-database connectors
//!
//! The seam between the automation core and the customer databases it
//! inspects. A [`TargetConnector`] exposes the two operations the core
//! needs: scalar query execution (validation rules) and schema snapshot
//! collection (schema-change detection, profiling).

pub mod registry;
pub mod sql;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;
use url::Url;

use crate::metadata::schema_diff::SchemaSnapshot;

pub use registry::ConnectorRegistry;
pub use sql::SqlTargetConnector;

/// Supported target database flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    Snowflake,
    Postgresql,
    Duckdb,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Snowflake => "snowflake",
            ConnectionType::Postgresql => "postgresql",
            ConnectionType::Duckdb => "duckdb",
        }
    }

    fn url_scheme(&self) -> &'static str {
        match self {
            ConnectionType::Snowflake => "snowflake",
            ConnectionType::Postgresql => "postgresql",
            ConnectionType::Duckdb => "duckdb",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionType {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snowflake" => Ok(ConnectionType::Snowflake),
            "postgresql" => Ok(ConnectionType::Postgresql),
            "duckdb" => Ok(ConnectionType::Duckdb),
            other => Err(ConnectorError::UnsupportedType(other.to_string())),
        }
    }
}

/// Connector-level failures, mapped to `UpstreamError` at the boundary.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("unsupported connection type: {0}")]
    UnsupportedType(String),
    #[error("invalid connection credentials: {0}")]
    InvalidCredentials(String),
    #[error("failed to connect to target database: {0}")]
    ConnectionFailed(String),
    #[error("query failed: {0}")]
    QueryFailed(String),
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

impl ConnectorError {
    /// Whether the error message hints at schema drift (missing table or
    /// column), which triggers a targeted metadata refresh.
    pub fn hints_schema_drift(&self) -> bool {
        let message = self.to_string().to_lowercase();
        message.contains("column not found")
            || message.contains("table not found")
            || message.contains("does not exist")
    }
}

/// Interface to one connection's target database.
#[async_trait]
pub trait TargetConnector: Send + Sync {
    /// Execute an opaque scalar SQL query and return the first column of
    /// the first row, null when the result set is empty.
    async fn fetch_scalar(
        &self,
        query: &str,
        timeout: Duration,
    ) -> Result<JsonValue, ConnectorError>;

    /// Collect a schema snapshot (tables, columns, primary keys, foreign
    /// keys, indices), capped at `table_limit` tables.
    async fn fetch_schema_snapshot(
        &self,
        table_limit: usize,
    ) -> Result<SchemaSnapshot, ConnectorError>;
}

/// Build the target connection URL from stored credentials, URL-encoding
/// the username and password.
///
/// Credentials either carry a ready `url` field or the usual parts
/// (host, port, database, username, password).
pub fn build_connection_url(
    connection_type: ConnectionType,
    credentials: &JsonValue,
) -> Result<String, ConnectorError> {
    if let Some(url) = credentials.get("url").and_then(JsonValue::as_str) {
        return Ok(url.to_string());
    }

    let host = credentials
        .get("host")
        .or_else(|| credentials.get("account"))
        .and_then(JsonValue::as_str)
        .ok_or_else(|| ConnectorError::InvalidCredentials("missing host".to_string()))?;
    let database = credentials
        .get("database")
        .and_then(JsonValue::as_str)
        .unwrap_or("");

    let mut url = Url::parse(&format!(
        "{}://{}/{}",
        connection_type.url_scheme(),
        host,
        database
    ))
    .map_err(|e| ConnectorError::InvalidCredentials(e.to_string()))?;

    if let Some(port) = credentials.get("port").and_then(JsonValue::as_u64) {
        url.set_port(Some(port as u16))
            .map_err(|_| ConnectorError::InvalidCredentials("invalid port".to_string()))?;
    }

    if let Some(username) = credentials.get("username").and_then(JsonValue::as_str) {
        url.set_username(username)
            .map_err(|_| ConnectorError::InvalidCredentials("invalid username".to_string()))?;
    }
    if let Some(password) = credentials.get("password").and_then(JsonValue::as_str) {
        url.set_password(Some(password))
            .map_err(|_| ConnectorError::InvalidCredentials("invalid password".to_string()))?;
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_url_with_encoded_credentials() {
        let credentials = json!({
            "host": "db.internal",
            "port": 5432,
            "database": "analytics",
            "username": "svc user",
            "password": "p@ss/word"
        });

        let url = build_connection_url(ConnectionType::Postgresql, &credentials)
            .expect("build url");

        assert!(url.starts_with("postgresql://"));
        assert!(url.contains("svc%20user"));
        assert!(url.contains("p%40ss%2Fword"));
        assert!(url.ends_with("db.internal:5432/analytics"));
    }

    #[test]
    fn explicit_url_wins() {
        let credentials = json!({"url": "postgresql://u:p@host/db"});
        let url = build_connection_url(ConnectionType::Postgresql, &credentials)
            .expect("build url");
        assert_eq!(url, "postgresql://u:p@host/db");
    }

    #[test]
    fn missing_host_is_invalid() {
        let result = build_connection_url(ConnectionType::Snowflake, &json!({}));
        assert!(matches!(result, Err(ConnectorError::InvalidCredentials(_))));
    }

    #[test]
    fn drift_hints_are_recognised() {
        assert!(
            ConnectorError::QueryFailed("relation \"orders\" does not exist".to_string())
                .hints_schema_drift()
        );
        assert!(
            !ConnectorError::QueryFailed("syntax error at or near SELECT".to_string())
                .hints_schema_drift()
        );
    }
}
