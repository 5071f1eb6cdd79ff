//! Validation rules engine
//!
//! Executes user-defined scalar rules against target databases, evaluates
//! operators, persists one result per rule, and raises drift events when
//! query failures smell like a schema mismatch.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use sea_orm::DatabaseConnection;
use serde_json::{Value as JsonValue, json};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::automation::events::{AutomationEvent, EventBus, EventType};
use crate::connectors::{ConnectorRegistry, TargetConnector};
use crate::crypto::CryptoKey;
use crate::error::TaskError;
use crate::metadata::schema_diff::MetadataType;
use crate::models::validation_rule::Model as RuleModel;
use crate::repositories::automation_config::AutomationConfigRepository;
use crate::repositories::connection::ConnectionRepository;
use crate::repositories::metadata::MetadataRepository;
use crate::repositories::profile_history::ProfileHistoryRepository;
use crate::repositories::validation::{NewRule, ValidationRepository};

/// Per-query execution deadline.
const QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Concurrent rule executions per run.
const RULE_PARALLELISM: usize = 10;

/// The closed set of comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOperator {
    Equals,
    GreaterThan,
    LessThan,
    Between,
}

impl ValidationOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOperator::Equals => "equals",
            ValidationOperator::GreaterThan => "greater_than",
            ValidationOperator::LessThan => "less_than",
            ValidationOperator::Between => "between",
        }
    }
}

impl FromStr for ValidationOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equals" => Ok(ValidationOperator::Equals),
            "greater_than" => Ok(ValidationOperator::GreaterThan),
            "less_than" => Ok(ValidationOperator::LessThan),
            "between" => Ok(ValidationOperator::Between),
            other => Err(format!("unknown operator: {}", other)),
        }
    }
}

/// Evaluate a rule outcome. A missing actual value is always invalid.
pub fn evaluate(operator: ValidationOperator, actual: &JsonValue, expected: &JsonValue) -> bool {
    if actual.is_null() {
        return false;
    }

    match operator {
        ValidationOperator::Equals => match (as_number(actual), as_number(expected)) {
            (Some(a), Some(e)) => a == e,
            _ => as_comparable_string(actual) == as_comparable_string(expected),
        },
        ValidationOperator::GreaterThan => match (as_number(actual), as_number(expected)) {
            (Some(a), Some(e)) => a > e,
            _ => false,
        },
        ValidationOperator::LessThan => match (as_number(actual), as_number(expected)) {
            (Some(a), Some(e)) => a < e,
            _ => false,
        },
        ValidationOperator::Between => {
            let Some(bounds) = expected.as_array().filter(|b| b.len() == 2) else {
                return false;
            };
            match (as_number(actual), as_number(&bounds[0]), as_number(&bounds[1])) {
                (Some(a), Some(min), Some(max)) => min <= a && a <= max,
                _ => false,
            }
        }
    }
}

fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_comparable_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Outcome of one rule execution.
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub table_name: String,
    pub is_valid: bool,
    pub actual_value: JsonValue,
    pub error: Option<String>,
}

/// Aggregate of one validation run across a connection.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub total_rules: usize,
    pub failed_rules: usize,
    pub tables: Vec<String>,
    pub skipped_tables: Vec<String>,
    pub outcomes: Vec<RuleOutcome>,
}

impl RunSummary {
    pub fn to_json(&self) -> JsonValue {
        json!({
            "total_rules": self.total_rules,
            "failed_rules": self.failed_rules,
            "tables": self.tables,
            "skipped_tables": self.skipped_tables,
        })
    }
}

/// Executes validation rules for connections and tables.
pub struct ValidationRunner {
    rules: ValidationRepository,
    connections: ConnectionRepository,
    configs: AutomationConfigRepository,
    profiles: ProfileHistoryRepository,
    metadata: MetadataRepository,
    registry: Arc<ConnectorRegistry>,
    bus: Arc<EventBus>,
}

impl ValidationRunner {
    pub fn new(
        db: DatabaseConnection,
        crypto_key: Option<CryptoKey>,
        registry: Arc<ConnectorRegistry>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            rules: ValidationRepository::new(db.clone()),
            connections: ConnectionRepository::new(db.clone(), crypto_key),
            configs: AutomationConfigRepository::new(db.clone()),
            profiles: ProfileHistoryRepository::new(db.clone()),
            metadata: MetadataRepository::new(db),
            registry,
            bus,
        }
    }

    /// Run every active rule for the organization's connection, table by
    /// table, with bounded parallelism inside each table batch.
    pub async fn run_for_connection(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
    ) -> Result<RunSummary, TaskError> {
        let connection = self
            .connections
            .get_by_id(connection_id)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?
            .ok_or(TaskError::ConnectionNotFound(connection_id))?;

        let credentials = self
            .connections
            .decrypt_credentials(&connection)
            .await
            .map_err(|e| TaskError::Upstream(e.to_string()))?;
        let connector = self
            .registry
            .create(&connection, &credentials)
            .map_err(|e| TaskError::Upstream(e.to_string()))?;

        let tables = self
            .rules
            .tables_with_active_rules(organization_id, connection_id)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?;

        let mut summary = RunSummary::default();

        for table in tables {
            let disabled = self
                .configs
                .is_table_automation_disabled(connection_id, &table, "validation_automation")
                .await
                .map_err(|e| TaskError::Storage(e.to_string()))?;
            if disabled {
                info!(table = %table, "Validation automation disabled for table, skipping");
                summary.skipped_tables.push(table);
                continue;
            }

            let outcomes = self
                .run_table(organization_id, connection_id, &table, connector.clone())
                .await?;
            summary.total_rules += outcomes.len();
            summary.failed_rules += outcomes.iter().filter(|o| !o.is_valid).count();
            summary.tables.push(table);
            summary.outcomes.extend(outcomes);
        }

        counter!("validation_rules_executed_total").increment(summary.total_rules as u64);
        counter!("validation_rules_failed_total").increment(summary.failed_rules as u64);

        Ok(summary)
    }

    /// Run the active rules of a single table (API `run-validations`).
    pub async fn run_for_table(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
        table_name: &str,
    ) -> Result<Vec<RuleOutcome>, TaskError> {
        let connection = self
            .connections
            .get_by_id(connection_id)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?
            .ok_or(TaskError::ConnectionNotFound(connection_id))?;

        let credentials = self
            .connections
            .decrypt_credentials(&connection)
            .await
            .map_err(|e| TaskError::Upstream(e.to_string()))?;
        let connector = self
            .registry
            .create(&connection, &credentials)
            .map_err(|e| TaskError::Upstream(e.to_string()))?;

        self.run_table(organization_id, connection_id, table_name, connector)
            .await
    }

    async fn run_table(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
        table_name: &str,
        connector: Arc<dyn TargetConnector>,
    ) -> Result<Vec<RuleOutcome>, TaskError> {
        let rules = self
            .rules
            .active_rules(organization_id, connection_id, table_name)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?;

        if rules.is_empty() {
            return Ok(Vec::new());
        }
        info!(
            table = %table_name,
            rules = rules.len(),
            "Executing validation rules"
        );

        let profile_history_id = self
            .profiles
            .latest(organization_id, connection_id, table_name)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?
            .map(|profile| profile.id);

        let run_at = Utc::now();
        let semaphore = Arc::new(Semaphore::new(RULE_PARALLELISM));
        let mut join_set = JoinSet::new();

        for rule in rules {
            let connector = connector.clone();
            let repo = self.rules.clone();
            let bus = self.bus.clone();
            let semaphore = semaphore.clone();
            let table_name = table_name.to_string();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                execute_rule(
                    rule,
                    table_name,
                    organization_id,
                    connection_id,
                    profile_history_id,
                    run_at,
                    connector,
                    repo,
                    bus,
                )
                .await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => warn!(error = %err, "Rule execution task panicked"),
            }
        }
        outcomes.sort_by(|a, b| a.rule_name.cmp(&b.rule_name));

        Ok(outcomes)
    }

    /// Create baseline rules (row count, not-null per column) for a table
    /// from the latest stored columns snapshot. Returns created rule
    /// names.
    pub async fn generate_default_rules(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
        table_name: &str,
    ) -> Result<Vec<String>, TaskError> {
        let mut created = Vec::new();

        let row_count_rule = format!("{}_row_count", table_name);
        if !self
            .rules
            .rule_exists(organization_id, connection_id, table_name, &row_count_rule)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?
        {
            self.rules
                .create_rule(
                    organization_id,
                    connection_id,
                    table_name,
                    NewRule {
                        rule_name: row_count_rule.clone(),
                        description: Some(format!("{} is not empty", table_name)),
                        query: format!("SELECT COUNT(*) FROM {}", quote_identifier(table_name)),
                        operator: ValidationOperator::GreaterThan.as_str().to_string(),
                        expected_value: json!(0),
                    },
                )
                .await
                .map_err(|e| TaskError::Storage(e.to_string()))?;
            created.push(row_count_rule);
        }

        let columns = self
            .metadata
            .latest(connection_id, MetadataType::Columns.as_str())
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?
            .and_then(|row| {
                row.metadata
                    .get("columns_by_table")
                    .and_then(|map| map.get(table_name))
                    .cloned()
            });

        if let Some(JsonValue::Array(columns)) = columns {
            for column in columns {
                let Some(name) = column.get("name").and_then(JsonValue::as_str) else {
                    continue;
                };
                if column.get("nullable").and_then(JsonValue::as_bool) != Some(false) {
                    continue;
                }

                let rule_name = format!("{}_{}_not_null", table_name, name);
                let exists = self
                    .rules
                    .rule_exists(organization_id, connection_id, table_name, &rule_name)
                    .await
                    .map_err(|e| TaskError::Storage(e.to_string()))?;
                if exists {
                    continue;
                }

                self.rules
                    .create_rule(
                        organization_id,
                        connection_id,
                        table_name,
                        NewRule {
                            rule_name: rule_name.clone(),
                            description: Some(format!("{}.{} has no nulls", table_name, name)),
                            query: format!(
                                "SELECT COUNT(*) FROM {} WHERE {} IS NULL",
                                quote_identifier(table_name),
                                quote_identifier(name)
                            ),
                            operator: ValidationOperator::Equals.as_str().to_string(),
                            expected_value: json!(0),
                        },
                    )
                    .await
                    .map_err(|e| TaskError::Storage(e.to_string()))?;
                created.push(rule_name);
            }
        }

        Ok(created)
    }
}

/// Execute one rule end to end: query, evaluate, persist, raise drift
/// events. Errors always yield an invalid result row.
#[allow(clippy::too_many_arguments)]
async fn execute_rule(
    rule: RuleModel,
    table_name: String,
    organization_id: Uuid,
    connection_id: Uuid,
    profile_history_id: Option<Uuid>,
    run_at: chrono::DateTime<Utc>,
    connector: Arc<dyn TargetConnector>,
    repo: ValidationRepository,
    bus: Arc<EventBus>,
) -> RuleOutcome {
    let operator = rule
        .operator
        .parse::<ValidationOperator>()
        .unwrap_or(ValidationOperator::Equals);

    let (is_valid, actual_value, error) =
        match connector.fetch_scalar(&rule.query, QUERY_TIMEOUT).await {
            Ok(actual) => {
                let valid = evaluate(operator, &actual, &rule.expected_value);
                (valid, actual, None)
            }
            Err(err) => {
                warn!(
                    rule = %rule.rule_name,
                    error = %err,
                    "Validation rule query failed"
                );

                if err.hints_schema_drift() {
                    bus.publish(
                        AutomationEvent::new(
                            EventType::ValidationFailure,
                            json!({
                                "reason": "schema_mismatch",
                                "table_name": table_name,
                                "rule_name": rule.rule_name,
                                "error": err.to_string(),
                            }),
                        )
                        .for_connection(connection_id)
                        .for_organization(organization_id),
                    )
                    .await;
                }

                (false, JsonValue::Null, Some(err.to_string()))
            }
        };

    if let Err(err) = repo
        .store_result(
            organization_id,
            rule.id,
            Some(connection_id),
            is_valid,
            Some(actual_value.clone()),
            profile_history_id,
            run_at,
        )
        .await
    {
        warn!(
            rule = %rule.rule_name,
            error = %err,
            "Failed to store validation result"
        );
    }

    RuleOutcome {
        rule_id: rule.id,
        rule_name: rule.rule_name,
        table_name,
        is_valid,
        actual_value,
        error,
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equals_is_numeric_when_both_sides_are_numeric() {
        assert!(evaluate(ValidationOperator::Equals, &json!(5), &json!(5.0)));
        assert!(evaluate(ValidationOperator::Equals, &json!("5"), &json!(5)));
        assert!(!evaluate(ValidationOperator::Equals, &json!(5), &json!(6)));
    }

    #[test]
    fn equals_falls_back_to_string_comparison() {
        assert!(evaluate(
            ValidationOperator::Equals,
            &json!("ok"),
            &json!("ok")
        ));
        assert!(!evaluate(
            ValidationOperator::Equals,
            &json!("ok"),
            &json!("nope")
        ));
    }

    #[test]
    fn ordering_operators_use_float_comparison() {
        assert!(evaluate(
            ValidationOperator::GreaterThan,
            &json!(10.5),
            &json!(10)
        ));
        assert!(evaluate(
            ValidationOperator::LessThan,
            &json!("9"),
            &json!(10)
        ));
        assert!(!evaluate(
            ValidationOperator::GreaterThan,
            &json!("abc"),
            &json!(10)
        ));
    }

    #[test]
    fn between_is_inclusive() {
        let bounds = json!([10, 20]);
        assert!(evaluate(ValidationOperator::Between, &json!(15), &bounds));
        assert!(evaluate(ValidationOperator::Between, &json!(10), &bounds));
        assert!(evaluate(ValidationOperator::Between, &json!(20), &bounds));
        assert!(!evaluate(ValidationOperator::Between, &json!(21), &bounds));
    }

    #[test]
    fn between_rejects_malformed_bounds() {
        assert!(!evaluate(
            ValidationOperator::Between,
            &json!(15),
            &json!([10])
        ));
        assert!(!evaluate(
            ValidationOperator::Between,
            &json!(15),
            &json!("10-20")
        ));
    }

    #[test]
    fn missing_actual_is_always_invalid() {
        for operator in [
            ValidationOperator::Equals,
            ValidationOperator::GreaterThan,
            ValidationOperator::LessThan,
            ValidationOperator::Between,
        ] {
            assert!(!evaluate(operator, &JsonValue::Null, &json!([10, 20])));
        }
    }
}
