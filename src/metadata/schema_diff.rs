//! Schema snapshot types and the snapshot diff algorithm.
//!
//! Snapshots are plain serialisable structures so they round-trip through
//! the connection_metadata JSON columns. The diff is pure: it never
//! touches the store, which keeps it directly testable.
//!
//! Comparison rules: column names compare case-insensitively, column types
//! compare as lowercased strings, foreign keys compare by the fingerprint
//! (sorted constrained columns | referred table | sorted referred
//! columns), indices by (name, sorted columns, unique flag).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

/// Metadata snapshot categories stored per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataType {
    Tables,
    Columns,
    Statistics,
}

impl MetadataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataType::Tables => "tables",
            MetadataType::Columns => "columns",
            MetadataType::Statistics => "statistics",
        }
    }
}

impl fmt::Display for MetadataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetadataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tables" => Ok(MetadataType::Tables),
            "columns" => Ok(MetadataType::Columns),
            "statistics" => Ok(MetadataType::Statistics),
            other => Err(format!("unknown metadata type: {}", other)),
        }
    }
}

/// The closed set of schema change kinds the diff can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    TableAdded,
    TableRemoved,
    ColumnAdded,
    ColumnRemoved,
    ColumnTypeChanged,
    ColumnNullabilityChanged,
    PrimaryKeyAdded,
    PrimaryKeyRemoved,
    PrimaryKeyChanged,
    ForeignKeyAdded,
    ForeignKeyRemoved,
    IndexAdded,
    IndexRemoved,
    IndexChanged,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::TableAdded => "table_added",
            ChangeType::TableRemoved => "table_removed",
            ChangeType::ColumnAdded => "column_added",
            ChangeType::ColumnRemoved => "column_removed",
            ChangeType::ColumnTypeChanged => "column_type_changed",
            ChangeType::ColumnNullabilityChanged => "column_nullability_changed",
            ChangeType::PrimaryKeyAdded => "primary_key_added",
            ChangeType::PrimaryKeyRemoved => "primary_key_removed",
            ChangeType::PrimaryKeyChanged => "primary_key_changed",
            ChangeType::ForeignKeyAdded => "foreign_key_added",
            ChangeType::ForeignKeyRemoved => "foreign_key_removed",
            ChangeType::IndexAdded => "index_added",
            ChangeType::IndexRemoved => "index_removed",
            ChangeType::IndexChanged => "index_changed",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub nullable: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeySchema {
    #[serde(default)]
    pub constrained_columns: Vec<String>,
    #[serde(default)]
    pub referred_table: String,
    #[serde(default)]
    pub referred_columns: Vec<String>,
}

impl ForeignKeySchema {
    fn fingerprint(&self) -> String {
        let mut constrained = self.constrained_columns.clone();
        constrained.sort();
        let mut referred = self.referred_columns.clone();
        referred.sort();
        format!(
            "{}|{}|{}",
            constrained.join(","),
            self.referred_table,
            referred.join(",")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSchema {
    fn fingerprint(&self) -> String {
        let mut columns = self.columns.clone();
        columns.sort();
        format!("{}|{}|{}", self.name, columns.join(","), self.unique)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeySchema>,
    #[serde(default)]
    pub indices: Vec<IndexSchema>,
}

/// A full schema snapshot of one connection's target database.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableSchema>,
}

impl SchemaSnapshot {
    /// Snapshot payload for the `tables` metadata row (table shapes
    /// without column details, plus the count the verification read
    /// checks).
    pub fn tables_metadata(&self) -> JsonValue {
        let tables: Vec<JsonValue> = self
            .tables
            .iter()
            .map(|table| {
                json!({
                    "name": table.name,
                    "column_count": table.columns.len(),
                    "primary_key": table.primary_key,
                    "foreign_keys": table.foreign_keys,
                    "indices": table.indices,
                })
            })
            .collect();
        json!({ "tables": tables, "count": self.tables.len() })
    }

    /// Snapshot payload for the `columns` metadata row.
    pub fn columns_metadata(&self) -> JsonValue {
        let columns_by_table: BTreeMap<&str, &Vec<ColumnSchema>> = self
            .tables
            .iter()
            .map(|table| (table.name.as_str(), &table.columns))
            .collect();
        json!({
            "columns_by_table": columns_by_table,
            "count": columns_by_table.len(),
        })
    }

    /// Rebuild a snapshot from the stored `tables` and `columns` rows.
    pub fn from_metadata(tables: &JsonValue, columns: Option<&JsonValue>) -> SchemaSnapshot {
        let mut snapshot = SchemaSnapshot::default();

        let Some(table_entries) = tables.get("tables").and_then(JsonValue::as_array) else {
            return snapshot;
        };

        let columns_by_table = columns
            .and_then(|value| value.get("columns_by_table"))
            .and_then(JsonValue::as_object);

        for entry in table_entries {
            let Some(name) = entry.get("name").and_then(JsonValue::as_str) else {
                continue;
            };

            let table_columns = columns_by_table
                .and_then(|map| map.get(name))
                .and_then(|value| {
                    serde_json::from_value::<Vec<ColumnSchema>>(value.clone()).ok()
                })
                .unwrap_or_default();

            snapshot.tables.push(TableSchema {
                name: name.to_string(),
                columns: table_columns,
                primary_key: entry
                    .get("primary_key")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default(),
                foreign_keys: entry
                    .get("foreign_keys")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default(),
                indices: entry
                    .get("indices")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default(),
            });
        }

        snapshot
    }
}

/// One detected difference between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedChange {
    pub change_type: ChangeType,
    pub table: String,
    pub column: Option<String>,
    pub details: JsonValue,
}

impl DetectedChange {
    fn table_level(change_type: ChangeType, table: &str, details: JsonValue) -> Self {
        DetectedChange {
            change_type,
            table: table.to_string(),
            column: None,
            details,
        }
    }

    fn column_level(
        change_type: ChangeType,
        table: &str,
        column: &str,
        details: JsonValue,
    ) -> Self {
        DetectedChange {
            change_type,
            table: table.to_string(),
            column: Some(column.to_string()),
            details,
        }
    }
}

/// Compare two snapshots and produce the typed change set.
pub fn diff_schemas(current: &SchemaSnapshot, previous: &SchemaSnapshot) -> Vec<DetectedChange> {
    let mut changes = Vec::new();

    let current_tables: BTreeMap<&str, &TableSchema> = current
        .tables
        .iter()
        .map(|table| (table.name.as_str(), table))
        .collect();
    let previous_tables: BTreeMap<&str, &TableSchema> = previous
        .tables
        .iter()
        .map(|table| (table.name.as_str(), table))
        .collect();

    for (name, table) in &current_tables {
        if !previous_tables.contains_key(name) {
            changes.push(DetectedChange::table_level(
                ChangeType::TableAdded,
                name,
                json!({ "column_count": table.columns.len() }),
            ));
        }
    }

    for (name, table) in &previous_tables {
        if !current_tables.contains_key(name) {
            changes.push(DetectedChange::table_level(
                ChangeType::TableRemoved,
                name,
                json!({ "column_count": table.columns.len() }),
            ));
        }
    }

    for (name, current_table) in &current_tables {
        let Some(previous_table) = previous_tables.get(name) else {
            continue;
        };
        compare_columns(name, current_table, previous_table, &mut changes);
        compare_primary_keys(name, current_table, previous_table, &mut changes);
        compare_foreign_keys(name, current_table, previous_table, &mut changes);
        compare_indices(name, current_table, previous_table, &mut changes);
    }

    changes
}

fn compare_columns(
    table: &str,
    current: &TableSchema,
    previous: &TableSchema,
    changes: &mut Vec<DetectedChange>,
) {
    // Keyed by lowercased name; the original casing is reported.
    let current_cols: BTreeMap<String, &ColumnSchema> = current
        .columns
        .iter()
        .map(|col| (col.name.to_lowercase(), col))
        .collect();
    let previous_cols: BTreeMap<String, &ColumnSchema> = previous
        .columns
        .iter()
        .map(|col| (col.name.to_lowercase(), col))
        .collect();

    for (key, col) in &current_cols {
        if !previous_cols.contains_key(key) {
            changes.push(DetectedChange::column_level(
                ChangeType::ColumnAdded,
                table,
                &col.name,
                json!({ "type": col.data_type, "nullable": col.nullable }),
            ));
        }
    }

    for (key, col) in &previous_cols {
        if !current_cols.contains_key(key) {
            changes.push(DetectedChange::column_level(
                ChangeType::ColumnRemoved,
                table,
                &col.name,
                json!({ "type": col.data_type }),
            ));
        }
    }

    for (key, current_col) in &current_cols {
        let Some(previous_col) = previous_cols.get(key) else {
            continue;
        };

        if current_col.data_type.to_lowercase() != previous_col.data_type.to_lowercase() {
            changes.push(DetectedChange::column_level(
                ChangeType::ColumnTypeChanged,
                table,
                &current_col.name,
                json!({
                    "previous_type": previous_col.data_type,
                    "new_type": current_col.data_type,
                }),
            ));
        }

        if current_col.nullable != previous_col.nullable {
            changes.push(DetectedChange::column_level(
                ChangeType::ColumnNullabilityChanged,
                table,
                &current_col.name,
                json!({
                    "previous_nullable": previous_col.nullable,
                    "new_nullable": current_col.nullable,
                }),
            ));
        }
    }
}

fn compare_primary_keys(
    table: &str,
    current: &TableSchema,
    previous: &TableSchema,
    changes: &mut Vec<DetectedChange>,
) {
    let mut current_pk = current.primary_key.clone();
    current_pk.sort();
    let mut previous_pk = previous.primary_key.clone();
    previous_pk.sort();

    if previous_pk.is_empty() && !current_pk.is_empty() {
        changes.push(DetectedChange::table_level(
            ChangeType::PrimaryKeyAdded,
            table,
            json!({ "columns": current_pk }),
        ));
        return;
    }

    if !previous_pk.is_empty() && current_pk.is_empty() {
        changes.push(DetectedChange::table_level(
            ChangeType::PrimaryKeyRemoved,
            table,
            json!({ "columns": previous_pk }),
        ));
        return;
    }

    if current_pk != previous_pk {
        changes.push(DetectedChange::table_level(
            ChangeType::PrimaryKeyChanged,
            table,
            json!({
                "previous_columns": previous_pk,
                "new_columns": current_pk,
            }),
        ));
    }
}

fn compare_foreign_keys(
    table: &str,
    current: &TableSchema,
    previous: &TableSchema,
    changes: &mut Vec<DetectedChange>,
) {
    let current_fks: BTreeMap<String, &ForeignKeySchema> = current
        .foreign_keys
        .iter()
        .map(|fk| (fk.fingerprint(), fk))
        .collect();
    let previous_fks: BTreeMap<String, &ForeignKeySchema> = previous
        .foreign_keys
        .iter()
        .map(|fk| (fk.fingerprint(), fk))
        .collect();

    for (fingerprint, fk) in &current_fks {
        if !previous_fks.contains_key(fingerprint) {
            changes.push(DetectedChange::table_level(
                ChangeType::ForeignKeyAdded,
                table,
                serde_json::to_value(fk).unwrap_or(JsonValue::Null),
            ));
        }
    }

    for (fingerprint, fk) in &previous_fks {
        if !current_fks.contains_key(fingerprint) {
            changes.push(DetectedChange::table_level(
                ChangeType::ForeignKeyRemoved,
                table,
                serde_json::to_value(fk).unwrap_or(JsonValue::Null),
            ));
        }
    }
}

fn compare_indices(
    table: &str,
    current: &TableSchema,
    previous: &TableSchema,
    changes: &mut Vec<DetectedChange>,
) {
    let current_idx: BTreeMap<String, &IndexSchema> = current
        .indices
        .iter()
        .map(|idx| (idx.fingerprint(), idx))
        .collect();
    let previous_idx: BTreeMap<String, &IndexSchema> = previous
        .indices
        .iter()
        .map(|idx| (idx.fingerprint(), idx))
        .collect();

    // An index whose name survives with a different definition is a
    // change, not an add/remove pair.
    let current_names: BTreeMap<&str, &IndexSchema> = current
        .indices
        .iter()
        .map(|idx| (idx.name.as_str(), idx))
        .collect();
    let previous_names: BTreeMap<&str, &IndexSchema> = previous
        .indices
        .iter()
        .map(|idx| (idx.name.as_str(), idx))
        .collect();

    for (fingerprint, idx) in &current_idx {
        if previous_idx.contains_key(fingerprint) || previous_names.contains_key(idx.name.as_str())
        {
            continue;
        }
        changes.push(DetectedChange::table_level(
            ChangeType::IndexAdded,
            table,
            serde_json::to_value(idx).unwrap_or(JsonValue::Null),
        ));
    }

    for (fingerprint, idx) in &previous_idx {
        if current_idx.contains_key(fingerprint) || current_names.contains_key(idx.name.as_str()) {
            continue;
        }
        changes.push(DetectedChange::table_level(
            ChangeType::IndexRemoved,
            table,
            serde_json::to_value(idx).unwrap_or(JsonValue::Null),
        ));
    }

    for (name, current_index) in &current_names {
        let Some(previous_index) = previous_names.get(name) else {
            continue;
        };

        let mut current_columns = current_index.columns.clone();
        current_columns.sort();
        let mut previous_columns = previous_index.columns.clone();
        previous_columns.sort();

        if current_columns != previous_columns || current_index.unique != previous_index.unique {
            changes.push(DetectedChange::table_level(
                ChangeType::IndexChanged,
                table,
                json!({
                    "name": name,
                    "previous_columns": previous_index.columns,
                    "new_columns": current_index.columns,
                    "previous_unique": previous_index.unique,
                    "new_unique": current_index.unique,
                }),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, data_type: &str, nullable: bool) -> ColumnSchema {
        ColumnSchema {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: Some(nullable),
        }
    }

    fn table(name: &str, columns: Vec<ColumnSchema>) -> TableSchema {
        TableSchema {
            name: name.to_string(),
            columns,
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indices: Vec::new(),
        }
    }

    #[test]
    fn identical_snapshots_produce_no_changes() {
        let snapshot = SchemaSnapshot {
            tables: vec![table("orders", vec![column("id", "INT", false)])],
        };
        assert!(diff_schemas(&snapshot, &snapshot).is_empty());
    }

    #[test]
    fn detects_type_nullability_and_added_column() {
        let previous = SchemaSnapshot {
            tables: vec![table("orders", vec![column("amount", "INT", false)])],
        };
        let current = SchemaSnapshot {
            tables: vec![table(
                "orders",
                vec![
                    column("amount", "BIGINT", true),
                    column("currency", "VARCHAR", true),
                ],
            )],
        };

        let changes = diff_schemas(&current, &previous);
        let mut kinds: Vec<(ChangeType, Option<&str>)> = changes
            .iter()
            .map(|c| (c.change_type, c.column.as_deref()))
            .collect();
        kinds.sort_by_key(|(kind, _)| kind.as_str());

        assert_eq!(
            kinds,
            vec![
                (ChangeType::ColumnAdded, Some("currency")),
                (ChangeType::ColumnNullabilityChanged, Some("amount")),
                (ChangeType::ColumnTypeChanged, Some("amount")),
            ]
        );
    }

    #[test]
    fn column_names_compare_case_insensitively() {
        let previous = SchemaSnapshot {
            tables: vec![table("orders", vec![column("Amount", "INT", false)])],
        };
        let current = SchemaSnapshot {
            tables: vec![table("orders", vec![column("amount", "int", false)])],
        };
        assert!(diff_schemas(&current, &previous).is_empty());
    }

    #[test]
    fn detects_table_addition_and_removal() {
        let previous = SchemaSnapshot {
            tables: vec![table("orders", vec![])],
        };
        let current = SchemaSnapshot {
            tables: vec![table("customers", vec![])],
        };

        let changes = diff_schemas(&current, &previous);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().any(|c| {
            c.change_type == ChangeType::TableAdded && c.table == "customers"
        }));
        assert!(changes.iter().any(|c| {
            c.change_type == ChangeType::TableRemoved && c.table == "orders"
        }));
    }

    #[test]
    fn primary_key_changes_are_typed() {
        let mut previous_table = table("orders", vec![]);
        previous_table.primary_key = vec!["id".to_string()];
        let mut current_table = table("orders", vec![]);
        current_table.primary_key = vec!["id".to_string(), "region".to_string()];

        let changes = diff_schemas(
            &SchemaSnapshot {
                tables: vec![current_table],
            },
            &SchemaSnapshot {
                tables: vec![previous_table],
            },
        );

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::PrimaryKeyChanged);
    }

    #[test]
    fn foreign_keys_compare_by_fingerprint_regardless_of_order() {
        let fk = |cols: &[&str]| ForeignKeySchema {
            constrained_columns: cols.iter().map(|s| s.to_string()).collect(),
            referred_table: "customers".to_string(),
            referred_columns: vec!["id".to_string()],
        };

        let mut previous_table = table("orders", vec![]);
        previous_table.foreign_keys = vec![fk(&["customer_id", "region_id"])];
        let mut current_table = table("orders", vec![]);
        current_table.foreign_keys = vec![fk(&["region_id", "customer_id"])];

        let changes = diff_schemas(
            &SchemaSnapshot {
                tables: vec![current_table],
            },
            &SchemaSnapshot {
                tables: vec![previous_table],
            },
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn index_redefinition_is_a_change_not_add_remove() {
        let mut previous_table = table("orders", vec![]);
        previous_table.indices = vec![IndexSchema {
            name: "idx_orders_amount".to_string(),
            columns: vec!["amount".to_string()],
            unique: false,
        }];
        let mut current_table = table("orders", vec![]);
        current_table.indices = vec![IndexSchema {
            name: "idx_orders_amount".to_string(),
            columns: vec!["amount".to_string(), "currency".to_string()],
            unique: false,
        }];

        let changes = diff_schemas(
            &SchemaSnapshot {
                tables: vec![current_table],
            },
            &SchemaSnapshot {
                tables: vec![previous_table],
            },
        );

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::IndexChanged);
    }

    #[test]
    fn snapshot_round_trips_through_metadata_rows() {
        let mut orders = table(
            "orders",
            vec![column("id", "INT", false), column("amount", "BIGINT", true)],
        );
        orders.primary_key = vec!["id".to_string()];
        orders.indices = vec![IndexSchema {
            name: "idx_orders_amount".to_string(),
            columns: vec!["amount".to_string()],
            unique: false,
        }];
        let snapshot = SchemaSnapshot {
            tables: vec![orders],
        };

        let tables_row = snapshot.tables_metadata();
        let columns_row = snapshot.columns_metadata();
        assert_eq!(tables_row["count"], 1);

        let rebuilt = SchemaSnapshot::from_metadata(&tables_row, Some(&columns_row));
        assert_eq!(rebuilt, snapshot);
        assert!(diff_schemas(&rebuilt, &snapshot).is_empty());
    }
}
