//! Schema description, target-schema derivation and schema diffing.
//!
//! Migration compares the live schema (read from the backend) with the
//! schema implied by model definitions and yields additive/alterative
//! operations only. Nothing is ever dropped: columns that disappear from a
//! model stay in the table.

use crate::field::{Field, FieldType};
use crate::model::ModelDefinition;
use heck::ToSnakeCase;
use indexmap::IndexMap;

/// Relation tables and id columns use this width.
pub const ID_LENGTH: u32 = 36;
const DEFAULT_STRING_LENGTH: u32 = 255;

/// Storage column type. Model field types map onto these with a fixed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Text,
    Boolean,
    Date,
    DateTime,
    Binary,
}

impl ColumnType {
    /// Map a field type to its column type. Relations have no column.
    pub fn for_field(field_type: FieldType) -> Option<Self> {
        Some(match field_type {
            FieldType::Integer => ColumnType::Integer,
            FieldType::Float => ColumnType::Float,
            FieldType::String => ColumnType::String,
            FieldType::LongString => ColumnType::Text,
            FieldType::Boolean => ColumnType::Boolean,
            FieldType::Date => ColumnType::Date,
            FieldType::DateTime => ColumnType::DateTime,
            FieldType::Timestamp => ColumnType::Integer,
            FieldType::Array | FieldType::Object => ColumnType::Text,
            FieldType::ByteArray => ColumnType::Binary,
            FieldType::Relation => return None,
        })
    }

    /// Parse a declared SQL column type as reported by the backend.
    pub fn from_sql(declared: &str) -> (Self, Option<u32>) {
        let upper = declared.trim().to_ascii_uppercase();
        let (base, length) = match upper.split_once('(') {
            Some((base, rest)) => (
                base.trim().to_string(),
                rest.trim_end_matches(')').trim().parse().ok(),
            ),
            None => (upper.clone(), None),
        };
        let column_type = match base.as_str() {
            "INTEGER" | "INT" | "BIGINT" | "SMALLINT" => ColumnType::Integer,
            "REAL" | "FLOAT" | "DOUBLE" => ColumnType::Float,
            "VARCHAR" | "CHAR" => ColumnType::String,
            "BOOLEAN" | "BOOL" => ColumnType::Boolean,
            "DATE" => ColumnType::Date,
            "DATETIME" => ColumnType::DateTime,
            "BLOB" | "BINARY" => ColumnType::Binary,
            _ => ColumnType::Text,
        };
        (column_type, length)
    }

    fn to_sql(self, length: Option<u32>) -> String {
        match self {
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::Float => "REAL".to_string(),
            ColumnType::String => {
                format!("VARCHAR({})", length.unwrap_or(DEFAULT_STRING_LENGTH))
            }
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Binary => "BLOB".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
    pub length: Option<u32>,
    pub not_null: bool,
    /// SQL literal
    pub default: Option<String>,
}

impl ColumnSchema {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        ColumnSchema {
            name: name.to_string(),
            column_type,
            length: None,
            not_null: false,
            default: None,
        }
    }

    fn for_field(field: &Field) -> Option<Self> {
        let column_type = ColumnType::for_field(field.field_type())?;
        let length = match column_type {
            ColumnType::String => Some(field.max_length().unwrap_or(DEFAULT_STRING_LENGTH)),
            _ => None,
        };
        Some(ColumnSchema {
            name: field.name().to_string(),
            column_type,
            length,
            not_null: field.is_primary(),
            default: None,
        })
    }

    fn id_column(name: &str) -> Self {
        ColumnSchema {
            name: name.to_string(),
            column_type: ColumnType::String,
            length: Some(ID_LENGTH),
            not_null: true,
            default: Some("''".to_string()),
        }
    }

    /// Whether a live column must be rebuilt to match this target column.
    fn differs_from(&self, live: &ColumnSchema) -> bool {
        self.column_type != live.column_type
    }

    fn to_sql(&self) -> String {
        let mut sql = format!(
            "{} {}",
            quote(&self.name),
            self.column_type.to_sql(self.length)
        );
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(&format!(" DEFAULT {default}"));
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(ColumnSchema::to_sql).collect();
        if !self.primary_key.is_empty() {
            let keys: Vec<String> = self.primary_key.iter().map(|k| quote(k)).collect();
            parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
        }
        format!("CREATE TABLE {} ({})", quote(&self.name), parts.join(", "))
    }
}

/// A set of tables, keyed by table name in creation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub tables: IndexMap<String, TableSchema>,
}

impl Schema {
    pub fn add_table(&mut self, table: TableSchema) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }
}

// ── Naming ───────────────────────────────────────────────────────────

/// Data table of a model: prefix + snake-cased model name.
pub fn table_name(model: &str, prefix: &str) -> String {
    format!("{prefix}{}", model.to_snake_case())
}

/// Link table holding every relation field of a model.
pub fn relation_table_name(model: &str, prefix: &str) -> String {
    format!("{}_relations", table_name(model, prefix))
}

/// Owner id column of a model's relation table.
pub fn owner_column(model: &str) -> String {
    format!("{}_id", model.to_snake_case())
}

/// Related id column of one relation field.
pub fn relation_column(field: &str) -> String {
    format!("{field}_id")
}

// ── Target schema ────────────────────────────────────────────────────

/// The data table and relation table implied by a model definition.
pub fn target_tables(definition: &ModelDefinition, prefix: &str) -> Vec<TableSchema> {
    let data = TableSchema {
        name: table_name(definition.name(), prefix),
        columns: definition
            .scalar_fields()
            .filter_map(ColumnSchema::for_field)
            .collect(),
        primary_key: vec!["id".to_string()],
    };

    let mut columns = vec![ColumnSchema::id_column(&owner_column(definition.name()))];
    for field in definition.relation_fields() {
        columns.push(ColumnSchema::id_column(&relation_column(field.name())));
    }
    let relations = TableSchema {
        name: relation_table_name(definition.name(), prefix),
        primary_key: columns.iter().map(|c| c.name.clone()).collect(),
        columns,
    };

    vec![data, relations]
}

/// Target schema for a set of model definitions.
pub fn target_schema<'a>(
    definitions: impl IntoIterator<Item = &'a ModelDefinition>,
    prefix: &str,
) -> Schema {
    let mut schema = Schema::default();
    for definition in definitions {
        for table in target_tables(definition, prefix) {
            schema.add_table(table);
        }
    }
    schema
}

// ── Diff ─────────────────────────────────────────────────────────────

/// One schema operation needed to bring the live schema to the target.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaMigration {
    CreateTable {
        table: TableSchema,
    },
    AddColumn {
        table: String,
        column: ColumnSchema,
    },
    /// Column type or primary-key change: rebuild the table and copy the
    /// `carry` columns across. Live-only columns are kept in `table`.
    RebuildTable {
        table: TableSchema,
        carry: Vec<String>,
    },
}

impl SchemaMigration {
    /// Human-readable description of this migration.
    pub fn describe(&self) -> String {
        match self {
            SchemaMigration::CreateTable { table } => {
                format!("Table '{}' created", table.name)
            }
            SchemaMigration::AddColumn { table, column } => {
                format!("Column '{}.{}' added", table, column.name)
            }
            SchemaMigration::RebuildTable { table, carry } => {
                format!(
                    "Table '{}' rebuilt ({} columns carried)",
                    table.name,
                    carry.len()
                )
            }
        }
    }

    /// SQL statements for this migration, in execution order.
    pub fn to_sql(&self) -> Vec<String> {
        match self {
            SchemaMigration::CreateTable { table } => vec![table.create_sql()],
            SchemaMigration::AddColumn { table, column } => vec![format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quote(table),
                column.to_sql()
            )],
            SchemaMigration::RebuildTable { table, carry } => {
                let staging = TableSchema {
                    name: format!("{}__rebuild", table.name),
                    ..table.clone()
                };
                let columns: Vec<String> = carry.iter().map(|c| quote(c)).collect();
                let columns = columns.join(", ");
                vec![
                    staging.create_sql(),
                    format!(
                        "INSERT OR IGNORE INTO {} ({columns}) SELECT {columns} FROM {}",
                        quote(&staging.name),
                        quote(&table.name)
                    ),
                    format!("DROP TABLE {}", quote(&table.name)),
                    format!(
                        "ALTER TABLE {} RENAME TO {}",
                        quote(&staging.name),
                        quote(&table.name)
                    ),
                ]
            }
        }
    }
}

/// Compare the live schema with the target and return the operations that
/// reconcile them. Live tables absent from `target` are never touched.
pub fn diff_schemas(live: &Schema, target: &Schema) -> Vec<SchemaMigration> {
    let mut migrations = Vec::new();

    for (name, wanted) in &target.tables {
        let existing = match live.table(name) {
            Some(t) => t,
            None => {
                migrations.push(SchemaMigration::CreateTable {
                    table: wanted.clone(),
                });
                continue;
            }
        };

        let missing: Vec<&ColumnSchema> = wanted
            .columns
            .iter()
            .filter(|c| existing.column(&c.name).is_none())
            .collect();

        let type_changed = wanted.columns.iter().any(|c| {
            existing
                .column(&c.name)
                .map(|live_col| c.differs_from(live_col))
                .unwrap_or(false)
        });

        let key_changed = wanted.primary_key != existing.primary_key;

        if type_changed || key_changed {
            let mut table = wanted.clone();
            for live_col in &existing.columns {
                if wanted.column(&live_col.name).is_none() {
                    let mut kept = live_col.clone();
                    kept.not_null = false;
                    table.columns.push(kept);
                }
            }
            let carry = existing
                .columns
                .iter()
                .map(|c| c.name.clone())
                .collect();
            migrations.push(SchemaMigration::RebuildTable { table, carry });
            continue;
        }

        for column in missing {
            migrations.push(SchemaMigration::AddColumn {
                table: name.clone(),
                column: column.clone(),
            });
        }
    }

    migrations
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::RelationType;
    use pretty_assertions::assert_eq;

    fn node(extra: Vec<Field>) -> ModelDefinition {
        let mut fields = vec![
            Field::new("title", FieldType::String).length(120),
            Field::new("body", FieldType::LongString),
            Field::relation("parent", RelationType::HasOne, "Node"),
        ];
        fields.extend(extra);
        ModelDefinition::with_fields("Node", fields)
    }

    #[test]
    fn test_naming() {
        assert_eq!(table_name("TestModel", ""), "test_model");
        assert_eq!(table_name("Node", "flux_"), "flux_node");
        assert_eq!(relation_table_name("Node", ""), "node_relations");
        assert_eq!(owner_column("TestModel"), "test_model_id");
        assert_eq!(relation_column("children"), "children_id");
    }

    #[test]
    fn test_target_tables() {
        let tables = target_tables(&node(vec![]), "");
        let data = &tables[0];
        assert_eq!(data.name, "node");
        let names: Vec<&str> = data.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "title", "body"]);
        assert_eq!(data.column("title").unwrap().length, Some(120));
        assert_eq!(data.column("body").unwrap().column_type, ColumnType::Text);

        let rel = &tables[1];
        assert_eq!(rel.name, "node_relations");
        assert_eq!(rel.primary_key, vec!["node_id", "parent_id"]);
    }

    #[test]
    fn test_field_type_mapping() {
        assert_eq!(ColumnType::for_field(FieldType::LongString), Some(ColumnType::Text));
        assert_eq!(ColumnType::for_field(FieldType::Timestamp), Some(ColumnType::Integer));
        assert_eq!(ColumnType::for_field(FieldType::ByteArray), Some(ColumnType::Binary));
        assert_eq!(ColumnType::for_field(FieldType::Object), Some(ColumnType::Text));
        assert_eq!(ColumnType::for_field(FieldType::Relation), None);
    }

    #[test]
    fn test_declared_type_round_trip() {
        for column_type in [
            ColumnType::Integer,
            ColumnType::Float,
            ColumnType::String,
            ColumnType::Text,
            ColumnType::Boolean,
            ColumnType::Date,
            ColumnType::DateTime,
            ColumnType::Binary,
        ] {
            let sql = column_type.to_sql(Some(40));
            let (parsed, _) = ColumnType::from_sql(&sql);
            assert_eq!(parsed, column_type, "{sql}");
        }
        assert_eq!(ColumnType::from_sql("varchar(36)"), (ColumnType::String, Some(36)));
    }

    #[test]
    fn test_diff_against_empty_creates_everything() {
        let target = target_schema([&node(vec![])], "");
        let diffs = diff_schemas(&Schema::default(), &target);
        assert_eq!(diffs.len(), 2);
        assert!(diffs.iter().all(|d| matches!(d, SchemaMigration::CreateTable { .. })));
    }

    #[test]
    fn test_diff_no_changes() {
        let target = target_schema([&node(vec![])], "");
        assert!(diff_schemas(&target, &target).is_empty());
    }

    #[test]
    fn test_diff_new_scalar_field_adds_column() {
        let live = target_schema([&node(vec![])], "");
        let target = target_schema(
            [&node(vec![Field::new("rank", FieldType::Integer)])],
            "",
        );
        let diffs = diff_schemas(&live, &target);
        assert_eq!(
            diffs,
            vec![SchemaMigration::AddColumn {
                table: "node".to_string(),
                column: ColumnSchema::new("rank", ColumnType::Integer),
            }]
        );
        assert_eq!(
            diffs[0].to_sql(),
            vec!["ALTER TABLE \"node\" ADD COLUMN \"rank\" INTEGER".to_string()]
        );
    }

    #[test]
    fn test_diff_new_relation_rebuilds_link_table() {
        let live = target_schema([&node(vec![])], "");
        let target = target_schema(
            [&node(vec![Field::relation("children", RelationType::HasMany, "Node")])],
            "",
        );
        let diffs = diff_schemas(&live, &target);
        assert_eq!(diffs.len(), 1);
        match &diffs[0] {
            SchemaMigration::RebuildTable { table, carry } => {
                assert_eq!(table.name, "node_relations");
                assert_eq!(table.primary_key, vec!["node_id", "parent_id", "children_id"]);
                assert_eq!(carry, &vec!["node_id".to_string(), "parent_id".to_string()]);
            }
            other => panic!("Expected RebuildTable, got {other:?}"),
        }
        assert_eq!(diffs[0].to_sql().len(), 4);
    }

    #[test]
    fn test_diff_removed_field_keeps_column() {
        let live = target_schema(
            [&node(vec![Field::new("rank", FieldType::Integer)])],
            "",
        );
        let target = target_schema([&node(vec![])], "");
        assert!(diff_schemas(&live, &target).is_empty());
    }

    #[test]
    fn test_diff_type_change_keeps_live_only_columns() {
        let live = target_schema(
            [&node(vec![
                Field::new("rank", FieldType::String),
                Field::new("legacy", FieldType::Integer),
            ])],
            "",
        );
        let target = target_schema(
            [&node(vec![Field::new("rank", FieldType::Integer)])],
            "",
        );
        let diffs = diff_schemas(&live, &target);
        assert_eq!(diffs.len(), 1);
        match &diffs[0] {
            SchemaMigration::RebuildTable { table, carry } => {
                assert_eq!(table.column("rank").unwrap().column_type, ColumnType::Integer);
                assert!(table.column("legacy").is_some());
                assert!(carry.contains(&"legacy".to_string()));
            }
            other => panic!("Expected RebuildTable, got {other:?}"),
        }
    }

    #[test]
    fn test_diff_ignores_unrelated_live_tables() {
        let other = ModelDefinition::with_fields("Other", vec![]);
        let mut live = target_schema([&other], "");
        live.add_table(TableSchema {
            name: "unmanaged".to_string(),
            columns: vec![ColumnSchema::new("x", ColumnType::Text)],
            primary_key: vec![],
        });
        let target = target_schema([&node(vec![])], "");
        let diffs = diff_schemas(&live, &target);
        assert!(diffs.iter().all(|d| d.describe().contains("'node")));
    }
}
