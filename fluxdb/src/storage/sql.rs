//! Translation of query filters into SQLite statements.
//!
//! Filters are applied in registration order. Unknown filter names and
//! filters on unknown columns are skipped with a warning.

use super::codec;
use crate::error::Result;
use crate::field::Field;
use crate::migration::{owner_column, relation_column, relation_table_name, table_name};
use crate::model::{ModelDefinition, Value};
use crate::query::{Filter, Param, Query};
use rusqlite::types::Value as SqlValue;

const ALIAS: &str = "t";

/// A statement ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// The compiled filter list of a query, independent of the statement kind.
#[derive(Debug, Default)]
pub(crate) struct Compiled {
    distinct: bool,
    columns: Vec<String>,
    count_column: Option<String>,
    joins: Vec<String>,
    join_params: Vec<SqlValue>,
    conditions: Vec<String>,
    where_params: Vec<SqlValue>,
    order: Vec<String>,
    limit: Option<(i64, i64)>,
}

pub(crate) fn compile(
    definition: &ModelDefinition,
    query: &Query,
    prefix: &str,
) -> Result<Compiled> {
    let mut compiled = Compiled::default();
    for filter in query.filters(None) {
        apply_filter(&mut compiled, definition, filter, prefix)?;
    }
    Ok(compiled)
}

fn apply_filter(
    c: &mut Compiled,
    definition: &ModelDefinition,
    filter: &Filter,
    prefix: &str,
) -> Result<()> {
    let params = &filter.params;

    match filter.name.as_str() {
        "select" => {
            for param in params {
                if let Some(field) = param.as_str().and_then(|n| column_field(definition, n)) {
                    c.columns.push(qualified(field.name()));
                }
            }
        }
        "distinct" => c.distinct = true,
        "count" => {
            c.count_column = params
                .first()
                .and_then(Param::as_str)
                .and_then(|n| column_field(definition, n))
                .map(|f| qualified(f.name()));
        }
        "equal" | "not" | "gt" | "gte" | "lt" | "lte" => {
            let (field, value) = match field_and_value(definition, filter) {
                Some(pair) => pair,
                None => return Ok(()),
            };
            let column = qualified(field.name());
            if value.is_null() {
                match filter.name.as_str() {
                    "equal" => c.conditions.push(format!("{column} IS NULL")),
                    "not" => c.conditions.push(format!("{column} IS NOT NULL")),
                    _ => log::warn!("Ignoring null comparison in filter {filter}"),
                }
                return Ok(());
            }
            let op = match filter.name.as_str() {
                "equal" => "=",
                "not" => "!=",
                "gt" => ">",
                "gte" => ">=",
                "lt" => "<",
                _ => "<=",
            };
            c.conditions.push(format!("{column} {op} ?"));
            c.where_params.push(codec::serialize(value, field)?);
        }
        "range" => {
            let field = params
                .first()
                .and_then(Param::as_str)
                .and_then(|n| column_field(definition, n));
            let bounds = (
                params.get(1).and_then(Param::as_value),
                params.get(2).and_then(Param::as_value),
            );
            match (field, bounds) {
                (Some(field), (Some(lower), Some(upper))) => {
                    c.conditions
                        .push(format!("{} BETWEEN ? AND ?", qualified(field.name())));
                    c.where_params.push(codec::serialize(lower, field)?);
                    c.where_params.push(codec::serialize(upper, field)?);
                }
                _ => log::warn!("Ignoring malformed filter {filter}"),
            }
        }
        "like" => match field_and_value(definition, filter) {
            Some((field, Value::String(pattern))) => {
                c.conditions.push(format!("{} LIKE ?", qualified(field.name())));
                c.where_params.push(SqlValue::Text(pattern.clone()));
            }
            _ => log::warn!("Ignoring malformed filter {filter}"),
        },
        "in" => {
            let field = params
                .first()
                .and_then(Param::as_str)
                .and_then(|n| column_field(definition, n));
            let values = match params.get(1) {
                Some(Param::List(values)) => values.clone(),
                Some(Param::Value(v)) => vec![v.clone()],
                None => Vec::new(),
            };
            let field = match field {
                Some(f) => f,
                None => {
                    log::warn!("Ignoring malformed filter {filter}");
                    return Ok(());
                }
            };
            if values.is_empty() {
                c.conditions.push("0 = 1".to_string());
                return Ok(());
            }
            let placeholders = vec!["?"; values.len()].join(", ");
            c.conditions
                .push(format!("{} IN ({placeholders})", qualified(field.name())));
            for value in &values {
                c.where_params.push(codec::serialize(value, field)?);
            }
        }
        "order" => {
            let field = params
                .first()
                .and_then(Param::as_str)
                .and_then(|n| column_field(definition, n));
            if let Some(field) = field {
                let direction = match params.get(1).and_then(Param::as_str) {
                    Some(d) if d.eq_ignore_ascii_case("desc") => "DESC",
                    _ => "ASC",
                };
                c.order.push(format!("{} {direction}", qualified(field.name())));
            }
        }
        "limit" => match (
            params.first().and_then(Param::as_i64),
            params.get(1).and_then(Param::as_i64),
        ) {
            (Some(offset), Some(count)) => c.limit = Some((offset.max(0), count.max(0))),
            (Some(count), None) => c.limit = Some((0, count.max(0))),
            _ => log::warn!("Ignoring malformed filter {filter}"),
        },
        "join" => {
            // join(relationField, relatedId?)
            let field = params
                .first()
                .and_then(Param::as_str)
                .and_then(|n| definition.field(n))
                .filter(|f| f.is_relation());
            let field = match field {
                Some(f) => f,
                None => {
                    log::warn!("Ignoring join on non-relation in filter {filter}");
                    return Ok(());
                }
            };
            let alias = format!("j{}", c.joins.len());
            let link = relation_column(field.name());
            let mut clause = format!(
                "JOIN {} AS {alias} ON {alias}.{} = {ALIAS}.\"id\"",
                quote(&relation_table_name(definition.name(), prefix)),
                quote(&owner_column(definition.name())),
            );
            match params.get(1).and_then(Param::as_str) {
                Some(related_id) => {
                    clause.push_str(&format!(" AND {alias}.{} = ?", quote(&link)));
                    c.join_params.push(SqlValue::Text(related_id.to_string()));
                }
                None => clause.push_str(&format!(" AND {alias}.{} != ''", quote(&link))),
            }
            c.joins.push(clause);
            c.distinct = true;
        }
        other => log::warn!("Ignoring unknown filter '{other}'"),
    }

    Ok(())
}

impl Compiled {
    fn from_clause(&self, table: &str) -> String {
        let mut sql = format!("FROM {} AS {ALIAS}", quote(table));
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        sql
    }

    fn tail_clause(&self) -> String {
        let mut sql = String::new();
        if !self.order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order.join(", "));
        }
        if let Some((offset, count)) = self.limit {
            sql.push_str(&format!(" LIMIT {count} OFFSET {offset}"));
        }
        sql
    }

    fn params(&self) -> Vec<SqlValue> {
        let mut params = self.join_params.clone();
        params.extend(self.where_params.iter().cloned());
        params
    }

    fn select_sql(&self, table: &str, columns: &str) -> String {
        let distinct = if self.distinct { "DISTINCT " } else { "" };
        format!(
            "SELECT {distinct}{columns} {}{}",
            self.from_clause(table),
            self.tail_clause()
        )
    }

    /// Rows of the data table. Without a `select` filter every column is read.
    pub(crate) fn select(&self, table: &str) -> Statement {
        let columns = if self.columns.is_empty() {
            format!("{ALIAS}.*")
        } else {
            self.columns.join(", ")
        };
        Statement {
            sql: self.select_sql(table, &columns),
            params: self.params(),
        }
    }

    pub(crate) fn count(&self, table: &str) -> Statement {
        let column = self
            .count_column
            .clone()
            .unwrap_or_else(|| qualified("id"));
        Statement {
            sql: format!(
                "SELECT COUNT(*) FROM ({}) AS counted",
                self.select_sql(table, &column)
            ),
            params: self.params(),
        }
    }

    /// Ids matched by the filters, for UPDATE/DELETE targeting.
    fn id_subquery(&self, table: &str) -> String {
        self.select_sql(table, &qualified("id"))
    }

    pub(crate) fn delete(&self, table: &str) -> Statement {
        Statement {
            sql: format!(
                "DELETE FROM {} WHERE \"id\" IN ({})",
                quote(table),
                self.id_subquery(table)
            ),
            params: self.params(),
        }
    }

    pub(crate) fn update(
        &self,
        table: &str,
        assignments: Vec<(String, SqlValue)>,
    ) -> Statement {
        let set: Vec<String> = assignments
            .iter()
            .map(|(column, _)| format!("{} = ?", quote(column)))
            .collect();
        let mut params: Vec<SqlValue> = assignments.into_iter().map(|(_, v)| v).collect();
        params.extend(self.params());
        Statement {
            sql: format!(
                "UPDATE {} SET {} WHERE \"id\" IN ({})",
                quote(table),
                set.join(", "),
                self.id_subquery(table)
            ),
            params,
        }
    }
}

pub(crate) fn insert(table: &str, values: Vec<(String, SqlValue)>) -> Statement {
    let columns: Vec<String> = values.iter().map(|(c, _)| quote(c)).collect();
    let placeholders = vec!["?"; values.len()].join(", ");
    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote(table),
            columns.join(", ")
        ),
        params: values.into_iter().map(|(_, v)| v).collect(),
    }
}

/// Serialize query data into column assignments. Relation and unknown
/// fields are skipped.
pub(crate) fn assignments(
    definition: &ModelDefinition,
    data: &indexmap::IndexMap<String, Value>,
) -> Result<Vec<(String, SqlValue)>> {
    let mut values = Vec::new();
    for (name, value) in data {
        match column_field(definition, name) {
            Some(field) => values.push((name.clone(), codec::serialize(value, field)?)),
            None => log::warn!("Skipping non-column '{name}' of {}", definition.name()),
        }
    }
    Ok(values)
}

pub(crate) fn data_table(definition: &ModelDefinition, prefix: &str) -> String {
    table_name(definition.name(), prefix)
}

fn column_field<'a>(definition: &'a ModelDefinition, name: &str) -> Option<&'a Field> {
    let field = definition.field(name).filter(|f| !f.is_relation());
    if field.is_none() {
        log::warn!("Unknown column '{name}' on {}", definition.name());
    }
    field
}

fn field_and_value<'a>(
    definition: &'a ModelDefinition,
    filter: &'a Filter,
) -> Option<(&'a Field, &'a Value)> {
    let field = filter
        .params
        .first()
        .and_then(Param::as_str)
        .and_then(|n| column_field(definition, n));
    let value = filter.params.get(1).and_then(Param::as_value);
    match (field, value) {
        (Some(field), Some(value)) => Some((field, value)),
        _ => {
            log::warn!("Ignoring malformed filter {filter}");
            None
        }
    }
}

fn qualified(column: &str) -> String {
    format!("{ALIAS}.{}", quote(column))
}

pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldType, RelationType};

    fn node() -> ModelDefinition {
        ModelDefinition::with_fields(
            "Node",
            vec![
                Field::new("title", FieldType::String),
                Field::new("rank", FieldType::Integer),
                Field::new("active", FieldType::Boolean),
                Field::relation("children", RelationType::HasMany, "Node"),
            ],
        )
    }

    fn select(query: Query) -> Statement {
        compile(&node(), &query, "").unwrap().select("node")
    }

    #[test]
    fn test_plain_select() {
        let stmt = select(Query::for_model("Node"));
        assert_eq!(stmt.sql, "SELECT t.* FROM \"node\" AS t");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_conditions_in_filter_order() {
        let stmt = select(
            Query::for_model("Node")
                .equal("title", "a")
                .gte("rank", 2)
                .not("active", true),
        );
        assert_eq!(
            stmt.sql,
            "SELECT t.* FROM \"node\" AS t WHERE t.\"title\" = ? AND t.\"rank\" >= ? AND t.\"active\" != ?"
        );
        assert_eq!(
            stmt.params,
            vec![
                SqlValue::Text("a".into()),
                SqlValue::Integer(2),
                SqlValue::Integer(1)
            ]
        );
    }

    #[test]
    fn test_range_in_order_limit() {
        let stmt = select(
            Query::for_model("Node")
                .range("rank", 1, 5)
                .is_in("title", ["x", "y"])
                .order("rank", Some("desc"))
                .order("title", None)
                .limit(10, 5),
        );
        assert_eq!(
            stmt.sql,
            "SELECT t.* FROM \"node\" AS t WHERE t.\"rank\" BETWEEN ? AND ? AND t.\"title\" IN (?, ?) \
             ORDER BY t.\"rank\" DESC, t.\"title\" ASC LIMIT 5 OFFSET 10"
        );
        assert_eq!(stmt.params.len(), 4);
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let stmt = select(Query::for_model("Node").is_in("title", Vec::<&str>::new()));
        assert!(stmt.sql.ends_with("WHERE 0 = 1"));
    }

    #[test]
    fn test_null_equality() {
        let stmt = select(Query::for_model("Node").equal("title", Value::Null));
        assert!(stmt.sql.ends_with("WHERE t.\"title\" IS NULL"));
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_unknown_filters_and_columns_ignored() {
        let stmt = select(
            Query::for_model("Node")
                .filter("fuzzy", vec![Param::from("title")])
                .equal("missing", 1)
                .equal("children", "x"),
        );
        assert_eq!(stmt.sql, "SELECT t.* FROM \"node\" AS t");
    }

    #[test]
    fn test_select_distinct_columns() {
        let stmt = select(Query::for_model("Node").select(&["title"]).distinct());
        assert_eq!(stmt.sql, "SELECT DISTINCT t.\"title\" FROM \"node\" AS t");
    }

    #[test]
    fn test_join_on_relation() {
        let stmt = select(
            Query::for_model("Node")
                .filter("join", vec![Param::from("children"), Param::from("c-1")])
                .equal("title", "a"),
        );
        assert_eq!(
            stmt.sql,
            "SELECT DISTINCT t.* FROM \"node\" AS t JOIN \"node_relations\" AS j0 ON j0.\"node_id\" = t.\"id\" \
             AND j0.\"children_id\" = ? WHERE t.\"title\" = ?"
        );
        assert_eq!(
            stmt.params,
            vec![SqlValue::Text("c-1".into()), SqlValue::Text("a".into())]
        );
    }

    #[test]
    fn test_count_wraps_select() {
        let compiled = compile(&node(), &Query::for_model("Node").equal("rank", 1), "").unwrap();
        let stmt = compiled.count("node");
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM (SELECT t.\"id\" FROM \"node\" AS t WHERE t.\"rank\" = ?) AS counted"
        );
    }

    #[test]
    fn test_update_and_delete_target_ids() {
        let compiled = compile(&node(), &Query::for_model("Node").equal("rank", 1), "").unwrap();
        let update = compiled.update("node", vec![("title".into(), SqlValue::Text("z".into()))]);
        assert_eq!(
            update.sql,
            "UPDATE \"node\" SET \"title\" = ? WHERE \"id\" IN (SELECT t.\"id\" FROM \"node\" AS t WHERE t.\"rank\" = ?)"
        );
        assert_eq!(update.params, vec![SqlValue::Text("z".into()), SqlValue::Integer(1)]);

        let delete = compiled.delete("node");
        assert!(delete.sql.starts_with("DELETE FROM \"node\" WHERE \"id\" IN (SELECT"));
    }

    #[test]
    fn test_insert_statement() {
        let stmt = insert(
            "node",
            vec![
                ("id".into(), SqlValue::Text("1".into())),
                ("rank".into(), SqlValue::Integer(3)),
            ],
        );
        assert_eq!(stmt.sql, "INSERT INTO \"node\" (\"id\", \"rank\") VALUES (?, ?)");
        assert_eq!(stmt.params.len(), 2);
    }
}
