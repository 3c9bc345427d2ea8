use super::sql::{self, quote};
use super::{QueryOutput, Row, Storage};
use crate::error::Result;
use crate::migration::{
    owner_column, relation_column, relation_table_name, ColumnSchema, ColumnType, Schema,
    SchemaMigration, TableSchema,
};
use crate::model::ModelDefinition;
use crate::query::{Query, QueryType};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;

const HISTORY_TABLE: &str = "_migrations";

/// SQLite storage backend.
pub struct SqliteStorage {
    conn: Connection,
    prefix: String,
}

impl SqliteStorage {
    /// Open or create the database at the given path.
    pub fn open(path: &Path, prefix: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, prefix)
    }

    /// Open an in-memory database.
    pub fn open_in_memory(prefix: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, prefix)
    }

    fn with_connection(conn: Connection, prefix: &str) -> Result<Self> {
        conn.execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS {HISTORY_TABLE} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                description TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "
        ))?;
        Ok(SqliteStorage {
            conn,
            prefix: prefix.to_string(),
        })
    }

    /// Descriptions of every applied migration, oldest first.
    pub fn migration_history(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT description FROM {HISTORY_TABLE} ORDER BY id"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut history = Vec::new();
        for row in rows {
            history.push(row?);
        }
        Ok(history)
    }

    fn run(&self, statement: &sql::Statement) -> Result<usize> {
        log::debug!("{}", statement.sql);
        let affected = self
            .conn
            .execute(&statement.sql, params_from_iter(statement.params.iter()))?;
        Ok(affected)
    }

    fn fetch(&self, statement: &sql::Statement) -> Result<Vec<Row>> {
        log::debug!("{}", statement.sql);
        let mut stmt = self.conn.prepare(&statement.sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt.query_map(params_from_iter(statement.params.iter()), |row| {
            let mut record = Row::new();
            for (i, name) in columns.iter().enumerate() {
                record.insert(name.clone(), row.get::<_, SqlValue>(i)?);
            }
            Ok(record)
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn table_schema(&self, table: &str) -> Result<TableSchema> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote(table)))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut columns = Vec::new();
        let mut keys = Vec::new();
        for row in rows {
            let (name, declared, not_null, default, pk) = row?;
            let (column_type, length) = ColumnType::from_sql(&declared);
            if pk > 0 {
                keys.push((pk, name.clone()));
            }
            columns.push(ColumnSchema {
                length: length.filter(|_| column_type == ColumnType::String),
                not_null,
                default,
                ..ColumnSchema::new(&name, column_type)
            });
        }
        keys.sort();

        Ok(TableSchema {
            name: table.to_string(),
            columns,
            primary_key: keys.into_iter().map(|(_, name)| name).collect(),
        })
    }

    fn relation_table(&self, definition: &ModelDefinition) -> (String, String) {
        (
            relation_table_name(definition.name(), &self.prefix),
            owner_column(definition.name()),
        )
    }
}

impl Storage for SqliteStorage {
    fn name(&self) -> &str {
        "Sqlite"
    }

    fn table_prefix(&self) -> &str {
        &self.prefix
    }

    fn execute(&self, definition: &ModelDefinition, query: &Query) -> Result<QueryOutput> {
        let table = sql::data_table(definition, &self.prefix);
        let compiled = sql::compile(definition, query, &self.prefix)?;

        match query.query_type() {
            QueryType::Select => Ok(QueryOutput::Rows(self.fetch(&compiled.select(&table))?)),
            QueryType::Count => {
                let statement = compiled.count(&table);
                log::debug!("{}", statement.sql);
                let count: i64 = self.conn.query_row(
                    &statement.sql,
                    params_from_iter(statement.params.iter()),
                    |row| row.get(0),
                )?;
                Ok(QueryOutput::Count(count.max(0) as u64))
            }
            QueryType::Insert => {
                let values = sql::assignments(definition, query.data())?;
                if values.is_empty() {
                    return Ok(QueryOutput::Affected(0));
                }
                Ok(QueryOutput::Affected(self.run(&sql::insert(&table, values))?))
            }
            QueryType::Update => {
                let values = sql::assignments(definition, query.data())?;
                if values.is_empty() {
                    return Ok(QueryOutput::Affected(0));
                }
                Ok(QueryOutput::Affected(self.run(&compiled.update(&table, values))?))
            }
            QueryType::Delete => Ok(QueryOutput::Affected(self.run(&compiled.delete(&table))?)),
        }
    }

    fn live_schema(&self) -> Result<Schema> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<_, _>>()?;

        let mut schema = Schema::default();
        for name in names.iter().filter(|n| n.as_str() != HISTORY_TABLE) {
            schema.add_table(self.table_schema(name)?);
        }
        Ok(schema)
    }

    fn apply_migrations(&self, migrations: &[SchemaMigration]) -> Result<()> {
        if migrations.is_empty() {
            return Ok(());
        }

        self.conn.execute_batch("SAVEPOINT migrate")?;
        let applied = migrations.iter().try_for_each(|migration| -> Result<()> {
            for statement in migration.to_sql() {
                log::debug!("{statement}");
                self.conn.execute_batch(&statement)?;
            }
            self.conn.execute(
                &format!("INSERT INTO {HISTORY_TABLE} (description) VALUES (?1)"),
                params![migration.describe()],
            )?;
            Ok(())
        });

        match applied {
            Ok(()) => {
                self.conn.execute_batch("RELEASE migrate")?;
                for migration in migrations {
                    log::info!("{}", migration.describe());
                }
                Ok(())
            }
            Err(e) => {
                self.conn
                    .execute_batch("ROLLBACK TO migrate; RELEASE migrate")?;
                Err(e)
            }
        }
    }

    fn relation_ids(
        &self,
        definition: &ModelDefinition,
        field: &str,
        owner_id: &str,
    ) -> Result<Vec<String>> {
        let (table, owner) = self.relation_table(definition);
        let link = quote(&relation_column(field));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {link} FROM {} WHERE {} = ?1 AND {link} != '' ORDER BY rowid",
            quote(&table),
            quote(&owner)
        ))?;
        let ids = stmt
            .query_map(params![owner_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(ids)
    }

    fn add_relation(
        &self,
        definition: &ModelDefinition,
        field: &str,
        owner_id: &str,
        related_id: &str,
    ) -> Result<()> {
        let (table, owner) = self.relation_table(definition);
        self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?1, ?2)",
                quote(&table),
                quote(&owner),
                quote(&relation_column(field))
            ),
            params![owner_id, related_id],
        )?;
        Ok(())
    }

    fn remove_relations(
        &self,
        definition: &ModelDefinition,
        field: &str,
        owner_id: &str,
        keep: &[String],
    ) -> Result<usize> {
        let (table, owner) = self.relation_table(definition);
        let link = quote(&relation_column(field));
        let mut sql = format!(
            "DELETE FROM {} WHERE {} = ? AND {link} != ''",
            quote(&table),
            quote(&owner)
        );
        if !keep.is_empty() {
            let placeholders = vec!["?"; keep.len()].join(", ");
            sql.push_str(&format!(" AND {link} NOT IN ({placeholders})"));
        }

        let mut params = vec![SqlValue::Text(owner_id.to_string())];
        params.extend(keep.iter().cloned().map(SqlValue::Text));
        self.run(&sql::Statement { sql, params })
    }

    fn remove_owner_relations(
        &self,
        definition: &ModelDefinition,
        owner_ids: &[String],
    ) -> Result<usize> {
        if owner_ids.is_empty() {
            return Ok(0);
        }
        let (table, owner) = self.relation_table(definition);
        let placeholders = vec!["?"; owner_ids.len()].join(", ");
        self.run(&sql::Statement {
            sql: format!(
                "DELETE FROM {} WHERE {} IN ({placeholders})",
                quote(&table),
                quote(&owner)
            ),
            params: owner_ids.iter().cloned().map(SqlValue::Text).collect(),
        })
    }

    // ── Transaction Support ──────────────────────────────────────────

    fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}
