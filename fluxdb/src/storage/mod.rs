//! Persistence: the [`Storage`] capability a backend implements and the
//! [`StorageEngine`] that maps model operations onto it.
//!
//! The engine owns the model-level rules (insert vs update, dirty writes,
//! relation cardinality, scoped migration). Backends only translate queries
//! and relation-table edits into their native operations.

pub mod codec;
mod sql;
pub mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::{FluxError, Result};
use crate::field::Field;
use crate::migration::{diff_schemas, target_schema, Schema, SchemaMigration};
use crate::model::{Model, ModelDefinition, Related, RelationLoader, Value};
use crate::query::{Query, QueryType};
use crate::validation;
use indexmap::IndexMap;
use rusqlite::types::Value as SqlValue;
use std::sync::Arc;

/// Ids bound per statement when deleting.
const DELETE_CHUNK: usize = 500;

/// One raw result row: column name to storage-native value.
pub type Row = IndexMap<String, SqlValue>;

/// Result of executing one query against a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(Vec<Row>),
    Count(u64),
    Affected(usize),
}

/// A persistent backend.
pub trait Storage {
    fn name(&self) -> &str;

    /// Prefix prepended to every table this backend manages.
    fn table_prefix(&self) -> &str;

    /// Execute a query of any type against the model's data table.
    fn execute(&self, definition: &ModelDefinition, query: &Query) -> Result<QueryOutput>;

    /// The schema as it currently exists in the backend.
    fn live_schema(&self) -> Result<Schema>;

    /// Apply migrations in order, all or nothing.
    fn apply_migrations(&self, migrations: &[SchemaMigration]) -> Result<()>;

    /// Ids linked to `owner_id` through relation field `field`, in link order.
    fn relation_ids(
        &self,
        definition: &ModelDefinition,
        field: &str,
        owner_id: &str,
    ) -> Result<Vec<String>>;

    /// Add one link. Adding an existing link is a no-op.
    fn add_relation(
        &self,
        definition: &ModelDefinition,
        field: &str,
        owner_id: &str,
        related_id: &str,
    ) -> Result<()>;

    /// Remove every link of `field` for `owner_id` except those in `keep`.
    fn remove_relations(
        &self,
        definition: &ModelDefinition,
        field: &str,
        owner_id: &str,
        keep: &[String],
    ) -> Result<usize>;

    /// Remove every link row owned by any of `owner_ids`.
    fn remove_owner_relations(
        &self,
        definition: &ModelDefinition,
        owner_ids: &[String],
    ) -> Result<usize>;

    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;
}

/// Lookup of the currently known model definitions.
pub trait ModelSource {
    fn definition(&self, name: &str) -> Option<Arc<ModelDefinition>>;
    fn definitions(&self) -> Vec<Arc<ModelDefinition>>;
}

/// Model-level persistence over a [`Storage`] backend.
pub struct StorageEngine<'a> {
    storage: &'a dyn Storage,
    models: &'a dyn ModelSource,
    atomic_batches: bool,
}

impl<'a> StorageEngine<'a> {
    pub fn new(storage: &'a dyn Storage, models: &'a dyn ModelSource) -> Self {
        StorageEngine {
            storage,
            models,
            atomic_batches: false,
        }
    }

    /// Run [`save_all`](Self::save_all) inside one transaction.
    pub fn with_atomic_batches(mut self, atomic: bool) -> Self {
        self.atomic_batches = atomic;
        self
    }

    // ── Migration ────────────────────────────────────────────────────

    /// Bring the backend schema in line with one model, or with every known
    /// model. Returns the migrations that were applied.
    pub fn migrate(&self, model_name: Option<&str>) -> Result<Vec<SchemaMigration>> {
        let definitions = match model_name {
            Some(name) => vec![self
                .models
                .definition(name)
                .ok_or_else(|| FluxError::UnknownModel(name.to_string()))?],
            None => self.models.definitions(),
        };

        let target = target_schema(definitions.iter().map(|d| &**d), self.storage.table_prefix());
        let live = self.storage.live_schema()?;
        let migrations = diff_schemas(&live, &target);
        self.storage.apply_migrations(&migrations)?;
        Ok(migrations)
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Load every record matching `query`. Unknown models yield nothing.
    pub fn load(&self, model_name: &str, query: Option<Query>) -> Result<Vec<Model>> {
        let Some(definition) = self.models.definition(model_name) else {
            log::debug!("Load of unknown model '{model_name}'");
            return Ok(Vec::new());
        };
        let rows = self.select(&definition, query.unwrap_or_default())?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in rows {
            match hydrate(&definition, row) {
                Ok(model) => instances.push(model),
                Err(e) => log::warn!("Skipping unreadable {} row: {e}", definition.name()),
            }
        }
        Ok(instances)
    }

    pub fn load_first(&self, model_name: &str, query: Option<Query>) -> Result<Option<Model>> {
        let query = query.unwrap_or_default().first();
        Ok(self.load(model_name, Some(query))?.into_iter().next())
    }

    pub fn count(&self, model_name: &str, query: Option<Query>) -> Result<u64> {
        let Some(definition) = self.models.definition(model_name) else {
            return Ok(0);
        };
        self.count_rows(&definition, query.unwrap_or_default())
    }

    /// Whether a record with `id` is stored.
    pub fn exists(&self, definition: &ModelDefinition, id: &str) -> Result<bool> {
        let query = Query::for_model(definition.name()).equal("id", id);
        Ok(self.count_rows(definition, query)? > 0)
    }

    fn select(&self, definition: &ModelDefinition, mut query: Query) -> Result<Vec<Row>> {
        query.set_model_name(definition.name());
        query.set_type(QueryType::Select);
        match self.storage.execute(definition, &query)? {
            QueryOutput::Rows(rows) => Ok(rows),
            other => Err(FluxError::Other(format!(
                "{} backend answered a select with {other:?}",
                self.storage.name()
            ))),
        }
    }

    fn count_rows(&self, definition: &ModelDefinition, mut query: Query) -> Result<u64> {
        query.set_model_name(definition.name());
        query.set_type(QueryType::Count);
        match self.storage.execute(definition, &query)? {
            QueryOutput::Count(n) => Ok(n),
            other => Err(FluxError::Other(format!(
                "{} backend answered a count with {other:?}",
                self.storage.name()
            ))),
        }
    }

    fn write(&self, definition: &ModelDefinition, query: &Query) -> Result<usize> {
        match self.storage.execute(definition, query)? {
            QueryOutput::Affected(n) => Ok(n),
            other => Err(FluxError::Other(format!(
                "{} backend answered a write with {other:?}",
                self.storage.name()
            ))),
        }
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Persist an instance: insert when it is not stored yet, otherwise
    /// update its modified fields. Modified relations are reconciled after
    /// the scalar write. Validation runs before anything is written.
    pub fn save(&self, instance: &mut Model) -> Result<()> {
        self.validate(instance)?;

        let definition = instance.definition().clone();
        let current = instance.id().map(str::to_string);
        let (id, stored) = match current {
            Some(id) => {
                let stored = self.exists(&definition, &id)?;
                (id, stored)
            }
            None => {
                let id = codec::generate_id();
                instance.set_id(&id);
                (id, false)
            }
        };

        let mut data = IndexMap::new();
        if !stored {
            data.insert("id".to_string(), Value::from(id.as_str()));
        }
        for field in definition.scalar_fields() {
            if field.name() == "id" || !instance.is_field_modified(field.name()) {
                continue;
            }
            match instance.get(field.name()) {
                Some(value) if !value.is_empty() => {
                    data.insert(field.name().to_string(), value.clone());
                }
                _ => {}
            }
        }

        if !stored {
            let mut query = Query::for_model(definition.name());
            query.set_type(QueryType::Insert).set_data(data);
            self.write(&definition, &query)?;
        } else if !data.is_empty() {
            let mut query = Query::for_model(definition.name()).equal("id", id.as_str());
            query.set_type(QueryType::Update).set_data(data);
            self.write(&definition, &query)?;
        }

        for field in definition.relation_fields() {
            if instance.is_field_modified(field.name()) {
                self.save_relation(instance, &definition, field, &id)?;
            }
        }

        instance.mark_persisted();
        Ok(())
    }

    /// Save several instances in order, stopping at the first error.
    /// Without atomic batches, instances saved before the failure stay saved.
    pub fn save_all(&self, instances: &mut [Model]) -> Result<()> {
        if !self.atomic_batches {
            return instances.iter_mut().try_for_each(|i| self.save(i));
        }

        self.storage.begin()?;
        match instances.iter_mut().try_for_each(|i| self.save(i)) {
            Ok(()) => self.storage.commit(),
            Err(e) => {
                self.storage.rollback()?;
                Err(e)
            }
        }
    }

    /// Apply `data` to every matching record and save each one. Relations
    /// are only touched when named in `data`.
    pub fn update(
        &self,
        model_name: &str,
        query: Option<Query>,
        data: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<Model>> {
        let mut instances = self.load(model_name, query)?;
        for instance in &mut instances {
            instance.fill(data)?;
        }
        for instance in &mut instances {
            self.save(instance)?;
        }
        Ok(instances)
    }

    /// Delete matching records together with the link rows they own. Ids are
    /// bound in chunks so large deletes stay under the backend's variable limit.
    pub fn delete(&self, model_name: &str, query: Option<Query>) -> Result<usize> {
        let Some(definition) = self.models.definition(model_name) else {
            return Ok(0);
        };

        let rows = self.select(&definition, query.unwrap_or_default().select(&["id"]))?;
        let ids: Vec<String> = rows
            .iter()
            .filter_map(|row| match row.get("id") {
                Some(SqlValue::Text(id)) => Some(id.clone()),
                _ => None,
            })
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let mut deleted = 0;
        for chunk in ids.chunks(DELETE_CHUNK) {
            self.storage.remove_owner_relations(&definition, chunk)?;
            let mut query =
                Query::for_model(definition.name()).is_in("id", chunk.iter().map(String::as_str));
            query.set_type(QueryType::Delete);
            deleted += self.write(&definition, &query)?;
        }
        Ok(deleted)
    }

    fn validate(&self, instance: &Model) -> Result<()> {
        for warning in validation::validate_and_prepare(instance)? {
            log::warn!("{warning}");
        }
        for field in instance.definition().relation_fields() {
            if !instance.is_field_modified(field.name()) {
                continue;
            }
            let pending = instance
                .relation(field.name())
                .unwrap_or(&[])
                .iter()
                .filter_map(Related::as_model)
                .filter(|m| m.is_new());
            for related in pending {
                validation::validate_and_prepare(related)?;
            }
        }
        Ok(())
    }

    fn save_relation(
        &self,
        instance: &mut Model,
        definition: &ModelDefinition,
        field: &Field,
        owner_id: &str,
    ) -> Result<()> {
        let mut ids: Vec<String> = Vec::new();

        if let Some(targets) = instance.relation_mut(field.name()) {
            for target in targets.iter_mut() {
                let bare_id = match target {
                    Related::Id(id) => Some(id.clone()),
                    Related::Instance(model) => {
                        if model.is_new() {
                            self.save(model)?;
                        }
                        None
                    }
                };

                if let Some(related_id) = bare_id {
                    let resolved = match field.relation_model() {
                        Some(model) => self.load_first(
                            model,
                            Some(Query::for_model(model).equal("id", related_id.as_str())),
                        )?,
                        None => None,
                    };
                    match resolved {
                        Some(model) => *target = Related::from(model),
                        None => {
                            log::warn!(
                                "Skipping link {}.{} -> '{related_id}': no such record",
                                definition.name(),
                                field.name()
                            );
                            continue;
                        }
                    }
                }

                if let Some(id) = target.id() {
                    if !ids.iter().any(|known| known == id) {
                        ids.push(id.to_string());
                    }
                }
            }
        }

        let name = field.name();
        match field.relation_type() {
            Some(kind) if kind.is_owning() && kind.is_single() => {
                self.storage.remove_relations(definition, name, owner_id, &[])?;
                if let Some(id) = ids.first() {
                    self.storage.add_relation(definition, name, owner_id, id)?;
                }
            }
            Some(kind) if kind.is_owning() => {
                self.storage.remove_relations(definition, name, owner_id, &ids)?;
                let linked = self.storage.relation_ids(definition, name, owner_id)?;
                for id in ids.iter().filter(|id| !linked.contains(id)) {
                    self.storage.add_relation(definition, name, owner_id, id)?;
                }
            }
            _ => {
                if ids.is_empty() {
                    self.storage.remove_relations(definition, name, owner_id, &[])?;
                }
                for id in &ids {
                    self.storage.add_relation(definition, name, owner_id, id)?;
                }
            }
        }
        Ok(())
    }
}

impl RelationLoader for StorageEngine<'_> {
    fn load_related(&self, owner: &Model, field: &Field) -> Result<Vec<Model>> {
        let (Some(owner_id), Some(target)) = (owner.id(), field.relation_model()) else {
            return Ok(Vec::new());
        };

        let ids = self
            .storage
            .relation_ids(owner.definition(), field.name(), owner_id)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = Query::for_model(target).is_in("id", ids.iter().map(String::as_str));
        let mut related = self.load(target, Some(query))?;
        related.sort_by_key(|m| ids.iter().position(|id| Some(id.as_str()) == m.id()));
        Ok(related)
    }
}

/// Build a stored instance from a raw row. Columns without a scalar field
/// (kept from older model versions) are ignored.
fn hydrate(definition: &Arc<ModelDefinition>, row: Row) -> Result<Model> {
    let mut data = IndexMap::new();
    for (column, raw) in row {
        if matches!(raw, SqlValue::Null) {
            continue;
        }
        if let Some(field) = definition.field(&column).filter(|f| !f.is_relation()) {
            data.insert(column, codec::unserialize(raw, field)?);
        }
    }
    Ok(Model::from_stored(definition.clone(), data))
}
