//! The [`Api`] context object: the one entry point applications hold.
//!
//! Every model operation runs the same pipeline: permission gate, before
//! hooks, cache, storage engine, after hooks. Writes invalidate the cached
//! loads of the models they touch.

use crate::cache::Cache;
use crate::config::Config;
use crate::core::CoreSuite;
use crate::error::{FluxError, Result};
use crate::events::{EventBus, EventKind, ModelEvent, Subscriber, Timestamps};
use crate::extension::{ExtensionRecord, ExtensionStore, Reduction};
use crate::field::Field;
use crate::migration::SchemaMigration;
use crate::model::{Model, ModelDefinition};
use crate::permission::{Action, AllowAll, Permission};
use crate::query::Query;
use crate::registry::{normalize_name, PluginRegistry, PluginSuite};
use crate::storage::{ModelSource, Storage, StorageEngine};
use std::sync::Arc;

/// A named set of actions reachable through [`Api::call_controller`].
pub trait Controller {
    fn name(&self) -> &str;

    fn call(
        &self,
        api: &mut Api,
        action: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value>;
}

pub struct ApiBuilder {
    config: Config,
    suites: Vec<Box<dyn PluginSuite>>,
    permission: Box<dyn Permission>,
    subscribers: Vec<(Vec<EventKind>, i32, Arc<dyn Subscriber>)>,
}

impl ApiBuilder {
    /// Register an extra plugin suite after the core one. Later suites
    /// override same-named plugins of earlier ones.
    pub fn suite(mut self, suite: impl PluginSuite + 'static) -> Self {
        self.suites.push(Box::new(suite));
        self
    }

    pub fn permission(mut self, permission: impl Permission + 'static) -> Self {
        self.permission = Box::new(permission);
        self
    }

    pub fn subscribe(
        mut self,
        kinds: &[EventKind],
        priority: i32,
        subscriber: Arc<dyn Subscriber>,
    ) -> Self {
        self.subscribers.push((kinds.to_vec(), priority, subscriber));
        self
    }

    /// Register plugins, layer extension records, open storage and cache,
    /// then migrate every known model.
    pub fn build(self) -> Result<Api> {
        let config = self.config;

        let mut registry = PluginRegistry::new(config.disabled_plugins.clone());
        for suite in &self.suites {
            let count = registry.register_suite(suite.as_ref());
            log::debug!("Registered {count} plugins from suite {}", suite.name());
        }

        let extensions = ExtensionStore::new(&config.extend_dir);
        for record in extensions.load_all()? {
            registry.apply_extension(&record);
        }

        let storage = registry.storage(&config.storage).ok_or_else(|| {
            FluxError::Configuration(format!(
                "storage plugin '{}' is not registered",
                config.storage
            ))
        })?;
        let storage = storage.open(&config)?;

        let cache = match config.cache.as_deref() {
            Some(name) => match registry.cache(name) {
                Some(plugin) => Some(plugin.create(&config)),
                None => {
                    log::warn!("Cache plugin '{name}' is not registered; caching disabled");
                    None
                }
            },
            None => None,
        };

        let mut events = EventBus::new();
        events.subscribe(&Timestamps::KINDS, 0, Arc::new(Timestamps));
        for (kinds, priority, subscriber) in self.subscribers {
            events.subscribe(&kinds, priority, subscriber);
        }

        let api = Api {
            config,
            registry,
            extensions,
            storage,
            cache,
            permission: self.permission,
            events,
        };
        let applied = api.migrate(None)?;
        log::info!(
            "{} storage ready, {} migrations applied",
            api.storage.name(),
            applied.len()
        );
        Ok(api)
    }
}

pub struct Api {
    config: Config,
    registry: PluginRegistry,
    extensions: ExtensionStore,
    storage: Box<dyn Storage>,
    cache: Option<Box<dyn Cache>>,
    permission: Box<dyn Permission>,
    events: EventBus,
}

impl Api {
    /// A builder with the core suite and a pass-through permission.
    pub fn builder(config: Config) -> ApiBuilder {
        ApiBuilder {
            config,
            suites: vec![Box::new(CoreSuite)],
            permission: Box::new(AllowAll),
            subscribers: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// The storage engine over the current model set. Also the loader for
    /// lazy relation reads.
    pub fn engine(&self) -> StorageEngine<'_> {
        StorageEngine::new(self.storage.as_ref(), &self.registry)
            .with_atomic_batches(self.config.atomic_batches)
    }

    pub fn definition(&self, model: &str) -> Option<Arc<ModelDefinition>> {
        self.registry.definition(model)
    }

    pub fn subscribe(&mut self, kinds: &[EventKind], priority: i32, subscriber: Arc<dyn Subscriber>) {
        self.events.subscribe(kinds, priority, subscriber);
    }

    // ── Model operations ─────────────────────────────────────────────

    /// A new, unsaved instance with defaults applied and `data` merged over them.
    pub fn create(
        &mut self,
        model: &str,
        data: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Model> {
        self.check_model(model, None, Action::Create)?;
        let definition = self
            .definition(model)
            .ok_or_else(|| FluxError::UnknownModel(model.to_string()))?;

        let mut instance = Model::create(definition.clone(), data)?;
        self.notify(ModelEvent::new(EventKind::BeforeCreate, &definition).with_instance(&mut instance));
        self.notify(ModelEvent::new(EventKind::AfterCreate, &definition).with_instance(&mut instance));
        Ok(instance)
    }

    /// Records matching `query`. Unknown models yield nothing.
    pub fn load(&mut self, model: &str, query: Option<Query>) -> Result<Vec<Model>> {
        self.check_model(model, None, Action::Load)?;
        let Some(definition) = self.definition(model) else {
            return Ok(Vec::new());
        };
        self.notify(ModelEvent::new(EventKind::BeforeLoad, &definition).with_query(query.as_ref()));

        let mut keyed = query.clone().unwrap_or_default();
        keyed.set_model_name(definition.name());
        let key = keyed.fingerprint();

        let cached = self.cache.as_ref().and_then(|c| c.get(definition.name(), &key));
        let mut instances = match cached {
            Some(instances) => {
                log::debug!("Cache hit for {key}");
                instances
            }
            None => {
                let instances = self.engine().load(definition.name(), query.clone())?;
                if let Some(cache) = self.cache.as_mut() {
                    cache.set(definition.name(), &key, instances.clone());
                }
                instances
            }
        };

        for instance in &mut instances {
            self.notify(
                ModelEvent::new(EventKind::AfterLoad, &definition)
                    .with_query(query.as_ref())
                    .with_instance(instance),
            );
        }
        Ok(instances)
    }

    pub fn load_first(&mut self, model: &str, query: Option<Query>) -> Result<Option<Model>> {
        let query = query.unwrap_or_default().first();
        Ok(self.load(model, Some(query))?.into_iter().next())
    }

    pub fn load_all(&mut self, model: &str) -> Result<Vec<Model>> {
        self.load(model, None)
    }

    pub fn count(&mut self, model: &str, query: Option<Query>) -> Result<u64> {
        self.check_model(model, None, Action::Load)?;
        self.engine().count(model, query)
    }

    pub fn save(&mut self, instance: &mut Model) -> Result<()> {
        self.check_model(instance.model_name(), Some(&*instance), Action::Save)?;
        let definition = instance.definition().clone();

        self.notify(ModelEvent::new(EventKind::BeforeSave, &definition).with_instance(instance));
        self.engine().save(instance)?;
        self.invalidate(&definition);
        self.notify(ModelEvent::new(EventKind::AfterSave, &definition).with_instance(instance));
        Ok(())
    }

    /// Save a batch in order. Atomic only with `Config::atomic_batches`.
    pub fn save_all(&mut self, instances: &mut [Model]) -> Result<()> {
        for instance in instances.iter() {
            self.check_model(instance.model_name(), Some(instance), Action::Save)?;
        }
        for instance in instances.iter_mut() {
            let definition = instance.definition().clone();
            self.notify(ModelEvent::new(EventKind::BeforeSave, &definition).with_instance(instance));
        }

        let result = self.engine().save_all(instances);
        for instance in instances.iter() {
            let definition = instance.definition().clone();
            self.invalidate(&definition);
        }
        result?;

        for instance in instances.iter_mut() {
            let definition = instance.definition().clone();
            self.notify(ModelEvent::new(EventKind::AfterSave, &definition).with_instance(instance));
        }
        Ok(())
    }

    /// Apply `data` to every matching record and persist each one.
    pub fn update(
        &mut self,
        model: &str,
        query: Option<Query>,
        data: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<Model>> {
        self.check_model(model, None, Action::Update)?;
        let Some(definition) = self.definition(model) else {
            return Ok(Vec::new());
        };

        let mut data = data.clone();
        self.notify(
            ModelEvent::new(EventKind::BeforeUpdate, &definition)
                .with_query(query.as_ref())
                .with_data(&mut data),
        );
        let result = self.engine().update(definition.name(), query, &data);
        self.invalidate(&definition);
        let mut updated = result?;

        for instance in &mut updated {
            self.notify(ModelEvent::new(EventKind::AfterUpdate, &definition).with_instance(instance));
        }
        Ok(updated)
    }

    /// Delete matching records. Returns how many rows went away.
    pub fn delete(&mut self, model: &str, query: Option<Query>) -> Result<usize> {
        self.check_model(model, None, Action::Delete)?;
        let Some(definition) = self.definition(model) else {
            return Ok(0);
        };

        self.notify(ModelEvent::new(EventKind::BeforeDelete, &definition).with_query(query.as_ref()));
        let deleted = self.engine().delete(definition.name(), query.clone())?;
        self.invalidate(&definition);
        self.notify(ModelEvent::new(EventKind::AfterDelete, &definition).with_query(query.as_ref()));
        Ok(deleted)
    }

    // ── Schema ───────────────────────────────────────────────────────

    pub fn migrate(&self, model: Option<&str>) -> Result<Vec<SchemaMigration>> {
        self.engine().migrate(model)
    }

    /// Layer `fields` onto a model, creating it as a dynamic model when no
    /// static one exists, then migrate that model.
    pub fn extend_model(&mut self, model: &str, fields: Vec<Field>) -> Result<ExtensionRecord> {
        let record = self.extensions.extend(model, fields)?;
        self.registry.apply_extension(&record);
        self.invalidate_name(&record.name);
        self.migrate(Some(&record.name))?;
        Ok(record)
    }

    /// Remove extension fields, or the whole extension when `fields` is
    /// `None`. A dynamic model left without fields stops existing, and its
    /// stored records are deleted.
    pub fn reduce_model(&mut self, model: &str, fields: Option<&[&str]>) -> Result<Reduction> {
        let name = normalize_name(model);
        let reduction = self.extensions.reduce(&name, fields)?;
        match &reduction {
            Reduction::Updated(record) => self.registry.apply_extension(record),
            Reduction::Removed => {
                // A dynamic model goes away with its records.
                if self.definition(&name).is_some_and(|d| d.is_dynamic()) {
                    let deleted = self.engine().delete(&name, None)?;
                    log::info!("Deleted {deleted} {name} records with its extension");
                }
                self.registry.remove_extension(&name);
            }
            Reduction::Missing => return Ok(reduction),
        }
        self.invalidate_name(&name);
        if self.definition(&name).is_some() {
            self.migrate(Some(&name))?;
        }
        Ok(reduction)
    }

    // ── Formats ──────────────────────────────────────────────────────

    /// Encode the scalar data of `instance` with a registered format.
    pub fn to_format(&self, instance: &Model, format: &str) -> Result<String> {
        let codec = self.format_or_err(format)?;
        codec.encode(&serde_json::Value::Object(instance.to_array()))
    }

    /// Decode `raw` with a registered format and create an instance from it.
    pub fn create_from_format(&mut self, model: &str, format: &str, raw: &str) -> Result<Model> {
        let codec = self.format_or_err(format)?;
        match codec.decode(raw)? {
            serde_json::Value::Object(data) => self.create(model, &data),
            serde_json::Value::Null => self.create(model, &serde_json::Map::new()),
            other => Err(FluxError::Validation(format!(
                "{} input for {model} must be a mapping, got {other}",
                codec.name()
            ))),
        }
    }

    fn format_or_err(&self, format: &str) -> Result<Arc<dyn crate::format::Format>> {
        self.registry
            .format(format)
            .ok_or_else(|| FluxError::Configuration(format!("format '{format}' is not registered")))
    }

    // ── Controllers ──────────────────────────────────────────────────

    pub fn call_controller(
        &mut self,
        name: &str,
        action: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let name = normalize_name(name);
        if !self.permission.has_controller_access(&name, Some(action)) {
            return Err(FluxError::AccessDenied {
                target: name,
                action: action.to_string(),
            });
        }
        let controller = self.registry.controller(&name).ok_or_else(|| {
            FluxError::Configuration(format!("controller '{name}' is not registered"))
        })?;
        controller.call(self, action, params)
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn check_model(&self, model: &str, instance: Option<&Model>, action: Action) -> Result<()> {
        let model = normalize_name(model);
        if self.permission.has_model_access(&model, instance, action) {
            return Ok(());
        }
        Err(FluxError::AccessDenied {
            target: model,
            action: action.to_string(),
        })
    }

    fn notify(&self, mut event: ModelEvent<'_>) {
        self.events.dispatch(&mut event);
    }

    /// Drop cached loads of a model and of every model its relations reach,
    /// since saves write related records too.
    fn invalidate(&mut self, definition: &ModelDefinition) {
        self.invalidate_name(definition.name());
        let targets: Vec<String> = definition
            .relation_fields()
            .filter_map(|f| f.relation_model().map(normalize_name))
            .collect();
        for target in targets {
            self.invalidate_name(&target);
        }
    }

    fn invalidate_name(&mut self, model: &str) {
        if let Some(cache) = self.cache.as_mut() {
            cache.invalidate(model);
        }
    }
}
