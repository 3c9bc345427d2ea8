//! Plugin registry: an explicit `kind -> name -> handle` table filled from
//! registered suites, plus the model definitions composed from model
//! plugins and extension records.

use crate::api::Controller;
use crate::cache::Cache;
use crate::config::Config;
use crate::error::Result;
use crate::extension::{ExtensionRecord, ID_FIELD};
use crate::field::Field;
use crate::format::Format;
use crate::model::ModelDefinition;
use crate::storage::{ModelSource, Storage};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Suite under which models that exist only as extension records are registered.
pub const EXTEND_SUITE: &str = "Extend";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Model,
    Storage,
    Cache,
    Format,
    Controller,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Model => "Model",
            PluginKind::Storage => "Storage",
            PluginKind::Cache => "Cache",
            PluginKind::Format => "Format",
            PluginKind::Controller => "Controller",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A static model type: its name and declared fields (without `id`).
pub trait ModelPlugin {
    fn name(&self) -> &str;

    fn fields(&self) -> Vec<Field>;

    fn is_dynamic(&self) -> bool {
        false
    }
}

/// A model type known only through its extension record.
#[derive(Debug, Clone)]
pub struct DynamicModel {
    name: String,
}

impl DynamicModel {
    pub fn new(name: &str) -> Self {
        DynamicModel {
            name: normalize_name(name),
        }
    }
}

impl ModelPlugin for DynamicModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> Vec<Field> {
        Vec::new()
    }

    fn is_dynamic(&self) -> bool {
        true
    }
}

pub trait StoragePlugin {
    fn name(&self) -> &str;

    fn open(&self, config: &Config) -> Result<Box<dyn Storage>>;
}

pub trait CachePlugin {
    fn name(&self) -> &str;

    fn create(&self, config: &Config) -> Box<dyn Cache>;
}

/// One registered implementation.
#[derive(Clone)]
pub enum PluginHandle {
    Model(Arc<dyn ModelPlugin>),
    Storage(Arc<dyn StoragePlugin>),
    Cache(Arc<dyn CachePlugin>),
    Format(Arc<dyn Format>),
    Controller(Arc<dyn Controller>),
}

impl PluginHandle {
    pub fn kind(&self) -> PluginKind {
        match self {
            PluginHandle::Model(_) => PluginKind::Model,
            PluginHandle::Storage(_) => PluginKind::Storage,
            PluginHandle::Cache(_) => PluginKind::Cache,
            PluginHandle::Format(_) => PluginKind::Format,
            PluginHandle::Controller(_) => PluginKind::Controller,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PluginHandle::Model(p) => p.name(),
            PluginHandle::Storage(p) => p.name(),
            PluginHandle::Cache(p) => p.name(),
            PluginHandle::Format(p) => p.name(),
            PluginHandle::Controller(p) => p.name(),
        }
    }
}

/// A named group of plugins registered together.
pub trait PluginSuite {
    fn name(&self) -> &str;

    fn plugins(&self) -> Vec<PluginHandle>;
}

struct Entry {
    suite: String,
    handle: PluginHandle,
}

/// Capitalize the first letter, leaving the rest untouched.
pub fn normalize_name(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub struct PluginRegistry {
    disabled: Vec<String>,
    plugins: IndexMap<PluginKind, IndexMap<String, Entry>>,
    extensions: IndexMap<String, Vec<Field>>,
    definitions: IndexMap<String, Arc<ModelDefinition>>,
}

impl PluginRegistry {
    /// An empty registry honoring `disabled` entries of the form `Suite`,
    /// `Suite/Kind` or `Suite/Kind/Name`.
    pub fn new(disabled: Vec<String>) -> Self {
        PluginRegistry {
            disabled,
            plugins: IndexMap::new(),
            extensions: IndexMap::new(),
            definitions: IndexMap::new(),
        }
    }

    pub fn is_disabled(&self, suite: &str, kind: PluginKind, name: &str) -> bool {
        let suite_level = suite.to_string();
        let kind_level = format!("{suite}/{kind}");
        let name_level = format!("{kind_level}/{}", normalize_name(name));
        self.disabled
            .iter()
            .any(|d| *d == suite_level || *d == kind_level || *d == name_level)
    }

    /// Register one plugin. Returns false when the disable list excludes it.
    /// A later registration under the same kind and name replaces the earlier.
    pub fn register(&mut self, suite: &str, handle: PluginHandle) -> bool {
        let kind = handle.kind();
        let name = normalize_name(handle.name());
        if self.is_disabled(suite, kind, &name) {
            log::warn!("Plugin {suite}/{kind}/{name} is disabled");
            return false;
        }

        self.plugins.entry(kind).or_default().insert(
            name.clone(),
            Entry {
                suite: suite.to_string(),
                handle,
            },
        );
        if kind == PluginKind::Model {
            self.compose(&name);
        }
        true
    }

    /// Register every plugin of a suite. Returns how many were accepted.
    pub fn register_suite(&mut self, suite: &dyn PluginSuite) -> usize {
        let suite_name = normalize_name(suite.name());
        suite
            .plugins()
            .into_iter()
            .filter(|handle| self.register(&suite_name, handle.clone()))
            .count()
    }

    pub fn unregister(&mut self, kind: PluginKind, name: &str) -> Option<PluginHandle> {
        let name = normalize_name(name);
        let entry = self.plugins.get_mut(&kind)?.shift_remove(&name)?;
        if kind == PluginKind::Model {
            self.definitions.shift_remove(&name);
        }
        Some(entry.handle)
    }

    /// Registered names of one kind, in registration order.
    pub fn names(&self, kind: PluginKind) -> Vec<&str> {
        self.plugins
            .get(&kind)
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn handle(&self, kind: PluginKind, name: &str) -> Option<&PluginHandle> {
        self.plugins
            .get(&kind)?
            .get(&normalize_name(name))
            .map(|e| &e.handle)
    }

    /// `Suite/Kind/Name` of a registered plugin.
    pub fn plugin_id(&self, kind: PluginKind, name: &str) -> Option<String> {
        let name = normalize_name(name);
        let entry = self.plugins.get(&kind)?.get(&name)?;
        Some(format!("{}/{kind}/{name}", entry.suite))
    }

    pub fn model(&self, name: &str) -> Option<Arc<dyn ModelPlugin>> {
        match self.handle(PluginKind::Model, name)? {
            PluginHandle::Model(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn storage(&self, name: &str) -> Option<Arc<dyn StoragePlugin>> {
        match self.handle(PluginKind::Storage, name)? {
            PluginHandle::Storage(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn cache(&self, name: &str) -> Option<Arc<dyn CachePlugin>> {
        match self.handle(PluginKind::Cache, name)? {
            PluginHandle::Cache(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn format(&self, name: &str) -> Option<Arc<dyn Format>> {
        match self.handle(PluginKind::Format, name)? {
            PluginHandle::Format(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn controller(&self, name: &str) -> Option<Arc<dyn Controller>> {
        match self.handle(PluginKind::Controller, name)? {
            PluginHandle::Controller(p) => Some(p.clone()),
            _ => None,
        }
    }

    // ── Extensions ───────────────────────────────────────────────────

    /// Layer an extension record onto its model. A model with no static
    /// plugin is registered as a [`DynamicModel`].
    pub fn apply_extension(&mut self, record: &ExtensionRecord) {
        let name = normalize_name(&record.name);
        self.extensions.insert(name.clone(), record.fields.clone());
        if self.model(&name).is_none() {
            let dynamic = DynamicModel::new(&name);
            self.register(EXTEND_SUITE, PluginHandle::Model(Arc::new(dynamic)));
        }
        self.compose(&name);
    }

    /// Drop a model's extension fields. A dynamic model disappears entirely.
    pub fn remove_extension(&mut self, model: &str) {
        let name = normalize_name(model);
        self.extensions.shift_remove(&name);
        match self.model(&name) {
            Some(plugin) if plugin.is_dynamic() => {
                self.unregister(PluginKind::Model, &name);
            }
            _ => self.compose(&name),
        }
    }

    pub fn extension_fields(&self, model: &str) -> &[Field] {
        self.extensions
            .get(&normalize_name(model))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Rebuild one definition: base `id`, then plugin fields, then extension fields.
    fn compose(&mut self, name: &str) {
        let Some(plugin) = self.model(name) else {
            self.definitions.shift_remove(name);
            return;
        };
        let mut definition = ModelDefinition::with_fields(name, plugin.fields());
        definition.extend(self.extension_fields(name).iter().filter_map(|field| {
            if field.name() == ID_FIELD {
                log::warn!("Ignoring extension field '{ID_FIELD}' on {name}");
                None
            } else {
                Some(field.clone())
            }
        }));
        definition.set_dynamic(plugin.is_dynamic());
        self.definitions.insert(name.to_string(), Arc::new(definition));
    }
}

impl ModelSource for PluginRegistry {
    fn definition(&self, name: &str) -> Option<Arc<ModelDefinition>> {
        self.definitions.get(&normalize_name(name)).cloned()
    }

    fn definitions(&self) -> Vec<Arc<ModelDefinition>> {
        self.definitions.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use crate::format::JsonFormat;
    use chrono::Utc;

    struct Article;

    impl ModelPlugin for Article {
        fn name(&self) -> &str {
            "article"
        }

        fn fields(&self) -> Vec<Field> {
            vec![Field::new("title", FieldType::String)]
        }
    }

    struct Demo;

    impl PluginSuite for Demo {
        fn name(&self) -> &str {
            "demo"
        }

        fn plugins(&self) -> Vec<PluginHandle> {
            vec![
                PluginHandle::Model(Arc::new(Article)),
                PluginHandle::Format(Arc::new(JsonFormat)),
            ]
        }
    }

    fn record(name: &str, fields: Vec<Field>) -> ExtensionRecord {
        ExtensionRecord {
            name: name.to_string(),
            updated: Utc::now(),
            version: 1,
            fields,
        }
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("node"), "Node");
        assert_eq!(normalize_name("testModel"), "TestModel");
        assert_eq!(normalize_name(""), "");
    }

    #[test]
    fn test_register_suite_and_lookup() {
        let mut registry = PluginRegistry::new(vec![]);
        assert_eq!(registry.register_suite(&Demo), 2);

        assert_eq!(registry.names(PluginKind::Model), vec!["Article"]);
        assert!(registry.format("json").is_some());
        assert_eq!(
            registry.plugin_id(PluginKind::Model, "article").as_deref(),
            Some("Demo/Model/Article")
        );

        let def = registry.definition("article").unwrap();
        let names: Vec<&str> = def.fields().map(Field::name).collect();
        assert_eq!(names, vec!["id", "title"]);
        assert!(!def.is_dynamic());
    }

    #[test]
    fn test_disable_at_each_level() {
        for disabled in ["Demo", "Demo/Model", "Demo/Model/Article"] {
            let mut registry = PluginRegistry::new(vec![disabled.to_string()]);
            registry.register_suite(&Demo);
            assert!(registry.model("Article").is_none(), "{disabled}");
            assert!(registry.definition("Article").is_none());
        }

        let mut registry = PluginRegistry::new(vec!["Demo/Model/Other".to_string()]);
        registry.register_suite(&Demo);
        assert!(registry.model("Article").is_some());

        let mut registry = PluginRegistry::new(vec!["Demo/Format".to_string()]);
        assert_eq!(registry.register_suite(&Demo), 1);
        assert!(registry.format("Json").is_none());
    }

    #[test]
    fn test_extension_composes_onto_static_model() {
        let mut registry = PluginRegistry::new(vec![]);
        registry.register_suite(&Demo);
        registry.apply_extension(&record(
            "Article",
            vec![
                Field::new("color", FieldType::String),
                Field::new("title", FieldType::LongString),
            ],
        ));

        let def = registry.definition("Article").unwrap();
        let names: Vec<&str> = def.fields().map(Field::name).collect();
        assert_eq!(names, vec!["id", "title", "color"]);
        assert_eq!(def.field("title").unwrap().field_type(), FieldType::LongString);

        registry.remove_extension("Article");
        let def = registry.definition("Article").unwrap();
        assert!(!def.has_field("color"));
        assert_eq!(def.field("title").unwrap().field_type(), FieldType::String);
    }

    #[test]
    fn test_extension_never_replaces_id() {
        let mut registry = PluginRegistry::new(vec![]);
        registry.register_suite(&Demo);
        registry.apply_extension(&record(
            "Article",
            vec![
                Field::new("id", FieldType::Integer),
                Field::new("color", FieldType::String),
            ],
        ));

        let def = registry.definition("Article").unwrap();
        assert_eq!(def.field("id"), Some(&Field::id()));
        assert!(def.has_field("color"));
    }

    #[test]
    fn test_dynamic_model_lifecycle() {
        let mut registry = PluginRegistry::new(vec![]);
        registry.apply_extension(&record("gadget", vec![Field::new("size", FieldType::Integer)]));

        let def = registry.definition("Gadget").unwrap();
        assert!(def.is_dynamic());
        assert!(def.has_field("size"));
        assert_eq!(
            registry.plugin_id(PluginKind::Model, "Gadget").as_deref(),
            Some("Extend/Model/Gadget")
        );

        registry.remove_extension("Gadget");
        assert!(registry.definition("Gadget").is_none());
        assert!(registry.model("Gadget").is_none());
    }
}
