//! Model definitions and model instances.
//!
//! A [`ModelDefinition`] is the ordered field set of one model type (static or
//! built from extension metadata). A [`Model`] is one record of that type with
//! its attribute values, dirty tracking and relation load state.

mod value;

pub use value::{Value, DATETIME_FORMAT, DATE_FORMAT};

use crate::error::{FluxError, Result};
use crate::field::Field;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;
use std::sync::Arc;

/// The ordered field set of a model type. `id` is always the first field.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDefinition {
    name: String,
    fields: IndexMap<String, Field>,
    dynamic: bool,
}

impl ModelDefinition {
    /// A definition containing only the base `id` field.
    pub fn new(name: &str) -> Self {
        let mut fields = IndexMap::new();
        let id = Field::id();
        fields.insert(id.name().to_string(), id);
        ModelDefinition {
            name: name.to_string(),
            fields,
            dynamic: false,
        }
    }

    /// Base fields followed by `fields`. A later field with the same name
    /// replaces the earlier one in place.
    pub fn with_fields(name: &str, fields: impl IntoIterator<Item = Field>) -> Self {
        let mut definition = ModelDefinition::new(name);
        definition.extend(fields);
        definition
    }

    pub fn extend(&mut self, fields: impl IntoIterator<Item = Field>) {
        for field in fields {
            self.fields.insert(field.name().to_string(), field);
        }
    }

    pub(crate) fn set_dynamic(&mut self, dynamic: bool) {
        self.dynamic = dynamic;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the model exists only because of extension metadata.
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// All fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn scalar_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values().filter(|f| !f.is_relation())
    }

    pub fn relation_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values().filter(|f| f.is_relation())
    }
}

/// A relation target: either a bare identifier or a full record.
#[derive(Debug, Clone)]
pub enum Related {
    Id(String),
    Instance(Box<Model>),
}

impl Related {
    /// The target id, if known. A new instance without id yields `None`.
    pub fn id(&self) -> Option<&str> {
        match self {
            Related::Id(id) => Some(id.as_str()),
            Related::Instance(model) => model.id(),
        }
    }

    pub fn as_model(&self) -> Option<&Model> {
        match self {
            Related::Instance(model) => Some(model),
            Related::Id(_) => None,
        }
    }
}

impl From<Model> for Related {
    fn from(model: Model) -> Self {
        Related::Instance(Box::new(model))
    }
}

impl From<&str> for Related {
    fn from(id: &str) -> Self {
        Related::Id(id.to_string())
    }
}

/// Lazy-load state of one relation field on one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationState {
    Unloaded,
    Loaded,
}

/// Resolves relation fields for lazy loading. Implemented by the storage engine.
pub trait RelationLoader {
    fn load_related(&self, owner: &Model, field: &Field) -> Result<Vec<Model>>;
}

/// One record of a model type.
#[derive(Debug, Clone)]
pub struct Model {
    definition: Arc<ModelDefinition>,
    data: IndexMap<String, Value>,
    relations: IndexMap<String, Vec<Related>>,
    loaded_relations: HashSet<String>,
    modified: IndexSet<String>,
    new: bool,
}

impl Model {
    /// An empty, new instance.
    pub fn new(definition: Arc<ModelDefinition>) -> Self {
        Model {
            definition,
            data: IndexMap::new(),
            relations: IndexMap::new(),
            loaded_relations: HashSet::new(),
            modified: IndexSet::new(),
            new: true,
        }
    }

    /// A new instance with field defaults applied and `data` merged over
    /// them. Every populated field counts as modified.
    pub fn create(
        definition: Arc<ModelDefinition>,
        data: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self> {
        let mut model = Model::new(definition.clone());

        for field in definition.scalar_fields() {
            if !field.default().is_null() {
                let value = Value::from_json(field.default(), field.field_type())?;
                model.set(field.name(), value)?;
            }
        }

        model.fill(data)?;
        Ok(model)
    }

    /// Hydrate an instance from stored values. The result is not new and
    /// carries no modifications.
    pub fn from_stored(definition: Arc<ModelDefinition>, data: IndexMap<String, Value>) -> Self {
        let mut model = Model::new(definition);
        model.data = data;
        model.new = false;
        model
    }

    /// Apply loosely-typed input. Relation fields accept an id or a list of ids.
    pub fn fill(&mut self, data: &serde_json::Map<String, serde_json::Value>) -> Result<()> {
        for (name, raw) in data {
            let field = self.field_or_err(name)?.clone();
            if field.is_relation() {
                let ids: Vec<Related> = match raw {
                    serde_json::Value::Null => Vec::new(),
                    serde_json::Value::String(id) => vec![Related::Id(id.clone())],
                    serde_json::Value::Array(items) => items
                        .iter()
                        .filter_map(|item| item.as_str().map(|id| Related::Id(id.to_string())))
                        .collect(),
                    other => {
                        return Err(FluxError::Validation(format!(
                            "Relation field '{name}' expects an id or a list of ids, got {other}"
                        )))
                    }
                };
                self.set_relation(name, ids)?;
            } else {
                let value = Value::from_json(raw, field.field_type())?;
                self.set(name, value)?;
            }
        }
        Ok(())
    }

    pub fn definition(&self) -> &Arc<ModelDefinition> {
        &self.definition
    }

    pub fn model_name(&self) -> &str {
        self.definition.name()
    }

    /// The record id, if one has been assigned.
    pub fn id(&self) -> Option<&str> {
        self.data
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn set_id(&mut self, id: &str) {
        self.data.insert("id".to_string(), Value::from(id));
        self.modified.insert("id".to_string());
    }

    /// New instances have not been persisted yet.
    pub fn is_new(&self) -> bool {
        self.new || self.id().is_none()
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.new = false;
        self.modified.clear();
    }

    // ── Attributes ───────────────────────────────────────────────────

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Set a scalar attribute. Marks it modified only if the value changes.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let field = self.field_or_err(name)?;
        if field.is_relation() {
            return Err(FluxError::Validation(format!(
                "Field '{name}' is a relation; use set_relation"
            )));
        }

        let value = value.into();
        let unchanged = match self.data.get(name) {
            Some(current) => *current == value,
            None => value.is_null(),
        };
        if !unchanged {
            self.data.insert(name.to_string(), value);
            self.modified.insert(name.to_string());
        }
        Ok(())
    }

    /// Explicitly set a relation. The field becomes Loaded and modified, so
    /// a later read never re-queries over the explicit value.
    pub fn set_relation(&mut self, name: &str, related: Vec<Related>) -> Result<()> {
        let field = self.field_or_err(name)?;
        if !field.is_relation() {
            return Err(FluxError::Validation(format!(
                "Field '{name}' is not a relation"
            )));
        }
        self.relations.insert(name.to_string(), related);
        self.loaded_relations.insert(name.to_string());
        self.modified.insert(name.to_string());
        Ok(())
    }

    /// Unset a relation; saving removes its links.
    pub fn clear_relation(&mut self, name: &str) -> Result<()> {
        self.set_relation(name, Vec::new())
    }

    pub(crate) fn relation_mut(&mut self, name: &str) -> Option<&mut Vec<Related>> {
        self.relations.get_mut(name)
    }

    pub fn relation_state(&self, name: &str) -> RelationState {
        if self.loaded_relations.contains(name) {
            RelationState::Loaded
        } else {
            RelationState::Unloaded
        }
    }

    /// The related records of a loaded relation; `None` while unloaded.
    pub fn relation(&self, name: &str) -> Option<&[Related]> {
        if !self.loaded_relations.contains(name) {
            return None;
        }
        Some(self.relations.get(name).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Read a relation, resolving it through `loader` on first access.
    pub fn load_relation(&mut self, name: &str, loader: &dyn RelationLoader) -> Result<&[Related]> {
        if !self.loaded_relations.contains(name) {
            let field = self.field_or_err(name)?.clone();
            if !field.is_relation() {
                return Err(FluxError::Validation(format!(
                    "Field '{name}' is not a relation"
                )));
            }
            let related = if self.id().is_some() {
                loader.load_related(self, &field)?
            } else {
                Vec::new()
            };
            self.relations.insert(
                name.to_string(),
                related.into_iter().map(Related::from).collect(),
            );
            self.loaded_relations.insert(name.to_string());
        }
        Ok(self.relations.get(name).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Names written since the last persistence, in write order.
    pub fn modified_properties(&self) -> Vec<&str> {
        self.modified.iter().map(String::as_str).collect()
    }

    pub fn is_modified(&self) -> bool {
        !self.modified.is_empty()
    }

    pub fn is_field_modified(&self, name: &str) -> bool {
        self.modified.contains(name)
    }

    /// Non-relation fields in declaration order; unset fields render as null.
    pub fn to_array(&self) -> serde_json::Map<String, serde_json::Value> {
        self.definition
            .scalar_fields()
            .map(|field| {
                let value = self
                    .data
                    .get(field.name())
                    .map(Value::to_json)
                    .unwrap_or(serde_json::Value::Null);
                (field.name().to_string(), value)
            })
            .collect()
    }

    fn field_or_err(&self, name: &str) -> Result<&Field> {
        self.definition.field(name).ok_or_else(|| {
            FluxError::Validation(format!(
                "Model '{}' has no field '{name}'",
                self.definition.name()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldType, RelationType};
    use serde_json::json;
    use std::cell::Cell;

    fn article() -> Arc<ModelDefinition> {
        Arc::new(ModelDefinition::with_fields(
            "Article",
            vec![
                Field::new("title", FieldType::String),
                Field::new("views", FieldType::Integer).default_value(json!(0)),
                Field::relation("author", RelationType::BelongsToOne, "User"),
                Field::new("body", FieldType::LongString),
            ],
        ))
    }

    struct CountingLoader {
        calls: Cell<usize>,
    }

    impl RelationLoader for CountingLoader {
        fn load_related(&self, _owner: &Model, _field: &Field) -> Result<Vec<Model>> {
            self.calls.set(self.calls.get() + 1);
            let user = Arc::new(ModelDefinition::new("User"));
            let mut data = IndexMap::new();
            data.insert("id".to_string(), Value::from("u-1"));
            Ok(vec![Model::from_stored(user, data)])
        }
    }

    #[test]
    fn test_definition_keeps_declaration_order() {
        let def = article();
        let names: Vec<&str> = def.fields().map(Field::name).collect();
        assert_eq!(names, vec!["id", "title", "views", "author", "body"]);
        let scalars: Vec<&str> = def.scalar_fields().map(Field::name).collect();
        assert_eq!(scalars, vec!["id", "title", "views", "body"]);
    }

    #[test]
    fn test_create_applies_defaults_and_marks_modified() {
        let mut data = serde_json::Map::new();
        data.insert("title".into(), json!("Hello"));
        let model = Model::create(article(), &data).unwrap();

        assert!(model.is_new());
        assert_eq!(model.get("views"), Some(&Value::Integer(0)));
        assert_eq!(model.modified_properties(), vec!["views", "title"]);
    }

    #[test]
    fn test_set_same_value_is_not_a_modification() {
        let def = article();
        let mut stored = IndexMap::new();
        stored.insert("id".to_string(), Value::from("a-1"));
        stored.insert("title".to_string(), Value::from("Same"));
        let mut model = Model::from_stored(def, stored);

        model.set("title", "Same").unwrap();
        assert!(!model.is_modified());
        model.set("title", "Changed").unwrap();
        assert_eq!(model.modified_properties(), vec!["title"]);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let mut model = Model::new(article());
        assert!(model.set("nope", 1).is_err());
        assert!(model.set("author", "x").is_err());
    }

    #[test]
    fn test_relation_loads_once() {
        let mut stored = IndexMap::new();
        stored.insert("id".to_string(), Value::from("a-1"));
        let mut model = Model::from_stored(article(), stored);
        let loader = CountingLoader { calls: Cell::new(0) };

        assert_eq!(model.relation_state("author"), RelationState::Unloaded);
        assert!(model.relation("author").is_none());

        let related = model.load_relation("author", &loader).unwrap();
        assert_eq!(related[0].id(), Some("u-1"));
        model.load_relation("author", &loader).unwrap();

        assert_eq!(loader.calls.get(), 1);
        assert_eq!(model.relation_state("author"), RelationState::Loaded);
        assert!(!model.is_modified());
    }

    #[test]
    fn test_explicit_relation_write_prevents_reload() {
        let mut stored = IndexMap::new();
        stored.insert("id".to_string(), Value::from("a-1"));
        let mut model = Model::from_stored(article(), stored);
        let loader = CountingLoader { calls: Cell::new(0) };

        model.set_relation("author", vec![Related::from("u-9")]).unwrap();
        let related = model.load_relation("author", &loader).unwrap();

        assert_eq!(related[0].id(), Some("u-9"));
        assert_eq!(loader.calls.get(), 0);
        assert!(model.is_field_modified("author"));
    }

    #[test]
    fn test_to_array_emits_scalars_in_order() {
        let mut data = serde_json::Map::new();
        data.insert("body".into(), json!("text"));
        data.insert("author".into(), json!("u-1"));
        let model = Model::create(article(), &data).unwrap();

        let array = model.to_array();
        let keys: Vec<&String> = array.keys().collect();
        assert_eq!(keys, vec!["id", "title", "views", "body"]);
        assert_eq!(array["body"], json!("text"));
        assert_eq!(array["title"], serde_json::Value::Null);
    }

    #[test]
    fn test_fill_relation_ids() {
        let mut data = serde_json::Map::new();
        data.insert("author".into(), json!("u-3"));
        let model = Model::create(article(), &data).unwrap();
        let related = model.relation("author").unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id(), Some("u-3"));

        let mut bad = serde_json::Map::new();
        bad.insert("author".into(), json!(12));
        assert!(Model::create(article(), &bad).is_err());
    }
}
