use serde::{Deserialize, Serialize};

/// Storage-facing type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Integer,
    Float,
    String,
    LongString,
    Boolean,
    Date,
    DateTime,
    Timestamp,
    Array,
    Object,
    ByteArray,
    Relation,
}

/// Cardinality of a relation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationType {
    HasOne,
    HasMany,
    BelongsToOne,
    BelongsToMany,
}

impl RelationType {
    /// Whether the relation holds at most one related record
    pub fn is_single(&self) -> bool {
        matches!(self, RelationType::HasOne | RelationType::BelongsToOne)
    }

    /// Owner-authoritative relations replace prior links on every save
    pub fn is_owning(&self) -> bool {
        matches!(self, RelationType::HasOne | RelationType::HasMany)
    }
}

/// A named validator with its options, e.g. `length {max: 20}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorSpec {
    pub name: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

/// One attribute of a model. Built once via the consuming builder methods
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    name: String,
    #[serde(rename = "type")]
    field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u32>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    default: serde_json::Value,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    auto_increment: bool,
    #[serde(default)]
    unsigned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    relation_type: Option<RelationType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    relation_model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    validators: Vec<ValidatorSpec>,
}

impl Field {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Field {
            name: name.to_string(),
            field_type,
            length: None,
            default: serde_json::Value::Null,
            primary: false,
            auto_increment: false,
            unsigned: false,
            relation_type: None,
            relation_model: None,
            validators: Vec::new(),
        }
    }

    /// A relation field pointing at `model`.
    pub fn relation(name: &str, relation_type: RelationType, model: &str) -> Self {
        let mut field = Field::new(name, FieldType::Relation);
        field.relation_type = Some(relation_type);
        field.relation_model = Some(model.to_string());
        field
    }

    /// The `id` field every model starts from.
    pub fn id() -> Self {
        Field::new("id", FieldType::String).length(36).primary()
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn default_value(mut self, value: serde_json::Value) -> Self {
        self.default = value;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    pub fn validator(mut self, name: &str, options: serde_json::Value) -> Self {
        self.validators.push(ValidatorSpec {
            name: name.to_string(),
            options,
        });
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Declared length, falling back to the `max` of a `length` validator.
    pub fn max_length(&self) -> Option<u32> {
        self.length.or_else(|| {
            self.validators
                .iter()
                .find(|v| v.name == "length")
                .and_then(|v| v.options.get("max"))
                .and_then(serde_json::Value::as_u64)
                .and_then(|max| u32::try_from(max).ok())
        })
    }

    pub fn default(&self) -> &serde_json::Value {
        &self.default
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn is_auto_increment(&self) -> bool {
        self.auto_increment
    }

    pub fn is_unsigned(&self) -> bool {
        self.unsigned
    }

    pub fn is_relation(&self) -> bool {
        self.field_type == FieldType::Relation
    }

    pub fn relation_type(&self) -> Option<RelationType> {
        self.relation_type
    }

    pub fn relation_model(&self) -> Option<&str> {
        self.relation_model.as_deref()
    }

    pub fn validators(&self) -> &[ValidatorSpec] {
        &self.validators
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_field_is_primary_string() {
        let id = Field::id();
        assert_eq!(id.name(), "id");
        assert_eq!(id.field_type(), FieldType::String);
        assert_eq!(id.max_length(), Some(36));
        assert!(id.is_primary());
        assert!(!id.is_relation());
    }

    #[test]
    fn test_relation_builder() {
        let field = Field::relation("children", RelationType::HasMany, "Node");
        assert!(field.is_relation());
        assert_eq!(field.relation_type(), Some(RelationType::HasMany));
        assert_eq!(field.relation_model(), Some("Node"));
        assert!(!RelationType::HasMany.is_single());
        assert!(RelationType::HasMany.is_owning());
        assert!(!RelationType::BelongsToOne.is_owning());
    }

    #[test]
    fn test_field_json_shape() {
        let field = Field::new("title", FieldType::String)
            .length(120)
            .validator("required", json!({}));
        let value = serde_json::to_value(&field).unwrap();
        assert_eq!(value["type"], "string");
        assert_eq!(value["length"], 120);
        assert_eq!(value["validators"][0]["name"], "required");
        assert!(value.get("relationType").is_none());
    }

    #[test]
    fn test_length_validator_bounds_column() {
        let field = Field::new("code", FieldType::String).validator("length", json!({"max": 8}));
        assert_eq!(field.max_length(), Some(8));
        let explicit = field.length(12);
        assert_eq!(explicit.max_length(), Some(12));
    }

    #[test]
    fn test_parse_field_definition() {
        let field: Field = serde_json::from_value(json!({
            "name": "tags",
            "type": "relation",
            "relationType": "belongsToMany",
            "relationModel": "Tag"
        }))
        .unwrap();
        assert_eq!(field.relation_type(), Some(RelationType::BelongsToMany));
        assert!(field.default().is_null());

        let scalar: Field =
            serde_json::from_value(json!({"name": "body", "type": "longString", "default": ""}))
                .unwrap();
        assert_eq!(scalar.field_type(), FieldType::LongString);
        assert_eq!(scalar.default(), &json!(""));
    }
}
