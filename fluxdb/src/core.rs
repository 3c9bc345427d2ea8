//! The built-in "Core" plugin suite.

use crate::api::{Api, Controller};
use crate::cache::{ArrayCache, Cache};
use crate::config::Config;
use crate::error::{FluxError, Result};
use crate::events::{CREATED_AT, UPDATED_AT};
use crate::field::{Field, FieldType, RelationType};
use crate::format::{JsonFormat, YamlFormat};
use crate::registry::{CachePlugin, ModelPlugin, PluginHandle, PluginSuite, StoragePlugin};
use crate::storage::{SqliteStorage, Storage};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

pub const SUITE: &str = "Core";

#[derive(Debug, Clone, Copy, Default)]
pub struct CoreSuite;

impl PluginSuite for CoreSuite {
    fn name(&self) -> &str {
        SUITE
    }

    fn plugins(&self) -> Vec<PluginHandle> {
        vec![
            PluginHandle::Model(Arc::new(NodeModel)),
            PluginHandle::Storage(Arc::new(SqlitePlugin)),
            PluginHandle::Cache(Arc::new(ArrayCachePlugin)),
            PluginHandle::Format(Arc::new(JsonFormat)),
            PluginHandle::Format(Arc::new(YamlFormat)),
            PluginHandle::Controller(Arc::new(ModelController)),
        ]
    }
}

/// A titled tree node: one parent, many children.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeModel;

impl ModelPlugin for NodeModel {
    fn name(&self) -> &str {
        "Node"
    }

    fn fields(&self) -> Vec<Field> {
        vec![
            Field::new("title", FieldType::String).length(255),
            Field::relation("parent", RelationType::HasOne, "Node"),
            Field::relation("children", RelationType::HasMany, "Node"),
            Field::new(CREATED_AT, FieldType::DateTime),
            Field::new(UPDATED_AT, FieldType::DateTime),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlitePlugin;

impl StoragePlugin for SqlitePlugin {
    fn name(&self) -> &str {
        "Sqlite"
    }

    fn open(&self, config: &Config) -> Result<Box<dyn Storage>> {
        if config.is_in_memory() {
            return Ok(Box::new(SqliteStorage::open_in_memory(&config.table_prefix)?));
        }
        let path = Path::new(&config.database);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Box::new(SqliteStorage::open(path, &config.table_prefix)?))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayCachePlugin;

impl CachePlugin for ArrayCachePlugin {
    fn name(&self) -> &str {
        "Array"
    }

    fn create(&self, _config: &Config) -> Box<dyn Cache> {
        Box::new(ArrayCache::new())
    }
}

/// Generic model actions addressed by name: `count`, `load` and `create`.
/// Params carry `model` plus `data` for `create`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelController;

impl Controller for ModelController {
    fn name(&self) -> &str {
        "Model"
    }

    fn call(
        &self,
        api: &mut Api,
        action: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let model = params
            .get("model")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| FluxError::Validation("Missing 'model' parameter".to_string()))?;

        match action {
            "count" => Ok(json!(api.count(model, None)?)),
            "load" => {
                let rows: Vec<serde_json::Value> = api
                    .load_all(model)?
                    .iter()
                    .map(|m| serde_json::Value::Object(m.to_array()))
                    .collect();
                Ok(serde_json::Value::Array(rows))
            }
            "create" => {
                let data = match params.get("data") {
                    Some(serde_json::Value::Object(data)) => data.clone(),
                    None => serde_json::Map::new(),
                    Some(other) => {
                        return Err(FluxError::Validation(format!(
                            "'data' must be an object, got {other}"
                        )))
                    }
                };
                let mut instance = api.create(model, &data)?;
                api.save(&mut instance)?;
                Ok(serde_json::Value::Object(instance.to_array()))
            }
            other => Err(FluxError::Other(format!(
                "Controller 'Model' has no action '{other}'"
            ))),
        }
    }
}
