use crate::model::Model;
use std::collections::HashMap;

/// Result cache for model loads, keyed by model name and query fingerprint.
pub trait Cache {
    fn name(&self) -> &str;

    fn get(&self, model: &str, key: &str) -> Option<Vec<Model>>;

    fn set(&mut self, model: &str, key: &str, instances: Vec<Model>);

    /// Drop every entry of one model.
    fn invalidate(&mut self, model: &str);

    fn clear(&mut self);
}

/// In-process cache living as long as the owning `Api`.
#[derive(Debug, Default)]
pub struct ArrayCache {
    entries: HashMap<String, HashMap<String, Vec<Model>>>,
}

impl ArrayCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for ArrayCache {
    fn name(&self) -> &str {
        "Array"
    }

    fn get(&self, model: &str, key: &str) -> Option<Vec<Model>> {
        self.entries.get(model)?.get(key).cloned()
    }

    fn set(&mut self, model: &str, key: &str, instances: Vec<Model>) {
        self.entries
            .entry(model.to_string())
            .or_default()
            .insert(key.to_string(), instances);
    }

    fn invalidate(&mut self, model: &str) {
        self.entries.remove(model);
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelDefinition;
    use std::sync::Arc;

    fn instance() -> Model {
        Model::new(Arc::new(ModelDefinition::new("Node")))
    }

    #[test]
    fn test_set_get_invalidate() {
        let mut cache = ArrayCache::new();
        assert!(cache.get("Node", "k").is_none());

        cache.set("Node", "k", vec![instance()]);
        cache.set("Node", "other", vec![]);
        cache.set("User", "k", vec![instance(), instance()]);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("Node", "k").unwrap().len(), 1);

        cache.invalidate("Node");
        assert!(cache.get("Node", "k").is_none());
        assert_eq!(cache.get("User", "k").unwrap().len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
