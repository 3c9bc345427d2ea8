//! Synchronous model lifecycle events.
//!
//! Subscribers register for event kinds with a priority. Delivery is in
//! priority order (highest first), ties in registration order. Subscribers
//! may adjust the instance or update data they are handed but cannot
//! cancel the operation.

use crate::field::FieldType;
use crate::model::{Model, ModelDefinition, Value};
use crate::query::Query;
use chrono::{Timelike, Utc};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BeforeCreate,
    AfterCreate,
    BeforeLoad,
    AfterLoad,
    BeforeUpdate,
    AfterUpdate,
    BeforeSave,
    AfterSave,
    BeforeDelete,
    AfterDelete,
}

/// One lifecycle notification.
pub struct ModelEvent<'a> {
    pub kind: EventKind,
    pub definition: &'a ModelDefinition,
    pub query: Option<&'a Query>,
    pub instance: Option<&'a mut Model>,
    /// Update payload of `BeforeUpdate`.
    pub data: Option<&'a mut serde_json::Map<String, serde_json::Value>>,
}

impl<'a> ModelEvent<'a> {
    pub fn new(kind: EventKind, definition: &'a ModelDefinition) -> Self {
        ModelEvent {
            kind,
            definition,
            query: None,
            instance: None,
            data: None,
        }
    }

    pub fn with_query(mut self, query: Option<&'a Query>) -> Self {
        self.query = query;
        self
    }

    pub fn with_instance(mut self, instance: &'a mut Model) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn with_data(mut self, data: &'a mut serde_json::Map<String, serde_json::Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn model_name(&self) -> &str {
        self.definition.name()
    }
}

pub trait Subscriber {
    fn name(&self) -> &str;

    fn handle(&self, event: &mut ModelEvent<'_>);
}

#[derive(Default)]
pub struct EventBus {
    subscribers: HashMap<EventKind, Vec<(i32, Arc<dyn Subscriber>)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kinds: &[EventKind], priority: i32, subscriber: Arc<dyn Subscriber>) {
        for kind in kinds {
            let list = self.subscribers.entry(*kind).or_default();
            let at = list
                .iter()
                .position(|(p, _)| *p < priority)
                .unwrap_or(list.len());
            list.insert(at, (priority, subscriber.clone()));
        }
    }

    /// Deliver `event` to every subscriber of its kind, in order.
    pub fn dispatch(&self, event: &mut ModelEvent<'_>) {
        if let Some(list) = self.subscribers.get(&event.kind) {
            for (_, subscriber) in list {
                subscriber.handle(event);
            }
        }
    }

    pub fn subscriber_names(&self, kind: EventKind) -> Vec<&str> {
        self.subscribers
            .get(&kind)
            .map(|list| list.iter().map(|(_, s)| s.name()).collect())
            .unwrap_or_default()
    }
}

// ── Timestamps ───────────────────────────────────────────────────────

pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

/// Stamps `createdAt` on new instances and `updatedAt` on every update and
/// every save that writes something, for models that declare those fields.
#[derive(Debug, Default)]
pub struct Timestamps;

impl Timestamps {
    pub const KINDS: [EventKind; 3] = [
        EventKind::BeforeCreate,
        EventKind::BeforeSave,
        EventKind::BeforeUpdate,
    ];
}

impl Subscriber for Timestamps {
    fn name(&self) -> &str {
        "Timestamps"
    }

    fn handle(&self, event: &mut ModelEvent<'_>) {
        let definition = event.definition;
        let now = Utc::now();
        let now = now.with_nanosecond(0).unwrap_or(now);

        if let Some(instance) = event.instance.as_deref_mut() {
            let mut names = Vec::new();
            if instance.is_new() && instance.get(CREATED_AT).map_or(true, Value::is_empty) {
                names.push(CREATED_AT);
            }
            // An unchanged stored instance must stay unwritten.
            if event.kind == EventKind::BeforeSave && (instance.is_new() || instance.is_modified()) {
                names.push(UPDATED_AT);
            }
            for name in names {
                let Some(field) = definition.field(name) else {
                    continue;
                };
                if let Some(value) = stamp_value(field.field_type(), now) {
                    if let Err(e) = instance.set(name, value) {
                        log::warn!("Cannot stamp {name}: {e}");
                    }
                }
            }
        }

        if let Some(data) = event.data.as_deref_mut() {
            if let Some(field) = definition.field(UPDATED_AT) {
                if let Some(value) = stamp_value(field.field_type(), now) {
                    data.insert(UPDATED_AT.to_string(), value.to_json());
                }
            }
        }
    }
}

fn stamp_value(field_type: FieldType, now: chrono::DateTime<Utc>) -> Option<Value> {
    match field_type {
        FieldType::DateTime => Some(Value::DateTime(now.naive_utc())),
        FieldType::Timestamp => Some(Value::Timestamp(now)),
        FieldType::Date => Some(Value::Date(now.date_naive())),
        FieldType::Integer => Some(Value::Integer(now.timestamp())),
        FieldType::String => Some(Value::String(now.to_rfc3339())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use std::sync::Mutex;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Subscriber for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn handle(&self, _event: &mut ModelEvent<'_>) {
            self.log.lock().unwrap().push(self.name.clone());
        }
    }

    fn recorder(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Subscriber> {
        Arc::new(Recorder {
            name: name.to_string(),
            log: log.clone(),
        })
    }

    fn stamped() -> Arc<ModelDefinition> {
        Arc::new(ModelDefinition::with_fields(
            "Post",
            vec![
                Field::new("title", FieldType::String),
                Field::new(CREATED_AT, FieldType::DateTime),
                Field::new(UPDATED_AT, FieldType::Timestamp),
            ],
        ))
    }

    #[test]
    fn test_priority_then_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.subscribe(&[EventKind::BeforeSave], 0, recorder("a", &log));
        bus.subscribe(&[EventKind::BeforeSave], 10, recorder("b", &log));
        bus.subscribe(&[EventKind::BeforeSave], 0, recorder("c", &log));
        bus.subscribe(&[EventKind::AfterSave], 0, recorder("d", &log));

        let def = ModelDefinition::new("Node");
        bus.dispatch(&mut ModelEvent::new(EventKind::BeforeSave, &def));
        assert_eq!(*log.lock().unwrap(), vec!["b", "a", "c"]);
        assert_eq!(bus.subscriber_names(EventKind::AfterSave), vec!["d"]);
    }

    #[test]
    fn test_timestamps_on_save() {
        let def = stamped();
        let mut post = Model::new(def.clone());

        Timestamps.handle(&mut ModelEvent::new(EventKind::BeforeSave, &def).with_instance(&mut post));
        assert!(matches!(post.get(CREATED_AT), Some(Value::DateTime(_))));
        assert!(matches!(post.get(UPDATED_AT), Some(Value::Timestamp(_))));
        assert!(post.is_field_modified(CREATED_AT));
    }

    #[test]
    fn test_timestamps_skip_created_for_stored() {
        let def = stamped();
        let mut data = indexmap::IndexMap::new();
        data.insert("id".to_string(), Value::from("p-1"));
        let mut post = Model::from_stored(def.clone(), data);
        post.set("title", "Edited").unwrap();

        Timestamps.handle(&mut ModelEvent::new(EventKind::BeforeSave, &def).with_instance(&mut post));
        assert!(post.get(CREATED_AT).is_none());
        assert!(post.get(UPDATED_AT).is_some());
    }

    #[test]
    fn test_timestamps_leave_unchanged_stored_instance_alone() {
        let def = stamped();
        let mut data = indexmap::IndexMap::new();
        data.insert("id".to_string(), Value::from("p-1"));
        let mut post = Model::from_stored(def.clone(), data);

        Timestamps.handle(&mut ModelEvent::new(EventKind::BeforeSave, &def).with_instance(&mut post));
        assert!(post.get(UPDATED_AT).is_none());
        assert!(!post.is_modified());
    }

    #[test]
    fn test_timestamps_on_update_data() {
        let def = stamped();
        let mut data = serde_json::Map::new();
        Timestamps.handle(&mut ModelEvent::new(EventKind::BeforeUpdate, &def).with_data(&mut data));
        assert!(data.contains_key(UPDATED_AT));
    }

    #[test]
    fn test_timestamps_ignore_models_without_fields() {
        let def = Arc::new(ModelDefinition::new("Plain"));
        let mut plain = Model::new(def.clone());
        Timestamps.handle(&mut ModelEvent::new(EventKind::BeforeCreate, &def).with_instance(&mut plain));
        assert!(!plain.is_modified());
    }
}
