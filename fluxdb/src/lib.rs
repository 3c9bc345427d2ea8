pub mod api;
pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod extension;
pub mod field;
pub mod format;
pub mod migration;
pub mod model;
pub mod permission;
pub mod query;
pub mod registry;
pub mod storage;
pub mod validation;

pub use api::{Api, ApiBuilder, Controller};
pub use config::Config;
pub use error::{FluxError, Result};
pub use field::{Field, FieldType, RelationType};
pub use model::{Model, ModelDefinition, Related, Value};
pub use query::Query;
