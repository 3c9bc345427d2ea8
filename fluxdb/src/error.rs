use thiserror::Error;

#[derive(Error, Debug)]
pub enum FluxError {
    #[error("Access denied: {action} on '{target}'")]
    AccessDenied { target: String, action: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Extension conflict on '{model}': expected version {expected}, found {found}")]
    ExtensionConflict {
        model: String,
        expected: u64,
        found: u64,
    },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, FluxError>;
