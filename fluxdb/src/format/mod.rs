//! Text codecs used to move model data in and out of the process.

use crate::error::Result;

/// A named text encoding of structured data.
pub trait Format {
    fn name(&self) -> &str;

    /// File extension without the dot.
    fn extension(&self) -> &str;

    fn mime_type(&self) -> &str;

    fn decode(&self, raw: &str) -> Result<serde_json::Value>;

    fn encode(&self, data: &serde_json::Value) -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

impl Format for JsonFormat {
    fn name(&self) -> &str {
        "Json"
    }

    fn extension(&self) -> &str {
        "json"
    }

    fn mime_type(&self) -> &str {
        "application/json"
    }

    fn decode(&self, raw: &str) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(raw)?)
    }

    fn encode(&self, data: &serde_json::Value) -> Result<String> {
        Ok(serde_json::to_string_pretty(data)?)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct YamlFormat;

impl Format for YamlFormat {
    fn name(&self) -> &str {
        "Yaml"
    }

    fn extension(&self) -> &str {
        "yaml"
    }

    fn mime_type(&self) -> &str {
        "application/x-yaml"
    }

    fn decode(&self, raw: &str) -> Result<serde_json::Value> {
        Ok(serde_yaml::from_str(raw)?)
    }

    fn encode(&self, data: &serde_json::Value) -> Result<String> {
        Ok(serde_yaml::to_string(data)?)
    }
}
