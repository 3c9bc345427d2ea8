//! Versioned extension records: extra fields layered onto a model at
//! runtime, persisted as one `<Model>.json` file per extended model.
//!
//! Every write goes through a temp file in the same directory and an atomic
//! rename. Read-modify-write cycles compare the on-disk version against the
//! version they started from and fail with `ExtensionConflict` on mismatch.
//!
//! The version check is best-effort, not a compare-and-swap: no lock is
//! held between the check and the rename, so two writers that both pass the
//! check in that window still race and the last rename wins. Readers never
//! see a partial file either way.

use crate::error::{FluxError, Result};
use crate::field::Field;
use crate::registry::normalize_name;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Base primary key; extensions never redefine it.
pub const ID_FIELD: &str = "id";

/// On-disk shape of one extension file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionRecord {
    pub name: String,
    pub updated: DateTime<Utc>,
    pub version: u64,
    pub fields: Vec<Field>,
}

/// What a reduction did to the record.
#[derive(Debug, Clone, PartialEq)]
pub enum Reduction {
    /// Some fields remain; the record was rewritten at a new version.
    Updated(ExtensionRecord),
    /// The record (and its file) no longer exists.
    Removed,
    /// There was no record for the model.
    Missing,
}

#[derive(Debug, Clone)]
pub struct ExtensionStore {
    dir: PathBuf,
}

impl ExtensionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ExtensionStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, model: &str) -> PathBuf {
        self.dir.join(format!("{}.json", normalize_name(model)))
    }

    /// Every extension record in the directory, sorted by model name. A
    /// missing directory holds no records.
    pub fn load_all(&self) -> Result<Vec<ExtensionRecord>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let pattern = self.dir.join("*.json");
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern)
            .map_err(|e| FluxError::Configuration(format!("invalid extension path: {e}")))?;

        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| FluxError::Configuration(e.to_string()))?;
            records.push(read_record(&path)?);
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// The record of one model, if the model has been extended.
    pub fn load(&self, model: &str) -> Result<Option<ExtensionRecord>> {
        let path = self.path_for(model);
        if !path.exists() {
            return Ok(None);
        }
        read_record(&path).map(Some)
    }

    /// Add `fields` to the model's record, creating it at version 1. A field
    /// whose name is already present replaces the old entry in place.
    pub fn extend(&self, model: &str, fields: Vec<Field>) -> Result<ExtensionRecord> {
        let name = normalize_name(model);
        if fields.iter().any(|f| f.name() == ID_FIELD) {
            return Err(FluxError::Validation(format!(
                "Extension of {name} cannot redefine '{ID_FIELD}'"
            )));
        }
        let current = self.load(&name)?;
        let expected = current.as_ref().map_or(0, |r| r.version);

        let mut record = current.unwrap_or_else(|| ExtensionRecord {
            name: name.clone(),
            updated: Utc::now(),
            version: 0,
            fields: Vec::new(),
        });
        for field in fields {
            match record.fields.iter_mut().find(|f| f.name() == field.name()) {
                Some(existing) => *existing = field,
                None => record.fields.push(field),
            }
        }
        record.version = expected + 1;
        record.updated = Utc::now();

        std::fs::create_dir_all(&self.dir)?;
        self.write(&record, expected)?;
        log::info!("Extended {name} to version {}", record.version);
        Ok(record)
    }

    /// Remove the named fields from the model's record, or the whole record
    /// when `fields` is `None`. A record left without fields is removed.
    pub fn reduce(&self, model: &str, fields: Option<&[&str]>) -> Result<Reduction> {
        if !self.dir.is_dir() {
            return Err(FluxError::Configuration(format!(
                "extension directory not found: {}",
                self.dir.display()
            )));
        }

        let name = normalize_name(model);
        let Some(mut record) = self.load(&name)? else {
            log::warn!("No extension record for {name}");
            return Ok(Reduction::Missing);
        };
        let expected = record.version;

        if let Some(fields) = fields {
            record.fields.retain(|f| !fields.contains(&f.name()));
        } else {
            record.fields.clear();
        }

        if record.fields.is_empty() {
            self.check_version(&name, expected)?;
            std::fs::remove_file(self.path_for(&name))?;
            log::info!("Removed extension record of {name}");
            return Ok(Reduction::Removed);
        }

        record.version = expected + 1;
        record.updated = Utc::now();
        self.write(&record, expected)?;
        log::info!("Reduced {name} to version {}", record.version);
        Ok(Reduction::Updated(record))
    }

    fn write(&self, record: &ExtensionRecord, expected: u64) -> Result<()> {
        let mut temp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut temp, record)?;
        temp.write_all(b"\n")?;
        temp.flush()?;

        self.check_version(&record.name, expected)?;
        temp.persist(self.path_for(&record.name))
            .map_err(|e| FluxError::Io(e.error))?;
        Ok(())
    }

    /// Compare the on-disk version with the version a write started from.
    /// Catches writers that finished earlier, not ones racing this call.
    fn check_version(&self, model: &str, expected: u64) -> Result<()> {
        let found = self.load(model)?.map_or(0, |r| r.version);
        if found != expected {
            return Err(FluxError::ExtensionConflict {
                model: model.to_string(),
                expected,
                found,
            });
        }
        Ok(())
    }
}

fn read_record(path: &Path) -> Result<ExtensionRecord> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        FluxError::Configuration(format!(
            "invalid extension file {}: {e}",
            path.display()
        ))
    })
}
