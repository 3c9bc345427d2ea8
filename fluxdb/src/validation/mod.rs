use crate::error::{FluxError, Result};
use crate::field::{Field, ValidatorSpec};
use crate::model::{Model, RelationState, Value};
use regex::Regex;

/// Result of validating a model instance
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Run every field's validators against the instance, in declaration order.
pub fn validate_model(model: &Model) -> ValidationResult {
    let mut result = ValidationResult::default();

    for field in model.definition().fields() {
        for spec in field.validators() {
            if field.is_relation() {
                validate_relation(model, field, spec, &mut result);
            } else {
                let value = model.get(field.name()).unwrap_or(&Value::Null);
                validate_value(field, spec, value, &mut result);
            }
        }
    }

    result
}

fn validate_relation(model: &Model, field: &Field, spec: &ValidatorSpec, result: &mut ValidationResult) {
    if spec.name != "required" {
        result.warnings.push(format!(
            "Validator '{}' does not apply to relation '{}'",
            spec.name,
            field.name()
        ));
        return;
    }
    // An unloaded relation on a stored record keeps whatever links it has.
    if model.relation_state(field.name()) == RelationState::Unloaded && !model.is_new() {
        return;
    }
    if model.relation(field.name()).map_or(true, <[_]>::is_empty) {
        result
            .errors
            .push(format!("Relation '{}' is required", field.name()));
    }
}

fn validate_value(field: &Field, spec: &ValidatorSpec, value: &Value, result: &mut ValidationResult) {
    let name = field.name();
    let options = &spec.options;

    if spec.name == "required" {
        if value.is_empty() {
            result.errors.push(format!("Field '{name}' is required"));
        }
        return;
    }
    if value.is_null() {
        return;
    }

    match spec.name.as_str() {
        "length" => {
            let Some(text) = value.as_str() else {
                return;
            };
            let chars = text.chars().count() as u64;
            if let Some(min) = options.get("min").and_then(serde_json::Value::as_u64) {
                if chars < min {
                    result
                        .errors
                        .push(format!("Field '{name}' must be at least {min} characters"));
                }
            }
            if let Some(max) = options.get("max").and_then(serde_json::Value::as_u64) {
                if chars > max {
                    result
                        .errors
                        .push(format!("Field '{name}' must be at most {max} characters"));
                }
            }
        }
        "email" => {
            let valid = value.as_str().is_some_and(is_email);
            if !valid {
                result
                    .errors
                    .push(format!("Field '{name}' must be an email address"));
            }
        }
        "pattern" => {
            let Some(source) = options.get("regex").and_then(serde_json::Value::as_str) else {
                result
                    .errors
                    .push(format!("Validator 'pattern' on '{name}' has no regex"));
                return;
            };
            match Regex::new(source) {
                Ok(re) => {
                    if !value.as_str().is_some_and(|s| re.is_match(s)) {
                        result
                            .errors
                            .push(format!("Field '{name}' does not match /{source}/"));
                    }
                }
                Err(e) => result
                    .errors
                    .push(format!("Validator 'pattern' on '{name}' is invalid: {e}")),
            }
        }
        "range" => {
            let Some(number) = value.as_f64() else {
                result.errors.push(format!("Field '{name}' must be numeric"));
                return;
            };
            if let Some(min) = options.get("min").and_then(serde_json::Value::as_f64) {
                if number < min {
                    result
                        .errors
                        .push(format!("Field '{name}' must be at least {min}"));
                }
            }
            if let Some(max) = options.get("max").and_then(serde_json::Value::as_f64) {
                if number > max {
                    result
                        .errors
                        .push(format!("Field '{name}' must be at most {max}"));
                }
            }
        }
        "in" => {
            let allowed = options
                .get("values")
                .and_then(serde_json::Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            if !allowed.contains(&value.to_json()) {
                result
                    .errors
                    .push(format!("Field '{name}' must be one of {allowed:?}"));
            }
        }
        other => {
            log::warn!("Ignoring unknown validator '{other}' on field '{name}'");
            result
                .warnings
                .push(format!("Unknown validator '{other}' on field '{name}'"));
        }
    }
}

fn is_email(text: &str) -> bool {
    if text.chars().any(char::is_whitespace) {
        return false;
    }
    match text.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Validate an instance. Returns an error listing every failure, or the
/// warnings when the instance is acceptable.
pub fn validate_and_prepare(model: &Model) -> Result<Vec<String>> {
    let result = validate_model(model);

    if !result.is_ok() {
        return Err(FluxError::Validation(format!(
            "{} validation failed:\n  - {}",
            model.model_name(),
            result.errors.join("\n  - ")
        )));
    }

    Ok(result.warnings)
}
