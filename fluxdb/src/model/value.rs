use crate::error::{FluxError, Result};
use crate::field::FieldType;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// In-memory value of a scalar model attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
    /// Arbitrary nested arrays / objects
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null or an empty string. Empty values are never written.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Coerce loosely-typed JSON input (create data, defaults, decoded
    /// formats) into the value shape of `field_type`.
    pub fn from_json(json: &serde_json::Value, field_type: FieldType) -> Result<Value> {
        use serde_json::Value as J;

        if json.is_null() {
            return Ok(Value::Null);
        }

        let mismatch = || {
            FluxError::Codec(format!(
                "cannot convert {json} to {field_type:?}"
            ))
        };

        let value = match field_type {
            FieldType::Integer => match json {
                J::Number(n) => match n.as_i64() {
                    Some(i) => Value::Integer(i),
                    None => match n.as_f64() {
                        Some(f) if f.fract() == 0.0 => Value::Integer(f as i64),
                        _ => return Err(mismatch()),
                    },
                },
                J::Bool(b) => Value::Integer(i64::from(*b)),
                J::String(s) => Value::Integer(s.trim().parse().map_err(|_| mismatch())?),
                _ => return Err(mismatch()),
            },
            FieldType::Float => match json {
                J::Number(n) => Value::Float(n.as_f64().ok_or_else(mismatch)?),
                J::String(s) => Value::Float(s.trim().parse().map_err(|_| mismatch())?),
                _ => return Err(mismatch()),
            },
            FieldType::String | FieldType::LongString => match json {
                J::String(s) => Value::String(s.clone()),
                J::Number(n) => Value::String(n.to_string()),
                J::Bool(b) => Value::String(b.to_string()),
                _ => return Err(mismatch()),
            },
            FieldType::Boolean => match json {
                J::Bool(b) => Value::Bool(*b),
                J::Number(n) => Value::Bool(n.as_i64().map(|i| i != 0).unwrap_or(false)),
                J::String(s) => match s.as_str() {
                    "1" | "true" => Value::Bool(true),
                    "0" | "false" | "" => Value::Bool(false),
                    _ => return Err(mismatch()),
                },
                _ => return Err(mismatch()),
            },
            FieldType::Date => {
                let s = json.as_str().ok_or_else(mismatch)?;
                let date = NaiveDate::parse_from_str(s, DATE_FORMAT)
                    .or_else(|_| parse_datetime(s).map(|dt| dt.date()).ok_or(()))
                    .map_err(|_| mismatch())?;
                Value::Date(date)
            }
            FieldType::DateTime => {
                let s = json.as_str().ok_or_else(mismatch)?;
                Value::DateTime(parse_datetime(s).ok_or_else(mismatch)?)
            }
            FieldType::Timestamp => match json {
                J::Number(n) => {
                    let secs = n.as_i64().ok_or_else(mismatch)?;
                    Value::Timestamp(DateTime::<Utc>::from_timestamp(secs, 0).ok_or_else(mismatch)?)
                }
                J::String(s) => {
                    let dt = DateTime::parse_from_rfc3339(s)
                        .map(|dt| dt.with_timezone(&Utc))
                        .or_else(|_| {
                            parse_datetime(s).map(|naive| naive.and_utc()).ok_or(())
                        })
                        .map_err(|_| mismatch())?;
                    Value::Timestamp(dt)
                }
                _ => return Err(mismatch()),
            },
            FieldType::Array | FieldType::Object => Value::Json(json.clone()),
            FieldType::ByteArray => match json {
                J::String(s) => Value::Bytes(s.as_bytes().to_vec()),
                J::Array(items) => {
                    let mut bytes = Vec::with_capacity(items.len());
                    for item in items {
                        let b = item
                            .as_u64()
                            .filter(|b| *b <= u64::from(u8::MAX))
                            .ok_or_else(mismatch)?;
                        bytes.push(b as u8);
                    }
                    Value::Bytes(bytes)
                }
                _ => return Err(mismatch()),
            },
            FieldType::Relation => return Err(mismatch()),
        };

        Ok(value)
    }

    /// Plain JSON rendering, used by `to_array` and the format codecs.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Integer(n) => J::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::String(s) => J::String(s.clone()),
            Value::Date(d) => J::String(d.format(DATE_FORMAT).to_string()),
            Value::DateTime(dt) => J::String(dt.format(DATETIME_FORMAT).to_string()),
            Value::Timestamp(ts) => J::String(ts.to_rfc3339()),
            Value::Json(v) => v.clone(),
            Value::Bytes(b) => J::Array(b.iter().map(|byte| J::from(*byte)).collect()),
        }
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}
