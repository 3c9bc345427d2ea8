//! Type-directed conversion between model values and storage values.

use crate::error::{FluxError, Result};
use crate::field::{Field, FieldType};
use crate::model::{Value, DATETIME_FORMAT, DATE_FORMAT};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::Value as SqlValue;
use uuid::Uuid;

/// Convert an in-memory value to its storage representation for `field`.
pub fn serialize(value: &Value, field: &Field) -> Result<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    let mismatch = || {
        FluxError::Codec(format!(
            "cannot store {value:?} in {:?} field '{}'",
            field.field_type(),
            field.name()
        ))
    };

    let stored = match field.field_type() {
        FieldType::Integer => match value {
            Value::Integer(n) => SqlValue::Integer(*n),
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::String(s) => SqlValue::Integer(s.trim().parse().map_err(|_| mismatch())?),
            _ => return Err(mismatch()),
        },
        FieldType::Float => match value {
            Value::Float(f) => SqlValue::Real(*f),
            Value::Integer(n) => SqlValue::Real(*n as f64),
            _ => return Err(mismatch()),
        },
        FieldType::String | FieldType::LongString => match value {
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Integer(n) => SqlValue::Text(n.to_string()),
            Value::Float(f) => SqlValue::Text(f.to_string()),
            Value::Bool(b) => SqlValue::Text(b.to_string()),
            _ => return Err(mismatch()),
        },
        FieldType::Boolean => match value {
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Integer(n) => SqlValue::Integer(i64::from(*n != 0)),
            _ => return Err(mismatch()),
        },
        FieldType::Date => {
            let date = match value {
                Value::Date(d) => *d,
                Value::DateTime(dt) => dt.date(),
                Value::Timestamp(ts) => ts.date_naive(),
                Value::String(s) => NaiveDate::parse_from_str(s, DATE_FORMAT)
                    .map_err(|_| mismatch())?,
                _ => return Err(mismatch()),
            };
            SqlValue::Text(date.format(DATE_FORMAT).to_string())
        }
        FieldType::DateTime => {
            let datetime = match value {
                Value::DateTime(dt) => *dt,
                Value::Timestamp(ts) => ts.naive_utc(),
                Value::Date(d) => d.and_hms_opt(0, 0, 0).ok_or_else(mismatch)?,
                Value::String(s) => NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
                    .map_err(|_| mismatch())?,
                _ => return Err(mismatch()),
            };
            SqlValue::Text(datetime.format(DATETIME_FORMAT).to_string())
        }
        FieldType::Timestamp => match value {
            Value::Timestamp(ts) => SqlValue::Integer(ts.timestamp()),
            Value::DateTime(dt) => SqlValue::Integer(dt.and_utc().timestamp()),
            Value::Integer(n) => SqlValue::Integer(*n),
            _ => return Err(mismatch()),
        },
        FieldType::Array | FieldType::Object => {
            let json = match value {
                Value::Json(v) => v.clone(),
                other => other.to_json(),
            };
            SqlValue::Text(serde_json::to_string(&json)?)
        }
        FieldType::ByteArray => match value {
            Value::Bytes(b) => SqlValue::Blob(b.clone()),
            Value::String(s) => SqlValue::Blob(s.as_bytes().to_vec()),
            _ => return Err(mismatch()),
        },
        FieldType::Relation => return Err(mismatch()),
    };

    Ok(stored)
}

/// Convert a stored value back into the in-memory shape of `field`.
pub fn unserialize(stored: SqlValue, field: &Field) -> Result<Value> {
    if stored == SqlValue::Null {
        return Ok(Value::Null);
    }

    let mismatch = |stored: &SqlValue| {
        FluxError::Codec(format!(
            "cannot read {stored:?} as {:?} field '{}'",
            field.field_type(),
            field.name()
        ))
    };

    let value = match (field.field_type(), stored) {
        (FieldType::Integer, SqlValue::Integer(n)) => Value::Integer(n),
        (FieldType::Integer, SqlValue::Real(f)) if f.fract() == 0.0 => Value::Integer(f as i64),
        (FieldType::Integer, SqlValue::Text(s)) => {
            Value::Integer(s.parse().map_err(|_| mismatch(&SqlValue::Text(s.clone())))?)
        }
        (FieldType::Float, SqlValue::Real(f)) => Value::Float(f),
        (FieldType::Float, SqlValue::Integer(n)) => Value::Float(n as f64),
        (FieldType::String | FieldType::LongString, SqlValue::Text(s)) => Value::String(s),
        (FieldType::String | FieldType::LongString, SqlValue::Integer(n)) => {
            Value::String(n.to_string())
        }
        (FieldType::String | FieldType::LongString, SqlValue::Real(f)) => {
            Value::String(f.to_string())
        }
        (FieldType::Boolean, SqlValue::Integer(n)) => Value::Bool(n != 0),
        (FieldType::Boolean, SqlValue::Text(s)) => Value::Bool(s == "1" || s == "true"),
        (FieldType::Date, SqlValue::Text(s)) => Value::Date(
            NaiveDate::parse_from_str(&s, DATE_FORMAT)
                .map_err(|_| mismatch(&SqlValue::Text(s.clone())))?,
        ),
        (FieldType::DateTime, SqlValue::Text(s)) => Value::DateTime(
            NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT)
                .map_err(|_| mismatch(&SqlValue::Text(s.clone())))?,
        ),
        (FieldType::Timestamp, SqlValue::Integer(n)) => Value::Timestamp(
            DateTime::<Utc>::from_timestamp(n, 0)
                .ok_or_else(|| mismatch(&SqlValue::Integer(n)))?,
        ),
        (FieldType::Array | FieldType::Object, SqlValue::Text(s)) => {
            Value::Json(serde_json::from_str(&s)?)
        }
        (FieldType::ByteArray, SqlValue::Blob(b)) => Value::Bytes(b),
        (FieldType::ByteArray, SqlValue::Text(s)) => Value::Bytes(s.into_bytes()),
        (_, other) => return Err(mismatch(&other)),
    };

    Ok(value)
}

/// A fresh record identifier (UUID v4, hyphenated).
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Canonical `8-4-4-4-12` UUID to 32 lowercase hex digits.
pub fn uuid_to_hex(uuid: &str) -> Result<String> {
    let parsed = Uuid::parse_str(uuid)
        .map_err(|e| FluxError::Codec(format!("invalid uuid '{uuid}': {e}")))?;
    Ok(parsed.simple().to_string())
}

/// 32 hex digits back to the canonical hyphenated form.
pub fn hex_to_uuid(hex: &str) -> Result<String> {
    if hex.len() != 32 {
        return Err(FluxError::Codec(format!("expected 32 hex digits, got '{hex}'")));
    }
    let parsed = Uuid::try_parse(hex)
        .map_err(|e| FluxError::Codec(format!("invalid hex id '{hex}': {e}")))?;
    Ok(parsed.hyphenated().to_string())
}

/// The compact 16-byte form of a UUID string.
pub fn uuid_to_bytes(uuid: &str) -> Result<[u8; 16]> {
    let parsed = Uuid::parse_str(uuid)
        .map_err(|e| FluxError::Codec(format!("invalid uuid '{uuid}': {e}")))?;
    Ok(*parsed.as_bytes())
}

pub fn bytes_to_uuid(bytes: &[u8]) -> Result<String> {
    let parsed = Uuid::from_slice(bytes)
        .map_err(|e| FluxError::Codec(format!("invalid uuid bytes: {e}")))?;
    Ok(parsed.hyphenated().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::RelationType;
    use serde_json::json;

    fn round_trip(value: Value, field_type: FieldType) -> Value {
        let field = Field::new("f", field_type);
        let stored = serialize(&value, &field).unwrap();
        unserialize(stored, &field).unwrap()
    }

    #[test]
    fn test_round_trip_scalars() {
        let date = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        let datetime = date.and_hms_opt(23, 59, 58).unwrap();
        let cases = vec![
            (Value::Integer(-42), FieldType::Integer),
            (Value::Integer(i64::MAX), FieldType::Integer),
            (Value::Float(3.5e-7), FieldType::Float),
            (Value::from("héllo"), FieldType::String),
            (Value::from("long text"), FieldType::LongString),
            (Value::Bool(true), FieldType::Boolean),
            (Value::Bool(false), FieldType::Boolean),
            (Value::Date(date), FieldType::Date),
            (Value::DateTime(datetime), FieldType::DateTime),
            (Value::Timestamp(datetime.and_utc()), FieldType::Timestamp),
            (Value::Bytes(vec![0, 255, 7]), FieldType::ByteArray),
            (Value::Null, FieldType::Integer),
        ];
        for (value, field_type) in cases {
            assert_eq!(round_trip(value.clone(), field_type), value, "{field_type:?}");
        }
    }

    #[test]
    fn test_round_trip_nested_structures() {
        let nested = json!({
            "a": [1, 2, {"b": [true, null, "x"]}],
            "c": {"d": {"e": 1.5}},
        });
        assert_eq!(
            round_trip(Value::Json(nested.clone()), FieldType::Object),
            Value::Json(nested)
        );
        let list = json!([[1, [2, [3]]], "four", {"five": 5}]);
        assert_eq!(
            round_trip(Value::Json(list.clone()), FieldType::Array),
            Value::Json(list)
        );
    }

    #[test]
    fn test_storage_formats() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let datetime = date.and_hms_opt(3, 4, 5).unwrap();
        assert_eq!(
            serialize(&Value::Date(date), &Field::new("d", FieldType::Date)).unwrap(),
            SqlValue::Text("2024-01-02".into())
        );
        assert_eq!(
            serialize(&Value::DateTime(datetime), &Field::new("d", FieldType::DateTime)).unwrap(),
            SqlValue::Text("2024-01-02 03:04:05".into())
        );
        assert_eq!(
            serialize(&Value::Bool(true), &Field::new("b", FieldType::Boolean)).unwrap(),
            SqlValue::Integer(1)
        );
    }

    #[test]
    fn test_relation_fields_are_not_serializable() {
        let field = Field::relation("parent", RelationType::HasOne, "Node");
        assert!(serialize(&Value::from("x"), &field).is_err());
    }

    #[test]
    fn test_type_mismatch_is_codec_error() {
        let field = Field::new("n", FieldType::Integer);
        let result = serialize(&Value::Json(json!([1])), &field);
        assert!(matches!(result, Err(FluxError::Codec(_))));
        let result = unserialize(SqlValue::Blob(vec![1]), &field);
        assert!(matches!(result, Err(FluxError::Codec(_))));
    }

    #[test]
    fn test_uuid_hex_round_trip() {
        for _ in 0..20 {
            let id = generate_id();
            let hex = uuid_to_hex(&id).unwrap();
            assert_eq!(hex.len(), 32);
            assert!(!hex.contains('-'));
            assert_eq!(hex_to_uuid(&hex).unwrap(), id);
        }
        let fixed = "0f8fad5b-d9cb-469f-a165-70867728950e";
        assert_eq!(uuid_to_hex(fixed).unwrap(), "0f8fad5bd9cb469fa16570867728950e");
    }

    #[test]
    fn test_uuid_bytes_round_trip() {
        let id = generate_id();
        let bytes = uuid_to_bytes(&id).unwrap();
        assert_eq!(bytes_to_uuid(&bytes).unwrap(), id);
        assert!(bytes_to_uuid(&bytes[..8]).is_err());
    }

    #[test]
    fn test_invalid_hex_rejected() {
        assert!(hex_to_uuid("abc").is_err());
        assert!(hex_to_uuid("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz").is_err());
        assert!(uuid_to_hex("not-a-uuid").is_err());
    }
}
