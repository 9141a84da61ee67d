//! JSON record schemas
//!
//! A deliberately small, Avro-flavoured schema language:
//!
//! ```json
//! {"type": "record", "name": "Deposited", "namespace": "edalab.banking",
//!  "fields": [{"name": "amount", "type": {"type": "string", "logicalType": "decimal"}},
//!             {"name": "metadata", "type": ["null", {"type": "map", "values": "string"}]}]}
//! ```
//!
//! Payloads are JSON objects; a payload conforms when every declared field
//! is present with a matching type (optional fields may be absent or null)
//! and no undeclared field appears.

use chrono::DateTime;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;

/// Type of a single record field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    String,
    Int,
    Long,
    Double,
    Boolean,
    /// Decimal carried as a string to keep precision
    Decimal,
    /// RFC 3339 timestamp carried as a string
    Timestamp,
    Enum { name: String, symbols: Vec<String> },
    Map(Box<FieldType>),
    Array(Box<FieldType>),
    /// `["null", T]`
    Optional(Box<FieldType>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordField {
    pub name: String,
    pub ty: FieldType,
}

/// A parsed record schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    pub name: String,
    pub namespace: Option<String>,
    pub fields: Vec<RecordField>,
}

impl RecordSchema {
    /// Parse a raw schema definition.
    pub fn parse(definition: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(definition).map_err(|e| format!("not JSON: {}", e))?;
        let obj = value
            .as_object()
            .ok_or_else(|| "schema must be a JSON object".to_string())?;

        if obj.get("type").and_then(Value::as_str) != Some("record") {
            return Err("top-level type must be \"record\"".to_string());
        }

        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| "record needs a name".to_string())?
            .to_string();
        let namespace = obj
            .get("namespace")
            .and_then(Value::as_str)
            .map(str::to_string);

        let raw_fields = obj
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| format!("record {} needs a fields array", name))?;

        let mut fields = Vec::with_capacity(raw_fields.len());
        for raw in raw_fields {
            let field_name = raw
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("field without name in {}", name))?;
            if fields.iter().any(|f: &RecordField| f.name == field_name) {
                return Err(format!("duplicate field {} in {}", field_name, name));
            }
            let ty = raw
                .get("type")
                .ok_or_else(|| format!("field {} has no type", field_name))
                .and_then(parse_type)?;
            fields.push(RecordField {
                name: field_name.to_string(),
                ty,
            });
        }

        Ok(Self {
            name,
            namespace,
            fields,
        })
    }

    /// `namespace.name`, or just the name
    pub fn full_name(&self) -> String {
        match &self.namespace {
            Some(ns) if !ns.is_empty() => format!("{}.{}", ns, self.name),
            _ => self.name.clone(),
        }
    }

    /// Check that `value` conforms to this schema.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        let obj = value
            .as_object()
            .ok_or_else(|| format!("{} payload must be an object", self.name))?;

        for field in &self.fields {
            match obj.get(&field.name) {
                None | Some(Value::Null) if matches!(field.ty, FieldType::Optional(_)) => {}
                None => return Err(format!("missing field {}", field.name)),
                Some(v) => check(&field.ty, v).map_err(|e| format!("{}: {}", field.name, e))?,
            }
        }

        if let Some(extra) = obj
            .keys()
            .find(|k| !self.fields.iter().any(|f| &f.name == *k))
        {
            return Err(format!("unexpected field {}", extra));
        }

        Ok(())
    }
}

fn parse_type(value: &Value) -> Result<FieldType, String> {
    match value {
        Value::String(name) => parse_named(name),
        Value::Array(branches) => {
            let non_null: Vec<&Value> = branches.iter().filter(|b| *b != "null").collect();
            if branches.len() != 2 || non_null.len() != 1 {
                return Err("only [\"null\", T] unions are supported".to_string());
            }
            Ok(FieldType::Optional(Box::new(parse_type(non_null[0])?)))
        }
        Value::Object(obj) => parse_complex(obj),
        other => Err(format!("unsupported type declaration {}", other)),
    }
}

fn parse_named(name: &str) -> Result<FieldType, String> {
    match name {
        "string" => Ok(FieldType::String),
        "int" => Ok(FieldType::Int),
        "long" => Ok(FieldType::Long),
        "double" | "float" => Ok(FieldType::Double),
        "boolean" => Ok(FieldType::Boolean),
        other => Err(format!("unknown type {}", other)),
    }
}

fn parse_complex(obj: &Map<String, Value>) -> Result<FieldType, String> {
    let ty = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| "complex type needs a \"type\"".to_string())?;

    match (ty, obj.get("logicalType").and_then(Value::as_str)) {
        ("string", Some("decimal")) => Ok(FieldType::Decimal),
        ("string", Some("timestamp")) => Ok(FieldType::Timestamp),
        ("enum", _) => {
            let name = obj
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("enum")
                .to_string();
            let symbols = obj
                .get("symbols")
                .and_then(Value::as_array)
                .ok_or_else(|| format!("enum {} needs symbols", name))?
                .iter()
                .map(|s| {
                    s.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| format!("enum {} has a non-string symbol", name))
                })
                .collect::<Result<Vec<_>, _>>()?;
            if symbols.is_empty() {
                return Err(format!("enum {} has no symbols", name));
            }
            Ok(FieldType::Enum { name, symbols })
        }
        ("map", _) => {
            let values = obj
                .get("values")
                .ok_or_else(|| "map needs values".to_string())?;
            Ok(FieldType::Map(Box::new(parse_type(values)?)))
        }
        ("array", _) => {
            let items = obj
                .get("items")
                .ok_or_else(|| "array needs items".to_string())?;
            Ok(FieldType::Array(Box::new(parse_type(items)?)))
        }
        (named, None) => parse_named(named),
        (named, Some(logical)) => Err(format!("unsupported logical type {} on {}", logical, named)),
    }
}

fn check(ty: &FieldType, value: &Value) -> Result<(), String> {
    let ok = match ty {
        FieldType::String => value.is_string(),
        FieldType::Int => value
            .as_i64()
            .is_some_and(|n| i32::try_from(n).is_ok()),
        FieldType::Long => value.is_i64() || value.is_u64(),
        FieldType::Double => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Decimal => {
            let s = value.as_str().ok_or("expected decimal string")?;
            Decimal::from_str(s).map_err(|_| format!("invalid decimal {:?}", s))?;
            true
        }
        FieldType::Timestamp => {
            let s = value.as_str().ok_or("expected timestamp string")?;
            DateTime::parse_from_rfc3339(s).map_err(|_| format!("invalid timestamp {:?}", s))?;
            true
        }
        FieldType::Enum { name, symbols } => {
            let s = value.as_str().ok_or("expected enum symbol")?;
            if !symbols.iter().any(|sym| sym == s) {
                return Err(format!("{:?} is not a {} symbol", s, name));
            }
            true
        }
        FieldType::Map(inner) => {
            let obj = value.as_object().ok_or("expected map")?;
            for (k, v) in obj {
                check(inner, v).map_err(|e| format!("[{}] {}", k, e))?;
            }
            true
        }
        FieldType::Array(inner) => {
            let items = value.as_array().ok_or("expected array")?;
            for (i, v) in items.iter().enumerate() {
                check(inner, v).map_err(|e| format!("[{}] {}", i, e))?;
            }
            true
        }
        FieldType::Optional(inner) => value.is_null() || check(inner, value).is_ok(),
    };

    if ok {
        Ok(())
    } else {
        Err(format!("expected {:?}, got {}", ty, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DEPOSIT: &str = r#"{
        "type": "record", "name": "Deposited", "namespace": "edalab.banking",
        "fields": [
            {"name": "event_id", "type": "string"},
            {"name": "amount", "type": {"type": "string", "logicalType": "decimal"}},
            {"name": "channel", "type": {"type": "enum", "name": "Channel", "symbols": ["GUICHET", "CARTE"]}},
            {"name": "metadata", "type": ["null", {"type": "map", "values": "string"}]}
        ]
    }"#;

    #[test]
    fn test_parse_record() {
        let schema = RecordSchema::parse(DEPOSIT).unwrap();
        assert_eq!(schema.full_name(), "edalab.banking.Deposited");
        assert_eq!(schema.fields.len(), 4);
        assert_eq!(schema.fields[1].ty, FieldType::Decimal);
        assert!(matches!(schema.fields[3].ty, FieldType::Optional(_)));
    }

    #[test]
    fn test_parse_rejects_non_record() {
        assert!(RecordSchema::parse(r#"{"type": "string"}"#).is_err());
        assert!(RecordSchema::parse("not json").is_err());
        assert!(RecordSchema::parse(r#"{"type": "record", "name": "X"}"#).is_err());
    }

    #[test]
    fn test_parse_rejects_wide_union() {
        let def = r#"{"type": "record", "name": "X",
            "fields": [{"name": "a", "type": ["null", "string", "long"]}]}"#;
        assert!(RecordSchema::parse(def).is_err());
    }

    #[test]
    fn test_parse_rejects_duplicate_fields() {
        let def = r#"{"type": "record", "name": "X",
            "fields": [{"name": "a", "type": "string"}, {"name": "a", "type": "long"}]}"#;
        assert!(RecordSchema::parse(def).is_err());
    }

    #[test]
    fn test_validate_conforming_payload() {
        let schema = RecordSchema::parse(DEPOSIT).unwrap();
        let payload = json!({"event_id": "e1", "amount": "12.50", "channel": "CARTE"});
        assert!(schema.validate(&payload).is_ok());

        let with_meta = json!({"event_id": "e1", "amount": "1", "channel": "GUICHET",
            "metadata": {"source": "test"}});
        assert!(schema.validate(&with_meta).is_ok());
    }

    #[test]
    fn test_validate_reports_problems() {
        let schema = RecordSchema::parse(DEPOSIT).unwrap();

        let missing = json!({"event_id": "e1", "channel": "CARTE"});
        assert!(schema.validate(&missing).unwrap_err().contains("amount"));

        let bad_decimal = json!({"event_id": "e1", "amount": "ten", "channel": "CARTE"});
        assert!(schema.validate(&bad_decimal).is_err());

        let bad_symbol = json!({"event_id": "e1", "amount": "1", "channel": "ATM"});
        assert!(schema.validate(&bad_symbol).is_err());

        let extra = json!({"event_id": "e1", "amount": "1", "channel": "CARTE", "x": 1});
        assert!(schema.validate(&extra).unwrap_err().contains("unexpected"));

        assert!(schema.validate(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_int_range() {
        assert!(check(&FieldType::Int, &json!(42)).is_ok());
        assert!(check(&FieldType::Int, &json!(1_i64 << 40)).is_err());
        assert!(check(&FieldType::Long, &json!(1_i64 << 40)).is_ok());
    }

    #[test]
    fn test_timestamp() {
        assert!(check(&FieldType::Timestamp, &json!("2024-05-01T10:00:00Z")).is_ok());
        assert!(check(&FieldType::Timestamp, &json!("yesterday")).is_err());
    }
}
