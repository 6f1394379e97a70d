//! Canonical JSON rendering and parsing for dynamic messages.
//!
//! Rendering follows the upstream proto-JSON conventions the rest of the
//! pipeline depends on: declared field names (not camelCase), 64-bit
//! integers as decimal strings, bytes as standard base64, enum values by
//! symbol, values equal to their default omitted, and `google.protobuf.Any`
//! expanded inline with `@type` first. The parser is the exact inverse and
//! is what gives emitted files their round-trip guarantee.

use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde_json::{Map, Number, Value as Json};

use crate::descriptor::{FieldDescriptor, FieldType, MessageRef, ScalarType};
use crate::error::{Result, SchemaError};
use crate::message::{DynamicMessage, FieldValue, MapKey};
use crate::registry::{TypeRegistry, ANY_TYPE};
use crate::wire;

/// Render a message as a JSON value.
pub fn to_json(msg: &DynamicMessage, registry: &TypeRegistry) -> Result<Json> {
    if msg.descriptor().full_name == ANY_TYPE {
        return any_to_json(msg, registry);
    }
    let mut out = Map::new();
    for field in &msg.descriptor().fields {
        let Some(value) = msg.get_by_number(field.number) else {
            continue;
        };
        if is_default(field, value) {
            continue;
        }
        out.insert(
            field.name.clone(),
            field_to_json(field, value, registry)?,
        );
    }
    Ok(Json::Object(out))
}

/// Expand an `Any` into `{"@type": ..., <payload fields>}` using the
/// registry as type resolver.
fn any_to_json(msg: &DynamicMessage, registry: &TypeRegistry) -> Result<Json> {
    let type_url = match msg.get("type_url") {
        Some(FieldValue::String(url)) => url.clone(),
        _ => {
            return Err(SchemaError::Marshal(
                "Any value without a type_url".to_string(),
            ));
        }
    };
    let bytes = match msg.get("value") {
        Some(FieldValue::Bytes(b)) => b.clone(),
        None => Vec::new(),
        _ => {
            return Err(SchemaError::Marshal(
                "Any value field holds a non-bytes value".to_string(),
            ));
        }
    };
    let payload_descriptor = registry.resolve_type_url(&type_url)?;
    let payload = wire::decode(payload_descriptor, registry, &bytes)?;
    let rendered = to_json(&payload, registry)?;
    let Json::Object(fields) = rendered else {
        return Err(SchemaError::Marshal("Any payload is not an object".into()));
    };
    let mut out = Map::new();
    out.insert("@type".to_string(), Json::String(type_url));
    out.extend(fields);
    Ok(Json::Object(out))
}

fn is_default(field: &FieldDescriptor, value: &FieldValue) -> bool {
    if field.is_repeated() {
        return matches!(value, FieldValue::List(items) if items.is_empty());
    }
    if field.is_map() {
        return matches!(value, FieldValue::Map(entries) if entries.is_empty());
    }
    match value {
        FieldValue::Bool(b) => !b,
        FieldValue::I32(n) => *n == 0,
        FieldValue::I64(n) => *n == 0,
        FieldValue::U32(n) => *n == 0,
        FieldValue::U64(n) => *n == 0,
        FieldValue::F32(x) => *x == 0.0,
        FieldValue::F64(x) => *x == 0.0,
        FieldValue::String(s) => s.is_empty(),
        FieldValue::Bytes(b) => b.is_empty(),
        FieldValue::Enum(n) => *n == 0,
        // A set submessage renders even when empty.
        FieldValue::Message(_) => false,
        FieldValue::List(_) | FieldValue::Map(_) => false,
    }
}

fn field_to_json(
    field: &FieldDescriptor,
    value: &FieldValue,
    registry: &TypeRegistry,
) -> Result<Json> {
    if let FieldType::Map { value: value_type, .. } = &field.field_type {
        let FieldValue::Map(entries) = value else {
            return Err(SchemaError::Marshal(format!(
                "map field `{}` holds a non-map value",
                field.name
            )));
        };
        let mut out = Map::new();
        for (key, entry) in entries {
            out.insert(key.render(), element_to_json(value_type, entry, registry)?);
        }
        return Ok(Json::Object(out));
    }
    if field.is_repeated() {
        let FieldValue::List(items) = value else {
            return Err(SchemaError::Marshal(format!(
                "repeated field `{}` holds a non-list value",
                field.name
            )));
        };
        let rendered = items
            .iter()
            .map(|item| element_to_json(&field.field_type, item, registry))
            .collect::<Result<Vec<_>>>()?;
        return Ok(Json::Array(rendered));
    }
    element_to_json(&field.field_type, value, registry)
}

fn element_to_json(
    field_type: &FieldType,
    value: &FieldValue,
    registry: &TypeRegistry,
) -> Result<Json> {
    Ok(match value {
        FieldValue::Bool(b) => Json::Bool(*b),
        FieldValue::I32(n) => Json::Number((*n).into()),
        FieldValue::U32(n) => Json::Number((*n).into()),
        // 64-bit integers render as strings, matching proto JSON.
        FieldValue::I64(n) => Json::String(n.to_string()),
        FieldValue::U64(n) => Json::String(n.to_string()),
        FieldValue::F32(x) => float_to_json(*x as f64)?,
        FieldValue::F64(x) => float_to_json(*x)?,
        FieldValue::String(s) => Json::String(s.clone()),
        FieldValue::Bytes(b) => Json::String(BASE64_STANDARD.encode(b)),
        FieldValue::Enum(n) => match field_type {
            FieldType::Enum(name) => match registry.enum_type(name)?.symbol(*n) {
                Some(symbol) => Json::String(symbol.to_string()),
                None => Json::Number((*n).into()),
            },
            _ => Json::Number((*n).into()),
        },
        FieldValue::Message(m) => to_json(m, registry)?,
        FieldValue::List(_) | FieldValue::Map(_) => {
            return Err(SchemaError::Marshal(
                "nested repeated/map value outside its field".to_string(),
            ));
        }
    })
}

fn float_to_json(x: f64) -> Result<Json> {
    if x.is_finite() {
        Ok(Json::Number(Number::from_f64(x).ok_or_else(|| {
            SchemaError::Marshal(format!("unrepresentable float {x}"))
        })?))
    } else if x.is_nan() {
        Ok(Json::String("NaN".to_string()))
    } else if x > 0.0 {
        Ok(Json::String("Infinity".to_string()))
    } else {
        Ok(Json::String("-Infinity".to_string()))
    }
}

/// Parse a JSON value back into a message of the given descriptor. The
/// inverse of [`to_json`]; unknown keys are rejected.
pub fn from_json(
    descriptor: MessageRef,
    registry: &TypeRegistry,
    json: &Json,
) -> Result<DynamicMessage> {
    let Json::Object(object) = json else {
        return Err(SchemaError::Marshal(format!(
            "expected an object for `{}`",
            descriptor.full_name
        )));
    };

    if descriptor.full_name == ANY_TYPE {
        return any_from_json(registry, object);
    }

    let mut msg = DynamicMessage::new(descriptor.clone());
    for (key, value) in object {
        let field = descriptor
            .field(key)
            .ok_or_else(|| SchemaError::UnknownField {
                field: key.clone(),
                message_type: descriptor.full_name.clone(),
            })?;
        let parsed = field_from_json(field, value, registry)?;
        msg.set_field_by_number(field.number, parsed)?;
    }
    Ok(msg)
}

fn any_from_json(registry: &TypeRegistry, object: &Map<String, Json>) -> Result<DynamicMessage> {
    let Some(Json::String(type_url)) = object.get("@type") else {
        return Err(SchemaError::Marshal("Any object without @type".to_string()));
    };
    let payload_descriptor = registry.resolve_type_url(type_url)?;
    let mut payload_fields = object.clone();
    payload_fields.remove("@type");
    let payload = from_json(
        payload_descriptor,
        registry,
        &Json::Object(payload_fields),
    )?;
    let bytes = wire::encode(&payload)?;

    let mut any = DynamicMessage::new(registry.message(ANY_TYPE)?);
    any.set_field("type_url", FieldValue::String(type_url.clone()))?;
    any.set_field("value", FieldValue::Bytes(bytes))?;
    Ok(any)
}

fn field_from_json(
    field: &FieldDescriptor,
    json: &Json,
    registry: &TypeRegistry,
) -> Result<FieldValue> {
    if let FieldType::Map { key, value: value_type } = &field.field_type {
        let Json::Object(entries) = json else {
            return Err(SchemaError::Marshal(format!(
                "map field `{}` expects an object",
                field.name
            )));
        };
        let mut out = indexmap::IndexMap::new();
        for (raw_key, raw_value) in entries {
            let map_key = parse_map_key(*key, raw_key)?;
            let value = element_from_json(value_type, raw_value, registry)?;
            out.insert(map_key, value);
        }
        return Ok(FieldValue::Map(out));
    }
    if field.is_repeated() {
        let Json::Array(items) = json else {
            return Err(SchemaError::Marshal(format!(
                "repeated field `{}` expects an array",
                field.name
            )));
        };
        let parsed = items
            .iter()
            .map(|item| element_from_json(&field.field_type, item, registry))
            .collect::<Result<Vec<_>>>()?;
        return Ok(FieldValue::List(parsed));
    }
    element_from_json(&field.field_type, json, registry)
}

fn element_from_json(
    field_type: &FieldType,
    json: &Json,
    registry: &TypeRegistry,
) -> Result<FieldValue> {
    let bad = |expected: &str| {
        SchemaError::Marshal(format!("expected {expected}, got {json}"))
    };
    Ok(match field_type {
        FieldType::Message(name) => {
            FieldValue::Message(from_json(registry.message(name)?, registry, json)?)
        }
        FieldType::Enum(name) => match json {
            Json::String(symbol) => {
                let number = registry
                    .enum_type(name)?
                    .number(symbol)
                    .ok_or_else(|| {
                        SchemaError::Marshal(format!("unknown enum symbol `{symbol}` for {name}"))
                    })?;
                FieldValue::Enum(number)
            }
            Json::Number(n) => {
                FieldValue::Enum(n.as_i64().ok_or_else(|| bad("enum number"))? as i32)
            }
            _ => return Err(bad("enum symbol or number")),
        },
        FieldType::Scalar(scalar) => scalar_from_json(*scalar, json)?,
        FieldType::Map { .. } => return Err(bad("non-map element")),
    })
}

fn scalar_from_json(scalar: ScalarType, json: &Json) -> Result<FieldValue> {
    let bad = |expected: &str| {
        SchemaError::Marshal(format!("expected {expected}, got {json}"))
    };
    let as_i64 = |json: &Json| -> Result<i64> {
        match json {
            Json::Number(n) => n.as_i64().ok_or_else(|| bad("integer")),
            Json::String(s) => s.parse::<i64>().map_err(|_| bad("integer")),
            _ => Err(bad("integer")),
        }
    };
    let as_u64 = |json: &Json| -> Result<u64> {
        match json {
            Json::Number(n) => n.as_u64().ok_or_else(|| bad("unsigned integer")),
            Json::String(s) => s.parse::<u64>().map_err(|_| bad("unsigned integer")),
            _ => Err(bad("unsigned integer")),
        }
    };
    let as_f64 = |json: &Json| -> Result<f64> {
        match json {
            Json::Number(n) => n.as_f64().ok_or_else(|| bad("number")),
            Json::String(s) => match s.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                other => other.parse::<f64>().map_err(|_| bad("number")),
            },
            _ => Err(bad("number")),
        }
    };

    Ok(match scalar {
        ScalarType::Bool => match json {
            Json::Bool(b) => FieldValue::Bool(*b),
            _ => return Err(bad("bool")),
        },
        ScalarType::Int32 | ScalarType::SInt32 | ScalarType::SFixed32 => {
            let n = as_i64(json)?;
            FieldValue::I32(
                i32::try_from(n).map_err(|_| bad("32-bit integer"))?,
            )
        }
        ScalarType::Int64 | ScalarType::SInt64 | ScalarType::SFixed64 => {
            FieldValue::I64(as_i64(json)?)
        }
        ScalarType::UInt32 | ScalarType::Fixed32 => {
            let n = as_u64(json)?;
            FieldValue::U32(
                u32::try_from(n).map_err(|_| bad("32-bit unsigned integer"))?,
            )
        }
        ScalarType::UInt64 | ScalarType::Fixed64 => FieldValue::U64(as_u64(json)?),
        ScalarType::Float => FieldValue::F32(as_f64(json)? as f32),
        ScalarType::Double => FieldValue::F64(as_f64(json)?),
        ScalarType::String => match json {
            Json::String(s) => FieldValue::String(s.clone()),
            _ => return Err(bad("string")),
        },
        ScalarType::Bytes => match json {
            Json::String(s) => FieldValue::Bytes(
                BASE64_STANDARD
                    .decode(s)
                    .map_err(|_| bad("base64 bytes"))?,
            ),
            _ => return Err(bad("base64 bytes")),
        },
    })
}

fn parse_map_key(key_type: ScalarType, raw: &str) -> Result<MapKey> {
    let bad = || SchemaError::Marshal(format!("invalid map key {raw:?}"));
    Ok(match key_type {
        ScalarType::Bool => match raw {
            "true" => MapKey::Bool(true),
            "false" => MapKey::Bool(false),
            _ => return Err(bad()),
        },
        ScalarType::String => MapKey::String(raw.to_string()),
        ScalarType::UInt32 | ScalarType::UInt64 | ScalarType::Fixed32 | ScalarType::Fixed64 => {
            MapKey::Uint(raw.parse().map_err(|_| bad())?)
        }
        _ => MapKey::Int(raw.parse().map_err(|_| bad())?),
    })
}
