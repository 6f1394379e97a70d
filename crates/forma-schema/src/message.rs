//! Dynamic, descriptor-driven message instances.
//!
//! A [`DynamicMessage`] stores explicitly set field slots keyed by field
//! number; presence is slot existence. Setters validate the value shape
//! against the descriptor, so an instance can never hold a value its
//! descriptor does not describe.

use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::descriptor::{FieldDescriptor, FieldType, MessageRef, ScalarType};
use crate::error::{Result, SchemaError};

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Enum value by number.
    Enum(i32),
    Message(DynamicMessage),
    /// Repeated field payload.
    List(Vec<FieldValue>),
    /// Map field payload, in insertion order.
    Map(IndexMap<MapKey, FieldValue>),
}

/// Map keys: the integral/bool/string subset proto allows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapKey {
    Bool(bool),
    Int(i64),
    Uint(u64),
    String(String),
}

impl MapKey {
    /// Render the key the way proto JSON does (always a string).
    pub fn render(&self) -> String {
        match self {
            MapKey::Bool(b) => b.to_string(),
            MapKey::Int(n) => n.to_string(),
            MapKey::Uint(n) => n.to_string(),
            MapKey::String(s) => s.clone(),
        }
    }
}

/// A message instance bound to one descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicMessage {
    descriptor: MessageRef,
    fields: BTreeMap<u32, FieldValue>,
}

impl DynamicMessage {
    pub fn new(descriptor: MessageRef) -> Self {
        Self {
            descriptor,
            fields: BTreeMap::new(),
        }
    }

    pub fn descriptor(&self) -> &MessageRef {
        &self.descriptor
    }

    /// Set a field by name after validating the value against the field's
    /// declared type.
    pub fn set_field(&mut self, name: &str, value: FieldValue) -> Result<()> {
        let field = self
            .descriptor
            .field(name)
            .ok_or_else(|| SchemaError::UnknownField {
                field: name.to_string(),
                message_type: self.descriptor.full_name.clone(),
            })?;
        check_field_value(field, &value, &self.descriptor.full_name)?;
        self.fields.insert(field.number, value);
        Ok(())
    }

    /// Set a field by number without a name lookup. Used by decoders that
    /// already hold the field descriptor.
    pub fn set_field_by_number(&mut self, number: u32, value: FieldValue) -> Result<()> {
        let field = self.descriptor.field_by_number(number).ok_or_else(|| {
            SchemaError::UnknownField {
                field: format!("#{number}"),
                message_type: self.descriptor.full_name.clone(),
            }
        })?;
        check_field_value(field, &value, &self.descriptor.full_name)?;
        self.fields.insert(number, value);
        Ok(())
    }

    /// Value of a set field, by name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        let field = self.descriptor.field(name)?;
        self.fields.get(&field.number)
    }

    pub fn get_by_number(&self, number: u32) -> Option<&FieldValue> {
        self.fields.get(&number)
    }

    pub fn is_set(&self, number: u32) -> bool {
        self.fields.contains_key(&number)
    }

    /// Set slots in ascending field-number order.
    pub fn set_fields(&self) -> impl Iterator<Item = (u32, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (*n, v))
    }

    /// Default value for an unset scalar/enum field.
    pub fn default_value(field: &FieldDescriptor) -> Option<FieldValue> {
        match &field.field_type {
            FieldType::Scalar(s) => Some(scalar_default(*s)),
            FieldType::Enum(_) => Some(FieldValue::Enum(0)),
            FieldType::Message(_) | FieldType::Map { .. } => None,
        }
    }
}

fn scalar_default(scalar: ScalarType) -> FieldValue {
    match scalar {
        ScalarType::Double => FieldValue::F64(0.0),
        ScalarType::Float => FieldValue::F32(0.0),
        ScalarType::Int32 | ScalarType::SInt32 | ScalarType::SFixed32 => FieldValue::I32(0),
        ScalarType::Int64 | ScalarType::SInt64 | ScalarType::SFixed64 => FieldValue::I64(0),
        ScalarType::UInt32 | ScalarType::Fixed32 => FieldValue::U32(0),
        ScalarType::UInt64 | ScalarType::Fixed64 => FieldValue::U64(0),
        ScalarType::Bool => FieldValue::Bool(false),
        ScalarType::String => FieldValue::String(String::new()),
        ScalarType::Bytes => FieldValue::Bytes(Vec::new()),
    }
}

/// Validate a value against a field's declared type and cardinality.
fn check_field_value(
    field: &FieldDescriptor,
    value: &FieldValue,
    message_type: &str,
) -> Result<()> {
    let mismatch = |detail: String| SchemaError::TypeMismatch {
        field: field.name.clone(),
        message_type: message_type.to_string(),
        detail,
    };

    if field.is_repeated() {
        let FieldValue::List(items) = value else {
            return Err(mismatch(format!(
                "expected a repeated value, got {}",
                value_kind(value)
            )));
        };
        for item in items {
            check_element(&field.field_type, item)
                .map_err(|detail| mismatch(detail))?;
        }
        return Ok(());
    }

    if let FieldType::Map { key, value: value_type } = &field.field_type {
        let FieldValue::Map(entries) = value else {
            return Err(mismatch(format!(
                "expected a map value, got {}",
                value_kind(value)
            )));
        };
        for (map_key, map_value) in entries {
            check_map_key(*key, map_key).map_err(|detail| mismatch(detail))?;
            check_element(value_type, map_value).map_err(|detail| mismatch(detail))?;
        }
        return Ok(());
    }

    check_element(&field.field_type, value).map_err(|detail| mismatch(detail))
}

/// Validate a single (non-repeated) element. Returns a description of the
/// mismatch on failure.
fn check_element(field_type: &FieldType, value: &FieldValue) -> std::result::Result<(), String> {
    let ok = match (field_type, value) {
        (FieldType::Scalar(ScalarType::Double), FieldValue::F64(_)) => true,
        (FieldType::Scalar(ScalarType::Float), FieldValue::F32(_)) => true,
        (
            FieldType::Scalar(
                ScalarType::Int32 | ScalarType::SInt32 | ScalarType::SFixed32,
            ),
            FieldValue::I32(_),
        ) => true,
        (
            FieldType::Scalar(
                ScalarType::Int64 | ScalarType::SInt64 | ScalarType::SFixed64,
            ),
            FieldValue::I64(_),
        ) => true,
        (
            FieldType::Scalar(ScalarType::UInt32 | ScalarType::Fixed32),
            FieldValue::U32(_),
        ) => true,
        (
            FieldType::Scalar(ScalarType::UInt64 | ScalarType::Fixed64),
            FieldValue::U64(_),
        ) => true,
        (FieldType::Scalar(ScalarType::Bool), FieldValue::Bool(_)) => true,
        (FieldType::Scalar(ScalarType::String), FieldValue::String(_)) => true,
        (FieldType::Scalar(ScalarType::Bytes), FieldValue::Bytes(_)) => true,
        (FieldType::Enum(_), FieldValue::Enum(_)) => true,
        (FieldType::Message(expected), FieldValue::Message(m)) => {
            if m.descriptor().full_name == *expected {
                true
            } else {
                return Err(format!(
                    "expected message `{expected}`, got `{}`",
                    m.descriptor().full_name
                ));
            }
        }
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(format!(
            "expected {}, got {}",
            field_type.describe(),
            value_kind(value)
        ))
    }
}

fn check_map_key(expected: ScalarType, key: &MapKey) -> std::result::Result<(), String> {
    let ok = match (expected, key) {
        (ScalarType::Bool, MapKey::Bool(_)) => true,
        (
            ScalarType::Int32 | ScalarType::Int64 | ScalarType::SInt32 | ScalarType::SInt64
            | ScalarType::SFixed32 | ScalarType::SFixed64,
            MapKey::Int(_),
        ) => true,
        (
            ScalarType::UInt32 | ScalarType::UInt64 | ScalarType::Fixed32 | ScalarType::Fixed64,
            MapKey::Uint(_),
        ) => true,
        (ScalarType::String, MapKey::String(_)) => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(format!(
            "map key {:?} does not match key type {}",
            key,
            expected.name()
        ))
    }
}

fn value_kind(value: &FieldValue) -> &'static str {
    match value {
        FieldValue::Bool(_) => "bool",
        FieldValue::I32(_) => "int32",
        FieldValue::I64(_) => "int64",
        FieldValue::U32(_) => "uint32",
        FieldValue::U64(_) => "uint64",
        FieldValue::F32(_) => "float",
        FieldValue::F64(_) => "double",
        FieldValue::String(_) => "string",
        FieldValue::Bytes(_) => "bytes",
        FieldValue::Enum(_) => "enum",
        FieldValue::Message(_) => "message",
        FieldValue::List(_) => "repeated",
        FieldValue::Map(_) => "map",
    }
}
