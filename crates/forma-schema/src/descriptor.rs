//! Parsed, resolved schema descriptors.
//!
//! Message fields reference other message and enum types *by full name*;
//! the [`TypeRegistry`](crate::registry::TypeRegistry) resolves those names
//! at use time. That keeps descriptors acyclic even for recursive message
//! types.

use std::rc::Rc;

/// Prefix used when forming type URLs for the self-describing container.
pub const TYPE_URL_PREFIX: &str = "type.googleapis.com";

/// Scalar field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int64,
    UInt32,
    UInt64,
    SInt32,
    SInt64,
    Fixed32,
    Fixed64,
    SFixed32,
    SFixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarType {
    /// Recognize a scalar type keyword.
    pub fn from_name(name: &str) -> Option<ScalarType> {
        Some(match name {
            "double" => ScalarType::Double,
            "float" => ScalarType::Float,
            "int32" => ScalarType::Int32,
            "int64" => ScalarType::Int64,
            "uint32" => ScalarType::UInt32,
            "uint64" => ScalarType::UInt64,
            "sint32" => ScalarType::SInt32,
            "sint64" => ScalarType::SInt64,
            "fixed32" => ScalarType::Fixed32,
            "fixed64" => ScalarType::Fixed64,
            "sfixed32" => ScalarType::SFixed32,
            "sfixed64" => ScalarType::SFixed64,
            "bool" => ScalarType::Bool,
            "string" => ScalarType::String,
            "bytes" => ScalarType::Bytes,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Double => "double",
            ScalarType::Float => "float",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::UInt32 => "uint32",
            ScalarType::UInt64 => "uint64",
            ScalarType::SInt32 => "sint32",
            ScalarType::SInt64 => "sint64",
            ScalarType::Fixed32 => "fixed32",
            ScalarType::Fixed64 => "fixed64",
            ScalarType::SFixed32 => "sfixed32",
            ScalarType::SFixed64 => "sfixed64",
            ScalarType::Bool => "bool",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
        }
    }

    /// Valid as a map key type.
    pub fn valid_map_key(self) -> bool {
        !matches!(
            self,
            ScalarType::Double | ScalarType::Float | ScalarType::Bytes
        )
    }
}

/// Resolved type of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Scalar(ScalarType),
    /// Full name of a message type, resolvable through the registry.
    Message(String),
    /// Full name of an enum type.
    Enum(String),
    /// `map<key, value>` field.
    Map {
        key: ScalarType,
        value: Box<FieldType>,
    },
}

impl FieldType {
    pub fn describe(&self) -> String {
        match self {
            FieldType::Scalar(s) => s.name().to_string(),
            FieldType::Message(name) | FieldType::Enum(name) => name.clone(),
            FieldType::Map { key, value } => {
                format!("map<{}, {}>", key.name(), value.describe())
            }
        }
    }
}

/// Field cardinality. Map fields are carried in [`FieldType::Map`] and are
/// always `Singular` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Singular,
    Optional,
    Repeated,
}

/// One field of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub number: u32,
    pub cardinality: Cardinality,
    pub field_type: FieldType,
}

impl FieldDescriptor {
    pub fn is_repeated(&self) -> bool {
        self.cardinality == Cardinality::Repeated
    }

    pub fn is_map(&self) -> bool {
        matches!(self.field_type, FieldType::Map { .. })
    }
}

/// A resolved message type.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDescriptor {
    /// Dotted full name, e.g. `pkg.Outer.Inner`.
    pub full_name: String,
    /// Short name, e.g. `Inner`.
    pub name: String,
    /// Schema file this type was declared in (root-relative path).
    pub file: String,
    /// Fields in declaration order.
    pub fields: Vec<FieldDescriptor>,
    /// Full names of directly nested message types, in declaration order.
    pub nested_messages: Vec<String>,
    /// Full names of directly nested enum types.
    pub nested_enums: Vec<String>,
}

impl MessageDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_number(&self, number: u32) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.number == number)
    }

    /// `type.googleapis.com/<full_name>`.
    pub fn type_url(&self) -> String {
        format!("{TYPE_URL_PREFIX}/{}", self.full_name)
    }

    /// Short name of a nested message, given its full name.
    pub fn nested_short_name(full_name: &str) -> &str {
        full_name.rsplit('.').next().unwrap_or(full_name)
    }
}

/// A resolved enum type.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDescriptor {
    pub full_name: String,
    pub name: String,
    pub file: String,
    /// `(symbol, number)` pairs in declaration order. Aliases are allowed,
    /// so numbers may repeat.
    pub values: Vec<(String, i32)>,
}

impl EnumDescriptor {
    /// Number for a symbolic name.
    pub fn number(&self, symbol: &str) -> Option<i32> {
        self.values
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, n)| *n)
    }

    /// First symbol declared with the given number.
    pub fn symbol(&self, number: i32) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, n)| *n == number)
            .map(|(s, _)| s.as_str())
    }
}

/// Shared handle types used throughout the crate.
pub type MessageRef = Rc<MessageDescriptor>;
pub type EnumRef = Rc<EnumDescriptor>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_names_round_trip() {
        for name in [
            "double", "float", "int32", "int64", "uint32", "uint64", "sint32", "sint64",
            "fixed32", "fixed64", "sfixed32", "sfixed64", "bool", "string", "bytes",
        ] {
            let scalar = ScalarType::from_name(name).unwrap();
            assert_eq!(scalar.name(), name);
        }
        assert!(ScalarType::from_name("varint").is_none());
    }

    #[test]
    fn test_map_key_validity() {
        assert!(ScalarType::String.valid_map_key());
        assert!(ScalarType::Int64.valid_map_key());
        assert!(!ScalarType::Double.valid_map_key());
        assert!(!ScalarType::Bytes.valid_map_key());
    }

    #[test]
    fn test_type_url() {
        let desc = MessageDescriptor {
            full_name: "demo.Hello".to_string(),
            name: "Hello".to_string(),
            file: "demo.proto".to_string(),
            fields: Vec::new(),
            nested_messages: Vec::new(),
            nested_enums: Vec::new(),
        };
        assert_eq!(desc.type_url(), "type.googleapis.com/demo.Hello");
    }
}
