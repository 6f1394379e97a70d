//! Type registry: full-name → descriptor maps, the per-file index, and
//! type-URL resolution for the self-describing container.
//!
//! Field type names are resolved while a file is ingested, using C++-style
//! scoping: a relative name is tried against every enclosing scope from the
//! innermost message outward, then the package, then the root. A leading
//! dot forces fully qualified lookup.

use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use crate::descriptor::{
    Cardinality, EnumDescriptor, EnumRef, FieldDescriptor, FieldType, MessageDescriptor,
    MessageRef, ScalarType,
};
use crate::error::{Result, SchemaError};
use crate::parser::{RawEnum, RawFile, RawLabel, RawMessage, RawType};

/// File name under which the well-known `Any` type is registered.
pub const ANY_FILE: &str = "google/protobuf/any.proto";
/// Full name of the well-known `Any` type.
pub const ANY_TYPE: &str = "google.protobuf.Any";

/// Registry of every descriptor known to one compilation.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    messages: IndexMap<String, MessageRef>,
    enums: IndexMap<String, EnumRef>,
    /// file name → full names of its top-level messages, in order.
    files: IndexMap<String, Vec<String>>,
}

impl TypeRegistry {
    /// An empty registry with the well-known `Any` type pre-registered.
    pub fn new() -> Self {
        let mut registry = TypeRegistry::default();
        let any = MessageDescriptor {
            full_name: ANY_TYPE.to_string(),
            name: "Any".to_string(),
            file: ANY_FILE.to_string(),
            fields: vec![
                FieldDescriptor {
                    name: "type_url".to_string(),
                    number: 1,
                    cardinality: Cardinality::Singular,
                    field_type: FieldType::Scalar(ScalarType::String),
                },
                FieldDescriptor {
                    name: "value".to_string(),
                    number: 2,
                    cardinality: Cardinality::Singular,
                    field_type: FieldType::Scalar(ScalarType::Bytes),
                },
            ],
            nested_messages: Vec::new(),
            nested_enums: Vec::new(),
        };
        registry
            .messages
            .insert(ANY_TYPE.to_string(), Rc::new(any));
        registry
            .files
            .insert(ANY_FILE.to_string(), vec![ANY_TYPE.to_string()]);
        registry
    }

    /// Whether a schema file has already been ingested.
    pub fn has_file(&self, file: &str) -> bool {
        self.files.contains_key(file)
    }

    /// Full names of a file's top-level messages, in declaration order.
    pub fn file_messages(&self, file: &str) -> &[String] {
        self.files.get(file).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Look up a message descriptor by full name.
    pub fn message(&self, full_name: &str) -> Result<MessageRef> {
        self.messages
            .get(full_name)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownType(full_name.to_string()))
    }

    /// Look up an enum descriptor by full name.
    pub fn enum_type(&self, full_name: &str) -> Result<EnumRef> {
        self.enums
            .get(full_name)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownType(full_name.to_string()))
    }

    /// Resolve a `type.googleapis.com/<full_name>` URL to a descriptor.
    pub fn resolve_type_url(&self, url: &str) -> Result<MessageRef> {
        let full_name = url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SchemaError::UnknownTypeUrl(url.to_string()))?;
        self.messages
            .get(full_name)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownTypeUrl(url.to_string()))
    }

    /// Register every type declared by a parsed file. Imports named by the
    /// file must already be ingested.
    pub fn ingest_file(&mut self, raw: &RawFile, file: &str) -> Result<()> {
        if self.has_file(file) {
            return Ok(());
        }
        let package = raw.package.clone().unwrap_or_default();

        // Pass 1: declare every message and enum name so that resolution
        // sees forward references and recursive types.
        let mut declared = Declarations::default();
        for message in &raw.messages {
            declare_message(message, &package, &mut declared)?;
        }
        for raw_enum in &raw.enums {
            declare_enum(raw_enum, &package, &mut declared)?;
        }
        for name in declared.messages.iter().chain(declared.enums.iter()) {
            if self.messages.contains_key(name) || self.enums.contains_key(name) {
                return Err(SchemaError::DuplicateType(name.clone()));
            }
        }

        // Pass 2: resolve field types and build descriptors.
        let mut built: Vec<MessageDescriptor> = Vec::new();
        for message in &raw.messages {
            self.build_message(message, &package, file, &declared, &mut built)?;
        }

        let top_level: Vec<String> = raw
            .messages
            .iter()
            .map(|m| qualify(&package, &m.name))
            .collect();
        for descriptor in built {
            self.messages
                .insert(descriptor.full_name.clone(), Rc::new(descriptor));
        }
        for (full_name, raw_enum) in collect_enums(raw, &package) {
            let descriptor = EnumDescriptor {
                name: raw_enum.name.clone(),
                full_name: full_name.clone(),
                file: file.to_string(),
                values: raw_enum.values.clone(),
            };
            self.enums.insert(full_name, Rc::new(descriptor));
        }
        self.files.insert(file.to_string(), top_level);
        Ok(())
    }

    fn build_message(
        &self,
        raw: &RawMessage,
        scope: &str,
        file: &str,
        declared: &Declarations,
        out: &mut Vec<MessageDescriptor>,
    ) -> Result<()> {
        let full_name = qualify(scope, &raw.name);

        let mut fields = Vec::with_capacity(raw.fields.len());
        for field in &raw.fields {
            if raw.fields.iter().filter(|f| f.name == field.name).count() > 1 {
                return Err(SchemaError::Parse {
                    file: file.to_string(),
                    line: 0,
                    col: 0,
                    message: format!("duplicate field name `{}` in `{full_name}`", field.name),
                });
            }
            if raw
                .fields
                .iter()
                .filter(|f| f.number == field.number)
                .count()
                > 1
            {
                return Err(SchemaError::Parse {
                    file: file.to_string(),
                    line: 0,
                    col: 0,
                    message: format!(
                        "duplicate field number {} in `{full_name}`",
                        field.number
                    ),
                });
            }

            let (field_type, cardinality) = match &field.field_type {
                RawType::Named(name) => {
                    let resolved = self.resolve_type(name, &full_name, declared)?;
                    let cardinality = match field.label {
                        RawLabel::Singular => Cardinality::Singular,
                        RawLabel::Optional => Cardinality::Optional,
                        RawLabel::Repeated => Cardinality::Repeated,
                    };
                    (resolved, cardinality)
                }
                RawType::Map { key, value } => {
                    let key_type = ScalarType::from_name(key)
                        .filter(|k| k.valid_map_key())
                        .ok_or_else(|| SchemaError::Parse {
                            file: file.to_string(),
                            line: 0,
                            col: 0,
                            message: format!(
                                "invalid map key type `{key}` for field `{}`",
                                field.name
                            ),
                        })?;
                    let value_type = self.resolve_type(value, &full_name, declared)?;
                    (
                        FieldType::Map {
                            key: key_type,
                            value: Box::new(value_type),
                        },
                        Cardinality::Singular,
                    )
                }
            };
            fields.push(FieldDescriptor {
                name: field.name.clone(),
                number: field.number,
                cardinality,
                field_type,
            });
        }

        let nested_messages: Vec<String> = raw
            .messages
            .iter()
            .map(|m| qualify(&full_name, &m.name))
            .collect();
        let nested_enums: Vec<String> = raw
            .enums
            .iter()
            .map(|e| qualify(&full_name, &e.name))
            .collect();

        for nested in &raw.messages {
            self.build_message(nested, &full_name, file, declared, out)?;
        }

        out.push(MessageDescriptor {
            name: raw.name.clone(),
            full_name,
            file: file.to_string(),
            fields,
            nested_messages,
            nested_enums,
        });
        Ok(())
    }

    /// Resolve a type name written in `scope` (a message full name). The
    /// scope walk covers the package implicitly, since message full names
    /// start with it.
    fn resolve_type(
        &self,
        name: &str,
        scope: &str,
        declared: &Declarations,
    ) -> Result<FieldType> {
        if !name.contains('.') {
            if let Some(scalar) = ScalarType::from_name(name) {
                return Ok(FieldType::Scalar(scalar));
            }
        }

        let lookup = |candidate: &str| -> Option<FieldType> {
            if declared.messages.contains(candidate) || self.messages.contains_key(candidate)
            {
                Some(FieldType::Message(candidate.to_string()))
            } else if declared.enums.contains(candidate) || self.enums.contains_key(candidate)
            {
                Some(FieldType::Enum(candidate.to_string()))
            } else {
                None
            }
        };

        if let Some(absolute) = name.strip_prefix('.') {
            return lookup(absolute).ok_or_else(|| SchemaError::UnresolvedType {
                name: name.to_string(),
                scope: scope.to_string(),
            });
        }

        // Walk enclosing scopes from innermost to root.
        let mut current = scope.to_string();
        loop {
            let candidate = qualify(&current, name);
            if let Some(found) = lookup(&candidate) {
                return Ok(found);
            }
            match current.rfind('.') {
                Some(idx) => current.truncate(idx),
                None if !current.is_empty() => current.clear(),
                None => break,
            }
        }
        Err(SchemaError::UnresolvedType {
            name: name.to_string(),
            scope: scope.to_string(),
        })
    }
}

/// Names declared by the file currently being ingested.
#[derive(Debug, Default)]
struct Declarations {
    messages: IndexSet<String>,
    enums: IndexSet<String>,
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}

fn declare_message(
    raw: &RawMessage,
    scope: &str,
    declared: &mut Declarations,
) -> Result<()> {
    let full = qualify(scope, &raw.name);
    if !declared.messages.insert(full.clone()) {
        return Err(SchemaError::DuplicateType(full));
    }
    for nested in &raw.messages {
        declare_message(nested, &full, declared)?;
    }
    for nested in &raw.enums {
        declare_enum(nested, &full, declared)?;
    }
    Ok(())
}

fn declare_enum(raw: &RawEnum, scope: &str, declared: &mut Declarations) -> Result<()> {
    let full = qualify(scope, &raw.name);
    if !declared.enums.insert(full.clone()) {
        return Err(SchemaError::DuplicateType(full));
    }
    Ok(())
}

/// Flatten `(full_name, raw_enum)` pairs for a file.
fn collect_enums<'a>(raw: &'a RawFile, package: &str) -> Vec<(String, &'a RawEnum)> {
    fn walk<'a>(
        message: &'a RawMessage,
        scope: &str,
        out: &mut Vec<(String, &'a RawEnum)>,
    ) {
        let full = qualify(scope, &message.name);
        for raw_enum in &message.enums {
            out.push((qualify(&full, &raw_enum.name), raw_enum));
        }
        for nested in &message.messages {
            walk(nested, &full, out);
        }
    }
    let mut out = Vec::new();
    for raw_enum in &raw.enums {
        out.push((qualify(package, &raw_enum.name), raw_enum));
    }
    for message in &raw.messages {
        walk(message, package, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_file;

    fn ingest(source: &str, file: &str) -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        let raw = parse_file(source, file).unwrap();
        registry.ingest_file(&raw, file).unwrap();
        registry
    }

    #[test]
    fn test_any_is_preregistered() {
        let registry = TypeRegistry::new();
        assert!(registry.has_file(ANY_FILE));
        let any = registry.message(ANY_TYPE).unwrap();
        assert_eq!(any.field("type_url").unwrap().number, 1);
        assert_eq!(any.field("value").unwrap().number, 2);
    }

    #[test]
    fn test_ingest_and_lookup() {
        let registry = ingest(
            "syntax = \"proto3\";\nmessage Hello { string name = 1; }",
            "hello.proto",
        );
        let hello = registry.message("Hello").unwrap();
        assert_eq!(hello.file, "hello.proto");
        assert_eq!(registry.file_messages("hello.proto"), &["Hello".to_string()]);
    }

    #[test]
    fn test_package_qualification() {
        let registry = ingest(
            "syntax = \"proto3\";\npackage demo.v1;\nmessage Hello { string name = 1; }",
            "hello.proto",
        );
        assert!(registry.message("demo.v1.Hello").is_ok());
        assert!(registry.message("Hello").is_err());
    }

    #[test]
    fn test_nested_scope_resolution() {
        let source = "\
syntax = \"proto3\";
message Outer {
    message Inner { int32 n = 1; }
    Inner inner = 1;
}
message Other {
    Outer.Inner deep = 1;
}
";
        let registry = ingest(source, "t.proto");
        let outer = registry.message("Outer").unwrap();
        assert_eq!(
            outer.field("inner").unwrap().field_type,
            FieldType::Message("Outer.Inner".to_string())
        );
        let other = registry.message("Other").unwrap();
        assert_eq!(
            other.field("deep").unwrap().field_type,
            FieldType::Message("Outer.Inner".to_string())
        );
        assert_eq!(outer.nested_messages, vec!["Outer.Inner".to_string()]);
    }

    #[test]
    fn test_recursive_message() {
        let source = "\
syntax = \"proto3\";
message Tree {
    string label = 1;
    repeated Tree children = 2;
}
";
        let registry = ingest(source, "t.proto");
        let tree = registry.message("Tree").unwrap();
        assert_eq!(
            tree.field("children").unwrap().field_type,
            FieldType::Message("Tree".to_string())
        );
    }

    #[test]
    fn test_unresolved_type() {
        let mut registry = TypeRegistry::new();
        let raw = parse_file("message M { Missing x = 1; }", "t.proto").unwrap();
        let err = registry.ingest_file(&raw, "t.proto").unwrap_err();
        assert!(matches!(err, SchemaError::UnresolvedType { .. }));
    }

    #[test]
    fn test_duplicate_type_across_files() {
        let mut registry = TypeRegistry::new();
        let raw = parse_file("message M { }", "a.proto").unwrap();
        registry.ingest_file(&raw, "a.proto").unwrap();
        let raw = parse_file("message M { }", "b.proto").unwrap();
        let err = registry.ingest_file(&raw, "b.proto").unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateType(_)));
    }

    #[test]
    fn test_type_url_resolution() {
        let registry = ingest(
            "syntax = \"proto3\";\nmessage Hello { string name = 1; }",
            "hello.proto",
        );
        let hello = registry
            .resolve_type_url("type.googleapis.com/Hello")
            .unwrap();
        assert_eq!(hello.full_name, "Hello");
        assert!(registry
            .resolve_type_url("type.googleapis.com/Nope")
            .is_err());
    }

    #[test]
    fn test_enum_registration() {
        let source = "\
syntax = \"proto3\";
message Paint {
    enum Color { NONE = 0; RED = 1; }
    Color color = 1;
}
";
        let registry = ingest(source, "t.proto");
        let color = registry.enum_type("Paint.Color").unwrap();
        assert_eq!(color.number("RED"), Some(1));
        assert_eq!(color.symbol(0), Some("NONE"));
        let paint = registry.message("Paint").unwrap();
        assert_eq!(
            paint.field("color").unwrap().field_type,
            FieldType::Enum("Paint.Color".to_string())
        );
    }
}
