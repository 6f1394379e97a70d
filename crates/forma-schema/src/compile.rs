//! Schema compilation: parse a file and its import closure into a registry.

use crate::error::{Result, SchemaError};
use crate::parser;
use crate::registry::TypeRegistry;

/// Source of schema file contents, keyed by root-relative path. The host
/// supplies one; it is where sandboxing and read-tracking live.
pub trait ImportReader {
    fn read(&mut self, file: &str) -> Result<String>;
}

/// Parse `file` and everything it imports (depth first) into `registry`.
/// Already-ingested files are skipped, so shared imports are parsed once.
pub fn compile_file(
    file: &str,
    reader: &mut dyn ImportReader,
    registry: &mut TypeRegistry,
) -> Result<()> {
    let mut visiting = Vec::new();
    compile_inner(file, reader, registry, &mut visiting)
}

fn compile_inner(
    file: &str,
    reader: &mut dyn ImportReader,
    registry: &mut TypeRegistry,
    visiting: &mut Vec<String>,
) -> Result<()> {
    if registry.has_file(file) {
        return Ok(());
    }
    if visiting.iter().any(|f| f == file) {
        return Err(SchemaError::Import {
            file: file.to_string(),
            message: "recursive import".to_string(),
        });
    }
    visiting.push(file.to_string());

    let source = reader.read(file)?;
    let raw = parser::parse_file(&source, file)?;
    for import in &raw.imports {
        compile_inner(import, reader, registry, visiting)?;
    }
    registry.ingest_file(&raw, file)?;

    visiting.pop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    struct MapReader {
        files: IndexMap<String, String>,
        reads: Vec<String>,
    }

    impl ImportReader for MapReader {
        fn read(&mut self, file: &str) -> Result<String> {
            self.reads.push(file.to_string());
            self.files.get(file).cloned().ok_or_else(|| SchemaError::Import {
                file: file.to_string(),
                message: "not found".to_string(),
            })
        }
    }

    fn reader(entries: &[(&str, &str)]) -> MapReader {
        MapReader {
            files: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            reads: Vec::new(),
        }
    }

    #[test]
    fn test_import_closure() {
        let mut reader = reader(&[
            (
                "main.proto",
                "syntax = \"proto3\";\nimport \"dep.proto\";\nmessage Main { Dep dep = 1; }",
            ),
            ("dep.proto", "syntax = \"proto3\";\nmessage Dep { int32 n = 1; }"),
        ]);
        let mut registry = TypeRegistry::new();
        compile_file("main.proto", &mut reader, &mut registry).unwrap();
        assert!(registry.message("Main").is_ok());
        assert!(registry.message("Dep").is_ok());
        assert_eq!(reader.reads, vec!["main.proto", "dep.proto"]);
    }

    #[test]
    fn test_shared_import_parsed_once() {
        let mut reader = reader(&[
            (
                "a.proto",
                "syntax = \"proto3\";\nimport \"shared.proto\";\nmessage A { S s = 1; }",
            ),
            (
                "b.proto",
                "syntax = \"proto3\";\nimport \"shared.proto\";\nmessage B { S s = 1; }",
            ),
            ("shared.proto", "syntax = \"proto3\";\nmessage S { }"),
        ]);
        let mut registry = TypeRegistry::new();
        compile_file("a.proto", &mut reader, &mut registry).unwrap();
        compile_file("b.proto", &mut reader, &mut registry).unwrap();
        assert_eq!(
            reader.reads,
            vec!["a.proto", "shared.proto", "b.proto"]
        );
    }

    #[test]
    fn test_recursive_import_rejected() {
        let mut reader = reader(&[
            ("a.proto", "import \"b.proto\";\nmessage A { }"),
            ("b.proto", "import \"a.proto\";\nmessage B { }"),
        ]);
        let mut registry = TypeRegistry::new();
        let err = compile_file("a.proto", &mut reader, &mut registry).unwrap_err();
        assert!(matches!(err, SchemaError::Import { .. }));
    }

    #[test]
    fn test_any_import_is_builtin() {
        let mut reader = reader(&[(
            "m.proto",
            "syntax = \"proto3\";\nimport \"google/protobuf/any.proto\";\nmessage M { google.protobuf.Any payload = 1; }",
        )]);
        let mut registry = TypeRegistry::new();
        compile_file("m.proto", &mut reader, &mut registry).unwrap();
        // The built-in Any satisfied the import without a read.
        assert_eq!(reader.reads, vec!["m.proto"]);
        let m = registry.message("M").unwrap();
        assert_eq!(
            m.field("payload").unwrap().field_type,
            crate::descriptor::FieldType::Message("google.protobuf.Any".to_string())
        );
    }
}
