//! Envelope construction and JSON emission.
//!
//! Every artifact is the two-field envelope message: the payload schema's
//! file name plus the payload itself as a self-describing `Any`. The
//! envelope's own schema is embedded here and parsed through the ordinary
//! schema front end at loader start, so it is a first-class registered
//! type like everything else.

use std::fs;
use std::path::Path;

use forma_schema::{
    compile_file, json, wire, DynamicMessage, FieldValue, ImportReader, SchemaError,
    TypeRegistry, ANY_TYPE,
};

use crate::error::{CompileError, Result};

/// File name the envelope schema is registered under.
pub const ENVELOPE_FILE: &str = "forma/envelope.proto";
/// Full name of the envelope message type.
pub const ENVELOPE_TYPE: &str = "forma.MaterializedValue";

const ENVELOPE_PROTO: &str = r#"syntax = "proto3";

package forma;

import "google/protobuf/any.proto";

message MaterializedValue {
  string proto_file = 1;
  google.protobuf.Any value = 2;
}
"#;

struct EmbeddedSchemas;

impl ImportReader for EmbeddedSchemas {
    fn read(&mut self, file: &str) -> std::result::Result<String, SchemaError> {
        if file == ENVELOPE_FILE {
            Ok(ENVELOPE_PROTO.to_string())
        } else {
            Err(SchemaError::Import {
                file: file.to_string(),
                message: "not an embedded schema".to_string(),
            })
        }
    }
}

/// Register the envelope schema into a fresh registry.
pub fn register_envelope(registry: &mut TypeRegistry) -> std::result::Result<(), SchemaError> {
    compile_file(ENVELOPE_FILE, &mut EmbeddedSchemas, registry)
}

/// Wrap a payload message in the envelope: `proto_file` names the
/// payload's schema file, `value` carries its type URL and wire bytes.
pub fn build_envelope(
    payload: &DynamicMessage,
    registry: &TypeRegistry,
) -> std::result::Result<DynamicMessage, SchemaError> {
    let bytes = wire::encode(payload)?;

    let mut any = DynamicMessage::new(registry.message(ANY_TYPE)?);
    any.set_field(
        "type_url",
        FieldValue::String(payload.descriptor().type_url()),
    )?;
    any.set_field("value", FieldValue::Bytes(bytes))?;

    let mut envelope = DynamicMessage::new(registry.message(ENVELOPE_TYPE)?);
    envelope.set_field(
        "proto_file",
        FieldValue::String(payload.descriptor().file.clone()),
    )?;
    envelope.set_field("value", FieldValue::Message(any))?;
    Ok(envelope)
}

/// Serialize the envelope for a payload and write it to `path`: two-space
/// indented JSON, one trailing newline, parent directories created as
/// needed.
pub fn write_envelope(
    path: &Path,
    payload: &DynamicMessage,
    registry: &TypeRegistry,
) -> Result<()> {
    let envelope = build_envelope(payload, registry)?;
    let rendered = json::to_json(&envelope, registry)?;
    let mut text = serde_json::to_string_pretty(&rendered)
        .map_err(|e| CompileError::Schema(SchemaError::Marshal(e.to_string())))?;
    text.push('\n');

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| CompileError::Write {
            path: parent.to_path_buf(),
            source: e,
        })?;
        set_mode(parent, 0o755);
    }
    fs::write(path, text).map_err(|e| CompileError::Write {
        path: path.to_path_buf(),
        source: e,
    })?;
    set_mode(path, 0o644);
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode));
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_registration() {
        let mut registry = TypeRegistry::new();
        register_envelope(&mut registry).unwrap();
        let envelope = registry.message(ENVELOPE_TYPE).unwrap();
        assert_eq!(envelope.file, ENVELOPE_FILE);
        assert_eq!(envelope.field("proto_file").unwrap().number, 1);
        assert_eq!(envelope.field("value").unwrap().number, 2);
    }

    #[test]
    fn test_build_envelope_shape() {
        let mut registry = TypeRegistry::new();
        register_envelope(&mut registry).unwrap();
        let raw = forma_schema::parser::parse_file(
            "syntax = \"proto3\";\nmessage Hello { string name = 1; }",
            "greet.proto",
        )
        .unwrap();
        registry.ingest_file(&raw, "greet.proto").unwrap();

        let mut hello = DynamicMessage::new(registry.message("Hello").unwrap());
        hello
            .set_field("name", FieldValue::String("world".to_string()))
            .unwrap();

        let envelope = build_envelope(&hello, &registry).unwrap();
        let rendered = json::to_json(&envelope, &registry).unwrap();
        assert_eq!(rendered["proto_file"], "greet.proto");
        assert_eq!(rendered["value"]["@type"], "type.googleapis.com/Hello");
        assert_eq!(rendered["value"]["name"], "world");

        // Exactly the two envelope keys at top level.
        let top = rendered.as_object().unwrap();
        assert_eq!(top.len(), 2);
        let keys: Vec<&String> = top.keys().collect();
        assert_eq!(keys, ["proto_file", "value"]);
    }
}
