//! Schema errors.

use thiserror::Error;

/// Result type for schema operations.
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Errors across the schema front end: parsing, type resolution, dynamic
/// message construction, and codecs.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("{file}:{line}:{col}: {message}")]
    Parse {
        file: String,
        line: u32,
        col: u32,
        message: String,
    },

    #[error("failed to import \"{file}\": {message}")]
    Import { file: String, message: String },

    #[error("unresolved type `{name}` referenced from `{scope}`")]
    UnresolvedType { name: String, scope: String },

    #[error("duplicate type `{0}`")]
    DuplicateType(String),

    #[error("unregistered type `{0}`")]
    UnknownType(String),

    #[error("cannot resolve type url `{0}`")]
    UnknownTypeUrl(String),

    #[error("unknown field `{field}` for message `{message_type}`")]
    UnknownField {
        field: String,
        message_type: String,
    },

    #[error("type mismatch for field `{field}` of `{message_type}`: {detail}")]
    TypeMismatch {
        field: String,
        message_type: String,
        detail: String,
    },

    #[error("wire decode error for `{message_type}`: {detail}")]
    Decode {
        message_type: String,
        detail: String,
    },

    #[error("marshal error: {0}")]
    Marshal(String),
}
