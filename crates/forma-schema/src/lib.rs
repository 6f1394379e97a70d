//! Schema front end.
//!
//! Parses `.proto` files into descriptors, registers them in a
//! [`registry::TypeRegistry`], and provides dynamic message instances with
//! wire and JSON codecs. The registry doubles as the type resolver when a
//! `google.protobuf.Any` payload is expanded during JSON rendering.

pub mod compile;
pub mod descriptor;
pub mod error;
pub mod json;
pub mod lexer;
pub mod message;
pub mod parser;
pub mod registry;
pub mod wire;

pub use compile::{compile_file, ImportReader};
pub use descriptor::{
    Cardinality, EnumDescriptor, EnumRef, FieldDescriptor, FieldType, MessageDescriptor,
    MessageRef, ScalarType, TYPE_URL_PREFIX,
};
pub use error::SchemaError;
pub use message::{DynamicMessage, FieldValue, MapKey};
pub use registry::{TypeRegistry, ANY_FILE, ANY_TYPE};
