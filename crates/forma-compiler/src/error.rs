//! Compiler errors.
//!
//! Every failure in the pipeline funnels into [`CompileError`]; the CLI
//! prints the failing source name and this error's chain.

use std::path::PathBuf;
use std::rc::Rc;

use forma_script::EvalError;
use forma_schema::SchemaError;
use thiserror::Error;

use crate::paths::{CONFIG_EXT, MULTI_CONFIG_EXT};

/// Result type for compiler operations.
pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(
        "config file must end with either {CONFIG_EXT} or {MULTI_CONFIG_EXT}, got: {0}"
    )]
    InputClassification(String),

    #[error("cannot resolve import \"{name}\" from \"{from}\": {reason}")]
    UnresolvedImport {
        name: String,
        from: String,
        reason: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cycle in load graph at {path}")]
    ImportCycle { path: PathBuf },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("parse error in {path}:{line}:{col}: {message}")]
    ScriptParse {
        path: PathBuf,
        line: u32,
        col: u32,
        message: String,
    },

    #[error("error evaluating {path}: {error}")]
    Script { path: PathBuf, error: EvalError },

    #[error("no `main` function found in {path}")]
    MissingMain { path: PathBuf },

    #[error("`main` must be a function, got a {type_name} in {path}")]
    MainNotCallable { path: PathBuf, type_name: String },

    #[error("`main` in {path} returned {got}; expected {expected}")]
    BadMainReturn {
        path: PathBuf,
        got: String,
        expected: String,
    },

    #[error("add_validator() is only available while validator files load")]
    ValidatorOutOfPhase,

    #[error("validator already registered for `{type_name}`")]
    DuplicateValidator { type_name: String },

    #[error("validator for `{type_name}` must take exactly 1 parameter, got {got}")]
    ArityMismatch { type_name: String, got: usize },

    #[error("expected validator file and not a directory: {path}")]
    ValidatorIsDirectory { path: PathBuf },

    #[error("validation of `{type_name}` failed: {error}")]
    ValidationFailed { type_name: String, error: EvalError },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Replay of an error cached by the module loader. A module that failed
    /// to load reports the same underlying failure to every importer.
    #[error("{0}")]
    Shared(Rc<CompileError>),
}

impl CompileError {
    /// The underlying error, looking through cache replays.
    pub fn root(&self) -> &CompileError {
        match self {
            CompileError::Shared(inner) => inner.root(),
            other => other,
        }
    }
}
