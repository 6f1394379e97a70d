//! Sandboxed configuration scripting language.
//!
//! An indentation-sensitive, Python-shaped language evaluated by a
//! tree-walking interpreter. Host integration happens through three seams:
//!
//! - [`value::NativeObject`] — host-defined values (typed message
//!   constructors and instances plug in here);
//! - [`eval::ModuleImporter`] — the `load(...)` callback;
//! - the built-in universe, an extensible name → value map.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod value;

pub use eval::{Bindings, EvalError, EvalErrorKind, Evaluator, ModuleImporter};
pub use parser::{parse, ParseError};
pub use span::{Position, SourceInfo, Span};
pub use value::{Builtin, CallArgs, Key, NativeObject, Value};
