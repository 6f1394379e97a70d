//! Configuration compiler.
//!
//! Compiles sandboxed configuration programs against schema types into
//! validated JSON envelope artifacts. The pipeline for each source is a
//! single deterministic pass:
//!
//! 1. [`loader::Loader`] resolves and evaluates the module graph (scripts
//!    and schemas share one cache; cycles are errors).
//! 2. The validator pass runs each schema's `-validator` companion.
//! 3. `main()` produces one message (`.pconf`) or a string-keyed mapping
//!    of messages (`.mpconf`).
//! 4. Every message is validated recursively, then every artifact is
//!    written under `materialized_config/`.
//!
//! All state lives for one [`compile_source`] call; nothing is shared
//! between sources.

pub mod bridge;
pub mod driver;
pub mod emit;
pub mod error;
pub mod loader;
pub mod paths;
pub mod reader;
pub mod validators;

pub use driver::compile_source;
pub use error::{CompileError, Result};
pub use paths::Mode;
