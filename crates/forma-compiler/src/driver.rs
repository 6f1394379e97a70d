//! Compile driver: one-shot pipeline for a single configuration source.
//!
//! load → validator discovery → `main()` → result classification →
//! validate everything → write everything. Validation of all outputs
//! completes before the first byte is written, so a failing multi-mode
//! compile leaves nothing behind.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use forma_script::value::{CallArgs, NativeObject};
use forma_script::{Evaluator, Value};
use forma_schema::DynamicMessage;

use crate::bridge::MessageValue;
use crate::error::{CompileError, Result};
use crate::loader::Loader;
use crate::paths::{self, Mode};
use crate::validators::validate_message;
use crate::emit;

/// Compile one configuration source under `project_root`. Returns the
/// paths written, in emission order.
pub fn compile_source(project_root: &Path, source_name: &str) -> Result<Vec<PathBuf>> {
    let mode = paths::classify(source_name)?;
    let source_path = paths::source_root(project_root).join(source_name);
    debug!(source = source_name, ?mode, "compiling");

    let mut loader = Loader::new(project_root)?;
    let globals = loader.load_entry(source_name)?;
    loader.run_validator_pass()?;

    let main = globals.get("main").ok_or_else(|| CompileError::MissingMain {
        path: source_path.clone(),
    })?;
    if !matches!(
        main,
        Value::Function(_) | Value::Builtin(_) | Value::Native(_)
    ) {
        return Err(CompileError::MainNotCallable {
            path: source_path.clone(),
            type_name: main.type_name().to_string(),
        });
    }

    let mut evaluator = Evaluator::new(loader.universe().clone());
    let output = evaluator
        .call_value(main, CallArgs::default())
        .map_err(|error| CompileError::Script {
            path: source_path.clone(),
            error,
        })?;

    let outputs = materialize(project_root, source_name, mode, &output, &source_path)?;

    // Validate every output before writing any of them.
    let registry = loader.registry();
    let validators = loader.validators();
    for (_, message) in &outputs {
        validate_message(message, &registry, &validators, loader.universe())?;
    }

    let mut written = Vec::with_capacity(outputs.len());
    for (path, message) in &outputs {
        emit::write_envelope(path, message, &registry.borrow())?;
        info!(output = %path.display(), "wrote config");
        written.push(path.clone());
    }
    Ok(written)
}

/// Pair each compiled message with its output path.
fn materialize(
    project_root: &Path,
    source_name: &str,
    mode: Mode,
    output: &Value,
    source_path: &Path,
) -> Result<Vec<(PathBuf, DynamicMessage)>> {
    let bad_return = |got: String, expected: &str| CompileError::BadMainReturn {
        path: source_path.to_path_buf(),
        got,
        expected: expected.to_string(),
    };

    match mode {
        Mode::Single => {
            let message = as_message(output)
                .ok_or_else(|| {
                    bad_return(output.type_name().to_string(), "a message instance")
                })?
                .to_message()?;
            Ok(vec![(
                paths::single_output_path(project_root, source_name),
                message,
            )])
        }
        Mode::Multi => {
            let Value::Dict(entries) = output else {
                return Err(bad_return(
                    output.type_name().to_string(),
                    "a dict of string keys to message instances",
                ));
            };
            let output_dir = paths::multi_output_dir(project_root, source_name);
            let mut outputs = Vec::new();
            for (key, value) in entries.borrow().iter() {
                let forma_script::Key::Str(key) = key else {
                    return Err(bad_return(
                        format!("a dict with {} key", key.to_value().type_name()),
                        "string keys",
                    ));
                };
                if !paths::valid_output_key(key) {
                    return Err(bad_return(
                        format!("a dict with key {key:?}"),
                        "keys usable as file names",
                    ));
                }
                let message = as_message(value)
                    .ok_or_else(|| {
                        bad_return(
                            format!("a dict with {} value", value.type_name()),
                            "message instance values",
                        )
                    })?
                    .to_message()?;
                outputs.push((paths::multi_output_path(&output_dir, key), message));
            }
            Ok(outputs)
        }
    }
}

fn as_message(value: &Value) -> Option<&MessageValue> {
    match value {
        Value::Native(n) => n.as_any().downcast_ref::<MessageValue>(),
        _ => None,
    }
}
