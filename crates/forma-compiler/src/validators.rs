//! Validator registration and recursive validation.
//!
//! Validators are unary script predicates bound to message descriptors via
//! the `add_validator` built-in, which is live only while the loader runs
//! the validator pass. Validation walks a message depth-first: the
//! message's own validator runs first, then every reachable nested message
//! (singular present fields, repeated elements, map values) in field
//! declaration order.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;

use forma_script::value::{Builtin, CallArgs, NativeObject};
use forma_script::{EvalError, EvalErrorKind, Evaluator, Value};
use forma_schema::{DynamicMessage, FieldType, FieldValue};

use crate::bridge::{MessageType, MessageValue, SharedRegistry};
use crate::error::{CompileError, Result};

/// Slot for the first structured error raised inside script evaluation.
/// Script errors travel as flat [`EvalError`]s; the stash preserves the
/// typed `CompileError` so the driver reports the real cause.
pub type ErrorStash = Rc<RefCell<Option<CompileError>>>;

/// Registered validators, keyed by message full name. At most one binding
/// per descriptor.
#[derive(Default)]
pub struct ValidatorRegistry {
    entries: IndexMap<String, Value>,
}

impl ValidatorRegistry {
    pub fn get(&self, full_name: &str) -> Option<&Value> {
        self.entries.get(full_name)
    }

    /// Returns false when the type already has a validator.
    pub fn register(&mut self, full_name: String, validator: Value) -> bool {
        if self.entries.contains_key(&full_name) {
            return false;
        }
        self.entries.insert(full_name, validator);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build the `add_validator` built-in. It is part of every module's
/// universe but only usable while `phase` is set by the validator pass.
pub fn add_validator_builtin(
    validators: Rc<RefCell<ValidatorRegistry>>,
    phase: Rc<Cell<bool>>,
    stash: ErrorStash,
) -> Value {
    Builtin::value("add_validator", move |_eval, args| {
        let reject = |err: CompileError| -> EvalError {
            let message = err.to_string();
            if stash.borrow().is_none() {
                *stash.borrow_mut() = Some(err);
            }
            EvalError::new(EvalErrorKind::Value, message)
        };

        if !phase.get() {
            return Err(reject(CompileError::ValidatorOutOfPhase));
        }
        args.exactly("add_validator", 2)?;

        let type_name = match &args.positional[0] {
            Value::Native(n) => match n.as_any().downcast_ref::<MessageType>() {
                Some(constructor) => constructor.descriptor().full_name.clone(),
                None => {
                    return Err(EvalError::type_error(format!(
                        "add_validator() expects a message type, got {}",
                        n.type_name()
                    )));
                }
            },
            other => {
                return Err(EvalError::type_error(format!(
                    "add_validator() expects a message type, got {}",
                    other.type_name()
                )));
            }
        };

        match &args.positional[1] {
            Value::Function(f) => {
                if f.param_count() != 1 {
                    return Err(reject(CompileError::ArityMismatch {
                        type_name,
                        got: f.param_count(),
                    }));
                }
            }
            other => {
                return Err(EvalError::type_error(format!(
                    "add_validator() expects a function, got {}",
                    other.type_name()
                )));
            }
        }

        let validator = args.positional[1].clone();
        if !validators.borrow_mut().register(type_name.clone(), validator) {
            return Err(reject(CompileError::DuplicateValidator { type_name }));
        }
        Ok(Value::None)
    })
}

/// Recursively validate a message against the registered validators.
pub fn validate_message(
    msg: &DynamicMessage,
    registry: &SharedRegistry,
    validators: &Rc<RefCell<ValidatorRegistry>>,
    universe: &IndexMap<String, Value>,
) -> Result<()> {
    let full_name = msg.descriptor().full_name.clone();

    let binding = validators.borrow().get(&full_name).cloned();
    if let Some(validator) = binding {
        let wrapper = Value::native(MessageValue::from_message(msg, registry.clone()));
        let mut evaluator = Evaluator::new(universe.clone());
        evaluator
            .call_value(&validator, CallArgs::positional(vec![wrapper]))
            .map_err(|error| CompileError::ValidationFailed {
                type_name: full_name.clone(),
                error,
            })?;
    }

    for field in &msg.descriptor().fields {
        match &field.field_type {
            FieldType::Message(_) if field.is_repeated() => {
                if let Some(FieldValue::List(items)) = msg.get_by_number(field.number) {
                    for item in items {
                        if let FieldValue::Message(child) = item {
                            validate_message(child, registry, validators, universe)?;
                        }
                    }
                }
            }
            FieldType::Message(_) => {
                if let Some(FieldValue::Message(child)) = msg.get_by_number(field.number) {
                    validate_message(child, registry, validators, universe)?;
                }
            }
            FieldType::Map { value, .. } if matches!(**value, FieldType::Message(_)) => {
                if let Some(FieldValue::Map(entries)) = msg.get_by_number(field.number) {
                    for entry in entries.values() {
                        if let FieldValue::Message(child) = entry {
                            validate_message(child, registry, validators, universe)?;
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}
