//! Evaluation errors with call-stack backtraces.

use std::fmt;

use crate::span::Position;

/// Category of evaluation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
    /// Unbound name.
    Name,
    /// Operation applied to a value of the wrong type.
    Type,
    /// Structurally valid operation with an invalid value.
    Value,
    /// Missing attribute or unknown field.
    Attribute,
    /// Out-of-range or missing index/key.
    Index,
    /// Wrong number or shape of call arguments.
    Arity,
    /// Integer division or modulo by zero.
    DivisionByZero,
    /// Arithmetic overflow.
    Overflow,
    /// Failure loading another module.
    Import,
    /// Explicit `fail(...)` call.
    Fail,
    /// Call depth limit exceeded.
    Recursion,
}

impl EvalErrorKind {
    fn name(self) -> &'static str {
        match self {
            EvalErrorKind::Name => "name error",
            EvalErrorKind::Type => "type error",
            EvalErrorKind::Value => "value error",
            EvalErrorKind::Attribute => "attribute error",
            EvalErrorKind::Index => "index error",
            EvalErrorKind::Arity => "argument error",
            EvalErrorKind::DivisionByZero => "division by zero",
            EvalErrorKind::Overflow => "overflow",
            EvalErrorKind::Import => "import error",
            EvalErrorKind::Fail => "fail",
            EvalErrorKind::Recursion => "recursion limit",
        }
    }
}

/// One entry of an evaluation backtrace: the function being executed and
/// the source position of its call site.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub function: String,
    pub position: Option<Position>,
}

/// Runtime error raised during script evaluation.
///
/// Carries the position of the failing expression and the call stack at the
/// time of the failure (innermost frame first).
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub message: String,
    pub position: Option<Position>,
    pub frames: Vec<Frame>,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            position: None,
            frames: Vec::new(),
        }
    }

    pub fn name_error(name: &str) -> Self {
        Self::new(EvalErrorKind::Name, format!("name `{name}` is not defined"))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::Type, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::Value, message)
    }

    pub fn attribute_error(type_name: &str, attr: &str) -> Self {
        Self::new(
            EvalErrorKind::Attribute,
            format!("{type_name} has no attribute `{attr}`"),
        )
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::Index, message)
    }

    pub fn arity_error(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::Arity, message)
    }

    /// Attach a position if none is set yet (the innermost position wins).
    pub fn or_position(mut self, position: Option<Position>) -> Self {
        if self.position.is_none() {
            self.position = position;
        }
        self
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.position {
            Some(pos) => write!(f, "[{pos}] {}: {}", self.kind.name(), self.message)?,
            None => write!(f, "{}: {}", self.kind.name(), self.message)?,
        }
        for frame in &self.frames {
            match &frame.position {
                Some(pos) => write!(f, "\n  in {} called at {pos}", frame.function)?,
                None => write!(f, "\n  in {}", frame.function)?,
            }
        }
        Ok(())
    }
}

impl std::error::Error for EvalError {}
