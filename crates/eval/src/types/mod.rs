//! Runtime error and configuration types for the rule evaluator.
//!
//! Parsed rule trees live in [`script`], runtime values in [`values`].
//! Everything here is shared by the parser, the evaluator and the
//! top-level rule entry points.

pub mod script;
pub mod values;

use serde::Deserialize;
use std::fmt;

pub use script::{
    CompareOp, Comparison, Containment, Expression, ExpressionKind, Method, Quantifier,
    QuantifierOp, Statement, StatementKind,
};
pub use values::{Payload, Value};

// ──────────────────────────────────────────────
// Value kinds
// ──────────────────────────────────────────────

/// The runtime kind of a [`Value`], used in type errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Array,
    Bool,
    Decimal,
    String,
    Nil,
    Any,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Array => "array",
            ValueKind::Bool => "bool",
            ValueKind::Decimal => "decimal",
            ValueKind::String => "string",
            ValueKind::Nil => "nil",
            ValueKind::Any => "map",
        };
        f.write_str(name)
    }
}

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

/// Errors raised while parsing or evaluating a rule script.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// The rule tree has the wrong shape. `fragment` is the offending
    /// part of the tree rendered back to text.
    #[error("{message}")]
    Parse { message: String, fragment: String },

    #[error("expected {expected} value, got {actual}")]
    TypeMismatch {
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("can't compare {left} to {right}")]
    IncomparableTypes { left: ValueKind, right: ValueKind },

    #[error("unknown cast type {name:?}")]
    UnknownCastType { name: String },

    /// A string that is not one of the scale's enumeration values.
    #[error("unknown {scale} value {value:?}")]
    InvalidEnumValue { scale: String, value: String },

    #[error("{name:?} expected {expected} parameters, got {actual}")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("call depth limit of {limit} exceeded calling {name:?}")]
    CallDepthExceeded { name: String, limit: usize },

    #[error("built-in {name:?} failed: {message}")]
    Builtin { name: String, message: String },

    /// The model or risk category could not be flattened into a map.
    #[error("failed to bind {target}: {message}")]
    Binding { target: String, message: String },

    /// Breadcrumb wrapper added at each propagation point.
    #[error("{context}: {source}")]
    Context {
        context: String,
        source: Box<ScriptError>,
    },
}

impl ScriptError {
    pub fn parse(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        ScriptError::Parse {
            message: message.into(),
            fragment: fragment.into(),
        }
    }

    /// Wrap this error with a breadcrumb.
    pub fn context(self, context: impl Into<String>) -> Self {
        ScriptError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with every breadcrumb removed.
    pub fn root(&self) -> &ScriptError {
        match self {
            ScriptError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// The source fragment of the innermost parse error, if any.
    pub fn fragment(&self) -> Option<&str> {
        match self.root() {
            ScriptError::Parse { fragment, .. } => Some(fragment),
            _ => None,
        }
    }
}

/// An evaluation failure: the error plus the source fragment of the
/// innermost node that failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct Fault {
    pub literal: String,
    pub error: ScriptError,
}

impl Fault {
    pub fn new(literal: impl Into<String>, error: ScriptError) -> Self {
        Fault {
            literal: literal.into(),
            error,
        }
    }

    /// Wrap the inner error with a breadcrumb, keeping the literal.
    pub fn context(self, context: impl Into<String>) -> Self {
        Fault {
            literal: self.literal,
            error: self.error.context(context),
        }
    }

    /// Fill in the literal if no inner node has claimed it yet.
    pub fn at(mut self, literal: &str) -> Self {
        if self.literal.is_empty() {
            self.literal = literal.to_string();
        }
        self
    }
}

impl From<ScriptError> for Fault {
    fn from(error: ScriptError) -> Self {
        Fault {
            literal: String::new(),
            error,
        }
    }
}

// ──────────────────────────────────────────────
// Configuration
// ──────────────────────────────────────────────

/// Evaluation limits carried by every scope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Maximum nesting of method calls before evaluation fails.
    pub max_call_depth: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig { max_call_depth: 64 }
    }
}
