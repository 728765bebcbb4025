//! Error type for every fallible compilation step.
//!
//! All errors are unrecoverable at compile time: they carry the offending
//! entity's name and a short explanation and surface to the caller through
//! `Result`. Internal helpers never swallow them.

use std::fmt;

/// Errors raised while building, scheduling, lowering or emitting a program.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompileError {
    /// Mismatched tensor ranks, subscript rank vs tensor rank, or a shape
    /// used before it was set.
    Shape(String),
    /// Arithmetic on mismatched primitives, invalid cast targets, SIMD
    /// operand mismatches.
    Type(String),
    /// Iteration domain extraction failures: non-constant bounds or a
    /// non-unit iterator coefficient inside a constraint.
    Domain(String),
    /// Invalid schedule transformations.
    Schedule(String),
    /// A name that should have been registered was not found.
    Lookup {
        /// What kind of entity was looked up ("stage", "tensor", "operator").
        kind: &'static str,
        /// The missing name.
        name: String,
    },
    /// Schedule-AST lowering failures.
    Lowering(String),
    /// Out-of-range configuration: unroll counts, vector widths.
    Config(String),
}

impl CompileError {
    pub fn shape(msg: impl Into<String>) -> Self {
        CompileError::Shape(msg.into())
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        CompileError::Type(msg.into())
    }

    pub fn domain(msg: impl Into<String>) -> Self {
        CompileError::Domain(msg.into())
    }

    pub fn schedule(msg: impl Into<String>) -> Self {
        CompileError::Schedule(msg.into())
    }

    pub fn lookup(kind: &'static str, name: impl Into<String>) -> Self {
        CompileError::Lookup {
            kind,
            name: name.into(),
        }
    }

    pub fn lowering(msg: impl Into<String>) -> Self {
        CompileError::Lowering(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CompileError::Config(msg.into())
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Shape(msg) => write!(f, "shape error: {msg}"),
            CompileError::Type(msg) => write!(f, "type error: {msg}"),
            CompileError::Domain(msg) => write!(f, "domain error: {msg}"),
            CompileError::Schedule(msg) => write!(f, "schedule error: {msg}"),
            CompileError::Lookup { kind, name } => {
                write!(f, "lookup error: no {kind} named '{name}'")
            }
            CompileError::Lowering(msg) => write!(f, "lowering error: {msg}"),
            CompileError::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_entity_name() {
        let err = CompileError::lookup("stage", "S3");
        assert_eq!(err.to_string(), "lookup error: no stage named 'S3'");

        let err = CompileError::config("unroll count 42 outside [2, 30]");
        assert!(err.to_string().contains("unroll count 42"));
    }
}
