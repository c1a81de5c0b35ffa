//! Errors raised while compiling a filter tree into a predicate.

use crate::ast::{BoolOp, Operator};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// The filter tree is malformed (empty group, blank field id).
    #[error("malformed filter at {path}: {reason}")]
    Structural { path: String, reason: String },

    /// A handler was asked to compile an operator it does not support.
    #[error("operator {operator} is not supported for field '{field}'")]
    UnsupportedOperator { field: String, operator: Operator },

    #[error("field '{field}' expects a {expected} value, got {found}")]
    ValueType {
        field: String,
        expected: String,
        found: String,
    },

    #[error("field '{field}' cannot be compared with {operator} against null")]
    NullComparison { field: String, operator: Operator },

    /// A combinator was built without any child predicate.
    #[error("cannot build an {0} predicate without children")]
    EmptyJunction(BoolOp),

    /// The predicate nests deeper than the SQL renderer accepts.
    #[error("predicate depth {depth} exceeds the SQL rendering limit of {limit}")]
    TooDeep { depth: usize, limit: usize },
}

impl CompileError {
    pub(crate) fn structural(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Structural {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
