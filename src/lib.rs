//! Compiles nested AND/OR catalog filters into composable predicates.

pub mod ast;
pub mod compiler;
pub mod config;
pub mod error;
pub mod eval;
pub mod handler;
pub mod predicate;
pub mod sql_compiler;

pub use ast::{BoolOp, FieldCriterion, FieldId, FilterNode, Literal, Operator, OperatorFamily};
pub use compiler::ExpressionCompiler;
pub use config::{CatalogConfig, ConfigError};
pub use error::CompileError;
pub use handler::{CatalogFieldHandler, FieldHandler, HandlerRegistry, ValueKind};
pub use predicate::{ColumnRef, FieldPredicate, JoinSpec, Predicate};
pub use sql_compiler::SqlCompiler;
