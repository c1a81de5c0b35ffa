//! Configurable handler for one catalog column, with its value kind and operator families.

use super::FieldHandler;
use crate::ast::{FieldCriterion, FieldId, Literal, Operator, OperatorFamily};
use crate::error::CompileError;
use crate::predicate::{ColumnRef, FieldPredicate, Predicate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value type stored in a field's column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Integer,
    Float,
    Boolean,
}

impl ValueKind {
    /// Whether values of this kind carry a total order usable by GT/GTE/LT/LTE.
    pub fn is_orderable(self) -> bool {
        !matches!(self, ValueKind::Boolean)
    }

    pub fn supports(self, family: OperatorFamily) -> bool {
        match family {
            OperatorFamily::Equality => true,
            OperatorFamily::Comparable => self.is_orderable(),
            OperatorFamily::Pattern => self == ValueKind::String,
        }
    }

    /// Coerces `value` into this kind. Integers widen to floats; nothing else converts.
    fn accept(self, value: &Literal) -> Option<Literal> {
        match (self, value) {
            (ValueKind::String, Literal::String(_))
            | (ValueKind::Integer, Literal::Integer(_))
            | (ValueKind::Float, Literal::Float(_))
            | (ValueKind::Boolean, Literal::Boolean(_)) => Some(value.clone()),
            (ValueKind::Float, Literal::Integer(n)) => Some(Literal::Float(*n as f64)),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::String => "string",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Handler for one catalog field stored in a column of the base table or of
/// a joined relation.
///
/// The join handle is resolved once when the handler is built; every
/// predicate it compiles shares it.
#[derive(Debug, Clone)]
pub struct CatalogFieldHandler {
    field: FieldId,
    column: ColumnRef,
    kind: ValueKind,
    families: Vec<OperatorFamily>,
}

impl CatalogFieldHandler {
    pub fn new(
        field: impl Into<FieldId>,
        column: ColumnRef,
        kind: ValueKind,
        families: impl IntoIterator<Item = OperatorFamily>,
    ) -> Self {
        Self {
            field: field.into(),
            column,
            kind,
            families: families.into_iter().collect(),
        }
    }

    pub fn field(&self) -> &FieldId {
        &self.field
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn families(&self) -> &[OperatorFamily] {
        &self.families
    }

    fn unsupported(&self, operator: Operator) -> CompileError {
        CompileError::UnsupportedOperator {
            field: self.field.to_string(),
            operator,
        }
    }

    fn coerce(&self, criterion: &FieldCriterion) -> Result<Literal, CompileError> {
        if criterion.value.is_null() && criterion.operator.family() == OperatorFamily::Comparable {
            return Err(CompileError::NullComparison {
                field: self.field.to_string(),
                operator: criterion.operator,
            });
        }
        self.kind
            .accept(&criterion.value)
            .ok_or_else(|| CompileError::ValueType {
                field: self.field.to_string(),
                expected: self.kind.to_string(),
                found: criterion.value.type_name().to_string(),
            })
    }

    fn predicate(&self, operator: Operator, value: Literal) -> Predicate {
        Predicate::Field(FieldPredicate {
            field: self.field.clone(),
            column: self.column.clone(),
            operator,
            value,
        })
    }

    /// `column = value` / `column <> value`
    fn equality(&self, operator: Operator, value: Literal) -> Result<Predicate, CompileError> {
        match operator {
            Operator::Eq | Operator::Ne => Ok(self.predicate(operator, value)),
            other => Err(self.unsupported(other)),
        }
    }

    /// Strict and partial ordering tests.
    fn ordering(&self, operator: Operator, value: Literal) -> Result<Predicate, CompileError> {
        match operator {
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                Ok(self.predicate(operator, value))
            }
            other => Err(self.unsupported(other)),
        }
    }

    /// LIKE / NOT LIKE; the pattern goes to the backend as written.
    fn pattern(&self, operator: Operator, value: Literal) -> Result<Predicate, CompileError> {
        match operator {
            Operator::Like | Operator::NotLike => Ok(self.predicate(operator, value)),
            other => Err(self.unsupported(other)),
        }
    }
}

impl FieldHandler for CatalogFieldHandler {
    fn can_handle(&self, criterion: &FieldCriterion) -> bool {
        criterion.field == self.field
    }

    fn compile(&self, criterion: &FieldCriterion) -> Result<Predicate, CompileError> {
        let family = criterion.operator.family();
        if !self.families.contains(&family) {
            return Err(self.unsupported(criterion.operator));
        }
        let value = self.coerce(criterion)?;
        match family {
            OperatorFamily::Equality => self.equality(criterion.operator, value),
            OperatorFamily::Comparable => self.ordering(criterion.operator, value),
            OperatorFamily::Pattern => self.pattern(criterion.operator, value),
        }
    }
}
