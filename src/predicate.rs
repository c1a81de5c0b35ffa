//! Compiled predicates and the AND/OR combinators.
//!
//! A [`Predicate`] is the backend-neutral result of compiling a filter
//! tree. Backends consume it through [`Predicate::fold`], which walks the
//! tree with an explicit stack.

use crate::ast::{BoolOp, FieldId, Literal, Operator};
use crate::error::CompileError;
use std::fmt;
use std::sync::Arc;

/// A relation join a field is reached through.
///
/// Handlers share one `Arc<JoinSpec>` per join, so predicates touching the
/// same relation point at the same join and the backend adds it once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinSpec {
    pub name: String,
    pub table: String,
    /// Column of the base table holding the foreign key.
    pub local_column: String,
    /// Column of the joined table the key refers to.
    pub foreign_column: String,
}

/// Location of a column: on the base table, or behind a join.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub join: Option<Arc<JoinSpec>>,
    pub column: String,
}

impl ColumnRef {
    pub fn base(column: impl Into<String>) -> Self {
        Self {
            join: None,
            column: column.into(),
        }
    }

    pub fn joined(join: Arc<JoinSpec>, column: impl Into<String>) -> Self {
        Self {
            join: Some(join),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.join {
            Some(join) => write!(f, "{}.{}", join.name, self.column),
            None => f.write_str(&self.column),
        }
    }
}

/// A single compiled field test.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPredicate {
    pub field: FieldId,
    pub column: ColumnRef,
    pub operator: Operator,
    pub value: Literal,
}

/// Nesting levels `Debug` prints before eliding deeper composites.
const DEBUG_DEPTH: usize = 32;

/// A compiled filter.
///
/// `Clone`, `PartialEq`, `Debug` and `Drop` never recurse past a fixed
/// depth, so a compiled predicate of any depth can be copied, compared and
/// dropped safely.
pub enum Predicate {
    Field(FieldPredicate),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

enum Step<'p> {
    Enter(&'p Predicate),
    Combine(BoolOp, usize),
}

impl Predicate {
    /// Conjunction of `children`. A single child is kept as the lone operand.
    pub fn and(children: Vec<Predicate>) -> Result<Self, CompileError> {
        Self::combine(BoolOp::And, children)
    }

    /// Disjunction of `children`. A single child is kept as the lone operand.
    pub fn or(children: Vec<Predicate>) -> Result<Self, CompileError> {
        Self::combine(BoolOp::Or, children)
    }

    pub fn combine(op: BoolOp, children: Vec<Predicate>) -> Result<Self, CompileError> {
        if children.is_empty() {
            return Err(CompileError::EmptyJunction(op));
        }
        Ok(match op {
            BoolOp::And => Predicate::And(children),
            BoolOp::Or => Predicate::Or(children),
        })
    }

    pub fn junction(&self) -> Option<BoolOp> {
        match self {
            Predicate::Field(_) => None,
            Predicate::And(_) => Some(BoolOp::And),
            Predicate::Or(_) => Some(BoolOp::Or),
        }
    }

    pub fn children(&self) -> &[Predicate] {
        match self {
            Predicate::Field(_) => &[],
            Predicate::And(children) | Predicate::Or(children) => children,
        }
    }

    pub fn as_field(&self) -> Option<&FieldPredicate> {
        match self {
            Predicate::Field(field) => Some(field),
            _ => None,
        }
    }

    /// Bottom-up fold over the predicate tree without native recursion.
    ///
    /// `leaf` maps every field test, `combine` receives the folded values of
    /// a composite's children in their original order.
    pub fn fold<T>(
        &self,
        mut leaf: impl FnMut(&FieldPredicate) -> T,
        mut combine: impl FnMut(BoolOp, Vec<T>) -> T,
    ) -> T {
        let mut steps = vec![Step::Enter(self)];
        let mut values: Vec<T> = Vec::new();

        while let Some(step) = steps.pop() {
            match step {
                Step::Enter(Predicate::Field(field)) => values.push(leaf(field)),
                Step::Enter(composite) => {
                    let children = composite.children();
                    let op = composite.junction().unwrap_or(BoolOp::And);
                    steps.push(Step::Combine(op, children.len()));
                    steps.extend(children.iter().rev().map(Step::Enter));
                }
                Step::Combine(op, arity) => {
                    let operands = values.split_off(values.len() - arity);
                    values.push(combine(op, operands));
                }
            }
        }

        match values.pop() {
            Some(value) => value,
            None => unreachable!("a predicate always folds to one value"),
        }
    }

    /// Number of field tests in the tree.
    pub fn leaf_count(&self) -> usize {
        self.fold(|_| 1, |_, counts| counts.into_iter().sum())
    }

    /// Nesting depth; a lone field test has depth 1.
    pub fn depth(&self) -> usize {
        self.fold(|_| 1, |_, depths| depths.into_iter().max().unwrap_or(0) + 1)
    }

    /// Distinct joins referenced by the field tests, in first-use order.
    pub fn joins(&self) -> Vec<Arc<JoinSpec>> {
        let mut joins: Vec<Arc<JoinSpec>> = Vec::new();
        self.fold(
            |field| {
                if let Some(join) = &field.column.join {
                    if !joins.iter().any(|known| known.name == join.name) {
                        joins.push(Arc::clone(join));
                    }
                }
            },
            |_, _| (),
        );
        joins
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self.fold(
            |field| format!("{} {} {}", field.column, field.operator, field.value),
            |op, parts| format!("{op}({})", parts.join(", ")),
        );
        f.write_str(&rendered)
    }
}

impl Clone for Predicate {
    fn clone(&self) -> Self {
        self.fold(
            |field| Predicate::Field(field.clone()),
            |op, children| match op {
                BoolOp::And => Predicate::And(children),
                BoolOp::Or => Predicate::Or(children),
            },
        )
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self, other)];
        while let Some((left, right)) = pending.pop() {
            match (left, right) {
                (Predicate::Field(a), Predicate::Field(b)) => {
                    if a != b {
                        return false;
                    }
                }
                (Predicate::And(a), Predicate::And(b)) | (Predicate::Or(a), Predicate::Or(b)) => {
                    if a.len() != b.len() {
                        return false;
                    }
                    pending.extend(a.iter().zip(b.iter()));
                }
                _ => return false,
            }
        }
        true
    }
}

struct Limited<'p>(&'p Predicate, usize);

impl fmt::Debug for Limited<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Limited(predicate, depth) = *self;
        let (name, children) = match predicate {
            Predicate::Field(field) => return f.debug_tuple("Field").field(field).finish(),
            Predicate::And(children) => ("And", children),
            Predicate::Or(children) => ("Or", children),
        };
        if depth == 0 {
            return write!(f, "{name}([..{} children])", children.len());
        }
        let children: Vec<Limited<'_>> = children.iter().map(|child| Limited(child, depth - 1)).collect();
        f.debug_tuple(name).field(&children).finish()
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Limited(self, DEBUG_DEPTH), f)
    }
}

impl Drop for Predicate {
    fn drop(&mut self) {
        let mut pending = match self {
            Predicate::Field(_) => return,
            Predicate::And(children) | Predicate::Or(children) => std::mem::take(children),
        };
        while let Some(mut predicate) = pending.pop() {
            if let Predicate::And(children) | Predicate::Or(children) = &mut predicate {
                pending.append(children);
            }
        }
    }
}
