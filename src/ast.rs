//! The filter tree a search request is parsed into.
//!
//! A tree is either a single [`FieldCriterion`] or an AND/OR group of
//! nested trees. The JSON form accepted by [`FilterNode`]'s `Deserialize`
//! impl mirrors the request payload:
//!
//! ```text
//! {"or": [
//!     {"and": [{"field": "bucketId", "op": "eq", "value": 1},
//!              {"field": "name", "op": "like", "value": "wf%"}]},
//!     {"field": "kind", "op": "ne", "value": "script"}
//! ]}
//! ```

use crate::error::CompileError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a filterable field, as the client spells it (e.g. `bucketId`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(pub String);

impl FieldId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FieldId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Comparison requested by a leaf criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Like,
    NotLike,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Groups of operators that a field handler enables together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorFamily {
    /// EQ / NE
    Equality,
    /// GT / GTE / LT / LTE
    Comparable,
    /// LIKE / NOT_LIKE
    Pattern,
}

impl Operator {
    pub fn family(self) -> OperatorFamily {
        match self {
            Operator::Eq | Operator::Ne => OperatorFamily::Equality,
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                OperatorFamily::Comparable
            }
            Operator::Like | Operator::NotLike => OperatorFamily::Pattern,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operator::Eq => "EQ",
            Operator::Ne => "NE",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT_LIKE",
            Operator::Gt => "GT",
            Operator::Gte => "GTE",
            Operator::Lt => "LT",
            Operator::Lte => "LTE",
        };
        f.write_str(name)
    }
}

impl fmt::Display for OperatorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatorFamily::Equality => "equality",
            OperatorFamily::Comparable => "comparable",
            OperatorFamily::Pattern => "pattern",
        };
        f.write_str(name)
    }
}

/// Boolean operator of a group node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoolOp {
    And,
    Or,
}

impl fmt::Display for BoolOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoolOp::And => f.write_str("AND"),
            BoolOp::Or => f.write_str("OR"),
        }
    }
}

/// Literal value of a criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Literal {
    /// Name of the literal's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Null => "null",
            Literal::Boolean(_) => "boolean",
            Literal::Integer(_) => "integer",
            Literal::Float(_) => "float",
            Literal::String(_) => "string",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Literal::Null)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Boolean(b) => write!(f, "{b}"),
            Literal::Integer(n) => write!(f, "{n}"),
            Literal::Float(x) => write!(f, "{x}"),
            Literal::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::String(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::String(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Integer(value)
    }
}

impl From<i32> for Literal {
    fn from(value: i32) -> Self {
        Literal::Integer(i64::from(value))
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Float(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Boolean(value)
    }
}

/// One leaf test, e.g. `name LIKE "wf%"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCriterion {
    pub field: FieldId,
    #[serde(rename = "op")]
    pub operator: Operator,
    pub value: Literal,
}

impl FieldCriterion {
    pub fn new(field: impl Into<FieldId>, operator: Operator, value: impl Into<Literal>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

impl fmt::Display for FieldCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.operator, self.value)
    }
}

/// A node of the filter tree.
///
/// Cloning, comparing and dropping a node never recurse, so trees nested
/// far deeper than the call stack allows are handled safely. `Debug`
/// elides groups below a fixed depth.
#[derive(Deserialize)]
#[serde(from = "RawNode")]
pub enum FilterNode {
    Leaf(FieldCriterion),
    Group { op: BoolOp, children: Vec<FilterNode> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNode {
    And { and: Vec<FilterNode> },
    Or { or: Vec<FilterNode> },
    Leaf(FieldCriterion),
}

impl From<RawNode> for FilterNode {
    fn from(raw: RawNode) -> Self {
        match raw {
            RawNode::And { and } => FilterNode::group(BoolOp::And, and),
            RawNode::Or { or } => FilterNode::group(BoolOp::Or, or),
            RawNode::Leaf(criterion) => FilterNode::Leaf(criterion),
        }
    }
}

impl FilterNode {
    pub fn leaf(field: impl Into<FieldId>, operator: Operator, value: impl Into<Literal>) -> Self {
        FilterNode::Leaf(FieldCriterion::new(field, operator, value))
    }

    pub fn group(op: BoolOp, children: Vec<FilterNode>) -> Self {
        FilterNode::Group { op, children }
    }

    pub fn and(children: Vec<FilterNode>) -> Self {
        Self::group(BoolOp::And, children)
    }

    pub fn or(children: Vec<FilterNode>) -> Self {
        Self::group(BoolOp::Or, children)
    }

    pub fn is_group(&self) -> bool {
        matches!(self, FilterNode::Group { .. })
    }

    pub fn as_group(&self) -> Option<(BoolOp, &[FilterNode])> {
        match self {
            FilterNode::Group { op, children } => Some((*op, children.as_slice())),
            FilterNode::Leaf(_) => None,
        }
    }

    /// Checks the structural invariants of the whole tree: every group has
    /// at least one child and every criterion names a field.
    ///
    /// The error carries the offending node's path, `root` followed by the
    /// child index at each level (`root.1.0`).
    pub fn validate(&self) -> Result<(), CompileError> {
        // (parent trail index, child slot) per visited node; paths are only
        // rebuilt on failure so deep trees stay linear in memory.
        let mut trail: Vec<(Option<usize>, usize)> = Vec::new();
        let mut pending: Vec<(&FilterNode, Option<usize>, usize)> = vec![(self, None, 0)];

        while let Some((node, parent, slot)) = pending.pop() {
            let index = trail.len();
            trail.push((parent, slot));

            match node {
                FilterNode::Leaf(criterion) => {
                    if criterion.field.as_str().trim().is_empty() {
                        return Err(CompileError::structural(
                            render_path(&trail, index),
                            "criterion does not name a field",
                        ));
                    }
                }
                FilterNode::Group { op, children } => {
                    if children.is_empty() {
                        return Err(CompileError::structural(
                            render_path(&trail, index),
                            format!("{op} group has no children"),
                        ));
                    }
                    for (slot, child) in children.iter().enumerate().rev() {
                        pending.push((child, Some(index), slot));
                    }
                }
            }
        }
        Ok(())
    }
}

fn render_path(trail: &[(Option<usize>, usize)], mut index: usize) -> String {
    let mut slots = Vec::new();
    while let (Some(parent), slot) = trail[index] {
        slots.push(slot);
        index = parent;
    }
    let mut path = String::from("root");
    for slot in slots.iter().rev() {
        path.push('.');
        path.push_str(&slot.to_string());
    }
    path
}

const DEBUG_DEPTH: usize = 32;

impl Clone for FilterNode {
    fn clone(&self) -> Self {
        enum Step<'n> {
            Enter(&'n FilterNode),
            Build(BoolOp, usize),
        }

        let mut steps = vec![Step::Enter(self)];
        let mut built: Vec<FilterNode> = Vec::new();
        while let Some(step) = steps.pop() {
            match step {
                Step::Enter(FilterNode::Leaf(criterion)) => built.push(FilterNode::Leaf(criterion.clone())),
                Step::Enter(FilterNode::Group { op, children }) => {
                    steps.push(Step::Build(*op, children.len()));
                    steps.extend(children.iter().rev().map(Step::Enter));
                }
                Step::Build(op, arity) => {
                    let children = built.split_off(built.len() - arity);
                    built.push(FilterNode::Group { op, children });
                }
            }
        }

        match built.pop() {
            Some(node) => node,
            None => unreachable!("cloning a node always yields one node"),
        }
    }
}

impl PartialEq for FilterNode {
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self, other)];
        while let Some((left, right)) = pending.pop() {
            match (left, right) {
                (FilterNode::Leaf(a), FilterNode::Leaf(b)) => {
                    if a != b {
                        return false;
                    }
                }
                (
                    FilterNode::Group { op: left_op, children: a },
                    FilterNode::Group { op: right_op, children: b },
                ) => {
                    if left_op != right_op || a.len() != b.len() {
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

struct Limited<'n>(&'n FilterNode, usize);

impl fmt::Debug for Limited<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Limited(node, depth) = *self;
        match node {
            FilterNode::Leaf(criterion) => f.debug_tuple("Leaf").field(criterion).finish(),
            FilterNode::Group { op, children } if depth == 0 => {
                write!(f, "Group {{ op: {op:?}, children: [..{}] }}", children.len())
            }
            FilterNode::Group { op, children } => {
                let children: Vec<Limited<'_>> =
                    children.iter().map(|child| Limited(child, depth - 1)).collect();
                f.debug_struct("Group")
                    .field("op", op)
                    .field("children", &children)
                    .finish()
            }
        }
    }
}

impl fmt::Debug for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Limited(self, DEBUG_DEPTH), f)
    }
}

impl Drop for FilterNode {
    fn drop(&mut self) {
        if let FilterNode::Group { children, .. } = self {
            let mut pending = std::mem::take(children);
            while let Some(mut node) = pending.pop() {
                if let FilterNode::Group { children, .. } = &mut node {
                    pending.append(children);
                }
            }
        }
    }
}
