//! In-memory evaluation of compiled predicates.
//!
//! Mirrors the SQL backend's semantics closely enough to check filters
//! without a database: a missing or null column fails every comparison,
//! and LIKE patterns understand `%` and `_`.

use crate::ast::{BoolOp, Literal, Operator};
use crate::predicate::{FieldPredicate, Predicate};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A catalog row together with the rows reached through its joins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: BTreeMap<String, Literal>,
    joined: BTreeMap<String, Record>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Literal>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    /// Attaches the row reached through the join called `join`.
    pub fn with_joined(mut self, join: impl Into<String>, record: Record) -> Self {
        self.joined.insert(join.into(), record);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Literal> {
        self.columns.get(column)
    }

    fn lookup(&self, field: &FieldPredicate) -> Option<&Literal> {
        let row = match &field.column.join {
            Some(join) => self.joined.get(&join.name)?,
            None => self,
        };
        row.get(&field.column.column)
    }
}

impl Predicate {
    pub fn matches(&self, record: &Record) -> bool {
        self.fold(
            |field| matches_field(field, record),
            |op, results| match op {
                BoolOp::And => results.into_iter().all(|matched| matched),
                BoolOp::Or => results.into_iter().any(|matched| matched),
            },
        )
    }
}

fn matches_field(field: &FieldPredicate, record: &Record) -> bool {
    let Some(actual) = record.lookup(field).filter(|value| !value.is_null()) else {
        return false;
    };
    match field.operator {
        Operator::Eq => compare(actual, &field.value) == Some(Ordering::Equal),
        Operator::Ne => matches!(compare(actual, &field.value), Some(o) if o != Ordering::Equal),
        Operator::Gt => compare(actual, &field.value) == Some(Ordering::Greater),
        Operator::Gte => matches!(
            compare(actual, &field.value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::Lt => compare(actual, &field.value) == Some(Ordering::Less),
        Operator::Lte => matches!(
            compare(actual, &field.value),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Operator::Like => like(actual, &field.value).unwrap_or(false),
        Operator::NotLike => like(actual, &field.value).map_or(false, |matched| !matched),
    }
}

fn compare(left: &Literal, right: &Literal) -> Option<Ordering> {
    match (left, right) {
        (Literal::String(a), Literal::String(b)) => Some(a.cmp(b)),
        (Literal::Integer(a), Literal::Integer(b)) => Some(a.cmp(b)),
        (Literal::Float(a), Literal::Float(b)) => a.partial_cmp(b),
        (Literal::Integer(a), Literal::Float(b)) => (*a as f64).partial_cmp(b),
        (Literal::Float(a), Literal::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (Literal::Boolean(a), Literal::Boolean(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn like(value: &Literal, pattern: &Literal) -> Option<bool> {
    match (value, pattern) {
        (Literal::String(value), Literal::String(pattern)) => Some(like_match(value, pattern)),
        _ => None,
    }
}

/// SQL LIKE matching: `%` spans any run of characters, `_` exactly one.
pub fn like_match(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut v, mut p) = (0, 0);
    // Position of the last `%` seen and the value index it is currently absorbing up to.
    let mut backtrack: Option<(usize, usize)> = None;

    while v < value.len() {
        match pattern.get(p) {
            Some('%') => {
                backtrack = Some((p, v));
                p += 1;
            }
            Some('_') => {
                v += 1;
                p += 1;
            }
            Some(c) if *c == value[v] => {
                v += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, absorbed)) => {
                    p = star + 1;
                    v = absorbed + 1;
                    backtrack = Some((star, absorbed + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '%')
}
