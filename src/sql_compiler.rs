//! SQL backend that renders compiled predicates as PostgreSQL queries using sea-query.

use crate::ast::{BoolOp, Literal, Operator};
use crate::config::CatalogConfig;
use crate::error::CompileError;
use crate::predicate::{ColumnRef, FieldPredicate, Predicate};
use sea_query::{
    Asterisk, Condition, Expr, Iden, JoinType, PostgresQueryBuilder, SelectStatement, SimpleExpr,
    Value,
};
use tracing::debug;

/// Table or join alias identifier for sea-query
#[derive(Debug, Clone)]
pub struct TableName(pub String);

impl Iden for TableName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", self.0).unwrap();
    }
}

/// Column identifier wrapper
#[derive(Debug, Clone)]
pub struct ColumnName(pub String);

impl Iden for ColumnName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", self.0).unwrap();
    }
}

/// Result of rendering a predicate
#[derive(Debug, Clone, PartialEq)]
pub struct CompileResult {
    pub sql: String,
    /// Names of the joins added to the query, in order.
    pub joins: Vec<String>,
}

/// Deepest predicate rendered by default. sea-query builds and renders
/// nested conditions recursively.
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Renders predicates as `SELECT *` queries over the catalog's base table.
#[derive(Debug, Clone)]
pub struct SqlCompiler {
    base_table: String,
    max_depth: usize,
}

impl SqlCompiler {
    pub fn new(base_table: impl Into<String>) -> Self {
        Self {
            base_table: base_table.into(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn from_config(config: &CatalogConfig) -> Self {
        Self::new(config.base_table.clone())
    }

    /// Builds the query for `predicate`; `None` selects every row.
    ///
    /// Each join referenced by the predicate is added once, however many
    /// field tests go through it. Predicates nested deeper than the
    /// configured limit fail with [`CompileError::TooDeep`].
    pub fn compile(&self, predicate: Option<&Predicate>) -> Result<CompileResult, CompileError> {
        let mut select = SelectStatement::new();
        select.column(Asterisk);
        select.from(self.table());

        let mut joins = Vec::new();
        if let Some(predicate) = predicate {
            let condition = self.condition(predicate)?;
            for join in predicate.joins() {
                select.join_as(
                    JoinType::InnerJoin,
                    TableName(join.table.clone()),
                    TableName(join.name.clone()),
                    Expr::col((self.table(), ColumnName(join.local_column.clone())))
                        .equals((TableName(join.name.clone()), ColumnName(join.foreign_column.clone()))),
                );
                joins.push(join.name.clone());
            }
            select.cond_where(condition);
        }

        let sql = select.to_string(PostgresQueryBuilder);
        debug!(%sql, joins = joins.len(), "rendered filter query");
        Ok(CompileResult { sql, joins })
    }

    /// Lowers a predicate into a sea-query condition tree.
    pub fn condition(&self, predicate: &Predicate) -> Result<Condition, CompileError> {
        let depth = predicate.depth();
        if depth > self.max_depth {
            return Err(CompileError::TooDeep {
                depth,
                limit: self.max_depth,
            });
        }
        Ok(predicate.fold(
            |field| Condition::all().add(self.compile_field(field)),
            |op, parts| {
                let junction = match op {
                    BoolOp::And => Condition::all(),
                    BoolOp::Or => Condition::any(),
                };
                parts.into_iter().fold(junction, |junction, part| junction.add(part))
            },
        ))
    }

    fn table(&self) -> TableName {
        TableName(self.base_table.clone())
    }

    fn column(&self, column: &ColumnRef) -> (TableName, ColumnName) {
        let table = match &column.join {
            Some(join) => TableName(join.name.clone()),
            None => self.table(),
        };
        (table, ColumnName(column.column.clone()))
    }

    /// Compile a single field test
    fn compile_field(&self, field: &FieldPredicate) -> SimpleExpr {
        let col = Expr::col(self.column(&field.column));
        match field.operator {
            Operator::Eq => col.eq(literal_to_value(&field.value)),
            Operator::Ne => col.ne(literal_to_value(&field.value)),
            Operator::Gt => col.gt(literal_to_value(&field.value)),
            Operator::Gte => col.gte(literal_to_value(&field.value)),
            Operator::Lt => col.lt(literal_to_value(&field.value)),
            Operator::Lte => col.lte(literal_to_value(&field.value)),
            Operator::Like => col.like(pattern(&field.value)),
            Operator::NotLike => col.not_like(pattern(&field.value)),
        }
    }
}

/// Convert a literal to a sea-query value
fn literal_to_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::String(None),
        Literal::Boolean(b) => Value::Bool(Some(*b)),
        Literal::Integer(n) => Value::BigInt(Some(*n)),
        Literal::Float(x) => Value::Double(Some(*x)),
        Literal::String(s) => Value::String(Some(Box::new(s.clone()))),
    }
}

fn pattern(literal: &Literal) -> String {
    match literal {
        Literal::String(s) => s.clone(),
        other => other.to_string(),
    }
}
