//! Compiles a filter tree into a single composite predicate.
//!
//! ## Algorithm
//!
//! ```text
//! compile(root)
//!   ├─ validate()          structural checks, explicit stack
//!   ├─ expand()            pre-order walk, explicit stack
//!   │    pop group  → append Visit { op, children, subgroups: [] }
//!   │                 register it in its parent's `subgroups`
//!   │    scan children for the first nested group
//!   │      push Remainder(children after it)   ← scanned later
//!   │      push Group(nested)                   ← visited next
//!   └─ fold()              visits in reverse (deepest first)
//!        leaf child      → registry.resolve()
//!        k-th group slot → folded[subgroups[k]]
//!        combine parts with the visit's operator
//! ```
//!
//! Neither pass recurses, so the tree's depth is bounded by the heap only.

use crate::ast::{BoolOp, FilterNode};
use crate::error::CompileError;
use crate::handler::HandlerRegistry;
use crate::predicate::Predicate;
use std::sync::Arc;
use tracing::{debug, trace};

/// One group node discovered by the expansion pass.
#[derive(Debug)]
struct Visit<'a> {
    op: BoolOp,
    /// Original children of the group, before any split.
    children: &'a [FilterNode],
    /// Visit indices of the nested groups among `children`, in slot order.
    subgroups: Vec<usize>,
}

enum Expand<'a> {
    Group {
        op: BoolOp,
        children: &'a [FilterNode],
        parent: Option<usize>,
    },
    /// Children of `owner` that follow its last split-off subgroup.
    Remainder {
        owner: usize,
        rest: &'a [FilterNode],
    },
}

/// Turns filter trees into predicates using a shared, read-only registry.
#[derive(Clone)]
pub struct ExpressionCompiler {
    registry: Arc<HandlerRegistry>,
}

impl ExpressionCompiler {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Compiles `root` into one predicate.
    ///
    /// `Ok(None)` means "no filter": either no tree was given, or every
    /// criterion in it named a field no handler claims. Callers match every
    /// record in that case.
    pub fn compile(&self, root: Option<&FilterNode>) -> Result<Option<Predicate>, CompileError> {
        let Some(root) = root else {
            return Ok(None);
        };
        root.validate()?;

        let predicate = match root {
            FilterNode::Leaf(criterion) => self.registry.resolve(criterion)?,
            FilterNode::Group { op, children } => {
                let visits = expand(*op, children);
                debug!(visits = visits.len(), "expanded filter tree");
                self.fold(&visits)?
            }
        };

        match &predicate {
            Some(predicate) => debug!(leaves = predicate.leaf_count(), "compiled filter"),
            None => debug!("filter compiled to nothing, matching every record"),
        }
        Ok(predicate)
    }

    fn fold(&self, visits: &[Visit<'_>]) -> Result<Option<Predicate>, CompileError> {
        let mut folded: Vec<Option<Predicate>> = Vec::with_capacity(visits.len());
        folded.resize_with(visits.len(), || None);

        for (index, visit) in visits.iter().enumerate().rev() {
            let mut parts = Vec::with_capacity(visit.children.len());
            let mut nested = visit.subgroups.iter();

            for child in visit.children {
                let part = match child {
                    FilterNode::Leaf(criterion) => self.registry.resolve(criterion)?,
                    FilterNode::Group { .. } => {
                        nested.next().and_then(|&slot| folded[slot].take())
                    }
                };
                parts.extend(part);
            }

            trace!(
                index,
                op = %visit.op,
                children = visit.children.len(),
                resolved = parts.len(),
                "folding group"
            );
            folded[index] = combine(visit, parts)?;
        }

        Ok(folded.into_iter().next().flatten())
    }
}

/// Records every group reachable from the root in pre-order.
fn expand(op: BoolOp, children: &[FilterNode]) -> Vec<Visit<'_>> {
    let mut visits: Vec<Visit<'_>> = Vec::new();
    let mut stack = vec![Expand::Group {
        op,
        children,
        parent: None,
    }];

    while let Some(work) = stack.pop() {
        let (owner, rest) = match work {
            Expand::Group {
                op,
                children,
                parent,
            } => {
                let index = visits.len();
                visits.push(Visit {
                    op,
                    children,
                    subgroups: Vec::new(),
                });
                if let Some(parent) = parent {
                    visits[parent].subgroups.push(index);
                }
                (index, children)
            }
            Expand::Remainder { owner, rest } => (owner, rest),
        };

        let Some(position) = rest.iter().position(FilterNode::is_group) else {
            continue;
        };
        if let Some((op, children)) = rest[position].as_group() {
            stack.push(Expand::Remainder {
                owner,
                rest: &rest[position + 1..],
            });
            stack.push(Expand::Group {
                op,
                children,
                parent: Some(owner),
            });
        }
    }
    visits
}

/// Builds the predicate of one visit from its resolved parts.
///
/// A group that had a single child forwards that child's predicate
/// unwrapped; a group whose parts were all dropped yields nothing.
fn combine(visit: &Visit<'_>, mut parts: Vec<Predicate>) -> Result<Option<Predicate>, CompileError> {
    if parts.is_empty() {
        return Ok(None);
    }
    if visit.children.len() == 1 {
        return Ok(parts.pop());
    }
    Predicate::combine(visit.op, parts).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FieldCriterion, Literal, Operator, OperatorFamily};
    use crate::eval::Record;
    use crate::handler::{CatalogFieldHandler, FieldHandler, ValueKind};
    use crate::predicate::{ColumnRef, FieldPredicate};
    use crate::sql_compiler::{SqlCompiler, DEFAULT_MAX_DEPTH};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn create_test_compiler() -> ExpressionCompiler {
        let registry = HandlerRegistry::new()
            .with(CatalogFieldHandler::new(
                "bucketId",
                ColumnRef::base("bucket_id"),
                ValueKind::Integer,
                [OperatorFamily::Equality, OperatorFamily::Comparable],
            ))
            .with(CatalogFieldHandler::new(
                "name",
                ColumnRef::base("name"),
                ValueKind::String,
                [OperatorFamily::Equality, OperatorFamily::Pattern],
            ))
            .with(CatalogFieldHandler::new(
                "kind",
                ColumnRef::base("kind"),
                ValueKind::String,
                [OperatorFamily::Equality],
            ));
        ExpressionCompiler::new(Arc::new(registry))
    }

    fn bucket(id: i64) -> FilterNode {
        FilterNode::leaf("bucketId", Operator::Eq, id)
    }

    fn name(value: &str) -> FilterNode {
        FilterNode::leaf("name", Operator::Eq, value)
    }

    fn assert_field(predicate: &Predicate, column: &str, value: Literal) {
        let field = predicate
            .as_field()
            .unwrap_or_else(|| panic!("Expected field predicate, got {}", predicate));
        assert_eq!(field.column.column, column);
        assert_eq!(field.value, value);
    }

    fn record(bucket_id: i64, name: &str, kind: &str) -> Record {
        Record::new()
            .with("bucket_id", bucket_id)
            .with("name", name)
            .with("kind", kind)
    }

    fn catalog() -> Vec<Record> {
        let mut records = Vec::new();
        for bucket_id in 1..=3 {
            for name in ["name", "name2", "name3", "other"] {
                for kind in ["workflow", "script"] {
                    records.push(record(bucket_id, name, kind));
                }
            }
        }
        records
    }

    fn matching(predicate: Option<&Predicate>, records: &[Record]) -> Vec<usize> {
        records
            .iter()
            .enumerate()
            .filter(|(_, record)| predicate.map_or(true, |p| p.matches(record)))
            .map(|(index, _)| index)
            .collect()
    }

    #[test]
    fn test_absent_root_compiles_to_none() {
        let compiler = create_test_compiler();
        assert_eq!(compiler.compile(None), Ok(None));
    }

    #[test]
    fn test_nested_groups_substitute_in_position() {
        let compiler = create_test_compiler();
        let tree = FilterNode::or(vec![
            FilterNode::and(vec![bucket(1), name("name")]),
            FilterNode::and(vec![
                bucket(2),
                FilterNode::or(vec![name("name2"), name("name3")]),
            ]),
        ]);

        let predicate = compiler.compile(Some(&tree)).unwrap().unwrap();

        assert_eq!(predicate.junction(), Some(BoolOp::Or));
        assert_eq!(predicate.children().len(), 2);

        let left = &predicate.children()[0];
        assert_eq!(left.junction(), Some(BoolOp::And));
        assert_eq!(left.children().len(), 2);
        assert_field(&left.children()[0], "bucket_id", Literal::Integer(1));
        assert_field(&left.children()[1], "name", Literal::from("name"));

        let right = &predicate.children()[1];
        assert_eq!(right.junction(), Some(BoolOp::And));
        assert_eq!(right.children().len(), 2);
        assert_field(&right.children()[0], "bucket_id", Literal::Integer(2));

        let nested = &right.children()[1];
        assert_eq!(nested.junction(), Some(BoolOp::Or));
        assert_eq!(nested.children().len(), 2);
        assert_field(&nested.children()[0], "name", Literal::from("name2"));
        assert_field(&nested.children()[1], "name", Literal::from("name3"));
    }

    #[test]
    fn test_groups_between_leaves_keep_their_slots() {
        let compiler = create_test_compiler();
        let tree = FilterNode::and(vec![
            FilterNode::or(vec![bucket(1), bucket(2)]),
            name("name"),
            FilterNode::or(vec![
                FilterNode::leaf("kind", Operator::Eq, "workflow"),
                FilterNode::and(vec![bucket(3), name("other")]),
            ]),
            FilterNode::leaf("kind", Operator::Ne, "script"),
        ]);

        let predicate = compiler.compile(Some(&tree)).unwrap().unwrap();
        assert_eq!(
            predicate.to_string(),
            "AND(OR(bucket_id EQ 1, bucket_id EQ 2), name EQ \"name\", \
             OR(kind EQ \"workflow\", AND(bucket_id EQ 3, name EQ \"other\")), \
             kind NE \"script\")"
        );
    }

    #[test]
    fn test_compiled_tree_matches_recursive_evaluation() {
        let compiler = create_test_compiler();
        let tree = FilterNode::or(vec![
            FilterNode::and(vec![bucket(1), name("name")]),
            FilterNode::and(vec![
                bucket(2),
                FilterNode::or(vec![name("name2"), name("name3")]),
            ]),
        ]);
        let predicate = compiler.compile(Some(&tree)).unwrap();

        let records = catalog();
        let expected: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                let bucket_id = r.get("bucket_id");
                let name = r.get("name");
                (bucket_id == Some(&Literal::Integer(1)) && name == Some(&Literal::from("name")))
                    || (bucket_id == Some(&Literal::Integer(2))
                        && (name == Some(&Literal::from("name2"))
                            || name == Some(&Literal::from("name3"))))
            })
            .map(|(index, _)| index)
            .collect();

        assert_eq!(expected.len(), 6);
        assert_eq!(matching(predicate.as_ref(), &records), expected);
    }

    #[test]
    fn test_reassociation_does_not_change_matches() {
        let compiler = create_test_compiler();
        let records = catalog();
        let a = || FilterNode::leaf("bucketId", Operator::Gte, 2);
        let b = || FilterNode::leaf("name", Operator::Like, "name%");
        let c = || FilterNode::leaf("kind", Operator::Eq, "workflow");

        for op in [BoolOp::And, BoolOp::Or] {
            let flat = FilterNode::group(op, vec![a(), b(), c()]);
            let left = FilterNode::group(op, vec![FilterNode::group(op, vec![a(), b()]), c()]);
            let right = FilterNode::group(op, vec![a(), FilterNode::group(op, vec![b(), c()])]);

            let flat = compiler.compile(Some(&flat)).unwrap();
            let left = compiler.compile(Some(&left)).unwrap();
            let right = compiler.compile(Some(&right)).unwrap();

            let expected = matching(flat.as_ref(), &records);
            assert!(!expected.is_empty());
            assert_eq!(matching(left.as_ref(), &records), expected);
            assert_eq!(matching(right.as_ref(), &records), expected);
        }
    }

    #[test]
    fn test_unhandled_leaf_is_dropped() {
        let compiler = create_test_compiler();
        let tree = FilterNode::and(vec![
            bucket(1),
            FilterNode::leaf("owner", Operator::Eq, "alice"),
            name("name"),
        ]);

        let predicate = compiler.compile(Some(&tree)).unwrap().unwrap();
        assert_eq!(predicate.to_string(), "AND(bucket_id EQ 1, name EQ \"name\")");
    }

    #[test]
    fn test_partially_dropped_group_keeps_its_junction() {
        let compiler = create_test_compiler();
        let tree = FilterNode::or(vec![bucket(1), FilterNode::leaf("owner", Operator::Eq, "alice")]);

        let predicate = compiler.compile(Some(&tree)).unwrap().unwrap();
        assert_eq!(predicate.junction(), Some(BoolOp::Or));
        assert_eq!(predicate.children().len(), 1);
    }

    #[test]
    fn test_group_of_unhandled_leaves_contributes_nothing() {
        let compiler = create_test_compiler();
        let tree = FilterNode::and(vec![
            bucket(1),
            FilterNode::or(vec![
                FilterNode::leaf("owner", Operator::Eq, "alice"),
                FilterNode::and(vec![FilterNode::leaf("tag", Operator::Eq, "x")]),
            ]),
            name("name"),
        ]);

        let predicate = compiler.compile(Some(&tree)).unwrap().unwrap();
        assert_eq!(predicate.to_string(), "AND(bucket_id EQ 1, name EQ \"name\")");
    }

    #[test]
    fn test_fully_unhandled_tree_compiles_to_none() {
        let compiler = create_test_compiler();
        let tree = FilterNode::or(vec![
            FilterNode::leaf("owner", Operator::Eq, "alice"),
            FilterNode::leaf("tag", Operator::Eq, "x"),
        ]);
        assert_eq!(compiler.compile(Some(&tree)), Ok(None));
    }

    #[test]
    fn test_single_child_root_group_is_not_lost() {
        let compiler = create_test_compiler();
        for tree in [FilterNode::and(vec![bucket(7)]), FilterNode::or(vec![bucket(7)])] {
            let predicate = compiler.compile(Some(&tree)).unwrap().unwrap();
            assert_field(&predicate, "bucket_id", Literal::Integer(7));
        }
    }

    #[test]
    fn test_single_child_groups_match_like_their_child() {
        let compiler = create_test_compiler();
        let records = catalog();
        let lone = compiler.compile(Some(&name("name2"))).unwrap();
        let wrapped_and = compiler.compile(Some(&FilterNode::and(vec![name("name2")]))).unwrap();
        let wrapped_or = compiler.compile(Some(&FilterNode::or(vec![name("name2")]))).unwrap();

        let expected = matching(lone.as_ref(), &records);
        assert_eq!(matching(wrapped_and.as_ref(), &records), expected);
        assert_eq!(matching(wrapped_or.as_ref(), &records), expected);
    }

    #[test]
    fn test_single_leaf_root() {
        let compiler = create_test_compiler();
        let predicate = compiler
            .compile(Some(&FilterNode::leaf("name", Operator::Like, "na%")))
            .unwrap()
            .unwrap();
        assert_eq!(predicate.to_string(), "name LIKE \"na%\"");
        assert_eq!(
            compiler.compile(Some(&FilterNode::leaf("owner", Operator::Eq, "x"))),
            Ok(None)
        );
    }

    #[test]
    fn test_deep_single_child_nesting_does_not_overflow() {
        let compiler = create_test_compiler();
        let mut tree = name("deep");
        for level in 0..10_000 {
            let op = if level % 3 == 0 { BoolOp::Or } else { BoolOp::And };
            tree = FilterNode::group(op, vec![tree]);
        }

        let predicate = compiler.compile(Some(&tree)).unwrap().unwrap();
        assert_field(&predicate, "name", Literal::from("deep"));
    }

    #[test]
    fn test_deep_two_child_chain_does_not_overflow() {
        let compiler = create_test_compiler();
        let mut tree = name("name");
        for level in 0..10_000 {
            let op = if level % 2 == 0 { BoolOp::And } else { BoolOp::Or };
            tree = FilterNode::group(op, vec![tree, FilterNode::leaf("bucketId", Operator::Gte, 1)]);
        }

        let predicate = compiler.compile(Some(&tree)).unwrap().unwrap();
        assert_eq!(predicate.depth(), 10_001);
        assert_eq!(predicate.leaf_count(), 10_001);
        assert!(predicate.matches(&record(1, "name", "workflow")));
    }

    #[test]
    fn test_deep_compiled_predicate_clones_and_renders_safely() {
        let compiler = create_test_compiler();
        let mut tree = name("name");
        for level in 0..10_000 {
            let op = if level % 2 == 0 { BoolOp::And } else { BoolOp::Or };
            tree = FilterNode::group(op, vec![FilterNode::leaf("bucketId", Operator::Gte, 1), tree]);
        }
        let copied_tree = tree.clone();
        assert!(copied_tree == tree);

        let predicate = compiler.compile(Some(&copied_tree)).unwrap().unwrap();
        let copy = predicate.clone();
        assert!(copy == predicate);
        assert_eq!(copy.depth(), 10_001);

        let sql = SqlCompiler::new("catalog_object_revision");
        assert_eq!(
            sql.compile(Some(&copy)),
            Err(CompileError::TooDeep {
                depth: 10_001,
                limit: DEFAULT_MAX_DEPTH,
            })
        );
    }

    #[test]
    fn test_empty_group_fails_before_any_handler_runs() {
        struct Tripwire(Arc<AtomicUsize>);

        impl FieldHandler for Tripwire {
            fn can_handle(&self, _: &FieldCriterion) -> bool {
                self.0.fetch_add(1, Ordering::SeqCst);
                true
            }

            fn compile(&self, criterion: &FieldCriterion) -> Result<Predicate, CompileError> {
                Ok(Predicate::Field(FieldPredicate {
                    field: criterion.field.clone(),
                    column: ColumnRef::base("x"),
                    operator: criterion.operator,
                    value: criterion.value.clone(),
                }))
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let compiler = ExpressionCompiler::new(Arc::new(
            HandlerRegistry::new().with(Tripwire(Arc::clone(&calls))),
        ));
        let tree = FilterNode::and(vec![bucket(1), FilterNode::or(vec![])]);

        assert!(matches!(
            compiler.compile(Some(&tree)),
            Err(CompileError::Structural { ref path, .. }) if path == "root.1"
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsupported_operator_propagates() {
        let compiler = create_test_compiler();
        let tree = FilterNode::or(vec![
            bucket(1),
            FilterNode::and(vec![name("a"), FilterNode::leaf("kind", Operator::Like, "work%")]),
        ]);

        assert_eq!(
            compiler.compile(Some(&tree)),
            Err(CompileError::UnsupportedOperator {
                field: "kind".to_string(),
                operator: Operator::Like,
            })
        );
    }

    #[test]
    fn test_dispatch_order_within_compiled_tree() {
        struct Counting {
            column: &'static str,
            calls: Arc<AtomicUsize>,
        }

        impl FieldHandler for Counting {
            fn can_handle(&self, criterion: &FieldCriterion) -> bool {
                criterion.field.as_str() == "name"
            }

            fn compile(&self, criterion: &FieldCriterion) -> Result<Predicate, CompileError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(Predicate::Field(FieldPredicate {
                    field: criterion.field.clone(),
                    column: ColumnRef::base(self.column),
                    operator: criterion.operator,
                    value: criterion.value.clone(),
                }))
            }
        }

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let registry = HandlerRegistry::new()
            .with(Counting {
                column: "primary",
                calls: Arc::clone(&first),
            })
            .with(Counting {
                column: "fallback",
                calls: Arc::clone(&second),
            });
        let compiler = ExpressionCompiler::new(Arc::new(registry));
        let tree = FilterNode::or(vec![name("a"), FilterNode::and(vec![name("b"), name("c")])]);

        let predicate = compiler.compile(Some(&tree)).unwrap().unwrap();
        assert_eq!(
            predicate.to_string(),
            "OR(primary EQ \"a\", AND(primary EQ \"b\", primary EQ \"c\"))"
        );
        assert_eq!(first.load(Ordering::SeqCst), 3);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_compilations_share_one_registry() {
        let compiler = create_test_compiler();

        std::thread::scope(|scope| {
            let handles: Vec<_> = (1..=8)
                .map(|id| {
                    let compiler = compiler.clone();
                    scope.spawn(move || {
                        let tree = FilterNode::or(vec![
                            bucket(id),
                            FilterNode::and(vec![bucket(id + 100), name("name")]),
                        ]);
                        compiler.compile(Some(&tree)).unwrap().unwrap().to_string()
                    })
                })
                .collect();

            for (id, handle) in (1..=8).zip(handles) {
                assert_eq!(
                    handle.join().unwrap(),
                    format!(
                        "OR(bucket_id EQ {id}, AND(bucket_id EQ {}, name EQ \"name\"))",
                        id + 100
                    )
                );
            }
        });
    }
}
