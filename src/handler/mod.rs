//! Field handlers and the ordered registry that dispatches leaf criteria.

mod field;

pub use field::{CatalogFieldHandler, ValueKind};

use crate::ast::FieldCriterion;
use crate::config::{CatalogConfig, ConfigError};
use crate::error::CompileError;
use crate::predicate::{ColumnRef, JoinSpec, Predicate};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Recognises and compiles leaf criteria for one field.
///
/// Handlers are built once at startup and shared by every compilation, so
/// they must not keep per-call state.
pub trait FieldHandler: Send + Sync {
    fn can_handle(&self, criterion: &FieldCriterion) -> bool;

    fn compile(&self, criterion: &FieldCriterion) -> Result<Predicate, CompileError>;
}

/// Handlers in dispatch-priority order.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn FieldHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler; it is consulted after every handler registered before it.
    pub fn register(&mut self, handler: impl FieldHandler + 'static) -> &mut Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with(mut self, handler: impl FieldHandler + 'static) -> Self {
        self.register(handler);
        self
    }

    /// Builds one [`CatalogFieldHandler`] per configured field, in declaration
    /// order. Fields behind the same join share a single join handle.
    pub fn from_config(config: &CatalogConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let joins: HashMap<&str, Arc<JoinSpec>> = config
            .joins
            .iter()
            .map(|join| {
                let spec = JoinSpec {
                    name: join.name.clone(),
                    table: join.table.clone(),
                    local_column: join.local_column.clone(),
                    foreign_column: join.foreign_column.clone(),
                };
                (join.name.as_str(), Arc::new(spec))
            })
            .collect();

        let mut registry = Self::new();
        for field in &config.fields {
            let column = match &field.join {
                Some(name) => {
                    let join = joins.get(name.as_str()).ok_or_else(|| ConfigError::UnknownJoin {
                        field: field.name.clone(),
                        join: name.clone(),
                    })?;
                    ColumnRef::joined(Arc::clone(join), field.column.clone())
                }
                None => ColumnRef::base(field.column.clone()),
            };
            registry.register(CatalogFieldHandler::new(
                field.name.as_str(),
                column,
                field.kind,
                field.operators.iter().copied(),
            ));
        }

        debug!(handlers = registry.len(), base_table = %config.base_table, "built handler registry");
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Compiles `criterion` with the first handler that claims it.
    ///
    /// `Ok(None)` means no handler knows the field; the caller drops the
    /// criterion instead of failing.
    pub fn resolve(&self, criterion: &FieldCriterion) -> Result<Option<Predicate>, CompileError> {
        match self.handlers.iter().find(|handler| handler.can_handle(criterion)) {
            Some(handler) => handler.compile(criterion).map(Some),
            None => {
                trace!(criterion = %criterion, "no handler claims criterion, dropping it");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FieldId, Operator};
    use crate::predicate::FieldPredicate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Claims one field and counts how often it compiles.
    struct CountingHandler {
        field: &'static str,
        column: &'static str,
        compiled: Arc<AtomicUsize>,
    }

    impl FieldHandler for CountingHandler {
        fn can_handle(&self, criterion: &FieldCriterion) -> bool {
            criterion.field.as_str() == self.field
        }

        fn compile(&self, criterion: &FieldCriterion) -> Result<Predicate, CompileError> {
            self.compiled.fetch_add(1, Ordering::SeqCst);
            Ok(Predicate::Field(FieldPredicate {
                field: criterion.field.clone(),
                column: ColumnRef::base(self.column),
                operator: criterion.operator,
                value: criterion.value.clone(),
            }))
        }
    }

    #[test]
    fn test_first_registered_handler_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let registry = HandlerRegistry::new()
            .with(CountingHandler {
                field: "name",
                column: "first_name",
                compiled: Arc::clone(&first),
            })
            .with(CountingHandler {
                field: "name",
                column: "second_name",
                compiled: Arc::clone(&second),
            });

        let criterion = FieldCriterion::new("name", Operator::Eq, "a");
        let predicate = registry.resolve(&criterion).unwrap().unwrap();

        assert_eq!(predicate.as_field().unwrap().column.column, "first_name");
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unclaimed_criterion_resolves_to_none() {
        let compiled = Arc::new(AtomicUsize::new(0));
        let registry = HandlerRegistry::new().with(CountingHandler {
            field: "name",
            column: "name",
            compiled: Arc::clone(&compiled),
        });

        let criterion = FieldCriterion {
            field: FieldId::from("owner"),
            operator: Operator::Eq,
            value: "bob".into(),
        };
        assert_eq!(registry.resolve(&criterion), Ok(None));
        assert_eq!(compiled.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_registry_from_default_config() {
        let registry = HandlerRegistry::from_config(&CatalogConfig::default()).unwrap();
        assert_eq!(registry.len(), 9);

        let name = registry
            .resolve(&FieldCriterion::new("name", Operator::Like, "wf%"))
            .unwrap()
            .unwrap();
        let bucket = registry
            .resolve(&FieldCriterion::new("bucketId", Operator::Eq, 3))
            .unwrap()
            .unwrap();
        let name_join = name.as_field().unwrap().column.join.clone().unwrap();
        let bucket_join = bucket.as_field().unwrap().column.join.clone().unwrap();
        assert!(Arc::ptr_eq(&name_join, &bucket_join));

        let key = registry
            .resolve(&FieldCriterion::new("metadataKey", Operator::Eq, "owner"))
            .unwrap()
            .unwrap();
        let value = registry
            .resolve(&FieldCriterion::new("metadataValue", Operator::NotLike, "tmp%"))
            .unwrap()
            .unwrap();
        let key_join = key.as_field().unwrap().column.join.clone().unwrap();
        let value_join = value.as_field().unwrap().column.join.clone().unwrap();
        assert!(Arc::ptr_eq(&key_join, &value_join));
        assert!(!Arc::ptr_eq(&key_join, &name_join));
        assert_eq!(key_join.table, "key_value_label_metadata");

        let commit = registry
            .resolve(&FieldCriterion::new("commitTime", Operator::Gt, 10))
            .unwrap()
            .unwrap();
        assert!(commit.as_field().unwrap().column.join.is_none());

        assert_eq!(
            registry.resolve(&FieldCriterion::new("bucketId", Operator::Gt, 3)),
            Err(CompileError::UnsupportedOperator {
                field: "bucketId".to_string(),
                operator: Operator::Gt,
            })
        );
    }

    #[test]
    fn test_empty_registry_drops_everything() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        let criterion = FieldCriterion::new("name", Operator::Like, "%");
        assert_eq!(registry.resolve(&criterion), Ok(None));
    }
}
