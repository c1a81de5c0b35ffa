//! Catalog configuration: which fields are filterable, where they live, and
//! which operators they accept. Loaded from a JSON file.
//!
//! ```text
//! {
//!   "base_table": "catalog_object_revision",
//!   "joins": [{"name": "catalog_object", "table": "catalog_object",
//!              "local_column": "catalog_object_id", "foreign_column": "id"}],
//!   "fields": [{"name": "name", "column": "name", "join": "catalog_object",
//!               "kind": "string", "operators": ["equality", "pattern"]}]
//! }
//! ```

use crate::ast::OperatorFamily;
use crate::handler::ValueKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file does not exist: {0}")]
    Missing(PathBuf),

    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("join '{0}' is declared more than once")]
    DuplicateJoin(String),

    #[error("field '{0}' is declared more than once")]
    DuplicateField(String),

    #[error("field '{field}' refers to unknown join '{join}'")]
    UnknownJoin { field: String, join: String },

    #[error("field '{0}' enables no operators")]
    NoOperators(String),

    #[error("field '{field}' of kind {kind} cannot support {family} operators")]
    IncompatibleFamily {
        field: String,
        kind: ValueKind,
        family: OperatorFamily,
    },
}

/// A relation reachable from the base table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinConfig {
    pub name: String,
    pub table: String,
    pub local_column: String,
    pub foreign_column: String,
}

/// One filterable field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    /// Name clients use in filter criteria.
    pub name: String,
    pub column: String,
    /// Join the column lives behind; `None` for base table columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<String>,
    pub kind: ValueKind,
    pub operators: Vec<OperatorFamily>,
}

/// Catalog schema as seen by the filter compiler.
///
/// Field order is dispatch order: handlers are registered in the order the
/// fields are declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub base_table: String,
    #[serde(default)]
    pub joins: Vec<JoinConfig>,
    pub fields: Vec<FieldConfig>,
}

impl CatalogConfig {
    /// Loads and validates a configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(ConfigError::Missing(path_ref.to_path_buf()));
        }

        let content = fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.to_path_buf(),
            source,
        })?;

        let config: CatalogConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                origin: path_ref.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: CatalogConfig =
            serde_json::from_str(content).map_err(|source| ConfigError::Parse {
                origin: "<inline>".to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks join references, name uniqueness and that every field's
    /// operator families fit its value kind.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut joins = HashSet::new();
        for join in &self.joins {
            if !joins.insert(join.name.as_str()) {
                return Err(ConfigError::DuplicateJoin(join.name.clone()));
            }
        }

        let mut fields = HashSet::new();
        for field in &self.fields {
            if !fields.insert(field.name.as_str()) {
                return Err(ConfigError::DuplicateField(field.name.clone()));
            }
            if let Some(join) = &field.join {
                if !joins.contains(join.as_str()) {
                    return Err(ConfigError::UnknownJoin {
                        field: field.name.clone(),
                        join: join.clone(),
                    });
                }
            }
            if field.operators.is_empty() {
                return Err(ConfigError::NoOperators(field.name.clone()));
            }
            if let Some(family) = field.operators.iter().find(|f| !field.kind.supports(**f)) {
                return Err(ConfigError::IncompatibleFamily {
                    field: field.name.clone(),
                    kind: field.kind,
                    family: *family,
                });
            }
        }
        Ok(())
    }

    pub fn join(&self, name: &str) -> Option<&JoinConfig> {
        self.joins.iter().find(|join| join.name == name)
    }
}

impl Default for CatalogConfig {
    /// Catalog object revisions, joined to the catalog object they belong to
    /// and to their key/value metadata. Fields follow the catalog's dispatch
    /// order: bucket, kind, name, metadata, then the remaining columns.
    fn default() -> Self {
        let object = || Some("catalog_object".to_string());
        let metadata = || Some("metadata".to_string());
        let join = |name: &str, table: &str, local_column: &str, foreign_column: &str| JoinConfig {
            name: name.to_string(),
            table: table.to_string(),
            local_column: local_column.to_string(),
            foreign_column: foreign_column.to_string(),
        };
        let field = |name: &str,
                     column: &str,
                     join: Option<String>,
                     kind: ValueKind,
                     operators: &[OperatorFamily]| FieldConfig {
            name: name.to_string(),
            column: column.to_string(),
            join,
            kind,
            operators: operators.to_vec(),
        };
        use OperatorFamily::{Comparable, Equality, Pattern};

        Self {
            base_table: "catalog_object_revision".to_string(),
            joins: vec![
                join("catalog_object", "catalog_object", "catalog_object_id", "id"),
                join("metadata", "key_value_label_metadata", "id", "catalog_object_revision_id"),
            ],
            fields: vec![
                field("bucketId", "bucket_id", object(), ValueKind::Integer, &[Equality]),
                field("kind", "kind", object(), ValueKind::String, &[Equality, Pattern]),
                field("name", "name", object(), ValueKind::String, &[Equality, Pattern]),
                field("metadataKey", "key", metadata(), ValueKind::String, &[Equality, Pattern]),
                field("metadataValue", "value", metadata(), ValueKind::String, &[Equality, Pattern]),
                field("contentType", "content_type", object(), ValueKind::String, &[Equality, Pattern]),
                field("projectName", "project_name", None, ValueKind::String, &[Equality, Pattern]),
                field("commitTime", "commit_time", None, ValueKind::Integer, &[Equality, Comparable]),
                field("commitMessage", "commit_message", None, ValueKind::String, &[Pattern]),
            ],
        }
    }
}
