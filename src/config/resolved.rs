//! Resolved model schema: config validated and flattened for runtime use.

use crate::config::ValidationRule;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Value family of a column, used for coercion, casts and serialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    BigInt,
    Float,
    Numeric,
    Text,
    Boolean,
    Date,
    Time,
    DateTime,
    DateTimeTz,
    Interval,
    Uuid,
    Json,
    /// Schema-qualified custom type (enum); read back as text.
    Custom,
}

impl ColumnKind {
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            ColumnKind::Date | ColumnKind::Time | ColumnKind::DateTime | ColumnKind::DateTimeTz
        )
    }
}

#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ColumnKind,
    /// PostgreSQL type name for parameter casts (e.g. "timestamptz").
    pub pg_type: String,
    pub nullable: bool,
    /// Whether the column has a DB default (e.g. serial, NOW()).
    pub has_default: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub on_update: Option<String>,
    pub writable: bool,
}

#[derive(Clone, Debug)]
pub enum RelationKind {
    /// Our column references the target's primary key.
    ToOne { foreign_key: String },
    /// Target column references our primary key.
    ToMany { foreign_key: String },
    /// Association table joining our primary key to the target's.
    ManyToMany {
        table: String,
        local_column: String,
        remote_column: String,
    },
}

#[derive(Clone, Debug)]
pub struct RelationInfo {
    pub name: String,
    /// Name of the related model.
    pub target: String,
    pub kind: RelationKind,
}

impl RelationInfo {
    pub fn is_to_many(&self) -> bool {
        !matches!(self.kind, RelationKind::ToOne { .. })
    }
}

#[derive(Clone, Debug)]
pub struct ResolvedModel {
    pub name: String,
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    /// Table primary key column.
    pub primary_key: String,
    pub relationships: Vec<RelationInfo>,
    pub validation: HashMap<String, ValidationRule>,
}

impl ResolvedModel {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationInfo> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn primary_key_column(&self) -> &ColumnInfo {
        self.column(&self.primary_key)
            .unwrap_or_else(|| &self.columns[0])
    }

    /// Names of our columns that hold to-one foreign keys.
    pub fn foreign_keys(&self) -> HashSet<&str> {
        self.relationships
            .iter()
            .filter_map(|r| match &r.kind {
                RelationKind::ToOne { foreign_key } => Some(foreign_key.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Columns that are exposed as resource attributes (foreign keys excluded).
    pub fn attribute_columns(&self) -> Vec<&str> {
        let fks = self.foreign_keys();
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .filter(|n| !fks.contains(n))
            .collect()
    }

    /// Whether any column is rewritten by the server on every update.
    pub fn changes_on_update(&self) -> bool {
        self.columns.iter().any(|c| c.on_update.is_some())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.column(name).is_some() || self.relation(name).is_some()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Schema {
    pub models: Vec<Arc<ResolvedModel>>,
    pub by_name: HashMap<String, Arc<ResolvedModel>>,
}

impl Schema {
    pub fn model(&self, name: &str) -> Option<&Arc<ResolvedModel>> {
        self.by_name.get(name)
    }

    /// Target model of a relationship.
    pub fn related_model(&self, relation: &RelationInfo) -> Option<&Arc<ResolvedModel>> {
        self.by_name.get(&relation.target)
    }
}
