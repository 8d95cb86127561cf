//! Conversion between loaded rows and JSON API resource objects.

mod deserializer;
mod serializer;

pub use deserializer::{parse_linkage_document, parse_update, DefaultDeserializer, NewResource};
pub use serializer::DefaultSerializer;

pub use crate::error::{DeserializationError, SerializationError};

use crate::config::Schema;
use crate::registry::ApiRegistry;
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A `{type, id}` resource identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub type_: String,
    pub id: String,
}

impl ResourceId {
    pub fn new(type_: impl Into<String>, id: impl Into<String>) -> Self {
        ResourceId {
            type_: type_.into(),
            id: id.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({ "type": self.type_, "id": self.id })
    }
}

/// Current value of one relationship of an instance.
#[derive(Clone, Debug, PartialEq)]
pub enum Linkage {
    ToOne(Option<ResourceId>),
    ToMany(Vec<ResourceId>),
}

impl Linkage {
    pub fn to_value(&self) -> Value {
        match self {
            Linkage::ToOne(None) => Value::Null,
            Linkage::ToOne(Some(r)) => r.to_value(),
            Linkage::ToMany(items) => Value::Array(items.iter().map(ResourceId::to_value).collect()),
        }
    }

    pub fn ids(&self) -> Vec<&ResourceId> {
        match self {
            Linkage::ToOne(r) => r.iter().collect(),
            Linkage::ToMany(items) => items.iter().collect(),
        }
    }
}

/// Linkage requested by a client, as API ids of the related model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkageRequest {
    ToOne(Option<String>),
    ToMany(Vec<String>),
}

/// One loaded row plus the linkage of its relationships.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Instance {
    pub row: Map<String, Value>,
    pub links: HashMap<String, Linkage>,
}

impl Instance {
    pub fn new(row: Map<String, Value>) -> Self {
        Instance {
            row,
            links: HashMap::new(),
        }
    }

    /// String form of a column value, as used for resource ids.
    pub fn key_string(&self, column: &str) -> Option<String> {
        self.row.get(column).and_then(value_to_key)
    }
}

pub fn value_to_key(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

pub struct SerializeContext<'a> {
    pub registry: &'a ApiRegistry,
    pub include_links: bool,
}

pub struct DeserializeContext<'a> {
    pub schema: &'a Schema,
    pub registry: &'a ApiRegistry,
}

/// Turns instances of one model into resource objects.
pub trait Serializer: Send + Sync {
    /// Attribute names this serializer may emit.
    fn attribute_columns(&self) -> &BTreeSet<String>;

    /// Relationship names this serializer may emit.
    fn relationship_columns(&self) -> &BTreeSet<String>;

    /// `only` is the client's sparse fieldset for this type, if any.
    fn serialize(
        &self,
        instance: &Instance,
        only: Option<&HashSet<String>>,
        ctx: &SerializeContext<'_>,
    ) -> Result<Value, SerializationError>;

    fn serialize_many(
        &self,
        instances: &[Instance],
        only: Option<&HashSet<String>>,
        ctx: &SerializeContext<'_>,
    ) -> Result<Vec<Value>, SerializationError> {
        instances.iter().map(|i| self.serialize(i, only, ctx)).collect()
    }
}

/// Turns a request document into column values and linkage for a new resource.
pub trait Deserializer: Send + Sync {
    fn deserialize(&self, document: &Value, ctx: &DeserializeContext<'_>) -> Result<NewResource, DeserializationError>;
}
