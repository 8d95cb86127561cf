//! Turning loaded instances into resource objects.

use super::include::Included;
use crate::config::ResolvedModel;
use crate::error::ApiError;
use crate::registry::ApiRegistry;
use crate::serialization::{DefaultSerializer, Instance, SerializeContext, Serializer};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Serializes instances of any model with the serializer registered for it.
pub struct Renderer<'a> {
    registry: &'a ApiRegistry,
    include_links: bool,
    /// Sparse fieldsets by resource type.
    fields: &'a HashMap<String, HashSet<String>>,
}

impl<'a> Renderer<'a> {
    pub fn new(registry: &'a ApiRegistry, include_links: bool, fields: &'a HashMap<String, HashSet<String>>) -> Self {
        Renderer {
            registry,
            include_links,
            fields,
        }
    }

    pub fn resource(&self, model: &Arc<ResolvedModel>, instance: &Instance) -> Result<Value, ApiError> {
        let serializer = self.serializer_for(model)?;
        let only = self.fields.get(&self.registry.type_name(model));
        Ok(serializer.serialize(instance, only, &self.context())?)
    }

    pub fn resources(&self, model: &Arc<ResolvedModel>, instances: &[Instance]) -> Result<Vec<Value>, ApiError> {
        let serializer = self.serializer_for(model)?;
        let only = self.fields.get(&self.registry.type_name(model));
        Ok(serializer.serialize_many(instances, only, &self.context())?)
    }

    /// Failures here answer 500 and name the offending resource.
    pub fn included(&self, items: &[Included]) -> Result<Vec<Value>, ApiError> {
        items
            .iter()
            .map(|i| {
                self.resource(&i.model, &i.instance).map_err(|e| match e {
                    ApiError::Serialization(err) => {
                        let type_name = self.registry.type_name(&i.model);
                        let id = i
                            .instance
                            .key_string(&self.registry.key_for(&i.model))
                            .unwrap_or_default();
                        ApiError::IncludedSerialization(err.for_resource(&type_name, &id))
                    }
                    other => other,
                })
            })
            .collect()
    }

    fn context(&self) -> SerializeContext<'a> {
        SerializeContext {
            registry: self.registry,
            include_links: self.include_links,
        }
    }

    /// Models without an API are serialized with their table name as type and
    /// table primary key as id.
    fn serializer_for(&self, model: &Arc<ResolvedModel>) -> Result<Arc<dyn Serializer>, ApiError> {
        if let Some(info) = self.registry.get(&model.name) {
            return Ok(info.serializer.clone());
        }
        let serializer = DefaultSerializer::new(model.clone(), &model.table_name, &model.primary_key, None, None, None)?;
        Ok(Arc::new(serializer))
    }
}

/// `(type, id)` of each instance, used to keep primary data out of `included`.
pub fn identifiers(type_name: &str, key: &str, instances: &[Instance]) -> HashSet<(String, String)> {
    instances
        .iter()
        .filter_map(|i| i.key_string(key).map(|id| (type_name.to_string(), id)))
        .collect()
}
