use super::{Instance, SerializeContext, Serializer};
use crate::config::ResolvedModel;
use crate::error::{ApiError, SerializationError};
use crate::registry::UrlFor;
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Serializes every non-foreign-key column as an attribute and every relationship as linkage.
pub struct DefaultSerializer {
    model: Arc<ResolvedModel>,
    type_name: String,
    primary_key: String,
    /// Field names allowed by the API's `only` option (also gates `links.self`).
    only: Option<HashSet<String>>,
    columns: BTreeSet<String>,
    relations: BTreeSet<String>,
}

impl DefaultSerializer {
    pub fn new(
        model: Arc<ResolvedModel>,
        type_name: &str,
        primary_key: &str,
        only: Option<&[String]>,
        exclude: Option<&[String]>,
        additional_attributes: Option<&[String]>,
    ) -> Result<Self, ApiError> {
        if only.is_some() && exclude.is_some() {
            return Err(ApiError::IllegalArgument(
                "Cannot specify both `only` and `exclude` keyword arguments simultaneously".into(),
            ));
        }
        if let (Some(add), Some(ex)) = (additional_attributes, exclude) {
            if add.iter().any(|a| ex.contains(a)) {
                return Err(ApiError::IllegalArgument(
                    "Cannot exclude attributes listed in the `additional_attributes` keyword argument".into(),
                ));
            }
        }
        let key_column = model
            .column(primary_key)
            .ok_or_else(|| ApiError::IllegalArgument(format!("Column `{}` is not a primary key", primary_key)))?;
        if !key_column.primary_key && !key_column.unique {
            return Err(ApiError::IllegalArgument(format!(
                "Column `{}` is not a primary key",
                primary_key
            )));
        }

        let mut columns: BTreeSet<String> = model.attribute_columns().into_iter().map(String::from).collect();
        columns.remove("id");
        columns.remove("type");
        if let Some(add) = additional_attributes {
            for a in add {
                if model.column(a).is_none() {
                    return Err(ApiError::IllegalArgument(format!("no column `{}` on model {}", a, model.name)));
                }
                columns.insert(a.clone());
            }
        }
        let mut relations: BTreeSet<String> = model.relationships.iter().map(|r| r.name.clone()).collect();

        let only_set = only.map(|o| o.iter().cloned().collect::<HashSet<String>>());
        if let Some(o) = &only_set {
            columns.retain(|c| o.contains(c));
            relations.retain(|r| o.contains(r));
        }
        if let Some(ex) = exclude {
            columns.retain(|c| !ex.contains(c));
            relations.retain(|r| !ex.contains(r));
        }
        let fks = model.foreign_keys();
        let additional: HashSet<&String> = additional_attributes.into_iter().flatten().collect();
        columns.retain(|c| !fks.contains(c.as_str()) || additional.contains(c));

        Ok(DefaultSerializer {
            type_name: type_name.to_string(),
            primary_key: primary_key.to_string(),
            only: only_set,
            columns,
            relations,
            model,
        })
    }
}

impl Serializer for DefaultSerializer {
    fn attribute_columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    fn relationship_columns(&self) -> &BTreeSet<String> {
        &self.relations
    }

    fn serialize(
        &self,
        instance: &Instance,
        only: Option<&HashSet<String>>,
        ctx: &SerializeContext<'_>,
    ) -> Result<Value, SerializationError> {
        let id = instance.key_string(&self.primary_key).ok_or_else(|| {
            SerializationError::new(format!("missing value for primary key {}", self.primary_key))
                .for_resource(&self.type_name, "")
        })?;

        let mut result = Map::new();
        result.insert("id".into(), Value::String(id.clone()));
        result.insert("type".into(), Value::String(self.type_name.clone()));

        let mut attributes = Map::new();
        for column in &self.columns {
            if only.is_some_and(|o| !o.contains(column)) {
                continue;
            }
            let value = instance.row.get(column).cloned().unwrap_or(Value::Null);
            attributes.insert(column.clone(), value);
        }
        if !attributes.is_empty() {
            result.insert("attributes".into(), Value::Object(attributes));
        }

        let mut relationships = Map::new();
        for relation in &self.relations {
            if only.is_some_and(|o| !o.contains(relation)) {
                continue;
            }
            let linkage = instance.links.get(relation).ok_or_else(|| {
                SerializationError::new(format!("linkage for relationship {} was not loaded", relation))
                    .for_resource(&self.type_name, &id)
            })?;
            let mut rel = Map::new();
            if ctx.include_links {
                let mut links = Map::new();
                if let Some(url) = ctx.registry.url_for(&self.model.name, &UrlFor::relationship(&id, relation)) {
                    links.insert("self".into(), Value::String(url));
                }
                if let Some(url) = ctx.registry.url_for(&self.model.name, &UrlFor::related(&id, relation)) {
                    links.insert("related".into(), Value::String(url));
                }
                rel.insert("links".into(), Value::Object(links));
            }
            rel.insert("data".into(), linkage.to_value());
            relationships.insert(relation.clone(), Value::Object(rel));
        }
        if !relationships.is_empty() {
            result.insert("relationships".into(), Value::Object(relationships));
        }

        let self_allowed = self.only.as_ref().map_or(true, |o| o.contains("self"))
            && only.map_or(true, |o| o.contains("self"));
        if ctx.include_links && self_allowed {
            if let Some(url) = ctx.registry.url_for(&self.model.name, &UrlFor::resource(&id)) {
                result.insert("links".into(), json!({ "self": url }));
            }
        }
        Ok(Value::Object(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, ColumnConfig, FullConfig, ModelConfig, RelationshipConfig};
    use crate::registry::{ApiInfo, ApiRegistry};
    use crate::serialization::{Linkage, ResourceId};

    fn person() -> Arc<ResolvedModel> {
        let person = ModelConfig::new("person")
            .column(ColumnConfig::new("id", "serial").primary_key())
            .column(ColumnConfig::new("name", "text"))
            .column(ColumnConfig::new("age", "integer"))
            .column(ColumnConfig::new("boss_id", "integer"))
            .relationship(RelationshipConfig::to_one("boss", "person", "boss_id"));
        let schema = resolve(&FullConfig {
            models: vec![person],
            ..Default::default()
        })
        .unwrap();
        schema.model("person").unwrap().clone()
    }

    fn instance() -> Instance {
        let mut i = Instance::new(
            json!({"id": 1, "name": "foo", "age": 99, "boss_id": 2})
                .as_object()
                .unwrap()
                .clone(),
        );
        i.links
            .insert("boss".into(), Linkage::ToOne(Some(ResourceId::new("person", "2"))));
        i
    }

    fn registry(serializer: Arc<DefaultSerializer>) -> ApiRegistry {
        let mut r = ApiRegistry::default();
        r.insert(
            "person",
            ApiInfo {
                collection_name: "person".into(),
                blueprint_name: "person".into(),
                url_prefix: "/api".into(),
                primary_key: "id".into(),
                serializer,
            },
        );
        r
    }

    #[test]
    fn serializes_attributes_and_linkage() {
        let s = Arc::new(DefaultSerializer::new(person(), "person", "id", None, None, None).unwrap());
        let registry = ApiRegistry::default();
        let ctx = SerializeContext {
            registry: &registry,
            include_links: false,
        };
        let v = s.serialize(&instance(), None, &ctx).unwrap();
        assert_eq!(
            v,
            json!({
                "id": "1",
                "type": "person",
                "attributes": {"name": "foo", "age": 99},
                "relationships": {"boss": {"data": {"type": "person", "id": "2"}}}
            })
        );
    }

    #[test]
    fn sparse_fieldset_keeps_id_and_type() {
        let s = DefaultSerializer::new(person(), "person", "id", None, None, None).unwrap();
        let registry = ApiRegistry::default();
        let ctx = SerializeContext {
            registry: &registry,
            include_links: false,
        };
        let only: HashSet<String> = ["id".to_string()].into_iter().collect();
        let v = s.serialize(&instance(), Some(&only), &ctx).unwrap();
        assert_eq!(v, json!({"id": "1", "type": "person"}));
    }

    #[test]
    fn only_and_exclude_are_exclusive() {
        let only = vec!["name".to_string()];
        assert!(matches!(
            DefaultSerializer::new(person(), "person", "id", Some(&only), Some(&only), None),
            Err(ApiError::IllegalArgument(_))
        ));
        let s = DefaultSerializer::new(person(), "person", "id", None, Some(&only), None).unwrap();
        assert!(!s.attribute_columns().contains("name"));
        assert!(s.attribute_columns().contains("age"));
    }

    #[test]
    fn rejects_non_unique_primary_key() {
        assert!(DefaultSerializer::new(person(), "person", "name", None, None, None).is_err());
    }

    #[test]
    fn links_when_enabled() {
        let s = Arc::new(DefaultSerializer::new(person(), "person", "id", None, None, None).unwrap());
        let registry = registry(s.clone());
        let ctx = SerializeContext {
            registry: &registry,
            include_links: true,
        };
        let v = s.serialize(&instance(), None, &ctx).unwrap();
        assert_eq!(v["links"]["self"], "/api/person/1");
        assert_eq!(v["relationships"]["boss"]["links"]["self"], "/api/person/1/relationships/boss");
        assert_eq!(v["relationships"]["boss"]["links"]["related"], "/api/person/1/boss");
    }

    #[test]
    fn missing_linkage_is_an_error() {
        let s = DefaultSerializer::new(person(), "person", "id", None, None, None).unwrap();
        let registry = ApiRegistry::default();
        let ctx = SerializeContext {
            registry: &registry,
            include_links: false,
        };
        let mut i = instance();
        i.links.clear();
        assert!(s.serialize(&i, None, &ctx).is_err());
    }
}
