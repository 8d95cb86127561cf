//! Registry of created APIs, shared by every blueprint of a manager.

use crate::config::{ResolvedModel, Schema};
use crate::serialization::Serializer;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// What the manager remembers about one model's API.
#[derive(Clone)]
pub struct ApiInfo {
    pub collection_name: String,
    pub blueprint_name: String,
    /// Full URL prefix, e.g. "/api".
    pub url_prefix: String,
    /// Column used as the resource `id`.
    pub primary_key: String,
    pub serializer: Arc<dyn Serializer>,
}

/// Parts of a URL below a collection.
#[derive(Clone, Copy, Debug, Default)]
pub struct UrlFor<'a> {
    pub resource_id: Option<&'a str>,
    pub relation_name: Option<&'a str>,
    pub related_resource_id: Option<&'a str>,
    /// Link to the relationship object instead of the related resource.
    pub relationship: bool,
}

impl<'a> UrlFor<'a> {
    pub fn resource(id: &'a str) -> Self {
        UrlFor {
            resource_id: Some(id),
            ..Default::default()
        }
    }

    pub fn related(id: &'a str, relation: &'a str) -> Self {
        UrlFor {
            resource_id: Some(id),
            relation_name: Some(relation),
            ..Default::default()
        }
    }

    pub fn relationship(id: &'a str, relation: &'a str) -> Self {
        UrlFor {
            relationship: true,
            ..Self::related(id, relation)
        }
    }
}

#[derive(Default)]
pub struct ApiRegistry {
    by_model: HashMap<String, ApiInfo>,
}

pub type SharedRegistry = Arc<RwLock<ApiRegistry>>;

impl ApiRegistry {
    pub fn insert(&mut self, model: &str, info: ApiInfo) {
        self.by_model.insert(model.to_string(), info);
    }

    pub fn get(&self, model: &str) -> Option<&ApiInfo> {
        self.by_model.get(model)
    }

    pub fn collection_name(&self, model: &str) -> Option<&str> {
        self.get(model).map(|i| i.collection_name.as_str())
    }

    pub fn primary_key_for(&self, model: &str) -> Option<&str> {
        self.get(model).map(|i| i.primary_key.as_str())
    }

    /// Resource type for a model; the table name when no API exists for it.
    pub fn type_name(&self, model: &ResolvedModel) -> String {
        self.collection_name(&model.name)
            .map(String::from)
            .unwrap_or_else(|| model.table_name.clone())
    }

    /// Column used as the resource id; the table primary key when no API exists for it.
    pub fn key_for(&self, model: &ResolvedModel) -> String {
        self.primary_key_for(&model.name)
            .map(String::from)
            .unwrap_or_else(|| model.primary_key.clone())
    }

    pub fn url_for(&self, model: &str, parts: &UrlFor<'_>) -> Option<String> {
        let info = self.get(model)?;
        Some(build_url(&info.url_prefix, &info.collection_name, parts))
    }

    /// Resource type and id column of every model, copied out so no lock is held across awaits.
    pub fn identities(&self, schema: &Schema) -> Identities {
        let by_model = schema
            .models
            .iter()
            .map(|m| (m.name.clone(), (self.type_name(m), self.key_for(m))))
            .collect();
        Identities { by_model }
    }
}

/// `{prefix}/{collection}` followed by the given parts.
pub fn build_url(prefix: &str, collection: &str, parts: &UrlFor<'_>) -> String {
    let mut url = format!("{}/{}", prefix, collection);
    if let Some(id) = parts.resource_id {
        url.push('/');
        url.push_str(id);
        if let Some(rel) = parts.relation_name {
            if parts.relationship {
                url.push_str("/relationships/");
                url.push_str(rel);
            } else {
                url.push('/');
                url.push_str(rel);
                if let Some(related) = parts.related_resource_id {
                    url.push('/');
                    url.push_str(related);
                }
            }
        }
    }
    url
}

/// Snapshot of resource types and id columns by model name.
#[derive(Clone, Debug, Default)]
pub struct Identities {
    by_model: HashMap<String, (String, String)>,
}

impl Identities {
    pub fn type_name<'a>(&'a self, model: &'a ResolvedModel) -> &'a str {
        self.by_model
            .get(&model.name)
            .map(|(t, _)| t.as_str())
            .unwrap_or(&model.table_name)
    }

    pub fn key<'a>(&'a self, model: &'a ResolvedModel) -> &'a str {
        self.by_model
            .get(&model.name)
            .map(|(_, k)| k.as_str())
            .unwrap_or(&model.primary_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_every_url_shape() {
        assert_eq!(build_url("/api", "person", &UrlFor::default()), "/api/person");
        assert_eq!(build_url("/api", "person", &UrlFor::resource("1")), "/api/person/1");
        assert_eq!(
            build_url("/api", "person", &UrlFor::related("1", "articles")),
            "/api/person/1/articles"
        );
        assert_eq!(
            build_url("/api", "person", &UrlFor::relationship("1", "articles")),
            "/api/person/1/relationships/articles"
        );
        let member = UrlFor {
            related_resource_id: Some("9"),
            ..UrlFor::related("1", "articles")
        };
        assert_eq!(build_url("", "person", &member), "/person/1/articles/9");
    }
}
