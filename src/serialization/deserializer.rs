use super::{DeserializeContext, Deserializer, LinkageRequest};
use crate::config::ResolvedModel;
use crate::error::DeserializationError;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Column values and linkage parsed from a request document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewResource {
    /// Client-supplied id, when allowed.
    pub id: Option<String>,
    pub attributes: Map<String, Value>,
    pub relationships: Vec<(String, LinkageRequest)>,
}

pub struct DefaultDeserializer {
    model: Arc<ResolvedModel>,
    type_name: String,
    allow_client_generated_ids: bool,
}

impl DefaultDeserializer {
    pub fn new(model: Arc<ResolvedModel>, type_name: &str, allow_client_generated_ids: bool) -> Self {
        DefaultDeserializer {
            model,
            type_name: type_name.to_string(),
            allow_client_generated_ids,
        }
    }
}

impl Deserializer for DefaultDeserializer {
    fn deserialize(&self, document: &Value, ctx: &DeserializeContext<'_>) -> Result<NewResource, DeserializationError> {
        let data = resource_object(document)?;
        if !data.contains_key("type") {
            return Err(DeserializationError::MissingType);
        }
        let id = match data.get("id") {
            None => None,
            Some(_) if !self.allow_client_generated_ids => return Err(DeserializationError::ClientGeneratedIdNotAllowed),
            Some(v) => Some(id_string(v)?),
        };
        check_type(data, &self.type_name)?;
        let mut resource = parse_fields(&self.model, data, ctx)?;
        resource.id = id;
        Ok(resource)
    }
}

/// Parse a PATCH document for the resource `id`: `type` and `id` must match.
pub fn parse_update(
    model: &ResolvedModel,
    type_name: &str,
    id: &str,
    document: &Value,
    ctx: &DeserializeContext<'_>,
) -> Result<NewResource, DeserializationError> {
    let data = resource_object(document)?;
    if !data.contains_key("type") {
        return Err(DeserializationError::MissingType);
    }
    let given = data.get("id").ok_or(DeserializationError::MissingId)?;
    let given = id_string(given)?;
    if given != id {
        return Err(DeserializationError::ConflictingId {
            expected: id.to_string(),
            given,
        });
    }
    check_type(data, type_name)?;
    let mut resource = parse_fields(model, data, ctx)?;
    resource.id = Some(given);
    Ok(resource)
}

/// Parse the body of a relationship endpoint request.
pub fn parse_linkage_document(
    document: &Value,
    relation: &str,
    expected_type: &str,
    to_many: bool,
) -> Result<LinkageRequest, DeserializationError> {
    let data = document
        .as_object()
        .and_then(|d| d.get("data"))
        .ok_or(DeserializationError::MissingData)?;
    match (data, to_many) {
        (Value::Array(_), false) => Err(DeserializationError::Malformed(format!(
            "relationship \"{}\" is to-one but got a list of linkage objects",
            relation
        ))),
        (v, true) if !v.is_array() => Err(DeserializationError::Malformed(format!(
            "relationship \"{}\" is to-many and needs a list of linkage objects",
            relation
        ))),
        (v, _) => parse_linkage(v, relation, expected_type),
    }
}

fn resource_object(document: &Value) -> Result<&Map<String, Value>, DeserializationError> {
    let data = document
        .as_object()
        .and_then(|d| d.get("data"))
        .ok_or(DeserializationError::MissingData)?;
    data.as_object()
        .ok_or_else(|| DeserializationError::Malformed("\"data\" must be a resource object".into()))
}

fn check_type(data: &Map<String, Value>, expected: &str) -> Result<(), DeserializationError> {
    let given = data.get("type").map(type_string).unwrap_or_default();
    if given != expected {
        return Err(DeserializationError::ConflictingType {
            expected: expected.to_string(),
            given,
        });
    }
    Ok(())
}

fn type_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn id_string(v: &Value) -> Result<String, DeserializationError> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(DeserializationError::Malformed(format!("\"id\" must be a string, got {}", other))),
    }
}

fn parse_fields(
    model: &ResolvedModel,
    data: &Map<String, Value>,
    ctx: &DeserializeContext<'_>,
) -> Result<NewResource, DeserializationError> {
    let mut resource = NewResource::default();

    if let Some(rels) = data.get("relationships") {
        let rels = rels
            .as_object()
            .ok_or_else(|| DeserializationError::Malformed("\"relationships\" must be an object".into()))?;
        for name in rels.keys() {
            if model.relation(name).is_none() {
                return Err(DeserializationError::UnknownRelationship(name.clone()));
            }
        }
        for (name, link_object) in rels {
            let linkage = link_object.get("data").ok_or_else(|| DeserializationError::MissingLinkageElement {
                element: "data",
                relation: name.clone(),
            })?;
            let Some(rel) = model.relation(name) else {
                return Err(DeserializationError::UnknownRelationship(name.clone()));
            };
            let expected_type = ctx
                .schema
                .related_model(rel)
                .map(|m| ctx.registry.type_name(m))
                .unwrap_or_else(|| rel.target.clone());
            let parsed = parse_linkage(linkage, name, &expected_type)?;
            match (&parsed, rel.is_to_many()) {
                (LinkageRequest::ToMany(_), false) | (LinkageRequest::ToOne(_), true) => {
                    return Err(DeserializationError::Malformed(format!(
                        "linkage for relationship \"{}\" has the wrong cardinality",
                        name
                    )))
                }
                _ => resource.relationships.push((name.clone(), parsed)),
            }
        }
    }

    if let Some(attrs) = data.get("attributes") {
        let attrs = attrs
            .as_object()
            .ok_or_else(|| DeserializationError::Malformed("\"attributes\" must be an object".into()))?;
        for (name, value) in attrs {
            let column = model
                .column(name)
                .ok_or_else(|| DeserializationError::UnknownAttribute(name.clone()))?;
            if !column.writable {
                return Err(DeserializationError::ReadOnlyAttribute(name.clone()));
            }
            resource.attributes.insert(name.clone(), value.clone());
        }
    }
    Ok(resource)
}

fn parse_linkage(linkage: &Value, relation: &str, expected_type: &str) -> Result<LinkageRequest, DeserializationError> {
    match linkage {
        Value::Null => Ok(LinkageRequest::ToOne(None)),
        Value::Array(items) => items
            .iter()
            .map(|item| identifier(item, relation, expected_type))
            .collect::<Result<Vec<_>, _>>()
            .map(LinkageRequest::ToMany),
        other => identifier(other, relation, expected_type).map(|id| LinkageRequest::ToOne(Some(id))),
    }
}

fn identifier(v: &Value, relation: &str, expected_type: &str) -> Result<String, DeserializationError> {
    let obj = v.as_object().ok_or_else(|| {
        DeserializationError::Malformed(format!("linkage object for relationship \"{}\" must be an object", relation))
    })?;
    let id = obj.get("id").ok_or_else(|| DeserializationError::MissingLinkageElement {
        element: "id",
        relation: relation.to_string(),
    })?;
    let type_ = obj.get("type").ok_or_else(|| DeserializationError::MissingLinkageElement {
        element: "type",
        relation: relation.to_string(),
    })?;
    let type_ = type_string(type_);
    if type_ != expected_type {
        return Err(DeserializationError::ConflictingLinkageType {
            expected: expected_type.to_string(),
            given: type_,
            relation: relation.to_string(),
        });
    }
    id_string(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, ColumnConfig, FullConfig, ModelConfig, RelationshipConfig, Schema};
    use crate::registry::ApiRegistry;
    use serde_json::json;

    fn schema() -> Schema {
        let person = ModelConfig::new("person")
            .column(ColumnConfig::new("id", "serial").primary_key())
            .column(ColumnConfig::new("name", "text"))
            .column(ColumnConfig::new("slug", "text").read_only())
            .relationship(RelationshipConfig::to_many("articles", "article", "author_id"));
        let article = ModelConfig::new("article")
            .column(ColumnConfig::new("id", "serial").primary_key())
            .column(ColumnConfig::new("author_id", "integer"))
            .relationship(RelationshipConfig::to_one("author", "person", "author_id"));
        resolve(&FullConfig {
            models: vec![person, article],
            ..Default::default()
        })
        .unwrap()
    }

    fn deserialize(doc: Value, allow_ids: bool) -> Result<NewResource, DeserializationError> {
        let schema = schema();
        let registry = ApiRegistry::default();
        let ctx = DeserializeContext {
            schema: &schema,
            registry: &registry,
        };
        let d = DefaultDeserializer::new(schema.model("person").unwrap().clone(), "person", allow_ids);
        d.deserialize(&doc, &ctx)
    }

    #[test]
    fn parses_attributes_and_relationships() {
        let r = deserialize(
            json!({"data": {"type": "person", "attributes": {"name": "foo"},
                   "relationships": {"articles": {"data": [{"type": "article", "id": "1"}, {"type": "article", "id": 2}]}}}}),
            false,
        )
        .unwrap();
        assert_eq!(r.attributes["name"], "foo");
        assert_eq!(
            r.relationships,
            vec![("articles".to_string(), LinkageRequest::ToMany(vec!["1".into(), "2".into()]))]
        );
        assert_eq!(r.id, None);
    }

    #[test]
    fn reports_each_failure() {
        assert_eq!(deserialize(json!({}), false), Err(DeserializationError::MissingData));
        assert_eq!(
            deserialize(json!({"data": {"attributes": {}}}), false),
            Err(DeserializationError::MissingType)
        );
        assert_eq!(
            deserialize(json!({"data": {"type": "person", "id": "1"}}), false),
            Err(DeserializationError::ClientGeneratedIdNotAllowed)
        );
        assert!(matches!(
            deserialize(json!({"data": {"type": "article"}}), false),
            Err(DeserializationError::ConflictingType { .. })
        ));
        assert_eq!(
            deserialize(json!({"data": {"type": "person", "attributes": {"bogus": 1}}}), false),
            Err(DeserializationError::UnknownAttribute("bogus".into()))
        );
        assert_eq!(
            deserialize(json!({"data": {"type": "person", "attributes": {"slug": "x"}}}), false),
            Err(DeserializationError::ReadOnlyAttribute("slug".into()))
        );
        assert_eq!(
            deserialize(json!({"data": {"type": "person", "relationships": {"bogus": {"data": null}}}}), false),
            Err(DeserializationError::UnknownRelationship("bogus".into()))
        );
        assert_eq!(
            deserialize(json!({"data": {"type": "person", "relationships": {"articles": {}}}}), false),
            Err(DeserializationError::MissingLinkageElement {
                element: "data",
                relation: "articles".into()
            })
        );
        assert!(matches!(
            deserialize(
                json!({"data": {"type": "person", "relationships": {"articles": {"data": [{"type": "person", "id": "1"}]}}}}),
                false
            ),
            Err(DeserializationError::ConflictingLinkageType { .. })
        ));
    }

    #[test]
    fn client_ids_when_allowed() {
        let r = deserialize(json!({"data": {"type": "person", "id": "7"}}), true).unwrap();
        assert_eq!(r.id.as_deref(), Some("7"));
    }

    #[test]
    fn update_requires_matching_id() {
        let schema = schema();
        let registry = ApiRegistry::default();
        let ctx = DeserializeContext {
            schema: &schema,
            registry: &registry,
        };
        let person = schema.model("person").unwrap();
        let doc = json!({"data": {"type": "person", "id": "2", "attributes": {"name": "x"}}});
        assert!(matches!(
            parse_update(person, "person", "1", &doc, &ctx),
            Err(DeserializationError::ConflictingId { .. })
        ));
        let r = parse_update(person, "person", "2", &doc, &ctx).unwrap();
        assert_eq!(r.attributes["name"], "x");
        let doc = json!({"data": {"type": "person", "attributes": {}}});
        assert_eq!(parse_update(person, "person", "2", &doc, &ctx), Err(DeserializationError::MissingId));
    }

    #[test]
    fn linkage_documents() {
        assert_eq!(
            parse_linkage_document(&json!({"data": null}), "author", "person", false),
            Ok(LinkageRequest::ToOne(None))
        );
        assert_eq!(
            parse_linkage_document(&json!({"data": [{"type": "article", "id": "3"}]}), "articles", "article", true),
            Ok(LinkageRequest::ToMany(vec!["3".into()]))
        );
        assert!(parse_linkage_document(&json!({"data": null}), "articles", "article", true).is_err());
        assert_eq!(
            parse_linkage_document(&json!({}), "articles", "article", true),
            Err(DeserializationError::MissingData)
        );
        assert_eq!(
            parse_linkage_document(&json!({"data": {"type": "person"}}), "author", "person", false),
            Err(DeserializationError::MissingLinkageElement {
                element: "id",
                relation: "author".into()
            })
        );
    }
}
