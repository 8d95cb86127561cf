//! `include=a,a.b` as a tree of relation names.

use crate::config::{ResolvedModel, Schema};
use crate::error::ApiError;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IncludeTree {
    pub children: BTreeMap<String, IncludeTree>,
}

impl IncludeTree {
    pub fn from_paths<S: AsRef<str>>(paths: &[S]) -> Self {
        let mut root = IncludeTree::default();
        for path in paths {
            let mut node = &mut root;
            for name in path.as_ref().split('.').map(str::trim).filter(|s| !s.is_empty()) {
                node = node.children.entry(name.to_string()).or_default();
            }
        }
        root
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Every path must follow existing relationships.
    pub fn validate(&self, model: &ResolvedModel, schema: &Schema) -> Result<(), ApiError> {
        self.validate_at(model, schema, "")
    }

    fn validate_at(&self, model: &ResolvedModel, schema: &Schema, prefix: &str) -> Result<(), ApiError> {
        for (name, child) in &self.children {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", prefix, name)
            };
            let target = model
                .relation(name)
                .and_then(|r| schema.related_model(r))
                .ok_or_else(|| ApiError::BadRequest(format!("Invalid include path: {}", path)))?;
            child.validate_at(target, schema, &path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, ColumnConfig, FullConfig, ModelConfig, RelationshipConfig};

    fn schema() -> Schema {
        let person = ModelConfig::new("person")
            .column(ColumnConfig::new("id", "serial").primary_key())
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

    #[test]
    fn builds_tree_from_dotted_paths() {
        let tree = IncludeTree::from_paths(&["articles", "articles.author", "articles"]);
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children["articles"].children.len(), 1);
        assert!(tree.children["articles"].children["author"].is_empty());
    }

    #[test]
    fn validates_against_relationships() {
        let schema = schema();
        let person = schema.model("person").unwrap();
        assert!(IncludeTree::from_paths(&["articles.author.articles"]).validate(person, &schema).is_ok());
        let err = IncludeTree::from_paths(&["articles.bogus"]).validate(person, &schema).unwrap_err();
        assert_eq!(err.to_string(), "Invalid include path: articles.bogus");
    }
}
