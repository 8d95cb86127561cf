//! Load model config from JSON files and resolve it into a runtime schema.

use crate::config::resolved::{ColumnInfo, ColumnKind, RelationInfo, RelationKind, ResolvedModel, Schema};
use crate::config::types::*;
use crate::config::{primary_key_names, validate};
use crate::error::ConfigError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Build the resolved schema from full config (validates first).
pub fn resolve(config: &FullConfig) -> Result<Schema, ConfigError> {
    validate(config)?;

    let mut models = Vec::with_capacity(config.models.len());
    let mut by_name = HashMap::new();

    for m in &config.models {
        let schema_name = m.schema.clone().unwrap_or_else(|| config.schema.clone());
        let primary_key = primary_key_names(m)
            .first()
            .map(|s| s.to_string())
            .ok_or_else(|| ConfigError::InvalidPrimaryKey {
                model: m.name.clone(),
                column: String::new(),
            })?;

        let columns: Vec<ColumnInfo> = m
            .columns
            .iter()
            .map(|c| {
                let (kind, pg_type) = column_kind(&c.type_);
                ColumnInfo {
                    name: c.name.clone(),
                    kind,
                    pg_type,
                    nullable: c.nullable && !c.primary_key,
                    has_default: c.default.is_some() || is_serial(&c.type_),
                    primary_key: c.primary_key,
                    unique: c.unique || c.primary_key,
                    on_update: c.on_update.clone(),
                    writable: c.writable,
                }
            })
            .collect();

        let relationships = m
            .relationships
            .iter()
            .map(|r| {
                let kind = match (&r.foreign_key, &r.secondary) {
                    (_, Some(sec)) => RelationKind::ManyToMany {
                        table: qualified(sec.schema.as_deref().unwrap_or(&schema_name), &sec.table),
                        local_column: sec.local_column.clone(),
                        remote_column: sec.remote_column.clone(),
                    },
                    (Some(fk), None) if r.kind == RelationshipKindConfig::ToOne => {
                        RelationKind::ToOne { foreign_key: fk.clone() }
                    }
                    (Some(fk), None) => RelationKind::ToMany { foreign_key: fk.clone() },
                    (None, None) => {
                        return Err(ConfigError::Validation(format!(
                            "relationship {}.{} has no join columns",
                            m.name, r.name
                        )))
                    }
                };
                Ok(RelationInfo {
                    name: r.name.clone(),
                    target: r.target.clone(),
                    kind,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let model = Arc::new(ResolvedModel {
            name: m.name.clone(),
            schema_name,
            table_name: m.table_name().to_string(),
            columns,
            primary_key,
            relationships,
            validation: m.validation.clone(),
        });
        by_name.insert(m.name.clone(), model.clone());
        models.push(model);
    }

    Ok(Schema { models, by_name })
}

fn qualified(schema: &str, table: &str) -> String {
    format!("\"{}\".\"{}\"", schema.replace('"', "\"\""), table.replace('"', "\"\""))
}

fn is_serial(ty: &ColumnTypeConfig) -> bool {
    ty.base_name().to_lowercase().contains("serial")
}

/// Map a configured column type to its value family and the type used in parameter casts.
pub fn column_kind(ty: &ColumnTypeConfig) -> (ColumnKind, String) {
    let name = ty.base_name();
    let lower = name.to_lowercase();
    let kind = match lower.as_str() {
        "smallserial" | "serial" | "smallint" | "int2" | "integer" | "int" | "int4" => ColumnKind::Integer,
        "bigserial" | "bigint" | "int8" => ColumnKind::BigInt,
        "real" | "float4" | "double precision" | "float8" | "float" => ColumnKind::Float,
        "numeric" | "decimal" => ColumnKind::Numeric,
        "boolean" | "bool" => ColumnKind::Boolean,
        "date" => ColumnKind::Date,
        "time" | "time without time zone" | "timetz" | "time with time zone" => ColumnKind::Time,
        "timestamp" | "timestamp without time zone" => ColumnKind::DateTime,
        "timestamptz" | "timestamp with time zone" => ColumnKind::DateTimeTz,
        "interval" => ColumnKind::Interval,
        "uuid" => ColumnKind::Uuid,
        "json" | "jsonb" => ColumnKind::Json,
        _ if name.contains('.') => ColumnKind::Custom,
        _ => ColumnKind::Text,
    };
    let cast = match kind {
        ColumnKind::Integer => "integer".to_string(),
        ColumnKind::BigInt => "bigint".to_string(),
        ColumnKind::Float => "double precision".to_string(),
        ColumnKind::Numeric => "numeric".to_string(),
        ColumnKind::Boolean => "boolean".to_string(),
        ColumnKind::Date => "date".to_string(),
        ColumnKind::Time => "time".to_string(),
        ColumnKind::DateTime => "timestamp".to_string(),
        ColumnKind::DateTimeTz => "timestamptz".to_string(),
        ColumnKind::Interval => "interval".to_string(),
        ColumnKind::Uuid => "uuid".to_string(),
        ColumnKind::Json => lower.clone(),
        ColumnKind::Custom => name.to_string(),
        ColumnKind::Text => "text".to_string(),
    };
    (kind, cast)
}

/// Load model config from a JSON file, or from `models.json` inside a directory.
pub async fn load_from_path(path: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let path = path.as_ref();
    let file = if tokio::fs::metadata(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?
        .is_dir()
    {
        path.join("models.json")
    } else {
        path.to_path_buf()
    };
    tracing::debug!(path = %file.display(), "loading model config");
    let text = tokio::fs::read_to_string(&file)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", file.display(), e)))?;
    parse_config(&text)
}

pub fn parse_config(text: &str) -> Result<FullConfig, ConfigError> {
    serde_json::from_str(text).map_err(|e| ConfigError::Load(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODELS: &str = r#"{
        "models": [
            {
                "name": "person",
                "columns": [
                    {"name": "id", "type": "serial", "primary_key": true},
                    {"name": "name", "type": "varchar(40)", "unique": true},
                    {"name": "birth_datetime", "type": "timestamp"},
                    {"name": "hangtime", "type": "interval"}
                ],
                "relationships": [
                    {"name": "articles", "target": "article", "kind": "to_many", "foreign_key": "author_id"}
                ]
            },
            {
                "name": "article",
                "table": "articles",
                "columns": [
                    {"name": "id", "type": "serial", "primary_key": true},
                    {"name": "title", "type": "text"},
                    {"name": "author_id", "type": "integer"}
                ],
                "relationships": [
                    {"name": "author", "target": "person", "kind": "to_one", "foreign_key": "author_id"},
                    {"name": "tags", "target": "tag", "kind": "to_many",
                     "secondary": {"table": "article_tag", "local_column": "article_id", "remote_column": "tag_id"}}
                ]
            },
            {
                "name": "tag",
                "columns": [{"name": "id", "type": "serial", "primary_key": true}]
            }
        ]
    }"#;

    #[test]
    fn resolves_models_from_json() {
        let config = parse_config(MODELS).unwrap();
        let schema = resolve(&config).unwrap();
        let person = schema.model("person").unwrap();
        assert_eq!(person.primary_key, "id");
        assert_eq!(person.schema_name, "public");
        assert_eq!(person.column("birth_datetime").unwrap().kind, ColumnKind::DateTime);
        assert_eq!(person.column("hangtime").unwrap().kind, ColumnKind::Interval);
        assert_eq!(person.column("name").unwrap().pg_type, "text");
        assert!(person.column("id").unwrap().has_default);

        let article = schema.model("article").unwrap();
        assert_eq!(article.table_name, "articles");
        assert_eq!(article.attribute_columns(), vec!["id", "title"]);
        assert!(!article.relation("author").unwrap().is_to_many());
        match &article.relation("tags").unwrap().kind {
            RelationKind::ManyToMany { table, .. } => assert_eq!(table, "\"public\".\"article_tag\""),
            other => panic!("unexpected relation kind {:?}", other),
        }
    }

    #[test]
    fn reports_malformed_json() {
        assert!(matches!(parse_config("{"), Err(ConfigError::Load(_))));
    }

    #[test]
    fn maps_column_types() {
        assert_eq!(column_kind(&"bigserial".into()).0, ColumnKind::BigInt);
        assert_eq!(column_kind(&"timestamptz".into()).1, "timestamptz");
        assert_eq!(column_kind(&"sample.status".into()), (ColumnKind::Custom, "sample.status".to_string()));
        assert_eq!(column_kind(&"jsonb".into()), (ColumnKind::Json, "jsonb".to_string()));
    }
}
