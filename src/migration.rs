//! Apply model config to the database: schemas, tables, association tables and foreign keys.
//! Tables are created with IF NOT EXISTS, so running against an existing database is a no-op.

use crate::config::types::*;
use crate::config::{resolve, RelationKind, ResolvedModel, Schema};
use crate::error::ApiError;
use crate::sql::{qualified_table, quoted};
use sqlx::PgPool;
use std::collections::{BTreeSet, HashMap};

/// Create what the config describes. Validates the config first.
pub async fn apply_migrations(pool: &PgPool, config: &FullConfig) -> Result<(), ApiError> {
    let schema = resolve(config)?;

    let schemas: BTreeSet<&str> = config
        .models
        .iter()
        .map(|m| m.schema.as_deref().unwrap_or(&config.schema))
        .collect();
    for s in schemas {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(s)))
            .execute(pool)
            .await?;
    }

    for m in &config.models {
        let sql = create_table_sql(config, m);
        tracing::debug!(sql = %sql, "migration");
        sqlx::query(&sql).execute(pool).await?;
    }

    for sql in association_tables_sql(config, &schema) {
        tracing::debug!(sql = %sql, "migration");
        sqlx::query(&sql).execute(pool).await?;
    }

    for (name, sql) in foreign_keys_sql(config, &schema) {
        // The constraint may already exist from an earlier run.
        if let Err(e) = sqlx::query(&sql).execute(pool).await {
            tracing::debug!(constraint = %name, error = %e, "foreign key not added");
        }
    }

    tracing::info!(models = config.models.len(), "migrations applied");
    Ok(())
}

fn table_ref(config: &FullConfig, m: &ModelConfig) -> String {
    format!(
        "{}.{}",
        quoted(m.schema.as_deref().unwrap_or(&config.schema)),
        quoted(m.table_name())
    )
}

fn create_table_sql(config: &FullConfig, m: &ModelConfig) -> String {
    let mut defs: Vec<String> = Vec::new();
    for c in &m.columns {
        let mut def = format!("{} {}", quoted(&c.name), c.type_.ddl());
        if !c.nullable || c.primary_key {
            def.push_str(" NOT NULL");
        }
        if let Some(ref d) = c.default {
            def.push_str(" DEFAULT ");
            def.push_str(d.sql());
        }
        if c.unique && !c.primary_key {
            def.push_str(" UNIQUE");
        }
        defs.push(def);
    }
    let pk: Vec<String> = m
        .columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| quoted(&c.name))
        .collect();
    if !pk.is_empty() {
        defs.push(format!("PRIMARY KEY ({})", pk.join(", ")));
    }
    for u in &m.unique {
        let cols: Vec<String> = u.iter().map(|s| quoted(s)).collect();
        defs.push(format!("UNIQUE ({})", cols.join(", ")));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        table_ref(config, m),
        defs.join(",\n  ")
    )
}

/// Type of a column referencing `column`; serial types become their integer base.
fn reference_type(column: &ColumnConfig) -> String {
    match column.type_.base_name().to_lowercase().as_str() {
        "smallserial" => "smallint".into(),
        "serial" => "integer".into(),
        "bigserial" => "bigint".into(),
        _ => column.type_.ddl(),
    }
}

fn primary_key_column<'a>(config: &'a FullConfig, model: &ResolvedModel) -> Option<&'a ColumnConfig> {
    config
        .models
        .iter()
        .find(|m| m.name == model.name)?
        .columns
        .iter()
        .find(|c| c.name == model.primary_key)
}

fn association_tables_sql(config: &FullConfig, schema: &Schema) -> Vec<String> {
    let mut by_table: HashMap<String, String> = HashMap::new();
    for model in &schema.models {
        for rel in &model.relationships {
            let RelationKind::ManyToMany {
                table,
                local_column,
                remote_column,
            } = &rel.kind
            else {
                continue;
            };
            if by_table.contains_key(table) {
                continue;
            }
            let Some(target) = schema.related_model(rel) else {
                continue;
            };
            let (Some(local_pk), Some(remote_pk)) =
                (primary_key_column(config, model), primary_key_column(config, target))
            else {
                continue;
            };
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {table} (\n  \
                 {lc} {lt} NOT NULL REFERENCES {owner} ({lpk}) ON DELETE CASCADE,\n  \
                 {rc} {rt} NOT NULL REFERENCES {target} ({rpk}) ON DELETE CASCADE,\n  \
                 PRIMARY KEY ({lc}, {rc})\n)",
                table = table,
                lc = quoted(local_column),
                lt = reference_type(local_pk),
                owner = qualified_table(model),
                lpk = quoted(&local_pk.name),
                rc = quoted(remote_column),
                rt = reference_type(remote_pk),
                target = qualified_table(target),
                rpk = quoted(&remote_pk.name),
            );
            by_table.insert(table.clone(), sql);
        }
    }
    let mut statements: Vec<(String, String)> = by_table.into_iter().collect();
    statements.sort();
    statements.into_iter().map(|(_, sql)| sql).collect()
}

/// `(constraint name, ALTER TABLE statement)` for every to-one and one-to-many relation, deduplicated.
fn foreign_keys_sql(config: &FullConfig, schema: &Schema) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for model in &schema.models {
        for rel in &model.relationships {
            let Some(target) = schema.related_model(rel) else {
                continue;
            };
            // (referencing model, column, referenced model)
            let (from, column, to) = match &rel.kind {
                RelationKind::ToOne { foreign_key } => (model.as_ref(), foreign_key, target.as_ref()),
                RelationKind::ToMany { foreign_key } => (target.as_ref(), foreign_key, model.as_ref()),
                RelationKind::ManyToMany { .. } => continue,
            };
            let name = format!("fk_{}_{}", from.table_name, column);
            if out.iter().any(|(n, _)| *n == name) {
                continue;
            }
            let Some(referenced) = primary_key_column(config, to) else {
                continue;
            };
            let sql = format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                qualified_table(from),
                quoted(&name),
                quoted(column),
                qualified_table(to),
                quoted(&referenced.name),
            );
            out.push((name, sql));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FullConfig {
        FullConfig {
            schema: "public".into(),
            models: vec![
                ModelConfig::new("Artist")
                    .column(ColumnConfig::new("ArtistId", "serial").primary_key())
                    .column(ColumnConfig::new("Name", "varchar(120)"))
                    .relationship(RelationshipConfig::to_many("albums", "Album", "ArtistId")),
                ModelConfig::new("Album")
                    .column(ColumnConfig::new("AlbumId", "serial").primary_key())
                    .column(ColumnConfig::new("Title", "varchar(160)").unique())
                    .column(ColumnConfig::new("ArtistId", "integer"))
                    .relationship(RelationshipConfig::to_one("artist", "Artist", "ArtistId"))
                    .relationship(RelationshipConfig::many_to_many(
                        "genres",
                        "Genre",
                        SecondaryConfig {
                            table: "album_genre".into(),
                            schema: None,
                            local_column: "album_id".into(),
                            remote_column: "genre_id".into(),
                        },
                    )),
                ModelConfig::new("Genre").column(ColumnConfig::new("GenreId", "bigserial").primary_key()),
            ],
        }
    }

    #[test]
    fn creates_tables_with_keys_and_constraints() {
        let cfg = config();
        let sql = create_table_sql(&cfg, &cfg.models[1]);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"Album\""));
        assert!(sql.contains("\"AlbumId\" serial NOT NULL"));
        assert!(sql.contains("\"Title\" varchar(160) UNIQUE"));
        assert!(sql.contains("PRIMARY KEY (\"AlbumId\")"));
    }

    #[test]
    fn foreign_keys_are_deduplicated_across_both_sides() {
        let cfg = config();
        let schema = resolve(&cfg).unwrap();
        let fks = foreign_keys_sql(&cfg, &schema);
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].0, "fk_Album_ArtistId");
        assert!(fks[0].1.contains("REFERENCES \"public\".\"Artist\" (\"ArtistId\")"));
    }

    #[test]
    fn association_tables_reference_both_sides() {
        let cfg = config();
        let schema = resolve(&cfg).unwrap();
        let tables = association_tables_sql(&cfg, &schema);
        assert_eq!(tables.len(), 1);
        assert!(tables[0].contains("\"album_id\" integer NOT NULL REFERENCES \"public\".\"Album\""));
        assert!(tables[0].contains("\"genre_id\" bigint NOT NULL REFERENCES \"public\".\"Genre\""));
        assert!(tables[0].contains("PRIMARY KEY (\"album_id\", \"genre_id\")"));
    }
}
