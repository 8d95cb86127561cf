//! Compile filter objects into WHERE-clause SQL.

use crate::coerce::{coerce_value, SqlValue};
use crate::config::{ColumnInfo, RelationKind, ResolvedModel, Schema};
use crate::error::ApiError;
use crate::query::{Argument, Filter, Operator};
use crate::sql::builder::{qualified_table, quoted, related, QueryBuf};
use serde_json::Value;

pub struct FilterCompiler<'a> {
    schema: &'a Schema,
    q: &'a mut QueryBuf,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(schema: &'a Schema, q: &'a mut QueryBuf) -> Self {
        FilterCompiler { schema, q }
    }

    /// SQL boolean expression for `filter` applied to `model` aliased as `alias`.
    pub fn compile(&mut self, model: &ResolvedModel, alias: &str, filter: &Filter) -> Result<String, ApiError> {
        match filter {
            Filter::Or(parts) => self.junction(model, alias, parts, " OR ", "FALSE"),
            Filter::And(parts) => self.junction(model, alias, parts, " AND ", "TRUE"),
            Filter::Not(inner) => Ok(format!("NOT ({})", self.compile(model, alias, inner)?)),
            Filter::Compare { name, op, arg } if op.is_relational() => self.relation(model, alias, name, *op, arg),
            Filter::Compare { name, op, arg } => {
                let column = model
                    .column(name)
                    .ok_or_else(|| ApiError::BadRequest(format!("no such field \"{}\" on {}", name, model.name)))?;
                self.column(model, alias, column, *op, arg)
            }
        }
    }

    fn junction(
        &mut self,
        model: &ResolvedModel,
        alias: &str,
        parts: &[Filter],
        sep: &str,
        empty: &str,
    ) -> Result<String, ApiError> {
        if parts.is_empty() {
            return Ok(empty.to_string());
        }
        let compiled = parts
            .iter()
            .map(|p| self.compile(model, alias, p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("({})", compiled.join(sep)))
    }

    fn column(
        &mut self,
        model: &ResolvedModel,
        alias: &str,
        column: &ColumnInfo,
        op: Operator,
        arg: &Argument,
    ) -> Result<String, ApiError> {
        let lhs = format!("{}.{}", alias, quoted(&column.name));
        match (op, arg) {
            (Operator::IsNull | Operator::IsNotNull, _) => Ok(format!("{} {}", lhs, op.sql())),
            (Operator::In | Operator::NotIn, Argument::Value(Value::Array(items))) => {
                if items.is_empty() {
                    return Ok(if op == Operator::In { "FALSE" } else { "TRUE" }.to_string());
                }
                let mut phs = Vec::with_capacity(items.len());
                for item in items {
                    let v = coerce_value(column, item.clone())?;
                    phs.push(self.q.value_sql(column, &v));
                }
                Ok(format!("{} {} ({})", lhs, op.sql(), phs.join(", ")))
            }
            (Operator::In | Operator::NotIn, _) => Err(ApiError::BadRequest(format!(
                "\"{}\" filter on {} needs a list value",
                op.sql(),
                column.name
            ))),
            (Operator::Like | Operator::ILike | Operator::NotLike, Argument::Value(v)) => {
                let pattern = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let ph = self.q.bind_text(&pattern);
                Ok(format!("{}::text {} {}", lhs, op.sql(), ph))
            }
            (_, Argument::Field(other)) => {
                let other_col = model
                    .column(other)
                    .ok_or_else(|| ApiError::BadRequest(format!("no such field \"{}\" on {}", other, model.name)))?;
                Ok(format!("{} {} {}.{}", lhs, op.sql(), alias, quoted(&other_col.name)))
            }
            (Operator::Eq, Argument::Value(Value::Null)) => Ok(format!("{} IS NULL", lhs)),
            (Operator::Ne, Argument::Value(Value::Null)) => Ok(format!("{} IS NOT NULL", lhs)),
            (_, Argument::Value(v)) => {
                let v = coerce_value(column, v.clone())?;
                let rhs = match &v {
                    SqlValue::Param(Value::Null) => {
                        return Err(ApiError::BadRequest(format!(
                            "cannot compare {} with null using \"{}\"",
                            column.name,
                            op.sql()
                        )))
                    }
                    _ => self.q.value_sql(column, &v),
                };
                Ok(format!("{} {} {}", lhs, op.sql(), rhs))
            }
            (_, _) => Err(ApiError::BadRequest(format!("filter on {} needs a value", column.name))),
        }
    }

    fn relation(
        &mut self,
        model: &ResolvedModel,
        alias: &str,
        name: &str,
        op: Operator,
        arg: &Argument,
    ) -> Result<String, ApiError> {
        let rel = model
            .relation(name)
            .ok_or_else(|| ApiError::BadRequest(format!("no such relationship \"{}\" on {}", name, model.name)))?;
        match (op, rel.is_to_many()) {
            (Operator::Has, true) => {
                return Err(ApiError::BadRequest(format!(
                    "\"has\" needs a to-one relationship; use \"any\" for {}",
                    name
                )))
            }
            (Operator::Any, false) => {
                return Err(ApiError::BadRequest(format!(
                    "\"any\" needs a to-many relationship; use \"has\" for {}",
                    name
                )))
            }
            _ => {}
        }
        let schema = self.schema;
        let target = related(schema, rel)?;
        let t = self.q.fresh_alias();
        let (from, join_cond) = match &rel.kind {
            RelationKind::ToOne { foreign_key } => (
                format!("{} {}", qualified_table(target), t),
                format!("{}.{} = {}.{}", t, quoted(&target.primary_key), alias, quoted(foreign_key)),
            ),
            RelationKind::ToMany { foreign_key } => (
                format!("{} {}", qualified_table(target), t),
                format!("{}.{} = {}.{}", t, quoted(foreign_key), alias, quoted(&model.primary_key)),
            ),
            RelationKind::ManyToMany {
                table,
                local_column,
                remote_column,
            } => {
                let s = self.q.fresh_alias();
                (
                    format!(
                        "{} {} JOIN {} {} ON {}.{} = {}.{}",
                        table,
                        s,
                        qualified_table(target),
                        t,
                        t,
                        quoted(&target.primary_key),
                        s,
                        quoted(remote_column)
                    ),
                    format!("{}.{} = {}.{}", s, quoted(local_column), alias, quoted(&model.primary_key)),
                )
            }
        };
        let nested = match arg {
            Argument::Filter(inner) => format!(" AND {}", self.compile(target, &t, inner)?),
            Argument::None => String::new(),
            _ => {
                return Err(ApiError::BadRequest(format!(
                    "\"{}\" filter on {} needs a nested filter object",
                    op.sql(),
                    name
                )))
            }
        };
        Ok(format!("EXISTS (SELECT 1 FROM {} WHERE {}{})", from, join_cond, nested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, ColumnConfig, FullConfig, ModelConfig, RelationshipConfig, SecondaryConfig};
    use crate::sql::PgBindValue;
    use serde_json::json;

    fn schema() -> Schema {
        let person = ModelConfig::new("person")
            .column(ColumnConfig::new("id", "serial").primary_key())
            .column(ColumnConfig::new("name", "text"))
            .column(ColumnConfig::new("age", "integer"))
            .column(ColumnConfig::new("other", "integer"))
            .column(ColumnConfig::new("birthday", "date"))
            .relationship(RelationshipConfig::to_many("articles", "article", "author_id"));
        let article = ModelConfig::new("article")
            .column(ColumnConfig::new("id", "serial").primary_key())
            .column(ColumnConfig::new("title", "text"))
            .column(ColumnConfig::new("author_id", "integer"))
            .relationship(RelationshipConfig::to_one("author", "person", "author_id"))
            .relationship(RelationshipConfig::many_to_many(
                "tags",
                "tag",
                SecondaryConfig {
                    table: "article_tag".into(),
                    schema: None,
                    local_column: "article_id".into(),
                    remote_column: "tag_id".into(),
                },
            ));
        let tag = ModelConfig::new("tag")
            .column(ColumnConfig::new("id", "serial").primary_key())
            .column(ColumnConfig::new("name", "text"));
        resolve(&FullConfig {
            models: vec![person, article, tag],
            ..Default::default()
        })
        .unwrap()
    }

    fn compile(model: &str, raw: &str) -> Result<(String, Vec<PgBindValue>), ApiError> {
        let schema = schema();
        let model = schema.model(model).unwrap().clone();
        let filters = Filter::parse_objects(raw)?;
        let mut q = QueryBuf::new();
        let mut c = FilterCompiler::new(&schema, &mut q);
        let mut parts = Vec::new();
        for f in &filters {
            parts.push(c.compile(&model, "t0", f)?);
        }
        Ok((parts.join(" AND "), q.params))
    }

    #[test]
    fn comparisons_and_junctions() {
        let (sql, params) = compile(
            "person",
            r#"[{"or": [{"name": "age", "op": "lt", "val": 10}, {"name": "name", "op": "eq", "val": null}]},
                {"name": "age", "op": "ge", "field": "other"},
                {"not": {"name": "name", "op": "in", "val": ["a", "b"]}}]"#,
        )
        .unwrap();
        assert_eq!(
            sql,
            "(t0.\"age\" < $1::integer OR t0.\"name\" IS NULL) AND t0.\"age\" >= t0.\"other\" AND NOT (t0.\"name\" IN ($2::text, $3::text))"
        );
        assert_eq!(params, vec![PgBindValue::text("10"), PgBindValue::text("a"), PgBindValue::text("b")]);
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let (sql, _) = compile("person", r#"[{"name": "age", "op": "in", "val": []}]"#).unwrap();
        assert_eq!(sql, "FALSE");
    }

    #[test]
    fn date_values_are_coerced() {
        let (sql, params) = compile("person", r#"[{"name": "birthday", "op": "gt", "val": "1900-01-02T00:00:00"}]"#).unwrap();
        assert_eq!(sql, "t0.\"birthday\" > $1::date");
        assert_eq!(params, vec![PgBindValue::text("1900-01-02")]);
        let (sql, params) = compile("person", r#"[{"name": "birthday", "op": "lt", "val": "CURRENT_DATE"}]"#).unwrap();
        assert_eq!(sql, "t0.\"birthday\" < CURRENT_DATE");
        assert!(params.is_empty());
        assert!(compile("person", r#"[{"name": "birthday", "op": "lt", "val": "garbage"}]"#).is_err());
    }

    #[test]
    fn relation_operators() {
        let (sql, _) = compile(
            "article",
            r#"[{"name": "author", "op": "has", "val": {"name": "age", "op": "gt", "val": 3}}]"#,
        )
        .unwrap();
        assert_eq!(
            sql,
            "EXISTS (SELECT 1 FROM \"public\".\"person\" t1 WHERE t1.\"id\" = t0.\"author_id\" AND t1.\"age\" > $1::integer)"
        );
        let (sql, _) = compile("person", r#"[{"name": "articles", "op": "any"}]"#).unwrap();
        assert_eq!(sql, "EXISTS (SELECT 1 FROM \"public\".\"article\" t1 WHERE t1.\"author_id\" = t0.\"id\")");
        let (sql, _) = compile(
            "article",
            r#"[{"name": "tags", "op": "any", "val": {"name": "name", "op": "eq", "val": "x"}}]"#,
        )
        .unwrap();
        assert_eq!(
            sql,
            "EXISTS (SELECT 1 FROM \"public\".\"article_tag\" t2 JOIN \"public\".\"tag\" t1 ON t1.\"id\" = t2.\"tag_id\" WHERE t2.\"article_id\" = t0.\"id\" AND t1.\"name\" = $1::text)"
        );
    }

    #[test]
    fn rejects_unknown_fields_and_mismatched_relations() {
        assert!(compile("person", r#"[{"name": "bogus", "op": "eq", "val": 1}]"#).is_err());
        assert!(compile("person", r#"[{"name": "age", "op": "eq", "field": "bogus"}]"#).is_err());
        assert!(compile("person", r#"[{"name": "articles", "op": "has"}]"#).is_err());
        assert!(compile("article", r#"[{"name": "author", "op": "any"}]"#).is_err());
    }
}
