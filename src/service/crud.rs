//! Statement execution against PostgreSQL and the row-level operations behind every endpoint.

use crate::config::{ColumnKind, ResolvedModel, Schema};
use crate::error::ApiError;
use crate::registry::Identities;
use crate::serialization::{value_to_key, Instance, Linkage, ResourceId};
use crate::sql::{select_by_column_in, select_linkage, QueryBuf};
use serde_json::{Map, Number, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgConnection, PgExecutor, Postgres, Row, Transaction, TypeInfo};
use std::collections::HashMap;

pub type RowMap = Map<String, Value>;

pub struct CrudService;

impl CrudService {
    pub async fn fetch_all<'e, E>(ex: E, q: &QueryBuf) -> Result<Vec<RowMap>, ApiError>
    where
        E: PgExecutor<'e>,
    {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = bound(q).fetch_all(ex).await?;
        Ok(rows.iter().map(row_to_map).collect())
    }

    pub async fn fetch_optional<'e, E>(ex: E, q: &QueryBuf) -> Result<Option<RowMap>, ApiError>
    where
        E: PgExecutor<'e>,
    {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = bound(q).fetch_optional(ex).await?;
        Ok(row.as_ref().map(row_to_map))
    }

    /// Runs a `SELECT COUNT(*) AS total` statement.
    pub async fn fetch_total<'e, E>(ex: E, q: &QueryBuf) -> Result<u64, ApiError>
    where
        E: PgExecutor<'e>,
    {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = bound(q).fetch_one(ex).await?;
        let total: i64 = row.try_get("total")?;
        Ok(total.max(0) as u64)
    }

    pub async fn execute<'e, E>(ex: E, q: &QueryBuf) -> Result<u64, ApiError>
    where
        E: PgExecutor<'e>,
    {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
        let done = bound(q).execute(ex).await?;
        Ok(done.rows_affected())
    }

    /// `(owner, related)` pairs from a linkage statement.
    async fn fetch_pairs<'e, E>(ex: E, q: &QueryBuf) -> Result<Vec<(String, String)>, ApiError>
    where
        E: PgExecutor<'e>,
    {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = bound(q).fetch_all(ex).await?;
        let mut pairs = Vec::with_capacity(rows.len());
        for row in &rows {
            let owner: Option<String> = row.try_get("owner")?;
            let related: Option<String> = row.try_get("related")?;
            if let (Some(o), Some(r)) = (owner, related) {
                pairs.push((o, r));
            }
        }
        Ok(pairs)
    }

    /// The row of `model` whose `key_column` equals the resource id `id`.
    pub async fn find_by_key(
        conn: &mut PgConnection,
        model: &ResolvedModel,
        key_column: &str,
        id: &str,
    ) -> Result<Option<RowMap>, ApiError> {
        let column = model
            .column(key_column)
            .ok_or_else(|| ApiError::BadRequest(format!("no column {} on {}", key_column, model.name)))?;
        if !could_be_key(column.kind, id) {
            return Ok(None);
        }
        let q = select_by_column_in(model, column, &[Value::String(id.to_string())]);
        CrudService::fetch_optional(conn, &q).await
    }

    /// Fill `links` of every instance with the linkage of each relationship of `model`.
    pub async fn load_linkage(
        conn: &mut PgConnection,
        schema: &Schema,
        ids: &Identities,
        model: &ResolvedModel,
        instances: &mut [Instance],
    ) -> Result<(), ApiError> {
        if instances.is_empty() {
            return Ok(());
        }
        let owner_keys: Vec<Value> = instances
            .iter()
            .filter_map(|i| i.row.get(&model.primary_key).filter(|v| !v.is_null()).cloned())
            .collect();
        for rel in &model.relationships {
            let target = schema
                .related_model(rel)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown model {}", rel.target)))?;
            let type_name = ids.type_name(target);
            let q = select_linkage(schema, model, rel, &owner_keys, ids.key(target))?;
            let mut by_owner: HashMap<String, Vec<ResourceId>> = HashMap::new();
            for (owner, related) in CrudService::fetch_pairs(&mut *conn, &q).await? {
                by_owner
                    .entry(owner)
                    .or_default()
                    .push(ResourceId::new(type_name, related));
            }
            for instance in instances.iter_mut() {
                let found = instance
                    .key_string(&model.primary_key)
                    .and_then(|k| by_owner.get(&k).cloned())
                    .unwrap_or_default();
                let linkage = if rel.is_to_many() {
                    Linkage::ToMany(found)
                } else {
                    Linkage::ToOne(found.into_iter().next())
                };
                instance.links.insert(rel.name.clone(), linkage);
            }
        }
        Ok(())
    }

    /// Table primary keys of the `target` rows identified by the resource ids `ids`, in order.
    /// A missing resource answers 404.
    pub async fn resolve_keys(
        conn: &mut PgConnection,
        target: &ResolvedModel,
        type_name: &str,
        key_column: &str,
        ids: &[String],
    ) -> Result<Vec<Value>, ApiError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let column = target
            .column(key_column)
            .ok_or_else(|| ApiError::BadRequest(format!("no column {} on {}", key_column, target.name)))?;
        let values: Vec<Value> = ids.iter().cloned().map(Value::String).collect();
        let rows = CrudService::fetch_all(conn, &select_by_column_in(target, column, &values)).await?;
        let found: HashMap<String, Value> = rows
            .into_iter()
            .filter_map(|row| {
                let key = row.get(key_column).and_then(value_to_key)?;
                let pk = row.get(&target.primary_key).cloned()?;
                Some((key, pk))
            })
            .collect();
        ids.iter()
            .map(|id| {
                found
                    .get(id)
                    .cloned()
                    .ok_or_else(|| ApiError::not_found(type_name, id))
            })
            .collect()
    }
}

/// Roll back after a failed write and hand the error back.
pub async fn rollback(tx: Transaction<'_, Postgres>, err: ApiError) -> ApiError {
    tracing::warn!(error = %err, "rolling back transaction");
    if let Err(e) = tx.rollback().await {
        tracing::error!(error = %e, "rollback failed");
    }
    err
}

/// Ids that cannot parse as the key column's type name no resource.
fn could_be_key(kind: ColumnKind, id: &str) -> bool {
    match kind {
        // Compared as ::integer, so anything outside i32 can never match.
        ColumnKind::Integer => id.parse::<i32>().is_ok(),
        ColumnKind::BigInt => id.parse::<i64>().is_ok(),
        ColumnKind::Uuid => uuid::Uuid::parse_str(id).is_ok(),
        _ => true,
    }
}

fn bound(q: &QueryBuf) -> Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(p.clone());
    }
    query
}

pub fn row_to_map(row: &PgRow) -> RowMap {
    let mut map = Map::new();
    for col in row.columns() {
        let v = cell_to_value(row, col.ordinal(), col.type_info().name()).unwrap_or(Value::Null);
        map.insert(col.name().to_string(), v);
    }
    map
}

/// JSON form of one cell, chosen by the PostgreSQL type of the column. NULL and
/// undecodable cells come back as `None`.
fn cell_to_value(row: &PgRow, idx: usize, type_name: &str) -> Option<Value> {
    match type_name {
        "INT2" => row.try_get::<Option<i16>, _>(idx).ok()?.map(Value::from),
        "INT4" => row.try_get::<Option<i32>, _>(idx).ok()?.map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(idx).ok()?.map(Value::from),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .ok()?
            .and_then(|n| Number::from_f64(n as f64))
            .map(Value::Number),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(idx)
            .ok()?
            .and_then(Number::from_f64)
            .map(Value::Number),
        "BOOL" => row.try_get::<Option<bool>, _>(idx).ok()?.map(Value::Bool),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(idx)
            .ok()?
            .map(|u| Value::String(u.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .ok()?
            .map(|d| Value::String(d.to_rfc3339())),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .ok()?
            .map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .ok()?
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(idx)
            .ok()?
            .map(|t| Value::String(t.format("%H:%M:%S%.f").to_string())),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(idx).ok()?,
        _ => row.try_get::<Option<String>, _>(idx).ok()?.map(Value::String),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes_by_column_kind() {
        assert!(could_be_key(ColumnKind::Integer, "42"));
        assert!(!could_be_key(ColumnKind::Integer, "abc"));
        assert!(could_be_key(ColumnKind::Integer, "2147483647"));
        assert!(!could_be_key(ColumnKind::Integer, "2147483648"));
        assert!(could_be_key(ColumnKind::BigInt, "2147483648"));
        assert!(!could_be_key(ColumnKind::Uuid, "42"));
        assert!(could_be_key(ColumnKind::Uuid, "67e55044-10b1-426f-9247-bb680e5fe0c8"));
        assert!(could_be_key(ColumnKind::Text, "anything"));
    }
}
