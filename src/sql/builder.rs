//! Builds parameterized SELECT, INSERT, UPDATE, DELETE from resolved models.
//!
//! The primary table is always aliased `t0`; joins and subqueries get `t1`, `t2`, ...

use crate::coerce::SqlValue;
use crate::config::{ColumnInfo, ColumnKind, RelationInfo, RelationKind, ResolvedModel, Schema};
use crate::error::ApiError;
use crate::query::{Filter, SortKey};
use crate::sql::filter::FilterCompiler;
use crate::sql::PgBindValue;
use serde_json::Value;

/// Quote identifier for PostgreSQL (safe: only from config).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(model: &ResolvedModel) -> String {
    format!("{}.{}", quoted(&model.schema_name), quoted(&model.table_name))
}

pub const ROOT_ALIAS: &str = "t0";

#[derive(Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
    next_alias: u32,
}

impl QueryBuf {
    pub fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
            next_alias: 1,
        }
    }

    fn push_param(&mut self, v: PgBindValue) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Bind `v` as a value of `column`, returning `$n::type`.
    pub fn bind(&mut self, column: &ColumnInfo, v: &Value) -> String {
        let n = self.push_param(PgBindValue::for_kind(column.kind, v));
        format!("${}::{}", n, column.pg_type)
    }

    pub fn bind_text(&mut self, s: &str) -> String {
        let n = self.push_param(PgBindValue::text(s));
        format!("${}::text", n)
    }

    /// SQL for a coerced value: a cast placeholder or an inline function.
    pub fn value_sql(&mut self, column: &ColumnInfo, v: &SqlValue) -> String {
        match v {
            SqlValue::Param(v) => self.bind(column, v),
            SqlValue::Function(f) => f.to_string(),
        }
    }

    pub fn fresh_alias(&mut self) -> String {
        let a = format!("t{}", self.next_alias);
        self.next_alias += 1;
        a
    }
}

/// Select expression for one column so that sqlx decodes it into a JSON-friendly value.
fn column_expr(alias: &str, c: &ColumnInfo) -> String {
    let q = format!("{}.{}", alias, quoted(&c.name));
    match c.kind {
        ColumnKind::Interval => format!("EXTRACT(EPOCH FROM {})::float8", q),
        ColumnKind::Numeric | ColumnKind::Custom => format!("{}::text", q),
        ColumnKind::Time => format!("{}::time", q),
        _ => q,
    }
}

pub fn select_column_list(model: &ResolvedModel, alias: &str) -> String {
    model
        .columns
        .iter()
        .map(|c| format!("{} AS {}", column_expr(alias, c), quoted(&c.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Restricts a collection to the resources related to one owner.
#[derive(Clone, Debug)]
pub enum Scope {
    /// `t0.column = value`
    Column { column: String, value: Value },
    /// Linked through an association table to the owner key `value`.
    Secondary {
        table: String,
        local_column: String,
        remote_column: String,
        owner_key: ColumnInfo,
        value: Value,
    },
}

pub struct CollectionQuery<'a> {
    pub model: &'a ResolvedModel,
    pub scope: Option<Scope>,
    pub filters: &'a [Filter],
    pub sort: &'a [SortKey],
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Returns the page query and the matching COUNT(*) query.
pub fn select_collection(schema: &Schema, cq: &CollectionQuery<'_>) -> Result<(QueryBuf, QueryBuf), ApiError> {
    let model = cq.model;
    let mut q = QueryBuf::new();
    let mut where_parts = Vec::new();

    match &cq.scope {
        Some(Scope::Column { column, value }) => {
            let col = model
                .column(column)
                .ok_or_else(|| ApiError::BadRequest(format!("no column {} on {}", column, model.name)))?;
            let ph = q.bind(col, value);
            where_parts.push(format!("{}.{} = {}", ROOT_ALIAS, quoted(column), ph));
        }
        Some(Scope::Secondary {
            table,
            local_column,
            remote_column,
            owner_key,
            value,
        }) => {
            let alias = q.fresh_alias();
            let ph = q.bind(owner_key, value);
            where_parts.push(format!(
                "EXISTS (SELECT 1 FROM {table} {a} WHERE {a}.{remote} = {root}.{pk} AND {a}.{local} = {ph})",
                table = table,
                a = alias,
                remote = quoted(remote_column),
                root = ROOT_ALIAS,
                pk = quoted(&model.primary_key),
                local = quoted(local_column),
                ph = ph
            ));
        }
        None => {}
    }

    {
        let mut compiler = FilterCompiler::new(schema, &mut q);
        for f in cq.filters {
            where_parts.push(compiler.compile(model, ROOT_ALIAS, f)?);
        }
    }

    let where_clause = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };
    let table = qualified_table(model);

    let mut count = QueryBuf::new();
    count.sql = format!("SELECT COUNT(*) AS total FROM {} {}{}", table, ROOT_ALIAS, where_clause);
    count.params = q.params.clone();

    let (joins, order) = order_clause(schema, model, cq.sort, &mut q)?;
    let limit_clause = cq.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = cq.offset.filter(|n| *n > 0).map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {} {}{}{} ORDER BY {}{}{}",
        select_column_list(model, ROOT_ALIAS),
        table,
        ROOT_ALIAS,
        joins,
        where_clause,
        order,
        limit_clause,
        offset_clause
    );
    Ok((q, count))
}

/// LEFT JOINs needed for relation sort keys and the ORDER BY list (primary key last as a tiebreaker).
fn order_clause(
    schema: &Schema,
    model: &ResolvedModel,
    sort: &[SortKey],
    q: &mut QueryBuf,
) -> Result<(String, String), ApiError> {
    let mut joins: Vec<(String, String)> = Vec::new();
    let mut join_sql = String::new();
    let mut order = Vec::new();
    for key in sort {
        let dir = if key.descending { "DESC" } else { "ASC" };
        match &key.relation {
            None => {
                if model.column(&key.field).is_none() {
                    return Err(ApiError::BadRequest(format!("No such field {}", key.field)));
                }
                order.push(format!("{}.{} {}", ROOT_ALIAS, quoted(&key.field), dir));
            }
            Some(rel_name) => {
                let rel = model
                    .relation(rel_name)
                    .ok_or_else(|| ApiError::BadRequest(format!("No such relationship {}", rel_name)))?;
                let RelationKind::ToOne { foreign_key } = &rel.kind else {
                    return Err(ApiError::BadRequest(format!(
                        "Cannot sort by attributes of to-many relationship {}",
                        rel_name
                    )));
                };
                let target = related(schema, rel)?;
                if target.column(&key.field).is_none() {
                    return Err(ApiError::BadRequest(format!("No such field {}.{}", rel_name, key.field)));
                }
                let alias = match joins.iter().find(|(r, _)| r == rel_name) {
                    Some((_, a)) => a.clone(),
                    None => {
                        let a = q.fresh_alias();
                        join_sql.push_str(&format!(
                            " LEFT JOIN {} {} ON {}.{} = {}.{}",
                            qualified_table(target),
                            a,
                            a,
                            quoted(&target.primary_key),
                            ROOT_ALIAS,
                            quoted(foreign_key)
                        ));
                        joins.push((rel_name.clone(), a.clone()));
                        a
                    }
                };
                order.push(format!("{}.{} {}", alias, quoted(&key.field), dir));
            }
        }
    }
    order.push(format!("{}.{} ASC", ROOT_ALIAS, quoted(&model.primary_key)));
    Ok((join_sql, order.join(", ")))
}

pub fn related<'a>(schema: &'a Schema, rel: &RelationInfo) -> Result<&'a ResolvedModel, ApiError> {
    schema
        .related_model(rel)
        .map(|m| m.as_ref())
        .ok_or_else(|| ApiError::BadRequest(format!("unknown model {}", rel.target)))
}

/// SELECT rows whose `column` is one of `values`, ordered by primary key.
pub fn select_by_column_in(model: &ResolvedModel, column: &ColumnInfo, values: &[Value]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cols = select_column_list(model, ROOT_ALIAS);
    let table = qualified_table(model);
    if values.is_empty() {
        q.sql = format!("SELECT {} FROM {} {} WHERE 1 = 0", cols, table, ROOT_ALIAS);
        return q;
    }
    let placeholders: Vec<String> = values.iter().map(|v| q.bind(column, v)).collect();
    q.sql = format!(
        "SELECT {} FROM {} {} WHERE {}.{} IN ({}) ORDER BY {}.{}",
        cols,
        table,
        ROOT_ALIAS,
        ROOT_ALIAS,
        quoted(&column.name),
        placeholders.join(", "),
        ROOT_ALIAS,
        quoted(&model.primary_key)
    );
    q
}

/// Owner/related key pairs for one relationship of many owners.
///
/// Rows have two text columns: `owner` (the owner's table primary key) and `related`
/// (the related resource's `related_key` column).
pub fn select_linkage(
    schema: &Schema,
    model: &ResolvedModel,
    rel: &RelationInfo,
    owner_keys: &[Value],
    related_key: &str,
) -> Result<QueryBuf, ApiError> {
    let mut q = QueryBuf::new();
    let target = related(schema, rel)?;
    let owner_pk = model.primary_key_column().clone();
    let placeholders: Vec<String> = owner_keys.iter().map(|v| q.bind(&owner_pk, v)).collect();
    let in_list = if placeholders.is_empty() {
        "NULL".to_string()
    } else {
        placeholders.join(", ")
    };
    q.sql = match &rel.kind {
        RelationKind::ToOne { foreign_key } => format!(
            "SELECT o.{opk}::text AS owner, r.{rkey}::text AS related FROM {owner} o JOIN {target} r ON r.{tpk} = o.{fk} WHERE o.{opk} IN ({ins})",
            opk = quoted(&model.primary_key),
            rkey = quoted(related_key),
            owner = qualified_table(model),
            target = qualified_table(target),
            tpk = quoted(&target.primary_key),
            fk = quoted(foreign_key),
            ins = in_list
        ),
        RelationKind::ToMany { foreign_key } => format!(
            "SELECT r.{fk}::text AS owner, r.{rkey}::text AS related FROM {target} r WHERE r.{fk} IN ({ins}) ORDER BY r.{tpk}",
            fk = quoted(foreign_key),
            rkey = quoted(related_key),
            target = qualified_table(target),
            tpk = quoted(&target.primary_key),
            ins = in_list
        ),
        RelationKind::ManyToMany {
            table,
            local_column,
            remote_column,
        } => format!(
            "SELECT s.{local}::text AS owner, r.{rkey}::text AS related FROM {table} s JOIN {target} r ON r.{tpk} = s.{remote} WHERE s.{local} IN ({ins}) ORDER BY r.{tpk}",
            local = quoted(local_column),
            rkey = quoted(related_key),
            table = table,
            target = qualified_table(target),
            tpk = quoted(&target.primary_key),
            remote = quoted(remote_column),
            ins = in_list
        ),
    };
    Ok(q)
}

/// INSERT with coerced values; returns the new row.
pub fn insert(model: &ResolvedModel, values: &[(&ColumnInfo, SqlValue)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(model);
    let returning = select_column_list(model, ROOT_ALIAS);
    if values.is_empty() {
        q.sql = format!("INSERT INTO {} AS {} DEFAULT VALUES RETURNING {}", table, ROOT_ALIAS, returning);
        return q;
    }
    let mut cols = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());
    for (c, v) in values {
        cols.push(quoted(&c.name));
        placeholders.push(q.value_sql(c, v));
    }
    q.sql = format!(
        "INSERT INTO {} AS {} ({}) VALUES ({}) RETURNING {}",
        table,
        ROOT_ALIAS,
        cols.join(", "),
        placeholders.join(", "),
        returning
    );
    q
}

/// UPDATE one row by `key_column`. Columns with an `on_update` expression are refreshed
/// unless set explicitly. With nothing to set this degrades to a SELECT of the row.
pub fn update(
    model: &ResolvedModel,
    key_column: &ColumnInfo,
    key: &Value,
    values: &[(&ColumnInfo, SqlValue)],
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(model);
    let mut sets = Vec::new();
    for (c, v) in values {
        if c.name == key_column.name {
            continue;
        }
        let rhs = q.value_sql(c, v);
        sets.push(format!("{} = {}", quoted(&c.name), rhs));
    }
    if sets.is_empty() {
        let ph = q.bind(key_column, key);
        q.sql = format!(
            "SELECT {} FROM {} {} WHERE {}.{} = {}",
            select_column_list(model, ROOT_ALIAS),
            table,
            ROOT_ALIAS,
            ROOT_ALIAS,
            quoted(&key_column.name),
            ph
        );
        return q;
    }
    for c in &model.columns {
        if let Some(expr) = &c.on_update {
            if !values.iter().any(|(v, _)| v.name == c.name) {
                sets.push(format!("{} = {}", quoted(&c.name), expr));
            }
        }
    }
    let ph = q.bind(key_column, key);
    q.sql = format!(
        "UPDATE {} AS {} SET {} WHERE {}.{} = {} RETURNING {}",
        table,
        ROOT_ALIAS,
        sets.join(", "),
        ROOT_ALIAS,
        quoted(&key_column.name),
        ph,
        select_column_list(model, ROOT_ALIAS)
    );
    q
}

/// DELETE by `key_column`, returning the deleted primary key.
pub fn delete(model: &ResolvedModel, key_column: &ColumnInfo, key: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.bind(key_column, key);
    q.sql = format!(
        "DELETE FROM {} AS {} WHERE {}.{} = {} RETURNING {}.{}",
        qualified_table(model),
        ROOT_ALIAS,
        ROOT_ALIAS,
        quoted(&key_column.name),
        ph,
        ROOT_ALIAS,
        quoted(&model.primary_key)
    );
    q
}

/// Which rows of a to-many relationship a detach applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    Only,
    AllExcept,
}

fn key_filter(
    q: &mut QueryBuf,
    column_sql: &str,
    key_column: &ColumnInfo,
    keys: &[Value],
    selection: Selection,
) -> Option<String> {
    if keys.is_empty() {
        return match selection {
            Selection::Only => Some("FALSE".into()),
            Selection::AllExcept => None,
        };
    }
    let phs: Vec<String> = keys.iter().map(|k| q.bind(key_column, k)).collect();
    let op = match selection {
        Selection::Only => "IN",
        Selection::AllExcept => "NOT IN",
    };
    Some(format!("{} {} ({})", column_sql, op, phs.join(", ")))
}

/// Point the foreign keys of `target` rows (by primary key) at `owner`.
pub fn attach_by_foreign_key(target: &ResolvedModel, foreign_key: &ColumnInfo, owner: &Value, keys: &[Value]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.bind(foreign_key, owner);
    let pk = target.primary_key_column().clone();
    let filter = key_filter(&mut q, &quoted(&pk.name), &pk, keys, Selection::Only).unwrap_or_else(|| "FALSE".into());
    q.sql = format!(
        "UPDATE {} SET {} = {} WHERE {}",
        qualified_table(target),
        quoted(&foreign_key.name),
        ph,
        filter
    );
    q
}

/// Null the foreign keys of `target` rows that point at `owner`, restricted by `selection`.
pub fn detach_by_foreign_key(
    target: &ResolvedModel,
    foreign_key: &ColumnInfo,
    owner: &Value,
    keys: &[Value],
    selection: Selection,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.bind(foreign_key, owner);
    let pk = target.primary_key_column().clone();
    let mut sql = format!(
        "UPDATE {} SET {} = NULL WHERE {} = {}",
        qualified_table(target),
        quoted(&foreign_key.name),
        quoted(&foreign_key.name),
        ph
    );
    if let Some(f) = key_filter(&mut q, &quoted(&pk.name), &pk, keys, selection) {
        sql.push_str(" AND ");
        sql.push_str(&f);
    }
    q.sql = sql;
    q
}

/// Set one column of one row (to-one foreign key updates).
pub fn set_column(model: &ResolvedModel, column: &ColumnInfo, value: &Value, key: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.bind(column, value);
    let pk = model.primary_key_column().clone();
    let key_ph = q.bind(&pk, key);
    let mut sets = vec![format!("{} = {}", quoted(&column.name), ph)];
    for c in &model.columns {
        if let (Some(expr), false) = (&c.on_update, c.name == column.name) {
            sets.push(format!("{} = {}", quoted(&c.name), expr));
        }
    }
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        qualified_table(model),
        sets.join(", "),
        quoted(&pk.name),
        key_ph
    );
    q
}

/// Association row linking `owner` to `target_key`, unless it already exists.
pub fn link_secondary(
    table: &str,
    local_column: &str,
    remote_column: &str,
    owner_column: &ColumnInfo,
    owner: &Value,
    target_column: &ColumnInfo,
    target_key: &Value,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let o = q.bind(owner_column, owner);
    let t = q.bind(target_column, target_key);
    q.sql = format!(
        "INSERT INTO {table} ({local}, {remote}) SELECT {o}, {t} WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE {local} = {o} AND {remote} = {t})",
        table = table,
        local = quoted(local_column),
        remote = quoted(remote_column),
        o = o,
        t = t
    );
    q
}

/// Remove association rows of `owner`, restricted by `selection` over target keys.
pub fn unlink_secondary(
    table: &str,
    local_column: &str,
    remote_column: &str,
    owner_column: &ColumnInfo,
    owner: &Value,
    target_column: &ColumnInfo,
    keys: &[Value],
    selection: Selection,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let o = q.bind(owner_column, owner);
    let mut sql = format!("DELETE FROM {} WHERE {} = {}", table, quoted(local_column), o);
    if let Some(f) = key_filter(&mut q, &quoted(remote_column), target_column, keys, selection) {
        sql.push_str(" AND ");
        sql.push_str(&f);
    }
    q.sql = sql;
    q
}
