//! Collection, resource and related-resource endpoints.

use super::support::{
    collection_document, deserialize, include_tree, relation, resource_document, respond, respond_no_content,
    fetch_related, CollectionSource, RelatedSource,
};
use crate::coerce::{coerce_value, SqlValue};
use crate::config::{ColumnInfo, RelationKind, ResolvedModel};
use crate::error::ApiError;
use crate::extractors::{AcceptsJsonApi, JsonApiDocument, MethodEnabled};
use crate::processors::{ProcessorArgs, ProcessorKey};
use crate::query::FetchParams;
use crate::registry::{Identities, UrlFor};
use crate::response::success_created;
use crate::serialization::{parse_update, value_to_key, DeserializeContext, Instance, LinkageRequest, NewResource};
use crate::service::{rollback, CrudService, RelationWriter, RequestValidator, RowMap};
use crate::sql;
use crate::state::ApiState;
use axum::{
    extract::{Path, RawQuery, State},
    response::Response,
};
use serde_json::Value;
use sqlx::PgConnection;

pub async fn get_collection(
    State(state): State<ApiState>,
    _enabled: MethodEnabled,
    _accept: AcceptsJsonApi,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let api = state.api.clone();
    let params = FetchParams::parse(query.as_deref())?;
    let mut args = ProcessorArgs {
        filters: params.filters.clone(),
        sort: params.sort.clone(),
        ..Default::default()
    };
    api.preprocessors.run(ProcessorKey::GetCollection, &mut args)?;

    let ids = state.identities()?;
    let tree = include_tree(&state.schema, &api.model, &params, &api.includes)?;
    let mut conn = state.pool.acquire().await?;
    let source = CollectionSource {
        model: &api.model,
        scope: None,
        filters: &args.filters,
        sort: &args.sort,
        base: api.url(&UrlFor::default()),
    };
    let fetched = collection_document(&state, &ids, &mut conn, source, &tree, &params).await?;
    respond(&api, ProcessorKey::GetCollection, args, fetched)
}

pub async fn get_resource(
    State(state): State<ApiState>,
    _enabled: MethodEnabled,
    _accept: AcceptsJsonApi,
    Path(resource_id): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let api = state.api.clone();
    let params = FetchParams::parse(query.as_deref())?;
    let mut args = ProcessorArgs {
        resource_id: Some(resource_id),
        ..Default::default()
    };
    api.preprocessors.run(ProcessorKey::GetResource, &mut args)?;
    let id = args.resource_id.clone().unwrap_or_default();

    let ids = state.identities()?;
    let tree = include_tree(&state.schema, &api.model, &params, &api.includes)?;
    let mut conn = state.pool.acquire().await?;
    let row = CrudService::find_by_key(&mut conn, &api.model, &api.primary_key, &id)
        .await?
        .ok_or_else(|| ApiError::not_found(&api.collection_name, &id))?;
    let self_url = api.url(&UrlFor::resource(&id));
    let document = resource_document(&state, &ids, &mut conn, &api.model, row, &tree, &params, self_url).await?;
    respond(&api, ProcessorKey::GetResource, args, document.into())
}

/// `GET /{collection}/{id}/{relation}`: the related resource or a collection of them.
pub async fn get_related(
    State(state): State<ApiState>,
    _enabled: MethodEnabled,
    _accept: AcceptsJsonApi,
    Path((resource_id, relation_name)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let api = state.api.clone();
    let params = FetchParams::parse(query.as_deref())?;
    let mut args = ProcessorArgs {
        resource_id: Some(resource_id),
        relation_name: Some(relation_name),
        filters: params.filters.clone(),
        sort: params.sort.clone(),
        ..Default::default()
    };
    api.preprocessors.run(ProcessorKey::GetRelation, &mut args)?;
    let id = args.resource_id.clone().unwrap_or_default();
    let relation_name = args.relation_name.clone().unwrap_or_default();

    let model = &api.model;
    let rel = relation(model, &relation_name)?;
    let target = state
        .schema
        .related_model(rel)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("No such relation: {}", relation_name)))?;
    let ids = state.identities()?;
    let tree = include_tree(&state.schema, &target, &params, &[])?;
    let base = api.url(&UrlFor::related(&id, &relation_name));

    let source = RelatedSource {
        id: &id,
        rel,
        target: &target,
        filters: &args.filters,
        sort: &args.sort,
        base,
    };
    let fetched = fetch_related(&state, &ids, source, &tree, &params).await?;
    respond(&api, ProcessorKey::GetRelation, args, fetched)
}

/// `GET /{collection}/{id}/{relation}/{related_id}`: one member of a to-many relationship.
pub async fn get_related_resource(
    State(state): State<ApiState>,
    _enabled: MethodEnabled,
    _accept: AcceptsJsonApi,
    Path((resource_id, relation_name, related_resource_id)): Path<(String, String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let api = state.api.clone();
    let params = FetchParams::parse(query.as_deref())?;
    let mut args = ProcessorArgs {
        resource_id: Some(resource_id),
        relation_name: Some(relation_name),
        related_resource_id: Some(related_resource_id),
        ..Default::default()
    };
    api.preprocessors.run(ProcessorKey::GetRelatedResource, &mut args)?;
    let id = args.resource_id.clone().unwrap_or_default();
    let relation_name = args.relation_name.clone().unwrap_or_default();
    let related_id = args.related_resource_id.clone().unwrap_or_default();

    let model = &api.model;
    let rel = relation(model, &relation_name)?;
    if !rel.is_to_many() {
        return Err(ApiError::NotFound(format!(
            "{} is a to-one relationship; use /{}/{}/{} instead",
            relation_name, api.collection_name, id, relation_name
        )));
    }
    let target = state
        .schema
        .related_model(rel)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("No such relation: {}", relation_name)))?;
    let ids = state.identities()?;
    let tree = include_tree(&state.schema, &target, &params, &[])?;

    let mut conn = state.pool.acquire().await?;
    let parent = CrudService::find_by_key(&mut conn, model, &api.primary_key, &id)
        .await?
        .ok_or_else(|| ApiError::not_found(&api.collection_name, &id))?;
    let mut owner = vec![Instance::new(parent)];
    CrudService::load_linkage(&mut conn, &state.schema, &ids, model, &mut owner).await?;
    let type_name = ids.type_name(&target).to_string();
    let linked = owner[0]
        .links
        .get(&relation_name)
        .is_some_and(|l| l.ids().iter().any(|r| r.id == related_id));
    if !linked {
        return Err(ApiError::not_found(&type_name, &related_id));
    }
    let row = CrudService::find_by_key(&mut conn, &target, ids.key(&target), &related_id)
        .await?
        .ok_or_else(|| ApiError::not_found(&type_name, &related_id))?;
    let self_url = api.url(&UrlFor {
        related_resource_id: Some(&related_id),
        ..UrlFor::related(&id, &relation_name)
    });
    let document = resource_document(&state, &ids, &mut conn, &target, row, &tree, &params, self_url).await?;
    respond(&api, ProcessorKey::GetRelatedResource, args, document.into())
}

pub async fn post_resource(
    State(state): State<ApiState>,
    _enabled: MethodEnabled,
    _accept: AcceptsJsonApi,
    RawQuery(query): RawQuery,
    JsonApiDocument(document): JsonApiDocument,
) -> Result<Response, ApiError> {
    let api = state.api.clone();
    let params = FetchParams::parse(query.as_deref())?;
    let mut args = ProcessorArgs {
        data: Some(document),
        ..Default::default()
    };
    api.preprocessors.run(ProcessorKey::PostResource, &mut args)?;
    let document = args.data.take().unwrap_or(Value::Null);

    let resource = deserialize(&state, api.deserializer.as_ref(), &document)?;
    RequestValidator::validate(&resource.attributes, &api.model.validation)?;
    let ids = state.identities()?;
    let tree = include_tree(&state.schema, &api.model, &params, &api.includes)?;

    let mut tx = state.pool.begin().await?;
    let row = match insert_resource(&state, &ids, &mut tx, &api.primary_key, resource).await {
        Ok(row) => row,
        Err(e) => return Err(rollback(tx, e).await),
    };
    tx.commit().await?;

    let id = row
        .get(&api.primary_key)
        .and_then(value_to_key)
        .ok_or_else(|| ApiError::IllegalArgument(format!("created row has no {}", api.primary_key)))?;
    tracing::debug!(collection = %api.collection_name, id = %id, "created resource");
    let location = api.url(&UrlFor::resource(&id));
    let mut conn = state.pool.acquire().await?;
    let document = resource_document(&state, &ids, &mut conn, &api.model, row, &tree, &params, location.clone()).await?;

    args.resource_id = Some(id);
    args.result = Some(document.to_value());
    api.postprocessors.run(ProcessorKey::PostResource, &mut args)?;
    Ok(success_created(args.result.unwrap_or(Value::Null), location))
}

pub async fn patch_resource(
    State(state): State<ApiState>,
    _enabled: MethodEnabled,
    _accept: AcceptsJsonApi,
    Path(resource_id): Path<String>,
    RawQuery(query): RawQuery,
    JsonApiDocument(document): JsonApiDocument,
) -> Result<Response, ApiError> {
    let api = state.api.clone();
    let params = FetchParams::parse(query.as_deref())?;
    let mut args = ProcessorArgs {
        resource_id: Some(resource_id),
        data: Some(document),
        ..Default::default()
    };
    api.preprocessors.run(ProcessorKey::PatchResource, &mut args)?;
    let id = args.resource_id.clone().unwrap_or_default();
    let document = args.data.take().unwrap_or(Value::Null);

    let resource = {
        let registry = state.registry()?;
        let ctx = DeserializeContext {
            schema: &state.schema,
            registry: &registry,
        };
        parse_update(&api.model, &api.collection_name, &id, &document, &ctx)?
    };
    RequestValidator::validate_partial(&resource.attributes, &api.model.validation)?;
    let replaces_to_many = resource
        .relationships
        .iter()
        .any(|(_, l)| matches!(l, LinkageRequest::ToMany(_)));
    if replaces_to_many && !api.allow_to_many_replacement {
        return Err(ApiError::Forbidden("Not allowed to replace a to-many relationship".into()));
    }
    let ids = state.identities()?;

    let mut tx = state.pool.begin().await?;
    let updated = match update_resource(&state, &ids, &mut tx, &id, resource).await {
        Ok(row) => row,
        Err(e) => return Err(rollback(tx, e).await),
    };
    tx.commit().await?;

    if !api.model.changes_on_update() {
        return respond_no_content(&api, ProcessorKey::PatchResource, args);
    }
    let tree = include_tree(&state.schema, &api.model, &params, &api.includes)?;
    let mut conn = state.pool.acquire().await?;
    let self_url = api.url(&UrlFor::resource(&id));
    let document = resource_document(&state, &ids, &mut conn, &api.model, updated, &tree, &params, self_url).await?;
    respond(&api, ProcessorKey::PatchResource, args, document.into())
}

pub async fn delete_resource(
    State(state): State<ApiState>,
    _enabled: MethodEnabled,
    _accept: AcceptsJsonApi,
    Path(resource_id): Path<String>,
) -> Result<Response, ApiError> {
    let api = state.api.clone();
    let mut args = ProcessorArgs {
        resource_id: Some(resource_id),
        ..Default::default()
    };
    api.preprocessors.run(ProcessorKey::DeleteResource, &mut args)?;
    let id = args.resource_id.clone().unwrap_or_default();
    let ids = state.identities()?;

    let mut tx = state.pool.begin().await?;
    if let Err(e) = delete_row(&state, &ids, &mut tx, &id).await {
        return Err(rollback(tx, e).await);
    }
    tx.commit().await?;
    tracing::debug!(collection = %api.collection_name, id = %id, "deleted resource");
    respond_no_content(&api, ProcessorKey::DeleteResource, args)
}

/// Attribute values coerced for their columns, with to-one linkage turned into foreign keys.
async fn column_values<'m>(
    state: &ApiState,
    ids: &Identities,
    conn: &mut PgConnection,
    model: &'m ResolvedModel,
    resource: &NewResource,
) -> Result<Vec<(&'m ColumnInfo, SqlValue)>, ApiError> {
    let mut values = Vec::new();
    for (name, value) in &resource.attributes {
        let column = model
            .column(name)
            .ok_or_else(|| ApiError::BadRequest(format!("no column {} on {}", name, model.name)))?;
        values.push((column, coerce_value(column, value.clone())?));
    }
    for (name, linkage) in &resource.relationships {
        let (Some(rel), LinkageRequest::ToOne(related_id)) = (model.relation(name), linkage) else {
            continue;
        };
        let RelationKind::ToOne { foreign_key } = &rel.kind else {
            continue;
        };
        let column = model
            .column(foreign_key)
            .ok_or_else(|| ApiError::BadRequest(format!("no column {} on {}", foreign_key, model.name)))?;
        let key = match related_id {
            Some(related_id) => {
                let target = sql::related(&state.schema, rel)?;
                CrudService::resolve_keys(
                    &mut *conn,
                    target,
                    ids.type_name(target),
                    ids.key(target),
                    std::slice::from_ref(related_id),
                )
                .await?
                .into_iter()
                .next()
                .unwrap_or(Value::Null)
            }
            None => Value::Null,
        };
        values.push((column, SqlValue::Param(key)));
    }
    Ok(values)
}

async fn insert_resource(
    state: &ApiState,
    ids: &Identities,
    conn: &mut PgConnection,
    primary_key: &str,
    resource: NewResource,
) -> Result<RowMap, ApiError> {
    let model = &state.api.model;
    let mut values = column_values(state, ids, &mut *conn, model, &resource).await?;
    if let Some(id) = &resource.id {
        let column = model
            .column(primary_key)
            .ok_or_else(|| ApiError::BadRequest(format!("no column {} on {}", primary_key, model.name)))?;
        values.push((column, coerce_value(column, Value::String(id.clone()))?));
    }
    let row = CrudService::fetch_optional(&mut *conn, &sql::insert(model, &values))
        .await?
        .ok_or(ApiError::Db(sqlx::Error::RowNotFound))?;
    let owner = row.get(&model.primary_key).cloned().unwrap_or(Value::Null);
    let writer = RelationWriter {
        schema: &state.schema,
        ids,
        model,
        owner: &owner,
    };
    for (name, linkage) in &resource.relationships {
        if let (Some(rel), LinkageRequest::ToMany(related_ids)) = (model.relation(name), linkage) {
            writer.add(&mut *conn, rel, related_ids).await?;
        }
    }
    Ok(row)
}

async fn update_resource(
    state: &ApiState,
    ids: &Identities,
    conn: &mut PgConnection,
    id: &str,
    resource: NewResource,
) -> Result<RowMap, ApiError> {
    let api = &state.api;
    let model = &api.model;
    let current = CrudService::find_by_key(&mut *conn, model, &api.primary_key, id)
        .await?
        .ok_or_else(|| ApiError::not_found(&api.collection_name, id))?;
    let owner = current.get(&model.primary_key).cloned().unwrap_or(Value::Null);
    let values = column_values(state, ids, &mut *conn, model, &resource).await?;
    let writer = RelationWriter {
        schema: &state.schema,
        ids,
        model,
        owner: &owner,
    };
    for (name, linkage) in &resource.relationships {
        if let (Some(rel), LinkageRequest::ToMany(related_ids)) = (model.relation(name), linkage) {
            writer.replace(&mut *conn, rel, related_ids).await?;
        }
    }
    let q = sql::update(model, model.primary_key_column(), &owner, &values);
    CrudService::fetch_optional(&mut *conn, &q)
        .await?
        .ok_or_else(|| ApiError::not_found(&api.collection_name, id))
}

/// To-many links are cleared first, the way an ORM would null out children.
async fn delete_row(state: &ApiState, ids: &Identities, conn: &mut PgConnection, id: &str) -> Result<(), ApiError> {
    let api = &state.api;
    let model = &api.model;
    let current = CrudService::find_by_key(&mut *conn, model, &api.primary_key, id)
        .await?
        .ok_or_else(|| ApiError::not_found(&api.collection_name, id))?;
    let owner = current.get(&model.primary_key).cloned().unwrap_or(Value::Null);
    let writer = RelationWriter {
        schema: &state.schema,
        ids,
        model,
        owner: &owner,
    };
    for rel in model.relationships.iter().filter(|r| r.is_to_many()) {
        writer.replace(&mut *conn, rel, &[]).await?;
    }
    let q = sql::delete(model, model.primary_key_column(), &owner);
    CrudService::fetch_optional(&mut *conn, &q)
        .await?
        .ok_or_else(|| ApiError::not_found(&api.collection_name, id))?;
    Ok(())
}
