//! `/{collection}/{id}/relationships/{relation}` endpoints.

use super::support::{fetch_related, include_tree, into_linkage, relation, respond, respond_no_content, RelatedSource};
use crate::config::RelationInfo;
use crate::error::ApiError;
use crate::extractors::{AcceptsJsonApi, JsonApiDocument, MethodEnabled, RelationshipWritesEnabled};
use crate::processors::{ProcessorArgs, ProcessorKey};
use crate::query::FetchParams;
use crate::registry::{Identities, UrlFor};
use crate::serialization::{parse_linkage_document, LinkageRequest};
use crate::service::{rollback, to_one_forbidden, CrudService, RelationWriter};
use crate::state::ApiState;
use axum::{
    extract::{Path, RawQuery, State},
    response::Response,
};
use serde_json::Value;
use sqlx::PgConnection;

/// Linkage of a relationship; to-many linkage honors filters, sort and pagination.
pub async fn get_relationship(
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
    api.preprocessors.run(ProcessorKey::GetRelationship, &mut args)?;
    let id = args.resource_id.clone().unwrap_or_default();
    let relation_name = args.relation_name.clone().unwrap_or_default();
    let rel = relation(&api.model, &relation_name)?;
    let target = state
        .schema
        .related_model(rel)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("No such relation: {}", relation_name)))?;
    let ids = state.identities()?;
    let tree = include_tree(&state.schema, &target, &params, &[])?;

    let source = RelatedSource {
        id: &id,
        rel,
        target: &target,
        filters: &args.filters,
        sort: &args.sort,
        base: api.url(&UrlFor::relationship(&id, &relation_name)),
    };
    let mut fetched = fetch_related(&state, &ids, source, &tree, &params).await?;
    let data = std::mem::take(&mut fetched.document.data);
    fetched.document.data = into_linkage(data);
    fetched.document = fetched
        .document
        .with_link("related", Some(api.url(&UrlFor::related(&id, &relation_name))));
    respond(&api, ProcessorKey::GetRelationship, args, fetched)
}

/// Which relationship write a request asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Write {
    Add,
    Replace,
    Remove,
}

impl Write {
    fn method_key(self) -> ProcessorKey {
        match self {
            Write::Add => ProcessorKey::PostRelationship,
            Write::Replace => ProcessorKey::PatchRelationship,
            Write::Remove => ProcessorKey::DeleteRelationship,
        }
    }
}

pub async fn post_relationship(
    state: State<ApiState>,
    _writes: RelationshipWritesEnabled,
    accept: AcceptsJsonApi,
    path: Path<(String, String)>,
    body: JsonApiDocument,
) -> Result<Response, ApiError> {
    write_relationship(state, accept, path, body, Write::Add).await
}

pub async fn patch_relationship(
    state: State<ApiState>,
    _writes: RelationshipWritesEnabled,
    accept: AcceptsJsonApi,
    path: Path<(String, String)>,
    body: JsonApiDocument,
) -> Result<Response, ApiError> {
    write_relationship(state, accept, path, body, Write::Replace).await
}

pub async fn delete_relationship(
    state: State<ApiState>,
    _writes: RelationshipWritesEnabled,
    accept: AcceptsJsonApi,
    path: Path<(String, String)>,
    body: JsonApiDocument,
) -> Result<Response, ApiError> {
    write_relationship(state, accept, path, body, Write::Remove).await
}

/// Shared body of the three relationship writes.
async fn write_relationship(
    State(state): State<ApiState>,
    _accept: AcceptsJsonApi,
    Path((resource_id, relation_name)): Path<(String, String)>,
    JsonApiDocument(document): JsonApiDocument,
    write: Write,
) -> Result<Response, ApiError> {
    let api = state.api.clone();
    let key = write.method_key();
    let mut args = ProcessorArgs {
        resource_id: Some(resource_id),
        relation_name: Some(relation_name),
        data: Some(document),
        ..Default::default()
    };
    api.preprocessors.run(key, &mut args)?;
    let id = args.resource_id.clone().unwrap_or_default();
    let relation_name = args.relation_name.clone().unwrap_or_default();
    let document = args.data.take().unwrap_or(Value::Null);

    let rel = relation(&api.model, &relation_name)?;
    match (write, rel.is_to_many()) {
        (Write::Add | Write::Remove, false) => return Err(to_one_forbidden(rel)),
        (Write::Replace, true) if !api.allow_to_many_replacement => {
            return Err(ApiError::Forbidden("Not allowed to replace a to-many relationship".into()))
        }
        (Write::Remove, true) if !api.allow_delete_from_to_many_relationships => {
            return Err(ApiError::Forbidden(
                "Not allowed to delete from a to-many relationship".into(),
            ))
        }
        _ => {}
    }
    let ids = state.identities()?;
    let target = state
        .schema
        .related_model(rel)
        .ok_or_else(|| ApiError::NotFound(format!("No such relation: {}", relation_name)))?;
    let linkage = parse_linkage_document(&document, &relation_name, ids.type_name(target), rel.is_to_many())?;

    let mut tx = state.pool.begin().await?;
    if let Err(e) = apply(&state, &ids, &mut tx, &id, rel, write, &linkage).await {
        return Err(rollback(tx, e).await);
    }
    tx.commit().await?;
    tracing::debug!(collection = %api.collection_name, id = %id, relation = %relation_name, ?write, "updated relationship");
    respond_no_content(&api, key, args)
}

async fn apply(
    state: &ApiState,
    ids: &Identities,
    conn: &mut PgConnection,
    id: &str,
    rel: &RelationInfo,
    write: Write,
    linkage: &LinkageRequest,
) -> Result<(), ApiError> {
    let api = &state.api;
    let model = &api.model;
    let parent = CrudService::find_by_key(&mut *conn, model, &api.primary_key, id)
        .await?
        .ok_or_else(|| ApiError::not_found(&api.collection_name, id))?;
    let owner = parent.get(&model.primary_key).cloned().unwrap_or(Value::Null);
    let writer = RelationWriter {
        schema: &state.schema,
        ids,
        model,
        owner: &owner,
    };
    match (write, linkage) {
        (Write::Replace, LinkageRequest::ToOne(related_id)) => {
            writer.set_to_one(conn, rel, related_id.as_deref()).await
        }
        (Write::Add, LinkageRequest::ToMany(related_ids)) => writer.add(conn, rel, related_ids).await,
        (Write::Replace, LinkageRequest::ToMany(related_ids)) => writer.replace(conn, rel, related_ids).await,
        (Write::Remove, LinkageRequest::ToMany(related_ids)) => writer.remove(conn, rel, related_ids).await,
        (_, LinkageRequest::ToOne(_)) => Err(to_one_forbidden(rel)),
    }
}
