//! Pieces shared by the resource and relationship handlers.

use crate::config::{RelationInfo, RelationKind, ResolvedModel, Schema};
use crate::error::ApiError;
use crate::processors::{ProcessorArgs, ProcessorKey};
use crate::query::{Filter, FetchParams, IncludeTree, Pagination, SortKey};
use crate::registry::Identities;
use crate::response::{jsonapi_response, no_content, Document};
use crate::serialization::{DeserializeContext, Deserializer, Instance, NewResource};
use crate::service::{identifiers, load_included, CrudService, Renderer, RowMap};
use crate::sql::{select_by_column_in, select_collection, CollectionQuery, Scope};
use crate::state::{ApiContext, ApiState};
use axum::http::{header, StatusCode};
use axum::response::Response;
use serde_json::Value;
use sqlx::PgConnection;
use std::sync::Arc;

/// Include paths from the request, or `defaults` when the client sent none.
pub fn include_tree(
    schema: &Schema,
    model: &ResolvedModel,
    params: &FetchParams,
    defaults: &[String],
) -> Result<IncludeTree, ApiError> {
    let tree = match &params.include {
        Some(paths) => IncludeTree::from_paths(paths),
        None => IncludeTree::from_paths(defaults),
    };
    tree.validate(model, schema)?;
    Ok(tree)
}

/// A document plus the `Link` header value for paginated collections.
pub struct Fetched {
    pub document: Document,
    pub link_header: Option<String>,
}

impl From<Document> for Fetched {
    fn from(document: Document) -> Self {
        Fetched {
            document,
            link_header: None,
        }
    }
}

/// Document whose primary data is the single resource in `row`.
pub async fn resource_document(
    state: &ApiState,
    ids: &Identities,
    conn: &mut PgConnection,
    model: &Arc<ResolvedModel>,
    row: RowMap,
    tree: &IncludeTree,
    params: &FetchParams,
    self_url: String,
) -> Result<Document, ApiError> {
    let mut instances = vec![Instance::new(row)];
    CrudService::load_linkage(&mut *conn, &state.schema, ids, model, &mut instances).await?;
    let exclude = identifiers(ids.type_name(model), ids.key(model), &instances);
    let included = load_included(conn, &state.schema, ids, model, &instances, tree, &exclude).await?;

    let registry = state.registry()?;
    let renderer = Renderer::new(&registry, state.api.include_links, &params.fields);
    let data = renderer.resource(model, &instances[0])?;
    let mut document = Document::new(data).with_link("self", Some(self_url));
    if !tree.is_empty() {
        document = document.with_included(renderer.included(&included)?);
    }
    Ok(document)
}

/// What a collection fetch selects from.
pub struct CollectionSource<'a> {
    pub model: &'a Arc<ResolvedModel>,
    pub scope: Option<Scope>,
    pub filters: &'a [Filter],
    pub sort: &'a [SortKey],
    /// Request path without query, base of every link.
    pub base: String,
}

/// Filtered, sorted and paginated collection; with `filter[single]` exactly one resource.
pub async fn collection_document(
    state: &ApiState,
    ids: &Identities,
    conn: &mut PgConnection,
    source: CollectionSource<'_>,
    tree: &IncludeTree,
    params: &FetchParams,
) -> Result<Fetched, ApiError> {
    let api = &state.api;
    let model = source.model;
    let page = if params.single {
        None
    } else {
        Pagination::resolve(params.page, api.page_size, api.max_page_size)?
    };
    let cq = CollectionQuery {
        model,
        scope: source.scope,
        filters: source.filters,
        sort: source.sort,
        limit: if params.single { Some(2) } else { page.map(|p| p.limit()) },
        offset: page.map(|p| p.offset()),
    };
    let (q, count) = select_collection(&state.schema, &cq)?;
    let total = if params.single {
        None
    } else {
        Some(CrudService::fetch_total(&mut *conn, &count).await?)
    };
    let mut instances: Vec<Instance> = CrudService::fetch_all(&mut *conn, &q)
        .await?
        .into_iter()
        .map(Instance::new)
        .collect();
    if params.single {
        match instances.len() {
            0 => return Err(ApiError::NotFound("No result found".into())),
            1 => {}
            _ => return Err(ApiError::BadRequest("Multiple results found".into())),
        }
    }
    CrudService::load_linkage(&mut *conn, &state.schema, ids, model, &mut instances).await?;
    let exclude = identifiers(ids.type_name(model), ids.key(model), &instances);
    let included = load_included(conn, &state.schema, ids, model, &instances, tree, &exclude).await?;

    let registry = state.registry()?;
    let renderer = Renderer::new(&registry, api.include_links, &params.fields);
    let data = if params.single {
        renderer.resource(model, &instances[0])?
    } else {
        Value::Array(renderer.resources(model, &instances)?)
    };

    let mut document = Document::new(data).with_link("self", Some(source.base.clone()));
    if !tree.is_empty() {
        document = document.with_included(renderer.included(&included)?);
    }
    let mut link_header = None;
    if let Some(total) = total {
        document.meta.insert("total".into(), Value::from(total));
        if let Some(page) = page {
            let links = page.links(&source.base, &params.link_params(), total);
            link_header = Some(links.header_value());
            document = document
                .with_link("first", Some(links.first))
                .with_link("last", Some(links.last))
                .with_link("prev", links.prev)
                .with_link("next", links.next);
        }
    }
    Ok(Fetched { document, link_header })
}

/// A relationship of one resource of the API's model.
pub struct RelatedSource<'a> {
    pub id: &'a str,
    pub rel: &'a RelationInfo,
    pub target: &'a Arc<ResolvedModel>,
    pub filters: &'a [Filter],
    pub sort: &'a [SortKey],
    pub base: String,
}

/// The related resource (or null) for to-one; a filtered, sorted and paginated collection for to-many.
pub async fn fetch_related(
    state: &ApiState,
    ids: &Identities,
    source: RelatedSource<'_>,
    tree: &IncludeTree,
    params: &FetchParams,
) -> Result<Fetched, ApiError> {
    let api = &state.api;
    let model = &api.model;
    let target = source.target;
    let mut conn = state.pool.acquire().await?;
    let parent = CrudService::find_by_key(&mut conn, model, &api.primary_key, source.id)
        .await?
        .ok_or_else(|| ApiError::not_found(&api.collection_name, source.id))?;
    let owner = parent.get(&model.primary_key).cloned().unwrap_or(Value::Null);

    match (&source.rel.kind, to_many_scope(model, source.rel, owner)) {
        (_, Some(scope)) => {
            let collection = CollectionSource {
                model: target,
                scope: Some(scope),
                filters: source.filters,
                sort: source.sort,
                base: source.base,
            };
            collection_document(state, ids, &mut conn, collection, tree, params).await
        }
        (RelationKind::ToOne { foreign_key }, None) => {
            let fk = parent.get(foreign_key).cloned().unwrap_or(Value::Null);
            let row = if fk.is_null() {
                None
            } else {
                let q = select_by_column_in(target, target.primary_key_column(), &[fk]);
                CrudService::fetch_optional(&mut *conn, &q).await?
            };
            Ok(match row {
                Some(row) => resource_document(state, ids, &mut conn, target, row, tree, params, source.base)
                    .await?
                    .into(),
                None => Document::new(Value::Null).with_link("self", Some(source.base)).into(),
            })
        }
        (_, None) => Err(ApiError::NotFound(format!("No such relation: {}", source.rel.name))),
    }
}

/// Run postprocessors on the document and answer 200.
pub fn respond(api: &ApiContext, key: ProcessorKey, mut args: ProcessorArgs, fetched: Fetched) -> Result<Response, ApiError> {
    args.result = Some(fetched.document.to_value());
    api.postprocessors.run(key, &mut args)?;
    let headers = fetched
        .link_header
        .map(|v| vec![(header::LINK, v)])
        .unwrap_or_default();
    Ok(jsonapi_response(StatusCode::OK, args.result.unwrap_or(Value::Null), headers))
}

/// Run postprocessors for a write that answers without a body.
pub fn respond_no_content(api: &ApiContext, key: ProcessorKey, mut args: ProcessorArgs) -> Result<Response, ApiError> {
    api.postprocessors.run(key, &mut args)?;
    Ok(no_content())
}

/// Deserialize with the registry held only for the duration of the call.
pub fn deserialize(state: &ApiState, deserializer: &dyn Deserializer, document: &Value) -> Result<NewResource, ApiError> {
    let registry = state.registry()?;
    let ctx = DeserializeContext {
        schema: &state.schema,
        registry: &registry,
    };
    Ok(deserializer.deserialize(document, &ctx)?)
}

/// 404 for an unknown relationship name.
pub fn relation<'m>(model: &'m ResolvedModel, name: &str) -> Result<&'m RelationInfo, ApiError> {
    model
        .relation(name)
        .ok_or_else(|| ApiError::NotFound(format!("No such relation: {}", name)))
}

/// Rows of a to-many relationship owned by the key `owner`; `None` for to-one.
pub fn to_many_scope(model: &ResolvedModel, rel: &RelationInfo, owner: Value) -> Option<Scope> {
    match &rel.kind {
        RelationKind::ToOne { .. } => None,
        RelationKind::ToMany { foreign_key } => Some(Scope::Column {
            column: foreign_key.clone(),
            value: owner,
        }),
        RelationKind::ManyToMany {
            table,
            local_column,
            remote_column,
        } => Some(Scope::Secondary {
            table: table.clone(),
            local_column: local_column.clone(),
            remote_column: remote_column.clone(),
            owner_key: model.primary_key_column().clone(),
            value: owner,
        }),
    }
}

/// Reduce rendered resources to resource identifier objects.
pub fn into_linkage(data: Value) -> Value {
    match data {
        Value::Array(items) => Value::Array(items.into_iter().map(into_linkage).collect()),
        Value::Object(mut obj) => {
            let mut linkage = serde_json::Map::new();
            for key in ["type", "id"] {
                if let Some(v) = obj.remove(key) {
                    linkage.insert(key.to_string(), v);
                }
            }
            Value::Object(linkage)
        }
        other => other,
    }
}
