//! Shared state handed to every endpoint of one API.

use crate::config::{ResolvedModel, Schema};
use crate::error::ApiError;
use crate::processors::Processors;
use crate::registry::{build_url, ApiRegistry, Identities, SharedRegistry, UrlFor};
use crate::serialization::{Deserializer, Serializer};
use axum::http::Method;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::{Arc, RwLockReadGuard};

/// Everything fixed when an API is created.
pub struct ApiContext {
    pub model: Arc<ResolvedModel>,
    pub collection_name: String,
    pub url_prefix: String,
    /// Column used as the resource `id`.
    pub primary_key: String,
    pub methods: HashSet<Method>,
    /// 0 disables pagination.
    pub page_size: u64,
    pub max_page_size: u64,
    pub include_links: bool,
    /// Include paths applied when the client sends no `include`.
    pub includes: Vec<String>,
    pub allow_to_many_replacement: bool,
    pub allow_delete_from_to_many_relationships: bool,
    /// Global processors already prepended.
    pub preprocessors: Processors,
    pub postprocessors: Processors,
    pub serializer: Arc<dyn Serializer>,
    pub deserializer: Arc<dyn Deserializer>,
}

impl ApiContext {
    pub fn require(&self, method: &Method) -> Result<(), ApiError> {
        if self.methods.contains(method) {
            Ok(())
        } else {
            Err(ApiError::MethodNotAllowed)
        }
    }

    pub fn url(&self, parts: &UrlFor<'_>) -> String {
        build_url(&self.url_prefix, &self.collection_name, parts)
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub pool: PgPool,
    pub schema: Arc<Schema>,
    /// Shared with every other API of the same manager.
    pub registry: SharedRegistry,
    pub api: Arc<ApiContext>,
}

impl ApiState {
    /// Never hold the guard across an await.
    pub fn registry(&self) -> Result<RwLockReadGuard<'_, ApiRegistry>, ApiError> {
        self.registry
            .read()
            .map_err(|_| ApiError::IllegalArgument("api registry lock poisoned".into()))
    }

    pub fn identities(&self) -> Result<Identities, ApiError> {
        Ok(self.registry()?.identities(&self.schema))
    }
}
