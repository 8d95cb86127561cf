//! `ApiManager`: creates JSON API endpoints for models and merges them into an application router.

use crate::config::{ManagerSettings, Schema};
use crate::error::ApiError;
use crate::processors::Processors;
use crate::registry::{ApiInfo, ApiRegistry, SharedRegistry, UrlFor};
use crate::routes::api_routes;
use crate::serialization::{DefaultDeserializer, DefaultSerializer, Deserializer, Serializer};
use crate::state::{ApiContext, ApiState};
use axum::http::Method;
use axum::Router;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// Per-API options. `None` fields fall back to the manager's settings or the model.
#[derive(Clone)]
pub struct ApiOptions {
    /// Enabled methods; GET only by default.
    pub methods: Vec<Method>,
    pub url_prefix: Option<String>,
    /// Defaults to the table name.
    pub collection_name: Option<String>,
    pub only: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    /// Extra columns serialized as attributes, e.g. foreign keys.
    pub additional_attributes: Option<Vec<String>>,
    pub page_size: Option<u64>,
    pub max_page_size: Option<u64>,
    pub preprocessors: Processors,
    pub postprocessors: Processors,
    /// Column used as the resource id; must be a primary key or unique.
    pub primary_key: Option<String>,
    pub serializer: Option<Arc<dyn Serializer>>,
    pub deserializer: Option<Arc<dyn Deserializer>>,
    /// Include paths used when a request has no `include` parameter.
    pub includes: Vec<String>,
    pub allow_to_many_replacement: bool,
    pub allow_delete_from_to_many_relationships: bool,
    pub allow_client_generated_ids: bool,
}

impl Default for ApiOptions {
    fn default() -> Self {
        ApiOptions {
            methods: vec![Method::GET],
            url_prefix: None,
            collection_name: None,
            only: None,
            exclude: None,
            additional_attributes: None,
            page_size: None,
            max_page_size: None,
            preprocessors: Processors::default(),
            postprocessors: Processors::default(),
            primary_key: None,
            serializer: None,
            deserializer: None,
            includes: Vec::new(),
            allow_to_many_replacement: false,
            allow_delete_from_to_many_relationships: false,
            allow_client_generated_ids: false,
        }
    }
}

impl ApiOptions {
    pub fn with_methods(methods: &[Method]) -> Self {
        ApiOptions {
            methods: methods.to_vec(),
            ..Default::default()
        }
    }
}

/// Named router holding the endpoints of one API.
pub struct Blueprint {
    pub name: String,
    pub url_prefix: String,
    pub router: Router,
}

pub struct ApiManager {
    pool: PgPool,
    schema: Arc<Schema>,
    settings: ManagerSettings,
    registry: SharedRegistry,
    /// Run before the processors of every API created afterwards.
    pub preprocessors: Processors,
    pub postprocessors: Processors,
    blueprints: Vec<Blueprint>,
    /// (url prefix, collection name) pairs already taken.
    endpoints: HashSet<(String, String)>,
}

impl ApiManager {
    pub fn new(pool: PgPool, schema: Schema) -> Self {
        Self::with_settings(pool, schema, ManagerSettings::default())
    }

    pub fn with_settings(pool: PgPool, schema: Schema, settings: ManagerSettings) -> Self {
        ApiManager {
            pool,
            schema: Arc::new(schema),
            settings,
            registry: Arc::new(RwLock::new(ApiRegistry::default())),
            preprocessors: Processors::default(),
            postprocessors: Processors::default(),
            blueprints: Vec::new(),
            endpoints: HashSet::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Build the router for `model` without registering it with an application.
    pub fn create_api_blueprint(&mut self, name: &str, model: &str, options: ApiOptions) -> Result<Blueprint, ApiError> {
        let model = self
            .schema
            .model(model)
            .cloned()
            .ok_or_else(|| ApiError::IllegalArgument(format!("unknown model {}", model)))?;
        let collection_name = options
            .collection_name
            .clone()
            .unwrap_or_else(|| model.table_name.clone());
        if collection_name.is_empty() {
            return Err(ApiError::IllegalArgument("collection_name must not be empty".into()));
        }
        let url_prefix = normalize_prefix(options.url_prefix.as_deref().unwrap_or(&self.settings.url_prefix));
        let endpoint = (url_prefix.clone(), collection_name.clone());
        if self.endpoints.contains(&endpoint) {
            return Err(ApiError::IllegalArgument(format!(
                "an API for collection {} already exists under {:?}",
                collection_name, url_prefix
            )));
        }

        let primary_key = options
            .primary_key
            .clone()
            .unwrap_or_else(|| model.primary_key.clone());
        match model.column(&primary_key) {
            Some(c) if c.primary_key || c.unique => {}
            _ => {
                return Err(ApiError::IllegalArgument(format!(
                    "Column `{}` is not a primary key",
                    primary_key
                )))
            }
        }

        let default_serializer = DefaultSerializer::new(
            model.clone(),
            &collection_name,
            &primary_key,
            options.only.as_deref(),
            options.exclude.as_deref(),
            options.additional_attributes.as_deref(),
        )?;
        let serializer = options
            .serializer
            .clone()
            .unwrap_or_else(|| Arc::new(default_serializer));
        let deserializer = options.deserializer.clone().unwrap_or_else(|| {
            Arc::new(DefaultDeserializer::new(
                model.clone(),
                &collection_name,
                options.allow_client_generated_ids,
            ))
        });

        let methods: HashSet<Method> = options.methods.iter().cloned().collect();
        let context = ApiContext {
            model: model.clone(),
            collection_name: collection_name.clone(),
            url_prefix: url_prefix.clone(),
            primary_key: primary_key.clone(),
            page_size: options.page_size.unwrap_or(self.settings.default_page_size),
            max_page_size: options.max_page_size.unwrap_or(self.settings.default_max_page_size),
            include_links: self.settings.include_links,
            includes: options.includes.clone(),
            allow_to_many_replacement: options.allow_to_many_replacement,
            allow_delete_from_to_many_relationships: options.allow_delete_from_to_many_relationships,
            preprocessors: options.preprocessors.with_global(&self.preprocessors),
            postprocessors: options.postprocessors.with_global(&self.postprocessors),
            serializer: serializer.clone(),
            deserializer,
            methods,
        };

        self.registry
            .write()
            .map_err(|_| ApiError::IllegalArgument("api registry lock poisoned".into()))?
            .insert(
                &model.name,
                ApiInfo {
                    collection_name: collection_name.clone(),
                    blueprint_name: name.to_string(),
                    url_prefix: url_prefix.clone(),
                    primary_key,
                    serializer,
                },
            );
        self.endpoints.insert(endpoint);

        let mut methods: Vec<&str> = options.methods.iter().map(Method::as_str).collect();
        methods.sort_unstable();
        tracing::info!(
            blueprint = %name,
            model = %model.name,
            collection = %collection_name,
            prefix = %url_prefix,
            methods = ?methods,
            "created API"
        );

        let state = ApiState {
            pool: self.pool.clone(),
            schema: self.schema.clone(),
            registry: self.registry.clone(),
            api: Arc::new(context),
        };
        Ok(Blueprint {
            name: name.to_string(),
            url_prefix,
            router: api_routes(state, self.settings.body_limit_bytes),
        })
    }

    /// Create an API under a generated blueprint name; it is mounted by `init_app`.
    pub fn create_api(&mut self, model: &str, options: ApiOptions) -> Result<(), ApiError> {
        let name = format!("{}{}", model, uuid::Uuid::new_v4().simple());
        let blueprint = self.create_api_blueprint(&name, model, options)?;
        self.blueprints.push(blueprint);
        Ok(())
    }

    /// Merge every API created with `create_api` into `app`.
    pub fn init_app(&mut self, app: Router) -> Router {
        self.blueprints
            .drain(..)
            .fold(app, |app, blueprint| app.merge(blueprint.router))
    }

    fn read_registry<T>(&self, f: impl FnOnce(&ApiRegistry) -> Option<T>) -> Option<T> {
        self.registry.read().ok().and_then(|r| f(&r))
    }

    pub fn collection_name(&self, model: &str) -> Option<String> {
        self.read_registry(|r| r.collection_name(model).map(String::from))
    }

    pub fn serializer_for(&self, model: &str) -> Option<Arc<dyn Serializer>> {
        self.read_registry(|r| r.get(model).map(|i| i.serializer.clone()))
    }

    pub fn primary_key_for(&self, model: &str) -> Option<String> {
        self.read_registry(|r| r.primary_key_for(model).map(String::from))
    }

    pub fn url_prefix_for(&self, model: &str) -> Option<String> {
        self.read_registry(|r| r.get(model).map(|i| i.url_prefix.clone()))
    }

    pub fn blueprint_name_for(&self, model: &str) -> Option<String> {
        self.read_registry(|r| r.get(model).map(|i| i.blueprint_name.clone()))
    }

    pub fn url_for(&self, model: &str, parts: &UrlFor<'_>) -> Option<String> {
        self.read_registry(|r| r.url_for(model, parts))
    }
}

/// Leading slash, no trailing slash; "" and "/" mean no prefix.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_are_normalized() {
        assert_eq!(normalize_prefix("/api"), "/api");
        assert_eq!(normalize_prefix("api/v1/"), "/api/v1");
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix(""), "");
    }
}
