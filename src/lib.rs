//! restless: JSON API endpoints for relational tables, generated from model config.
//!
//! Resolve a [`FullConfig`] into a [`Schema`], hand it to an [`ApiManager`] with a
//! `PgPool`, create APIs for the models you want exposed and merge them into an axum router.

pub mod coerce;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod manager;
pub mod migration;
pub mod processors;
pub mod query;
pub mod registry;
pub mod response;
pub mod routes;
pub mod serialization;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{load_from_path, parse_config, resolve, FullConfig, ManagerSettings, ResolvedModel, Schema};
pub use error::{ApiError, ConfigError, DeserializationError, ProcessingError, SerializationError};
pub use manager::{ApiManager, ApiOptions, Blueprint};
pub use migration::apply_migrations;
pub use processors::{Processor, ProcessorArgs, ProcessorKey, Processors};
pub use registry::UrlFor;
pub use response::JSONAPI_MIME;
pub use serialization::{DefaultDeserializer, DefaultSerializer, Deserializer, Serializer};
pub use store::ensure_database_exists;
