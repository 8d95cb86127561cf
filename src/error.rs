//! Typed errors and HTTP mapping to JSON API error documents.

use crate::response::JSONAPI_MIME;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: model {model} column {column}")]
    InvalidPrimaryKey { model: String, column: String },
    #[error("duplicate model: {0}")]
    DuplicateModel(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Raised when a row cannot be turned into a resource object.
#[derive(Error, Debug, Clone)]
#[error("Failed to serialize object: {detail}")]
pub struct SerializationError {
    pub detail: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
}

impl SerializationError {
    pub fn new(detail: impl Into<String>) -> Self {
        SerializationError {
            detail: detail.into(),
            resource_type: None,
            resource_id: None,
        }
    }

    pub fn for_resource(mut self, resource_type: &str, resource_id: &str) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self.resource_id = Some(resource_id.to_string());
        self
    }
}

/// Raised when a request document cannot be turned into column values and linkage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeserializationError {
    #[error("Failed to deserialize object: missing \"data\" element")]
    MissingData,
    #[error("Failed to deserialize object: missing \"type\" element")]
    MissingType,
    #[error("Failed to deserialize object: missing \"id\" element")]
    MissingId,
    #[error("Failed to deserialize object: missing \"{element}\" element in linkage object for relationship \"{relation}\"")]
    MissingLinkageElement { element: &'static str, relation: String },
    #[error("Failed to deserialize object: Server does not allow client-generated IDS")]
    ClientGeneratedIdNotAllowed,
    #[error("Failed to deserialize object: expected type \"{expected}\" but got type \"{given}\"")]
    ConflictingType { expected: String, given: String },
    #[error("Failed to deserialize object: expected type \"{expected}\" but got type \"{given}\" in linkage object for relationship \"{relation}\"")]
    ConflictingLinkageType {
        expected: String,
        given: String,
        relation: String,
    },
    #[error("Failed to deserialize object: expected id \"{expected}\" but got id \"{given}\"")]
    ConflictingId { expected: String, given: String },
    #[error("Failed to deserialize object: model has no attribute \"{0}\"")]
    UnknownAttribute(String),
    #[error("Failed to deserialize object: model has no relationship \"{0}\"")]
    UnknownRelationship(String),
    #[error("Failed to deserialize object: attribute \"{0}\" is read-only")]
    ReadOnlyAttribute(String),
    #[error("Failed to deserialize object: {0}")]
    Malformed(String),
}

impl DeserializationError {
    pub fn status(&self) -> StatusCode {
        match self {
            DeserializationError::ClientGeneratedIdNotAllowed => StatusCode::FORBIDDEN,
            DeserializationError::ConflictingType { .. }
            | DeserializationError::ConflictingLinkageType { .. }
            | DeserializationError::ConflictingId { .. } => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Raised by pre- and postprocessors to abort a request with a specific error.
#[derive(Error, Debug, Clone)]
#[error("processing error ({status}): {}", .detail.as_deref().unwrap_or(""))]
pub struct ProcessingError {
    pub status: StatusCode,
    pub id: Option<String>,
    pub code: Option<String>,
    pub title: Option<String>,
    pub detail: Option<String>,
    /// Serialized as the error object's `source` member.
    pub error_source: Option<Value>,
    pub meta: Option<Value>,
}

impl ProcessingError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        ProcessingError {
            status,
            id: None,
            code: None,
            title: None,
            detail: Some(detail.into()),
            error_source: None,
            meta: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// One entry of the top-level `errors` array.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ErrorObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ErrorObject {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        ErrorObject {
            status: status.as_u16().to_string(),
            detail: Some(detail.into()),
            ..Default::default()
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub errors: Vec<ErrorObject>,
}

/// A per-field validation failure; `field` becomes the error source pointer.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("{0}")]
    NotAcceptable(String),
    #[error("{0}")]
    UnsupportedMediaType(String),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    /// A resource pulled in through `include` failed to serialize; the server's fault.
    #[error(
        "Failed to serialize included resource of type {} and ID {}: {}",
        .0.resource_type.as_deref().unwrap_or("unknown"),
        .0.resource_id.as_deref().unwrap_or("unknown"),
        .0.detail
    )]
    IncludedSerialization(SerializationError),
    #[error(transparent)]
    Deserialization(#[from] DeserializationError),
    #[error(transparent)]
    Processing(#[from] ProcessingError),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

impl ApiError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        ApiError::NotFound(format!("No resource with ID {} and type {}", id, collection))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::IllegalArgument(_) | ApiError::Config(_) | ApiError::IncludedSerialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Validation(_) | ApiError::Serialization(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Deserialization(e) => e.status(),
            ApiError::Processing(e) => e.status,
            ApiError::Db(e) => db_error_status(e),
        }
    }

    pub fn error_objects(&self) -> Vec<ErrorObject> {
        let status = self.status();
        match self {
            ApiError::Validation(fields) => fields
                .iter()
                .map(|f| ErrorObject {
                    title: Some("Validation error".into()),
                    source: Some(serde_json::json!({
                        "pointer": format!("/data/attributes/{}", f.field)
                    })),
                    ..ErrorObject::new(status, &f.message)
                })
                .collect(),
            ApiError::Processing(e) => vec![ErrorObject {
                id: e.id.clone(),
                status: status.as_u16().to_string(),
                code: e.code.clone(),
                title: e.title.clone(),
                detail: e.detail.clone(),
                source: e.error_source.clone(),
                meta: e.meta.clone(),
            }],
            ApiError::Serialization(e) | ApiError::IncludedSerialization(e) => vec![ErrorObject {
                meta: e.resource_id.as_ref().map(|id| {
                    serde_json::json!({ "type": e.resource_type, "id": id })
                }),
                ..ErrorObject::new(status, self.to_string())
            }],
            ApiError::Db(e) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                vec![ErrorObject::new(status, format!("database error: {}", e))]
            }
            ApiError::Db(e) => vec![ErrorObject::new(status, db_error_detail(e))],
            other => vec![ErrorObject::new(status, other.to_string())],
        }
    }
}

/// Constraint and data errors are client mistakes; unique violations are conflicts.
fn db_error_status(e: &sqlx::Error) -> StatusCode {
    match e {
        sqlx::Error::RowNotFound => StatusCode::NOT_FOUND,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => StatusCode::CONFLICT,
            Some(code) if code.starts_with("22") || code.starts_with("23") || code.starts_with("42") => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn db_error_detail(e: &sqlx::Error) -> String {
    match e {
        sqlx::Error::Database(db) => db.message().to_string(),
        other => other.to_string(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            errors: self.error_objects(),
        };
        let mut response = (status, Json(body)).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(JSONAPI_MIME));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialization_statuses() {
        assert_eq!(DeserializationError::MissingData.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            DeserializationError::ClientGeneratedIdNotAllowed.status(),
            StatusCode::FORBIDDEN
        );
        let conflict = DeserializationError::ConflictingType {
            expected: "person".into(),
            given: "article".into(),
        };
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        assert_eq!(
            conflict.to_string(),
            "Failed to deserialize object: expected type \"person\" but got type \"article\""
        );
    }

    #[test]
    fn linkage_messages_name_the_relationship() {
        let e = DeserializationError::MissingLinkageElement {
            element: "data",
            relation: "articles".into(),
        };
        assert_eq!(
            e.to_string(),
            "Failed to deserialize object: missing \"data\" element in linkage object for relationship \"articles\""
        );
    }

    #[test]
    fn validation_errors_point_at_attributes() {
        let err = ApiError::Validation(vec![FieldError {
            field: "email".into(),
            message: "email must be a valid email".into(),
        }]);
        let objects = err.error_objects();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].status, "400");
        assert_eq!(
            objects[0].source,
            Some(serde_json::json!({"pointer": "/data/attributes/email"}))
        );
    }

    #[test]
    fn processing_error_keeps_status_and_title() {
        let err: ApiError = ProcessingError::new(StatusCode::UNAUTHORIZED, "nope")
            .with_title("Auth")
            .into();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        let obj = &err.error_objects()[0];
        assert_eq!(obj.title.as_deref(), Some("Auth"));
        assert_eq!(obj.detail.as_deref(), Some("nope"));
    }

    #[test]
    fn processing_error_source_reaches_error_object() {
        let mut e = ProcessingError::new(StatusCode::BAD_REQUEST, "bad name");
        e.error_source = Some(serde_json::json!({ "parameter": "name" }));
        let obj = &ApiError::from(e).error_objects()[0];
        assert_eq!(obj.source, Some(serde_json::json!({ "parameter": "name" })));
    }

    #[test]
    fn included_serialization_failures_are_server_errors() {
        let err = ApiError::IncludedSerialization(SerializationError::new("boom").for_resource("person", "1"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let detail = err.error_objects()[0].detail.clone().unwrap_or_default();
        assert_eq!(detail, "Failed to serialize included resource of type person and ID 1: boom");
        let primary = ApiError::Serialization(SerializationError::new("boom"));
        assert_eq!(primary.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn responses_use_jsonapi_content_type() {
        let response = ApiError::MethodNotAllowed.into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], JSONAPI_MIME);
    }
}
