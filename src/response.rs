//! JSON API document envelope and response helpers.

use axum::{
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};

pub const JSONAPI_MIME: &str = "application/vnd.api+json";
pub const JSONAPI_VERSION: &str = "1.0";

/// Top-level document for successful responses.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Document {
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub included: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub links: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
    pub jsonapi: Value,
}

impl Document {
    pub fn new(data: Value) -> Self {
        Document {
            data,
            included: None,
            links: Map::new(),
            meta: Map::new(),
            jsonapi: serde_json::json!({ "version": JSONAPI_VERSION }),
        }
    }

    pub fn with_included(mut self, included: Vec<Value>) -> Self {
        self.included = Some(included);
        self
    }

    pub fn with_link(mut self, name: &str, url: Option<String>) -> Self {
        self.links
            .insert(name.to_string(), url.map(Value::String).unwrap_or(Value::Null));
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// JSON body with the JSON API content type and extra headers.
pub fn jsonapi_response(status: StatusCode, body: Value, headers: Vec<(HeaderName, String)>) -> Response {
    let mut response = (status, Json(body)).into_response();
    let h = response.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static(JSONAPI_MIME));
    for (name, value) in headers {
        if let Ok(v) = HeaderValue::from_str(&value) {
            h.append(name, v);
        }
    }
    response
}

pub fn success_ok(body: Value) -> Response {
    jsonapi_response(StatusCode::OK, body, Vec::new())
}

/// 201 with `Location` pointing at the new resource.
pub fn success_created(body: Value, location: String) -> Response {
    jsonapi_response(StatusCode::CREATED, body, vec![(header::LOCATION, location)])
}

pub fn no_content() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(JSONAPI_MIME));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_omits_empty_sections() {
        let doc = Document::new(Value::Null).to_value();
        assert_eq!(doc, serde_json::json!({"data": null, "jsonapi": {"version": "1.0"}}));
    }

    #[test]
    fn null_links_are_kept() {
        let doc = Document::new(serde_json::json!([]))
            .with_link("prev", None)
            .with_link("first", Some("/api/person?page[number]=1".into()))
            .to_value();
        assert_eq!(doc["links"]["prev"], Value::Null);
        assert_eq!(doc["links"]["first"], "/api/person?page[number]=1");
    }

    #[test]
    fn created_sets_location() {
        let r = success_created(serde_json::json!({}), "/api/person/1".into());
        assert_eq!(r.status(), StatusCode::CREATED);
        assert_eq!(r.headers()[header::LOCATION], "/api/person/1");
        assert_eq!(r.headers()[header::CONTENT_TYPE], JSONAPI_MIME);
    }
}
