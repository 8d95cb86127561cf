//! JSON API content negotiation.

use crate::error::ApiError;
use crate::response::JSONAPI_MIME;
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap},
};
use serde_json::Value;

/// Request body sent as `application/vnd.api+json` without media type parameters.
#[derive(Clone, Debug)]
pub struct JsonApiDocument(pub Value);

#[async_trait]
impl<S> FromRequest<S> for JsonApiDocument
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        check_content_type(req.headers())?;
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(ApiError::BadRequest("Unable to decode data: empty request body".into()));
        }
        let value = serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::BadRequest(format!("Unable to decode data: {}", e)))?;
        Ok(JsonApiDocument(value))
    }
}

fn check_content_type(headers: &HeaderMap) -> Result<(), ApiError> {
    let given = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let (essence, params) = split_media_type(given);
    if !essence.eq_ignore_ascii_case(JSONAPI_MIME) {
        return Err(ApiError::UnsupportedMediaType(format!(
            "Request must have \"Content-Type: {}\" header",
            JSONAPI_MIME
        )));
    }
    if !params.is_empty() {
        return Err(ApiError::UnsupportedMediaType(format!(
            "Content-Type header must not have media type parameters, but it has {}",
            params.join("; ")
        )));
    }
    Ok(())
}

/// Succeeds unless the `Accept` header rules out every JSON API representation.
#[derive(Clone, Copy, Debug)]
pub struct AcceptsJsonApi;

#[async_trait]
impl<S> FromRequestParts<S> for AcceptsJsonApi
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(accept) = parts.headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) else {
            return Ok(AcceptsJsonApi);
        };
        if accepts_jsonapi(accept) {
            Ok(AcceptsJsonApi)
        } else {
            Err(ApiError::NotAcceptable(format!(
                "Accept header must include \"{}\" without media type parameters",
                JSONAPI_MIME
            )))
        }
    }
}

/// Quality values are not media type parameters; everything else is.
pub fn accepts_jsonapi(accept: &str) -> bool {
    if accept.trim().is_empty() {
        return true;
    }
    accept.split(',').any(|entry| {
        let (essence, params) = split_media_type(entry);
        let params: Vec<&str> = params.into_iter().filter(|p| !p.starts_with("q=")).collect();
        match essence.to_ascii_lowercase().as_str() {
            "*/*" | "application/*" => true,
            e if e == JSONAPI_MIME => params.is_empty(),
            _ => false,
        }
    })
}

fn split_media_type(s: &str) -> (&str, Vec<&str>) {
    let mut parts = s.split(';').map(str::trim);
    let essence = parts.next().unwrap_or("");
    (essence, parts.filter(|p| !p.is_empty()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;

    #[test]
    fn accept_header_rules() {
        assert!(accepts_jsonapi(JSONAPI_MIME));
        assert!(accepts_jsonapi("*/*"));
        assert!(accepts_jsonapi("text/html, application/vnd.api+json;q=0.9"));
        assert!(accepts_jsonapi(""));
        assert!(!accepts_jsonapi("application/vnd.api+json; ext=bulk"));
        assert!(!accepts_jsonapi("text/html"));
    }

    #[tokio::test]
    async fn rejects_wrong_content_type() {
        let req = Request::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let err = JsonApiDocument::from_request(req, &()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let req = Request::builder()
            .header(header::CONTENT_TYPE, "application/vnd.api+json; charset=utf-8")
            .body(Body::from("{}"))
            .unwrap();
        let err = JsonApiDocument::from_request(req, &()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn parses_body_or_reports_bad_json() {
        let req = Request::builder()
            .header(header::CONTENT_TYPE, JSONAPI_MIME)
            .body(Body::from(r#"{"data": null}"#))
            .unwrap();
        let JsonApiDocument(doc) = JsonApiDocument::from_request(req, &()).await.unwrap();
        assert!(doc["data"].is_null());

        let req = Request::builder()
            .header(header::CONTENT_TYPE, JSONAPI_MIME)
            .body(Body::from("{not json"))
            .unwrap();
        let err = JsonApiDocument::from_request(req, &()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
