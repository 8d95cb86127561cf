//! Router behavior that is decided before any database round trip.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use restless::config::{ColumnConfig, FullConfig, ModelConfig, RelationshipConfig};
use restless::{resolve, ApiError, ApiManager, ApiOptions, ProcessingError, ProcessorKey, UrlFor, JSONAPI_MIME};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

fn config() -> FullConfig {
    FullConfig {
        models: vec![
            ModelConfig::new("Person")
                .column(ColumnConfig::new("id", "serial").primary_key())
                .column(ColumnConfig::new("name", "text").unique())
                .column(ColumnConfig::new("age", "integer"))
                .relationship(RelationshipConfig::to_many("articles", "Article", "author_id")),
            ModelConfig::new("Article")
                .column(ColumnConfig::new("id", "serial").primary_key())
                .column(ColumnConfig::new("title", "text"))
                .column(ColumnConfig::new("author_id", "integer"))
                .relationship(RelationshipConfig::to_one("author", "Person", "author_id")),
        ],
        ..Default::default()
    }
}

fn manager() -> ApiManager {
    // Never connects: every request below is answered before a connection is acquired.
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://localhost/restless_unused")
        .unwrap();
    ApiManager::new(pool, resolve(&config()).unwrap())
}

fn app(options: ApiOptions) -> Router {
    let mut m = manager();
    m.create_api("Person", options).unwrap();
    m.init_app(Router::new())
}

async fn send(app: Router, method: Method, uri: &str, content_type: Option<&str>, body: Option<Value>) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(ct) = content_type {
        builder = builder.header(header::CONTENT_TYPE, ct);
    }
    let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
    app.oneshot(builder.body(body).unwrap()).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn disabled_methods_answer_405_with_error_document() {
    let response = send(app(ApiOptions::default()), Method::DELETE, "/api/Person/1", None, None).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::CONTENT_TYPE], JSONAPI_MIME);
    let body = json_body(response).await;
    assert_eq!(body["errors"][0]["status"], "405");
}

#[tokio::test]
async fn unrouted_methods_answer_405() {
    let response = send(app(ApiOptions::default()), Method::PUT, "/api/Person", None, None).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn post_to_get_only_api_is_405() {
    let document = json!({ "data": { "type": "Person", "attributes": { "name": "Ada" } } });
    let response = send(
        app(ApiOptions::default()),
        Method::POST,
        "/api/Person",
        Some(JSONAPI_MIME),
        Some(document),
    )
    .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn disabled_method_wins_over_content_type() {
    let document = json!({ "data": { "type": "Person", "attributes": { "name": "Ada" } } });
    let response = send(
        app(ApiOptions::default()),
        Method::POST,
        "/api/Person",
        Some("application/json"),
        Some(document),
    )
    .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let linkage = json!({ "data": [{ "type": "Article", "id": "1" }] });
    let response = send(
        app(ApiOptions::default()),
        Method::POST,
        "/api/Person/1/relationships/articles",
        Some("text/plain"),
        Some(linkage),
    )
    .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn trailing_slash_is_not_found() {
    let response = send(app(ApiOptions::default()), Method::GET, "/api/Person/", None, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unacceptable_accept_header_is_406() {
    let request = Request::builder()
        .uri("/api/Person")
        .header(header::ACCEPT, "text/html")
        .body(Body::empty())
        .unwrap();
    let response = app(ApiOptions::default()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn wrong_content_type_is_415() {
    let options = ApiOptions::with_methods(&[Method::GET, Method::POST]);
    let document = json!({ "data": { "type": "Person" } });
    let response = send(app(options.clone()), Method::POST, "/api/Person", Some("application/json"), Some(document.clone())).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let with_params = format!("{}; charset=utf-8", JSONAPI_MIME);
    let response = send(app(options), Method::POST, "/api/Person", Some(&with_params), Some(document)).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn malformed_query_parameters_are_400() {
    for uri in [
        "/api/Person?filter%5Bobjects%5D=not-json",
        "/api/Person?page%5Bsize%5D=-1",
        "/api/Person?filter%5Bsingle%5D=maybe",
        "/api/Person?include=nonexistent",
    ] {
        let response = send(app(ApiOptions::default()), Method::GET, uri, None, None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        let body = json_body(response).await;
        assert!(body["errors"].as_array().map(|e| !e.is_empty()).unwrap_or(false));
    }
}

#[tokio::test]
async fn preprocessor_errors_short_circuit() {
    let mut options = ApiOptions::default();
    options.preprocessors.add(ProcessorKey::GetCollection, |_| {
        Err(ProcessingError::new(StatusCode::UNAUTHORIZED, "log in first").with_title("Unauthorized"))
    });
    let response = send(app(options), Method::GET, "/api/Person", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["errors"][0]["title"], "Unauthorized");
    assert_eq!(body["errors"][0]["detail"], "log in first");
}

#[tokio::test]
async fn global_preprocessors_run_first() {
    let mut m = manager();
    m.preprocessors.add(ProcessorKey::GetResource, |_| {
        Err(ProcessingError::new(StatusCode::FORBIDDEN, "global"))
    });
    let mut options = ApiOptions::default();
    options.preprocessors.add(ProcessorKey::GetResource, |_| {
        Err(ProcessingError::new(StatusCode::IM_A_TEAPOT, "local"))
    });
    m.create_api("Person", options).unwrap();
    let response = send(m.init_app(Router::new()), Method::GET, "/api/Person/1", None, None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn option_validation_errors() {
    let mut m = manager();
    let both = ApiOptions {
        only: Some(vec!["name".into()]),
        exclude: Some(vec!["age".into()]),
        ..Default::default()
    };
    assert!(matches!(m.create_api("Person", both), Err(ApiError::IllegalArgument(_))));

    let empty = ApiOptions {
        collection_name: Some(String::new()),
        ..Default::default()
    };
    assert!(matches!(m.create_api("Person", empty), Err(ApiError::IllegalArgument(_))));

    let not_unique = ApiOptions {
        primary_key: Some("age".into()),
        ..Default::default()
    };
    assert!(matches!(m.create_api("Person", not_unique), Err(ApiError::IllegalArgument(_))));

    let unknown_extra = ApiOptions {
        additional_attributes: Some(vec!["nope".into()]),
        ..Default::default()
    };
    assert!(matches!(m.create_api("Person", unknown_extra), Err(ApiError::IllegalArgument(_))));

    assert!(matches!(m.create_api("Nobody", ApiOptions::default()), Err(ApiError::IllegalArgument(_))));

    m.create_api("Person", ApiOptions::default()).unwrap();
    assert!(matches!(
        m.create_api("Person", ApiOptions::default()),
        Err(ApiError::IllegalArgument(_))
    ));
}

#[tokio::test]
async fn registry_queries_reflect_created_apis() {
    let mut m = manager();
    let options = ApiOptions {
        collection_name: Some("people".into()),
        url_prefix: Some("/v2/".into()),
        primary_key: Some("name".into()),
        ..Default::default()
    };
    m.create_api("Person", options).unwrap();
    assert_eq!(m.collection_name("Person").as_deref(), Some("people"));
    assert_eq!(m.primary_key_for("Person").as_deref(), Some("name"));
    assert_eq!(m.url_prefix_for("Person").as_deref(), Some("/v2"));
    assert!(m.serializer_for("Person").is_some());
    assert_eq!(
        m.url_for("Person", &UrlFor::relationship("ada", "articles")).as_deref(),
        Some("/v2/people/ada/relationships/articles")
    );
    assert_eq!(m.collection_name("Article"), None);

    let blueprint = m.create_api_blueprint("articles", "Article", ApiOptions::default()).unwrap();
    assert_eq!(blueprint.name, "articles");
    assert_eq!(blueprint.url_prefix, "/api");
    assert_eq!(m.blueprint_name_for("Article").as_deref(), Some("articles"));
}
