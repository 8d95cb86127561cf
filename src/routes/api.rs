//! Routes of one API, mounted under `{prefix}/{collection}`.

use crate::handlers::{
    delete_relationship, delete_resource, get_collection, get_related, get_related_resource, get_relationship,
    get_resource, method_not_allowed, patch_relationship, patch_resource, post_relationship, post_resource,
};
use crate::state::ApiState;
use axum::{routing::get, Router};
use tower_http::limit::RequestBodyLimitLayer;

/// Every endpoint is routed; handlers answer 405 for methods the API does not enable.
pub fn api_routes(state: ApiState, body_limit_bytes: usize) -> Router {
    let base = state.api.url(&Default::default());
    Router::new()
        .route(
            &base,
            get(get_collection).post(post_resource).fallback(method_not_allowed),
        )
        .route(
            &format!("{}/:resource_id", base),
            get(get_resource)
                .patch(patch_resource)
                .delete(delete_resource)
                .fallback(method_not_allowed),
        )
        .route(
            &format!("{}/:resource_id/relationships/:relation_name", base),
            get(get_relationship)
                .post(post_relationship)
                .patch(patch_relationship)
                .delete(delete_relationship)
                .fallback(method_not_allowed),
        )
        .route(
            &format!("{}/:resource_id/:relation_name", base),
            get(get_related).fallback(method_not_allowed),
        )
        .route(
            &format!("{}/:resource_id/:relation_name/:related_resource_id", base),
            get(get_related_resource).fallback(method_not_allowed),
        )
        .layer(RequestBodyLimitLayer::new(body_limit_bytes))
        .with_state(state)
}
