//! Method guards that run before any body is read.

use crate::error::ApiError;
use crate::state::ApiState;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, Method},
};

/// The API enables the request's method; HEAD counts as GET.
#[derive(Clone, Copy, Debug)]
pub struct MethodEnabled;

#[async_trait]
impl FromRequestParts<ApiState> for MethodEnabled {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let method = if parts.method == Method::HEAD {
            Method::GET
        } else {
            parts.method.clone()
        };
        state.api.require(&method)?;
        Ok(MethodEnabled)
    }
}

/// Relationship writes of every method are enabled together with PATCH.
#[derive(Clone, Copy, Debug)]
pub struct RelationshipWritesEnabled;

#[async_trait]
impl FromRequestParts<ApiState> for RelationshipWritesEnabled {
    type Rejection = ApiError;

    async fn from_request_parts(_parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        state.api.require(&Method::PATCH)?;
        Ok(RelationshipWritesEnabled)
    }
}
