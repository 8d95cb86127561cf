//! HTTP handlers for the endpoints of one API.

pub mod relationship;
pub mod resource;
mod support;

pub use relationship::*;
pub use resource::*;

use crate::error::ApiError;

/// Fallback for methods no endpoint answers.
pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}
