//! One router per API.

mod api;

pub use api::api_routes;
