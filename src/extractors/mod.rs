//! Request extractors.

pub mod jsonapi;
pub mod method;

pub use jsonapi::{AcceptsJsonApi, JsonApiDocument};
pub use method::{MethodEnabled, RelationshipWritesEnabled};
