//! Database access, linkage and include loading, and rendering behind the handlers.

mod crud;
mod document;
mod include;
mod validation;
mod write;

pub use crud::{rollback, row_to_map, CrudService, RowMap};
pub use document::{identifiers, Renderer};
pub use include::{load_included, Included};
pub use validation::RequestValidator;
pub use write::{to_one_forbidden, RelationWriter};
