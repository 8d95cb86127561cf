pub mod builder;
pub mod filter;
pub mod params;

pub use builder::*;
pub use params::PgBindValue;
