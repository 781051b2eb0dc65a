//! Database module: models and the SQLite-backed store.

mod models;
mod store;

pub use models::*;
pub use store::*;
