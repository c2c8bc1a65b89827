//! Storage abstraction for ztgate.
//!
//! Backend crates (e.g., ztgate-store-sqlite) implement the [`Store`] trait so
//! `ztgate-core` doesn't depend on any specific database engine or schema details.

pub mod store;
pub mod types;

pub use store::{Store, StoreError};
pub use types::*;
