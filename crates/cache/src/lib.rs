//! Persistent configuration and cache state for file acquisition.
//!
//! The database holds a strict ownership tree:
//!
//! ```text
//! Api ─┬─ Creds (optional, 1:1)
//!      └─ Source ── CachedFile ── ExpectedFile
//! ```
//!
//! - **Api**: one external data provider, unique by name.
//! - **Source**: a base URL and local data directory under an API.
//! - **CachedFile**: one downloadable resource and its staleness state.
//! - **ExpectedFile**: one artifact produced by fetching (and extracting) a
//!   cached file; consumed by the transform stage.
//!
//! Deleting a parent deletes its children through `ON DELETE CASCADE`.
//! Besides persistence this crate provides the streaming [`hash`] used for
//! downloaded content and the on-demand [`chain`] hashes over the tree.

pub mod chain;
mod db;
pub mod error;
pub mod hash;
pub mod models;
mod repo;

pub use crate::db::Database;
pub use crate::repo::{ExpectedFileKeys, Repository};
