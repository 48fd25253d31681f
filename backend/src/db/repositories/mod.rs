//! Repository implementations module.
//!
//! - `local`: In-memory implementation for unit testing and local development
//!
//! Production deployments plug in their own document store by implementing
//! the traits in [`crate::db::repository`].
pub mod local;

pub use local::LocalRepository;
