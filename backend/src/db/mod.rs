//! Storage for hourly buckets and summary documents.
//!
//! This module provides abstractions for store operations via the Repository
//! pattern, allowing different storage backends to be swapped easily.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Service Layer (services/) - Summarizer, sweeps,        │
//! │  realtime-days reporting                                 │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//! ┌───────────────────▼─────────────────────────────────────┐
//! │  Repository Traits (repository/) - Abstract Interface   │
//! │  Bucket / Summary / DeviceData                          │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//!     ┌───────────────▼──────────────────────────────┐
//!     │             Local Repository                  │
//!     │               (in-memory)                     │
//!     └──────────────────────────────────────────────┘
//! ```
//!
//! # Recommended Usage
//!
//! ```ignore
//! use glycemic_summary::db::{RepositoryFactory, RepositoryType};
//! use glycemic_summary::services::Summarizer;
//!
//! let repo = RepositoryFactory::create(RepositoryType::Local);
//! let summarizer = Summarizer::new(SummaryType::Cgm, repo, SummarizerConfig::default());
//! let summary = summarizer.update_summary("user-1").await?;
//! ```

#[cfg(not(feature = "local-repo"))]
compile_error!("Enable at least one repository backend feature.");

pub mod factory;
pub mod models;
pub mod repo_config;
pub mod repositories;
pub mod repository;

pub use repo_config::{load_config, RepositoryConfig};

// Repository trait and implementations
pub use factory::{RepositoryBuilder, RepositoryFactory, RepositoryType};
pub use repositories::LocalRepository;
pub use repository::{
    BucketRepository, DeviceDataRepository, ErrorContext, FullRepository, RepositoryError,
    RepositoryResult, SummaryRepository,
};
