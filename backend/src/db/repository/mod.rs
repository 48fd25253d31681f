//! Repository trait definitions for summary storage.
//!
//! # Module Organization
//!
//! - [`error`]: Error types for repository operations
//! - [`bucket`]: Hourly bucket storage
//! - [`summary`]: Per-user summary documents
//! - [`device_data`]: Read access to the raw device data store
//!
//! # Convenience Trait Bound
//!
//! For code that needs every capability, use the [`FullRepository`] trait bound:
//!
//! ```ignore
//! async fn recompute<R: FullRepository>(repo: &R, user_id: &str) -> RepositoryResult<()> {
//!     repo.trim_excess_buckets(SummaryType::Cgm, user_id).await?;
//!     repo.get_summary(SummaryType::Cgm, user_id).await?;
//!     Ok(())
//! }
//! ```

pub mod bucket;
pub mod device_data;
pub mod error;
pub mod summary;

// Re-export error types
pub use error::{ErrorContext, RepositoryError, RepositoryResult};

// Re-export all traits
pub use bucket::BucketRepository;
pub use device_data::DeviceDataRepository;
pub use summary::SummaryRepository;

/// Composite trait bound for a complete repository implementation.
pub trait FullRepository: BucketRepository + SummaryRepository + DeviceDataRepository {}

// Blanket implementation: any type implementing all three traits automatically implements FullRepository
impl<T> FullRepository for T where T: BucketRepository + SummaryRepository + DeviceDataRepository {}

/// Reject an empty user id.
pub(crate) fn validate_user_id(user_id: &str, operation: &str) -> RepositoryResult<()> {
    if user_id.trim().is_empty() {
        return Err(RepositoryError::validation_with_context(
            "userId is missing",
            ErrorContext::new(operation),
        ));
    }
    Ok(())
}
