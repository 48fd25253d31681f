//! Service layer for summary computation and orchestration.
//!
//! Services sit on top of the repository traits: they drive the bucket and
//! summary stores and the device data collaborator, and hold the business
//! logic of turning raw records into per-user summaries.

pub mod realtime;
pub mod summarizer;
pub mod sweeper;

pub use realtime::get_realtime_days_for_users;
pub use summarizer::{Summarizer, SummarizerConfig};
pub use sweeper::{backfill_summaries, process_migrations, process_outdated, SweepReport};
