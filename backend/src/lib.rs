//! # Glycemic Summary Engine
//!
//! Incremental per-user glucose statistics.
//!
//! Raw glucose records are folded into hourly buckets, and the buckets are
//! rolled up into 1, 7, 14 and 30 day periods, each paired with the window
//! immediately before it so trends can be reported as deltas. Three summary
//! kinds are maintained: continuous monitoring (CGM), finger-stick meters
//! (BGM) and upload timeliness (continuous).
//!
//! ## Architecture
//!
//! - [`models`]: Records, buckets, periods and the summary document
//! - [`db`]: Repository traits, the in-memory store and configuration
//! - [`services`]: The summarizer, maintenance sweeps and realtime reporting
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use glycemic_summary::db::LocalRepository;
//! use glycemic_summary::models::SummaryType;
//! use glycemic_summary::services::{Summarizer, SummarizerConfig};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let repo = LocalRepository::new();
//! let summarizer = Summarizer::new(SummaryType::Cgm, Arc::new(repo), SummarizerConfig::default());
//! assert!(summarizer.update_summary("user-1").await.unwrap().is_none());
//! # });
//! ```

// Allow large error types - RepositoryError contains rich context for debugging
#![allow(clippy::result_large_err)]

pub mod db;
pub mod models;
pub mod services;
