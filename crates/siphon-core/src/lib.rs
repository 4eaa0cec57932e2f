//! Siphon Core - Domain types, sync orchestration and retention.
//!
//! This crate provides the core functionality for Siphon, including:
//!
//! - **Domain models**: [`Record`], [`SyncRequest`], [`DateRange`], [`Dimension`], etc.
//! - **Orchestration**: [`JobManager`] runs background sync jobs with two-level
//!   bounded concurrency, cooperative cancellation and resumable progress
//! - **Retention**: [`RetentionPruner`] deletes low-value historical rows
//! - **Traits**: [`SearchAnalyticsClient`], [`RecordStore`] for dependency injection
//! - **Progress reporting**: [`SyncReporter`] trait for decoupled logging/UI
//!
//! # Architecture
//!
//! This crate is designed to be reusable by different frontends. Network and
//! storage live behind traits:
//!
//! - [`SearchAnalyticsClient`] - abstracts the reporting API (e.g., `siphon-client`)
//! - [`RecordStore`] - abstracts the local store (e.g., `siphon-db`)
//!
//! # Example
//!
//! ```ignore
//! use siphon_core::{JobManager, SyncOptions};
//!
//! let manager = JobManager::new(client, store);
//! let job_id = manager.start_sync_all(SyncOptions::default()).await?;
//!
//! // Poll, or wait for the completion signal
//! let status = manager.wait_for_completion(job_id).await?;
//! ```

pub mod chunk;
pub mod config;
pub mod error;
pub mod job;
pub mod manager;
mod pipeline;
pub mod models;
pub mod progress;
pub mod retention;
pub mod traits;
pub mod transform;

// Configuration
pub use config::{
    DbConfig, HttpConfig, RetentionPolicy, SiphonConfig, SyncConfig, default_config_path,
    load_config,
};

// Error handling
pub use error::AppError;

// Domain models
pub use models::{
    ApiRow, DateRange, Dimension, NewSyncLog, QueryPage, QueryRequest, Record, SearchType,
    SyncLogStatus, SyncLogUpdate, SyncOptions, SyncRequest,
};

// Chunk planning
pub use chunk::plan_chunks;

// Job types
pub use job::{JobProgress, JobStatus, JobStatusView, PropertyOutcome, PropertySyncResult};

// Progress reporting
pub use progress::{SilentReporter, SyncEvent, SyncReporter, TracingReporter};

// Retention
pub use retention::{PrunePreview, PruneSummary, RetentionPruner, RowPredicate};

// Traits for dependency injection
pub use traits::{RecordStore, SearchAnalyticsClient};

// Orchestrator (generic over trait implementations)
pub use manager::JobManager;
