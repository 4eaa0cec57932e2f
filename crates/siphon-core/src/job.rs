//! Sync job types.
//!
//! # Architecture
//!
//! Jobs flow through these states:
//! ```text
//! queued → syncing → completed
//!                  → failed     (every property failed)
//!                  → cancelled  (cancellation observed at any point)
//! ```
//!
//! All view types here are plain data and serialize as camelCase JSON.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DateRange, SyncRequest};
use crate::retention::PruneSummary;

// =============================================================================
// Job Status
// =============================================================================

/// Status of a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job is registered but has not started.
    Queued,
    /// Job is fetching and writing.
    Syncing,
    /// Job finished with at least one property synced or skipped.
    Completed,
    /// Every property of the job failed.
    Failed,
    /// Job was cancelled before it finished.
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Syncing => "syncing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Property results
// =============================================================================

/// How one property of a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyOutcome {
    Success,
    Failed,
    /// The store was already current for the requested range.
    Skipped,
    /// Cancellation interrupted the property; written rows are kept.
    Cancelled,
}

impl PropertyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyOutcome::Success => "success",
            PropertyOutcome::Failed => "failed",
            PropertyOutcome::Skipped => "skipped",
            PropertyOutcome::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PropertyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of syncing one property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySyncResult {
    pub property: String,
    pub status: PropertyOutcome,
    /// Resolved range, when resolution got that far.
    pub range: Option<DateRange>,
    pub rows_fetched: u64,
    pub rows_inserted: u64,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub pruning: Option<PruneSummary>,
}

impl PropertySyncResult {
    pub(crate) fn new(property: &str, status: PropertyOutcome) -> Self {
        Self {
            property: property.to_string(),
            status,
            range: None,
            rows_fetched: 0,
            rows_inserted: 0,
            duration_ms: 0,
            error: None,
            pruning: None,
        }
    }

    pub(crate) fn failed(property: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(property, PropertyOutcome::Failed)
        }
    }
}

// =============================================================================
// Progress
// =============================================================================

/// Snapshot of a job's progress counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub properties_total: u64,
    pub properties_completed: u64,
    pub rows_fetched: u64,
    pub api_calls_made: u64,
    /// Heuristic: grows by one page size for every full page seen.
    pub estimated_total_rows: u64,
    /// Properties with work in flight.
    pub current_properties: Vec<String>,
}

/// Progress counters shared by every worker of a job.
#[derive(Debug, Default)]
pub struct AtomicJobProgress {
    properties_completed: AtomicU64,
    rows_fetched: AtomicU64,
    api_calls_made: AtomicU64,
    estimated_total_rows: AtomicU64,
}

impl AtomicJobProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_api_call(&self) {
        self.api_calls_made.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one fetched page and grows the estimate when the page was full.
    pub fn record_page(&self, rows: usize, page_size: usize) {
        self.rows_fetched.fetch_add(rows as u64, Ordering::Relaxed);
        if rows >= page_size {
            self.estimated_total_rows
                .fetch_add(page_size as u64, Ordering::Relaxed);
        }
    }

    pub fn record_property_done(&self) {
        self.properties_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a snapshot. `current_properties` is supplied by the caller.
    pub fn snapshot(&self, properties_total: usize, current_properties: Vec<String>) -> JobProgress {
        let rows_fetched = self.rows_fetched.load(Ordering::Relaxed);
        JobProgress {
            properties_total: properties_total as u64,
            properties_completed: self.properties_completed.load(Ordering::Relaxed),
            rows_fetched,
            api_calls_made: self.api_calls_made.load(Ordering::Relaxed),
            estimated_total_rows: self.estimated_total_rows.load(Ordering::Relaxed).max(rows_fetched),
            current_properties,
        }
    }
}

// =============================================================================
// Status view
// =============================================================================

/// Point-in-time view of a job, detached from the live job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub id: Uuid,
    pub status: JobStatus,
    pub cancelled: bool,
    pub properties: Vec<SyncRequest>,
    pub progress: JobProgress,
    /// Per-property results in completion order.
    pub results: Vec<PropertySyncResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set on partial failure, or when the job id is unknown.
    pub error: Option<String>,
}

impl JobStatusView {
    /// Failed-shaped placeholder returned for ids the registry does not know.
    pub fn not_found(id: Uuid) -> Self {
        Self {
            id,
            status: JobStatus::Failed,
            cancelled: false,
            properties: Vec::new(),
            progress: JobProgress::default(),
            results: Vec::new(),
            started_at: None,
            completed_at: None,
            error: Some(format!(
                "Job not found: {} (it may have been evicted from history)",
                id
            )),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Counts results with the given outcome.
    pub fn count_outcome(&self, outcome: PropertyOutcome) -> usize {
        self.results.iter().filter(|r| r.status == outcome).count()
    }

    /// Rows written across all properties.
    pub fn rows_inserted(&self) -> u64 {
        self.results.iter().map(|r| r.rows_inserted).sum()
    }
}
