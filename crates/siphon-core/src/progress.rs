//! Progress reporting for sync jobs.
//!
//! The orchestrator emits a [`SyncEvent`] for every lifecycle transition.
//! Frontends choose how to surface them: [`TracingReporter`] logs through
//! `tracing`, [`SilentReporter`] drops everything.

use tracing::{info, warn};
use uuid::Uuid;

use crate::job::{JobStatus, PropertySyncResult};
use crate::models::DateRange;
use crate::retention::PruneSummary;

/// Events emitted while a job runs.
#[derive(Debug, Clone)]
pub enum SyncEvent<'a> {
    JobStarted {
        job_id: Uuid,
        properties: usize,
    },
    JobFinished {
        job_id: Uuid,
        status: JobStatus,
        error: Option<&'a str>,
    },
    PropertyStarted {
        job_id: Uuid,
        property: &'a str,
        range: DateRange,
        chunks: usize,
    },
    /// The store already holds everything up to the requested end.
    PropertySkipped {
        job_id: Uuid,
        property: &'a str,
    },
    PropertyFinished {
        job_id: Uuid,
        result: &'a PropertySyncResult,
    },
    ChunkCompleted {
        job_id: Uuid,
        property: &'a str,
        range: DateRange,
        rows_fetched: u64,
        rows_inserted: u64,
    },
    ChunkFailed {
        job_id: Uuid,
        property: &'a str,
        range: DateRange,
        error: &'a str,
    },
    PruneCompleted {
        job_id: Uuid,
        summary: &'a PruneSummary,
    },
    PruneFailed {
        job_id: Uuid,
        property: &'a str,
        error: &'a str,
    },
}

/// Trait for reporting sync progress.
pub trait SyncReporter: Send + Sync {
    /// Called when a sync event occurs.
    ///
    /// The default implementation does nothing (silent mode).
    fn report(&self, event: SyncEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl SyncReporter for SilentReporter {}

/// Tracing-based reporter for CLI logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl SyncReporter for TracingReporter {
    fn report(&self, event: SyncEvent<'_>) {
        match event {
            SyncEvent::JobStarted { job_id, properties } => {
                info!(%job_id, properties, "Sync job started");
            }
            SyncEvent::JobFinished {
                job_id,
                status,
                error,
            } => match error {
                Some(error) => warn!(%job_id, %status, error, "Sync job finished"),
                None => info!(%job_id, %status, "Sync job finished"),
            },
            SyncEvent::PropertyStarted {
                job_id,
                property,
                range,
                chunks,
            } => {
                info!(%job_id, property, %range, chunks, "Syncing property");
            }
            SyncEvent::PropertySkipped { job_id, property } => {
                info!(%job_id, property, "Property already up to date");
            }
            SyncEvent::PropertyFinished { job_id, result } => match &result.error {
                Some(error) => warn!(
                    %job_id,
                    property = %result.property,
                    status = %result.status,
                    rows_inserted = result.rows_inserted,
                    error = %error,
                    "Property finished with errors"
                ),
                None => info!(
                    %job_id,
                    property = %result.property,
                    status = %result.status,
                    rows_fetched = result.rows_fetched,
                    rows_inserted = result.rows_inserted,
                    duration_ms = result.duration_ms,
                    "Property finished"
                ),
            },
            SyncEvent::ChunkCompleted {
                job_id,
                property,
                range,
                rows_fetched,
                rows_inserted,
            } => {
                tracing::debug!(
                    %job_id,
                    property,
                    %range,
                    rows_fetched,
                    rows_inserted,
                    "Chunk completed"
                );
            }
            SyncEvent::ChunkFailed {
                job_id,
                property,
                range,
                error,
            } => {
                warn!(%job_id, property, %range, error, "Chunk failed");
            }
            SyncEvent::PruneCompleted { job_id, summary } => {
                info!(
                    %job_id,
                    property = %summary.property,
                    deleted = summary.total_deleted(),
                    "Retention prune completed"
                );
            }
            SyncEvent::PruneFailed {
                job_id,
                property,
                error,
            } => {
                warn!(%job_id, property, error, "Retention prune failed");
            }
        }
    }
}
