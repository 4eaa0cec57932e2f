//! Per-property fetch-and-write pipeline.
//!
//! One property runs as:
//!
//! 1. resolve the date range (explicit start, else resume after the last
//!    stored date, else the default lookback), skipping when already current;
//! 2. split the range into chunks;
//! 3. run chunks under the chunk concurrency limit, each one paging through
//!    the API and writing every page as its own transaction;
//! 4. update the last-synced marker when rows were written, record the
//!    property's final status, then run retention.
//!
//! Every store write (batches, markers, sync-log rows, pruning) holds the
//! context's write lock, so at most one write reaches the store at a time.
//!
//! Single- and multi-property jobs both go through [`run_property`].

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Days, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::{Mutex, Semaphore};

use crate::chunk::plan_chunks;
use crate::config::SyncConfig;
use crate::error::AppError;
use crate::job::{PropertyOutcome, PropertySyncResult};
use crate::manager::JobEntry;
use crate::models::{
    DateRange, Dimension, NewSyncLog, QueryRequest, SearchType, SyncLogStatus, SyncLogUpdate,
    SyncRequest,
};
use crate::progress::{SyncEvent, SyncReporter};
use crate::retention::RetentionPruner;
use crate::traits::{RecordStore, SearchAnalyticsClient};
use crate::transform;

/// Collaborators shared by every job of one manager.
pub(crate) struct SyncContext<C, S>
where
    C: SearchAnalyticsClient,
    S: RecordStore,
{
    pub client: C,
    pub store: S,
    pub config: SyncConfig,
    pub pruner: RetentionPruner<S>,
    pub reporter: Arc<dyn SyncReporter>,
    /// Serializes every write against the store, pruning included.
    pub write_lock: Arc<Mutex<()>>,
    /// Property slots shared by all jobs; sized by `property_concurrency`.
    pub property_slots: Semaphore,
}

impl<C, S> SyncContext<C, S>
where
    C: SearchAnalyticsClient,
    S: RecordStore,
{
    /// Runs one store write while holding the write lock.
    async fn write<T, F>(&self, op: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        let _guard = self.write_lock.lock().await;
        op.await
    }
}

/// What every chunk of one property shares.
struct ChunkTarget {
    property: String,
    search_type: SearchType,
    dimensions: Vec<Dimension>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ChunkState {
    Completed,
    Failed(String),
    Cancelled,
    /// Cancellation was observed before the chunk began.
    NotStarted,
}

#[derive(Debug)]
struct ChunkOutcome {
    range: DateRange,
    rows_fetched: u64,
    rows_inserted: u64,
    state: ChunkState,
}

impl ChunkOutcome {
    fn new(range: DateRange, state: ChunkState) -> Self {
        Self {
            range,
            rows_fetched: 0,
            rows_inserted: 0,
            state,
        }
    }
}

/// Runs one property to completion and converts every error into a result.
pub(crate) async fn run_property<C, S>(
    ctx: &Arc<SyncContext<C, S>>,
    job: &Arc<JobEntry>,
    request: SyncRequest,
) -> PropertySyncResult
where
    C: SearchAnalyticsClient,
    S: RecordStore,
{
    let started = Instant::now();
    job.enter_property(&request.property);

    // Only range resolution can fail here; cancellation is folded into the
    // chunk outcomes.
    let mut result = match sync_property(ctx, job, &request).await {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(
                job_id = %job.id,
                property = %request.property,
                error = %e,
                "Property sync failed"
            );
            PropertySyncResult::failed(&request.property, e.to_string())
        }
    };

    result.duration_ms = started.elapsed().as_millis() as u64;
    job.leave_property(&request.property);
    result
}

fn days_before(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}

/// Works out the range to fetch, or `None` when the store is already current.
async fn resolve_range<C, S>(
    ctx: &SyncContext<C, S>,
    request: &SyncRequest,
    search_type: SearchType,
) -> Result<Option<DateRange>, AppError>
where
    C: SearchAnalyticsClient,
    S: RecordStore,
{
    let today = Utc::now().date_naive();
    let end = request
        .end_date
        .unwrap_or_else(|| days_before(today, ctx.config.end_date_lag_days));

    let start = match request.start_date {
        Some(start) => start,
        None => match ctx
            .store
            .last_synced_date(&request.property, search_type)
            .await?
        {
            Some(last) => match last.succ_opt() {
                Some(next) => next,
                None => return Ok(None),
            },
            None => days_before(today, ctx.config.default_lookback_days),
        },
    };

    if start > end {
        return Ok(None);
    }
    Ok(Some(DateRange { start, end }))
}

async fn sync_property<C, S>(
    ctx: &Arc<SyncContext<C, S>>,
    job: &Arc<JobEntry>,
    request: &SyncRequest,
) -> Result<PropertySyncResult, AppError>
where
    C: SearchAnalyticsClient,
    S: RecordStore,
{
    let property = request.property.as_str();
    let search_type = request.search_type();

    let Some(range) = resolve_range(ctx, request, search_type).await? else {
        ctx.reporter.report(SyncEvent::PropertySkipped {
            job_id: job.id,
            property,
        });
        return Ok(PropertySyncResult::new(property, PropertyOutcome::Skipped));
    };

    if let Err(e) = ctx.write(ctx.store.mark_syncing(property)).await {
        tracing::warn!(property, error = %e, "Failed to mark property as syncing");
    }

    let chunks = plan_chunks(range, ctx.config.chunk_days);
    ctx.reporter.report(SyncEvent::PropertyStarted {
        job_id: job.id,
        property,
        range,
        chunks: chunks.len(),
    });

    let target = Arc::new(ChunkTarget {
        property: property.to_string(),
        search_type,
        dimensions: request.dimensions(),
    });

    let outcomes: Vec<ChunkOutcome> = stream::iter(chunks)
        .map(|range| {
            let ctx = Arc::clone(ctx);
            let job = Arc::clone(job);
            let target = Arc::clone(&target);
            async move { run_chunk(&ctx, &job, &target, range).await }
        })
        .buffer_unordered(ctx.config.chunk_concurrency.max(1))
        .collect()
        .await;

    let mut result = PropertySyncResult::new(property, PropertyOutcome::Success);
    result.range = Some(range);

    let total_chunks = outcomes.len();
    let mut failures = Vec::new();
    let mut interrupted = false;
    for outcome in &outcomes {
        result.rows_fetched += outcome.rows_fetched;
        result.rows_inserted += outcome.rows_inserted;
        match &outcome.state {
            ChunkState::Completed => {}
            ChunkState::Failed(error) => failures.push(error.as_str()),
            ChunkState::Cancelled | ChunkState::NotStarted => interrupted = true,
        }
    }

    if interrupted {
        result.status = PropertyOutcome::Cancelled;
    } else if let Some(first) = failures.first() {
        result.status = PropertyOutcome::Failed;
        result.error = Some(format!(
            "{} of {} chunks failed: {}",
            failures.len(),
            total_chunks,
            first
        ));
    }

    if result.rows_inserted > 0 {
        if let Err(e) = ctx.write(ctx.store.mark_last_synced(property)).await {
            tracing::warn!(property, error = %e, "Failed to update last synced marker");
        }
    }
    if let Err(e) = ctx
        .write(ctx.store.mark_sync_finished(property, result.status))
        .await
    {
        tracing::warn!(property, error = %e, "Failed to record final sync status");
    }

    if !interrupted && !job.cancel.is_cancelled() && result.rows_inserted > 0 {
        match ctx.pruner.prune(property).await {
            Ok(summary) => {
                ctx.reporter.report(SyncEvent::PruneCompleted {
                    job_id: job.id,
                    summary: &summary,
                });
                result.pruning = Some(summary);
            }
            Err(e) => {
                let error = e.to_string();
                ctx.reporter.report(SyncEvent::PruneFailed {
                    job_id: job.id,
                    property,
                    error: &error,
                });
            }
        }
    }

    Ok(result)
}

/// Runs one chunk, recording it in the sync log.
async fn run_chunk<C, S>(
    ctx: &SyncContext<C, S>,
    job: &JobEntry,
    target: &ChunkTarget,
    range: DateRange,
) -> ChunkOutcome
where
    C: SearchAnalyticsClient,
    S: RecordStore,
{
    if job.cancel.is_cancelled() {
        return ChunkOutcome::new(range, ChunkState::NotStarted);
    }

    let log_entry = NewSyncLog {
        property: target.property.clone(),
        search_type: target.search_type,
        dimensions: target.dimensions.clone(),
        range,
    };
    let log_id = match ctx.write(ctx.store.create_sync_log(&log_entry)).await {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(property = %target.property, %range, error = %e, "Failed to create sync log entry");
            None
        }
    };

    let mut outcome = ChunkOutcome::new(range, ChunkState::Completed);
    if let Err(e) = fetch_and_write(ctx, job, target, &mut outcome).await {
        outcome.state = if e.is_cancelled() {
            ChunkState::Cancelled
        } else {
            ChunkState::Failed(e.to_string())
        };
    }

    if let Some(id) = log_id {
        let (status, error) = match &outcome.state {
            ChunkState::Completed => (SyncLogStatus::Completed, None),
            ChunkState::Failed(e) => (SyncLogStatus::Failed, Some(e.clone())),
            ChunkState::Cancelled | ChunkState::NotStarted => (SyncLogStatus::Cancelled, None),
        };
        let update = SyncLogUpdate {
            status,
            rows_fetched: outcome.rows_fetched,
            rows_inserted: outcome.rows_inserted,
            error,
        };
        if let Err(e) = ctx.write(ctx.store.update_sync_log(id, &update)).await {
            tracing::warn!(log_id = id, error = %e, "Failed to update sync log entry");
        }
    }

    match &outcome.state {
        ChunkState::Failed(error) => ctx.reporter.report(SyncEvent::ChunkFailed {
            job_id: job.id,
            property: &target.property,
            range,
            error: error.as_str(),
        }),
        _ => ctx.reporter.report(SyncEvent::ChunkCompleted {
            job_id: job.id,
            property: &target.property,
            range,
            rows_fetched: outcome.rows_fetched,
            rows_inserted: outcome.rows_inserted,
        }),
    }

    outcome
}

/// Pages through one chunk, writing each page as soon as it arrives.
///
/// The fetch races the job's cancellation token; a write that has begun is
/// always allowed to finish.
async fn fetch_and_write<C, S>(
    ctx: &SyncContext<C, S>,
    job: &JobEntry,
    target: &ChunkTarget,
    outcome: &mut ChunkOutcome,
) -> Result<(), AppError>
where
    C: SearchAnalyticsClient,
    S: RecordStore,
{
    let page_size = ctx.config.page_size.max(1);
    let mut start_row = 0;

    loop {
        if job.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let request = QueryRequest {
            range: outcome.range,
            dimensions: target.dimensions.clone(),
            start_row,
            row_limit: page_size,
            search_type: target.search_type,
        };

        job.progress.record_api_call();
        let page = tokio::select! {
            biased;
            _ = job.cancel.cancelled() => return Err(AppError::Cancelled),
            page = ctx.client.query(&target.property, &request) => page?,
        };

        let fetched = page.rows.len();
        job.progress.record_page(fetched, page_size);
        outcome.rows_fetched += fetched as u64;

        if fetched > 0 {
            let records = transform::to_records(
                &target.property,
                target.search_type,
                &target.dimensions,
                &page.rows,
            );
            outcome.rows_inserted += ctx.write(ctx.store.upsert_batch(&records)).await?;
        }

        if fetched < page_size {
            return Ok(());
        }
        start_row += fetched;
    }
}
