//! Job manager: the in-memory job registry and job lifecycle.
//!
//! The [`JobManager`] owns every job it starts. Starting a job returns
//! immediately with its id; the work runs on a spawned task. Callers poll
//! [`JobManager::get_status`], await [`JobManager::wait_for_completion`], or
//! request cancellation with [`JobManager::cancel_job`].
//!
//! # Concurrency
//!
//! Property slots are shared by every job of a manager: at most
//! `SyncConfig::property_concurrency` properties sync at once, whichever
//! jobs they belong to. Chunks of a property run under
//! `SyncConfig::chunk_concurrency`, so at most
//! `property_concurrency × chunk_concurrency` fetches are in flight across
//! the whole manager. A property waiting for a slot starts nothing until it
//! gets one.
//!
//! # Cancellation
//!
//! Each job carries a [`CancellationToken`]. In-flight fetches race the
//! token and are dropped when it fires; no new property or chunk starts
//! afterwards. Writes of pages already fetched still complete.
//!
//! # History
//!
//! The registry keeps jobs in insertion order and evicts the oldest
//! terminal job once more than `SyncConfig::job_history_limit` terminal jobs
//! are tracked. Active jobs are never evicted.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{RetentionPolicy, SyncConfig};
use crate::error::AppError;
use crate::job::{
    AtomicJobProgress, JobStatus, JobStatusView, PropertyOutcome, PropertySyncResult,
};
use crate::models::{SyncOptions, SyncRequest};
use crate::pipeline::{self, SyncContext};
use crate::progress::{SyncEvent, SyncReporter, TracingReporter};
use crate::retention::RetentionPruner;
use crate::traits::{RecordStore, SearchAnalyticsClient};

// =============================================================================
// Job entries
// =============================================================================

struct JobState {
    status: JobStatus,
    results: Vec<PropertySyncResult>,
    error: Option<String>,
    in_flight: Vec<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

/// A live job. Shared between the registry and the job's workers.
pub(crate) struct JobEntry {
    pub id: Uuid,
    pub requests: Vec<SyncRequest>,
    pub cancel: CancellationToken,
    pub progress: AtomicJobProgress,
    state: Mutex<JobState>,
    done: watch::Sender<bool>,
}

impl JobEntry {
    fn new(requests: Vec<SyncRequest>) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            requests,
            cancel: CancellationToken::new(),
            progress: AtomicJobProgress::new(),
            state: Mutex::new(JobState {
                status: JobStatus::Queued,
                results: Vec::new(),
                error: None,
                in_flight: Vec::new(),
                started_at: None,
                completed_at: None,
            }),
            done,
        }
    }

    fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_terminal(&self) -> bool {
        self.state().status.is_terminal()
    }

    pub(crate) fn enter_property(&self, property: &str) {
        self.state().in_flight.push(property.to_string());
    }

    pub(crate) fn leave_property(&self, property: &str) {
        let mut state = self.state();
        if let Some(pos) = state.in_flight.iter().position(|p| p == property) {
            state.in_flight.remove(pos);
        }
    }

    fn push_result(&self, result: PropertySyncResult) {
        self.progress.record_property_done();
        self.state().results.push(result);
    }

    fn view(&self) -> JobStatusView {
        let state = self.state();
        JobStatusView {
            id: self.id,
            status: state.status,
            cancelled: self.cancel.is_cancelled(),
            properties: self.requests.clone(),
            progress: self
                .progress
                .snapshot(self.requests.len(), state.in_flight.clone()),
            results: state.results.clone(),
            started_at: state.started_at,
            completed_at: state.completed_at,
            error: state.error.clone(),
        }
    }
}

#[derive(Default)]
struct Registry {
    order: VecDeque<Uuid>,
    jobs: HashMap<Uuid, Arc<JobEntry>>,
}

// =============================================================================
// Job manager
// =============================================================================

struct ManagerInner<C, S>
where
    C: SearchAnalyticsClient,
    S: RecordStore,
{
    ctx: Arc<SyncContext<C, S>>,
    registry: RwLock<Registry>,
}

/// Orchestrates background sync jobs.
///
/// # Type Parameters
///
/// * `C` - Reporting API client (e.g., `SearchConsoleClient`)
/// * `S` - Record store (e.g., `SqliteRecordStore`)
///
/// # Example
///
/// ```ignore
/// use siphon_core::{JobManager, SyncOptions};
///
/// let manager = JobManager::new(client, store);
/// let job_id = manager.start_sync("sc-domain:example.com", SyncOptions::default())?;
///
/// let status = manager.wait_for_completion(job_id).await?;
/// println!("{} ({} rows)", status.status, status.rows_inserted());
/// ```
pub struct JobManager<C, S>
where
    C: SearchAnalyticsClient,
    S: RecordStore,
{
    inner: Arc<ManagerInner<C, S>>,
}

impl<C, S> Clone for JobManager<C, S>
where
    C: SearchAnalyticsClient,
    S: RecordStore,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, S> JobManager<C, S>
where
    C: SearchAnalyticsClient,
    S: RecordStore,
{
    /// Creates a manager with default configuration that logs through `tracing`.
    pub fn new(client: C, store: S) -> Self {
        Self::with_config(
            client,
            store,
            SyncConfig::default(),
            RetentionPolicy::default(),
            Arc::new(TracingReporter),
        )
    }

    /// Creates a manager with custom configuration and reporter.
    pub fn with_config(
        client: C,
        store: S,
        config: SyncConfig,
        retention: RetentionPolicy,
        reporter: Arc<dyn SyncReporter>,
    ) -> Self {
        let write_lock = Arc::new(tokio::sync::Mutex::new(()));
        let property_slots = Semaphore::new(config.property_concurrency.max(1));
        let pruner = RetentionPruner::with_write_lock(store.clone(), retention, Arc::clone(&write_lock));
        let ctx = SyncContext {
            client,
            store,
            config,
            pruner,
            reporter,
            write_lock,
            property_slots,
        };
        Self {
            inner: Arc::new(ManagerInner {
                ctx: Arc::new(ctx),
                registry: RwLock::new(Registry::default()),
            }),
        }
    }

    /// A pruner sharing this manager's store write lock.
    pub fn pruner(&self) -> RetentionPruner<S> {
        self.inner.ctx.pruner.clone()
    }

    /// Starts syncing one property in the background.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidDateRange` when an explicit start falls
    /// after an explicit end.
    pub fn start_sync(
        &self,
        property: impl Into<String>,
        options: SyncOptions,
    ) -> Result<Uuid, AppError> {
        options.validate()?;
        Ok(self.launch(vec![options.for_property(property)]))
    }

    /// Discovers every accessible property and syncs all of them in one job.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NoProperties` when discovery finds nothing, or the
    /// discovery error itself.
    pub async fn start_sync_all(&self, options: SyncOptions) -> Result<Uuid, AppError> {
        options.validate()?;
        let properties = self.inner.ctx.client.list_properties().await?;
        if properties.is_empty() {
            return Err(AppError::NoProperties);
        }
        tracing::info!(count = properties.len(), "Discovered properties");
        self.start_sync_properties(properties, options)
    }

    /// Syncs an explicit list of properties in one job.
    ///
    /// An empty list produces a job that completes immediately with no results.
    pub fn start_sync_properties(
        &self,
        properties: Vec<String>,
        options: SyncOptions,
    ) -> Result<Uuid, AppError> {
        options.validate()?;
        let requests = properties
            .into_iter()
            .map(|p| options.for_property(p))
            .collect();
        Ok(self.launch(requests))
    }

    /// Returns the current status of a job.
    ///
    /// Unknown ids yield a failed-shaped view carrying an explanatory error.
    pub fn get_status(&self, job_id: Uuid) -> JobStatusView {
        match self.entry(job_id) {
            Some(entry) => entry.view(),
            None => JobStatusView::not_found(job_id),
        }
    }

    /// Returns every tracked job, oldest first.
    pub fn list_statuses(&self) -> Vec<JobStatusView> {
        let registry = self.read_registry();
        registry
            .order
            .iter()
            .filter_map(|id| registry.jobs.get(id))
            .map(|entry| entry.view())
            .collect()
    }

    /// Requests cancellation of a job.
    ///
    /// Returns `true` if the job exists and had not yet finished.
    pub fn cancel_job(&self, job_id: Uuid) -> bool {
        let Some(entry) = self.entry(job_id) else {
            return false;
        };
        let state = entry.state();
        if state.status.is_terminal() {
            return false;
        }
        entry.cancel.cancel();
        tracing::info!(%job_id, "Cancellation requested");
        true
    }

    /// Waits until a job reaches a terminal state and returns its final status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::JobNotFound` for unknown ids.
    pub async fn wait_for_completion(&self, job_id: Uuid) -> Result<JobStatusView, AppError> {
        let entry = self
            .entry(job_id)
            .ok_or_else(|| AppError::JobNotFound(job_id.to_string()))?;
        let mut rx = entry.done.subscribe();
        rx.wait_for(|done| *done)
            .await
            .map_err(|e| AppError::Generic(format!("Completion signal lost: {}", e)))?;
        Ok(entry.view())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, job_id: Uuid) -> Option<Arc<JobEntry>> {
        self.read_registry().jobs.get(&job_id).cloned()
    }

    fn launch(&self, requests: Vec<SyncRequest>) -> Uuid {
        let entry = Arc::new(JobEntry::new(requests));
        let job_id = entry.id;

        {
            let mut registry = self
                .inner
                .registry
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            registry.order.push_back(job_id);
            registry.jobs.insert(job_id, Arc::clone(&entry));
        }

        {
            let mut state = entry.state();
            state.status = JobStatus::Syncing;
            state.started_at = Some(Utc::now());
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run_job(entry).await;
        });

        job_id
    }
}

impl<C, S> ManagerInner<C, S>
where
    C: SearchAnalyticsClient,
    S: RecordStore,
{
    async fn run_job(&self, entry: Arc<JobEntry>) {
        let ctx = &self.ctx;
        ctx.reporter.report(SyncEvent::JobStarted {
            job_id: entry.id,
            properties: entry.requests.len(),
        });

        stream::iter(entry.requests.clone())
            .map(|request| {
                let ctx = Arc::clone(ctx);
                let entry = Arc::clone(&entry);
                async move {
                    let _slot = tokio::select! {
                        biased;
                        _ = entry.cancel.cancelled() => return,
                        slot = ctx.property_slots.acquire() => match slot {
                            Ok(slot) => slot,
                            Err(_) => return,
                        },
                    };
                    let result = pipeline::run_property(&ctx, &entry, request).await;
                    ctx.reporter.report(SyncEvent::PropertyFinished {
                        job_id: entry.id,
                        result: &result,
                    });
                    entry.push_result(result);
                }
            })
            .buffer_unordered(ctx.config.property_concurrency.max(1))
            .for_each(|()| futures::future::ready(()))
            .await;

        self.finish(&entry);
    }

    fn finish(&self, entry: &JobEntry) {
        let (status, error) = {
            let mut state = entry.state();
            let total = entry.requests.len();
            let failed = state
                .results
                .iter()
                .filter(|r| r.status == PropertyOutcome::Failed)
                .count();

            let status = if entry.cancel.is_cancelled() {
                JobStatus::Cancelled
            } else if total > 0 && failed == total {
                JobStatus::Failed
            } else {
                JobStatus::Completed
            };

            if status == JobStatus::Completed && failed > 0 {
                state.error = Some(format!("{} of {} properties failed", failed, total));
            }
            state.status = status;
            state.completed_at = Some(Utc::now());
            state.in_flight.clear();
            (status, state.error.clone())
        };

        self.ctx.reporter.report(SyncEvent::JobFinished {
            job_id: entry.id,
            status,
            error: error.as_deref(),
        });
        self.evict_history();
        entry.done.send_replace(true);
    }

    /// Drops the oldest terminal jobs beyond the history limit.
    fn evict_history(&self) {
        let limit = self.ctx.config.job_history_limit;
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Registry { order, jobs } = &mut *registry;

        let terminal: Vec<Uuid> = order
            .iter()
            .filter(|id| jobs.get(*id).is_some_and(|job| job.is_terminal()))
            .copied()
            .collect();
        if terminal.len() <= limit {
            return;
        }

        for id in terminal.iter().take(terminal.len() - limit) {
            jobs.remove(id);
            tracing::debug!(job_id = %id, "Evicted job from history");
        }
        order.retain(|id| jobs.contains_key(id));
    }
}
