//! Trait definitions for the orchestrator's external collaborators.
//!
//! The orchestrator never talks to HTTP or SQL directly. It is generic over
//! the two traits below, which lets the CLI plug in the real reporting API
//! client and SQLite store while tests use in-memory mocks.
//!
//! # Example
//!
//! ```
//! use siphon_core::traits::{RecordStore, SearchAnalyticsClient};
//! use siphon_core::{AppError, QueryRequest, transform};
//!
//! // Business logic uses traits, not concrete types
//! async fn copy_page<C, S>(
//!     client: &C,
//!     store: &S,
//!     property: &str,
//!     request: &QueryRequest,
//! ) -> Result<u64, AppError>
//! where
//!     C: SearchAnalyticsClient,
//!     S: RecordStore,
//! {
//!     let page = client.query(property, request).await?;
//!     let records = transform::to_records(
//!         property,
//!         request.search_type,
//!         &request.dimensions,
//!         &page.rows,
//!     );
//!     store.upsert_batch(&records).await
//! }
//! ```

use std::future::Future;

use chrono::NaiveDate;

use crate::error::AppError;
use crate::job::PropertyOutcome;
use crate::models::{NewSyncLog, QueryPage, QueryRequest, Record, SearchType, SyncLogUpdate};
use crate::retention::RowPredicate;

/// Client for the upstream search analytics reporting API.
///
/// Implementations own retry and backoff for transient failures. Callers
/// abort an in-flight request by dropping the returned future.
pub trait SearchAnalyticsClient: Send + Sync + Clone + 'static {
    /// Fetches one page of rows for `property`.
    ///
    /// An empty or short page (fewer rows than `request.row_limit`) is the
    /// last page of the range.
    fn query(
        &self,
        property: &str,
        request: &QueryRequest,
    ) -> impl Future<Output = Result<QueryPage, AppError>> + Send;

    /// Lists every property the credentials can read.
    fn list_properties(&self) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;
}

/// Store for synced records and sync bookkeeping.
///
/// Implementations must tolerate concurrent calls; the orchestrator
/// serializes the write-heavy methods (`upsert_batch`, `delete_where`,
/// `compact`) itself.
pub trait RecordStore: Send + Sync + Clone + 'static {
    /// Writes `records` in one transaction with insert-or-replace semantics.
    ///
    /// # Returns
    ///
    /// The number of records written, fresh inserts and overwrites alike.
    fn upsert_batch(&self, records: &[Record]) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Returns the latest stored date for a property and search type.
    fn last_synced_date(
        &self,
        property: &str,
        search_type: SearchType,
    ) -> impl Future<Output = Result<Option<NaiveDate>, AppError>> + Send;

    /// Flags a property as currently syncing.
    fn mark_syncing(&self, property: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Records a successful sync of a property at the current time.
    fn mark_last_synced(&self, property: &str)
    -> impl Future<Output = Result<(), AppError>> + Send;

    /// Records how the latest sync of a property ended. Leaves the
    /// last-synced time untouched.
    fn mark_sync_finished(
        &self,
        property: &str,
        outcome: PropertyOutcome,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Opens a sync log entry and returns its id.
    fn create_sync_log(
        &self,
        entry: &NewSyncLog,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Closes a sync log entry.
    fn update_sync_log(
        &self,
        id: i64,
        update: &SyncLogUpdate,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Lists every property with stored records.
    fn list_properties(&self) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;

    /// Counts a property's records matching `predicate`.
    fn count_where(
        &self,
        property: &str,
        predicate: &RowPredicate<'_>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Deletes a property's records matching `predicate`, returning the count.
    fn delete_where(
        &self,
        property: &str,
        predicate: &RowPredicate<'_>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Reclaims storage freed by deletions.
    fn compact(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Refreshes the query planner's statistics.
    fn refresh_statistics(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}
