//! End-to-end tests: JobManager writing through SqliteRecordStore.

use std::sync::Arc;

use siphon_core::{
    ApiRow, AppError, Dimension, JobManager, JobStatus, PropertyOutcome, QueryPage, QueryRequest,
    RetentionPolicy, SearchAnalyticsClient, SilentReporter, SyncConfig, SyncOptions,
};

use crate::integration::common::{date, setup_test_store};

const PROPERTY: &str = "sc-domain:example.com";

/// Serves two rows per day for every requested date.
#[derive(Clone)]
struct FixedClient;

impl SearchAnalyticsClient for FixedClient {
    async fn query(&self, _property: &str, request: &QueryRequest) -> Result<QueryPage, AppError> {
        let mut rows = Vec::new();
        let mut day = request.range.start;
        while day <= request.range.end {
            for device in ["DESKTOP", "MOBILE"] {
                let keys = request
                    .dimensions
                    .iter()
                    .map(|dim| match dim {
                        Dimension::Date => day.format("%Y-%m-%d").to_string(),
                        Dimension::Device => device.to_string(),
                        Dimension::Query => "siphon".to_string(),
                        Dimension::Page => "https://example.com/".to_string(),
                        Dimension::Country => "usa".to_string(),
                    })
                    .collect();
                rows.push(ApiRow {
                    keys,
                    clicks: 1.0,
                    impressions: 10.0,
                    ctr: 0.1,
                    position: 2.0,
                });
            }
            day = day.succ_opt().unwrap();
        }

        let page = rows
            .into_iter()
            .skip(request.start_row)
            .take(request.row_limit)
            .collect();
        Ok(QueryPage { rows: page })
    }

    async fn list_properties(&self) -> Result<Vec<String>, AppError> {
        Ok(vec![PROPERTY.to_string()])
    }
}

/// Rejects every query with a non-retryable error.
#[derive(Clone)]
struct RejectingClient;

impl SearchAnalyticsClient for RejectingClient {
    async fn query(&self, _property: &str, _request: &QueryRequest) -> Result<QueryPage, AppError> {
        Err(AppError::ApiError {
            status: 400,
            message: "invalid dimension filter".to_string(),
        })
    }

    async fn list_properties(&self) -> Result<Vec<String>, AppError> {
        Ok(vec![PROPERTY.to_string()])
    }
}

fn manager(store: siphon_db::SqliteRecordStore) -> JobManager<FixedClient, siphon_db::SqliteRecordStore> {
    manager_with(FixedClient, store)
}

fn manager_with<C: SearchAnalyticsClient>(
    client: C,
    store: siphon_db::SqliteRecordStore,
) -> JobManager<C, siphon_db::SqliteRecordStore> {
    let config = SyncConfig::default()
        .with_concurrency(1, 3)
        .with_chunk_days(7)
        .with_page_size(5);
    JobManager::with_config(
        client,
        store,
        config,
        RetentionPolicy::default(),
        Arc::new(SilentReporter),
    )
}

#[tokio::test]
async fn test_sync_persists_rows_and_bookkeeping() {
    let store = setup_test_store().await;
    let manager = manager(store.clone());

    let options = SyncOptions::default()
        .with_start(date("2024-01-01"))
        .with_end(date("2024-01-31"));
    let job_id = manager.start_sync_all(options.clone()).await.unwrap();
    let status = manager.wait_for_completion(job_id).await.unwrap();

    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.results[0].status, PropertyOutcome::Success);
    assert_eq!(status.results[0].rows_inserted, 62);

    let records = store.fetch_records(PROPERTY).await.unwrap();
    assert_eq!(records.len(), 62);
    assert_eq!(records[0].date, date("2024-01-01"));
    assert_eq!(records[61].date, date("2024-01-31"));

    // 31 days in chunks of 7
    let logs = store.list_sync_logs(PROPERTY, 100).await.unwrap();
    assert_eq!(logs.len(), 5);
    assert!(logs.iter().all(|l| l.status == "completed"));
    let logged: i64 = logs.iter().map(|l| l.rows_inserted).sum();
    assert_eq!(logged, 62);

    let property = store.get_property_status(PROPERTY).await.unwrap().unwrap();
    assert_eq!(property.sync_status, "synced");

    // Re-running the same range leaves the table unchanged
    let job_id = manager.start_sync_all(options).await.unwrap();
    manager.wait_for_completion(job_id).await.unwrap();
    assert_eq!(store.fetch_records(PROPERTY).await.unwrap(), records);
}

#[tokio::test]
async fn test_resume_continues_from_stored_rows() {
    let store = setup_test_store().await;
    let manager = manager(store.clone());

    let first = manager
        .start_sync(
            PROPERTY,
            SyncOptions::default()
                .with_start(date("2024-01-01"))
                .with_end(date("2024-01-10")),
        )
        .unwrap();
    manager.wait_for_completion(first).await.unwrap();

    // No start date: resumes the day after the last stored one
    let second = manager
        .start_sync(PROPERTY, SyncOptions::default().with_end(date("2024-01-15")))
        .unwrap();
    let status = manager.wait_for_completion(second).await.unwrap();

    let result = &status.results[0];
    let range = result.range.unwrap();
    assert_eq!(range.start, date("2024-01-11"));
    assert_eq!(range.end, date("2024-01-15"));
    assert_eq!(result.rows_inserted, 10);
    assert_eq!(store.fetch_records(PROPERTY).await.unwrap().len(), 30);
}

#[tokio::test]
async fn test_failed_sync_is_recorded_on_the_property() {
    let store = setup_test_store().await;
    let rejecting = manager_with(RejectingClient, store.clone());

    let job_id = rejecting
        .start_sync(
            PROPERTY,
            SyncOptions::default()
                .with_start(date("2024-01-01"))
                .with_end(date("2024-01-10")),
        )
        .unwrap();
    let status = rejecting.wait_for_completion(job_id).await.unwrap();

    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(status.results[0].status, PropertyOutcome::Failed);

    let property = store.get_property_status(PROPERTY).await.unwrap().unwrap();
    assert_eq!(property.sync_status, "failed");
    assert!(property.last_synced_at.is_none());

    // A later successful run moves it back to synced
    let manager = manager(store.clone());
    let job_id = manager
        .start_sync(
            PROPERTY,
            SyncOptions::default()
                .with_start(date("2024-01-01"))
                .with_end(date("2024-01-10")),
        )
        .unwrap();
    manager.wait_for_completion(job_id).await.unwrap();

    let property = store.get_property_status(PROPERTY).await.unwrap().unwrap();
    assert_eq!(property.sync_status, "synced");
    assert!(property.last_synced_at.is_some());
}
