//! Integration tests for JobManager sync behaviour using mocks.

use std::time::Duration;

use siphon_core::{
    AppError, DateRange, Dimension, JobStatus, PropertyOutcome, SearchType, SyncConfig,
    SyncLogStatus, SyncOptions,
};
use uuid::Uuid;

use crate::integration::common::{
    MockClient, MockStore, RowTemplate, date, days_ago, manager, record,
};

const PROPERTY: &str = "sc-domain:example.com";

/// Small pages and chunks so a few days exercise paging and chunking.
fn test_config() -> SyncConfig {
    SyncConfig::default()
        .with_concurrency(2, 2)
        .with_chunk_days(3)
        .with_page_size(4)
}

fn ten_days_of_january() -> SyncOptions {
    SyncOptions::default()
        .with_start(date("2024-01-01"))
        .with_end(date("2024-01-10"))
}

// =============================================================================
// Single-property sync
// =============================================================================

#[tokio::test]
async fn test_sync_pages_through_every_chunk() {
    let client = MockClient::new();
    let store = MockStore::new();
    let manager = manager(client.clone(), store.clone(), test_config());

    let job_id = manager.start_sync(PROPERTY, ten_days_of_january()).unwrap();
    let status = manager.wait_for_completion(job_id).await.unwrap();

    assert_eq!(status.status, JobStatus::Completed);
    assert!(status.error.is_none());
    assert!(status.completed_at.is_some());
    assert_eq!(status.results.len(), 1);

    let result = &status.results[0];
    assert_eq!(result.status, PropertyOutcome::Success);
    assert_eq!(result.rows_fetched, 30);
    assert_eq!(result.rows_inserted, 30);
    assert_eq!(
        result.range,
        Some(DateRange::new(date("2024-01-01"), date("2024-01-10")).unwrap())
    );
    assert_eq!(store.len(), 30);

    // 4 chunks (9, 9, 9, 3 rows) at 4 rows per page: 3 + 3 + 3 + 1 calls
    assert_eq!(client.call_count(), 10);
    assert_eq!(status.progress.api_calls_made, 10);
    assert_eq!(status.progress.rows_fetched, 30);
    assert_eq!(status.progress.properties_completed, 1);
    assert!(status.progress.current_properties.is_empty());
}

#[tokio::test]
async fn test_status_is_syncing_immediately_after_start() {
    let client = MockClient::new().with_delay(Duration::from_millis(200));
    let manager = manager(client, MockStore::new(), test_config());

    let job_id = manager.start_sync(PROPERTY, ten_days_of_january()).unwrap();
    let status = manager.get_status(job_id);

    assert_eq!(status.id, job_id);
    assert_eq!(status.status, JobStatus::Syncing);
    assert!(status.started_at.is_some());
    assert!(status.completed_at.is_none());
    assert_eq!(status.properties.len(), 1);
    assert_eq!(status.properties[0].property, PROPERTY);

    assert!(manager.cancel_job(job_id));
    manager.wait_for_completion(job_id).await.unwrap();
}

#[tokio::test]
async fn test_every_chunk_gets_a_sync_log_entry() {
    let store = MockStore::new();
    let manager = manager(MockClient::new(), store.clone(), test_config());

    let job_id = manager.start_sync(PROPERTY, ten_days_of_january()).unwrap();
    manager.wait_for_completion(job_id).await.unwrap();

    let logs = store.logs();
    assert_eq!(logs.len(), 4);
    for log in &logs {
        assert_eq!(log.entry.property, PROPERTY);
        assert_eq!(log.entry.dimensions, Dimension::ALL.to_vec());
        let update = log.update.as_ref().expect("log entry should be closed");
        assert_eq!(update.status, SyncLogStatus::Completed);
        assert!(update.error.is_none());
    }
    let inserted: u64 = logs
        .iter()
        .map(|l| l.update.as_ref().unwrap().rows_inserted)
        .sum();
    assert_eq!(inserted, 30);

    assert_eq!(*store.marked_syncing.lock().unwrap(), vec![PROPERTY]);
    assert_eq!(*store.marked_synced.lock().unwrap(), vec![PROPERTY]);
}

#[tokio::test]
async fn test_dimensions_always_include_date() {
    let client = MockClient::new();
    let store = MockStore::new();
    let manager = manager(client.clone(), store.clone(), test_config());

    let options = ten_days_of_january()
        .with_dimensions(vec![Dimension::Query])
        .with_search_type(SearchType::Image);
    let job_id = manager.start_sync(PROPERTY, options).unwrap();
    manager.wait_for_completion(job_id).await.unwrap();

    for (_, request) in client.recorded_calls() {
        assert_eq!(request.dimensions, vec![Dimension::Date, Dimension::Query]);
        assert_eq!(request.search_type, SearchType::Image);
        assert_eq!(request.row_limit, 4);
    }
    let records = store.snapshot();
    assert_eq!(records.len(), 30);
    assert!(records.iter().all(|r| r.search_type == SearchType::Image));
    assert!(records.iter().all(|r| r.page.is_none() && r.country.is_none()));
}

// =============================================================================
// Resume and skip
// =============================================================================

#[tokio::test]
async fn test_resume_starts_after_last_stored_date() {
    let client = MockClient::new();
    let store = MockStore::new();
    store.seed(vec![record(PROPERTY, days_ago(10), "seed", Some("usa"), 5, 50)]);
    let manager = manager(client.clone(), store.clone(), test_config());

    let job_id = manager.start_sync(PROPERTY, SyncOptions::default()).unwrap();
    let status = manager.wait_for_completion(job_id).await.unwrap();

    let result = &status.results[0];
    assert_eq!(result.status, PropertyOutcome::Success);
    assert_eq!(
        result.range,
        Some(DateRange::new(days_ago(9), days_ago(3)).unwrap())
    );

    let calls = client.recorded_calls();
    assert!(!calls.is_empty());
    let earliest = calls.iter().map(|(_, r)| r.range.start).min().unwrap();
    let latest = calls.iter().map(|(_, r)| r.range.end).max().unwrap();
    assert_eq!(earliest, days_ago(9));
    assert_eq!(latest, days_ago(3));

    // 7 days x 3 rows, plus the seed
    assert_eq!(result.rows_inserted, 21);
    assert_eq!(store.len(), 22);
}

#[tokio::test]
async fn test_resume_skips_when_store_is_current() {
    let client = MockClient::new();
    let store = MockStore::new();
    store.seed(vec![record(PROPERTY, days_ago(3), "seed", Some("usa"), 5, 50)]);
    let manager = manager(client.clone(), store.clone(), test_config());

    let job_id = manager.start_sync(PROPERTY, SyncOptions::default()).unwrap();
    let status = manager.wait_for_completion(job_id).await.unwrap();

    assert_eq!(status.status, JobStatus::Completed);
    assert!(status.error.is_none());
    let result = &status.results[0];
    assert_eq!(result.status, PropertyOutcome::Skipped);
    assert_eq!(result.rows_fetched, 0);
    assert_eq!(result.rows_inserted, 0);
    assert!(result.pruning.is_none());

    assert_eq!(client.call_count(), 0);
    assert!(store.logs().is_empty());
    assert!(store.marked_synced.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_store_falls_back_to_default_lookback() {
    let client = MockClient::new();
    let config = test_config().with_default_lookback_days(5);
    let manager = manager(client.clone(), MockStore::new(), config);

    let job_id = manager.start_sync(PROPERTY, SyncOptions::default()).unwrap();
    let status = manager.wait_for_completion(job_id).await.unwrap();

    let result = &status.results[0];
    assert_eq!(
        result.range,
        Some(DateRange::new(days_ago(5), days_ago(3)).unwrap())
    );
    assert_eq!(result.rows_inserted, 9);
}

#[tokio::test]
async fn test_explicit_start_ignores_stored_data() {
    let client = MockClient::new();
    let store = MockStore::new();
    store.seed(vec![record(PROPERTY, date("2024-01-08"), "seed", Some("usa"), 5, 50)]);
    let manager = manager(client.clone(), store, test_config());

    let job_id = manager.start_sync(PROPERTY, ten_days_of_january()).unwrap();
    let status = manager.wait_for_completion(job_id).await.unwrap();

    assert_eq!(status.results[0].rows_fetched, 30);
}

// =============================================================================
// Idempotence
// =============================================================================

#[tokio::test]
async fn test_resync_of_stored_range_changes_nothing() {
    let store = MockStore::new();
    let manager = manager(MockClient::new(), store.clone(), test_config());

    let first = manager.start_sync(PROPERTY, ten_days_of_january()).unwrap();
    manager.wait_for_completion(first).await.unwrap();
    let before = store.snapshot();

    let second = manager.start_sync(PROPERTY, ten_days_of_january()).unwrap();
    let status = manager.wait_for_completion(second).await.unwrap();

    assert_eq!(status.status, JobStatus::Completed);
    // The store reports attempted writes, overwrites included
    assert_eq!(status.results[0].rows_inserted, 30);
    assert_eq!(store.snapshot(), before);
    assert_eq!(store.len(), 30);
}

// =============================================================================
// Failure isolation
// =============================================================================

#[tokio::test]
async fn test_one_failing_property_does_not_fail_the_job() {
    let client = MockClient::new().failing_properties(&["b"]);
    let store = MockStore::new();
    let manager = manager(client, store.clone(), test_config());

    let properties = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let job_id = manager
        .start_sync_properties(properties, ten_days_of_january())
        .unwrap();
    let status = manager.wait_for_completion(job_id).await.unwrap();

    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.error.as_deref(), Some("1 of 3 properties failed"));
    assert_eq!(status.results.len(), 3);
    assert_eq!(status.count_outcome(PropertyOutcome::Success), 2);
    assert_eq!(status.count_outcome(PropertyOutcome::Failed), 1);

    let failed = status
        .results
        .iter()
        .find(|r| r.property == "b")
        .unwrap();
    let message = failed.error.as_deref().unwrap();
    assert!(message.starts_with("4 of 4 chunks failed:"), "{}", message);
    assert!(message.contains("403"), "{}", message);

    assert_eq!(store.count_for("a"), 30);
    assert_eq!(store.count_for("b"), 0);
    assert_eq!(store.count_for("c"), 30);
}

#[tokio::test]
async fn test_final_status_is_recorded_for_every_started_property() {
    let client = MockClient::new().failing_properties(&["b"]);
    let store = MockStore::new();
    let manager = manager(client, store.clone(), test_config());

    let job_id = manager
        .start_sync_properties(vec!["a".into(), "b".into()], ten_days_of_january())
        .unwrap();
    manager.wait_for_completion(job_id).await.unwrap();

    let mut finished = store.finished();
    finished.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!(
        finished,
        vec![
            ("a".to_string(), PropertyOutcome::Success),
            ("b".to_string(), PropertyOutcome::Failed),
        ]
    );
    // Only the property that wrote rows gets a new last-synced time
    assert_eq!(*store.marked_synced.lock().unwrap(), vec!["a".to_string()]);
}

#[tokio::test]
async fn test_job_fails_when_every_property_fails() {
    let client = MockClient::new().failing_properties(&["a", "b"]);
    let manager = manager(client, MockStore::new(), test_config());

    let job_id = manager
        .start_sync_properties(vec!["a".into(), "b".into()], ten_days_of_january())
        .unwrap();
    let status = manager.wait_for_completion(job_id).await.unwrap();

    assert_eq!(status.status, JobStatus::Failed);
    assert!(status.error.is_none());
    assert_eq!(status.count_outcome(PropertyOutcome::Failed), 2);
}

#[tokio::test]
async fn test_failed_chunk_keeps_sibling_chunks() {
    let client = MockClient::new().failing_chunk_starts(&[date("2024-01-04")]);
    let store = MockStore::new();
    let manager = manager(client, store.clone(), test_config());

    let job_id = manager.start_sync(PROPERTY, ten_days_of_january()).unwrap();
    let status = manager.wait_for_completion(job_id).await.unwrap();

    let result = &status.results[0];
    assert_eq!(result.status, PropertyOutcome::Failed);
    assert_eq!(
        result.error.as_deref(),
        Some("1 of 4 chunks failed: Upstream server error: HTTP 503")
    );
    assert_eq!(result.rows_inserted, 21);
    assert_eq!(store.len(), 21);
    // Single property, and it failed
    assert_eq!(status.status, JobStatus::Failed);

    let failed_logs: Vec<_> = store
        .logs()
        .into_iter()
        .filter(|l| l.update.as_ref().unwrap().status == SyncLogStatus::Failed)
        .collect();
    assert_eq!(failed_logs.len(), 1);
    assert_eq!(failed_logs[0].entry.range.start, date("2024-01-04"));
}

#[tokio::test]
async fn test_resume_lookup_error_fails_only_that_property() {
    let store = MockStore::new().failing_resume_for("b");
    let manager = manager(MockClient::new(), store, test_config().with_default_lookback_days(4));

    let job_id = manager
        .start_sync_properties(vec!["a".into(), "b".into()], SyncOptions::default())
        .unwrap();
    let status = manager.wait_for_completion(job_id).await.unwrap();

    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.error.as_deref(), Some("1 of 2 properties failed"));
    let failed = status.results.iter().find(|r| r.property == "b").unwrap();
    assert_eq!(failed.status, PropertyOutcome::Failed);
    assert_eq!(failed.error.as_deref(), Some("Error: store unavailable"));
}

// =============================================================================
// Job creation
// =============================================================================

#[tokio::test]
async fn test_empty_job_completes_with_no_results() {
    let manager = manager(MockClient::new(), MockStore::new(), test_config());

    let job_id = manager
        .start_sync_properties(Vec::new(), SyncOptions::default())
        .unwrap();
    let status = manager.wait_for_completion(job_id).await.unwrap();

    assert_eq!(status.status, JobStatus::Completed);
    assert!(status.results.is_empty());
    assert!(status.error.is_none());
}

#[tokio::test]
async fn test_start_sync_rejects_inverted_range() {
    let manager = manager(MockClient::new(), MockStore::new(), test_config());
    let options = SyncOptions::default()
        .with_start(date("2024-02-01"))
        .with_end(date("2024-01-01"));

    let result = manager.start_sync(PROPERTY, options.clone());
    assert!(matches!(result, Err(AppError::InvalidDateRange(_))));

    let result = manager.start_sync_all(options).await;
    assert!(matches!(result, Err(AppError::InvalidDateRange(_))));
    assert!(manager.list_statuses().is_empty());
}

#[tokio::test]
async fn test_start_sync_all_covers_discovered_properties() {
    let client = MockClient::new().with_properties(&["sc-domain:a.com", "https://b.com/"]);
    let store = MockStore::new();
    let manager = manager(client, store.clone(), test_config());

    let job_id = manager.start_sync_all(ten_days_of_january()).await.unwrap();
    let status = manager.wait_for_completion(job_id).await.unwrap();

    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.properties.len(), 2);
    assert_eq!(status.results.len(), 2);
    assert_eq!(store.count_for("sc-domain:a.com"), 30);
    assert_eq!(store.count_for("https://b.com/"), 30);
}

#[tokio::test]
async fn test_start_sync_all_without_properties_is_an_error() {
    let manager = manager(MockClient::new(), MockStore::new(), test_config());

    let result = manager.start_sync_all(SyncOptions::default()).await;
    assert!(matches!(result, Err(AppError::NoProperties)));
}

// =============================================================================
// Status queries and registry
// =============================================================================

#[tokio::test]
async fn test_unknown_job_yields_failed_shaped_status() {
    let manager = manager(MockClient::new(), MockStore::new(), test_config());
    let id = Uuid::new_v4();

    let status = manager.get_status(id);
    assert_eq!(status.id, id);
    assert_eq!(status.status, JobStatus::Failed);
    assert!(status.error.unwrap().contains("not found"));

    assert!(!manager.cancel_job(id));
    assert!(matches!(
        manager.wait_for_completion(id).await,
        Err(AppError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_of_finished_job_is_rejected() {
    let manager = manager(MockClient::new(), MockStore::new(), test_config());

    let job_id = manager.start_sync(PROPERTY, ten_days_of_january()).unwrap();
    manager.wait_for_completion(job_id).await.unwrap();

    assert!(!manager.cancel_job(job_id));
    let status = manager.get_status(job_id);
    assert_eq!(status.status, JobStatus::Completed);
    assert!(!status.cancelled);
}

#[tokio::test]
async fn test_history_keeps_most_recent_terminal_jobs() {
    let config = test_config().with_job_history_limit(2);
    let manager = manager(MockClient::new(), MockStore::new(), config);

    let mut ids = Vec::new();
    for _ in 0..4 {
        let id = manager.start_sync(PROPERTY, ten_days_of_january()).unwrap();
        manager.wait_for_completion(id).await.unwrap();
        ids.push(id);
    }

    let tracked: Vec<Uuid> = manager.list_statuses().iter().map(|s| s.id).collect();
    assert_eq!(tracked, vec![ids[2], ids[3]]);
    assert_eq!(manager.get_status(ids[0]).status, JobStatus::Failed);
    assert!(manager.get_status(ids[0]).error.is_some());
    assert_eq!(manager.get_status(ids[3]).status, JobStatus::Completed);
}

#[tokio::test]
async fn test_active_job_is_never_evicted() {
    let slow_client = MockClient::new().with_delay(Duration::from_secs(30));
    let config = test_config().with_job_history_limit(0);
    let manager = manager(slow_client, MockStore::new(), config);

    let slow = manager.start_sync(PROPERTY, ten_days_of_january()).unwrap();
    let empty = manager
        .start_sync_properties(Vec::new(), SyncOptions::default())
        .unwrap();
    manager.wait_for_completion(empty).await.unwrap();

    let tracked = manager.list_statuses();
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].id, slow);
    assert_eq!(tracked[0].status, JobStatus::Syncing);
    assert!(manager.get_status(empty).error.is_some());

    assert!(manager.cancel_job(slow));
    let status = tokio::time::timeout(Duration::from_secs(5), manager.wait_for_completion(slow))
        .await
        .expect("cancelled job should finish promptly")
        .unwrap();
    assert_eq!(status.status, JobStatus::Cancelled);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_in_flight_fetches_bounded_by_both_limits() {
    let client = MockClient::new()
        .with_delay(Duration::from_millis(20))
        .with_template(RowTemplate {
            rows_per_day: 1,
            ..RowTemplate::default()
        });
    let store = MockStore::new();
    let config = SyncConfig::default()
        .with_concurrency(2, 3)
        .with_chunk_days(1)
        .with_page_size(10);
    let manager = manager(client.clone(), store.clone(), config);

    let properties: Vec<String> = (0..5).map(|i| format!("property-{}", i)).collect();
    let job_id = manager
        .start_sync_properties(properties, ten_days_of_january())
        .unwrap();
    let status = manager.wait_for_completion(job_id).await.unwrap();

    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.results.len(), 5);
    assert_eq!(client.call_count(), 50);

    let max = client.max_in_flight();
    assert!(max <= 6, "saw {} concurrent fetches, limit is 6", max);
    assert!(max > 3, "properties should overlap, saw only {}", max);

    // Fetches overlap, writes never do
    assert_eq!(store.max_concurrent_writes(), 1);
    assert_eq!(store.len(), 50);
}

#[tokio::test]
async fn test_property_limit_is_shared_across_jobs() {
    let client = MockClient::new()
        .with_delay(Duration::from_millis(20))
        .with_template(RowTemplate {
            rows_per_day: 1,
            ..RowTemplate::default()
        });
    let store = MockStore::new();
    let config = SyncConfig::default()
        .with_concurrency(1, 1)
        .with_chunk_days(2)
        .with_page_size(10);
    let manager = manager(client.clone(), store.clone(), config);

    let first = manager.start_sync("a", ten_days_of_january()).unwrap();
    let second = manager.start_sync("b", ten_days_of_january()).unwrap();
    let first = manager.wait_for_completion(first).await.unwrap();
    let second = manager.wait_for_completion(second).await.unwrap();

    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(client.call_count(), 10);
    assert_eq!(client.max_in_flight(), 1);
    assert_eq!(store.count_for("a"), 10);
    assert_eq!(store.count_for("b"), 10);
}

#[tokio::test]
async fn test_store_writes_never_overlap() {
    // Zero-click rows in the target country: retention deletes and compacts
    // while sibling properties are still writing batches and sync logs.
    let client = MockClient::new()
        .with_delay(Duration::from_millis(5))
        .with_template(RowTemplate {
            rows_per_day: 2,
            clicks: 0.0,
            impressions: 2.0,
            country: "usa",
        });
    let store = MockStore::new();
    let config = SyncConfig::default()
        .with_concurrency(3, 3)
        .with_chunk_days(1)
        .with_page_size(10);
    let manager = manager(client, store.clone(), config);

    let properties: Vec<String> = (0..4).map(|i| format!("property-{}", i)).collect();
    let job_id = manager
        .start_sync_properties(properties, ten_days_of_january())
        .unwrap();
    let status = manager.wait_for_completion(job_id).await.unwrap();

    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.count_outcome(PropertyOutcome::Success), 4);
    assert!(status.results.iter().all(|r| r.pruning.is_some()));
    assert_eq!(store.logs().len(), 40);
    assert_eq!(store.finished().len(), 4);
    assert_eq!(store.max_concurrent_writes(), 1);
}

// =============================================================================
// Retention after sync
// =============================================================================

#[tokio::test]
async fn test_retention_runs_after_rows_are_written() {
    let client = MockClient::new().with_template(RowTemplate {
        rows_per_day: 3,
        clicks: 0.0,
        impressions: 3.0,
        country: "usa",
    });
    let store = MockStore::new();
    let manager = manager(client, store.clone(), test_config());

    let options = SyncOptions::default()
        .with_start(date("2024-01-01"))
        .with_end(date("2024-01-03"));
    let job_id = manager.start_sync(PROPERTY, options).unwrap();
    let status = manager.wait_for_completion(job_id).await.unwrap();

    let result = &status.results[0];
    assert_eq!(result.status, PropertyOutcome::Success);
    assert_eq!(result.rows_inserted, 9);

    let pruning = result.pruning.as_ref().expect("retention should run");
    assert_eq!(pruning.deleted_target, 9);
    assert!(pruning.compacted);
    assert_eq!(store.len(), 0);
    assert_eq!(
        store
            .compactions
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn test_retention_failure_does_not_fail_sync() {
    let client = MockClient::new().with_template(RowTemplate {
        clicks: 0.0,
        impressions: 1.0,
        ..RowTemplate::default()
    });
    let store = MockStore::new().failing_deletes();
    let manager = manager(client, store.clone(), test_config());

    let job_id = manager.start_sync(PROPERTY, ten_days_of_january()).unwrap();
    let status = manager.wait_for_completion(job_id).await.unwrap();

    assert_eq!(status.status, JobStatus::Completed);
    assert!(status.error.is_none());
    let result = &status.results[0];
    assert_eq!(result.status, PropertyOutcome::Success);
    assert!(result.pruning.is_none());
    assert_eq!(store.len(), 30);
}
