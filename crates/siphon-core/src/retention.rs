//! Retention pruning of low-value historical rows.
//!
//! Two deletion rules run in one pass over rows older than the policy's
//! protection window:
//!
//! 1. target rows (country in the target set) with zero clicks and fewer
//!    impressions than `target_min_impressions`;
//! 2. when enabled, every non-target row with zero clicks.
//!
//! A row with clicks is never deleted. When anything was removed the store
//! is compacted and its statistics refreshed. [`RetentionPruner::preview`]
//! runs the same predicates as counts without touching data.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::RetentionPolicy;
use crate::error::AppError;
use crate::models::Record;
use crate::traits::RecordStore;

/// Row selection used by retention counts and deletions.
///
/// Every variant is scoped to one property by the store call it is passed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowPredicate<'a> {
    /// Every row.
    All,
    /// Rows dated on or after the cutoff.
    Recent { cutoff: NaiveDate },
    /// Rows dated before the cutoff that have clicks.
    OldWithClicks { cutoff: NaiveDate },
    /// Deletion rule 1.
    TargetLowImpressions {
        cutoff: NaiveDate,
        targets: &'a BTreeSet<String>,
        min_impressions: i64,
    },
    /// Deletion rule 2.
    NonTargetZeroClicks {
        cutoff: NaiveDate,
        targets: &'a BTreeSet<String>,
    },
}

impl RowPredicate<'_> {
    /// Evaluates the predicate against an in-memory record.
    ///
    /// Stores backed by a query language must select exactly the rows this
    /// returns `true` for.
    pub fn matches(&self, record: &Record) -> bool {
        let is_target = |targets: &BTreeSet<String>| {
            record
                .country
                .as_deref()
                .is_some_and(|c| targets.contains(c))
        };
        match self {
            RowPredicate::All => true,
            RowPredicate::Recent { cutoff } => record.date >= *cutoff,
            RowPredicate::OldWithClicks { cutoff } => record.date < *cutoff && record.clicks > 0,
            RowPredicate::TargetLowImpressions {
                cutoff,
                targets,
                min_impressions,
            } => {
                record.date < *cutoff
                    && record.clicks == 0
                    && record.impressions < *min_impressions
                    && is_target(targets)
            }
            RowPredicate::NonTargetZeroClicks { cutoff, targets } => {
                record.date < *cutoff && record.clicks == 0 && !is_target(targets)
            }
        }
    }
}

/// Read-only breakdown of what a prune would do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrunePreview {
    pub property: String,
    pub cutoff: Option<NaiveDate>,
    pub total_rows: u64,
    pub protected_recent: u64,
    pub with_clicks: u64,
    pub would_delete_target: u64,
    pub would_delete_non_target: u64,
    pub would_keep: u64,
}

impl PrunePreview {
    pub fn would_delete(&self) -> u64 {
        self.would_delete_target + self.would_delete_non_target
    }
}

/// What a prune actually removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneSummary {
    pub property: String,
    pub deleted_target: u64,
    pub deleted_non_target: u64,
    pub compacted: bool,
}

impl PruneSummary {
    pub fn total_deleted(&self) -> u64 {
        self.deleted_target + self.deleted_non_target
    }
}

/// Applies a [`RetentionPolicy`] to a [`RecordStore`].
///
/// Pruning holds the store write lock for its whole duration, so it never
/// overlaps a batch write made under the same lock.
pub struct RetentionPruner<S: RecordStore> {
    store: S,
    policy: RetentionPolicy,
    write_lock: Arc<Mutex<()>>,
}

impl<S: RecordStore> Clone for RetentionPruner<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            policy: self.policy.clone(),
            write_lock: Arc::clone(&self.write_lock),
        }
    }
}

impl<S: RecordStore> RetentionPruner<S> {
    /// Creates a pruner with its own write lock.
    pub fn new(store: S, policy: RetentionPolicy) -> Self {
        Self::with_write_lock(store, policy, Arc::new(Mutex::new(())))
    }

    /// Creates a pruner sharing an existing store write lock.
    pub fn with_write_lock(store: S, policy: RetentionPolicy, write_lock: Arc<Mutex<()>>) -> Self {
        Self {
            store,
            policy,
            write_lock,
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// First date outside the protection window; older rows are eligible.
    pub fn cutoff(&self) -> NaiveDate {
        let today = Utc::now().date_naive();
        today
            .checked_sub_days(Days::new(u64::from(self.policy.recent_days)))
            .unwrap_or(NaiveDate::MIN)
    }

    fn target_rule(&self, cutoff: NaiveDate) -> RowPredicate<'_> {
        RowPredicate::TargetLowImpressions {
            cutoff,
            targets: &self.policy.target_classification,
            min_impressions: self.policy.target_min_impressions,
        }
    }

    fn non_target_rule(&self, cutoff: NaiveDate) -> RowPredicate<'_> {
        RowPredicate::NonTargetZeroClicks {
            cutoff,
            targets: &self.policy.target_classification,
        }
    }

    /// Counts what [`prune`](Self::prune) would delete and keep.
    pub async fn preview(&self, property: &str) -> Result<PrunePreview, AppError> {
        let cutoff = self.cutoff();
        let total_rows = self.store.count_where(property, &RowPredicate::All).await?;
        let protected_recent = self
            .store
            .count_where(property, &RowPredicate::Recent { cutoff })
            .await?;
        let with_clicks = self
            .store
            .count_where(property, &RowPredicate::OldWithClicks { cutoff })
            .await?;
        let would_delete_target = self
            .store
            .count_where(property, &self.target_rule(cutoff))
            .await?;
        let would_delete_non_target = if self.policy.prune_non_target_zero_clicks {
            self.store
                .count_where(property, &self.non_target_rule(cutoff))
                .await?
        } else {
            0
        };

        Ok(PrunePreview {
            property: property.to_string(),
            cutoff: Some(cutoff),
            total_rows,
            protected_recent,
            with_clicks,
            would_delete_target,
            would_delete_non_target,
            would_keep: total_rows.saturating_sub(would_delete_target + would_delete_non_target),
        })
    }

    /// Deletes rows per the policy, then compacts if anything was removed.
    pub async fn prune(&self, property: &str) -> Result<PruneSummary, AppError> {
        let cutoff = self.cutoff();
        let _guard = self.write_lock.lock().await;

        let deleted_target = self
            .store
            .delete_where(property, &self.target_rule(cutoff))
            .await?;
        let deleted_non_target = if self.policy.prune_non_target_zero_clicks {
            self.store
                .delete_where(property, &self.non_target_rule(cutoff))
                .await?
        } else {
            0
        };

        let mut summary = PruneSummary {
            property: property.to_string(),
            deleted_target,
            deleted_non_target,
            compacted: false,
        };

        if summary.total_deleted() > 0 {
            self.store.compact().await?;
            self.store.refresh_statistics().await?;
            summary.compacted = true;
        }

        tracing::info!(
            property,
            cutoff = %cutoff,
            deleted_target,
            deleted_non_target,
            compacted = summary.compacted,
            "Retention prune finished"
        );

        Ok(summary)
    }

    /// Previews every property known to the store.
    pub async fn preview_all(&self) -> Result<Vec<PrunePreview>, AppError> {
        let mut previews = Vec::new();
        for property in self.store.list_properties().await? {
            previews.push(self.preview(&property).await?);
        }
        Ok(previews)
    }

    /// Prunes every property known to the store.
    ///
    /// A failure on one property is logged and does not stop the others.
    pub async fn prune_all(&self) -> Result<Vec<PruneSummary>, AppError> {
        let mut summaries = Vec::new();
        for property in self.store.list_properties().await? {
            match self.prune(&property).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => tracing::warn!(property, error = %e, "Retention prune failed"),
            }
        }
        Ok(summaries)
    }
}
