//! Record repository for SQLite.
//!
//! Dates are stored as `YYYY-MM-DD` text so `MAX(date)` and range
//! comparisons work lexically. Absent dimensions are stored as `''` and read
//! back as `None`; NULLs would never collide under the uniqueness constraint.

use std::str::FromStr;

use chrono::NaiveDate;
use siphon_core::error::AppError;
use siphon_core::job::PropertyOutcome;
use siphon_core::models::{
    DATE_FORMAT, Dimension, NewSyncLog, Record, SearchType, SyncLogUpdate,
};
use siphon_core::retention::RowPredicate;
use siphon_core::DbConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

/// Schema statements, run in order on every connect.
/// Each statement must be executed separately.
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS search_analytics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        property TEXT NOT NULL,
        search_type TEXT NOT NULL DEFAULT 'web',
        date TEXT NOT NULL,
        query TEXT NOT NULL DEFAULT '',
        page TEXT NOT NULL DEFAULT '',
        device TEXT NOT NULL DEFAULT '',
        country TEXT NOT NULL DEFAULT '',
        clicks INTEGER NOT NULL DEFAULT 0,
        impressions INTEGER NOT NULL DEFAULT 0,
        ctr REAL NOT NULL DEFAULT 0,
        position REAL NOT NULL DEFAULT 0,
        fetched_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (property, search_type, date, query, page, device, country)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_search_analytics_property_date ON search_analytics(property, date)",
    r#"CREATE TABLE IF NOT EXISTS properties (
        property TEXT PRIMARY KEY,
        sync_status TEXT NOT NULL DEFAULT 'idle',
        last_synced_at TEXT,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sync_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        property TEXT NOT NULL,
        search_type TEXT NOT NULL,
        dimensions TEXT NOT NULL,
        start_date TEXT NOT NULL,
        end_date TEXT NOT NULL,
        rows_fetched INTEGER NOT NULL DEFAULT 0,
        rows_inserted INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        error TEXT,
        started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        completed_at TEXT
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_sync_log_property ON sync_log(property, started_at)",
];

/// Column list for record SELECT queries. Must remain a const literal
/// since format!() bypasses sqlx compile-time validation.
const RECORD_COLUMNS: &str =
    "property, search_type, date, query, page, device, country, clicks, impressions, ctr, position";

/// Rows per INSERT statement. 11 bound parameters per row stays well under
/// SQLite's variable limit.
const UPSERT_ROWS_PER_STATEMENT: usize = 500;

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(value: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| AppError::DatabaseError(sqlx::Error::Decode(Box::new(e))))
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// Repository for synced rows and sync bookkeeping in SQLite.
///
/// # Examples
///
/// ```no_run
/// use siphon_core::DbConfig;
/// use siphon_db::SqliteRecordStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = SqliteRecordStore::connect("sqlite://siphon.db", &DbConfig::default()).await?;
/// let properties = store.stored_properties().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Wraps an existing pool. Call [`init`](Self::init) before use.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if missing) the database and ensures the schema.
    ///
    /// In-memory databases get a single long-lived connection, since every
    /// SQLite connection to `:memory:` is a separate database.
    pub async fn connect(database_url: &str, config: &DbConfig) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool_options = if is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Creates tables and indexes if they do not exist.
    pub async fn init(&self) -> Result<(), AppError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Checks database connectivity by executing a simple query.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Inserts or replaces records, one transaction for the whole batch.
    pub async fn upsert_records(&self, records: &[Record]) -> Result<u64, AppError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for chunk in records.chunks(UPSERT_ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
                "INSERT OR REPLACE INTO search_analytics \
                 (property, search_type, date, query, page, device, country, \
                 clicks, impressions, ctr, position, fetched_at) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.property.as_str())
                    .push_bind(record.search_type.as_str())
                    .push_bind(format_date(record.date))
                    .push_bind(record.query.as_deref().unwrap_or(""))
                    .push_bind(record.page.as_deref().unwrap_or(""))
                    .push_bind(record.device.as_deref().unwrap_or(""))
                    .push_bind(record.country.as_deref().unwrap_or(""))
                    .push_bind(record.clicks)
                    .push_bind(record.impressions)
                    .push_bind(record.ctr)
                    .push_bind(record.position)
                    .push("CURRENT_TIMESTAMP");
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        tracing::debug!(rows = records.len(), "Upserted batch");
        Ok(records.len() as u64)
    }

    /// Returns a property's stored records ordered by date.
    pub async fn fetch_records(&self, property: &str) -> Result<Vec<Record>, AppError> {
        let query = format!(
            "SELECT {} FROM search_analytics WHERE property = ? \
             ORDER BY date, query, page, device, country",
            RECORD_COLUMNS
        );
        let rows: Vec<RecordRow> = sqlx::query_as(&query)
            .bind(property)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(RecordRow::into_record).collect()
    }

    /// Latest stored date for a property and search type.
    pub async fn max_date(
        &self,
        property: &str,
        search_type: SearchType,
    ) -> Result<Option<NaiveDate>, AppError> {
        let max: Option<String> = sqlx::query_scalar(
            "SELECT MAX(date) FROM search_analytics WHERE property = ? AND search_type = ?",
        )
        .bind(property)
        .bind(search_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        max.as_deref().map(parse_date).transpose()
    }

    /// Lists every property with stored records.
    pub async fn stored_properties(&self) -> Result<Vec<String>, AppError> {
        let properties =
            sqlx::query_scalar("SELECT DISTINCT property FROM search_analytics ORDER BY property")
                .fetch_all(&self.pool)
                .await?;
        Ok(properties)
    }

    /// Counts a property's records matching `predicate`.
    pub async fn count_matching(
        &self,
        property: &str,
        predicate: &RowPredicate<'_>,
    ) -> Result<u64, AppError> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM search_analytics ");
        push_filter(&mut builder, property, predicate);
        let count: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    /// Deletes a property's records matching `predicate`.
    pub async fn delete_matching(
        &self,
        property: &str,
        predicate: &RowPredicate<'_>,
    ) -> Result<u64, AppError> {
        let mut builder = QueryBuilder::new("DELETE FROM search_analytics ");
        push_filter(&mut builder, property, predicate);
        let result = builder.build().execute(&self.pool).await?;
        tracing::debug!(property, deleted = result.rows_affected(), "Deleted records");
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Property markers
    // =========================================================================

    async fn upsert_property_status(
        &self,
        property: &str,
        sync_status: &str,
        touch_last_synced: bool,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO properties (property, sync_status, last_synced_at, updated_at)
            VALUES (?1, ?2, CASE WHEN ?3 THEN CURRENT_TIMESTAMP ELSE NULL END, CURRENT_TIMESTAMP)
            ON CONFLICT(property) DO UPDATE SET
                sync_status = excluded.sync_status,
                last_synced_at = CASE
                    WHEN ?3 THEN excluded.last_synced_at
                    ELSE properties.last_synced_at
                END,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(property)
        .bind(sync_status)
        .bind(touch_last_synced)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieves the bookkeeping row for a property.
    /// Returns None if this property has never been synced.
    pub async fn get_property_status(
        &self,
        property: &str,
    ) -> Result<Option<PropertySyncStatus>, AppError> {
        let status = sqlx::query_as::<_, PropertySyncStatus>(
            "SELECT property, sync_status, last_synced_at, updated_at FROM properties WHERE property = ?",
        )
        .bind(property)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status)
    }

    // =========================================================================
    // Sync log
    // =========================================================================

    /// Opens a sync log entry in the `running` state.
    pub async fn insert_sync_log(&self, entry: &NewSyncLog) -> Result<i64, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_log (property, search_type, dimensions, start_date, end_date, status)
            VALUES (?, ?, ?, ?, ?, 'running')
            "#,
        )
        .bind(&entry.property)
        .bind(entry.search_type.as_str())
        .bind(Dimension::join(&entry.dimensions))
        .bind(format_date(entry.range.start))
        .bind(format_date(entry.range.end))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Closes a sync log entry with its final counts and status.
    pub async fn close_sync_log(&self, id: i64, update: &SyncLogUpdate) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_log
            SET status = ?, rows_fetched = ?, rows_inserted = ?, error = ?,
                completed_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(update.status.as_str())
        .bind(update.rows_fetched as i64)
        .bind(update.rows_inserted as i64)
        .bind(&update.error)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Generic(format!("Sync log entry {} not found", id)));
        }
        Ok(())
    }

    /// Lists a property's sync log entries, newest first.
    pub async fn list_sync_logs(
        &self,
        property: &str,
        limit: usize,
    ) -> Result<Vec<SyncLogRow>, AppError> {
        let rows = sqlx::query_as::<_, SyncLogRow>(
            r#"
            SELECT id, property, search_type, dimensions, start_date, end_date,
                   rows_fetched, rows_inserted, status, error, started_at, completed_at
            FROM sync_log
            WHERE property = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(property)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Rebuilds the database file, reclaiming pages freed by deletes.
    pub async fn vacuum(&self) -> Result<(), AppError> {
        let started = std::time::Instant::now();
        sqlx::query("VACUUM").execute(&self.pool).await?;
        tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Vacuumed database");
        Ok(())
    }

    /// Refreshes the query planner's statistics.
    pub async fn analyze(&self) -> Result<(), AppError> {
        sqlx::query("ANALYZE").execute(&self.pool).await?;
        Ok(())
    }
}

/// Appends `WHERE property = ? AND <predicate>` to a query.
///
/// Selects exactly the rows [`RowPredicate::matches`] accepts, given that
/// absent countries are stored as `''`.
fn push_filter<'a>(
    builder: &mut QueryBuilder<'a, Sqlite>,
    property: &'a str,
    predicate: &RowPredicate<'a>,
) {
    builder.push("WHERE property = ").push_bind(property);

    match predicate {
        RowPredicate::All => {}
        RowPredicate::Recent { cutoff } => {
            builder.push(" AND date >= ").push_bind(format_date(*cutoff));
        }
        RowPredicate::OldWithClicks { cutoff } => {
            builder
                .push(" AND date < ")
                .push_bind(format_date(*cutoff))
                .push(" AND clicks > 0");
        }
        RowPredicate::TargetLowImpressions {
            cutoff,
            targets,
            min_impressions,
        } => {
            builder
                .push(" AND date < ")
                .push_bind(format_date(*cutoff))
                .push(" AND clicks = 0 AND impressions < ")
                .push_bind(*min_impressions);
            if targets.is_empty() {
                // No row is a target row
                builder.push(" AND 0");
            } else {
                builder.push(" AND country IN (");
                let mut list = builder.separated(", ");
                for target in *targets {
                    list.push_bind(target.as_str());
                }
                list.push_unseparated(")");
            }
        }
        RowPredicate::NonTargetZeroClicks { cutoff, targets } => {
            builder
                .push(" AND date < ")
                .push_bind(format_date(*cutoff))
                .push(" AND clicks = 0");
            if !targets.is_empty() {
                builder.push(" AND country NOT IN (");
                let mut list = builder.separated(", ");
                for target in *targets {
                    list.push_bind(target.as_str());
                }
                list.push_unseparated(")");
            }
        }
    }
}

/// Helper struct for deserializing record rows.
#[derive(sqlx::FromRow)]
struct RecordRow {
    property: String,
    search_type: String,
    date: String,
    query: String,
    page: String,
    device: String,
    country: String,
    clicks: i64,
    impressions: i64,
    ctr: f64,
    position: f64,
}

impl RecordRow {
    fn into_record(self) -> Result<Record, AppError> {
        Ok(Record {
            property: self.property,
            search_type: SearchType::from_str(&self.search_type)?,
            date: parse_date(&self.date)?,
            query: non_empty(self.query),
            page: non_empty(self.page),
            device: non_empty(self.device),
            country: non_empty(self.country),
            clicks: self.clicks,
            impressions: self.impressions,
            ctr: self.ctr,
            position: self.position,
        })
    }
}

/// Bookkeeping row for one property.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PropertySyncStatus {
    pub property: String,
    pub sync_status: String,
    pub last_synced_at: Option<String>,
    pub updated_at: String,
}

/// One chunk execution as recorded in the sync log.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncLogRow {
    pub id: i64,
    pub property: String,
    pub search_type: String,
    pub dimensions: String,
    pub start_date: String,
    pub end_date: String,
    pub rows_fetched: i64,
    pub rows_inserted: i64,
    pub status: String,
    pub error: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

// =============================================================================
// Trait Implementation: RecordStore
// =============================================================================

impl siphon_core::traits::RecordStore for SqliteRecordStore {
    async fn upsert_batch(&self, records: &[Record]) -> Result<u64, AppError> {
        SqliteRecordStore::upsert_records(self, records).await
    }

    async fn last_synced_date(
        &self,
        property: &str,
        search_type: SearchType,
    ) -> Result<Option<NaiveDate>, AppError> {
        SqliteRecordStore::max_date(self, property, search_type).await
    }

    async fn mark_syncing(&self, property: &str) -> Result<(), AppError> {
        self.upsert_property_status(property, "syncing", false).await
    }

    async fn mark_last_synced(&self, property: &str) -> Result<(), AppError> {
        self.upsert_property_status(property, "synced", true).await
    }

    async fn mark_sync_finished(
        &self,
        property: &str,
        outcome: PropertyOutcome,
    ) -> Result<(), AppError> {
        let status = match outcome {
            PropertyOutcome::Success | PropertyOutcome::Skipped => "synced",
            PropertyOutcome::Failed | PropertyOutcome::Cancelled => outcome.as_str(),
        };
        self.upsert_property_status(property, status, false).await
    }

    async fn create_sync_log(&self, entry: &NewSyncLog) -> Result<i64, AppError> {
        SqliteRecordStore::insert_sync_log(self, entry).await
    }

    async fn update_sync_log(&self, id: i64, update: &SyncLogUpdate) -> Result<(), AppError> {
        SqliteRecordStore::close_sync_log(self, id, update).await
    }

    async fn list_properties(&self) -> Result<Vec<String>, AppError> {
        SqliteRecordStore::stored_properties(self).await
    }

    async fn count_where(
        &self,
        property: &str,
        predicate: &RowPredicate<'_>,
    ) -> Result<u64, AppError> {
        SqliteRecordStore::count_matching(self, property, predicate).await
    }

    async fn delete_where(
        &self,
        property: &str,
        predicate: &RowPredicate<'_>,
    ) -> Result<u64, AppError> {
        SqliteRecordStore::delete_matching(self, property, predicate).await
    }

    async fn compact(&self) -> Result<(), AppError> {
        SqliteRecordStore::vacuum(self).await
    }

    async fn refresh_statistics(&self) -> Result<(), AppError> {
        SqliteRecordStore::analyze(self).await
    }
}
