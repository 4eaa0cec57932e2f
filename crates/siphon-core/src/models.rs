//! Domain models shared by the orchestrator, the fetch client and the store.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Format used for dates on the wire and in storage.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// =============================================================================
// Dimensions and search type
// =============================================================================

/// A dimension the reporting API can group rows by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Date,
    Query,
    Page,
    Device,
    Country,
}

impl Dimension {
    /// Every dimension, in storage column order.
    pub const ALL: [Dimension; 5] = [
        Dimension::Date,
        Dimension::Query,
        Dimension::Page,
        Dimension::Device,
        Dimension::Country,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Date => "date",
            Dimension::Query => "query",
            Dimension::Page => "page",
            Dimension::Device => "device",
            Dimension::Country => "country",
        }
    }

    /// Returns `dimensions` with `date` guaranteed present (prepended if missing)
    /// and duplicates removed, preserving caller order otherwise.
    pub fn normalize(dimensions: &[Dimension]) -> Vec<Dimension> {
        let mut out = Vec::with_capacity(dimensions.len() + 1);
        if !dimensions.contains(&Dimension::Date) {
            out.push(Dimension::Date);
        }
        for dim in dimensions {
            if !out.contains(dim) {
                out.push(*dim);
            }
        }
        out
    }

    /// Joins dimension names with commas, as recorded in the sync log.
    pub fn join(dimensions: &[Dimension]) -> String {
        dimensions
            .iter()
            .map(Dimension::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "date" => Ok(Dimension::Date),
            "query" => Ok(Dimension::Query),
            "page" => Ok(Dimension::Page),
            "device" => Ok(Dimension::Device),
            "country" => Ok(Dimension::Country),
            _ => Err(AppError::ConfigError(format!(
                "Unknown dimension: '{}'. Valid options: date, query, page, device, country",
                s
            ))),
        }
    }
}

/// The upstream search type, used as the sync sub-type filter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum SearchType {
    #[default]
    Web,
    Image,
    Video,
    News,
    Discover,
    GoogleNews,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Web => "web",
            SearchType::Image => "image",
            SearchType::Video => "video",
            SearchType::News => "news",
            SearchType::Discover => "discover",
            SearchType::GoogleNews => "googleNews",
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "web" => Ok(SearchType::Web),
            "image" => Ok(SearchType::Image),
            "video" => Ok(SearchType::Video),
            "news" => Ok(SearchType::News),
            "discover" => Ok(SearchType::Discover),
            "googlenews" => Ok(SearchType::GoogleNews),
            _ => Err(AppError::ConfigError(format!(
                "Unknown search type: '{}'. Valid options: web, image, video, news, discover, googleNews",
                s
            ))),
        }
    }
}

// =============================================================================
// Date ranges
// =============================================================================

/// An inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Creates a range, rejecting `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, AppError> {
        if start > end {
            return Err(AppError::InvalidDateRange(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of days covered, counting both endpoints.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

// =============================================================================
// Upstream wire shapes
// =============================================================================

/// Parameters for one page of a search analytics query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub range: DateRange,
    pub dimensions: Vec<Dimension>,
    pub start_row: usize,
    pub row_limit: usize,
    pub search_type: SearchType,
}

/// A single row as returned by the reporting API.
///
/// `keys` are positionally matched to the requested dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRow {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub clicks: f64,
    #[serde(default)]
    pub impressions: f64,
    #[serde(default)]
    pub ctr: f64,
    #[serde(default)]
    pub position: f64,
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    pub rows: Vec<ApiRow>,
}

// =============================================================================
// Stored records
// =============================================================================

/// One stored observation.
///
/// Identity is `(property, search_type, date, query, page, device, country)`;
/// writing a record with an existing identity replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub property: String,
    pub search_type: SearchType,
    pub date: NaiveDate,
    pub query: Option<String>,
    pub page: Option<String>,
    pub device: Option<String>,
    pub country: Option<String>,
    pub clicks: i64,
    pub impressions: i64,
    pub ctr: f64,
    pub position: f64,
}

// =============================================================================
// Sync requests
// =============================================================================

/// Optional bounds and filters shared by every property of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub dimensions: Option<Vec<Dimension>>,
    pub search_type: Option<SearchType>,
}

impl SyncOptions {
    pub fn with_start(mut self, start: NaiveDate) -> Self {
        self.start_date = Some(start);
        self
    }

    pub fn with_end(mut self, end: NaiveDate) -> Self {
        self.end_date = Some(end);
        self
    }

    pub fn with_dimensions(mut self, dimensions: Vec<Dimension>) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn with_search_type(mut self, search_type: SearchType) -> Self {
        self.search_type = Some(search_type);
        self
    }

    /// Rejects an explicit start that falls after an explicit end.
    pub fn validate(&self) -> Result<(), AppError> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            DateRange::new(start, end)?;
        }
        Ok(())
    }

    /// Builds the request for one property.
    pub fn for_property(&self, property: impl Into<String>) -> SyncRequest {
        SyncRequest {
            property: property.into(),
            start_date: self.start_date,
            end_date: self.end_date,
            dimensions: self.dimensions.clone(),
            search_type: self.search_type,
        }
    }
}

/// What the caller asked to sync for one property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub property: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub dimensions: Option<Vec<Dimension>>,
    pub search_type: Option<SearchType>,
}

impl SyncRequest {
    /// Creates a request that resumes from the store and uses all defaults.
    pub fn new(property: impl Into<String>) -> Self {
        SyncOptions::default().for_property(property)
    }

    /// The effective search type, defaulting to web.
    pub fn search_type(&self) -> SearchType {
        self.search_type.unwrap_or_default()
    }

    /// The effective dimension list, always containing `date`.
    pub fn dimensions(&self) -> Vec<Dimension> {
        match &self.dimensions {
            Some(dims) if !dims.is_empty() => Dimension::normalize(dims),
            _ => Dimension::ALL.to_vec(),
        }
    }
}

// =============================================================================
// Sync log
// =============================================================================

/// Outcome recorded in a sync log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncLogStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SyncLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncLogStatus::Running => "running",
            SyncLogStatus::Completed => "completed",
            SyncLogStatus::Failed => "failed",
            SyncLogStatus::Cancelled => "cancelled",
        }
    }
}

/// A sync log entry created when a chunk starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSyncLog {
    pub property: String,
    pub search_type: SearchType,
    pub dimensions: Vec<Dimension>,
    pub range: DateRange,
}

/// The fields written back to a sync log entry when its chunk finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncLogUpdate {
    pub status: SyncLogStatus,
    pub rows_fetched: u64,
    pub rows_inserted: u64,
    pub error: Option<String>,
}
