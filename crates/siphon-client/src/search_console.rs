//! Client for the Search Console search analytics API.
//!
//! Two endpoints are used:
//!
//! - `POST sites/{property}/searchAnalytics/query` - one page of rows
//! - `GET sites` - properties the credentials can read

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use siphon_core::HttpConfig;
use siphon_core::error::AppError;
use siphon_core::models::{ApiRow, DATE_FORMAT, QueryPage, QueryRequest};
use tokio::time::sleep;
use url::Url;

/// Public endpoint of the reporting API.
pub const DEFAULT_API_BASE: &str = "https://searchconsole.googleapis.com/webmasters/v3/";

/// Permission level of properties the user has not verified.
const UNVERIFIED_PERMISSION: &str = "siteUnverifiedUser";

/// Body of a search analytics query.
#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
struct QueryBody {
    start_date: String,
    end_date: String,
    dimensions: Vec<&'static str>,
    row_limit: usize,
    start_row: usize,
    #[serde(rename = "type")]
    search_type: &'static str,
}

impl QueryBody {
    fn from_request(request: &QueryRequest) -> Self {
        Self {
            start_date: request.range.start.format(DATE_FORMAT).to_string(),
            end_date: request.range.end.format(DATE_FORMAT).to_string(),
            dimensions: request.dimensions.iter().map(|d| d.as_str()).collect(),
            row_limit: request.row_limit,
            start_row: request.start_row,
            search_type: request.search_type.as_str(),
        }
    }
}

/// Response of a search analytics query. `rows` is omitted past the last page.
#[derive(Deserialize, Debug)]
struct QueryResponse {
    #[serde(default)]
    rows: Vec<ApiRow>,
}

#[derive(Deserialize, Debug)]
struct SitesResponse {
    #[serde(default, rename = "siteEntry")]
    site_entry: Vec<SiteEntry>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SiteEntry {
    site_url: String,
    permission_level: String,
}

/// HTTP client for the search analytics reporting API.
///
/// # Examples
///
/// ```no_run
/// use siphon_client::{DEFAULT_API_BASE, SearchConsoleClient};
/// use siphon_core::HttpConfig;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = SearchConsoleClient::new(DEFAULT_API_BASE, "ya29.token", HttpConfig::default())?;
/// let properties = client.list_sites().await?;
/// println!("Found {} properties", properties.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SearchConsoleClient {
    client: Client,
    base_url: Url,
    access_token: String,
    http: HttpConfig,
}

impl SearchConsoleClient {
    /// Creates a client for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidUrl` if the URL is malformed or cannot carry
    /// a path. Returns `AppError::ClientError` if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        access_token: impl Into<String>,
        http: HttpConfig,
    ) -> Result<Self, AppError> {
        let base_url =
            Url::parse(base_url).map_err(|_| AppError::InvalidUrl(base_url.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder()
            .user_agent(concat!("siphon/", env!("CARGO_PKG_VERSION")))
            .timeout(http.timeout())
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            access_token: access_token.into(),
            http,
        })
    }

    /// Builds `{base}/{segments...}`, percent-encoding every segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Fetches one page of rows for `property`.
    ///
    /// # Errors
    ///
    /// Returns the last retryable error once `max_attempts` is exhausted, or
    /// `AppError::ApiError` with the response body for any other failure status.
    pub async fn query_page(
        &self,
        property: &str,
        request: &QueryRequest,
    ) -> Result<QueryPage, AppError> {
        let url = self.endpoint(&["sites", property, "searchAnalytics", "query"])?;
        let body = QueryBody::from_request(request);

        let resp = self
            .request_with_retry(|| {
                self.client
                    .post(url.clone())
                    .bearer_auth(&self.access_token)
                    .json(&body)
            })
            .await?;

        let parsed: QueryResponse = resp
            .json()
            .await
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        tracing::debug!(
            property,
            range = %request.range,
            start_row = request.start_row,
            rows = parsed.rows.len(),
            "Fetched page"
        );

        Ok(QueryPage { rows: parsed.rows })
    }

    /// Lists every verified property the credentials can read.
    pub async fn list_sites(&self) -> Result<Vec<String>, AppError> {
        let url = self.endpoint(&["sites"])?;

        let resp = self
            .request_with_retry(|| {
                self.client
                    .get(url.clone())
                    .bearer_auth(&self.access_token)
            })
            .await?;

        let sites: SitesResponse = resp
            .json()
            .await
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(sites
            .site_entry
            .into_iter()
            .filter(|site| site.permission_level != UNVERIFIED_PERMISSION)
            .map(|site| site.site_url)
            .collect())
    }

    /// Delay requested by a `Retry-After` header in seconds, if any.
    fn retry_after(resp: &Response) -> Option<Duration> {
        resp.headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Sends a request, retrying rate limits, transient server errors and
    /// transport failures with exponential backoff.
    ///
    /// `build` is called once per attempt since a `RequestBuilder` is consumed
    /// by sending.
    async fn request_with_retry<F>(&self, build: F) -> Result<Response, AppError>
    where
        F: Fn() -> RequestBuilder,
    {
        let max_attempts = self.http.max_attempts.max(1);
        let mut last_error = AppError::Generic("No attempts made".to_string());

        for attempt in 1..=max_attempts {
            let mut delay = self.http.backoff_delay(attempt);

            match build().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }

                    let retryable = matches!(
                        status,
                        StatusCode::TOO_MANY_REQUESTS
                            | StatusCode::INTERNAL_SERVER_ERROR
                            | StatusCode::BAD_GATEWAY
                            | StatusCode::SERVICE_UNAVAILABLE
                    );
                    if !retryable {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(AppError::from_status(status.as_u16(), body));
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        if let Some(requested) = Self::retry_after(&resp) {
                            delay = requested.min(self.http.max_delay());
                        }
                    }
                    last_error = AppError::from_status(status.as_u16(), "");
                }
                Err(e) => {
                    if e.is_timeout() {
                        last_error = AppError::Timeout(self.http.timeout_secs);
                    } else if e.is_connect() {
                        last_error = AppError::NetworkError(format!("Connection failed: {}", e));
                    } else {
                        return Err(AppError::ClientError(e.to_string()));
                    }
                }
            }

            if attempt < max_attempts {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "Request failed, retrying"
                );
                sleep(delay).await;
            }
        }

        tracing::warn!(max_attempts, error = %last_error, "Giving up after retries");
        Err(last_error)
    }
}

// =============================================================================
// Trait Implementation: SearchAnalyticsClient
// =============================================================================

impl siphon_core::traits::SearchAnalyticsClient for SearchConsoleClient {
    async fn query(&self, property: &str, request: &QueryRequest) -> Result<QueryPage, AppError> {
        SearchConsoleClient::query_page(self, property, request).await
    }

    async fn list_properties(&self) -> Result<Vec<String>, AppError> {
        SearchConsoleClient::list_sites(self).await
    }
}
