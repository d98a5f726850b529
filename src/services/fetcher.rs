//! Upstream county retrieval and snapshot production
//!
//! A fetch either yields a complete snapshot built from at least one county
//! or fails as a whole. Pages are collected in full before normalization
//! starts, so nothing partial ever leaves this module.

use crate::services::normalizer::{normalize_batch, RejectionTally};
use crate::services::Aggregator;
use crate::types::{RawCountyRecord, Result, Snapshot, StatePopError};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// ArcGIS USA Census Counties feature layer query endpoint
pub const DEFAULT_UPSTREAM_URL: &str =
    "https://services.arcgis.com/P3ePLMYs2RVChkJx/ArcGIS/rest/services/USA_Census_Counties/FeatureServer/0/query";

/// HTTP request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Records requested per page (the service's transfer limit)
pub const DEFAULT_PAGE_SIZE: u32 = 2000;

/// Upper bound on pages per cycle
const MAX_PAGES: u32 = 50;

/// Source of raw county records for one refresh cycle
#[async_trait]
pub trait CountySource: Send + Sync {
    /// Source name for logs
    fn name(&self) -> &str;

    /// Retrieve every county for this cycle, or fail with `UpstreamUnavailable`
    async fn fetch_counties(&self) -> Result<Vec<RawCountyRecord>>;
}

/// One page of an ArcGIS feature query response
#[derive(Debug, Deserialize)]
pub struct FeaturePage {
    #[serde(default)]
    pub features: Option<Vec<Feature>>,
    #[serde(default, rename = "exceededTransferLimit")]
    pub exceeded_transfer_limit: bool,
    #[serde(default)]
    pub error: Option<ArcGisError>,
}

#[derive(Debug, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub attributes: Option<RawCountyRecord>,
}

/// Error object ArcGIS returns with an HTTP 200
#[derive(Debug, Deserialize)]
pub struct ArcGisError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Parse one response body into its county records and the "more pages" flag.
pub fn parse_page(body: &str) -> Result<(Vec<RawCountyRecord>, bool)> {
    let page: FeaturePage = serde_json::from_str(body)
        .map_err(|e| StatePopError::UpstreamUnavailable(format!("invalid payload: {}", e)))?;

    if let Some(err) = page.error {
        return Err(StatePopError::UpstreamUnavailable(format!(
            "service error {}: {}",
            err.code.map(|c| c.to_string()).unwrap_or_else(|| "?".into()),
            err.message.unwrap_or_default()
        )));
    }

    let features = page.features.ok_or_else(|| {
        StatePopError::UpstreamUnavailable("invalid payload: missing features".into())
    })?;

    let records = features
        .into_iter()
        .map(|f| f.attributes.unwrap_or_default())
        .collect();

    Ok((records, page.exceeded_transfer_limit))
}

/// Paginating client for the ArcGIS counties layer
pub struct ArcGisCountySource {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    page_size: u32,
}

impl ArcGisCountySource {
    pub fn new(url: impl Into<String>, timeout: Duration, page_size: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StatePopError::Config(format!("HTTP client error: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
            page_size: page_size.max(1),
        })
    }

    async fn fetch_page(&self, offset: u32) -> Result<(Vec<RawCountyRecord>, bool)> {
        let offset = offset.to_string();
        let count = self.page_size.to_string();
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("where", "1=1"),
                ("outFields", "POPULATION,STATE_NAME"),
                ("returnGeometry", "false"),
                ("f", "json"),
                ("resultOffset", offset.as_str()),
                ("resultRecordCount", count.as_str()),
            ])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StatePopError::UpstreamUnavailable(format!(
                "HTTP status {}",
                status
            )));
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        parse_page(&body)
    }

    fn transport_error(&self, e: reqwest::Error) -> StatePopError {
        if e.is_timeout() {
            StatePopError::UpstreamUnavailable(format!(
                "request timed out after {:?}",
                self.timeout
            ))
        } else {
            StatePopError::UpstreamUnavailable(format!("HTTP request failed: {}", e))
        }
    }
}

#[async_trait]
impl CountySource for ArcGisCountySource {
    fn name(&self) -> &str {
        "arcgis"
    }

    async fn fetch_counties(&self) -> Result<Vec<RawCountyRecord>> {
        let mut all = Vec::new();
        let mut offset: u32 = 0;

        for page in 0..MAX_PAGES {
            let (records, more) = self.fetch_page(offset).await?;
            let got = records.len() as u32;
            debug!(page, offset, got, more, "fetched county page");
            all.extend(records);

            if !more || got == 0 {
                return Ok(all);
            }
            offset = offset.saturating_add(got);
        }

        Err(StatePopError::UpstreamUnavailable(format!(
            "gave up after {} pages",
            MAX_PAGES
        )))
    }
}

/// Result of one successful fetch
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub snapshot: Snapshot,
    pub received: usize,
    pub accepted: usize,
    pub rejections: RejectionTally,
}

/// Normalize and aggregate a full batch.
///
/// Fails with `EmptyResult` when nothing survives, so an empty batch can
/// never replace a populated snapshot.
pub fn build_snapshot(raws: &[RawCountyRecord]) -> Result<FetchReport> {
    let (accepted, rejections) = normalize_batch(raws);

    if !rejections.is_empty() {
        warn!(
            rejected = rejections.total(),
            reasons = %rejections.summary(),
            "skipped corrupted county records"
        );
    }

    if accepted.is_empty() {
        return Err(StatePopError::EmptyResult {
            received: raws.len(),
            rejected: rejections.total(),
        });
    }

    Ok(FetchReport {
        snapshot: Aggregator::by_state(&accepted),
        received: raws.len(),
        accepted: accepted.len(),
        rejections,
    })
}

/// Drives a source through normalization and aggregation
#[derive(Clone)]
pub struct Fetcher {
    source: Arc<dyn CountySource>,
}

impl Fetcher {
    pub fn new(source: Arc<dyn CountySource>) -> Self {
        Self { source }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Run one fetch: retrieve, normalize, aggregate.
    pub async fn fetch(&self) -> Result<FetchReport> {
        let raws = self.source.fetch_counties().await?;
        build_snapshot(&raws)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StaticSource {
        records: Vec<RawCountyRecord>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CountySource for StaticSource {
        fn name(&self) -> &str {
            "static"
        }

        async fn fetch_counties(&self) -> Result<Vec<RawCountyRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.records.clone())
        }
    }

    struct DownSource;

    #[async_trait]
    impl CountySource for DownSource {
        fn name(&self) -> &str {
            "down"
        }

        async fn fetch_counties(&self) -> Result<Vec<RawCountyRecord>> {
            Err(StatePopError::UpstreamUnavailable("connection refused".into()))
        }
    }

    // ========== parse_page tests ==========

    #[test]
    fn test_parse_page_reads_attributes() {
        let body = json!({
            "features": [
                { "attributes": { "STATE_NAME": "Texas", "POPULATION": 100 } },
                { "attributes": { "STATE_NAME": "Ohio", "POPULATION": "50" } }
            ]
        })
        .to_string();

        let (records, more) = parse_page(&body).unwrap();

        assert!(!more);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].population, Some(json!("50")));
    }

    #[test]
    fn test_parse_page_transfer_limit_flag() {
        let body = r#"{"features":[],"exceededTransferLimit":true}"#;
        let (records, more) = parse_page(body).unwrap();
        assert!(records.is_empty());
        assert!(more);
    }

    #[test]
    fn test_parse_page_feature_without_attributes_is_kept_for_rejection() {
        let body = r#"{"features":[{"geometry":null}]}"#;
        let (records, _) = parse_page(body).unwrap();
        assert_eq!(records, vec![RawCountyRecord::default()]);
    }

    #[test]
    fn test_parse_page_missing_features_is_unavailable() {
        let err = parse_page(r#"{"fields":[]}"#).unwrap_err();
        assert!(matches!(err, StatePopError::UpstreamUnavailable(_)));
    }

    #[test]
    fn test_parse_page_service_error_is_unavailable() {
        let body = r#"{"error":{"code":400,"message":"Invalid query parameters"}}"#;
        let err = parse_page(body).unwrap_err();
        assert!(err.to_string().contains("Invalid query parameters"));
    }

    #[test]
    fn test_parse_page_not_json() {
        let err = parse_page("<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, StatePopError::UpstreamUnavailable(_)));
    }

    // ========== build_snapshot tests ==========

    #[test]
    fn test_build_snapshot_mixed_batch() {
        let raws = vec![
            RawCountyRecord::new("Texas", "100"),
            RawCountyRecord::new("Texas", 200),
            RawCountyRecord::new("Ohio", 50),
        ];

        let report = build_snapshot(&raws).unwrap();

        assert_eq!(report.snapshot, Snapshot::from_pairs([("Texas", 300), ("Ohio", 50)]));
        assert_eq!(report.received, 3);
        assert_eq!(report.accepted, 3);
        assert!(report.rejections.is_empty());
    }

    #[test]
    fn test_build_snapshot_rejected_records_leave_no_zero_entry() {
        let raws = vec![
            RawCountyRecord::new("Ohio", 50),
            RawCountyRecord::new("Iowa", "abc"),
        ];

        let report = build_snapshot(&raws).unwrap();

        assert_eq!(report.snapshot.get_exact("Iowa"), None);
        assert_eq!(report.snapshot.len(), 1);
        assert_eq!(report.rejections.total(), 1);
    }

    #[test]
    fn test_build_snapshot_all_rejected_is_empty_result() {
        let raws = vec![
            RawCountyRecord::new("", 10),
            RawCountyRecord::new("Iowa", "abc"),
        ];

        let err = build_snapshot(&raws).unwrap_err();

        assert!(matches!(
            err,
            StatePopError::EmptyResult {
                received: 2,
                rejected: 2
            }
        ));
    }

    #[test]
    fn test_build_snapshot_zero_records_is_empty_result() {
        let err = build_snapshot(&[]).unwrap_err();
        assert!(matches!(err, StatePopError::EmptyResult { received: 0, .. }));
    }

    // ========== Fetcher tests ==========

    #[tokio::test]
    async fn test_fetcher_success() {
        let source = Arc::new(StaticSource {
            records: vec![RawCountyRecord::new("Ohio", 50)],
            calls: AtomicUsize::new(0),
        });
        let fetcher = Fetcher::new(source.clone());

        let report = fetcher.fetch().await.unwrap();

        assert_eq!(report.snapshot.get_exact("Ohio"), Some(50));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.source_name(), "static");
    }

    #[tokio::test]
    async fn test_fetcher_propagates_upstream_failure() {
        let fetcher = Fetcher::new(Arc::new(DownSource));
        let err = fetcher.fetch().await.unwrap_err();
        assert!(matches!(err, StatePopError::UpstreamUnavailable(_)));
    }

    #[test]
    fn test_arcgis_source_clamps_page_size() {
        let source =
            ArcGisCountySource::new(DEFAULT_UPSTREAM_URL, Duration::from_secs(1), 0).unwrap();
        assert_eq!(source.page_size, 1);
        assert_eq!(source.name(), "arcgis");
    }

    // ========== ArcGisCountySource over a local upstream ==========

    /// Serve `app` on an ephemeral port and return its query URL.
    async fn serve_upstream(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/query", addr)
    }

    fn county_page(rows: &[(&str, u64)], more: bool) -> Value {
        let features: Vec<Value> = rows
            .iter()
            .map(|(state, population)| {
                json!({ "attributes": { "STATE_NAME": state, "POPULATION": population } })
            })
            .collect();
        json!({ "features": features, "exceededTransferLimit": more })
    }

    fn arcgis(url: &str, timeout: Duration, page_size: u32) -> ArcGisCountySource {
        ArcGisCountySource::new(url, timeout, page_size).unwrap()
    }

    #[tokio::test]
    async fn test_arcgis_follows_transfer_limit_across_pages() {
        let seen: Arc<Mutex<Vec<HashMap<String, String>>>> = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let app = Router::new().route(
            "/query",
            get(move |Query(params): Query<HashMap<String, String>>| {
                let log = log.clone();
                async move {
                    let offset = params.get("resultOffset").cloned().unwrap_or_default();
                    log.lock().unwrap().push(params);
                    match offset.as_str() {
                        "0" => Json(county_page(&[("Texas", 100), ("Ohio", 50)], true)),
                        "2" => Json(county_page(&[("Texas", 200)], false)),
                        _ => Json(county_page(&[("Nowhere", 1)], false)),
                    }
                }
            }),
        );
        let url = serve_upstream(app).await;

        let records = arcgis(&url, Duration::from_secs(5), 2)
            .fetch_counties()
            .await
            .unwrap();

        assert_eq!(
            records,
            vec![
                RawCountyRecord::new("Texas", 100),
                RawCountyRecord::new("Ohio", 50),
                RawCountyRecord::new("Texas", 200),
            ]
        );

        let seen = seen.lock().unwrap();
        let offsets: Vec<&str> = seen.iter().map(|p| p["resultOffset"].as_str()).collect();
        assert_eq!(offsets, vec!["0", "2"]);
        assert!(seen.iter().all(|p| p["resultRecordCount"] == "2"));
        assert_eq!(seen[0]["outFields"], "POPULATION,STATE_NAME");
        assert_eq!(seen[0]["f"], "json");
    }

    #[tokio::test]
    async fn test_arcgis_pages_feed_the_snapshot() {
        let app = Router::new().route(
            "/query",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                match params.get("resultOffset").map(String::as_str) {
                    Some("0") => Json(county_page(&[("Texas", 100)], true)),
                    _ => Json(county_page(&[("Texas", 200), ("Ohio", 50)], false)),
                }
            }),
        );
        let url = serve_upstream(app).await;
        let fetcher = Fetcher::new(Arc::new(arcgis(&url, Duration::from_secs(5), 1)));

        let report = fetcher.fetch().await.unwrap();

        assert_eq!(report.snapshot, Snapshot::from_pairs([("Texas", 300), ("Ohio", 50)]));
        assert_eq!(report.received, 3);
    }

    #[tokio::test]
    async fn test_arcgis_stops_on_empty_page_even_when_flagged() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/query",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(county_page(&[], true))
                }
            }),
        );
        let url = serve_upstream(app).await;

        let records = arcgis(&url, Duration::from_secs(5), 10)
            .fetch_counties()
            .await
            .unwrap();

        assert!(records.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_arcgis_gives_up_after_page_cap() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/query",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(county_page(&[("Ohio", 1)], true))
                }
            }),
        );
        let url = serve_upstream(app).await;

        let err = arcgis(&url, Duration::from_secs(5), 1)
            .fetch_counties()
            .await
            .unwrap_err();

        assert!(matches!(err, StatePopError::UpstreamUnavailable(_)));
        assert!(err.to_string().contains("gave up after 50 pages"));
        assert_eq!(hits.load(Ordering::SeqCst), MAX_PAGES as usize);
    }

    #[tokio::test]
    async fn test_arcgis_bad_gateway_is_unavailable() {
        let app = Router::new().route(
            "/query",
            get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        );
        let url = serve_upstream(app).await;

        let err = arcgis(&url, Duration::from_secs(5), 10)
            .fetch_counties()
            .await
            .unwrap_err();

        assert!(matches!(err, StatePopError::UpstreamUnavailable(_)));
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn test_arcgis_failure_on_later_page_discards_earlier_pages() {
        let app = Router::new().route(
            "/query",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                match params.get("resultOffset").map(String::as_str) {
                    Some("0") => (StatusCode::OK, Json(county_page(&[("Texas", 100)], true))),
                    _ => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({}))),
                }
            }),
        );
        let url = serve_upstream(app).await;
        let fetcher = Fetcher::new(Arc::new(arcgis(&url, Duration::from_secs(5), 1)));

        let err = fetcher.fetch().await.unwrap_err();

        assert!(matches!(err, StatePopError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn test_arcgis_slow_upstream_times_out() {
        let app = Router::new().route(
            "/query",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Json(county_page(&[("Ohio", 1)], false))
            }),
        );
        let url = serve_upstream(app).await;

        let err = arcgis(&url, Duration::from_millis(200), 10)
            .fetch_counties()
            .await
            .unwrap_err();

        assert!(matches!(err, StatePopError::UpstreamUnavailable(_)));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    #[ignore] // Network required
    async fn test_arcgis_reachable() {
        let source = ArcGisCountySource::new(
            DEFAULT_UPSTREAM_URL,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            DEFAULT_PAGE_SIZE,
        )
        .unwrap();
        let fetcher = Fetcher::new(Arc::new(source));
        let report = fetcher.fetch().await.unwrap();
        assert!(report.snapshot.len() >= 50);
    }
}
