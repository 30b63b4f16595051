//! Client for the EMSC FDSN event web service.
use std::fmt;
use std::time;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::FeedError;

const FEED_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// The `[start, end)` range of origin times requested from the feed in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format(FEED_TIME_FORMAT),
            self.end.format(FEED_TIME_FORMAT)
        )
    }
}

/// Geographic filter applied by the feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

/// The properties of one feed feature, before any coercion.
///
/// Numbers are kept as raw JSON values: the feed has been seen sending numeric strings, and the
/// normalizer decides per record what is acceptable.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawRecord {
    pub unid: String,
    pub time: String,
    pub lat: serde_json::Value,
    pub lon: serde_json::Value,
    #[serde(default)]
    pub mag: serde_json::Value,
    #[serde(default)]
    pub depth: serde_json::Value,
    #[serde(default)]
    pub flynn_region: Option<String>,
}

/// Records parsed from one feed response, plus how many features had to be discarded.
#[derive(Debug, Default)]
pub struct FetchedBatch {
    pub records: Vec<RawRecord>,
    pub skipped: usize,
}

#[async_trait]
pub trait EventFeed: Send + Sync {
    /// Fetch the records whose origin time falls in `window`. One request, no retries.
    async fn fetch(
        &self,
        window: &FetchWindow,
        bounding_box: &BoundingBox,
        timeout: time::Duration,
    ) -> Result<FetchedBatch, FeedError>;
}

#[derive(Deserialize)]
struct FeedDocument {
    features: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct Feature {
    properties: RawRecord,
}

/// Parse a feed response body. Features missing required properties are counted and skipped,
/// a body that is not a feed document at all fails the whole call.
pub fn parse_feed_body(body: &str) -> Result<FetchedBatch, FeedError> {
    let document: FeedDocument = serde_json::from_str(body)
        .map_err(|error| FeedError::MalformedResponse(error.to_string()))?;

    let mut batch = FetchedBatch {
        records: Vec::with_capacity(document.features.len()),
        skipped: 0,
    };

    for feature in document.features {
        let id = feature
            .get("id")
            .and_then(|id| id.as_str())
            .unwrap_or("<no id>")
            .to_owned();

        match serde_json::from_value::<Feature>(feature) {
            Ok(feature) => batch.records.push(feature.properties),
            Err(error) => {
                warn!("skipping feed feature {}: {}", id, error);
                batch.skipped += 1;
            }
        }
    }

    Ok(batch)
}

/// `EventFeed` over HTTP.
pub struct FeedClient {
    client: reqwest::Client,
    url: url::Url,
    min_magnitude: f64,
}

impl FeedClient {
    pub fn new(
        url: url::Url,
        user_agent: &str,
        min_magnitude: f64,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;

        Ok(Self {
            client,
            url,
            min_magnitude,
        })
    }
}

fn request_error(error: reqwest::Error, timeout: time::Duration) -> FeedError {
    if error.is_timeout() {
        FeedError::Timeout(timeout)
    } else {
        FeedError::Network(error)
    }
}

#[async_trait]
impl EventFeed for FeedClient {
    async fn fetch(
        &self,
        window: &FetchWindow,
        bounding_box: &BoundingBox,
        timeout: time::Duration,
    ) -> Result<FetchedBatch, FeedError> {
        let query = [
            ("starttime", window.start.format(FEED_TIME_FORMAT).to_string()),
            ("endtime", window.end.format(FEED_TIME_FORMAT).to_string()),
            ("minlat", bounding_box.min_latitude.to_string()),
            ("maxlat", bounding_box.max_latitude.to_string()),
            ("minlon", bounding_box.min_longitude.to_string()),
            ("maxlon", bounding_box.max_longitude.to_string()),
            ("minmag", self.min_magnitude.to_string()),
            ("format", "json".to_owned()),
        ];

        let response = self
            .client
            .get(self.url.clone())
            .query(&query)
            .timeout(timeout)
            .send()
            .await
            .map_err(|error| request_error(error, timeout))?;

        let status = response.status();
        // FDSN services answer 204 when nothing matches the query.
        if status == StatusCode::NO_CONTENT {
            debug!("feed returned no events for {}", window);
            return Ok(FetchedBatch::default());
        }
        if !status.is_success() {
            return Err(FeedError::Service(status));
        }

        let body = response
            .text()
            .await
            .map_err(|error| request_error(error, timeout))?;

        parse_feed_body(&body)
    }
}
