//! Fakes for the external services, shared by unit and integration tests.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time;

use async_trait::async_trait;
use quake_common::event::CoordinateKey;
use reqwest::StatusCode;
use serde_json::json;

use crate::error::{FeedError, LocationError};
use crate::feed::{BoundingBox, EventFeed, FetchWindow, FetchedBatch, RawRecord};
use crate::geocode::ReverseGeocoder;

pub const TEST_BOUNDING_BOX: BoundingBox = BoundingBox {
    min_latitude: 35.0,
    max_latitude: 43.0,
    min_longitude: 25.0,
    max_longitude: 45.0,
};

pub fn raw_record(unid: &str, time: &str, latitude: f64, longitude: f64) -> RawRecord {
    RawRecord {
        unid: unid.to_owned(),
        time: time.to_owned(),
        lat: json!(latitude),
        lon: json!(longitude),
        mag: json!(4.5),
        depth: json!(10),
        flynn_region: Some("Test".to_owned()),
    }
}

/// Geocoder answering `Place near <key>`, or timing out while failing is set.
#[derive(Clone, Default)]
pub struct FakeGeocoder {
    calls: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    requested: Arc<Mutex<Vec<(f64, f64)>>>,
}

impl FakeGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<(f64, f64)> {
        self.requested.lock().expect("poisoned lock").clone()
    }
}

#[async_trait]
impl ReverseGeocoder for FakeGeocoder {
    async fn reverse(
        &self,
        latitude: f64,
        longitude: f64,
        timeout: time::Duration,
    ) -> Result<String, LocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested
            .lock()
            .expect("poisoned lock")
            .push((latitude, longitude));

        if self.failing.load(Ordering::SeqCst) {
            return Err(LocationError::Timeout(timeout));
        }

        Ok(format!(
            "Place near {}",
            CoordinateKey::new(latitude, longitude, 2)
        ))
    }
}

/// A scripted feed response.
#[derive(Clone)]
pub enum FakeResponse {
    Records(Vec<RawRecord>),
    /// Hangs for the whole request timeout, then fails.
    Timeout,
    Unavailable,
}

/// Feed replaying scripted responses in order, then `fallback` forever. Records every window it
/// was asked for.
#[derive(Clone)]
pub struct FakeFeed {
    script: Arc<Mutex<VecDeque<FakeResponse>>>,
    fallback: Vec<RawRecord>,
    windows: Arc<Mutex<Vec<FetchWindow>>>,
}

impl FakeFeed {
    pub fn new(fallback: Vec<RawRecord>) -> Self {
        Self {
            script: Default::default(),
            fallback,
            windows: Default::default(),
        }
    }

    pub fn then(self, response: FakeResponse) -> Self {
        self.script
            .lock()
            .expect("poisoned lock")
            .push_back(response);
        self
    }

    pub fn windows(&self) -> Vec<FetchWindow> {
        self.windows.lock().expect("poisoned lock").clone()
    }
}

#[async_trait]
impl EventFeed for FakeFeed {
    async fn fetch(
        &self,
        window: &FetchWindow,
        _bounding_box: &BoundingBox,
        timeout: time::Duration,
    ) -> Result<FetchedBatch, FeedError> {
        self.windows.lock().expect("poisoned lock").push(*window);

        let next = self.script.lock().expect("poisoned lock").pop_front();
        match next.unwrap_or_else(|| FakeResponse::Records(self.fallback.clone())) {
            FakeResponse::Records(records) => Ok(FetchedBatch {
                records,
                skipped: 0,
            }),
            FakeResponse::Timeout => {
                tokio::time::sleep(timeout).await;
                Err(FeedError::Timeout(timeout))
            }
            FakeResponse::Unavailable => Err(FeedError::Service(StatusCode::SERVICE_UNAVAILABLE)),
        }
    }
}
