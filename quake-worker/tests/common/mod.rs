use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{routing, Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const FEED_PATH: &str = "/fdsnws/event/1/query";
pub const REVERSE_PATH: &str = "/reverse";

/// Bind an ephemeral port on localhost and serve `router` on it in the background.
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move { axum::serve(listener, router).await });

    addr
}

pub fn url_for(addr: SocketAddr, path: &str) -> url::Url {
    url::Url::parse(&format!("http://{}{}", addr, path)).unwrap()
}

/// An address nothing listens on.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// A GeoJSON feature the way the EMSC feed sends it.
pub fn feature(unid: &str, time: &str, lat: f64, lon: f64, mag: f64) -> Value {
    json!({
        "type": "Feature",
        "id": unid,
        "geometry": {"type": "Point", "coordinates": [lon, lat, -10.0]},
        "properties": {
            "source_id": "1630000",
            "source_catalog": "EMSC-RTS",
            "lastupdate": time,
            "time": time,
            "flynn_region": "CENTRAL TURKEY",
            "lat": lat,
            "lon": lon,
            "depth": 10.0,
            "evtype": "ke",
            "auth": "KOER",
            "mag": mag,
            "magtype": "ml",
            "unid": unid
        }
    })
}

#[derive(Clone, Default)]
pub struct FakeEmsc {
    features: Arc<Mutex<Vec<Value>>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl FakeEmsc {
    pub fn with_features(features: Vec<Value>) -> Self {
        Self {
            features: Arc::new(Mutex::new(features)),
            queries: Default::default(),
        }
    }

    pub fn queries(&self) -> Vec<HashMap<String, String>> {
        self.queries.lock().unwrap().clone()
    }

    pub async fn spawn(&self) -> SocketAddr {
        let router = Router::new()
            .route(FEED_PATH, routing::get(emsc_query))
            .with_state(self.clone());

        spawn_server(router).await
    }
}

async fn emsc_query(
    State(emsc): State<FakeEmsc>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    emsc.queries.lock().unwrap().push(params);

    let features = emsc.features.lock().unwrap().clone();
    if features.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }

    Json(json!({"type": "FeatureCollection", "metadata": {"count": features.len()}, "features": features}))
        .into_response()
}

#[derive(Clone, Default)]
pub struct FakeNominatim {
    calls: Arc<AtomicUsize>,
}

impl FakeNominatim {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn spawn(&self) -> SocketAddr {
        let router = Router::new()
            .route(REVERSE_PATH, routing::get(nominatim_reverse))
            .with_state(self.clone());

        spawn_server(router).await
    }
}

async fn nominatim_reverse(
    State(nominatim): State<FakeNominatim>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    nominatim.calls.fetch_add(1, Ordering::SeqCst);

    let lat = params.get("lat").cloned().unwrap_or_default();
    let lon = params.get("lon").cloned().unwrap_or_default();

    Json(json!({
        "place_id": 12345,
        "lat": lat,
        "lon": lon,
        "display_name": format!("Çankaya, Ankara, Türkiye ({}, {})", lat, lon),
        "address": {"city": "Ankara", "country": "Türkiye"}
    }))
}

/// Services that misbehave: one path per failure mode.
pub async fn spawn_broken_services() -> SocketAddr {
    let router = Router::new()
        .route(
            "/slow",
            routing::get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({"features": []}))
            }),
        )
        .route(
            "/unavailable",
            routing::get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        )
        .route("/garbage", routing::get(|| async { "<html>oops</html>" }))
        .route(
            "/unplaceable",
            routing::get(|| async { Json(json!({"error": "Unable to geocode"})) }),
        );

    spawn_server(router).await
}
