//! Human readable renderings of stored events, for logs and the startup summary.
use chrono::{DateTime, Utc};
use quake_common::event::Event;
use quake_common::store::EventStore;
use tracing::{info, warn};

/// One line describing an event: magnitude, place, origin time, coordinates and depth.
pub fn describe(event: &Event) -> String {
    let place = event.place_name.as_deref().unwrap_or(&event.region);

    format!(
        "M{:.1} {} at {} ({:.2}, {:.2}, {:.1} km deep)",
        event.magnitude,
        place,
        event.origin_time.format("%Y-%m-%d %H:%M:%S UTC"),
        event.latitude,
        event.longitude,
        event.depth
    )
}

/// Minutes between the event happening and us storing it, never negative.
pub fn ingestion_delay_minutes(origin_time: DateTime<Utc>, ingested_at: DateTime<Utc>) -> f64 {
    let seconds = (ingested_at - origin_time).num_seconds().max(0);
    (seconds as f64 / 60.0 * 10.0).round() / 10.0
}

/// Log the most recently ingested events, as a startup overview.
pub async fn log_summary(store: &EventStore, limit: i64) {
    let events = match store.recent(limit).await {
        Ok(events) => events,
        Err(error) => {
            warn!("failed to read recent events for the summary: {}", error);
            return;
        }
    };

    if events.is_empty() {
        info!("no events stored yet");
        return;
    }

    info!("{} most recently ingested events:", events.len());
    for event in &events {
        info!("  {} [{}]", describe(event), event.id);
    }
}
