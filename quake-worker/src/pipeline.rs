use std::time;

use quake_common::event::NewEvent;
use quake_common::metrics::{EVENTS_INSERTED, EVENTS_SKIPPED};
use quake_common::store::EventStore;
use tracing::{debug, error, info, warn};

use crate::rate_limit::RateLimiter;
use crate::report;
use crate::resolver::LocationResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The id is already stored; nothing was done.
    AlreadyKnown,
    /// The event was stored, but without a place name.
    LocationUnresolved,
    /// The event could not be stored. It was not marked known and a later cycle may retry it.
    StorageError,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyKnown => "already_known",
            SkipReason::LocationUnresolved => "location_unresolved",
            SkipReason::StorageError => "storage_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Inserted,
    Skipped(SkipReason),
}

/// Per event orchestration: dedupe, resolve the location, persist.
pub struct IngestionPipeline {
    store: EventStore,
    resolver: LocationResolver,
    limiter: RateLimiter,
    geocode_timeout: time::Duration,
}

impl IngestionPipeline {
    pub fn new(
        store: EventStore,
        resolver: LocationResolver,
        limiter: RateLimiter,
        geocode_timeout: time::Duration,
    ) -> Self {
        Self {
            store,
            resolver,
            limiter,
            geocode_timeout,
        }
    }

    /// Ingest one event. Never fails: every problem is folded into the returned `Outcome` so one
    /// bad event cannot abort the rest of a batch.
    pub async fn process(&mut self, event: NewEvent) -> Outcome {
        let outcome = self.ingest(event).await;

        match outcome {
            Outcome::Inserted => metrics::counter!(EVENTS_INSERTED).increment(1),
            Outcome::Skipped(reason) => {
                if reason == SkipReason::LocationUnresolved {
                    metrics::counter!(EVENTS_INSERTED).increment(1);
                }
                let labels = [("reason", reason.as_str())];
                metrics::counter!(EVENTS_SKIPPED, &labels).increment(1);
            }
        }

        outcome
    }

    async fn ingest(&mut self, event: NewEvent) -> Outcome {
        match self.store.exists(&event.id).await {
            Ok(true) => {
                debug!("event {} already stored", event.id);
                return Outcome::Skipped(SkipReason::AlreadyKnown);
            }
            Ok(false) => {}
            Err(err) => {
                error!("failed to look up event {}: {}", event.id, err);
                return Outcome::Skipped(SkipReason::StorageError);
            }
        }

        let place_name = match self
            .resolver
            .resolve(
                event.latitude,
                event.longitude,
                &mut self.limiter,
                self.geocode_timeout,
            )
            .await
        {
            Ok(place_name) => Some(place_name),
            Err(err) => {
                warn!(
                    "storing event {} without a place name, could not resolve ({}, {}): {}",
                    event.id, event.latitude, event.longitude, err
                );
                None
            }
        };
        let resolved = place_name.is_some();
        let event = event.with_place_name(place_name);

        match self.store.persist(&event).await {
            Ok(Some(stored)) => {
                info!(
                    "new event {}: {}, ingested {} minutes after origin",
                    stored.id,
                    report::describe(&stored),
                    report::ingestion_delay_minutes(stored.origin_time, stored.ingested_at)
                );

                if resolved {
                    Outcome::Inserted
                } else {
                    Outcome::Skipped(SkipReason::LocationUnresolved)
                }
            }
            Ok(None) => {
                debug!("event {} was stored concurrently", event.id);
                Outcome::Skipped(SkipReason::AlreadyKnown)
            }
            Err(err) => {
                error!("failed to store event {}, will retry: {}", event.id, err);
                Outcome::Skipped(SkipReason::StorageError)
            }
        }
    }
}
