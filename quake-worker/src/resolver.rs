use std::time;

use quake_common::event::CoordinateKey;
use quake_common::location_cache::LocationCache;
use quake_common::metrics::{GEOCODE_CACHE_HITS, GEOCODE_FAILURES, GEOCODE_REQUESTS};
use tracing::{debug, info, warn};

use crate::error::LocationError;
use crate::geocode::ReverseGeocoder;
use crate::rate_limit::RateLimiter;

/// Resolves coordinates to place names, cache first.
pub struct LocationResolver {
    cache: LocationCache,
    geocoder: Box<dyn ReverseGeocoder>,
    /// Decimals kept in the cache key. Coarser keys mean more hits and fewer external calls, at
    /// the cost of place names that are only approximately right.
    precision: u32,
}

impl LocationResolver {
    pub fn new(cache: LocationCache, geocoder: Box<dyn ReverseGeocoder>, precision: u32) -> Self {
        Self {
            cache,
            geocoder,
            precision,
        }
    }

    /// Resolve a coordinate pair to a place name.
    ///
    /// A cache hit returns without touching `limiter` or the network. On a miss we wait for the
    /// limiter, look up the rounded coordinates and write the result to the cache before
    /// returning it. Failed lookups are never cached, so the next resolution of the same key
    /// tries again.
    pub async fn resolve(
        &self,
        latitude: f64,
        longitude: f64,
        limiter: &mut RateLimiter,
        timeout: time::Duration,
    ) -> Result<String, LocationError> {
        let key = CoordinateKey::new(latitude, longitude, self.precision);

        if let Some(place_name) = self.cache.get(&key).await? {
            debug!("location cache hit for {}: {}", key, place_name);
            metrics::counter!(GEOCODE_CACHE_HITS).increment(1);
            return Ok(place_name);
        }

        limiter.acquire().await;
        metrics::counter!(GEOCODE_REQUESTS).increment(1);

        let place_name = match self
            .geocoder
            .reverse(key.latitude(), key.longitude(), timeout)
            .await
        {
            Ok(place_name) => place_name,
            Err(error) => {
                let labels = [("kind", error.kind())];
                metrics::counter!(GEOCODE_FAILURES, &labels).increment(1);
                return Err(error);
            }
        };

        info!("resolved {} to {}", key, place_name);

        if let Err(error) = self.cache.put(&key, &place_name).await {
            // The name is still good, the key will just miss again next time.
            warn!("failed to cache place name for {}: {}", key, error);
        }

        Ok(place_name)
    }
}
