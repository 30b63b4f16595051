pub mod event;
pub mod health;
pub mod location_cache;
pub mod metrics;
pub mod store;
