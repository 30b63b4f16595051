pub mod config;
pub mod error;
pub mod feed;
pub mod geocode;
pub mod handlers;
pub mod normalize;
pub mod pipeline;
pub mod rate_limit;
pub mod report;
pub mod resolver;
pub mod scheduler;
pub mod test_utils;
