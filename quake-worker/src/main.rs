//! Watch the seismic feed, enrich new events with place names and store them.
use chrono::Utc;
use envconfig::Envconfig;
use futures::future::{select, Either};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use quake_common::health::HealthRegistry;
use quake_common::location_cache::LocationCache;
use quake_common::metrics::{serve, setup_metrics_recorder};
use quake_common::store::{self, EventStore};
use quake_worker::config::Config;
use quake_worker::error::WorkerError;
use quake_worker::feed::{BoundingBox, FeedClient};
use quake_worker::geocode::NominatimClient;
use quake_worker::handlers::{self, AppState};
use quake_worker::pipeline::IngestionPipeline;
use quake_worker::rate_limit::RateLimiter;
use quake_worker::report;
use quake_worker::resolver::LocationResolver;
use quake_worker::scheduler::Scheduler;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::init_from_env()?;

    let pool = store::connect(&config.database_url, config.max_db_connections).await?;
    sqlx::migrate!("../migrations").run(&pool).await?;

    let store = EventStore::new(pool.clone());
    let cache = LocationCache::new(pool);

    report::log_summary(&store, config.summary_limit).await;

    let feed = FeedClient::new(
        config.feed_url.clone(),
        config.user_agent.as_str(),
        config.min_magnitude,
    )
    .map_err(WorkerError::ClientError)?;
    let geocoder = NominatimClient::new(
        config.geocode_url.clone(),
        config.user_agent.as_str(),
        config.geocode_zoom,
    )
    .map_err(WorkerError::ClientError)?;

    let resolver = LocationResolver::new(cache, Box::new(geocoder), config.coordinate_precision);
    let pipeline = IngestionPipeline::new(
        store.clone(),
        resolver,
        RateLimiter::new(config.geocode_min_spacing.0),
        config.geocode_timeout.0,
    );

    // A cycle reports after every event, so one slow fetch or lookup on top of the pause is the
    // longest we expect to go quiet.
    let quiet_period = config.fetch_interval.0
        + config.feed_timeout.0
        + config.geocode_timeout.0
        + config.geocode_min_spacing.0;
    let deadline = chrono::Duration::from_std(quiet_period)
        .unwrap_or_else(|_| chrono::Duration::hours(1))
        + chrono::Duration::seconds(60);

    let liveness = HealthRegistry::new("liveness");
    let window_start = Utc::now()
        - chrono::Duration::from_std(config.initial_lookback.0)
            .unwrap_or_else(|_| chrono::Duration::hours(2));

    let mut scheduler = Scheduler::new(
        Box::new(feed),
        pipeline,
        BoundingBox::from(&config.bounding_box),
        config.feed_timeout.0,
        config.fetch_interval.0,
        window_start,
    )
    .with_liveness(liveness.register("scheduler", deadline));

    let recorder_handle = setup_metrics_recorder()?;
    let app = handlers::app(AppState { store, liveness }, Some(recorder_handle));
    let bind = config.bind();
    let http_server = Box::pin(serve(app, &bind));

    info!(
        "watching feed every {:?} starting from {}",
        config.fetch_interval.0, window_start
    );
    let scheduler_loop = Box::pin(scheduler.run_until(shutdown_signal()));

    match select(http_server, scheduler_loop).await {
        Either::Left((listen_result, _)) => match listen_result {
            Ok(_) => {}
            Err(e) => error!("failed to start quake-worker http server, {}", e),
        },
        Either::Right((_, _)) => info!("scheduler stopped, shutting down"),
    };

    Ok(())
}
