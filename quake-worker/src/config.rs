use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

use crate::feed::BoundingBox;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    #[envconfig(default = "sqlite://quakewatch.db")]
    pub database_url: String,

    #[envconfig(default = "5")]
    pub max_db_connections: u32,

    #[envconfig(default = "https://www.seismicportal.eu/fdsnws/event/1/query")]
    pub feed_url: url::Url,

    #[envconfig(default = "https://nominatim.openstreetmap.org/reverse")]
    pub geocode_url: url::Url,

    /// Nominatim's usage policy requires an identifying user agent.
    #[envconfig(default = "quakewatch/0.1 (seismic event monitor)")]
    pub user_agent: NonEmptyString,

    #[envconfig(default = "30000")]
    pub fetch_interval: EnvMsDuration,

    /// How far back the very first fetch window reaches.
    #[envconfig(default = "7200000")]
    pub initial_lookback: EnvMsDuration,

    #[envconfig(default = "60000")]
    pub feed_timeout: EnvMsDuration,

    #[envconfig(default = "30000")]
    pub geocode_timeout: EnvMsDuration,

    #[envconfig(default = "1100")]
    pub geocode_min_spacing: EnvMsDuration,

    #[envconfig(default = "10")]
    pub geocode_zoom: u8,

    /// Decimals kept when quantizing coordinates for the location cache.
    #[envconfig(default = "2")]
    pub coordinate_precision: u32,

    #[envconfig(default = "2.0")]
    pub min_magnitude: f64,

    #[envconfig(default = "20")]
    pub summary_limit: i64,

    #[envconfig(nested = true)]
    pub bounding_box: BoundingBoxConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Envconfig, Clone)]
pub struct BoundingBoxConfig {
    #[envconfig(default = "35.0")]
    pub min_lat: f64,

    #[envconfig(default = "43.0")]
    pub max_lat: f64,

    #[envconfig(default = "25.0")]
    pub min_lon: f64,

    #[envconfig(default = "45.0")]
    pub max_lon: f64,
}

impl From<&BoundingBoxConfig> for BoundingBox {
    fn from(config: &BoundingBoxConfig) -> Self {
        BoundingBox {
            min_latitude: config.min_lat,
            max_latitude: config.max_lat,
            min_longitude: config.min_lon,
            max_longitude: config.max_lon,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
