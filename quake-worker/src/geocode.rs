//! Reverse geocoding against a Nominatim compatible service.
use std::time;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::LocationError;

#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// Look up a display name for a coordinate pair. Exactly one external request per call.
    async fn reverse(
        &self,
        latitude: f64,
        longitude: f64,
        timeout: time::Duration,
    ) -> Result<String, LocationError>;
}

#[derive(Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
    error: Option<String>,
}

/// Pull the place name out of a reverse lookup body. Nominatim answers 200 with an `error` field
/// for coordinates it cannot place (open sea, for instance).
pub fn parse_reverse_body(body: &str) -> Result<String, LocationError> {
    let response: ReverseResponse = serde_json::from_str(body)
        .map_err(|error| LocationError::MalformedResponse(error.to_string()))?;

    match response.display_name {
        Some(name) if !name.trim().is_empty() => Ok(name),
        _ => Err(LocationError::MalformedResponse(
            response
                .error
                .unwrap_or_else(|| "response has no display_name".to_owned()),
        )),
    }
}

pub struct NominatimClient {
    client: reqwest::Client,
    url: url::Url,
    zoom: u8,
}

impl NominatimClient {
    /// `user_agent` must identify the application, as required by the Nominatim usage policy.
    pub fn new(url: url::Url, user_agent: &str, zoom: u8) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;

        Ok(Self { client, url, zoom })
    }
}

fn request_error(error: reqwest::Error, timeout: time::Duration) -> LocationError {
    if error.is_timeout() {
        LocationError::Timeout(timeout)
    } else {
        LocationError::Network(error)
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimClient {
    async fn reverse(
        &self,
        latitude: f64,
        longitude: f64,
        timeout: time::Duration,
    ) -> Result<String, LocationError> {
        let query = [
            ("format", "json".to_owned()),
            ("lat", latitude.to_string()),
            ("lon", longitude.to_string()),
            ("zoom", self.zoom.to_string()),
            ("addressdetails", "1".to_owned()),
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
        if !status.is_success() {
            return Err(LocationError::Service(status));
        }

        let body = response
            .text()
            .await
            .map_err(|error| request_error(error, timeout))?;

        parse_reverse_body(&body)
    }
}
