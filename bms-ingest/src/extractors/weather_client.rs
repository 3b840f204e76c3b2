//! Weather enrichment
//!
//! Looks up the weather at the installation site for the hour a screenshot
//! was taken. Enrichment is optional: a failed lookup is logged by the caller
//! and the record is saved without it.
//!
//! # API Reference
//! - Endpoint: https://archive-api.open-meteo.com/v1/archive
//! - Hourly variables: temperature_2m, cloud_cover, shortwave_radiation
//! - `timezone=auto` so hourly slots are local wall-clock time, matching the
//!   filename timestamp

use async_trait::async_trait;
use chrono::{NaiveDateTime, Timelike};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Open-Meteo historical archive endpoint
const OPEN_METEO_ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

/// Default timeout for weather requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Weather at the site for one hour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSample {
    /// Air temperature at 2 m (°C)
    pub temperature_c: Option<f64>,
    /// Total cloud cover (%)
    pub cloud_cover_pct: Option<f64>,
    /// Shortwave solar radiation (W/m²)
    pub solar_radiation_wm2: Option<f64>,
}

/// Installation site coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SiteLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Weather lookup errors
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("Weather request failed: {0}")]
    Network(String),

    #[error("Weather service returned HTTP {0}")]
    Status(u16),

    #[error("Invalid weather response: {0}")]
    InvalidResponse(String),
}

/// Weather enrichment boundary
#[async_trait]
pub trait WeatherLookup: Send + Sync {
    /// Weather for the hour containing `timestamp` (site-local time)
    ///
    /// `Ok(None)` means the service had no data for that hour.
    async fn lookup(
        &self,
        latitude: f64,
        longitude: f64,
        timestamp: NaiveDateTime,
    ) -> Result<Option<WeatherSample>, WeatherError>;
}

#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    hourly: Option<HourlySeries>,
}

#[derive(Debug, Deserialize)]
struct HourlySeries {
    time: Vec<String>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    cloud_cover: Vec<Option<f64>>,
    #[serde(default)]
    shortwave_radiation: Vec<Option<f64>>,
}

/// Open-Meteo archive client
pub struct OpenMeteoClient {
    http_client: Client,
    base_url: String,
}

impl OpenMeteoClient {
    /// Create client against the public archive endpoint
    pub fn new() -> Result<Self, WeatherError> {
        Self::with_base_url(OPEN_METEO_ARCHIVE_URL)
    }

    /// Create client against another archive-compatible endpoint
    pub fn with_base_url(base_url: &str) -> Result<Self, WeatherError> {
        let http_client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| WeatherError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            base_url: base_url.to_string(),
        })
    }
}

#[async_trait]
impl WeatherLookup for OpenMeteoClient {
    async fn lookup(
        &self,
        latitude: f64,
        longitude: f64,
        timestamp: NaiveDateTime,
    ) -> Result<Option<WeatherSample>, WeatherError> {
        let date = timestamp.date().format("%Y-%m-%d").to_string();
        debug!(latitude, longitude, %date, "Querying weather archive");

        let response = self
            .http_client
            .get(&self.base_url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("start_date", date.clone()),
                ("end_date", date),
                (
                    "hourly",
                    "temperature_2m,cloud_cover,shortwave_radiation".to_string(),
                ),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await
            .map_err(|e| WeatherError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(WeatherError::Status(response.status().as_u16()));
        }

        let body: ArchiveResponse = response
            .json()
            .await
            .map_err(|e| WeatherError::InvalidResponse(e.to_string()))?;

        Ok(sample_for_hour(&body, timestamp))
    }
}

/// Pick the hourly slot matching `timestamp`'s date and hour
fn sample_for_hour(body: &ArchiveResponse, timestamp: NaiveDateTime) -> Option<WeatherSample> {
    let hourly = body.hourly.as_ref()?;
    let slot = timestamp
        .with_minute(0)
        .and_then(|t| t.with_second(0))?
        .format("%Y-%m-%dT%H:%M")
        .to_string();

    let index = hourly.time.iter().position(|t| *t == slot)?;
    let value = |series: &[Option<f64>]| series.get(index).copied().flatten();

    Some(WeatherSample {
        temperature_c: value(&hourly.temperature_2m),
        cloud_cover_pct: value(&hourly.cloud_cover),
        solar_radiation_wm2: value(&hourly.shortwave_radiation),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn body() -> ArchiveResponse {
        serde_json::from_value(serde_json::json!({
            "latitude": 52.5,
            "hourly": {
                "time": ["2026-01-26T12:00", "2026-01-26T13:00", "2026-01-26T14:00"],
                "temperature_2m": [1.2, 2.4, 2.9],
                "cloud_cover": [100, 80, null],
                "shortwave_radiation": [55.0, 61.0, 40.0]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_sample_matches_local_hour() {
        let ts = NaiveDate::from_ymd_opt(2026, 1, 26)
            .unwrap()
            .and_hms_opt(13, 9, 50)
            .unwrap();
        let sample = sample_for_hour(&body(), ts).unwrap();

        assert_eq!(sample.temperature_c, Some(2.4));
        assert_eq!(sample.cloud_cover_pct, Some(80.0));
        assert_eq!(sample.solar_radiation_wm2, Some(61.0));
    }

    #[test]
    fn test_null_values_stay_none() {
        let ts = NaiveDate::from_ymd_opt(2026, 1, 26)
            .unwrap()
            .and_hms_opt(14, 59, 59)
            .unwrap();
        let sample = sample_for_hour(&body(), ts).unwrap();
        assert_eq!(sample.cloud_cover_pct, None);
        assert_eq!(sample.temperature_c, Some(2.9));
    }

    #[test]
    fn test_missing_hour_is_none() {
        let ts = NaiveDate::from_ymd_opt(2026, 1, 27)
            .unwrap()
            .and_hms_opt(13, 0, 0)
            .unwrap();
        assert_eq!(sample_for_hour(&body(), ts), None);

        let empty: ArchiveResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(sample_for_hour(&empty, ts), None);
    }
}
