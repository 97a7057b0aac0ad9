//! OpenWeather air-pollution client.
//!
//! Calls `GET {base_url}/data/2.5/air_pollution?lat=..&lon=..&appid=..` and
//! extracts the index from `list[0].main.aqi` and the fine particulate
//! concentration from `list[0].components.pm2_5`.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use civicair_core::{AqiProvider, OpenWeatherClient};
//! use civicair_types::GridPoint;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OpenWeatherClient::new(
//!     "http://api.openweathermap.org",
//!     "my-api-key",
//!     Duration::from_secs(10),
//! )?;
//!
//! let reading = client.fetch_aqi(GridPoint::new(10.0, 106.0)).await?;
//! println!("AQI {}", reading.aqi);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use civicair_types::{AqiReading, GridPoint};

use crate::error::{Error, ProviderError, Result};
use crate::traits::AqiProvider;

/// Default OpenWeather API root.
pub const DEFAULT_BASE_URL: &str = "http://api.openweathermap.org";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Key value shipped in sample configuration; never a real key.
pub const PLACEHOLDER_API_KEY: &str = "YOUR_SECRET_API_KEY_HERE";

/// HTTP client for the OpenWeather air-pollution endpoint.
#[derive(Clone)]
pub struct OpenWeatherClient {
    client: Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl std::fmt::Debug for OpenWeatherClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenWeatherClient")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl OpenWeatherClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the API key is empty or the sample
    /// placeholder, or if `base_url` is not an http(s) URL.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() || api_key == PLACEHOLDER_API_KEY {
            return Err(Error::Configuration(
                "OpenWeather API key is not configured".to_string(),
            ));
        }

        // Normalize URL (remove trailing slash)
        let base_url = base_url.trim_end_matches('/');
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Configuration(format!(
                "OpenWeather base URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/data/2.5/air_pollution", base_url),
            api_key: api_key.to_string(),
            timeout,
        })
    }

    /// The air-pollution endpoint this client calls.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl AqiProvider for OpenWeatherClient {
    async fn fetch_aqi(&self, point: GridPoint) -> std::result::Result<AqiReading, ProviderError> {
        debug!("Fetching AQI for {}", point);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("lat", point.lat.to_string()),
                ("lon", point.lon.to_string()),
                ("appid", self.api_key.clone()),
            ])
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| self.map_send_error(e))?;
        parse_air_pollution(&body)
    }

    fn name(&self) -> &str {
        "openweather"
    }
}

#[derive(Debug, Deserialize)]
struct AirPollutionResponse {
    list: Vec<AirPollutionEntry>,
}

#[derive(Debug, Deserialize)]
struct AirPollutionEntry {
    main: AirQualityIndex,
    #[serde(default)]
    components: Option<Components>,
}

#[derive(Debug, Deserialize)]
struct AirQualityIndex {
    aqi: i32,
}

#[derive(Debug, Deserialize)]
struct Components {
    #[serde(default)]
    pm2_5: Option<f64>,
}

/// Extract a reading from an air-pollution response body.
pub(crate) fn parse_air_pollution(body: &[u8]) -> std::result::Result<AqiReading, ProviderError> {
    let response: AirPollutionResponse =
        serde_json::from_slice(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    let entry = response
        .list
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Malformed("empty list".to_string()))?;

    Ok(AqiReading {
        aqi: entry.main.aqi,
        pm25: entry.components.and_then(|c| c.pm2_5),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_missing_or_placeholder_key() {
        for key in ["", "   ", PLACEHOLDER_API_KEY] {
            let err = OpenWeatherClient::new(DEFAULT_BASE_URL, key, DEFAULT_TIMEOUT).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)));
        }
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let err = OpenWeatherClient::new("ftp://example.com", "key", DEFAULT_TIMEOUT).unwrap_err();
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn test_endpoint_normalizes_trailing_slash() {
        let client =
            OpenWeatherClient::new("http://localhost:9000/", "secret-key", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(
            client.endpoint(),
            "http://localhost:9000/data/2.5/air_pollution"
        );
        assert!(!format!("{:?}", client).contains("secret-key"));
    }

    #[test]
    fn test_parse_full_response() {
        let body = br#"{
            "coord": {"lon": 106.0, "lat": 10.0},
            "list": [{
                "main": {"aqi": 2},
                "components": {"co": 201.94, "no2": 0.77, "pm2_5": 15.5, "pm10": 20.1},
                "dt": 1700000000
            }]
        }"#;

        let reading = parse_air_pollution(body).unwrap();
        assert_eq!(reading.aqi, 2);
        assert_eq!(reading.pm25, Some(15.5));
    }

    #[test]
    fn test_parse_without_components() {
        let reading = parse_air_pollution(br#"{"list": [{"main": {"aqi": 4}}]}"#).unwrap();
        assert_eq!(reading.aqi, 4);
        assert_eq!(reading.pm25, None);
    }

    #[test]
    fn test_parse_malformed_bodies() {
        for body in [
            &br#"{"list": []}"#[..],
            br#"{"list": [{"main": {}}]}"#,
            br#"{"cod": 401, "message": "Invalid API key"}"#,
            b"not json",
        ] {
            assert!(matches!(
                parse_air_pollution(body),
                Err(ProviderError::Malformed(_))
            ));
        }
    }
}
