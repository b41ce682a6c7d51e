//! Client for the National Weather Service API.

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::VERSION;

/// Number of forecast periods rendered.
const FORECAST_PERIODS: usize = 10;

/// Attempts per upstream GET for transient failures.
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

fn user_agent() -> String {
    format!("sql-mcp-gateway/{} (rust)", VERSION)
}

#[derive(Debug, Deserialize)]
struct AlertCollection {
    #[serde(default)]
    features: Vec<AlertFeature>,
}

#[derive(Debug, Deserialize)]
struct AlertFeature {
    properties: AlertProperties,
}

#[derive(Debug, Deserialize)]
struct AlertProperties {
    headline: Option<String>,
    severity: Option<String>,
    urgency: Option<String>,
    event: Option<String>,
    description: Option<String>,
    instruction: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PointResponse {
    properties: PointProperties,
}

#[derive(Debug, Deserialize)]
struct PointProperties {
    forecast: String,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    properties: ForecastProperties,
}

#[derive(Debug, Deserialize)]
struct ForecastProperties {
    #[serde(default)]
    periods: Vec<ForecastPeriod>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForecastPeriod {
    name: String,
    temperature: Value,
    temperature_unit: String,
    wind_speed: String,
    wind_direction: String,
    detailed_forecast: String,
}

fn or_unknown(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("Unknown")
}

/// Weather API client.
#[derive(Debug, Clone)]
pub struct WeatherClient {
    client: Client,
    base_url: String,
}

impl WeatherClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// GET with exponential backoff on transient failures.
    async fn get_json<R: DeserializeOwned>(&self, url: &str) -> Result<R> {
        let mut attempt = 1;
        loop {
            match self.get_once(url).await {
                Err(e) if e.is_retriable() && attempt < MAX_ATTEMPTS => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    warn!("GET {} failed ({}), retrying in {:?}", url, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn get_once<R: DeserializeOwned>(&self, url: &str) -> Result<R> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header("Accept", "application/geo+json")
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn handle_response<R: DeserializeOwned>(response: Response) -> Result<R> {
        let status = response.status();

        if !status.is_success() {
            let status_text = status.canonical_reason().unwrap_or("Unknown");
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), status_text, body));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("Failed to parse response: {}", e)))
    }

    /// Active alerts for a two-letter US state code, formatted as text.
    pub async fn alerts(&self, state: &str) -> Result<String> {
        let state = state.trim().to_uppercase();
        if state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::InvalidToolArguments(format!(
                "Invalid state code '{}': expected two letters",
                state
            )));
        }

        let url = format!("{}/alerts/active?area={}", self.base_url, state);
        let alerts: AlertCollection = self
            .get_json(&url)
            .await
            .map_err(|e| Error::ToolExecutionFailed(format!("Failed to fetch weather alerts: {}", e)))?;

        if alerts.features.is_empty() {
            return Ok(format!("No active weather alerts for {}.", state));
        }

        let mut text = format!("Active weather alerts for {}:\n\n", state);
        for (i, alert) in alerts.features.iter().enumerate() {
            let p = &alert.properties;
            let _ = writeln!(text, "{}. {}", i + 1, or_unknown(&p.headline));
            let _ = writeln!(text, "   Severity: {}", or_unknown(&p.severity));
            let _ = writeln!(text, "   Urgency: {}", or_unknown(&p.urgency));
            let _ = writeln!(text, "   Event: {}", or_unknown(&p.event));
            let _ = writeln!(text, "   Description: {}", or_unknown(&p.description));
            if let Some(instruction) = p.instruction.as_deref().filter(|s| !s.is_empty()) {
                let _ = writeln!(text, "   Instructions: {}", instruction);
            }
            text.push('\n');
        }
        Ok(text)
    }

    /// Forecast for a coordinate, formatted as text.
    pub async fn forecast(&self, latitude: f64, longitude: f64) -> Result<String> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::InvalidToolArguments(format!(
                "Coordinates out of range: {}, {}",
                latitude, longitude
            )));
        }

        let fetch = async {
            let url = format!("{}/points/{},{}", self.base_url, latitude, longitude);
            let point: PointResponse = self.get_json(&url).await?;
            let forecast: ForecastResponse = self.get_json(&point.properties.forecast).await?;
            Ok::<_, Error>(forecast)
        };
        let forecast = fetch.await.map_err(|e| {
            Error::ToolExecutionFailed(format!("Failed to fetch weather forecast: {}", e))
        })?;

        let mut text = format!("Weather forecast for {}, {}:\n\n", latitude, longitude);
        for period in forecast.properties.periods.iter().take(FORECAST_PERIODS) {
            let temperature = match &period.temperature {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let _ = writeln!(text, "{}:", period.name);
            let _ = writeln!(
                text,
                "  Temperature: {}°{}",
                temperature, period.temperature_unit
            );
            let _ = writeln!(
                text,
                "  Wind: {} {}",
                period.wind_speed, period.wind_direction
            );
            let _ = writeln!(text, "  Forecast: {}\n", period.detailed_forecast);
        }
        Ok(text)
    }
}
