//! HTTP price sources: a live quote API and a historical chart API used as fallback.

use crate::core::config::Settings;
use crate::core::error::UpstreamError;
use crate::core::quotes::Quote;
use crate::core::traits::QuoteSource;
use async_trait::async_trait;
use chrono::DateTime;
use log::warn;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("prometeo-chat-api/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            warn!("cannot configure quote http client, using defaults: {e}");
            Client::new()
        })
}

fn format_unix(seconds: i64) -> Option<String> {
    DateTime::from_timestamp(seconds, 0).map(|t| t.format("%Y-%m-%d %H:%M").to_string())
}

/// Live quotes from API Ninjas (`/v1/stockprice`).
pub struct ApiNinjasSource {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl ApiNinjasSource {
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: http_client(settings.http_timeout),
            url: settings.quote_api_url.clone(),
            api_key: settings.quote_api_key.clone(),
        }
    }
}

#[derive(Deserialize)]
struct NinjasQuote {
    ticker: Option<String>,
    price: Option<f64>,
    updated: Option<i64>,
}

/// The API answers with either one object or a list of them; only the first is used.
pub fn decode_ninjas_quote(symbol: &str, body: Value) -> Result<Quote, UpstreamError> {
    let record = match body {
        Value::Array(items) => items.into_iter().next().ok_or(UpstreamError::NoData)?,
        other => other,
    };
    let record: NinjasQuote = serde_json::from_value(record)?;
    let price = record.price.ok_or(UpstreamError::NoData)?;

    Ok(Quote {
        ticker: record.ticker.unwrap_or_else(|| symbol.to_owned()),
        price,
        timestamp: record.updated.and_then(format_unix),
    })
}

#[async_trait]
impl QuoteSource for ApiNinjasSource {
    fn name(&self) -> &'static str {
        "api-ninjas"
    }

    async fn fetch(&self, symbol: &str) -> Result<Quote, UpstreamError> {
        let mut request = self.client.get(&self.url).query(&[("ticker", symbol)]);
        if let Some(api_key) = &self.api_key {
            request = request.header("X-Api-Key", api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(UpstreamError::Status(response.status().as_u16()));
        }

        decode_ninjas_quote(symbol, response.json().await?)
    }
}

/// Daily closes from the Yahoo chart API, used when no live quote is available.
pub struct YahooChartSource {
    client: Client,
    url: String,
}

impl YahooChartSource {
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: http_client(settings.http_timeout),
            url: settings.fallback_quote_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[derive(Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Deserialize)]
struct Chart {
    result: Option<Vec<ChartSeries>>,
}

#[derive(Deserialize)]
struct ChartSeries {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<CloseSeries>,
}

#[derive(Deserialize)]
struct CloseSeries {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Latest non-empty close of the series, rounded to 4 decimals.
pub fn decode_chart_quote(symbol: &str, body: Value) -> Result<Quote, UpstreamError> {
    let response: ChartResponse = serde_json::from_value(body)?;
    let series = response
        .chart
        .result
        .and_then(|result| result.into_iter().next())
        .ok_or(UpstreamError::NoData)?;

    let closes = series
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|quote| quote.close)
        .unwrap_or_default();

    let (index, close) = closes
        .iter()
        .enumerate()
        .rev()
        .find_map(|(index, close)| close.map(|close| (index, close)))
        .ok_or(UpstreamError::NoData)?;

    Ok(Quote {
        ticker: symbol.to_owned(),
        price: (close * 10_000.0).round() / 10_000.0,
        timestamp: series.timestamp.get(index).copied().and_then(format_unix),
    })
}

#[async_trait]
impl QuoteSource for YahooChartSource {
    fn name(&self) -> &'static str {
        "yahoo-chart"
    }

    async fn fetch(&self, symbol: &str) -> Result<Quote, UpstreamError> {
        let response = self
            .client
            .get(format!("{}/{symbol}", self.url))
            .query(&[("range", "5d"), ("interval", "1d")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(UpstreamError::Status(response.status().as_u16()));
        }

        decode_chart_quote(symbol, response.json().await?)
    }
}
