use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::FetchError;
use crate::models::{Kline, PriceQuote};

/// Spot ticker and candlestick series for one symbol pair.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_price(&self) -> Result<PriceQuote, FetchError>;

    async fn fetch_klines(&self, interval: &str, limit: u32) -> Result<Vec<Kline>, FetchError>;
}

#[derive(Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

/// REST client for a Binance-compatible market data API.
#[derive(Clone)]
pub struct BinanceClient {
    http: Client,
    base_url: String,
    symbol: String,
}

impl BinanceClient {
    pub fn new(base_url: &str, symbol: &str, request_timeout: Duration) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| FetchError::Fatal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            symbol: symbol.to_uppercase(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Transient(format!("GET {url}: unexpected body: {e}")))
    }
}

/// 4xx other than rate limiting will never succeed with the same request.
fn classify_status(status: StatusCode, body: &str) -> FetchError {
    let detail = match serde_json::from_str::<ApiError>(body) {
        Ok(err) => format!("{} (code {}): {}", status, err.code, err.msg),
        Err(_) => format!("{status}: {body}"),
    };
    if status.is_client_error()
        && status != StatusCode::TOO_MANY_REQUESTS
        && status != StatusCode::REQUEST_TIMEOUT
        && status.as_u16() != 418
    {
        FetchError::Fatal(detail)
    } else {
        FetchError::Transient(detail)
    }
}

fn parse_decimal(value: &str, what: &str) -> Result<Decimal, FetchError> {
    Decimal::from_str(value)
        .map_err(|e| FetchError::Transient(format!("unparseable {what} {value:?}: {e}")))
}

/// Rows are `[open_time, open, high, low, close, volume, ...]`.
fn parse_klines(rows: &[Vec<serde_json::Value>]) -> Result<Vec<Kline>, FetchError> {
    rows.iter()
        .map(|row| {
            let open_ms = row
                .first()
                .and_then(|v| v.as_i64())
                .ok_or_else(|| FetchError::Transient("kline without open time".to_string()))?;
            let close = row
                .get(4)
                .and_then(|v| v.as_str())
                .ok_or_else(|| FetchError::Transient("kline without close price".to_string()))?;
            let open_time = DateTime::from_timestamp_millis(open_ms)
                .ok_or_else(|| FetchError::Transient(format!("invalid kline open time {open_ms}")))?;
            Ok(Kline {
                open_time,
                close: parse_decimal(close, "close price")?,
            })
        })
        .collect()
}

#[async_trait]
impl PriceSource for BinanceClient {
    async fn fetch_price(&self) -> Result<PriceQuote, FetchError> {
        let ticker: TickerPrice = self
            .get_json("/ticker/price", &[("symbol", self.symbol.clone())])
            .await?;
        let price = parse_decimal(&ticker.price, "price")?;
        if price <= Decimal::ZERO {
            return Err(FetchError::Transient(format!(
                "non-positive price {price} for {}",
                self.symbol
            )));
        }
        Ok(PriceQuote {
            price,
            fetched_at: Utc::now(),
        })
    }

    async fn fetch_klines(&self, interval: &str, limit: u32) -> Result<Vec<Kline>, FetchError> {
        let rows: Vec<Vec<serde_json::Value>> = self
            .get_json(
                "/klines",
                &[
                    ("symbol", self.symbol.clone()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        parse_klines(&rows)
    }
}

/// Uncached spot price lookups for the alert filter.
pub struct PriceOracle<P> {
    source: P,
}

impl<P: PriceSource> PriceOracle<P> {
    pub fn new(source: P) -> Self {
        Self { source }
    }

    /// `Ok(None)` means the price is unavailable for now and the caller
    /// should skip this cycle. `Err` is reserved for fatal failures.
    pub async fn get_price(&self) -> Result<Option<PriceQuote>, FetchError> {
        match self.source.fetch_price().await {
            Ok(quote) => Ok(Some(quote)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("Price unavailable: {}", e);
                Ok(None)
            }
        }
    }
}
