use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::VenueError;
use crate::retry::RetryPolicy;
use crate::types::{Trade, TradeSide};

/// Per-request timeout for the data API.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of recent trades for a watched address.
///
/// Order of the returned trades is unspecified. Implementations do not cache:
/// every call is a live fetch.
#[async_trait]
pub trait VenueClient: Send + Sync {
    async fn fetch_trades(&self, address: &str) -> Result<Vec<Trade>, VenueError>;
}

/// Trade record as returned by `GET /trades` on the Polymarket data API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrade {
    #[serde(default)]
    pub proxy_wallet: String,
    pub side: TradeSide,
    #[serde(default)]
    pub asset: String,
    #[serde(default)]
    pub condition_id: String,
    pub size: f64,
    pub price: f64,
    pub timestamp: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub event_slug: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub transaction_hash: String,
}

impl RawTrade {
    /// Normalize into a `Trade` attributed to `address`.
    ///
    /// Returns `None` for records without a transaction hash, which cannot be
    /// deduplicated.
    pub fn into_trade(self, address: &str) -> Option<Trade> {
        if self.transaction_hash.is_empty() {
            return None;
        }
        // One transaction may fill several outcomes, so the hash alone is not unique.
        let id = format!("{}:{}:{}", self.transaction_hash, self.asset, self.side);
        let address = if address.is_empty() {
            self.proxy_wallet.to_lowercase()
        } else {
            address.to_lowercase()
        };
        // A SELL's size is already quoted in USD; a BUY's is in shares.
        let usd_value = match self.side {
            TradeSide::Buy => self.size * self.price,
            TradeSide::Sell => self.size,
        };
        let market_text = if self.title.is_empty() {
            self.slug
        } else {
            self.title
        };
        Some(Trade {
            id,
            address,
            market_id: self.condition_id,
            market_text,
            outcome: self.outcome,
            event_slug: self.event_slug,
            side: self.side,
            price: self.price,
            size: self.size,
            usd_value,
            timestamp: self.timestamp,
        })
    }
}

/// HTTP client for the public Polymarket data API.
pub struct DataApiClient {
    http: reqwest::Client,
    trades_url: Url,
    limit: u32,
    timeout: Duration,
    retry: RetryPolicy,
}

impl DataApiClient {
    pub fn new(base_url: &str, limit: u32) -> anyhow::Result<Self> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let trades_url = base.join("trades")?;
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            trades_url,
            limit,
            timeout: REQUEST_TIMEOUT,
            retry: RetryPolicy::VENUE,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_once(&self, address: &str) -> Result<Vec<RawTrade>, VenueError> {
        let limit = self.limit.to_string();
        let resp = self
            .http
            .get(self.trades_url.clone())
            .timeout(self.timeout)
            .query(&[("user", address), ("limit", limit.as_str()), ("offset", "0")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(VenueError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        parse_trades(&bytes)
    }
}

#[async_trait]
impl VenueClient for DataApiClient {
    async fn fetch_trades(&self, address: &str) -> Result<Vec<Trade>, VenueError> {
        let address = address.to_lowercase();
        let label = format!("fetch trades {address}");
        let raw = self
            .retry
            .run(&label, || self.fetch_once(&address), VenueError::is_transient)
            .await?;

        let total = raw.len();
        let trades: Vec<Trade> = raw
            .into_iter()
            .filter_map(|r| r.into_trade(&address))
            .collect();
        if trades.len() < total {
            debug!(
                "Dropped {} trade record(s) without a transaction hash for {address}",
                total - trades.len()
            );
        }
        debug!("Fetched {} recent trades for {address}", trades.len());
        Ok(trades)
    }
}

/// Decode a `/trades` response body.
///
/// The body must be a JSON array; individual records that do not decode are
/// dropped so one odd record cannot hide the rest of the page.
pub fn parse_trades(body: &[u8]) -> Result<Vec<RawTrade>, VenueError> {
    let records: Vec<serde_json::Value> =
        serde_json::from_slice(body).map_err(|e| VenueError::Malformed(e.to_string()))?;
    Ok(records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<RawTrade>(record) {
            Ok(raw) => Some(raw),
            Err(e) => {
                debug!("Skipping undecodable trade record: {e}");
                None
            }
        })
        .collect())
}
