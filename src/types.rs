use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Side of a trade as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn label(self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single whale trade, normalized from the venue's wire format.
///
/// Identity is `id` alone: two fetches of the same trade compare equal even if
/// the venue reports slightly different display fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    /// Lowercase address of the whale that made the trade.
    pub address: String,
    /// Market (condition) identifier.
    pub market_id: String,
    /// Market question as shown to users.
    pub market_text: String,
    pub outcome: String,
    pub event_slug: String,
    pub side: TradeSide,
    pub price: f64,
    pub size: f64,
    /// USD value: `size * price` for a BUY, `size` for a SELL.
    pub usd_value: f64,
    /// Unix seconds.
    pub timestamp: i64,
}

impl Trade {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

impl PartialEq for Trade {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Trade {}

impl Hash for Trade {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Summary of one poll cycle, emitted by the reporter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CycleReport {
    pub started_at: String,
    pub finished_at: String,
    pub addresses: usize,
    pub fetched: usize,
    pub duplicates: usize,
    pub stale: usize,
    pub rejected: usize,
    pub notified: usize,
    pub delivery_failures: usize,
    pub fetch_failures: usize,
}

impl CycleReport {
    /// True when the cycle did anything worth reporting at info level.
    pub fn has_activity(&self) -> bool {
        self.notified > 0 || self.delivery_failures > 0 || self.fetch_failures > 0
    }
}
