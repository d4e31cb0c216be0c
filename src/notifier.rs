use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::retry::RetryPolicy;
use crate::telegram::TelegramClient;
use crate::types::{Trade, TradeSide};
use crate::POLYMARKET_EVENT_URL;

/// Delivers formatted alerts to the single authorized recipient.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), DeliveryError>;
}

/// Shorten an address to `0x1234…abcd` for display.
fn short_address(addr: &str) -> String {
    if addr.len() <= 12 || !addr.is_ascii() {
        return addr.to_string();
    }
    format!("{}…{}", &addr[..6], &addr[addr.len() - 4..])
}

/// Render a trade as a human-readable alert.
pub fn format_trade(trade: &Trade) -> String {
    let side_marker = match trade.side {
        TradeSide::Buy => "🟢",
        TradeSide::Sell => "🔴",
    };
    let time = trade
        .time()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let market = if trade.market_text.is_empty() {
        "Unknown market"
    } else {
        trade.market_text.as_str()
    };
    let outcome = if trade.outcome.is_empty() {
        "N/A"
    } else {
        trade.outcome.as_str()
    };
    let short_id: String = trade.id.chars().take(10).collect();

    let mut msg = format!(
        "🐋 Whale Trade Alert\n\
         Trader: {}\n\
         Market: {market}\n\
         Outcome: {outcome}\n\
         Side: {side_marker} {}\n\
         Size: {:.2}\n\
         Price: ${:.4}\n\
         Value: ${:.2}\n\
         Time: {time}\n\
         ID: {short_id}…",
        short_address(&trade.address),
        trade.side,
        trade.size,
        trade.price,
        trade.usd_value,
    );
    if !trade.event_slug.is_empty() {
        msg.push_str(&format!("\nLink: {POLYMARKET_EVENT_URL}/{}", trade.event_slug));
    }
    msg
}

/// Sends alerts through the Telegram Bot API.
pub struct TelegramNotifier {
    client: TelegramClient,
    chat_id: String,
    retry: RetryPolicy,
}

impl TelegramNotifier {
    pub fn new(client: TelegramClient, chat_id: impl Into<String>) -> Self {
        Self {
            client,
            chat_id: chat_id.into(),
            retry: RetryPolicy::DELIVERY,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) -> Result<(), DeliveryError> {
        self.retry
            .run(
                "send notification",
                || self.client.send_message(&self.chat_id, message),
                DeliveryError::is_transient,
            )
            .await
    }
}
