pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod filter;
pub mod notifier;
pub mod reporter;
pub mod retry;
pub mod settings;
pub mod store;
pub mod telegram;
pub mod types;
pub mod watcher;

#[cfg(test)]
mod test_server;

/// Polymarket data API base URL (public, no auth required)
pub const DATA_API_BASE: &str = "https://data-api.polymarket.com";

/// Telegram Bot API base URL
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Public event page prefix; append the event slug
pub const POLYMARKET_EVENT_URL: &str = "https://polymarket.com/event";
