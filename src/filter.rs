use std::fmt;

use crate::settings::Settings;
use crate::types::Trade;

/// Stage at which a trade was filtered out.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    BelowMinValue { value: f64, min: f64 },
    MarketNotSelected,
    NoTextMatch,
    MarketExcluded,
    TextExcluded(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::BelowMinValue { value, min } => {
                write!(f, "value ${value:.2} below minimum ${min:.2}")
            }
            Rejection::MarketNotSelected => f.write_str("market not in market filters"),
            Rejection::NoTextMatch => f.write_str("market text matches no text filter"),
            Rejection::MarketExcluded => f.write_str("market is excluded"),
            Rejection::TextExcluded(term) => write!(f, "market text contains excluded {term:?}"),
        }
    }
}

/// Run every filter stage against `trade`, returning the first rejection.
///
/// Stages, all of which must pass:
/// 1. `usd_value >= min_value`
/// 2. market id in `market_filters` (skipped when empty)
/// 3. any `text_filters` term in the market text, case-insensitive (skipped when empty)
/// 4. market id not in `exclude_market_ids`
/// 5. no `exclude_text_filters` term in the market text
pub fn evaluate(trade: &Trade, settings: &Settings) -> Result<(), Rejection> {
    if trade.usd_value < settings.min_value {
        return Err(Rejection::BelowMinValue {
            value: trade.usd_value,
            min: settings.min_value,
        });
    }

    if !settings.market_filters.is_empty() && !settings.market_filters.contains(&trade.market_id)
    {
        return Err(Rejection::MarketNotSelected);
    }

    let text = trade.market_text.to_lowercase();
    if !settings.text_filters.is_empty()
        && !settings
            .text_filters
            .iter()
            .any(|term| text.contains(&term.to_lowercase()))
    {
        return Err(Rejection::NoTextMatch);
    }

    if !settings.exclude_market_ids.is_empty()
        && settings
            .exclude_market_ids
            .contains(&trade.market_id.to_lowercase())
    {
        return Err(Rejection::MarketExcluded);
    }

    if let Some(term) = settings
        .exclude_text_filters
        .iter()
        .find(|term| text.contains(&term.to_lowercase()))
    {
        return Err(Rejection::TextExcluded(term.clone()));
    }

    Ok(())
}

/// Whether `trade` should be notified under `settings`.
pub fn passes(trade: &Trade, settings: &Settings) -> bool {
    evaluate(trade, settings).is_ok()
}
