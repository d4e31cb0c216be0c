//! Chat commands, independent of the transport that delivers them.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::settings::{SettingsError, SettingsStore};
use crate::store::TradeStore;

pub const HELP_TEXT: &str = "🐋 Polymarket Whale Watcher\n\n\
Available commands:\n\
/help - Show this help message\n\
/status - Show current configuration\n\
/addwhale <address> - Add whale address\n\
/removewhale <address> - Remove whale address\n\
/listwhales - List tracked whale addresses\n\
/addmarket <id> - Add market ID filter\n\
/removemarket <id> - Remove market ID filter\n\
/listmarkets - List market filters\n\
/addtext <keyword> - Add text filter\n\
/removetext <keyword> - Remove text filter\n\
/listtexts - List text filters\n\
/exclude_market <id> - Never alert for a market\n\
/include_market <id> - Remove a market exclusion\n\
/exclude_text <keyword> - Never alert when market text contains keyword\n\
/include_text <keyword> - Remove a text exclusion\n\
/listexcludes - List exclusions\n\
/setminvalue <value> - Set minimum trade value\n\
/setinterval <seconds> - Set poll interval\n\
/clearseen - Forget already-notified trades";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Status,
    AddWhale(String),
    RemoveWhale(String),
    ListWhales,
    AddMarket(String),
    RemoveMarket(String),
    ListMarkets,
    AddText(String),
    RemoveText(String),
    ListTexts,
    ExcludeMarket(String),
    IncludeMarket(String),
    ExcludeText(String),
    IncludeText(String),
    ListExcludes,
    SetMinValue(f64),
    SetInterval(u64),
    ClearSeen,
}

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("Unknown command: /{0}. Send /help for the list.")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid number {got:?}. Usage: {usage}")]
    InvalidNumber { got: String, usage: &'static str },
}

fn first_arg(args: &str, usage: &'static str) -> Result<String, ParseError> {
    args.split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or(ParseError::Usage(usage))
}

fn rest_arg(args: &str, usage: &'static str) -> Result<String, ParseError> {
    let rest = args.split_whitespace().collect::<Vec<_>>().join(" ");
    if rest.is_empty() {
        return Err(ParseError::Usage(usage));
    }
    Ok(rest)
}

impl Command {
    /// Parse a `/command args` message. A `@BotName` suffix on the command is ignored.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let text = text.trim();
        let body = text.strip_prefix('/').unwrap_or(text);
        let (head, args) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
        let name = head.split('@').next().unwrap_or(head).to_lowercase();

        let cmd = match name.as_str() {
            "start" | "help" => Command::Help,
            "status" => Command::Status,
            "addwhale" => Command::AddWhale(first_arg(args, "/addwhale <address>")?),
            "removewhale" => Command::RemoveWhale(first_arg(args, "/removewhale <address>")?),
            "listwhales" => Command::ListWhales,
            "addmarket" => Command::AddMarket(first_arg(args, "/addmarket <market_id>")?),
            "removemarket" => Command::RemoveMarket(first_arg(args, "/removemarket <market_id>")?),
            "listmarkets" => Command::ListMarkets,
            "addtext" => Command::AddText(rest_arg(args, "/addtext <keyword>")?),
            "removetext" => Command::RemoveText(rest_arg(args, "/removetext <keyword>")?),
            "listtexts" => Command::ListTexts,
            "exclude_market" => {
                Command::ExcludeMarket(first_arg(args, "/exclude_market <market_id>")?)
            }
            "include_market" => {
                Command::IncludeMarket(first_arg(args, "/include_market <market_id>")?)
            }
            "exclude_text" => Command::ExcludeText(rest_arg(args, "/exclude_text <keyword>")?),
            "include_text" => Command::IncludeText(rest_arg(args, "/include_text <keyword>")?),
            "listexcludes" => Command::ListExcludes,
            "setminvalue" => {
                let usage = "/setminvalue <value>";
                let raw = first_arg(args, usage)?;
                let value = raw
                    .trim_start_matches('$')
                    .parse::<f64>()
                    .map_err(|_| ParseError::InvalidNumber { got: raw, usage })?;
                Command::SetMinValue(value)
            }
            "setinterval" => {
                let usage = "/setinterval <seconds>";
                let raw = first_arg(args, usage)?;
                let secs = raw
                    .parse::<u64>()
                    .map_err(|_| ParseError::InvalidNumber { got: raw, usage })?;
                Command::SetInterval(secs)
            }
            "clearseen" => Command::ClearSeen,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(cmd)
    }
}

fn numbered(title: &str, empty: &str, items: &BTreeSet<String>) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    let lines: Vec<String> = items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {item}", i + 1))
        .collect();
    format!("{title}\n\n{}", lines.join("\n"))
}

/// Reply for a mutation: `done` on change, `unchanged` on a no-op.
fn mutation_reply(result: Result<bool, SettingsError>, done: String, unchanged: String) -> String {
    match result {
        Ok(true) => format!("✅ {done}"),
        Ok(false) => format!("⚠️ {unchanged}"),
        Err(SettingsError::Validation(e)) => format!("⚠️ {e}"),
        Err(e @ SettingsError::Storage(_)) => format!("❌ {e}. Please try again."),
    }
}

/// Apply `cmd` to the stores and return the reply text.
pub fn execute(cmd: &Command, settings: &SettingsStore, trades: &TradeStore) -> String {
    match cmd {
        Command::Help => HELP_TEXT.to_string(),
        Command::Status => {
            let s = settings.snapshot();
            let stats = trades.stats();
            let newest = stats
                .newest
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "never".to_string());
            format!(
                "📊 Current Configuration\n\n\
                 Poll Interval: {}s\n\
                 Min Trade Value: ${:.2}\n\
                 Tracked Whales: {}\n\
                 Market Filters: {}\n\
                 Text Filters: {}\n\
                 Exclusions: {} market(s), {} text\n\
                 Seen Trades: {} (last: {newest})",
                s.poll_interval_secs,
                s.min_value,
                s.watched_addresses.len(),
                s.market_filters.len(),
                s.text_filters.len(),
                s.exclude_market_ids.len(),
                s.exclude_text_filters.len(),
                stats.total,
            )
        }
        Command::AddWhale(addr) => mutation_reply(
            settings.add_watched_address(addr),
            format!("Added whale address: {addr}"),
            format!("Address already tracked: {addr}"),
        ),
        Command::RemoveWhale(addr) => mutation_reply(
            settings.remove_watched_address(addr),
            format!("Removed whale address: {addr}"),
            format!("Address not found: {addr}"),
        ),
        Command::ListWhales => numbered(
            "🐋 Tracked Whale Addresses:",
            "No whale addresses tracked.",
            &settings.snapshot().watched_addresses,
        ),
        Command::AddMarket(id) => mutation_reply(
            settings.add_market_filter(id),
            format!("Added market filter: {id}"),
            format!("Market filter already exists: {id}"),
        ),
        Command::RemoveMarket(id) => mutation_reply(
            settings.remove_market_filter(id),
            format!("Removed market filter: {id}"),
            format!("Market filter not found: {id}"),
        ),
        Command::ListMarkets => numbered(
            "📊 Market ID Filters:",
            "No market filters configured.",
            &settings.snapshot().market_filters,
        ),
        Command::AddText(text) => mutation_reply(
            settings.add_text_filter(text),
            format!("Added text filter: {text}"),
            format!("Text filter already exists: {text}"),
        ),
        Command::RemoveText(text) => mutation_reply(
            settings.remove_text_filter(text),
            format!("Removed text filter: {text}"),
            format!("Text filter not found: {text}"),
        ),
        Command::ListTexts => numbered(
            "🔍 Text Filters:",
            "No text filters configured.",
            &settings.snapshot().text_filters,
        ),
        Command::ExcludeMarket(id) => mutation_reply(
            settings.add_exclude_market(id),
            format!("Excluded market: {id}"),
            format!("Market already excluded: {id}"),
        ),
        Command::IncludeMarket(id) => mutation_reply(
            settings.remove_exclude_market(id),
            format!("Market no longer excluded: {id}"),
            format!("Market was not excluded: {id}"),
        ),
        Command::ExcludeText(text) => mutation_reply(
            settings.add_exclude_text(text),
            format!("Excluded text: {text}"),
            format!("Text already excluded: {text}"),
        ),
        Command::IncludeText(text) => mutation_reply(
            settings.remove_exclude_text(text),
            format!("Text no longer excluded: {text}"),
            format!("Text was not excluded: {text}"),
        ),
        Command::ListExcludes => {
            let s = settings.snapshot();
            format!(
                "{}\n\n{}",
                numbered("🚫 Excluded Markets:", "No excluded markets.", &s.exclude_market_ids),
                numbered("🚫 Excluded Text:", "No excluded text.", &s.exclude_text_filters),
            )
        }
        Command::SetMinValue(value) => mutation_reply(
            settings.set_min_value(*value),
            format!("Set minimum trade value to: ${value:.2}"),
            format!("Minimum trade value already ${value:.2}"),
        ),
        Command::SetInterval(secs) => mutation_reply(
            settings.set_poll_interval(*secs),
            format!("Set poll interval to: {secs}s (takes effect after the current wait)"),
            format!("Poll interval already {secs}s"),
        ),
        Command::ClearSeen => match trades.clear() {
            Ok(n) => format!("✅ Forgot {n} seen trade(s)"),
            Err(e) => format!("❌ Could not clear seen trades: {e}"),
        },
    }
}
