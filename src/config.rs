use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use crate::settings::Settings;
use crate::{DATA_API_BASE, TELEGRAM_API_BASE};

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Top-level application config deserialized from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

/// Bot credentials and the single authorized chat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Accepts either a quoted string or a bare integer in TOML.
    #[serde(default, deserialize_with = "string_or_int")]
    pub chat_id: String,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Polling interval in seconds; only used when no persisted state exists.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Minimum trade value in USD; only used when no persisted state exists.
    #[serde(default)]
    pub min_trade_value: f64,
    /// Most recent trades requested per address each cycle.
    #[serde(default = "default_trades_per_address")]
    pub trades_per_address: u32,
    /// Days a notified trade id is remembered.
    #[serde(default = "default_retention_days")]
    pub seen_retention_days: u32,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_trades_file")]
    pub trades_file: PathBuf,
    /// Per-request timeout for the data API, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_data_api_base")]
    pub data_api_base: String,
    #[serde(default = "default_telegram_api_base")]
    pub telegram_api_base: String,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_trades_per_address() -> u32 {
    100
}

fn default_retention_days() -> u32 {
    7
}

fn default_request_timeout() -> u64 {
    30
}

fn default_state_file() -> PathBuf {
    PathBuf::from("config_state.json")
}

fn default_trades_file() -> PathBuf {
    PathBuf::from("trades.json")
}

fn default_data_api_base() -> String {
    DATA_API_BASE.to_string()
}

fn default_telegram_api_base() -> String {
    TELEGRAM_API_BASE.to_string()
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            min_trade_value: 0.0,
            trades_per_address: default_trades_per_address(),
            seen_retention_days: default_retention_days(),
            state_file: default_state_file(),
            trades_file: default_trades_file(),
            request_timeout_secs: default_request_timeout(),
            data_api_base: default_data_api_base(),
            telegram_api_base: default_telegram_api_base(),
        }
    }
}

impl SettingsConfig {
    pub fn retention_secs(&self) -> i64 {
        i64::from(self.seen_retention_days) * 24 * 3600
    }
}

/// Initial watch list and filters, applied only on first start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub whale_addresses: Vec<String>,
    #[serde(default)]
    pub market_ids: Vec<String>,
    #[serde(default)]
    pub market_text_filters: Vec<String>,
    #[serde(default)]
    pub exclude_market_ids: Vec<String>,
    #[serde(default)]
    pub exclude_market_text_filters: Vec<String>,
}

fn string_or_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Int(n) => n.to_string(),
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if it exists, then apply process environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            info!("{} not found, using defaults and environment", path.display());
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from environment-style variables looked up via `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(token) = var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token.trim().to_string();
        }
        if let Some(chat) = var("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = chat.trim().to_string();
        }
        if let Some(list) = var("WHALE_ADDRESSES") {
            self.bootstrap.whale_addresses = split_list(&list);
        }
        if let Some(raw) = var("POLL_INTERVAL") {
            self.settings.poll_interval_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("POLL_INTERVAL must be whole seconds, got {raw:?}"))?;
        }
        if let Some(raw) = var("MIN_TRADE_VALUE") {
            self.settings.min_trade_value = raw
                .trim()
                .parse()
                .with_context(|| format!("MIN_TRADE_VALUE must be a number, got {raw:?}"))?;
        }
        Ok(())
    }

    /// Check that the fields required to run the watcher are present.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            bail!("telegram.bot_token is not set (config or TELEGRAM_BOT_TOKEN)");
        }
        if self.telegram.chat_id.trim().is_empty() {
            bail!("telegram.chat_id is not set (config or TELEGRAM_CHAT_ID)");
        }
        if self.settings.request_timeout_secs == 0 {
            bail!("settings.request_timeout_secs must be at least 1");
        }
        if self.settings.trades_per_address == 0 {
            bail!("settings.trades_per_address must be at least 1");
        }
        Ok(())
    }

    /// Settings used when no persisted state exists yet.
    pub fn bootstrap_settings(&self) -> Settings {
        let b = &self.bootstrap;
        Settings {
            watched_addresses: b.whale_addresses.iter().cloned().collect(),
            market_filters: b.market_ids.iter().cloned().collect(),
            text_filters: b.market_text_filters.iter().cloned().collect(),
            exclude_market_ids: b.exclude_market_ids.iter().cloned().collect(),
            exclude_text_filters: b.exclude_market_text_filters.iter().cloned().collect(),
            min_value: self.settings.min_trade_value,
            poll_interval_secs: self.settings.poll_interval_secs,
        }
        .sanitized()
    }

    /// Write config to the given TOML file path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    const WHALE: &str = "0xdb27bf2ac5d428a9c63dbc914611036855a6c56e";

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // ── parsing ────────────────────────────────────────────────────

    #[test]
    fn parses_full_config() {
        let raw = format!(
            r#"
            [telegram]
            bot_token = "123:ABC"
            chat_id = -1001234

            [settings]
            poll_interval_secs = 30
            min_trade_value = 250.5
            trades_file = "/var/lib/whales/trades.json"

            [bootstrap]
            whale_addresses = ["{WHALE}"]
            market_text_filters = ["Trump"]
            "#
        );
        let config: AppConfig = toml::from_str(&raw).unwrap();
        assert_eq!(config.telegram.chat_id, "-1001234");
        assert_eq!(config.settings.poll_interval_secs, 30);
        assert_eq!(config.settings.min_trade_value, 250.5);
        assert_eq!(config.settings.trades_per_address, 100);
        assert_eq!(
            config.settings.trades_file,
            PathBuf::from("/var/lib/whales/trades.json")
        );
        assert_eq!(config.settings.state_file, PathBuf::from("config_state.json"));
        assert_eq!(config.bootstrap.whale_addresses, vec![WHALE.to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.settings.poll_interval_secs, 60);
        assert_eq!(config.settings.seen_retention_days, 7);
        assert_eq!(config.settings.retention_secs(), 7 * 24 * 3600);
        assert_eq!(config.settings.data_api_base, DATA_API_BASE);
        assert_eq!(config.settings.request_timeout_secs, 30);
        assert!(config.validate().is_err());
    }

    // ── environment ────────────────────────────────────────────────

    #[test]
    fn env_overrides_file_values() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("TELEGRAM_BOT_TOKEN", " 999:XYZ "),
                ("TELEGRAM_CHAT_ID", "42"),
                ("WHALE_ADDRESSES", &format!("{WHALE}, ,0xabc")),
                ("POLL_INTERVAL", "120"),
                ("MIN_TRADE_VALUE", "1000"),
            ]))
            .unwrap();
        assert_eq!(config.telegram.bot_token, "999:XYZ");
        assert_eq!(config.telegram.chat_id, "42");
        assert_eq!(config.bootstrap.whale_addresses.len(), 2);
        assert_eq!(config.settings.poll_interval_secs, 120);
        assert_eq!(config.settings.min_trade_value, 1000.0);
    }

    #[test]
    fn bad_env_number_is_an_error() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[("POLL_INTERVAL", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("POLL_INTERVAL"));
    }

    #[test]
    fn missing_credentials_fail_validation() {
        let mut config = AppConfig::default();
        config.telegram.bot_token = "123:ABC".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("chat_id"));
    }

    // ── bootstrap ──────────────────────────────────────────────────

    #[test]
    fn bootstrap_settings_are_sanitized() {
        let mut config = AppConfig::default();
        config.bootstrap.whale_addresses =
            vec![WHALE.to_uppercase().replace("0X", "0x"), "nope".to_string()];
        config.bootstrap.market_text_filters = vec!["  Trump ".to_string()];
        config.settings.poll_interval_secs = 1;
        let settings = config.bootstrap_settings();
        assert_eq!(settings.watched_addresses.len(), 1);
        assert!(settings.watched_addresses.contains(WHALE));
        assert!(settings.text_filters.contains("trump"));
        assert_eq!(settings.poll_interval_secs, 10);
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = AppConfig::default();
        config.telegram.bot_token = "123:ABC".to_string();
        config.telegram.chat_id = "42".to_string();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.telegram.bot_token, "123:ABC");
        assert_eq!(loaded.telegram.chat_id, "42");
    }
}
