use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::{StorageError, ValidationError};
use crate::store::write_json_atomic;

/// Lowest accepted poll interval, in seconds.
pub const MIN_POLL_INTERVAL_SECS: u64 = 10;

/// Runtime-mutable watcher settings.
///
/// Instances handed out by [`SettingsStore::snapshot`] are immutable; a
/// mutation produces a new instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Lowercase `0x` addresses polled each cycle.
    #[serde(default, alias = "whale_addresses")]
    pub watched_addresses: BTreeSet<String>,
    #[serde(default, alias = "market_ids")]
    pub market_filters: BTreeSet<String>,
    /// Lowercase substrings; at least one must occur in the market text.
    #[serde(default, alias = "market_text_filters")]
    pub text_filters: BTreeSet<String>,
    /// Lowercase market ids that never alert.
    #[serde(default)]
    pub exclude_market_ids: BTreeSet<String>,
    /// Lowercase substrings that suppress an alert when present.
    #[serde(default, alias = "exclude_market_text_filters")]
    pub exclude_text_filters: BTreeSet<String>,
    #[serde(default, alias = "min_trade_value")]
    pub min_value: f64,
    #[serde(default = "default_poll_interval", alias = "poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            watched_addresses: BTreeSet::new(),
            market_filters: BTreeSet::new(),
            text_filters: BTreeSet::new(),
            exclude_market_ids: BTreeSet::new(),
            exclude_text_filters: BTreeSet::new(),
            min_value: 0.0,
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Settings {
    /// Clamp scalars into range and drop entries that fail validation.
    ///
    /// Applied to values loaded from disk or startup configuration, which are
    /// repaired rather than rejected.
    pub fn sanitized(mut self) -> Self {
        if self.poll_interval_secs < MIN_POLL_INTERVAL_SECS {
            warn!(
                "Poll interval {}s below floor, using {MIN_POLL_INTERVAL_SECS}s",
                self.poll_interval_secs
            );
            self.poll_interval_secs = MIN_POLL_INTERVAL_SECS;
        }
        if !self.min_value.is_finite() || self.min_value < 0.0 {
            warn!("Minimum value {} invalid, using 0", self.min_value);
            self.min_value = 0.0;
        }
        self.watched_addresses = self
            .watched_addresses
            .into_iter()
            .filter_map(|addr| match normalize_address(&addr) {
                Ok(a) => Some(a),
                Err(e) => {
                    warn!("Dropping watched address: {e}");
                    None
                }
            })
            .collect();
        self.market_filters = clean_set(self.market_filters, false);
        self.text_filters = clean_set(self.text_filters, true);
        self.exclude_market_ids = clean_set(self.exclude_market_ids, true);
        self.exclude_text_filters = clean_set(self.exclude_text_filters, true);
        self
    }
}

fn clean_set(set: BTreeSet<String>, lowercase: bool) -> BTreeSet<String> {
    set.into_iter()
        .map(|s| {
            let s = s.trim();
            if lowercase { s.to_lowercase() } else { s.to_string() }
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Validate and normalize a whale address to lowercase `0x` + 40 hex chars.
pub fn normalize_address(input: &str) -> Result<String, ValidationError> {
    let addr = input.trim().to_lowercase();
    let valid = addr
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()));
    if valid {
        Ok(addr)
    } else {
        Err(ValidationError::InvalidAddress(input.trim().to_string()))
    }
}

fn normalize_term(input: &str, what: &'static str) -> Result<String, ValidationError> {
    let term = input.trim().to_lowercase();
    if term.is_empty() {
        return Err(ValidationError::Empty(what));
    }
    Ok(term)
}

fn normalize_market_id(input: &str) -> Result<String, ValidationError> {
    let id = input.trim();
    if id.is_empty() {
        return Err(ValidationError::Empty("market id"));
    }
    Ok(id.to_string())
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("settings not saved: {0}")]
    Storage(#[from] StorageError),
}

/// Shared, persisted settings.
///
/// Readers take an `Arc` snapshot; writers serialize on the same mutex, apply
/// the change to a copy, persist the copy, and only then publish it. A failed
/// validation or write leaves the published settings untouched.
pub struct SettingsStore {
    path: PathBuf,
    current: Mutex<Arc<Settings>>,
}

impl SettingsStore {
    /// Load persisted settings from `path`, falling back to `bootstrap` when the
    /// file is missing or unreadable.
    pub fn load(path: impl Into<PathBuf>, bootstrap: Settings) -> Self {
        let path = path.into();
        let settings = match read_settings(&path) {
            Ok(Some(persisted)) => {
                info!("Loaded persisted settings from {}", path.display());
                persisted
            }
            Ok(None) => {
                info!(
                    "No persisted settings at {}, using startup configuration",
                    path.display()
                );
                bootstrap
            }
            Err(e) => {
                warn!(
                    "Could not load settings from {} ({e}), using startup configuration",
                    path.display()
                );
                bootstrap
            }
        };
        Self::with_settings(path, settings)
    }

    /// Build a store around explicit settings without touching disk.
    pub fn with_settings(path: impl Into<PathBuf>, settings: Settings) -> Self {
        Self {
            path: path.into(),
            current: Mutex::new(Arc::new(settings.sanitized())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Arc<Settings>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consistent, immutable view of the current settings.
    pub fn snapshot(&self) -> Arc<Settings> {
        Arc::clone(&self.lock())
    }

    /// Apply `change` atomically. `change` returns whether it modified anything;
    /// unchanged settings are not rewritten.
    fn mutate<F>(&self, change: F) -> Result<bool, SettingsError>
    where
        F: FnOnce(&mut Settings) -> Result<bool, ValidationError>,
    {
        let mut guard = self.lock();
        let mut next = Settings::clone(&guard);
        if !change(&mut next)? {
            return Ok(false);
        }
        write_json_atomic(&self.path, &next)?;
        *guard = Arc::new(next);
        Ok(true)
    }

    pub fn add_watched_address(&self, address: &str) -> Result<bool, SettingsError> {
        let addr = normalize_address(address)?;
        self.mutate(|s| Ok(s.watched_addresses.insert(addr)))
    }

    pub fn remove_watched_address(&self, address: &str) -> Result<bool, SettingsError> {
        let addr = normalize_address(address)?;
        self.mutate(|s| Ok(s.watched_addresses.remove(&addr)))
    }

    pub fn add_market_filter(&self, market_id: &str) -> Result<bool, SettingsError> {
        let id = normalize_market_id(market_id)?;
        self.mutate(|s| Ok(s.market_filters.insert(id)))
    }

    pub fn remove_market_filter(&self, market_id: &str) -> Result<bool, SettingsError> {
        let id = normalize_market_id(market_id)?;
        self.mutate(|s| Ok(s.market_filters.remove(&id)))
    }

    pub fn add_text_filter(&self, text: &str) -> Result<bool, SettingsError> {
        let term = normalize_term(text, "text filter")?;
        self.mutate(|s| Ok(s.text_filters.insert(term)))
    }

    pub fn remove_text_filter(&self, text: &str) -> Result<bool, SettingsError> {
        let term = normalize_term(text, "text filter")?;
        self.mutate(|s| Ok(s.text_filters.remove(&term)))
    }

    pub fn add_exclude_market(&self, market_id: &str) -> Result<bool, SettingsError> {
        let id = normalize_term(market_id, "market id")?;
        self.mutate(|s| Ok(s.exclude_market_ids.insert(id)))
    }

    pub fn remove_exclude_market(&self, market_id: &str) -> Result<bool, SettingsError> {
        let id = normalize_term(market_id, "market id")?;
        self.mutate(|s| Ok(s.exclude_market_ids.remove(&id)))
    }

    pub fn add_exclude_text(&self, text: &str) -> Result<bool, SettingsError> {
        let term = normalize_term(text, "text filter")?;
        self.mutate(|s| Ok(s.exclude_text_filters.insert(term)))
    }

    pub fn remove_exclude_text(&self, text: &str) -> Result<bool, SettingsError> {
        let term = normalize_term(text, "text filter")?;
        self.mutate(|s| Ok(s.exclude_text_filters.remove(&term)))
    }

    pub fn set_min_value(&self, value: f64) -> Result<bool, SettingsError> {
        if !value.is_finite() || value < 0.0 {
            return Err(ValidationError::InvalidMinValue(value).into());
        }
        self.mutate(|s| {
            let changed = s.min_value != value;
            s.min_value = value;
            Ok(changed)
        })
    }

    pub fn set_poll_interval(&self, secs: u64) -> Result<bool, SettingsError> {
        if secs < MIN_POLL_INTERVAL_SECS {
            return Err(ValidationError::IntervalTooShort {
                got: secs,
                min: MIN_POLL_INTERVAL_SECS,
            }
            .into());
        }
        self.mutate(|s| {
            let changed = s.poll_interval_secs != secs;
            s.poll_interval_secs = secs;
            Ok(changed)
        })
    }
}

/// Keys recognized in a state file, including the names older state files use.
const KNOWN_KEYS: &[&str] = &[
    "watched_addresses",
    "whale_addresses",
    "market_filters",
    "market_ids",
    "text_filters",
    "market_text_filters",
    "exclude_market_ids",
    "exclude_text_filters",
    "exclude_market_text_filters",
    "min_value",
    "min_trade_value",
    "poll_interval_secs",
    "poll_interval",
];

fn read_settings(path: &Path) -> anyhow::Result<Option<Settings>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(None);
    }
    let value: serde_json::Value = serde_json::from_str(&contents)?;
    let recognized = value
        .as_object()
        .is_some_and(|obj| obj.keys().any(|k| KNOWN_KEYS.contains(&k.as_str())));
    if !recognized {
        anyhow::bail!("no recognized settings keys");
    }
    Ok(Some(serde_json::from_value(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::tempdir;

    const WHALE: &str = "0xDB27BF2AC5D428A9C63DBC914611036855A6C56E";
    const WHALE_LC: &str = "0xdb27bf2ac5d428a9c63dbc914611036855a6c56e";

    fn store_in(dir: &Path) -> SettingsStore {
        SettingsStore::load(dir.join("config_state.json"), Settings::default())
    }

    fn whale(n: u8) -> String {
        format!("0x{:040x}", n)
    }

    // ── validation ─────────────────────────────────────────────────

    #[test]
    fn address_is_normalized_lowercase() {
        assert_eq!(normalize_address(&format!("  {WHALE} ")).unwrap(), WHALE_LC);
    }

    #[test]
    fn address_rejects_bad_input() {
        assert!(normalize_address("").is_err());
        assert!(normalize_address("db27bf2ac5d428a9c63dbc914611036855a6c56e").is_err());
        assert!(normalize_address("0x1234").is_err());
        assert!(normalize_address("0xzz27bf2ac5d428a9c63dbc914611036855a6c56e").is_err());
    }

    #[test]
    fn interval_floor_enforced() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.set_poll_interval(30).unwrap();

        let err = store.set_poll_interval(5).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Validation(ValidationError::IntervalTooShort { got: 5, min: 10 })
        ));
        assert_eq!(store.snapshot().poll_interval_secs, 30);

        assert!(store.set_poll_interval(10).unwrap());
        assert_eq!(store.snapshot().poll_interval_secs, 10);
    }

    #[test]
    fn min_value_must_be_non_negative() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.set_min_value(-1.0).is_err());
        assert!(store.set_min_value(f64::NAN).is_err());
        assert_eq!(store.snapshot().min_value, 0.0);
        assert!(store.set_min_value(250.0).unwrap());
        assert!(!store.set_min_value(250.0).unwrap());
        assert_eq!(store.snapshot().min_value, 250.0);
    }

    #[test]
    fn empty_text_filter_rejected() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(matches!(
            store.add_text_filter("   ").unwrap_err(),
            SettingsError::Validation(ValidationError::Empty(_))
        ));
    }

    // ── mutations ──────────────────────────────────────────────────

    #[test]
    fn add_remove_watched_address() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.add_watched_address(WHALE).unwrap());
        assert!(!store.add_watched_address(WHALE_LC).unwrap());
        assert!(store.snapshot().watched_addresses.contains(WHALE_LC));
        assert!(store.remove_watched_address(WHALE).unwrap());
        assert!(!store.remove_watched_address(WHALE).unwrap());
        assert!(store.snapshot().watched_addresses.is_empty());
    }

    #[test]
    fn text_filters_are_lowercased() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.add_text_filter("Trump 2028").unwrap();
        assert!(store.snapshot().text_filters.contains("trump 2028"));
        assert!(store.remove_text_filter("TRUMP 2028").unwrap());
    }

    #[test]
    fn market_filters_keep_case() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.add_market_filter(" 0xAbC ").unwrap();
        assert!(store.snapshot().market_filters.contains("0xAbC"));
    }

    #[test]
    fn exclusions_round_trip_through_store() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.add_exclude_market("0xCOND").unwrap());
        assert!(store.add_exclude_text("Weather").unwrap());
        let snap = store.snapshot();
        assert!(snap.exclude_market_ids.contains("0xcond"));
        assert!(snap.exclude_text_filters.contains("weather"));
        assert!(store.remove_exclude_market("0xcond").unwrap());
        assert!(store.remove_exclude_text("weather").unwrap());
    }

    // ── persistence ────────────────────────────────────────────────

    #[test]
    fn mutations_survive_reload() {
        let dir = tempdir().unwrap();
        {
            let store = store_in(dir.path());
            store.add_watched_address(WHALE).unwrap();
            store.add_market_filter("m1").unwrap();
            store.add_text_filter("trump").unwrap();
            store.set_min_value(100.0).unwrap();
            store.set_poll_interval(45).unwrap();
        }
        let reloaded = store_in(dir.path());
        let snap = reloaded.snapshot();
        assert!(snap.watched_addresses.contains(WHALE_LC));
        assert!(snap.market_filters.contains("m1"));
        assert!(snap.text_filters.contains("trump"));
        assert_eq!(snap.min_value, 100.0);
        assert_eq!(snap.poll_interval_secs, 45);
    }

    #[test]
    fn persisted_state_wins_over_bootstrap() {
        let dir = tempdir().unwrap();
        store_in(dir.path()).set_min_value(5.0).unwrap();

        let bootstrap = Settings {
            min_value: 999.0,
            ..Settings::default()
        };
        let store = SettingsStore::load(dir.path().join("config_state.json"), bootstrap);
        assert_eq!(store.snapshot().min_value, 5.0);
    }

    #[test]
    fn corrupt_state_falls_back_to_bootstrap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config_state.json");
        fs::write(&path, "[1, 2").unwrap();
        let bootstrap = Settings {
            min_value: 42.0,
            ..Settings::default()
        };
        let store = SettingsStore::load(&path, bootstrap);
        assert_eq!(store.snapshot().min_value, 42.0);
    }

    #[test]
    fn reads_legacy_state_file_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config_state.json");
        fs::write(
            &path,
            format!(
                r#"{{
                    "poll_interval": 120,
                    "min_trade_value": 2500.0,
                    "heartbeat_interval": 3600,
                    "whale_addresses": ["{WHALE_LC}"],
                    "market_ids": ["0xCond"],
                    "market_text_filters": ["trump"],
                    "exclude_market_ids": [],
                    "exclude_market_text_filters": ["up or down"]
                }}"#
            ),
        )
        .unwrap();

        let store = SettingsStore::load(&path, Settings::default());
        let snap = store.snapshot();
        assert_eq!(snap.poll_interval_secs, 120);
        assert_eq!(snap.min_value, 2500.0);
        assert!(snap.watched_addresses.contains(WHALE_LC));
        assert!(snap.market_filters.contains("0xCond"));
        assert!(snap.text_filters.contains("trump"));
        assert!(snap.exclude_text_filters.contains("up or down"));
    }

    #[test]
    fn unrecognized_state_falls_back_to_bootstrap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config_state.json");
        fs::write(&path, r#"{"whales": ["0xabc"], "threshold": 5}"#).unwrap();
        let bootstrap = Settings {
            watched_addresses: [whale(1)].into_iter().collect(),
            ..Settings::default()
        };
        let store = SettingsStore::load(&path, bootstrap);
        assert!(store.snapshot().watched_addresses.contains(&whale(1)));
    }

    #[test]
    fn loaded_values_are_sanitized() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config_state.json");
        fs::write(
            &path,
            format!(
                r#"{{"watched_addresses": ["{WHALE}", "nonsense"], "min_value": -3, "poll_interval_secs": 2}}"#
            ),
        )
        .unwrap();
        let snap = SettingsStore::load(&path, Settings::default()).snapshot();
        assert_eq!(snap.poll_interval_secs, MIN_POLL_INTERVAL_SECS);
        assert_eq!(snap.min_value, 0.0);
        assert_eq!(snap.watched_addresses.len(), 1);
        assert!(snap.watched_addresses.contains(WHALE_LC));
    }

    #[test]
    fn failed_write_leaves_state_unchanged() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        let store = SettingsStore::with_settings(blocker.join("state.json"), Settings::default());

        let err = store.add_watched_address(WHALE).unwrap_err();
        assert!(matches!(err, SettingsError::Storage(_)));
        assert!(store.snapshot().watched_addresses.is_empty());
    }

    // ── concurrency ────────────────────────────────────────────────

    #[test]
    fn snapshot_is_unaffected_by_later_mutation() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let before = store.snapshot();
        store.add_watched_address(WHALE).unwrap();
        store.set_min_value(10.0).unwrap();
        assert!(before.watched_addresses.is_empty());
        assert_eq!(before.min_value, 0.0);
    }

    #[test]
    fn concurrent_mutations_are_serialized() {
        let dir = tempdir().unwrap();
        let store = Arc::new(store_in(dir.path()));
        let handles: Vec<_> = (0..8u8)
            .map(|n| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store.add_watched_address(&whale(n)).unwrap();
                    store.set_min_value(f64::from(n)).unwrap();
                })
            })
            .collect();

        // Snapshots taken while writers run are always published states.
        for _ in 0..50 {
            let snap = store.snapshot();
            assert!(snap.watched_addresses.len() <= 8);
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.snapshot().watched_addresses.len(), 8);
        let reloaded = store_in(dir.path());
        assert_eq!(reloaded.snapshot(), store.snapshot());
    }
}
