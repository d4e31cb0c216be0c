use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{FutureExt, StreamExt, stream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::api::VenueClient;
use crate::filter;
use crate::notifier::{Notifier, format_trade};
use crate::reporter;
use crate::settings::{Settings, SettingsStore};
use crate::store::TradeStore;
use crate::types::{CycleReport, Trade};

/// Consecutive delivery failures after which the rest of a cycle's alerts are
/// deferred to the next cycle.
const MAX_CONSECUTIVE_DELIVERY_FAILURES: usize = 3;

/// Lifecycle of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Polling,
    Dispatching,
    Sleeping,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Addresses fetched at the same time.
    pub fetch_concurrency: usize,
    /// Pause between consecutive alerts, to stay under messaging rate limits.
    pub notify_spacing: Duration,
    /// Trades older than this are ignored. Matches the ledger retention so
    /// pruned ids cannot be re-notified.
    pub stale_after: Option<Duration>,
    /// Emit a JSON report line on stdout after each cycle.
    pub report_cycles: bool,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            fetch_concurrency: 4,
            notify_spacing: Duration::from_secs(1),
            stale_after: Some(Duration::from_secs(7 * 24 * 3600)),
            report_cycles: false,
        }
    }
}

/// Sleep for `duration` unless shutdown is requested first.
///
/// Returns `true` if the wait ended because of shutdown (or because the
/// shutdown sender is gone).
pub async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = shutdown.wait_for(|stop| *stop) => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

/// Poll loop: fetch, dedup, filter, notify, mark seen, sleep.
pub struct Watcher<V, N> {
    venue: V,
    notifier: N,
    settings: Arc<SettingsStore>,
    trades: Arc<TradeStore>,
    options: WatcherOptions,
    state: watch::Sender<WatcherState>,
}

impl<V: VenueClient, N: Notifier> Watcher<V, N> {
    pub fn new(
        venue: V,
        notifier: N,
        settings: Arc<SettingsStore>,
        trades: Arc<TradeStore>,
        options: WatcherOptions,
    ) -> Self {
        Self {
            venue,
            notifier,
            settings,
            trades,
            options,
            state: watch::Sender::new(WatcherState::Idle),
        }
    }

    pub fn state(&self) -> WatcherState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<WatcherState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: WatcherState) {
        self.state.send_replace(state);
    }

    /// Run one cycle against a fresh settings snapshot.
    pub async fn poll_once(&self) -> CycleReport {
        let snapshot = self.settings.snapshot();
        self.run_cycle(&snapshot, None).await
    }

    /// Loop until `shutdown` becomes true. Per-address and per-trade errors never
    /// end the loop; a panicking cycle is logged and the loop carries on.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting trade polling");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let snapshot = self.settings.snapshot();
            let cycle = AssertUnwindSafe(self.run_cycle(&snapshot, Some(&shutdown)));
            if cycle.catch_unwind().await.is_err() {
                error!("Poll cycle panicked, continuing with next cycle");
            }

            self.set_state(WatcherState::Sleeping);
            let interval = Duration::from_secs(snapshot.poll_interval_secs);
            if sleep_or_shutdown(interval, &mut shutdown).await {
                break;
            }
        }
        self.set_state(WatcherState::Stopped);
        info!("Trade polling stopped");
    }

    async fn fetch_all(
        &self,
        settings: &Settings,
    ) -> Vec<(String, Result<Vec<Trade>, crate::error::VenueError>)> {
        stream::iter(settings.watched_addresses.iter().cloned())
            .map(|addr| async move {
                let res = self.venue.fetch_trades(&addr).await;
                (addr, res)
            })
            .buffered(self.options.fetch_concurrency.max(1))
            .collect()
            .await
    }

    async fn run_cycle(
        &self,
        settings: &Settings,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> CycleReport {
        let mut report = CycleReport {
            started_at: Utc::now().to_rfc3339(),
            addresses: settings.watched_addresses.len(),
            ..CycleReport::default()
        };

        if let Err(e) = self.trades.flush() {
            warn!("Trade ledger still not persisted: {e}");
        }

        if settings.watched_addresses.is_empty() {
            debug!("No whale addresses configured, waiting");
            report.finished_at = Utc::now().to_rfc3339();
            return report;
        }

        self.set_state(WatcherState::Polling);
        debug!(
            "Fetching trades for {} whale address(es)",
            settings.watched_addresses.len()
        );
        let results = self.fetch_all(settings).await;

        self.set_state(WatcherState::Dispatching);
        let stale_cutoff = self
            .options
            .stale_after
            .map(|age| Utc::now().timestamp() - age.as_secs() as i64);
        let mut consecutive_failures = 0;
        let mut sent_any = false;

        'addresses: for (addr, res) in results {
            let mut trades = match res {
                Ok(trades) => trades,
                Err(e) => {
                    warn!("Failed to fetch trades for {addr}: {e}");
                    report.fetch_failures += 1;
                    continue;
                }
            };
            report.fetched += trades.len();
            // Oldest first so alerts arrive in chronological order.
            trades.sort_by_key(|t| t.timestamp);

            for trade in trades {
                if self.trades.has(&trade.id) {
                    report.duplicates += 1;
                    continue;
                }
                if stale_cutoff.is_some_and(|cutoff| trade.timestamp < cutoff) {
                    report.stale += 1;
                    continue;
                }
                if let Err(reason) = filter::evaluate(&trade, settings) {
                    debug!("Skipping trade {}: {reason}", trade.id);
                    report.rejected += 1;
                    continue;
                }

                if shutdown.is_some_and(|rx| *rx.borrow()) {
                    info!("Shutdown requested, leaving remaining trades for the next run");
                    break 'addresses;
                }
                if consecutive_failures >= MAX_CONSECUTIVE_DELIVERY_FAILURES {
                    report.delivery_failures += 1;
                    continue;
                }
                if sent_any && !self.options.notify_spacing.is_zero() {
                    tokio::time::sleep(self.options.notify_spacing).await;
                }

                sent_any = true;
                match self.notifier.send(&format_trade(&trade)).await {
                    Ok(()) => {
                        consecutive_failures = 0;
                        report.notified += 1;
                        info!(
                            "Notified trade {} ({} ${:.2} on \"{}\")",
                            trade.id, trade.side, trade.usd_value, trade.market_text
                        );
                        if let Err(e) = self.trades.mark_seen(&trade.id) {
                            warn!("Trade {} notified but ledger not persisted: {e}", trade.id);
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        report.delivery_failures += 1;
                        warn!(
                            "Failed to deliver trade {}: {e}; will retry next cycle",
                            trade.id
                        );
                        if consecutive_failures == MAX_CONSECUTIVE_DELIVERY_FAILURES {
                            warn!("Deferring remaining alerts this cycle after repeated delivery failures");
                        }
                    }
                }
            }
        }

        report.finished_at = Utc::now().to_rfc3339();
        if report.has_activity() {
            info!(
                "Cycle done: {} notified, {} delivery failure(s), {} fetch failure(s), {} fetched",
                report.notified, report.delivery_failures, report.fetch_failures, report.fetched
            );
        } else {
            debug!(
                "Cycle done: {} fetched, {} already seen, {} filtered",
                report.fetched, report.duplicates, report.rejected
            );
        }
        if self.options.report_cycles {
            reporter::report_cycle(&report);
        }
        report
    }
}
