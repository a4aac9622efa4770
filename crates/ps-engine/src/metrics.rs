//! Metrics Aggregator - rolling per-provider statistics
//!
//! Sole owner and writer of ProviderMetrics. Consumes the transaction
//! stream, maintains bounded recent-transaction windows, and derives status
//! transitions from the rolling success rate. Downstream components only
//! ever see cloned snapshots.

use parking_lot::RwLock;
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use ps_common::{ProviderMetrics, ProviderStatus, Transaction};

use crate::config::ProviderProfile;

/// Most recent transactions kept per provider.
const WINDOW_CAP: usize = 50;
/// Success rate is computed over at most this many recent transactions.
const SUCCESS_RATE_SAMPLE: usize = 20;
/// Weight of the newest observation in the response-time average.
const EWMA_ALPHA: f64 = 0.1;

/// Rolling success rate below this degrades an operational provider.
const DEGRADE_BELOW: f64 = 90.0;
/// Rolling success rate above this recovers a degraded provider.
const RECOVER_ABOVE: f64 = 95.0;

struct ProviderEntry {
    id: String,
    name: String,
    fee_per_transaction: f64,
    status: ProviderStatus,
    uptime: f64,
    avg_response_time_ms: f64,
    success_rate: f64,
    transactions_today: u64,
    window: VecDeque<Transaction>,
}

impl ProviderEntry {
    fn from_profile(profile: &ProviderProfile) -> Self {
        Self {
            id: profile.id.clone(),
            name: profile.name.clone(),
            fee_per_transaction: profile.fee_per_transaction,
            status: profile.initial_status,
            uptime: profile.initial_uptime,
            avg_response_time_ms: profile.base_response_time_ms,
            success_rate: profile.success_rate,
            transactions_today: profile.initial_transactions_today,
            window: VecDeque::with_capacity(WINDOW_CAP),
        }
    }

    fn snapshot(&self) -> ProviderMetrics {
        ProviderMetrics {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            uptime: self.uptime,
            avg_response_time_ms: self.avg_response_time_ms,
            fee_per_transaction: self.fee_per_transaction,
            transactions_today: self.transactions_today,
            success_rate: self.success_rate,
            recent_transactions: self.window.iter().cloned().collect(),
        }
    }

    fn apply(&mut self, txn: &Transaction) {
        if self.window.len() == WINDOW_CAP {
            self.window.pop_front();
        }
        self.window.push_back(txn.clone());
        self.transactions_today += 1;

        self.avg_response_time_ms =
            self.avg_response_time_ms * (1.0 - EWMA_ALPHA) + txn.response_time_ms * EWMA_ALPHA;

        let sample = self.window.len().min(SUCCESS_RATE_SAMPLE);
        let successes = self
            .window
            .iter()
            .rev()
            .take(sample)
            .filter(|t| t.is_success())
            .count();
        self.success_rate = successes as f64 / sample as f64 * 100.0;

        // Rolling-rate band transitions; a hard `down` is never touched here
        match self.status {
            ProviderStatus::Operational if self.success_rate < DEGRADE_BELOW => {
                self.status = ProviderStatus::Degraded;
                warn!(
                    provider_id = %self.id,
                    success_rate = self.success_rate,
                    "Provider degraded"
                );
            }
            ProviderStatus::Degraded if self.success_rate > RECOVER_ABOVE => {
                self.status = ProviderStatus::Operational;
                info!(
                    provider_id = %self.id,
                    success_rate = self.success_rate,
                    "Provider recovered to operational"
                );
            }
            _ => {}
        }
    }
}

/// Registry of rolling provider metrics, one entry per configured provider.
pub struct MetricsRegistry {
    providers: RwLock<Vec<ProviderEntry>>,
    tx: broadcast::Sender<Vec<ProviderMetrics>>,
}

impl MetricsRegistry {
    pub fn new(profiles: &[ProviderProfile]) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            providers: RwLock::new(profiles.iter().map(ProviderEntry::from_profile).collect()),
            tx,
        }
    }

    /// Fold one transaction into its provider's rolling metrics.
    /// Returns false (and changes nothing) for an unknown provider.
    pub fn record(&self, txn: &Transaction) -> bool {
        let snapshot = {
            let mut providers = self.providers.write();
            let Some(entry) = providers.iter_mut().find(|p| p.id == txn.provider_id) else {
                debug!(provider_id = %txn.provider_id, "Dropping transaction for unknown provider");
                return false;
            };
            entry.apply(txn);
            snapshot_locked(&providers)
        };
        let _ = self.tx.send(snapshot);
        true
    }

    /// Simulate a hard outage: status pinned to `down`, uptime docked.
    pub fn force_down(&self, provider_id: &str) -> bool {
        let snapshot = {
            let mut providers = self.providers.write();
            let Some(entry) = providers.iter_mut().find(|p| p.id == provider_id) else {
                return false;
            };
            entry.status = ProviderStatus::Down;
            entry.uptime = (entry.uptime - 2.0).max(85.0);
            warn!(provider_id = %provider_id, uptime = entry.uptime, "Provider forced down");
            snapshot_locked(&providers)
        };
        let _ = self.tx.send(snapshot);
        true
    }

    /// Clear a simulated outage: status back to operational, uptime credited.
    pub fn force_recovery(&self, provider_id: &str) -> bool {
        let snapshot = {
            let mut providers = self.providers.write();
            let Some(entry) = providers.iter_mut().find(|p| p.id == provider_id) else {
                return false;
            };
            entry.status = ProviderStatus::Operational;
            entry.uptime = (entry.uptime + 1.0).min(99.9);
            info!(provider_id = %provider_id, uptime = entry.uptime, "Provider recovery forced");
            snapshot_locked(&providers)
        };
        let _ = self.tx.send(snapshot);
        true
    }

    pub fn snapshot(&self) -> Vec<ProviderMetrics> {
        snapshot_locked(&self.providers.read())
    }

    pub fn status_of(&self, provider_id: &str) -> Option<ProviderStatus> {
        self.providers
            .read()
            .iter()
            .find(|p| p.id == provider_id)
            .map(|p| p.status)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<ProviderMetrics>> {
        self.tx.subscribe()
    }
}

fn snapshot_locked(providers: &[ProviderEntry]) -> Vec<ProviderMetrics> {
    providers.iter().map(ProviderEntry::snapshot).collect()
}
