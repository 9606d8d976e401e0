//! Wallet balance monitor.
//!
//! Polls the configured wallet's USD balance on a fixed interval and
//! publishes the latest snapshot to any number of readers via a
//! `tokio::sync::watch` channel — single writer (this background task), many
//! readers (the router's `auto` path, `GET /health?full=true`), published
//! atomically with no lock held across the request path.
//!
//! Advisory only: a missing snapshot (monitor hasn't sampled yet, or the
//! fetch errored) is treated as "unknown, proceed" rather than blocking
//! anything.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::watch;
use tracing::{info, warn};

const EMPTY_THRESHOLD_USD: f64 = 0.01;
const LOW_THRESHOLD_USD: f64 = 1.00;

#[derive(Debug, Clone)]
pub struct BalanceSnapshot {
    pub balance_usd: Decimal,
    pub is_low: bool,
    pub is_empty: bool,
    pub sampled_at: DateTime<Utc>,
}

impl BalanceSnapshot {
    fn from_balance(balance_usd: Decimal) -> Self {
        let as_f64 = balance_usd.to_f64().unwrap_or(0.0);
        Self {
            balance_usd,
            is_empty: as_f64 <= EMPTY_THRESHOLD_USD,
            is_low: as_f64 <= LOW_THRESHOLD_USD,
            sampled_at: Utc::now(),
        }
    }
}

/// A fetch function the monitor polls on its interval. Boxed so the caller
/// (typically a `PaymentBackend::Wallet`) doesn't leak its concrete type.
pub type BalanceFetcher = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<Decimal>> + Send + Sync>;

pub struct BalanceMonitor {
    rx: watch::Receiver<Option<BalanceSnapshot>>,
}

impl BalanceMonitor {
    /// Spawn the polling task and return a handle readers can clone cheaply.
    pub fn spawn(poll_interval: Duration, fetch: BalanceFetcher) -> Self {
        let (tx, rx) = watch::channel(None);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            let mut was_low = false;
            let mut was_empty = false;
            loop {
                interval.tick().await;
                match fetch().await {
                    Ok(balance) => {
                        let snapshot = BalanceSnapshot::from_balance(balance);
                        if snapshot.is_empty && !was_empty {
                            warn!(balance = %snapshot.balance_usd, "wallet balance is empty");
                        } else if snapshot.is_low && !was_low {
                            warn!(balance = %snapshot.balance_usd, "wallet balance is low");
                        } else if !snapshot.is_low && was_low {
                            info!(balance = %snapshot.balance_usd, "wallet balance recovered");
                        }
                        was_low = snapshot.is_low;
                        was_empty = snapshot.is_empty;
                        // A closed receiver means every handle was dropped; stop polling.
                        if tx.send(Some(snapshot)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "balance poll failed — keeping previous snapshot");
                    }
                }
            }
        });

        Self { rx }
    }

    /// Current snapshot, or `None` if the monitor hasn't completed a
    /// successful poll yet.
    pub fn latest(&self) -> Option<BalanceSnapshot> {
        self.rx.borrow().clone()
    }
}

impl Clone for BalanceMonitor {
    fn clone(&self) -> Self {
        Self { rx: self.rx.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn monitor_publishes_first_snapshot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let monitor = BalanceMonitor::spawn(
            Duration::from_millis(10),
            Box::new(move || {
                calls2.fetch_add(1, Ordering::SeqCst);
                async { Ok(Decimal::new(500, 2)) }.boxed()
            }),
        );

        tokio::time::advance(Duration::from_millis(15)).await;
        tokio::task::yield_now().await;

        let snapshot = monitor.latest().expect("monitor should have sampled once");
        assert!(!snapshot.is_low);
        assert!(!snapshot.is_empty);
    }

    #[test]
    fn snapshot_flags_empty_and_low_thresholds() {
        let empty = BalanceSnapshot::from_balance(Decimal::new(0, 0));
        assert!(empty.is_empty);
        assert!(empty.is_low);

        let low = BalanceSnapshot::from_balance(Decimal::new(50, 2));
        assert!(!low.is_empty);
        assert!(low.is_low);

        let healthy = BalanceSnapshot::from_balance(Decimal::new(500, 2));
        assert!(!healthy.is_empty);
        assert!(!healthy.is_low);
    }
}
