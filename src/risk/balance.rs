use crate::execution::clob_client::OrderApi;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

const VERIFY_THROTTLE_MS: i64 = 5_000;
const VERIFY_THROTTLE_POLLING_MS: i64 = 10_000;
const REDEEM_POLL_TIMEOUT_MS: i64 = 180_000;
/// Accept 80% of the expected payout — fees and slippage eat the rest.
const REDEEM_TARGET_TOLERANCE: f64 = 0.8;
const LIVE_SYNC_SECS: u64 = 10;

#[derive(Debug, Clone, Copy)]
struct RedeemPolling {
    start_ms: i64,
    expected_target: f64,
}

/// Tracks the working balance the scanner bets against.
///
/// Dry-run: the working balance IS the ledger — deducted at order time,
/// credited on wins, refunded on cancels. Live: the on-chain USDC balance is
/// the truth; the ledger adjusts between 10s syncs, and after a win
/// `get_verified_balance` polls until the payout lands on-chain (or 180s
/// pass). The balance never goes negative — a bet is refused instead.
pub struct BalanceManager {
    dry_run: bool,
    api: Arc<dyn OrderApi>,
    initial_bits: AtomicU64,
    balance_bits: AtomicU64,
    live_bits: AtomicU64,
    last_live_sync_ms: AtomicI64,
    last_verified_at_ms: AtomicI64,
    last_verified_bits: AtomicU64,
    polling: Mutex<Option<RedeemPolling>>,
}

impl BalanceManager {
    pub fn new(dry_run: bool, initial_balance: f64, api: Arc<dyn OrderApi>) -> Self {
        Self {
            dry_run,
            api,
            initial_bits: AtomicU64::new(initial_balance.to_bits()),
            balance_bits: AtomicU64::new(initial_balance.to_bits()),
            live_bits: AtomicU64::new(initial_balance.to_bits()),
            last_live_sync_ms: AtomicI64::new(0),
            last_verified_at_ms: AtomicI64::new(0),
            last_verified_bits: AtomicU64::new(initial_balance.to_bits()),
            polling: Mutex::new(None),
        }
    }

    /// Live mode: capture the current on-chain balance as the initial stack.
    pub async fn init_live(&self) -> anyhow::Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let live = self.api.fetch_balance().await?;
        self.initial_bits.store(live.to_bits(), Ordering::Relaxed);
        self.balance_bits.store(live.to_bits(), Ordering::Relaxed);
        self.live_bits.store(live.to_bits(), Ordering::Relaxed);
        info!("Initial on-chain balance: ${live:.2}");
        Ok(())
    }

    pub fn balance(&self) -> f64 {
        f64::from_bits(self.balance_bits.load(Ordering::Relaxed))
    }

    pub fn initial_balance(&self) -> f64 {
        f64::from_bits(self.initial_bits.load(Ordering::Relaxed))
    }

    pub fn live_balance(&self) -> f64 {
        f64::from_bits(self.live_bits.load(Ordering::Relaxed))
    }

    /// Deduct a stake. Returns false (and changes nothing) if the balance
    /// would go negative.
    pub fn try_deduct(&self, amount: f64) -> bool {
        loop {
            let bits = self.balance_bits.load(Ordering::Acquire);
            let current = f64::from_bits(bits);
            let next = current - amount;
            if next < 0.0 {
                warn!("Bet refused: stake ${amount:.2} > balance ${current:.2}");
                return false;
            }
            if self
                .balance_bits
                .compare_exchange(bits, next.to_bits(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Credit a win payout (actual_size x $1 per token).
    pub fn credit(&self, amount: f64) {
        self.add(amount);
        debug!("Credited ${amount:.2}, balance ${:.2}", self.balance());
    }

    /// Refund the stake of a cancelled trade.
    pub fn refund(&self, amount: f64) {
        self.add(amount);
        info!("Refunded ${amount:.2}, balance ${:.2}", self.balance());
    }

    fn add(&self, amount: f64) {
        loop {
            let bits = self.balance_bits.load(Ordering::Acquire);
            let next = f64::from_bits(bits) + amount;
            if self
                .balance_bits
                .compare_exchange(bits, next.to_bits(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Arm post-win polling: wait for ~the payout to appear on-chain.
    pub async fn start_redeem_polling(&self, expected_payout: f64) {
        if self.dry_run {
            return;
        }
        let live = self.live_balance();
        let target = live + REDEEM_TARGET_TOLERANCE * expected_payout;
        *self.polling.lock().await = Some(RedeemPolling {
            start_ms: Utc::now().timestamp_millis(),
            expected_target: target,
        });
        info!("Redeem polling armed: live ${live:.2} -> target ${target:.2}");
    }

    pub async fn is_redeem_polling(&self) -> bool {
        self.polling.lock().await.is_some()
    }

    /// Authoritative pre-order balance read, throttled so the scan loop
    /// never hammers the balance endpoint.
    pub async fn get_verified_balance(&self) -> f64 {
        let now = Utc::now().timestamp_millis();
        let mut polling = self.polling.lock().await;

        let throttle = if polling.is_some() {
            VERIFY_THROTTLE_POLLING_MS
        } else {
            VERIFY_THROTTLE_MS
        };
        let last = self.last_verified_at_ms.load(Ordering::Relaxed);
        if now - last < throttle {
            return f64::from_bits(self.last_verified_bits.load(Ordering::Relaxed));
        }

        if !self.dry_run {
            match self.api.fetch_balance().await {
                Ok(live) => {
                    self.live_bits.store(live.to_bits(), Ordering::Relaxed);
                    self.last_live_sync_ms.store(now, Ordering::Relaxed);
                    self.balance_bits.store(live.to_bits(), Ordering::Relaxed);

                    if let Some(state) = *polling {
                        if live >= state.expected_target {
                            info!("Redeem payout arrived: ${live:.2}");
                            *polling = None;
                        } else if now - state.start_ms > REDEEM_POLL_TIMEOUT_MS {
                            warn!(
                                "Redeem polling timed out at ${live:.2} (target ${:.2})",
                                state.expected_target
                            );
                            *polling = None;
                        }
                    }
                }
                Err(e) => debug!("Live balance fetch failed: {e}"),
            }
        } else {
            *polling = None;
        }

        let balance = self.balance();
        self.last_verified_at_ms.store(now, Ordering::Relaxed);
        self.last_verified_bits
            .store(balance.to_bits(), Ordering::Relaxed);
        balance
    }

    /// Background 10s sync of the working balance from on-chain truth.
    pub fn spawn_sync_task(self: &Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        if self.dry_run {
            return;
        }
        let mgr = self.clone();
        let mut shutdown = shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(LIVE_SYNC_SECS));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match mgr.api.fetch_balance().await {
                            Ok(live) => {
                                let now = Utc::now().timestamp_millis();
                                mgr.live_bits.store(live.to_bits(), Ordering::Relaxed);
                                mgr.last_live_sync_ms.store(now, Ordering::Relaxed);
                                mgr.balance_bits.store(live.to_bits(), Ordering::Relaxed);
                            }
                            Err(e) => debug!("Balance sync failed: {e}"),
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::clob_client::DryRunOrderApi;

    fn manager(initial: f64) -> BalanceManager {
        BalanceManager::new(true, initial, Arc::new(DryRunOrderApi))
    }

    #[test]
    fn deduct_and_credit_ledger() {
        let mgr = manager(100.0);
        assert!(mgr.try_deduct(2.5));
        assert!((mgr.balance() - 97.5).abs() < 1e-9);
        mgr.credit(5.0);
        assert!((mgr.balance() - 102.5).abs() < 1e-9);
    }

    #[test]
    fn overdraw_is_refused_not_applied() {
        let mgr = manager(1.0);
        assert!(!mgr.try_deduct(1.5));
        assert!((mgr.balance() - 1.0).abs() < 1e-9);
        // Exact-balance bet is allowed
        assert!(mgr.try_deduct(1.0));
        assert_eq!(mgr.balance(), 0.0);
    }

    #[test]
    fn refund_restores_stake() {
        let mgr = manager(10.0);
        assert!(mgr.try_deduct(3.0));
        mgr.refund(3.0);
        assert!((mgr.balance() - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn dry_run_never_arms_polling() {
        let mgr = manager(10.0);
        mgr.start_redeem_polling(4.0).await;
        assert!(!mgr.is_redeem_polling().await);
    }

    #[tokio::test]
    async fn verified_balance_is_throttled() {
        let mgr = manager(50.0);
        let first = mgr.get_verified_balance().await;
        assert!((first - 50.0).abs() < 1e-9);
        // Ledger moves, but the verified read inside the throttle window
        // still reports the cached figure.
        assert!(mgr.try_deduct(10.0));
        let second = mgr.get_verified_balance().await;
        assert!((second - 50.0).abs() < 1e-9);
        assert!((mgr.balance() - 40.0).abs() < 1e-9);
    }
}
