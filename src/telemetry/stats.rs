use crate::models::trade::{Trade, TradeState};
use crate::risk::balance::BalanceManager;
use crate::storage::trade_store::TradeStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Cumulative trading stats derived from the trade store. The external
/// dashboard reads these; internally they feed the periodic summary log.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub total_trades: usize,
    pub pending: usize,
    pub wins: usize,
    pub losses: usize,
    pub cancelled: usize,
    pub win_rate: f64,
    pub net_pnl: f64,
    pub roi: f64,
    pub balance: f64,
    pub initial_balance: f64,
    /// (resolved_at, cumulative pnl) points, oldest first.
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
}

/// Aggregate the rows into a snapshot. FOK_FAIL rows count as cancelled
/// bookkeeping, not as decisions, so they stay out of the win rate.
pub fn aggregate(rows: &[Trade], balance: f64, initial_balance: f64) -> StatsSnapshot {
    let mut wins = 0;
    let mut losses = 0;
    let mut cancelled = 0;
    let mut pending = 0;
    let mut net_pnl = 0.0;
    let mut equity_curve = Vec::new();

    for trade in rows {
        match trade.state {
            TradeState::Pending => pending += 1,
            TradeState::Win if trade.occupies_window() => wins += 1,
            TradeState::Lose if trade.occupies_window() => losses += 1,
            _ => cancelled += 1,
        }
        if trade.state.is_terminal() {
            net_pnl += trade.pnl;
            if let Some(at) = trade.resolved_at {
                equity_curve.push((at, net_pnl));
            }
        }
    }

    let decided = wins + losses;
    let win_rate = if decided > 0 {
        wins as f64 / decided as f64
    } else {
        0.0
    };
    let roi = if initial_balance > 0.0 {
        net_pnl / initial_balance
    } else {
        0.0
    };

    StatsSnapshot {
        total_trades: rows.len(),
        pending,
        wins,
        losses,
        cancelled,
        win_rate,
        net_pnl,
        roi,
        balance,
        initial_balance,
        equity_curve,
    }
}

/// Periodic stats reporter.
pub struct StatsReporter {
    store: Arc<dyn TradeStore>,
    balance: Arc<BalanceManager>,
    interval_secs: u64,
}

impl StatsReporter {
    pub fn new(
        store: Arc<dyn TradeStore>,
        balance: Arc<BalanceManager>,
        interval_secs: u64,
    ) -> Self {
        Self {
            store,
            balance,
            interval_secs,
        }
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        let rows = self.store.all_ordered().await;
        aggregate(&rows, self.balance.balance(), self.balance.initial_balance())
    }

    pub async fn log_summary(&self) {
        let s = self.snapshot().await;
        info!(
            "=== STATS === balance=${:.2} pnl=${:+.2} roi={:+.1}% trades={} (W{} L{} C{} P{}) win_rate={:.1}%",
            s.balance,
            s.net_pnl,
            s.roi * 100.0,
            s.total_trades,
            s.wins,
            s.losses,
            s.cancelled,
            s.pending,
            s.win_rate * 100.0,
        );
    }

    pub fn start(self: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(self.interval_secs));
            loop {
                tokio::select! {
                    _ = interval.tick() => self.log_summary().await,
                    _ = shutdown.recv() => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::trade::{TradeSide, STRATEGY_FOK_FAIL, STRATEGY_SNIPER};

    fn trade(state: TradeState, strategy: &str, pnl: f64) -> Trade {
        Trade {
            id: uuid::Uuid::new_v4().to_string(),
            coin: "BTC".into(),
            timeframe: "5m".into(),
            side: TradeSide::BuyYes,
            state,
            stake: 2.0,
            entry_odds: 0.45,
            open_price: 0.0,
            entry_price: 0.0,
            exit_price: None,
            estimate: 0.7,
            ev: 0.2,
            gap: 0.1,
            price_diff_pct: 0.1,
            pnl,
            balance_after: 0.0,
            market_condition_id: String::new(),
            strategy: strategy.into(),
            reason: String::new(),
            detail: String::new(),
            scan_to_trade_ms: 0,
            order_status: String::new(),
            order_id: String::new(),
            balance_at_bet: 0.0,
            token_id: String::new(),
            actual_size: 0.0,
            candle_boundary: 0,
            created_at: Utc::now(),
            resolved_at: state.is_terminal().then(Utc::now),
        }
    }

    #[test]
    fn aggregate_counts_and_pnl() {
        let rows = vec![
            trade(TradeState::Win, STRATEGY_SNIPER, 2.4),
            trade(TradeState::Lose, STRATEGY_SNIPER, -2.0),
            trade(TradeState::Win, STRATEGY_SNIPER, 1.6),
            trade(TradeState::Cancelled, STRATEGY_FOK_FAIL, 0.0),
            trade(TradeState::Pending, STRATEGY_SNIPER, 0.0),
        ];
        let s = aggregate(&rows, 102.0, 100.0);
        assert_eq!(s.total_trades, 5);
        assert_eq!((s.wins, s.losses, s.cancelled, s.pending), (2, 1, 1, 1));
        assert!((s.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((s.net_pnl - 2.0).abs() < 1e-9);
        assert!((s.roi - 0.02).abs() < 1e-9);
        assert_eq!(s.equity_curve.len(), 4);
        assert!((s.equity_curve.last().unwrap().1 - 2.0).abs() < 1e-9);
    }

    #[test]
    fn empty_store_is_all_zero() {
        let s = aggregate(&[], 100.0, 100.0);
        assert_eq!(s.total_trades, 0);
        assert_eq!(s.win_rate, 0.0);
        assert_eq!(s.net_pnl, 0.0);
    }
}
