use crate::models::trade::{Trade, TradeState};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Persistence contract for trade rows.
///
/// The scanner inserts PENDING rows; the reconciler transitions them to a
/// terminal state. Any backing store works as long as it supports ordered
/// reads by creation time and filtered reads by result.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn insert(&self, trade: Trade);

    /// Replace the row with the same id. Unknown ids are ignored.
    async fn update(&self, trade: &Trade);

    /// PENDING rows, oldest first.
    async fn pending(&self) -> Vec<Trade>;

    /// The `n` most recently created terminal decision rows, newest first.
    /// `FOK_FAIL` bookkeeping rows are not decisions and are excluded.
    async fn recent_resolved(&self, n: usize) -> Vec<Trade>;

    async fn by_result(&self, state: TradeState) -> Vec<Trade>;

    /// Every row, ordered by creation time.
    async fn all_ordered(&self) -> Vec<Trade>;

    async fn count(&self) -> usize;
}

/// In-memory store. Rows are kept in insertion order, which is creation
/// order because the scanner is the only writer of new rows.
#[derive(Default)]
pub struct MemoryTradeStore {
    rows: RwLock<Vec<Trade>>,
}

impl MemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl TradeStore for MemoryTradeStore {
    async fn insert(&self, trade: Trade) {
        self.rows.write().await.push(trade);
    }

    async fn update(&self, trade: &Trade) {
        let mut rows = self.rows.write().await;
        if let Some(row) = rows.iter_mut().find(|r| r.id == trade.id) {
            *row = trade.clone();
        }
    }

    async fn pending(&self) -> Vec<Trade> {
        self.rows
            .read()
            .await
            .iter()
            .filter(|r| r.state == TradeState::Pending)
            .cloned()
            .collect()
    }

    async fn recent_resolved(&self, n: usize) -> Vec<Trade> {
        let rows = self.rows.read().await;
        rows.iter()
            .rev()
            .filter(|r| r.state.is_terminal() && r.occupies_window())
            .take(n)
            .cloned()
            .collect()
    }

    async fn by_result(&self, state: TradeState) -> Vec<Trade> {
        self.rows
            .read()
            .await
            .iter()
            .filter(|r| r.state == state)
            .cloned()
            .collect()
    }

    async fn all_ordered(&self) -> Vec<Trade> {
        self.rows.read().await.clone()
    }

    async fn count(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::trade::{TradeSide, STRATEGY_SNIPER};
    use chrono::Utc;

    fn row(id: &str, state: TradeState) -> Trade {
        Trade {
            id: id.into(),
            coin: "BTC".into(),
            timeframe: "5m".into(),
            side: TradeSide::BuyYes,
            state,
            stake: 1.0,
            entry_odds: 0.45,
            open_price: 0.0,
            entry_price: 0.0,
            exit_price: None,
            estimate: 0.7,
            ev: 0.2,
            gap: 0.1,
            price_diff_pct: 0.1,
            pnl: 0.0,
            balance_after: 0.0,
            market_condition_id: String::new(),
            strategy: STRATEGY_SNIPER.into(),
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
            resolved_at: None,
        }
    }

    #[tokio::test]
    async fn pending_preserves_insertion_order() {
        let store = MemoryTradeStore::new();
        store.insert(row("a", TradeState::Pending)).await;
        store.insert(row("b", TradeState::Win)).await;
        store.insert(row("c", TradeState::Pending)).await;

        let pending = store.pending().await;
        let ids: Vec<&str> = pending.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn recent_resolved_is_newest_first() {
        let store = MemoryTradeStore::new();
        for (id, state) in [
            ("a", TradeState::Lose),
            ("b", TradeState::Pending),
            ("c", TradeState::Win),
            ("d", TradeState::Lose),
        ] {
            store.insert(row(id, state)).await;
        }
        let recent = store.recent_resolved(2).await;
        let ids: Vec<&str> = recent.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c"]);
    }

    #[tokio::test]
    async fn recent_resolved_skips_fok_fail_bookkeeping() {
        let store = MemoryTradeStore::new();
        for (id, state) in [
            ("a", TradeState::Lose),
            ("b", TradeState::Lose),
            ("c", TradeState::Lose),
        ] {
            store.insert(row(id, state)).await;
        }
        // A burst of kill-or-fill failures lands after the losses.
        for id in ["f1", "f2", "f3"] {
            let mut fail = row(id, TradeState::Cancelled);
            fail.strategy = crate::models::trade::STRATEGY_FOK_FAIL.into();
            store.insert(fail).await;
        }

        let recent = store.recent_resolved(3).await;
        let ids: Vec<&str> = recent.iter().map(|t| t.id.as_str()).collect();
        // The decision window still sees the loss streak, not the noise.
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn update_replaces_matching_row() {
        let store = MemoryTradeStore::new();
        store.insert(row("a", TradeState::Pending)).await;

        let mut resolved = row("a", TradeState::Win);
        resolved.pnl = 2.5;
        store.update(&resolved).await;

        let all = store.all_ordered().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].state, TradeState::Win);
        assert_eq!(all[0].pnl, 2.5);
    }
}
