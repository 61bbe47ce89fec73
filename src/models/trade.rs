use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    BuyYes,
    BuyNo,
    Hold,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::BuyYes => "BUY_YES",
            TradeSide::BuyNo => "BUY_NO",
            TradeSide::Hold => "HOLD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeState {
    Pending,
    Win,
    Lose,
    Cancelled,
}

impl TradeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeState::Pending => "PENDING",
            TradeState::Win => "WIN",
            TradeState::Lose => "LOSE",
            TradeState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeState::Pending)
    }
}

/// Strategy tag for an order that was submitted but never matched.
pub const STRATEGY_FOK_FAIL: &str = "FOK_FAIL";
/// Strategy tag for the single live strategy.
pub const STRATEGY_SNIPER: &str = "SNIPER";

/// One persisted trade row. Created PENDING at order submission; transitions
/// to exactly one terminal state via the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub coin: String,
    pub timeframe: String,
    pub side: TradeSide,
    pub state: TradeState,
    pub stake: f64,
    pub entry_odds: f64,
    pub open_price: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub estimate: f64,
    pub ev: f64,
    pub gap: f64,
    pub price_diff_pct: f64,
    pub pnl: f64,
    pub balance_after: f64,
    pub market_condition_id: String,
    pub strategy: String,
    pub reason: String,
    pub detail: String,
    pub scan_to_trade_ms: i64,
    pub order_status: String,
    pub order_id: String,
    pub balance_at_bet: f64,
    pub token_id: String,
    pub actual_size: f64,
    /// Start of the 5-minute candle this trade belongs to.
    pub candle_boundary: i64,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Trade {
    /// Epoch second at which this trade's candle closes.
    pub fn candle_close_epoch(&self) -> i64 {
        self.candle_boundary + super::market::CANDLE_SECS
    }

    /// Whether this row counts toward the one-trade-per-candle invariant.
    pub fn occupies_window(&self) -> bool {
        self.strategy != STRATEGY_FOK_FAIL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Trade {
        Trade {
            id: "t1".into(),
            coin: "BTC".into(),
            timeframe: "5m".into(),
            side: TradeSide::BuyYes,
            state: TradeState::Pending,
            stake: 2.0,
            entry_odds: 0.45,
            open_price: 100_000.0,
            entry_price: 100_120.0,
            exit_price: None,
            estimate: 0.77,
            ev: 0.71,
            gap: 0.32,
            price_diff_pct: 0.12,
            pnl: 0.0,
            balance_after: 98.0,
            market_condition_id: "0xcond".into(),
            strategy: STRATEGY_SNIPER.into(),
            reason: String::new(),
            detail: String::new(),
            scan_to_trade_ms: 12,
            order_status: "MATCHED".into(),
            order_id: "o1".into(),
            balance_at_bet: 100.0,
            token_id: "111".into(),
            actual_size: 4.44,
            candle_boundary: 1_770_933_900,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[test]
    fn candle_close_is_boundary_plus_window() {
        let t = sample();
        assert_eq!(t.candle_close_epoch(), 1_770_934_200);
    }

    #[test]
    fn fok_fail_rows_do_not_occupy_window() {
        let mut t = sample();
        assert!(t.occupies_window());
        t.strategy = STRATEGY_FOK_FAIL.into();
        assert!(!t.occupies_window());
    }
}
