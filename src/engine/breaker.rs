use crate::models::trade::{Trade, TradeState};
use chrono::{DateTime, Utc};

const CHECK_EVERY_MS: i64 = 30_000;
const ARM_DURATION_MS: i64 = 300_000;
const STREAK_LEN: usize = 3;

/// Loss-streak circuit breaker.
///
/// Every 30s the scanner hands over the last three resolved decision rows
/// (FOK_FAIL bookkeeping rows are filtered out by the store); if all three
/// lost, trading pauses for five minutes. Re-arming requires at least one
/// trade newer than the streak that armed it, so a stale losing tail cannot
/// keep the breaker latched forever.
#[derive(Debug)]
pub struct CircuitBreaker {
    armed_until_ms: i64,
    last_check_ms: i64,
    last_armed_newest: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            armed_until_ms: 0,
            last_check_ms: 0,
            last_armed_newest: None,
        }
    }

    /// Whether the inspection window has elapsed.
    pub fn due(&self, now_ms: i64) -> bool {
        now_ms - self.last_check_ms >= CHECK_EVERY_MS
    }

    /// Inspect the recent trades (newest first) and maybe arm.
    pub fn observe(&mut self, recent_resolved: &[Trade], now_ms: i64) {
        self.last_check_ms = now_ms;

        if recent_resolved.len() < STREAK_LEN {
            return;
        }
        let window = &recent_resolved[..STREAK_LEN];
        if !window.iter().all(|t| t.state == TradeState::Lose) {
            return;
        }

        let newest = window[0].created_at;
        if let Some(prev) = self.last_armed_newest {
            if newest <= prev {
                return; // same streak that already armed us
            }
        }

        self.armed_until_ms = now_ms + ARM_DURATION_MS;
        self.last_armed_newest = Some(newest);
        tracing::warn!(
            "Circuit breaker armed for {}s after {} straight losses",
            ARM_DURATION_MS / 1000,
            STREAK_LEN
        );
    }

    pub fn is_armed(&self, now_ms: i64) -> bool {
        now_ms < self.armed_until_ms
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::trade::{TradeSide, STRATEGY_SNIPER};
    use chrono::Duration;

    fn trade(state: TradeState, created_at: DateTime<Utc>) -> Trade {
        Trade {
            id: uuid::Uuid::new_v4().to_string(),
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
            pnl: -1.0,
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
            created_at,
            resolved_at: Some(created_at),
        }
    }

    fn losses(n: usize, newest: DateTime<Utc>) -> Vec<Trade> {
        (0..n)
            .map(|i| trade(TradeState::Lose, newest - Duration::seconds(i as i64 * 300)))
            .collect()
    }

    #[test]
    fn arms_after_three_losses() {
        let mut breaker = CircuitBreaker::new();
        let now = 1_000_000_000;
        breaker.observe(&losses(3, Utc::now()), now);
        assert!(breaker.is_armed(now));
        assert!(breaker.is_armed(now + ARM_DURATION_MS - 1));
        assert!(!breaker.is_armed(now + ARM_DURATION_MS));
    }

    #[test]
    fn mixed_results_do_not_arm() {
        let mut breaker = CircuitBreaker::new();
        let now = 1_000_000_000;
        let newest = Utc::now();
        let mut recent = losses(3, newest);
        recent[1] = trade(TradeState::Win, newest - Duration::seconds(300));
        breaker.observe(&recent, now);
        assert!(!breaker.is_armed(now));
    }

    #[test]
    fn same_streak_does_not_rearm() {
        let mut breaker = CircuitBreaker::new();
        let now = 1_000_000_000;
        let streak = losses(3, Utc::now());
        breaker.observe(&streak, now);
        assert!(breaker.is_armed(now));

        // Same streak observed again after expiry: stays disarmed.
        let later = now + ARM_DURATION_MS + 1;
        breaker.observe(&streak, later);
        assert!(!breaker.is_armed(later));

        // A fresh losing trade re-arms.
        let newer = losses(3, Utc::now() + Duration::seconds(600));
        breaker.observe(&newer, later);
        assert!(breaker.is_armed(later));
    }

    #[test]
    fn check_cadence_is_30s() {
        let mut breaker = CircuitBreaker::new();
        assert!(breaker.due(0));
        breaker.observe(&[], 1_000);
        assert!(!breaker.due(1_000 + CHECK_EVERY_MS - 1));
        assert!(breaker.due(1_000 + CHECK_EVERY_MS));
    }
}
