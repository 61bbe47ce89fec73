use crate::engine::breaker::CircuitBreaker;
use crate::engine::metrics::ScanMetrics;
use crate::execution::clob_client::{OrderApi, OrderOutcome};
use crate::execution::order_builder::{plan_fok, slipped_limit, OrderSide};
use crate::feeds::odds_feed::OddsFeed;
use crate::feeds::price_feed::PriceFeed;
use crate::models::candle::CandleState;
use crate::models::market::MarketOdds;
use crate::models::trade::{Trade, TradeSide, TradeState, STRATEGY_FOK_FAIL};
use crate::risk::balance::BalanceManager;
use crate::signals::cusum::{CusumDetector, CUSUM_FALLBACK_THRESHOLD};
use crate::signals::ev::{BetDirection, EvCalculator, EvResult};
use crate::signals::momentum::{CrossCounter, MomentumRing, RangeTracker, VelocityEma};
use crate::signals::regime::VolRegime;
use crate::storage::trade_store::TradeStore;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

/// Working balance below this refuses every bet.
pub const MIN_BALANCE: f64 = 1.0;
const BASE_GAP: f64 = 0.03;
const SPREAD_LIMIT: f64 = 1.05;
const ODDS_CEILING: f64 = 0.60;
/// Escalated FOK limits stop here — beyond it the market has priced the move in.
const FOK_LIMIT_CEILING: f64 = 0.60;
const FOK_MAX_RETRIES: u32 = 3;
const FOK_RETRY_DELAY_MS: u64 = 50;
const CANDLE_OPEN_GUARD_SECS: i64 = 5;
const CANDLE_CLOSE_GUARD_SECS: i64 = 285;
const EARLY_WINDOW_SECS: i64 = 40;
const MIN_MOVE_FALLBACK: f64 = 0.03;
const MIN_RANGE_FALLBACK: f64 = 0.02;
const WIN_RATE_MIN_SAMPLES: usize = 10;
const POST_TRADE_BALANCE_REFRESH_MS: u64 = 2_000;

/// Stepped confidence bonus per elapsed minute in the candle.
pub fn time_bonus(elapsed_secs: i64) -> f64 {
    match elapsed_secs / 60 {
        0 => 0.0,
        1 => 0.01,
        2 => 0.03,
        3 => 0.05,
        _ => 0.07,
    }
}

/// Candle phase slot: 0 = oracle sync window, -1 = close-of-book guard.
pub fn candle_position(elapsed_secs: i64) -> i32 {
    if elapsed_secs < CANDLE_OPEN_GUARD_SECS {
        0
    } else if elapsed_secs >= CANDLE_CLOSE_GUARD_SECS {
        -1
    } else if elapsed_secs < 90 {
        1
    } else if elapsed_secs < 210 {
        2
    } else {
        3
    }
}

/// Map the trailing win rate onto a gap adjustment. Below the sample floor
/// the rate is taken as the 0.50 baseline.
pub fn win_rate_adjustment(wins: usize, losses: usize) -> f64 {
    let total = wins + losses;
    let rate = if total < WIN_RATE_MIN_SAMPLES {
        0.50
    } else {
        wins as f64 / total as f64
    };
    match rate {
        r if r >= 0.65 => -0.01,
        r if r >= 0.55 => 0.0,
        r if r >= 0.45 => 0.02,
        _ => 0.04,
    }
}

fn sign_of(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

/// The periodic orchestrator: runs the filter cascade over the live price
/// and odds state, sizes the bet, and fires the order.
///
/// All per-candle signal state lives here, touched only by the scan task.
pub struct Scanner {
    price_feed: Arc<PriceFeed>,
    odds_feed: Arc<OddsFeed>,
    balance: Arc<BalanceManager>,
    orders: Arc<dyn OrderApi>,
    store: Arc<dyn TradeStore>,
    metrics: Arc<ScanMetrics>,
    ev_calc: EvCalculator,
    enabled: Arc<AtomicBool>,
    scan_interval_ms: u64,

    breaker: CircuitBreaker,
    candle_boundary: i64,
    momentum: MomentumRing,
    crosses: CrossCounter,
    range: RangeTracker,
    cusum: CusumDetector,
    velocity: VelocityEma,
    last_traded_window: Option<i64>,
}

impl Scanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scan_interval_ms: u64,
        ev_calc: EvCalculator,
        enabled: Arc<AtomicBool>,
        price_feed: Arc<PriceFeed>,
        odds_feed: Arc<OddsFeed>,
        balance: Arc<BalanceManager>,
        orders: Arc<dyn OrderApi>,
        store: Arc<dyn TradeStore>,
        metrics: Arc<ScanMetrics>,
    ) -> Self {
        Self {
            price_feed,
            odds_feed,
            balance,
            orders,
            store,
            metrics,
            ev_calc,
            enabled,
            scan_interval_ms,
            breaker: CircuitBreaker::new(),
            candle_boundary: 0,
            momentum: MomentumRing::new(),
            crosses: CrossCounter::new(),
            range: RangeTracker::new(),
            cusum: CusumDetector::new(),
            velocity: VelocityEma::new(),
            last_traded_window: None,
        }
    }

    pub fn last_traded_window(&self) -> Option<i64> {
        self.last_traded_window
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_millis(self.scan_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Scanner running at {}ms cadence", self.scan_interval_ms);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let started = std::time::Instant::now();
                    self.scan_tick().await;
                    self.metrics.record_scan(started.elapsed().as_micros() as u64);
                }
                _ = shutdown.recv() => {
                    info!("Scanner shutdown");
                    break;
                }
            }
        }
    }

    /// One pass of the filter cascade. Short-circuits on the first failed
    /// gate; the gate name lands in the metrics surface.
    pub async fn scan_tick(&mut self) {
        let scan_started = std::time::Instant::now();

        if !self.enabled.load(Ordering::Relaxed) {
            self.metrics.set_filter("master_switch");
            return;
        }
        if !self.price_feed.is_connected() {
            self.metrics.set_filter("feed_down");
            return;
        }
        if !self.price_feed.is_warmed_up() {
            self.metrics.set_filter("warmup");
            return;
        }

        let (Some(price), Some(candle), Some(tick_epoch)) = (
            self.price_feed.latest_price(),
            self.price_feed.current_candle().await,
            self.price_feed.latest_tick_epoch().await,
        ) else {
            self.metrics.set_filter("no_price");
            return;
        };

        // Rollover wipes every per-candle signal.
        if candle.boundary != self.candle_boundary {
            self.candle_boundary = candle.boundary;
            self.momentum.reset();
            self.crosses.reset();
            self.range.reset();
            self.cusum.reset();
            self.velocity.reset();
        }

        let now_ms = Utc::now().timestamp_millis();
        if self.breaker.due(now_ms) {
            let recent = self.store.recent_resolved(3).await;
            self.breaker.observe(&recent, now_ms);
        }
        if self.breaker.is_armed(now_ms) {
            self.metrics.set_filter("breaker");
            return;
        }

        if self.last_traded_window == Some(candle.boundary) {
            self.metrics.set_filter("window_traded");
            return;
        }

        if candle.open <= 0.0 {
            self.metrics.set_filter("no_open");
            return;
        }
        let price_diff_pct = (price - candle.open) / candle.open * 100.0;

        // Update every per-candle tracker before gating on any of them.
        let velocity = self.velocity.observe(price, now_ms);
        self.momentum.push(price_diff_pct);
        self.crosses.observe(price_diff_pct);
        self.range.push(price);

        let atr_pct = self.price_feed.atr_pct().await;
        let regime = VolRegime::from_atr_pct(atr_pct);
        let cusum_h = atr_pct
            .map(|a| a * regime.cusum_mult())
            .unwrap_or(CUSUM_FALLBACK_THRESHOLD);
        self.cusum.observe(price, cusum_h);
        let (cusum_pos, cusum_neg) = self.cusum.sums();
        self.metrics
            .set_cusum(cusum_pos, cusum_neg, cusum_h, self.cusum.triggered());

        let dynamic_min_move = atr_pct
            .map(|a| (a * regime.entry_mult()).clamp(0.01, 0.10))
            .unwrap_or(MIN_MOVE_FALLBACK);
        self.metrics.set_volatility(atr_pct, dynamic_min_move, regime);

        if !self.momentum.is_warm() {
            self.metrics.set_filter("momentum_warmup");
            return;
        }
        if self.crosses.is_choppy() {
            self.metrics.set_filter("chop");
            return;
        }

        let min_range = atr_pct
            .map(|a| a * regime.range_mult())
            .unwrap_or(MIN_RANGE_FALLBACK);
        if self.range.range_pct() < min_range {
            self.metrics.set_filter("range");
            return;
        }

        // The drift confirmation must arrive within the first ten ticks of
        // the candle; a stalled detector blocks the rest of the window.
        if self.cusum.stalled() {
            self.metrics.set_filter("cusum_stall");
            return;
        }
        if !self.cusum.triggered() {
            self.metrics.set_filter("cusum");
            return;
        }

        if price_diff_pct.abs() < dynamic_min_move {
            self.metrics.set_filter("min_move");
            return;
        }

        let elapsed = tick_epoch - candle.boundary;
        let position = candle_position(elapsed);
        if position == 0 {
            self.metrics.set_filter("candle_open_guard");
            return;
        }
        if position == -1 {
            self.metrics.set_filter("candle_close_guard");
            return;
        }

        let Some(odds) = self.odds_feed.get_odds() else {
            self.metrics.set_filter("odds_unavailable");
            return;
        };
        let target_odds = if price_diff_pct > 0.0 {
            odds.up_price
        } else {
            odds.down_price
        };

        // Inside the first 40s only outsized moves at cheap odds qualify.
        if elapsed < EARLY_WINDOW_SECS {
            let tier1 = price_diff_pct.abs() >= 0.10 && target_odds <= 0.45;
            let tier2 = elapsed >= 30 && price_diff_pct.abs() >= 0.08 && target_odds <= 0.50;
            if !tier1 && !tier2 {
                self.metrics.set_filter("early_entry");
                return;
            }
        }

        if odds.spread() > SPREAD_LIMIT {
            self.metrics.set_filter("spread");
            return;
        }
        if target_odds > ODDS_CEILING {
            self.metrics.set_filter("odds_ceiling");
            return;
        }

        let balance = self.balance.get_verified_balance().await;
        if balance < MIN_BALANCE {
            self.metrics.set_filter("balance");
            return;
        }

        let consistency = self.momentum.consistency();
        if consistency.abs() < regime.momentum_min() {
            self.metrics.set_filter("momentum_weak");
            return;
        }
        if sign_of(consistency) != sign_of(price_diff_pct) {
            self.metrics.set_filter("momentum_mismatch");
            return;
        }

        let bonus = time_bonus(elapsed);
        let result = self.ev_calc.evaluate(
            price_diff_pct,
            odds.up_price,
            odds.down_price,
            velocity,
            consistency,
            bonus,
            balance,
        );

        if result.direction == BetDirection::Hold {
            self.metrics.set_filter("ev_hold");
            return;
        }

        let (wins, losses) = self.resolved_counts().await;
        let adaptive_gap = BASE_GAP + win_rate_adjustment(wins, losses) + regime.gap_adj();
        if result.gap < adaptive_gap {
            self.metrics.set_filter("gap");
            return;
        }

        self.execute(&result, &odds, &candle, price_diff_pct, price, scan_started)
            .await;
    }

    async fn resolved_counts(&self) -> (usize, usize) {
        let wins = self
            .store
            .by_result(TradeState::Win)
            .await
            .iter()
            .filter(|t| t.occupies_window())
            .count();
        let losses = self
            .store
            .by_result(TradeState::Lose)
            .await
            .iter()
            .filter(|t| t.occupies_window())
            .count();
        (wins, losses)
    }

    /// Fire-or-kill with slippage escalation. The candle window burns on
    /// acceptance AND on exhaustion, so a bad book cannot cause retry loops.
    async fn execute(
        &mut self,
        result: &EvResult,
        odds: &MarketOdds,
        candle: &CandleState,
        price_diff_pct: f64,
        entry_price: f64,
        scan_started: std::time::Instant,
    ) {
        let (token_id, side) = match result.direction {
            BetDirection::Up => (odds.up_token_id.clone(), TradeSide::BuyYes),
            BetDirection::Down => (odds.down_token_id.clone(), TradeSide::BuyNo),
            BetDirection::Hold => return,
        };
        let stake = result.stake;

        for retry in 0..=FOK_MAX_RETRIES {
            let limit = slipped_limit(result.target_odds, OrderSide::Buy, retry);
            if limit > FOK_LIMIT_CEILING {
                warn!(
                    "FOK limit {limit:.2} above ceiling {FOK_LIMIT_CEILING} after {retry} retries — burning candle"
                );
                self.last_traded_window = Some(candle.boundary);
                self.metrics.set_filter("fok_ceiling");
                return;
            }

            // Refuse rather than overdraw: the escalated limit can commit
            // more than the stake once the 5-token minimum kicks in.
            if let Ok(plan) = plan_fok(stake, result.target_odds, OrderSide::Buy, retry) {
                if plan.actual_amount() > self.balance.balance() {
                    self.metrics.set_filter("balance");
                    return;
                }
            }

            let outcome = self
                .orders
                .place_order(&token_id, stake, result.target_odds, OrderSide::Buy, retry)
                .await;

            if outcome.is_matched() {
                self.commit_trade(result, odds, candle, side, &token_id, price_diff_pct, entry_price, &outcome, scan_started)
                    .await;
                return;
            }

            warn!(
                "FOK attempt {} not matched (status={:?} err={:?})",
                retry, outcome.status, outcome.error
            );
            self.record_fok_fail(result, odds, candle, side, &token_id, price_diff_pct, entry_price, &outcome)
                .await;

            if retry < FOK_MAX_RETRIES {
                tokio::time::sleep(tokio::time::Duration::from_millis(FOK_RETRY_DELAY_MS)).await;
            }
        }

        self.last_traded_window = Some(candle.boundary);
        self.metrics.set_filter("fok_exhausted");
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit_trade(
        &mut self,
        result: &EvResult,
        odds: &MarketOdds,
        candle: &CandleState,
        side: TradeSide,
        token_id: &str,
        price_diff_pct: f64,
        entry_price: f64,
        outcome: &OrderOutcome,
        scan_started: std::time::Instant,
    ) {
        let balance_at_bet = self.balance.balance();
        if !self.balance.try_deduct(outcome.actual_amount) {
            // Pre-checked above; only a concurrent live sync can race us here.
            warn!(
                "Balance deduct of ${:.2} failed post-fill",
                outcome.actual_amount
            );
        }
        let balance_after = self.balance.balance();

        let trade = Trade {
            id: Uuid::new_v4().to_string(),
            coin: "BTC".into(),
            timeframe: "5m".into(),
            side,
            state: TradeState::Pending,
            stake: outcome.actual_amount,
            entry_odds: result.target_odds,
            open_price: candle.open,
            entry_price,
            exit_price: None,
            estimate: result.estimate,
            ev: result.ev,
            gap: result.gap,
            price_diff_pct,
            pnl: 0.0,
            balance_after,
            market_condition_id: odds.condition_id.clone(),
            strategy: result.strategy.to_string(),
            reason: result.reason.clone(),
            detail: format!(
                "limit {:.2} size {:.2} slug {}",
                outcome.limit_price, outcome.actual_size, odds.slug
            ),
            scan_to_trade_ms: scan_started.elapsed().as_millis() as i64,
            order_status: outcome.status.clone(),
            order_id: outcome.order_id.clone(),
            balance_at_bet,
            token_id: token_id.to_string(),
            actual_size: outcome.actual_size,
            candle_boundary: candle.boundary,
            created_at: Utc::now(),
            resolved_at: None,
        };

        info!(
            "TRADE {} {} ${:.2} @ {:.2} (est {:.2} ev {:.2}) candle {}",
            trade.side.as_str(),
            trade.token_id,
            trade.stake,
            outcome.limit_price,
            trade.estimate,
            trade.ev,
            candle.boundary
        );

        self.store.insert(trade).await;
        self.last_traded_window = Some(candle.boundary);
        self.metrics.set_filter("trade");

        // Let the fill settle, then refresh the authoritative balance.
        let balance = self.balance.clone();
        tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_millis(
                POST_TRADE_BALANCE_REFRESH_MS,
            ))
            .await;
            let _ = balance.get_verified_balance().await;
        });
    }

    /// Persist a CANCELLED row for a failed FOK attempt. The stake was never
    /// committed, so the balance is untouched.
    #[allow(clippy::too_many_arguments)]
    async fn record_fok_fail(
        &self,
        result: &EvResult,
        odds: &MarketOdds,
        candle: &CandleState,
        side: TradeSide,
        token_id: &str,
        price_diff_pct: f64,
        entry_price: f64,
        outcome: &OrderOutcome,
    ) {
        let balance = self.balance.balance();
        let trade = Trade {
            id: Uuid::new_v4().to_string(),
            coin: "BTC".into(),
            timeframe: "5m".into(),
            side,
            state: TradeState::Cancelled,
            stake: result.stake,
            entry_odds: result.target_odds,
            open_price: candle.open,
            entry_price,
            exit_price: None,
            estimate: result.estimate,
            ev: result.ev,
            gap: result.gap,
            price_diff_pct,
            pnl: 0.0,
            balance_after: balance,
            market_condition_id: odds.condition_id.clone(),
            strategy: STRATEGY_FOK_FAIL.into(),
            reason: outcome
                .error
                .clone()
                .unwrap_or_else(|| "FOK not matched".into()),
            detail: format!("limit {:.2} slug {}", outcome.limit_price, odds.slug),
            scan_to_trade_ms: 0,
            order_status: if outcome.status.is_empty() {
                "REJECTED".into()
            } else {
                outcome.status.clone()
            },
            order_id: outcome.order_id.clone(),
            balance_at_bet: balance,
            token_id: token_id.to_string(),
            actual_size: 0.0,
            candle_boundary: candle.boundary,
            created_at: Utc::now(),
            resolved_at: Some(Utc::now()),
        };
        self.store.insert(trade).await;
    }
}
