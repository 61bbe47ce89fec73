use crate::feeds::price_feed::PriceFeed;
use crate::models::market::{market_slug, GammaEvent, GammaMarket};
use crate::models::trade::{Trade, TradeSide, TradeState};
use crate::risk::balance::BalanceManager;
use crate::settlement::redeemer::RedeemRequest;
use crate::storage::trade_store::TradeStore;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

const RECONCILE_SECS: u64 = 5;
/// Trades unresolvable 20 minutes past candle close are cancelled.
const SETTLEMENT_TIMEOUT_SECS: i64 = 1200;
const WINNING_OUTCOME_PRICE: f64 = 0.99;
/// Balance-delta WIN inference needs at least half the expected payout.
const BALANCE_DELTA_FRACTION: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Win,
    Lose,
    Cancelled,
}

fn win_or_lose(side: TradeSide, yes_won: bool) -> Resolution {
    let won = match side {
        TradeSide::BuyYes => yes_won,
        TradeSide::BuyNo => !yes_won,
        TradeSide::Hold => false,
    };
    if won {
        Resolution::Win
    } else {
        Resolution::Lose
    }
}

/// Read the winner out of a settled market object.
///
/// Prefers the explicit winner flag; falls back to outcome prices pinned at
/// $0.99+. An open market yields nothing.
pub fn decide_from_market(market: &GammaMarket, side: TradeSide) -> Option<Resolution> {
    if market.closed != Some(true) {
        return None;
    }

    if let Some(tokens) = &market.tokens {
        if let Some(winner) = tokens.iter().find(|t| t.winner == Some(true)) {
            let yes_won = matches!(winner.outcome.as_deref(), Some("Yes") | Some("Up"));
            return Some(win_or_lose(side, yes_won));
        }
    }

    if let Some((up_price, down_price)) = market.price_pair() {
        if up_price >= WINNING_OUTCOME_PRICE {
            return Some(win_or_lose(side, true));
        }
        if down_price >= WINNING_OUTCOME_PRICE {
            return Some(win_or_lose(side, false));
        }
    }

    None
}

pub fn settlement_timed_out(trade: &Trade, now_epoch: i64) -> bool {
    now_epoch - trade.candle_close_epoch() > SETTLEMENT_TIMEOUT_SECS
}

/// Periodic settlement loop.
///
/// Polls each PENDING trade past its candle close against the market
/// resolution API (with slug and outcome-price fallbacks), infers wins from
/// on-chain balance jumps when the API stays silent, and cancels-with-refund
/// after the timeout. PENDING to terminal is a one-way transition, so
/// re-running over an already-resolved trade is a no-op by construction.
pub struct Reconciler {
    http: reqwest::Client,
    gamma_host: String,
    klines_host: String,
    dry_run: bool,
    store: Arc<dyn TradeStore>,
    balance: Arc<BalanceManager>,
    price_feed: Arc<PriceFeed>,
    redeem_tx: mpsc::Sender<RedeemRequest>,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gamma_host: String,
        klines_host: String,
        dry_run: bool,
        store: Arc<dyn TradeStore>,
        balance: Arc<BalanceManager>,
        price_feed: Arc<PriceFeed>,
        redeem_tx: mpsc::Sender<RedeemRequest>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .connect_timeout(std::time::Duration::from_secs(5))
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            gamma_host,
            klines_host,
            dry_run,
            store,
            balance,
            price_feed,
            redeem_tx,
        }
    }

    pub fn start(self: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(RECONCILE_SECS));
            loop {
                tokio::select! {
                    _ = interval.tick() => self.reconcile_once().await,
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    /// One pass over outstanding trades, oldest first.
    pub async fn reconcile_once(&self) {
        let now_epoch = Utc::now().timestamp();
        for trade in self.store.pending().await {
            if now_epoch < trade.candle_close_epoch() {
                continue;
            }
            self.resolve_one(trade, now_epoch).await;
        }
    }

    async fn resolve_one(&self, trade: Trade, now_epoch: i64) {
        // Primary: the market resolution API (by conditionId, then by slug).
        match self.fetch_resolution(&trade).await {
            Some(resolution) => self.apply_resolution(trade, resolution).await,
            None => {
                // Secondary: a balance jump close to the payout means WIN.
                // Balance unchanged is ambiguous, so no LOSE inference.
                if self.balance_delta_win(&trade) {
                    info!("Trade {} resolved WIN via balance delta", trade.id);
                    self.apply_resolution(trade, Resolution::Win).await;
                } else if settlement_timed_out(&trade, now_epoch) {
                    warn!(
                        "Trade {} unresolvable {}s past close — cancelling",
                        trade.id, SETTLEMENT_TIMEOUT_SECS
                    );
                    self.apply_resolution(trade, Resolution::Cancelled).await;
                }
            }
        }
    }

    async fn fetch_resolution(&self, trade: &Trade) -> Option<Resolution> {
        if !trade.market_condition_id.is_empty() {
            match self.market_by_condition(&trade.market_condition_id).await {
                Ok(Some(market)) => {
                    if let Some(resolution) = decide_from_market(&market, trade.side) {
                        return Some(resolution);
                    }
                }
                Ok(None) => {}
                Err(e) => debug!("Market lookup failed for {}: {e}", trade.id),
            }
        }

        let slug = market_slug(trade.candle_boundary);
        match self.market_by_slug(&slug).await {
            Ok(Some(market)) => decide_from_market(&market, trade.side),
            Ok(None) => None,
            Err(e) => {
                debug!("Event lookup failed for {slug}: {e}");
                None
            }
        }
    }

    async fn market_by_condition(&self, condition_id: &str) -> Result<Option<GammaMarket>> {
        let url = format!("{}/markets/{}", self.gamma_host, condition_id);
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        Ok(Some(resp.json::<GammaMarket>().await?))
    }

    async fn market_by_slug(&self, slug: &str) -> Result<Option<GammaMarket>> {
        let url = format!("{}/events?slug={}", self.gamma_host, slug);
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let mut events: Vec<GammaEvent> = resp.json().await?;
        Ok(events
            .first_mut()
            .and_then(|e| (!e.markets.is_empty()).then(|| e.markets.remove(0))))
    }

    fn balance_delta_win(&self, trade: &Trade) -> bool {
        if self.dry_run {
            return false;
        }
        let live = self.balance.live_balance();
        live - trade.balance_at_bet > BALANCE_DELTA_FRACTION * trade.actual_size
    }

    /// Commit a terminal state. Only a PENDING trade transitions; anything
    /// else is left untouched.
    pub async fn apply_resolution(&self, mut trade: Trade, resolution: Resolution) {
        if trade.state != TradeState::Pending {
            return;
        }

        trade.resolved_at = Some(Utc::now());
        trade.exit_price = self.resolve_exit_price(&trade).await;

        match resolution {
            Resolution::Win => {
                // Each conditional token redeems to $1.
                let payout = trade.actual_size;
                trade.state = TradeState::Win;
                trade.pnl = payout - trade.stake;
                self.balance.credit(payout);
                self.store.update(&trade).await;

                info!(
                    "WIN {} payout ${payout:.2} pnl ${:.2} balance ${:.2}",
                    trade.id,
                    trade.pnl,
                    self.balance.balance()
                );

                if self
                    .redeem_tx
                    .send(RedeemRequest {
                        condition_id: trade.market_condition_id.clone(),
                        neg_risk: true,
                    })
                    .await
                    .is_err()
                {
                    warn!("Redeem worker unavailable for {}", trade.id);
                }
                self.balance.start_redeem_polling(payout).await;
            }
            Resolution::Lose => {
                trade.state = TradeState::Lose;
                trade.pnl = -trade.stake;
                self.store.update(&trade).await;
                info!("LOSE {} pnl ${:.2}", trade.id, trade.pnl);
            }
            Resolution::Cancelled => {
                trade.state = TradeState::Cancelled;
                trade.pnl = 0.0;
                self.balance.refund(trade.stake);
                self.store.update(&trade).await;
            }
        }
    }

    /// Exit price is display-only: candle close snapshot while it is still
    /// retained, then the spot exchange's kline, then the current price.
    async fn resolve_exit_price(&self, trade: &Trade) -> Option<f64> {
        let close_boundary = trade.candle_close_epoch();
        if let Some(close) = self.price_feed.close_for(close_boundary).await {
            return Some(close);
        }
        match self.fetch_kline_close(trade.candle_boundary).await {
            Ok(close) => Some(close),
            Err(e) => {
                debug!("Kline fallback failed for {}: {e}", trade.id);
                self.price_feed.latest_price()
            }
        }
    }

    async fn fetch_kline_close(&self, boundary: i64) -> Result<f64> {
        let url = format!(
            "{}/api/v3/klines?symbol=BTCUSDT&interval=5m&startTime={}&limit=1",
            self.klines_host,
            boundary * 1000
        );
        let rows: Vec<Vec<serde_json::Value>> = self.http.get(&url).send().await?.json().await?;
        let close = rows
            .first()
            .and_then(|row| row.get(4))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| anyhow::anyhow!("malformed kline response"))?;
        Ok(close)
    }
}
