use crate::models::candle::{AtrState, CandleState, CloseSnapshots, PriceTick, TickRing, ATR_PERIOD};
use crate::models::market::candle_boundary;
use crate::signals::regime::VolRegime;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const TICK_RING_CAPACITY: usize = 600;
const PRICE_STALE_MS: i64 = 10_000;
const ZOMBIE_MS: i64 = 30_000;
const SUPERVISOR_SECS: u64 = 10;
const PING_SECS: u64 = 20;
const BACKOFF_FLOOR_MS: u64 = 5_000;
const BACKOFF_CAP_MS: u64 = 60_000;

/// Real-time BTC/USD oracle feed.
///
/// Maintains the latest price, a ~10 minute tick ring, per-candle OHLC with
/// open/close snapshots at every 5-minute boundary, and an EMA-smoothed
/// ATR(14) that drives the volatility regime.
pub struct PriceFeed {
    ws_url: String,
    /// f64 bits of the latest accepted price.
    latest_price_bits: AtomicU64,
    /// Wall-clock millis of the last accepted price message.
    last_price_ms: AtomicI64,
    connected: AtomicBool,
    warmed_up: AtomicBool,
    state: RwLock<FeedState>,
}

struct FeedState {
    ring: TickRing,
    candle: Option<CandleState>,
    prev_close: Option<f64>,
    atr: AtrState,
    closes: CloseSnapshots,
}

#[derive(Debug, Deserialize)]
struct OracleMessage {
    topic: Option<String>,
    payload: Option<OraclePayload>,
}

#[derive(Debug, Deserialize)]
struct OraclePayload {
    symbol: Option<String>,
    value: Option<f64>,
    timestamp: Option<f64>,
}

fn subscribe_frame() -> String {
    serde_json::json!({
        "action": "subscribe",
        "subscriptions": [
            {"topic": "crypto_prices_chainlink", "type": "*", "filters": ""}
        ]
    })
    .to_string()
}

/// Oracle timestamps above 10^12 are milliseconds.
fn normalize_epoch(raw: f64) -> i64 {
    if raw > 1e12 {
        (raw / 1000.0) as i64
    } else {
        raw as i64
    }
}

fn next_backoff(current_ms: u64) -> u64 {
    (current_ms * 2).clamp(BACKOFF_FLOOR_MS, BACKOFF_CAP_MS)
}

fn is_zombie(now_ms: i64, last_msg_ms: i64) -> bool {
    last_msg_ms > 0 && now_ms - last_msg_ms > ZOMBIE_MS
}

impl PriceFeed {
    pub fn new(ws_url: String) -> Self {
        Self {
            ws_url,
            latest_price_bits: AtomicU64::new(0),
            last_price_ms: AtomicI64::new(0),
            connected: AtomicBool::new(false),
            warmed_up: AtomicBool::new(false),
            state: RwLock::new(FeedState {
                ring: TickRing::new(TICK_RING_CAPACITY),
                candle: None,
                prev_close: None,
                atr: AtrState::new(ATR_PERIOD),
                closes: CloseSnapshots::new(),
            }),
        }
    }

    /// Socket-level connectivity, owned by the reader loop. Replay harnesses
    /// set it directly.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// Connected means the socket is up AND a price arrived recently.
    pub fn is_connected(&self) -> bool {
        if !self.connected.load(Ordering::Relaxed) {
            return false;
        }
        let last = self.last_price_ms.load(Ordering::Relaxed);
        last > 0 && Utc::now().timestamp_millis() - last < PRICE_STALE_MS
    }

    /// True once the first candle boundary transition has been observed.
    pub fn is_warmed_up(&self) -> bool {
        self.warmed_up.load(Ordering::Relaxed)
    }

    pub fn latest_price(&self) -> Option<f64> {
        let bits = self.latest_price_bits.load(Ordering::Relaxed);
        (bits != 0).then(|| f64::from_bits(bits))
    }

    pub fn price_age_ms(&self) -> Option<i64> {
        let last = self.last_price_ms.load(Ordering::Relaxed);
        (last > 0).then(|| Utc::now().timestamp_millis() - last)
    }

    pub async fn current_candle(&self) -> Option<CandleState> {
        self.state.read().await.candle
    }

    /// Epoch second of the latest accepted tick.
    pub async fn latest_tick_epoch(&self) -> Option<i64> {
        self.state.read().await.ring.latest().map(|t| t.epoch_secs)
    }

    /// ATR as a percentage of the last completed candle's close.
    pub async fn atr_pct(&self) -> Option<f64> {
        let state = self.state.read().await;
        let atr = state.atr.atr()?;
        let close = state.prev_close?;
        (close > 0.0).then(|| atr / close * 100.0)
    }

    pub async fn regime(&self) -> VolRegime {
        VolRegime::from_atr_pct(self.atr_pct().await)
    }

    /// Close snapshot recorded at `boundary` (the latest tick before it).
    pub async fn close_for(&self, boundary: i64) -> Option<f64> {
        self.state.read().await.closes.get(boundary)
    }

    /// Apply one accepted oracle tick. Public so replay and tests can drive
    /// the state machine without a socket.
    pub async fn apply_tick(&self, epoch_secs: i64, price: f64) {
        self.latest_price_bits
            .store(price.to_bits(), Ordering::Relaxed);
        self.last_price_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);

        let mut state = self.state.write().await;
        state.ring.push(PriceTick { epoch_secs, price });
        self.update_boundary(&mut state, epoch_secs, price);
        if let Some(candle) = state.candle.as_mut() {
            candle.absorb(price);
        }
    }

    fn update_boundary(&self, state: &mut FeedState, epoch_secs: i64, price: f64) {
        let boundary = candle_boundary(epoch_secs);

        let Some(current) = state.candle else {
            let open = state
                .ring
                .nearest_to(boundary)
                .map(|t| t.price)
                .unwrap_or(price);
            state.candle = Some(CandleState::new(boundary, open, price));
            return;
        };

        if boundary == current.boundary {
            return;
        }

        // Rollover: close out the finished candle.
        let close = state.ring.latest_before(boundary).map(|t| t.price);
        if let Some(close) = close {
            state.closes.record(boundary, close);
            let tr = current.true_range(state.prev_close);
            state.atr.push(tr);
            state.prev_close = Some(close);
        }

        let open = state
            .ring
            .nearest_to(boundary)
            .map(|t| t.price)
            .unwrap_or(price);
        state.candle = Some(CandleState::new(boundary, open, price));
        self.warmed_up.store(true, Ordering::Relaxed);
    }

    /// Start the WebSocket reader with its embedded supervisor.
    ///
    /// The supervisor tick forces a reconnect when the socket looks open but
    /// no price has arrived for 30s (zombie connection). Reconnects back off
    /// exponentially between 5s and 60s.
    pub fn start(self: &Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        let feed = self.clone();
        let mut shutdown = shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut backoff_ms = BACKOFF_FLOOR_MS;

            loop {
                info!("Connecting to oracle WS: {}", feed.ws_url);

                let conn = tokio::select! {
                    result = connect_async(&feed.ws_url) => result,
                    _ = shutdown.recv() => return,
                };

                match conn {
                    Ok((ws_stream, _)) => {
                        info!("Oracle WS connected");
                        feed.set_connected(true);
                        backoff_ms = BACKOFF_FLOOR_MS;

                        let (mut write, mut read) = ws_stream.split();
                        if write
                            .send(Message::Text(subscribe_frame()))
                            .await
                            .is_err()
                        {
                            warn!("Oracle subscribe frame failed, reconnecting");
                            feed.set_connected(false);
                            continue;
                        }

                        let mut ping = tokio::time::interval(
                            tokio::time::Duration::from_secs(PING_SECS),
                        );
                        let mut supervisor = tokio::time::interval(
                            tokio::time::Duration::from_secs(SUPERVISOR_SECS),
                        );

                        loop {
                            tokio::select! {
                                msg = read.next() => {
                                    match msg {
                                        Some(Ok(Message::Text(text))) => {
                                            feed.handle_message(&text).await;
                                        }
                                        Some(Ok(Message::Ping(_))) => {
                                            debug!("Oracle ping");
                                        }
                                        Some(Ok(_)) => {}
                                        Some(Err(e)) => {
                                            warn!("Oracle WS error: {e}");
                                            break;
                                        }
                                        None => {
                                            warn!("Oracle WS stream ended");
                                            break;
                                        }
                                    }
                                }
                                _ = ping.tick() => {
                                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                                        warn!("Oracle ping failed");
                                        break;
                                    }
                                }
                                _ = supervisor.tick() => {
                                    let now = Utc::now().timestamp_millis();
                                    let last = feed.last_price_ms.load(Ordering::Relaxed);
                                    if is_zombie(now, last) {
                                        warn!("Oracle WS zombie (no price in {ZOMBIE_MS}ms), forcing reconnect");
                                        break;
                                    }
                                }
                                _ = shutdown.recv() => {
                                    let _ = write.send(Message::Close(Some(CloseFrame {
                                        code: CloseCode::Normal,
                                        reason: "shutdown".into(),
                                    }))).await;
                                    feed.set_connected(false);
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Oracle WS connection failed: {e}");
                    }
                }

                feed.set_connected(false);
                warn!("Oracle reconnecting in {backoff_ms}ms...");
                tokio::select! {
                    _ = tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)) => {}
                    _ = shutdown.recv() => return,
                }
                backoff_ms = next_backoff(backoff_ms);
            }
        });
    }

    /// Parse and route one text frame. Malformed frames are dropped silently.
    async fn handle_message(&self, text: &str) {
        let Ok(msg) = serde_json::from_str::<OracleMessage>(text) else {
            return;
        };
        if msg.topic.as_deref() != Some("crypto_prices_chainlink") {
            return;
        }
        let Some(payload) = msg.payload else { return };
        if payload.symbol.as_deref() != Some("btc/usd") {
            return;
        }
        let (Some(value), Some(ts)) = (payload.value, payload.timestamp) else {
            return;
        };
        if value <= 0.0 {
            return;
        }
        self.apply_tick(normalize_epoch(ts), value).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const B0: i64 = 1_770_933_900;

    async fn feed_with_candle(prices: &[(i64, f64)]) -> PriceFeed {
        let feed = PriceFeed::new(String::new());
        for &(epoch, price) in prices {
            feed.apply_tick(epoch, price).await;
        }
        feed
    }

    #[tokio::test]
    async fn boundary_tracks_latest_tick() {
        let feed = feed_with_candle(&[(B0 + 10, 100.0), (B0 + 200, 101.0)]).await;
        let candle = feed.current_candle().await.unwrap();
        assert_eq!(candle.boundary, B0);

        feed.apply_tick(B0 + 300, 102.0).await;
        let candle = feed.current_candle().await.unwrap();
        assert_eq!(candle.boundary, B0 + 300);
    }

    #[tokio::test]
    async fn open_is_nearest_tick_to_boundary() {
        let feed = feed_with_candle(&[
            (B0 + 100, 100.0),
            (B0 + 298, 100.5), // 2s before the next boundary — nearest
            (B0 + 305, 101.0),
        ])
        .await;
        let candle = feed.current_candle().await.unwrap();
        assert_eq!(candle.boundary, B0 + 300);
        assert_eq!(candle.open, 100.5);
    }

    #[tokio::test]
    async fn close_is_latest_tick_before_boundary() {
        let feed = feed_with_candle(&[
            (B0 + 100, 100.0),
            (B0 + 250, 100.7),
            (B0 + 310, 101.0),
        ])
        .await;
        assert_eq!(feed.close_for(B0 + 300).await, Some(100.7));
    }

    #[tokio::test]
    async fn warmup_flips_on_first_transition() {
        let feed = feed_with_candle(&[(B0 + 10, 100.0)]).await;
        assert!(!feed.is_warmed_up());
        feed.apply_tick(B0 + 300, 100.2).await;
        assert!(feed.is_warmed_up());
    }

    #[tokio::test]
    async fn atr_requires_three_completed_candles() {
        let feed = PriceFeed::new(String::new());
        // Three candles closed = three true-ranges
        for c in 0..4i64 {
            let base = B0 + c * 300;
            feed.apply_tick(base + 10, 100_000.0 + c as f64 * 10.0).await;
            feed.apply_tick(base + 150, 100_050.0 + c as f64 * 10.0).await;
        }
        assert!(feed.atr_pct().await.is_some());
    }

    #[tokio::test]
    async fn tick_replay_is_deterministic() {
        let script: Vec<(i64, f64)> = (0..40)
            .map(|i| (B0 + i * 30, 100_000.0 + (i as f64 * 37.0) % 120.0))
            .collect();
        let a = feed_with_candle(&script).await;
        let b = feed_with_candle(&script).await;

        let ca = a.current_candle().await.unwrap();
        let cb = b.current_candle().await.unwrap();
        assert_eq!(ca.boundary, cb.boundary);
        assert_eq!(ca.open, cb.open);
        assert_eq!(a.atr_pct().await, b.atr_pct().await);
        for k in 1..4 {
            assert_eq!(a.close_for(B0 + k * 300).await, b.close_for(B0 + k * 300).await);
        }
    }

    #[tokio::test]
    async fn regime_is_normal_until_atr_ready() {
        let feed = feed_with_candle(&[(B0, 100.0)]).await;
        assert_eq!(feed.regime().await, VolRegime::Normal);
    }

    #[test]
    fn millisecond_timestamps_are_normalized() {
        assert_eq!(normalize_epoch(1_770_933_900.0), 1_770_933_900);
        assert_eq!(normalize_epoch(1_770_933_900_123.0), 1_770_933_900);
    }

    #[test]
    fn zombie_detection_after_30s_silence() {
        let now = 1_000_000_000;
        assert!(!is_zombie(now, now - 29_000));
        assert!(is_zombie(now, now - 31_000));
        assert!(!is_zombie(now, 0)); // never received anything yet
    }

    #[test]
    fn backoff_is_floored_and_capped() {
        assert_eq!(next_backoff(BACKOFF_FLOOR_MS), 10_000);
        assert_eq!(next_backoff(40_000), BACKOFF_CAP_MS);
        assert_eq!(next_backoff(BACKOFF_CAP_MS), BACKOFF_CAP_MS);
    }

    #[tokio::test]
    async fn non_btc_and_non_positive_frames_dropped() {
        let feed = PriceFeed::new(String::new());
        feed.handle_message(
            "{\"topic\":\"crypto_prices_chainlink\",\"payload\":{\"symbol\":\"eth/usd\",\"value\":3500.0,\"timestamp\":1770933900}}",
        )
        .await;
        feed.handle_message(
            "{\"topic\":\"crypto_prices_chainlink\",\"payload\":{\"symbol\":\"btc/usd\",\"value\":-1.0,\"timestamp\":1770933900}}",
        )
        .await;
        assert!(feed.latest_price().is_none());

        feed.handle_message(
            "{\"topic\":\"crypto_prices_chainlink\",\"payload\":{\"symbol\":\"btc/usd\",\"value\":100000.0,\"timestamp\":1770933900}}",
        )
        .await;
        assert_eq!(feed.latest_price(), Some(100_000.0));
    }
}
