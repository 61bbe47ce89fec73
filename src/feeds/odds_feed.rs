use crate::models::market::{candle_boundary, market_slug, BookResponse, GammaEvent, MarketOdds};
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Minimum resting size for an ask level to count as the best ask.
const MIN_BOOK_DEPTH: Decimal = dec!(5);
/// Sanity band for a tradable ask.
const ASK_FLOOR: f64 = 0.01;
const ASK_CEIL: f64 = 0.99;

/// Background prefetcher for the active 5-minute market's odds.
///
/// A single writer task polls the catalog and both order books, then
/// publishes a whole `MarketOdds` snapshot. Readers only ever see a fully
/// formed snapshot or none. Rollover is detected strictly by slug change,
/// and the cache is cleared before anything in the new window can be read.
pub struct OddsFeed {
    http: reqwest::Client,
    gamma_host: String,
    clob_host: String,
    interval_ms: u64,
    snapshot: RwLock<Option<MarketOdds>>,
    current_slug: RwLock<String>,
}

impl OddsFeed {
    pub fn new(
        gamma_host: String,
        clob_host: String,
        interval_ms: u64,
        http_timeout_ms: u64,
    ) -> Self {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Some(std::time::Duration::from_secs(30)))
            .connect_timeout(std::time::Duration::from_millis(http_timeout_ms))
            .timeout(std::time::Duration::from_millis(http_timeout_ms))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            gamma_host,
            clob_host,
            interval_ms,
            snapshot: RwLock::new(None),
            current_slug: RwLock::new(String::new()),
        }
    }

    /// Current snapshot, if any. Never blocks on I/O.
    pub fn get_odds(&self) -> Option<MarketOdds> {
        self.snapshot.read().expect("odds lock poisoned").clone()
    }

    /// Test/replay hook: publish a snapshot directly.
    pub fn publish(&self, odds: MarketOdds) {
        *self.current_slug.write().expect("slug lock poisoned") = odds.slug.clone();
        *self.snapshot.write().expect("odds lock poisoned") = Some(odds);
    }

    pub fn start(self: &Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        let feed = self.clone();
        let mut shutdown = shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_millis(feed.interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        feed.prefetch_once().await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    /// One prefetch cycle. On any failure the previous snapshot is retained —
    /// accuracy over freshness; the scanner simply sees a stale-or-missing
    /// snapshot for this tick.
    async fn prefetch_once(&self) {
        let boundary = candle_boundary(Utc::now().timestamp());
        let slug = market_slug(boundary);

        {
            let mut current = self.current_slug.write().expect("slug lock poisoned");
            if *current != slug {
                // Invalidate before any read can observe the new window.
                *self.snapshot.write().expect("odds lock poisoned") = None;
                if !current.is_empty() {
                    info!("Market rollover: {} -> {}", *current, slug);
                }
                *current = slug.clone();
            }
        }

        let started = std::time::Instant::now();
        match self.fetch_odds(&slug).await {
            Ok(mut odds) => {
                odds.fetch_duration_ms = started.elapsed().as_millis() as u64;
                *self.snapshot.write().expect("odds lock poisoned") = Some(odds);
            }
            Err(e) => {
                debug!("Odds prefetch failed for {slug}: {e}");
            }
        }
    }

    async fn fetch_odds(&self, slug: &str) -> Result<MarketOdds> {
        let url = format!("{}/events?slug={}", self.gamma_host, slug);
        let events: Vec<GammaEvent> = self.http.get(&url).send().await?.json().await?;

        let market = events
            .first()
            .and_then(|e| e.markets.first())
            .ok_or_else(|| anyhow::anyhow!("no market for slug {slug}"))?;

        let condition_id = market
            .condition_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("market missing conditionId"))?;
        let (up_token_id, down_token_id) = market
            .token_pair()
            .ok_or_else(|| anyhow::anyhow!("market missing clobTokenIds"))?;

        let up_price = self.fetch_best_ask(&up_token_id).await?;
        let down_price = self.fetch_best_ask(&down_token_id).await?;

        for price in [up_price, down_price] {
            if price <= ASK_FLOOR || price >= ASK_CEIL {
                anyhow::bail!("ask {price} outside ({ASK_FLOOR}, {ASK_CEIL})");
            }
        }

        Ok(MarketOdds {
            slug: slug.to_string(),
            up_price,
            down_price,
            condition_id,
            up_token_id,
            down_token_id,
            fetch_duration_ms: 0,
        })
    }

    async fn fetch_best_ask(&self, token_id: &str) -> Result<f64> {
        let url = format!("{}/book?token_id={}", self.clob_host, token_id);
        let book: BookResponse = self.http.get(&url).send().await?.json().await?;
        book.best_ask(MIN_BOOK_DEPTH)
            .ok_or_else(|| anyhow::anyhow!("no ask with depth >= {MIN_BOOK_DEPTH}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_odds(slug: &str) -> MarketOdds {
        MarketOdds {
            slug: slug.to_string(),
            up_price: 0.45,
            down_price: 0.58,
            condition_id: "0xcond".into(),
            up_token_id: "111".into(),
            down_token_id: "222".into(),
            fetch_duration_ms: 7,
        }
    }

    #[test]
    fn get_odds_is_none_before_first_publish() {
        let feed = OddsFeed::new("http://g".into(), "http://c".into(), 100, 2000);
        assert!(feed.get_odds().is_none());
    }

    #[test]
    fn publish_then_read_round_trips() {
        let feed = OddsFeed::new("http://g".into(), "http://c".into(), 100, 2000);
        feed.publish(sample_odds("btc-updown-5m-1770933900"));
        let odds = feed.get_odds().unwrap();
        assert_eq!(odds.up_price, 0.45);
        assert_eq!(odds.spread(), 0.45 + 0.58);
    }

    #[tokio::test]
    async fn rollover_clears_stale_snapshot() {
        let feed = OddsFeed::new("http://127.0.0.1:1".into(), "http://127.0.0.1:1".into(), 100, 50);
        feed.publish(sample_odds("btc-updown-5m-0"));
        assert!(feed.get_odds().is_some());
        // Prefetch sees a different live slug: cache must be invalidated even
        // though the fetch itself fails (unroutable host).
        feed.prefetch_once().await;
        assert!(feed.get_odds().is_none());
    }
}
