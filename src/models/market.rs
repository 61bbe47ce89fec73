use rust_decimal::Decimal;
use serde::Deserialize;

/// 5-minute candle length in seconds.
pub const CANDLE_SECS: i64 = 300;

/// Align an epoch second to the start of its 5-minute candle.
pub fn candle_boundary(epoch_secs: i64) -> i64 {
    epoch_secs.div_euclid(CANDLE_SECS) * CANDLE_SECS
}

/// Slug of the up/down market covering the candle starting at `boundary`.
///
/// Polymarket short-duration markets follow `btc-updown-5m-<unix start>`;
/// five-minute boundaries are identical across whole-hour offsets, so the
/// Eastern-Time-normalized start is the plain Unix boundary second.
pub fn market_slug(boundary: i64) -> String {
    format!("btc-updown-5m-{boundary}")
}

/// Snapshot of the active market's best asks, replaced wholesale on prefetch.
#[derive(Debug, Clone)]
pub struct MarketOdds {
    pub slug: String,
    pub up_price: f64,
    pub down_price: f64,
    pub condition_id: String,
    pub up_token_id: String,
    pub down_token_id: String,
    pub fetch_duration_ms: u64,
}

impl MarketOdds {
    pub fn spread(&self) -> f64 {
        self.up_price + self.down_price
    }
}

// --- Gamma / CLOB response types ---

#[derive(Debug, Deserialize)]
pub struct GammaEvent {
    #[serde(default)]
    pub markets: Vec<GammaMarket>,
}

#[derive(Debug, Deserialize)]
pub struct GammaMarket {
    #[serde(rename = "conditionId", default)]
    pub condition_id: Option<String>,
    /// JSON-encoded array of CLOB token ids, e.g. "[\"123\", \"456\"]"
    #[serde(rename = "clobTokenIds", default)]
    pub clob_token_ids: Option<String>,
    /// JSON-encoded array of outcome prices, e.g. "[\"0.99\", \"0.01\"]"
    #[serde(rename = "outcomePrices", default)]
    pub outcome_prices: Option<String>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default)]
    pub tokens: Option<Vec<TokenInfo>>,
}

#[derive(Debug, Deserialize)]
pub struct TokenInfo {
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub winner: Option<bool>,
}

impl GammaMarket {
    /// Decode the string-encoded CLOB token id pair (up first, down second).
    pub fn token_pair(&self) -> Option<(String, String)> {
        let ids: Vec<String> = self
            .clob_token_ids
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())?;
        if ids.len() < 2 {
            return None;
        }
        Some((ids[0].clone(), ids[1].clone()))
    }

    /// Decode the string-encoded outcome price pair.
    pub fn price_pair(&self) -> Option<(f64, f64)> {
        let prices: Vec<String> = self
            .outcome_prices
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())?;
        if prices.len() < 2 {
            return None;
        }
        Some((prices[0].parse().ok()?, prices[1].parse().ok()?))
    }
}

#[derive(Debug, Deserialize)]
pub struct BookResponse {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

#[derive(Debug, Deserialize)]
pub struct BookLevel {
    pub price: String,
    pub size: String,
}

impl BookResponse {
    /// Numerically lowest ask with at least `min_depth` tokens behind it.
    pub fn best_ask(&self, min_depth: Decimal) -> Option<f64> {
        self.asks
            .iter()
            .filter_map(|level| {
                let price = level.price.parse::<Decimal>().ok()?;
                let size = level.size.parse::<Decimal>().ok()?;
                (size >= min_depth).then_some(price)
            })
            .min()
            .and_then(|p| p.to_string().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn boundary_is_floor_to_300() {
        assert_eq!(candle_boundary(1_770_933_900), 1_770_933_900);
        assert_eq!(candle_boundary(1_770_933_901), 1_770_933_900);
        assert_eq!(candle_boundary(1_770_934_199), 1_770_933_900);
        assert_eq!(candle_boundary(1_770_934_200), 1_770_934_200);
    }

    #[test]
    fn slug_changes_exactly_at_boundary() {
        let b = 1_770_933_900;
        assert_eq!(market_slug(candle_boundary(b - 1)), "btc-updown-5m-1770933600");
        assert_eq!(market_slug(candle_boundary(b)), "btc-updown-5m-1770933900");
    }

    #[test]
    fn token_pair_parses_embedded_json() {
        let market = GammaMarket {
            condition_id: Some("0xabc".into()),
            clob_token_ids: Some("[\"111\", \"222\"]".into()),
            outcome_prices: None,
            closed: None,
            tokens: None,
        };
        assert_eq!(market.token_pair(), Some(("111".into(), "222".into())));
    }

    #[test]
    fn best_ask_honors_depth_floor() {
        let book = BookResponse {
            bids: vec![],
            asks: vec![
                BookLevel { price: "0.41".into(), size: "2".into() },
                BookLevel { price: "0.45".into(), size: "80".into() },
                BookLevel { price: "0.43".into(), size: "10".into() },
            ],
        };
        // 0.41 is too thin; 0.43 is the lowest ask with >= 5 tokens
        assert_eq!(book.best_ask(dec!(5)), Some(0.43));
    }

    #[test]
    fn best_ask_none_when_book_too_thin() {
        let book = BookResponse {
            bids: vec![],
            asks: vec![BookLevel { price: "0.50".into(), size: "1".into() }],
        };
        assert_eq!(book.best_ask(dec!(5)), None);
    }
}
