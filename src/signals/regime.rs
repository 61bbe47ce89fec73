use serde::{Deserialize, Serialize};

/// Coarse volatility class derived from ATR as a percentage of the last close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolRegime {
    Low,
    Normal,
    High,
    Extreme,
}

impl VolRegime {
    /// Classify from ATR%. Reports Normal until ATR is ready.
    pub fn from_atr_pct(atr_pct: Option<f64>) -> Self {
        match atr_pct {
            None => VolRegime::Normal,
            Some(x) if x < 0.04 => VolRegime::Low,
            Some(x) if x < 0.10 => VolRegime::Normal,
            Some(x) if x < 0.18 => VolRegime::High,
            Some(_) => VolRegime::Extreme,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VolRegime::Low => "LOW",
            VolRegime::Normal => "NORMAL",
            VolRegime::High => "HIGH",
            VolRegime::Extreme => "EXTREME",
        }
    }

    /// Multiplier on ATR% for the minimum entry move.
    pub fn entry_mult(&self) -> f64 {
        match self {
            VolRegime::Low => 0.40,
            VolRegime::Normal => 0.50,
            VolRegime::High => 0.60,
            VolRegime::Extreme => 0.70,
        }
    }

    /// Multiplier on ATR% for the minimum intra-candle range.
    pub fn range_mult(&self) -> f64 {
        match self {
            VolRegime::Low => 0.25,
            VolRegime::Normal => 0.30,
            VolRegime::High => 0.35,
            VolRegime::Extreme => 0.40,
        }
    }

    /// Minimum absolute momentum-ring consistency.
    pub fn momentum_min(&self) -> f64 {
        match self {
            VolRegime::Low => 0.35,
            VolRegime::Normal => 0.40,
            VolRegime::High => 0.50,
            VolRegime::Extreme => 0.60,
        }
    }

    /// Multiplier on ATR% for the CUSUM trigger threshold.
    pub fn cusum_mult(&self) -> f64 {
        match self {
            VolRegime::Low => 0.35,
            VolRegime::Normal => 0.40,
            VolRegime::High => 0.50,
            VolRegime::Extreme => 0.60,
        }
    }

    /// Additive adjustment to the adaptive estimate-vs-odds gap.
    pub fn gap_adj(&self) -> f64 {
        match self {
            VolRegime::Low => -0.01,
            VolRegime::Normal => 0.00,
            VolRegime::High => 0.01,
            VolRegime::Extreme => 0.02,
        }
    }
}
