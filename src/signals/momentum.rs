use std::collections::VecDeque;

fn sign_of(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

/// Ring of the last N signs of the open-relative price move.
///
/// Consistency is the mean of the ring: +1.0 means every recent scan saw the
/// price above the open, -1.0 below, values near zero mean chop.
#[derive(Debug)]
pub struct MomentumRing {
    signs: VecDeque<i8>,
    capacity: usize,
}

pub const MOMENTUM_RING_LEN: usize = 10;
pub const MOMENTUM_MIN_SAMPLES: usize = 3;

impl MomentumRing {
    pub fn new() -> Self {
        Self {
            signs: VecDeque::with_capacity(MOMENTUM_RING_LEN),
            capacity: MOMENTUM_RING_LEN,
        }
    }

    pub fn push(&mut self, price_diff_pct: f64) {
        if self.signs.len() >= self.capacity {
            self.signs.pop_front();
        }
        self.signs.push_back(sign_of(price_diff_pct));
    }

    pub fn len(&self) -> usize {
        self.signs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signs.is_empty()
    }

    pub fn is_warm(&self) -> bool {
        self.signs.len() >= MOMENTUM_MIN_SAMPLES
    }

    pub fn consistency(&self) -> f64 {
        if self.signs.is_empty() {
            return 0.0;
        }
        self.signs.iter().map(|&s| s as f64).sum::<f64>() / self.signs.len() as f64
    }

    pub fn reset(&mut self) {
        self.signs.clear();
    }
}

impl Default for MomentumRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts sign flips of the open-relative move within one candle.
/// Five or more crossings mean the candle is chopping around its open.
#[derive(Debug, Default)]
pub struct CrossCounter {
    last_sign: i8,
    crosses: u32,
}

pub const CROSS_CHOP_LIMIT: u32 = 5;

impl CrossCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, price_diff_pct: f64) {
        let sign = sign_of(price_diff_pct);
        if sign != 0 {
            if self.last_sign != 0 && sign != self.last_sign {
                self.crosses += 1;
            }
            self.last_sign = sign;
        }
    }

    pub fn crosses(&self) -> u32 {
        self.crosses
    }

    pub fn is_choppy(&self) -> bool {
        self.crosses >= CROSS_CHOP_LIMIT
    }

    pub fn reset(&mut self) {
        self.last_sign = 0;
        self.crosses = 0;
    }
}

/// Rolling high/low over the last N observed prices.
#[derive(Debug)]
pub struct RangeTracker {
    window: VecDeque<f64>,
    capacity: usize,
}

pub const RANGE_WINDOW: usize = 60;

impl RangeTracker {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(RANGE_WINDOW),
            capacity: RANGE_WINDOW,
        }
    }

    pub fn push(&mut self, price: f64) {
        if self.window.len() >= self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(price);
    }

    /// (max - min) / min as a percentage, 0.0 before two samples.
    pub fn range_pct(&self) -> f64 {
        if self.window.len() < 2 {
            return 0.0;
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &p in &self.window {
            min = min.min(p);
            max = max.max(p);
        }
        if min <= 0.0 {
            return 0.0;
        }
        (max - min) / min * 100.0
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

impl Default for RangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// EMA of the raw per-second percent price change.
///
/// Sub-50ms windows are skipped: at scan cadence they are dominated by
/// timer jitter, not price movement.
#[derive(Debug)]
pub struct VelocityEma {
    ema: f64,
    last_price: f64,
    last_ms: i64,
    primed: bool,
}

const VELOCITY_ALPHA: f64 = 0.3;
const VELOCITY_MIN_WINDOW_MS: i64 = 50;

impl VelocityEma {
    pub fn new() -> Self {
        Self {
            ema: 0.0,
            last_price: 0.0,
            last_ms: 0,
            primed: false,
        }
    }

    /// Feed an observation; returns the current velocity in %/sec.
    pub fn observe(&mut self, price: f64, now_ms: i64) -> f64 {
        if !self.primed {
            self.last_price = price;
            self.last_ms = now_ms;
            self.primed = true;
            return 0.0;
        }

        let dt_ms = now_ms - self.last_ms;
        if dt_ms < VELOCITY_MIN_WINDOW_MS {
            return self.ema;
        }

        if self.last_price > 0.0 {
            let pct = (price - self.last_price) / self.last_price * 100.0;
            let raw = pct / (dt_ms as f64 / 1000.0);
            self.ema = VELOCITY_ALPHA * raw + (1.0 - VELOCITY_ALPHA) * self.ema;
        }
        self.last_price = price;
        self.last_ms = now_ms;
        self.ema
    }

    pub fn velocity(&self) -> f64 {
        self.ema
    }

    pub fn reset(&mut self) {
        self.ema = 0.0;
        self.primed = false;
    }
}

impl Default for VelocityEma {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consistency_is_mean_of_signs() {
        let mut ring = MomentumRing::new();
        for _ in 0..8 {
            ring.push(0.1);
        }
        ring.push(-0.1);
        ring.push(-0.1);
        assert!((ring.consistency() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn ring_warms_after_three_samples() {
        let mut ring = MomentumRing::new();
        ring.push(0.1);
        ring.push(0.1);
        assert!(!ring.is_warm());
        ring.push(0.1);
        assert!(ring.is_warm());
    }

    #[test]
    fn cross_counter_ignores_zero_and_counts_flips() {
        let mut crosses = CrossCounter::new();
        for diff in [0.1, 0.2, -0.1, 0.0, 0.1, -0.2, 0.3] {
            crosses.observe(diff);
        }
        assert_eq!(crosses.crosses(), 4);
        assert!(!crosses.is_choppy());
        crosses.observe(-0.1);
        assert!(crosses.is_choppy());
    }

    #[test]
    fn range_pct_over_window() {
        let mut range = RangeTracker::new();
        range.push(100.0);
        range.push(101.0);
        range.push(100.5);
        assert!((range.range_pct() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn velocity_skips_sub_50ms_windows() {
        let mut v = VelocityEma::new();
        v.observe(100.0, 0);
        let after_fast = v.observe(200.0, 10); // jitter window, ignored
        assert_eq!(after_fast, 0.0);
        let after_slow = v.observe(101.0, 1000);
        // one real sample: +1%/sec smoothed by alpha
        assert!((after_slow - 0.3).abs() < 1e-9);
    }

    #[test]
    fn velocity_reset_clears_state() {
        let mut v = VelocityEma::new();
        v.observe(100.0, 0);
        v.observe(101.0, 1000);
        v.reset();
        assert_eq!(v.velocity(), 0.0);
        assert_eq!(v.observe(50.0, 2000), 0.0);
    }
}
