/// Symmetric CUSUM filter over per-tick percent returns (Lopez de Prado).
///
/// Accumulates one-sided drift: S+ absorbs positive returns, S- negative.
/// Fires the first time either side clears the threshold, then stays
/// triggered until the candle resets it. The trigger window is bounded:
/// once ten ticks pass without a crossing the detector stalls for the rest
/// of the candle and a later crossing no longer counts.
#[derive(Debug)]
pub struct CusumDetector {
    s_pos: f64,
    s_neg: f64,
    reference: Option<f64>,
    triggered: bool,
    ticks: u32,
}

/// Threshold when ATR is not yet available.
pub const CUSUM_FALLBACK_THRESHOLD: f64 = 0.025;
/// The detector must fire within this many ticks of the candle open.
pub const CUSUM_MAX_TICKS: u32 = 10;

impl CusumDetector {
    pub fn new() -> Self {
        Self {
            s_pos: 0.0,
            s_neg: 0.0,
            reference: None,
            triggered: false,
            ticks: 0,
        }
    }

    /// Feed a price and the active threshold `h`. Returns the triggered flag.
    pub fn observe(&mut self, price: f64, h: f64) -> bool {
        let Some(reference) = self.reference else {
            self.reference = Some(price);
            return self.triggered;
        };

        self.ticks += 1;
        if reference > 0.0 {
            let r = (price - reference) / reference * 100.0;
            self.s_pos = (self.s_pos + r).max(0.0);
            self.s_neg = (self.s_neg + r).min(0.0);
        }
        self.reference = Some(price);

        if !self.triggered
            && self.ticks <= CUSUM_MAX_TICKS
            && (self.s_pos.abs() > h || self.s_neg.abs() > h)
        {
            self.triggered = true;
        }
        self.triggered
    }

    pub fn triggered(&self) -> bool {
        self.triggered
    }

    /// Window exhausted without a trigger.
    pub fn stalled(&self) -> bool {
        !self.triggered && self.ticks >= CUSUM_MAX_TICKS
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn sums(&self) -> (f64, f64) {
        (self.s_pos, self.s_neg)
    }

    pub fn reset(&mut self) {
        self.s_pos = 0.0;
        self.s_neg = 0.0;
        self.reference = None;
        self.triggered = false;
        self.ticks = 0;
    }
}

impl Default for CusumDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_on_one_sided_drift() {
        let mut cusum = CusumDetector::new();
        let h = 0.028;
        cusum.observe(100_000.0, h);
        cusum.observe(100_020.0, h); // +0.02%
        assert!(!cusum.triggered());
        cusum.observe(100_040.0, h); // cumulative +0.04% > h
        assert!(cusum.triggered());
    }

    #[test]
    fn negative_drift_fires_via_s_neg() {
        let mut cusum = CusumDetector::new();
        let h = 0.03;
        cusum.observe(100_000.0, h);
        cusum.observe(99_980.0, h);
        cusum.observe(99_955.0, h);
        assert!(cusum.triggered());
        let (s_pos, s_neg) = cusum.sums();
        assert_eq!(s_pos, 0.0);
        assert!(s_neg < -0.03);
    }

    #[test]
    fn chop_cancels_and_stalls() {
        let mut cusum = CusumDetector::new();
        let h = 0.05;
        cusum.observe(100_000.0, h);
        for i in 0..CUSUM_MAX_TICKS {
            let price = if i % 2 == 0 { 100_010.0 } else { 99_990.0 };
            cusum.observe(price, h);
        }
        assert!(!cusum.triggered());
        assert!(cusum.stalled());
    }

    #[test]
    fn reset_clears_everything() {
        let mut cusum = CusumDetector::new();
        cusum.observe(100_000.0, 0.01);
        cusum.observe(100_100.0, 0.01);
        assert!(cusum.triggered());
        cusum.reset();
        assert!(!cusum.triggered());
        assert_eq!(cusum.ticks(), 0);
        assert_eq!(cusum.sums(), (0.0, 0.0));
    }

    #[test]
    fn no_late_trigger_after_stall() {
        let mut cusum = CusumDetector::new();
        let h = 0.05;
        cusum.observe(100_000.0, h);
        for _ in 0..CUSUM_MAX_TICKS {
            cusum.observe(100_001.0, h);
        }
        assert!(cusum.stalled());
        // A strong move past the window must not resurrect the signal.
        cusum.observe(100_200.0, h);
        assert!(!cusum.triggered());
        assert!(cusum.stalled());
    }

    #[test]
    fn stays_triggered_after_firing() {
        let mut cusum = CusumDetector::new();
        cusum.observe(100_000.0, 0.01);
        cusum.observe(100_100.0, 0.01);
        assert!(cusum.triggered());
        // Pullback does not un-trigger
        cusum.observe(99_900.0, 0.01);
        assert!(cusum.triggered());
    }
}
