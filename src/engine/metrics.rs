use crate::signals::regime::VolRegime;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::RwLock;

/// Lock-free scan telemetry, read by the dashboard surface.
///
/// Scalars live in atomics (f64s bit-cast) so the 100ms scan loop publishes
/// without contending with readers; only the filter name takes a lock.
#[derive(Debug)]
pub struct ScanMetrics {
    total_scans: AtomicU64,
    scans_in_epoch: AtomicU64,
    epoch_start_ms: AtomicI64,
    scans_per_sec: AtomicU64,
    last_scan_us: AtomicU64,
    last_filter: RwLock<String>,
    atr_pct_bits: AtomicU64,
    dynamic_min_move_bits: AtomicU64,
    regime_idx: AtomicU64,
    cusum_pos_bits: AtomicU64,
    cusum_neg_bits: AtomicU64,
    cusum_threshold_bits: AtomicU64,
    cusum_triggered: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_scans: u64,
    pub scans_per_sec: u64,
    pub last_scan_duration_us: u64,
    pub last_filter: String,
    pub atr_pct: Option<f64>,
    pub dynamic_min_move: f64,
    pub regime: VolRegime,
    pub cusum_pos: f64,
    pub cusum_neg: f64,
    pub cusum_threshold: f64,
    pub cusum_triggered: bool,
}

fn regime_to_idx(regime: VolRegime) -> u64 {
    match regime {
        VolRegime::Low => 0,
        VolRegime::Normal => 1,
        VolRegime::High => 2,
        VolRegime::Extreme => 3,
    }
}

fn idx_to_regime(idx: u64) -> VolRegime {
    match idx {
        0 => VolRegime::Low,
        2 => VolRegime::High,
        3 => VolRegime::Extreme,
        _ => VolRegime::Normal,
    }
}

impl ScanMetrics {
    pub fn new() -> Self {
        Self {
            total_scans: AtomicU64::new(0),
            scans_in_epoch: AtomicU64::new(0),
            epoch_start_ms: AtomicI64::new(0),
            scans_per_sec: AtomicU64::new(0),
            last_scan_us: AtomicU64::new(0),
            last_filter: RwLock::new(String::new()),
            atr_pct_bits: AtomicU64::new(f64::NAN.to_bits()),
            dynamic_min_move_bits: AtomicU64::new(0),
            regime_idx: AtomicU64::new(regime_to_idx(VolRegime::Normal)),
            cusum_pos_bits: AtomicU64::new(0),
            cusum_neg_bits: AtomicU64::new(0),
            cusum_threshold_bits: AtomicU64::new(0),
            cusum_triggered: AtomicBool::new(false),
        }
    }

    /// Count a scan and roll the 1-second rate epoch.
    pub fn record_scan(&self, duration_us: u64) {
        self.total_scans.fetch_add(1, Ordering::Relaxed);
        self.last_scan_us.store(duration_us, Ordering::Relaxed);

        let now = Utc::now().timestamp_millis();
        let epoch_start = self.epoch_start_ms.load(Ordering::Relaxed);
        if now - epoch_start >= 1000 {
            let in_epoch = self.scans_in_epoch.swap(0, Ordering::Relaxed);
            self.scans_per_sec.store(in_epoch, Ordering::Relaxed);
            self.epoch_start_ms.store(now, Ordering::Relaxed);
        }
        self.scans_in_epoch.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_filter(&self, name: &str) {
        let mut guard = self.last_filter.write().expect("metrics lock poisoned");
        if *guard != name {
            *guard = name.to_string();
        }
    }

    pub fn set_volatility(&self, atr_pct: Option<f64>, dynamic_min_move: f64, regime: VolRegime) {
        self.atr_pct_bits
            .store(atr_pct.unwrap_or(f64::NAN).to_bits(), Ordering::Relaxed);
        self.dynamic_min_move_bits
            .store(dynamic_min_move.to_bits(), Ordering::Relaxed);
        self.regime_idx
            .store(regime_to_idx(regime), Ordering::Relaxed);
    }

    pub fn set_cusum(&self, pos: f64, neg: f64, threshold: f64, triggered: bool) {
        self.cusum_pos_bits.store(pos.to_bits(), Ordering::Relaxed);
        self.cusum_neg_bits.store(neg.to_bits(), Ordering::Relaxed);
        self.cusum_threshold_bits
            .store(threshold.to_bits(), Ordering::Relaxed);
        self.cusum_triggered.store(triggered, Ordering::Relaxed);
    }

    pub fn last_filter(&self) -> String {
        self.last_filter
            .read()
            .expect("metrics lock poisoned")
            .clone()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let atr = f64::from_bits(self.atr_pct_bits.load(Ordering::Relaxed));
        MetricsSnapshot {
            total_scans: self.total_scans.load(Ordering::Relaxed),
            scans_per_sec: self.scans_per_sec.load(Ordering::Relaxed),
            last_scan_duration_us: self.last_scan_us.load(Ordering::Relaxed),
            last_filter: self.last_filter(),
            atr_pct: (!atr.is_nan()).then_some(atr),
            dynamic_min_move: f64::from_bits(self.dynamic_min_move_bits.load(Ordering::Relaxed)),
            regime: idx_to_regime(self.regime_idx.load(Ordering::Relaxed)),
            cusum_pos: f64::from_bits(self.cusum_pos_bits.load(Ordering::Relaxed)),
            cusum_neg: f64::from_bits(self.cusum_neg_bits.load(Ordering::Relaxed)),
            cusum_threshold: f64::from_bits(self.cusum_threshold_bits.load(Ordering::Relaxed)),
            cusum_triggered: self.cusum_triggered.load(Ordering::Relaxed),
        }
    }
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_writes() {
        let metrics = ScanMetrics::new();
        metrics.record_scan(42);
        metrics.set_filter("odds_ceiling");
        metrics.set_volatility(Some(0.07), 0.035, VolRegime::Normal);
        metrics.set_cusum(0.03, -0.01, 0.028, true);

        let snap = metrics.snapshot();
        assert_eq!(snap.total_scans, 1);
        assert_eq!(snap.last_scan_duration_us, 42);
        assert_eq!(snap.last_filter, "odds_ceiling");
        assert_eq!(snap.atr_pct, Some(0.07));
        assert_eq!(snap.regime, VolRegime::Normal);
        assert!(snap.cusum_triggered);
    }

    #[test]
    fn atr_absent_until_set() {
        let metrics = ScanMetrics::new();
        assert_eq!(metrics.snapshot().atr_pct, None);
    }
}
