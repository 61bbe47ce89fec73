use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetDirection {
    Up,
    Down,
    Hold,
}

/// Outcome of one expected-value evaluation. Never stored — the scanner
/// copies what it needs into the trade row.
#[derive(Debug, Clone)]
pub struct EvResult {
    pub direction: BetDirection,
    pub ev: f64,
    pub estimate: f64,
    pub gap: f64,
    pub stake: f64,
    pub target_odds: f64,
    pub strategy: &'static str,
    pub reason: String,
}

/// Minimum EV to act; at or below this the evaluation is a HOLD.
pub const FWD_THRESHOLD: f64 = 0.05;
/// EV is capped here — book asks thin out well before such payoffs are real.
pub const EV_CAP: f64 = 0.80;

const TARGET_ODDS_MIN: f64 = 0.20;
const TARGET_ODDS_MAX: f64 = 0.80;
const ESTIMATE_MIN: f64 = 0.50;
const ESTIMATE_MAX: f64 = 0.92;
const BONUS_MIN: f64 = -0.05;
const BONUS_MAX: f64 = 0.04;

fn sign_of(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

/// Pure, deterministic edge model: signed move + confirmation signals in,
/// direction/estimate/EV/stake out.
#[derive(Debug, Clone)]
pub struct EvCalculator {
    pub min_bet: f64,
    pub max_bet: f64,
    pub initial_balance: f64,
}

impl EvCalculator {
    pub fn new(min_bet: f64, max_bet: f64, initial_balance: f64) -> Self {
        Self {
            min_bet,
            max_bet,
            initial_balance,
        }
    }

    /// Win-probability estimate from the move magnitude plus bounded bonuses.
    pub fn estimate_prob(
        change_pct: f64,
        velocity: f64,
        directed_momentum: f64,
        time_bonus: f64,
    ) -> f64 {
        let abs = change_pct.abs();
        let base = match abs {
            x if x >= 1.00 => 0.92,
            x if x >= 0.70 => 0.90,
            x if x >= 0.50 => 0.88,
            x if x >= 0.35 => 0.86,
            x if x >= 0.25 => 0.83,
            x if x >= 0.15 => 0.79,
            x if x >= 0.10 => 0.73,
            x if x >= 0.08 => 0.67,
            x if x >= 0.05 => 0.63,
            x if x >= 0.03 => 0.58,
            _ => 0.53,
        };

        let velocity_bonus = if sign_of(velocity) != sign_of(change_pct) {
            -0.03
        } else {
            match velocity.abs() {
                v if v >= 0.05 => 0.04,
                v if v >= 0.02 => 0.02,
                v if v >= 0.01 => 0.01,
                _ => 0.0,
            }
        };

        let momentum_bonus = match directed_momentum {
            m if m >= 0.8 => 0.04,
            m if m >= 0.6 => 0.02,
            m if m >= 0.3 => 0.0,
            m if m >= 0.0 => -0.02,
            m if m >= -0.3 => -0.03,
            _ => -0.05,
        };

        let bonus = (velocity_bonus + momentum_bonus + time_bonus).clamp(BONUS_MIN, BONUS_MAX);
        (base + bonus).clamp(ESTIMATE_MIN, ESTIMATE_MAX)
    }

    /// Evaluate the current snapshot.
    ///
    /// `momentum_score` is the ring consistency in [-1, +1]; it is projected
    /// onto the trade direction before the bonus lookup.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        &self,
        price_diff_pct: f64,
        up_odds: f64,
        down_odds: f64,
        velocity: f64,
        momentum_score: f64,
        time_bonus: f64,
        balance: f64,
    ) -> EvResult {
        let direction = if price_diff_pct > 0.0 {
            BetDirection::Up
        } else {
            BetDirection::Down
        };

        // Odds come straight from the traded side of the book, never 1 - other.
        let raw_target = match direction {
            BetDirection::Up => up_odds,
            _ => down_odds,
        };
        let target_odds = raw_target.clamp(TARGET_ODDS_MIN, TARGET_ODDS_MAX);

        let directed_momentum = if price_diff_pct >= 0.0 {
            momentum_score
        } else {
            -momentum_score
        };

        let estimate = Self::estimate_prob(price_diff_pct, velocity, directed_momentum, time_bonus);
        let ev = (estimate / target_odds - 1.0).min(EV_CAP);
        let gap = estimate - target_odds;

        if ev <= FWD_THRESHOLD {
            return EvResult {
                direction: BetDirection::Hold,
                ev,
                estimate,
                gap,
                stake: 0.0,
                target_odds,
                strategy: crate::models::trade::STRATEGY_SNIPER,
                reason: format!(
                    "ev {ev:.3} <= {FWD_THRESHOLD} (est {estimate:.2} vs odds {target_odds:.2})"
                ),
            };
        }

        let stake = self.kelly_stake(ev, target_odds, balance);

        EvResult {
            direction,
            ev,
            estimate,
            gap,
            stake,
            target_odds,
            strategy: crate::models::trade::STRATEGY_SNIPER,
            reason: format!(
                "diff {price_diff_pct:+.3}% est {estimate:.2} odds {target_odds:.2} ev {ev:.2} mom {momentum_score:+.2}"
            ),
        }
    }

    /// Fractional Kelly with an EV-banded multiplier and a drawdown-aware cap.
    fn kelly_stake(&self, ev: f64, target_odds: f64, balance: f64) -> f64 {
        let net_odds = 1.0 / target_odds - 1.0;
        if net_odds <= 0.0 {
            return 0.0;
        }
        let kelly_fraction = ev / net_odds;

        let kelly_mult = match ev {
            e if e >= 1.0 => 0.35,
            e if e >= 0.5 => 0.30,
            e if e >= 0.3 => 0.25,
            _ => 0.20,
        };

        let ratio = if self.initial_balance > 0.0 {
            balance / self.initial_balance
        } else {
            0.0
        };
        let cap = match ratio {
            r if r < 1.0 => 0.02,
            r if r < 2.0 => 0.03,
            r if r < 5.0 => 0.04,
            _ => 0.05,
        };

        let safe_fraction = (kelly_fraction * kelly_mult).clamp(0.02, cap);
        (balance * safe_fraction).clamp(self.min_bet, self.max_bet)
    }
}
