//! Redundancy adaptation.
//!
//! The transport reports what it observes; the controller turns that
//! into a redundancy ratio with a safety margin, smoothed so a single
//! noisy sample cannot whipsaw the repair schedule.

use super::FecConfig;
use std::collections::VecDeque;

/// Feedback from the transport. All values are non-negative,
/// `packet_loss_rate` lives in [0, 1].
#[derive(Debug, Clone, Default)]
pub struct NetworkMetrics {
    pub packet_loss_rate: f64,
    pub rtt_ms: f64,
    pub jitter_ms: f64,
    pub bandwidth_est: f64,
    pub is_mobile: bool,
}

const SAFETY_MARGIN: f64 = 0.15;
const HIGH_LOSS_THRESHOLD: f64 = 0.2;
const HIGH_LOSS_FACTOR: f64 = 1.5;
const EMA_ALPHA: f64 = 0.5;

/// One adaptation step. Target redundancy sits a safety margin above the
/// observed loss, switching to a multiplicative markup once loss passes
/// 20%; the result is EMA-blended into the current ratio and clamped to
/// the configured band. The ratio never drops below a coverable loss
/// rate.
pub(crate) fn update_redundancy(current: f64, cfg: &FecConfig, loss_rate: f64) -> f64 {
    let target = if loss_rate > HIGH_LOSS_THRESHOLD {
        loss_rate * HIGH_LOSS_FACTOR
    } else {
        loss_rate + SAFETY_MARGIN
    };
    let target = target.clamp(cfg.min_redundancy, cfg.max_redundancy);

    let mut next = EMA_ALPHA * target + (1.0 - EMA_ALPHA) * current;
    next = next.clamp(cfg.min_redundancy, cfg.max_redundancy);

    if next < loss_rate && loss_rate <= cfg.max_redundancy {
        next = (loss_rate + 0.05).min(cfg.max_redundancy);
    }
    next
}

/// Smooths raw loss observations with an EMA and a short burst window,
/// reporting the worse of the two so short loss bursts are not averaged
/// away before the controller sees them.
pub struct LossEstimator {
    ema_loss_rate: f64,
    lambda: f64,
    burst_window: VecDeque<bool>,
    burst_capacity: usize,
}

impl LossEstimator {
    pub fn new(lambda: f64, burst_capacity: usize) -> Self {
        Self {
            ema_loss_rate: 0.0,
            lambda,
            burst_window: VecDeque::with_capacity(burst_capacity),
            burst_capacity,
        }
    }

    pub fn report_loss(&mut self, lost: usize, total: usize) {
        let rate = if total > 0 {
            lost as f64 / total as f64
        } else {
            0.0
        };
        self.ema_loss_rate = self.lambda * rate + (1.0 - self.lambda) * self.ema_loss_rate;

        for i in 0..total {
            if self.burst_window.len() == self.burst_capacity {
                self.burst_window.pop_front();
            }
            self.burst_window.push_back(i < lost);
        }
    }

    pub fn estimated_loss(&self) -> f64 {
        let burst = if self.burst_window.is_empty() {
            0.0
        } else {
            self.burst_window.iter().filter(|&&l| l).count() as f64
                / self.burst_window.len() as f64
        };
        self.ema_loss_rate.max(burst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_toward_high_loss_target() {
        let cfg = FecConfig::default();
        let mut current = 0.1;
        for _ in 0..10 {
            current = update_redundancy(current, &cfg, 0.25);
        }
        // 0.25 is in the multiplicative branch: target 0.375.
        assert!(current > 0.2 && current < 0.45, "current {}", current);
    }

    #[test]
    fn low_loss_uses_additive_margin() {
        let cfg = FecConfig::default();
        let mut current = cfg.initial_redundancy;
        for _ in 0..20 {
            current = update_redundancy(current, &cfg, 0.05);
        }
        assert!((current - 0.2).abs() < 0.02, "current {}", current);
    }

    #[test]
    fn never_below_coverable_loss() {
        let cfg = FecConfig {
            min_redundancy: 0.05,
            ..FecConfig::default()
        };
        let next = update_redundancy(0.05, &cfg, 0.3);
        assert!(next >= 0.3);
    }

    #[test]
    fn clamped_to_band() {
        let cfg = FecConfig::default();
        let next = update_redundancy(0.8, &cfg, 0.9);
        assert!(next <= cfg.max_redundancy + 1e-9);
    }

    #[test]
    fn burst_dominates_ema() {
        let mut est = LossEstimator::new(0.1, 20);
        est.report_loss(0, 100);
        est.report_loss(10, 10);
        assert!(est.estimated_loss() > 0.4);
    }
}
