//! C11: rolling diagnostics over gate evaluations. No behavioral role in
//! the core loop; purely observational.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;

use crate::types::{CostComponents, GateOutcome};

#[derive(Clone, Copy, Debug)]
struct Sample {
    outcome: GateOutcome,
    expected_reward: f32,
    components: CostComponents,
}

pub struct GateMetrics {
    inner: Mutex<Inner>,
    window_size: usize,
}

struct Inner {
    samples: VecDeque<Sample>,
    wait_streak: u32,
    last_send: Option<Instant>,
    actual_rewards: VecDeque<f32>,
}

#[derive(Clone, Copy, Debug)]
pub struct GateStatistics {
    pub pass_rate: f32,
    pub average_expected_reward: f32,
    pub average_components: CostComponents,
    pub wait_streak: u32,
    pub time_since_last_send_secs: Option<f32>,
}

impl GateMetrics {
    pub fn new(window_size: usize) -> Self {
        GateMetrics {
            inner: Mutex::new(Inner {
                samples: VecDeque::with_capacity(window_size),
                wait_streak: 0,
                last_send: None,
                actual_rewards: VecDeque::new(),
            }),
            window_size,
        }
    }

    pub fn record_evaluation(&self, outcome: GateOutcome, expected_reward: f32, components: CostComponents) {
        let mut inner = self.inner.lock();

        match outcome {
            GateOutcome::Send => {
                inner.wait_streak = 0;
                inner.last_send = Some(Instant::now());
            }
            _ => {
                inner.wait_streak += 1;
                if inner.wait_streak >= 10 {
                    log::warn!("[GateMetrics] DeadlockRisk: wait_streak={}", inner.wait_streak);
                }
            }
        }

        inner.samples.push_back(Sample { outcome, expected_reward, components });
        if inner.samples.len() > self.window_size {
            inner.samples.pop_front();
        }
    }

    pub fn record_actual_reward(&self, reward: f32) {
        let mut inner = self.inner.lock();
        inner.actual_rewards.push_back(reward);
        if inner.actual_rewards.len() > self.window_size {
            inner.actual_rewards.pop_front();
        }
    }

    pub fn wait_streak(&self) -> u32 {
        self.inner.lock().wait_streak
    }

    pub fn time_since_last_send_secs(&self) -> Option<f32> {
        self.inner.lock().last_send.map(|t| (Instant::now() - t).as_secs_f32())
    }

    pub fn statistics(&self) -> GateStatistics {
        let inner = self.inner.lock();
        let total = inner.samples.len();
        if total == 0 {
            return GateStatistics {
                pass_rate: 0.0,
                average_expected_reward: 0.0,
                average_components: CostComponents::default(),
                wait_streak: inner.wait_streak,
                time_since_last_send_secs: None,
            };
        }

        let sends = inner.samples.iter().filter(|s| s.outcome == GateOutcome::Send).count();
        let finite: Vec<f32> = inner
            .samples
            .iter()
            .map(|s| s.expected_reward)
            .filter(|r| r.is_finite())
            .collect();
        let average_expected_reward =
            if finite.is_empty() { 0.0 } else { finite.iter().sum::<f32>() / finite.len() as f32 };

        let mut avg = CostComponents::default();
        for s in &inner.samples {
            avg.survival += s.components.survival;
            avg.disruption += s.components.disruption;
            avg.location += s.components.location;
            avg.exploration += s.components.exploration;
        }
        let n = total as f32;
        avg.survival /= n;
        avg.disruption /= n;
        avg.location /= n;
        avg.exploration /= n;

        GateStatistics {
            pass_rate: sends as f32 / total as f32,
            average_expected_reward,
            average_components: avg,
            wait_streak: inner.wait_streak,
            time_since_last_send_secs: inner.last_send.map(|t| (Instant::now() - t).as_secs_f32()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_rate_reflects_sends() {
        let metrics = GateMetrics::new(10);
        metrics.record_evaluation(GateOutcome::Send, 0.5, CostComponents::default());
        metrics.record_evaluation(GateOutcome::Wait, -0.1, CostComponents::default());
        let stats = metrics.statistics();
        assert_eq!(stats.pass_rate, 0.5);
    }

    #[test]
    fn wait_streak_increments_and_resets() {
        let metrics = GateMetrics::new(20);
        metrics.record_evaluation(GateOutcome::Wait, -0.1, CostComponents::default());
        metrics.record_evaluation(GateOutcome::Wait, -0.1, CostComponents::default());
        assert_eq!(metrics.wait_streak(), 2);
        metrics.record_evaluation(GateOutcome::Send, 0.5, CostComponents::default());
        assert_eq!(metrics.wait_streak(), 0);
    }

    #[test]
    fn average_expected_reward_ignores_negative_infinity() {
        let metrics = GateMetrics::new(10);
        metrics.record_evaluation(GateOutcome::Wait, f32::NEG_INFINITY, CostComponents::default());
        metrics.record_evaluation(GateOutcome::Send, 0.4, CostComponents::default());
        let stats = metrics.statistics();
        assert_eq!(stats.average_expected_reward, 0.4);
    }

    #[test]
    fn window_evicts_oldest() {
        let metrics = GateMetrics::new(2);
        metrics.record_evaluation(GateOutcome::Send, 1.0, CostComponents::default());
        metrics.record_evaluation(GateOutcome::Send, 1.0, CostComponents::default());
        metrics.record_evaluation(GateOutcome::Wait, -1.0, CostComponents::default());
        let stats = metrics.statistics();
        assert_eq!(stats.pass_rate, 0.5);
    }
}
