//! C2: turns a pair of consecutive observations plus the decision taken on
//! the first of them into a scalar reward in [-1, 1].

use std::collections::{HashMap, VecDeque};

use crate::chunk_geometry::{chunk_distance, normalize_distance};
use crate::config::RewardConfig;
use crate::types::{Observation, SpawnDecision};

#[derive(Clone, Copy, Debug, Default)]
pub struct RewardComponents {
    pub mining_disruption: f32,
    pub protector_reduction: f32,
    pub player_energy_drain: f32,
    pub bonuses: f32,
    pub no_impact_penalty: f32,
    pub spawn_gating: f32,
    pub spawn_location: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct RewardOutcome {
    pub reward: f32,
    pub components: RewardComponents,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RewardTrend {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

fn rate(start: f32, end: f32) -> f32 {
    if start == 0.0 && end == 0.0 {
        return 0.0;
    }
    let max_val = start.max(end);
    if max_val == 0.0 {
        return 0.0;
    }
    (end - start) / max_val
}

fn count_by_chunk(chunks: impl Iterator<Item = i32>) -> HashMap<i32, u32> {
    let mut counts = HashMap::new();
    for c in chunks {
        if c >= 0 {
            *counts.entry(c).or_insert(0) += 1;
        }
    }
    counts
}

/// Was this decision a genuine no-op (NN emitted no-spawn and the gate
/// agreed), from the reward calculator's point of view. A gate override
/// (SHOULD_SPAWN/CORRECT_WAIT) is still "skipped" for reward-shaping
/// purposes: nothing was actually sent to the game.
pub fn was_skipped(decision: &SpawnDecision, was_executed: bool) -> bool {
    !was_executed || decision.spawn_chunk < 0
}

pub struct RewardCalculator {
    config: RewardConfig,
    reward_history: VecDeque<f32>,
    max_history: usize,
}

impl RewardCalculator {
    pub fn new(config: RewardConfig) -> Self {
        RewardCalculator { config, reward_history: VecDeque::new(), max_history: 10 }
    }

    pub fn reward(
        &mut self,
        prev: &Observation,
        curr: &Observation,
        prev_decision: Option<&SpawnDecision>,
        prev_was_executed: bool,
    ) -> RewardOutcome {
        let mut c = RewardComponents::default();

        let prev_mining = prev.mining_workers.len() as f32;
        let curr_mining = curr.mining_workers.len() as f32;
        let mining_rate = rate(prev_mining, curr_mining);
        c.mining_disruption = -mining_rate;

        let prev_protectors = prev.protectors.len() as f32;
        let curr_protectors = curr.protectors.len() as f32;
        let protector_rate = rate(prev_protectors, curr_protectors);
        c.protector_reduction = -protector_rate;

        let energy_rate = rate(curr.player_energy.start, curr.player_energy.end);
        c.player_energy_drain = -energy_rate;

        let mut total = c.mining_disruption * self.config.mining_disruption_weight
            + c.protector_reduction * self.config.protector_reduction_weight
            + c.player_energy_drain * self.config.player_energy_weight;

        let prev_mining_by_chunk = count_by_chunk(prev.mining_workers.iter().map(|w| w.chunk_id));
        let curr_mining_by_chunk = count_by_chunk(curr.mining_workers.iter().map(|w| w.chunk_id));
        let chunks_cleared = prev_mining_by_chunk
            .iter()
            .filter(|(chunk, &count)| count > 0 && *curr_mining_by_chunk.get(*chunk).unwrap_or(&0) == 0)
            .count() as f32;
        let protectors_killed = (prev_protectors - curr_protectors).max(0.0);

        c.bonuses = chunks_cleared * self.config.mining_stopped_bonus
            + protectors_killed * self.config.protector_killed_bonus;
        total += c.bonuses;

        let threshold = self.config.no_impact_threshold;
        if mining_rate.abs() < threshold && protector_rate.abs() < threshold && energy_rate.abs() < threshold {
            c.no_impact_penalty = self.config.no_impact_penalty;
            total += c.no_impact_penalty;
        }

        if let Some(decision) = prev_decision {
            let skipped = was_skipped(decision, prev_was_executed);
            let workers_present = prev.workers_present.len();
            let has_mining = !prev.mining_workers.is_empty();
            let mineral_rate = rate(curr.player_minerals.start, curr.player_minerals.end);

            c.spawn_gating = if skipped {
                let mut penalty = 0.0;
                if workers_present > 0 {
                    penalty += self.config.workers_present_penalty;
                }
                if has_mining {
                    penalty += self.config.active_mining_penalty;
                }
                if energy_rate > 0.0 {
                    penalty += energy_rate * self.config.energy_rate_penalty_multiplier;
                }
                if mineral_rate > 0.0 {
                    penalty += mineral_rate * self.config.mineral_rate_penalty_multiplier;
                }
                if workers_present == 0 && !has_mining && energy_rate <= 0.0 && mineral_rate <= 0.0 {
                    0.0
                } else {
                    penalty
                }
            } else if workers_present == 0 && !has_mining {
                self.config.spawn_no_targets_penalty
            } else {
                0.0
            };
            total += c.spawn_gating;

            if !skipped {
                // Mode switch, hive chunk and worker chunks are all read off
                // the *current* observation, matching the source's
                // `_calculate_spawn_location_reward(curr_observation, ...)` —
                // the decision was made on `prev`, but the location shaping
                // judges it against what the territory looks like now.
                c.spawn_location = if curr.workers_present.is_empty() {
                    if curr.hive_chunk >= 0 {
                        let d = chunk_distance(decision.spawn_chunk, curr.hive_chunk);
                        normalize_distance(d) * self.config.hive_proximity_penalty_weight
                    } else {
                        0.0
                    }
                } else {
                    let min_dist = curr
                        .workers_present
                        .iter()
                        .map(|w| chunk_distance(decision.spawn_chunk, w.chunk_id))
                        .fold(f32::INFINITY, f32::min);
                    if min_dist.is_finite() {
                        normalize_distance(min_dist) * self.config.worker_proximity_penalty_weight
                    } else {
                        0.0
                    }
                };
                total += c.spawn_location;
            }
        }

        total = total.clamp(-1.0, 1.0);

        self.reward_history.push_back(total);
        if self.reward_history.len() > self.max_history {
            self.reward_history.pop_front();
        }

        RewardOutcome { reward: total, components: c }
    }

    pub fn average_reward(&self, window: usize) -> f32 {
        if self.reward_history.is_empty() {
            return 0.0;
        }
        let recent: Vec<f32> = self.reward_history.iter().rev().take(window).copied().collect();
        recent.iter().sum::<f32>() / recent.len() as f32
    }

    pub fn trend(&self) -> RewardTrend {
        if self.reward_history.len() < 3 {
            return RewardTrend::InsufficientData;
        }
        let all: Vec<f32> = self.reward_history.iter().copied().collect();
        let recent_start = all.len().saturating_sub(5);
        let recent = &all[recent_start..];
        let older_end = recent_start;
        let older_start = older_end.saturating_sub(5);
        let older = &all[older_start..older_end];
        if older.is_empty() {
            return RewardTrend::InsufficientData;
        }
        let recent_avg = recent.iter().sum::<f32>() / recent.len() as f32;
        let older_avg = older.iter().sum::<f32>() / older.len() as f32;
        let diff = recent_avg - older_avg;
        if diff > 0.1 {
            RewardTrend::Improving
        } else if diff < -0.1 {
            RewardTrend::Declining
        } else {
            RewardTrend::Stable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityRef, Window};

    fn obs(mining: Vec<i32>, protectors: Vec<i32>, energy: Window) -> Observation {
        Observation {
            territory_id: "t1".into(),
            timestamp: 0.0,
            workers_present: mining.iter().map(|&c| EntityRef { chunk_id: c }).collect(),
            mining_workers: mining.into_iter().map(|c| EntityRef { chunk_id: c }).collect(),
            protectors: protectors.into_iter().map(|c| EntityRef { chunk_id: c }).collect(),
            parasites_start: vec![],
            parasites_end: vec![],
            queen_energy_current: 50.0,
            player_energy: energy,
            player_minerals: Window::default(),
            hive_chunk: 0,
        }
    }

    #[test]
    fn more_mining_workers_yields_nonpositive_reward() {
        let mut calc = RewardCalculator::new(RewardConfig::default());
        let prev = obs(vec![1], vec![], Window::default());
        let curr = obs(vec![1, 2], vec![], Window::default());
        let out = calc.reward(&prev, &curr, None, false);
        assert!(out.reward <= 0.0);
    }

    #[test]
    fn reward_is_clamped() {
        let mut calc = RewardCalculator::new(RewardConfig::default());
        let prev = obs(vec![1, 2, 3, 4], vec![1, 2, 3], Window { start: 100.0, end: 0.0 });
        let curr = obs(vec![], vec![], Window { start: 100.0, end: 0.0 });
        let out = calc.reward(&prev, &curr, None, false);
        assert!(out.reward >= -1.0 && out.reward <= 1.0);
    }

    #[test]
    fn skipped_wait_with_workers_present_is_penalized() {
        let mut calc = RewardCalculator::new(RewardConfig::default());
        let prev = obs(vec![1], vec![], Window::default());
        let curr = obs(vec![1], vec![], Window::default());
        let decision = SpawnDecision {
            spawn_chunk: -1,
            spawn_type: None,
            quantity: 0,
            chunk_confidence: 0.0,
            type_confidence: 0.0,
            chunk_slot: 0,
            type_index: 0,
        };
        let out = calc.reward(&prev, &curr, Some(&decision), false);
        assert!(out.components.spawn_gating < 0.0);
    }

    #[test]
    fn trend_needs_history() {
        let calc = RewardCalculator::new(RewardConfig::default());
        assert_eq!(calc.trend(), RewardTrend::InsufficientData);
    }
}
