//! C6: the state machine that turns the NN's proposal plus C5's predicted
//! reward into the final SEND / WAIT decision, including the "NN said
//! nothing but the cost function disagrees" override path.

use crate::chunk_geometry::neighbors;
use crate::cost_function::{expected_reward, CostOutcome, WorldSummary};
use crate::exploration_tracker::ExplorationTracker;
use crate::gate_metrics::GateMetrics;
use crate::types::{GateDecision, GateOutcome, GateReason, ParasiteType};

/// Candidate-chunk scan is capped so a territory with a lot of worker
/// traffic doesn't turn one gate evaluation into hundreds of cost-function
/// calls.
const MAX_CANDIDATE_CHUNKS: usize = 20;

pub struct SimulationGate {
    threshold: f32,
    /// Thresholds at or below this are treated as "gate disabled" — every
    /// decision passes straight through as SEND. Used by offline
    /// simulation harnesses that want raw NN behavior.
    simulation_mode_threshold: f32,
}

impl SimulationGate {
    pub fn new(threshold: f32) -> Self {
        SimulationGate { threshold, simulation_mode_threshold: -1000.0 }
    }

    /// Chunks with worker presence plus their 8-neighbors, union'd with
    /// chunks that have mining workers (no neighbor expansion for those),
    /// deduplicated and capped. Matches `_get_candidate_chunks`: worker
    /// chunks expand to their neighborhood, mining chunks do not.
    fn candidate_chunks(world: &WorldSummary) -> Vec<i32> {
        let mut seen = std::collections::HashSet::new();
        let mut candidates = Vec::new();
        let mut push = |c: i32, candidates: &mut Vec<i32>| {
            if c >= 0 && seen.insert(c) {
                candidates.push(c);
            }
        };
        for &c in world.worker_chunks {
            push(c, &mut candidates);
            for n in neighbors(c) {
                push(n, &mut candidates);
            }
        }
        for &c in world.mining_chunks {
            push(c, &mut candidates);
        }
        candidates.truncate(MAX_CANDIDATE_CHUNKS);
        candidates
    }

    /// Scans every candidate chunk against both parasite types and keeps
    /// the single best (chunk, type) pair, matching `_find_best_spawn`'s
    /// nested `for chunk: for spawn_type in ['energy', 'combat']` search —
    /// the SHOULD_SPAWN override isn't limited to the type the NN picked.
    fn best_candidate(
        world: &WorldSummary,
        exploration: &ExplorationTracker,
        cost_config: &crate::config::CostConfig,
    ) -> Option<CostOutcome> {
        Self::candidate_chunks(world)
            .into_iter()
            .flat_map(|chunk| {
                [ParasiteType::Energy, ParasiteType::Combat]
                    .into_iter()
                    .map(move |spawn_type| expected_reward(world, chunk, spawn_type, cost_config, exploration))
            })
            .filter(|out| out.capacity_valid)
            .fold(None, |best: Option<CostOutcome>, out| match best {
                Some(b) if b.expected_reward >= out.expected_reward => Some(b),
                _ => Some(out),
            })
    }

    pub fn evaluate(
        &self,
        world: &WorldSummary,
        spawn_chunk: i32,
        spawn_type: ParasiteType,
        nn_confidence: f32,
        cost_config: &crate::config::CostConfig,
        exploration: &ExplorationTracker,
        metrics: &GateMetrics,
    ) -> GateDecision {
        if self.threshold <= self.simulation_mode_threshold {
            let outcome = expected_reward(world, spawn_chunk, spawn_type, cost_config, exploration);
            let decision = GateDecision {
                outcome: GateOutcome::Send,
                reason: GateReason::SimulationMode,
                expected_reward: outcome.expected_reward,
                nn_confidence,
                components: outcome.components,
            };
            metrics.record_evaluation(decision.outcome, decision.expected_reward, decision.components);
            return decision;
        }

        let decision = if spawn_chunk < 0 {
            match Self::best_candidate(world, exploration, cost_config) {
                Some(best) if best.expected_reward > self.threshold => GateDecision {
                    outcome: GateOutcome::ShouldSpawn,
                    reason: GateReason::MissedOpportunity,
                    expected_reward: best.expected_reward,
                    nn_confidence,
                    components: best.components,
                },
                Some(best) => GateDecision {
                    outcome: GateOutcome::CorrectWait,
                    reason: GateReason::NoViableTargets,
                    expected_reward: best.expected_reward,
                    nn_confidence,
                    components: best.components,
                },
                None => GateDecision {
                    outcome: GateOutcome::CorrectWait,
                    reason: GateReason::NoViableTargets,
                    expected_reward: 0.0,
                    nn_confidence,
                    components: crate::types::CostComponents::default(),
                },
            }
        } else {
            let outcome = expected_reward(world, spawn_chunk, spawn_type, cost_config, exploration);
            if !outcome.capacity_valid {
                GateDecision {
                    outcome: GateOutcome::Wait,
                    reason: GateReason::InsufficientEnergy,
                    expected_reward: outcome.expected_reward,
                    nn_confidence,
                    components: outcome.components,
                }
            } else if outcome.expected_reward > self.threshold {
                exploration.record_spawn(spawn_chunk);
                GateDecision {
                    outcome: GateOutcome::Send,
                    reason: GateReason::PositiveReward,
                    expected_reward: outcome.expected_reward,
                    nn_confidence,
                    components: outcome.components,
                }
            } else {
                GateDecision {
                    outcome: GateOutcome::Wait,
                    reason: GateReason::NegativeReward,
                    expected_reward: outcome.expected_reward,
                    nn_confidence,
                    components: outcome.components,
                }
            }
        };

        metrics.record_evaluation(decision.outcome, decision.expected_reward, decision.components);
        decision
    }

    /// `expected_reward - threshold`, the signal fed to the trainer
    /// regardless of whether the gate actually let the spawn through.
    pub fn gate_signal(&self, expected_reward: f32) -> f32 {
        if expected_reward.is_finite() {
            expected_reward - self.threshold
        } else {
            -1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CostConfig;

    fn gate() -> SimulationGate {
        SimulationGate::new(0.35)
    }

    #[test]
    fn insufficient_energy_waits() {
        let world = WorldSummary { protector_chunks: &[], worker_chunks: &[], mining_chunks: &[], hive_chunk: 0, queen_energy: 1.0 };
        let exploration = ExplorationTracker::new(CostConfig::default());
        let metrics = GateMetrics::new(10);
        let decision = gate().evaluate(
            &world,
            10,
            ParasiteType::Combat,
            0.9,
            &CostConfig::default(),
            &exploration,
            &metrics,
        );
        assert_eq!(decision.outcome, GateOutcome::Wait);
        assert_eq!(decision.reason, GateReason::InsufficientEnergy);
    }

    #[test]
    fn good_target_sends() {
        let world =
            WorldSummary { protector_chunks: &[], worker_chunks: &[50, 50], mining_chunks: &[], hive_chunk: 0, queen_energy: 60.0 };
        let exploration = ExplorationTracker::new(CostConfig::default());
        let metrics = GateMetrics::new(10);
        let decision = gate().evaluate(
            &world,
            50,
            ParasiteType::Energy,
            0.9,
            &CostConfig::default(),
            &exploration,
            &metrics,
        );
        assert_eq!(decision.outcome, GateOutcome::Send);
    }

    #[test]
    fn no_spawn_with_good_candidate_is_overridden() {
        let world =
            WorldSummary { protector_chunks: &[], worker_chunks: &[50, 50], mining_chunks: &[], hive_chunk: 0, queen_energy: 60.0 };
        let exploration = ExplorationTracker::new(CostConfig::default());
        let metrics = GateMetrics::new(10);
        let decision = gate().evaluate(
            &world,
            -1,
            ParasiteType::Energy,
            0.1,
            &CostConfig::default(),
            &exploration,
            &metrics,
        );
        assert_eq!(decision.outcome, GateOutcome::ShouldSpawn);
    }

    #[test]
    fn no_spawn_with_no_targets_is_correct() {
        let world = WorldSummary { protector_chunks: &[], worker_chunks: &[], mining_chunks: &[], hive_chunk: 0, queen_energy: 60.0 };
        let exploration = ExplorationTracker::new(CostConfig::default());
        let metrics = GateMetrics::new(10);
        let decision = gate().evaluate(
            &world,
            -1,
            ParasiteType::Energy,
            0.1,
            &CostConfig::default(),
            &exploration,
            &metrics,
        );
        assert_eq!(decision.outcome, GateOutcome::CorrectWait);
        assert_eq!(decision.reason, GateReason::NoViableTargets);
    }

    #[test]
    fn gate_signal_is_reward_minus_threshold() {
        let g = gate();
        assert!((g.gate_signal(0.5) - 0.15).abs() < 1e-6);
        assert_eq!(g.gate_signal(f32::NEG_INFINITY), -1.0);
    }

    #[test]
    fn simulation_mode_always_sends() {
        let mut g = gate();
        g.simulation_mode_threshold = 10.0;
        let world = WorldSummary { protector_chunks: &[1], worker_chunks: &[], mining_chunks: &[], hive_chunk: 0, queen_energy: 60.0 };
        let exploration = ExplorationTracker::new(CostConfig::default());
        let metrics = GateMetrics::new(10);
        let decision = g.evaluate(
            &world,
            0,
            ParasiteType::Combat,
            0.1,
            &CostConfig::default(),
            &exploration,
            &metrics,
        );
        assert_eq!(decision.outcome, GateOutcome::Send);
        assert_eq!(decision.reason, GateReason::SimulationMode);
    }
}
