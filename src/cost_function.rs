//! C5: predicts expected reward of a (observation, spawn_chunk, spawn_type)
//! triple from closed-form game dynamics, without running the game.

use crate::chunk_geometry::{chunk_distance, normalize_distance};
use crate::config::CostConfig;
use crate::exploration_tracker::ExplorationTracker;
use crate::types::{CostComponents, ParasiteType};

#[derive(Clone, Copy, Debug)]
pub struct CostOutcome {
    pub expected_reward: f32,
    pub components: CostComponents,
    pub capacity_valid: bool,
}

/// Summary of the slice of the observation the cost function actually
/// needs, independent of C9's richer `Observation` shape. `mining_chunks`
/// plays no part in the reward math here — it only feeds the simulation
/// gate's candidate-chunk scan (§4.6) — but lives alongside the other
/// chunk lists since both come from the same `Observation`.
pub struct WorldSummary<'a> {
    pub protector_chunks: &'a [i32],
    pub worker_chunks: &'a [i32],
    pub mining_chunks: &'a [i32],
    pub hive_chunk: i32,
    pub queen_energy: f32,
}

fn survival_probability(spawn_chunk: i32, protector_chunks: &[i32], config: &CostConfig) -> f32 {
    if protector_chunks.is_empty() {
        return 1.0;
    }
    protector_chunks
        .iter()
        .map(|&p| {
            let d = chunk_distance(spawn_chunk, p);
            if d < config.kill_range {
                0.0
            } else if d >= config.safe_range {
                1.0
            } else {
                (-config.threat_decay * (d - config.kill_range)).exp()
            }
        })
        .product()
}

fn worker_disruption(
    spawn_chunk: i32,
    worker_chunks: &[i32],
    survival: f32,
    config: &CostConfig,
) -> f32 {
    if worker_chunks.is_empty() || spawn_chunk < 0 {
        return 0.0;
    }
    let total: f32 = worker_chunks
        .iter()
        .map(|&w| {
            let d = chunk_distance(spawn_chunk, w);
            if d < config.flee_range {
                1.0
            } else if d < config.ignore_range {
                (-config.disruption_decay * (d - config.flee_range)).exp()
            } else {
                0.0
            }
        })
        .sum();
    (total * survival) / worker_chunks.len() as f32
}

fn location_penalty(spawn_chunk: i32, hive_chunk: i32, worker_chunks: &[i32], config: &CostConfig) -> f32 {
    if spawn_chunk < 0 || hive_chunk < 0 {
        return -1.0;
    }
    if worker_chunks.is_empty() {
        let d = normalize_distance(chunk_distance(spawn_chunk, hive_chunk));
        -config.hive_proximity_weight * d
    } else {
        let min_d = worker_chunks
            .iter()
            .map(|&w| chunk_distance(spawn_chunk, w))
            .fold(f32::INFINITY, f32::min);
        -config.worker_proximity_weight * normalize_distance(min_d)
    }
}

fn capacity_valid(spawn_type: ParasiteType, queen_energy: f32) -> bool {
    queen_energy >= spawn_type.cost()
}

pub fn expected_reward(
    world: &WorldSummary,
    spawn_chunk: i32,
    spawn_type: ParasiteType,
    config: &CostConfig,
    exploration: &ExplorationTracker,
) -> CostOutcome {
    let survival = survival_probability(spawn_chunk, world.protector_chunks, config);
    let disruption = worker_disruption(spawn_chunk, world.worker_chunks, survival, config);
    let location = location_penalty(spawn_chunk, world.hive_chunk, world.worker_chunks, config);
    let exploration_bonus = exploration.bonus(spawn_chunk);
    let valid = capacity_valid(spawn_type, world.queen_energy);

    let components = CostComponents { survival, disruption, location, exploration: exploration_bonus };

    let expected_reward = if valid {
        config.survival_weight * survival + config.disruption_weight * disruption
            + config.location_weight * location
            + exploration_bonus
    } else {
        f32::NEG_INFINITY
    };

    CostOutcome { expected_reward, components, capacity_valid: valid }
}
