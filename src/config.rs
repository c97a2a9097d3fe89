//! Core tunables, loadable from YAML. This mirrors
//! `SimulationGateConfig`/`ContinuousTrainingConfig`'s `from_yaml`/defaults
//! pattern: a missing or malformed file falls back to defaults rather than
//! failing the embedding process.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub kill_range: f32,
    pub safe_range: f32,
    pub threat_decay: f32,
    pub flee_range: f32,
    pub ignore_range: f32,
    pub disruption_decay: f32,
    pub hive_proximity_weight: f32,
    pub worker_proximity_weight: f32,
    pub survival_weight: f32,
    pub disruption_weight: f32,
    pub location_weight: f32,
    pub reward_threshold: f32,
    pub exploration_coefficient: f32,
    pub exploration_max_time: f32,
    pub gate_enabled: bool,
}

impl Default for CostConfig {
    fn default() -> Self {
        CostConfig {
            kill_range: 2.0,
            safe_range: 8.0,
            threat_decay: 0.5,
            flee_range: 3.0,
            ignore_range: 10.0,
            disruption_decay: 0.3,
            hive_proximity_weight: 0.3,
            worker_proximity_weight: 0.4,
            survival_weight: 0.3,
            disruption_weight: 0.5,
            location_weight: 0.2,
            reward_threshold: 0.35,
            exploration_coefficient: 0.35,
            exploration_max_time: 300.0,
            gate_enabled: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub mining_disruption_weight: f32,
    pub protector_reduction_weight: f32,
    pub player_energy_weight: f32,
    pub mining_stopped_bonus: f32,
    pub protector_killed_bonus: f32,
    pub no_impact_penalty: f32,
    pub workers_present_penalty: f32,
    pub active_mining_penalty: f32,
    pub energy_rate_penalty_multiplier: f32,
    pub mineral_rate_penalty_multiplier: f32,
    pub hive_proximity_penalty_weight: f32,
    pub worker_proximity_penalty_weight: f32,
    pub spawn_no_targets_penalty: f32,
    pub no_impact_threshold: f32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        RewardConfig {
            mining_disruption_weight: 0.4,
            protector_reduction_weight: 0.3,
            player_energy_weight: 0.3,
            mining_stopped_bonus: 0.2,
            protector_killed_bonus: 0.15,
            no_impact_penalty: -0.1,
            workers_present_penalty: -0.1,
            active_mining_penalty: -0.6,
            energy_rate_penalty_multiplier: -0.5,
            mineral_rate_penalty_multiplier: -0.5,
            hive_proximity_penalty_weight: -0.3,
            worker_proximity_penalty_weight: -0.4,
            spawn_no_targets_penalty: -0.5,
            no_impact_threshold: 0.05,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub training_interval_secs: f32,
    pub min_batch_size_live: usize,
    pub min_batch_size_simulation: usize,
    pub batch_size: usize,
    pub buffer_capacity: usize,
    pub lock_timeout_secs: f32,
    pub gate_weight: f32,
    pub actual_weight: f32,
    pub learning_rate: f64,
    pub save_interval_versions: u64,
    pub entropy_coefficient: f32,
    pub label_smoothing: f32,
    pub gradient_clip_norm: f32,
    pub enabled: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            training_interval_secs: 1.0,
            min_batch_size_live: 4,
            min_batch_size_simulation: 32,
            batch_size: 32,
            buffer_capacity: 10_000,
            lock_timeout_secs: 5.0,
            gate_weight: 0.3,
            actual_weight: 0.7,
            learning_rate: 0.001,
            save_interval_versions: 50,
            entropy_coefficient: 0.5,
            label_smoothing: 0.2,
            gradient_clip_norm: 1.0,
            enabled: true,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    pub cost: CostConfig,
    pub reward: RewardConfig,
    pub training: TrainingConfig,
}

impl CoreConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(cfg) => cfg,
                Err(e) => {
                    log::warn!("[Config] Failed to parse {}: {e}, using defaults", path.display());
                    CoreConfig::default()
                }
            },
            Err(_) => {
                log::warn!("[Config] Config file not found: {}, using defaults", path.display());
                CoreConfig::default()
            }
        }
    }

    pub fn to_yaml_string(&self) -> crate::error::CoreResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
