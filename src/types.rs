//! Wire and persisted data shapes shared across the core. Every type an
//! embedding process needs to (de)serialize at its own transport boundary
//! lives here; the core never depends on a transport crate itself.

use serde::{Deserialize, Serialize};

pub const TOTAL_CHUNKS: usize = 256;
pub const GRID_SIDE: i32 = 16;
pub const TOP_CHUNKS: usize = 5;
pub const FEATURE_COUNT: usize = 29;

pub const ENERGY_PARASITE_COST: f32 = 15.0;
pub const COMBAT_PARASITE_COST: f32 = 25.0;
pub const QUEEN_MAX_ENERGY: f32 = 100.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParasiteType {
    Energy,
    Combat,
}

impl ParasiteType {
    pub fn cost(self) -> f32 {
        match self {
            ParasiteType::Energy => ENERGY_PARASITE_COST,
            ParasiteType::Combat => COMBAT_PARASITE_COST,
        }
    }

    pub fn from_index(idx: usize) -> Self {
        if idx == 1 { ParasiteType::Combat } else { ParasiteType::Energy }
    }

    pub fn as_index(self) -> usize {
        match self {
            ParasiteType::Energy => 0,
            ParasiteType::Combat => 1,
        }
    }
}

/// `{start, end}` counters over an observation window.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Window {
    pub start: f32,
    pub end: f32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EntityRef {
    pub chunk_id: i32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Parasite {
    pub chunk_id: i32,
    pub kind: ParasiteType,
}

/// A snapshot of one territory-tick, per spec §3.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Observation {
    pub territory_id: String,
    pub timestamp: f64,
    pub workers_present: Vec<EntityRef>,
    pub mining_workers: Vec<EntityRef>,
    pub protectors: Vec<EntityRef>,
    pub parasites_start: Vec<Parasite>,
    pub parasites_end: Vec<Parasite>,
    pub queen_energy_current: f32,
    pub player_energy: Window,
    pub player_minerals: Window,
    pub hive_chunk: i32,
}

/// 29-float normalized feature vector plus the chunk ids the top-5 slots
/// decode to (-1 marks an empty slot).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Features {
    pub values: [f32; FEATURE_COUNT],
    pub top_chunk_ids: [i32; TOP_CHUNKS],
}

impl Features {
    pub fn zero() -> Self {
        Features { values: [0.0; FEATURE_COUNT], top_chunk_ids: [-1; TOP_CHUNKS] }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SpawnDecision {
    /// -1 means the NN emitted no-spawn (an empty top-5, never resolved to
    /// a real chunk); any other value is a real chunk the NN would send to,
    /// before the gate has had a say.
    pub spawn_chunk: i32,
    pub spawn_type: Option<ParasiteType>,
    pub quantity: u8,
    pub chunk_confidence: f32,
    pub type_confidence: f32,
    /// Relative top-5 slot index (0-4) the chunk decision came from, kept
    /// around so the trainer can reconstruct `chunk_target` without
    /// re-deriving it from `top_chunk_ids`.
    pub chunk_slot: usize,
    pub type_index: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateOutcome {
    Send,
    Wait,
    CorrectWait,
    ShouldSpawn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateReason {
    PositiveReward,
    NegativeReward,
    InsufficientEnergy,
    NoViableTargets,
    MissedOpportunity,
    SimulationMode,
    GateDisabled,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct CostComponents {
    pub survival: f32,
    pub disruption: f32,
    pub location: f32,
    pub exploration: f32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GateDecision {
    pub outcome: GateOutcome,
    pub reason: GateReason,
    pub expected_reward: f32,
    pub nn_confidence: f32,
    pub components: CostComponents,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Experience {
    pub observation: [f32; FEATURE_COUNT],
    pub top_chunk_ids: [i32; TOP_CHUNKS],
    pub spawn_chunk: i32,
    pub spawn_type: ParasiteType,
    pub quantity: u8,
    pub nn_confidence: f32,
    /// `expected_reward - reward_threshold`.
    pub gate_signal: f32,
    pub expected_reward: f32,
    pub was_executed: bool,
    pub actual_reward: Option<f32>,
    pub territory_id: String,
    pub model_version: u64,
    pub timestamp: f64,
}

impl Experience {
    pub fn is_send(&self) -> bool {
        self.was_executed
    }

    pub fn has_actual_reward(&self) -> bool {
        self.actual_reward.is_some()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub version: u64,
    pub architecture_version: u32,
    pub created_at: f64,
    pub last_saved_at: f64,
    pub total_training_iterations: u64,
    pub total_samples_ever_processed: u64,
    pub best_loss: f32,
    pub framework: String,
}

pub const ARCHITECTURE_VERSION: u32 = 3;
pub const FRAMEWORK_TAG: &str = "burn";

impl ModelMetadata {
    pub fn fresh(now: f64) -> Self {
        ModelMetadata {
            version: 0,
            architecture_version: ARCHITECTURE_VERSION,
            created_at: now,
            last_saved_at: now,
            total_training_iterations: 0,
            total_samples_ever_processed: 0,
            best_loss: f32::INFINITY,
            framework: FRAMEWORK_TAG.to_string(),
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.architecture_version == ARCHITECTURE_VERSION && self.framework == FRAMEWORK_TAG
    }
}
