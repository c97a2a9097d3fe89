//! C9: per-observation glue. Composes C1 (features) -> C4 (preprocess) ->
//! C3 (policy) -> C6 (gate), owns the previous-observation/-decision
//! bookkeeping C2's reward computation needs, and always inserts an
//! experience into C7 — a WAIT is training signal too.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::config::{CostConfig, RewardConfig, TrainingConfig};
use crate::cost_function::WorldSummary;
use crate::experience_buffer::ExperienceBuffer;
use crate::exploration_tracker::ExplorationTracker;
use crate::feature_extractor;
use crate::gate_metrics::{GateMetrics, GateStatistics};
use crate::policy_network::PolicyNetwork;
use crate::preprocess_gate;
use crate::reward_calculator::RewardCalculator;
use crate::simulation_gate::SimulationGate;
use crate::types::{Experience, GateOutcome, Observation, ParasiteType, SpawnDecision};
use burn::tensor::backend::AutodiffBackend;

const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(2);

/// Penalty applied to a pending SEND when the game reports the spawn
/// execution itself failed (inbound `spawn_result { success: false }`).
const FAILED_SPAWN_PENALTY: f32 = -0.5;

#[derive(Clone, Debug, PartialEq)]
pub enum SpawnResponse {
    /// `spawn_decision` outbound message, gate said SEND.
    Send { spawn_chunk: i32, spawn_type: ParasiteType, confidence: f32, type_confidence: f32 },
    /// `spawn_decision` with `skipped: true` — C4 short-circuited before
    /// any inference happened.
    Skipped { reason: &'static str },
    /// `observation_ack` — inference ran and the gate declined to spawn
    /// (WAIT / CORRECT_WAIT / SHOULD_SPAWN). The game must not be left
    /// waiting for a response that will never come.
    Processed,
    /// C3's forward pass exceeded the bounded timeout. No experience was
    /// inserted and `prev_observation` was not advanced, per §7.
    InferenceTimeout,
}

struct TerritoryState {
    observation: Observation,
    decision: SpawnDecision,
    was_executed: bool,
}

pub struct Orchestrator<B: AutodiffBackend> {
    policy: Arc<Mutex<PolicyNetwork<B>>>,
    buffer: Arc<ExperienceBuffer>,
    exploration: Arc<ExplorationTracker>,
    gate_metrics: Arc<GateMetrics>,
    gate: SimulationGate,
    reward_calculator: Mutex<RewardCalculator>,
    cost_config: CostConfig,
    territory_state: Mutex<HashMap<String, TerritoryState>>,
    explore: bool,
    inference_timeout: Duration,
}

impl<B: AutodiffBackend + 'static> Orchestrator<B> {
    pub fn new(
        policy: Arc<Mutex<PolicyNetwork<B>>>,
        buffer: Arc<ExperienceBuffer>,
        exploration: Arc<ExplorationTracker>,
        gate_metrics: Arc<GateMetrics>,
        cost_config: CostConfig,
        reward_config: RewardConfig,
        explore: bool,
    ) -> Self {
        Orchestrator {
            policy,
            buffer,
            exploration,
            gate_metrics,
            gate: SimulationGate::new(cost_config.reward_threshold),
            reward_calculator: Mutex::new(RewardCalculator::new(reward_config)),
            cost_config,
            territory_state: Mutex::new(HashMap::new()),
            explore,
            inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
        }
    }

    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout = timeout;
        self
    }

    fn take_previous(&self, territory_id: &str) -> Option<TerritoryState> {
        self.territory_state.lock().remove(territory_id)
    }

    fn put_previous(&self, territory_id: String, state: TerritoryState) {
        self.territory_state.lock().insert(territory_id, state);
    }

    /// The full per-observation pipeline. Call this once per inbound
    /// `observation_data` message; the transport is expected to serialize
    /// calls for a given territory (see §5's ordering guarantee).
    pub async fn process_observation(&self, observation: Observation) -> SpawnResponse {
        let territory_id = observation.territory_id.clone();

        let preprocess = preprocess_gate::evaluate(&observation);
        if preprocess.should_skip {
            return SpawnResponse::Skipped { reason: preprocess.reason.unwrap_or("no_activity") };
        }

        // Previous tick's SEND/WAIT only now learns its actual reward,
        // since reward needs this tick's observation too.
        if let Some(prev) = self.take_previous(&territory_id) {
            let reward_outcome = {
                let mut calc = self.reward_calculator.lock();
                calc.reward(&prev.observation, &observation, Some(&prev.decision), prev.was_executed)
            };
            self.gate_metrics.record_actual_reward(reward_outcome.reward);
            if prev.was_executed {
                self.buffer.update_pending_reward(&territory_id, reward_outcome.reward);
            }
        }

        let mut extract_rng = rand::rng();
        let features = feature_extractor::extract(&observation, &mut extract_rng);

        let policy = self.policy.clone();
        let explore = self.explore;
        let features_for_nn = features.clone();
        let inference = tokio::task::spawn_blocking(move || {
            let mut rng = rand::rng();
            let guard = policy.lock();
            guard.get_spawn_decision(&features_for_nn, explore, &mut rng)
        });

        let decision = match tokio::time::timeout(self.inference_timeout, inference).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(join_error)) => {
                log::error!("[Orchestrator] inference task for territory {territory_id} panicked: {join_error}");
                return SpawnResponse::InferenceTimeout;
            }
            Err(_) => {
                log::warn!(
                    "[Orchestrator] inference timed out after {:?} for territory {territory_id}",
                    self.inference_timeout
                );
                return SpawnResponse::InferenceTimeout;
            }
        };

        let worker_chunks: Vec<i32> = observation.workers_present.iter().map(|w| w.chunk_id).collect();
        let protector_chunks: Vec<i32> = observation.protectors.iter().map(|p| p.chunk_id).collect();
        let mining_chunks: Vec<i32> = observation.mining_workers.iter().map(|w| w.chunk_id).collect();
        let world = WorldSummary {
            protector_chunks: &protector_chunks,
            worker_chunks: &worker_chunks,
            mining_chunks: &mining_chunks,
            hive_chunk: observation.hive_chunk,
            queen_energy: observation.queen_energy_current,
        };
        let spawn_type = decision.spawn_type.unwrap_or(ParasiteType::Energy);
        // Joint confidence: chunk choice is the decision that actually
        // matters to the gate, so it leads; type confidence is a secondary
        // signal carried alongside for diagnostics.
        let nn_confidence = decision.chunk_confidence;

        let gate_decision = self.gate.evaluate(
            &world,
            decision.spawn_chunk,
            spawn_type,
            nn_confidence,
            &self.cost_config,
            &self.exploration,
            &self.gate_metrics,
        );

        let was_executed = gate_decision.outcome == GateOutcome::Send;
        let gate_signal = self.gate.gate_signal(gate_decision.expected_reward);

        let experience = Experience {
            observation: features.values,
            top_chunk_ids: features.top_chunk_ids,
            spawn_chunk: decision.spawn_chunk,
            spawn_type,
            quantity: decision.quantity,
            nn_confidence: gate_decision.nn_confidence,
            gate_signal,
            expected_reward: gate_decision.expected_reward,
            was_executed,
            actual_reward: None,
            territory_id: territory_id.clone(),
            model_version: self.policy.lock().version(),
            timestamp: observation.timestamp,
        };
        self.buffer.add(experience);

        self.put_previous(territory_id, TerritoryState { observation, decision, was_executed });

        if was_executed {
            SpawnResponse::Send {
                spawn_chunk: decision.spawn_chunk,
                spawn_type,
                confidence: decision.chunk_confidence,
                type_confidence: decision.type_confidence,
            }
        } else {
            SpawnResponse::Processed
        }
    }

    pub fn gate_metrics(&self) -> &GateMetrics {
        &self.gate_metrics
    }

    pub fn buffer(&self) -> &ExperienceBuffer {
        &self.buffer
    }

    /// Inbound `spawn_result { success: false }`: the game attempted the
    /// spawn the gate approved but execution failed on its side. Applied as
    /// a penalty to whatever is still pending for this territory; a no-op
    /// if nothing is pending (e.g. a stale or duplicate report). No
    /// response is produced, per §6.
    pub fn handle_spawn_result(&self, territory_id: &str, success: bool) {
        if !success {
            self.buffer.update_pending_reward(territory_id, FAILED_SPAWN_PENALTY);
        }
    }

    /// Inbound `reset_nn { confirm: true }`: delete the weight and metadata
    /// files and reinitialize C3 with fresh weights, serialized under the
    /// same model lock inference and training use. Returns `(previous,
    /// new)` version for the response message.
    pub fn reset_nn(
        &self,
        weights_path: &Path,
        metadata_path: &Path,
        device: B::Device,
        training_config: &TrainingConfig,
    ) -> (u64, u64) {
        let mut guard = self.policy.lock();
        let previous_version = guard.version();

        for path in [weights_path, metadata_path] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    log::warn!("[Orchestrator] failed to remove {} during reset_nn: {e}", path.display());
                }
            }
        }

        *guard = PolicyNetwork::fresh(device, training_config);
        let new_version = guard.version();
        log::info!("[Orchestrator] reset_nn: version {previous_version} -> {new_version}");
        (previous_version, new_version)
    }

    /// Inbound `gate_stats_request`: a read-only snapshot from C11, no side
    /// effects.
    pub fn gate_stats(&self) -> GateStatistics {
        self.gate_metrics.statistics()
    }
}
