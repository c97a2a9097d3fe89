//! End-to-end exercise of the public API: an embedding process's view of
//! the core. Drives several observation ticks through the orchestrator,
//! runs the background trainer against whatever the gate produced, and
//! checks the pieces hand off to each other the way spec.md §8's
//! concrete scenarios describe.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use queen_core::config::{CoreConfig, TrainingConfig};
use queen_core::experience_buffer::ExperienceBuffer;
use queen_core::exploration_tracker::ExplorationTracker;
use queen_core::gate_metrics::GateMetrics;
use queen_core::policy_network::PolicyNetwork;
use queen_core::types::{EntityRef, Window};
use queen_core::{Observation, Orchestrator, SpawnResponse, Trainer, TrainerPaths};

use burn::backend::{Autodiff, NdArray};

type TestBackend = Autodiff<NdArray<f32>>;

fn observation(territory: &str) -> Observation {
    Observation {
        territory_id: territory.to_string(),
        timestamp: 0.0,
        workers_present: vec![],
        mining_workers: vec![],
        protectors: vec![],
        parasites_start: vec![],
        parasites_end: vec![],
        queen_energy_current: 80.0,
        player_energy: Window::default(),
        player_minerals: Window::default(),
        hive_chunk: 136,
    }
}

fn build() -> (Orchestrator<TestBackend>, Arc<Mutex<PolicyNetwork<TestBackend>>>, Arc<ExperienceBuffer>) {
    let config = CoreConfig::default();
    let device = Default::default();
    let policy = Arc::new(Mutex::new(PolicyNetwork::<TestBackend>::fresh(device, &config.training)));
    let buffer = Arc::new(ExperienceBuffer::new(config.training.buffer_capacity));
    let exploration = Arc::new(ExplorationTracker::new(config.cost.clone()));
    let gate_metrics = Arc::new(GateMetrics::new(100));

    let orchestrator = Orchestrator::new(
        policy.clone(),
        buffer.clone(),
        exploration,
        gate_metrics,
        config.cost,
        config.reward,
        true,
    );
    (orchestrator, policy, buffer)
}

/// Scenario 1: an observation with no workers, no mining, no protectors is
/// short-circuited by the preprocess gate before any inference happens, and
/// the buffer is left untouched.
#[tokio::test]
async fn empty_world_skips_before_touching_the_buffer() {
    let (orchestrator, _policy, buffer) = build();
    let response = orchestrator.process_observation(observation("territory-a")).await;
    assert_eq!(response, SpawnResponse::Skipped { reason: "no_activity" });
    assert_eq!(buffer.len(), 0);
}

/// A territory with activity but insufficient queen energy always WAITs
/// with `insufficient_energy`, and still produces training signal (the
/// WAIT experience), matching scenario 2.
#[tokio::test]
async fn starved_queen_never_sends() {
    let (orchestrator, _policy, buffer) = build();
    let mut obs = observation("territory-b");
    obs.queen_energy_current = 1.0;
    obs.workers_present = vec![EntityRef { chunk_id: 20 }, EntityRef { chunk_id: 21 }];

    let response = orchestrator.process_observation(obs).await;
    assert_eq!(response, SpawnResponse::Processed);
    assert_eq!(buffer.len(), 1);
    assert_eq!(buffer.stats().pending_len, 0);
}

/// Driving several ticks across two territories independently exercises
/// the prev-observation bookkeeping (per-territory, never cross-wired) and
/// feeds the buffer enough experiences for the background trainer to take
/// a real step.
#[tokio::test]
async fn multi_tick_multi_territory_feeds_the_trainer() {
    let (orchestrator, policy, buffer) = build();

    for tick in 0..6 {
        let mut obs_a = observation("territory-a");
        obs_a.workers_present = vec![EntityRef { chunk_id: 40 + tick }];
        obs_a.mining_workers = obs_a.workers_present.clone();
        let _ = orchestrator.process_observation(obs_a).await;

        let mut obs_b = observation("territory-b");
        obs_b.protectors = vec![EntityRef { chunk_id: 100 }];
        let _ = orchestrator.process_observation(obs_b).await;
    }

    assert!(buffer.len() >= 2, "several ticks across two territories must leave experiences behind");

    let dir = std::env::temp_dir().join("queen-core-integration-test");
    let _ = std::fs::create_dir_all(&dir);
    let paths = TrainerPaths { weights_path: dir.join("weights.bin"), metadata_path: dir.join("metadata.json") };

    let mut training_config = TrainingConfig::default();
    training_config.training_interval_secs = 0.05;
    training_config.min_batch_size_live = 1;
    training_config.batch_size = 4;

    let trainer = Trainer::spawn(policy.clone(), buffer.clone(), training_config, paths, false);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let stats = trainer.stats();
    assert!(stats.total_steps >= 1, "trainer should have taken at least one step by now");

    trainer.stop();
    let _ = std::fs::remove_dir_all(&dir);
}
