//! C8: the dedicated background worker that continuously improves the
//! policy from experiences the gate has already scored. Runs on its own
//! OS thread, independent of the inference executor, per §5's "two
//! independent schedulers" requirement.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::TrainingConfig;
use crate::experience_buffer::ExperienceBuffer;
use crate::policy_network::{relative_slot_for_chunk, PolicyNetwork, TrainTargets};
use crate::types::Experience;
use burn::tensor::backend::AutodiffBackend;

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Default)]
pub struct TrainerStats {
    pub total_steps: u64,
    pub last_batch_size: usize,
    pub last_loss: f32,
    pub average_gate_signal: f32,
    pub last_step_duration_secs: f32,
    pub enabled: bool,
}

struct SharedStats {
    inner: Mutex<TrainerStats>,
}

impl SharedStats {
    fn new(enabled: bool) -> Self {
        SharedStats { inner: Mutex::new(TrainerStats { enabled, ..Default::default() }) }
    }
}

/// `gate_weight * gate_signal + actual_weight * actual_reward` when the
/// actual reward has landed; otherwise the gate signal alone. WAITs always
/// use the gate signal (which is always non-positive for a WAIT by
/// construction in `SimulationGate`).
fn training_reward(experience: &Experience, config: &TrainingConfig) -> f32 {
    if experience.is_send() {
        match experience.actual_reward {
            Some(actual) => config.gate_weight * experience.gate_signal + config.actual_weight * actual,
            None => experience.gate_signal,
        }
    } else {
        experience.gate_signal
    }
}

fn targets_for(experience: &Experience, rng: &mut impl rand::Rng) -> TrainTargets {
    let chunk_target = relative_slot_for_chunk(&experience.top_chunk_ids, experience.spawn_chunk, rng);
    TrainTargets {
        type_target: experience.spawn_type.as_index(),
        chunk_target,
        quantity_target: experience.quantity.min(4) as usize,
    }
}

pub struct Trainer {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<SharedStats>,
}

pub struct TrainerPaths {
    pub weights_path: PathBuf,
    pub metadata_path: PathBuf,
}

impl Trainer {
    /// Launches the trainer thread if `config.enabled`; otherwise returns a
    /// handle whose `stop()` is a no-op, so the embedder can unconditionally
    /// hold onto a `Trainer` regardless of config.
    pub fn spawn<B: AutodiffBackend + 'static>(
        policy: Arc<Mutex<PolicyNetwork<B>>>,
        buffer: Arc<ExperienceBuffer>,
        config: TrainingConfig,
        paths: TrainerPaths,
        simulation_mode: bool,
    ) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(SharedStats::new(config.enabled));

        if !config.enabled {
            log::info!("[Trainer] disabled by config, not starting background thread");
            return Trainer { stop_flag, handle: None, stats };
        }

        let thread_stop = stop_flag.clone();
        let thread_stats = stats.clone();
        let interval = Duration::from_secs_f32(config.training_interval_secs.max(0.01));
        let min_batch = if simulation_mode { config.min_batch_size_simulation } else { config.min_batch_size_live };

        let handle = thread::Builder::new()
            .name("queen-core-trainer".into())
            .spawn(move || {
                let mut rng = rand::rng();
                let mut tick: u64 = 0;
                loop {
                    if thread_stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let step_start = Instant::now();
                    run_one_step(&policy, &buffer, &config, min_batch, &thread_stats, &mut rng);
                    let elapsed = step_start.elapsed();
                    thread_stats.inner.lock().last_step_duration_secs = elapsed.as_secs_f32();
                    if elapsed > interval.mul_f32(1.5) {
                        log::warn!("[Trainer] step took {elapsed:?}, more than 1.5x the {interval:?} interval");
                    }
                    tick += 1;
                    if tick % config.save_interval_versions.max(1) == 0 {
                        save_checkpoint(&policy, &paths);
                    }

                    // Sleep in short slices so a stop() request during the
                    // interval doesn't have to wait out the whole thing.
                    let mut slept = Duration::ZERO;
                    let remaining = interval.saturating_sub(elapsed);
                    while slept < remaining && !thread_stop.load(Ordering::SeqCst) {
                        let chunk = (remaining - slept).min(Duration::from_millis(200));
                        thread::sleep(chunk);
                        slept += chunk;
                    }
                }
                log::info!("[Trainer] shutting down, flushing final save");
                save_checkpoint(&policy, &paths);
            })
            .expect("failed to spawn trainer thread");

        Trainer { stop_flag, handle: Some(handle), stats }
    }

    pub fn stats(&self) -> TrainerStats {
        *self.stats.inner.lock()
    }

    /// Signals the trainer thread to stop and waits up to ~5s for it to
    /// join (it flushes a final save before exiting). A thread that hangs
    /// past the timeout is logged and abandoned rather than blocking
    /// shutdown forever.
    pub fn stop(mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else { return };

        let (tx, rx) = mpsc::channel();
        let watcher = thread::spawn(move || {
            let _ = handle.join();
            let _ = tx.send(());
        });
        if rx.recv_timeout(SHUTDOWN_JOIN_TIMEOUT).is_err() {
            log::warn!("[Trainer] shutdown did not complete within {SHUTDOWN_JOIN_TIMEOUT:?}");
        }
        let _ = watcher.join();
    }
}

fn run_one_step<B: AutodiffBackend>(
    policy: &Arc<Mutex<PolicyNetwork<B>>>,
    buffer: &ExperienceBuffer,
    config: &TrainingConfig,
    min_batch: usize,
    stats: &SharedStats,
    rng: &mut impl rand::Rng,
) {
    if buffer.len() < min_batch {
        return;
    }
    let batch = buffer.sample(config.batch_size, rng);
    if batch.is_empty() {
        return;
    }

    let mut last_loss = 0.0f32;
    let mut gate_signal_sum = 0.0f32;
    for experience in &batch {
        let reward = training_reward(experience, config);
        let targets = targets_for(experience, rng);
        let features = crate::types::Features { values: experience.observation, top_chunk_ids: experience.top_chunk_ids };

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut guard = policy.lock();
            let outcome = guard.train_step(&features, &targets, reward, rng);
            guard.bump_version();
            outcome
        }));

        match outcome {
            Ok(outcome) => {
                last_loss = outcome.loss;
                gate_signal_sum += experience.gate_signal;
            }
            Err(_) => {
                log::error!("[Trainer] training step panicked for territory {}, skipping", experience.territory_id);
            }
        }
    }

    let mut s = stats.inner.lock();
    s.total_steps += 1;
    s.last_batch_size = batch.len();
    s.last_loss = last_loss;
    s.average_gate_signal = gate_signal_sum / batch.len() as f32;
}

fn save_checkpoint<B: AutodiffBackend>(policy: &Arc<Mutex<PolicyNetwork<B>>>, paths: &TrainerPaths) {
    let mut guard = policy.lock();
    guard.save(&paths.weights_path, &paths.metadata_path);
    log::info!("[Trainer] saved checkpoint at version {}", guard.version());
}
