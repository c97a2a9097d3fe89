//! C3: the five-head sequential policy network. N1/N2 score per-chunk
//! suitability for each parasite type; N3 picks the type; N4 picks the
//! chunk (relative to the shuffled top-5 slots C1 produced); N5 picks the
//! quantity. Only N3/N4/N5 carry a direct classification loss — N1/N2 are
//! trained purely through the gradient that flows back from them.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use burn::grad_clipping::GradientClippingConfig;
use burn::module::Module;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::{Initializer, Linear, LinearConfig, Relu};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::activation::{log_softmax, sigmoid, softmax};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Int, Tensor, TensorData};
use rand::distr::weighted::WeightedIndex;
use rand::prelude::Distribution;
use rand::Rng;

use crate::config::TrainingConfig;
use crate::types::{Features, ModelMetadata, ParasiteType, SpawnDecision, TOP_CHUNKS};

fn small_init() -> Initializer {
    Initializer::KaimingUniform { gain: 1.0, fan_out_only: false }
}

#[derive(Module, Debug)]
pub struct QueenPolicyNet<B: Backend> {
    n1_hidden: Linear<B>,
    n1_out: Linear<B>,
    n2_hidden: Linear<B>,
    n2_out: Linear<B>,
    n3_hidden: Linear<B>,
    n3_out: Linear<B>,
    n4_hidden1: Linear<B>,
    n4_hidden2: Linear<B>,
    n4_out: Linear<B>,
    n5_hidden: Linear<B>,
    n5_out: Linear<B>,
}

impl<B: Backend> QueenPolicyNet<B> {
    pub fn new(device: &B::Device) -> Self {
        let lin = |d_in: usize, d_out: usize, device: &B::Device| {
            LinearConfig::new(d_in, d_out).with_initializer(small_init()).init(device)
        };
        QueenPolicyNet {
            n1_hidden: lin(10, 8, device),
            n1_out: lin(8, 5, device),
            n2_hidden: lin(10, 8, device),
            n2_out: lin(8, 5, device),
            n3_hidden: lin(10, 8, device),
            n3_out: lin(8, 2, device),
            n4_hidden1: lin(15, 12, device),
            n4_hidden2: lin(12, 8, device),
            n4_out: lin(8, 5, device),
            n5_hidden: lin(7, 8, device),
            n5_out: lin(8, 5, device),
        }
    }
}

fn row_tensor<B: Backend>(values: &[f32], device: &B::Device) -> Tensor<B, 2> {
    let n = values.len();
    Tensor::<B, 2>::from_data(TensorData::new(values.to_vec(), [1, n]), device)
}

fn tensor_to_vec<B: Backend>(t: Tensor<B, 2>) -> Vec<f32> {
    t.into_data().to_vec::<f32>().expect("tensor data is f32")
}

fn n1_input(features: &Features) -> [f32; 10] {
    let mut out = [0.0f32; 10];
    for i in 0..TOP_CHUNKS {
        let base = i * 5;
        out[i * 2] = features.values[base + 2]; // protector_density
        out[i * 2 + 1] = features.values[base + 3]; // energy_parasite_rate
    }
    out
}

fn n2_input(features: &Features) -> [f32; 10] {
    let mut out = [0.0f32; 10];
    for i in 0..TOP_CHUNKS {
        let base = i * 5;
        out[i * 2] = features.values[base + 2]; // protector_density
        out[i * 2 + 1] = features.values[base + 4]; // combat_parasite_rate
    }
    out
}

fn n4_input(features: &Features, spawn_type: ParasiteType, suitability: &[f32; 5]) -> [f32; 15] {
    let mut out = [0.0f32; 15];
    let saturation_offset = match spawn_type {
        ParasiteType::Energy => 3,
        ParasiteType::Combat => 4,
    };
    for i in 0..TOP_CHUNKS {
        out[i] = features.values[i * 5 + 1]; // worker density
        out[TOP_CHUNKS + i] = suitability[i];
        out[2 * TOP_CHUNKS + i] = features.values[i * 5 + saturation_offset];
    }
    out
}

fn n5_input(features: &Features, spawn_type: ParasiteType, chunk_slot: usize, suitability: &[f32; 5]) -> [f32; 7] {
    let saturation_offset = match spawn_type {
        ParasiteType::Energy => 3,
        ParasiteType::Combat => 4,
    };
    let capacity_index = match spawn_type {
        ParasiteType::Energy => 25,
        ParasiteType::Combat => 26,
    };
    [
        features.values[chunk_slot * 5 + saturation_offset],
        suitability[chunk_slot],
        features.values[capacity_index],
        features.values[27],
        features.values[28],
        spawn_type.as_index() as f32,
        chunk_slot as f32 / 4.0,
    ]
}

/// Result of one forward pass, teacher-forced on `forced_type`/`forced_chunk_slot`
/// when training, and made fresh (sampled or argmax) when doing live inference.
pub struct ForwardTrace<B: Backend> {
    pub energy_suitability: [f32; 5],
    pub combat_suitability: [f32; 5],
    pub type_logits: Tensor<B, 2>,
    pub type_probs: [f32; 2],
    pub type_index: usize,
    pub chunk_logits: Tensor<B, 2>,
    pub chunk_probs: [f32; 5],
    pub chunk_slot: usize,
    pub quantity_logits: Tensor<B, 2>,
    pub quantity_probs: [f32; 5],
    pub quantity: u8,
}

fn sample_or_argmax(probs: &[f32], explore: bool, rng: &mut impl Rng) -> usize {
    if !explore {
        return probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0);
    }
    match WeightedIndex::new(probs) {
        Ok(dist) => dist.sample(rng),
        Err(_) => rng.random_range(0..probs.len()),
    }
}

impl<B: Backend> QueenPolicyNet<B> {
    fn forward_trace(
        &self,
        features: &Features,
        forced_type: Option<usize>,
        forced_chunk_slot: Option<usize>,
        explore: bool,
        rng: &mut impl Rng,
        device: &B::Device,
    ) -> ForwardTrace<B> {
        let relu = Relu::new();

        let n1_out = sigmoid(self.n1_out.forward(relu.forward(self.n1_hidden.forward(row_tensor::<B>(&n1_input(features), device)))));
        let n2_out = sigmoid(self.n2_out.forward(relu.forward(self.n2_hidden.forward(row_tensor::<B>(&n2_input(features), device)))));
        let energy_suitability: [f32; 5] = tensor_to_vec(n1_out.clone()).try_into().unwrap();
        let combat_suitability: [f32; 5] = tensor_to_vec(n2_out.clone()).try_into().unwrap();

        let n3_input = Tensor::cat(vec![n1_out, n2_out], 1);
        let type_logits = self.n3_out.forward(relu.forward(self.n3_hidden.forward(n3_input)));
        let type_probs_vec = tensor_to_vec(softmax(type_logits.clone(), 1));
        let type_probs: [f32; 2] = type_probs_vec.clone().try_into().unwrap();
        let type_index = forced_type.unwrap_or_else(|| sample_or_argmax(&type_probs_vec, explore, rng));
        let spawn_type = ParasiteType::from_index(type_index);
        let suitability = match spawn_type {
            ParasiteType::Energy => &energy_suitability,
            ParasiteType::Combat => &combat_suitability,
        };

        let chunk_logits =
            self.n4_out.forward(relu.forward(self.n4_hidden2.forward(relu.forward(
                self.n4_hidden1.forward(row_tensor::<B>(&n4_input(features, spawn_type, suitability), device)),
            ))));
        let chunk_probs_vec = tensor_to_vec(softmax(chunk_logits.clone(), 1));
        let chunk_probs: [f32; 5] = chunk_probs_vec.clone().try_into().unwrap();
        let chunk_slot = forced_chunk_slot.unwrap_or_else(|| sample_or_argmax(&chunk_probs_vec, explore, rng));

        let quantity_logits = self.n5_out.forward(relu.forward(
            self.n5_hidden.forward(row_tensor::<B>(&n5_input(features, spawn_type, chunk_slot, suitability), device)),
        ));
        let quantity_probs_vec = tensor_to_vec(softmax(quantity_logits.clone(), 1));
        let quantity_probs: [f32; 5] = quantity_probs_vec.clone().try_into().unwrap();
        let quantity = sample_or_argmax(&quantity_probs_vec, explore, rng) as u8;

        ForwardTrace {
            energy_suitability,
            combat_suitability,
            type_logits,
            type_probs,
            type_index,
            chunk_logits,
            chunk_probs,
            chunk_slot,
            quantity_logits,
            quantity_probs,
            quantity,
        }
    }
}

/// `chunk_target`/inference decoding: resolve a relative top-5 slot to a
/// real chunk id, falling back per §4.3 when the chosen slot (or every
/// slot) is empty.
pub fn decode_chunk(chunk_slot: usize, top_chunk_ids: &[i32; TOP_CHUNKS], chunk_probs: &[f32; 5], rng: &mut impl Rng) -> i32 {
    if top_chunk_ids[chunk_slot] >= 0 {
        return top_chunk_ids[chunk_slot];
    }
    let mut ranked: Vec<usize> = (0..TOP_CHUNKS).collect();
    ranked.sort_by(|&a, &b| chunk_probs[b].partial_cmp(&chunk_probs[a]).unwrap_or(std::cmp::Ordering::Equal));
    for slot in ranked {
        if top_chunk_ids[slot] >= 0 {
            return top_chunk_ids[slot];
        }
    }
    rng.random_range(0..crate::types::TOTAL_CHUNKS as i32)
}

/// Inverse of `decode_chunk`'s happy path: which top-5 slot did an actual
/// chunk id come from, for building a training target. Per §4.8, a chunk
/// not present in this observation's top-5 gets a uniformly random valid
/// slot rather than defaulting to 0 (which would bias the policy toward
/// slot 0).
pub fn relative_slot_for_chunk(top_chunk_ids: &[i32; TOP_CHUNKS], chunk: i32, rng: &mut impl Rng) -> usize {
    if let Some(slot) = top_chunk_ids.iter().position(|&c| c == chunk) {
        return slot;
    }
    rng.random_range(0..TOP_CHUNKS)
}

type PolicyOptimizer<B> = OptimizerAdaptor<Adam, QueenPolicyNet<B>, B>;

pub struct TrainTargets {
    pub type_target: usize,
    pub chunk_target: usize,
    pub quantity_target: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct TrainOutcome {
    pub loss: f32,
}

/// Owns the model, its optimizer state, and the persisted metadata. Holds
/// the single model lock the rest of the core serializes inference and
/// training through (the lock itself lives one level up, in
/// `Orchestrator`/`Trainer` — this type is the thing the lock guards).
pub struct PolicyNetwork<B: AutodiffBackend> {
    model: QueenPolicyNet<B>,
    optimizer: PolicyOptimizer<B>,
    device: B::Device,
    pub metadata: ModelMetadata,
    learning_rate: f64,
    entropy_coefficient: f32,
    label_smoothing: f32,
}

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

impl<B: AutodiffBackend> PolicyNetwork<B> {
    pub fn fresh(device: B::Device, config: &TrainingConfig) -> Self {
        let model = QueenPolicyNet::new(&device);
        let optimizer = AdamConfig::new()
            .with_grad_clipping(Some(GradientClippingConfig::Norm(config.gradient_clip_norm)))
            .init();
        PolicyNetwork {
            model,
            optimizer,
            device,
            metadata: ModelMetadata::fresh(now_secs()),
            learning_rate: config.learning_rate,
            entropy_coefficient: config.entropy_coefficient,
            label_smoothing: config.label_smoothing,
        }
    }

    /// Loads weights + metadata sidecar from disk. Architecture or
    /// framework mismatch (or a missing/corrupt sidecar) backs up whatever
    /// is there and returns a fresh network, never an error — per §7,
    /// "architecture mismatch on load" is not a failure the caller has to
    /// handle.
    pub fn load(device: B::Device, weights_path: &Path, metadata_path: &Path, config: &TrainingConfig) -> Self {
        let metadata: Option<ModelMetadata> =
            std::fs::read_to_string(metadata_path).ok().and_then(|s| serde_json::from_str(&s).ok());
        let compatible = metadata.as_ref().map(|m| m.is_compatible()).unwrap_or(false);

        if !compatible || !weights_path.exists() {
            if weights_path.exists() || metadata_path.exists() {
                backup_incompatible(weights_path, metadata_path);
            }
            log::info!("[PolicyNetwork] starting fresh (no compatible checkpoint found)");
            return Self::fresh(device, config);
        }

        let recorder = CompactRecorder::new();
        match QueenPolicyNet::new(&device).load_file(weights_path, &recorder, &device) {
            Ok(model) => {
                let optimizer = AdamConfig::new()
                    .with_grad_clipping(Some(GradientClippingConfig::Norm(config.gradient_clip_norm)))
                    .init();
                PolicyNetwork {
                    model,
                    optimizer,
                    device,
                    metadata: metadata.unwrap(),
                    learning_rate: config.learning_rate,
                    entropy_coefficient: config.entropy_coefficient,
                    label_smoothing: config.label_smoothing,
                }
            }
            Err(e) => {
                log::warn!("[PolicyNetwork] failed to load weights ({e}), starting fresh");
                backup_incompatible(weights_path, metadata_path);
                Self::fresh(device, config)
            }
        }
    }

    /// Saves weights atomically (write-then-rename) and rewrites the
    /// metadata sidecar. Failures are logged, never propagated — in-memory
    /// weights are unaffected and the next scheduled save retries.
    pub fn save(&mut self, weights_path: &Path, metadata_path: &Path) {
        self.metadata.last_saved_at = now_secs();
        let tmp_path = weights_path.with_extension("tmp");
        match self.model.clone().save_file(&tmp_path, &CompactRecorder::new()) {
            Ok(()) => {
                if let Err(e) = std::fs::rename(&tmp_path, weights_path) {
                    log::warn!("[PolicyNetwork] failed to finalize weights file: {e}");
                    return;
                }
            }
            Err(e) => {
                log::warn!("[PolicyNetwork] failed to save weights: {e}");
                return;
            }
        }
        match serde_json::to_string_pretty(&self.metadata) {
            Ok(json) => {
                if let Err(e) = std::fs::write(metadata_path, json) {
                    log::warn!("[PolicyNetwork] failed to write metadata sidecar: {e}");
                }
            }
            Err(e) => log::warn!("[PolicyNetwork] failed to serialize metadata: {e}"),
        }
    }

    pub fn get_spawn_decision(&self, features: &Features, explore: bool, rng: &mut impl Rng) -> SpawnDecision {
        let trace = self.model.forward_trace(features, None, None, explore, rng, &self.device);
        let spawn_chunk = decode_chunk(trace.chunk_slot, &features.top_chunk_ids, &trace.chunk_probs, rng);
        SpawnDecision {
            spawn_chunk,
            spawn_type: Some(ParasiteType::from_index(trace.type_index)),
            quantity: trace.quantity,
            chunk_confidence: trace.chunk_probs[trace.chunk_slot],
            type_confidence: trace.type_probs[trace.type_index],
            chunk_slot: trace.chunk_slot,
            type_index: trace.type_index,
        }
    }

    /// One Adam step on the combined, reward-weighted, entropy-regularized
    /// cross-entropy loss over N3/N4/N5, teacher-forced on the experience's
    /// recorded type/chunk choice so N4/N5's input assembly matches what
    /// actually happened at inference time.
    pub fn train_step(&mut self, features: &Features, targets: &TrainTargets, reward: f32, rng: &mut impl Rng) -> TrainOutcome {
        let trace = self.model.forward_trace(
            features,
            Some(targets.type_target),
            Some(targets.chunk_target),
            false,
            rng,
            &self.device,
        );

        let type_loss = self.head_loss(trace.type_logits, targets.type_target, 2);
        let chunk_loss = self.head_loss(trace.chunk_logits, targets.chunk_target, 5);
        let quantity_loss = self.head_loss(trace.quantity_logits, targets.quantity_target, 5);

        let total = (type_loss + chunk_loss + quantity_loss).mul_scalar(reward.abs());
        let loss_value = total.clone().into_data().to_vec::<f32>().expect("scalar loss")[0];

        let grads = total.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.model = self.optimizer.step(self.learning_rate, self.model.clone(), grads);

        self.metadata.total_training_iterations += 1;
        self.metadata.total_samples_ever_processed += 1;
        if loss_value < self.metadata.best_loss {
            self.metadata.best_loss = loss_value;
        }

        TrainOutcome { loss: loss_value }
    }

    /// `CE(logits, target) - entropy_coefficient * H(softmax(logits))`, with
    /// label smoothing folded into the cross-entropy term. ε/α were tuned up
    /// (§9) specifically to stop the policy collapsing onto one chunk;
    /// lowering them without re-measuring entropy regresses that fix.
    fn head_loss(&self, logits: Tensor<B, 2>, target: usize, num_classes: usize) -> Tensor<B, 1> {
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(vec![target as i64], [1]), &self.device);
        let ce = CrossEntropyLossConfig::new()
            .with_smoothing(Some(self.label_smoothing))
            .init::<B>(&self.device)
            .forward(logits.clone(), targets);

        let probs = softmax(logits.clone(), 1);
        let log_probs = log_softmax(logits, 1);
        let entropy = (probs * log_probs).sum_dim(1).neg().mean();

        ce - entropy.mul_scalar(self.entropy_coefficient)
    }

    pub fn bump_version(&mut self) {
        self.metadata.version += 1;
    }

    pub fn version(&self) -> u64 {
        self.metadata.version
    }

    #[cfg(test)]
    fn architecture_version(&self) -> u32 {
        self.metadata.architecture_version
    }
}

fn backup_incompatible(weights_path: &Path, metadata_path: &Path) {
    let ts = now_secs() as u64;
    for path in [weights_path, metadata_path] {
        if path.exists() {
            let backup = path.with_extension(format!("backup_{ts}"));
            if let Err(e) = std::fs::rename(path, &backup) {
                log::warn!("[PolicyNetwork] failed to back up {}: {e}", path.display());
            } else {
                log::info!("[PolicyNetwork] backed up incompatible checkpoint to {}", backup.display());
            }
        }
    }
}
