//! C1: maps a raw [`Observation`](crate::types::Observation) into the
//! 29-float vector C3 consumes.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::types::{Features, Observation, ParasiteType, FEATURE_COUNT, TOP_CHUNKS, TOTAL_CHUNKS};

const MAX_ENERGY_PARASITES: f32 = 6.0; // floor(100/15)
const MAX_COMBAT_PARASITES: f32 = 4.0; // floor(100/25)

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

fn remap(rate: f32) -> f32 {
    (rate + 1.0) / 2.0
}

fn count_by_chunk(entities: impl Iterator<Item = i32>) -> HashMap<i32, u32> {
    let mut counts = HashMap::new();
    for chunk_id in entities {
        if chunk_id >= 0 {
            *counts.entry(chunk_id).or_insert(0) += 1;
        }
    }
    counts
}

/// Extracts the 29-dim feature vector and the chunk ids the (shuffled)
/// top-5 slots resolved to. Never fails: malformed or missing fields
/// default to 0, per spec.
pub fn extract(observation: &Observation, rng: &mut impl Rng) -> Features {
    let mut features = Features::zero();

    let workers_by_chunk =
        count_by_chunk(observation.workers_present.iter().map(|w| w.chunk_id));
    let total_workers = observation.workers_present.len() as f32;

    let mut sorted_chunks: Vec<(i32, u32)> = workers_by_chunk.into_iter().collect();
    sorted_chunks.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    sorted_chunks.truncate(TOP_CHUNKS);
    sorted_chunks.shuffle(rng);

    let protectors_by_chunk = count_by_chunk(observation.protectors.iter().map(|p| p.chunk_id));
    let total_protectors = observation.protectors.len() as f32;

    let mut energy_start = HashMap::new();
    let mut combat_start = HashMap::new();
    for p in &observation.parasites_start {
        if p.chunk_id < 0 {
            continue;
        }
        let map = match p.kind {
            ParasiteType::Energy => &mut energy_start,
            ParasiteType::Combat => &mut combat_start,
        };
        *map.entry(p.chunk_id).or_insert(0u32) += 1;
    }
    let mut energy_end = HashMap::new();
    let mut combat_end = HashMap::new();
    for p in &observation.parasites_end {
        if p.chunk_id < 0 {
            continue;
        }
        let map = match p.kind {
            ParasiteType::Energy => &mut energy_end,
            ParasiteType::Combat => &mut combat_end,
        };
        *map.entry(p.chunk_id).or_insert(0u32) += 1;
    }

    for i in 0..TOP_CHUNKS {
        let base = i * 5;
        if let Some(&(chunk_id, worker_count)) = sorted_chunks.get(i) {
            features.top_chunk_ids[i] = chunk_id;
            features.values[base] = chunk_id as f32 / (TOTAL_CHUNKS - 1) as f32;
            features.values[base + 1] = if total_workers > 0.0 {
                worker_count as f32 / total_workers
            } else {
                0.0
            };
            features.values[base + 2] = if total_protectors > 0.0 {
                *protectors_by_chunk.get(&chunk_id).unwrap_or(&0) as f32 / total_protectors
            } else {
                0.0
            };
            let e_start = *energy_start.get(&chunk_id).unwrap_or(&0) as f32;
            let e_end = *energy_end.get(&chunk_id).unwrap_or(&0) as f32;
            features.values[base + 3] = remap(rate(e_start, e_end));
            let c_start = *combat_start.get(&chunk_id).unwrap_or(&0) as f32;
            let c_end = *combat_end.get(&chunk_id).unwrap_or(&0) as f32;
            features.values[base + 4] = remap(rate(c_start, c_end));
        } else {
            features.top_chunk_ids[i] = -1;
        }
    }

    let energy_affordable = (observation.queen_energy_current / ParasiteType::Energy.cost()).floor();
    features.values[25] = (energy_affordable / MAX_ENERGY_PARASITES).min(1.0).max(0.0);
    let combat_affordable = (observation.queen_energy_current / ParasiteType::Combat.cost()).floor();
    features.values[26] = (combat_affordable / MAX_COMBAT_PARASITES).min(1.0).max(0.0);

    features.values[27] = remap(rate(observation.player_energy.start, observation.player_energy.end));
    features.values[28] = remap(rate(observation.player_minerals.start, observation.player_minerals.end));

    for v in features.values.iter_mut() {
        *v = v.clamp(0.0, 1.0);
    }

    features
}

pub fn feature_names() -> [&'static str; FEATURE_COUNT] {
    [
        "chunk_0_id", "chunk_0_worker_presence", "chunk_0_protector_density",
        "chunk_0_energy_parasite_rate", "chunk_0_combat_parasite_rate",
        "chunk_1_id", "chunk_1_worker_presence", "chunk_1_protector_density",
        "chunk_1_energy_parasite_rate", "chunk_1_combat_parasite_rate",
        "chunk_2_id", "chunk_2_worker_presence", "chunk_2_protector_density",
        "chunk_2_energy_parasite_rate", "chunk_2_combat_parasite_rate",
        "chunk_3_id", "chunk_3_worker_presence", "chunk_3_protector_density",
        "chunk_3_energy_parasite_rate", "chunk_3_combat_parasite_rate",
        "chunk_4_id", "chunk_4_worker_presence", "chunk_4_protector_density",
        "chunk_4_energy_parasite_rate", "chunk_4_combat_parasite_rate",
        "spawn_capacity_energy", "spawn_capacity_combat",
        "player_energy_rate", "player_mineral_rate",
    ]
}

pub fn describe(features: &Features) -> std::collections::BTreeMap<&'static str, f32> {
    feature_names().into_iter().zip(features.values).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityRef, Window};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn empty_observation() -> Observation {
        Observation {
            territory_id: "t1".into(),
            timestamp: 0.0,
            workers_present: vec![],
            mining_workers: vec![],
            protectors: vec![],
            parasites_start: vec![],
            parasites_end: vec![],
            queen_energy_current: 50.0,
            player_energy: Window::default(),
            player_minerals: Window::default(),
            hive_chunk: 136,
        }
    }

    #[test]
    fn extract_is_always_in_bounds() {
        let mut obs = empty_observation();
        obs.workers_present = vec![EntityRef { chunk_id: 10 }, EntityRef { chunk_id: 10 }];
        let mut rng = StdRng::seed_from_u64(42);
        let f = extract(&obs, &mut rng);
        assert_eq!(f.values.len(), FEATURE_COUNT);
        for v in f.values {
            assert!(v.is_finite());
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn empty_world_yields_zeroed_top_slots() {
        let obs = empty_observation();
        let mut rng = StdRng::seed_from_u64(42);
        let f = extract(&obs, &mut rng);
        assert!(f.top_chunk_ids.iter().all(|&c| c == -1));
        for i in 0..TOP_CHUNKS {
            assert_eq!(f.values[i * 5], 0.0);
        }
    }

    #[test]
    fn spawn_capacity_reflects_affordable_parasites() {
        let mut obs = empty_observation();
        obs.queen_energy_current = 100.0;
        let mut rng = StdRng::seed_from_u64(42);
        let f = extract(&obs, &mut rng);
        assert_eq!(f.values[25], 1.0); // floor(100/15)=6 -> 6/6
        assert_eq!(f.values[26], 1.0); // floor(100/25)=4 -> 4/4
    }

    #[test]
    fn top_chunks_ranked_by_worker_density() {
        let mut obs = empty_observation();
        obs.workers_present = vec![
            EntityRef { chunk_id: 1 },
            EntityRef { chunk_id: 1 },
            EntityRef { chunk_id: 1 },
            EntityRef { chunk_id: 2 },
        ];
        let mut rng = StdRng::seed_from_u64(42);
        let f = extract(&obs, &mut rng);
        assert!(f.top_chunk_ids.contains(&1));
        assert!(f.top_chunk_ids.contains(&2));
    }
}
