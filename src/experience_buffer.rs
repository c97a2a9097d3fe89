//! C7: capacity-bounded replay of (observation, action, gate_signal,
//! actual_reward) tuples. A SEND experience is born "pending" — its actual
//! reward isn't known until the territory's next tick — and is completed
//! in place by `update_pending_reward`. WAITs never go through pending:
//! the gate already knows their ground truth the moment they're decided.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::types::Experience;

/// Mutex acquisition timeout. A buffer under contention skips the
/// operation rather than blocking inference or the trainer indefinitely.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

struct Inner {
    ring: VecDeque<Experience>,
    pending: HashMap<String, Experience>,
    capacity: usize,
}

pub struct ExperienceBuffer {
    inner: Mutex<Inner>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BufferStats {
    pub ring_len: usize,
    pub pending_len: usize,
    pub capacity: usize,
    pub utilization: f32,
    pub average_gate_signal: f32,
}

impl ExperienceBuffer {
    pub fn new(capacity: usize) -> Self {
        ExperienceBuffer {
            inner: Mutex::new(Inner { ring: VecDeque::with_capacity(capacity), pending: HashMap::new(), capacity }),
        }
    }

    /// Inserts an experience. A `SEND` with no `actual_reward` yet is held
    /// in the per-territory pending slot, superseding anything pending for
    /// that territory already — the previous pending SEND is discarded as
    /// training signal, matching the source's "latest SEND wins" behavior.
    /// Everything else (WAITs, and SENDs that already carry a reward) goes
    /// straight into the ring.
    pub fn add(&self, experience: Experience) {
        let Some(mut inner) = self.inner.try_lock_for(LOCK_TIMEOUT) else {
            log::warn!("[ExperienceBuffer] add() timed out acquiring lock, experience dropped");
            return;
        };
        if experience.is_send() && experience.actual_reward.is_none() {
            inner.pending.insert(experience.territory_id.clone(), experience);
            return;
        }
        push_ring(&mut inner, experience);
    }

    /// Moves a pending SEND into the ring with `actual_reward` stamped in.
    /// Returns the completed experience, or `None` if there was nothing
    /// pending for this territory (e.g. a second call for the same tick).
    pub fn update_pending_reward(&self, territory_id: &str, reward: f32) -> Option<Experience> {
        let Some(mut inner) = self.inner.try_lock_for(LOCK_TIMEOUT) else {
            log::warn!("[ExperienceBuffer] update_pending_reward() timed out acquiring lock");
            return None;
        };
        let mut experience = inner.pending.remove(territory_id)?;
        experience.actual_reward = Some(reward);
        let completed = experience.clone();
        push_ring(&mut inner, experience);
        Some(completed)
    }

    pub fn sample(&self, n: usize, rng: &mut impl Rng) -> Vec<Experience> {
        let Some(inner) = self.inner.try_lock_for(LOCK_TIMEOUT) else {
            log::warn!("[ExperienceBuffer] sample() timed out acquiring lock");
            return Vec::new();
        };
        let mut indices: Vec<usize> = (0..inner.ring.len()).collect();
        indices.shuffle(rng);
        indices.truncate(n);
        indices.into_iter().map(|i| inner.ring[i].clone()).collect()
    }

    /// Atomically removes and returns every ring entry. Pending experiences
    /// are untouched — they aren't training-ready yet.
    pub fn drain(&self) -> Vec<Experience> {
        let Some(mut inner) = self.inner.try_lock_for(LOCK_TIMEOUT) else {
            log::warn!("[ExperienceBuffer] drain() timed out acquiring lock");
            return Vec::new();
        };
        inner.ring.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.try_lock_for(LOCK_TIMEOUT).map(|inner| inner.ring.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BufferStats {
        let Some(inner) = self.inner.try_lock_for(LOCK_TIMEOUT) else {
            log::warn!("[ExperienceBuffer] stats() timed out acquiring lock");
            return BufferStats::default();
        };
        let ring_len = inner.ring.len();
        let average_gate_signal = if ring_len == 0 {
            0.0
        } else {
            inner.ring.iter().map(|e| e.gate_signal).sum::<f32>() / ring_len as f32
        };
        BufferStats {
            ring_len,
            pending_len: inner.pending.len(),
            capacity: inner.capacity,
            utilization: ring_len as f32 / inner.capacity.max(1) as f32,
            average_gate_signal,
        }
    }
}

fn push_ring(inner: &mut Inner, experience: Experience) {
    if inner.ring.len() >= inner.capacity {
        inner.ring.pop_front();
    }
    inner.ring.push_back(experience);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParasiteType, FEATURE_COUNT, TOP_CHUNKS};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn experience(territory: &str, was_executed: bool, actual_reward: Option<f32>) -> Experience {
        Experience {
            observation: [0.0; FEATURE_COUNT],
            top_chunk_ids: [-1; TOP_CHUNKS],
            spawn_chunk: 10,
            spawn_type: ParasiteType::Energy,
            quantity: 1,
            nn_confidence: 0.8,
            gate_signal: 0.1,
            expected_reward: 0.4,
            was_executed,
            actual_reward,
            territory_id: territory.to_string(),
            model_version: 1,
            timestamp: 0.0,
        }
    }

    #[test]
    fn pending_send_is_not_in_ring_until_completed() {
        let buffer = ExperienceBuffer::new(10);
        buffer.add(experience("t1", true, None));
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.stats().pending_len, 1);

        let completed = buffer.update_pending_reward("t1", 0.5).unwrap();
        assert_eq!(completed.actual_reward, Some(0.5));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.stats().pending_len, 0);
    }

    #[test]
    fn second_update_on_same_territory_returns_none() {
        let buffer = ExperienceBuffer::new(10);
        buffer.add(experience("t1", true, None));
        buffer.update_pending_reward("t1", 0.5);
        assert!(buffer.update_pending_reward("t1", 0.3).is_none());
    }

    #[test]
    fn waits_never_enter_pending() {
        let buffer = ExperienceBuffer::new(10);
        buffer.add(experience("t1", false, None));
        assert_eq!(buffer.stats().pending_len, 0);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn new_send_supersedes_old_pending_for_same_territory() {
        let buffer = ExperienceBuffer::new(10);
        buffer.add(experience("t1", true, None));
        let mut second = experience("t1", true, None);
        second.spawn_chunk = 99;
        buffer.add(second);
        assert_eq!(buffer.stats().pending_len, 1);
        let completed = buffer.update_pending_reward("t1", 0.1).unwrap();
        assert_eq!(completed.spawn_chunk, 99);
    }

    #[test]
    fn ring_never_exceeds_capacity() {
        let buffer = ExperienceBuffer::new(3);
        for i in 0..10 {
            buffer.add(experience(&format!("t{i}"), false, None));
        }
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn drain_returns_everything_and_empties_ring() {
        let buffer = ExperienceBuffer::new(10);
        buffer.add(experience("t1", false, None));
        buffer.add(experience("t2", false, None));
        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn drain_never_returns_pending_sends() {
        let buffer = ExperienceBuffer::new(10);
        buffer.add(experience("t1", true, None));
        let drained = buffer.drain();
        assert!(drained.is_empty());
        assert_eq!(buffer.stats().pending_len, 1);
    }

    #[test]
    fn sample_never_exceeds_ring_size() {
        let buffer = ExperienceBuffer::new(10);
        buffer.add(experience("t1", false, None));
        buffer.add(experience("t2", false, None));
        let mut rng = StdRng::seed_from_u64(1);
        let sampled = buffer.sample(50, &mut rng);
        assert_eq!(sampled.len(), 2);
    }
}
