//! C10: per-chunk "time since last spawn" counter feeding C5's exploration
//! bonus. Shared between the inference path (read) and the gate's
//! record-spawn call (write), so state lives behind a mutex.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::CostConfig;

pub struct ExplorationTracker {
    inner: Mutex<Inner>,
    config: CostConfig,
}

struct Inner {
    last_spawn: HashMap<i32, Instant>,
    start: Instant,
}

#[derive(Clone, Copy, Debug)]
pub struct ExplorationStats {
    pub total_chunks: usize,
    pub explored_chunks: usize,
    pub unexplored_chunks: usize,
    pub exploration_rate: f32,
    pub tracker_age_secs: f32,
}

impl ExplorationTracker {
    pub fn new(config: CostConfig) -> Self {
        ExplorationTracker {
            inner: Mutex::new(Inner { last_spawn: HashMap::new(), start: Instant::now() }),
            config,
        }
    }

    pub fn record_spawn(&self, chunk_id: i32) {
        let mut inner = self.inner.lock();
        inner.last_spawn.insert(chunk_id, Instant::now());
        log::debug!("[Exploration] recorded spawn at chunk {chunk_id}");
    }

    pub fn time_since_spawn(&self, chunk_id: i32) -> f32 {
        let inner = self.inner.lock();
        let now = Instant::now();
        match inner.last_spawn.get(&chunk_id) {
            Some(&t) => (now - t).as_secs_f32(),
            None => (now - inner.start).as_secs_f32(),
        }
    }

    /// `ε · min(1, time_since_spawn / T_max)`. Negative chunk ids (no
    /// candidate) get zero bonus.
    pub fn bonus(&self, chunk_id: i32) -> f32 {
        if chunk_id < 0 {
            return 0.0;
        }
        let dt = self.time_since_spawn(chunk_id);
        let normalized = (dt / self.config.exploration_max_time).min(1.0);
        self.config.exploration_coefficient * normalized
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.last_spawn.clear();
        inner.start = Instant::now();
        log::info!("[Exploration] tracker reset");
    }

    pub fn stats(&self, total_chunks: usize) -> ExplorationStats {
        let inner = self.inner.lock();
        let explored = inner.last_spawn.len();
        ExplorationStats {
            total_chunks,
            explored_chunks: explored,
            unexplored_chunks: total_chunks.saturating_sub(explored),
            exploration_rate: if total_chunks > 0 { explored as f32 / total_chunks as f32 } else { 0.0 },
            tracker_age_secs: (Instant::now() - inner.start).as_secs_f32(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unspawned_chunk_gets_full_bonus_eventually() {
        let mut cfg = CostConfig::default();
        cfg.exploration_max_time = 0.0001;
        let tracker = ExplorationTracker::new(cfg.clone());
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert_eq!(tracker.bonus(5), cfg.exploration_coefficient);
    }

    #[test]
    fn negative_chunk_has_zero_bonus() {
        let tracker = ExplorationTracker::new(CostConfig::default());
        assert_eq!(tracker.bonus(-1), 0.0);
    }

    #[test]
    fn recording_a_spawn_resets_its_bonus() {
        let tracker = ExplorationTracker::new(CostConfig::default());
        tracker.record_spawn(5);
        assert!(tracker.bonus(5) < tracker.bonus(6));
    }
}
