//! C4: the cheapest possible check, done before any inference: is there
//! anything in the territory worth the rest of the pipeline.

use crate::types::Observation;

#[derive(Clone, Copy, Debug)]
pub struct PreprocessOutcome {
    pub should_skip: bool,
    pub reason: Option<&'static str>,
    pub workers_count: usize,
    pub protectors_count: usize,
}

pub fn evaluate(observation: &Observation) -> PreprocessOutcome {
    let workers_count = observation.workers_present.len() + observation.mining_workers.len();
    let protectors_count = observation.protectors.len();

    if workers_count == 0 && protectors_count == 0 {
        PreprocessOutcome { should_skip: true, reason: Some("no_activity"), workers_count, protectors_count }
    } else {
        PreprocessOutcome { should_skip: false, reason: None, workers_count, protectors_count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityRef, Window};

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
    fn empty_world_skips() {
        let out = evaluate(&empty_observation());
        assert!(out.should_skip);
        assert_eq!(out.reason, Some("no_activity"));
    }

    #[test]
    fn protectors_alone_do_not_skip() {
        let mut obs = empty_observation();
        obs.protectors = vec![EntityRef { chunk_id: 3 }];
        let out = evaluate(&obs);
        assert!(!out.should_skip);
    }

    #[test]
    fn workers_alone_do_not_skip() {
        let mut obs = empty_observation();
        obs.workers_present = vec![EntityRef { chunk_id: 3 }];
        let out = evaluate(&obs);
        assert!(!out.should_skip);
    }
}
