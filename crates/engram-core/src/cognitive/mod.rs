//! Cognitive engine
//!
//! Three capabilities, each disableable without affecting retrieval
//! correctness:
//!
//! 1. **Trajectory recording** - learning episodes persisted for clustering
//! 2. **Reranking** - graph-aware attention behind a capability trait with a
//!    null implementation (the retrieval path never branches on presence)
//! 3. **Pattern discovery** - clustering of completed trajectories
//!
//! When disabled, the engine hands out ids without persisting and every
//! capability degrades to its neutral form.

mod patterns;
mod rerank;
mod trajectory;

pub use patterns::{ReasoningPattern, cluster_step_vectors};
pub use rerank::{
    GraphAttentionReranker, NoopReranker, RerankCandidate, RerankOutcome, Reranker,
};
pub use trajectory::{
    Feedback, Trajectory, TrajectoryLog, TrajectoryStatus, TrajectoryStep, reward_for_feedback,
};

use std::path::Path;

use uuid::Uuid;

use crate::config::CognitiveConfig;
use crate::error::Result;

/// Aggregate cognitive statistics
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CognitiveStats {
    /// Whether the engine is enabled
    pub enabled: bool,
    /// Trajectories currently active
    pub active_trajectories: usize,
    /// Trajectories completed
    pub completed_trajectories: usize,
    /// Discovered reasoning patterns
    pub pattern_count: usize,
}

/// The cognitive layer owned by the unified facade
pub struct CognitiveEngine {
    enabled: bool,
    min_cluster: usize,
    log: Option<TrajectoryLog>,
}

impl CognitiveEngine {
    /// Open the engine; the trajectory log lives at `<root>/trajectories.db`
    pub fn open(root: &Path, config: &CognitiveConfig) -> Result<Self> {
        let log = if config.enabled {
            Some(TrajectoryLog::open(&root.join("trajectories.db"))?)
        } else {
            None
        };
        Ok(Self {
            enabled: config.enabled,
            min_cluster: config.pattern_min_cluster,
            log,
        })
    }

    /// Whether recording and clustering are active
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start a trajectory; returns its id
    pub fn begin_trajectory(&self, query: &str, route: Option<&str>) -> Result<String> {
        match &self.log {
            Some(log) => log.begin(query, route),
            None => Ok(Uuid::new_v4().to_string()),
        }
    }

    /// Append a step; embedding is optional and used only for clustering
    pub fn record_step(
        &self,
        trajectory_id: &str,
        text: &str,
        reward: f32,
        embedding: Option<&[f32]>,
    ) -> Result<()> {
        match &self.log {
            Some(log) => log.record_step(trajectory_id, text, reward, embedding, None),
            None => TrajectoryLog::validate_reward(reward),
        }
    }

    /// Seal a trajectory; completed trajectories are immutable
    pub fn end_trajectory(&self, trajectory_id: &str, quality: f32) -> Result<()> {
        match &self.log {
            Some(log) => log.end(trajectory_id, quality),
            None => TrajectoryLog::validate_quality(quality),
        }
    }

    /// Fetch a trajectory with its steps
    pub fn trajectory(&self, trajectory_id: &str) -> Result<Option<Trajectory>> {
        match &self.log {
            Some(log) => log.get(trajectory_id),
            None => Ok(None),
        }
    }

    /// Re-cluster completed trajectories into reasoning patterns
    ///
    /// Idempotent; driven by `tick()`. Returns the number of patterns.
    pub fn discover_patterns(&self) -> Result<usize> {
        let Some(log) = &self.log else {
            return Ok(0);
        };
        let items = log.completed_step_vectors()?;
        if items.len() < self.min_cluster {
            return Ok(0);
        }

        let k = (items.len() / self.min_cluster).clamp(1, 8);
        let patterns = cluster_step_vectors(&items, k, self.min_cluster);
        log.replace_patterns(&patterns)?;
        tracing::debug!(patterns = patterns.len(), "trajectory clustering pass");
        Ok(patterns.len())
    }

    /// Nearest reasoning patterns to a query embedding
    pub fn find_patterns(&self, query: &[f32], k: usize) -> Result<Vec<ReasoningPattern>> {
        match &self.log {
            Some(log) => log.nearest_patterns(query, k),
            None => Ok(vec![]),
        }
    }

    /// Aggregate statistics
    pub fn stats(&self) -> Result<CognitiveStats> {
        let mut stats = CognitiveStats {
            enabled: self.enabled,
            ..Default::default()
        };
        if let Some(log) = &self.log {
            let (active, completed) = log.status_counts()?;
            stats.active_trajectories = active;
            stats.completed_trajectories = completed;
            stats.pattern_count = log.pattern_count()?;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngramError;

    fn engine(enabled: bool) -> (tempfile::TempDir, CognitiveEngine) {
        let dir = tempfile::tempdir().unwrap();
        let config = CognitiveConfig {
            enabled,
            pattern_min_cluster: 2,
        };
        let engine = CognitiveEngine::open(dir.path(), &config).unwrap();
        (dir, engine)
    }

    #[test]
    fn test_disabled_engine_is_neutral() {
        let (_dir, engine) = engine(false);
        let id = engine.begin_trajectory("plan X", None).unwrap();
        engine.record_step(&id, "step", 0.5, None).unwrap();
        engine.end_trajectory(&id, 0.9).unwrap();
        assert!(engine.trajectory(&id).unwrap().is_none());
        assert_eq!(engine.discover_patterns().unwrap(), 0);
        assert!(engine.find_patterns(&[0.0; 8], 3).unwrap().is_empty());
    }

    #[test]
    fn test_disabled_engine_still_validates_input() {
        let (_dir, engine) = engine(false);
        let id = engine.begin_trajectory("plan X", None).unwrap();
        assert!(matches!(
            engine.record_step(&id, "step", 2.0, None),
            Err(EngramError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.end_trajectory(&id, 1.5),
            Err(EngramError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_pattern_discovery_over_completed_trajectories() {
        let (_dir, engine) = engine(true);

        for i in 0..4 {
            let id = engine.begin_trajectory(&format!("plan {i}"), None).unwrap();
            // Two families of step vectors
            let vector = if i % 2 == 0 {
                vec![1.0, 0.0, 0.0, 0.0]
            } else {
                vec![0.0, 1.0, 0.0, 0.0]
            };
            engine
                .record_step(&id, "step", 0.8, Some(&vector))
                .unwrap();
            engine.end_trajectory(&id, 0.7).unwrap();
        }

        let count = engine.discover_patterns().unwrap();
        assert!(count >= 1);

        let found = engine.find_patterns(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].cluster_size >= 2);
    }
}
