//! Trajectory log
//!
//! Learning episodes persisted in SQLite. A trajectory grows by strictly
//! monotonic step ordinals while `Active`; once `Completed` it is immutable
//! and eligible for clustering. Step embeddings are stored as little-endian
//! f32 blobs alongside the text so the clustering pass never re-embeds.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngramError, Result};

use super::patterns::ReasoningPattern;

// ============================================================================
// TYPES
// ============================================================================

/// Lifecycle state of a trajectory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrajectoryStatus {
    /// Accepting steps
    Active,
    /// Sealed with a quality score; immutable
    Completed,
    /// Sealed without a useful outcome
    Abandoned,
}

impl TrajectoryStatus {
    fn as_str(&self) -> &'static str {
        match self {
            TrajectoryStatus::Active => "active",
            TrajectoryStatus::Completed => "completed",
            TrajectoryStatus::Abandoned => "abandoned",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => TrajectoryStatus::Completed,
            "abandoned" => TrajectoryStatus::Abandoned,
            _ => TrajectoryStatus::Active,
        }
    }
}

/// One step of a trajectory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryStep {
    /// Strictly increasing ordinal within the trajectory
    pub ordinal: i64,
    /// Step text
    pub text: String,
    /// Reward in [-1, 1]
    pub reward: f32,
    /// When the step was recorded
    pub created_at: DateTime<Utc>,
    /// Optional external message correlation
    pub linked_message_id: Option<String>,
}

/// A learning episode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trajectory {
    /// Trajectory id
    pub id: String,
    /// The query that started the episode
    pub initial_query: String,
    /// Router intent recorded at start, if any
    pub route: Option<String>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Seal time
    pub ended_at: Option<DateTime<Utc>>,
    /// Quality in [0, 1], set when sealed
    pub quality: Option<f32>,
    /// Lifecycle state
    pub status: TrajectoryStatus,
    /// Ordered steps
    pub steps: Vec<TrajectoryStep>,
}

/// User feedback grades
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    /// The answer helped
    Good,
    /// The answer was usable
    Neutral,
    /// The answer did not help
    Bad,
}

/// Map user feedback to a step reward
///
/// Feedback flagged factually incorrect is coerced to at most -0.3
/// regardless of the grade.
pub fn reward_for_feedback(feedback: Feedback, factually_incorrect: bool) -> f32 {
    let reward: f32 = match feedback {
        Feedback::Good => 1.0,
        Feedback::Neutral => 0.5,
        Feedback::Bad => -0.5,
    };
    if factually_incorrect {
        reward.min(-0.3)
    } else {
        reward
    }
}

// ============================================================================
// MIGRATIONS
// ============================================================================

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS trajectories (
    id TEXT PRIMARY KEY,
    initial_query TEXT NOT NULL,
    route TEXT,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    quality REAL,
    status TEXT NOT NULL DEFAULT 'active'
);

CREATE INDEX IF NOT EXISTS idx_trajectories_status ON trajectories(status);

CREATE TABLE IF NOT EXISTS trajectory_steps (
    trajectory_id TEXT NOT NULL REFERENCES trajectories(id) ON DELETE CASCADE,
    ordinal INTEGER NOT NULL,
    text TEXT NOT NULL,
    reward REAL NOT NULL,
    created_at TEXT NOT NULL,
    linked_message_id TEXT,
    embedding BLOB,
    PRIMARY KEY (trajectory_id, ordinal)
);

CREATE TABLE IF NOT EXISTS reasoning_patterns (
    id TEXT PRIMARY KEY,
    centroid BLOB NOT NULL,
    cluster_size INTEGER NOT NULL,
    avg_quality REAL NOT NULL,
    exemplar_trajectories TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL
);
"#;

// ============================================================================
// TRAJECTORY LOG
// ============================================================================

/// SQLite-backed trajectory store
pub struct TrajectoryLog {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl TrajectoryLog {
    /// Open (or create) the log at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let writer = Connection::open(path)?;
        writer.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        writer.execute_batch(SCHEMA)?;

        let reader = Connection::open(path)?;
        reader.execute_batch("PRAGMA busy_timeout = 5000;")?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    fn write(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| EngramError::StorageFailure("trajectory writer poisoned".into()))
    }

    fn read(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| EngramError::StorageFailure("trajectory reader poisoned".into()))
    }

    /// Reject rewards outside [-1, 1]
    pub fn validate_reward(reward: f32) -> Result<()> {
        if !(-1.0..=1.0).contains(&reward) || !reward.is_finite() {
            return Err(EngramError::invalid(format!(
                "reward {reward} outside [-1, 1]"
            )));
        }
        Ok(())
    }

    /// Reject qualities outside [0, 1]
    pub fn validate_quality(quality: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&quality) || !quality.is_finite() {
            return Err(EngramError::invalid(format!(
                "quality {quality} outside [0, 1]"
            )));
        }
        Ok(())
    }

    /// Start a trajectory
    pub fn begin(&self, query: &str, route: Option<&str>) -> Result<String> {
        if query.trim().is_empty() {
            return Err(EngramError::invalid("trajectory query cannot be empty"));
        }
        let id = Uuid::new_v4().to_string();
        self.write()?.execute(
            "INSERT INTO trajectories (id, initial_query, route, started_at, status)
             VALUES (?1, ?2, ?3, ?4, 'active')",
            params![id, query, route, Utc::now().to_rfc3339()],
        )?;
        Ok(id)
    }

    fn status_of(conn: &Connection, id: &str) -> Result<Option<TrajectoryStatus>> {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM trajectories WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.map(|s| TrajectoryStatus::parse(&s)))
    }

    /// Append a step with the next ordinal
    pub fn record_step(
        &self,
        trajectory_id: &str,
        text: &str,
        reward: f32,
        embedding: Option<&[f32]>,
        linked_message_id: Option<&str>,
    ) -> Result<()> {
        Self::validate_reward(reward)?;
        if text.trim().is_empty() {
            return Err(EngramError::invalid("step text cannot be empty"));
        }

        let conn = self.write()?;
        match Self::status_of(&conn, trajectory_id)? {
            None => return Err(EngramError::not_found("trajectory", trajectory_id)),
            Some(TrajectoryStatus::Active) => {}
            Some(_) => {
                return Err(EngramError::invalid(format!(
                    "trajectory {trajectory_id} is sealed"
                )));
            }
        }

        let next_ordinal: i64 = conn.query_row(
            "SELECT COALESCE(MAX(ordinal), 0) + 1 FROM trajectory_steps WHERE trajectory_id = ?1",
            params![trajectory_id],
            |row| row.get(0),
        )?;
        let blob = embedding.map(vector_to_bytes);

        conn.execute(
            "INSERT INTO trajectory_steps
                 (trajectory_id, ordinal, text, reward, created_at, linked_message_id, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                trajectory_id,
                next_ordinal,
                text,
                reward,
                Utc::now().to_rfc3339(),
                linked_message_id,
                blob
            ],
        )?;
        Ok(())
    }

    /// Seal a trajectory as completed
    pub fn end(&self, trajectory_id: &str, quality: f32) -> Result<()> {
        Self::validate_quality(quality)?;

        let conn = self.write()?;
        match Self::status_of(&conn, trajectory_id)? {
            None => return Err(EngramError::not_found("trajectory", trajectory_id)),
            Some(TrajectoryStatus::Active) => {}
            Some(_) => {
                return Err(EngramError::invalid(format!(
                    "trajectory {trajectory_id} is already sealed"
                )));
            }
        }

        conn.execute(
            "UPDATE trajectories SET status = 'completed', quality = ?2, ended_at = ?3
             WHERE id = ?1",
            params![trajectory_id, quality, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Seal a trajectory as abandoned (no quality)
    pub fn abandon(&self, trajectory_id: &str) -> Result<()> {
        let conn = self.write()?;
        match Self::status_of(&conn, trajectory_id)? {
            None => return Err(EngramError::not_found("trajectory", trajectory_id)),
            Some(TrajectoryStatus::Active) => {}
            Some(_) => return Ok(()),
        }
        conn.execute(
            "UPDATE trajectories SET status = 'abandoned', ended_at = ?2 WHERE id = ?1",
            params![trajectory_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Fetch a trajectory with its steps in ordinal order
    pub fn get(&self, trajectory_id: &str) -> Result<Option<Trajectory>> {
        let conn = self.read()?;
        let head = conn
            .query_row(
                "SELECT id, initial_query, route, started_at, ended_at, quality, status
                 FROM trajectories WHERE id = ?1",
                params![trajectory_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<f64>>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, initial_query, route, started_at, ended_at, quality, status)) = head else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT ordinal, text, reward, created_at, linked_message_id
             FROM trajectory_steps WHERE trajectory_id = ?1 ORDER BY ordinal",
        )?;
        let steps = stmt
            .query_map(params![trajectory_id], |row| {
                Ok(TrajectoryStep {
                    ordinal: row.get(0)?,
                    text: row.get(1)?,
                    reward: row.get::<_, f64>(2)? as f32,
                    created_at: parse_time(&row.get::<_, String>(3)?),
                    linked_message_id: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(Trajectory {
            id,
            initial_query,
            route,
            started_at: parse_time(&started_at),
            ended_at: ended_at.as_deref().map(parse_time),
            quality: quality.map(|q| q as f32),
            status: TrajectoryStatus::parse(&status),
            steps,
        }))
    }

    /// Mean step vector and quality for every completed trajectory
    pub fn completed_step_vectors(&self) -> Result<Vec<(String, Vec<f32>, f32)>> {
        let conn = self.read()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.quality, s.embedding
             FROM trajectories t
             JOIN trajectory_steps s ON s.trajectory_id = t.id
             WHERE t.status = 'completed' AND s.embedding IS NOT NULL
             ORDER BY t.id, s.ordinal",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<f64>>(1)?.unwrap_or(0.0) as f32,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut grouped: Vec<(String, Vec<Vec<f32>>, f32)> = Vec::new();
        for row in rows {
            let (id, quality, blob) = row?;
            let vector = bytes_to_vector(&blob);
            match grouped.last_mut() {
                Some((last_id, vectors, _)) if *last_id == id => vectors.push(vector),
                _ => grouped.push((id, vec![vector], quality)),
            }
        }

        Ok(grouped
            .into_iter()
            .filter_map(|(id, vectors, quality)| {
                mean_vector(&vectors).map(|mean| (id, mean, quality))
            })
            .collect())
    }

    /// Replace the pattern bank wholesale (clustering is idempotent)
    pub fn replace_patterns(&self, patterns: &[ReasoningPattern]) -> Result<()> {
        let mut conn = self.write()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM reasoning_patterns", [])?;
        for pattern in patterns {
            tx.execute(
                "INSERT INTO reasoning_patterns
                     (id, centroid, cluster_size, avg_quality, exemplar_trajectories, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    pattern.id,
                    vector_to_bytes(&pattern.centroid),
                    pattern.cluster_size as i64,
                    pattern.avg_quality as f64,
                    serde_json::to_string(&pattern.exemplar_trajectories)?,
                    pattern.updated_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Nearest patterns to a query embedding, by cosine similarity
    pub fn nearest_patterns(&self, query: &[f32], k: usize) -> Result<Vec<ReasoningPattern>> {
        if k == 0 {
            return Ok(vec![]);
        }
        let conn = self.read()?;
        let mut stmt = conn.prepare(
            "SELECT id, centroid, cluster_size, avg_quality, exemplar_trajectories, updated_at
             FROM reasoning_patterns",
        )?;
        let mut patterns: Vec<(f32, ReasoningPattern)> = stmt
            .query_map([], |row| {
                Ok(ReasoningPattern {
                    id: row.get(0)?,
                    centroid: bytes_to_vector(&row.get::<_, Vec<u8>>(1)?),
                    cluster_size: row.get::<_, i64>(2)? as usize,
                    avg_quality: row.get::<_, f64>(3)? as f32,
                    exemplar_trajectories: serde_json::from_str(&row.get::<_, String>(4)?)
                        .unwrap_or_default(),
                    updated_at: parse_time(&row.get::<_, String>(5)?),
                })
            })?
            .filter_map(|r| r.ok())
            .map(|p| {
                let score = crate::embeddings::cosine_similarity(query, &p.centroid);
                (score, p)
            })
            .collect();

        patterns.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(patterns.into_iter().take(k).map(|(_, p)| p).collect())
    }

    /// `(active, completed)` trajectory counts
    pub fn status_counts(&self) -> Result<(usize, usize)> {
        let conn = self.read()?;
        let active: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trajectories WHERE status = 'active'",
            [],
            |row| row.get(0),
        )?;
        let completed: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trajectories WHERE status = 'completed'",
            [],
            |row| row.get(0),
        )?;
        Ok((active as usize, completed as usize))
    }

    /// Stored pattern count
    pub fn pattern_count(&self) -> Result<usize> {
        let count: i64 =
            self.read()?
                .query_row("SELECT COUNT(*) FROM reasoning_patterns", [], |row| {
                    row.get(0)
                })?;
        Ok(count as usize)
    }
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn mean_vector(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dim = first.len();
    let mut mean = vec![0.0_f32; dim];
    let mut counted = 0.0_f32;
    for vector in vectors {
        if vector.len() != dim {
            continue;
        }
        for (slot, value) in mean.iter_mut().zip(vector.iter()) {
            *slot += value;
        }
        counted += 1.0;
    }
    if counted == 0.0 {
        return None;
    }
    for value in &mut mean {
        *value /= counted;
    }
    Some(mean)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn open_log() -> (tempfile::TempDir, TrajectoryLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = TrajectoryLog::open(&dir.path().join("trajectories.db")).unwrap();
        (dir, log)
    }

    #[test]
    fn test_lifecycle() {
        let (_dir, log) = open_log();
        let id = log.begin("plan X", Some("hybrid")).unwrap();

        log.record_step(&id, "step1", 0.8, None, None).unwrap();
        log.record_step(&id, "step2", 0.4, None, None).unwrap();
        log.end(&id, 0.7).unwrap();

        let trajectory = log.get(&id).unwrap().unwrap();
        assert_eq!(trajectory.status, TrajectoryStatus::Completed);
        assert_eq!(trajectory.quality, Some(0.7));
        assert_eq!(trajectory.steps.len(), 2);
        assert_eq!(trajectory.steps[0].ordinal, 1);
        assert_eq!(trajectory.steps[1].ordinal, 2);
        assert!(trajectory.ended_at.is_some());
    }

    #[test]
    fn test_completed_trajectory_is_immutable() {
        let (_dir, log) = open_log();
        let id = log.begin("plan X", None).unwrap();
        log.record_step(&id, "step1", 0.8, None, None).unwrap();
        log.end(&id, 0.7).unwrap();

        let result = log.record_step(&id, "step3", 0.1, None, None);
        assert!(matches!(result, Err(EngramError::InvalidInput(_))));

        let result = log.end(&id, 0.9);
        assert!(matches!(result, Err(EngramError::InvalidInput(_))));
    }

    #[test]
    fn test_reward_and_quality_bounds() {
        let (_dir, log) = open_log();
        let id = log.begin("plan", None).unwrap();

        assert!(matches!(
            log.record_step(&id, "step", 1.5, None, None),
            Err(EngramError::InvalidInput(_))
        ));
        assert!(matches!(
            log.record_step(&id, "step", -1.5, None, None),
            Err(EngramError::InvalidInput(_))
        ));
        assert!(matches!(
            log.end(&id, -0.1),
            Err(EngramError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unknown_trajectory_not_found() {
        let (_dir, log) = open_log();
        assert!(matches!(
            log.record_step("missing", "step", 0.0, None, None),
            Err(EngramError::NotFound { .. })
        ));
        assert!(matches!(
            log.end("missing", 0.5),
            Err(EngramError::NotFound { .. })
        ));
        assert!(log.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_feedback_reward_mapping() {
        assert_eq!(reward_for_feedback(Feedback::Good, false), 1.0);
        assert_eq!(reward_for_feedback(Feedback::Neutral, false), 0.5);
        assert_eq!(reward_for_feedback(Feedback::Bad, false), -0.5);
        // Factual incorrectness caps the reward below -0.3
        assert!(reward_for_feedback(Feedback::Good, true) <= -0.3);
        assert!(reward_for_feedback(Feedback::Bad, true) <= -0.3);
    }

    #[test]
    fn test_completed_step_vectors_mean() {
        let (_dir, log) = open_log();
        let id = log.begin("plan", None).unwrap();
        log.record_step(&id, "a", 0.5, Some(&[1.0, 0.0]), None)
            .unwrap();
        log.record_step(&id, "b", 0.5, Some(&[0.0, 1.0]), None)
            .unwrap();
        log.end(&id, 0.9).unwrap();

        // Active trajectories are excluded
        let other = log.begin("other", None).unwrap();
        log.record_step(&other, "c", 0.5, Some(&[1.0, 1.0]), None)
            .unwrap();

        let vectors = log.completed_step_vectors().unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].0, id);
        assert!((vectors[0].1[0] - 0.5).abs() < 0.001);
        assert!((vectors[0].1[1] - 0.5).abs() < 0.001);
        assert_eq!(vectors[0].2, 0.9);
    }

    #[test]
    fn test_abandon() {
        let (_dir, log) = open_log();
        let id = log.begin("plan", None).unwrap();
        log.abandon(&id).unwrap();

        let trajectory = log.get(&id).unwrap().unwrap();
        assert_eq!(trajectory.status, TrajectoryStatus::Abandoned);
        assert!(trajectory.quality.is_none());
    }
}
