//! Run checkpoint persistence

use crate::models::workflow::{ExecutionStatus, RunCheckpoint, StateTransition};
use anyhow::{Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Load/save-by-run-id capability injected into the engine
///
/// Writes for different runs may happen concurrently; for one run the last
/// writer wins.
pub trait CheckpointStore: Send + Sync {
    /// Store `checkpoint` as the run's current one, bumping its sequence
    ///
    /// The previous current checkpoint moves to history.
    fn save(&self, checkpoint: &mut RunCheckpoint) -> Result<()>;

    /// Current checkpoint of a run
    fn load(&self, run_id: Uuid) -> Result<Option<RunCheckpoint>>;

    /// Superseded checkpoints of a run, oldest first
    fn history(&self, run_id: Uuid) -> Result<Vec<RunCheckpoint>>;

    fn record_transition(&self, transition: StateTransition) -> Result<()>;

    /// Transitions of a run in the order they were recorded
    fn transitions(&self, run_id: Uuid) -> Result<Vec<StateTransition>>;

    /// Current checkpoints, newest first, optionally for one workflow
    fn list(&self, workflow_name: Option<&str>) -> Result<Vec<RunCheckpoint>>;

    /// Runs left `running`, for crash recovery
    fn find_incomplete(&self) -> Result<Vec<RunCheckpoint>> {
        Ok(self
            .list(None)?
            .into_iter()
            .filter(|c| c.status == ExecutionStatus::Running)
            .collect())
    }

    /// Query metrics, optionally for one workflow
    fn query_metrics(&self, workflow_name: Option<&str>) -> Result<WorkflowMetrics> {
        Ok(WorkflowMetrics::from_runs(&self.list(workflow_name)?))
    }
}

fn stamp(checkpoint: &mut RunCheckpoint, previous: Option<&RunCheckpoint>) {
    checkpoint.sequence = previous.map(|p| p.sequence + 1).unwrap_or(1);
    checkpoint.updated_at = Utc::now();
    if checkpoint.status.is_terminal() && checkpoint.completed_at.is_none() {
        checkpoint.completed_at = Some(checkpoint.updated_at);
    }
}

/// Keep a cancellation recorded by another caller
///
/// A run cancelled while its driver was inside a node must not be revived by
/// the driver's next non-terminal save. Replaces `incoming` with the stored
/// checkpoint and returns `true` in that case; nothing is written.
fn adopt_cancellation(incoming: &mut RunCheckpoint, stored: &RunCheckpoint) -> bool {
    if stored.status == ExecutionStatus::Cancelled && !incoming.status.is_terminal() {
        *incoming = stored.clone();
        return true;
    }
    false
}

fn newest_first(runs: &mut [RunCheckpoint]) {
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
}

#[derive(Default)]
struct RunRecord {
    current: Option<RunCheckpoint>,
    history: Vec<RunCheckpoint>,
    transitions: Vec<StateTransition>,
}

/// Process-local store for tests and development
#[derive(Default, Clone)]
pub struct InMemoryCheckpointStore {
    runs: Arc<DashMap<Uuid, RunRecord>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, checkpoint: &mut RunCheckpoint) -> Result<()> {
        let mut record = self.runs.entry(checkpoint.run_id).or_default();
        if let Some(current) = &record.current {
            if adopt_cancellation(checkpoint, current) {
                return Ok(());
            }
        }
        stamp(checkpoint, record.current.as_ref());
        if let Some(previous) = record.current.replace(checkpoint.clone()) {
            record.history.push(previous);
        }
        Ok(())
    }

    fn load(&self, run_id: Uuid) -> Result<Option<RunCheckpoint>> {
        Ok(self.runs.get(&run_id).and_then(|r| r.current.clone()))
    }

    fn history(&self, run_id: Uuid) -> Result<Vec<RunCheckpoint>> {
        Ok(self
            .runs
            .get(&run_id)
            .map(|r| r.history.clone())
            .unwrap_or_default())
    }

    fn record_transition(&self, transition: StateTransition) -> Result<()> {
        self.runs
            .entry(transition.run_id)
            .or_default()
            .transitions
            .push(transition);
        Ok(())
    }

    fn transitions(&self, run_id: Uuid) -> Result<Vec<StateTransition>> {
        Ok(self
            .runs
            .get(&run_id)
            .map(|r| r.transitions.clone())
            .unwrap_or_default())
    }

    fn list(&self, workflow_name: Option<&str>) -> Result<Vec<RunCheckpoint>> {
        let mut runs: Vec<_> = self
            .runs
            .iter()
            .filter_map(|r| r.current.clone())
            .filter(|c| workflow_name.map_or(true, |w| c.workflow_name == w))
            .collect();
        newest_first(&mut runs);
        Ok(runs)
    }
}

/// Superseded checkpoints kept per run in the JSON store; older ones are pruned
pub const MAX_HISTORY_PER_RUN: usize = 50;

/// Root JSON store containing all run data
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JsonStore {
    /// Current checkpoint of every run
    pub runs: Vec<RunCheckpoint>,
    /// Superseded checkpoints
    #[serde(default)]
    pub history: Vec<RunCheckpoint>,
    /// All state transitions
    #[serde(default)]
    pub transitions: Vec<StateTransition>,
}

impl JsonStore {
    fn prune_history(&mut self, run_id: Uuid) {
        let kept = self.history.iter().filter(|r| r.run_id == run_id).count();
        let mut excess = kept.saturating_sub(MAX_HISTORY_PER_RUN);
        if excess == 0 {
            return;
        }
        // History is appended in order, so the first entries are the oldest
        self.history.retain(|r| {
            if excess > 0 && r.run_id == run_id {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

/// Durable store in a single JSON file guarded by advisory file locks
///
/// Holds no cached copy: every read loads the file under a shared lock, and
/// every write re-reads it under an exclusive lock, changes only the affected
/// run and replaces the file by renaming a temporary file over it. Several
/// processes can therefore share one store file.
pub struct WorkflowPersistence {
    /// Path to JSON store file
    store_path: PathBuf,
    /// Sidecar file carrying the advisory locks
    lock_path: PathBuf,
}

impl WorkflowPersistence {
    /// Create new persistence manager
    pub fn new<P: AsRef<Path>>(store_path: P) -> Result<Self> {
        let store_path = store_path.as_ref().to_path_buf();

        if let Some(parent) = store_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("Failed to create run store directory")?;
            }
        }

        let persistence = Self {
            lock_path: sidecar(&store_path, "lock"),
            store_path,
        };
        // Fail early on an unreadable or corrupt store
        persistence.read(|_| ())?;
        Ok(persistence)
    }

    pub fn path(&self) -> &Path {
        &self.store_path
    }

    fn lock_file(&self) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.lock_path)
            .context("Failed to open run store lock file")
    }

    /// Run `f` over a fresh snapshot of the store under a shared lock
    fn read<T>(&self, f: impl FnOnce(&JsonStore) -> T) -> Result<T> {
        let lock = self.lock_file()?;
        lock.lock_shared()
            .context("Failed to acquire read lock on run store")?;
        // Lock released when `lock` drops
        self.load_store().map(|store| f(&store))
    }

    /// Re-read the store under an exclusive lock, apply `f` and write it back
    fn update<T>(&self, f: impl FnOnce(&mut JsonStore) -> T) -> Result<T> {
        let lock = self.lock_file()?;
        lock.lock_exclusive()
            .context("Failed to acquire write lock on run store")?;
        let mut store = self.load_store()?;
        let value = f(&mut store);
        self.save_store(&store)?;
        Ok(value)
    }

    /// Load JSON store from file; callers hold the lock
    fn load_store(&self) -> Result<JsonStore> {
        let mut file = match File::open(&self.store_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(JsonStore::default()),
            Err(e) => return Err(e).context("Failed to open run store file"),
        };

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .context("Failed to read run store")?;

        if contents.trim().is_empty() {
            return Ok(JsonStore::default());
        }

        serde_json::from_str(&contents).context("Failed to parse run store JSON")
    }

    /// Write the store to a temporary file and rename it into place; callers hold the lock
    fn save_store(&self, store: &JsonStore) -> Result<()> {
        let tmp_path = sidecar(&self.store_path, "tmp");
        let json = serde_json::to_string_pretty(store).context("Failed to serialize run store")?;

        let file = File::create(&tmp_path).context("Failed to create temporary run store file")?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(json.as_bytes())
            .context("Failed to write run store")?;
        writer.flush().context("Failed to flush run store")?;
        writer
            .get_ref()
            .sync_all()
            .context("Failed to sync run store to disk")?;

        std::fs::rename(&tmp_path, &self.store_path).context("Failed to replace run store file")
    }
}

/// `runs.json` -> `runs.json.<suffix>`
fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

impl CheckpointStore for WorkflowPersistence {
    fn save(&self, checkpoint: &mut RunCheckpoint) -> Result<()> {
        let run_id = checkpoint.run_id;
        self.update(|store| {
            match store.runs.iter().position(|r| r.run_id == run_id) {
                Some(idx) => {
                    if adopt_cancellation(checkpoint, &store.runs[idx]) {
                        return;
                    }
                    stamp(checkpoint, Some(&store.runs[idx]));
                    let previous = std::mem::replace(&mut store.runs[idx], checkpoint.clone());
                    store.history.push(previous);
                    store.prune_history(run_id);
                }
                None => {
                    stamp(checkpoint, None);
                    store.runs.push(checkpoint.clone());
                }
            }
        })
        .with_context(|| format!("Failed to persist checkpoint for run {}", run_id))
    }

    fn load(&self, run_id: Uuid) -> Result<Option<RunCheckpoint>> {
        self.read(|store| store.runs.iter().find(|r| r.run_id == run_id).cloned())
    }

    fn history(&self, run_id: Uuid) -> Result<Vec<RunCheckpoint>> {
        self.read(|store| {
            store
                .history
                .iter()
                .filter(|r| r.run_id == run_id)
                .cloned()
                .collect()
        })
    }

    fn record_transition(&self, transition: StateTransition) -> Result<()> {
        self.update(|store| store.transitions.push(transition))
            .context("Failed to persist state transition")
    }

    fn transitions(&self, run_id: Uuid) -> Result<Vec<StateTransition>> {
        self.read(|store| {
            store
                .transitions
                .iter()
                .filter(|t| t.run_id == run_id)
                .cloned()
                .collect()
        })
    }

    fn list(&self, workflow_name: Option<&str>) -> Result<Vec<RunCheckpoint>> {
        let mut runs: Vec<_> = self.read(|store| {
            store
                .runs
                .iter()
                .filter(|r| workflow_name.map_or(true, |w| r.workflow_name == w))
                .cloned()
                .collect()
        })?;
        newest_first(&mut runs);
        Ok(runs)
    }
}

/// Workflow run metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowMetrics {
    pub run_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub cancelled_count: usize,
    pub suspended_count: usize,
    pub avg_duration_ms: u64,
}

impl WorkflowMetrics {
    pub fn from_runs(runs: &[RunCheckpoint]) -> Self {
        let count = |status: ExecutionStatus| runs.iter().filter(|r| r.status == status).count();

        let durations: Vec<u64> = runs
            .iter()
            .filter_map(|r| {
                r.completed_at
                    .map(|completed| (completed - r.started_at).num_milliseconds().max(0) as u64)
            })
            .collect();

        let avg_duration_ms = if !durations.is_empty() {
            durations.iter().sum::<u64>() / durations.len() as u64
        } else {
            0
        };

        Self {
            run_count: runs.len(),
            success_count: count(ExecutionStatus::Completed),
            failure_count: count(ExecutionStatus::Failed),
            cancelled_count: count(ExecutionStatus::Cancelled),
            suspended_count: count(ExecutionStatus::Suspended),
            avg_duration_ms,
        }
    }

    /// Percentage of failed runs (0.0 to 100.0)
    pub fn failure_rate(&self) -> f64 {
        if self.run_count == 0 {
            return 0.0;
        }
        (self.failure_count as f64 / self.run_count as f64) * 100.0
    }

    /// Percentage of successful runs (0.0 to 100.0)
    pub fn success_rate(&self) -> f64 {
        if self.run_count == 0 {
            return 0.0;
        }
        (self.success_count as f64 / self.run_count as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkflowState;
    use tempfile::tempdir;

    fn checkpoint(workflow: &str) -> RunCheckpoint {
        RunCheckpoint::new(
            Uuid::new_v4(),
            workflow,
            "portal_login",
            WorkflowState::new().with("portal", "MoHealthNet"),
            "test-user",
        )
    }

    #[test]
    fn test_persistence_initialization() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("nested").join("runs.json");

        let persistence = WorkflowPersistence::new(&store_path).unwrap();

        assert!(store_path.parent().unwrap().exists());
        assert!(persistence.list(None).unwrap().is_empty());
    }

    #[test]
    fn test_save_moves_previous_checkpoint_to_history() {
        let store = InMemoryCheckpointStore::new();
        let mut cp = checkpoint("single-portal-login");

        store.save(&mut cp).unwrap();
        assert_eq!(cp.sequence, 1);

        cp.current_node = "done".to_string();
        cp.status = ExecutionStatus::Completed;
        store.save(&mut cp).unwrap();

        let current = store.load(cp.run_id).unwrap().unwrap();
        assert_eq!(current.sequence, 2);
        assert!(current.completed_at.is_some());

        let history = store.history(cp.run_id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].current_node, "portal_login");
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("runs.json");
        let mut cp = checkpoint("eligibility-verification");

        {
            let persistence = WorkflowPersistence::new(&store_path).unwrap();
            persistence.save(&mut cp).unwrap();
            persistence.save(&mut cp).unwrap();
        }

        let reopened = WorkflowPersistence::new(&store_path).unwrap();
        let loaded = reopened.load(cp.run_id).unwrap().unwrap();
        assert_eq!(loaded.sequence, 2);
        assert_eq!(loaded.state.get_str("portal"), Some("MoHealthNet"));
        assert_eq!(reopened.history(cp.run_id).unwrap().len(), 1);
        assert_eq!(reopened.find_incomplete().unwrap().len(), 1);
    }

    #[test]
    fn test_handles_on_one_file_keep_each_others_runs() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("runs.json");
        let first = WorkflowPersistence::new(&store_path).unwrap();
        let second = WorkflowPersistence::new(&store_path).unwrap();

        let mut run_a = checkpoint("single-portal-login");
        let mut run_b = checkpoint("basic-search");
        first.save(&mut run_a).unwrap();
        second.save(&mut run_b).unwrap();
        first.save(&mut run_a).unwrap();
        first
            .record_transition(StateTransition::new(
                run_a.run_id,
                None,
                "portal_login",
                crate::models::TransitionType::Initial,
            ))
            .unwrap();

        // Each handle sees writes made through the other
        assert!(first.load(run_b.run_id).unwrap().is_some());
        assert_eq!(second.load(run_a.run_id).unwrap().unwrap().sequence, 2);

        let reopened = WorkflowPersistence::new(&store_path).unwrap();
        assert_eq!(reopened.list(None).unwrap().len(), 2);
        assert_eq!(reopened.transitions(run_a.run_id).unwrap().len(), 1);
        assert!(!dir.path().join("runs.json.tmp").exists());
    }

    #[test]
    fn test_cancellation_from_another_handle_is_kept() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("runs.json");
        let driver = WorkflowPersistence::new(&store_path).unwrap();
        let canceller = WorkflowPersistence::new(&store_path).unwrap();

        let mut cp = checkpoint("eligibility-verification");
        driver.save(&mut cp).unwrap();

        let mut cancelled = canceller.load(cp.run_id).unwrap().unwrap();
        cancelled.status = ExecutionStatus::Cancelled;
        canceller.save(&mut cancelled).unwrap();

        // The driver finishes its node and tries to move on
        cp.current_node = "check_eligibility".to_string();
        driver.save(&mut cp).unwrap();

        assert_eq!(cp.status, ExecutionStatus::Cancelled);
        assert_eq!(cp.current_node, "portal_login");
        let stored = driver.load(cp.run_id).unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Cancelled);
        assert_eq!(stored.sequence, 2);
    }

    #[test]
    fn test_json_history_is_capped_per_run() {
        let dir = tempdir().unwrap();
        let persistence = WorkflowPersistence::new(dir.path().join("runs.json")).unwrap();
        let mut busy = checkpoint("single-portal-login");
        let mut quiet = checkpoint("basic-search");
        persistence.save(&mut quiet).unwrap();
        persistence.save(&mut quiet).unwrap();

        for _ in 0..MAX_HISTORY_PER_RUN + 5 {
            persistence.save(&mut busy).unwrap();
        }

        let history = persistence.history(busy.run_id).unwrap();
        assert_eq!(history.len(), MAX_HISTORY_PER_RUN);
        // Oldest entries go first
        assert_eq!(history[0].sequence, 5);
        assert_eq!(persistence.history(quiet.run_id).unwrap().len(), 1);
    }

    #[test]
    fn test_metrics() {
        let store = InMemoryCheckpointStore::new();
        for status in [
            ExecutionStatus::Completed,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Suspended,
        ] {
            let mut cp = checkpoint("single-portal-login");
            cp.status = status;
            store.save(&mut cp).unwrap();
        }
        let mut other = checkpoint("basic-search");
        store.save(&mut other).unwrap();

        let metrics = store.query_metrics(Some("single-portal-login")).unwrap();
        assert_eq!(metrics.run_count, 4);
        assert_eq!(metrics.success_count, 2);
        assert_eq!(metrics.failure_count, 1);
        assert_eq!(metrics.suspended_count, 1);
        assert_eq!(metrics.success_rate(), 50.0);
        assert_eq!(metrics.failure_rate(), 25.0);
    }
}
