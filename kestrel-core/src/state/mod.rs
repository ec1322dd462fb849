// ============================================================================
// kestrel-core/src/state/mod.rs
// ============================================================================
//
// STATE / RECOVERY: Checkpoint Persistence and the Temp Tree
//
// One job owns one temp tree:
//
//   <base>/working/            assembly scratch (concat lists, audio, mux)
//   <base>/segments/           probe encodes and reference slices
//   <base>/encoded/            finished per-segment chunks
//   <base>/logs/               external tool logs
//   <base>/state/state.json    current JobState (atomic rename)
//   <base>/state/checkpoints/  rolling checkpoints, newest five kept
//
// Checkpoints are written with write-to-temp + fsync + rename so a crash at
// any point leaves either the old or the new state, never a torn file. On
// resume the newest readable state wins, chunk results whose files are
// missing or of the wrong size are dropped and requeued, and the predictor
// is rebuilt from the survivors.
//
// AI-ASSISTANT-INFO: Job state persistence, checkpoints and temp-dir lifecycle

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::analysis::classify::ContentClassification;
use crate::analysis::probe::SourceMedia;
use crate::error::{CoreError, CoreResult};
use crate::planning::router::EncodingPlan;
use crate::planning::segmenter::ChunkPlan;
use crate::tq::{ChunkResult, CrfPredictor, TQState};

/// Rolling checkpoint retention.
const MAX_CHECKPOINTS: usize = 5;

// ============================================================================
// TEMP TREE
// ============================================================================

/// Directory layout for one encode job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempTree {
    base: PathBuf,
}

impl TempTree {
    /// Create (or reopen) the tree rooted at `base`.
    pub fn create(base: PathBuf) -> CoreResult<Self> {
        let tree = Self { base };
        for dir in [
            tree.working_dir(),
            tree.segments_dir(),
            tree.encoded_dir(),
            tree.logs_dir(),
            tree.checkpoints_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        Ok(tree)
    }

    /// Conventional per-source location under the configured temp base.
    pub fn for_source(temp_base: &Path, source: &Path) -> CoreResult<Self> {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "job".to_string());
        Self::create(temp_base.join(format!("kestrel-{}", stem)))
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn working_dir(&self) -> PathBuf {
        self.base.join("working")
    }

    pub fn segments_dir(&self) -> PathBuf {
        self.base.join("segments")
    }

    pub fn encoded_dir(&self) -> PathBuf {
        self.base.join("encoded")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.base.join("state")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.state_dir().join("checkpoints")
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_dir().join("state.json")
    }

    /// Probe encode for one search round.
    pub fn probe_path(&self, segment: usize, round: u32) -> PathBuf {
        self.segments_dir()
            .join(format!("seg{:04}_round{:02}.mkv", segment, round))
    }

    /// Lossless reference slice shared by a segment's probes.
    pub fn reference_path(&self, segment: usize) -> PathBuf {
        self.segments_dir().join(format!("seg{:04}_ref.mkv", segment))
    }

    /// Finished chunk output.
    pub fn chunk_path(&self, segment: usize) -> PathBuf {
        self.encoded_dir().join(format!("seg{:04}.mkv", segment))
    }

    /// Remove the whole tree. Called on success unless temp files are kept;
    /// on failure the tree is preserved for diagnostics.
    pub fn remove(&self) -> CoreResult<()> {
        if self.base.exists() {
            fs::remove_dir_all(&self.base)?;
        }
        Ok(())
    }
}

// ============================================================================
// JOB STATE
// ============================================================================

/// Overall pipeline phase, ordered by progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum JobPhase {
    #[default]
    Analyzing,
    Segmenting,
    Encoding,
    Assembling,
    Validating,
    Done,
    Failed,
}

/// Root of persistence: everything needed to resume a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobState {
    pub phase: JobPhase,
    pub source: Option<SourceMedia>,
    pub classification: Option<ContentClassification>,
    pub plan: Option<EncodingPlan>,
    pub chunk_plan: Option<ChunkPlan>,
    /// Final search state per completed segment, for diagnostics.
    pub tq_states: BTreeMap<usize, TQState>,
    /// Completed chunk results by segment index.
    pub results: BTreeMap<usize, ChunkResult>,
    pub predictor: CrfPredictor,
}

impl JobState {
    /// Segment indices still to encode.
    pub fn pending_segments(&self) -> Vec<usize> {
        match &self.chunk_plan {
            Some(plan) => plan
                .segments
                .iter()
                .map(|s| s.index)
                .filter(|i| !self.results.contains_key(i))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn encoding_complete(&self) -> bool {
        self.chunk_plan
            .as_ref()
            .map(|plan| self.results.len() == plan.len())
            .unwrap_or(false)
    }

    /// Drop results whose files are gone or the wrong size, returning the
    /// requeued indices. The predictor is rebuilt from the survivors.
    pub fn validate_results(&mut self) -> Vec<usize> {
        let mut dropped = Vec::new();
        self.results.retain(|&index, result| {
            let valid = fs::metadata(&result.output_path)
                .map(|m| m.len() == result.encoded_bytes && m.len() > 0)
                .unwrap_or(false);
            if !valid {
                warn!(
                    "chunk {} invalid on resume ({}); requeueing",
                    index,
                    result.output_path.display()
                );
                dropped.push(index);
            }
            valid
        });

        let disabled = self.predictor.is_disabled();
        let mut predictor = CrfPredictor::new(disabled);
        for (&index, result) in &self.results {
            predictor.record(index, result.final_crf);
        }
        self.predictor = predictor;

        if !dropped.is_empty() && self.phase > JobPhase::Encoding && self.phase < JobPhase::Done {
            self.phase = JobPhase::Encoding;
        }
        dropped
    }
}

// ============================================================================
// STATE STORE
// ============================================================================

/// Owns the on-disk representation of a [`JobState`].
pub struct StateStore {
    tree: TempTree,
}

impl StateStore {
    pub fn new(tree: TempTree) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &TempTree {
        &self.tree
    }

    /// Persist atomically: temp file, fsync, rename; then roll checkpoints.
    pub fn checkpoint(&self, state: &JobState) -> CoreResult<()> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| CoreError::JsonParse(format!("serializing job state: {}", e)))?;

        let target = self.tree.state_file();
        let tmp = target.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &target)?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let checkpoint = self.tree.checkpoints_dir().join(format!("{}.json", stamp));
        fs::copy(&target, &checkpoint)?;
        self.prune_checkpoints()?;
        debug!("checkpoint written ({} bytes)", json.len());
        Ok(())
    }

    fn prune_checkpoints(&self) -> CoreResult<()> {
        let mut checkpoints: Vec<PathBuf> = fs::read_dir(self.tree.checkpoints_dir())?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .collect();
        // Timestamp names sort chronologically.
        checkpoints.sort();
        while checkpoints.len() > MAX_CHECKPOINTS {
            let oldest = checkpoints.remove(0);
            debug!("pruning checkpoint {}", oldest.display());
            let _ = fs::remove_file(oldest);
        }
        Ok(())
    }

    /// Load the newest readable state: `state.json` first, then checkpoints
    /// newest-first. `None` when nothing persisted survives.
    pub fn load_latest(&self) -> Option<JobState> {
        if let Some(state) = Self::read_state(&self.tree.state_file()) {
            return Some(state);
        }
        let mut checkpoints: Vec<PathBuf> = fs::read_dir(self.tree.checkpoints_dir())
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        checkpoints.sort();
        for checkpoint in checkpoints.iter().rev() {
            if let Some(state) = Self::read_state(checkpoint) {
                info!("recovered state from {}", checkpoint.display());
                return Some(state);
            }
        }
        None
    }

    fn read_state(path: &Path) -> Option<JobState> {
        let data = fs::read(path).ok()?;
        match serde_json::from_slice(&data) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("unreadable state file {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tq::ChunkStatus;
    use tempfile::tempdir;

    fn tree() -> (tempfile::TempDir, TempTree) {
        let dir = tempdir().unwrap();
        let tree = TempTree::create(dir.path().join("job")).unwrap();
        (dir, tree)
    }

    fn result(index: usize, path: PathBuf, bytes: u64) -> ChunkResult {
        ChunkResult {
            index,
            final_crf: 27,
            final_score: 77.2,
            output_path: path,
            encoded_bytes: bytes,
            rounds_used: 3,
            status: ChunkStatus::Succeeded,
        }
    }

    #[test]
    fn tree_layout_is_created() {
        let (_guard, tree) = tree();
        assert!(tree.working_dir().is_dir());
        assert!(tree.segments_dir().is_dir());
        assert!(tree.encoded_dir().is_dir());
        assert!(tree.logs_dir().is_dir());
        assert!(tree.checkpoints_dir().is_dir());
    }

    #[test]
    fn checkpoint_round_trips() {
        let (_guard, tree) = tree();
        let store = StateStore::new(tree);
        let mut state = JobState::default();
        state.phase = JobPhase::Encoding;
        state.predictor.record(0, 27);

        store.checkpoint(&state).unwrap();
        let loaded = store.load_latest().unwrap();
        assert_eq!(loaded.phase, JobPhase::Encoding);
        assert_eq!(loaded.predictor.completed_count(), 1);
    }

    #[test]
    fn checkpoints_roll_at_five() {
        let (_guard, tree) = tree();
        let store = StateStore::new(tree);
        let state = JobState::default();
        for _ in 0..8 {
            store.checkpoint(&state).unwrap();
            // Distinct timestamps for distinct names.
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let count = fs::read_dir(store.tree().checkpoints_dir())
            .unwrap()
            .count();
        assert_eq!(count, MAX_CHECKPOINTS);
    }

    #[test]
    fn corrupt_state_falls_back_to_checkpoint() {
        let (_guard, tree) = tree();
        let store = StateStore::new(tree);
        let mut state = JobState::default();
        state.phase = JobPhase::Assembling;
        store.checkpoint(&state).unwrap();

        // Corrupt the primary state file.
        fs::write(store.tree().state_file(), b"{ truncated").unwrap();
        let loaded = store.load_latest().unwrap();
        assert_eq!(loaded.phase, JobPhase::Assembling);
    }

    #[test]
    fn missing_state_returns_none() {
        let (_guard, tree) = tree();
        let store = StateStore::new(tree);
        assert!(store.load_latest().is_none());
    }

    #[test]
    fn validate_results_drops_missing_and_mismatched_files() {
        let (_guard, tree) = tree();
        let good = tree.chunk_path(0);
        fs::write(&good, vec![0u8; 2048]).unwrap();
        let resized = tree.chunk_path(1);
        fs::write(&resized, vec![0u8; 100]).unwrap();

        let mut state = JobState::default();
        state.results.insert(0, result(0, good, 2048));
        state.results.insert(1, result(1, resized, 2048)); // recorded 2048, actual 100
        state.results.insert(2, result(2, tree.chunk_path(2), 2048)); // missing

        let dropped = state.validate_results();
        assert_eq!(dropped, vec![1, 2]);
        assert!(state.results.contains_key(&0));
        assert_eq!(state.results.len(), 1);
        // Predictor rebuilt from the survivor only.
        assert_eq!(state.predictor.completed_count(), 1);
    }

    #[test]
    fn pending_segments_reflect_results() {
        use crate::planning::segmenter::plan_from_cuts;
        let mut state = JobState::default();
        state.chunk_plan = Some(plan_from_cuts(45.0, &[], 5.0, 15.0, 0.5));
        assert_eq!(state.pending_segments(), vec![0, 1, 2]);

        let (_guard, tree) = tree();
        let path = tree.chunk_path(1);
        fs::write(&path, vec![0u8; 2048]).unwrap();
        state.results.insert(1, result(1, path, 2048));
        assert_eq!(state.pending_segments(), vec![0, 2]);
        assert!(!state.encoding_complete());
    }
}
