//! Tests for checkpoint persistence and resume
//!
//! These simulate the crash/re-run cycle: a job checkpoints partway through
//! encoding, the process dies, and a fresh StateStore over the same temp
//! tree must recover the surviving work and requeue the rest.

use std::fs;

use kestrel_core::planning::segmenter::plan_from_cuts;
use kestrel_core::state::{JobPhase, JobState, StateStore, TempTree};
use kestrel_core::tq::{ChunkResult, ChunkStatus};
use tempfile::tempdir;

fn chunk_on_disk(tree: &TempTree, index: usize, bytes: usize) -> ChunkResult {
    let path = tree.chunk_path(index);
    fs::write(&path, vec![0u8; bytes]).unwrap();
    ChunkResult {
        index,
        final_crf: 24 + index as u32,
        final_score: 77.0,
        output_path: path,
        encoded_bytes: bytes as u64,
        rounds_used: 3,
        status: ChunkStatus::Succeeded,
    }
}

#[test]
fn interrupted_job_resumes_with_surviving_chunks() {
    let dir = tempdir().unwrap();
    let tree = TempTree::create(dir.path().join("job")).unwrap();

    // First run: 10 segments, 3 complete, then the process dies.
    {
        let store = StateStore::new(tree.clone());
        let mut state = JobState::default();
        state.phase = JobPhase::Encoding;
        state.chunk_plan = Some(plan_from_cuts(100.0, &[], 5.0, 15.0, 0.5));
        for index in [0usize, 3, 5] {
            let result = chunk_on_disk(&tree, index, 4096);
            state.predictor.record(index, result.final_crf);
            state.results.insert(index, result);
            store.checkpoint(&state).unwrap();
        }
    }

    // Second run: load, validate, continue.
    let store = StateStore::new(tree.clone());
    let mut resumed = store.load_latest().expect("checkpoint must load");
    assert_eq!(resumed.phase, JobPhase::Encoding);
    assert_eq!(resumed.results.len(), 3);

    let dropped = resumed.validate_results();
    assert!(dropped.is_empty());
    assert_eq!(resumed.predictor.completed_count(), 3);

    let total = resumed.chunk_plan.as_ref().unwrap().len();
    let pending = resumed.pending_segments();
    assert_eq!(pending.len(), total - 3);
    assert!(!pending.contains(&0));
    assert!(!pending.contains(&3));
    assert!(!pending.contains(&5));
}

#[test]
fn tampered_chunks_are_requeued_on_resume() {
    let dir = tempdir().unwrap();
    let tree = TempTree::create(dir.path().join("job")).unwrap();
    let store = StateStore::new(tree.clone());

    let mut state = JobState::default();
    state.phase = JobPhase::Encoding;
    state.chunk_plan = Some(plan_from_cuts(60.0, &[], 5.0, 15.0, 0.5));
    for index in 0..3 {
        let result = chunk_on_disk(&tree, index, 4096);
        state.predictor.record(index, result.final_crf);
        state.results.insert(index, result);
    }
    store.checkpoint(&state).unwrap();

    // Chunk 1 shrinks behind our back; chunk 2 disappears.
    fs::write(tree.chunk_path(1), vec![0u8; 17]).unwrap();
    fs::remove_file(tree.chunk_path(2)).unwrap();

    let mut resumed = store.load_latest().unwrap();
    let dropped = resumed.validate_results();
    assert_eq!(dropped, vec![1, 2]);
    assert_eq!(resumed.results.len(), 1);
    assert_eq!(resumed.predictor.completed_count(), 1);

    let pending = resumed.pending_segments();
    assert!(pending.contains(&1));
    assert!(pending.contains(&2));
    assert!(!pending.contains(&0));
}

#[test]
fn checkpoints_survive_primary_state_corruption() {
    let dir = tempdir().unwrap();
    let tree = TempTree::create(dir.path().join("job")).unwrap();
    let store = StateStore::new(tree.clone());

    let mut state = JobState::default();
    state.phase = JobPhase::Assembling;
    store.checkpoint(&state).unwrap();

    fs::write(tree.state_file(), b"not json at all").unwrap();

    let recovered = store.load_latest().expect("checkpoint fallback");
    assert_eq!(recovered.phase, JobPhase::Assembling);
}

#[test]
fn done_jobs_report_no_pending_work() {
    let dir = tempdir().unwrap();
    let tree = TempTree::create(dir.path().join("job")).unwrap();

    let mut state = JobState::default();
    state.chunk_plan = Some(plan_from_cuts(30.0, &[], 5.0, 15.0, 0.5));
    let total = state.chunk_plan.as_ref().unwrap().len();
    for index in 0..total {
        let result = chunk_on_disk(&tree, index, 2048);
        state.results.insert(index, result);
    }
    assert!(state.encoding_complete());
    assert!(state.pending_segments().is_empty());
}
