// ============================================================================
// kestrel-core/src/scheduler/mod.rs
// ============================================================================
//
// CHUNK SCHEDULER: Worker Pool and Admission Control
//
// Segments are dispatched to a pool of OS threads. Workers pull indices
// from a shared queue (preferring segments adjacent to completed ones, so
// the CRF predictor stays warm), acquire resolution-weighted memory tokens,
// run the search or direct encode, and report completions over a channel.
// A single coordinator thread applies completions to the job state, updates
// the predictor and writes a checkpoint after every segment.
//
// Retry policy: retryable failures requeue the segment up to the configured
// budget; the final attempt runs with the target score reduced by
// force_quality_score. Anything still failing is fatal for the job. A
// cancel stops dispatch, signals in-flight workers and persists state
// before returning.
//
// AI-ASSISTANT-INFO: Worker pool, memory admission, retry and completion ordering

use crossbeam_channel::unbounded;
use log::{debug, info, warn};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use crate::analysis::classify::ContentClassification;
use crate::analysis::probe::SourceMedia;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::events::{Event, EventDispatcher};
use crate::planning::router::{EncodingPlan, PlanMode};
use crate::planning::segmenter::ChunkPlan;
use crate::state::{JobState, StateStore};
use crate::tq::{
    encode_segment_direct, search_segment, ChunkResult, CrfPredictor, SegmentJob, TQState,
};

pub mod memory;

pub use memory::{MemoryTokens, TokenGuard};

/// Delay before requeueing a failed segment, to let transient contention
/// clear.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

// ============================================================================
// WORK QUEUE
// ============================================================================

/// Pending segment indices with per-segment attempt counts.
#[derive(Debug, Default)]
struct WorkQueue {
    pending: Vec<(usize, u32)>,
}

impl WorkQueue {
    fn new(indices: &[usize]) -> Self {
        Self {
            pending: indices.iter().map(|&i| (i, 0)).collect(),
        }
    }

    /// Pop the next segment: one with a completed neighbor when available
    /// (to warm the predictor), otherwise the lowest pending index.
    fn pick(&mut self, predictor: &CrfPredictor) -> Option<(usize, u32)> {
        if self.pending.is_empty() {
            return None;
        }
        let position = self
            .pending
            .iter()
            .position(|&(index, _)| predictor.has_adjacent_completion(index))
            .unwrap_or(0);
        Some(self.pending.remove(position))
    }

    fn requeue(&mut self, index: usize, attempt: u32) {
        self.pending.push((index, attempt));
    }

    fn len(&self) -> usize {
        self.pending.len()
    }
}

// ============================================================================
// WORKER MESSAGES
// ============================================================================

enum WorkerMessage {
    Completed {
        result: ChunkResult,
        tq_state: Option<TQState>,
    },
    Fatal {
        index: usize,
        error: CoreError,
    },
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Encode every pending segment of the plan, resuming from whatever results
/// `state` already holds. On return the state has been checkpointed.
pub fn encode_chunks(
    media: &SourceMedia,
    classification: &ContentClassification,
    plan: &EncodingPlan,
    config: &Config,
    store: &StateStore,
    state: &mut JobState,
    events: &EventDispatcher,
    cancel: &CancelToken,
) -> CoreResult<()> {
    let chunk_plan: ChunkPlan = state
        .chunk_plan
        .clone()
        .ok_or_else(|| CoreError::Config("scheduler invoked without a chunk plan".to_string()))?;
    let pending = state.pending_segments();
    let total = chunk_plan.len();

    if pending.is_empty() {
        info!("All {} segments already encoded", total);
        return Ok(());
    }

    events.emit(Event::EncodingStarted {
        total_segments: total,
    });

    let workers = config.worker_count().min(pending.len()).max(1);
    let stagger = Duration::from_secs_f64(config.resources.task_stagger_delay.max(0.0));
    let tokens = MemoryTokens::from_config(&config.resources);
    let token_weight = classification.tier.memory_tokens();
    info!(
        "Dispatching {} pending segments across {} workers ({} tokens/job)",
        pending.len(),
        workers,
        token_weight
    );

    let queue = Mutex::new(WorkQueue::new(&pending));
    let predictor = RwLock::new(state.predictor.clone());
    let (tx, rx) = unbounded::<WorkerMessage>();

    std::thread::scope(|scope| {
        for worker_id in 0..workers {
            let tx = tx.clone();
            let queue = &queue;
            let predictor = &predictor;
            let tokens = &tokens;
            let chunk_plan = &chunk_plan;
            scope.spawn(move || {
                // Staggered startup avoids a thundering herd of source reads.
                std::thread::sleep(stagger * worker_id as u32);
                worker_loop(
                    worker_id,
                    media,
                    plan,
                    config,
                    store,
                    chunk_plan,
                    queue,
                    predictor,
                    tokens,
                    token_weight,
                    events,
                    cancel,
                    &tx,
                );
            });
        }
        drop(tx);

        // Coordinator: the single writer for job state.
        let mut fatal: Option<CoreError> = None;
        for message in rx {
            match message {
                WorkerMessage::Completed { result, tq_state } => {
                    let index = result.index;
                    if plan.mode.is_chunked() {
                        predictor.write().unwrap().record(index, result.final_crf);
                    }
                    if let Some(tq) = tq_state {
                        state.tq_states.insert(index, tq);
                    }
                    state.results.insert(index, result);
                    state.predictor = predictor.read().unwrap().clone();
                    if let Err(e) = store.checkpoint(state) {
                        warn!("checkpoint after segment {} failed: {}", index, e);
                    }
                    let completed = state.results.len();
                    events.emit(Event::StageProgress {
                        stage: "encoding".to_string(),
                        percent: completed as f64 / total as f64 * 100.0,
                        message: format!("{}/{} segments", completed, total),
                        eta_seconds: None,
                    });
                }
                WorkerMessage::Fatal { index, error } => {
                    warn!("segment {} failed permanently: {}", index, error);
                    if fatal.is_none() {
                        fatal = Some(error);
                    }
                    // Stop dispatch and wind down in-flight workers.
                    cancel.cancel();
                }
            }
        }

        state.predictor = predictor.read().unwrap().clone();
        if let Err(e) = store.checkpoint(state) {
            warn!("final scheduler checkpoint failed: {}", e);
        }

        if let Some(error) = fatal {
            return Err(error);
        }
        cancel.check()?;
        Ok(())
    })
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    worker_id: usize,
    media: &SourceMedia,
    plan: &EncodingPlan,
    config: &Config,
    store: &StateStore,
    chunk_plan: &ChunkPlan,
    queue: &Mutex<WorkQueue>,
    predictor: &RwLock<CrfPredictor>,
    tokens: &MemoryTokens,
    token_weight: usize,
    events: &EventDispatcher,
    cancel: &CancelToken,
    tx: &crossbeam_channel::Sender<WorkerMessage>,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let next = {
            let mut queue = queue.lock().unwrap();
            let predictor = predictor.read().unwrap();
            queue.pick(&predictor)
        };
        let Some((index, attempt)) = next else {
            debug!("worker {}: queue drained", worker_id);
            return;
        };

        // Memory admission; a cancel while waiting just ends the worker.
        let _guard = match tokens.acquire(token_weight, cancel) {
            Ok(guard) => guard,
            Err(_) => return,
        };

        let segment = &chunk_plan.segments[index];
        let job = SegmentJob {
            media,
            segment,
            params: &plan.params,
            config,
            tree: store.tree(),
            events,
            cancel,
        };

        let outcome = run_attempt(&job, plan, config, predictor, index, attempt);
        match outcome {
            Ok((result, tq_state)) => {
                if result.encoded_bytes < config.validation.min_chunk_bytes {
                    let error = CoreError::RetryableEncode {
                        segment: index,
                        reason: format!(
                            "chunk output is only {} bytes",
                            result.encoded_bytes
                        ),
                    };
                    handle_failure(
                        worker_id, index, attempt, error, config, queue, tx, cancel,
                    );
                    continue;
                }
                if tx.send(WorkerMessage::Completed { result, tq_state }).is_err() {
                    return;
                }
            }
            Err(CoreError::Cancelled) => return,
            Err(error) => {
                handle_failure(worker_id, index, attempt, error, config, queue, tx, cancel);
            }
        }
    }
}

/// One encode attempt for a segment under the plan's mode. The final retry
/// of a chunked segment runs with a reduced target.
fn run_attempt(
    job: &SegmentJob<'_>,
    plan: &EncodingPlan,
    config: &Config,
    predictor: &RwLock<CrfPredictor>,
    index: usize,
    attempt: u32,
) -> CoreResult<(ChunkResult, Option<TQState>)> {
    match plan.mode {
        PlanMode::ChunkedTargetQuality {
            target_score,
            score_tolerance,
        } => {
            let target = if attempt >= config.resources.max_retries && attempt > 0 {
                let reduced = target_score - config.video.force_quality_score;
                info!(
                    "segment {}: final attempt with reduced target {:.2}",
                    index, reduced
                );
                reduced
            } else {
                target_score
            };
            let predicted = predictor.read().unwrap().predict(index);
            let (result, tq) = search_segment(job, target, score_tolerance, predicted)?;
            Ok((result, Some(tq)))
        }
        PlanMode::DirectCrf { crf } | PlanMode::DolbyVisionPassthrough { crf } => {
            let result = encode_segment_direct(job, crf)?;
            Ok((result, None))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_failure(
    worker_id: usize,
    index: usize,
    attempt: u32,
    error: CoreError,
    config: &Config,
    queue: &Mutex<WorkQueue>,
    tx: &crossbeam_channel::Sender<WorkerMessage>,
    cancel: &CancelToken,
) {
    let max_retries = config.resources.max_retries;
    if error.is_retryable() && attempt < max_retries && !cancel.is_cancelled() {
        warn!(
            "worker {}: segment {} attempt {} failed ({}); requeueing",
            worker_id,
            index,
            attempt + 1,
            error
        );
        std::thread::sleep(RETRY_BACKOFF);
        queue.lock().unwrap().requeue(index, attempt + 1);
    } else {
        let fatal = if error.is_retryable() {
            CoreError::SegmentFailed {
                segment: index,
                attempts: attempt + 1,
                reason: error.to_string(),
            }
        } else {
            error
        };
        let _ = tx.send(WorkerMessage::Fatal {
            index,
            error: fatal,
        });
    }
}
