// ============================================================================
// kestrel-core/src/pipeline.rs
// ============================================================================
//
// PIPELINE: Per-File Orchestration
//
// The coordinator for one input file: analyze -> route -> segment ->
// schedule -> assemble -> validate, with a checkpoint after every phase
// transition and a resume path that picks up from the earliest incomplete
// phase. Batch processing wraps the single-file pipeline with aggregate
// events.
//
// AI-ASSISTANT-INFO: Job orchestration across analysis, encoding and assembly

use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::analysis;
use crate::assembly;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::events::{Event, EventDispatcher};
use crate::external::check_required_tools;
use crate::notifications::{Notification, NtfySender};
use crate::planning::router::route;
use crate::planning::segmenter::{build_chunk_plan, ChunkPlan, Segment};
use crate::scheduler::encode_chunks;
use crate::state::{JobPhase, JobState, StateStore, TempTree};
use crate::tq::ChunkResult;
use crate::util::size_reduction_percent;

/// Statistics for one finished file.
#[derive(Debug, Clone)]
pub struct EncodeOutcome {
    pub filename: String,
    pub input_size: u64,
    pub output_size: u64,
    pub wall_seconds: u64,
    pub validation_passed: bool,
}

/// Emit the one-shot hardware description event.
pub fn emit_hardware_event(events: &EventDispatcher) {
    let mut system = sysinfo::System::new_all();
    system.refresh_all();
    events.emit(Event::Hardware {
        hostname: sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string()),
        os: sysinfo::System::long_os_version().unwrap_or_else(|| "unknown".to_string()),
        cpu: system
            .cpus()
            .first()
            .map(|c| c.brand().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        memory: crate::util::format_bytes(system.total_memory()),
    });
}

/// Encode one file end to end. Resumes from a previous run's checkpoint
/// when one is present under the temp tree.
pub fn encode_file(
    input: &Path,
    output: &Path,
    config: &Config,
    events: &EventDispatcher,
    cancel: &CancelToken,
    ntfy: Option<&NtfySender>,
) -> CoreResult<EncodeOutcome> {
    check_required_tools()?;
    let started = Instant::now();

    let temp_base = config
        .directories
        .temp_dir
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    let tree = TempTree::for_source(&temp_base, input)?;
    let store = StateStore::new(tree.clone());

    let mut state = match store.load_latest() {
        Some(mut resumed) => {
            let requeued = resumed.validate_results();
            info!(
                "resuming from phase {:?} ({} chunks kept, {} requeued)",
                resumed.phase,
                resumed.results.len(),
                requeued.len()
            );
            resumed
        }
        None => JobState::default(),
    };

    let result = run_phases(
        input, output, config, events, cancel, &store, &mut state, started,
    );

    match &result {
        Ok(outcome) => {
            state.phase = JobPhase::Done;
            let _ = store.checkpoint(&state);
            if config.directories.keep_temp_files {
                info!("keeping temp tree at {}", tree.base().display());
            } else if let Err(e) = tree.remove() {
                warn!("temp cleanup failed: {}", e);
            }
            if let Some(sender) = ntfy {
                sender.send_best_effort(&Notification::EncodeComplete {
                    filename: outcome.filename.clone(),
                    input_size: outcome.input_size,
                    output_size: outcome.output_size,
                });
            }
        }
        Err(CoreError::Cancelled) => {
            // State was checkpointed on the way out; keep the tree for the
            // re-run.
            info!("cancelled; temp tree preserved at {}", tree.base().display());
        }
        Err(error) => {
            let failed_phase = state.phase;
            state.phase = JobPhase::Failed;
            let _ = store.checkpoint(&state);
            events.emit(Event::Error {
                title: "Encoding failed".to_string(),
                message: error.to_string(),
                context: Some(format!(
                    "phase: {:?}, input: {}",
                    failed_phase,
                    input.display()
                )),
                suggestion: error.suggestion().map(str::to_string),
            });
            if let Some(sender) = ntfy {
                sender.send_best_effort(&Notification::EncodeError {
                    filename: input
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    message: error.to_string(),
                });
            }
            info!("temp tree preserved at {}", tree.base().display());
        }
    }

    result
}

#[allow(clippy::too_many_arguments)]
fn run_phases(
    input: &Path,
    output: &Path,
    config: &Config,
    events: &EventDispatcher,
    cancel: &CancelToken,
    store: &StateStore,
    state: &mut JobState,
    started: Instant,
) -> CoreResult<EncodeOutcome> {
    // ---- Analyzing ----
    if state.source.is_none() || state.classification.is_none() {
        state.phase = JobPhase::Analyzing;
        let (media, classification) = analysis::analyze(input, config, events, cancel)?;
        events.emit(Event::Initialization {
            input_file: input.display().to_string(),
            output_file: output.display().to_string(),
            duration_secs: media.duration,
            resolution: format!("{}x{}", media.video.width, media.video.height),
            tier: classification.tier.as_str().to_string(),
            dynamic_range: if classification.is_dolby_vision() {
                "Dolby Vision".to_string()
            } else if classification.is_hdr() {
                "HDR".to_string()
            } else {
                "SDR".to_string()
            },
            audio_description: assembly::audio::describe_streams(&media.audio),
        });
        state.source = Some(media);
        state.classification = Some(classification);
        store.checkpoint(state)?;
    }
    let media = state.source.clone().expect("analyzed above");
    let classification = state.classification.clone().expect("analyzed above");

    // ---- Routing & Segmenting ----
    if state.plan.is_none() || state.chunk_plan.is_none() {
        state.phase = JobPhase::Segmenting;
        let plan = route(&media, &classification, config);
        info!("selected encoding path: {}", plan.mode.name());

        let chunk_plan = if plan.mode.is_chunked() {
            build_chunk_plan(
                &media,
                &config.scene_detection,
                classification.is_hdr(),
                cancel,
            )?
        } else {
            // Direct paths encode the whole source as a single span.
            ChunkPlan {
                segments: vec![Segment {
                    index: 0,
                    start: 0.0,
                    duration: media.duration,
                    boundary_is_scene_cut: true,
                }],
                source_duration: media.duration,
            }
        };
        state.plan = Some(plan);
        state.chunk_plan = Some(chunk_plan);
        state.predictor = crate::tq::CrfPredictor::new(config.video.disable_prediction);
        store.checkpoint(state)?;
    }
    let plan = state.plan.clone().expect("routed above");

    events.emit(Event::EncodingConfig {
        encoder: "libsvtav1".to_string(),
        preset: plan.params.preset,
        mode: plan.mode.name().to_string(),
        pixel_format: plan.params.pix_fmt.clone(),
        svt_params: plan.params.svt_params.clone(),
        film_grain: plan.params.film_grain,
        audio_codec: "libopus".to_string(),
    });

    // ---- Encoding ----
    if !state.encoding_complete() {
        state.phase = JobPhase::Encoding;
        store.checkpoint(state)?;
        encode_chunks(
            &media,
            &classification,
            &plan,
            config,
            store,
            state,
            events,
            cancel,
        )?;
    }

    // ---- Assembling ----
    state.phase = JobPhase::Assembling;
    store.checkpoint(state)?;
    let results: Vec<ChunkResult> = state.results.values().cloned().collect();
    assembly::assemble(&media, &results, output, config, store.tree(), events, cancel)?;

    // ---- Validating ----
    state.phase = JobPhase::Validating;
    store.checkpoint(state)?;
    let steps = assembly::validate_output(output, &media, &config.validation)?;
    let passed = steps.iter().all(|s| s.passed);
    events.emit(Event::ValidationComplete {
        passed,
        steps: steps.clone(),
    });
    assembly::validation::require_all_passed(&steps)?;

    let output_size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
    let wall_seconds = started.elapsed().as_secs();
    events.emit(Event::EncodingComplete {
        input_file: input.display().to_string(),
        output_file: output.display().to_string(),
        original_size: media.size_bytes,
        encoded_size: output_size,
        total_seconds: wall_seconds,
        size_reduction_percent: size_reduction_percent(media.size_bytes, output_size),
    });

    Ok(EncodeOutcome {
        filename: input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        input_size: media.size_bytes,
        output_size,
        wall_seconds,
        validation_passed: passed,
    })
}

/// Output path for one batch input: same stem, `.mkv`, in `output_dir`.
pub fn batch_output_path(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output_dir.join(format!("{}.mkv", stem))
}

/// Encode a list of files, emitting batch lifecycle events around the
/// per-file pipeline. A failed file fails the batch; cancellation stops at
/// the current file.
pub fn encode_batch(
    inputs: &[PathBuf],
    output_dir: &Path,
    config: &Config,
    events: &EventDispatcher,
    cancel: &CancelToken,
    ntfy: Option<&NtfySender>,
) -> CoreResult<Vec<EncodeOutcome>> {
    let started = Instant::now();
    std::fs::create_dir_all(output_dir)?;

    events.emit(Event::BatchStarted {
        total_files: inputs.len(),
        file_list: inputs
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
    });

    let mut outcomes = Vec::new();
    for (i, input) in inputs.iter().enumerate() {
        cancel.check()?;
        events.emit(Event::FileProgress {
            current_file: i + 1,
            total_files: inputs.len(),
            filename: input.display().to_string(),
        });
        let output = batch_output_path(input, output_dir);
        let outcome = encode_file(input, &output, config, events, cancel, ntfy)?;
        outcomes.push(outcome);
    }

    events.emit(Event::BatchComplete {
        successful_count: outcomes.len(),
        total_files: inputs.len(),
        total_original_size: outcomes.iter().map(|o| o.input_size).sum(),
        total_encoded_size: outcomes.iter().map(|o| o.output_size).sum(),
        total_seconds: started.elapsed().as_secs(),
    });
    if let Some(sender) = ntfy {
        sender.send_best_effort(&Notification::BatchComplete {
            successful: outcomes.len(),
            total: inputs.len(),
        });
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_output_paths_keep_the_stem() {
        assert_eq!(
            batch_output_path(Path::new("/in/Movie.2019.mkv"), Path::new("/out")),
            PathBuf::from("/out/Movie.2019.mkv")
        );
        assert_eq!(
            batch_output_path(Path::new("episode.mp4"), Path::new("out")),
            PathBuf::from("out/episode.mkv")
        );
    }
}
