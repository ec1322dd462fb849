// ============================================================================
// kestrel-core/src/tq/mod.rs
// ============================================================================
//
// TARGET-QUALITY SEARCH: Per-Segment CRF Probing
//
// Each segment runs an iterative search for the CRF whose perceptual score
// lands inside the target window. Early rounds bisect the current CRF
// bounds; once two or more probes exist the next CRF comes from curve
// interpolation over (score, CRF) history, with the method escalating as
// points accumulate. A cross-segment predictor can pre-narrow the bounds.
//
// Probes encode only a middle slice of long segments; the converged CRF is
// then applied to the full segment. Short segments are probed whole, and
// the winning probe is promoted to the final output directly.
//
// AI-ASSISTANT-INFO: Iterative CRF search against a perceptual quality target

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::analysis::probe::SourceMedia;
use crate::cancel::CancelToken;
use crate::config::profiles::EncodingParams;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::events::{Event, EventDispatcher};
use crate::external::ffmpeg::{encode_video_slice, extract_reference_slice};
use crate::external::process::{run_streaming, CommandSpec};
use crate::external::progress::EncodeProgressParser;
use crate::external::scorer::score_pair;
use crate::planning::segmenter::Segment;
use crate::state::TempTree;

pub mod interpolate;
pub mod predictor;

pub use predictor::CrfPredictor;

use interpolate::{
    akima_interpolate, fritsch_carlson_interpolate, linear_interpolate, pchip_interpolate,
};

// ============================================================================
// SCORE AGGREGATION
// ============================================================================

/// How per-frame scores collapse into one probe score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MetricAggregation {
    Mean,
    /// Percentile in [0, 100]; p25 biases toward the worst quarter.
    Percentile(u8),
}

/// Parse "mean" or "pN" into an aggregation.
pub fn parse_aggregation(value: &str) -> CoreResult<MetricAggregation> {
    let v = value.trim().to_lowercase();
    if v == "mean" {
        return Ok(MetricAggregation::Mean);
    }
    if let Some(n) = v.strip_prefix('p') {
        if let Ok(p) = n.parse::<u8>() {
            if p <= 100 {
                return Ok(MetricAggregation::Percentile(p));
            }
        }
    }
    Err(CoreError::Config(format!(
        "invalid metric aggregation '{}'; expected \"mean\" or \"pN\"",
        value
    )))
}

/// Aggregate per-frame scores. NaN anywhere poisons the result so the NaN
/// policy triggers.
pub fn aggregate_scores(scores: &[f64], aggregation: MetricAggregation) -> f64 {
    if scores.is_empty() || scores.iter().any(|s| s.is_nan()) {
        return f64::NAN;
    }
    match aggregation {
        MetricAggregation::Mean => scores.iter().sum::<f64>() / scores.len() as f64,
        MetricAggregation::Percentile(p) => {
            let mut sorted = scores.to_vec();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let rank = (f64::from(p) / 100.0 * (sorted.len() - 1) as f64).round() as usize;
            sorted[rank]
        }
    }
}

// ============================================================================
// SEARCH STATE
// ============================================================================

/// One completed probe measurement. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Probe {
    pub crf: u32,
    pub score: f64,
    pub per_frame_scores: Vec<f64>,
    pub encoded_size: u64,
}

/// What the search should do after a probe is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStep {
    /// Score inside the target window.
    Converged,
    /// Keep probing.
    Continue,
    /// Round budget spent.
    RoundLimit,
    /// Bounds crossed and no expansion is possible.
    Exhausted,
}

/// Mutable per-segment search state. All mutation goes through
/// [`TQState::advance`]; probes are append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TQState {
    pub search_min: u32,
    pub search_max: u32,
    pub qp_min: u32,
    pub qp_max: u32,
    /// 1-indexed probe round.
    pub round: u32,
    pub max_rounds: u32,
    pub target: f64,
    pub tolerance: f64,
    pub probes: Vec<Probe>,
    pub last_crf: u32,
    expanded: bool,
}

/// Margin applied around a predicted CRF when narrowing the initial bounds.
const PREDICTION_MARGIN: u32 = 5;

/// Bound expansion granted once when the search runs out of room.
const EXPANSION_STEP: u32 = 5;

impl TQState {
    pub fn new(
        target: f64,
        tolerance: f64,
        qp_min: u32,
        qp_max: u32,
        max_rounds: u32,
        predicted_crf: Option<u32>,
    ) -> Self {
        let (search_min, search_max) = match predicted_crf {
            Some(p) => (
                p.saturating_sub(PREDICTION_MARGIN).max(qp_min),
                (p + PREDICTION_MARGIN).min(qp_max),
            ),
            None => (qp_min, qp_max),
        };
        Self {
            search_min,
            search_max,
            qp_min,
            qp_max,
            round: 1,
            max_rounds,
            target,
            tolerance,
            probes: Vec::new(),
            last_crf: search_min,
            expanded: false,
        }
    }

    /// CRF for the next probe.
    ///
    /// Rounds one and two (or fewer than two probes) bisect the bounds.
    /// After that, interpolation over the sorted (score, CRF) history picks
    /// the CRF where the curve crosses the target, escalating from linear
    /// through Fritsch-Carlson and PCHIP to Akima as probes accumulate. The
    /// result is clamped to the current bounds; a failed or degenerate
    /// interpolation falls back to the midpoint.
    pub fn next_crf(&self) -> u32 {
        let midpoint = (self.search_min + self.search_max) / 2;
        if self.round <= 2 || self.probes.len() < 2 {
            return midpoint;
        }

        let mut points: Vec<(f64, f64)> = self
            .probes
            .iter()
            .map(|p| (p.score, f64::from(p.crf)))
            .collect();
        points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        points.dedup_by(|a, b| (a.0 - b.0).abs() < 1e-9);

        let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.1).collect();

        let interpolated = match xs.len() {
            0 | 1 => None,
            2 => linear_interpolate(&xs, &ys, self.target),
            3 => fritsch_carlson_interpolate(&xs, &ys, self.target),
            4 => pchip_interpolate(&xs, &ys, self.target),
            _ => akima_interpolate(&xs, &ys, self.target),
        };

        match interpolated {
            Some(value) if self.search_min <= self.search_max => {
                (value.round() as i64).clamp(i64::from(self.search_min), i64::from(self.search_max))
                    as u32
            }
            _ => midpoint,
        }
    }

    /// Record a probe and update bounds.
    pub fn advance(&mut self, probe: Probe) -> SearchStep {
        self.last_crf = probe.crf;
        let score = probe.score;
        self.probes.push(probe);

        if (score - self.target).abs() <= self.tolerance {
            return SearchStep::Converged;
        }

        let crossed = if score < self.target - self.tolerance {
            // Quality below target: move to lower CRFs.
            if self.last_crf <= self.search_min {
                true
            } else {
                self.search_max = self.last_crf - 1;
                false
            }
        } else {
            // Quality above target: move to higher CRFs.
            if self.last_crf >= self.search_max {
                true
            } else {
                self.search_min = self.last_crf + 1;
                false
            }
        };

        if crossed && !self.try_expand(score < self.target) {
            return SearchStep::Exhausted;
        }

        if self.round >= self.max_rounds {
            return SearchStep::RoundLimit;
        }
        self.round += 1;
        SearchStep::Continue
    }

    /// One-time bound expansion toward the needed direction.
    fn try_expand(&mut self, need_lower_crf: bool) -> bool {
        if self.expanded {
            return false;
        }
        if need_lower_crf {
            if self.search_min <= self.qp_min {
                return false;
            }
            let new_min = self.search_min.saturating_sub(EXPANSION_STEP).max(self.qp_min);
            self.search_max = self.search_min.saturating_sub(1).max(new_min);
            self.search_min = new_min;
        } else {
            if self.search_max >= self.qp_max {
                return false;
            }
            let new_max = (self.search_max + EXPANSION_STEP).min(self.qp_max);
            self.search_min = (self.search_max + 1).min(new_max);
            self.search_max = new_max;
        }
        self.expanded = true;
        true
    }

    /// The recorded probe closest to the target score, ties broken toward
    /// the higher CRF (smaller output).
    pub fn choose_final(&self) -> Option<&Probe> {
        self.probes.iter().min_by(|a, b| {
            let da = (a.score - self.target).abs();
            let db = (b.score - self.target).abs();
            da.partial_cmp(&db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.crf.cmp(&a.crf))
        })
    }
}

// ============================================================================
// CHUNK RESULTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkStatus {
    Succeeded,
    FailedAfterRetries,
}

/// Final outcome of one segment. Created exactly once per segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    pub index: usize,
    pub final_crf: u32,
    pub final_score: f64,
    pub output_path: PathBuf,
    pub encoded_bytes: u64,
    pub rounds_used: u32,
    pub status: ChunkStatus,
}

// ============================================================================
// SEARCH DRIVER
// ============================================================================

/// Everything a worker needs to encode one segment.
pub struct SegmentJob<'a> {
    pub media: &'a SourceMedia,
    pub segment: &'a Segment,
    pub params: &'a EncodingParams,
    pub config: &'a Config,
    pub tree: &'a TempTree,
    pub events: &'a EventDispatcher,
    pub cancel: &'a CancelToken,
}

impl SegmentJob<'_> {
    /// Wall-clock timeout for an encode over `duration` seconds of video:
    /// the configured multiplier over an expected time that scales with how
    /// slow the preset is.
    fn encode_timeout(&self, duration: f64) -> Duration {
        let preset_factor = f64::from(14_u8.saturating_sub(self.params.preset).max(2));
        let expected = duration * preset_factor;
        let secs = (expected * self.config.resources.process_timeout_multiplier).max(120.0);
        Duration::from_secs_f64(secs)
    }

    /// Run an encode command, forwarding progress to the event bus.
    fn run_encode(&self, spec: &CommandSpec, duration: f64) -> CoreResult<()> {
        let mut parser = EncodeProgressParser::new(duration);
        let mut on_line = |line: &str| {
            if let Some(update) = parser.feed(line) {
                let eta = if update.speed > 0.0 {
                    ((duration - update.out_time) / update.speed).max(0.0) as u64
                } else {
                    0
                };
                self.events.emit(Event::EncodingProgress {
                    segment: Some(self.segment.index),
                    percent: update.percent,
                    speed: update.speed,
                    fps: update.fps,
                    eta_seconds: eta,
                });
            }
        };
        run_streaming(
            spec,
            self.cancel,
            Some(self.encode_timeout(duration)),
            Some(&mut on_line),
            None,
        )
        .map_err(|e| self.tag_segment(e))?;
        Ok(())
    }

    /// Rewrite retryable errors to carry this segment's index.
    fn tag_segment(&self, error: CoreError) -> CoreError {
        match error {
            CoreError::RetryableEncode { reason, .. } => CoreError::RetryableEncode {
                segment: self.segment.index,
                reason,
            },
            other => other,
        }
    }

    fn file_size(&self, path: &std::path::Path) -> CoreResult<u64> {
        Ok(std::fs::metadata(path)?.len())
    }
}

/// Geometry of the probe slice for a segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSlice {
    pub start: f64,
    pub duration: f64,
    /// Frames excluded from the front of the score vector.
    pub warmup_frames: usize,
    /// Whether this is a middle-slice sample rather than the full segment.
    pub sampled: bool,
}

/// Compute the probe slice: long segments are probed on a centered sample
/// with a warmup lead-in discarded from scoring, short segments whole.
pub fn probe_slice(segment: &Segment, config: &Config, frame_rate: f64) -> ProbeSlice {
    let video = &config.video;
    if segment.duration >= video.sample_min_chunk {
        let body = video.sample_duration.min(segment.duration);
        let warmup = video.sample_warmup;
        let mid = segment.start + segment.duration / 2.0;
        let start = (mid - (body + warmup) / 2.0).max(segment.start);
        let duration = (body + warmup).min(segment.duration);
        ProbeSlice {
            start,
            duration,
            warmup_frames: (warmup * frame_rate).ceil() as usize,
            sampled: true,
        }
    } else {
        ProbeSlice {
            start: segment.start,
            duration: segment.duration,
            warmup_frames: 0,
            sampled: false,
        }
    }
}

/// Run the target-quality search for one segment and produce its result
/// along with the final search state (persisted for diagnostics).
///
/// `predicted_crf` (from the cross-segment predictor) narrows the initial
/// bounds to +/-5 around the prediction, clamped to the hard QP range.
pub fn search_segment(
    job: &SegmentJob<'_>,
    target: f64,
    tolerance: f64,
    predicted_crf: Option<u32>,
) -> CoreResult<(ChunkResult, TQState)> {
    let config = job.config;
    let segment = job.segment;
    let aggregation = parse_aggregation(&config.video.metric_aggregation)?;

    let mut state = TQState::new(
        target,
        tolerance,
        u32::from(config.video.qp_min),
        u32::from(config.video.qp_max),
        config.video.max_rounds,
        predicted_crf,
    );

    let slice = probe_slice(segment, config, job.media.video.frame_rate);
    debug!(
        "segment {}: probe slice {:.2}s+{:.2}s (sampled: {}), bounds [{}, {}]",
        segment.index, slice.start, slice.duration, slice.sampled, state.search_min, state.search_max
    );

    // The reference slice is shared across rounds.
    let reference = job.tree.reference_path(segment.index);
    let ref_spec = extract_reference_slice(
        &job.media.path,
        &reference,
        slice.start,
        slice.duration,
        job.params,
    );
    run_streaming(
        &ref_spec,
        job.cancel,
        Some(job.encode_timeout(slice.duration)),
        None,
        None,
    )
    .map_err(|e| job.tag_segment(e))?;

    let mut nan_retried = false;
    loop {
        job.cancel.check()?;
        let crf = state.next_crf();
        let probe_path = job.tree.probe_path(segment.index, state.round);

        let spec = encode_video_slice(
            &job.media.path,
            &probe_path,
            Some(slice.start),
            Some(slice.duration),
            crf,
            job.params,
        );
        job.run_encode(&spec, slice.duration)?;
        let encoded_size = job.file_size(&probe_path)?;

        let frame_scores = score_pair(
            &reference,
            &probe_path,
            job.cancel,
            Some(job.encode_timeout(slice.duration)),
        )
        .map_err(|e| job.tag_segment(e))?;
        let scored = if frame_scores.len() > slice.warmup_frames {
            &frame_scores[slice.warmup_frames..]
        } else {
            &frame_scores[..]
        };
        let score = aggregate_scores(scored, aggregation);

        if score.is_nan() {
            if nan_retried {
                return Err(CoreError::RetryableEncode {
                    segment: segment.index,
                    reason: format!("scorer returned NaN twice at crf {}", crf),
                });
            }
            warn!(
                "segment {}: NaN score at crf {}, retrying the round once",
                segment.index, crf
            );
            nan_retried = true;
            continue;
        }

        debug!(
            "segment {}: round {} crf {} -> score {:.2} (target {:.2} +/- {:.2})",
            segment.index, state.round, crf, score, target, tolerance
        );

        let step = state.advance(Probe {
            crf,
            score,
            per_frame_scores: scored.to_vec(),
            encoded_size,
        });
        match step {
            SearchStep::Continue => {}
            SearchStep::Converged => break,
            SearchStep::RoundLimit => {
                info!(
                    "segment {}: round limit reached after {} probes",
                    segment.index,
                    state.probes.len()
                );
                break;
            }
            SearchStep::Exhausted => {
                info!(
                    "segment {}: CRF bounds exhausted after {} probes",
                    segment.index,
                    state.probes.len()
                );
                break;
            }
        }
    }

    let chosen = state
        .choose_final()
        .ok_or_else(|| CoreError::RetryableEncode {
            segment: segment.index,
            reason: "search finished with no usable probes".to_string(),
        })?;
    let (final_crf, final_score) = (chosen.crf, chosen.score);
    let rounds_used = state.probes.len() as u32;

    let output = job.tree.chunk_path(segment.index);
    let encoded_bytes = if slice.sampled {
        // Full segment at the chosen CRF.
        let spec = encode_video_slice(
            &job.media.path,
            &output,
            Some(segment.start),
            Some(segment.duration),
            final_crf,
            job.params,
        );
        job.run_encode(&spec, segment.duration)?;
        job.file_size(&output)?
    } else {
        // The winning probe already encoded the whole segment; find its
        // round and promote the file.
        let winning_round = state
            .probes
            .iter()
            .position(|p| p.crf == final_crf && p.score == final_score)
            .map(|i| i as u32 + 1)
            .unwrap_or(1);
        let probe_file = job.tree.probe_path(segment.index, winning_round);
        std::fs::rename(&probe_file, &output)?;
        final_probe_size(&output)?
    };

    info!(
        "segment {}: crf {} scored {:.2} in {} rounds ({} bytes)",
        segment.index, final_crf, final_score, rounds_used, encoded_bytes
    );

    let result = ChunkResult {
        index: segment.index,
        final_crf,
        final_score,
        output_path: output,
        encoded_bytes,
        rounds_used,
        status: ChunkStatus::Succeeded,
    };
    Ok((result, state))
}

/// Encode a segment at a fixed CRF without any probing (direct-CRF and
/// Dolby Vision passthrough paths, and retried segments past their budget).
pub fn encode_segment_direct(job: &SegmentJob<'_>, crf: u32) -> CoreResult<ChunkResult> {
    let segment = job.segment;
    let output = job.tree.chunk_path(segment.index);
    let whole_file = segment.start == 0.0 && (segment.duration - job.media.duration).abs() < 1e-6;
    let spec = encode_video_slice(
        &job.media.path,
        &output,
        (!whole_file).then_some(segment.start),
        (!whole_file).then_some(segment.duration),
        crf,
        job.params,
    );
    job.run_encode(&spec, segment.duration)?;
    let encoded_bytes = final_probe_size(&output)?;

    Ok(ChunkResult {
        index: segment.index,
        final_crf: crf,
        // No quality measurement on the direct path.
        final_score: 0.0,
        output_path: output,
        encoded_bytes,
        rounds_used: 0,
        status: ChunkStatus::Succeeded,
    })
}

fn final_probe_size(path: &std::path::Path) -> CoreResult<u64> {
    Ok(std::fs::metadata(path)?.len())
}
