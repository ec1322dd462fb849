//! Scene-aligned source segmentation.
//!
//! Scene-change candidates come from one ffmpeg pass over the source. A
//! greedy walk turns them into segments bounded by the configured length
//! window: the first candidate inside `[min_len, max_len]` of the previous
//! boundary wins; when no candidate lands in the window a boundary is forced
//! at `max_len`. Segments tile the source exactly, and the final remainder
//! merges backward when it would come out shorter than `min_len`.

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::analysis::probe::SourceMedia;
use crate::cancel::CancelToken;
use crate::config::SceneDetectionConfig;
use crate::error::{CoreError, CoreResult};
use crate::external::ffmpeg::FfmpegCommandBuilder;
use crate::external::process::run_streaming;

static PTS_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"pts_time:(\d+(?:\.\d+)?)").expect("valid regex"));

/// One independently encodable slice of the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    /// Start offset in seconds.
    pub start: f64,
    /// Length in seconds.
    pub duration: f64,
    /// Whether the boundary beginning this segment matched a detected scene
    /// cut (within the configured tolerance). The first segment counts as a
    /// cut boundary.
    pub boundary_is_scene_cut: bool,
}

impl Segment {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Ordered segment list tiling `[0, source duration)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub segments: Vec<Segment>,
    pub source_duration: f64,
}

impl ChunkPlan {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Verify the tiling invariants: boundaries strictly increasing, no gaps
    /// or overlap, total duration matching the source within one frame.
    pub fn validate(&self, frame_rate: f64) -> CoreResult<()> {
        let frame = 1.0 / frame_rate.max(1.0);
        let mut expected_start = 0.0;
        for (i, segment) in self.segments.iter().enumerate() {
            if segment.index != i {
                return Err(CoreError::Validation(format!(
                    "segment {} carries index {}",
                    i, segment.index
                )));
            }
            if (segment.start - expected_start).abs() > frame {
                return Err(CoreError::Validation(format!(
                    "segment {} starts at {:.3}, expected {:.3}",
                    i, segment.start, expected_start
                )));
            }
            if segment.duration <= 0.0 {
                return Err(CoreError::Validation(format!(
                    "segment {} has non-positive duration",
                    i
                )));
            }
            expected_start = segment.end();
        }
        if (expected_start - self.source_duration).abs() > frame {
            return Err(CoreError::Validation(format!(
                "segments cover {:.3}s of a {:.3}s source",
                expected_start, self.source_duration
            )));
        }
        Ok(())
    }
}

/// Detect scene cuts and build the chunk plan for a source.
pub fn build_chunk_plan(
    media: &SourceMedia,
    config: &SceneDetectionConfig,
    is_hdr: bool,
    cancel: &CancelToken,
) -> CoreResult<ChunkPlan> {
    let threshold = if is_hdr {
        config.hdr_scene_threshold
    } else {
        config.scene_threshold
    };

    let cuts = match detect_scene_cuts(media, threshold, cancel) {
        Ok(cuts) => cuts,
        Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
        Err(e) => {
            warn!("scene detection failed: {}. Using uniform partition.", e);
            Vec::new()
        }
    };
    if cuts.is_empty() {
        info!("No scene cuts found; partitioning uniformly at max length");
    } else {
        debug!("{} scene-cut candidates", cuts.len());
    }

    let plan = plan_from_cuts(
        media.duration,
        &cuts,
        config.min_segment_length,
        config.max_segment_length,
        config.scene_tolerance,
    );
    plan.validate(media.video.frame_rate)?;
    info!(
        "Chunk plan: {} segments over {:.1}s",
        plan.len(),
        media.duration
    );
    Ok(plan)
}

/// One ffmpeg pass with the scene-select filter; showinfo prints the
/// selected frames' timestamps on stderr.
fn detect_scene_cuts(
    media: &SourceMedia,
    threshold: f32,
    cancel: &CancelToken,
) -> CoreResult<Vec<f64>> {
    let filter = format!("select='gte(scene,{})',showinfo", threshold / 100.0);
    let spec = FfmpegCommandBuilder::new()
        .input(&media.path)
        .video_filter(&filter)
        .output_null();

    let mut cuts = Vec::new();
    let mut collect = |line: &str| {
        if let Some(caps) = PTS_TIME_RE.captures(line) {
            if let Ok(ts) = caps[1].parse::<f64>() {
                cuts.push(ts);
            }
        }
    };
    run_streaming(&spec, cancel, None, None, Some(&mut collect))?;

    cuts.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    cuts.dedup_by(|a, b| (*a - *b).abs() < 1e-3);
    Ok(cuts)
}

/// Pure greedy boundary walk over sorted cut candidates.
pub fn plan_from_cuts(
    duration: f64,
    cuts: &[f64],
    min_len: f64,
    max_len: f64,
    tolerance: f64,
) -> ChunkPlan {
    let mut segments: Vec<Segment> = Vec::new();
    let mut last = 0.0_f64;

    let near_cut = |t: f64| cuts.iter().any(|&c| (c - t).abs() <= tolerance);

    while duration - last > max_len {
        // First candidate inside the window wins.
        let boundary = cuts
            .iter()
            .copied()
            .find(|&c| c - last >= min_len && c - last <= max_len)
            .unwrap_or(last + max_len);
        segments.push(Segment {
            index: segments.len(),
            start: last,
            duration: boundary - last,
            boundary_is_scene_cut: segments.is_empty() || near_cut(last),
        });
        last = boundary;
    }

    // Final segment absorbs the remainder.
    let remainder = duration - last;
    if remainder > 0.0 {
        if remainder < min_len && !segments.is_empty() {
            // Too short to stand alone; merge backward.
            let previous = segments.last_mut().expect("non-empty");
            previous.duration += remainder;
        } else {
            segments.push(Segment {
                index: segments.len(),
                start: last,
                duration: remainder,
                boundary_is_scene_cut: segments.is_empty() || near_cut(last),
            });
        }
    }

    ChunkPlan {
        segments,
        source_duration: duration,
    }
}
