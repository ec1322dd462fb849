// ============================================================================
// kestrel-core/src/analysis/grain/mod.rs
// ============================================================================
//
// GRAIN ANALYSIS: Comparative Denoise Testing
//
// Grain level is estimated by encoding short samples of the source at each
// predefined denoise strength and comparing output sizes. The four phases:
//
//   1. Sample extraction: an odd number of evenly spaced sample windows
//      inside the 15%-85% duration band.
//   2. Baseline sweep: each sample is encoded with no denoising and with
//      every predefined hqdn3d level; output sizes are recorded.
//   3. Knee-point per sample, with adaptive refinement: when the per-sample
//      estimates disagree enough, interpolated hqdn3d strengths between the
//      neighboring levels are tested and the knee-point rerun over the
//      combined result set.
//   4. Aggregation: the median of the per-sample estimates is the result.
//
// AI-ASSISTANT-INFO: Grain level detection via comparative denoise encodes

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::analysis::probe::SourceMedia;
use crate::cancel::CancelToken;
use crate::config::{Config, GrainSynthTable};
use crate::error::{CoreError, CoreResult};
use crate::external::ffmpeg::FfmpegCommandBuilder;
use crate::external::process::run_streaming;

mod knee;
mod refine;

pub use knee::knee_point_strength;

// ============================================================================
// GRAIN LEVELS
// ============================================================================

/// Detected grain level, ordered from cleanest to grainiest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum GrainLevel {
    /// No visible grain; no filtering, no synthesis.
    #[default]
    VeryClean,
    /// Barely noticeable grain.
    VeryLight,
    /// Light grain.
    Light,
    /// Clearly visible grain.
    Visible,
    /// Medium grain with temporal fluctuation.
    Medium,
}

/// All levels in strength order, used for indexing and iteration.
pub const ALL_LEVELS: [GrainLevel; 5] = [
    GrainLevel::VeryClean,
    GrainLevel::VeryLight,
    GrainLevel::Light,
    GrainLevel::Visible,
    GrainLevel::Medium,
];

impl GrainLevel {
    /// Numeric denoise strength (0.0 = none, 4.0 = strongest predefined).
    pub fn strength(&self) -> f64 {
        match self {
            Self::VeryClean => 0.0,
            Self::VeryLight => 1.0,
            Self::Light => 2.0,
            Self::Visible => 3.0,
            Self::Medium => 4.0,
        }
    }

    /// hqdn3d parameters for this level; `None` means no filter.
    pub fn hqdn3d_params(&self) -> Option<&'static str> {
        match self {
            Self::VeryClean => None,
            Self::VeryLight => Some("0.5:0.3:3:3"),
            Self::Light => Some("1:0.7:4:4"),
            Self::Visible => Some("1.5:1.0:6:6"),
            Self::Medium => Some("2:1.3:8:8"),
        }
    }

    /// Film-grain synthesis strength from the configured table.
    pub fn synth_strength(&self, table: &GrainSynthTable) -> u8 {
        match self {
            Self::VeryClean => table.very_clean,
            Self::VeryLight => table.very_light,
            Self::Light => table.light,
            Self::Visible => table.visible,
            Self::Medium => table.medium,
        }
    }

    /// Nearest level for a continuous strength value.
    pub fn from_strength(strength: f64) -> Self {
        let index = strength.round().clamp(0.0, 4.0) as usize;
        ALL_LEVELS[index]
    }
}

// ============================================================================
// SAMPLING
// ============================================================================

/// Encoder settings for analysis encodes: speed matters more than fidelity,
/// the comparison is size against size at identical settings.
const ANALYSIS_PRESET: u8 = 10;
const ANALYSIS_CRF: u32 = 30;

/// Number of samples: one per ten minutes, clamped to [3, 9], odd.
pub fn sample_count(duration: f64) -> usize {
    let n = (duration / 600.0).ceil().clamp(3.0, 9.0) as usize;
    if n % 2 == 0 { n + 1 } else { n }
}

/// Evenly spaced sample start times inside the 15%-85% duration window.
pub fn sample_positions(duration: f64, count: usize, sample_len: f64) -> Vec<f64> {
    let window_start = duration * 0.15;
    let window_end = (duration * 0.85 - sample_len).max(window_start);
    let span = window_end - window_start;
    (0..count)
        .map(|i| {
            if count == 1 {
                window_start + span / 2.0
            } else {
                window_start + span * i as f64 / (count - 1) as f64
            }
        })
        .collect()
}

/// One completed analysis encode: denoise strength and resulting size.
#[derive(Debug, Clone, Copy)]
pub struct DenoiseResult {
    pub strength: f64,
    pub size: u64,
}

// ============================================================================
// ANALYSIS
// ============================================================================

/// Estimate the source's grain level. Requires the denoise switch; callers
/// gate on the profile.
pub fn analyze_grain(
    media: &SourceMedia,
    config: &Config,
    cancel: &CancelToken,
) -> CoreResult<GrainLevel> {
    let sample_len = config.video.grain_sample_duration;
    let count = sample_count(media.duration);
    let positions = sample_positions(media.duration, count, sample_len);
    info!(
        "Grain analysis: {} samples of {:.0}s each",
        count, sample_len
    );

    let temp = tempfile::Builder::new()
        .prefix("grain_analysis_")
        .tempdir_in(
            config
                .directories
                .temp_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        )?;

    // Phase 1+2: per-sample baseline sweep and knee-point estimate, samples
    // fanned out across the rayon pool.
    let per_sample: Vec<CoreResult<(Vec<DenoiseResult>, u64, GrainLevel)>> = positions
        .par_iter()
        .enumerate()
        .map(|(sample_idx, &start)| {
            cancel.check()?;
            let mut results = Vec::new();
            let mut baseline = 0u64;
            for level in ALL_LEVELS {
                let size = encode_analysis_sample(
                    &media.path,
                    temp.path(),
                    sample_idx,
                    start,
                    sample_len,
                    level.hqdn3d_params(),
                    cancel,
                )?;
                if level == GrainLevel::VeryClean {
                    baseline = size;
                }
                results.push(DenoiseResult {
                    strength: level.strength(),
                    size,
                });
            }
            let estimate = GrainLevel::from_strength(knee_point_strength(
                &results,
                baseline,
                config.video.grain_knee_threshold,
            ));
            debug!(
                "sample {} at {:.0}s: baseline {} bytes, estimate {:?}",
                sample_idx, start, baseline, estimate
            );
            Ok((results, baseline, estimate))
        })
        .collect();

    let mut samples = Vec::with_capacity(per_sample.len());
    for result in per_sample {
        samples.push(result?);
    }

    let initial: Vec<GrainLevel> = samples.iter().map(|(_, _, level)| *level).collect();

    // Phase 3: refinement when the estimates spread out.
    let final_estimates = if refine::needs_refinement(&initial) {
        let (lo, hi) = refine::refinement_range(&initial);
        let extra_params = refine::interpolated_params(lo, hi);
        info!(
            "Refining grain estimate between {:?} and {:?} with {} extra points",
            lo,
            hi,
            extra_params.len()
        );
        let refined: Vec<CoreResult<GrainLevel>> = samples
            .par_iter()
            .enumerate()
            .map(|(sample_idx, (results, baseline, _))| {
                cancel.check()?;
                let mut combined = results.clone();
                for (strength, params) in &extra_params {
                    let size = encode_analysis_sample(
                        &media.path,
                        temp.path(),
                        sample_idx,
                        positions[sample_idx],
                        sample_len,
                        Some(params.as_str()),
                        cancel,
                    )?;
                    combined.push(DenoiseResult {
                        strength: *strength,
                        size,
                    });
                }
                Ok(GrainLevel::from_strength(knee_point_strength(
                    &combined,
                    *baseline,
                    config.video.grain_knee_threshold,
                )))
            })
            .collect();
        let mut estimates = Vec::with_capacity(refined.len());
        for r in refined {
            estimates.push(r?);
        }
        estimates
    } else {
        initial
    };

    // Phase 4: median of the per-sample estimates.
    let level = median_level(&final_estimates);
    let capped = level.min(config.video.max_grain_level);
    info!("Detected grain level: {:?} (capped: {:?})", level, capped);
    Ok(capped)
}

/// Median grain level (lower median for even-length input).
pub fn median_level(levels: &[GrainLevel]) -> GrainLevel {
    if levels.is_empty() {
        return GrainLevel::VeryClean;
    }
    let mut sorted = levels.to_vec();
    sorted.sort();
    sorted[(sorted.len() - 1) / 2]
}

/// Encode one sample window with the given denoise parameters and return
/// the output size in bytes.
fn encode_analysis_sample(
    source: &Path,
    temp_dir: &Path,
    sample_idx: usize,
    start: f64,
    duration: f64,
    hqdn3d: Option<&str>,
    cancel: &CancelToken,
) -> CoreResult<u64> {
    let tag = hqdn3d
        .map(|p| p.replace([':', '.'], "_"))
        .unwrap_or_else(|| "none".to_string());
    let output = temp_dir.join(format!("sample_{}_{}.mkv", sample_idx, tag));

    let mut builder = FfmpegCommandBuilder::new()
        .quiet()
        .seek(start)
        .input(source)
        .limit_duration(duration)
        .map("0:v:0");
    if let Some(params) = hqdn3d {
        builder = builder.video_filter(&format!("hqdn3d={}", params));
    }
    let spec = builder
        .raw_args([
            "-an".to_string(),
            "-sn".to_string(),
            "-c:v".to_string(),
            "libsvtav1".to_string(),
            "-preset".to_string(),
            ANALYSIS_PRESET.to_string(),
            "-crf".to_string(),
            ANALYSIS_CRF.to_string(),
        ])
        .output(&output);

    run_streaming(&spec, cancel, None, None, None)?;

    let size = std::fs::metadata(&output)
        .map(|m| m.len())
        .map_err(|e| CoreError::Io(e))?;
    if size == 0 {
        return Err(CoreError::RetryableEncode {
            segment: sample_idx,
            reason: "grain analysis encode produced an empty file".to_string(),
        });
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_count_is_odd_and_clamped() {
        assert_eq!(sample_count(60.0), 3);
        assert_eq!(sample_count(1800.0), 3);
        assert_eq!(sample_count(2400.0), 5);
        // duration/600 = 6 rounds up to 7
        assert_eq!(sample_count(3599.0), 7);
        assert_eq!(sample_count(100_000.0), 9);
        for d in [60.0, 1500.0, 3000.0, 4500.0, 9000.0] {
            assert_eq!(sample_count(d) % 2, 1, "duration {}", d);
        }
    }

    #[test]
    fn sample_positions_stay_inside_window() {
        let duration = 3600.0;
        let positions = sample_positions(duration, 5, 10.0);
        assert_eq!(positions.len(), 5);
        for &p in &positions {
            assert!(p >= duration * 0.15);
            assert!(p + 10.0 <= duration * 0.85 + 1e-9);
        }
        // Strictly increasing.
        for pair in positions.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn strength_round_trip() {
        for level in ALL_LEVELS {
            assert_eq!(GrainLevel::from_strength(level.strength()), level);
        }
        assert_eq!(GrainLevel::from_strength(1.4), GrainLevel::VeryLight);
        assert_eq!(GrainLevel::from_strength(1.6), GrainLevel::Light);
        assert_eq!(GrainLevel::from_strength(9.0), GrainLevel::Medium);
        assert_eq!(GrainLevel::from_strength(-1.0), GrainLevel::VeryClean);
    }

    #[test]
    fn median_takes_middle_estimate() {
        use GrainLevel::*;
        assert_eq!(median_level(&[Light, VeryClean, Medium]), Light);
        assert_eq!(median_level(&[VeryClean, VeryClean, Medium]), VeryClean);
        assert_eq!(median_level(&[]), VeryClean);
        // Lower median on even input.
        assert_eq!(median_level(&[VeryLight, Light]), VeryLight);
    }

    #[test]
    fn synth_strength_uses_table() {
        let table = GrainSynthTable::default();
        assert_eq!(GrainLevel::VeryClean.synth_strength(&table), 0);
        assert_eq!(GrainLevel::VeryLight.synth_strength(&table), 4);
        assert_eq!(GrainLevel::Medium.synth_strength(&table), 16);
    }
}
