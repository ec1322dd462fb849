//! Encoding path selection.
//!
//! A pure decision function turns the content classification into a tagged
//! plan. Dolby Vision must never reach the chunked path: chunk boundaries
//! would split the RPU metadata stream, so DV always passes through as a
//! single direct-CRF encode.

use serde::{Deserialize, Serialize};

use crate::analysis::classify::ContentClassification;
use crate::analysis::probe::SourceMedia;
use crate::config::profiles::{crf_for_tier, resolve_parameters, EncodingParams};
use crate::config::Config;

/// The selected encoding path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PlanMode {
    /// Single-pass encode at a fixed CRF.
    DirectCrf { crf: u32 },
    /// Chunked encode with a per-segment target-quality search.
    ChunkedTargetQuality {
        target_score: f64,
        score_tolerance: f64,
    },
    /// Dolby Vision source: single direct-CRF encode, never chunked.
    DolbyVisionPassthrough { crf: u32 },
}

impl PlanMode {
    pub fn is_chunked(&self) -> bool {
        matches!(self, PlanMode::ChunkedTargetQuality { .. })
    }

    /// Stable name used in events and logs.
    pub fn name(&self) -> &'static str {
        match self {
            PlanMode::DirectCrf { .. } => "direct-crf",
            PlanMode::ChunkedTargetQuality { .. } => "chunked-target-quality",
            PlanMode::DolbyVisionPassthrough { .. } => "dolby-vision-passthrough",
        }
    }
}

/// Complete encoding plan: path plus the shared parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingPlan {
    pub mode: PlanMode,
    pub params: EncodingParams,
}

/// Select the encoding path for a classified source.
///
/// Decision order:
/// 1. Dolby Vision -> passthrough at the tier CRF.
/// 2. A profile without target quality, or a source too short to be worth
///    chunking (under twice the minimum segment length) -> direct CRF.
/// 3. Otherwise -> chunked target quality.
pub fn route(
    media: &SourceMedia,
    classification: &ContentClassification,
    config: &Config,
) -> EncodingPlan {
    let params = resolve_parameters(config, classification);
    let tier_crf = u32::from(crf_for_tier(config, classification.tier));

    let mode = if classification.is_dolby_vision() {
        PlanMode::DolbyVisionPassthrough { crf: tier_crf }
    } else if !config.video.profile.uses_target_quality()
        || media.duration < 2.0 * config.scene_detection.min_segment_length
    {
        PlanMode::DirectCrf { crf: tier_crf }
    } else {
        PlanMode::ChunkedTargetQuality {
            target_score: config.video.target_score(),
            score_tolerance: config.video.score_tolerance(),
        }
    };

    EncodingPlan { mode, params }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::classify::{HdrFormat, ResolutionTier};
    use crate::analysis::grain::GrainLevel;
    use crate::analysis::probe::{AudioStreamInfo, VideoStreamInfo};
    use crate::config::Profile;
    use std::path::PathBuf;

    fn media(duration: f64, width: u32, hdr: HdrFormat) -> SourceMedia {
        SourceMedia {
            path: PathBuf::from("movie.mkv"),
            duration,
            container: "matroska".to_string(),
            size_bytes: 0,
            video: VideoStreamInfo {
                index: 0,
                codec: "hevc".to_string(),
                width,
                height: width * 9 / 16,
                frame_rate: 23.976,
                pix_fmt: None,
                color_space: None,
                hdr_format: hdr,
                dv_profile: None,
            },
            audio: vec![AudioStreamInfo {
                index: 0,
                codec: "ac3".to_string(),
                channels: 6,
                language: None,
            }],
            subtitles: vec![],
        }
    }

    fn classification(media: &SourceMedia) -> ContentClassification {
        ContentClassification {
            tier: ResolutionTier::from_width(media.video.width),
            hdr_format: media.video.hdr_format,
            grain_level: GrainLevel::VeryClean,
            crop_filter: None,
        }
    }

    #[test]
    fn dolby_vision_is_never_chunked() {
        let config = Config::default();
        let media = media(7200.0, 3840, HdrFormat::DolbyVision);
        let plan = route(&media, &classification(&media), &config);
        assert_eq!(plan.mode, PlanMode::DolbyVisionPassthrough { crf: 29 });
        assert!(!plan.mode.is_chunked());
    }

    #[test]
    fn long_hd_sdr_goes_chunked() {
        let config = Config::default();
        let media = media(480.0, 1920, HdrFormat::None);
        let plan = route(&media, &classification(&media), &config);
        match plan.mode {
            PlanMode::ChunkedTargetQuality {
                target_score,
                score_tolerance,
            } => {
                assert!((target_score - 77.0).abs() < 1e-9);
                assert!((score_tolerance - 2.0).abs() < 1e-9);
            }
            other => panic!("expected chunked mode, got {:?}", other),
        }
    }

    #[test]
    fn short_sources_go_direct() {
        let config = Config::default();
        // Below 2 * min_segment_length (10s with defaults).
        let media = media(9.0, 720, HdrFormat::None);
        let plan = route(&media, &classification(&media), &config);
        assert_eq!(plan.mode, PlanMode::DirectCrf { crf: 25 });
    }

    #[test]
    fn three_minute_sd_is_direct_only_when_under_threshold() {
        let mut config = Config::default();
        // With a 100s minimum segment, a 3 minute film is under 2x min.
        config.scene_detection.min_segment_length = 100.0;
        config.scene_detection.max_segment_length = 200.0;
        let media = media(180.0, 720, HdrFormat::None);
        let plan = route(&media, &classification(&media), &config);
        assert_eq!(plan.mode, PlanMode::DirectCrf { crf: 25 });
    }

    #[test]
    fn quick_profile_forces_direct_crf() {
        let mut config = Config::default();
        config.video.profile = Profile::Quick;
        let media = media(7200.0, 1920, HdrFormat::None);
        let plan = route(&media, &classification(&media), &config);
        assert_eq!(plan.mode, PlanMode::DirectCrf { crf: 25 });
        assert_eq!(plan.params.preset, config.video.quick_preset);
    }

    #[test]
    fn hdr10_still_chunks() {
        let config = Config::default();
        let media = media(3600.0, 3840, HdrFormat::Hdr10);
        let plan = route(&media, &classification(&media), &config);
        assert!(plan.mode.is_chunked());
    }

    #[test]
    fn plan_round_trips_through_serde() {
        let config = Config::default();
        let media = media(480.0, 1920, HdrFormat::None);
        let plan = route(&media, &classification(&media), &config);
        let json = serde_json::to_string(&plan).unwrap();
        let back: EncodingPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mode, plan.mode);
        assert_eq!(back.params.preset, plan.params.preset);
    }
}
