//! Preset profiles and parameter resolution.
//!
//! A profile is a named bundle of encoding behavior. Resolution is a pure
//! function of (classification, config, profile); nothing here touches
//! global state or the filesystem.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::analysis::classify::{ContentClassification, ResolutionTier};
use crate::analysis::grain::GrainLevel;
use crate::config::Config;

/// Encoding profile selected with `--preset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Grainy film sources: denoise analysis enabled, film-grain synthesis on.
    Grain,
    /// Clean digital sources: conservative denoise, synthesis from analysis.
    #[default]
    Clean,
    /// Fast one-pass mode: higher preset number, direct CRF instead of the
    /// target-quality search.
    Quick,
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "grain" => Ok(Self::Grain),
            "clean" => Ok(Self::Clean),
            "quick" => Ok(Self::Quick),
            other => Err(format!("unknown profile '{}'", other)),
        }
    }
}

impl Profile {
    /// Whether this profile uses the chunked target-quality search.
    pub fn uses_target_quality(&self) -> bool {
        !matches!(self, Profile::Quick)
    }

    /// Whether grain analysis runs for this profile (given the global switch).
    pub fn denoise_enabled(&self, config: &Config) -> bool {
        config.video.denoise && !matches!(self, Profile::Quick)
    }

    /// Grain level cap for this profile.
    pub fn grain_cap(&self, config: &Config) -> GrainLevel {
        match self {
            // Clean sources should never get heavy temporal denoising.
            Profile::Clean => config.video.max_grain_level.min(GrainLevel::Light),
            _ => config.video.max_grain_level,
        }
    }
}

/// Shared encoding parameters carried by every plan variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingParams {
    /// SVT-AV1 preset number.
    pub preset: u8,
    /// Output pixel format.
    pub pix_fmt: String,
    /// Full SVT-AV1 parameter string, film-grain synthesis included.
    pub svt_params: String,
    /// hqdn3d filter parameters, when denoising applies.
    pub denoise_filter: Option<String>,
    /// crop filter string, when black bars were detected.
    pub crop_filter: Option<String>,
    /// Film-grain synthesis strength handed to the encoder.
    pub film_grain: u8,
}

impl EncodingParams {
    /// Video filter chain combining crop and denoise, ffmpeg `-vf` syntax.
    pub fn filter_chain(&self) -> Option<String> {
        let mut filters = Vec::new();
        if let Some(crop) = &self.crop_filter {
            filters.push(crop.clone());
        }
        if let Some(denoise) = &self.denoise_filter {
            filters.push(format!("hqdn3d={}", denoise));
        }
        if filters.is_empty() {
            None
        } else {
            Some(filters.join(","))
        }
    }
}

/// CRF for a resolution tier from the config tier table.
pub fn crf_for_tier(config: &Config, tier: ResolutionTier) -> u8 {
    match tier {
        ResolutionTier::Sd => config.video.crf_sd,
        ResolutionTier::Hd => config.video.crf_hd,
        ResolutionTier::Uhd => config.video.crf_uhd,
    }
}

/// Resolve the shared encoding parameters for a classified source.
///
/// Grain synthesis strength comes from the configured table, indexed by the
/// classification's detected (and profile-capped) grain level.
pub fn resolve_parameters(config: &Config, classification: &ContentClassification) -> EncodingParams {
    let profile = config.video.profile;
    let preset = match profile {
        Profile::Quick => config.video.quick_preset,
        _ => config.video.preset,
    };

    let grain_level = classification.grain_level.min(profile.grain_cap(config));
    let film_grain = grain_level.synth_strength(&config.video.grain_synth);

    let mut svt_params = config.video.svt_params.clone();
    if film_grain > 0 {
        svt_params.push_str(&format!(":film-grain={}:film-grain-denoise=0", film_grain));
    }

    let denoise_filter = if profile.denoise_enabled(config) {
        grain_level.hqdn3d_params().map(str::to_string)
    } else {
        None
    };

    EncodingParams {
        preset,
        pix_fmt: config.video.pix_fmt.clone(),
        svt_params,
        denoise_filter,
        crop_filter: classification.crop_filter.clone(),
        film_grain,
    }
}
