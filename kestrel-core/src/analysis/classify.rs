//! Content classification derived from the source probe.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::analysis::crop;
use crate::analysis::grain::{self, GrainLevel};
use crate::analysis::probe::SourceMedia;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::events::{Event, EventDispatcher};

/// Resolution tier, selected by coded width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionTier {
    /// Width below 1280.
    Sd,
    /// Width below 3840.
    Hd,
    /// Width 3840 and above.
    Uhd,
}

impl ResolutionTier {
    pub fn from_width(width: u32) -> Self {
        if width >= 3840 {
            Self::Uhd
        } else if width >= 1280 {
            Self::Hd
        } else {
            Self::Sd
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sd => "SD",
            Self::Hd => "HD",
            Self::Uhd => "UHD",
        }
    }

    /// Memory tokens one encoding job of this tier consumes.
    pub fn memory_tokens(&self) -> usize {
        match self {
            Self::Sd => 1,
            Self::Hd => 2,
            Self::Uhd => 4,
        }
    }
}

/// HDR signaling carried by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HdrFormat {
    #[default]
    None,
    Hdr10,
    Hdr10Plus,
    DolbyVision,
}

impl HdrFormat {
    pub fn is_hdr(&self) -> bool {
        !matches!(self, HdrFormat::None)
    }
}

/// Immutable classification of a probed source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentClassification {
    pub tier: ResolutionTier,
    pub hdr_format: HdrFormat,
    /// Detected grain level (before any profile cap).
    pub grain_level: GrainLevel,
    /// crop filter string when black bars were detected.
    pub crop_filter: Option<String>,
}

impl ContentClassification {
    pub fn is_hdr(&self) -> bool {
        self.hdr_format.is_hdr()
    }

    pub fn is_dolby_vision(&self) -> bool {
        matches!(self.hdr_format, HdrFormat::DolbyVision)
    }
}

/// Derive the classification for a probed source.
///
/// Crop and grain sub-probes degrade to safe defaults on failure; only
/// cancellation propagates out of them.
pub fn classify(
    media: &SourceMedia,
    config: &Config,
    events: &EventDispatcher,
    cancel: &CancelToken,
) -> CoreResult<ContentClassification> {
    let tier = ResolutionTier::from_width(media.video.width);
    let hdr_format = media.video.hdr_format;

    let crop_filter = match crop::detect_crop(media, config, cancel) {
        Ok(filter) => filter,
        Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
        Err(e) => {
            warn!("crop detection failed: {}. Using full frame.", e);
            events.emit(Event::Warning {
                message: format!("Crop detection failed, using full frame: {}", e),
            });
            None
        }
    };
    events.emit(Event::CropResult {
        crop_required: crop_filter.is_some(),
        crop_params: crop_filter.clone(),
    });

    let grain_level = if config.video.profile.denoise_enabled(config) {
        match grain::analyze_grain(media, config, cancel) {
            Ok(level) => level,
            Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
            Err(e) => {
                warn!("grain analysis failed: {}. Using VeryClean.", e);
                events.emit(Event::Warning {
                    message: format!("Grain analysis failed, assuming clean source: {}", e),
                });
                GrainLevel::VeryClean
            }
        }
    } else {
        GrainLevel::VeryClean
    };

    Ok(ContentClassification {
        tier,
        hdr_format,
        grain_level,
        crop_filter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_boundaries() {
        assert_eq!(ResolutionTier::from_width(720), ResolutionTier::Sd);
        assert_eq!(ResolutionTier::from_width(1279), ResolutionTier::Sd);
        assert_eq!(ResolutionTier::from_width(1280), ResolutionTier::Hd);
        assert_eq!(ResolutionTier::from_width(1920), ResolutionTier::Hd);
        assert_eq!(ResolutionTier::from_width(3839), ResolutionTier::Hd);
        assert_eq!(ResolutionTier::from_width(3840), ResolutionTier::Uhd);
    }

    #[test]
    fn memory_token_weights_scale_with_tier() {
        assert_eq!(ResolutionTier::Sd.memory_tokens(), 1);
        assert_eq!(ResolutionTier::Hd.memory_tokens(), 2);
        assert_eq!(ResolutionTier::Uhd.memory_tokens(), 4);
    }

    #[test]
    fn hdr_format_flags() {
        assert!(!HdrFormat::None.is_hdr());
        assert!(HdrFormat::Hdr10.is_hdr());
        assert!(HdrFormat::DolbyVision.is_hdr());
    }
}
