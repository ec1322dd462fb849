// ============================================================================
// kestrel-core/src/analysis/mod.rs
// ============================================================================
//
// MEDIA ANALYSIS: Probing and Content Classification
//
// This module turns an input path into the two immutable values the rest of
// the pipeline works from: a SourceMedia description of the container and
// its streams, and a ContentClassification derived from it (resolution
// tier, HDR format, grain level, crop window).
//
// Failure policy: the stream probe is fatal; every other sub-probe
// (mediainfo, crop, grain) degrades to a safe default with a warning.
//
// AI-ASSISTANT-INFO: Media probing and content classification

// ============================================================================
// SUBMODULES
// ============================================================================

/// ffprobe-backed stream probe and the SourceMedia model
pub mod probe;

/// Resolution tier, HDR format and the derived classification
pub mod classify;

/// Black bar detection
pub mod crop;

/// Four-phase grain analysis
pub mod grain;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use classify::{ContentClassification, HdrFormat, ResolutionTier};
pub use probe::{AudioStreamInfo, SourceMedia, SubtitleStreamInfo, VideoStreamInfo};

use std::path::Path;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::CoreResult;
use crate::events::EventDispatcher;

/// Probe and classify a source file.
///
/// This is the analyzer's single entry point: one ffprobe invocation, one
/// mediainfo invocation, then the optional crop and grain passes controlled
/// by the config.
pub fn analyze(
    path: &Path,
    config: &Config,
    events: &EventDispatcher,
    cancel: &CancelToken,
) -> CoreResult<(SourceMedia, ContentClassification)> {
    let media = probe::probe_source(path, cancel)?;
    let classification = classify::classify(&media, config, events, cancel)?;
    Ok((media, classification))
}
