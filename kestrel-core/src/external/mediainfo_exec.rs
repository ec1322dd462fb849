//! MediaInfo integration for HDR and Dolby Vision metadata.
//!
//! ffprobe's color fields are enough to spot plain HDR10, but Dolby Vision
//! configuration records and HDR10+ dynamic metadata are only reliably
//! reported by mediainfo. This module shells out `mediainfo --Output=JSON`
//! and extracts the fields the classifier needs.

use serde::Deserialize;
use std::path::Path;

use crate::cancel::CancelToken;
use crate::error::{CoreError, CoreResult};
use crate::external::process::{run_capture, CommandSpec};
use crate::external::MEDIAINFO;

/// MediaInfo video track fields relevant to HDR classification.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct MediaInfoVideoTrack {
    #[serde(rename = "Format")]
    pub format: Option<String>,
    #[serde(rename = "HDR_Format")]
    pub hdr_format: Option<String>,
    #[serde(rename = "HDR_Format_Profile")]
    pub hdr_format_profile: Option<String>,
    #[serde(rename = "HDR_Format_Compatibility")]
    pub hdr_format_compatibility: Option<String>,
    #[serde(rename = "transfer_characteristics")]
    pub transfer_characteristics: Option<String>,
    #[serde(rename = "colour_primaries")]
    pub colour_primaries: Option<String>,
    #[serde(rename = "BitDepth")]
    pub bit_depth: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MediaInfoTrack {
    #[serde(rename = "@type")]
    track_type: String,
    #[serde(flatten)]
    video: MediaInfoVideoTrack,
}

#[derive(Debug, Clone, Deserialize)]
struct MediaInfoMedia {
    track: Vec<MediaInfoTrack>,
}

#[derive(Debug, Clone, Deserialize)]
struct MediaInfoResponse {
    media: MediaInfoMedia,
}

/// Parsed mediainfo report, reduced to the primary video track.
#[derive(Debug, Default, Clone)]
pub struct MediaInfoReport {
    pub video: Option<MediaInfoVideoTrack>,
}

impl MediaInfoReport {
    /// Dolby Vision is identified by the presence of a DV configuration
    /// record in the HDR format string.
    pub fn is_dolby_vision(&self) -> bool {
        self.video
            .as_ref()
            .and_then(|v| v.hdr_format.as_deref())
            .map(|f| f.contains("Dolby Vision"))
            .unwrap_or(false)
    }

    /// Dolby Vision profile number, when present ("dvhe.07.06" -> 7).
    pub fn dolby_vision_profile(&self) -> Option<u8> {
        let profile = self
            .video
            .as_ref()
            .and_then(|v| v.hdr_format_profile.as_deref())?;
        profile
            .split('.')
            .nth(1)
            .and_then(|p| p.parse::<u8>().ok())
    }

    /// HDR10+ dynamic metadata (SMPTE ST 2094).
    pub fn is_hdr10_plus(&self) -> bool {
        self.video
            .as_ref()
            .and_then(|v| v.hdr_format.as_deref())
            .map(|f| f.contains("SMPTE ST 2094") || f.contains("HDR10+"))
            .unwrap_or(false)
    }

    /// PQ or HLG transfer function, the baseline HDR signal.
    pub fn is_hdr(&self) -> bool {
        self.video
            .as_ref()
            .and_then(|v| v.transfer_characteristics.as_deref())
            .map(|t| t.contains("PQ") || t.contains("HLG") || t.contains("2084"))
            .unwrap_or(false)
    }
}

/// Run mediainfo on a file and parse the JSON report.
pub fn read_media_info(path: &Path, cancel: &CancelToken) -> CoreResult<MediaInfoReport> {
    let spec = CommandSpec::new(MEDIAINFO)
        .arg("--Output=JSON")
        .arg(path.to_string_lossy().into_owned());
    let output = run_capture(&spec, cancel)?;
    parse_report(&output)
}

fn parse_report(json: &str) -> CoreResult<MediaInfoReport> {
    let response: MediaInfoResponse = serde_json::from_str(json)
        .map_err(|e| CoreError::JsonParse(format!("mediainfo output: {}", e)))?;
    let video = response
        .media
        .track
        .into_iter()
        .find(|t| t.track_type == "Video")
        .map(|t| t.video);
    Ok(MediaInfoReport { video })
}
