//! Stream probe and the immutable source description.
//!
//! One ffprobe invocation supplies the stream list and format block; one
//! mediainfo invocation supplies the HDR/Dolby Vision metadata ffprobe does
//! not expose. The resulting [`SourceMedia`] is immutable once populated.

use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::analysis::classify::HdrFormat;
use crate::cancel::CancelToken;
use crate::error::{CoreError, CoreResult};
use crate::external::ffprobe_exec::{container_duration, parse_frame_rate, probe_file};
use crate::external::mediainfo_exec::read_media_info;

/// Primary video stream description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    pub index: usize,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub pix_fmt: Option<String>,
    pub color_space: Option<String>,
    pub hdr_format: HdrFormat,
    /// Dolby Vision profile when `hdr_format` is `DolbyVision`.
    pub dv_profile: Option<u8>,
}

/// One audio stream of the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub index: usize,
    pub codec: String,
    pub channels: u32,
    pub language: Option<String>,
}

/// One subtitle stream of the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleStreamInfo {
    pub index: usize,
    pub codec: String,
    pub language: Option<String>,
}

/// Immutable description of an input file.
///
/// Invariants enforced at construction: exactly one primary video stream,
/// at least one audio stream, positive duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMedia {
    pub path: PathBuf,
    pub duration: f64,
    pub container: String,
    pub size_bytes: u64,
    pub video: VideoStreamInfo,
    pub audio: Vec<AudioStreamInfo>,
    pub subtitles: Vec<SubtitleStreamInfo>,
}

impl SourceMedia {
    /// Total frames implied by duration and frame rate.
    pub fn total_frames(&self) -> u64 {
        (self.duration * self.video.frame_rate).round() as u64
    }
}

/// Probe `path` and build the source description.
///
/// A failed stream probe is fatal. A failed mediainfo pass degrades to SDR
/// with a warning, per the analyzer failure policy.
pub fn probe_source(path: &Path, cancel: &CancelToken) -> CoreResult<SourceMedia> {
    let probe = probe_file(path)?;

    let invalid = |reason: &str| CoreError::InputValidation {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let duration =
        container_duration(&probe).ok_or_else(|| invalid("container reports no duration"))?;

    let mut video_streams = Vec::new();
    let mut audio = Vec::new();
    let mut subtitles = Vec::new();

    for stream in &probe.streams {
        match stream.codec_type.as_deref() {
            Some("video") => video_streams.push(stream),
            Some("audio") => {
                audio.push(AudioStreamInfo {
                    index: audio.len(),
                    codec: stream.codec_name.clone().unwrap_or_default(),
                    channels: stream.channels.unwrap_or(2).max(1) as u32,
                    language: stream.tags.as_ref().and_then(|t| t.language.clone()),
                });
            }
            Some("subtitle") => {
                subtitles.push(SubtitleStreamInfo {
                    index: subtitles.len(),
                    codec: stream.codec_name.clone().unwrap_or_default(),
                    language: stream.tags.as_ref().and_then(|t| t.language.clone()),
                });
            }
            _ => {}
        }
    }

    // Attached cover art shows up as extra video streams; the primary stream
    // is the first with real dimensions.
    let video_stream = video_streams
        .iter()
        .find(|s| s.width.unwrap_or(0) > 0 && s.height.unwrap_or(0) > 0)
        .ok_or_else(|| invalid("no video stream with valid dimensions"))?;

    if audio.is_empty() {
        return Err(invalid("no audio streams"));
    }

    let (hdr_format, dv_profile) = match read_media_info(path, cancel) {
        Ok(report) => {
            let format = if report.is_dolby_vision() {
                HdrFormat::DolbyVision
            } else if report.is_hdr10_plus() {
                HdrFormat::Hdr10Plus
            } else if report.is_hdr() {
                HdrFormat::Hdr10
            } else {
                HdrFormat::None
            };
            (format, report.dolby_vision_profile())
        }
        Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
        Err(e) => {
            warn!(
                "mediainfo failed for {}: {}. Treating as SDR.",
                path.display(),
                e
            );
            (HdrFormat::None, None)
        }
    };

    let frame_rate = parse_frame_rate(&video_stream.avg_frame_rate)
        .or_else(|| parse_frame_rate(&video_stream.r_frame_rate))
        .unwrap_or(24.0);

    let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    Ok(SourceMedia {
        path: path.to_path_buf(),
        duration,
        container: path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default(),
        size_bytes,
        video: VideoStreamInfo {
            index: 0,
            codec: video_stream.codec_name.clone().unwrap_or_default(),
            width: video_stream.width.unwrap_or(0) as u32,
            height: video_stream.height.unwrap_or(0) as u32,
            frame_rate,
            pix_fmt: video_stream.pix_fmt.clone(),
            color_space: video_stream.color_space.clone(),
            hdr_format,
            dv_profile,
        },
        audio,
        subtitles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(duration: f64, width: u32) -> SourceMedia {
        SourceMedia {
            path: PathBuf::from("movie.mkv"),
            duration,
            container: "matroska,webm".to_string(),
            size_bytes: 4_000_000_000,
            video: VideoStreamInfo {
                index: 0,
                codec: "h264".to_string(),
                width,
                height: 1080,
                frame_rate: 23.976,
                pix_fmt: Some("yuv420p".to_string()),
                color_space: Some("bt709".to_string()),
                hdr_format: HdrFormat::None,
                dv_profile: None,
            },
            audio: vec![AudioStreamInfo {
                index: 0,
                codec: "ac3".to_string(),
                channels: 6,
                language: Some("eng".to_string()),
            }],
            subtitles: vec![],
        }
    }

    #[test]
    fn total_frames_rounds_to_nearest() {
        let m = media(480.0, 1920);
        assert_eq!(m.total_frames(), (480.0 * 23.976_f64).round() as u64);
    }

    #[test]
    fn source_media_serde_round_trip() {
        let m = media(480.0, 1920);
        let json = serde_json::to_string(&m).unwrap();
        let back: SourceMedia = serde_json::from_str(&json).unwrap();
        assert_eq!(back.duration, m.duration);
        assert_eq!(back.video.width, 1920);
        assert_eq!(back.audio.len(), 1);
        assert_eq!(back.audio[0].channels, 6);
    }
}
