//! Opus audio encoding for the assembly stage.
//!
//! Every source audio stream is re-encoded individually. Bitrate follows
//! the channel layout, layouts are normalized to the four Opus-friendly
//! shapes, and unknown layouts fall back to stereo.

use std::path::{Path, PathBuf};

use crate::analysis::probe::AudioStreamInfo;
use crate::config::AudioConfig;
use crate::external::ffmpeg::FfmpegCommandBuilder;
use crate::external::process::CommandSpec;

/// Opus bitrate in kbps for a channel count.
pub fn bitrate_for_channels(channels: u32) -> u32 {
    match channels {
        1 => 64,   // mono
        2 => 128,  // stereo
        6 => 256,  // 5.1
        8 => 384,  // 7.1
        0 => 128,  // unknown layouts normalize to stereo
        n => n * 48,
    }
}

/// Normalized target layout for a channel count.
pub fn normalized_layout(channels: u32) -> &'static str {
    match channels {
        1 => "mono",
        2 => "stereo",
        6 => "5.1",
        8 => "7.1",
        _ => "stereo",
    }
}

/// Channel count after normalization (what the output stream will carry).
pub fn normalized_channels(channels: u32) -> u32 {
    match channels {
        1 | 2 | 6 | 8 => channels,
        _ => 2,
    }
}

/// Human-readable description used in events ("5.1 surround", "stereo").
pub fn describe_streams(streams: &[AudioStreamInfo]) -> String {
    if streams.is_empty() {
        return "none".to_string();
    }
    streams
        .iter()
        .map(|s| match normalized_channels(s.channels) {
            1 => "mono".to_string(),
            2 => "stereo".to_string(),
            6 => "5.1 surround".to_string(),
            8 => "7.1 surround".to_string(),
            n => format!("{} channels", n),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Output path for one encoded audio stream.
pub fn stream_output(working_dir: &Path, stream_index: usize) -> PathBuf {
    working_dir.join(format!("audio_{:02}.mka", stream_index))
}

/// ffmpeg command encoding one source audio stream to Opus.
pub fn encode_stream(
    source: &Path,
    stream: &AudioStreamInfo,
    output: &Path,
    config: &AudioConfig,
) -> CommandSpec {
    let channels = stream.channels;
    let effective = if matches!(channels, 1 | 2 | 6 | 8) {
        channels
    } else {
        0
    };
    let bitrate = bitrate_for_channels(effective);
    let layout = normalized_layout(channels);

    FfmpegCommandBuilder::new()
        .quiet()
        .input(source)
        .map(&format!("0:a:{}", stream.index))
        .raw_args([
            "-af".to_string(),
            format!("aformat=channel_layouts={}", layout),
            "-c:a".to_string(),
            "libopus".to_string(),
            "-b:a".to_string(),
            format!("{}k", bitrate),
            "-vbr".to_string(),
            if config.vbr { "on" } else { "off" }.to_string(),
            "-compression_level".to_string(),
            config.compression_level.to_string(),
            "-frame_duration".to_string(),
            config.frame_duration.to_string(),
            "-application".to_string(),
            config.application.clone(),
        ])
        .output(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_table_matches_layouts() {
        assert_eq!(bitrate_for_channels(1), 64);
        assert_eq!(bitrate_for_channels(2), 128);
        assert_eq!(bitrate_for_channels(6), 256);
        assert_eq!(bitrate_for_channels(8), 384);
        // Per-channel fallback for odd layouts.
        assert_eq!(bitrate_for_channels(3), 144);
        assert_eq!(bitrate_for_channels(5), 240);
        // Unknown layout normalizes to stereo.
        assert_eq!(bitrate_for_channels(0), 128);
    }

    #[test]
    fn layouts_normalize_to_the_four_shapes() {
        assert_eq!(normalized_layout(1), "mono");
        assert_eq!(normalized_layout(2), "stereo");
        assert_eq!(normalized_layout(6), "5.1");
        assert_eq!(normalized_layout(8), "7.1");
        assert_eq!(normalized_layout(3), "stereo");
        assert_eq!(normalized_layout(7), "stereo");
    }

    #[test]
    fn encode_command_carries_opus_parameters() {
        let stream = AudioStreamInfo {
            index: 1,
            codec: "ac3".to_string(),
            channels: 6,
            language: Some("eng".to_string()),
        };
        let spec = encode_stream(
            Path::new("in.mkv"),
            &stream,
            Path::new("audio_01.mka"),
            &AudioConfig::default(),
        );
        let args = spec.args.join(" ");
        assert!(args.contains("-map 0:a:1"));
        assert!(args.contains("-c:a libopus"));
        assert!(args.contains("-b:a 256k"));
        assert!(args.contains("aformat=channel_layouts=5.1"));
        assert!(args.contains("-vbr on"));
        assert!(args.contains("-compression_level 10"));
        assert!(args.contains("-frame_duration 20"));
        assert!(args.contains("-application audio"));
    }

    #[test]
    fn stream_description_reads_naturally() {
        let streams = vec![
            AudioStreamInfo {
                index: 0,
                codec: "ac3".to_string(),
                channels: 6,
                language: None,
            },
            AudioStreamInfo {
                index: 1,
                codec: "aac".to_string(),
                channels: 2,
                language: None,
            },
        ];
        assert_eq!(describe_streams(&streams), "5.1 surround, stereo");
        assert_eq!(describe_streams(&[]), "none");
    }
}
