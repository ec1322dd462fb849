//! Post-assembly output validation.
//!
//! The finished MKV must hold exactly one AV1 video stream, Opus for every
//! source audio stream, the source's subtitle tracks, and a duration within
//! tolerance of the source. Each check contributes one step to the
//! `validation_complete` event; any failed step fails the job.

use log::info;

use crate::analysis::probe::SourceMedia;
use crate::config::ValidationConfig;
use crate::error::{CoreError, CoreResult};
use crate::events::ValidationStep;
use crate::external::ffprobe_exec::{container_duration, probe_file};
use std::path::Path;

/// Pure duration check: within the absolute tolerance or the relative one,
/// whichever is looser.
pub fn duration_within_tolerance(
    source_duration: f64,
    output_duration: f64,
    config: &ValidationConfig,
) -> bool {
    let delta = (source_duration - output_duration).abs();
    let allowed = config
        .duration_abs_tolerance
        .max(source_duration * config.duration_rel_tolerance);
    delta <= allowed
}

/// Probe the finished output and run every contract check.
pub fn validate_output(
    output: &Path,
    source: &SourceMedia,
    config: &ValidationConfig,
) -> CoreResult<Vec<ValidationStep>> {
    let probe = probe_file(output)?;
    let mut steps = Vec::new();

    let video_codecs: Vec<String> = probe
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("video"))
        .map(|s| s.codec_name.clone().unwrap_or_default())
        .collect();
    let video_ok = video_codecs.len() == 1 && video_codecs[0] == "av1";
    steps.push(ValidationStep {
        name: "video stream".to_string(),
        passed: video_ok,
        details: if video_ok {
            "one AV1 stream".to_string()
        } else {
            format!("found {:?}", video_codecs)
        },
    });

    let audio_codecs: Vec<String> = probe
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .map(|s| s.codec_name.clone().unwrap_or_default())
        .collect();
    let audio_ok = audio_codecs.len() == source.audio.len()
        && audio_codecs.iter().all(|c| c == "opus");
    steps.push(ValidationStep {
        name: "audio streams".to_string(),
        passed: audio_ok,
        details: if audio_ok {
            format!("{} Opus streams", audio_codecs.len())
        } else {
            format!(
                "expected {} opus streams, found {:?}",
                source.audio.len(),
                audio_codecs
            )
        },
    });

    let subtitle_count = probe
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("subtitle"))
        .count();
    let subs_ok = subtitle_count == source.subtitles.len();
    steps.push(ValidationStep {
        name: "subtitle streams".to_string(),
        passed: subs_ok,
        details: format!(
            "{} of {} preserved",
            subtitle_count,
            source.subtitles.len()
        ),
    });

    let output_duration = container_duration(&probe).unwrap_or(0.0);
    let duration_ok = duration_within_tolerance(source.duration, output_duration, config);
    steps.push(ValidationStep {
        name: "duration".to_string(),
        passed: duration_ok,
        details: format!(
            "source {:.2}s, output {:.2}s",
            source.duration, output_duration
        ),
    });

    let size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
    let size_ok = size > config.min_chunk_bytes;
    steps.push(ValidationStep {
        name: "output size".to_string(),
        passed: size_ok,
        details: format!("{} bytes", size),
    });

    info!(
        "validation: {}/{} steps passed",
        steps.iter().filter(|s| s.passed).count(),
        steps.len()
    );
    Ok(steps)
}

/// Turn failed steps into a fatal validation error.
pub fn require_all_passed(steps: &[ValidationStep]) -> CoreResult<()> {
    let failures: Vec<&ValidationStep> = steps.iter().filter(|s| !s.passed).collect();
    if failures.is_empty() {
        return Ok(());
    }
    let summary = failures
        .iter()
        .map(|s| format!("{} ({})", s.name, s.details))
        .collect::<Vec<_>>()
        .join("; ");
    Err(CoreError::Validation(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_tolerance_uses_the_looser_bound() {
        let config = ValidationConfig::default();
        // Short source: absolute tolerance governs.
        assert!(duration_within_tolerance(2.0, 2.15, &config));
        assert!(!duration_within_tolerance(2.0, 2.35, &config));
        // Long source: 5% relative tolerance governs.
        assert!(duration_within_tolerance(7200.0, 7100.0, &config));
        assert!(!duration_within_tolerance(7200.0, 6700.0, &config));
    }

    #[test]
    fn require_all_passed_reports_failures() {
        let steps = vec![
            ValidationStep {
                name: "video stream".to_string(),
                passed: true,
                details: "one AV1 stream".to_string(),
            },
            ValidationStep {
                name: "duration".to_string(),
                passed: false,
                details: "source 10.00s, output 2.00s".to_string(),
            },
        ];
        let err = require_all_passed(&steps).unwrap_err();
        match err {
            CoreError::Validation(message) => {
                assert!(message.contains("duration"));
                assert!(!message.contains("video stream"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn all_passed_is_ok() {
        let steps = vec![ValidationStep {
            name: "output size".to_string(),
            passed: true,
            details: "9000 bytes".to_string(),
        }];
        assert!(require_all_passed(&steps).is_ok());
    }
}
