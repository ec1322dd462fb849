//! ffprobe execution via the `ffprobe` crate.
//!
//! One typed invocation per file; downstream code works off the returned
//! stream and format data rather than re-probing.

use std::path::Path;

use crate::error::{CoreError, CoreResult};

/// Probe a media file, returning the full typed ffprobe output.
pub fn probe_file(path: &Path) -> CoreResult<ffprobe::FfProbe> {
    ffprobe::ffprobe(path).map_err(|e| match e {
        ffprobe::FfProbeError::Io(io) => CoreError::ProcessLaunch {
            tool: crate::external::FFPROBE.to_string(),
            reason: io.to_string(),
        },
        ffprobe::FfProbeError::Status(output) => CoreError::ProcessExit {
            tool: crate::external::FFPROBE.to_string(),
            code: output.status.code().unwrap_or(-1),
            tail: String::from_utf8_lossy(&output.stderr)
                .lines()
                .rev()
                .take(50)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n"),
        },
        other => CoreError::FfprobeParse(other.to_string()),
    })
}

/// Container duration in seconds, from the format block.
pub fn container_duration(probe: &ffprobe::FfProbe) -> Option<f64> {
    probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| *d > 0.0)
}

/// Parse an ffprobe rational like "24000/1001" into frames per second.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den > 0.0 && num > 0.0 {
                Some(num / den)
            } else {
                None
            }
        }
        None => rate.parse().ok().filter(|v: &f64| *v > 0.0),
    }
}
