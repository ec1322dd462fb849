//! SSIMULACRA2 scorer execution.
//!
//! The scorer compares a lossless reference slice against a probe encode and
//! prints one score per frame. The raw per-frame vector is returned to the
//! target-quality engine, which applies warmup trimming, NaN policy and the
//! configured aggregation.

use std::path::Path;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{CoreError, CoreResult};
use crate::external::process::{run_streaming, CommandSpec};
use crate::external::progress::ScorerProgressParser;
use crate::external::SCORER;

/// Score `distorted` against `reference`, returning per-frame scores in
/// presentation order.
pub fn score_pair(
    reference: &Path,
    distorted: &Path,
    cancel: &CancelToken,
    timeout: Option<Duration>,
) -> CoreResult<Vec<f64>> {
    let spec = CommandSpec::new(SCORER)
        .arg("video")
        .arg(reference.to_string_lossy().into_owned())
        .arg(distorted.to_string_lossy().into_owned());

    let mut parser = ScorerProgressParser::new();
    let mut on_line = |line: &str| {
        parser.feed(line);
    };
    run_streaming(&spec, cancel, timeout, Some(&mut on_line), None)?;

    let scores = parser.into_scores();
    if scores.is_empty() {
        return Err(CoreError::JsonParse(
            "scorer produced no per-frame scores".to_string(),
        ));
    }
    Ok(scores)
}
