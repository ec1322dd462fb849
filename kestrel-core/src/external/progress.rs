//! Progress parsers for external tool stdout.
//!
//! The encoder is driven with `-progress pipe:1 -nostats`, which makes ffmpeg
//! write `key=value` lines to stdout; one block per update terminated by a
//! `progress=` line. The scorer prints one line per scored frame. Both
//! parsers are fed line by line from the process runner's stdout callback.

use once_cell::sync::Lazy;
use regex::Regex;

/// One encoder progress update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeProgress {
    /// Percent of the expected duration encoded so far (0-100).
    pub percent: f64,
    /// Encoder frames per second.
    pub fps: f64,
    /// Encode speed relative to realtime.
    pub speed: f64,
    /// Position in the output timeline, seconds.
    pub out_time: f64,
}

/// Incremental parser for ffmpeg `-progress pipe:1` output.
#[derive(Debug)]
pub struct EncodeProgressParser {
    expected_duration: f64,
    fps: f64,
    speed: f64,
    out_time: f64,
    finished: bool,
}

impl EncodeProgressParser {
    /// `expected_duration` is the duration of the slice being encoded and is
    /// the denominator for percent calculation.
    pub fn new(expected_duration: f64) -> Self {
        Self {
            expected_duration: expected_duration.max(0.001),
            fps: 0.0,
            speed: 0.0,
            out_time: 0.0,
            finished: false,
        }
    }

    /// Feed one stdout line. Returns a complete update when the line closes
    /// a progress block.
    pub fn feed(&mut self, line: &str) -> Option<EncodeProgress> {
        let (key, value) = line.split_once('=')?;
        match key.trim() {
            "fps" => {
                self.fps = value.trim().parse().unwrap_or(0.0);
                None
            }
            "speed" => {
                self.speed = value.trim().trim_end_matches('x').parse().unwrap_or(0.0);
                None
            }
            "out_time_us" => {
                if let Ok(us) = value.trim().parse::<i64>() {
                    self.out_time = us.max(0) as f64 / 1_000_000.0;
                }
                None
            }
            // Older ffmpeg builds emit out_time_ms with microsecond values.
            "out_time_ms" => {
                if let Ok(us) = value.trim().parse::<i64>() {
                    self.out_time = us.max(0) as f64 / 1_000_000.0;
                }
                None
            }
            "progress" => {
                if value.trim() == "end" {
                    self.finished = true;
                    self.out_time = self.expected_duration;
                }
                Some(self.snapshot())
            }
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn snapshot(&self) -> EncodeProgress {
        EncodeProgress {
            percent: (self.out_time / self.expected_duration * 100.0).clamp(0.0, 100.0),
            fps: self.fps,
            speed: self.speed,
            out_time: self.out_time,
        }
    }
}

static FRAME_SCORE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Frame\s+(\d+):\s*(-?[0-9.]+|NaN|nan)").expect("valid regex"));

/// Incremental parser for the SSIMULACRA2 scorer's per-frame output.
#[derive(Debug, Default)]
pub struct ScorerProgressParser {
    scores: Vec<f64>,
}

impl ScorerProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one stdout line; returns the frame's score when the line is a
    /// per-frame record. NaN values are preserved so the caller can apply
    /// its NaN policy.
    pub fn feed(&mut self, line: &str) -> Option<f64> {
        let caps = FRAME_SCORE_RE.captures(line.trim())?;
        let score: f64 = caps[2].parse().unwrap_or(f64::NAN);
        self.scores.push(score);
        Some(score)
    }

    pub fn frames_scored(&self) -> usize {
        self.scores.len()
    }

    pub fn into_scores(self) -> Vec<f64> {
        self.scores
    }
}
