//! Black bar detection.
//!
//! Samples frames at a fixed spacing across the middle portion of the video
//! (credit windows at both ends are skipped), runs ffmpeg's cropdetect over
//! the sampled frames, and picks the most frequent non-degenerate rectangle.
//! SDR content uses a fixed luma threshold; HDR content derives its
//! threshold from the measured black level.

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

use crate::analysis::probe::SourceMedia;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::CoreResult;
use crate::external::ffmpeg::FfmpegCommandBuilder;
use crate::external::process::run_streaming;

static CROP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"crop=(\d+):(\d+):(\d+):(\d+)").expect("valid regex"));

static YMIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"lavfi\.signalstats\.YMIN=([0-9.]+)").expect("valid regex"));

/// Credit window to skip at each end, by total duration.
fn credits_skip(duration: f64) -> f64 {
    if duration > 3600.0 {
        180.0
    } else if duration > 1200.0 {
        60.0
    } else if duration > 300.0 {
        30.0
    } else {
        0.0
    }
}

/// Detect black bars and return a crop filter string, or `None` when the
/// full frame should be kept.
pub fn detect_crop(
    media: &SourceMedia,
    config: &Config,
    cancel: &CancelToken,
) -> CoreResult<Option<String>> {
    if config.crop_detection.disabled {
        info!("Crop detection disabled");
        return Ok(None);
    }
    if media.video.width == 0 || media.video.height == 0 || media.duration <= 0.0 {
        warn!("Invalid dimensions or duration, skipping crop detection");
        return Ok(None);
    }

    let threshold = if media.video.hdr_format.is_hdr() {
        measure_hdr_threshold(&media.path, config, cancel)?
    } else {
        config.crop_detection.sdr_threshold
    };
    debug!("cropdetect threshold: {}", threshold);

    let skip = credits_skip(media.duration);
    let window_start = skip;
    let window = (media.duration - 2.0 * skip).max(media.duration * 0.5);

    let lines = run_cropdetect_pass(&media.path, threshold, window_start, window, config, cancel)?;
    let counts = parse_crop_lines(&lines, media.video.width);

    Ok(select_crop(
        &counts,
        media.video.width,
        media.video.height,
        config,
    ))
}

/// Measure the HDR black level with signalstats and derive the threshold:
/// 1.5x the average minimum luma, clamped to [16, 256].
fn measure_hdr_threshold(path: &Path, config: &Config, cancel: &CancelToken) -> CoreResult<u32> {
    let filter = "select='eq(n,0)+eq(n,100)+eq(n,200)',signalstats,metadata=mode=print:file=-";
    let spec = FfmpegCommandBuilder::new()
        .input(path)
        .video_filter(filter)
        .raw_args(["-frames:v", "3"])
        .output_null();

    // The metadata filter writes to stdout with file=-, but some builds
    // route it through the log system; watch both streams.
    let mut stdout_lines: Vec<String> = Vec::new();
    let mut stderr_lines: Vec<String> = Vec::new();
    let mut collect_out = |line: &str| {
        if line.contains("signalstats") {
            stdout_lines.push(line.to_string());
        }
    };
    let mut collect_err = |line: &str| {
        if line.contains("signalstats") {
            stderr_lines.push(line.to_string());
        }
    };
    let result = run_streaming(
        &spec,
        cancel,
        None,
        Some(&mut collect_out),
        Some(&mut collect_err),
    );
    if let Err(e) = result {
        if matches!(e, crate::error::CoreError::Cancelled) {
            return Err(e);
        }
        warn!("HDR black level analysis failed: {}. Using default.", e);
    }

    let ymins: Vec<f64> = stdout_lines
        .iter()
        .chain(stderr_lines.iter())
        .filter_map(|line| {
            YMIN_RE
                .captures(line)
                .and_then(|caps| caps[1].parse::<f64>().ok())
        })
        .collect();

    if ymins.is_empty() {
        // No measurement; fall back to a mid-range HDR threshold.
        return Ok(64);
    }

    let avg = ymins.iter().sum::<f64>() / ymins.len() as f64;
    let threshold = (avg * config.crop_detection.hdr_black_level_multiplier).round() as u32;
    let clamped = threshold.clamp(16, 256);
    debug!(
        "HDR black level: avg YMIN={:.1}, derived threshold={}",
        avg, clamped
    );
    Ok(clamped)
}

/// One cropdetect pass over frames sampled at the configured spacing within
/// the analysis window. Returns the raw stderr lines containing crop values.
fn run_cropdetect_pass(
    path: &Path,
    threshold: u32,
    start: f64,
    duration: f64,
    config: &Config,
    cancel: &CancelToken,
) -> CoreResult<Vec<String>> {
    let spacing = config.crop_detection.sample_spacing.max(1.0);
    let filter = format!(
        "select='isnan(prev_selected_t)+gte(t-prev_selected_t\\,{})',cropdetect=limit={}:round=2:reset=1",
        spacing, threshold
    );

    let min_frames = config.crop_detection.min_samples.max(1);
    let frames = ((duration / spacing).ceil() as u32).max(min_frames);

    let spec = FfmpegCommandBuilder::new()
        .seek(start)
        .input(path)
        .limit_duration(duration)
        .video_filter(&filter)
        .raw_args(["-frames:v".to_string(), frames.to_string()])
        .output_null();

    let mut lines = Vec::new();
    let mut collect = |line: &str| {
        if line.contains("crop=") {
            lines.push(line.to_string());
        }
    };
    match run_streaming(&spec, cancel, None, None, Some(&mut collect)) {
        Ok(_) => {}
        Err(crate::error::CoreError::Cancelled) => return Err(crate::error::CoreError::Cancelled),
        // cropdetect output is already collected; a late decoder error does
        // not invalidate the sampled rectangles.
        Err(e) => warn!("cropdetect pass ended early: {}", e),
    }
    Ok(lines)
}

/// Tally `crop=w:h:x:y` rectangles, keeping only those preserving the full
/// source width.
fn parse_crop_lines(lines: &[String], orig_width: u32) -> HashMap<(u32, u32, u32, u32), usize> {
    let mut counts = HashMap::new();
    for line in lines {
        for caps in CROP_RE.captures_iter(line) {
            let (w, h, x, y) = (
                caps[1].parse::<u32>().unwrap_or(0),
                caps[2].parse::<u32>().unwrap_or(0),
                caps[3].parse::<u32>().unwrap_or(0),
                caps[4].parse::<u32>().unwrap_or(0),
            );
            if w == orig_width && h > 0 {
                *counts.entry((w, h, x, y)).or_insert(0) += 1;
            }
        }
    }
    counts
}

/// Pick the most frequent valid rectangle and apply the rejection rules.
fn select_crop(
    counts: &HashMap<(u32, u32, u32, u32), usize>,
    orig_width: u32,
    orig_height: u32,
    config: &Config,
) -> Option<String> {
    let (&(w, h, x, y), _) = counts.iter().max_by_key(|&(_, count)| count)?;

    // Full frame or geometrically impossible results mean no crop.
    if w == orig_width && h == orig_height {
        return None;
    }
    if w + x > orig_width || h + y > orig_height {
        warn!(
            "Detected crop exceeds source dimensions: crop={}:{}:{}:{}",
            w, h, x, y
        );
        return None;
    }
    if h < config.crop_detection.min_height {
        info!(
            "Rejecting crop: remaining height {} below minimum {}",
            h, config.crop_detection.min_height
        );
        return None;
    }
    let bar_percent = (orig_height - h) as f64 / orig_height as f64 * 100.0;
    if bar_percent < config.crop_detection.min_black_bar_percent {
        debug!(
            "Rejecting crop: bars are only {:.2}% of frame height",
            bar_percent
        );
        return None;
    }

    Some(format!("crop={}:{}:{}:{}", w, h, x, y))
}
