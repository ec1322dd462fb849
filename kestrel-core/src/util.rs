//! Formatting helpers shared across the pipeline and the CLI.

use std::time::Duration;

/// Format a byte count with binary units ("1.24 GiB").
pub fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;

    let b = bytes as f64;
    if b >= GIB {
        format!("{:.2} GiB", b / GIB)
    } else if b >= MIB {
        format!("{:.2} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.2} KiB", b / KIB)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a duration as "HH:MM:SS".
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Format seconds as "HH:MM:SS.mmm" for ffmpeg `-ss`/`-t` arguments.
pub fn format_ffmpeg_time(seconds: f64) -> String {
    let whole = seconds.max(0.0);
    let hours = (whole / 3600.0).floor() as u64;
    let minutes = ((whole % 3600.0) / 60.0).floor() as u64;
    let secs = whole % 60.0;
    format!("{:02}:{:02}:{:06.3}", hours, minutes, secs)
}

/// Percentage reduction from `input` to `output`, clamped at zero.
pub fn size_reduction_percent(input: u64, output: u64) -> f64 {
    if input == 0 {
        return 0.0;
    }
    let reduction = input.saturating_sub(output) as f64;
    reduction / input as f64 * 100.0
}
