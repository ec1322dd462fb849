//! NDJSON event sink for embedding hosts.
//!
//! Every line is a JSON object carrying at minimum `type` and an ISO-8601
//! `timestamp`. The field layout per event type is a compatibility contract;
//! renaming or removing fields breaks downstream consumers.
//!
//! Progress events are throttled: a line is written only when the whole
//! percent bucket changes or five seconds have passed since the last write
//! for the same progress key. Terminal events are never dropped.

use chrono::{SecondsFormat, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{Event, EventHandler};

/// Minimum interval between same-bucket progress emissions.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Pure throttle state, keyed by progress source.
#[derive(Debug, Default)]
pub struct ProgressThrottle {
    seen: HashMap<String, (i64, Instant)>,
}

impl ProgressThrottle {
    /// Whether a progress update for `key` at `percent` should be emitted
    /// at time `now`, updating the state when it is.
    pub fn should_emit(&mut self, key: &str, percent: f64, now: Instant) -> bool {
        let bucket = percent.floor() as i64;
        match self.seen.get(key) {
            Some(&(last_bucket, last_time))
                if last_bucket == bucket && now.duration_since(last_time) < PROGRESS_INTERVAL =>
            {
                false
            }
            _ => {
                self.seen.insert(key.to_string(), (bucket, now));
                true
            }
        }
    }
}

/// Event handler writing NDJSON lines to a sink.
pub struct NdjsonEventHandler {
    output: Mutex<Box<dyn Write + Send>>,
    throttle: Mutex<ProgressThrottle>,
}

impl NdjsonEventHandler {
    /// Write to stdout.
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    /// Write to (or create) the given file path, or stdout for "-".
    pub fn from_sink(sink: &str) -> io::Result<Self> {
        if sink == "-" {
            Ok(Self::stdout())
        } else {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(sink)?;
            Ok(Self::with_writer(Box::new(file)))
        }
    }

    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            output: Mutex::new(writer),
            throttle: Mutex::new(ProgressThrottle::default()),
        }
    }

    fn timestamp() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn write_line(&self, value: serde_json::Value) {
        if let Ok(mut output) = self.output.lock() {
            if let Ok(line) = serde_json::to_string(&value) {
                let _ = writeln!(output, "{}", line);
                let _ = output.flush();
            }
        }
    }

    fn render(event: &Event, timestamp: &str) -> serde_json::Value {
        let mut value = match event {
            Event::Hardware {
                hostname,
                os,
                cpu,
                memory,
            } => json!({
                "hostname": hostname,
                "os": os,
                "cpu": cpu,
                "memory": memory,
            }),
            Event::Initialization {
                input_file,
                output_file,
                duration_secs,
                resolution,
                tier,
                dynamic_range,
                audio_description,
            } => json!({
                "input_file": input_file,
                "output_file": output_file,
                "duration_secs": duration_secs,
                "resolution": resolution,
                "tier": tier,
                "dynamic_range": dynamic_range,
                "audio_description": audio_description,
            }),
            Event::StageProgress {
                stage,
                percent,
                message,
                eta_seconds,
            } => json!({
                "stage": stage,
                "percent": percent,
                "message": message,
                "eta_seconds": eta_seconds,
            }),
            Event::CropResult {
                crop_required,
                crop_params,
            } => json!({
                "crop_required": crop_required,
                "crop_params": crop_params,
            }),
            Event::EncodingConfig {
                encoder,
                preset,
                mode,
                pixel_format,
                svt_params,
                film_grain,
                audio_codec,
            } => json!({
                "encoder": encoder,
                "preset": preset,
                "mode": mode,
                "pixel_format": pixel_format,
                "svt_params": svt_params,
                "film_grain": film_grain,
                "audio_codec": audio_codec,
            }),
            Event::EncodingStarted { total_segments } => json!({
                "total_segments": total_segments,
            }),
            Event::EncodingProgress {
                segment,
                percent,
                speed,
                fps,
                eta_seconds,
            } => json!({
                "segment": segment,
                "percent": percent,
                "speed": speed,
                "fps": fps,
                "eta_seconds": eta_seconds,
            }),
            Event::ValidationComplete { passed, steps } => json!({
                "validation_passed": passed,
                "validation_steps": steps.iter().map(|s| json!({
                    "step": s.name,
                    "passed": s.passed,
                    "details": s.details,
                })).collect::<Vec<_>>(),
            }),
            Event::EncodingComplete {
                input_file,
                output_file,
                original_size,
                encoded_size,
                total_seconds,
                size_reduction_percent,
            } => json!({
                "input_file": input_file,
                "output_file": output_file,
                "original_size": original_size,
                "encoded_size": encoded_size,
                "duration_seconds": total_seconds,
                "size_reduction_percent": size_reduction_percent,
            }),
            Event::Warning { message } => json!({ "message": message }),
            Event::Error {
                title,
                message,
                context,
                suggestion,
            } => json!({
                "title": title,
                "message": message,
                "context": context,
                "suggestion": suggestion,
            }),
            Event::BatchStarted {
                total_files,
                file_list,
            } => json!({
                "total_files": total_files,
                "file_list": file_list,
            }),
            Event::FileProgress {
                current_file,
                total_files,
                filename,
            } => json!({
                "current_file": current_file,
                "total_files": total_files,
                "filename": filename,
            }),
            Event::BatchComplete {
                successful_count,
                total_files,
                total_original_size,
                total_encoded_size,
                total_seconds,
            } => json!({
                "successful_count": successful_count,
                "total_files": total_files,
                "total_original_size": total_original_size,
                "total_encoded_size": total_encoded_size,
                "total_duration_seconds": total_seconds,
            }),
        };

        let object = value.as_object_mut().expect("event payloads are objects");
        object.insert("type".to_string(), json!(event.type_name()));
        object.insert("timestamp".to_string(), json!(timestamp));
        value
    }

    fn progress_key(event: &Event) -> Option<(String, f64)> {
        match event {
            Event::StageProgress { stage, percent, .. } => {
                Some((format!("stage:{}", stage), *percent))
            }
            Event::EncodingProgress {
                segment, percent, ..
            } => Some((
                match segment {
                    Some(index) => format!("segment:{}", index),
                    None => "encoding".to_string(),
                },
                *percent,
            )),
            _ => None,
        }
    }
}

impl EventHandler for NdjsonEventHandler {
    fn handle(&self, event: &Event) {
        if let Some((key, percent)) = Self::progress_key(event) {
            let mut throttle = self.throttle.lock().unwrap();
            if !throttle.should_emit(&key, percent, Instant::now()) {
                return;
            }
        }
        self.write_line(Self::render(event, &Self::timestamp()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn handler() -> (NdjsonEventHandler, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let handler = NdjsonEventHandler::with_writer(Box::new(SharedWriter(buffer.clone())));
        (handler, buffer)
    }

    fn lines(buffer: &Arc<Mutex<Vec<u8>>>) -> Vec<serde_json::Value> {
        String::from_utf8(buffer.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn every_line_has_type_and_timestamp() {
        let (handler, buffer) = handler();
        handler.handle(&Event::Warning {
            message: "low disk space".to_string(),
        });
        let lines = lines(&buffer);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["type"], "warning");
        assert!(lines[0]["timestamp"].is_string());
        assert_eq!(lines[0]["message"], "low disk space");
    }

    #[test]
    fn progress_events_throttle_within_the_same_bucket() {
        let (handler, buffer) = handler();
        for percent in [10.1, 10.4, 10.9] {
            handler.handle(&Event::EncodingProgress {
                segment: Some(0),
                percent,
                speed: 1.0,
                fps: 24.0,
                eta_seconds: 30,
            });
        }
        // Same whole-percent bucket, same key, no time elapsed: one line.
        assert_eq!(lines(&buffer).len(), 1);
    }

    #[test]
    fn bucket_change_forces_emission() {
        let (handler, buffer) = handler();
        for percent in [10.2, 11.0, 12.7] {
            handler.handle(&Event::EncodingProgress {
                segment: Some(0),
                percent,
                speed: 1.0,
                fps: 24.0,
                eta_seconds: 30,
            });
        }
        assert_eq!(lines(&buffer).len(), 3);
    }

    #[test]
    fn different_segments_throttle_independently() {
        let (handler, buffer) = handler();
        for segment in [0, 1, 2] {
            handler.handle(&Event::EncodingProgress {
                segment: Some(segment),
                percent: 50.0,
                speed: 1.0,
                fps: 24.0,
                eta_seconds: 30,
            });
        }
        assert_eq!(lines(&buffer).len(), 3);
    }

    #[test]
    fn terminal_events_are_never_throttled() {
        let (handler, buffer) = handler();
        for _ in 0..3 {
            handler.handle(&Event::EncodingComplete {
                input_file: "in.mkv".to_string(),
                output_file: "out.mkv".to_string(),
                original_size: 100,
                encoded_size: 50,
                total_seconds: 10,
                size_reduction_percent: 50.0,
            });
        }
        assert_eq!(lines(&buffer).len(), 3);
    }

    #[test]
    fn throttle_clock_rules() {
        let mut throttle = ProgressThrottle::default();
        let t0 = Instant::now();
        assert!(throttle.should_emit("k", 10.0, t0));
        // Same bucket, too soon.
        assert!(!throttle.should_emit("k", 10.5, t0 + Duration::from_secs(1)));
        // Same bucket, five seconds later.
        assert!(throttle.should_emit("k", 10.5, t0 + Duration::from_secs(5)));
        // New bucket, immediately.
        assert!(throttle.should_emit("k", 11.0, t0 + Duration::from_secs(5)));
    }

    #[test]
    fn validation_steps_serialize_as_objects() {
        let (handler, buffer) = handler();
        handler.handle(&Event::ValidationComplete {
            passed: false,
            steps: vec![super::super::ValidationStep {
                name: "video codec".to_string(),
                passed: false,
                details: "expected av1, found hevc".to_string(),
            }],
        });
        let lines = lines(&buffer);
        assert_eq!(lines[0]["type"], "validation_complete");
        assert_eq!(lines[0]["validation_passed"], false);
        assert_eq!(lines[0]["validation_steps"][0]["step"], "video codec");
    }
}
