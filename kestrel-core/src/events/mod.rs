//! Pipeline event bus.
//!
//! Every stage reports through [`Event`] values dispatched to registered
//! handlers. Handlers are synchronous; per-segment ordering follows the
//! order the producing worker emits in, cross-segment ordering is not
//! guaranteed.

use std::sync::Arc;

pub mod ndjson;

pub use ndjson::NdjsonEventHandler;

/// One validation step outcome for `validation_complete`.
#[derive(Debug, Clone)]
pub struct ValidationStep {
    pub name: String,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone)]
pub enum Event {
    // System information
    Hardware {
        hostname: String,
        os: String,
        cpu: String,
        memory: String,
    },

    // Per-file initialization
    Initialization {
        input_file: String,
        output_file: String,
        duration_secs: f64,
        resolution: String,
        tier: String,
        dynamic_range: String,
        audio_description: String,
    },

    // Analysis / assembly stage progress
    StageProgress {
        stage: String,
        percent: f64,
        message: String,
        eta_seconds: Option<u64>,
    },

    CropResult {
        crop_required: bool,
        crop_params: Option<String>,
    },

    // Encoding lifecycle
    EncodingConfig {
        encoder: String,
        preset: u8,
        mode: String,
        pixel_format: String,
        svt_params: String,
        film_grain: u8,
        audio_codec: String,
    },

    EncodingStarted {
        total_segments: usize,
    },

    EncodingProgress {
        segment: Option<usize>,
        percent: f64,
        speed: f64,
        fps: f64,
        eta_seconds: u64,
    },

    ValidationComplete {
        passed: bool,
        steps: Vec<ValidationStep>,
    },

    EncodingComplete {
        input_file: String,
        output_file: String,
        original_size: u64,
        encoded_size: u64,
        total_seconds: u64,
        size_reduction_percent: f64,
    },

    // Diagnostics
    Warning {
        message: String,
    },

    Error {
        title: String,
        message: String,
        context: Option<String>,
        suggestion: Option<String>,
    },

    // Batch lifecycle
    BatchStarted {
        total_files: usize,
        file_list: Vec<String>,
    },

    FileProgress {
        current_file: usize,
        total_files: usize,
        filename: String,
    },

    BatchComplete {
        successful_count: usize,
        total_files: usize,
        total_original_size: u64,
        total_encoded_size: u64,
        total_seconds: u64,
    },
}

impl Event {
    /// Stable NDJSON `type` tag for this event.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::Hardware { .. } => "hardware",
            Event::Initialization { .. } => "initialization",
            Event::StageProgress { .. } => "stage_progress",
            Event::CropResult { .. } => "crop_result",
            Event::EncodingConfig { .. } => "encoding_config",
            Event::EncodingStarted { .. } => "encoding_started",
            Event::EncodingProgress { .. } => "encoding_progress",
            Event::ValidationComplete { .. } => "validation_complete",
            Event::EncodingComplete { .. } => "encoding_complete",
            Event::Warning { .. } => "warning",
            Event::Error { .. } => "error",
            Event::BatchStarted { .. } => "batch_started",
            Event::FileProgress { .. } => "file_progress",
            Event::BatchComplete { .. } => "batch_complete",
        }
    }

    /// Progress events may be throttled and dropped; terminal events must
    /// always reach the sink.
    pub fn is_progress(&self) -> bool {
        matches!(
            self,
            Event::StageProgress { .. } | Event::EncodingProgress { .. }
        )
    }
}

pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event);
}

/// Fan-out dispatcher owned by the pipeline coordinator.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn emit(&self, event: Event) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<&'static str>>,
    }

    impl EventHandler for Recorder {
        fn handle(&self, event: &Event) {
            self.seen.lock().unwrap().push(event.type_name());
        }
    }

    #[test]
    fn dispatcher_fans_out_to_all_handlers() {
        let a = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let b = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_handler(a.clone());
        dispatcher.add_handler(b.clone());

        dispatcher.emit(Event::Warning {
            message: "test".to_string(),
        });
        assert_eq!(*a.seen.lock().unwrap(), vec!["warning"]);
        assert_eq!(*b.seen.lock().unwrap(), vec!["warning"]);
    }

    #[test]
    fn progress_classification() {
        let progress = Event::EncodingProgress {
            segment: Some(1),
            percent: 10.0,
            speed: 1.0,
            fps: 24.0,
            eta_seconds: 100,
        };
        assert!(progress.is_progress());
        let complete = Event::BatchComplete {
            successful_count: 1,
            total_files: 1,
            total_original_size: 10,
            total_encoded_size: 5,
            total_seconds: 60,
        };
        assert!(!complete.is_progress());
    }
}
