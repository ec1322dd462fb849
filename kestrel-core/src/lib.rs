//! # kestrel-core
//!
//! Core library for quality-targeted, chunk-parallel AV1 transcoding.
//!
//! ## Overview
//!
//! This crate is the control plane around ffmpeg, ffprobe, mediainfo and an
//! external SSIMULACRA2 scorer: it probes and classifies sources, selects an
//! encoding path, segments at scene boundaries, drives a per-segment CRF
//! search against a perceptual quality target, schedules segment encodes
//! across a memory-aware worker pool, and reassembles and validates the
//! final MKV. Interrupted jobs resume from atomic checkpoints.
//!
//! ## Module Structure
//!
//! - `config`: configuration sections, profiles and the CRF tier table.
//! - `error`: `CoreError` kinds and the `CoreResult` alias.
//! - `external`: process runner and the per-tool wrappers.
//! - `analysis`: stream probe, classification, crop and grain detection.
//! - `planning`: scene-aligned segmentation and encoding-path routing.
//! - `tq`: the target-quality search, interpolation and CRF predictor.
//! - `scheduler`: worker pool, memory tokens and the retry policy.
//! - `assembly`: concatenation, Opus audio, muxing and validation.
//! - `events`: the event bus and the NDJSON progress sink.
//! - `state`: temp-tree lifecycle, checkpoints and resume.
//! - `pipeline`: per-file and batch orchestration.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use kestrel_core::cancel::CancelToken;
//! use kestrel_core::config::Config;
//! use kestrel_core::events::{EventDispatcher, NdjsonEventHandler};
//! use kestrel_core::pipeline::encode_file;
//!
//! let config = Config::new();
//! config.validate().unwrap();
//!
//! let mut events = EventDispatcher::new();
//! events.add_handler(Arc::new(NdjsonEventHandler::stdout()));
//!
//! let cancel = CancelToken::new();
//! let outcome = encode_file(
//!     Path::new("input.mkv"),
//!     Path::new("output.mkv"),
//!     &config,
//!     &events,
//!     &cancel,
//!     None,
//! ).unwrap();
//! println!("reduced to {} bytes", outcome.output_size);
//! ```

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// Media probing, classification, crop and grain analysis
pub mod analysis;

/// Chunk concatenation, audio encoding, muxing and output validation
pub mod assembly;

/// Cooperative cancellation token
pub mod cancel;

/// Configuration structures and profiles
pub mod config;

/// Custom error types and result definitions
pub mod error;

/// Pipeline event bus and NDJSON sink
pub mod events;

/// Interactions with external tools
pub mod external;

/// Push notifications
pub mod notifications;

/// Per-file and batch orchestration
pub mod pipeline;

/// Encoding-path routing and segmentation
pub mod planning;

/// Worker pool and memory admission
pub mod scheduler;

/// Checkpoint persistence and temp-dir lifecycle
pub mod state;

/// Target-quality search engine and CRF predictor
pub mod tq;

/// Formatting helpers
pub mod util;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// ----- Configuration -----
pub use config::{Config, Profile};

// ----- Error Handling -----
pub use error::{CoreError, CoreResult};

// ----- Cancellation -----
pub use cancel::CancelToken;

// ----- Events -----
pub use events::{Event, EventDispatcher, EventHandler, NdjsonEventHandler};

// ----- Pipeline -----
pub use pipeline::{emit_hardware_event, encode_batch, encode_file, EncodeOutcome};

// ----- Notifications -----
pub use notifications::{Notification, NtfySender};

// ----- Utilities -----
pub use util::{format_bytes, format_duration};
