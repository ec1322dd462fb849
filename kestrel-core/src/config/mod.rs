//! Configuration structures for the kestrel pipeline.
//!
//! The configuration is an immutable value threaded from the entry point.
//! Merging happens in the boundary layer with a fixed precedence:
//! CLI flag > `KESTREL_*` environment variable > TOML file > built-in default.
//! This module owns the file and environment halves of that chain; the CLI
//! applies its flags on top of the value returned here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};

pub mod profiles;

pub use profiles::{Profile, resolve_parameters};

/// Prefix for environment variable overrides (`KESTREL_SCENE_THRESHOLD`, ...).
pub const ENV_PREFIX: &str = "KESTREL";

// ---- Default CRF tiers ----

/// Default CRF for Standard Definition sources (<1280 width).
pub const DEFAULT_CRF_SD: u8 = 25;
/// Default CRF for High Definition sources (<3840 width).
pub const DEFAULT_CRF_HD: u8 = 25;
/// Default CRF for Ultra High Definition sources (>=3840 width).
pub const DEFAULT_CRF_UHD: u8 = 29;

/// Top-level configuration, one field per TOML section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub directories: DirectoriesConfig,
    pub video: VideoConfig,
    pub audio: AudioConfig,
    pub scene_detection: SceneDetectionConfig,
    pub crop_detection: CropDetectionConfig,
    pub validation: ValidationConfig,
    pub resources: ResourcesConfig,
    pub logging: LoggingConfig,
}

/// `[directories]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoriesConfig {
    /// Base directory for the per-job temp tree. Defaults to the system
    /// temp directory when unset.
    pub temp_dir: Option<PathBuf>,
    /// Preserve the temp tree after a successful encode (diagnostics).
    pub keep_temp_files: bool,
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            keep_temp_files: false,
        }
    }
}

/// `[video]` section: encoder, quality targets and grain handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Encoding profile selecting the parameter bundle.
    pub profile: Profile,
    /// SVT-AV1 preset (0-13). Lower is slower and higher quality.
    pub preset: u8,
    /// Preset used by the Quick profile instead of `preset`.
    pub quick_preset: u8,
    /// Per-tier CRF overrides.
    pub crf_sd: u8,
    pub crf_hd: u8,
    pub crf_uhd: u8,
    /// Target-quality window. The search aims for the midpoint and treats
    /// half the window as tolerance.
    pub target_quality_min: f64,
    pub target_quality_max: f64,
    /// Hard CRF bounds for the target-quality search.
    pub qp_min: u8,
    pub qp_max: u8,
    /// Maximum probe rounds per segment.
    pub max_rounds: u32,
    /// Segments at least this long are probed on a middle slice only.
    pub sample_min_chunk: f64,
    /// Length of the probe slice in seconds.
    pub sample_duration: f64,
    /// Lead-in seconds encoded but excluded from scoring.
    pub sample_warmup: f64,
    /// Per-frame score aggregation: "mean" or a percentile like "p25".
    pub metric_aggregation: String,
    /// Amount subtracted from the target score on a segment's final retry.
    pub force_quality_score: f64,
    /// Disable cross-segment CRF prediction.
    pub disable_prediction: bool,
    /// Output pixel format.
    pub pix_fmt: String,
    /// Base SVT-AV1 parameter string; film-grain synthesis is appended.
    pub svt_params: String,
    /// Enable denoise/grain analysis.
    pub denoise: bool,
    /// Knee-point threshold for grain analysis (fraction of max efficiency).
    pub grain_knee_threshold: f64,
    /// Duration of each grain-analysis sample in seconds.
    pub grain_sample_duration: f64,
    /// Upper cap applied to the detected grain level.
    pub max_grain_level: crate::analysis::grain::GrainLevel,
    /// Film-grain synthesis strength per detected grain level.
    pub grain_synth: GrainSynthTable,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Clean,
            preset: 6,
            quick_preset: 8,
            crf_sd: DEFAULT_CRF_SD,
            crf_hd: DEFAULT_CRF_HD,
            crf_uhd: DEFAULT_CRF_UHD,
            target_quality_min: 75.0,
            target_quality_max: 79.0,
            qp_min: 8,
            qp_max: 48,
            max_rounds: 10,
            sample_min_chunk: 6.0,
            sample_duration: 3.0,
            sample_warmup: 0.5,
            metric_aggregation: "mean".to_string(),
            force_quality_score: 2.0,
            disable_prediction: false,
            pix_fmt: "yuv420p10le".to_string(),
            svt_params: "tune=0".to_string(),
            denoise: true,
            grain_knee_threshold: 0.8,
            grain_sample_duration: 10.0,
            max_grain_level: crate::analysis::grain::GrainLevel::Medium,
            grain_synth: GrainSynthTable::default(),
        }
    }
}

impl VideoConfig {
    /// Target score the search converges toward (window midpoint).
    pub fn target_score(&self) -> f64 {
        (self.target_quality_min + self.target_quality_max) / 2.0
    }

    /// Convergence tolerance (half the target window).
    pub fn score_tolerance(&self) -> f64 {
        (self.target_quality_max - self.target_quality_min) / 2.0
    }

    /// Re-center the target window on `score`, preserving the tolerance.
    pub fn set_target_score(&mut self, score: f64) {
        let tol = self.score_tolerance();
        self.target_quality_min = score - tol;
        self.target_quality_max = score + tol;
    }

    /// Resize the target window around the current midpoint.
    pub fn set_score_tolerance(&mut self, tolerance: f64) {
        let mid = self.target_score();
        self.target_quality_min = mid - tolerance;
        self.target_quality_max = mid + tolerance;
    }
}

/// Film-grain synthesis strength table, keyed by detected grain level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GrainSynthTable {
    pub very_clean: u8,
    pub very_light: u8,
    pub light: u8,
    pub visible: u8,
    pub medium: u8,
}

impl Default for GrainSynthTable {
    fn default() -> Self {
        Self {
            very_clean: 0,
            very_light: 4,
            light: 8,
            visible: 12,
            medium: 16,
        }
    }
}

/// `[audio]` section: Opus encoding parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Opus compression level (0-10).
    pub compression_level: u8,
    /// Opus frame duration in milliseconds.
    pub frame_duration: u8,
    /// Variable bitrate mode.
    pub vbr: bool,
    /// Opus application mode.
    pub application: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            compression_level: 10,
            frame_duration: 20,
            vbr: true,
            application: "audio".to_string(),
        }
    }
}

/// `[scene_detection]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneDetectionConfig {
    /// Scene-change threshold for SDR content (0-100).
    pub scene_threshold: f32,
    /// Scene-change threshold for HDR content (0-100).
    pub hdr_scene_threshold: f32,
    /// Minimum segment length in seconds.
    pub min_segment_length: f64,
    /// Maximum segment length in seconds.
    pub max_segment_length: f64,
    /// A boundary within this many seconds of a detected cut counts as a
    /// scene-cut boundary.
    pub scene_tolerance: f64,
}

impl Default for SceneDetectionConfig {
    fn default() -> Self {
        Self {
            scene_threshold: 27.0,
            hdr_scene_threshold: 30.0,
            min_segment_length: 5.0,
            max_segment_length: 15.0,
            scene_tolerance: 0.5,
        }
    }
}

/// `[crop_detection]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CropDetectionConfig {
    /// Disable automatic crop detection.
    pub disabled: bool,
    /// cropdetect luma threshold for SDR content.
    pub sdr_threshold: u32,
    /// Multiplier applied to the measured HDR black level.
    pub hdr_black_level_multiplier: f64,
    /// Reject crops that leave less than this many pixels of height.
    pub min_height: u32,
    /// Reject crops whose bars are less than this percentage of the frame
    /// height.
    pub min_black_bar_percent: f64,
    /// Seconds between sampled frames during detection.
    pub sample_spacing: f64,
    /// Lower bound on the number of sampled frames.
    pub min_samples: u32,
}

impl Default for CropDetectionConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            sdr_threshold: 16,
            hdr_black_level_multiplier: 1.5,
            min_height: 100,
            min_black_bar_percent: 2.0,
            sample_spacing: 5.0,
            min_samples: 20,
        }
    }
}

/// `[validation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Absolute output-duration tolerance in seconds.
    pub duration_abs_tolerance: f64,
    /// Relative output-duration tolerance (fraction of source duration).
    pub duration_rel_tolerance: f64,
    /// Minimum size in bytes for every concatenated chunk.
    pub min_chunk_bytes: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            duration_abs_tolerance: 0.2,
            duration_rel_tolerance: 0.05,
            min_chunk_bytes: 1024,
        }
    }
}

/// `[resources]` section: worker pool and memory admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    /// Worker count; 0 means auto-detect from CPU count.
    pub parallel_jobs: usize,
    /// Estimated memory per encoding job in MB.
    pub memory_per_job: usize,
    /// Global memory token capacity; 0 means derive from system memory.
    pub max_memory_tokens: usize,
    /// Seconds between worker startups.
    pub task_stagger_delay: f64,
    /// Segment retry budget for retryable failures.
    pub max_retries: u32,
    /// Wall-clock timeout multiplier over the expected encode duration.
    pub process_timeout_multiplier: f64,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            parallel_jobs: 0,
            memory_per_job: 2048,
            max_memory_tokens: 0,
            task_stagger_delay: 0.2,
            max_retries: 2,
            process_timeout_multiplier: 4.0,
        }
    }
}

/// `[logging]` section, including the structured progress sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub verbose: bool,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
    /// NDJSON progress sink: a file path or "-" for stdout.
    pub progress_json: Option<String>,
    pub no_color: bool,
    /// Optional ntfy topic URL for completion/failure notifications.
    pub ntfy_topic: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_level: "info".to_string(),
            log_dir: None,
            progress_json: None,
            no_color: false,
            ntfy_topic: None,
        }
    }
}

impl Config {
    /// Built-in defaults with environment overrides applied.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Load a TOML config file, then apply environment overrides on top.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `KESTREL_*` environment variables over the current values.
    ///
    /// Keys are the upper-cased leaf names of the config fields, e.g.
    /// `KESTREL_SCENE_THRESHOLD` or `KESTREL_TARGET_SCORE`.
    pub fn apply_env_overrides(&mut self) {
        fn get<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(format!("{}_{}", ENV_PREFIX, key))
                .ok()
                .and_then(|v| v.parse().ok())
        }

        if let Some(v) = get("PRESET") {
            self.video.preset = v;
        }
        if let Some(v) = get::<String>("PROFILE") {
            if let Ok(p) = v.parse() {
                self.video.profile = p;
            }
        }
        if let Some(v) = get("CRF_SD") {
            self.video.crf_sd = v;
        }
        if let Some(v) = get("CRF_HD") {
            self.video.crf_hd = v;
        }
        if let Some(v) = get("CRF_UHD") {
            self.video.crf_uhd = v;
        }
        if let Some(v) = get("TARGET_SCORE") {
            self.video.set_target_score(v);
        }
        if let Some(v) = get("SCORE_TOLERANCE") {
            self.video.set_score_tolerance(v);
        }
        if let Some(v) = get("QP_MIN") {
            self.video.qp_min = v;
        }
        if let Some(v) = get("QP_MAX") {
            self.video.qp_max = v;
        }
        if let Some(v) = get("MAX_ROUNDS") {
            self.video.max_rounds = v;
        }
        if let Some(v) = get("SCENE_THRESHOLD") {
            self.scene_detection.scene_threshold = v;
        }
        if let Some(v) = get("HDR_SCENE_THRESHOLD") {
            self.scene_detection.hdr_scene_threshold = v;
        }
        if let Some(v) = get("MIN_SEGMENT_LENGTH") {
            self.scene_detection.min_segment_length = v;
        }
        if let Some(v) = get("MAX_SEGMENT_LENGTH") {
            self.scene_detection.max_segment_length = v;
        }
        if let Some(v) = get("PARALLEL_JOBS") {
            self.resources.parallel_jobs = v;
        }
        if let Some(v) = get("MEMORY_PER_JOB") {
            self.resources.memory_per_job = v;
        }
        if let Some(v) = get("MAX_RETRIES") {
            self.resources.max_retries = v;
        }
        if let Some(v) = get("TASK_STAGGER_DELAY") {
            self.resources.task_stagger_delay = v;
        }
        if let Some(v) = get::<PathBuf>("TEMP_DIR") {
            self.directories.temp_dir = Some(v);
        }
        if let Some(v) = get("KEEP_TEMP_FILES") {
            self.directories.keep_temp_files = v;
        }
        if let Some(v) = get("VERBOSE") {
            self.logging.verbose = v;
        }
        if let Some(v) = get::<String>("NTFY_TOPIC") {
            self.logging.ntfy_topic = Some(v);
        }
    }

    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> CoreResult<()> {
        if self.video.qp_min >= self.video.qp_max {
            return Err(CoreError::Config(format!(
                "qp_min ({}) must be below qp_max ({})",
                self.video.qp_min, self.video.qp_max
            )));
        }
        if self.video.target_quality_min >= self.video.target_quality_max {
            return Err(CoreError::Config(
                "target quality window is empty (min >= max)".to_string(),
            ));
        }
        if self.scene_detection.min_segment_length >= self.scene_detection.max_segment_length {
            return Err(CoreError::Config(format!(
                "min_segment_length ({}) must be below max_segment_length ({})",
                self.scene_detection.min_segment_length, self.scene_detection.max_segment_length
            )));
        }
        if self.video.max_rounds == 0 {
            return Err(CoreError::Config("max_rounds must be at least 1".to_string()));
        }
        crate::tq::parse_aggregation(&self.video.metric_aggregation)?;
        Ok(())
    }

    /// Effective worker count after auto-detection.
    pub fn worker_count(&self) -> usize {
        if self.resources.parallel_jobs == 0 {
            num_cpus::get()
        } else {
            self.resources.parallel_jobs
        }
    }
}
