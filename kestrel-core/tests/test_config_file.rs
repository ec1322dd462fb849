//! Tests for configuration file parsing
//!
//! These tests verify:
//! - Proper parsing of TOML configuration files with every section
//! - Correct default values for missing keys and sections
//! - Rejection of malformed files and invalid value combinations

use kestrel_core::config::Config;
use std::fs;
use tempfile::tempdir;

#[test]
fn full_config_file_parses() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("kestrel.toml");

    let config_content = r#"
[directories]
temp_dir = "/tmp/kestrel"
keep_temp_files = false

[video]
profile = "grain"
preset = 5
crf_sd = 24
crf_hd = 26
crf_uhd = 30
target_quality_min = 74.0
target_quality_max = 78.0
qp_min = 10
qp_max = 45
max_rounds = 8
sample_min_chunk = 6.0
sample_duration = 3.0
metric_aggregation = "p25"
svt_params = "tune=0"
denoise = true

[audio]
compression_level = 10
frame_duration = 20
vbr = true
application = "audio"

[scene_detection]
scene_threshold = 25.0
hdr_scene_threshold = 30.0
min_segment_length = 4.0
max_segment_length = 12.0

[crop_detection]
disabled = false
sdr_threshold = 16
min_height = 120

[validation]
duration_abs_tolerance = 0.2
duration_rel_tolerance = 0.05
min_chunk_bytes = 1024

[resources]
parallel_jobs = 4
memory_per_job = 2048
task_stagger_delay = 0.2
max_retries = 2

[logging]
verbose = false
log_level = "info"
"#;
    fs::write(&config_path, config_content).unwrap();

    let config = Config::from_file(&config_path).unwrap();
    config.validate().unwrap();

    assert_eq!(
        config.directories.temp_dir.as_deref(),
        Some(std::path::Path::new("/tmp/kestrel"))
    );
    assert_eq!(config.video.profile, kestrel_core::Profile::Grain);
    assert_eq!(config.video.preset, 5);
    assert_eq!(config.video.crf_uhd, 30);
    assert!((config.video.target_score() - 76.0).abs() < 1e-9);
    assert!((config.video.score_tolerance() - 2.0).abs() < 1e-9);
    assert_eq!(config.video.metric_aggregation, "p25");
    assert_eq!(config.scene_detection.min_segment_length, 4.0);
    assert_eq!(config.crop_detection.min_height, 120);
    assert_eq!(config.resources.parallel_jobs, 4);
}

#[test]
fn missing_sections_fall_back_to_defaults() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("partial.toml");
    fs::write(&config_path, "[video]\npreset = 7\n").unwrap();

    let config = Config::from_file(&config_path).unwrap();
    assert_eq!(config.video.preset, 7);
    assert_eq!(config.video.crf_sd, 25);
    assert_eq!(config.audio.compression_level, 10);
    assert_eq!(config.scene_detection.max_segment_length, 15.0);
    assert_eq!(config.validation.min_chunk_bytes, 1024);
}

#[test]
fn malformed_toml_is_a_config_error() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("broken.toml");
    fs::write(&config_path, "[video\npreset = ").unwrap();

    let err = Config::from_file(&config_path).unwrap_err();
    assert!(matches!(err, kestrel_core::CoreError::Config(_)));
}

#[test]
fn grain_synth_table_is_configurable() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("synth.toml");
    fs::write(
        &config_path,
        r#"
[video.grain_synth]
very_light = 5
medium = 10
"#,
    )
    .unwrap();

    let config = Config::from_file(&config_path).unwrap();
    assert_eq!(config.video.grain_synth.very_light, 5);
    assert_eq!(config.video.grain_synth.medium, 10);
    // Untouched entries keep their defaults.
    assert_eq!(config.video.grain_synth.light, 8);
    assert_eq!(config.video.grain_synth.very_clean, 0);
}
