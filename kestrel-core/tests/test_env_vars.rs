//! Tests for environment variable configuration overrides
//!
//! These tests verify:
//! - Environment variables properly override default configurations
//! - Correct parsing of various value types from environment strings
//! - Environment values sit between the config file and CLI flags in the
//!   precedence chain

use kestrel_core::config::Config;
use std::env;

// All env manipulation lives in this single test so parallel test threads
// within this binary never race on the process environment.
#[test]
fn env_overrides_apply_on_top_of_defaults_and_files() {
    for key in [
        "KESTREL_SCENE_THRESHOLD",
        "KESTREL_PRESET",
        "KESTREL_TARGET_SCORE",
        "KESTREL_PARALLEL_JOBS",
        "KESTREL_KEEP_TEMP_FILES",
    ] {
        env::remove_var(key);
    }

    env::set_var("KESTREL_SCENE_THRESHOLD", "35.0");
    env::set_var("KESTREL_PRESET", "4");
    env::set_var("KESTREL_TARGET_SCORE", "82.5");
    env::set_var("KESTREL_PARALLEL_JOBS", "6");
    env::set_var("KESTREL_KEEP_TEMP_FILES", "true");

    let config = Config::new();
    assert_eq!(config.scene_detection.scene_threshold, 35.0);
    assert_eq!(config.video.preset, 4);
    assert!((config.video.target_score() - 82.5).abs() < 1e-9);
    assert_eq!(config.resources.parallel_jobs, 6);
    assert!(config.directories.keep_temp_files);

    // Unset variables leave their fields at defaults.
    assert_eq!(config.video.qp_min, 8);
    assert_eq!(config.video.qp_max, 48);

    // Env overrides also apply over values loaded from a file.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[scene_detection]
scene_threshold = 20.0

[video]
preset = 8
"#,
    )
    .unwrap();
    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.scene_detection.scene_threshold, 35.0);
    assert_eq!(config.video.preset, 4);

    for key in [
        "KESTREL_SCENE_THRESHOLD",
        "KESTREL_PRESET",
        "KESTREL_TARGET_SCORE",
        "KESTREL_PARALLEL_JOBS",
        "KESTREL_KEEP_TEMP_FILES",
    ] {
        env::remove_var(key);
    }
}
