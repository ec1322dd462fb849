//! Flag-to-config merging.
//!
//! Precedence: CLI flag > `KESTREL_*` environment variable > TOML file >
//! built-in default. `Config::from_file`/`Config::new` handle the lower
//! three layers; this module applies the flags on top and produces the
//! immutable value handed to the core.

use anyhow::{bail, Context, Result};
use std::path::Path;

use kestrel_core::config::Config;

use crate::cli::{Cli, SharedArgs};

/// Load the layered configuration for a parsed command line.
pub fn load_config(cli: &Cli, shared: &SharedArgs) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config file {}", path.display()))?,
        None => Config::new(),
    };

    apply_global_flags(&mut config, cli);
    apply_shared_flags(&mut config, shared)?;

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn apply_global_flags(config: &mut Config, cli: &Cli) {
    if cli.verbose {
        config.logging.verbose = true;
    }
    if cli.no_color {
        config.logging.no_color = true;
    }
    if let Some(sink) = &cli.progress_json {
        config.logging.progress_json = Some(sink.clone());
    }
}

fn apply_shared_flags(config: &mut Config, shared: &SharedArgs) -> Result<()> {
    if let Some(preset) = &shared.preset {
        config.video.profile = preset
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("--preset")?;
    }
    if let Some(crf) = &shared.crf {
        let (sd, hd, uhd) = parse_crf_spec(crf)?;
        config.video.crf_sd = sd;
        config.video.crf_hd = hd;
        config.video.crf_uhd = uhd;
    }
    if let Some(score) = shared.target_score {
        config.video.set_target_score(score);
    }
    if let Some(tolerance) = shared.score_tolerance {
        config.video.set_score_tolerance(tolerance);
    }
    if let Some(qp_min) = shared.qp_min {
        config.video.qp_min = qp_min;
    }
    if let Some(qp_max) = shared.qp_max {
        config.video.qp_max = qp_max;
    }
    if let Some(rounds) = shared.max_rounds {
        config.video.max_rounds = rounds;
    }
    if let Some(jobs) = shared.parallel_jobs {
        config.resources.parallel_jobs = jobs;
    }
    if let Some(memory) = shared.memory_per_job {
        config.resources.memory_per_job = memory;
    }
    if shared.disable_autocrop {
        config.crop_detection.disabled = true;
    }
    if shared.no_denoise {
        config.video.denoise = false;
    }
    if shared.no_tq_prediction {
        config.video.disable_prediction = true;
    }
    if let Some(dir) = &shared.temp_dir {
        config.directories.temp_dir = Some(dir.clone());
    }
    if shared.keep_temp_files {
        config.directories.keep_temp_files = true;
    }
    if let Some(url) = &shared.ntfy {
        config.logging.ntfy_topic = Some(url.clone());
    }
    Ok(())
}

/// Parse `--crf`: a single value for every tier, or "sd,hd,uhd".
pub fn parse_crf_spec(spec: &str) -> Result<(u8, u8, u8)> {
    let parts: Vec<&str> = spec.split(',').map(str::trim).collect();
    let parse = |s: &str| -> Result<u8> {
        s.parse::<u8>()
            .with_context(|| format!("invalid CRF value '{}'", s))
    };
    match parts.as_slice() {
        [single] => {
            let value = parse(single)?;
            Ok((value, value, value))
        }
        [sd, hd, uhd] => Ok((parse(sd)?, parse(hd)?, parse(uhd)?)),
        _ => bail!("--crf expects one value or \"sd,hd,uhd\", got '{}'", spec),
    }
}

/// Find the MKV files in a directory, sorted by name.
pub fn discover_mkv_files(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let mut files: Vec<std::path::PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("mkv"))
        })
        .collect();
    files.sort();
    if files.is_empty() {
        bail!("no .mkv files found in {}", dir.display());
    }
    Ok(files)
}
