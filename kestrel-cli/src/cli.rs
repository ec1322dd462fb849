// ============================================================================
// kestrel-cli/src/cli.rs
// ============================================================================
//
// COMMAND-LINE INTERFACE: Argument Definitions
//
// Defines the CLI surface with clap. Flags override environment variables,
// which override the config file, which overrides built-in defaults; the
// merge itself lives in config.rs.
//
// USAGE EXAMPLES:
// - Single file: kestrel encode movie.mkv -o out/
// - Batch:       kestrel batch /rips -o /encoded --preset grain
//
// AI-ASSISTANT-INFO: CLI argument definitions using clap

// ---- External crate imports ----
use clap::{Parser, Subcommand};

// ---- Standard library imports ----
use std::path::PathBuf;

/// Main CLI structure with global flags shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Kestrel: quality-targeted AV1 transcoding",
    long_about = "Converts MKV sources to AV1/Opus MKVs using a chunked, \
                  quality-targeted encode driven by ffmpeg and SVT-AV1."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional TOML config file.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug-level log output.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Disable colored terminal output.
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Write NDJSON progress events to a file, or "-" for stdout.
    #[arg(long, global = true, value_name = "PATH|-")]
    pub progress_json: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Encode one or more MKV files.
    Encode(EncodeArgs),

    /// Encode every MKV file found in a directory.
    Batch(BatchArgs),
}

/// Flags shared by `encode` and `batch`.
#[derive(Parser, Debug, Default)]
pub struct SharedArgs {
    /// Encoding profile.
    #[arg(long, value_name = "grain|clean|quick")]
    pub preset: Option<String>,

    /// CRF override: one value for all tiers, or "sd,hd,uhd".
    #[arg(long, value_name = "N|sd,hd,uhd")]
    pub crf: Option<String>,

    /// Target perceptual score for the quality search.
    #[arg(long, value_name = "SCORE")]
    pub target_score: Option<f64>,

    /// Tolerance around the target score.
    #[arg(long, value_name = "TOL")]
    pub score_tolerance: Option<f64>,

    /// Hard lower CRF bound for the search.
    #[arg(long, value_name = "N")]
    pub qp_min: Option<u8>,

    /// Hard upper CRF bound for the search.
    #[arg(long, value_name = "N")]
    pub qp_max: Option<u8>,

    /// Maximum probe rounds per segment.
    #[arg(long, value_name = "N")]
    pub max_rounds: Option<u32>,

    /// Worker pool size (default: CPU count).
    #[arg(long, value_name = "N")]
    pub parallel_jobs: Option<usize>,

    /// Estimated memory per encoding job, in MB.
    #[arg(long, value_name = "MB")]
    pub memory_per_job: Option<usize>,

    /// Skip black-bar detection.
    #[arg(long)]
    pub disable_autocrop: bool,

    /// Skip grain analysis and denoising.
    #[arg(long)]
    pub no_denoise: bool,

    /// Disable cross-segment CRF prediction.
    #[arg(long)]
    pub no_tq_prediction: bool,

    /// Base directory for temporary files.
    #[arg(long, value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Keep the temp tree after a successful encode.
    #[arg(long)]
    pub keep_temp_files: bool,

    /// ntfy topic URL for completion notifications.
    #[arg(long, value_name = "URL")]
    pub ntfy: Option<String>,
}

/// Arguments for the `encode` command.
#[derive(Parser, Debug)]
pub struct EncodeArgs {
    /// Input MKV files.
    #[arg(required = true, value_name = "INPUTS")]
    pub inputs: Vec<PathBuf>,

    /// Output file (single input) or directory.
    #[arg(short = 'o', long = "output", required = true, value_name = "OUTPUT")]
    pub output: PathBuf,

    #[command(flatten)]
    pub shared: SharedArgs,
}

/// Arguments for the `batch` command.
#[derive(Parser, Debug)]
pub struct BatchArgs {
    /// Directory containing MKV files to encode.
    #[arg(value_name = "DIR")]
    pub input_dir: PathBuf,

    /// Output directory.
    #[arg(short = 'o', long = "output", required = true, value_name = "OUTPUT_DIR")]
    pub output_dir: PathBuf,

    #[command(flatten)]
    pub shared: SharedArgs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_parses_multiple_inputs() {
        let cli = Cli::parse_from([
            "kestrel", "encode", "a.mkv", "b.mkv", "-o", "out", "--preset", "grain",
        ]);
        match cli.command {
            Commands::Encode(args) => {
                assert_eq!(args.inputs.len(), 2);
                assert_eq!(args.output, PathBuf::from("out"));
                assert_eq!(args.shared.preset.as_deref(), Some("grain"));
            }
            _ => panic!("expected encode"),
        }
    }

    #[test]
    fn batch_parses_quality_flags() {
        let cli = Cli::parse_from([
            "kestrel",
            "batch",
            "/rips",
            "-o",
            "/out",
            "--target-score",
            "80",
            "--score-tolerance",
            "1.5",
            "--qp-min",
            "10",
            "--qp-max",
            "45",
            "--no-tq-prediction",
        ]);
        match cli.command {
            Commands::Batch(args) => {
                assert_eq!(args.shared.target_score, Some(80.0));
                assert_eq!(args.shared.score_tolerance, Some(1.5));
                assert_eq!(args.shared.qp_min, Some(10));
                assert_eq!(args.shared.qp_max, Some(45));
                assert!(args.shared.no_tq_prediction);
            }
            _ => panic!("expected batch"),
        }
    }

    #[test]
    fn global_flags_apply_anywhere() {
        let cli = Cli::parse_from([
            "kestrel",
            "encode",
            "a.mkv",
            "-o",
            "out.mkv",
            "--verbose",
            "--no-color",
            "--progress-json",
            "-",
        ]);
        assert!(cli.verbose);
        assert!(cli.no_color);
        assert_eq!(cli.progress_json.as_deref(), Some("-"));
    }
}
