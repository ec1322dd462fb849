// ============================================================================
// kestrel-core/src/external/mod.rs
// ============================================================================
//
// EXTERNAL TOOLS: Interactions with External CLI Tools
//
// This module encapsulates every interaction with the external binaries the
// pipeline depends on: ffmpeg (encoding, segment analysis, muxing, audio),
// ffprobe (stream probing), mediainfo (HDR/Dolby Vision metadata) and the
// SSIMULACRA2 scorer. Each binary is required; absence fails fast with an
// error naming the missing tool.
//
// KEY COMPONENTS:
// - process: child spawning, line streaming, cancellation, stderr tails
// - progress: stdout progress parsers for the encoder and the scorer
// - ffmpeg: argument builders for every ffmpeg invocation
// - ffprobe_exec / mediainfo_exec / scorer: per-tool wrappers
//
// AI-ASSISTANT-INFO: External tool interactions for ffmpeg/ffprobe/mediainfo/scorer

use crate::error::{CoreError, CoreResult};

// ============================================================================
// SUBMODULES
// ============================================================================

/// Child process spawning, streaming and lifecycle management
pub mod process;

/// Progress line parsers for the encoder and scorer
pub mod progress;

/// ffmpeg argument builders
pub mod ffmpeg;

/// ffprobe execution and typed stream data
pub mod ffprobe_exec;

/// mediainfo execution for HDR/Dolby Vision metadata
pub mod mediainfo_exec;

/// SSIMULACRA2 scorer execution
pub mod scorer;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use ffmpeg::FfmpegCommandBuilder;
pub use process::{run_capture, run_streaming, CommandSpec, ProcessOutput};
pub use progress::{EncodeProgress, EncodeProgressParser, ScorerProgressParser};

// ============================================================================
// TOOL DISCOVERY
// ============================================================================

/// Binary names the pipeline invokes.
pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";
pub const MEDIAINFO: &str = "mediainfo";
pub const SCORER: &str = "ssimulacra2_rs";

/// All required tools, checked up front.
pub const REQUIRED_TOOLS: [&str; 4] = [FFMPEG, FFPROBE, MEDIAINFO, SCORER];

/// Verify that every required external tool is on PATH.
///
/// Called once at pipeline start so a missing binary is reported before any
/// work happens, naming the tool rather than failing mid-encode.
pub fn check_required_tools() -> CoreResult<()> {
    for tool in REQUIRED_TOOLS {
        if which::which(tool).is_err() {
            return Err(CoreError::ProcessLaunch {
                tool: tool.to_string(),
                reason: "not found on PATH".to_string(),
            });
        }
    }
    Ok(())
}
