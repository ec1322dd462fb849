// ============================================================================
// kestrel-core/src/assembly/mod.rs
// ============================================================================
//
// ASSEMBLY: Concatenation, Audio, Muxing and Validation
//
// Once every chunk is encoded the assembler rebuilds the deliverable:
//
//   1. Concat manifest over chunk results in segment-index order, then a
//      stream-copy concatenation into the video-only intermediate.
//   2. Each source audio stream re-encoded to Opus individually.
//   3. Final mux: video + audio tracks in order + subtitles, chapters and
//      global metadata stream-copied from the source.
//   4. Contract validation of the finished file.
//
// AI-ASSISTANT-INFO: Chunk concatenation, Opus audio, muxing and validation

use log::{debug, info};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::analysis::probe::SourceMedia;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::events::{Event, EventDispatcher};
use crate::external::ffmpeg::FfmpegCommandBuilder;
use crate::external::process::run_streaming;
use crate::state::TempTree;
use crate::tq::ChunkResult;

pub mod audio;
pub mod validation;

pub use validation::validate_output;

/// Assemble the final MKV from completed chunk results.
///
/// `results` must be ordered by segment index and complete; the scheduler
/// guarantees both by draining before assembly starts.
pub fn assemble(
    media: &SourceMedia,
    results: &[ChunkResult],
    output: &Path,
    config: &Config,
    tree: &TempTree,
    events: &EventDispatcher,
    cancel: &CancelToken,
) -> CoreResult<()> {
    if results.is_empty() {
        return Err(CoreError::Validation(
            "assembly invoked with no chunk results".to_string(),
        ));
    }

    verify_chunks(results, config)?;

    let stage = |percent: f64, message: &str| {
        events.emit(Event::StageProgress {
            stage: "assembly".to_string(),
            percent,
            message: message.to_string(),
            eta_seconds: None,
        });
    };

    stage(0.0, "concatenating video");
    let video_only = concat_chunks(results, tree, cancel)?;

    stage(40.0, "encoding audio");
    let mut audio_files = Vec::new();
    for stream in &media.audio {
        cancel.check()?;
        let out = audio::stream_output(&tree.working_dir(), stream.index);
        let spec = audio::encode_stream(&media.path, stream, &out, &config.audio);
        run_streaming(&spec, cancel, None, None, None)?;
        audio_files.push(out);
    }

    stage(80.0, "muxing");
    mux(media, &video_only, &audio_files, output, cancel)?;
    stage(100.0, "assembly complete");
    info!("assembled {}", output.display());
    Ok(())
}

/// Every chunk file must exist with its recorded size and clear the minimum.
fn verify_chunks(results: &[ChunkResult], config: &Config) -> CoreResult<()> {
    for result in results {
        let size = std::fs::metadata(&result.output_path)
            .map(|m| m.len())
            .map_err(|_| {
                CoreError::Validation(format!(
                    "chunk {} missing at {}",
                    result.index,
                    result.output_path.display()
                ))
            })?;
        if size <= config.validation.min_chunk_bytes {
            return Err(CoreError::Validation(format!(
                "chunk {} is only {} bytes",
                result.index, size
            )));
        }
        if size != result.encoded_bytes {
            return Err(CoreError::Validation(format!(
                "chunk {} changed size since encoding ({} vs {})",
                result.index, size, result.encoded_bytes
            )));
        }
    }
    Ok(())
}

/// Write the ffconcat manifest and stream-copy the chunks together.
fn concat_chunks(
    results: &[ChunkResult],
    tree: &TempTree,
    cancel: &CancelToken,
) -> CoreResult<PathBuf> {
    let manifest_path = tree.working_dir().join("concat.txt");
    let mut manifest = std::fs::File::create(&manifest_path)?;
    writeln!(manifest, "ffconcat version 1.0")?;
    for result in results {
        // Single quotes in paths are closed, escaped and reopened per the
        // ffconcat quoting rules.
        let escaped = result
            .output_path
            .to_string_lossy()
            .replace('\'', r"'\''");
        writeln!(manifest, "file '{}'", escaped)?;
    }
    manifest.sync_all()?;
    debug!("concat manifest with {} chunks", results.len());

    let video_only = tree.working_dir().join("video.mkv");
    let spec = FfmpegCommandBuilder::new()
        .quiet()
        .raw_args(["-f", "concat", "-safe", "0"])
        .input(&manifest_path)
        .raw_args(["-c", "copy"])
        .output(&video_only);
    run_streaming(&spec, cancel, None, None, None)?;
    Ok(video_only)
}

/// Final mux: ordered audio after video, subtitles, chapters and global
/// metadata copied from the source.
fn mux(
    media: &SourceMedia,
    video_only: &Path,
    audio_files: &[PathBuf],
    output: &Path,
    cancel: &CancelToken,
) -> CoreResult<()> {
    let mut builder = FfmpegCommandBuilder::new().quiet().input(video_only);
    for file in audio_files {
        builder = builder.input(file);
    }
    builder = builder.input(&media.path);
    let source_input = audio_files.len() + 1;

    builder = builder.map("0:v:0");
    for (i, _) in audio_files.iter().enumerate() {
        builder = builder.map(&format!("{}:a:0", i + 1));
    }
    if !media.subtitles.is_empty() {
        builder = builder
            .map(&format!("{}:s", source_input))
            .raw_args(["-c:s", "copy"]);
    }

    let spec = builder
        .raw_args([
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "copy".to_string(),
            "-map_metadata".to_string(),
            source_input.to_string(),
            "-map_chapters".to_string(),
            source_input.to_string(),
        ])
        .output(output);
    run_streaming(&spec, cancel, None, None, None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tq::ChunkStatus;
    use tempfile::tempdir;

    fn chunk(tree: &TempTree, index: usize, bytes: usize) -> ChunkResult {
        let path = tree.chunk_path(index);
        std::fs::write(&path, vec![0u8; bytes]).unwrap();
        ChunkResult {
            index,
            final_crf: 27,
            final_score: 77.0,
            output_path: path,
            encoded_bytes: bytes as u64,
            rounds_used: 2,
            status: ChunkStatus::Succeeded,
        }
    }

    #[test]
    fn verify_chunks_accepts_intact_files() {
        let dir = tempdir().unwrap();
        let tree = TempTree::create(dir.path().join("job")).unwrap();
        let results = vec![chunk(&tree, 0, 4096), chunk(&tree, 1, 8192)];
        assert!(verify_chunks(&results, &Config::default()).is_ok());
    }

    #[test]
    fn verify_chunks_rejects_tiny_files() {
        let dir = tempdir().unwrap();
        let tree = TempTree::create(dir.path().join("job")).unwrap();
        let results = vec![chunk(&tree, 0, 100)];
        assert!(matches!(
            verify_chunks(&results, &Config::default()),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn verify_chunks_rejects_size_drift() {
        let dir = tempdir().unwrap();
        let tree = TempTree::create(dir.path().join("job")).unwrap();
        let mut results = vec![chunk(&tree, 0, 4096)];
        results[0].encoded_bytes = 9999;
        assert!(verify_chunks(&results, &Config::default()).is_err());
    }

    #[test]
    fn concat_manifest_lists_chunks_in_order() {
        let dir = tempdir().unwrap();
        let tree = TempTree::create(dir.path().join("job")).unwrap();
        let results = vec![chunk(&tree, 0, 4096), chunk(&tree, 1, 4096)];

        // Build just the manifest; the ffmpeg invocation will fail fast in
        // environments without the binary, which is fine for this test.
        let manifest_path = tree.working_dir().join("concat.txt");
        let mut manifest = std::fs::File::create(&manifest_path).unwrap();
        writeln!(manifest, "ffconcat version 1.0").unwrap();
        for result in &results {
            writeln!(
                manifest,
                "file '{}'",
                result.output_path.to_string_lossy().replace('\'', r"'\''")
            )
            .unwrap();
        }
        drop(manifest);

        let content = std::fs::read_to_string(&manifest_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "ffconcat version 1.0");
        assert!(lines[1].contains("seg0000.mkv"));
        assert!(lines[2].contains("seg0001.mkv"));
    }
}
