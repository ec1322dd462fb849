//! ffmpeg argument construction.
//!
//! All ffmpeg invocations are assembled here or through the
//! [`FfmpegCommandBuilder`], so global flags (banner suppression, stdin
//! isolation, overwrite behavior) stay consistent across the pipeline.

use std::path::Path;

use crate::config::profiles::EncodingParams;
use crate::external::process::CommandSpec;
use crate::external::FFMPEG;
use crate::util::format_ffmpeg_time;

/// Builder for ffmpeg command lines.
///
/// Methods append arguments in call order, which matters to ffmpeg: seek and
/// input options must precede `.input()`, output options follow it.
#[derive(Debug)]
pub struct FfmpegCommandBuilder {
    spec: CommandSpec,
}

impl Default for FfmpegCommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegCommandBuilder {
    pub fn new() -> Self {
        let spec = CommandSpec::new(FFMPEG).args(["-hide_banner", "-nostdin", "-y"]);
        Self { spec }
    }

    /// Quiet stderr except for errors. Analysis passes that parse stderr
    /// (cropdetect, scene detection) must not use this.
    pub fn quiet(mut self) -> Self {
        self.spec = self.spec.args(["-loglevel", "error"]);
        self
    }

    /// Machine-readable progress on stdout.
    pub fn progress_stdout(mut self) -> Self {
        self.spec = self.spec.args(["-progress", "pipe:1", "-nostats"]);
        self
    }

    /// Input-side fast seek. Must be called before [`Self::input`].
    pub fn seek(mut self, seconds: f64) -> Self {
        self.spec = self.spec.args(["-ss".to_string(), format_ffmpeg_time(seconds)]);
        self
    }

    pub fn input(mut self, path: &Path) -> Self {
        self.spec = self
            .spec
            .args(["-i".to_string(), path.to_string_lossy().into_owned()]);
        self
    }

    /// Output-side duration limit.
    pub fn limit_duration(mut self, seconds: f64) -> Self {
        self.spec = self.spec.args(["-t".to_string(), format_ffmpeg_time(seconds)]);
        self
    }

    pub fn map(mut self, selector: &str) -> Self {
        self.spec = self.spec.args(["-map", selector]);
        self
    }

    pub fn video_filter(mut self, chain: &str) -> Self {
        self.spec = self.spec.args(["-vf", chain]);
        self
    }

    pub fn raw_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec = self.spec.args(args);
        self
    }

    pub fn output(mut self, path: &Path) -> CommandSpec {
        self.spec = self.spec.arg(path.to_string_lossy().into_owned());
        self.spec
    }

    /// Null-sink output for analysis passes.
    pub fn output_null(mut self) -> CommandSpec {
        self.spec = self.spec.args(["-f", "null", "-"]);
        self.spec
    }
}

/// Encode a slice of the source video with SVT-AV1 at the given CRF.
///
/// `start`/`duration` of `None` encode the full source. Audio and subtitles
/// are excluded; chunk outputs are video-only and muxed later.
pub fn encode_video_slice(
    source: &Path,
    output: &Path,
    start: Option<f64>,
    duration: Option<f64>,
    crf: u32,
    params: &EncodingParams,
) -> CommandSpec {
    let mut builder = FfmpegCommandBuilder::new().quiet().progress_stdout();
    if let Some(start) = start {
        builder = builder.seek(start);
    }
    builder = builder.input(source);
    if let Some(duration) = duration {
        builder = builder.limit_duration(duration);
    }
    builder = builder.map("0:v:0");
    if let Some(chain) = params.filter_chain() {
        builder = builder.video_filter(&chain);
    }
    builder
        .raw_args([
            "-an".to_string(),
            "-sn".to_string(),
            "-c:v".to_string(),
            "libsvtav1".to_string(),
            "-preset".to_string(),
            params.preset.to_string(),
            "-crf".to_string(),
            crf.to_string(),
            "-pix_fmt".to_string(),
            params.pix_fmt.clone(),
            "-svtav1-params".to_string(),
            params.svt_params.clone(),
        ])
        .output(output)
}

/// Extract a losslessly coded reference slice for the scorer.
///
/// The same filter chain as the encode is applied so the scorer measures
/// encoder fidelity rather than the crop/denoise transform itself, and the
/// same seek path keeps the frames aligned with the probe encode.
pub fn extract_reference_slice(
    source: &Path,
    output: &Path,
    start: f64,
    duration: f64,
    params: &EncodingParams,
) -> CommandSpec {
    let mut builder = FfmpegCommandBuilder::new()
        .quiet()
        .seek(start)
        .input(source)
        .limit_duration(duration)
        .map("0:v:0");
    if let Some(chain) = params.filter_chain() {
        builder = builder.video_filter(&chain);
    }
    builder
        .raw_args(["-an", "-sn", "-c:v", "ffv1", "-level", "3"])
        .output(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::profiles::EncodingParams;
    use std::path::PathBuf;

    fn params() -> EncodingParams {
        EncodingParams {
            preset: 6,
            pix_fmt: "yuv420p10le".to_string(),
            svt_params: "tune=0:film-grain=8:film-grain-denoise=0".to_string(),
            denoise_filter: Some("1:0.7:4:4".to_string()),
            crop_filter: Some("crop=1920:800:0:140".to_string()),
            film_grain: 8,
        }
    }

    #[test]
    fn slice_encode_orders_seek_before_input() {
        let spec = encode_video_slice(
            &PathBuf::from("src.mkv"),
            &PathBuf::from("out.mkv"),
            Some(30.0),
            Some(3.0),
            27,
            &params(),
        );
        let args = spec.args.join(" ");
        let ss_pos = args.find("-ss").unwrap();
        let i_pos = args.find("-i src.mkv").unwrap();
        let t_pos = args.find("-t").unwrap();
        assert!(ss_pos < i_pos && i_pos < t_pos);
        assert!(args.contains("-crf 27"));
        assert!(args.contains("libsvtav1"));
        assert!(args.contains("-vf crop=1920:800:0:140,hqdn3d=1:0.7:4:4"));
        assert!(args.contains("-svtav1-params tune=0:film-grain=8:film-grain-denoise=0"));
    }

    #[test]
    fn full_encode_omits_seek_and_duration() {
        let spec = encode_video_slice(
            &PathBuf::from("src.mkv"),
            &PathBuf::from("out.mkv"),
            None,
            None,
            25,
            &params(),
        );
        let args = spec.args.join(" ");
        assert!(!args.contains("-ss"));
        assert!(!args.contains("-t "));
    }

    #[test]
    fn reference_slice_is_lossless_with_same_filters() {
        let spec = extract_reference_slice(
            &PathBuf::from("src.mkv"),
            &PathBuf::from("ref.mkv"),
            30.0,
            3.0,
            &params(),
        );
        let args = spec.args.join(" ");
        assert!(args.contains("ffv1"));
        assert!(args.contains("-vf crop=1920:800:0:140,hqdn3d=1:0.7:4:4"));
        assert!(!args.contains("libsvtav1"));
    }
}
