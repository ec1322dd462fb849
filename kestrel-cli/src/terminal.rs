//! Terminal presentation of pipeline events.
//!
//! One handler renders the event stream for humans: status lines for the
//! analysis results, an indicatif bar for encoding progress, and a summary
//! when a file or batch completes. Color respects `--no-color` and
//! non-tty detection.

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::sync::Mutex;

use kestrel_core::events::{Event, EventHandler};
use kestrel_core::util::format_bytes;

pub struct TerminalEventHandler {
    color: bool,
    bar: Mutex<Option<ProgressBar>>,
}

impl TerminalEventHandler {
    pub fn new(no_color_flag: bool) -> Self {
        let color = !no_color_flag
            && supports_color::on(supports_color::Stream::Stdout).is_some();
        Self {
            color,
            bar: Mutex::new(None),
        }
    }

    fn label(&self, text: &str) -> String {
        if self.color {
            format!("{}", text.bold().cyan())
        } else {
            text.to_string()
        }
    }

    fn success(&self, text: &str) -> String {
        if self.color {
            format!("{}", text.green())
        } else {
            text.to_string()
        }
    }

    fn warning(&self, text: &str) -> String {
        if self.color {
            format!("{}", text.yellow())
        } else {
            text.to_string()
        }
    }

    fn error_text(&self, text: &str) -> String {
        if self.color {
            format!("{}", text.red().bold())
        } else {
            text.to_string()
        }
    }

    fn status(&self, label: &str, value: &str) {
        let line = format!("  {:<18} {}", format!("{}:", label), value);
        self.print(&line);
    }

    /// Print without tearing the progress bar.
    fn print(&self, line: &str) {
        let bar = self.bar.lock().unwrap();
        match bar.as_ref() {
            Some(bar) if !bar.is_finished() => bar.println(line),
            _ => println!("{}", line),
        }
    }

    fn start_bar(&self, total_segments: usize) {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template(
                "  {bar:40} {pos:>3}%  {msg}",
            )
            .expect("valid template"),
        );
        bar.set_message(format!("0/{} segments", total_segments));
        *self.bar.lock().unwrap() = Some(bar);
    }

    fn finish_bar(&self) {
        if let Some(bar) = self.bar.lock().unwrap().take() {
            bar.finish_and_clear();
        }
    }
}

impl EventHandler for TerminalEventHandler {
    fn handle(&self, event: &Event) {
        match event {
            Event::Hardware {
                hostname, cpu, memory, ..
            } => {
                self.print(&self.label("System"));
                self.status("host", hostname);
                self.status("cpu", cpu);
                self.status("memory", memory);
            }
            Event::Initialization {
                input_file,
                duration_secs,
                resolution,
                tier,
                dynamic_range,
                audio_description,
                ..
            } => {
                self.print(&self.label(&format!("Encoding {}", input_file)));
                self.status("duration", &format!("{:.1}s", duration_secs));
                self.status("resolution", &format!("{} ({})", resolution, tier));
                self.status("dynamic range", dynamic_range);
                self.status("audio", audio_description);
            }
            Event::CropResult {
                crop_required,
                crop_params,
            } => {
                let value = if *crop_required {
                    crop_params.as_deref().unwrap_or("detected").to_string()
                } else {
                    "none required".to_string()
                };
                self.status("crop", &value);
            }
            Event::EncodingConfig {
                encoder,
                preset,
                mode,
                pixel_format,
                film_grain,
                ..
            } => {
                self.status("encoder", &format!("{} (preset {})", encoder, preset));
                self.status("mode", mode);
                self.status("pixel format", pixel_format);
                if *film_grain > 0 {
                    self.status("film grain", &film_grain.to_string());
                }
            }
            Event::EncodingStarted { total_segments } => {
                self.print(&self.label(&format!("Encoding {} segments", total_segments)));
                self.start_bar(*total_segments);
            }
            Event::StageProgress {
                stage,
                percent,
                message,
                ..
            } => {
                let bar = self.bar.lock().unwrap();
                if let Some(bar) = bar.as_ref() {
                    if stage == "encoding" {
                        bar.set_position(*percent as u64);
                        bar.set_message(message.clone());
                    }
                } else {
                    drop(bar);
                    self.print(&format!("  {} {:.0}% {}", stage, percent, message));
                }
            }
            Event::EncodingProgress { .. } => {
                // Per-segment encoder output is too noisy for the terminal;
                // the bar tracks completed segments instead.
            }
            Event::ValidationComplete { passed, steps } => {
                self.finish_bar();
                if *passed {
                    self.print(&self.success("Validation passed"));
                } else {
                    self.print(&self.error_text("Validation failed"));
                }
                for step in steps {
                    let mark = if step.passed { "ok" } else { "FAIL" };
                    self.status(&step.name, &format!("{} ({})", mark, step.details));
                }
            }
            Event::EncodingComplete {
                output_file,
                original_size,
                encoded_size,
                total_seconds,
                size_reduction_percent,
                ..
            } => {
                self.finish_bar();
                self.print(&self.success(&format!("Finished {}", output_file)));
                self.status(
                    "size",
                    &format!(
                        "{} -> {} ({:.1}% smaller)",
                        format_bytes(*original_size),
                        format_bytes(*encoded_size),
                        size_reduction_percent
                    ),
                );
                self.status("wall time", &format!("{}s", total_seconds));
            }
            Event::Warning { message } => {
                self.print(&self.warning(&format!("warning: {}", message)));
            }
            Event::Error {
                title,
                message,
                context,
                suggestion,
            } => {
                self.finish_bar();
                self.print(&self.error_text(&format!("{}: {}", title, message)));
                if let Some(context) = context {
                    self.status("context", context);
                }
                if let Some(suggestion) = suggestion {
                    self.status("suggestion", suggestion);
                }
            }
            Event::BatchStarted { total_files, .. } => {
                self.print(&self.label(&format!("Batch of {} files", total_files)));
            }
            Event::FileProgress {
                current_file,
                total_files,
                filename,
            } => {
                self.print(&self.label(&format!(
                    "[{}/{}] {}",
                    current_file, total_files, filename
                )));
            }
            Event::BatchComplete {
                successful_count,
                total_files,
                total_original_size,
                total_encoded_size,
                total_seconds,
            } => {
                self.print(&self.success(&format!(
                    "Batch complete: {}/{} files in {}s",
                    successful_count, total_files, total_seconds
                )));
                self.status(
                    "total size",
                    &format!(
                        "{} -> {}",
                        format_bytes(*total_original_size),
                        format_bytes(*total_encoded_size)
                    ),
                );
            }
        }
    }
}
