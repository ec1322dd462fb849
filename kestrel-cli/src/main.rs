// ============================================================================
// kestrel-cli/src/main.rs
// ============================================================================
//
// ENTRY POINT: Argument Parsing, Wiring and Exit Codes
//
// Parses the command line, merges configuration layers, wires up event
// handlers and the SIGINT-driven cancel token, runs the pipeline and maps
// the outcome onto the documented exit codes:
//
//   0   success
//   1   user/config error (bad flags, missing tools)
//   2   input or validation error
//   3   encoding failed after retries
//   130 cancelled by signal
//
// AI-ASSISTANT-INFO: CLI entry point, signal handling and exit-code mapping

use log::error;
use std::io::Write;
use std::sync::Arc;

use kestrel_core::{
    emit_hardware_event, encode_batch, encode_file, CancelToken, CoreError, EventDispatcher,
    NdjsonEventHandler, NtfySender,
};

mod cli;
mod config;
mod terminal;

use clap::Parser;
use cli::{Cli, Commands};

const EXIT_SUCCESS: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_INPUT: i32 = 2;
const EXIT_ENCODING: i32 = 3;
const EXIT_CANCELLED: i32 = 130;

fn main() {
    let code = run();
    std::process::exit(code);
}

fn run() -> i32 {
    let cli = Cli::parse();

    let shared = match &cli.command {
        Commands::Encode(args) => &args.shared,
        Commands::Batch(args) => &args.shared,
    };
    let app_config = match config::load_config(&cli, shared) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return EXIT_CONFIG;
        }
    };

    init_logging(app_config.logging.verbose);

    let mut events = EventDispatcher::new();
    events.add_handler(Arc::new(terminal::TerminalEventHandler::new(
        app_config.logging.no_color,
    )));
    if let Some(sink) = &app_config.logging.progress_json {
        match NdjsonEventHandler::from_sink(sink) {
            Ok(handler) => events.add_handler(Arc::new(handler)),
            Err(e) => {
                eprintln!("error: cannot open progress sink {}: {}", sink, e);
                return EXIT_CONFIG;
            }
        }
    }

    let ntfy = match &app_config.logging.ntfy_topic {
        Some(url) => match NtfySender::new(url) {
            Ok(sender) => Some(sender),
            Err(e) => {
                eprintln!("error: {}", e);
                return EXIT_CONFIG;
            }
        },
        None => None,
    };

    // First Ctrl-C requests a cooperative stop; the second one is honored
    // immediately.
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            if cancel.is_cancelled() {
                std::process::exit(EXIT_CANCELLED);
            }
            eprintln!("\ninterrupt received, finishing in-flight work (Ctrl-C again to force)");
            cancel.cancel();
        }) {
            eprintln!("warning: signal handler not installed: {}", e);
        }
    }

    emit_hardware_event(&events);

    let result = match &cli.command {
        Commands::Encode(args) => {
            if args.inputs.len() == 1 && !args.output.is_dir() {
                encode_file(
                    &args.inputs[0],
                    &args.output,
                    &app_config,
                    &events,
                    &cancel,
                    ntfy.as_ref(),
                )
                .map(|outcome| vec![outcome])
            } else {
                encode_batch(
                    &args.inputs,
                    &args.output,
                    &app_config,
                    &events,
                    &cancel,
                    ntfy.as_ref(),
                )
            }
        }
        Commands::Batch(args) => match config::discover_mkv_files(&args.input_dir) {
            Ok(files) => encode_batch(
                &files,
                &args.output_dir,
                &app_config,
                &events,
                &cancel,
                ntfy.as_ref(),
            ),
            Err(e) => {
                eprintln!("error: {:#}", e);
                return EXIT_INPUT;
            }
        },
    };

    match result {
        Ok(_) => EXIT_SUCCESS,
        Err(e) => {
            error!("{}", e);
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(error: &CoreError) -> i32 {
    match error {
        CoreError::Cancelled => EXIT_CANCELLED,
        CoreError::Config(_) | CoreError::ProcessLaunch { .. } => EXIT_CONFIG,
        CoreError::InputValidation { .. }
        | CoreError::Validation(_)
        | CoreError::FfprobeParse(_)
        | CoreError::JsonParse(_)
        | CoreError::Io(_) => EXIT_INPUT,
        CoreError::SegmentFailed { .. }
        | CoreError::RetryableEncode { .. }
        | CoreError::ProcessExit { .. } => EXIT_ENCODING,
        CoreError::Notification(_) => EXIT_SUCCESS,
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {:<5} {}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_contract() {
        assert_eq!(exit_code_for(&CoreError::Cancelled), 130);
        assert_eq!(exit_code_for(&CoreError::Config("x".to_string())), 1);
        assert_eq!(
            exit_code_for(&CoreError::ProcessLaunch {
                tool: "ffmpeg".to_string(),
                reason: "missing".to_string(),
            }),
            1
        );
        assert_eq!(exit_code_for(&CoreError::Validation("x".to_string())), 2);
        assert_eq!(
            exit_code_for(&CoreError::SegmentFailed {
                segment: 3,
                attempts: 3,
                reason: "x".to_string(),
            }),
            3
        );
    }
}
