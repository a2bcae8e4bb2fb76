//! vkquad viewer
//!
//! Opens a window and draws a colored quad, rebuilding the swapchain whenever
//! the window is resized.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p vkquad-viewer -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--width <N>`: Initial window width (default: 800)
//! - `--height <N>`: Initial window height (default: 600)
//! - `--frames-in-flight <N>`: Frame slots, at least 1 (default: 2)
//! - `--fence-timeout-ms <MS>`: Treat the device as lost after waiting this long on a fence
//! - `--validation` / `--no-validation`: Force Vulkan validation layers on or off
//! - `-h, --help`: Print help message
//!
//! ## Exit codes
//!
//! `0` on a normal close, a distinct nonzero code per GPU failure class, `1` for
//! anything else, `2` for bad arguments.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context as _};
use vkquad_app::{exit_code, run_app, AppConfig};

const TITLE: &str = "vkquad";

#[derive(Debug, PartialEq)]
enum Command {
    Run(AppConfig),
    Help,
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = value.with_context(|| format!("{flag} needs a value"))?;
    value
        .parse()
        .with_context(|| format!("invalid value for {flag}: {value:?}"))
}

/// Parse command-line arguments (without the program name).
fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let mut config = AppConfig::new(TITLE);
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "--width" => config.width = parse_value(arg, iter.next())?,
            "--height" => config.height = parse_value(arg, iter.next())?,
            "--frames-in-flight" => {
                let frames: usize = parse_value(arg, iter.next())?;
                if frames == 0 {
                    bail!("--frames-in-flight must be at least 1");
                }
                config = config.with_frames_in_flight(frames);
            }
            "--fence-timeout-ms" => {
                let ms: u64 = parse_value(arg, iter.next())?;
                config = config.with_fence_timeout(Some(Duration::from_millis(ms)));
            }
            "--validation" => config = config.with_validation(true),
            "--no-validation" => config = config.with_validation(false),
            other => bail!("unknown argument: {other}"),
        }
    }

    if config.width == 0 || config.height == 0 {
        bail!("window size must be nonzero");
    }

    Ok(Command::Run(config))
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match parse_args(&args) {
        Ok(Command::Run(config)) => config,
        Ok(Command::Help) => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            eprintln!("Run with --help for usage.");
            return ExitCode::from(2);
        }
    };

    match run_app(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = exit_code(&e);
            tracing::error!("Exiting with code {}: {:#}", code, e);
            ExitCode::from(code)
        }
    }
}

fn print_help() {
    eprintln!(
        "vkquad viewer

USAGE:
    cargo run -p vkquad-viewer -- [OPTIONS]

OPTIONS:
    --width <N>              Initial window width (default: {width})
    --height <N>             Initial window height (default: {height})
    --frames-in-flight <N>   Frame slots, at least 1 (default: {frames})
    --fence-timeout-ms <MS>  Report a lost device after waiting this long on a fence
                             Default: wait forever
    --validation             Enable Vulkan validation layers
    --no-validation          Disable Vulkan validation layers
                             Default: enabled in debug builds
    -h, --help               Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                 Set log level (e.g., info, debug, trace)",
        width = vkquad_core::constants::DEFAULT_WIDTH,
        height = vkquad_core::constants::DEFAULT_HEIGHT,
        frames = vkquad_core::constants::MAX_FRAMES_IN_FLIGHT,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn run_config(list: &[&str]) -> AppConfig {
        match parse_args(&args(list)).unwrap() {
            Command::Run(config) => config,
            Command::Help => panic!("expected a run command"),
        }
    }

    #[test]
    fn no_arguments_uses_defaults() {
        let config = run_config(&[]);
        assert_eq!(config, AppConfig::new(TITLE));
    }

    #[test]
    fn parses_all_options() {
        let config = run_config(&[
            "--width",
            "1024",
            "--height",
            "768",
            "--frames-in-flight",
            "3",
            "--fence-timeout-ms",
            "500",
            "--no-validation",
        ]);

        assert_eq!((config.width, config.height), (1024, 768));
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.fence_timeout, Some(Duration::from_millis(500)));
        assert!(!config.validation);
    }

    #[test]
    fn later_validation_flag_wins() {
        assert!(run_config(&["--no-validation", "--validation"]).validation);
    }

    #[test]
    fn help_short_circuits() {
        assert_eq!(
            parse_args(&args(&["--width", "10", "-h", "--bogus"])).unwrap(),
            Command::Help
        );
    }

    #[test]
    fn rejects_bad_input() {
        let cases: [&[&str]; 6] = [
            &["--width"],
            &["--width", "wide"],
            &["--frames-in-flight", "0"],
            &["--height", "0"],
            &["--fence-timeout-ms", "-5"],
            &["--fullscreen"],
        ];
        for bad in cases {
            assert!(parse_args(&args(bad)).is_err(), "accepted {bad:?}");
        }
    }
}
