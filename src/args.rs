//! Command-line argument parsing and processing.
//!
//! This module handles parsing of command-line arguments and provides a clean
//! interface for the main application logic. Flags that take a value accept
//! both `--flag value` and `--flag=value`. Unknown options and missing or
//! malformed values turn into [`CliAction::ShowHelpDueToError`].

use std::path::PathBuf;

use crate::constants::{DEFAULT_LISTEN_ADDR, DEFAULT_TIMEZONE};
use crate::logger::Logger;

/// Settings for a normal daemon run.
///
/// The listen address, timezone and coordinates are defaults: a configuration
/// document overrides them.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub listen_addr: String,
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
    pub config_path: Option<PathBuf>,
    pub dump_config: bool,
    pub debug_enabled: bool,
    pub json_log: bool,
    pub log_file: Option<PathBuf>,
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            config_path: None,
            dump_config: false,
            debug_enabled: false,
            json_log: false,
            log_file: None,
            dry_run: false,
        }
    }
}

/// Represents the parsed command-line arguments and their intended actions.
#[derive(Debug, PartialEq)]
pub enum CliAction {
    /// Run the daemon with these settings
    Run(RunOptions),
    /// Display help information and exit
    ShowHelp,
    /// Display version information and exit
    ShowVersion,
    /// Show help due to invalid arguments and exit
    ShowHelpDueToError { reason: String },
}

/// Result of parsing command-line arguments.
pub struct ParsedArgs {
    pub action: CliAction,
}

impl ParsedArgs {
    /// Parse command-line arguments into a structured result.
    ///
    /// The first item is the program name and is skipped.
    pub fn parse<I, S>(args: I) -> ParsedArgs
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args_vec: Vec<String> = args
            .into_iter()
            .skip(1)
            .map(|s| s.as_ref().to_string())
            .collect();

        // Version and help take precedence over everything else
        if args_vec
            .iter()
            .any(|arg| arg == "--version" || arg == "-v" || arg == "-V")
        {
            return ParsedArgs {
                action: CliAction::ShowVersion,
            };
        }
        if args_vec.iter().any(|arg| arg == "--help" || arg == "-h") {
            return ParsedArgs {
                action: CliAction::ShowHelp,
            };
        }

        let action = match parse_run_options(&args_vec) {
            Ok(options) => CliAction::Run(options),
            Err(reason) => CliAction::ShowHelpDueToError { reason },
        };
        ParsedArgs { action }
    }

    /// Convenience method to parse from std::env::args()
    pub fn from_env() -> ParsedArgs {
        Self::parse(std::env::args())
    }
}

fn parse_run_options(args: &[String]) -> Result<RunOptions, String> {
    let mut options = RunOptions::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let (flag, inline_value) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let mut value = |name: &str| -> Result<String, String> {
            inline_value
                .clone()
                .or_else(|| iter.next().cloned())
                .ok_or_else(|| format!("missing value for {name}"))
        };

        match flag {
            "-l" | "--listen" => options.listen_addr = value(flag)?,
            "--tz" => options.timezone = value(flag)?,
            "--lat" => options.latitude = parse_coordinate(flag, &value(flag)?)?,
            "--lon" => options.longitude = parse_coordinate(flag, &value(flag)?)?,
            "-c" | "--config" => options.config_path = Some(PathBuf::from(value(flag)?)),
            "--log" => options.log_file = Some(PathBuf::from(value(flag)?)),
            "-cd" | "--dump-config" => options.dump_config = true,
            "-d" | "--debug" => options.debug_enabled = true,
            "--json-log" => options.json_log = true,
            "--dry-run" => options.dry_run = true,
            other => return Err(format!("unknown option {other}")),
        }
    }

    Ok(options)
}

fn parse_coordinate(flag: &str, value: &str) -> Result<f64, String> {
    value
        .parse::<f64>()
        .map_err(|_| format!("invalid value {value:?} for {flag}"))
}

/// Displays version information using custom logging style.
pub fn display_version_info(log: &Logger) {
    log_block_start!(log, "pirelay v{}", env!("CARGO_PKG_VERSION"));
    log_decorated!(log, "{}", env!("CARGO_PKG_DESCRIPTION"));
}

/// Displays custom help message using logger methods.
pub fn display_help(log: &Logger) {
    log_block_start!(log, "pirelay v{}", env!("CARGO_PKG_VERSION"));
    log_block_start!(log, "{}", env!("CARGO_PKG_DESCRIPTION"));
    log_block_start!(log, "Usage:");
    log_indented!(log, "pirelay [OPTIONS]");
    log_block_start!(log, "Options:");
    log_indented!(log, "-l, --listen <addr>    Listen address (default {DEFAULT_LISTEN_ADDR})");
    log_indented!(
        log,
        "    --tz <zone>        Timezone for schedules (default {DEFAULT_TIMEZONE})"
    );
    log_indented!(log, "    --lat <degrees>    Latitude for sunrise/sunset schedules");
    log_indented!(log, "    --lon <degrees>    Longitude for sunrise/sunset schedules");
    log_indented!(log, "-c, --config <file>    Configuration file (.json or .toml)");
    log_indented!(log, "-cd, --dump-config     Print the effective configuration and exit");
    log_indented!(log, "-d, --debug            Enable detailed debug output");
    log_indented!(log, "    --json-log         Emit one JSON object per log line");
    log_indented!(log, "    --log <file>       Write the log to a file instead of stdout");
    log_indented!(log, "    --dry-run          Log GPIO writes instead of driving pins");
    log_indented!(log, "-h, --help             Print help information");
    log_indented!(log, "-v, --version          Print version information");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogFormat;

    fn run(args: &[&str]) -> RunOptions {
        match ParsedArgs::parse(args.iter()).action {
            CliAction::Run(options) => options,
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_no_args() {
        assert_eq!(run(&["pirelay"]), RunOptions::default());
    }

    #[test]
    fn test_parse_debug_flag() {
        assert!(run(&["pirelay", "--debug"]).debug_enabled);
        assert!(run(&["pirelay", "-d"]).debug_enabled);
    }

    #[test]
    fn test_parse_value_flags() {
        let options = run(&[
            "pirelay",
            "-l",
            "127.0.0.1:9000",
            "--tz=Europe/Berlin",
            "--lat",
            "41.9",
            "--lon",
            "-12.5",
            "-c",
            "/etc/pirelay.json",
            "--log",
            "/var/log/pirelay.log",
        ]);
        assert_eq!(options.listen_addr, "127.0.0.1:9000");
        assert_eq!(options.timezone, "Europe/Berlin");
        assert_eq!(options.latitude, 41.9);
        assert_eq!(options.longitude, -12.5);
        assert_eq!(options.config_path, Some(PathBuf::from("/etc/pirelay.json")));
        assert_eq!(options.log_file, Some(PathBuf::from("/var/log/pirelay.log")));
    }

    #[test]
    fn test_parse_switches() {
        let options = run(&["pirelay", "-cd", "--json-log", "--dry-run"]);
        assert!(options.dump_config);
        assert!(options.json_log);
        assert!(options.dry_run);
        assert!(run(&["pirelay", "--dump-config"]).dump_config);
    }

    #[test]
    fn test_parse_help_and_version() {
        assert_eq!(
            ParsedArgs::parse(["pirelay", "-h"]).action,
            CliAction::ShowHelp
        );
        assert_eq!(
            ParsedArgs::parse(["pirelay", "--version"]).action,
            CliAction::ShowVersion
        );
    }

    #[test]
    fn test_version_takes_precedence() {
        assert_eq!(
            ParsedArgs::parse(["pirelay", "--help", "-v"]).action,
            CliAction::ShowVersion
        );
    }

    #[test]
    fn test_parse_unknown_flag() {
        assert_eq!(
            ParsedArgs::parse(["pirelay", "--geo"]).action,
            CliAction::ShowHelpDueToError {
                reason: "unknown option --geo".to_string()
            }
        );
    }

    #[test]
    fn test_parse_missing_and_malformed_values() {
        assert_eq!(
            ParsedArgs::parse(["pirelay", "--tz"]).action,
            CliAction::ShowHelpDueToError {
                reason: "missing value for --tz".to_string()
            }
        );
        assert!(matches!(
            ParsedArgs::parse(["pirelay", "--lat", "north"]).action,
            CliAction::ShowHelpDueToError { .. }
        ));
    }

    #[test]
    fn test_help_lists_every_option() {
        let log = Logger::memory(LogFormat::Pretty);
        display_help(&log);
        let help = log.captured().join("\n");
        for flag in [
            "--listen",
            "--tz",
            "--lat",
            "--lon",
            "--config",
            "--dump-config",
            "--dry-run",
        ] {
            assert!(help.contains(flag), "help is missing {flag}");
        }
    }
}
