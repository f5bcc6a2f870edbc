//! Main application entry point and high-level flow coordination.
//!
//! After argument parsing the daemon:
//! 1. sets up logging (stdout or file, pretty or JSON)
//! 2. loads and validates the configuration, or dumps it and exits
//! 3. takes the single-instance lock
//! 4. creates every configured relay through the controller
//! 5. waits for a termination signal
//! 6. stops every relay's threads and flushes the log

use anyhow::{Context, Result};
use std::sync::Arc;

use pirelay::args::{self, CliAction, ParsedArgs, RunOptions};
use pirelay::config::{self, Config};
use pirelay::constants::{EXIT_FAILURE, EXIT_SUCCESS};
use pirelay::controller::Controller;
use pirelay::gpio::{DryRunDriver, OutputDriver, SysfsDriver};
use pirelay::lock::{acquire_lock, runtime_dir};
use pirelay::logger::{LogFormat, Logger, LoggerGuard};
use pirelay::relay::RelayContext;
use pirelay::signals::setup_signal_handler;
use pirelay::{log_block_start, log_debug, log_decorated, log_error, log_indented};

fn main() {
    let parsed_args = ParsedArgs::from_env();
    let console = Logger::stdout(LogFormat::Pretty, false);

    let code = match parsed_args.action {
        CliAction::ShowVersion => {
            args::display_version_info(&console);
            EXIT_SUCCESS
        }
        CliAction::ShowHelp => {
            args::display_help(&console);
            EXIT_SUCCESS
        }
        CliAction::ShowHelpDueToError { reason } => {
            log_error!(console, "{reason}");
            args::display_help(&console);
            EXIT_FAILURE
        }
        CliAction::Run(options) => match run(&options) {
            Ok(()) => EXIT_SUCCESS,
            Err(e) => {
                log_error!(console, "{e:#}");
                EXIT_FAILURE
            }
        },
    };

    console.flush();
    std::process::exit(code);
}

fn build_logger(options: &RunOptions) -> Result<(Logger, Option<LoggerGuard>)> {
    let format = if options.json_log {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    match &options.log_file {
        Some(path) => {
            let (logger, guard) = Logger::to_file(path, format, options.debug_enabled)?;
            Ok((logger, Some(guard)))
        }
        None => Ok((Logger::stdout(format, options.debug_enabled), None)),
    }
}

fn run(options: &RunOptions) -> Result<()> {
    let defaults = Config::from_run_options(options).context("invalid command-line settings")?;
    let config = config::load(options.config_path.as_deref(), defaults)?;

    if options.dump_config {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    let (log, _log_guard) = build_logger(options)?;
    log_block_start!(log, "pirelay v{}", env!("CARGO_PKG_VERSION"));
    log_debug!(log, "Debug mode enabled");

    let _lock = acquire_lock(&runtime_dir(), &log)?;
    log_decorated!(log, "Lock acquired, starting pirelay...");

    config.log_summary(&log);

    let driver: Arc<dyn OutputDriver> = if options.dry_run {
        Arc::new(DryRunDriver::new(log.clone()))
    } else {
        Arc::new(SysfsDriver::new(log.clone()))
    };
    log_indented!(log, "Output driver: {}", driver.name());

    let signal_state = setup_signal_handler(log.clone())?;
    let controller = Controller::from_config(&config, RelayContext::system(driver, log.clone()))
        .context("failed to create relays")?;

    let signal = signal_state.wait_for_shutdown();
    log_block_start!(
        log,
        "Shutting down{}",
        signal.map_or(String::new(), |s| format!(" (signal {s})"))
    );

    controller.shutdown();
    log_decorated!(log, "Stopped {} relay(s)", controller.relays().len());
    log.flush();
    Ok(())
}
