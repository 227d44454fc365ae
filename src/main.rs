/*
 * This file is part of idevscan.
 *
 * Copyright (C) 2025 idevscan contributors
 *
 * idevscan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * idevscan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with idevscan. If not, see <https://www.gnu.org/licenses/>.
 */

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use serde_json::json;
use tracing::{info, warn};

use idevscan::config::{config_path, load_config, ScanConfig};
use idevscan::logger;
use idevscan::probe::short_id;
use idevscan::scheduler::CancelToken;
use idevscan::service::{self, Scanner};
use idevscan::{console, imei};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Monitor,
    Scan,
    Seen,
    ClearSeen,
    Reset,
    Status,
}

#[derive(Debug)]
struct Options {
    command: Command,
    config: PathBuf,
    logging: bool,
    shutdown: bool,
    reset: bool,
}

// ============================================================================
// CLI
// ============================================================================

fn print_help() {
    eprintln!("idevscan {} - USB iPhone intake scanner", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    idevscan [OPTIONS] [COMMAND]");
    eprintln!();
    eprintln!("COMMANDS:");
    eprintln!("    monitor             Watch for devices until Ctrl+C (default)");
    eprintln!("    scan                Process the devices attached right now and exit");
    eprintln!("    seen                List IMEIs already recorded");
    eprintln!("    clear-seen          Forget every recorded IMEI");
    eprintln!("    reset               Delete the CSV outputs and the seen list");
    eprintln!("    status              Show trust state of attached devices");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH   Configuration file (default {})", config_path().display());
    eprintln!("        --logging       Append events to the JSON journal");
    eprintln!("        --shutdown      monitor: power off each device after it is saved");
    eprintln!("        --reset         scan: clear outputs before scanning");
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    {}        Log level (trace, debug, info, warn, error)", logger::LOG_ENV);
}

fn print_version() {
    println!("idevscan {}", VERSION);
}

/// `Ok(None)` means help or version was printed.
fn parse_args(args: &[String]) -> Result<Option<Options>> {
    let mut opts = Options {
        command: Command::Monitor,
        config: config_path(),
        logging: false,
        shutdown: false,
        reset: false,
    };
    let mut command_seen = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            "-v" | "--version" => {
                print_version();
                return Ok(None);
            }
            "-c" | "--config" => {
                i += 1;
                let path = args.get(i).ok_or_else(|| anyhow!("--config requires a path argument"))?;
                opts.config = PathBuf::from(path);
            }
            "--logging" => opts.logging = true,
            "--shutdown" => opts.shutdown = true,
            "--reset" => opts.reset = true,
            arg if !command_seen && !arg.starts_with('-') => {
                opts.command = match arg {
                    "monitor" => Command::Monitor,
                    "scan" => Command::Scan,
                    "seen" => Command::Seen,
                    "clear-seen" => Command::ClearSeen,
                    "reset" => Command::Reset,
                    "status" => Command::Status,
                    other => return Err(anyhow!("unknown command: {}", other)),
                };
                command_seen = true;
            }
            arg => return Err(anyhow!("unknown argument: {}", arg)),
        }
        i += 1;
    }

    if opts.shutdown && opts.command != Command::Monitor {
        return Err(anyhow!("--shutdown only applies to monitor"));
    }
    if opts.reset && opts.command != Command::Scan {
        return Err(anyhow!("--reset only applies to scan"));
    }
    Ok(Some(opts))
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let opts = match parse_args(&args) {
        Ok(Some(opts)) => opts,
        Ok(None) => return Ok(()),
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(2);
        }
    };

    logger::init_tracing();

    let config = load_config(&opts.config)?;
    info!("config: {}", opts.config.display());

    if opts.logging {
        match logger::open_journal(&config.paths.journal) {
            Ok(()) => logger::log_event("startup", json!({ "version": VERSION, "args": args })),
            Err(e) => warn!("could not open journal {}: {}", config.paths.journal.display(), e),
        }
    }

    let result = dispatch(&opts, config);
    if let Err(e) = &result {
        logger::log_event("fatal_error", json!({ "error": e.to_string() }));
    }
    logger::close_journal();
    result
}

fn dispatch(opts: &Options, config: ScanConfig) -> Result<()> {
    match opts.command {
        Command::Monitor => {
            let cancel = install_cancel_handler();
            let mut scanner = Scanner::from_config(config, cancel)?;
            scanner.set_shutdown_after_save(opts.shutdown);
            console::header("iPhone Scanner");
            scanner.run()
        }
        Command::Scan => {
            if opts.reset {
                reset(&config)?;
            }
            let cancel = install_cancel_handler();
            let mut scanner = Scanner::from_config(config, cancel)?;
            console::header("iPhone Scanner");
            let events = scanner.scan_once();
            if events.is_empty() {
                console::warning("No devices connected");
            }
            service::render_events(&events);
            console::registry_summary(&scanner.registry().lock().summary());
            Ok(())
        }
        Command::Seen => {
            let imeis = service::list_seen(&config)?;
            if imeis.is_empty() {
                console::info("No devices recorded yet");
            }
            for value in &imeis {
                println!("{}", imei::mask_imei(value));
            }
            console::info(&format!("{} device(s) recorded", imeis.len()));
            Ok(())
        }
        Command::ClearSeen => {
            let count = service::clear_seen(&config)?;
            console::success(&format!("Cleared {} recorded IMEI(s)", count));
            Ok(())
        }
        Command::Reset => reset(&config),
        Command::Status => status(config),
    }
}

fn reset(config: &ScanConfig) -> Result<()> {
    let removed = service::reset_data(config)?;
    for path in &removed {
        console::info(&format!("Removed {}", path.display()));
    }
    console::success("Reset complete");
    Ok(())
}

fn status(config: ScanConfig) -> Result<()> {
    let scanner = Scanner::from_config(config, CancelToken::new())?;
    let report = scanner.trust_report();
    if report.is_empty() {
        console::warning("No devices connected");
    }
    for (id, state) in &report {
        if state.is_trusted() {
            console::success(&format!("{}: {}", short_id(id), state));
        } else {
            console::warning(&format!("{}: {}", short_id(id), state));
        }
    }
    console::info(&format!("{} device(s) recorded", scanner.reconciler().seen().len()));
    Ok(())
}

fn install_cancel_handler() -> CancelToken {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("interrupt received, stopping");
        handler_token.cancel();
    }) {
        warn!("failed to set signal handler: {}", e);
    }
    cancel
}
