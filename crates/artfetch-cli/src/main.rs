//! artfetch - fetch a range of Habr articles into CSV, Parquet or JSON

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use artfetch_core::{ProgressContext, ShutdownFlag};
use clap::{Parser, Subcommand};

mod config;
mod fetch;

use config::Config;

#[derive(Parser)]
#[command(name = "artfetch")]
#[command(about = "Concurrent article fetcher with CSV, Parquet and JSON export")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "debug")]
    quiet: bool,

    /// Config file path (default: ./artfetch.toml or ~/.config/artfetch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a page range and export the extracted articles
    Fetch(fetch::FetchArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            return ExitCode::from(2);
        }
    };

    // Progress context (TTY auto-detect)
    let progress = Arc::new(ProgressContext::new());

    // TTY: console quiet unless --debug, progress bars show activity.
    // The log file keeps `[logging] level`.
    let is_tty = progress.is_tty();
    let multi = is_tty.then(|| progress.multi());
    let quiet = cli.quiet || (is_tty && !cli.debug);
    if let Err(e) = artfetch_core::init_logging(quiet, cli.debug, &config.logging, multi) {
        eprintln!("Failed to open log file {}: {e}", config.logging.filename.display());
        return ExitCode::from(2);
    }

    match cli.command {
        Command::Fetch(args) => {
            let shutdown = ShutdownFlag::new();
            let result = setup_signal_handler(&shutdown)
                .and_then(|()| fetch::run(args, &config, progress, shutdown));
            match result {
                Ok(code) => code,
                Err(e) => {
                    log::error!("Fatal error: {e:#}");
                    ExitCode::from(2)
                }
            }
        }
        Command::Config => {
            print_config(&config);
            ExitCode::SUCCESS
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
}

fn setup_signal_handler(shutdown: &ShutdownFlag) -> Result<()> {
    // First signal: stop admitting pages and drain
    // Second signal: force exit
    for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        let flag = shutdown.clone();
        // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
        unsafe {
            signal_hook::low_level::register(signal, move || {
                if flag.request() {
                    std::process::exit(130);
                }
            })
        }
        .with_context(|| format!("Failed to register handler for signal {signal}"))?;
    }
    Ok(())
}

fn print_config(config: &Config) {
    use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};

    let run = &config.run;
    let request = &run.request;
    let session = &request.session;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec![
        "Pages".to_string(),
        format!("{}..={}", run.pages.first, run.pages.last),
    ]);
    table.add_row(vec![
        "Output file".to_string(),
        match run.save.target_path() {
            Ok(path) => path.display().to_string(),
            Err(e) => format!("invalid ({e})"),
        },
    ]);
    table.add_row(vec![
        "Failed pages".to_string(),
        if run.save.skip { "skipped" } else { "kept as markers" }.to_string(),
    ]);
    table.add_row(vec![
        "Concurrency".to_string(),
        format!(
            "{} requests (pool {}, per host {})",
            request.max_concurrent_requests, session.limit, session.limit_per_host
        ),
    ]);
    table.add_row(vec![
        "Retries".to_string(),
        request.retry_attempts.to_string(),
    ]);
    table.add_row(vec![
        "Delay".to_string(),
        format!("{}s - {}s", request.min_delay, request.max_delay),
    ]);
    table.add_row(vec!["Timeout".to_string(), format!("{}s", request.timeout)]);
    table.add_row(vec![
        "Batches".to_string(),
        format!(
            "chunk {}, buffer {}, {} workers",
            request.batch_size, request.buffer_size, request.max_workers
        ),
    ]);
    table.add_row(vec![
        "DNS cache TTL".to_string(),
        if session.ttl_dns_cache == 0 {
            "disabled".to_string()
        } else {
            format!("{}s", session.ttl_dns_cache)
        },
    ]);
    table.add_row(vec![
        "User agent".to_string(),
        run.headers
            .user_agent
            .clone()
            .unwrap_or_else(|| "not set".to_string()),
    ]);
    table.add_row(vec![
        "Log".to_string(),
        format!("{} ({:?})", config.logging.level, config.logging.output),
    ]);
    if let Err(e) = run.validate() {
        table.add_row(vec!["Validation".to_string(), e.to_string()]);
    }

    eprintln!("\n{table}");
}
