//! Logging utilities with indicatif integration

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use indicatif::MultiProgress;
use serde::Deserialize;

/// Where log lines go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

/// `[logging]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    pub output: LogOutput,
    pub filename: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Console,
            filename: PathBuf::from("artfetch.log"),
        }
    }
}

/// ANSI color code and padded label for a log level.
fn level_style(level: log::Level, color: bool) -> (&'static str, &'static str, &'static str) {
    let label = match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    };
    if !color {
        return ("", label, "");
    }
    let ansi = match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    };
    (ansi, label, "\x1b[0m")
}

/// Plain line for file output: timestamp, level, message.
fn plain_line(record: &log::Record) -> String {
    let (_, label, _) = level_style(record.level(), false);
    let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    format!("{ts} [{label}] {}", record.args())
}

/// Logger that prints through indicatif MultiProgress to avoid mixing with
/// progress bars, optionally teeing into a log file.
///
/// Console and file are filtered separately: `--quiet` only trims the
/// console, the file keeps the configured level.
pub struct IndicatifLogger {
    /// `None` when output is file-only
    console: Option<env_logger::Logger>,
    multi: Option<MultiProgress>,
    file: Option<LogFile>,
}

struct LogFile {
    filter: env_logger::Logger,
    out: Mutex<std::fs::File>,
}

impl IndicatifLogger {
    fn new(
        console_level: Option<&str>,
        file_level: &str,
        multi: Option<&MultiProgress>,
        file: Option<std::fs::File>,
    ) -> Self {
        Self {
            console: console_level.map(level_filter),
            multi: multi.cloned(),
            file: file.map(|out| LogFile {
                filter: level_filter(file_level),
                out: Mutex::new(out),
            }),
        }
    }

    fn max_level(&self) -> log::LevelFilter {
        let console = self.console.as_ref().map(env_logger::Logger::filter);
        let file = self.file.as_ref().map(|f| f.filter.filter());
        console.max(file).unwrap_or(log::LevelFilter::Off)
    }
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.console.as_ref().is_some_and(|c| c.enabled(metadata))
            || self.file.as_ref().is_some_and(|f| f.filter.enabled(metadata))
    }

    fn log(&self, record: &log::Record) {
        if self.console.as_ref().is_some_and(|c| c.matches(record)) {
            match &self.multi {
                Some(multi) => {
                    // TTY path: always colored
                    let (pre, label, post) = level_style(record.level(), true);
                    let line = format!("[{pre}{label}{post}] {}", record.args());
                    multi.suspend(|| eprintln!("{line}"));
                }
                None => {
                    let (_, label, _) = level_style(record.level(), false);
                    eprintln!("[{label}] {}", record.args());
                }
            }
        }
        if let Some(file) = self.file.as_ref().filter(|f| f.filter.matches(record)) {
            let line = plain_line(record);
            if let Ok(mut f) = file.out.lock() {
                let _ = writeln!(f, "{line}");
            }
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            if let Ok(mut f) = file.out.lock() {
                let _ = f.flush();
            }
        }
    }
}

/// `RUST_LOG` if set, otherwise `default`
fn level_filter(default: &str) -> env_logger::Logger {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).build()
}

fn open_log_file(path: &Path) -> io::Result<std::fs::File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Console level: `--debug`, then `--quiet`, then `config.level`
fn console_level(quiet: bool, debug: bool, config: &LoggingConfig) -> &str {
    if debug {
        "debug"
    } else if quiet {
        "warn"
    } else {
        config.level.as_str()
    }
}

/// File level: `--debug`, then `config.level`
fn file_level(debug: bool, config: &LoggingConfig) -> &str {
    if debug {
        "debug"
    } else {
        config.level.as_str()
    }
}

/// Initialize logging.
///
/// Level precedence: `RUST_LOG`, then `--debug`/`--quiet`, then
/// `config.level`; `--quiet` does not apply to the log file. With a
/// `MultiProgress` console lines are routed through it so they do not
/// tear progress bars.
pub fn init_logging(
    quiet: bool,
    debug: bool,
    config: &LoggingConfig,
    multi: Option<&MultiProgress>,
) -> io::Result<()> {
    let console = console_level(quiet, debug, config);

    let file = match config.output {
        LogOutput::Console => None,
        LogOutput::File | LogOutput::Both => Some(open_log_file(&config.filename)?),
    };

    // Console-only outside a TTY: plain env_logger, no ANSI colors
    if multi.is_none() && file.is_none() {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(console))
            .format(|buf, record| {
                let (_, label, _) = level_style(record.level(), false);
                writeln!(buf, "[{label}] {}", record.args())
            })
            .init();
        return Ok(());
    }

    let logger = IndicatifLogger::new(
        (config.output != LogOutput::File).then_some(console),
        file_level(debug, config),
        multi,
        file,
    );
    let max_level = logger.max_level();
    log::set_boxed_logger(Box::new(logger)).map_err(io::Error::other)?;
    log::set_max_level(max_level);
    Ok(())
}
