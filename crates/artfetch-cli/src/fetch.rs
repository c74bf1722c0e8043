//! Fetch subcommand - retrieve a page range and export the records

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use artfetch_core::{
    HttpPageSource, PageId, PipelineController, RunConfig, RunSummary, SharedProgress,
    ShutdownFlag,
};
use artfetch_habr::HabrExtractor;
use clap::Args;

use crate::config::Config;

#[derive(Args, Debug, Default)]
pub struct FetchArgs {
    /// First page id (inclusive)
    #[arg(long)]
    pub first: Option<PageId>,

    /// Last page id (inclusive)
    #[arg(long)]
    pub last: Option<PageId>,

    /// Output format: csv, parquet or json
    #[arg(short, long)]
    pub extension: Option<String>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output file name without extension
    #[arg(short, long)]
    pub file: Option<String>,

    /// Write a marker record for failed pages instead of skipping them
    #[arg(long)]
    pub keep_failed: bool,

    /// Sort each written batch by page id
    #[arg(long)]
    pub sort: bool,

    /// Base URL of the article pages
    #[arg(long, default_value = artfetch_habr::BASE_URL)]
    pub base_url: String,
}

impl FetchArgs {
    /// CLI flags override the config file
    fn apply(&self, config: &mut RunConfig) {
        if let Some(first) = self.first {
            config.pages.first = first;
        }
        if let Some(last) = self.last {
            config.pages.last = last;
        }
        if let Some(extension) = &self.extension {
            config.save.extension.clone_from(extension);
        }
        if let Some(output) = &self.output {
            config.save.path.clone_from(output);
        }
        if let Some(file) = &self.file {
            config.save.file.clone_from(file);
        }
        if self.keep_failed {
            config.save.skip = false;
        }
        if self.sort {
            config.save.sort_by_id = true;
        }
    }
}

pub fn run(
    args: FetchArgs,
    config: &Config,
    progress: SharedProgress,
    shutdown: ShutdownFlag,
) -> Result<ExitCode> {
    let mut run_config = config.run.clone();
    args.apply(&mut run_config);

    let source = HttpPageSource::new(&args.base_url, &run_config)
        .context("Failed to set up HTTP client")?;
    let mut controller = PipelineController::new(run_config, source, HabrExtractor::new())
        .context("Invalid configuration")?
        .with_shutdown(shutdown)
        .with_progress(progress.clone());
    log::info!("Writing {}", controller.target().display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let summary = runtime.block_on(controller.run())?;

    if progress.is_tty() {
        eprintln!("\n{}", summary.format_table());
    } else {
        summary.log();
    }
    Ok(exit_code(&summary))
}

/// 130 interrupted, 1 partial failure, 0 clean
fn exit_code(summary: &RunSummary) -> ExitCode {
    if summary.interrupted {
        ExitCode::from(130)
    } else if summary.is_partial_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_values() {
        let mut config = RunConfig::default();
        let args = FetchArgs {
            first: Some(10),
            last: Some(20),
            extension: Some("json".to_string()),
            output: Some(PathBuf::from("/tmp/out")),
            file: Some("habr".to_string()),
            keep_failed: true,
            sort: true,
            base_url: artfetch_habr::BASE_URL.to_string(),
        };
        args.apply(&mut config);
        assert_eq!((config.pages.first, config.pages.last), (10, 20));
        assert_eq!(
            config.save.target_path().unwrap(),
            PathBuf::from("/tmp/out/habr.json")
        );
        assert!(!config.save.skip);
        assert!(config.save.sort_by_id);
    }

    #[test]
    fn absent_flags_keep_file_values() {
        let mut config = RunConfig::default();
        config.pages.first = 7;
        config.save.skip = true;
        FetchArgs::default().apply(&mut config);
        assert_eq!(config.pages.first, 7);
        assert!(config.save.skip);
    }

    #[test]
    fn exit_codes() {
        let clean = RunSummary::default();
        assert_eq!(exit_code(&clean), ExitCode::SUCCESS);

        let partial = RunSummary {
            batches_failed: 1,
            ..Default::default()
        };
        assert_eq!(exit_code(&partial), ExitCode::FAILURE);

        let interrupted = RunSummary {
            interrupted: true,
            batches_failed: 1,
            ..Default::default()
        };
        assert_eq!(exit_code(&interrupted), ExitCode::from(130));
    }
}
