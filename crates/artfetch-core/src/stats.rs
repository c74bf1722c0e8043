//! Run summary: counts by outcome and failure class

use std::path::PathBuf;
use std::time::Duration;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};

use crate::buffer::Disposition;
use crate::outcome::FailureClass;
use crate::progress::fmt_num;

/// Failure counts per class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureCounts {
    pub client: usize,
    pub server: usize,
    pub transport: usize,
    pub timeout: usize,
    pub extraction: usize,
}

impl FailureCounts {
    pub fn add(&mut self, class: FailureClass) {
        *self.slot(class) += 1;
    }

    pub fn get(&self, class: FailureClass) -> usize {
        match class {
            FailureClass::Client => self.client,
            FailureClass::Server => self.server,
            FailureClass::Transport => self.transport,
            FailureClass::Timeout => self.timeout,
            FailureClass::Extraction => self.extraction,
        }
    }

    pub fn total(&self) -> usize {
        FailureClass::ALL.iter().map(|&c| self.get(c)).sum()
    }

    fn slot(&mut self, class: FailureClass) -> &mut usize {
        match class {
            FailureClass::Client => &mut self.client,
            FailureClass::Server => &mut self.server,
            FailureClass::Transport => &mut self.transport,
            FailureClass::Timeout => &mut self.timeout,
            FailureClass::Extraction => &mut self.extraction,
        }
    }
}

/// Terminal report of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Ids in the configured range
    pub pages: u64,
    /// Ids actually fetched (fewer than `pages` after a shutdown request)
    pub attempted: usize,
    pub succeeded: usize,
    /// Failed pages dropped by the skip policy
    pub skipped: usize,
    /// Failed pages kept as marker records
    pub failed: usize,
    pub failures: FailureCounts,
    /// HTTP attempts including retries
    pub fetch_attempts: u64,
    pub records_written: usize,
    pub batches_written: usize,
    pub batches_failed: usize,
    /// Export and finalization error messages
    pub export_errors: Vec<String>,
    pub interrupted: bool,
    pub elapsed: Duration,
    pub output: PathBuf,
}

impl RunSummary {
    /// Count one terminal page.
    pub fn record(&mut self, disposition: Disposition, attempts: u32) {
        self.attempted += 1;
        self.fetch_attempts += u64::from(attempts);
        match disposition {
            Disposition::Succeeded => self.succeeded += 1,
            Disposition::Skipped(class) => {
                self.skipped += 1;
                self.failures.add(class);
            }
            Disposition::Failed(class) => {
                self.failed += 1;
                self.failures.add(class);
            }
        }
    }

    /// Some fetched data did not reach the output file.
    pub fn is_partial_failure(&self) -> bool {
        self.batches_failed > 0 || !self.export_errors.is_empty()
    }

    pub fn format_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Metric").fg(Color::Cyan),
                Cell::new("Value").fg(Color::Cyan),
            ]);

        table.add_row(vec!["Pages in range".to_string(), self.pages.to_string()]);
        table.add_row(vec!["Attempted".to_string(), fmt_num(self.attempted)]);
        table.add_row(vec!["Succeeded".to_string(), fmt_num(self.succeeded)]);
        table.add_row(vec!["Skipped".to_string(), fmt_num(self.skipped)]);
        table.add_row(vec!["Failed".to_string(), fmt_num(self.failed)]);
        for class in FailureClass::ALL {
            let n = self.failures.get(class);
            if n > 0 {
                table.add_row(vec![format!("  {}", class.label()), fmt_num(n)]);
            }
        }
        table.add_row(vec![
            "HTTP attempts".to_string(),
            self.fetch_attempts.to_string(),
        ]);
        table.add_row(vec![
            "Records written".to_string(),
            fmt_num(self.records_written),
        ]);
        table.add_row(vec![
            "Batches".to_string(),
            format!(
                "{} written, {} failed",
                self.batches_written, self.batches_failed
            ),
        ]);
        table.add_row(vec![
            "Elapsed".to_string(),
            format!("{:.1}s", self.elapsed.as_secs_f64()),
        ]);
        table.add_row(vec![
            "Output".to_string(),
            self.output.display().to_string(),
        ]);
        if self.interrupted {
            table.add_row(vec!["Interrupted".to_string(), "yes".to_string()]);
        }
        table
    }

    /// Log the summary line by line (non-TTY output).
    pub fn log(&self) {
        log::info!(
            "Summary: {} attempted of {} pages, {} succeeded, {} skipped, {} failed in {:.1}s",
            fmt_num(self.attempted),
            self.pages,
            fmt_num(self.succeeded),
            fmt_num(self.skipped),
            fmt_num(self.failed),
            self.elapsed.as_secs_f64()
        );
        for class in FailureClass::ALL {
            let n = self.failures.get(class);
            if n > 0 {
                log::info!("  {}: {}", class.label(), fmt_num(n));
            }
        }
        log::info!(
            "  {} records in {} batches -> {} ({} HTTP attempts)",
            fmt_num(self.records_written),
            self.batches_written,
            self.output.display(),
            self.fetch_attempts
        );
        for error in &self.export_errors {
            log::error!("  export error: {error}");
        }
        if self.interrupted {
            log::warn!("  run was interrupted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispositions_tallied() {
        let mut summary = RunSummary::default();
        summary.record(Disposition::Succeeded, 1);
        summary.record(Disposition::Skipped(FailureClass::Client), 1);
        summary.record(Disposition::Failed(FailureClass::Server), 4);
        summary.record(Disposition::Failed(FailureClass::Timeout), 4);

        assert_eq!(summary.attempted, 4);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.fetch_attempts, 10);
        assert_eq!(summary.failures.client, 1);
        assert_eq!(summary.failures.total(), 3);
    }

    #[test]
    fn partial_failure_from_export_errors() {
        let mut summary = RunSummary::default();
        assert!(!summary.is_partial_failure());
        summary.batches_failed = 1;
        assert!(summary.is_partial_failure());
    }

    #[test]
    fn table_lists_nonzero_classes() {
        let mut summary = RunSummary::default();
        summary.record(Disposition::Skipped(FailureClass::Extraction), 1);
        let rendered = summary.format_table().to_string();
        assert!(rendered.contains("extraction failure"));
        assert!(!rendered.contains("server error"));
    }
}
