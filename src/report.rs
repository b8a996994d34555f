use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use colored::Colorize;
use serde::Serialize;

use crate::util::{ensure_parent_dir, format_age, format_elapsed, format_size, AgeStyle};
use crate::verify::{JobResult, JobStatus};

const HEADERS: [&str; 7] = [
    "Filename",
    "Actual MD5",
    "Expected MD5",
    "Status",
    "Size",
    "Time",
    "Age",
];
const STATUS_COLUMN: usize = 3;
const COLUMN_GAP: &str = "  ";
const PASS_GLYPH: &str = "✓";
const FAIL_GLYPH: &str = "✗";
pub const NOTHING_PROCESSED: &str = "No files were processed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_jobs: usize,
    pub processed: usize,
    pub verified: usize,
    pub download_failed: usize,
    pub verify_failed: usize,
}

impl Summary {
    pub fn all_verified(&self) -> bool {
        self.download_failed == 0 && self.verify_failed == 0
    }
}

/// Accumulates finished job results in execution order and renders them.
#[derive(Debug, Clone)]
pub struct Report {
    results: Vec<JobResult>,
    total_jobs: usize,
    started_at: NaiveDateTime,
    today: NaiveDate,
    age_style: AgeStyle,
}

impl Report {
    pub fn new(total_jobs: usize, age_style: AgeStyle) -> Self {
        let now = Local::now().naive_local();
        Self::with_clock(total_jobs, now, now.date(), age_style)
    }

    pub fn with_clock(
        total_jobs: usize,
        started_at: NaiveDateTime,
        today: NaiveDate,
        age_style: AgeStyle,
    ) -> Self {
        Self {
            results: Vec::with_capacity(total_jobs),
            total_jobs,
            started_at,
            today,
            age_style,
        }
    }

    pub fn push(&mut self, result: JobResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[JobResult] {
        &self.results
    }

    pub fn summary(&self) -> Summary {
        let count = |status: JobStatus| self.results.iter().filter(|r| r.status == status).count();
        Summary {
            total_jobs: self.total_jobs,
            processed: self.results.len(),
            verified: count(JobStatus::Verified),
            download_failed: count(JobStatus::DownloadFailed),
            verify_failed: count(JobStatus::Mismatched) + count(JobStatus::FileMissing),
        }
    }

    fn is_empty_run(&self, interrupted: bool) -> bool {
        self.results.is_empty() && !interrupted
    }

    fn rows(&self) -> Vec<[String; 7]> {
        self.results
            .iter()
            .map(|result| {
                [
                    result.filename.clone(),
                    result.actual_checksum.to_string(),
                    result.expected_checksum.clone(),
                    status_glyph(result).to_string(),
                    format_size(&result.size),
                    format_elapsed(result.elapsed_seconds),
                    format_age(result.upload_date.as_deref(), self.today, self.age_style),
                ]
            })
            .collect()
    }

    pub fn render(&self, interrupted: bool, color: bool) -> String {
        if self.is_empty_run(interrupted) {
            return format!("{NOTHING_PROCESSED}\n");
        }

        let rows = self.rows();
        let mut widths = HEADERS.map(|h| h.chars().count());
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }
        let rule = "-".repeat(widths.iter().sum::<usize>() + COLUMN_GAP.len() * (widths.len() - 1));

        let mut out = String::new();
        let title = format!(
            "Download verification started {}",
            self.started_at.format("%Y-%m-%d %H:%M:%S")
        );
        let _ = writeln!(out, "{}", paint(&title, color, |s| s.bold().to_string()));
        if interrupted {
            let note = "Run interrupted by user; results below are partial.";
            let _ = writeln!(out, "{}", paint(note, color, |s| s.yellow().to_string()));
        }

        let header = HEADERS
            .iter()
            .zip(widths)
            .map(|(h, w)| format!("{h:<w$}"))
            .collect::<Vec<_>>()
            .join(COLUMN_GAP);
        let _ = writeln!(out, "{}", paint(header.trim_end(), color, |s| s.bold().to_string()));
        let _ = writeln!(out, "{rule}");

        for (row, result) in rows.iter().zip(&self.results) {
            let line = row
                .iter()
                .zip(widths)
                .enumerate()
                .map(|(column, (cell, w))| {
                    let padded = format!("{cell:<w$}");
                    if column == STATUS_COLUMN {
                        paint(&padded, color, |s| {
                            if result.verified() {
                                s.green().to_string()
                            } else {
                                s.red().to_string()
                            }
                        })
                    } else {
                        padded
                    }
                })
                .collect::<Vec<_>>()
                .join(COLUMN_GAP);
            let _ = writeln!(out, "{}", line.trim_end());
        }

        let summary = self.summary();
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Total jobs in manifest: {}", summary.total_jobs);
        let _ = writeln!(out, "Jobs processed:         {}", summary.processed);
        let _ = writeln!(out, "Download failures:      {}", summary.download_failed);
        let _ = writeln!(out, "Verification failures:  {}", summary.verify_failed);
        out
    }

    /// Appends the plain rendering to `path`; the log is never truncated.
    pub fn append_to_log(&self, path: &Path, interrupted: bool) -> Result<()> {
        if self.is_empty_run(interrupted) {
            return Ok(());
        }
        ensure_parent_dir(path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open report log {:?}", path))?;
        writeln!(file, "{}", self.render(interrupted, false))
            .with_context(|| format!("failed to write report log {:?}", path))?;
        Ok(())
    }
}

fn status_glyph(result: &JobResult) -> &'static str {
    if result.verified() {
        PASS_GLYPH
    } else {
        FAIL_GLYPH
    }
}

fn paint(text: &str, color: bool, style: impl Fn(&str) -> String) -> String {
    if color {
        style(text)
    } else {
        text.to_string()
    }
}
