use std::io::{IsTerminal, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use serde::Serialize;

use crate::manifest::DownloadJob;
use crate::report::Summary;
use crate::util::{format_elapsed, format_size};
use crate::verify::{JobResult, ProgressMode};

const SPINNER_TICK: Duration = Duration::from_millis(120);

/// Per-job feedback while the batch runs. The final table is the report's job.
pub enum ProgressReporter {
    Quiet,
    Text(TextRenderer),
    Json(JsonRenderer),
}

impl ProgressReporter {
    pub fn new(mode: ProgressMode) -> Self {
        match mode {
            ProgressMode::Quiet => ProgressReporter::Quiet,
            ProgressMode::Text => ProgressReporter::Text(TextRenderer::new()),
            ProgressMode::Json => ProgressReporter::Json(JsonRenderer),
        }
    }

    pub fn job_started(&mut self, index: usize, total: usize, job: &DownloadJob) {
        match self {
            ProgressReporter::Quiet => {}
            ProgressReporter::Text(renderer) => renderer.started(index, total, job),
            ProgressReporter::Json(renderer) => {
                renderer.emit(&JsonJobEvent::started(index, total, job))
            }
        }
    }

    pub fn job_finished(&mut self, index: usize, total: usize, result: &JobResult) {
        match self {
            ProgressReporter::Quiet => {}
            ProgressReporter::Text(renderer) => renderer.finished(index, total, result),
            ProgressReporter::Json(renderer) => {
                renderer.emit(&JsonJobEvent::finished(index, total, result))
            }
        }
    }

    /// Drops any live spinner without a result line.
    pub fn abandon(&mut self) {
        if let ProgressReporter::Text(renderer) = self {
            renderer.clear();
        }
    }

    pub fn summary(&mut self, summary: &Summary, interrupted: bool) {
        if let ProgressReporter::Json(renderer) = self {
            renderer.emit(&JsonSummaryEvent {
                event: "summary",
                timestamp_ms: now_ms(),
                interrupted,
                summary,
            });
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self, ProgressReporter::Json(_))
    }
}

pub struct TextRenderer {
    is_tty: bool,
    spinner: Option<ProgressBar>,
}

impl TextRenderer {
    fn new() -> Self {
        Self {
            is_tty: std::io::stderr().is_terminal(),
            spinner: None,
        }
    }

    fn started(&mut self, index: usize, total: usize, job: &DownloadJob) {
        let message = format!("[{}/{}] downloading {}", index + 1, total, job.filename);
        if !self.is_tty {
            info!("{message}");
            return;
        }
        let style = ProgressStyle::with_template("{spinner} {msg} ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let spinner = ProgressBar::new_spinner().with_style(style);
        spinner.set_message(message);
        spinner.enable_steady_tick(SPINNER_TICK);
        self.spinner = Some(spinner);
    }

    fn finished(&mut self, index: usize, total: usize, result: &JobResult) {
        self.clear();
        let line = format!(
            "[{}/{}] {} {} ({}, {})",
            index + 1,
            total,
            result.filename,
            result.status.as_str(),
            format_size(&result.size),
            format_elapsed(result.elapsed_seconds)
        );
        if self.is_tty {
            eprintln!("{line}");
        } else {
            info!("{line}");
        }
    }

    fn clear(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

pub struct JsonRenderer;

impl JsonRenderer {
    fn emit<T: Serialize>(&mut self, event: &T) {
        if let Ok(serialized) = serde_json::to_string(event) {
            println!("{}", serialized);
            let _ = std::io::stdout().flush();
        }
    }
}

#[derive(Serialize)]
struct JsonJobEvent<'a> {
    event: &'static str,
    timestamp_ms: u128,
    index: usize,
    total: usize,
    filename: &'a str,
    expected_checksum: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    actual_checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_seconds: Option<u64>,
}

impl<'a> JsonJobEvent<'a> {
    fn started(index: usize, total: usize, job: &'a DownloadJob) -> Self {
        Self {
            event: "job_started",
            timestamp_ms: now_ms(),
            index,
            total,
            filename: &job.filename,
            expected_checksum: &job.expected_checksum,
            address: Some(job.address.as_str()),
            status: None,
            actual_checksum: None,
            size: None,
            elapsed_seconds: None,
        }
    }

    fn finished(index: usize, total: usize, result: &'a JobResult) -> Self {
        Self {
            event: "job_finished",
            timestamp_ms: now_ms(),
            index,
            total,
            filename: &result.filename,
            expected_checksum: &result.expected_checksum,
            address: None,
            status: Some(result.status.as_str()),
            actual_checksum: Some(result.actual_checksum.to_string()),
            size: Some(result.size.to_string()),
            elapsed_seconds: Some(result.elapsed_seconds),
        }
    }
}

#[derive(Serialize)]
struct JsonSummaryEvent<'a> {
    event: &'static str,
    timestamp_ms: u128,
    interrupted: bool,
    #[serde(flatten)]
    summary: &'a Summary,
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
