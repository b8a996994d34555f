mod process;
mod runner;

pub use process::{DownloaderCommand, DEFAULT_PROGRAM};
pub use runner::{JobRunner, RunEnd};

use std::path::PathBuf;

use crate::util::{AgeStyle, Measured};

/// Retry count handed to the network CLI for every download.
pub const DOWNLOAD_RETRIES: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    Quiet,
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct VerifyConfig {
    pub manifest_path: PathBuf,
    pub download_dir: PathBuf,
    pub downloader: DownloaderCommand,
    pub retry_marker: String,
    /// `None` disables the report log.
    pub log_path: Option<PathBuf>,
    pub age_style: AgeStyle,
    pub dry_run: bool,
    pub progress: ProgressMode,
}

/// Terminal state of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Verified,
    Mismatched,
    FileMissing,
    DownloadFailed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Verified => "verified",
            JobStatus::Mismatched => "mismatched",
            JobStatus::FileMissing => "file_missing",
            JobStatus::DownloadFailed => "download_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub filename: String,
    pub actual_checksum: Measured<String>,
    pub expected_checksum: String,
    pub status: JobStatus,
    pub elapsed_seconds: u64,
    pub size: Measured<u64>,
    pub upload_date: Option<String>,
}

impl JobResult {
    pub fn verified(&self) -> bool {
        self.status == JobStatus::Verified
    }
}
