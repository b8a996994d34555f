use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use tokio::fs as async_fs;

use crate::checksum::{digest_file, digests_match};
use crate::interrupt::Interrupt;
use crate::manifest::DownloadJob;
use crate::progress::ProgressReporter;
use crate::report::Report;
use crate::util::Measured;
use crate::verify::process::{self, DownloadExit};
use crate::verify::{JobResult, JobStatus, VerifyConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Completed,
    Interrupted,
}

/// Executes jobs strictly one after another; they share local filenames.
pub struct JobRunner<'a> {
    config: &'a VerifyConfig,
    interrupt: Arc<Interrupt>,
    progress: ProgressReporter,
    active_child: Option<u32>,
}

impl<'a> JobRunner<'a> {
    pub fn new(config: &'a VerifyConfig, interrupt: Arc<Interrupt>) -> Self {
        Self {
            config,
            interrupt,
            progress: ProgressReporter::new(config.progress),
            active_child: None,
        }
    }

    /// PID of the in-flight download, if any.
    #[cfg(test)]
    pub fn active_child(&self) -> Option<u32> {
        self.active_child
    }

    pub fn progress_mut(&mut self) -> &mut ProgressReporter {
        &mut self.progress
    }

    pub async fn run_all(&mut self, jobs: &[DownloadJob], report: &mut Report) -> RunEnd {
        let total = jobs.len();
        for (index, job) in jobs.iter().enumerate() {
            if self.interrupt.is_set() {
                break;
            }
            self.progress.job_started(index, total, job);
            match self.run_job(job).await {
                Some(result) => {
                    self.progress.job_finished(index, total, &result);
                    report.push(result);
                }
                None => {
                    self.progress.abandon();
                    break;
                }
            }
        }

        if self.interrupt.is_set() {
            info!(
                "interrupted after {} of {} jobs",
                report.results().len(),
                total
            );
            RunEnd::Interrupted
        } else {
            RunEnd::Completed
        }
    }

    /// Returns `None` when interrupted before the result was finalized.
    pub async fn run_job(&mut self, job: &DownloadJob) -> Option<JobResult> {
        let target = self.config.download_dir.join(&job.filename);

        let started = Instant::now();
        let exit = process::download(
            &self.config.downloader,
            job,
            &self.config.download_dir,
            &self.interrupt,
            &mut self.active_child,
        )
        .await;
        let elapsed_seconds = started.elapsed().as_secs();

        if self.interrupt.is_set() {
            remove_artifact(&target).await;
            return None;
        }

        let mut result = JobResult {
            filename: job.filename.clone(),
            actual_checksum: Measured::NotAvailable,
            expected_checksum: job.expected_checksum.clone(),
            status: JobStatus::FileMissing,
            elapsed_seconds,
            size: Measured::NotAvailable,
            upload_date: job.upload_date.clone(),
        };

        match exit {
            DownloadExit::Succeeded => {}
            DownloadExit::Failed(reason) => {
                warn!("download of {} failed: {reason}", job.filename);
                remove_artifact(&target).await;
                result.status = JobStatus::DownloadFailed;
                result.actual_checksum = Measured::FailedDownload;
                result.size = Measured::FailedDownload;
                return Some(result);
            }
            DownloadExit::Interrupted => return None,
        }

        let metadata = match async_fs::metadata(&target).await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(
                    "network CLI reported success but {:?} is missing: {err}",
                    target
                );
                return Some(result);
            }
        };
        result.size = Measured::Value(metadata.len());

        result.status = match digest_file(&target).await {
            Ok(digest) => {
                let verified = digests_match(&digest, &job.expected_checksum);
                result.actual_checksum = Measured::Value(digest.to_ascii_lowercase());
                if verified {
                    JobStatus::Verified
                } else {
                    warn!(
                        "checksum mismatch for {}: expected {}, got {}",
                        job.filename, job.expected_checksum, result.actual_checksum
                    );
                    JobStatus::Mismatched
                }
            }
            Err(err) => {
                warn!("unable to hash {:?}: {err:#}", target);
                JobStatus::Mismatched
            }
        };

        if let Err(err) = async_fs::remove_file(&target).await {
            warn!("failed to delete {:?}: {err}", target);
        }
        Some(result)
    }
}

async fn remove_artifact(path: &Path) {
    match async_fs::remove_file(path).await {
        Ok(()) => debug!("removed partial download {:?}", path),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => debug!("could not remove {:?}: {err}", path),
    }
}
