use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use tokio::process::{Child, Command};

use crate::interrupt::Interrupt;
use crate::manifest::DownloadJob;
use crate::verify::DOWNLOAD_RETRIES;

pub const DEFAULT_PROGRAM: &str = "ant";
pub const DEFAULT_ARGS: [&str; 6] = [
    "file",
    "download",
    "--retries",
    "{retries}",
    "{address}",
    "{filename}",
];
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// How the network CLI is invoked. `{retries}`, `{address}` and `{filename}`
/// in `args` are substituted per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloaderCommand {
    pub program: String,
    pub args: Vec<String>,
    pub show_output: bool,
}

impl Default for DownloaderCommand {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: DEFAULT_ARGS.iter().map(|s| s.to_string()).collect(),
            show_output: false,
        }
    }
}

impl DownloaderCommand {
    pub fn args_for(&self, job: &DownloadJob) -> Vec<String> {
        let retries = DOWNLOAD_RETRIES.to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{retries}", &retries)
                    .replace("{address}", &job.address)
                    .replace("{filename}", &job.filename)
            })
            .collect()
    }

    fn spawn(&self, job: &DownloadJob, dir: &Path) -> Result<Child> {
        let mut command = Command::new(&self.program);
        command
            .args(self.args_for(job))
            .current_dir(dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if !self.show_output {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        command
            .spawn()
            .with_context(|| format!("failed to start {}", self.program))
    }
}

#[derive(Debug)]
pub enum DownloadExit {
    Succeeded,
    Failed(String),
    Interrupted,
}

/// Runs one download to completion, or until `interrupt` fires, in which case
/// the child is terminated and reaped before returning.
pub async fn download(
    command: &DownloaderCommand,
    job: &DownloadJob,
    dir: &Path,
    interrupt: &Interrupt,
    active_child: &mut Option<u32>,
) -> DownloadExit {
    let mut child = match command.spawn(job, dir) {
        Ok(child) => child,
        Err(err) => return DownloadExit::Failed(format!("{err:#}")),
    };
    *active_child = child.id();
    debug!("download of {} running as pid {:?}", job.filename, child.id());

    let finished = tokio::select! {
        status = child.wait() => Some(status),
        _ = interrupt.triggered() => None,
    };
    let exit = match finished {
        Some(status) => classify(status),
        None => {
            terminate(&mut child).await;
            DownloadExit::Interrupted
        }
    };

    *active_child = None;
    exit
}

fn classify(status: std::io::Result<ExitStatus>) -> DownloadExit {
    match status {
        Ok(status) if status.success() => DownloadExit::Succeeded,
        Ok(status) => DownloadExit::Failed(format!("network CLI exited with {status}")),
        Err(err) => DownloadExit::Failed(format!("failed to wait for network CLI: {err}")),
    }
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        debug!("sending SIGTERM to pid {pid}");
        if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!("SIGTERM to pid {pid} failed: {err}");
        }
        if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok() {
            return;
        }
        warn!("pid {pid} ignored SIGTERM; killing");
    }

    if let Err(err) = child.start_kill() {
        debug!("kill failed: {err}");
    }
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn job(filename: &str) -> DownloadJob {
        DownloadJob {
            line: 1,
            address: "a".repeat(64),
            filename: filename.to_string(),
            expected_checksum: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            upload_date: None,
        }
    }

    fn shell(script: &str) -> DownloaderCommand {
        DownloaderCommand {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                script.to_string(),
                "sh".to_string(),
                "{address}".to_string(),
                "{filename}".to_string(),
            ],
            show_output: false,
        }
    }

    #[test]
    fn default_arguments_carry_fixed_retry_count() {
        let args = DownloaderCommand::default().args_for(&job("foo.bin"));
        assert_eq!(
            args,
            vec![
                "file".to_string(),
                "download".to_string(),
                "--retries".to_string(),
                "20".to_string(),
                "a".repeat(64),
                "foo.bin".to_string(),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_codes_are_classified() {
        let dir = tempfile::tempdir().unwrap();
        let interrupt = Interrupt::new();
        let mut active = None;

        let ok = download(&shell("exit 0"), &job("x"), dir.path(), &interrupt, &mut active).await;
        assert!(matches!(ok, DownloadExit::Succeeded));

        let failed =
            download(&shell("exit 3"), &job("x"), dir.path(), &interrupt, &mut active).await;
        assert!(matches!(failed, DownloadExit::Failed(_)));
        assert_eq!(active, None);
    }

    #[tokio::test]
    async fn missing_program_is_a_failed_download() {
        let dir = tempfile::tempdir().unwrap();
        let command = DownloaderCommand {
            program: "definitely-not-a-real-network-cli".to_string(),
            ..DownloaderCommand::default()
        };
        let exit = download(&command, &job("x"), dir.path(), &Interrupt::new(), &mut None).await;
        assert!(matches!(exit, DownloadExit::Failed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interrupt_terminates_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let interrupt = Interrupt::new();
        let trigger = Arc::clone(&interrupt);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.trigger();
        });

        let started = Instant::now();
        let exit = download(&shell("sleep 30"), &job("x"), dir.path(), &interrupt, &mut None).await;
        assert!(matches!(exit, DownloadExit::Interrupted));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
