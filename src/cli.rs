use std::convert::TryFrom;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser};
use log::warn;

use crate::manifest::DEFAULT_RETRY_MARKER;
use crate::util::{resolve_log_path, AgeStyle, DEFAULT_LOG_NAME, FALLBACK_LOG_NAME};
use crate::verify::{DownloaderCommand, ProgressMode, VerifyConfig, DEFAULT_PROGRAM};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "manifest-verify",
    author,
    version,
    about = "Re-download every file in an upload manifest and verify its checksum",
    long_about = None
)]
pub struct Cli {
    /// Upload manifest to replay
    #[arg(value_name = "manifest", default_value = "uploads.log")]
    pub manifest: PathBuf,

    /// Network CLI executable
    #[arg(
        long = "cli",
        value_name = "program",
        env = "MANIFEST_VERIFY_CLI",
        default_value = DEFAULT_PROGRAM
    )]
    pub program: String,

    /// Network CLI argument, repeatable; replaces the default template.
    /// `{retries}`, `{address}` and `{filename}` are substituted per job.
    #[arg(long = "cli-arg", value_name = "arg", allow_hyphen_values = true)]
    pub cli_args: Vec<String>,

    /// Directory downloads are written to (and deleted from)
    #[arg(short = 'd', long = "dir", value_name = "path", default_value = ".")]
    pub dir: PathBuf,

    /// Token that precedes the content address in manifest records
    #[arg(
        long = "retry-marker",
        value_name = "token",
        default_value = DEFAULT_RETRY_MARKER,
        allow_hyphen_values = true
    )]
    pub retry_marker: String,

    /// Report log path (defaults to a file beside the executable)
    #[arg(long = "log-file", value_name = "path")]
    pub log_file: Option<PathBuf>,

    /// Do not append the report to a log file
    #[arg(long = "no-log", action = ArgAction::SetTrue, conflicts_with = "log_file")]
    pub no_log: bool,

    /// Render ages as days/365 years, matching older logs
    #[arg(long = "legacy-age", action = ArgAction::SetTrue)]
    pub legacy_age: bool,

    /// Parse the manifest and list jobs without downloading
    #[arg(long = "dry-run", action = ArgAction::SetTrue)]
    pub dry_run: bool,

    /// Quiet mode
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Verbose mode, also shows the network CLI's own output
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue)]
    pub verbose: bool,

    /// Stream job progress as newline-delimited JSON
    #[arg(long = "json", action = ArgAction::SetTrue)]
    pub json: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

impl TryFrom<Cli> for VerifyConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self> {
        if !cli.dir.is_dir() {
            return Err(anyhow!("download directory {:?} does not exist", cli.dir));
        }
        if cli.retry_marker.trim().is_empty() {
            return Err(anyhow!("--retry-marker cannot be empty"));
        }

        let mut downloader = DownloaderCommand {
            program: cli.program.clone(),
            show_output: cli.verbose,
            ..DownloaderCommand::default()
        };
        if !cli.cli_args.is_empty() {
            for placeholder in ["{address}", "{filename}"] {
                if !cli.cli_args.iter().any(|arg| arg.contains(placeholder)) {
                    return Err(anyhow!("--cli-arg template is missing {placeholder}"));
                }
            }
            downloader.args = cli.cli_args.clone();
        }

        let log_path = if cli.no_log {
            None
        } else {
            let exe = std::env::current_exe().context("failed to locate the executable")?;
            Some(match cli.log_file.clone() {
                Some(path) if path == exe => {
                    warn!("--log-file points at the executable; using {FALLBACK_LOG_NAME}");
                    resolve_log_path(&exe, FALLBACK_LOG_NAME)
                }
                Some(path) => path,
                None => resolve_log_path(&exe, DEFAULT_LOG_NAME),
            })
        };

        let age_style = if cli.legacy_age {
            AgeStyle::Legacy
        } else {
            AgeStyle::Calendar
        };

        let progress = if cli.json {
            ProgressMode::Json
        } else if cli.quiet {
            ProgressMode::Quiet
        } else {
            ProgressMode::Text
        };

        Ok(VerifyConfig {
            manifest_path: cli.manifest,
            download_dir: cli.dir,
            downloader,
            retry_marker: cli.retry_marker,
            log_path,
            age_style,
            dry_run: cli.dry_run,
            progress,
        })
    }
}
