mod checksum;
mod cli;
mod interrupt;
mod manifest;
mod progress;
mod report;
mod util;
mod verify;

use std::io::{IsTerminal, Write};
use std::sync::Arc;

use anyhow::Result;
use cli::Cli;
use interrupt::Interrupt;
use log::{debug, error, info, warn};
use manifest::{Manifest, RecordParser};
use report::Report;
use verify::{JobRunner, RunEnd, VerifyConfig};

const EXIT_VERIFIED: i32 = 0;
const EXIT_FAILURES: i32 = 1;
const EXIT_FATAL: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("{err:#}");
            std::process::exit(EXIT_FATAL);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_logger(&cli);

    debug!("CLI arguments: {:?}", cli);
    let config: VerifyConfig = cli.try_into()?;

    let parser = RecordParser::new(config.retry_marker.clone());
    let manifest = Manifest::load(&config.manifest_path, &parser)?;
    info!(
        "{} jobs loaded from {:?}, {} lines skipped",
        manifest.jobs.len(),
        config.manifest_path,
        manifest.rejected
    );

    if config.dry_run {
        print_jobs(&manifest);
        return Ok(EXIT_VERIFIED);
    }

    let interrupt = Interrupt::new();
    interrupt.listen_for_ctrl_c();

    let mut report = Report::new(manifest.jobs.len(), config.age_style);
    let mut runner = JobRunner::new(&config, Arc::clone(&interrupt));
    let end = runner.run_all(&manifest.jobs, &mut report).await;
    let interrupted = end == RunEnd::Interrupted;

    let summary = report.summary();
    let progress = runner.progress_mut();
    if progress.is_json() {
        progress.summary(&summary, interrupted);
    } else {
        print!("{}", report.render(interrupted, std::io::stdout().is_terminal()));
        let _ = std::io::stdout().flush();
    }

    if let Some(path) = &config.log_path {
        match report.append_to_log(path, interrupted) {
            Ok(()) => debug!("report appended to {:?}", path),
            Err(err) => warn!("{err:#}"),
        }
    }

    Ok(if interrupted {
        EXIT_INTERRUPTED
    } else if summary.all_verified() {
        EXIT_VERIFIED
    } else {
        EXIT_FAILURES
    })
}

fn print_jobs(manifest: &Manifest) {
    for job in &manifest.jobs {
        println!(
            "{:>5}  {}  {}  {}  {}",
            job.line,
            &job.address[..16],
            job.expected_checksum,
            job.upload_date.as_deref().unwrap_or("N/A"),
            job.filename
        );
    }
}

fn init_logger(cli: &Cli) {
    use env_logger::Env;
    use log::LevelFilter;

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    let level = if cli.quiet {
        LevelFilter::Error
    } else if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    builder.filter_level(level);
    if !cli.verbose {
        builder.format_timestamp_secs();
    }
    let _ = builder.try_init();
}
