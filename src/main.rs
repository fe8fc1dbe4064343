use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use jarsweep::archive::Orchestrator;
use jarsweep::config::Config;
use jarsweep::incident::{IncidentLog, IncidentRecorder};
use jarsweep::logging;
use jarsweep::pipeline::Mode;
use jarsweep::report::{InputFailure, build_sarif};

/// CLI arguments for jarsweep execution.
#[derive(Parser, Debug)]
#[command(
    name = "jarsweep",
    about = "Policy scanning and sanitization for JVM class files inside JAR archives.",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// TOML configuration; the built-in rules apply when omitted.
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Report destination, `-` for stdout.
    #[arg(long, value_name = "PATH", global = true)]
    output: Option<PathBuf>,
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report rule violations without changing archives.
    Scan {
        #[arg(required = true, value_name = "ARCHIVE")]
        archives: Vec<PathBuf>,
    },
    /// Remove violations and replace each changed archive atomically.
    Sanitize {
        #[arg(required = true, value_name = "ARCHIVE")]
        archives: Vec<PathBuf>,
    },
    /// Redirect configured call sites to shim methods.
    Instrument {
        #[arg(required = true, value_name = "ARCHIVE")]
        archives: Vec<PathBuf>,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    run(cli)
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let mut writer = output_writer(cli.output.as_deref())?;
    let succeeded = match &cli.command {
        Command::Scan { archives } => run_pass(&config, archives, Mode::Scan, &mut writer)?,
        Command::Sanitize { archives } => run_pass(&config, archives, Mode::Sanitize, &mut writer)?,
        Command::Instrument { archives } => run_instrument(&config, archives, &mut writer)?,
    };
    writer.flush().context("failed to flush output")?;
    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run_pass(config: &Config, archives: &[PathBuf], mode: Mode, writer: &mut dyn Write) -> Result<bool> {
    let started_at = Instant::now();
    let registry = Arc::new(config.registry().context("invalid rule configuration")?);
    let pipeline = config
        .pipeline(registry)
        .context("invalid annotation removal configuration")?;
    let recorder = match &config.incident_log {
        Some(path) => Some(Arc::new(IncidentRecorder::spawn(IncidentLog::open(path)?))),
        None => None,
    };
    let mut orchestrator = Orchestrator::new(pipeline);
    if let Some(recorder) = &recorder {
        orchestrator = orchestrator.with_incident_sink(recorder.clone());
    }

    let mut reports = Vec::new();
    let mut failures = Vec::new();
    for archive in archives {
        match orchestrator.process_archive(archive, mode) {
            Ok(report) => reports.push(report),
            Err(err) => {
                tracing::error!(archive = %archive.display(), error = %err, "archive pass failed");
                failures.push(InputFailure {
                    archive: archive.display().to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }
    if let Some(recorder) = &recorder {
        let written = recorder.finish();
        tracing::debug!(incidents = written, "incident log flushed");
    }

    let sarif = build_sarif(&reports, &failures, std::env::args().collect());
    serde_json::to_writer_pretty(&mut *writer, &sarif).context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;
    tracing::info!(
        archives = archives.len(),
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "done"
    );
    Ok(failures.is_empty())
}

fn run_instrument(config: &Config, archives: &[PathBuf], writer: &mut dyn Write) -> Result<bool> {
    if config.redirect.is_empty() {
        tracing::warn!("no [[redirect]] entries configured; nothing to instrument");
    }
    for redirect in &config.redirect {
        tracing::debug!(%redirect, "redirect configured");
    }
    let instrumentor = config.instrumentor();
    let mut succeeded = true;
    for archive in archives {
        let line = match instrumentor.instrument_calls(archive, &config.redirect) {
            Ok(true) => format!("{}: instrumented", archive.display()),
            Ok(false) => format!("{}: unchanged", archive.display()),
            Err(err) => {
                succeeded = false;
                format!("{}: failed: {err}", archive.display())
            }
        };
        writeln!(writer, "{line}").context("failed to write output")?;
    }
    Ok(succeeded)
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}
