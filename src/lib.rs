//! Policy scanning and sanitization for JVM class files inside JAR archives.
//!
//! An [`archive::Orchestrator`] runs every class file of an archive through
//! a [`pipeline::Pipeline`] of rule processors. `scan` only reports;
//! `sanitize` also drops what was reported and replaces the archive
//! atomically. [`instrument::Instrumentor`] redirects configured calls to
//! injected shim methods.

use std::path::Path;
use std::sync::Arc;

pub mod archive;
pub mod bytecode;
pub mod classfile;
pub mod config;
pub mod error;
pub mod incident;
pub mod instrument;
pub mod ir;
pub mod logging;
pub(crate) mod opcodes;
pub mod pipeline;
pub mod report;
pub mod rules;

#[cfg(test)]
mod testing;

pub use archive::{ArchiveReport, ModuleFailure, Orchestrator};
pub use config::Config;
pub use error::{Error, Result};
pub use instrument::{Instrumentor, Redirect};
pub use pipeline::{Finding, Location, Mode, Pipeline};
pub use rules::RuleRegistry;

fn default_orchestrator() -> Result<Orchestrator> {
    let config = Config::default();
    let registry = Arc::new(config.registry()?);
    Ok(Orchestrator::new(config.pipeline(registry)?))
}

/// Scans `path` with the built-in rules.
pub fn scan(path: &Path) -> Result<ArchiveReport> {
    default_orchestrator()?.scan(path)
}

/// Sanitizes `path` with the built-in rules.
pub fn sanitize(path: &Path) -> Result<ArchiveReport> {
    default_orchestrator()?.sanitize(path)
}

/// Redirects `redirects` in `path` using synthesized forwarding shims.
pub fn instrument_calls(path: &Path, redirects: &[Redirect]) -> Result<bool> {
    Config::default().instrumentor().instrument_calls(path, redirects)
}
