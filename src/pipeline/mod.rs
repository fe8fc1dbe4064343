//! Rule processors and their sequential composition.
//!
//! A processor takes module bytes and returns possibly rewritten bytes plus
//! the findings it made. The same detection runs in both modes; only
//! [`Mode::Sanitize`] materializes removals.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::classfile;
use crate::error::Result;
use crate::rules::RuleRegistry;
use crate::rules::heuristics::StringHeuristic;

pub mod annotations;
pub mod calls;
pub mod visit;

pub use annotations::{AnnotationElementProcessor, AnnotationRemovalProcessor};
pub use calls::{CallSiteProcessor, StringLiteralProcessor};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Detect only; bytes are never changed.
    Scan,
    /// Detect, then remove or rewrite what was detected.
    Sanitize,
}

impl Mode {
    pub fn mutates(self) -> bool {
        matches!(self, Mode::Sanitize)
    }
}

/// Where in a module a finding was made.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Location {
    ClassAnnotation,
    Field(String),
    Method(String),
    Parameter { index: usize, method: String },
    AnnotationDefault { method: String },
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::ClassAnnotation => write!(f, "class-annotation"),
            Location::Field(name) => write!(f, "field:{name}"),
            Location::Method(name) => write!(f, "method:{name}"),
            Location::Parameter { index, method } => write!(f, "param:{index}:method:{method}"),
            Location::AnnotationDefault { .. } => write!(f, "annotation-default"),
        }
    }
}

impl Serialize for Location {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Finding {
    pub rule_id: String,
    pub module_name: String,
    pub location: Location,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct ProcessorResult {
    pub output: Vec<u8>,
    /// True only when a removal or substitution actually happened.
    pub modified: bool,
    pub findings: Vec<Finding>,
}

impl ProcessorResult {
    /// Result of a pass that left the module untouched.
    pub fn unchanged(input: &[u8], findings: Vec<Finding>) -> Self {
        Self {
            output: input.to_vec(),
            modified: false,
            findings,
        }
    }
}

/// One rule-backed pass over a module.
pub trait Processor: Send + Sync {
    fn id(&self) -> &str;
    fn process(&self, module: &[u8], mode: Mode) -> Result<ProcessorResult>;
}

/// Processors applied in order, each consuming the previous one's output.
#[derive(Default)]
pub struct Pipeline {
    processors: Vec<Box<dyn Processor>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Annotation removal, annotation elements, call sites, then string literals.
    pub fn standard(
        registry: Arc<RuleRegistry>,
        removed_annotations: AnnotationRemovalProcessor,
        heuristic: StringHeuristic,
    ) -> Self {
        Self::new()
            .with(removed_annotations)
            .with(AnnotationElementProcessor::new(Arc::clone(&registry)))
            .with(CallSiteProcessor::new(Arc::clone(&registry)))
            .with(StringLiteralProcessor::new(registry, heuristic))
    }

    pub fn with(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn processor_ids(&self) -> Vec<&str> {
        self.processors.iter().map(|processor| processor.id()).collect()
    }

    /// Runs every processor. Findings concatenate in processor order; any
    /// rewritten output is validated before it is returned.
    pub fn process(&self, module: &[u8], mode: Mode) -> Result<ProcessorResult> {
        let mut current = module.to_vec();
        let mut modified = false;
        let mut findings = Vec::new();
        for processor in &self.processors {
            let result = processor.process(&current, mode)?;
            tracing::trace!(
                processor = processor.id(),
                findings = result.findings.len(),
                modified = result.modified,
                "processor finished"
            );
            modified |= result.modified;
            findings.extend(result.findings);
            current = result.output;
        }
        if modified {
            classfile::validate(&current)?;
        }
        Ok(ProcessorResult {
            output: current,
            modified,
            findings,
        })
    }
}
