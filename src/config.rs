//! TOML configuration: rules, removal patterns, redirects, and paths.
//!
//! ```toml
//! builtin_rules = true
//! keywords = ["defineClass", "setAccessible"]
//! incident_log = "logs/incidents.log"
//!
//! [[rules.call]]
//! owner = "java\\.net\\.Socket"
//! name = "<init>"
//!
//! [[rules.annotation_element]]
//! annotation = "EventHandler"
//! enum_type = "EventPriority"
//! element = "priority"
//!
//! [[remove_annotation]]
//! annotation = "example\\.Unsafe"
//!
//! [[redirect]]
//! owner = "java.lang.Runtime"
//! name = "exec"
//! descriptor = "(Ljava/lang/String;)Ljava/lang/Process;"
//! shim_owner = "com.example.shim.Guard"
//! shim_name = "exec"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;

use crate::error::Result;
use crate::instrument::{ForwardingShims, Instrumentor, Redirect, ShimDirectory};
use crate::pipeline::{AnnotationRemovalProcessor, Pipeline};
use crate::rules::RuleRegistry;
use crate::rules::builtin::register_defaults;
use crate::rules::heuristics::StringHeuristic;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Load the built-in insecure API rules before the configured ones.
    pub builtin_rules: bool,
    pub rules: RulesConfig,
    pub remove_annotation: Vec<RemoveAnnotationConfig>,
    /// Replaces the built-in heuristic keyword set when present.
    pub keywords: Option<Vec<String>>,
    pub redirect: Vec<Redirect>,
    pub backup_dir: Option<PathBuf>,
    pub incident_log: Option<PathBuf>,
    /// Directory of prebuilt shim modules. Shims are synthesized when unset.
    pub shim_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            builtin_rules: true,
            rules: RulesConfig::default(),
            remove_annotation: Vec::new(),
            keywords: None,
            redirect: Vec::new(),
            backup_dir: None,
            incident_log: None,
            shim_dir: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub call: Vec<CallRuleConfig>,
    pub field_read: Vec<FieldReadRuleConfig>,
    pub annotation_element: Vec<AnnotationElementRuleConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CallRuleConfig {
    pub owner: String,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FieldReadRuleConfig {
    pub owner: String,
    pub name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AnnotationElementRuleConfig {
    pub annotation: String,
    pub enum_type: Option<String>,
    pub element: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RemoveAnnotationConfig {
    pub annotation: String,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Registry with the built-in rules (unless disabled) followed by the
    /// configured ones, in file order.
    pub fn registry(&self) -> Result<RuleRegistry> {
        let registry = RuleRegistry::new();
        if self.builtin_rules {
            register_defaults(&registry)?;
        }
        for rule in &self.rules.call {
            registry.add_call_rule(&rule.owner, &rule.name)?;
        }
        for rule in &self.rules.field_read {
            registry.add_field_read_rule(&rule.owner, rule.name.as_deref())?;
        }
        for rule in &self.rules.annotation_element {
            registry.add_annotation_element_rule(
                &rule.annotation,
                rule.enum_type.as_deref(),
                rule.element.as_deref(),
            )?;
        }
        Ok(registry)
    }

    pub fn heuristic(&self) -> StringHeuristic {
        match &self.keywords {
            Some(keywords) => StringHeuristic::new(keywords.iter().cloned()),
            None => StringHeuristic::default(),
        }
    }

    pub fn pipeline(&self, registry: Arc<RuleRegistry>) -> Result<Pipeline> {
        let removal = AnnotationRemovalProcessor::new(
            self.remove_annotation.iter().map(|rule| rule.annotation.as_str()),
        )?;
        Ok(Pipeline::standard(registry, removal, self.heuristic()))
    }

    pub fn instrumentor(&self) -> Instrumentor {
        let instrumentor = match &self.shim_dir {
            Some(dir) => Instrumentor::new(ShimDirectory::new(dir)),
            None => Instrumentor::new(ForwardingShims),
        };
        match &self.backup_dir {
            Some(dir) => instrumentor.with_backup_dir(dir),
            None => instrumentor,
        }
    }
}
