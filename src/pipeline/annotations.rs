use std::sync::Arc;

use crate::classfile::Module;
use crate::error::Result;
use crate::pipeline::visit::{AnnotationRule, Hit, walk_module};
use crate::pipeline::{Mode, Processor, ProcessorResult};
use crate::rules::{Pattern, RuleRegistry, RuleSet};

/// Drops enum element values matched by annotation element rules.
pub struct AnnotationElementProcessor {
    registry: Arc<RuleRegistry>,
}

impl AnnotationElementProcessor {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self { registry }
    }
}

struct ElementRules<'a>(&'a RuleSet);

impl AnnotationRule for ElementRules<'_> {
    fn visit_enum(
        &self,
        annotation_type: &str,
        element_name: &str,
        enum_type: &str,
        constant: &str,
    ) -> Option<Hit> {
        self.0
            .annotation_element_rule(annotation_type, Some(enum_type), element_name)
            .map(|rule| Hit {
                rule_id: rule.id.clone(),
                message: format!(
                    "Disallowed annotation element: @{annotation_type}({element_name}={enum_type}.{constant})"
                ),
            })
    }
}

impl Processor for AnnotationElementProcessor {
    fn id(&self) -> &str {
        "annotation-elements"
    }

    fn process(&self, module: &[u8], mode: Mode) -> Result<ProcessorResult> {
        let rules = self.registry.snapshot();
        if rules.annotation_elements().is_empty() {
            return Ok(ProcessorResult::unchanged(module, Vec::new()));
        }
        rewrite(module, mode, &ElementRules(&rules))
    }
}

/// Removal rule that strips whole annotations by type.
pub struct AnnotationRemovalProcessor {
    patterns: Vec<Pattern>,
}

impl AnnotationRemovalProcessor {
    /// `patterns` are matched by containment against binary annotation type names.
    pub fn new<S: AsRef<str>>(patterns: impl IntoIterator<Item = S>) -> Result<Self> {
        let patterns = patterns
            .into_iter()
            .map(|pattern| Pattern::new(pattern.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }
}

impl AnnotationRule for AnnotationRemovalProcessor {
    fn visit_annotation(&self, annotation_type: &str) -> Option<Hit> {
        self.patterns
            .iter()
            .position(|pattern| pattern.is_found_in(annotation_type))
            .map(|index| Hit {
                rule_id: format!("remove-annotation-{:03}", index + 1),
                message: format!("Disallowed annotation: @{annotation_type}"),
            })
    }
}

impl Processor for AnnotationRemovalProcessor {
    fn id(&self) -> &str {
        "annotation-removal"
    }

    fn process(&self, module: &[u8], mode: Mode) -> Result<ProcessorResult> {
        if self.patterns.is_empty() {
            return Ok(ProcessorResult::unchanged(module, Vec::new()));
        }
        rewrite(module, mode, self)
    }
}

/// Parse, walk, and re-serialize only when something was dropped.
fn rewrite(module: &[u8], mode: Mode, rule: &dyn AnnotationRule) -> Result<ProcessorResult> {
    let mut parsed = Module::parse(module)?;
    let mut findings = Vec::new();
    let modified = walk_module(&mut parsed, rule, mode, &mut findings)?;
    if !modified {
        return Ok(ProcessorResult::unchanged(module, findings));
    }
    Ok(ProcessorResult {
        output: parsed.to_bytes()?,
        modified,
        findings,
    })
}
