use std::sync::Arc;

use crate::bytecode;
use crate::classfile::Module;
use crate::classfile::descriptor::binary_name;
use crate::error::Result;
use crate::ir::InstructionKind;
use crate::pipeline::{Finding, Location, Mode, Processor, ProcessorResult};
use crate::rules::heuristics::{LiteralHit, StringHeuristic};
use crate::rules::{Match, RuleRegistry, RuleSet};

/// Call and static field read matches in every method body of `module`,
/// paired with the id of the rule that hit.
pub fn signature_matches(module: &Module, rules: &RuleSet) -> Result<Vec<(String, Match)>> {
    let module_name = module.binary_name()?;
    let mut matches = Vec::new();
    for method in &module.methods {
        let Some(code) = method.code() else {
            continue;
        };
        let method_name = module.member_name(method)?;
        for instruction in bytecode::decode(&code.bytecode, &module.constant_pool)? {
            let (rule_id, owner, name, descriptor) = match instruction.kind {
                InstructionKind::Invoke(call) => match rules.call_rule(&call.owner, &call.name) {
                    Some(rule) => (rule.id.clone(), call.owner, call.name, call.descriptor),
                    None => continue,
                },
                InstructionKind::GetStatic(read) => {
                    match rules.field_read_rule(&read.owner, &read.name) {
                        Some(rule) => (rule.id.clone(), read.owner, read.name, read.descriptor),
                        None => continue,
                    }
                }
                _ => continue,
            };
            matches.push((
                rule_id,
                Match {
                    containing_module: module_name.clone(),
                    containing_method: method_name.clone(),
                    matched_owner: binary_name(&owner),
                    matched_name: name,
                    matched_descriptor: descriptor,
                },
            ));
        }
    }
    Ok(matches)
}

/// Reports calls and static field reads hit by the registry. Detection only.
pub struct CallSiteProcessor {
    registry: Arc<RuleRegistry>,
}

impl CallSiteProcessor {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self { registry }
    }
}

impl Processor for CallSiteProcessor {
    fn id(&self) -> &str {
        "call-sites"
    }

    fn process(&self, module: &[u8], _mode: Mode) -> Result<ProcessorResult> {
        let rules = self.registry.snapshot();
        if rules.calls().is_empty() && rules.field_reads().is_empty() {
            return Ok(ProcessorResult::unchanged(module, Vec::new()));
        }
        let parsed = Module::parse(module)?;
        let findings = signature_matches(&parsed, &rules)?
            .into_iter()
            .map(|(rule_id, found)| Finding {
                rule_id,
                message: format!(
                    "Disallowed reference: {}.{}{}",
                    found.matched_owner, found.matched_name, found.matched_descriptor
                ),
                location: Location::Method(found.containing_method),
                module_name: found.containing_module,
            })
            .collect();
        Ok(ProcessorResult::unchanged(module, findings))
    }
}

/// Flags string constants that look like reflective access. Detection only.
pub struct StringLiteralProcessor {
    registry: Arc<RuleRegistry>,
    heuristic: StringHeuristic,
}

impl StringLiteralProcessor {
    pub fn new(registry: Arc<RuleRegistry>, heuristic: StringHeuristic) -> Self {
        Self {
            registry,
            heuristic,
        }
    }
}

impl Processor for StringLiteralProcessor {
    fn id(&self) -> &str {
        "string-literals"
    }

    fn process(&self, module: &[u8], _mode: Mode) -> Result<ProcessorResult> {
        let rules = self.registry.snapshot();
        let parsed = Module::parse(module)?;
        let module_name = parsed.binary_name()?;
        let mut findings = Vec::new();
        for method in &parsed.methods {
            let Some(code) = method.code() else {
                continue;
            };
            let method_name = parsed.member_name(method)?;
            for instruction in bytecode::decode(&code.bytecode, &parsed.constant_pool)? {
                let InstructionKind::ConstString(literal) = instruction.kind else {
                    continue;
                };
                let Some(hit) = self.heuristic.inspect(&literal, &rules) else {
                    continue;
                };
                let (rule_id, message) = match hit {
                    LiteralHit::Keyword(keyword) => (
                        "string-keyword".to_string(),
                        format!("Suspicious string constant {literal:?} (keyword {keyword})"),
                    ),
                    LiteralHit::ReflectiveOwner { rule_id } => (
                        rule_id,
                        format!("String constant {literal:?} names a disallowed owner"),
                    ),
                };
                findings.push(Finding {
                    rule_id,
                    module_name: module_name.clone(),
                    location: Location::Method(method_name.clone()),
                    message,
                });
            }
        }
        Ok(ProcessorResult::unchanged(module, findings))
    }
}
