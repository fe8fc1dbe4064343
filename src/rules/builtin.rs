use crate::error::Result;
use crate::rules::RuleRegistry;

/// Calls to process, reflection, and class loading APIs.
const INSECURE_CALLS: &[(&str, &str)] = &[
    ("^java\\.lang\\.Runtime$", "exec"),
    ("^java\\.lang\\.ProcessBuilder$", "<init>|start"),
    ("^java\\.lang\\.reflect\\.Method$", "invoke"),
    ("^java\\.lang\\.reflect\\.Constructor$", "newInstance"),
    ("^java\\.lang\\.Class$", "forName"),
];

const INSECURE_FIELD_READS: &[(&str, Option<&str>)] = &[("^sun\\.misc\\.Unsafe$", Some("theUnsafe"))];

/// Registry preloaded with the default insecure API rules.
pub fn default_registry() -> Result<RuleRegistry> {
    let registry = RuleRegistry::new();
    register_defaults(&registry)?;
    Ok(registry)
}

pub fn register_defaults(registry: &RuleRegistry) -> Result<()> {
    for (owner, name) in INSECURE_CALLS {
        registry.add_call_rule(owner, name)?;
    }
    for (owner, name) in INSECURE_FIELD_READS {
        registry.add_field_read_rule(owner, *name)?;
    }
    Ok(())
}
