//! Pattern rules and the signature matcher.
//!
//! Type patterns (call owners, field owners, annotation and enum types) are
//! regular expressions matched by containment: they hit when found anywhere
//! in the binary name. Member name patterns must match the whole name, so
//! `bar` does not hit `barely` unless written as `bar.*`.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use regex::Regex;

use crate::classfile::descriptor::binary_name;
use crate::error::{Error, Result};

pub mod builtin;
pub mod heuristics;

/// Compiled rule pattern.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    contained: Regex,
    whole: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self> {
        let invalid = |err: regex::Error| Error::InvalidPattern {
            pattern: source.to_string(),
            reason: err.to_string(),
        };
        Ok(Self {
            source: source.to_string(),
            contained: Regex::new(source).map_err(invalid)?,
            whole: Regex::new(&format!("^(?:{source})$")).map_err(invalid)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Containment match, used for type patterns.
    pub fn is_found_in(&self, candidate: &str) -> bool {
        self.contained.is_match(candidate)
    }

    /// Whole-string match, used for member names and the string literal heuristic.
    pub fn matches_whole(&self, candidate: &str) -> bool {
        self.whole.is_match(candidate)
    }
}

#[derive(Clone, Debug)]
pub struct CallRule {
    pub id: String,
    pub owner: Pattern,
    pub name: Pattern,
}

#[derive(Clone, Debug)]
pub struct FieldReadRule {
    pub id: String,
    pub owner: Pattern,
    /// `None` matches every static field of a matching owner.
    pub name: Option<Pattern>,
}

#[derive(Clone, Debug)]
pub struct AnnotationElementRule {
    pub id: String,
    pub annotation_type: Pattern,
    pub enum_type: Option<Pattern>,
    /// Compared by equality; element names are identifiers, not patterns.
    pub element_name: Option<String>,
}

/// Detection of a call or static field read inside a method body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Match {
    pub containing_module: String,
    pub containing_method: String,
    pub matched_owner: String,
    pub matched_name: String,
    pub matched_descriptor: String,
}

/// Immutable snapshot of every registered rule.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    calls: Vec<Arc<CallRule>>,
    field_reads: Vec<Arc<FieldReadRule>>,
    annotation_elements: Vec<Arc<AnnotationElementRule>>,
}

impl RuleSet {
    pub fn calls(&self) -> &[Arc<CallRule>] {
        &self.calls
    }

    pub fn field_reads(&self) -> &[Arc<FieldReadRule>] {
        &self.field_reads
    }

    pub fn annotation_elements(&self) -> &[Arc<AnnotationElementRule>] {
        &self.annotation_elements
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.field_reads.is_empty() && self.annotation_elements.is_empty()
    }

    /// First call rule hit by `owner.name`. Owners may be internal or binary names.
    pub fn call_rule(&self, owner: &str, name: &str) -> Option<&CallRule> {
        let owner = binary_name(owner);
        self.calls
            .iter()
            .map(Arc::as_ref)
            .find(|rule| rule.owner.is_found_in(&owner) && rule.name.matches_whole(name))
    }

    pub fn match_call(&self, owner: &str, name: &str) -> bool {
        self.call_rule(owner, name).is_some()
    }

    pub fn field_read_rule(&self, owner: &str, name: &str) -> Option<&FieldReadRule> {
        let owner = binary_name(owner);
        self.field_reads.iter().map(Arc::as_ref).find(|rule| {
            rule.owner.is_found_in(&owner)
                && rule.name.as_ref().is_none_or(|pattern| pattern.matches_whole(name))
        })
    }

    pub fn match_field_read(&self, owner: &str, name: &str) -> bool {
        self.field_read_rule(owner, name).is_some()
    }

    /// `annotation_type` and `enum_type` are binary names.
    pub fn annotation_element_rule(
        &self,
        annotation_type: &str,
        enum_type: Option<&str>,
        element_name: &str,
    ) -> Option<&AnnotationElementRule> {
        self.annotation_elements.iter().map(Arc::as_ref).find(|rule| {
            let enum_ok = match (&rule.enum_type, enum_type) {
                (None, _) => true,
                (Some(pattern), Some(candidate)) => pattern.is_found_in(candidate),
                (Some(_), None) => false,
            };
            rule.annotation_type.is_found_in(annotation_type)
                && enum_ok
                && rule
                    .element_name
                    .as_deref()
                    .is_none_or(|expected| expected == element_name)
        })
    }

    pub fn match_annotation_element(
        &self,
        annotation_type: &str,
        enum_type: Option<&str>,
        element_name: &str,
    ) -> bool {
        self.annotation_element_rule(annotation_type, enum_type, element_name)
            .is_some()
    }

    /// Call rule whose owner pattern matches `literal` as a whole string.
    pub fn reflective_owner_rule(&self, literal: &str) -> Option<&CallRule> {
        self.calls
            .iter()
            .map(Arc::as_ref)
            .find(|rule| rule.owner.matches_whole(literal))
    }
}

/// Process-wide rule registry with copy-on-write updates.
///
/// Readers take a snapshot and match against it without holding the lock.
/// Writers are serialized on `writer`, build the next set from a snapshot and
/// only take the write lock to swap it in.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    current: RwLock<Arc<RuleSet>>,
    writer: Mutex<()>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.current.read())
    }

    pub fn add_call_rule(&self, owner_pattern: &str, name_pattern: &str) -> Result<String> {
        let owner = Pattern::new(owner_pattern)?;
        let name = Pattern::new(name_pattern)?;
        Ok(self.update(|set| {
            let id = format!("call-{:03}", set.calls.len() + 1);
            set.calls.push(Arc::new(CallRule {
                id: id.clone(),
                owner,
                name,
            }));
            id
        }))
    }

    pub fn add_field_read_rule(
        &self,
        owner_pattern: &str,
        name_pattern: Option<&str>,
    ) -> Result<String> {
        let owner = Pattern::new(owner_pattern)?;
        let name = name_pattern.map(Pattern::new).transpose()?;
        Ok(self.update(|set| {
            let id = format!("field-read-{:03}", set.field_reads.len() + 1);
            set.field_reads.push(Arc::new(FieldReadRule {
                id: id.clone(),
                owner,
                name,
            }));
            id
        }))
    }

    pub fn add_annotation_element_rule(
        &self,
        annotation_type_pattern: &str,
        enum_type_pattern: Option<&str>,
        element_name: Option<&str>,
    ) -> Result<String> {
        let annotation_type = Pattern::new(annotation_type_pattern)?;
        let enum_type = enum_type_pattern.map(Pattern::new).transpose()?;
        let element_name = element_name.map(str::to_string);
        Ok(self.update(|set| {
            let id = format!("annotation-element-{:03}", set.annotation_elements.len() + 1);
            set.annotation_elements.push(Arc::new(AnnotationElementRule {
                id: id.clone(),
                annotation_type,
                enum_type,
                element_name,
            }));
            id
        }))
    }

    fn update<T>(&self, apply: impl FnOnce(&mut RuleSet) -> T) -> T {
        let _writer = self.writer.lock();
        let mut next = RuleSet::clone(&self.snapshot());
        let out = apply(&mut next);
        *self.current.write() = Arc::new(next);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn call_rule_finds_owner_anywhere_but_matches_whole_name() {
        let registry = RuleRegistry::new();
        registry.add_call_rule(".*Foo", "bar").expect("add rule");
        let rules = registry.snapshot();

        assert!(rules.match_call("com.example.Foo", "bar"));
        assert!(rules.match_call("com/example/Foo", "bar"));
        assert!(rules.match_call("com.example.FooBar", "bar"));
        assert!(!rules.match_call("com.example.Foo", "barely"));
        assert!(!rules.match_call("com.example.Fo", "bar"));
    }

    #[test]
    fn name_pattern_can_widen_explicitly() {
        let registry = RuleRegistry::new();
        registry.add_call_rule("Foo", "bar.*").expect("add rule");
        let rules = registry.snapshot();

        assert!(rules.match_call("com.example.Foo", "bar"));
        assert!(rules.match_call("com.example.Foo", "barely"));
    }

    #[test]
    fn field_read_rule_without_name_matches_any_field() {
        let registry = RuleRegistry::new();
        registry.add_field_read_rule("sun\\.misc\\.Unsafe", None).expect("add rule");
        let rules = registry.snapshot();

        assert!(rules.match_field_read("sun/misc/Unsafe", "theUnsafe"));
        assert!(rules.match_field_read("sun/misc/Unsafe", "other"));
        assert!(!rules.match_field_read("java/lang/System", "out"));
    }

    #[test]
    fn annotation_element_rule_checks_enum_type_and_element_name() {
        let registry = RuleRegistry::new();
        registry
            .add_annotation_element_rule("EventHandler", Some("EventPriority"), Some("priority"))
            .expect("add rule");
        let rules = registry.snapshot();

        assert!(rules.match_annotation_element(
            "org.bukkit.event.EventHandler",
            Some("org.bukkit.event.EventPriority"),
            "priority"
        ));
        assert!(!rules.match_annotation_element(
            "org.bukkit.event.EventHandler",
            Some("org.bukkit.event.EventPriority"),
            "ignoreCancelled"
        ));
        assert!(!rules.match_annotation_element("org.bukkit.event.EventHandler", None, "priority"));
    }

    #[test]
    fn invalid_pattern_is_rejected_without_touching_the_registry() {
        let registry = RuleRegistry::new();

        let err = registry.add_call_rule("(", "bar").expect_err("invalid pattern");

        assert!(matches!(err, Error::InvalidPattern { .. }));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn snapshots_are_stable_while_rules_are_added() {
        let registry = Arc::new(RuleRegistry::new());
        registry.add_call_rule("Foo", "bar").expect("add rule");
        let before = registry.snapshot();

        let writer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for index in 0..32 {
                    registry
                        .add_call_rule(&format!("Owner{index}"), "run")
                        .expect("add rule");
                }
            })
        };
        for _ in 0..32 {
            assert!(registry.snapshot().match_call("Foo", "bar"));
        }
        writer.join().expect("writer thread");

        assert_eq!(1, before.calls().len());
        assert_eq!(33, registry.snapshot().calls().len());
    }

    #[test]
    fn snapshot_does_not_wait_for_an_update_in_progress() {
        let registry = Arc::new(RuleRegistry::new());
        registry.add_call_rule("Foo", "bar").expect("add rule");
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let writer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                registry.update(|set| {
                    started_tx.send(()).expect("signal start");
                    release_rx.recv().expect("wait for release");
                    set.calls.clear();
                })
            })
        };
        started_rx.recv().expect("update started");

        assert_eq!(1, registry.snapshot().calls().len());
        release_tx.send(()).expect("release writer");
        writer.join().expect("writer thread");
        assert!(registry.snapshot().is_empty());
    }
}
