use crate::rules::RuleSet;

/// Keywords that mark a string constant as a likely reflective or native escape.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "java.lang.Runtime",
    "java.lang.ProcessBuilder",
    "sun.misc.Unsafe",
    "defineClass",
    "URLClassLoader",
    "getDeclaredMethod",
    "setAccessible",
];

/// Why a string constant was flagged.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LiteralHit {
    Keyword(String),
    /// The literal names a class that a call rule targets, e.g. `Class.forName("...")`.
    ReflectiveOwner { rule_id: String },
}

/// Heuristic matcher over string constants in method bodies.
#[derive(Clone, Debug)]
pub struct StringHeuristic {
    keywords: Vec<String>,
}

impl Default for StringHeuristic {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORDS.iter().map(|keyword| keyword.to_string()))
    }
}

impl StringHeuristic {
    pub fn new(keywords: impl IntoIterator<Item = String>) -> Self {
        Self {
            keywords: keywords.into_iter().collect(),
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn inspect(&self, literal: &str, rules: &RuleSet) -> Option<LiteralHit> {
        if let Some(keyword) = self
            .keywords
            .iter()
            .find(|keyword| literal.contains(keyword.as_str()))
        {
            return Some(LiteralHit::Keyword(keyword.clone()));
        }
        rules
            .reflective_owner_rule(literal)
            .map(|rule| LiteralHit::ReflectiveOwner {
                rule_id: rule.id.clone(),
            })
    }
}
