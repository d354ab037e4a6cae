//! Ordered rule engine over owned sibling sequences.
//!
//! Some vendor markup (bylines above all) comes in many shapes that can only
//! be told apart by looking at a whole run of siblings. Each shape is a
//! [`Rule`]; the [`RuleEngine`] tries them in order and takes the first
//! match. When no rule matches, the engine's fallback produces a value from
//! the raw sequence so the article is still archived.

use crate::utils::collapse_whitespace;
use std::fmt;

/// Owned copy of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Sibling>,
}

impl Fragment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: Sibling) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_child(Sibling::Text(text.into()))
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }

    /// Whitespace-collapsed text of the whole subtree; comments excluded.
    pub fn text(&self) -> String {
        let mut raw = String::new();
        push_text(&self.children, &mut raw);
        collapse_whitespace(&raw)
    }

    /// Children other than whitespace-only text.
    pub fn significant_children(&self) -> impl Iterator<Item = &Sibling> {
        self.children.iter().filter(|c| !c.is_blank())
    }
}

fn push_text(siblings: &[Sibling], out: &mut String) {
    for sibling in siblings {
        match sibling {
            Sibling::Text(t) => out.push_str(t),
            Sibling::Element(f) => {
                out.push(' ');
                push_text(&f.children, out);
                out.push(' ');
            }
            Sibling::Comment(_) => {}
        }
    }
}

/// One node of a sibling sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sibling {
    Text(String),
    Element(Fragment),
    Comment(String),
}

impl Sibling {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn element(fragment: Fragment) -> Self {
        Self::Element(fragment)
    }

    /// `true` for whitespace-only text.
    pub fn is_blank(&self) -> bool {
        matches!(self, Sibling::Text(t) if t.trim().is_empty())
    }

    pub fn as_element(&self) -> Option<&Fragment> {
        match self {
            Sibling::Element(f) => Some(f),
            _ => None,
        }
    }
}

/// Flattened, whitespace-collapsed text of a sibling sequence.
pub fn flatten_text(siblings: &[Sibling]) -> String {
    let mut raw = String::new();
    push_text(siblings, &mut raw);
    collapse_whitespace(&raw)
}

/// Result of offering a sibling sequence to one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome<T> {
    Matched(T),
    NoMatch,
}

/// A recognizer for one markup shape.
pub trait Rule<T>: Send + Sync {
    /// Stable name, used in logs.
    fn name(&self) -> &'static str;

    /// Inspect `siblings` (children of `parent`, if known) and build a value
    /// when the shape matches. Rules never partially match.
    fn try_parse(&self, siblings: &[Sibling], parent: Option<&Fragment>) -> RuleOutcome<T>;
}

/// What the engine produced and which rule produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied<T> {
    /// `None` when the fallback was used.
    pub rule: Option<&'static str>,
    pub value: T,
}

/// First-match-wins sequence of rules with a fallback.
pub struct RuleEngine<T> {
    rules: Vec<Box<dyn Rule<T>>>,
    fallback: fn(&[Sibling]) -> T,
}

impl<T> fmt::Debug for RuleEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleEngine")
            .field("rules", &self.rule_names())
            .finish()
    }
}

impl<T> RuleEngine<T> {
    pub fn new(fallback: fn(&[Sibling]) -> T) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    /// Append a rule; rules are tried in insertion order.
    pub fn with_rule(mut self, rule: impl Rule<T> + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn apply(&self, siblings: &[Sibling], parent: Option<&Fragment>) -> Applied<T> {
        for rule in &self.rules {
            if let RuleOutcome::Matched(value) = rule.try_parse(siblings, parent) {
                return Applied {
                    rule: Some(rule.name()),
                    value,
                };
            }
        }
        Applied {
            rule: None,
            value: (self.fallback)(siblings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StartsWith(&'static str);

    impl Rule<String> for StartsWith {
        fn name(&self) -> &'static str {
            self.0
        }

        fn try_parse(&self, siblings: &[Sibling], _parent: Option<&Fragment>) -> RuleOutcome<String> {
            let text = flatten_text(siblings);
            if text.starts_with(self.0) {
                RuleOutcome::Matched(format!("{}:{}", self.0, text))
            } else {
                RuleOutcome::NoMatch
            }
        }
    }

    fn fallback(siblings: &[Sibling]) -> String {
        format!("fallback:{}", flatten_text(siblings))
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let engine = RuleEngine::new(fallback)
            .with_rule(StartsWith("By"))
            .with_rule(StartsWith("B"));
        let applied = engine.apply(&[Sibling::text("By JOHN")], None);
        assert_eq!(applied.rule, Some("By"));
        assert_eq!(applied.value, "By:By JOHN");

        let applied = engine.apply(&[Sibling::text("Bloomberg")], None);
        assert_eq!(applied.rule, Some("B"));
    }

    #[test]
    fn test_fallback_when_nothing_matches() {
        let engine = RuleEngine::new(fallback).with_rule(StartsWith("By"));
        let applied = engine.apply(&[Sibling::text(" Staff \n reporters ")], None);
        assert_eq!(applied.rule, None);
        assert_eq!(applied.value, "fallback:Staff reporters");
    }

    #[test]
    fn test_fragment_text_separates_elements() {
        let li = Fragment::new("li")
            .with_attr("class", "byName first")
            .with_child(Sibling::element(Fragment::new("a").with_text("JOHN")))
            .with_text("SMITH")
            .with_child(Sibling::Comment("ignored".into()));
        assert_eq!(li.text(), "JOHN SMITH");
        assert!(li.has_class("first"));
        assert!(!li.has_class("byNam"));
        assert_eq!(li.attr("href"), None);
    }
}
