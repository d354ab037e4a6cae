//! Generic HTML tree utilities shared by the vendor parsers.
//!
//! Vendor markup drifts. Instead of silently skipping what it does not know,
//! every parser has to account for every node it is handed: it either
//! consumes the node (turns it into structured output or deliberately
//! ignores it) or the parse fails with a [`ParseError`].
//!
//! The parsed [`Html`] tree is never mutated. A [`DocumentParser`] keeps the
//! set of consumed node ids instead; consuming a node consumes its whole
//! subtree. [`DocumentParser::finish`] asserts that nothing but consumed
//! nodes and whitespace is left under an element before consuming it.
//!
//! # Submodules
//!
//! - [`rules`]: ordered rule engine for ambiguous sibling sequences
//! - [`byline`]: byline rules built on the engine
//! - [`paragraph`]: recursive descent over paragraph-like elements

pub mod byline;
pub mod paragraph;
pub mod rules;

use crate::error::ParseError;
use crate::utils::{collapse_whitespace, truncate_for_log};
use ego_tree::{NodeId, NodeRef};
use rules::{Fragment, Sibling};
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashSet;

/// Compile a selector that is known to be valid at build time.
///
/// Only for use with string literals in `Lazy` statics.
pub(crate) fn static_selector(css: &'static str) -> Selector {
    match Selector::parse(css) {
        Ok(sel) => sel,
        Err(e) => panic!("invalid built-in selector '{css}': {e:?}"),
    }
}

/// A CSS selector together with its source text, for error messages.
#[derive(Debug)]
pub struct Pattern {
    pub css: &'static str,
    pub selector: Selector,
}

impl Pattern {
    pub fn new(css: &'static str) -> Self {
        Self {
            css,
            selector: static_selector(css),
        }
    }
}

/// Concatenated, whitespace-collapsed text of an element.
pub fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

/// `true` for text nodes that hold only whitespace.
pub fn is_blank_text(node: NodeRef<'_, Node>) -> bool {
    matches!(node.value(), Node::Text(t) if t.trim().is_empty())
}

/// Short human-readable rendering of a node for error messages.
pub fn describe(node: NodeRef<'_, Node>) -> String {
    match node.value() {
        Node::Text(t) => format!("text {:?}", truncate_for_log(t.trim(), 80)),
        Node::Comment(c) => format!("<!--{}-->", truncate_for_log(c.trim(), 80)),
        Node::Element(_) => match ElementRef::wrap(node) {
            Some(el) => truncate_for_log(&el.html(), 160),
            None => "element".to_string(),
        },
        other => format!("{other:?}"),
    }
}

/// Consumption bookkeeping for one parsed document.
#[derive(Debug, Default)]
pub struct DocumentParser {
    consumed: HashSet<NodeId>,
}

impl DocumentParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `node` and its subtree as accounted for.
    pub fn consume(&mut self, node: NodeRef<'_, Node>) {
        self.consumed.insert(node.id());
    }

    /// Mark an element and its subtree as accounted for.
    pub fn consume_element(&mut self, element: ElementRef<'_>) {
        self.consume(*element);
    }

    /// `true` if `node` or one of its ancestors has been consumed.
    pub fn is_consumed(&self, node: NodeRef<'_, Node>) -> bool {
        if self.consumed.contains(&node.id()) {
            return true;
        }
        node.ancestors().any(|a| self.consumed.contains(&a.id()))
    }

    /// All unconsumed descendants of `root` matching `pattern`, in document
    /// order. The caller must consume each of them before finishing `root`.
    pub fn select_all<'a>(&self, root: ElementRef<'a>, pattern: &Pattern) -> Vec<ElementRef<'a>> {
        root.select(&pattern.selector)
            .filter(|el| !self.is_consumed(**el))
            .collect()
    }

    /// The single unconsumed descendant of `root` matching `pattern`.
    ///
    /// More than one match is always an error; no match is an error unless
    /// `allow_empty` is set, in which case `Ok(None)` is returned.
    pub fn select_exactly_one<'a>(
        &self,
        root: ElementRef<'a>,
        pattern: &Pattern,
        allow_empty: bool,
    ) -> Result<Option<ElementRef<'a>>, ParseError> {
        let matches = self.select_all(root, pattern);
        match matches.len() {
            0 if allow_empty => Ok(None),
            1 => Ok(matches.into_iter().next()),
            found => Err(ParseError::Cardinality {
                selector: pattern.css.to_string(),
                found,
            }),
        }
    }

    /// [`select_exactly_one`](Self::select_exactly_one) without `allow_empty`.
    pub fn select_required<'a>(&self, root: ElementRef<'a>, pattern: &Pattern) -> Result<ElementRef<'a>, ParseError> {
        self.select_exactly_one(root, pattern, false)?
            .ok_or_else(|| ParseError::Cardinality {
                selector: pattern.css.to_string(),
                found: 0,
            })
    }

    /// Direct children of `node` that have not been consumed yet.
    pub fn remaining_children<'a>(&self, node: ElementRef<'a>) -> Vec<NodeRef<'a, Node>> {
        node.children().filter(|c| !self.is_consumed(*c)).collect()
    }

    /// Fail unless every child of `node` is consumed or whitespace-only text.
    pub fn assert_exhausted(&self, node: ElementRef<'_>, context: &str) -> Result<(), ParseError> {
        let leftovers: Vec<String> = self
            .remaining_children(node)
            .into_iter()
            .filter(|c| !is_blank_text(*c))
            .map(describe)
            .collect();
        if leftovers.is_empty() {
            Ok(())
        } else {
            Err(ParseError::Unexhausted {
                context: context.to_string(),
                remainder: leftovers.join(", "),
            })
        }
    }

    /// [`assert_exhausted`](Self::assert_exhausted), then consume `node`.
    pub fn finish(&mut self, node: ElementRef<'_>, context: &str) -> Result<(), ParseError> {
        self.assert_exhausted(node, context)?;
        self.consume_element(node);
        Ok(())
    }

    /// Owned copy of `element` without its consumed descendants.
    pub fn fragment(&self, element: ElementRef<'_>) -> Fragment {
        Fragment {
            children: self.siblings(element),
            ..element_shell(element)
        }
    }

    /// Unconsumed children of `node` as an owned sibling sequence, for the
    /// rule engine and the paragraph parser.
    pub fn siblings(&self, node: ElementRef<'_>) -> Vec<Sibling> {
        self.remaining_children(node)
            .into_iter()
            .filter_map(|child| match child.value() {
                Node::Element(_) => ElementRef::wrap(child).map(|el| Sibling::Element(self.fragment(el))),
                _ => sibling_from_node(child),
            })
            .collect()
    }
}

/// Owned copy of a node; doctypes and processing instructions yield `None`.
pub fn sibling_from_node(node: NodeRef<'_, Node>) -> Option<Sibling> {
    match node.value() {
        Node::Text(t) => Some(Sibling::Text(t.to_string())),
        Node::Comment(c) => Some(Sibling::Comment(c.to_string())),
        Node::Element(_) => ElementRef::wrap(node).map(|el| Sibling::Element(fragment_from_element(el))),
        _ => None,
    }
}

/// Owned copy of an element and its subtree.
pub fn fragment_from_element(element: ElementRef<'_>) -> Fragment {
    Fragment {
        children: element.children().filter_map(sibling_from_node).collect(),
        ..element_shell(element)
    }
}

/// Name and attributes of an element, without its children.
pub fn element_shell(element: ElementRef<'_>) -> Fragment {
    let value = element.value();
    Fragment {
        name: value.name().to_string(),
        attrs: value
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        children: Vec::new(),
    }
}

/// Parse a full HTML document.
pub fn parse_document(content: &str) -> Html {
    Html::parse_document(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    static DIV: Lazy<Pattern> = Lazy::new(|| Pattern::new("div.story"));
    static P: Lazy<Pattern> = Lazy::new(|| Pattern::new("p"));
    static H1: Lazy<Pattern> = Lazy::new(|| Pattern::new("h1"));

    /// Parser that only knows `p`: consumes every `p` child, then finishes.
    fn parse_only_paragraphs(html: &str) -> Result<Vec<String>, ParseError> {
        let doc = parse_document(html);
        let mut parser = DocumentParser::new();
        let div = parser
            .select_exactly_one(doc.root_element(), &DIV, false)?
            .ok_or_else(|| ParseError::structural("test", "no div"))?;
        let mut texts = Vec::new();
        for p in parser.select_all(div, &P) {
            texts.push(element_text(p));
            parser.consume_element(p);
        }
        parser.finish(div, "div.story")?;
        Ok(texts)
    }

    #[test]
    fn test_exhaustive_consumption_accepts_known_markup() {
        let texts = parse_only_paragraphs(r#"<div class="story"><p>ok</p></div>"#).unwrap();
        assert_eq!(texts, vec!["ok".to_string()]);
    }

    #[test]
    fn test_exhaustive_consumption_rejects_unknown_tag() {
        let err = parse_only_paragraphs(r#"<div class="story"><p>ok</p><unknown-tag></unknown-tag></div>"#)
            .unwrap_err();
        match err {
            ParseError::Unexhausted { context, remainder } => {
                assert_eq!(context, "div.story");
                assert!(remainder.contains("unknown-tag"), "{remainder}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_whitespace_text_is_ignored_but_words_are_not() {
        assert!(parse_only_paragraphs("<div class=\"story\">\n  <p>a</p>\n  </div>").is_ok());
        let err = parse_only_paragraphs(r#"<div class="story"><p>a</p>stray words</div>"#).unwrap_err();
        assert!(matches!(err, ParseError::Unexhausted { .. }));
    }

    #[test]
    fn test_unconsumed_comment_fails() {
        let err = parse_only_paragraphs(r#"<div class="story"><p>a</p><!-- note --></div>"#).unwrap_err();
        assert!(err.to_string().contains("note"));
    }

    #[test]
    fn test_select_exactly_one_cardinality() {
        let doc = parse_document("<div><h1>a</h1><h1>b</h1></div>");
        let parser = DocumentParser::new();
        let err = parser
            .select_exactly_one(doc.root_element(), &H1, true)
            .unwrap_err();
        assert!(matches!(err, ParseError::Cardinality { found: 2, .. }));

        let doc = parse_document("<div></div>");
        assert!(
            parser
                .select_exactly_one(doc.root_element(), &H1, true)
                .unwrap()
                .is_none()
        );
        let err = parser
            .select_exactly_one(doc.root_element(), &H1, false)
            .unwrap_err();
        assert!(matches!(err, ParseError::Cardinality { found: 0, .. }));
    }

    #[test]
    fn test_consumed_nodes_drop_out_of_selection() {
        let doc = parse_document("<div><h1>a</h1><section><h1>b</h1></section></div>");
        let mut parser = DocumentParser::new();
        let section = parser
            .select_exactly_one(doc.root_element(), &Pattern::new("section"), false)
            .unwrap()
            .unwrap();
        parser.consume_element(section);

        let only = parser
            .select_exactly_one(doc.root_element(), &H1, false)
            .unwrap()
            .unwrap();
        assert_eq!(element_text(only), "a");
    }

    #[test]
    fn test_fragment_skips_consumed_descendants() {
        let doc = parse_document(r#"<div class="story">Kept <span><b class="x">gone</b> text</span></div>"#);
        let mut parser = DocumentParser::new();
        let div = parser.select_required(doc.root_element(), &DIV).unwrap();
        let b = parser.select_required(div, &Pattern::new("b.x")).unwrap();
        parser.consume_element(b);
        assert_eq!(parser.fragment(div).text(), "Kept text");
        assert_eq!(fragment_from_element(div).text(), "Kept gone text");
    }

    #[test]
    fn test_siblings_are_owned_copies() {
        let doc = parse_document(r#"<ul class="socialByline">By <li class="byName">JOHN</li></ul>"#);
        let parser = DocumentParser::new();
        let ul = parser
            .select_exactly_one(doc.root_element(), &Pattern::new("ul"), false)
            .unwrap()
            .unwrap();
        let siblings = parser.siblings(ul);
        assert_eq!(siblings.len(), 2);
        assert_eq!(siblings[0], Sibling::Text("By ".to_string()));
        match &siblings[1] {
            Sibling::Element(f) => {
                assert_eq!(f.name, "li");
                assert!(f.has_class("byName"));
                assert_eq!(f.text(), "JOHN");
            }
            other => panic!("unexpected sibling {other:?}"),
        }
    }
}
