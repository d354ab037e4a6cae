//! Byline recognition.
//!
//! Bylines are the least regular part of a news page. The markup shapes we
//! know about are rules, tried in this order:
//!
//! 1. [`ByNameListRule`]: `li.byName` items carrying author topic links,
//!    optionally followed by an organization or location suffix
//! 2. [`ConjoinedNamesRule`]: `By <li>NAME</li> and <li>NAME</li>`
//! 3. [`CitedNameRule`]: `By NAME [in LOCATION] | CITE`
//! 4. [`PlainTextRule`]: plain `By NAME` text lines
//!
//! Anything else keeps its flattened text as [`Byline::Text`].

use super::rules::{Fragment, Rule, RuleEngine, RuleOutcome, Sibling, flatten_text};
use crate::models::{Author, Byline, Credit};
use crate::utils::collapse_whitespace;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

const TOPIC_ID_ATTR: &str = "data-dj-author-topicserviceid";

static BY_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^by\b\s*(?P<rest>.*)$").unwrap());
static CONNECTIVE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(?:by|and|&|,|,\s*and|by\s+and)$").unwrap());
static SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:,\s*(?P<org>.+?)|(?:in|from)\s+(?P<loc>.+?))\s*(?:,?\s*and|,|&)?$").unwrap()
});
static NAME_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*(?:,\s*and\s+|\s+and\s+|,\s*|&)\s*").unwrap());
static IN_LOCATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(?P<names>.+?)\s+in\s+(?P<loc>.+)$").unwrap());

/// Engine with the byline rules in their canonical order.
pub fn byline_engine() -> RuleEngine<Byline> {
    RuleEngine::new(flattened)
        .with_rule(ByNameListRule)
        .with_rule(ConjoinedNamesRule)
        .with_rule(CitedNameRule)
        .with_rule(PlainTextRule)
}

/// Structure a byline; `None` when the sequence holds no text at all.
pub fn parse_byline(engine: &RuleEngine<Byline>, siblings: &[Sibling], parent: Option<&Fragment>) -> Option<Byline> {
    if flatten_text(siblings).is_empty() {
        return None;
    }
    let applied = engine.apply(siblings, parent);
    match applied.rule {
        Some(rule) => debug!(rule, "Byline structured"),
        None => warn!(text = %flatten_text(siblings), "Byline matched no rule; keeping text"),
    }
    Some(applied.value)
}

fn flattened(siblings: &[Sibling]) -> Byline {
    Byline::Text(flatten_text(siblings))
}

/// A sibling as the byline rules see it.
#[derive(Debug)]
enum Token<'a> {
    Text(String),
    Name(&'a Fragment),
    Cite(&'a Fragment),
    Other(&'a Fragment),
}

/// Drops comments and whitespace; collapses text.
fn tokenize(siblings: &[Sibling]) -> Vec<Token<'_>> {
    siblings
        .iter()
        .filter_map(|s| match s {
            Sibling::Text(t) => {
                let t = collapse_whitespace(t);
                (!t.is_empty()).then_some(Token::Text(t))
            }
            Sibling::Element(f) => Some(match f.name.as_str() {
                "li" | "a" | "span" | "strong" | "b" | "em" => Token::Name(f),
                "cite" => Token::Cite(f),
                _ => Token::Other(f),
            }),
            Sibling::Comment(_) => None,
        })
        .collect()
}

fn split_names(names: &str) -> Vec<Author> {
    NAME_SEPARATOR
        .split(names.trim())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(Author::named)
        .collect()
}

/// Apply an organization/location suffix to `author`; `false` if `text`
/// is not a suffix.
fn apply_suffix(author: &mut Author, text: &str) -> bool {
    let Some(caps) = SUFFIX.captures(text) else {
        return false;
    };
    if let Some(org) = caps.name("org") {
        author.organization = Some(org.as_str().to_string());
    }
    if let Some(loc) = caps.name("loc") {
        author.location = Some(loc.as_str().to_string());
    }
    true
}

/// `li.byName` items with topic-linked author names.
#[derive(Debug, Clone, Copy)]
pub struct ByNameListRule;

impl ByNameListRule {
    fn author(item: &Fragment) -> Option<Author> {
        if item
            .attrs
            .iter()
            .any(|(k, _)| k != "class" && k != TOPIC_ID_ATTR)
        {
            return None;
        }
        let mut author = Author {
            topic_id: item.attr(TOPIC_ID_ATTR).map(str::to_string),
            ..Default::default()
        };
        for child in item.significant_children() {
            match child {
                Sibling::Element(a) if a.name == "a" => {
                    author.url = Some(a.attr("href")?.to_string());
                    author.name = a.text();
                }
                Sibling::Text(t) => {
                    let t = collapse_whitespace(t);
                    if CONNECTIVE.is_match(&t) {
                        continue;
                    }
                    if author.name.is_empty() {
                        author.name = BY_PREFIX
                            .captures(&t)
                            .map_or(t.clone(), |c| c["rest"].to_string());
                    } else if !apply_suffix(&mut author, &t) {
                        return None;
                    }
                }
                Sibling::Comment(_) => {}
                Sibling::Element(_) => return None,
            }
        }
        (!author.name.is_empty()).then_some(author)
    }
}

impl Rule<Byline> for ByNameListRule {
    fn name(&self) -> &'static str {
        "by_name_list"
    }

    fn try_parse(&self, siblings: &[Sibling], _parent: Option<&Fragment>) -> RuleOutcome<Byline> {
        let tokens = tokenize(siblings);
        let is_by_name = |t: &Token<'_>| matches!(t, Token::Name(f) if f.name == "li" && f.has_class("byName"));
        if !tokens.iter().any(is_by_name) {
            return RuleOutcome::NoMatch;
        }

        let mut credits: Vec<Credit> = Vec::new();
        for token in &tokens {
            match token {
                Token::Name(f) if f.name == "li" && f.has_class("byName") => match Self::author(f) {
                    Some(author) => credits.push(Credit::single(author)),
                    None => return RuleOutcome::NoMatch,
                },
                Token::Text(t) if CONNECTIVE.is_match(t) => {}
                Token::Text(t) => {
                    let Some(last) = credits.last_mut().and_then(|c| c.author.last_mut()) else {
                        return RuleOutcome::NoMatch;
                    };
                    if !apply_suffix(last, t) {
                        return RuleOutcome::NoMatch;
                    }
                }
                Token::Cite(f) => match credits.last_mut() {
                    Some(last) => last.cite = Some(f.text()),
                    None => return RuleOutcome::NoMatch,
                },
                Token::Name(_) | Token::Other(_) => return RuleOutcome::NoMatch,
            }
        }
        RuleOutcome::Matched(Byline::Credits(credits))
    }
}

/// `By NAME and NAME`, names in their own elements.
#[derive(Debug, Clone, Copy)]
pub struct ConjoinedNamesRule;

static JOINER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:in\s+(?P<loc>.+?))?\s*(?:,\s*and|,|and|&)?$").unwrap());

impl Rule<Byline> for ConjoinedNamesRule {
    fn name(&self) -> &'static str {
        "conjoined_names"
    }

    fn try_parse(&self, siblings: &[Sibling], _parent: Option<&Fragment>) -> RuleOutcome<Byline> {
        let tokens = tokenize(siblings);
        let mut credits: Vec<Credit> = Vec::new();

        for (i, token) in tokens.iter().enumerate() {
            match token {
                Token::Text(t) if i == 0 => {
                    let Some(caps) = BY_PREFIX.captures(t) else {
                        return RuleOutcome::NoMatch;
                    };
                    if !caps["rest"].is_empty() {
                        return RuleOutcome::NoMatch;
                    }
                }
                Token::Name(f) => {
                    let name = f.text();
                    if name.is_empty() {
                        return RuleOutcome::NoMatch;
                    }
                    credits.push(Credit::single(Author::named(name)));
                }
                Token::Text(t) => {
                    let Some(caps) = JOINER.captures(t) else {
                        return RuleOutcome::NoMatch;
                    };
                    if let Some(loc) = caps.name("loc") {
                        match credits.last_mut().and_then(|c| c.author.last_mut()) {
                            Some(author) => author.location = Some(loc.as_str().to_string()),
                            None => return RuleOutcome::NoMatch,
                        }
                    }
                }
                Token::Cite(_) | Token::Other(_) => return RuleOutcome::NoMatch,
            }
        }

        if credits.is_empty() {
            RuleOutcome::NoMatch
        } else {
            RuleOutcome::Matched(Byline::Credits(credits))
        }
    }
}

/// `By NAME [in LOCATION] | CITE`, with the cite inline or in a `cite`.
#[derive(Debug, Clone, Copy)]
pub struct CitedNameRule;

impl Rule<Byline> for CitedNameRule {
    fn name(&self) -> &'static str {
        "cited_name"
    }

    fn try_parse(&self, siblings: &[Sibling], _parent: Option<&Fragment>) -> RuleOutcome<Byline> {
        let tokens = tokenize(siblings);
        let Some(Token::Text(first)) = tokens.first() else {
            return RuleOutcome::NoMatch;
        };
        let Some(caps) = BY_PREFIX.captures(first) else {
            return RuleOutcome::NoMatch;
        };
        let rest = caps["rest"].to_string();
        let (names_part, mut cite) = match rest.split_once('|') {
            Some((names, cite)) => (names.trim().to_string(), Some(cite.trim().to_string())),
            None => (rest.trim().to_string(), None),
        };

        for token in &tokens[1..] {
            match token {
                Token::Cite(f) if cite.is_none() => cite = Some(f.text()),
                Token::Text(t) if cite.is_none() && t.starts_with('|') => {
                    cite = Some(t.trim_start_matches('|').trim().to_string());
                }
                _ => return RuleOutcome::NoMatch,
            }
        }
        let Some(cite) = cite.filter(|c| !c.is_empty()) else {
            return RuleOutcome::NoMatch;
        };

        let (names, location) = match IN_LOCATION.captures(&names_part) {
            Some(c) => (c["names"].to_string(), Some(c["loc"].to_string())),
            None => (names_part, None),
        };
        let mut authors = split_names(&names);
        if authors.is_empty() {
            return RuleOutcome::NoMatch;
        }
        for author in &mut authors {
            author.location = location.clone();
        }
        RuleOutcome::Matched(Byline::Credits(vec![Credit {
            author: authors,
            cite: Some(cite),
        }]))
    }
}

/// Text-only bylines: every line is `By NAME[, NAME and NAME]` or a joiner.
#[derive(Debug, Clone, Copy)]
pub struct PlainTextRule;

impl Rule<Byline> for PlainTextRule {
    fn name(&self) -> &'static str {
        "plain_text"
    }

    fn try_parse(&self, siblings: &[Sibling], _parent: Option<&Fragment>) -> RuleOutcome<Byline> {
        let mut credits = Vec::new();
        for sibling in siblings {
            let text = match sibling {
                Sibling::Text(t) => t,
                Sibling::Comment(_) => continue,
                Sibling::Element(_) => return RuleOutcome::NoMatch,
            };
            for line in text.lines().map(collapse_whitespace).filter(|l| !l.is_empty()) {
                if CONNECTIVE.is_match(&line) {
                    continue;
                }
                let Some(caps) = BY_PREFIX.captures(&line) else {
                    return RuleOutcome::NoMatch;
                };
                credits.extend(split_names(&caps["rest"]).into_iter().map(Credit::single));
            }
        }
        if credits.is_empty() {
            RuleOutcome::NoMatch
        } else {
            RuleOutcome::Matched(Byline::Credits(credits))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(t: &str) -> Sibling {
        Sibling::text(t)
    }

    fn li(name: &str) -> Sibling {
        Sibling::element(Fragment::new("li").with_text(name))
    }

    fn names(byline: &Byline) -> Vec<Vec<String>> {
        match byline {
            Byline::Credits(credits) => credits
                .iter()
                .map(|c| c.author.iter().map(|a| a.name.clone()).collect())
                .collect(),
            Byline::Text(t) => panic!("unstructured byline {t:?}"),
        }
    }

    #[test]
    fn test_conjoined_names() {
        let engine = byline_engine();
        let siblings = vec![text("By "), li("JOHN SMITH"), text(" and "), li("JANE DOE")];
        let applied = engine.apply(&siblings, None);
        assert_eq!(applied.rule, Some("conjoined_names"));
        assert_eq!(
            applied.value,
            Byline::Credits(vec![
                Credit::single(Author::named("JOHN SMITH")),
                Credit::single(Author::named("JANE DOE")),
            ])
        );
    }

    #[test]
    fn test_empty_sequence_has_no_byline() {
        let engine = byline_engine();
        assert_eq!(parse_byline(&engine, &[], None), None);
        assert_eq!(parse_byline(&engine, &[text("  \n ")], None), None);
    }

    #[test]
    fn test_by_name_list_with_topic_links() {
        let item = |id: &str, name: &str, href: &str| {
            Sibling::element(
                Fragment::new("li")
                    .with_attr("class", "byName")
                    .with_attr(TOPIC_ID_ATTR, id)
                    .with_text("By ")
                    .with_child(Sibling::element(Fragment::new("a").with_attr("href", href).with_text(name))),
            )
        };
        let siblings = vec![
            item("1", "Jane Doe", "http://topics.wsj.com/person/D/jane-doe/1"),
            text(" and "),
            item("2", "John Roe", "http://topics.wsj.com/person/R/john-roe/2"),
            text("in London"),
        ];
        let applied = byline_engine().apply(&siblings, None);
        assert_eq!(applied.rule, Some("by_name_list"));
        let Byline::Credits(credits) = applied.value else {
            panic!("expected credits");
        };
        assert_eq!(credits.len(), 2);
        assert_eq!(credits[0].author[0].name, "Jane Doe");
        assert_eq!(credits[0].author[0].topic_id.as_deref(), Some("1"));
        assert_eq!(
            credits[1].author[0].url.as_deref(),
            Some("http://topics.wsj.com/person/R/john-roe/2")
        );
        assert_eq!(credits[1].author[0].location.as_deref(), Some("London"));
    }

    #[test]
    fn test_by_name_with_organization_suffix() {
        let siblings = vec![
            Sibling::element(Fragment::new("li").with_attr("class", "byName").with_text("By Jane Doe")),
            text(", Dow Jones Newswires"),
        ];
        let Byline::Credits(credits) = byline_engine().apply(&siblings, None).value else {
            panic!("expected credits");
        };
        assert_eq!(credits[0].author[0].name, "Jane Doe");
        assert_eq!(
            credits[0].author[0].organization.as_deref(),
            Some("Dow Jones Newswires")
        );
    }

    #[test]
    fn test_cited_name_with_pipe() {
        let siblings = vec![text("By Jane Doe and John Roe in Tokyo | Associated Press")];
        let applied = byline_engine().apply(&siblings, None);
        assert_eq!(applied.rule, Some("cited_name"));
        let Byline::Credits(credits) = applied.value else {
            panic!("expected credits");
        };
        assert_eq!(credits.len(), 1);
        assert_eq!(credits[0].cite.as_deref(), Some("Associated Press"));
        assert_eq!(names(&Byline::Credits(credits.clone())), vec![vec!["Jane Doe", "John Roe"]]);
        assert!(credits[0].author.iter().all(|a| a.location.as_deref() == Some("Tokyo")));
    }

    #[test]
    fn test_cited_name_with_cite_element() {
        let siblings = vec![
            text("By Jane Doe "),
            Sibling::element(Fragment::new("cite").with_text("Reuters")),
        ];
        let applied = byline_engine().apply(&siblings, None);
        assert_eq!(applied.rule, Some("cited_name"));
        let Byline::Credits(credits) = applied.value else {
            panic!("expected credits");
        };
        assert_eq!(credits[0].cite.as_deref(), Some("Reuters"));
    }

    #[test]
    fn test_plain_text_lines() {
        let siblings = vec![text("\n  By Jane Doe, John Roe\n  and\n  By Max Poe\n")];
        let applied = byline_engine().apply(&siblings, None);
        assert_eq!(applied.rule, Some("plain_text"));
        assert_eq!(
            names(&applied.value),
            vec![vec!["Jane Doe"], vec!["John Roe"], vec!["Max Poe"]]
        );
    }

    #[test]
    fn test_unrecognized_shape_keeps_text() {
        let engine = byline_engine();
        let siblings = vec![
            text("Reporting by "),
            Sibling::element(Fragment::new("div").with_text("Staff")),
        ];
        assert_eq!(
            parse_byline(&engine, &siblings, None),
            Some(Byline::Text("Reporting by Staff".to_string()))
        );
    }
}
