//! Recursive descent over paragraph-like elements.
//!
//! Every child of a paragraph is either turned into text, an [`Inline`]
//! entity, a nested paragraph or a citation, or it is an error. There is no
//! catch-all that drops unknown markup.

use super::rules::{Fragment, Sibling};
use crate::error::ParseError;
use crate::models::{Block, Heading, Inline, Paragraph};
use crate::utils::{collapse_whitespace, truncate_for_log};

/// Vendor hook deciding what entity a link with `href` stands for.
pub type LinkClassifier = fn(link: &Fragment, href: &str) -> Inline;

/// Links every vendor understands: `mailto:` becomes [`Inline::Email`],
/// anything else [`Inline::Link`].
pub fn basic_link(_link: &Fragment, href: &str) -> Inline {
    match href.strip_prefix("mailto:") {
        Some(address) => Inline::Email {
            address: address.to_string(),
        },
        None => Inline::Link {
            href: href.to_string(),
        },
    }
}

/// Short rendering of a fragment for error messages.
pub fn describe_fragment(f: &Fragment) -> String {
    let attrs: String = f
        .attrs
        .iter()
        .map(|(k, v)| format!(" {k}=\"{v}\""))
        .collect();
    format!("<{}{}>{}", f.name, attrs, truncate_for_log(&f.text(), 80))
}

fn raw_text(siblings: &[Sibling], out: &mut String) {
    for sibling in siblings {
        match sibling {
            Sibling::Text(t) => out.push_str(t),
            Sibling::Element(f) if f.name == "br" => out.push('\n'),
            Sibling::Element(f) => raw_text(&f.children, out),
            Sibling::Comment(_) => {}
        }
    }
}

/// Collapse runs of spaces within lines; drop blank lines.
fn normalize(text: &str) -> String {
    text.split('\n')
        .map(collapse_whitespace)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Paragraph parser configured with a vendor's link rules.
#[derive(Debug, Clone, Copy)]
pub struct ParagraphParser {
    classify_link: LinkClassifier,
}

impl Default for ParagraphParser {
    fn default() -> Self {
        Self::new(basic_link)
    }
}

impl ParagraphParser {
    pub fn new(classify_link: LinkClassifier) -> Self {
        Self { classify_link }
    }

    /// Parse a body-level element into a [`Block`].
    ///
    /// Returns `Ok(None)` for elements that hold no content at all.
    pub fn parse_block(&self, f: &Fragment) -> Result<Option<Block>, ParseError> {
        let block = match f.name.as_str() {
            "p" => {
                let p = self.parse_paragraph(f)?;
                (!p.is_empty()).then_some(Block::Paragraph(p))
            }
            "blockquote" => Some(Block::Quote(self.parse_paragraph(f)?)),
            "ul" | "ol" => Some(self.parse_list(f)?),
            "pre" => {
                let mut text = String::new();
                raw_text(&f.children, &mut text);
                Some(Block::Preformatted { text })
            }
            "a" if f.attr("href").is_none() => match f.attr("name") {
                Some(name) => Some(Block::Anchor {
                    name: name.to_string(),
                }),
                None => return Err(ParseError::structural("a", describe_fragment(f))),
            },
            "a" => {
                let mut collector = Collector::new(self);
                collector.link(f)?;
                Some(Block::Paragraph(collector.finish()))
            }
            name => match heading_level(name) {
                Some(level) => {
                    let p = self.parse_paragraph(f)?;
                    (!p.text.is_empty()).then_some(Block::Heading(Heading {
                        level,
                        text: p.text,
                        entities: p.entities,
                    }))
                }
                None => return Err(ParseError::structural("block", describe_fragment(f))),
            },
        };
        Ok(block)
    }

    /// Parse the children of `f` as running text.
    pub fn parse_paragraph(&self, f: &Fragment) -> Result<Paragraph, ParseError> {
        let mut collector = Collector::new(self);
        collector.collect(&f.children, &f.name)?;
        Ok(collector.finish())
    }

    fn parse_list(&self, f: &Fragment) -> Result<Block, ParseError> {
        let mut items = Vec::new();
        for child in &f.children {
            match child {
                Sibling::Element(li) if li.name == "li" => {
                    let item = self.parse_paragraph(li)?;
                    if !item.is_empty() {
                        items.push(Block::Paragraph(item));
                    }
                }
                s if s.is_blank() => {}
                Sibling::Element(other) => {
                    return Err(ParseError::structural(&f.name, describe_fragment(other)));
                }
                Sibling::Text(t) => {
                    return Err(ParseError::structural(&f.name, format!("stray text {:?}", t.trim())));
                }
                Sibling::Comment(c) => {
                    return Err(ParseError::structural(&f.name, format!("<!--{}-->", c.trim())));
                }
            }
        }
        Ok(Block::List { items })
    }
}

fn heading_level(name: &str) -> Option<u8> {
    let level = name.strip_prefix('h')?.parse::<u8>().ok()?;
    (1..=6).contains(&level).then_some(level)
}

/// Accumulates one paragraph's text and entities.
struct Collector<'p> {
    parser: &'p ParagraphParser,
    text: String,
    paragraph: Paragraph,
}

impl<'p> Collector<'p> {
    fn new(parser: &'p ParagraphParser) -> Self {
        Self {
            parser,
            text: String::new(),
            paragraph: Paragraph::default(),
        }
    }

    fn collect(&mut self, siblings: &[Sibling], context: &str) -> Result<(), ParseError> {
        for sibling in siblings {
            match sibling {
                // source line breaks are plain whitespace; only <br> breaks lines
                Sibling::Text(t) => self.text.push_str(&t.replace('\n', " ")),
                Sibling::Comment(c) => {
                    return Err(ParseError::structural(context, format!("<!--{}-->", c.trim())));
                }
                Sibling::Element(f) => self.element(f, context)?,
            }
        }
        Ok(())
    }

    fn element(&mut self, f: &Fragment, context: &str) -> Result<(), ParseError> {
        match f.name.as_str() {
            "p" => {
                let child = self.parser.parse_paragraph(f)?;
                if !child.is_empty() {
                    self.paragraph.children.push(child);
                }
            }
            "strong" | "em" | "b" | "i" | "u" | "sup" | "sub" | "small" => self.collect(&f.children, &f.name)?,
            "br" => self.text.push('\n'),
            "a" => self.link(f)?,
            "cite" => {
                let cite = self.parser.parse_paragraph(f)?;
                if !cite.is_empty() {
                    self.paragraph.cites.push(cite);
                }
            }
            // stock quote widgets
            "span" if f.has_class("quo") || f.attr("data-widget").is_some() => {}
            "span" => self.collect(&f.children, "span")?,
            _ => return Err(ParseError::structural(context, describe_fragment(f))),
        }
        Ok(())
    }

    fn link(&mut self, f: &Fragment) -> Result<(), ParseError> {
        match (f.attr("href"), f.attr("name")) {
            (Some(href), _) => {
                let entity = (self.parser.classify_link)(f, href);
                self.paragraph.entities.push(entity);
            }
            (None, Some(name)) => self.paragraph.entities.push(Inline::Anchor {
                name: name.to_string(),
            }),
            (None, None) => return Err(ParseError::structural("a", describe_fragment(f))),
        }
        self.collect(&f.children, "a")
    }

    fn finish(mut self) -> Paragraph {
        self.paragraph.text = normalize(&self.text);
        self.paragraph
    }
}

/// Every `mailto:` address in `blocks`, depth first.
pub fn emails(blocks: &[Block]) -> Vec<String> {
    fn from_paragraph(p: &Paragraph, out: &mut Vec<String>) {
        for entity in &p.entities {
            if let Inline::Email { address } = entity {
                out.push(address.clone());
            }
        }
        for nested in p.children.iter().chain(&p.cites) {
            from_paragraph(nested, out);
        }
    }

    let mut out = Vec::new();
    for block in blocks {
        match block {
            Block::Paragraph(p) | Block::Quote(p) => from_paragraph(p, &mut out),
            Block::List { items } => out.extend(emails(items)),
            Block::Heading(h) => out.extend(h.entities.iter().filter_map(|e| match e {
                Inline::Email { address } => Some(address.clone()),
                _ => None,
            })),
            Block::Byline { .. } | Block::Anchor { .. } | Block::Preformatted { .. } => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{fragment_from_element, parse_document};
    use scraper::Selector;

    fn first(html: &str, css: &str) -> Fragment {
        let doc = parse_document(html);
        let sel = Selector::parse(css).unwrap();
        let el = doc.select(&sel).next().unwrap();
        fragment_from_element(el)
    }

    #[test]
    fn test_paragraph_with_entities() {
        let f = first(
            r#"<p>Shares of <a href="/public/quotes/main.html?type=usstock&symbol=AAPL">Apple</a>
               rose. Write to <a href="mailto:jane@wsj.com">Jane</a><br>at once.</p>"#,
            "p",
        );
        let p = ParagraphParser::default().parse_paragraph(&f).unwrap();
        assert_eq!(p.text, "Shares of Apple rose. Write to Jane\nat once.");
        assert_eq!(
            p.entities,
            vec![
                Inline::Link {
                    href: "/public/quotes/main.html?type=usstock&symbol=AAPL".to_string()
                },
                Inline::Email {
                    address: "jane@wsj.com".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_unknown_inline_element_fails() {
        let f = first("<p>text <img src=\"x.png\"> more</p>", "p");
        let err = ParagraphParser::default().parse_paragraph(&f).unwrap_err();
        match err {
            ParseError::Structural { context, detail } => {
                assert_eq!(context, "p");
                assert!(detail.starts_with("<img"), "{detail}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_comment_inside_paragraph_fails() {
        let f = first("<p>a<!-- b --></p>", "p");
        assert!(ParagraphParser::default().parse_paragraph(&f).is_err());
    }

    #[test]
    fn test_quote_widgets_are_skipped() {
        let f = first(
            r#"<p>Index <span class="quo">+1.2%</span><span data-widget="chart">x</span><strong>closed</strong> up.</p>"#,
            "p",
        );
        let p = ParagraphParser::default().parse_paragraph(&f).unwrap();
        assert_eq!(p.text, "Index closed up.");
    }

    #[test]
    fn test_nested_paragraph_and_cite() {
        let f = first(
            "<blockquote>Said: <p>inner</p><cite>Source</cite></blockquote>",
            "blockquote",
        );
        let block = ParagraphParser::default().parse_block(&f).unwrap().unwrap();
        let Block::Quote(p) = block else {
            panic!("expected quote, got {block:?}");
        };
        assert_eq!(p.text, "Said:");
        assert_eq!(p.children, vec![Paragraph::text("inner")]);
        assert_eq!(p.cites, vec![Paragraph::text("Source")]);
    }

    #[test]
    fn test_blocks() {
        let parser = ParagraphParser::default();
        let h = first("<h4> Markets <em>Today</em></h4>", "h4");
        assert_eq!(
            parser.parse_block(&h).unwrap(),
            Some(Block::Heading(Heading {
                level: 4,
                text: "Markets Today".to_string(),
                entities: Vec::new(),
            }))
        );

        let ul = first("<ul>\n<li>one</li>\n<li>two</li>\n</ul>", "ul");
        assert_eq!(
            parser.parse_block(&ul).unwrap(),
            Some(Block::List {
                items: vec![
                    Block::Paragraph(Paragraph::text("one")),
                    Block::Paragraph(Paragraph::text("two")),
                ]
            })
        );

        let anchor = first(r#"<div><a name="more"></a></div>"#, "a");
        assert_eq!(
            parser.parse_block(&anchor).unwrap(),
            Some(Block::Anchor {
                name: "more".to_string()
            })
        );

        let empty = first("<p>  </p>", "p");
        assert_eq!(parser.parse_block(&empty).unwrap(), None);

        let table = first("<table><tr><td>x</td></tr></table>", "table");
        assert!(parser.parse_block(&table).is_err());
    }

    #[test]
    fn test_list_rejects_stray_text() {
        let ul = first("<ul>oops<li>one</li></ul>", "ul");
        assert!(ParagraphParser::default().parse_block(&ul).is_err());
    }

    #[test]
    fn test_emails_walks_nested_blocks() {
        let blocks = vec![Block::List {
            items: vec![Block::Paragraph(Paragraph {
                entities: vec![Inline::Email {
                    address: "a@b.com".to_string(),
                }],
                ..Default::default()
            })],
        }];
        assert_eq!(emails(&blocks), vec!["a@b.com".to_string()]);
    }
}
