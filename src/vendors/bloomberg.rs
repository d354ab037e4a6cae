//! Bloomberg News.
//!
//! No session is needed. Story pages come in two header layouts
//! (`#story_meta` and the Businessweek `.bview_story_meta`); the story body
//! is a flat run of paragraphs split into sections by `h2` headings.

use super::{Vendor, within_domain};
use crate::error::ParseError;
use crate::models::{Article, ArticleRef, Author, Block, Byline, Credit, DailyIndex, Heading, Inline};
use crate::parser::paragraph::{ParagraphParser, emails};
use crate::parser::rules::Fragment;
use crate::parser::{DocumentParser, Pattern, element_text, parse_document};
use crate::version::ProcessorVersion;
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Node};
use tracing::{debug, instrument};
use url::Url;

pub const NAME: &str = "bloomberg";
pub const WEBSITE_VERSION: &str = "20130901";
pub const PROCESSOR_VERSION: &str = "20130901";
pub const PROCESSOR_PATCH: u32 = 0;

const SITE: &str = "http://www.bloomberg.com/";

static STORIES: Lazy<Pattern> = Lazy::new(|| Pattern::new("body #content .stories"));
static STORY_ITEM: Lazy<Pattern> = Lazy::new(|| Pattern::new("li"));
static ANCHOR: Lazy<Pattern> = Lazy::new(|| Pattern::new("a"));

static PRIMARY_CONTENT: Lazy<Pattern> = Lazy::new(|| Pattern::new("#content #primary_content"));
static STORY_HEAD: Lazy<Pattern> = Lazy::new(|| Pattern::new("#story_head"));
static HEADLINE: Lazy<Pattern> = Lazy::new(|| Pattern::new("h1"));
static STORY_META: Lazy<Pattern> = Lazy::new(|| Pattern::new("#story_meta"));
static BVIEW_META: Lazy<Pattern> = Lazy::new(|| Pattern::new(".bview_story_meta"));
static BYLINE: Lazy<Pattern> = Lazy::new(|| Pattern::new(".byline"));
static AUTHOR: Lazy<Pattern> = Lazy::new(|| Pattern::new(".author"));
static SPAN: Lazy<Pattern> = Lazy::new(|| Pattern::new("span"));
static DATESTAMP: Lazy<Pattern> = Lazy::new(|| Pattern::new(".datestamp"));
static STORY_CONTENT: Lazy<Pattern> = Lazy::new(|| Pattern::new("#story_content"));
static STORY_DISPLAY: Lazy<Pattern> = Lazy::new(|| Pattern::new("#story_display"));

/// Bloomberg links: tickers, topic pages, site searches, mail, the rest.
fn classify_link(link: &Fragment, href: &str) -> Inline {
    if link.has_class("web_ticker") {
        let symbol = link
            .attr("ticker")
            .map(str::to_string)
            .or_else(|| href.strip_prefix("/quote/").map(str::to_string));
        if let Some(symbol) = symbol {
            return Inline::Ticker { symbol };
        }
    }
    if let Some(address) = href.strip_prefix("mailto:") {
        return Inline::Email {
            address: address.to_string(),
        };
    }
    if let Ok(url) = Url::parse(href) {
        match url.host_str() {
            Some("topics.bloomberg.com") => {
                return Inline::Topic {
                    path: url.path().trim_matches('/').to_string(),
                };
            }
            Some("search.bloomberg.com") if url.path().starts_with("/search") => {
                if let Some((_, query)) = url.query_pairs().find(|(k, _)| k == "q") {
                    return Inline::Search {
                        query: query.into_owned(),
                    };
                }
            }
            _ => {}
        }
    }
    Inline::Link {
        href: href.to_string(),
    }
}

/// `span` children without a class, or with class `last`, hold author names.
fn name_spans<'a>(parser: &DocumentParser, scope: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    parser
        .select_all(scope, &SPAN)
        .into_iter()
        .filter(|span| matches!(span.value().attr("class"), None | Some("last")))
        .collect()
}

/// Related-story boxes and embeds inside the story body.
fn is_sidebar(element: &scraper::node::Element) -> bool {
    element
        .classes()
        .any(|c| c.starts_with("related") || c.contains("embed") || c.starts_with("inline"))
}

#[derive(Debug)]
pub struct Bloomberg {
    version: ProcessorVersion,
    paragraphs: ParagraphParser,
}

impl Default for Bloomberg {
    fn default() -> Self {
        Self::new()
    }
}

impl Bloomberg {
    pub fn new() -> Self {
        Self::with_version(ProcessorVersion::new(PROCESSOR_VERSION, PROCESSOR_PATCH))
    }

    pub fn with_version(version: ProcessorVersion) -> Self {
        Self {
            version,
            paragraphs: ParagraphParser::new(classify_link),
        }
    }

    fn parse_story_head(
        &self,
        parser: &mut DocumentParser,
        head: ElementRef<'_>,
        article: &mut Article,
    ) -> Result<(), ParseError> {
        let h1 = parser.select_required(head, &HEADLINE)?;
        article.headline = element_text(h1);
        parser.consume_element(h1);

        let mut names = Vec::new();
        let (meta, context) = match parser.select_exactly_one(head, &STORY_META, true)? {
            Some(meta) => {
                let byline = parser.select_required(meta, &BYLINE)?;
                names.extend(name_spans(parser, byline).into_iter().map(element_text));
                parser.consume_element(byline);
                (meta, "#story_meta")
            }
            None => {
                let meta = parser.select_required(head, &BVIEW_META)?;
                for author in parser.select_all(meta, &AUTHOR) {
                    names.push(element_text(author));
                    parser.consume_element(author);
                }
                for span in name_spans(parser, meta) {
                    names.push(element_text(span));
                    parser.consume_element(span);
                }
                for byline in parser.select_all(meta, &BYLINE) {
                    parser.consume_element(byline);
                }
                (meta, ".bview_story_meta")
            }
        };
        names.retain(|name| !name.is_empty());
        if !names.is_empty() {
            article.byline = Some(Byline::Credits(
                names
                    .into_iter()
                    .map(|name| Credit::single(Author::named(name)))
                    .collect(),
            ));
        }

        if let Some(stamp) = parser.select_exactly_one(meta, &DATESTAMP, true)? {
            let epoch = stamp
                .value()
                .attr("epoch")
                .ok_or_else(|| ParseError::structural(".datestamp", "missing epoch"))?;
            let millis: i64 = epoch
                .trim()
                .parse()
                .map_err(|_| ParseError::structural(".datestamp", format!("bad epoch {epoch:?}")))?;
            article.metadata.published_at = DateTime::from_timestamp_millis(millis);
            parser.consume_element(stamp);
        }
        parser.finish(meta, context)?;
        parser.finish(head, "#story_head")
    }

    fn parse_story_display(
        &self,
        parser: &mut DocumentParser,
        display: ElementRef<'_>,
        article: &mut Article,
    ) -> Result<(), ParseError> {
        for child in parser.remaining_children(display) {
            let Node::Element(e) = child.value() else {
                continue;
            };
            let Some(element) = ElementRef::wrap(child) else {
                continue;
            };
            let class = e.attr("class");
            match e.name() {
                "script" => parser.consume(child),
                "div" if is_sidebar(e) => parser.consume(child),
                "p" if matches!(class, Some("decoration-top" | "decoration")) => parser.consume(child),
                "p" | "pre" => {
                    if let Some(block) = self.paragraphs.parse_block(&parser.fragment(element))? {
                        article.body.push(block);
                    }
                    parser.consume(child);
                }
                "h2" => {
                    article.body.push(Block::Heading(Heading {
                        level: 2,
                        text: element_text(element),
                        entities: Vec::new(),
                    }));
                    parser.consume(child);
                }
                _ if class == Some("decoration-bottom") => parser.consume(child),
                _ => {}
            }
        }
        parser.finish(display, "#story_display")
    }
}

impl Vendor for Bloomberg {
    fn name(&self) -> &'static str {
        NAME
    }

    fn website_version(&self) -> &str {
        WEBSITE_VERSION
    }

    fn processor_version(&self) -> &ProcessorVersion {
        &self.version
    }

    fn timezone(&self) -> Tz {
        chrono_tz::America::New_York
    }

    fn daily_index_url(&self, date: NaiveDate) -> String {
        format!("{SITE}archive/news/{}/", date.format("%Y-%m-%d"))
    }

    #[instrument(level = "debug", skip_all, fields(%date))]
    fn parse_daily_index(&self, content: &str, date: NaiveDate) -> Result<DailyIndex, ParseError> {
        let doc = parse_document(content);
        let site = Url::parse(SITE).map_err(|e| ParseError::structural("daily index", e.to_string()))?;
        let mut articles = Vec::new();

        if let Some(stories) = doc.select(&STORIES.selector).next() {
            for item in stories.select(&STORY_ITEM.selector) {
                let a = item
                    .select(&ANCHOR.selector)
                    .next()
                    .ok_or_else(|| ParseError::structural(".stories li", "entry without link"))?;
                let href = a
                    .value()
                    .attr("href")
                    .ok_or_else(|| ParseError::structural(".stories li a", "link without href"))?;
                let url = site
                    .join(href)
                    .map_err(|e| ParseError::structural(".stories li a", format!("{href}: {e}")))?;
                articles.push(ArticleRef {
                    url: url.to_string(),
                    title: element_text(a),
                    summary: None,
                    published_at: None,
                });
            }
        }

        debug!(count = articles.len(), "Parsed daily index");
        Ok(DailyIndex { date, articles })
    }

    #[instrument(level = "debug", skip(self, content), fields(%url))]
    fn parse_article(&self, url: &str, content: &str) -> Result<Article, ParseError> {
        let doc = parse_document(content);
        let mut parser = DocumentParser::new();
        let mut article = Article {
            url: url.to_string(),
            ..Default::default()
        };

        let primary = parser.select_required(doc.root_element(), &PRIMARY_CONTENT)?;
        let head = parser.select_required(primary, &STORY_HEAD)?;
        self.parse_story_head(&mut parser, head, &mut article)?;

        let content = parser.select_required(primary, &STORY_CONTENT)?;
        let display = parser.select_required(content, &STORY_DISPLAY)?;
        self.parse_story_display(&mut parser, display, &mut article)?;
        parser.finish(content, "#story_content")?;
        parser.finish(primary, "#primary_content")?;

        article.emails = emails(&article.body);
        Ok(article)
    }

    fn allows_redirect(&self, target: &Url) -> bool {
        within_domain(target, "bloomberg.com")
    }
}
