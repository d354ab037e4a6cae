//! The Wall Street Journal.
//!
//! Archive pages list the day's articles; article pages need a logged-in
//! session, carried by the `djcs_*` cookies the site hands out while
//! redirecting through its login endpoints.
//!
//! Article pages have two parts, both optional:
//! - `.articleHeadlineBox`: section links, date stamp, `<!-- key:value -->`
//!   property comments, the headline, subhead and columnist byline
//! - `#article_story_body .articlePage`: the body, bracketed by the
//!   `article start` / `article end` comments
//!
//! Every node inside those containers must be recognized; see
//! [`DocumentParser`].

use super::{Vendor, within_domain};
use crate::cookies::CookiePolicy;
use crate::error::ParseError;
use crate::models::{
    Article, ArticleMetadata, ArticleRef, Block, Byline, DailyIndex, Heading, Inline, Property, SectionRef,
    SymbolCode,
};
use crate::parser::byline::{byline_engine, parse_byline};
use crate::parser::paragraph::{ParagraphParser, emails};
use crate::parser::rules::{Fragment, RuleEngine};
use crate::parser::{DocumentParser, Pattern, element_shell, element_text, parse_document};
use crate::utils::{collapse_whitespace, month_number};
use crate::version::ProcessorVersion;
use chrono::{Datelike, NaiveDate};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Node};
use tracing::{debug, instrument};
use url::Url;

pub const NAME: &str = "wsj";
pub const WEBSITE_VERSION: &str = "20130825";
pub const PROCESSOR_VERSION: &str = "20130825";
pub const PROCESSOR_PATCH: u32 = 0;

static ARCHIVE_ITEM: Lazy<Pattern> = Lazy::new(|| Pattern::new("#archivedArticles ul.newsItem li"));
static ANCHOR: Lazy<Pattern> = Lazy::new(|| Pattern::new("a"));
static SUMMARY: Lazy<Pattern> = Lazy::new(|| Pattern::new("p"));

static HEADLINE_BOX: Lazy<Pattern> = Lazy::new(|| Pattern::new(".articleHeadlineBox"));
static METADATA: Lazy<Pattern> = Lazy::new(|| Pattern::new(".cMetadata"));
static ARTICLE_SECTION: Lazy<Pattern> = Lazy::new(|| Pattern::new("li.articleSection"));
static DATE_STAMP: Lazy<Pattern> = Lazy::new(|| Pattern::new("li.dateStamp"));
static HEADLINE: Lazy<Pattern> = Lazy::new(|| Pattern::new("h1"));
static SUBHEAD: Lazy<Pattern> = Lazy::new(|| Pattern::new("h2.subhead"));
static OTHER_HEAD: Lazy<Pattern> = Lazy::new(|| Pattern::new("h5"));
static COLUMNIST: Lazy<Pattern> = Lazy::new(|| Pattern::new(".columnist"));
static COLUMNIST_BYLINE: Lazy<Pattern> = Lazy::new(|| Pattern::new(".columnistByline"));
static SOCIAL_BYLINE: Lazy<Pattern> = Lazy::new(|| Pattern::new(".socialByline"));
static PAGE_BYLINE: Lazy<Pattern> = Lazy::new(|| Pattern::new("ul.socialByline"));
static CONNECT: Lazy<Pattern> = Lazy::new(|| Pattern::new("li.connect"));
static ICON: Lazy<Pattern> = Lazy::new(|| Pattern::new(".icon"));

static STORY_BODY: Lazy<Pattern> = Lazy::new(|| Pattern::new("#article_story_body"));
static ARTICLE_PAGE: Lazy<Pattern> = Lazy::new(|| Pattern::new(".articlePage"));
static INSET: Lazy<Pattern> =
    Lazy::new(|| Pattern::new(".insetContent, .insetCol3wide, .insetCol6wide, .legacyInset"));

static QUOTE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/public/quotes/main\.html\?type=(?P<type>\w+)&symbol=(?P<symbol>[\w\.:-]+)$").unwrap()
});
static CODE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"CODE=(?P<codes>\S*) SYMBOL=(?P<symbol>\S*)").unwrap());
static PROPERTY_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?P<key>[^\s:]+):(?P<value>.*)$").unwrap());
static DATE_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<month>[A-Za-z]{3,9})\.?\s+(?P<day>\d{1,2}),\s*(?P<year>\d{4})").unwrap()
});

const ARTICLE_START: &str = "article start";
const ARTICLE_END: &str = "article end";

/// WSJ links: mail addresses, market data quotes, everything else.
fn classify_link(_link: &Fragment, href: &str) -> Inline {
    if let Some(address) = href.strip_prefix("mailto:") {
        return Inline::Email {
            address: address.to_string(),
        };
    }
    match QUOTE_LINK.captures(href) {
        Some(caps) => Inline::Symbol {
            r#type: caps["type"].to_string(),
            symbol: caps["symbol"].to_string(),
        },
        None => Inline::Link {
            href: href.to_string(),
        },
    }
}

/// Parse a date stamp such as `Aug. 25, 2013` or `Updated Sept. 3, 2013 7:05 p.m. ET`.
fn parse_date_stamp(text: &str) -> Result<NaiveDate, ParseError> {
    let invalid = || ParseError::structural("li.dateStamp", format!("unrecognized date {text:?}"));
    let caps = DATE_TEXT.captures(text).ok_or_else(invalid)?;
    let month = month_number(&caps["month"]).ok_or_else(invalid)?;
    let day = caps["day"].parse().map_err(|_| invalid())?;
    let year = caps["year"].parse().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

/// Apply one head comment to `metadata`; `true` if it was the start marker.
fn apply_head_comment(comment: &str, metadata: &mut ArticleMetadata) -> Result<bool, ParseError> {
    let mut start = false;
    for line in comment.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line == ARTICLE_START {
            start = true;
        } else if let Some(caps) = CODE_LINE.captures(line) {
            metadata.codes.push(SymbolCode {
                codes: caps["codes"].to_string(),
                symbol: caps["symbol"].to_string(),
            });
        } else if let Some(caps) = PROPERTY_LINE.captures(line) {
            metadata.properties.push(Property {
                key: caps["key"].to_string(),
                value: caps["value"].trim().to_string(),
            });
        } else {
            return Err(ParseError::structural(
                ".articleHeadlineBox comment",
                line.to_string(),
            ));
        }
    }
    Ok(start)
}

#[derive(Debug, Default)]
struct Markers {
    start: bool,
    end: bool,
}

#[derive(Debug)]
pub struct Wsj {
    version: ProcessorVersion,
    cookies: CookiePolicy,
    bylines: RuleEngine<Byline>,
    paragraphs: ParagraphParser,
}

impl Default for Wsj {
    fn default() -> Self {
        Self::new()
    }
}

impl Wsj {
    pub fn new() -> Self {
        Self::with_version(ProcessorVersion::new(PROCESSOR_VERSION, PROCESSOR_PATCH))
    }

    pub fn with_version(version: ProcessorVersion) -> Self {
        Self {
            version,
            cookies: CookiePolicy {
                recognized: vec!["djcs_auto", "djcs_perm", "djcs_session"],
                required: vec!["djcs_auto", "djcs_perm"],
            },
            bylines: byline_engine(),
            paragraphs: ParagraphParser::new(classify_link),
        }
    }

    fn byline(&self, parser: &mut DocumentParser, element: ElementRef<'_>) -> Option<Byline> {
        for connect in parser.select_all(element, &CONNECT) {
            parser.consume_element(connect);
        }
        let siblings = parser.siblings(element);
        let byline = parse_byline(&self.bylines, &siblings, Some(&element_shell(element)));
        parser.consume_element(element);
        byline
    }

    fn parse_metadata(
        &self,
        parser: &mut DocumentParser,
        metadata: ElementRef<'_>,
        out: &mut ArticleMetadata,
    ) -> Result<(), ParseError> {
        for li in parser.select_all(metadata, &ARTICLE_SECTION) {
            for child in parser.remaining_children(li) {
                match child.value() {
                    Node::Element(e) if e.name() == "a" => {
                        if let Some(a) = ElementRef::wrap(child) {
                            out.sections.push(SectionRef {
                                name: element_text(a),
                                url: e.attr("href").map(str::to_string),
                            });
                            parser.consume(child);
                        }
                    }
                    Node::Text(t) if !t.trim().is_empty() => {
                        out.sections.push(SectionRef {
                            name: collapse_whitespace(t),
                            url: None,
                        });
                        parser.consume(child);
                    }
                    _ => {}
                }
            }
            parser.finish(li, "li.articleSection")?;
        }
        for li in parser.select_all(metadata, &DATE_STAMP) {
            out.date_stamp = Some(parse_date_stamp(&element_text(li))?);
            parser.consume_element(li);
        }
        parser.finish(metadata, ".cMetadata")
    }

    fn parse_headline_box(
        &self,
        parser: &mut DocumentParser,
        head: ElementRef<'_>,
        article: &mut Article,
        markers: &mut Markers,
    ) -> Result<(), ParseError> {
        if let Some(metadata) = parser.select_exactly_one(head, &METADATA, true)? {
            self.parse_metadata(parser, metadata, &mut article.metadata)?;
        }

        for child in parser.remaining_children(head) {
            match child.value() {
                Node::Comment(c) => {
                    markers.start |= apply_head_comment(c, &mut article.metadata)?;
                    parser.consume(child);
                }
                Node::Element(e) if e.name() == "a" => {
                    if let Some(name) = e.attr("name") {
                        article.metadata.anchors.push(name.to_string());
                        parser.consume(child);
                    }
                }
                _ => {}
            }
        }

        if let Some(h1) = parser.select_exactly_one(head, &HEADLINE, true)? {
            article.headline = element_text(h1);
            parser.consume_element(h1);
        }
        if let Some(h2) = parser.select_exactly_one(head, &SUBHEAD, true)? {
            article.subhead = Some(element_text(h2));
            parser.consume_element(h2);
        }
        for h5 in parser.select_all(head, &OTHER_HEAD) {
            article.other_heads.push(Heading {
                level: 5,
                text: element_text(h5),
                entities: Vec::new(),
            });
            parser.consume_element(h5);
        }

        for columnist in parser.select_all(head, &COLUMNIST) {
            for columnist_byline in parser.select_all(columnist, &COLUMNIST_BYLINE) {
                for social in parser.select_all(columnist_byline, &SOCIAL_BYLINE) {
                    if let Some(byline) = self.byline(parser, social) {
                        article.byline = Some(byline);
                    }
                }
                parser.finish(columnist_byline, ".columnistByline")?;
            }
            for icon in parser.select_all(columnist, &ICON) {
                parser.consume_element(icon);
            }
            for child in parser.remaining_children(columnist) {
                if matches!(child.value(), Node::Text(t) if t.trim() == "-") {
                    parser.consume(child);
                }
            }
            parser.finish(columnist, ".columnist")?;
        }

        parser.finish(head, ".articleHeadlineBox")
    }

    fn parse_page(
        &self,
        parser: &mut DocumentParser,
        page: ElementRef<'_>,
        article: &mut Article,
        markers: &mut Markers,
    ) -> Result<(), ParseError> {
        for inset in parser.select_all(page, &INSET) {
            parser.consume_element(inset);
        }
        // Bylines nested inside other blocks; direct children keep their place in the body below.
        for social in parser.select_all(page, &PAGE_BYLINE) {
            if social.parent().map(|p| p.id()) != Some(page.id()) {
                if let Some(byline) = self.byline(parser, social) {
                    article.byline = Some(byline);
                }
            }
        }

        for child in parser.remaining_children(page) {
            match child.value() {
                Node::Element(e) => {
                    let Some(element) = ElementRef::wrap(child) else {
                        continue;
                    };
                    match e.name() {
                        "ul" if e.classes().any(|c| c == "socialByline") => {
                            if let Some(byline) = self.byline(parser, element) {
                                article.byline = Some(byline.clone());
                                article.body.push(Block::Byline { byline });
                            }
                        }
                        "p" | "h4" | "h5" | "h6" | "ul" | "a" | "blockquote" => {
                            if let Some(block) = self.paragraphs.parse_block(&parser.fragment(element))? {
                                article.body.push(block);
                            }
                            parser.consume(child);
                        }
                        "cite" => {
                            article.cites.push(element_text(element));
                            parser.consume(child);
                        }
                        _ => {}
                    }
                }
                Node::Comment(c) if c.trim() == ARTICLE_END => {
                    markers.end = true;
                    parser.consume(child);
                }
                _ => {}
            }
        }

        parser.finish(page, ".articlePage")
    }
}

impl Vendor for Wsj {
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
        format!(
            "http://online.wsj.com/public/page/archive-{}-{}-{}.html",
            date.year(),
            date.month(),
            date.day()
        )
    }

    #[instrument(level = "debug", skip_all, fields(%date))]
    fn parse_daily_index(&self, content: &str, date: NaiveDate) -> Result<DailyIndex, ParseError> {
        let base = Url::parse(&self.daily_index_url(date))
            .map_err(|e| ParseError::structural("daily index", e.to_string()))?;
        let doc = parse_document(content);
        let mut articles = Vec::new();

        for item in doc.select(&ARCHIVE_ITEM.selector) {
            let a = item
                .select(&ANCHOR.selector)
                .next()
                .ok_or_else(|| ParseError::structural("ul.newsItem li", "entry without link"))?;
            let href = a
                .value()
                .attr("href")
                .ok_or_else(|| ParseError::structural("ul.newsItem li a", "link without href"))?;
            let url = base
                .join(href)
                .map_err(|e| ParseError::structural("ul.newsItem li a", format!("{href}: {e}")))?;
            let summary = item
                .select(&SUMMARY.selector)
                .next()
                .map(element_text)
                .filter(|s| !s.is_empty());
            articles.push(ArticleRef {
                url: url.to_string(),
                title: element_text(a),
                summary,
                published_at: None,
            });
        }

        debug!(count = articles.len(), "Parsed daily index");
        Ok(DailyIndex { date, articles })
    }

    #[instrument(level = "debug", skip(self, content), fields(%url))]
    fn parse_article(&self, url: &str, content: &str) -> Result<Article, ParseError> {
        let doc = parse_document(content);
        let root = doc.root_element();
        let mut parser = DocumentParser::new();
        let mut markers = Markers::default();
        let mut article = Article {
            url: url.to_string(),
            ..Default::default()
        };

        let head = parser.select_exactly_one(root, &HEADLINE_BOX, true)?;
        if let Some(head) = head {
            self.parse_headline_box(&mut parser, head, &mut article, &mut markers)?;
        }

        let body = parser.select_exactly_one(root, &STORY_BODY, true)?;
        if let Some(body) = body {
            for page in parser.select_all(body, &ARTICLE_PAGE) {
                self.parse_page(&mut parser, page, &mut article, &mut markers)?;
            }
            parser.finish(body, "#article_story_body")?;
        }

        match (head, body) {
            (None, None) => article.empty_page = true,
            _ if markers.start && markers.end => {}
            _ => {
                return Err(ParseError::structural(
                    "article",
                    format!(
                        "improper article start/end markers: start({}), end({})",
                        markers.start, markers.end
                    ),
                ));
            }
        }

        article.emails = emails(&article.body);
        Ok(article)
    }

    fn cookie_policy(&self) -> Option<&CookiePolicy> {
        Some(&self.cookies)
    }

    fn allows_redirect(&self, target: &Url) -> bool {
        within_domain(target, "wsj.com")
    }
}
