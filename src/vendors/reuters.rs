//! Reuters (US edition).
//!
//! The archive lists each story as a `.headlineMed` entry: a link followed by
//! the local publication time (`11:58pm EDT`). No session is needed.
//!
//! Story pages carry the headline, an `#articleInfo` box (byline, dateline
//! location, timestamp) and the body in `#articleText`, interleaved with empty
//! `midArticle_*` ad slots.

use super::{Vendor, within_domain};
use crate::error::ParseError;
use crate::models::{Article, ArticleRef, Byline, DailyIndex, Property};
use crate::parser::byline::{byline_engine, parse_byline};
use crate::parser::paragraph::{ParagraphParser, emails};
use crate::parser::rules::RuleEngine;
use crate::parser::{DocumentParser, Pattern, element_shell, element_text, parse_document};
use crate::utils::month_number;
use crate::version::ProcessorVersion;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Node};
use tracing::{debug, instrument};
use url::Url;

pub const NAME: &str = "reuters";
pub const WEBSITE_VERSION: &str = "20131001";
pub const PROCESSOR_VERSION: &str = "20131001";
pub const PROCESSOR_PATCH: u32 = 0;

const SITE: &str = "http://www.reuters.com/";
const ZONE: Tz = chrono_tz::America::New_York;

static HEADLINE_ENTRY: Lazy<Pattern> = Lazy::new(|| Pattern::new(".primaryContent .headlineMed"));
static ANCHOR: Lazy<Pattern> = Lazy::new(|| Pattern::new("a"));

static HEADLINE: Lazy<Pattern> = Lazy::new(|| Pattern::new("#content h1"));
static ARTICLE_INFO: Lazy<Pattern> = Lazy::new(|| Pattern::new("#articleInfo"));
static BYLINE: Lazy<Pattern> = Lazy::new(|| Pattern::new(".byline"));
static LOCATION: Lazy<Pattern> = Lazy::new(|| Pattern::new(".location"));
static TIMESTAMP: Lazy<Pattern> = Lazy::new(|| Pattern::new(".timestamp"));
static ARTICLE_TEXT: Lazy<Pattern> = Lazy::new(|| Pattern::new("#articleText"));
static FOCUS_PARAGRAPH: Lazy<Pattern> = Lazy::new(|| Pattern::new("p"));

static CLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<meridiem>[ap])\.?m\.?(?:\s+[a-z]{2,4})?$").unwrap()
});
static FULL_STAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<month>[A-Za-z]{3,9})\.?\s+(?P<day>\d{1,2}),\s*(?P<year>\d{4})\s+(?P<clock>\d{1,2}:\d{2}\s*[apAP]\.?[mM]\.?(?:\s+[A-Za-z]{2,4})?)\s*$").unwrap()
});

/// Parse a wall-clock time such as `11:58pm EDT`; the zone suffix is ignored.
fn parse_clock(text: &str) -> Option<NaiveTime> {
    let caps = CLOCK.captures(text.trim())?;
    let hour: u32 = caps["hour"].parse().ok()?;
    let minute: u32 = caps["minute"].parse().ok()?;
    if !(1..=12).contains(&hour) {
        return None;
    }
    let hour = match (&caps["meridiem"].to_ascii_lowercase()[..], hour) {
        ("a", 12) => 0,
        ("a", h) => h,
        ("p", 12) => 12,
        (_, h) => h + 12,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Interpret a New York wall-clock time on `date`.
fn localize(date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    ZONE.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Parse an article timestamp such as `Sun Aug 25, 2013 11:58pm EDT`.
fn parse_full_stamp(text: &str) -> Result<DateTime<Utc>, ParseError> {
    let invalid = || ParseError::structural(".timestamp", format!("unrecognized timestamp {text:?}"));
    let caps = FULL_STAMP.captures(text.trim()).ok_or_else(invalid)?;
    let month = month_number(&caps["month"]).ok_or_else(invalid)?;
    let day = caps["day"].parse().map_err(|_| invalid())?;
    let year = caps["year"].parse().map_err(|_| invalid())?;
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)?;
    let time = parse_clock(&caps["clock"]).ok_or_else(invalid)?;
    localize(date, time).ok_or_else(invalid)
}

/// Text after the last element of an archive entry, if any.
fn trailing_text(entry: ElementRef<'_>) -> Option<String> {
    entry
        .children()
        .filter_map(|child| match child.value() {
            Node::Text(t) if !t.trim().is_empty() => Some(t.trim().to_string()),
            _ => None,
        })
        .last()
}

#[derive(Debug)]
pub struct Reuters {
    version: ProcessorVersion,
    bylines: RuleEngine<Byline>,
    paragraphs: ParagraphParser,
}

impl Default for Reuters {
    fn default() -> Self {
        Self::new()
    }
}

impl Reuters {
    pub fn new() -> Self {
        Self::with_version(ProcessorVersion::new(PROCESSOR_VERSION, PROCESSOR_PATCH))
    }

    pub fn with_version(version: ProcessorVersion) -> Self {
        Self {
            version,
            bylines: byline_engine(),
            paragraphs: ParagraphParser::default(),
        }
    }

    fn parse_info(
        &self,
        parser: &mut DocumentParser,
        info: ElementRef<'_>,
        article: &mut Article,
    ) -> Result<(), ParseError> {
        for byline in parser.select_all(info, &BYLINE) {
            let siblings = parser.siblings(byline);
            if let Some(parsed) = parse_byline(&self.bylines, &siblings, Some(&element_shell(byline))) {
                article.byline = Some(parsed);
            }
            parser.consume_element(byline);
        }
        for location in parser.select_all(info, &LOCATION) {
            article.metadata.properties.push(Property {
                key: "location".to_string(),
                value: element_text(location),
            });
            parser.consume_element(location);
        }
        if let Some(stamp) = parser.select_exactly_one(info, &TIMESTAMP, true)? {
            article.metadata.published_at = Some(parse_full_stamp(&element_text(stamp))?);
            parser.consume_element(stamp);
        }

        // Separators left between the dateline parts.
        for child in parser.remaining_children(info) {
            let Some(line) = ElementRef::wrap(child) else {
                continue;
            };
            if line.value().name() != "p" {
                continue;
            }
            for part in parser.remaining_children(line) {
                if matches!(part.value(), Node::Text(t) if t.trim() == "|") {
                    parser.consume(part);
                }
            }
            parser.finish(line, "#articleInfo p")?;
        }
        parser.finish(info, "#articleInfo")
    }

    fn parse_text(
        &self,
        parser: &mut DocumentParser,
        text: ElementRef<'_>,
        article: &mut Article,
    ) -> Result<(), ParseError> {
        for child in parser.remaining_children(text) {
            let Some(element) = ElementRef::wrap(child) else {
                continue;
            };
            let e = element.value();
            match e.name() {
                "p" => {
                    if let Some(block) = self.paragraphs.parse_block(&parser.fragment(element))? {
                        article.body.push(block);
                    }
                    parser.consume(child);
                }
                // ad slots
                "span" if e.id().is_some_and(|id| id.starts_with("midArticle")) => parser.consume(child),
                "span" if e.classes().any(|c| c == "focusParagraph") => {
                    for p in parser.select_all(element, &FOCUS_PARAGRAPH) {
                        if let Some(block) = self.paragraphs.parse_block(&parser.fragment(p))? {
                            article.body.push(block);
                        }
                        parser.consume_element(p);
                    }
                    parser.finish(element, ".focusParagraph")?;
                }
                "div" | "span" if e.classes().any(|c| c.starts_with("related") || c == "linebreak") => {
                    parser.consume(child)
                }
                _ => {}
            }
        }
        parser.finish(text, "#articleText")
    }
}

impl Vendor for Reuters {
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
        ZONE
    }

    fn daily_index_url(&self, date: NaiveDate) -> String {
        format!("{SITE}resources/archive/us/{}.html", date.format("%Y%m%d"))
    }

    #[instrument(level = "debug", skip_all, fields(%date))]
    fn parse_daily_index(&self, content: &str, date: NaiveDate) -> Result<DailyIndex, ParseError> {
        let doc = parse_document(content);
        let site = Url::parse(SITE).map_err(|e| ParseError::structural("daily index", e.to_string()))?;
        let mut articles = Vec::new();

        for entry in doc.select(&HEADLINE_ENTRY.selector) {
            let a = entry
                .select(&ANCHOR.selector)
                .next()
                .ok_or_else(|| ParseError::structural(".headlineMed", "entry without link"))?;
            let href = a
                .value()
                .attr("href")
                .ok_or_else(|| ParseError::structural(".headlineMed a", "link without href"))?;
            let url = site
                .join(href)
                .map_err(|e| ParseError::structural(".headlineMed a", format!("{href}: {e}")))?;
            let published_at = match trailing_text(entry) {
                Some(stamp) => {
                    let time = parse_clock(&stamp).ok_or_else(|| {
                        ParseError::structural(".headlineMed", format!("unrecognized time {stamp:?}"))
                    })?;
                    localize(date, time)
                }
                None => None,
            };
            articles.push(ArticleRef {
                url: url.to_string(),
                title: element_text(a),
                summary: None,
                published_at,
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
        let mut article = Article {
            url: url.to_string(),
            ..Default::default()
        };

        let headline = parser.select_exactly_one(root, &HEADLINE, true)?;
        let text = parser.select_exactly_one(root, &ARTICLE_TEXT, true)?;
        let (headline, text) = match (headline, text) {
            (None, None) => {
                article.empty_page = true;
                return Ok(article);
            }
            (Some(headline), Some(text)) => (headline, text),
            (None, Some(_)) => return Err(ParseError::structural("article", "story text without headline")),
            (Some(_), None) => return Err(ParseError::structural("article", "headline without #articleText")),
        };
        article.headline = element_text(headline);
        parser.consume_element(headline);

        if let Some(info) = parser.select_exactly_one(root, &ARTICLE_INFO, true)? {
            self.parse_info(&mut parser, info, &mut article)?;
        }
        self.parse_text(&mut parser, text, &mut article)?;

        article.emails = emails(&article.body);
        Ok(article)
    }

    fn allows_redirect(&self, target: &Url) -> bool {
        within_domain(target, "reuters.com")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Author, Block, Credit};

    const STORY: &str = r#"<html><body><div id="content"><div class="column1">
  <h1>Fed Holds Rates Steady</h1>
  <div id="articleInfo">
    <p class="byline">By Jane Doe</p>
    <p><span class="location">WASHINGTON</span> | <span class="timestamp">Sun Aug 25, 2013 11:58pm EDT</span></p>
  </div>
  <span id="articleText">
    <span id="midArticle_start"></span>
    <span class="focusParagraph"><p>(Reuters) - The Federal Reserve held rates.</p></span>
    <span id="midArticle_0"></span>
    <p>Contact <a href="mailto:jane.doe@thomsonreuters.com">Jane Doe</a>.</p>
    <div class="relatedRail">Related</div>
    <p>(Reporting by Jane Doe; Editing by Max Poe)</p>
  </span>
</div></div></body></html>"#;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2013, 8, 25).unwrap()
    }

    #[test]
    fn test_daily_index_url() {
        assert_eq!(
            Reuters::new().daily_index_url(NaiveDate::from_ymd_opt(2013, 8, 5).unwrap()),
            "http://www.reuters.com/resources/archive/us/20130805.html"
        );
    }

    #[test]
    fn test_parse_daily_index_with_times() {
        let html = r#"<html><body><div class="primaryContent">
            <div class="headlineMed"><a href="http://www.reuters.com/article/2013/08/25/us-fed-idUSBRE1">Fed holds</a>11:58pm EDT</div>
            <div class="headlineMed"><a href="/article/2013/08/25/us-stocks-idUSBRE2">Stocks open</a> 12:05am EDT</div>
            <div class="headlineMed"><a href="/article/2013/08/25/us-oil-idUSBRE3">Oil</a></div>
        </div></body></html>"#;
        let index = Reuters::new().parse_daily_index(html, day()).unwrap();
        assert_eq!(index.articles.len(), 3);
        assert_eq!(
            index.articles[0],
            ArticleRef {
                url: "http://www.reuters.com/article/2013/08/25/us-fed-idUSBRE1".to_string(),
                title: "Fed holds".to_string(),
                summary: None,
                published_at: Some(Utc.with_ymd_and_hms(2013, 8, 26, 3, 58, 0).unwrap()),
            }
        );
        assert_eq!(
            index.articles[1].url,
            "http://www.reuters.com/article/2013/08/25/us-stocks-idUSBRE2"
        );
        assert_eq!(
            index.articles[1].published_at,
            Some(Utc.with_ymd_and_hms(2013, 8, 25, 4, 5, 0).unwrap())
        );
        assert_eq!(index.articles[2].published_at, None);
    }

    #[test]
    fn test_unrecognized_index_time_fails() {
        let html = r#"<div class="primaryContent"><div class="headlineMed"><a href="/a">A</a>noon-ish</div></div>"#;
        let err = Reuters::new().parse_daily_index(html, day()).unwrap_err();
        assert!(err.to_string().contains("noon-ish"), "{err}");
    }

    #[test]
    fn test_clock_times() {
        assert_eq!(parse_clock("12:00am EST"), NaiveTime::from_hms_opt(0, 0, 0));
        assert_eq!(parse_clock("12:30pm"), NaiveTime::from_hms_opt(12, 30, 0));
        assert_eq!(parse_clock("1:07 p.m. EDT"), NaiveTime::from_hms_opt(13, 7, 0));
        assert_eq!(parse_clock("13:07pm"), None);
        assert_eq!(parse_clock("soon"), None);
    }

    #[test]
    fn test_parse_article() {
        let article = Reuters::new()
            .parse_article("http://www.reuters.com/article/2013/08/25/us-fed-idUSBRE1", STORY)
            .unwrap();
        assert_eq!(article.headline, "Fed Holds Rates Steady");
        assert_eq!(
            article.byline,
            Some(Byline::Credits(vec![Credit::single(Author::named("Jane Doe"))]))
        );
        assert_eq!(
            article.metadata.properties,
            vec![Property {
                key: "location".to_string(),
                value: "WASHINGTON".to_string()
            }]
        );
        assert_eq!(
            article.metadata.published_at,
            Some(Utc.with_ymd_and_hms(2013, 8, 26, 3, 58, 0).unwrap())
        );
        let texts: Vec<&str> = article
            .body
            .iter()
            .filter_map(|b| match b {
                Block::Paragraph(p) => Some(p.text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            texts,
            vec![
                "(Reuters) - The Federal Reserve held rates.",
                "Contact Jane Doe.",
                "(Reporting by Jane Doe; Editing by Max Poe)",
            ]
        );
        assert_eq!(article.emails, vec!["jane.doe@thomsonreuters.com".to_string()]);
    }

    #[test]
    fn test_unknown_story_element_fails() {
        let html = STORY.replace(r#"<span id="midArticle_0"></span>"#, "<table><tr><td>1</td></tr></table>");
        let err = Reuters::new().parse_article("http://www.reuters.com/a", &html).unwrap_err();
        match err {
            ParseError::Unexhausted { context, remainder } => {
                assert_eq!(context, "#articleText");
                assert!(remainder.contains("<table"), "{remainder}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_unknown_info_text_fails() {
        let html = STORY.replace("</span> | <span", "</span> updated <span");
        let err = Reuters::new().parse_article("http://www.reuters.com/a", &html).unwrap_err();
        assert!(matches!(err, ParseError::Unexhausted { ref context, .. } if context == "#articleInfo p"), "{err}");
    }

    #[test]
    fn test_page_without_story_is_empty() {
        let article = Reuters::new()
            .parse_article("http://www.reuters.com/a", "<html><body><p>Not found</p></body></html>")
            .unwrap();
        assert!(article.empty_page);
    }

    #[test]
    fn test_redirect_allowlist() {
        let vendor = Reuters::new();
        assert!(vendor.allows_redirect(&Url::parse("http://www.reuters.com/article/x").unwrap()));
        assert!(!vendor.allows_redirect(&Url::parse("http://reuters.example.com/").unwrap()));
        assert!(vendor.cookie_policy().is_none());
    }
}
