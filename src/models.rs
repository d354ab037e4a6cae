//! Data models for daily indexes and normalized articles.
//!
//! This module defines the structured shapes the parsers produce and the
//! processed cache stores as JSON:
//! - [`DailyIndex`] / [`ArticleRef`]: one vendor's archive page for a day
//! - [`Article`]: a normalized article with metadata, headline and a tree of
//!   [`Block`]s
//! - [`Paragraph`] / [`Inline`]: text plus the entities found inside it
//! - [`Byline`] / [`Credit`] / [`Author`]: who wrote the piece
//!
//! Empty collections and absent optionals are omitted from the JSON form.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One day's archive listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyIndex {
    pub date: NaiveDate,
    /// Articles in document order.
    pub articles: Vec<ArticleRef>,
}

/// An archive entry pointing at an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRef {
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Publication time, when the archive lists one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// A normalized article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Article {
    pub url: String,
    #[serde(default)]
    pub metadata: ArticleMetadata,
    pub headline: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subhead: Option<String>,
    /// Secondary headings found in the headline box.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_heads: Vec<Heading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byline: Option<Byline>,
    /// Body in document order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<Block>,
    /// Page-level citations (wire service credits and the like).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cites: Vec<String>,
    /// Mail addresses linked anywhere in the article.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,
    /// Set when the page had neither headline box nor body (e.g. an error page).
    #[serde(default, skip_serializing_if = "is_false")]
    pub empty_page: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Article-level metadata collected from the headline box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ArticleMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<SectionRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_stamp: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Named anchors (`<a name=...>`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anchors: Vec<String>,
    /// Free-form `key:value` properties.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Property>,
    /// Security codes announced for the article.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<SymbolCode>,
}

/// Section the article is filed under, linked or plain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolCode {
    pub codes: String,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    pub level: u8,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<Inline>,
}

/// A structural node of the article body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Heading(Heading),
    Paragraph(Paragraph),
    List { items: Vec<Block> },
    Quote(Paragraph),
    Byline { byline: Byline },
    /// A named anchor marking a position in the body.
    Anchor { name: String },
    /// Preformatted text, kept verbatim.
    Preformatted { text: String },
}

/// A run of text and the entities found inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Paragraph {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<Inline>,
    /// Nested paragraphs (`p > p`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Paragraph>,
    /// Inline citations (`p > cite`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cites: Vec<Paragraph>,
}

impl Paragraph {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.entities.is_empty() && self.children.is_empty() && self.cites.is_empty()
    }
}

/// An entity referenced inside a paragraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inline {
    Email { address: String },
    /// A market data link (`type` is e.g. `usstock`).
    Symbol { r#type: String, symbol: String },
    Ticker { symbol: String },
    Topic { path: String },
    Search { query: String },
    Link { href: String },
    /// A named anchor inside running text.
    Anchor { name: String },
}

/// Authorship of an article.
///
/// Structured bylines serialize as a plain list of credits; bylines that no
/// rule could structure keep their flattened text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Byline {
    Credits(Vec<Credit>),
    Text(String),
}

/// One credited entry of a byline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub author: Vec<Author>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cite: Option<String>,
}

impl Credit {
    pub fn single(author: Author) -> Self {
        Self {
            author: vec![author],
            cite: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

impl Author {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}
