//! Daily news archive retrieval.
//!
//! For a vendor and a calendar day, the [`retriever::Retriever`] fetches the
//! day's archive index, then every article it lists, normalizes each page
//! into an [`models::Article`] and caches both the raw HTML and the processed
//! JSON in a [`cache::ContentCache`]. Raw pages are fetched once; processed
//! documents are rebuilt whenever the processor version changes.
//!
//! Parsing is deliberately unforgiving: [`parser::DocumentParser`] tracks
//! which nodes were accounted for, and any markup left over is an error that
//! fails the day and lands in the [`journal::ErrorJournal`] for a later
//! replay.

pub mod cache;
pub mod cli;
pub mod config;
pub mod cookies;
pub mod error;
pub mod fetch;
pub mod journal;
pub mod models;
pub mod notify;
pub mod outputs;
pub mod parser;
pub mod retriever;
pub mod state;
pub mod storage;
pub mod utils;
pub mod vendors;
pub mod version;
