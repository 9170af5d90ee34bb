//! Caller-facing JSON shapes.
//!
//! Empty fields are omitted from the serialized output. HTML inside
//! descriptions and content is passed through verbatim (serde_json does not
//! escape `<`, `>` or `&`).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::parser::{ParsedEntry, ParsedFeed};

/// Version tag carried by every response envelope.
pub const API_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed: Option<FeedMeta>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    pub fn ok(feed: FeedMeta, items: Vec<Item>) -> Self {
        Self {
            status: Status::Ok,
            version: API_VERSION.to_string(),
            feed: Some(feed),
            items,
            message: None,
        }
    }

    /// The error envelope: status `"error"` plus a caller-facing message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            version: API_VERSION.to_string(),
            feed: None,
            items: Vec::new(),
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedMeta {
    /// The URL the feed was requested from.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl FeedMeta {
    pub fn new(url: &str, feed: &ParsedFeed) -> Self {
        Self {
            url: url.to_string(),
            title: feed.title.clone(),
            link: feed.link.clone(),
            description: feed.description.clone(),
            image: feed.image.clone(),
            author: feed.author.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thumbnail: String,
}

impl Item {
    pub fn new(entry: ParsedEntry, thumbnail: String) -> Self {
        Self {
            title: entry.title,
            link: entry.link,
            author: entry.author,
            description: entry.summary,
            content: entry.content,
            published: entry.published.map(rfc3339),
            updated: entry.updated.map(rfc3339),
            guid: entry.id,
            thumbnail,
        }
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
