use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Feed, Link, Person};
use feed_rs::parser::{self, ParseFeedError};

/// Feed-level metadata plus the ordered entries of one document.
///
/// Only the fields the JSON output uses survive the projection; media
/// objects, categories and namespace extensions are dropped here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub author: Option<String>,
    pub entries: Vec<ParsedEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

/// Parses an RSS 0.9x/1.0/2.0, Atom or JSON Feed document.
///
/// # Errors
///
/// Returns the feed-rs error unchanged when the document is not a
/// recognisable feed.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseFeedError> {
    let feed = parser::parse(bytes)?;
    Ok(project_feed(feed))
}

fn project_feed(feed: Feed) -> ParsedFeed {
    let author = feed
        .authors
        .first()
        .and_then(person_name)
        .or_else(|| managing_editor(&feed.contributors));

    ParsedFeed {
        title: feed.title.map(|t| t.content).and_then(non_empty),
        link: primary_link(&feed.links),
        description: feed.description.map(|t| t.content).and_then(non_empty),
        image: feed
            .logo
            .or(feed.icon)
            .map(|image| image.uri)
            .and_then(non_empty),
        author,
        entries: feed.entries.into_iter().map(project_entry).collect(),
    }
}

fn project_entry(entry: Entry) -> ParsedEntry {
    ParsedEntry {
        id: non_empty(entry.id),
        title: entry.title.map(|t| t.content).and_then(non_empty),
        link: primary_link(&entry.links),
        author: entry.authors.first().and_then(person_name),
        summary: entry.summary.map(|t| t.content).and_then(non_empty),
        content: entry.content.and_then(|c| c.body).and_then(non_empty),
        published: entry.published,
        updated: entry.updated,
    }
}

/// The `alternate` link, or the first link without a `rel`, or the first link.
fn primary_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.trim().to_string())
        .filter(|href| !href.is_empty())
}

fn person_name(person: &Person) -> Option<String> {
    non_empty(person.name.clone()).or_else(|| person.email.clone().and_then(non_empty))
}

// feed-rs records RSS <managingEditor> as a contributor named after the role.
fn managing_editor(contributors: &[Person]) -> Option<String> {
    contributors
        .iter()
        .find(|p| p.name == "managingEditor")
        .and_then(|p| p.email.clone())
        .and_then(non_empty)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == value.len() {
        Some(value)
    } else {
        Some(trimmed.to_string())
    }
}
