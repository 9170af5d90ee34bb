//! Best-effort recovery of per-entry thumbnail URLs.
//!
//! feed-rs does not surface `<media:thumbnail>` (or any other `thumbnail`
//! element) in a form that survives into the JSON output, so the raw body is
//! walked a second time with a quick-xml pull reader. The walk is single-pass
//! and never fails: malformed XML ends it early and whatever was collected up
//! to that point is returned.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;

/// Returns one entry per closed `<item>`/`<entry>` element, in document
/// order. An entry is the empty string when no thumbnail was found.
///
/// Within an item, the first `thumbnail` element with a usable value wins:
/// its `url` attribute if present, otherwise its text content. Element names
/// are compared by local name, ignoring case and namespace prefix.
pub fn scan_thumbnails(body: &[u8]) -> Vec<String> {
    if body.is_empty() {
        return Vec::new();
    }

    // SEC-002: quick-xml (0.37) never expands DOCTYPE entities; custom
    // entities surface as unescape errors and end the scan.
    let mut reader = Reader::from_reader(body);
    let mut buf = Vec::new();
    let mut inner = Vec::new();

    let mut thumbnails = Vec::new();
    let mut in_item = false;
    let mut current = String::new();

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(
                    position = reader.buffer_position(),
                    recovered = thumbnails.len(),
                    error = %e,
                    "Thumbnail scan stopped at malformed XML"
                );
                break;
            }
        };

        match event {
            Event::Start(e) if is_item(e.local_name().as_ref()) => {
                in_item = true;
                current.clear();
            }
            Event::Start(e) if in_item && is_thumbnail(e.local_name().as_ref()) => {
                let outcome = if !current.is_empty() {
                    skip_element(&mut reader, e.name(), &mut inner)
                } else if let Some(url) = url_attribute(&e, &reader) {
                    current = url;
                    skip_element(&mut reader, e.name(), &mut inner)
                } else {
                    element_text(&mut reader, &mut inner).map(|text| {
                        current = text.trim().to_string();
                    })
                };
                if outcome.is_none() {
                    tracing::debug!(
                        recovered = thumbnails.len(),
                        "Thumbnail scan stopped inside thumbnail element"
                    );
                    break;
                }
            }
            Event::Empty(e) if is_item(e.local_name().as_ref()) => {
                thumbnails.push(String::new());
                in_item = false;
                current.clear();
            }
            Event::Empty(e) if in_item && is_thumbnail(e.local_name().as_ref()) => {
                if current.is_empty() {
                    if let Some(url) = url_attribute(&e, &reader) {
                        current = url;
                    }
                }
            }
            Event::End(e) if is_item(e.local_name().as_ref()) => {
                if in_item {
                    thumbnails.push(current.trim().to_string());
                }
                in_item = false;
                current.clear();
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    thumbnails
}

fn is_item(local: &[u8]) -> bool {
    local.eq_ignore_ascii_case(b"item") || local.eq_ignore_ascii_case(b"entry")
}

fn is_thumbnail(local: &[u8]) -> bool {
    local.eq_ignore_ascii_case(b"thumbnail")
}

/// Trimmed value of the first `url` attribute, if non-empty.
fn url_attribute(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Option<String> {
    let decoder = reader.decoder();
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref().eq_ignore_ascii_case(b"url"))
        .and_then(|attr| attr.decode_and_unescape_value(decoder).ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn skip_element(reader: &mut Reader<&[u8]>, name: QName<'_>, buf: &mut Vec<u8>) -> Option<()> {
    buf.clear();
    reader.read_to_end_into(name, buf).ok().map(|_| ())
}

/// Concatenated character data directly inside the current element,
/// consuming up to and including its end tag.
fn element_text(reader: &mut Reader<&[u8]>, buf: &mut Vec<u8>) -> Option<String> {
    let mut text = String::new();
    let mut depth = 0usize;

    loop {
        buf.clear();
        match reader.read_event_into(buf).ok()? {
            Event::Start(_) => depth += 1,
            Event::End(_) if depth == 0 => return Some(text),
            Event::End(_) => depth -= 1,
            Event::Text(t) if depth == 0 => text.push_str(&t.unescape().ok()?),
            Event::CData(c) if depth == 0 => text.push_str(&String::from_utf8_lossy(&c)),
            Event::Eof => return None,
            _ => {}
        }
    }
}
