//! Front-matter document form of a note.
//!
//! The layout is shared with other clients of the remote tree, so `encode` writes it
//! byte for byte and `decode` accepts anything, falling back to raw content when the
//! metadata block is unreadable.

use crate::models::{now_millis, Note};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;

const DELIMITER: &str = "---";

pub fn encode(note: &Note) -> String {
    let title = single_line(&note.title);
    [
        DELIMITER.to_string(),
        format!("id: {}", single_line(&note.id)),
        format!("title: \"{}\"", title),
        format!("created: {}", format_timestamp(note.created_at)),
        format!("updated: {}", format_timestamp(note.updated_at)),
        format!("characters: {}", note.character_count()),
        format!("lines: {}", note.line_count()),
        DELIMITER.to_string(),
        String::new(),
        format!("# {}", title),
        String::new(),
        note.content.clone(),
    ]
    .join("\n")
}

pub fn decode(text: &str, fallback_id: &str) -> Note {
    let (metadata, content) = match split_front_matter(text) {
        Some((metadata, body)) => (metadata, strip_heading(body).to_string()),
        None => (BTreeMap::new(), text.to_string()),
    };

    let id = metadata
        .get("id")
        .filter(|value| !value.is_empty())
        .cloned()
        .unwrap_or_else(|| fallback_id.to_string());
    let title = metadata.get("title").cloned().unwrap_or_default();
    let created_at = parse_timestamp(metadata.get("created"));
    let updated_at = parse_timestamp(metadata.get("updated"));

    // `characters` and `lines` are informational; the counters follow the content.
    Note::restored(id, title, content, created_at, updated_at)
}

pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn single_line(value: &str) -> String {
    value.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

fn split_front_matter(text: &str) -> Option<(BTreeMap<String, String>, &str)> {
    let rest = text.strip_prefix("---\n").or_else(|| text.strip_prefix("---\r\n"))?;

    let mut metadata = BTreeMap::new();
    let mut offset = 0usize;
    for raw_line in rest.split_inclusive('\n') {
        let line = raw_line.trim_end_matches(['\n', '\r']);
        offset += raw_line.len();
        if line == DELIMITER {
            return Some((metadata, &rest[offset..]));
        }
        if let Some((key, value)) = line.split_once(':') {
            metadata.insert(key.trim().to_string(), unquote(value.trim()).to_string());
        }
    }
    None
}

/// Drops the blank line, the `# title` heading and the blank line that `encode`
/// places between the metadata block and the content.
fn strip_heading(body: &str) -> &str {
    let body = body.strip_prefix('\n').unwrap_or(body);
    if !body.starts_with('#') {
        return body;
    }
    let after_heading = match body.find('\n') {
        Some(index) => &body[index + 1..],
        None => "",
    };
    after_heading.strip_prefix('\n').unwrap_or(after_heading)
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn parse_timestamp(value: Option<&String>) -> DateTime<Utc> {
    value
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_else(now_millis)
}
