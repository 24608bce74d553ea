use crate::codec::format_timestamp;
use crate::errors::{AppError, AppResult};
use crate::models::Note;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("valid regex"));

pub const ALLOWED_PLACEHOLDERS: &[&str] =
    &["title", "content", "id", "created", "updated", "characters", "lines"];

/// Placeholder names used by `template`, in order of appearance.
pub fn validate_template(template: &str) -> AppResult<Vec<String>> {
    let mut names = Vec::new();
    let mut unknown = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        let name = caps[1].to_string();
        if !ALLOWED_PLACEHOLDERS.contains(&name.as_str()) {
            unknown.push(name);
        } else if !names.contains(&name) {
            names.push(name);
        }
    }
    if !unknown.is_empty() {
        return Err(AppError::Format(format!(
            "Unknown template placeholders: {} (allowed: {})",
            unknown.join(", "),
            ALLOWED_PLACEHOLDERS.join(", ")
        )));
    }
    Ok(names)
}

pub fn render_template(template: &str, note: &Note) -> AppResult<String> {
    validate_template(template)?;
    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| match &caps[1] {
        "title" => note.title.clone(),
        "content" => note.content.clone(),
        "id" => note.id.clone(),
        "created" => format_timestamp(note.created_at),
        "updated" => format_timestamp(note.updated_at),
        "characters" => note.character_count().to_string(),
        "lines" => note.line_count().to_string(),
        _ => String::new(),
    });
    Ok(rendered.into_owned())
}
