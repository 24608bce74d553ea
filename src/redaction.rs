use once_cell::sync::Lazy;
use regex::Regex;

static SECRET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"(?i)(authorization|token|secret|password)\s*[:=]\s*["']?(?:bearer\s+|token\s+)?([A-Za-z0-9_\-\.]{6,})["']?"#)
            .expect("valid regex"),
        Regex::new(r"\b((?:ghp|gho|ghu|ghs|ghr)_[A-Za-z0-9]{20,})\b").expect("valid regex"),
        Regex::new(r"\b(github_pat_[A-Za-z0-9_]{20,})\b").expect("valid regex"),
    ]
});

/// Scrubs credentials out of text that is about to be logged or surfaced in an
/// error, such as a remote error body.
#[derive(Debug, Default, Clone)]
pub struct Redactor {
    known_secrets: Vec<String>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also redacts this exact value wherever it appears.
    pub fn with_secret(mut self, secret: &str) -> Self {
        if !secret.trim().is_empty() {
            self.known_secrets.push(secret.to_string());
        }
        self
    }

    pub fn redact(&self, input: &str) -> String {
        if input.is_empty() {
            return String::new();
        }

        let mut result = input.to_string();
        for secret in &self.known_secrets {
            result = result.replace(secret.as_str(), "[REDACTED]");
        }

        for pattern in SECRET_PATTERNS.iter() {
            if !pattern.is_match(&result) {
                continue;
            }
            result = pattern
                .replace_all(&result, |caps: &regex::Captures<'_>| {
                    if caps.len() > 2 {
                        let key = caps
                            .get(1)
                            .map(|m| m.as_str())
                            .unwrap_or("secret")
                            .to_ascii_lowercase();
                        format!("{}=[REDACTED]", key)
                    } else {
                        "[REDACTED_TOKEN]".to_string()
                    }
                })
                .to_string();
        }

        result
    }
}
