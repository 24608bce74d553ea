/// Turns a display name into a path segment made of `[a-z0-9_-]`.
///
/// Runs of anything else become a single `-` and the result never starts or ends
/// with `-`. An empty return value means the caller needs its own fallback.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.to_lowercase().chars() {
        let mapped = if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' || ch == '-' {
            ch
        } else {
            '-'
        };
        if mapped == '-' && out.ends_with('-') {
            continue;
        }
        out.push(mapped);
    }
    out.trim_matches('-').to_string()
}

/// First non-empty slug among `candidates`, or `default`.
pub fn sanitize_or(candidates: &[&str], default: &str) -> String {
    candidates
        .iter()
        .map(|candidate| sanitize(candidate))
        .find(|slug| !slug.is_empty())
        .unwrap_or_else(|| default.to_string())
}
