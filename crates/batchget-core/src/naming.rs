//! Local file names for the URLs of a job.
//!
//! A job's files are keyed by name, so names must be unique within the job
//! and safe to join onto the job folder.

use std::collections::HashSet;

/// Used when the URL path yields nothing usable.
const DEFAULT_FILENAME: &str = "download.bin";

/// Linux NAME_MAX.
const NAME_MAX: usize = 255;

/// Last path segment of `url`, if any. Query and fragment are ignored.
pub fn filename_from_url_path(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path().split('/').filter(|s| !s.is_empty()).last()?;
    if segment == "." || segment == ".." {
        return None;
    }
    Some(segment.to_string())
}

/// Sanitizes a candidate filename for safe use on Linux.
///
/// Separators, NUL, control characters and whitespace become `_` (runs
/// collapse to one); leading/trailing dots and underscores are trimmed; the
/// result is cut to NAME_MAX bytes on a char boundary.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let replacement = if c == '/' || c == '\\' || c.is_control() || c.is_whitespace() {
            '_'
        } else {
            c
        };
        if replacement == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(replacement);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut take = trimmed.len().min(NAME_MAX);
    while take > 0 && !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    trimmed[..take].to_string()
}

/// Safe local name for `url`, falling back to `download.bin`.
pub fn derive_filename(url: &str) -> String {
    let sanitized = filename_from_url_path(url)
        .map(|raw| sanitize_filename(&raw))
        .unwrap_or_default();
    if sanitized.is_empty() {
        DEFAULT_FILENAME.to_string()
    } else {
        sanitized
    }
}

/// `candidate`, or `stem-N.ext` with the smallest N ≥ 2 not in `taken`.
pub fn unique_name(candidate: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(candidate) {
        return candidate.to_string();
    }
    let (stem, ext) = match candidate.rfind('.') {
        Some(i) if i > 0 => (&candidate[..i], &candidate[i..]),
        _ => (candidate, ""),
    };
    (2..)
        .map(|n| format!("{stem}-{n}{ext}"))
        .find(|name| !taken.contains(name))
        .unwrap_or_else(|| candidate.to_string())
}

/// Unique names for a batch of URLs added to a job that already holds `existing`.
pub fn names_for_urls<'a>(
    urls: impl IntoIterator<Item = &'a str>,
    existing: impl IntoIterator<Item = String>,
) -> Vec<String> {
    let mut taken: HashSet<String> = existing.into_iter().collect();
    urls.into_iter()
        .map(|url| {
            let name = unique_name(&derive_filename(url), &taken);
            taken.insert(name.clone());
            name
        })
        .collect()
}
