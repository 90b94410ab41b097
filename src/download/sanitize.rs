//! URL to filesystem path transformation.
//!
//! Every URL maps to a relative path of the form
//! `host[:port]/segment/.../last(params)_query`, where each component has been
//! run through [`clean_filename`]. The transform is pure and deterministic, so
//! the same URL always lands on the same file, which is what makes cache hits
//! possible across runs.
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use bulkfetch_core::download::url_to_relative_path;
//!
//! let path = url_to_relative_path("https://httpbin.org/drip?duration=5&code=200").unwrap();
//! assert_eq!(path, Path::new("httpbin.org/drip_duration_5-code_200"));
//! ```

use std::borrow::Cow;
use std::path::PathBuf;

use tracing::trace;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;
use url::Url;

use super::DownloadError;

/// Segment used when a URL has no path, or its path ends in a slash.
pub const INDEX_SEGMENT: &str = "index";

/// Stand-in for a component that sanitizes to nothing or to a dot entry.
const PLACEHOLDER_SEGMENT: &str = "_";

/// Longest component most filesystems accept (bytes).
const MAX_COMPONENT_LEN: usize = 255;

/// Replaces separator-like characters with filename-safe equivalents.
///
/// `&` → `-`, `,` → `.`, `;` → `-`, `=` → `_`; every other character is
/// returned unchanged.
#[must_use]
pub fn replace_char(c: char) -> char {
    match c {
        '&' | ';' => '-',
        ',' => '.',
        '=' => '_',
        other => other,
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '(' | ')' | ' ')
}

/// Returns a sanitized filename.
///
/// Applies [`replace_char`], decomposes to NFKD, drops combining marks and
/// then drops anything outside ASCII letters, digits, `-_.() ` and space.
///
/// ```
/// use bulkfetch_core::download::clean_filename;
///
/// assert_eq!(clean_filename("français.txt"), "francais.txt");
/// assert_eq!(clean_filename("a=1&b=2"), "a_1-b_2");
/// ```
#[must_use]
pub fn clean_filename(name: &str) -> String {
    name.chars()
        .map(replace_char)
        .nfkd()
        .filter(|c| !is_combining_mark(*c) && is_allowed(*c))
        .collect()
}

/// Transforms a URL into a relative path under its host directory.
///
/// # Errors
///
/// Returns [`DownloadError::InvalidUrl`] if the URL cannot be parsed, is not
/// `http`/`https`, or has no host.
pub fn url_to_relative_path(url: &str) -> Result<PathBuf, DownloadError> {
    let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DownloadError::invalid_url(url));
    }
    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| DownloadError::invalid_url(url))?;
    let host = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let (path, params) = split_params(parsed.path());

    let mut segments: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| clean_component(&decode(segment)))
        .collect();
    if segments.is_empty() || path.ends_with('/') {
        segments.push(INDEX_SEGMENT.to_string());
    }

    let params = clean_filename(&decode(params));
    let query = clean_filename(&decode(parsed.query().unwrap_or_default()));

    if let Some(last) = segments.last_mut() {
        if !params.is_empty() {
            last.push('(');
            last.push_str(&params);
            last.push(')');
        }
        if !query.is_empty() {
            last.push('_');
            last.push_str(&query);
        }
    }

    let mut relative = PathBuf::from(host);
    for segment in &segments {
        relative.push(truncate_component(segment));
    }

    trace!(url, path = %relative.display(), "transformed URL to path");
    Ok(relative)
}

/// Splits `;params` off the last path segment.
fn split_params(path: &str) -> (&str, &str) {
    let last_start = path.rfind('/').map_or(0, |index| index + 1);
    match path[last_start..].find(';') {
        Some(offset) => {
            let split = last_start + offset;
            (&path[..split], &path[split + 1..])
        }
        None => (path, ""),
    }
}

fn decode(raw: &str) -> Cow<'_, str> {
    urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw))
}

fn clean_component(raw: &str) -> String {
    let cleaned = clean_filename(raw);
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        PLACEHOLDER_SEGMENT.to_string()
    } else {
        cleaned
    }
}

fn truncate_component(component: &str) -> &str {
    if component.len() <= MAX_COMPONENT_LEN {
        return component;
    }
    let mut end = MAX_COMPONENT_LEN;
    while !component.is_char_boundary(end) {
        end -= 1;
    }
    &component[..end]
}
