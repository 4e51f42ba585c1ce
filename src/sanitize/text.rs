//! String cleaners.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use url::Url;

/// Hard cap on caption length, in characters.
pub const CAPTION_MAX_CHARS: usize = 2200;

/// Hard cap on file name length, in characters.
pub const FILENAME_MAX_CHARS: usize = 255;

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));

/// A `<` that could still open markup: before a letter, `/`, `!` or `?`.
static OPEN_ANGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<+([A-Za-z/!?])").expect("open angle pattern is valid"));

static DANGEROUS_SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:javascript|vbscript|data):").expect("scheme pattern is valid")
});

/// Errors raised by the specialized sanitizers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SanitizeError {
    /// The URL uses a scheme other than http or https
    #[error("URL scheme '{0}' is not allowed")]
    DisallowedScheme(String),
    /// The input does not parse as an absolute URL
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Clean a single string.
///
/// Drops `<...>` tag fragments, any unclosed `<` that could still open
/// markup, quote characters and every `javascript:`, `vbscript:` and `data:`
/// occurrence in any case, then trims. A bare `<` before whitespace or a
/// digit is kept.
pub fn clean_text(input: &str) -> String {
    // Each removal can splice the remainder into a new fragment
    // ("<\"script", "javajavascript:script:"), so repeat until stable.
    let mut cleaned = input.to_string();
    loop {
        let next = clean_once(&cleaned);
        if next == cleaned {
            break;
        }
        cleaned = next;
    }

    cleaned.trim().to_string()
}

fn clean_once(input: &str) -> String {
    let without_tags = TAG.replace_all(input, "");
    let without_quotes: String = without_tags
        .chars()
        .filter(|c| !matches!(c, '"' | '\''))
        .collect();
    let without_schemes = DANGEROUS_SCHEME.replace_all(&without_quotes, "");
    OPEN_ANGLE.replace_all(&without_schemes, "$1").into_owned()
}

/// Validate and canonicalize a URL. Only `http` and `https` are accepted.
pub fn sanitize_url(input: &str) -> Result<String, SanitizeError> {
    let raw = Url::parse(input.trim()).map_err(|e| SanitizeError::InvalidUrl(e.to_string()))?;
    check_scheme(&raw)?;

    let cleaned = Url::parse(&clean_text(input))
        .map_err(|e| SanitizeError::InvalidUrl(e.to_string()))?;
    check_scheme(&cleaned)?;

    Ok(cleaned.to_string())
}

fn check_scheme(url: &Url) -> Result<(), SanitizeError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(SanitizeError::DisallowedScheme(other.to_string())),
    }
}

/// Clean long-form caption text and cap its length.
pub fn sanitize_caption(input: &str) -> String {
    truncate_chars(clean_text(input), CAPTION_MAX_CHARS)
}

/// Reduce a file name to `[a-zA-Z0-9._-]`, neutralizing `..` sequences.
pub fn sanitize_filename(input: &str) -> String {
    let cleaned = clean_text(input).replace("..", "_");
    let safe: String = cleaned
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    truncate_chars(safe, FILENAME_MAX_CHARS)
}

fn truncate_chars(s: String, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s,
    }
}
