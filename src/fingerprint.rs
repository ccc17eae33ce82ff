//! Content fingerprinting and URL canonicalisation.

use sha2::{Digest, Sha256};
use url::Url;

/// SHA-256 of the lowercased, whitespace-collapsed content, hex encoded.
///
/// Empty input yields `None`, which callers treat as "not comparable".
pub fn hash_content(content: &str) -> Option<String> {
    if content.is_empty() {
        return None;
    }

    let normalized = normalize_content(content);

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    Some(format!("{:x}", hasher.finalize()))
}

/// Lowercase, collapse every whitespace run to one space, trim.
pub fn normalize_content(content: &str) -> String {
    content
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip query string and fragment. Unparseable input is returned unchanged.
pub fn canonicalize_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

/// Host portion of a URL, if it has one.
pub fn source_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
}

/// Plain text approximation of markdown: drops `#`, `*`, backticks, brackets and parentheses.
pub fn markdown_to_plain_text(markdown: &str) -> String {
    markdown
        .chars()
        .filter(|c| !matches!(c, '#' | '*' | '`' | '[' | ']' | '(' | ')'))
        .collect()
}
