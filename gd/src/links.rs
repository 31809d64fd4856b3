//! Link extraction from generated answers
//!
//! The workflow reports where it put its output only inside the answer text,
//! so both the article edit link and the backing documents are recovered by
//! pattern match.

use std::sync::LazyLock;

use regex::Regex;

/// WordPress admin edit URL on the article host; stops at whitespace,
/// non-ASCII text, closing brackets, quotes and `>` so surrounding markup and
/// prose are not captured
static ARTICLE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://uxdaystokyo\.com/articles/wp-admin/post\.php\?[\x21-\x7E&&[^)\]">]]+"#)
        .expect("article link pattern is valid")
});

/// Google Docs links in either `/document/d/<id>` or `/open?id=<id>` form
static DOC_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://docs\.google\.com/(?:document/d/|open\?id=)[a-zA-Z0-9_-]+").expect("doc link pattern is valid")
});

/// Sentence punctuation that may directly follow a link in prose
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?'];

/// First article edit link in `text`, if any
pub fn extract_article_link(text: &str) -> Option<String> {
    ARTICLE_LINK
        .find(text)
        .map(|m| m.as_str().trim_end_matches(TRAILING_PUNCTUATION).to_string())
}

/// All document links in `text`, de-duplicated, in order of first appearance
pub fn extract_doc_links(text: &str) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();
    for m in DOC_LINK.find_iter(text) {
        if !links.iter().any(|l| l == m.as_str()) {
            links.push(m.as_str().to_string());
        }
    }
    links
}
