//! Markdown rendering for memo content.
//!
//! Memo source is rendered with fenced code blocks, tables and hard line
//! breaks, then passed through an allow-list sanitizer. Anything outside the
//! allow-list (scripts, styles, event handler attributes, iframes, ...) is
//! stripped while its text content is kept.

use std::collections::{HashMap, HashSet};

use pulldown_cmark::{html, Event, Options, Parser};

/// Tags allowed in rendered memo HTML.
pub const ALLOWED_TAGS: &[&str] = &[
    "p", "strong", "em", "u", "ol", "ul", "li", "br", "a", "blockquote", "pre", "code", "h1",
    "h2", "h3", "h4", "h5", "h6", "img", "table", "thead", "tbody", "tr", "th", "td",
];

/// Render markdown source to sanitized HTML.
pub fn render(source: &str) -> String {
    let parser = Parser::new_ext(source, Options::ENABLE_TABLES).map(|event| match event {
        // Single newlines become <br>, as memos are typed like chat messages
        Event::SoftBreak => Event::HardBreak,
        other => other,
    });

    let mut unsafe_html = String::with_capacity(source.len() * 3 / 2);
    html::push_html(&mut unsafe_html, parser);

    sanitizer().clean(&unsafe_html).to_string()
}

fn sanitizer() -> ammonia::Builder<'static> {
    let mut tag_attributes = HashMap::new();
    tag_attributes.insert("a", HashSet::from(["href", "title", "target"]));
    tag_attributes.insert("img", HashSet::from(["src", "alt", "title", "width", "height"]));

    let mut builder = ammonia::Builder::empty();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect())
        .generic_attributes(HashSet::from(["class"]))
        .tag_attributes(tag_attributes)
        .clean_content_tags(HashSet::from(["script", "style"]))
        .url_schemes(HashSet::from(["http", "https", "mailto"]));
    builder
}
