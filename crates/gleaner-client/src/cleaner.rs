use std::sync::Arc;

use gleaner_core::error::AppError;
use gleaner_core::models::FormatOptions;
use htmd::HtmlToMarkdown;

/// Upper bound on a generated summary, in characters.
pub const SUMMARY_MAX_CHARS: usize = 500;

/// Tags that never carry readable content.
const BASE_SKIP_TAGS: &[&str] = &["script", "style", "noscript", "svg"];

/// HTML-to-Markdown cleaner using htmd.
///
/// Converts raw HTML into Markdown, stripping non-content elements. Which
/// page chrome is dropped on top of that is decided by [`FormatOptions`].
pub struct HtmdCleaner {
    converter: Arc<HtmlToMarkdown>,
}

impl Clone for HtmdCleaner {
    fn clone(&self) -> Self {
        Self {
            converter: Arc::clone(&self.converter),
        }
    }
}

impl HtmdCleaner {
    pub fn new() -> Self {
        Self::for_format(&FormatOptions::default())
    }

    pub fn for_format(format: &FormatOptions) -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(skip_tags(format))
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }

    pub fn clean(&self, html: &str) -> Result<String, AppError> {
        self.converter
            .convert(html)
            .map(|md| md.trim().to_string())
            .map_err(|e| AppError::Generic(format!("HTML to Markdown conversion failed: {e}")))
    }
}

impl Default for HtmdCleaner {
    fn default() -> Self {
        Self::new()
    }
}

fn skip_tags(format: &FormatOptions) -> Vec<&'static str> {
    let mut tags = BASE_SKIP_TAGS.to_vec();
    if format.skip_headers {
        tags.extend(["header", "nav"]);
    }
    if format.skip_footers {
        tags.push("footer");
    }
    if format.exclude_ads {
        tags.extend(["aside", "iframe", "ins"]);
    }
    if format.exclude_media {
        tags.extend(["img", "picture", "video", "audio", "figure"]);
    }
    tags
}

/// Leading sentences of `content`, at most [`SUMMARY_MAX_CHARS`] characters.
///
/// A first sentence longer than the bound is cut at the bound.
pub fn summarize(content: &str) -> String {
    let text = content.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut summary = String::new();
    let mut count = 0;

    for sentence in text.split_inclusive(['.', '!', '?']) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        let len = sentence.chars().count() + usize::from(!summary.is_empty());
        if count + len > SUMMARY_MAX_CHARS {
            break;
        }
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push_str(sentence);
        count += len;
    }

    if summary.is_empty() {
        summary = text.chars().take(SUMMARY_MAX_CHARS).collect();
    }
    summary
}
