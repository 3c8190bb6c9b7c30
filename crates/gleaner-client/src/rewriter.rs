//! Iframe-safe rewriting of third-party pages.
//!
//! Streams the document through lol_html once: relative references become
//! absolute, anti-framing meta tags are dropped, and a permissive CSP plus a
//! navigation-reporting script are injected into `<head>`. Documents without a
//! `<head>` tag get the injection at the start of `<html>` or `<body>`, or
//! after any leading doctype.

use std::cell::Cell;

use gleaner_core::error::AppError;
use lol_html::html_content::ContentType;
use lol_html::{HtmlRewriter, Settings, element, text};
use regex::{Captures, Regex};
use scraper::{Html, Selector};
use url::Url;

/// Attributes holding URLs that get absolutized.
const URL_ATTRIBUTES: &[&str] = &["src", "href", "action", "data-src"];

/// Reference prefixes left untouched.
const SKIPPED_PREFIXES: &[&str] = &["data:", "#", "javascript:", "mailto:", "tel:"];

const PERMISSIVE_CSP: &str = r#"<meta http-equiv="Content-Security-Policy" content="default-src * data: blob: 'unsafe-inline' 'unsafe-eval'">"#;

/// Reports in-document navigation to the embedding page instead of following it.
const INTERCEPT_SCRIPT: &str = r#"<script>
(function () {
  function report(message) {
    try { window.parent.postMessage(message, '*'); } catch (e) {}
  }
  document.addEventListener('click', function (event) {
    var anchor = event.target && event.target.closest ? event.target.closest('a[href]') : null;
    if (!anchor) return;
    event.preventDefault();
    report({ type: 'gleaner:navigate', href: anchor.href });
  }, true);
  document.addEventListener('submit', function (event) {
    var form = event.target;
    event.preventDefault();
    report({ type: 'gleaner:submit', action: form.action, method: (form.method || 'get').toLowerCase() });
  }, true);
})();
</script>"#;

fn compile(pattern: &str) -> Result<Regex, AppError> {
    Regex::new(pattern).map_err(|e| AppError::Generic(format!("Invalid rewrite pattern: {e}")))
}

fn is_skipped(value: &str) -> bool {
    let lower = value.trim_start().to_ascii_lowercase();
    lower.is_empty() || SKIPPED_PREFIXES.iter().any(|p| lower.starts_with(p))
}

fn absolutize(origin: &Url, value: &str) -> Option<String> {
    if is_skipped(value) {
        return None;
    }
    origin.join(value.trim()).ok().map(String::from)
}

/// Rewrites `url(...)` and `@import "..."` references inside CSS.
struct CssRewriter {
    url_fn: Regex,
    import: Regex,
}

impl CssRewriter {
    fn new() -> Result<Self, AppError> {
        Ok(Self {
            url_fn: compile(r#"url\(\s*(['"]?)([^'")]*?)['"]?\s*\)"#)?,
            import: compile(r#"@import\s+(['"])([^'"]+)['"]"#)?,
        })
    }

    fn rewrite(&self, origin: &Url, css: &str) -> String {
        let css = self.url_fn.replace_all(css, |caps: &Captures<'_>| {
            match absolutize(origin, &caps[2]) {
                Some(abs) => format!("url({q}{abs}{q})", q = &caps[1]),
                None => caps[0].to_string(),
            }
        });
        self.import
            .replace_all(&css, |caps: &Captures<'_>| match absolutize(origin, &caps[2]) {
                Some(abs) => format!("@import {q}{abs}{q}", q = &caps[1]),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

fn has_base(html: &str) -> bool {
    let Ok(base) = Selector::parse("base[href]") else {
        return false;
    };
    Html::parse_document(html).select(&base).next().is_some()
}

/// Rewrite `html` fetched from `origin` so it renders inside an iframe.
pub fn rewrite_for_embedding(html: &str, origin: &str) -> Result<String, AppError> {
    let origin_url = Url::parse(origin)
        .map_err(|e| AppError::ValidationError(format!("Invalid origin URL '{origin}': {e}")))?;
    let css = CssRewriter::new()?;
    let has_head = compile(r"(?i)<head[\s/>]")?.is_match(html);
    let leading_doctype = compile(r"(?i)^\s*<!doctype[^>]*>")?;

    let mut head_markup = String::new();
    if !has_base(html) {
        head_markup.push_str(&format!(r#"<base href="{}">"#, origin_url.as_str()));
    }
    head_markup.push_str(PERMISSIVE_CSP);

    let injected = Cell::new(false);
    let mut output = Vec::with_capacity(html.len() + 1024);
    let mut style_buffer = String::new();

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("head", |el| {
                    if !injected.replace(true) {
                        el.prepend(&head_markup, ContentType::Html);
                        el.append(INTERCEPT_SCRIPT, ContentType::Html);
                    }
                    Ok(())
                }),
                element!("html, body", |el| {
                    if !has_head && !injected.replace(true) {
                        el.prepend(INTERCEPT_SCRIPT, ContentType::Html);
                        el.prepend(&head_markup, ContentType::Html);
                    }
                    Ok(())
                }),
                element!("meta[http-equiv]", |el| {
                    let equiv = el
                        .get_attribute("http-equiv")
                        .unwrap_or_default()
                        .to_ascii_lowercase();
                    if equiv == "x-frame-options" || equiv == "content-security-policy" {
                        el.remove();
                    }
                    Ok(())
                }),
                element!("[src], [href], [action], [data-src]", |el| {
                    for name in URL_ATTRIBUTES {
                        if let Some(value) = el.get_attribute(name)
                            && let Some(abs) = absolutize(&origin_url, &value)
                        {
                            el.set_attribute(name, &abs)?;
                        }
                    }
                    Ok(())
                }),
                element!("[style]", |el| {
                    if let Some(style) = el.get_attribute("style") {
                        el.set_attribute("style", &css.rewrite(&origin_url, &style))?;
                    }
                    Ok(())
                }),
                text!("style", |chunk| {
                    style_buffer.push_str(chunk.as_str());
                    if chunk.last_in_text_node() {
                        let rewritten = css.rewrite(&origin_url, &style_buffer);
                        style_buffer.clear();
                        chunk.replace(&rewritten, ContentType::Html);
                    } else {
                        chunk.remove();
                    }
                    Ok(())
                }),
            ],
            ..Settings::default()
        },
        |c: &[u8]| output.extend_from_slice(c),
    );

    rewriter
        .write(html.as_bytes())
        .map_err(|e| AppError::Generic(format!("HTML rewrite failed: {e}")))?;
    rewriter
        .end()
        .map_err(|e| AppError::Generic(format!("HTML rewrite failed: {e}")))?;

    let mut rewritten = String::from_utf8_lossy(&output).into_owned();
    if !injected.get() {
        let at = leading_doctype.find(&rewritten).map_or(0, |m| m.end());
        rewritten.insert_str(at, &format!("{head_markup}{INTERCEPT_SCRIPT}"));
    }
    Ok(rewritten)
}
