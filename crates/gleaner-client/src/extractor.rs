//! Selector-driven and semantic extraction over a parsed DOM.

use gleaner_core::error::AppError;
use gleaner_core::models::{
    Article, ExtractedRecord, ExtractionMode, FetchedPage, FieldValue, ScrapeOptions,
    Selector as FieldSelector, SelectorKind,
};
use gleaner_core::traits::Extractor;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::cleaner::{HtmdCleaner, summarize};

/// Containers treated as article-like by semantic extraction.
const ARTICLE_CONTAINERS: &str =
    "article, main, [role='main'], .post, .entry-content, .article-body";

const HEADINGS: &str = "h1, h2, h3";

/// Extraction engine backed by the `scraper` crate (html5ever + CSS selectors).
#[derive(Debug, Clone, Default)]
pub struct ScraperExtractor;

impl ScraperExtractor {
    pub fn new() -> Self {
        Self
    }
}

fn parse_selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| AppError::SelectorError(format!("'{css}': {e}")))
}

fn trimmed_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn collapsed_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Value for one selector, or `None` when nothing matched.
fn extract_field(document: &Html, selector: &FieldSelector) -> Result<Option<FieldValue>, AppError> {
    let css = parse_selector(&selector.selector)?;

    if selector.kind == SelectorKind::List {
        let items: Vec<String> = document.select(&css).map(trimmed_text).collect();
        return Ok((!items.is_empty()).then_some(FieldValue::List(items)));
    }

    let Some(first) = document.select(&css).next() else {
        return Ok(None);
    };
    let value = match &selector.kind {
        SelectorKind::Text => Some(trimmed_text(first)),
        SelectorKind::Html => Some(first.inner_html()),
        SelectorKind::Attribute { attribute } => first.value().attr(attribute).map(str::to_string),
        SelectorKind::Image => first.value().attr("src").map(str::to_string),
        SelectorKind::Link => first.value().attr("href").map(str::to_string),
        SelectorKind::List => None,
    };
    Ok(value.map(FieldValue::Text))
}

fn semantic_tables(document: &Html) -> Vec<Vec<Vec<String>>> {
    let (Ok(tables), Ok(rows), Ok(cells)) = (
        parse_selector("table"),
        parse_selector("tr"),
        parse_selector("th, td"),
    ) else {
        return Vec::new();
    };

    document
        .select(&tables)
        .map(|table| {
            table
                .select(&rows)
                .map(|row| row.select(&cells).map(collapsed_text).collect::<Vec<_>>())
                .filter(|row| !row.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|table| !table.is_empty())
        .collect()
}

fn semantic_lists(document: &Html) -> Vec<Vec<String>> {
    let Ok(lists) = parse_selector("ul, ol") else {
        return Vec::new();
    };

    document
        .select(&lists)
        .map(|list| {
            list.children()
                .filter_map(ElementRef::wrap)
                .filter(|child| child.value().name() == "li")
                .map(collapsed_text)
                .collect::<Vec<_>>()
        })
        .filter(|items| !items.is_empty())
        .collect()
}

fn semantic_articles(document: &Html) -> Vec<Article> {
    let (Ok(containers), Ok(headings)) =
        (parse_selector(ARTICLE_CONTAINERS), parse_selector(HEADINGS))
    else {
        return Vec::new();
    };

    document
        .select(&containers)
        .filter_map(|container| {
            let content = collapsed_text(container);
            if content.is_empty() {
                return None;
            }
            let heading = container
                .select(&headings)
                .next()
                .map(collapsed_text)
                .filter(|h| !h.is_empty());
            Some(Article { heading, content })
        })
        .collect()
}

fn some_if_nonempty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

fn resolve_http(base: &Url, href: &str) -> Option<String> {
    let resolved = base.join(href.trim()).ok()?;
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

impl Extractor for ScraperExtractor {
    fn extract(
        &self,
        page: &FetchedPage,
        selectors: &[FieldSelector],
        options: &ScrapeOptions,
    ) -> ExtractedRecord {
        let document = Html::parse_document(&page.html);
        let mut record = ExtractedRecord::new();

        for selector in selectors {
            match extract_field(&document, selector) {
                Ok(Some(value)) => record.insert(selector.key(), value),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(url = %page.url, selector = %selector.selector, error = %e, "Selector skipped");
                }
            }
        }

        match options.extraction_mode {
            ExtractionMode::Raw => {}
            ExtractionMode::Semantic => {
                record.tables = some_if_nonempty(semantic_tables(&document));
                record.lists = some_if_nonempty(semantic_lists(&document));
                record.articles = some_if_nonempty(semantic_articles(&document));
            }
            ExtractionMode::Cleaned | ExtractionMode::Vectorized => {
                let cleaner = HtmdCleaner::for_format(&options.format_options);
                match cleaner.clean(&page.html) {
                    Ok(content) => {
                        if options.format_options.summarize {
                            record.insert("summary", FieldValue::Text(summarize(&content)));
                        }
                        record.insert("content", FieldValue::Text(content));
                    }
                    Err(e) => tracing::warn!(url = %page.url, error = %e, "Content cleaning failed"),
                }
            }
        }

        record
    }

    fn links(&self, html: &str, base_url: &str) -> Vec<String> {
        let (Ok(base), Ok(anchors)) = (Url::parse(base_url), parse_selector("a[href]")) else {
            return Vec::new();
        };
        let document = Html::parse_document(html);
        document
            .select(&anchors)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| resolve_http(&base, href))
            .collect()
    }

    fn next_page(&self, html: &str, base_url: &str, selector: &str) -> Option<String> {
        let base = Url::parse(base_url).ok()?;
        let css = match parse_selector(selector) {
            Ok(css) => css,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid pagination selector");
                return None;
            }
        };
        let document = Html::parse_document(html);
        let href = document.select(&css).next()?.value().attr("href")?;
        resolve_http(&base, href)
    }
}

#[cfg(test)]
mod tests {
    use gleaner_core::models::{FetchStrategy, FormatOptions};

    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <header><nav>Menu</nav></header>
          <h1>  Product Title </h1>
          <div class="desc"><b>Bold</b> text</div>
          <img class="hero" src="/hero.png">
          <a class="more" href="/more">More</a>
          <ul class="tags"><li>red</li><li> blue </li></ul>
          <span data-sku="A-1" class="sku">sku</span>
          <table><tr><th>Name</th><th>Qty</th></tr><tr><td>Bolt</td><td>4</td></tr></table>
          <article><h2>News</h2><p>Something   happened today.</p></article>
        </body></html>
    "#;

    fn page(html: &str) -> FetchedPage {
        FetchedPage::new("https://shop.example/items/1", html, FetchStrategy::Static)
    }

    fn extract(selectors: &[FieldSelector], options: &ScrapeOptions) -> ExtractedRecord {
        ScraperExtractor::new().extract(&page(PAGE), selectors, options)
    }

    #[test]
    fn test_selector_types() {
        let selectors = vec![
            FieldSelector::text("h1").named("title"),
            FieldSelector::new(".desc", SelectorKind::Html),
            FieldSelector::new(".hero", SelectorKind::Image).named("image"),
            FieldSelector::new("a.more", SelectorKind::Link).named("link"),
            FieldSelector::list(".tags li").named("tags"),
            FieldSelector::attribute(".sku", "data-sku").named("sku"),
        ];
        let record = extract(&selectors, &ScrapeOptions::default());

        assert_eq!(record.get("title").unwrap().as_text(), Some("Product Title"));
        assert_eq!(record.get(".desc").unwrap().as_text(), Some("<b>Bold</b> text"));
        assert_eq!(record.get("image").unwrap().as_text(), Some("/hero.png"));
        assert_eq!(record.get("link").unwrap().as_text(), Some("/more"));
        assert_eq!(
            record.get("tags").unwrap().as_list().unwrap(),
            &["red".to_string(), "blue".to_string()]
        );
        assert_eq!(record.get("sku").unwrap().as_text(), Some("A-1"));
        assert!(record.tables.is_none());
    }

    #[test]
    fn test_missing_matches_are_omitted() {
        let selectors = vec![
            FieldSelector::text(".absent").named("absent"),
            FieldSelector::list(".absent li").named("none"),
            FieldSelector::attribute("h1", "data-missing").named("attr"),
        ];
        let record = extract(&selectors, &ScrapeOptions::default());
        assert!(record.is_empty());
    }

    #[test]
    fn test_invalid_selector_does_not_abort() {
        let selectors = vec![
            FieldSelector::text("h1[").named("broken"),
            FieldSelector::text("h1").named("title"),
        ];
        let record = extract(&selectors, &ScrapeOptions::default());
        assert!(record.get("broken").is_none());
        assert_eq!(record.get("title").unwrap().as_text(), Some("Product Title"));
    }

    #[test]
    fn test_semantic_mode_is_additive() {
        let options = ScrapeOptions {
            extraction_mode: ExtractionMode::Semantic,
            ..Default::default()
        };
        let record = extract(&[FieldSelector::text("h1").named("title")], &options);

        assert!(record.get("title").is_some());
        assert_eq!(
            record.tables.unwrap(),
            vec![vec![
                vec!["Name".to_string(), "Qty".to_string()],
                vec!["Bolt".to_string(), "4".to_string()],
            ]]
        );
        assert_eq!(
            record.lists.unwrap(),
            vec![vec!["red".to_string(), "blue".to_string()]]
        );
        let articles = record.articles.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].heading.as_deref(), Some("News"));
        assert_eq!(articles[0].content, "News Something happened today.");
    }

    #[test]
    fn test_cleaned_mode_adds_content_and_summary() {
        let options = ScrapeOptions {
            extraction_mode: ExtractionMode::Cleaned,
            format_options: FormatOptions {
                skip_headers: true,
                summarize: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let record = extract(&[], &options);

        let content = record.get("content").unwrap().as_text().unwrap();
        assert!(content.contains("Product Title"));
        assert!(!content.contains("Menu"));
        let summary = record.get("summary").unwrap().as_text().unwrap();
        assert!(summary.chars().count() <= crate::cleaner::SUMMARY_MAX_CHARS);
    }

    #[test]
    fn test_links_are_absolute_http_only() {
        let html = r##"
            <a href="/a">a</a>
            <a href="b?x=1">b</a>
            <a href="https://other.example/c#top">c</a>
            <a href="mailto:me@example.com">mail</a>
            <a href="javascript:void(0)">js</a>
        "##;
        let links = ScraperExtractor::new().links(html, "https://site.example/dir/page");
        assert_eq!(
            links,
            vec![
                "https://site.example/a",
                "https://site.example/dir/b?x=1",
                "https://other.example/c#top",
            ]
        );
    }

    #[test]
    fn test_next_page() {
        let html = r#"<a class="next" href="?page=2">Next</a><a class="next" href="?page=9">Last</a>"#;
        let extractor = ScraperExtractor::new();
        assert_eq!(
            extractor.next_page(html, "https://site.example/list?page=1", "a.next"),
            Some("https://site.example/list?page=2".to_string())
        );
        assert_eq!(
            extractor.next_page(html, "https://site.example/list", ".missing"),
            None
        );
        assert_eq!(extractor.next_page(html, "https://site.example/", "a["), None);
    }
}
