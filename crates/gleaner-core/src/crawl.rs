//! Pagination and breadth-first link discovery.
//!
//! Both walks run on explicit work lists rather than recursion: pagination
//! follows a single "next" chain, discovery drains a FIFO frontier of
//! `(url, depth)` pairs against a visited set that only ever grows.

use std::collections::btree_map::Entry;
use std::collections::{HashSet, VecDeque};

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;
use crate::job::validate_target_url;
use crate::models::{ExtractedRecord, FetchedPage, FieldValue, ScrapeOptions, Selector};
use crate::traits::{Extractor, Fetcher};

/// Options for a discovery run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoveryOptions {
    /// Pages at this depth are reported but not expanded.
    pub max_depth: u32,
    /// Upper bound on discovered URLs, seed included.
    pub max_urls: usize,
    /// Regular expressions; a link is kept if any of them matches.
    pub include_patterns: Vec<String>,
    pub same_origin: bool,
    /// Fetch options for reading each page's link set.
    pub options: ScrapeOptions,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_urls: 100,
            include_patterns: Vec::new(),
            same_origin: true,
            options: ScrapeOptions::default(),
        }
    }
}

/// Canonical form used for visited-set membership: http(s) only, no fragment.
pub fn canonical_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

/// Merge a later page's record into an earlier one.
///
/// Lists concatenate in page order, nested maps merge key by key, and a
/// scalar already present keeps the earlier page's value. Semantic sections
/// concatenate.
pub fn merge_records(base: &mut ExtractedRecord, next: ExtractedRecord) {
    for (key, value) in next.fields {
        match base.fields.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(mut slot) => merge_value(slot.get_mut(), value),
        }
    }
    concat_section(&mut base.tables, next.tables);
    concat_section(&mut base.lists, next.lists);
    concat_section(&mut base.articles, next.articles);
}

fn merge_value(existing: &mut FieldValue, incoming: FieldValue) {
    match (existing, incoming) {
        (FieldValue::List(items), FieldValue::List(more)) => items.extend(more),
        (FieldValue::Map(map), FieldValue::Map(more)) => {
            for (key, value) in more {
                match map.entry(key) {
                    Entry::Vacant(slot) => {
                        slot.insert(value);
                    }
                    Entry::Occupied(mut slot) => merge_value(slot.get_mut(), value),
                }
            }
        }
        _ => {}
    }
}

fn concat_section<T>(base: &mut Option<Vec<T>>, next: Option<Vec<T>>) {
    if let Some(more) = next {
        base.get_or_insert_with(Vec::new).extend(more);
    }
}

/// Follows pagination chains and expands discovery frontiers.
#[derive(Clone)]
pub struct CrawlController<F, E>
where
    F: Fetcher,
    E: Extractor,
{
    fetcher: F,
    extractor: E,
}

impl<F, E> CrawlController<F, E>
where
    F: Fetcher,
    E: Extractor,
{
    pub fn new(fetcher: F, extractor: E) -> Self {
        Self { fetcher, extractor }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    /// Follow the pagination selector from `first`, merging each page's
    /// record into `record`.
    ///
    /// Stops after `max_pages` pages in total, when no next link exists, when
    /// the next link points back at a page already read, or when a later page
    /// fails to fetch (the pages merged so far are kept).
    pub async fn paginate(
        &self,
        first: &FetchedPage,
        mut record: ExtractedRecord,
        selectors: &[Selector],
        options: &ScrapeOptions,
    ) -> ExtractedRecord {
        let Some(next_selector) = options.pagination_target() else {
            return record;
        };

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(canonical_url(&first.url).unwrap_or_else(|| first.url.clone()));
        let mut current_url = first.url.clone();
        let mut current_html = first.html.clone();

        for page_number in 2..=options.max_pages {
            let Some(next) =
                self.extractor
                    .next_page(&current_html, &current_url, next_selector)
            else {
                tracing::debug!(url = %current_url, "No next page link");
                break;
            };
            let key = canonical_url(&next).unwrap_or_else(|| next.clone());
            if !visited.insert(key) {
                tracing::debug!(url = %next, "Pagination cycle detected");
                break;
            }

            let page = match self.fetcher.fetch(&next, options).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(url = %next, page = page_number, error = %e, "Pagination fetch failed, keeping merged pages");
                    break;
                }
            };
            tracing::info!(url = %page.url, page = page_number, "Fetched next page");

            let page_record = self.extractor.extract(&page, selectors, options);
            merge_records(&mut record, page_record);
            // Redirects may land on a page already read.
            if let Some(landed) = canonical_url(&page.url) {
                visited.insert(landed);
            }
            current_url = page.url;
            current_html = page.html;
        }

        record
    }

    /// Breadth-first discovery of URLs reachable from `seed`.
    ///
    /// Returns the seed followed by every newly seen link in discovery order.
    /// Pages that fail to fetch are skipped.
    pub async fn discover(
        &self,
        seed: &str,
        discovery: &DiscoveryOptions,
    ) -> Result<Vec<String>, AppError> {
        let seed_url = validate_target_url(seed)?;
        discovery.options.validate()?;
        let patterns = discovery
            .include_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    AppError::ValidationError(format!("Invalid include pattern '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if discovery.max_urls == 0 {
            return Ok(Vec::new());
        }

        let origin = seed_url.origin();
        let seed = canonical_url(seed_url.as_str()).unwrap_or_else(|| seed_url.to_string());

        let mut discovered = vec![seed.clone()];
        let mut visited: HashSet<String> = HashSet::from([seed.clone()]);
        let mut frontier: VecDeque<(String, u32)> = VecDeque::from([(seed, 0)]);

        'frontier: while let Some((url, depth)) = frontier.pop_front() {
            if discovered.len() >= discovery.max_urls {
                break;
            }
            if depth >= discovery.max_depth {
                continue;
            }

            let page = match self.fetcher.fetch(&url, &discovery.options).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(%url, error = %e, "Discovery fetch failed, skipping");
                    continue;
                }
            };
            if let Some(landed) = canonical_url(&page.url) {
                visited.insert(landed);
            }

            for link in self.extractor.links(&page.html, &page.url) {
                let Some(link) = canonical_url(&link) else {
                    continue;
                };
                if discovery.same_origin
                    && Url::parse(&link).map(|u| u.origin()).ok().as_ref() != Some(&origin)
                {
                    continue;
                }
                if !patterns.is_empty() && !patterns.iter().any(|re| re.is_match(&link)) {
                    continue;
                }
                if !visited.insert(link.clone()) {
                    continue;
                }

                discovered.push(link.clone());
                if discovered.len() >= discovery.max_urls {
                    break 'frontier;
                }
                frontier.push_back((link, depth + 1));
            }
        }

        tracing::info!(seed = %seed_url, discovered = discovered.len(), "Discovery finished");
        Ok(discovered)
    }
}
