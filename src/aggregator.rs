use std::collections::{HashMap, HashSet};

use crate::data_models::{
    AggregatedOrganicEntry, General, NavigationTab, PageResponse, PaginationEntry,
    PaginationLink, QueryResult, RawOrganicEntry, RelatedSearch, SerpPayload,
};

/// Working state for one organic link while pages are still arriving.
struct OrganicTally {
    first: RawOrganicEntry,
    positions: Vec<u32>,
    pages: Vec<u32>,
}

impl OrganicTally {
    fn new(entry: &RawOrganicEntry, page: u32) -> OrganicTally {
        OrganicTally {
            first: entry.clone(),
            positions: vec![entry.rank],
            pages: vec![page],
        }
    }

    fn finish(self) -> AggregatedOrganicEntry {
        let frequency = self.positions.len() as u32;
        let best_position = self.positions.iter().copied().min().unwrap_or(0);
        let avg_position = mean_rounded(&self.positions);

        let mut pages_seen = self.pages;
        pages_seen.sort_unstable();
        pages_seen.dedup();

        AggregatedOrganicEntry {
            link: self.first.link,
            rank: self.first.rank,
            title: self.first.title,
            description: self.first.description,
            url: self.first.url,
            best_position,
            avg_position,
            frequency,
            pages_seen,
        }
    }
}

/// Mean of `values` rounded to two decimals; 0 for an empty slice.
pub fn mean_rounded(values: &[u32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: u64 = values.iter().map(|&v| u64::from(v)).sum();
    round2(sum as f64 / values.len() as f64)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Header fields captured from the first successful page.
struct Header {
    url: Option<String>,
    keyword: Option<String>,
    general: General,
    related: Vec<RelatedSearch>,
    people_also_ask: Vec<serde_json::Value>,
    navigation: Vec<NavigationTab>,
    language: Option<String>,
    country: Option<String>,
    aio_text: Option<String>,
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Folds the page responses of one query into a [`QueryResult`].
///
/// Owns all per-query dedup state; feed it one response at a time from a
/// single task.
pub struct QueryAggregator {
    query: String,
    header: Option<Header>,
    pagination: Vec<PaginationLink>,
    pagination_keys: HashSet<String>,
    pagination_links: HashSet<String>,
    organic: Vec<OrganicTally>,
    organic_index: HashMap<String, usize>,
    pages_ok: usize,
    pages_failed: usize,
}

impl QueryAggregator {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            header: None,
            pagination: Vec::new(),
            pagination_keys: HashSet::new(),
            pagination_links: HashSet::new(),
            organic: Vec::new(),
            organic_index: HashMap::new(),
            pages_ok: 0,
            pages_failed: 0,
        }
    }

    pub fn pages_ok(&self) -> usize {
        self.pages_ok
    }

    pub fn pages_failed(&self) -> usize {
        self.pages_failed
    }

    pub fn ingest(&mut self, page: u32, response: PageResponse) {
        let payload = match response {
            PageResponse::Success(payload) => payload,
            PageResponse::Failure(_) => {
                self.pages_failed += 1;
                return;
            }
        };
        self.pages_ok += 1;

        self.merge_pagination(&payload.pagination);
        for entry in &payload.organic {
            self.record_organic(entry, page);
        }
        if self.header.is_none() {
            self.capture_header(payload);
        }
    }

    fn capture_header(&mut self, payload: SerpPayload) {
        let mut general = payload.general;
        if general.query.as_deref().is_none_or(str::is_empty) {
            general.query = Some(self.query.clone());
        }
        self.header = Some(Header {
            url: payload.url,
            keyword: payload.keyword,
            general,
            related: payload.related,
            people_also_ask: payload.people_also_ask,
            navigation: payload.navigation,
            language: payload.language,
            country: payload.country,
            aio_text: payload.aio_text,
            extra: payload.extra,
        });
    }

    fn merge_pagination(&mut self, entries: &[PaginationEntry]) {
        for entry in entries {
            match entry {
                PaginationEntry::Link(link) => {
                    if link.page.is_empty() || self.pagination_keys.contains(&link.page) {
                        continue;
                    }
                    if let Some(href) = &link.link {
                        self.pagination_links.insert(href.clone());
                    }
                    self.pagination_keys.insert(link.page.clone());
                    self.pagination.push(link.clone());
                }
                PaginationEntry::Bare(href) => {
                    if href.is_empty() || self.pagination_links.contains(href) {
                        continue;
                    }
                    let key = (self.pagination.len() + 1).to_string();
                    if self.pagination_keys.contains(&key) {
                        continue;
                    }
                    self.pagination_links.insert(href.clone());
                    self.pagination_keys.insert(key.clone());
                    self.pagination
                        .push(PaginationLink::new(key, Some(href.clone())));
                }
            }
        }
    }

    fn record_organic(&mut self, entry: &RawOrganicEntry, page: u32) {
        if entry.link.is_empty() {
            return;
        }
        match self.organic_index.get(&entry.link) {
            Some(&idx) => {
                let tally = &mut self.organic[idx];
                tally.positions.push(entry.rank);
                tally.pages.push(page);
            }
            None => {
                self.organic_index
                    .insert(entry.link.clone(), self.organic.len());
                self.organic.push(OrganicTally::new(entry, page));
            }
        }
    }

    /// Freezes the aggregate: computes per-link statistics and sorts.
    pub fn finish(self) -> QueryResult {
        let mut organic: Vec<AggregatedOrganicEntry> =
            self.organic.into_iter().map(OrganicTally::finish).collect();
        // stable: ties keep first-seen order
        organic.sort_by_key(|e| e.best_position);

        let mut pagination = self.pagination;
        pagination.sort_by_key(|p| match p.page_number() {
            Some(n) => (0, n),
            None => (1, 0),
        });

        let mut result = match self.header {
            Some(h) => QueryResult {
                url: h.url,
                keyword: h.keyword,
                general: h.general,
                related: h.related,
                people_also_ask: h.people_also_ask,
                navigation: h.navigation,
                language: h.language,
                country: h.country,
                aio_text: h.aio_text,
                extra: h.extra,
                ..Default::default()
            },
            None => QueryResult {
                general: General {
                    query: Some(self.query),
                    ..Default::default()
                },
                ..Default::default()
            },
        };
        result.organic = organic;
        result.pagination = pagination;
        result
    }
}
