use std::collections::{BTreeSet, HashMap, HashSet};

use serde_json::Value;

use crate::aggregator::mean_rounded;
use crate::data_models::{
    AggregatedOrganicEntry, CrossQueryOrganicEntry, DatetimeRange, MergedGeneral, MergedRelated,
    MergedResult, NavigationTab, QueryResult,
};

/// People-also-ask entries sharing this many leading characters are duplicates.
pub const PAA_KEY_CHARS: usize = 100;

struct CrossTally {
    first: AggregatedOrganicEntry,
    positions: Vec<u32>,
    pages: Vec<u32>,
    queries: BTreeSet<String>,
    frequency: u32,
}

impl CrossTally {
    fn finish(self) -> CrossQueryOrganicEntry {
        let positive: Vec<u32> = self.positions.into_iter().filter(|&p| p > 0).collect();
        let mut pages_seen = self.pages;
        pages_seen.sort_unstable();
        pages_seen.dedup();

        CrossQueryOrganicEntry {
            entry: AggregatedOrganicEntry {
                best_position: positive.iter().copied().min().unwrap_or(0),
                avg_position: mean_rounded(&positive),
                frequency: self.frequency,
                pages_seen,
                ..self.first
            },
            queries: self.queries.into_iter().collect(),
        }
    }
}

struct RelatedTally {
    related: MergedRelated,
    queries: BTreeSet<String>,
}

/// Folds a batch of query results into one [`MergedResult`].
#[derive(Default)]
pub struct CrossQueryMerger {
    merged: MergedResult,
    seen_first: bool,
    organic: Vec<CrossTally>,
    organic_index: HashMap<String, usize>,
    related: Vec<RelatedTally>,
    related_index: HashMap<String, usize>,
    paa_keys: HashSet<String>,
    nav_titles: HashSet<String>,
    datetimes: Vec<String>,
    skipped: usize,
}

impl CrossQueryMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Input entries dropped for missing their dedup key.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn add(&mut self, result: &QueryResult) {
        let query = result.query().to_string();
        self.merged.general.queries.push(query.clone());

        if !self.seen_first {
            self.seen_first = true;
            self.merged.url = result.url.clone();
            self.merged.keyword = result.keyword.clone();
            self.merged.language = result.language.clone();
            self.merged.country = result.country.clone();
            self.merged.general.language = result.general.language.clone();
            self.merged.general.location = result.general.location.clone();
        }

        if let Some(dt) = result.general.datetime.as_deref().filter(|d| !d.is_empty()) {
            self.datetimes.push(dt.to_string());
        }

        if let Some(aio) = result.aio_text.as_deref().filter(|a| !a.is_empty()) {
            if !self.merged.aio_text.iter().any(|seen| seen == aio) {
                self.merged.aio_text.push(aio.to_string());
            }
        }

        for entry in &result.organic {
            self.add_organic(entry, &query);
        }
        for related in &result.related {
            if related.text.is_empty() {
                self.skipped += 1;
                continue;
            }
            match self.related_index.get(&related.text) {
                Some(&idx) => {
                    let tally = &mut self.related[idx];
                    tally.queries.insert(query.clone());
                    tally.related.frequency += 1;
                }
                None => {
                    self.related_index
                        .insert(related.text.clone(), self.related.len());
                    self.related.push(RelatedTally {
                        related: MergedRelated {
                            text: related.text.clone(),
                            link: related.link.clone(),
                            rank: related.rank,
                            queries: Vec::new(),
                            frequency: 1,
                        },
                        queries: BTreeSet::from([query.clone()]),
                    });
                }
            }
        }
        for paa in &result.people_also_ask {
            if self.paa_keys.insert(paa_key(paa)) {
                self.merged.people_also_ask.push(paa.clone());
            }
        }
        for nav in &result.navigation {
            self.add_navigation(nav);
        }
    }

    fn add_organic(&mut self, entry: &AggregatedOrganicEntry, query: &str) {
        if entry.link.is_empty() {
            self.skipped += 1;
            return;
        }
        match self.organic_index.get(&entry.link) {
            Some(&idx) => {
                let tally = &mut self.organic[idx];
                tally.positions.push(entry.best_position);
                tally.pages.extend_from_slice(&entry.pages_seen);
                tally.queries.insert(query.to_string());
                tally.frequency += entry.frequency;
            }
            None => {
                self.organic_index
                    .insert(entry.link.clone(), self.organic.len());
                self.organic.push(CrossTally {
                    first: entry.clone(),
                    positions: vec![entry.best_position],
                    pages: entry.pages_seen.clone(),
                    queries: BTreeSet::from([query.to_string()]),
                    frequency: entry.frequency,
                });
            }
        }
    }

    fn add_navigation(&mut self, nav: &NavigationTab) {
        if nav.title.is_empty() {
            self.skipped += 1;
            return;
        }
        if self.nav_titles.insert(nav.title.clone()) {
            self.merged.navigation.push(nav.clone());
        }
    }

    pub fn finish(self) -> MergedResult {
        let mut merged = self.merged;

        merged.organic = self.organic.into_iter().map(CrossTally::finish).collect();
        merged.organic.sort_by_key(|e| e.entry.best_position);

        merged.related = self
            .related
            .into_iter()
            .map(|tally| MergedRelated {
                queries: tally.queries.into_iter().collect(),
                ..tally.related
            })
            .collect();
        merged.related.sort_by(|a, b| b.frequency.cmp(&a.frequency));

        // Plain string ordering: assumes one ISO-8601 layout and timezone.
        merged.general.datetime_range = DatetimeRange {
            earliest: self.datetimes.iter().min().cloned(),
            latest: self.datetimes.iter().max().cloned(),
        };

        merged
    }
}

fn paa_key(entry: &Value) -> String {
    let text = match entry {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.chars().take(PAA_KEY_CHARS).collect()
}

/// Merges a batch of query results, in order.
pub fn merge_queries(results: &[QueryResult]) -> MergedResult {
    let mut merger = CrossQueryMerger::new();
    for result in results {
        merger.add(result);
    }
    if merger.skipped() > 0 {
        tracing::warn!(skipped = merger.skipped(), "skipped entries without a dedup key");
    }
    let merged = merger.finish();

    tracing::info!(
        queries = results.len(),
        organic = merged.organic.len(),
        related = merged.related.len(),
        people_also_ask = merged.people_also_ask.len(),
        navigation = merged.navigation.len(),
        "merged query results"
    );
    merged
}

/// Keys a batch by query; a later result for the same query replaces the
/// earlier one but keeps its position.
pub fn index_by_query(results: Vec<QueryResult>) -> Vec<QueryResult> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<QueryResult> = Vec::new();
    for result in results {
        match positions.get(result.query()) {
            Some(&idx) => out[idx] = result,
            None => {
                positions.insert(result.query().to_string(), out.len());
                out.push(result);
            }
        }
    }
    out
}

/// Ordering applied to organic lists before output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum OrganicOrder {
    #[default]
    BestPosition,
    Frequency,
    AvgPosition,
}

/// Access to the ranking fields shared by per-query and merged entries.
pub trait Ranked {
    fn stats(&self) -> &AggregatedOrganicEntry;
}

impl Ranked for AggregatedOrganicEntry {
    fn stats(&self) -> &AggregatedOrganicEntry {
        self
    }
}

impl Ranked for CrossQueryOrganicEntry {
    fn stats(&self) -> &AggregatedOrganicEntry {
        &self.entry
    }
}

/// Stable re-sort, then drop entries below `min_frequency`, then keep the
/// first `limit`. Zero disables either filter.
pub fn refine<T: Ranked>(entries: &mut Vec<T>, order: OrganicOrder, min_frequency: u32, limit: usize) {
    match order {
        OrganicOrder::BestPosition => entries.sort_by_key(|e| e.stats().best_position),
        OrganicOrder::Frequency => entries.sort_by(|a, b| b.stats().frequency.cmp(&a.stats().frequency)),
        OrganicOrder::AvgPosition => {
            entries.sort_by(|a, b| a.stats().avg_position.total_cmp(&b.stats().avg_position))
        }
    }
    if min_frequency > 0 {
        entries.retain(|e| e.stats().frequency >= min_frequency);
    }
    if limit > 0 {
        entries.truncate(limit);
    }
}
