use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PageError;

/// Results per SERP page; page `n` starts at offset `(n - 1) * RESULTS_PER_PAGE`.
pub const RESULTS_PER_PAGE: u32 = 10;

/// Query-string fallback when a result carries no originating query.
pub const UNKNOWN_QUERY: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub query: String,
    pub page: u32,
}

impl PageRequest {
    /// Pages are 1-based; anything lower is clamped to the first page.
    pub fn new(query: impl Into<String>, page: u32) -> PageRequest {
        PageRequest {
            query: query.into(),
            page: page.max(1),
        }
    }

    /// Saturates at `u32::MAX` rather than wrapping.
    pub fn offset(&self) -> u32 {
        (self.page - 1).saturating_mul(RESULTS_PER_PAGE)
    }
}

/// Outcome of one page exchange. Consumed once by the aggregator.
#[derive(Debug, Clone)]
pub enum PageResponse {
    Success(SerpPayload),
    Failure(PageError),
}

impl PageResponse {
    pub fn organic_count(&self) -> usize {
        match self {
            PageResponse::Success(payload) => payload.organic.len(),
            PageResponse::Failure(_) => 0,
        }
    }

    /// A failure or a page without organic results.
    pub fn is_empty(&self) -> bool {
        self.organic_count() == 0
    }
}

/// Body of a successful poll, as returned by the SERP API.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct SerpPayload {
    pub url: Option<String>,
    pub keyword: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub general: General,
    #[serde(deserialize_with = "null_as_default")]
    pub related: Vec<RelatedSearch>,
    #[serde(deserialize_with = "null_as_default")]
    pub pagination: Vec<PaginationEntry>,
    #[serde(deserialize_with = "null_as_default")]
    pub organic: Vec<RawOrganicEntry>,
    #[serde(deserialize_with = "null_as_default")]
    pub people_also_ask: Vec<Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub navigation: Vec<NavigationTab>,
    pub language: Option<String>,
    pub country: Option<String>,
    pub aio_text: Option<String>,
    /// Top-level keys we don't model, e.g. `page_html`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Treats an explicit `null` like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// SERP metadata block. Keys we don't model are carried through untouched.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct General {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RelatedSearch {
    #[serde(deserialize_with = "null_as_default")]
    pub text: String,
    pub link: Option<String>,
    pub rank: Option<u32>,
}

/// Pagination links arrive either shaped or as a bare URL.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum PaginationEntry {
    Link(PaginationLink),
    Bare(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PaginationLink {
    #[serde(deserialize_with = "page_key")]
    pub page: String,
    pub link: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PaginationLink {
    pub fn new(page: impl Into<String>, link: Option<String>) -> PaginationLink {
        PaginationLink {
            page: page.into(),
            link,
            extra: Map::new(),
        }
    }

    /// Numeric page number, `None` when the key isn't a number.
    pub fn page_number(&self) -> Option<u64> {
        self.page.trim().parse().ok()
    }
}

fn page_key<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(de::Error::custom(format!("invalid page key: {other}"))),
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct NavigationTab {
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RawOrganicEntry {
    #[serde(deserialize_with = "null_as_default")]
    pub link: String,
    #[serde(deserialize_with = "null_as_default")]
    pub rank: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    pub description: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub url: String,
}

/// One organic link after deduplication across the pages of a query.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AggregatedOrganicEntry {
    #[serde(deserialize_with = "null_as_default")]
    pub link: String,
    /// Rank at first sighting.
    #[serde(deserialize_with = "null_as_default")]
    pub rank: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    pub description: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub best_position: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub avg_position: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub frequency: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub pages_seen: Vec<u32>,
}

/// The finalized, ranked result of fetching every page of one query.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct QueryResult {
    pub url: Option<String>,
    pub keyword: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub general: General,
    #[serde(deserialize_with = "null_as_default")]
    pub related: Vec<RelatedSearch>,
    #[serde(deserialize_with = "null_as_default")]
    pub pagination: Vec<PaginationLink>,
    #[serde(deserialize_with = "null_as_default")]
    pub organic: Vec<AggregatedOrganicEntry>,
    #[serde(deserialize_with = "null_as_default")]
    pub people_also_ask: Vec<Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub navigation: Vec<NavigationTab>,
    pub language: Option<String>,
    pub country: Option<String>,
    pub aio_text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QueryResult {
    /// The originating query, or [`UNKNOWN_QUERY`].
    pub fn query(&self) -> &str {
        match self.general.query.as_deref() {
            Some(q) if !q.is_empty() => q,
            _ => UNKNOWN_QUERY,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CrossQueryOrganicEntry {
    /// `frequency` here is the sum of the per-query frequencies.
    #[serde(flatten)]
    pub entry: AggregatedOrganicEntry,
    pub queries: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MergedRelated {
    pub text: String,
    pub link: Option<String>,
    pub rank: Option<u32>,
    pub queries: Vec<String>,
    pub frequency: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DatetimeRange {
    pub earliest: Option<String>,
    pub latest: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MergedGeneral {
    /// One entry per merged result, in processing order.
    pub queries: Vec<String>,
    pub datetime_range: DatetimeRange,
    pub language: Option<String>,
    pub location: Option<String>,
    pub search_engine: String,
    pub search_type: String,
}

impl Default for MergedGeneral {
    fn default() -> Self {
        MergedGeneral {
            queries: Vec::new(),
            datetime_range: DatetimeRange::default(),
            language: None,
            location: None,
            search_engine: "google".to_string(),
            search_type: "text".to_string(),
        }
    }
}

/// A batch of query results folded into one.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MergedResult {
    pub url: Option<String>,
    pub keyword: Option<String>,
    pub general: MergedGeneral,
    pub related: Vec<MergedRelated>,
    pub organic: Vec<CrossQueryOrganicEntry>,
    pub people_also_ask: Vec<Value>,
    pub navigation: Vec<NavigationTab>,
    pub language: Option<String>,
    pub country: Option<String>,
    /// Distinct AI-overview texts in first-seen order.
    pub aio_text: Vec<String>,
}
