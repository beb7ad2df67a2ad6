//! Fetches paginated SERP results from a submit/poll search API and folds
//! them into deduplicated, ranked aggregates, per query and across queries.

pub mod aggregator;
pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod data_models;
pub mod error;
pub mod exchange;
pub mod fetcher;
pub mod merger;
pub mod output;

pub use client::{BrightDataClient, PollStatus, SerpApi};
pub use config::{Config, FetchSettings};
pub use data_models::{MergedResult, PageResponse, QueryResult};
pub use error::{ApiError, PageError};
pub use fetcher::fetch_query;
pub use merger::merge_queries;
