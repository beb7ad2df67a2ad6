use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::aggregator::round2;
use crate::api::{AppState, create_router};
use crate::client::BrightDataClient;
use crate::config::{Config, MAX_PAGES_LIMIT};
use crate::data_models::QueryResult;
use crate::fetcher::fetch_query;
use crate::merger::{OrganicOrder, index_by_query, merge_queries, refine};
use crate::output::{OutputFormat, read_query_results, write_merged, write_ndjson_line, write_query_results};

/// Pause between sequential queries so the API isn't hammered.
const QUERY_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(name = "serp-aggregator", version, about = "Fetch, deduplicate and merge paginated SERP results")]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch queries one after another, one NDJSON result per line on stdout
    Fetch(FetchArgs),
    /// Post-process NDJSON results from stdin, optionally merging across queries
    Dedup(DedupArgs),
    /// Fetch queries concurrently and report timings
    Parallel(ParallelArgs),
    /// Serve the search API and static UI
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// File with one query per line (stdin when omitted)
    #[arg(short, long)]
    pub file: Option<PathBuf>,
    /// Maximum pages per query
    #[arg(short = 'p', long, value_parser = clap::value_parser!(u32).range(1..=MAX_PAGES_LIMIT as i64))]
    pub max_pages: Option<u32>,
    /// Maximum concurrent page requests per query
    #[arg(short, long)]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Args)]
pub struct DedupArgs {
    /// Merge all queries into a single result
    #[arg(short = 'x', long)]
    pub cross_query: bool,
    #[arg(short, long, value_enum, default_value_t = OrganicOrder::BestPosition)]
    pub sort_by: OrganicOrder,
    /// Keep only the top N organic results (0 = all)
    #[arg(short, long, default_value_t = 0)]
    pub limit: usize,
    /// Drop organic results seen fewer times than this (0 = no filter)
    #[arg(short, long, default_value_t = 0)]
    pub min_frequency: u32,
    #[arg(short = 'o', long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Json,
    Summary,
}

#[derive(Debug, Args)]
pub struct ParallelArgs {
    /// Queries to run
    #[arg(short, long, num_args = 1..)]
    pub queries: Vec<String>,
    /// File with one query per line
    #[arg(short, long)]
    pub file: Option<PathBuf>,
    #[arg(short = 'p', long, value_parser = clap::value_parser!(u32).range(1..=MAX_PAGES_LIMIT as i64))]
    pub max_pages: Option<u32>,
    #[arg(short, long)]
    pub concurrency: Option<usize>,
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Json)]
    pub output: ReportFormat,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(short, long, default_value_t = 8000)]
    pub port: u16,
    /// Directory served for non-API paths
    #[arg(long, default_value = "static")]
    pub static_dir: PathBuf,
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Fetch(args) => run_fetch(&Config::from_env()?, args).await,
        Command::Dedup(args) => run_dedup(args),
        Command::Parallel(args) => run_parallel(&Config::from_env()?, args).await,
        Command::Serve(args) => run_serve(&Config::from_env()?, args).await,
    }
}

fn parse_queries<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let mut queries = Vec::new();
    for line in reader.lines() {
        let line = line.context("failed to read queries")?;
        let line = line.trim();
        if !line.is_empty() {
            queries.push(line.to_string());
        }
    }
    Ok(queries)
}

fn read_queries(file: Option<&Path>) -> Result<Vec<String>> {
    let queries = match file {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            parse_queries(text.as_bytes())?
        }
        None => {
            let stdin = io::stdin();
            if stdin.is_terminal() {
                bail!("no input provided: pipe queries on stdin or pass --file");
            }
            parse_queries(stdin.lock())?
        }
    };
    if queries.is_empty() {
        bail!("no queries provided");
    }
    Ok(queries)
}

async fn run_fetch(config: &Config, args: FetchArgs) -> Result<()> {
    let queries = read_queries(args.file.as_deref())?;
    let max_pages = args.max_pages.unwrap_or(config.max_pages);
    let concurrency = args.concurrency.unwrap_or(config.concurrency);
    let client = Arc::new(BrightDataClient::new(config.api.clone())?);

    tracing::info!(
        queries = queries.len(),
        max_pages,
        concurrency,
        started = %chrono::Local::now().to_rfc3339(),
        "fetching queries"
    );

    let total = queries.len();
    let mut total_organic = 0;
    for (i, query) in queries.iter().enumerate() {
        tracing::info!("[{}/{}] {query:?}: fetching up to {max_pages} pages", i + 1, total);
        let result = fetch_query(client.clone(), query, max_pages, concurrency, &config.fetch).await;
        tracing::info!(
            "[{}/{}] {query:?}: {} organic, {} related, {} PAA",
            i + 1,
            total,
            result.organic.len(),
            result.related.len(),
            result.people_also_ask.len()
        );
        total_organic += result.organic.len();
        write_ndjson_line(io::stdout().lock(), &result)?;

        if i + 1 < total {
            tokio::time::sleep(QUERY_PAUSE).await;
        }
    }

    tracing::info!(total_organic, queries = total, "done");
    Ok(())
}

fn run_dedup(args: DedupArgs) -> Result<()> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        bail!("no input provided: pipe NDJSON from `serp-aggregator fetch`");
    }
    let (results, errors) = read_query_results(stdin.lock())?;
    tracing::info!(parsed = results.len(), errors, "input parsed");
    if results.is_empty() {
        bail!("no valid query results found");
    }

    let stdout = io::stdout();
    if args.cross_query {
        let mut merged = merge_queries(&results);
        refine(&mut merged.organic, args.sort_by, args.min_frequency, args.limit);
        tracing::info!(organic = merged.organic.len(), "writing merged result");
        write_merged(stdout.lock(), &merged, args.format)
    } else {
        let mut results = index_by_query(results);
        for result in &mut results {
            refine(&mut result.organic, args.sort_by, args.min_frequency, args.limit);
            tracing::info!(
                query = result.query(),
                organic = result.organic.len(),
                related = result.related.len(),
                people_also_ask = result.people_also_ask.len(),
                "query result"
            );
        }
        write_query_results(stdout.lock(), &results, args.format)
    }
}

#[derive(Debug, Serialize)]
pub struct QueryTiming {
    pub query: String,
    pub result_count: usize,
    pub elapsed_seconds: f64,
    pub results: QueryResult,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TimingMetrics {
    pub total_wall_time_seconds: f64,
    pub total_results: usize,
    pub min_query_time: Option<f64>,
    pub max_query_time: Option<f64>,
    pub avg_query_time: Option<f64>,
    pub parallelism_speedup: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ParallelReport {
    pub timestamp: String,
    pub queries: Vec<String>,
    pub max_pages: u32,
    pub concurrency: usize,
    pub timing: TimingMetrics,
    pub results: Vec<QueryTiming>,
}

pub fn timing_metrics(timings: &[QueryTiming], wall: f64) -> TimingMetrics {
    let times: Vec<f64> = timings.iter().map(|t| t.elapsed_seconds).collect();
    let total_results = timings.iter().map(|t| t.result_count).sum();
    let sum: f64 = times.iter().sum();
    let any = !times.is_empty();

    TimingMetrics {
        total_wall_time_seconds: round2(wall),
        total_results,
        min_query_time: any.then(|| times.iter().copied().fold(f64::INFINITY, f64::min)),
        max_query_time: any.then(|| times.iter().copied().fold(0.0, f64::max)),
        avg_query_time: any.then(|| round2(sum / times.len() as f64)),
        parallelism_speedup: (any && wall > 0.0).then(|| round2(sum / wall)),
    }
}

async fn run_parallel(config: &Config, args: ParallelArgs) -> Result<()> {
    let queries = if !args.queries.is_empty() {
        args.queries
    } else {
        read_queries(args.file.as_deref())?
    };
    let max_pages = args.max_pages.unwrap_or(config.max_pages);
    let concurrency = args.concurrency.unwrap_or(config.concurrency);
    let client = Arc::new(BrightDataClient::new(config.api.clone())?);

    tracing::info!(queries = queries.len(), max_pages, concurrency, "launching queries in parallel");
    let started = Instant::now();

    let runs = queries.iter().map(|query| {
        let client = client.clone();
        let settings = &config.fetch;
        async move {
            let start = Instant::now();
            let results = fetch_query(client, query, max_pages, concurrency, settings).await;
            QueryTiming {
                query: query.clone(),
                result_count: results.organic.len(),
                elapsed_seconds: round2(start.elapsed().as_secs_f64()),
                results,
            }
        }
    });
    let timings = futures::future::join_all(runs).await;
    let timing = timing_metrics(&timings, started.elapsed().as_secs_f64());

    for t in &timings {
        let shown: String = t.query.chars().take(39).collect();
        tracing::info!("{shown:<40} {:<10} {:<10}", t.result_count, t.elapsed_seconds);
    }
    tracing::info!(
        total_results = timing.total_results,
        wall_seconds = timing.total_wall_time_seconds,
        speedup = ?timing.parallelism_speedup,
        "parallel run complete"
    );

    if args.output == ReportFormat::Json {
        let report = ParallelReport {
            timestamp: chrono::Local::now().to_rfc3339(),
            queries,
            max_pages,
            concurrency,
            timing,
            results: timings,
        };
        serde_json::to_writer_pretty(io::stdout().lock(), &report)?;
        println!();
    }
    Ok(())
}

async fn run_serve(config: &Config, args: ServeArgs) -> Result<()> {
    let client = Arc::new(BrightDataClient::new(config.api.clone())?);
    let state = Arc::new(AppState {
        api: client,
        settings: config.fetch.clone(),
        default_concurrency: config.concurrency,
    });
    let app = create_router(state, &args.static_dir);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("failed to bind port {}", args.port))?;
    tracing::info!("listening on http://localhost:{}, API at /api/search", args.port);
    axum::serve(listener, app).await?;
    Ok(())
}
