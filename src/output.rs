use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::data_models::{AggregatedOrganicEntry, MergedResult, QueryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Ndjson,
    Csv,
}

const CSV_COLUMNS: [&str; 9] = [
    "link",
    "rank",
    "title",
    "description",
    "best_position",
    "avg_position",
    "frequency",
    "pages_seen",
    "queries",
];

/// Parses one QueryResult per non-blank line. Unparsable lines are counted
/// and skipped.
pub fn read_query_results<R: BufRead>(reader: R) -> Result<(Vec<QueryResult>, usize)> {
    let mut results = Vec::new();
    let mut errors = 0;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.context("failed to read input")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<QueryResult>(line) {
            Ok(result) => results.push(result),
            Err(e) => {
                tracing::debug!(line = lineno + 1, error = %e, "skipping unparsable line");
                errors += 1;
            }
        }
    }
    Ok((results, errors))
}

pub fn write_ndjson_line<W: Write, T: Serialize>(mut out: W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut out, value)?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Per-query output. JSON emits a lone result bare and several as an
/// object keyed by query.
pub fn write_query_results<W: Write>(
    mut out: W,
    results: &[QueryResult],
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            if let [single] = results {
                serde_json::to_writer_pretty(&mut out, single)?;
            } else {
                let mut keyed = Map::new();
                for result in results {
                    keyed.insert(result.query().to_string(), serde_json::to_value(result)?);
                }
                serde_json::to_writer_pretty(&mut out, &Value::Object(keyed))?;
            }
            out.write_all(b"\n")?;
        }
        OutputFormat::Ndjson => {
            for result in results {
                write_ndjson_line(&mut out, result)?;
            }
        }
        OutputFormat::Csv => {
            write_csv_header(&mut out)?;
            for result in results {
                let query = [result.query().to_string()];
                for entry in &result.organic {
                    write_csv_row(&mut out, entry, &query)?;
                }
            }
        }
    }
    out.flush()?;
    Ok(())
}

pub fn write_merged<W: Write>(mut out: W, merged: &MergedResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, merged)?;
            out.write_all(b"\n")?;
        }
        OutputFormat::Ndjson => write_ndjson_line(&mut out, merged)?,
        OutputFormat::Csv => {
            write_csv_header(&mut out)?;
            for entry in &merged.organic {
                write_csv_row(&mut out, &entry.entry, &entry.queries)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn write_csv_header<W: Write>(out: &mut W) -> Result<()> {
    writeln!(out, "{}", CSV_COLUMNS.join(","))?;
    Ok(())
}

fn write_csv_row<W: Write>(out: &mut W, entry: &AggregatedOrganicEntry, queries: &[String]) -> Result<()> {
    let pages = entry
        .pages_seen
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let fields = [
        entry.link.clone(),
        entry.rank.to_string(),
        entry.title.clone(),
        entry.description.clone().unwrap_or_default(),
        entry.best_position.to_string(),
        entry.avg_position.to_string(),
        entry.frequency.to_string(),
        pages,
        queries.join("; "),
    ];
    let row = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    writeln!(out, "{row}")?;
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_models::General;

    fn result(query: &str, links: &[&str]) -> QueryResult {
        QueryResult {
            general: General {
                query: Some(query.into()),
                ..Default::default()
            },
            organic: links
                .iter()
                .enumerate()
                .map(|(i, link)| AggregatedOrganicEntry {
                    link: link.to_string(),
                    best_position: i as u32 + 1,
                    frequency: 1,
                    pages_seen: vec![1, 2],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn read_skips_bad_lines() {
        let input = b"{\"organic\": []}\n\nnot json\n{\"general\": {\"query\": \"rust\"}}\n";
        let (results, errors) = read_query_results(&input[..]).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(errors, 1);
        assert_eq!(results[1].query(), "rust");
    }

    #[test]
    fn json_single_result_is_bare() {
        let mut out = Vec::new();
        write_query_results(&mut out, &[result("rust", &["a"])], OutputFormat::Json).unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["organic"][0]["link"], "a");
    }

    #[test]
    fn json_many_results_are_keyed() {
        let mut out = Vec::new();
        write_query_results(
            &mut out,
            &[result("rust", &["a"]), result("go", &["b"])],
            OutputFormat::Json,
        )
        .unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["go"]["organic"][0]["link"], "b");
    }

    #[test]
    fn ndjson_one_line_per_result() {
        let mut out = Vec::new();
        write_query_results(
            &mut out,
            &[result("rust", &["a"]), result("go", &[])],
            OutputFormat::Ndjson,
        )
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 2);
    }

    #[test]
    fn csv_quotes_and_joins() {
        let mut r = result("rust, lang", &["a"]);
        r.organic[0].title = "say \"hi\"".into();
        let mut out = Vec::new();
        write_query_results(&mut out, &[r], OutputFormat::Csv).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), CSV_COLUMNS.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "a,0,\"say \"\"hi\"\"\",,1,0,1,\"1, 2\",\"rust, lang\""
        );
    }
}
