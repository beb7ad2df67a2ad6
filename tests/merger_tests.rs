use serde_json::{Value, json};

use serp_aggregator::merge_queries;
use serp_aggregator::merger::{OrganicOrder, index_by_query, refine};
use serp_aggregator::output::{OutputFormat, read_query_results, write_merged};

mod test_helpers {
    use super::*;

    pub fn line(query: &str, datetime: &str, organic: Value) -> String {
        json!({
            "general": { "query": query, "datetime": datetime, "language": "en" },
            "organic": organic,
            "related": [{ "text": "rust book" }],
            "people_also_ask": ["What is Rust used for?"],
        })
        .to_string()
    }

    pub fn org(link: &str, best: u32, frequency: u32, pages: &[u32]) -> Value {
        json!({
            "link": link,
            "rank": best,
            "title": link,
            "best_position": best,
            "avg_position": best as f64,
            "frequency": frequency,
            "pages_seen": pages,
        })
    }

    pub fn ndjson(lines: &[String]) -> Vec<u8> {
        let mut input = lines.join("\n");
        input.push('\n');
        input.into_bytes()
    }
}

use test_helpers::*;

#[test]
fn ndjson_batch_merges_across_queries() {
    let input = ndjson(&[
        line(
            "rust",
            "2024-05-02T10:00:00Z",
            json!([org("https://rust-lang.org", 1, 2, &[1, 2]), org("https://x.com", 4, 1, &[1])]),
        ),
        "this line is not json".to_string(),
        line(
            "rust language",
            "2024-05-01T09:00:00Z",
            json!([org("https://x.com", 2, 1, &[3]), org("https://docs.rs", 5, 1, &[1])]),
        ),
    ]);

    let (results, errors) = read_query_results(&input[..]).unwrap();
    assert_eq!(errors, 1);
    let merged = merge_queries(&index_by_query(results));

    assert_eq!(merged.general.queries, vec!["rust", "rust language"]);
    assert_eq!(merged.general.datetime_range.earliest.as_deref(), Some("2024-05-01T09:00:00Z"));
    assert_eq!(merged.general.datetime_range.latest.as_deref(), Some("2024-05-02T10:00:00Z"));
    assert_eq!(merged.general.language.as_deref(), Some("en"));

    let links: Vec<_> = merged.organic.iter().map(|e| e.entry.link.as_str()).collect();
    assert_eq!(links, vec!["https://rust-lang.org", "https://x.com", "https://docs.rs"]);

    let x = &merged.organic[1];
    assert_eq!(x.entry.best_position, 2);
    assert_eq!(x.entry.avg_position, 3.0);
    assert_eq!(x.entry.frequency, 2);
    assert_eq!(x.entry.pages_seen, vec![1, 3]);
    assert_eq!(x.queries, vec!["rust", "rust language"]);

    assert_eq!(merged.related.len(), 1);
    assert_eq!(merged.related[0].frequency, 2);
    assert_eq!(merged.people_also_ask.len(), 1);
}

#[test]
fn repeated_query_keeps_the_later_result() {
    let input = ndjson(&[
        line("rust", "2024-05-01T00:00:00Z", json!([org("https://old.com", 1, 1, &[1])])),
        line("go", "2024-05-01T00:00:00Z", json!([org("https://go.dev", 1, 1, &[1])])),
        line("rust", "2024-05-03T00:00:00Z", json!([org("https://new.com", 1, 1, &[1])])),
    ]);

    let (results, _) = read_query_results(&input[..]).unwrap();
    let merged = merge_queries(&index_by_query(results));

    assert_eq!(merged.general.queries, vec!["rust", "go"]);
    let links: Vec<_> = merged.organic.iter().map(|e| e.entry.link.as_str()).collect();
    assert_eq!(links, vec!["https://new.com", "https://go.dev"]);
}

#[test]
fn refined_merge_renders_as_csv() {
    let input = ndjson(&[
        line("a", "", json!([org("https://one.com", 3, 1, &[1]), org("https://two.com", 1, 1, &[1])])),
        line("b", "", json!([org("https://one.com", 2, 1, &[2])])),
    ]);
    let (results, _) = read_query_results(&input[..]).unwrap();
    let mut merged = merge_queries(&results);
    refine(&mut merged.organic, OrganicOrder::Frequency, 2, 0);

    let mut out = Vec::new();
    write_merged(&mut out, &merged, OutputFormat::Csv).unwrap();
    let text = String::from_utf8(out).unwrap();
    let rows: Vec<_> = text.lines().collect();

    assert_eq!(rows.len(), 2);
    assert!(rows[0].starts_with("link,rank,title"));
    assert_eq!(rows[1], "https://one.com,3,https://one.com,,2,2.5,2,\"1, 2\",a; b");
}

#[test]
fn null_fields_do_not_drop_the_line() {
    let input = ndjson(&[
        line("rust", "2024-05-01T00:00:00Z", json!([org("https://a.com", 1, 1, &[1])])),
        json!({
            "general": { "query": "go", "datetime": null },
            "organic": [{
                "link": "https://a.com",
                "rank": 2,
                "title": null,
                "description": null,
                "url": null,
                "best_position": 2,
                "avg_position": 2.0,
                "frequency": 1,
                "pages_seen": [1]
            }],
            "related": null,
            "pagination": [{ "page": "2", "link": null, "page_html": null }],
            "page_html": null
        })
        .to_string(),
    ]);

    let (results, errors) = read_query_results(&input[..]).unwrap();
    assert_eq!(errors, 0);
    assert_eq!(results.len(), 2);

    let merged = merge_queries(&results);
    assert_eq!(merged.organic.len(), 1);
    assert_eq!(merged.organic[0].entry.frequency, 2);
    assert_eq!(merged.organic[0].queries, vec!["go", "rust"]);
}
