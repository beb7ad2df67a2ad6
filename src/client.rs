use std::future::Future;

use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;

use crate::config::ApiConfig;
use crate::data_models::SerpPayload;
use crate::error::ApiError;

const GOOGLE_SEARCH_URL: &str = "https://www.google.com/search";

/// What a single poll of a submitted request reports back.
#[derive(Debug, Clone)]
pub enum PollStatus {
    Pending,
    Ready(SerpPayload),
    /// Any status that is neither pending nor success.
    Failed(u16),
}

/// The remote submit/poll contract. Transport, auth and URL building live
/// behind it.
pub trait SerpApi: Send + Sync {
    /// Submits one page of `query`. `Ok(None)` means the API accepted the call
    /// but handed back no correlation token.
    fn submit(
        &self,
        query: &str,
        offset: u32,
    ) -> impl Future<Output = Result<Option<String>, ApiError>> + Send;

    fn poll(&self, token: &str) -> impl Future<Output = Result<PollStatus, ApiError>> + Send;
}

#[derive(Deserialize)]
struct SubmitReply {
    response_id: Option<String>,
}

pub struct BrightDataClient {
    client: reqwest::Client,
    config: ApiConfig,
}

impl BrightDataClient {
    pub fn new(config: ApiConfig) -> Result<BrightDataClient, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(BrightDataClient { client, config })
    }

    /// The Google results URL Bright Data is asked to fetch.
    pub fn search_url(&self, query: &str, offset: u32) -> Result<Url, ApiError> {
        let offset = offset.to_string();
        Url::parse_with_params(
            GOOGLE_SEARCH_URL,
            [
                ("gl", self.config.country.as_str()),
                ("hl", self.config.language.as_str()),
                ("brd_json", "1"),
                ("q", query),
                ("start", offset.as_str()),
            ],
        )
        .map_err(|e| ApiError::Transport(format!("invalid search url: {e}")))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

impl SerpApi for BrightDataClient {
    async fn submit(&self, query: &str, offset: u32) -> Result<Option<String>, ApiError> {
        let search_url = self.search_url(query, offset)?;
        let body = json!({
            "zone": self.config.zone,
            "url": search_url.as_str(),
            "format": "raw",
        });

        let res = self
            .client
            .post(self.endpoint("/serp/req"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;
        let status = res.status();
        let text = res.text().await?;

        // A JSON rejection without a response_id is final; an unparsable
        // error page (gateway 5xx and the like) is a transport failure.
        let reply: SubmitReply = match serde_json::from_str(&text) {
            Ok(reply) => reply,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => return Err(ApiError::Transport(format!("http {status}"))),
        };
        if !status.is_success() {
            tracing::warn!(%status, "serp submission rejected");
        }
        Ok(reply.response_id.filter(|id| !id.is_empty()))
    }

    async fn poll(&self, token: &str) -> Result<PollStatus, ApiError> {
        let res = self
            .client
            .get(self.endpoint("/serp/get_result"))
            .bearer_auth(&self.config.api_key)
            .query(&[("response_id", token)])
            .send()
            .await?;

        match res.status() {
            StatusCode::OK => {
                let text = res.text().await?;
                let payload: SerpPayload = serde_json::from_str(&text)?;
                Ok(PollStatus::Ready(payload))
            }
            StatusCode::PROCESSING | StatusCode::ACCEPTED => Ok(PollStatus::Pending),
            other => Ok(PollStatus::Failed(other.as_u16())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> ApiConfig {
        ApiConfig {
            api_key: "secret".into(),
            zone: "serp_api1".into(),
            base_url: "https://api.brightdata.com/".into(),
            country: "us".into(),
            language: "en".into(),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn search_url_encodes_query_and_offset() {
        let client = BrightDataClient::new(test_config()).unwrap();
        let url = client.search_url("rust & tokio", 20).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("q".into(), "rust & tokio".into())));
        assert!(pairs.contains(&("start".into(), "20".into())));
        assert!(pairs.contains(&("brd_json".into(), "1".into())));
        assert!(url.as_str().starts_with(GOOGLE_SEARCH_URL));
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let client = BrightDataClient::new(test_config()).unwrap();
        assert_eq!(
            client.endpoint("/serp/req"),
            "https://api.brightdata.com/serp/req"
        );
    }
}
