use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_PAGES: u32 = 5;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    pub max_pages: Option<u32>,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
