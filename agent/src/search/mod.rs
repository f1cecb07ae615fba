use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod you;
pub use you::YouSearch;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl std::fmt::Display for SearchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.title, self.url)
    }
}

/// Stateless web search. An empty result list is a success.
#[async_trait]
pub trait WebSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>>;
}
