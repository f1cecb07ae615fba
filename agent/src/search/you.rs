use crate::search::{SearchResult, WebSearch};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub struct YouSearch {
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl YouSearch {
    pub fn new(url: String, api_key: String, timeout: Duration) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            url,
            api_key,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        }))
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    snippet: Option<String>,
    description: Option<String>,
}

impl Hit {
    fn into_result(self) -> Option<SearchResult> {
        if self.title.trim().is_empty() || self.url.trim().is_empty() {
            return None;
        }
        Some(SearchResult {
            title: self.title.trim().to_string(),
            url: self.url.trim().to_string(),
            snippet: self.snippet.or(self.description).unwrap_or_default(),
        })
    }
}

fn parse_results(body: &str, limit: usize) -> Result<Vec<SearchResult>> {
    let response: SearchResponse = serde_json::from_str(body)?;
    Ok(response
        .results
        .into_iter()
        .filter_map(Hit::into_result)
        .take(limit)
        .collect())
}

#[async_trait]
impl WebSearch for YouSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let res = self
            .client
            .get(&self.url)
            .query(&[("query", query)])
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;

        let status = res.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(Error::TransientServiceError(format!(
                "search returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(Error::ServiceError(format!("search returned {}", status)));
        }

        parse_results(&res.text().await?, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::{YouSearch, parse_results};
    use crate::search::WebSearch;
    use crate::testing::serve;
    use crate::{Error, Result};
    use std::time::Duration;

    #[test]
    fn test_parse_results() -> Result<()> {
        let body = r#"{"results": [
            {"title": "Solar basics", "url": "https://example.com/solar", "snippet": "sunlight"},
            {"title": "", "url": "https://example.com/untitled"},
            {"title": "Panels", "url": "https://example.com/panels", "description": "cells"},
            {"title": "Extra", "url": "https://example.com/extra"}
        ]}"#;

        let results = parse_results(body, 2)?;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].snippet, "sunlight");
        assert_eq!(results[1].title, "Panels");
        assert_eq!(results[1].snippet, "cells");

        assert!(parse_results("{}", 3)?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_status_classification() -> Result<()> {
        let unavailable = serve("503 Service Unavailable", "{}").await?;
        let search = YouSearch::new(unavailable.url.clone(), "key".to_string(), Duration::from_secs(5))?;
        let err = search.search("solar power", 3).await.expect_err("503 fails");
        assert!(matches!(err, Error::TransientServiceError(_)));
        assert!(err.is_transient());

        let limited = serve("429 Too Many Requests", "{}").await?;
        let search = YouSearch::new(limited.url.clone(), "key".to_string(), Duration::from_secs(5))?;
        assert!(search.search("solar power", 3).await.expect_err("429 fails").is_transient());

        let forbidden = serve("403 Forbidden", "{}").await?;
        let search = YouSearch::new(forbidden.url.clone(), "key".to_string(), Duration::from_secs(5))?;
        let err = search.search("solar power", 3).await.expect_err("403 fails");
        assert!(matches!(err, Error::ServiceError(_)));
        assert!(!err.is_transient());

        let ok = serve("200 OK", r#"{"results": [{"title": "Solar", "url": "https://example.com/solar", "snippet": "sun"}]}"#).await?;
        let search = YouSearch::new(ok.url.clone(), "key".to_string(), Duration::from_secs(5))?;
        assert_eq!(search.search("solar power", 3).await?.len(), 1);
        assert_eq!(ok.hits(), 1);
        Ok(())
    }
}
