use agent::{Error, Result, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// Run configuration. Every field has a default so a partial YAML file is
/// enough.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Number of subtopics the breakdown asks for.
    pub subtopic_count: usize,
    /// Expansion fan-out: related terms searched per subtopic, besides the subtopic itself.
    pub queries_per_subtopic: usize,
    /// Search cap per query.
    pub results_per_query: usize,
    /// Retries after the first failed attempt of a collaborator call.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Subtopic pipelines running at the same time.
    pub concurrency: usize,

    pub model: String,
    pub api_base: String,
    pub search_url: String,
    pub request_timeout_secs: u64,
    pub temperature: f32,

    pub breakdown_tokens: u32,
    pub expand_tokens: u32,
    pub summary_tokens: u32,
    pub critique_tokens: u32,
    pub refine_tokens: u32,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            subtopic_count: 5,
            queries_per_subtopic: 5,
            results_per_query: 3,
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
            concurrency: 4,
            model: "meta-llama/Llama-3.3-70B-Instruct-Turbo-Free".to_string(),
            api_base: "https://api.together.xyz/v1".to_string(),
            search_url: "https://api.you.com/api/search".to_string(),
            request_timeout_secs: 30,
            temperature: 0.7,
            breakdown_tokens: 256,
            expand_tokens: 256,
            summary_tokens: 512,
            critique_tokens: 512,
            refine_tokens: 1024,
        }
    }
}

impl ResearchConfig {
    /// Reads `path`, or `config/config.yaml` when no path is given and that
    /// file exists, or falls back to the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Path::new(DEFAULT_CONFIG_PATH),
            None => return Ok(Self::default()),
        };

        let yaml = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Self::from_yaml(&yaml)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("subtopic_count", self.subtopic_count),
            ("queries_per_subtopic", self.queries_per_subtopic),
            ("results_per_query", self.results_per_query),
            ("concurrency", self.concurrency),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(Error::ConfigError(format!("{} must be at least 1", name)));
            }
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::ConfigError(
                "base_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            ..Default::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
