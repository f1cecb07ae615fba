//! Scripted collaborators for unit tests.

use crate::config::ResearchConfig;
use agent::Result;
use agent::llm::{CompletionRequest, CompletionResponse, LLM};
use agent::search::{SearchResult, WebSearch};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type LLMHandler = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;
type SearchHandler = Box<dyn Fn(&str) -> Result<Vec<SearchResult>> + Send + Sync>;
type DelayFn = Box<dyn Fn(&str) -> Duration + Send + Sync>;

pub struct ScriptedLLM {
    calls: AtomicUsize,
    handler: LLMHandler,
}

impl ScriptedLLM {
    pub fn new(handler: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            handler: Box::new(handler),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLM for ScriptedLLM {
    async fn completion<'a>(&self, request: CompletionRequest<'a>) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        (self.handler)(request.prompt).map(|content| CompletionResponse { content })
    }
}

pub struct StaticSearch {
    calls: AtomicUsize,
    handler: SearchHandler,
    delay: DelayFn,
}

impl StaticSearch {
    pub fn new(
        handler: impl Fn(&str) -> Result<Vec<SearchResult>> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::with_delay(handler, |_| Duration::ZERO)
    }

    pub fn with_delay(
        handler: impl Fn(&str) -> Result<Vec<SearchResult>> + Send + Sync + 'static,
        delay: impl Fn(&str) -> Duration + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            handler: Box::new(handler),
            delay: Box::new(delay),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebSearch for StaticSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep((self.delay)(query)).await;
        let mut results = (self.handler)(query)?;
        results.truncate(limit);
        Ok(results)
    }
}

pub fn fast_config() -> ResearchConfig {
    ResearchConfig {
        max_retries: 1,
        base_delay_ms: 1,
        max_delay_ms: 5,
        ..Default::default()
    }
}

/// The value of a `Name: value` line in a prompt.
pub fn field<'a>(prompt: &'a str, name: &str) -> &'a str {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix(name)?.strip_prefix(": "))
        .unwrap_or_default()
        .trim()
}

fn between<'a>(text: &'a str, start: &str, end: &str) -> &'a str {
    let from = text.find(start).map(|i| i + start.len()).unwrap_or(0);
    let to = text[from..].find(end).map(|i| from + i).unwrap_or(text.len());
    text[from..to].trim()
}

/// Answers every prompt of the "Renewable Energy" scenario.
pub fn renewable_energy_script(prompt: &str) -> Result<String> {
    let answer = if prompt.starts_with("Break down") {
        "Here are the subtopics:\n1. **Solar**\n2. **Wind**".to_string()
    } else if prompt.starts_with("Generate related") {
        match field(prompt, "Subtopic") {
            "Solar" => "- solar power\n- photovoltaic".to_string(),
            "Wind" => "- wind power\n- turbines".to_string(),
            _ => String::new(),
        }
    } else if prompt.starts_with("Summarize") {
        format!("Summary of {} [1].", field(prompt, "Subtopic"))
    } else if prompt.starts_with("Critique") {
        "- Missing figures on cost.".to_string()
    } else if prompt.starts_with("Improve") {
        format!("Refined. {}", between(prompt, "Summary:\n", "\n\nCritique:"))
    } else {
        panic!("unexpected prompt: {}", prompt)
    };
    Ok(answer)
}

pub fn renewable_energy_llm() -> Arc<ScriptedLLM> {
    ScriptedLLM::new(renewable_energy_script)
}

/// One result per query, with a URL derived from the query.
pub fn result_for(query: &str) -> SearchResult {
    let slug = query.to_lowercase().replace(' ', "-");
    SearchResult {
        title: format!("All about {}", query),
        url: format!("https://example.com/{}", slug),
        snippet: format!("{} explained", query),
    }
}

pub fn one_result_per_query() -> Arc<StaticSearch> {
    StaticSearch::new(|query| Ok(vec![result_for(query)]))
}
