use crate::config::ResearchConfig;
use crate::parse::{self, SubtopicList};
use agent::cache::{CacheKey, FingerprintCache, normalize_text};
use agent::callbacks::{Callback, StepEvent};
use agent::llm::{CompletionRequest, LLM};
use agent::search::{SearchResult, WebSearch};
use agent::tools::ToolDefinition;
use agent::{Error, Result, RetryPolicy};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const NO_SOURCES: &str = "No sources were found for this subtopic, so no summary could be written.";
pub const NO_ISSUES: &str = "No issues found.";

const MAX_SNIPPET_CHARS: usize = 600;

const BREAKDOWN_PROMPT: &str = include_str!("prompts/breakdown.md");
const EXPAND_PROMPT: &str = include_str!("prompts/expand.md");
const SUMMARIZE_PROMPT: &str = include_str!("prompts/summarize.md");
const CRITIQUE_PROMPT: &str = include_str!("prompts/critique.md");
const REFINE_PROMPT: &str = include_str!("prompts/refine.md");

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Step {
    Breakdown,
    Expand,
    Search,
    Summarize,
    Critique,
    Refine,
}

impl Step {
    pub const ALL: [Step; 6] = [
        Step::Breakdown,
        Step::Expand,
        Step::Search,
        Step::Summarize,
        Step::Critique,
        Step::Refine,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::Breakdown => "breakdown",
            Step::Expand => "expand",
            Step::Search => "search",
            Step::Summarize => "summarize",
            Step::Critique => "critique",
            Step::Refine => "refine",
        }
    }

    /// Looks a step up by its `name()`.
    pub fn from_name(name: &str) -> Option<Self> {
        Step::ALL.into_iter().find(|step| step.name() == name)
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The step functions and everything they share: collaborators, the
/// fingerprint cache, the retry policy and the run's cancellation token.
pub struct Steps {
    llm: Arc<dyn LLM + Send + Sync>,
    search: Arc<dyn WebSearch + Send + Sync>,
    cache: Arc<FingerprintCache>,
    retry: RetryPolicy,
    config: ResearchConfig,
    callbacks: Vec<Arc<dyn Callback + Send + Sync>>,
    cancel: CancellationToken,
}

impl Steps {
    pub fn new(
        llm: Arc<dyn LLM + Send + Sync>,
        search: Arc<dyn WebSearch + Send + Sync>,
        cache: Arc<FingerprintCache>,
        config: ResearchConfig,
        callbacks: Vec<Arc<dyn Callback + Send + Sync>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            llm,
            search,
            cache,
            retry: config.retry_policy(),
            config,
            callbacks,
            cancel,
        }
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn breakdown(&self, topic: &str) -> Result<Vec<String>> {
        let count = self.config.subtopic_count;
        let key = CacheKey::new(Step::Breakdown.name(), &[count.to_string(), topic.to_string()]);

        let artifact = self
            .memo(Step::Breakdown, topic, key, || async {
                let schema = ToolDefinition::new::<SubtopicList>(
                    "subtopics",
                    "the research subtopics in presentation order",
                )?
                .render()?;
                let count_text = count.to_string();
                let prompt = fill(
                    BREAKDOWN_PROMPT,
                    &[
                        ("count", count_text.as_str()),
                        ("schema", schema.as_str()),
                        ("topic", topic),
                    ],
                );
                let text = self
                    .complete(Step::Breakdown, &prompt, self.config.breakdown_tokens)
                    .await?;

                let subtopics = parse::parse_subtopics(&text, count);
                if subtopics.is_empty() {
                    return Err(Error::ParseError(
                        "no subtopics in breakdown response".to_string(),
                    ));
                }
                Ok(serde_json::to_string(&subtopics)?)
            })
            .await;

        match artifact {
            Ok(artifact) => Ok(serde_json::from_str(&artifact)?),
            Err(Error::ParseError(reason) | Error::LLMResponseError(reason)) => {
                tracing::warn!(%reason, "breakdown failed, researching the topic as a single subtopic");
                Ok(vec![normalize_text(topic)])
            }
            Err(e) => Err(e),
        }
    }

    pub async fn expand(&self, subtopic: &str) -> Result<Vec<String>> {
        let fan_out = self.config.queries_per_subtopic;
        let key = CacheKey::new(Step::Expand.name(), &[fan_out.to_string(), subtopic.to_lowercase()]);

        let artifact = self
            .memo(Step::Expand, subtopic, key, || async {
                let count_text = fan_out.to_string();
                let prompt = fill(
                    EXPAND_PROMPT,
                    &[("count", count_text.as_str()), ("subtopic", subtopic)],
                );
                let text = self
                    .complete(Step::Expand, &prompt, self.config.expand_tokens)
                    .await?;

                let queries = expanded_queries(subtopic, parse::parse_keywords(&text), fan_out);
                Ok(serde_json::to_string(&queries)?)
            })
            .await?;

        Ok(serde_json::from_str(&artifact)?)
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let limit = self.config.results_per_query;
        let key = CacheKey::new(Step::Search.name(), &[limit.to_string(), query.to_lowercase()]);

        let artifact = self
            .memo(Step::Search, query, key, || async {
                let call = self
                    .retry
                    .run(Step::Search.name(), move || self.search.search(query, limit));
                let mut results = self.cancellable(call).await?;
                results.truncate(limit);

                if results.is_empty() {
                    tracing::info!(query, "search returned no results");
                }
                Ok(serde_json::to_string(&results)?)
            })
            .await?;

        Ok(serde_json::from_str(&artifact)?)
    }

    pub async fn summarize(&self, subtopic: &str, results: &[SearchResult]) -> Result<String> {
        let key = CacheKey::new(
            Step::Summarize.name(),
            &[subtopic.to_string(), serde_json::to_string(results)?],
        );

        self.memo(Step::Summarize, subtopic, key, || async {
            if results.is_empty() {
                return Ok(NO_SOURCES.to_string());
            }

            let sources = format_sources(results);
            let prompt = fill(
                SUMMARIZE_PROMPT,
                &[("subtopic", subtopic), ("sources", sources.as_str())],
            );
            let text = self
                .complete(Step::Summarize, &prompt, self.config.summary_tokens)
                .await?;

            match text.trim() {
                "" => Err(Error::LLMResponseError("summary is empty".to_string())),
                summary => Ok(summary.to_string()),
            }
        })
        .await
    }

    /// `subtopic` only labels the step event; the critique depends on the summary alone.
    pub async fn critique(&self, subtopic: &str, summary: &str) -> Result<String> {
        if summary == NO_SOURCES {
            return Ok(NO_ISSUES.to_string());
        }
        let key = CacheKey::new(Step::Critique.name(), &[summary]);

        self.memo(Step::Critique, subtopic, key, || async {
            let prompt = fill(CRITIQUE_PROMPT, &[("summary", summary)]);
            let text = self
                .complete(Step::Critique, &prompt, self.config.critique_tokens)
                .await?;

            match text.trim() {
                "" => Ok(NO_ISSUES.to_string()),
                critique => Ok(critique.to_string()),
            }
        })
        .await
    }

    pub async fn refine(&self, subtopic: &str, summary: &str, critique: &str) -> Result<String> {
        if is_trivial_critique(critique) {
            return Ok(summary.to_string());
        }
        let key = CacheKey::new(Step::Refine.name(), &[summary, critique]);

        self.memo(Step::Refine, subtopic, key, || async {
            let prompt = fill(REFINE_PROMPT, &[("summary", summary), ("critique", critique)]);
            let text = self
                .complete(Step::Refine, &prompt, self.config.refine_tokens)
                .await?;

            match text.trim() {
                "" => Ok(summary.to_string()),
                refined => Ok(refined.to_string()),
            }
        })
        .await
    }

    /// Cache lookup first; on a miss `compute` runs once for every concurrent
    /// caller of the same key.
    async fn memo<F, Fut>(&self, step: Step, subject: &str, key: CacheKey, compute: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::CancelledError);
        }

        let (artifact, cached) = self.cache.get_or_try_insert_with(&key, compute).await?;
        tracing::debug!(step = step.name(), subject, cached, "step finished");

        let event = StepEvent {
            step: step.name(),
            subject,
            cached,
            artifact: &artifact,
        };
        for callback in &self.callbacks {
            if let Err(e) = callback.call(&event).await {
                tracing::warn!(error = %e, "step callback failed");
            }
        }

        Ok(artifact)
    }

    async fn complete(&self, step: Step, prompt: &str, max_tokens: u32) -> Result<String> {
        let call = self.retry.run(step.name(), move || async move {
            let res = self
                .llm
                .completion(CompletionRequest { prompt, max_tokens })
                .await?;
            Ok(res.content)
        });
        self.cancellable(call).await
    }

    async fn cancellable<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::CancelledError),
            res = call => res,
        }
    }
}

/// The subtopic itself followed by up to `fan_out` distinct terms, compared
/// case-insensitively.
fn expanded_queries(subtopic: &str, terms: Vec<String>, fan_out: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    std::iter::once(normalize_text(subtopic))
        .chain(terms.iter().map(|term| normalize_text(term)))
        .filter(|term| !term.is_empty() && seen.insert(term.to_lowercase()))
        .take(fan_out + 1)
        .collect()
}

fn format_sources(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let snippet: String = r.snippet.chars().take(MAX_SNIPPET_CHARS).collect();
            format!("[{}] {} - {}\n{}\n", i + 1, r.title, r.url, snippet.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn is_trivial_critique(critique: &str) -> bool {
    let critique = critique.trim().to_lowercase();
    critique.is_empty() || critique.starts_with("no issues")
}

/// Substitutes `{name}` placeholders in one pass, so substituted text is
/// never scanned for further placeholders.
fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let var = vars
            .iter()
            .find(|(name, _)| tail.starts_with(name) && tail[name.len()..].starts_with('}'));

        match var {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }

    out.push_str(rest);
    out
}
