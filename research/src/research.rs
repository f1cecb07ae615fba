use crate::config::ResearchConfig;
use crate::report::{ResearchReport, SubtopicOutcome};
use crate::steps::{Step, Steps};
use agent::callbacks::Callback;
use agent::llm;
use agent::search::{SearchResult, WebSearch};
use agent::{Error, FingerprintCache, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Runs `Breakdown → {per subtopic: Expand → Search → Summarize → Critique →
/// Refine} → Assemble`. Subtopic pipelines run concurrently, bounded by the
/// configured worker count, and share one fingerprint cache.
pub struct Orchestrator {
    steps: Arc<Steps>,
}

impl Orchestrator {
    pub async fn run(&self, topic: &str) -> Result<ResearchReport> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(Error::MissingArg("research topic is empty".to_string()));
        }

        tracing::info!(topic, "starting research");
        let subtopics = self.steps.breakdown(topic).await?;
        tracing::info!(count = subtopics.len(), ?subtopics, "topic broken down");

        let outcomes = self.research_subtopics(&subtopics).await?;
        if self.steps.is_cancelled() {
            return Err(Error::CancelledError);
        }

        let report = ResearchReport::assemble(topic, subtopics.into_iter().zip(outcomes).collect());
        for section in report.incomplete_sections() {
            tracing::warn!(subtopic = %section.title, "subtopic left incomplete");
        }

        let stats = self.steps.cache().stats();
        tracing::info!(
            sections = report.sections().len(),
            references = report.references().len(),
            cache_hits = stats.hits,
            cache_misses = stats.misses,
            "report assembled"
        );
        Ok(report)
    }

    /// Outcomes in `subtopics` order, whatever order the pipelines finish in.
    async fn research_subtopics(&self, subtopics: &[String]) -> Result<Vec<SubtopicOutcome>> {
        let workers = Arc::new(Semaphore::new(self.steps.config().concurrency.max(1)));
        let mut set = JoinSet::new();
        let mut task_index = HashMap::new();

        for (index, subtopic) in subtopics.iter().enumerate() {
            let steps = self.steps.clone();
            let workers = workers.clone();
            let subtopic = subtopic.clone();
            let span = tracing::info_span!("subtopic", index, name = %subtopic);

            let handle = set.spawn(
                async move {
                    let Ok(_permit) = workers.acquire_owned().await else {
                        return (index, cancelled());
                    };
                    (index, research_subtopic(&steps, &subtopic).await)
                }
                .instrument(span),
            );
            task_index.insert(handle.id(), index);
        }

        let mut outcomes: Vec<Option<SubtopicOutcome>> = vec![None; subtopics.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => {
                    tracing::error!(error = %e, "subtopic task aborted");
                    if let Some(&index) = task_index.get(&e.id()) {
                        outcomes[index] = Some(SubtopicOutcome::Failed {
                            step: None,
                            reason: format!("task aborted: {}", e),
                        });
                    }
                }
            }
        }

        outcomes
            .into_iter()
            .map(|outcome| {
                outcome.ok_or(Error::AgentWorkflowError(
                    "subtopic finished without an outcome".to_string(),
                ))
            })
            .collect()
    }
}

fn cancelled() -> SubtopicOutcome {
    SubtopicOutcome::Failed {
        step: None,
        reason: Error::CancelledError.to_string(),
    }
}

/// One subtopic's pipeline. Failures are recorded, never propagated.
async fn research_subtopic(steps: &Steps, subtopic: &str) -> SubtopicOutcome {
    match pipeline(steps, subtopic).await {
        Ok((summary, results)) => {
            tracing::info!(results = results.len(), "subtopic completed");
            SubtopicOutcome::Completed { summary, results }
        }
        Err((step, e)) => {
            tracing::warn!(%step, error = %e, "subtopic failed");
            SubtopicOutcome::Failed {
                step: Some(step),
                reason: e.to_string(),
            }
        }
    }
}

async fn pipeline(
    steps: &Steps,
    subtopic: &str,
) -> std::result::Result<(String, Vec<SearchResult>), (Step, Error)> {
    let at = |step: Step| move |e: Error| (step, e);

    let queries = steps.expand(subtopic).await.map_err(at(Step::Expand))?;

    let mut seen = HashSet::new();
    let mut results = Vec::new();
    for query in &queries {
        let found = steps.search(query).await.map_err(at(Step::Search))?;
        results.extend(found.into_iter().filter(|r| seen.insert(r.url.clone())));
    }
    if results.is_empty() {
        tracing::warn!(queries = queries.len(), "no search results for subtopic");
    }

    let summary = steps
        .summarize(subtopic, &results)
        .await
        .map_err(at(Step::Summarize))?;
    let critique = steps
        .critique(subtopic, &summary)
        .await
        .map_err(at(Step::Critique))?;
    let refined = steps
        .refine(subtopic, &summary, &critique)
        .await
        .map_err(at(Step::Refine))?;

    Ok((refined, results))
}

type Callbacks = Vec<Arc<dyn Callback + Send + Sync>>;

pub struct OrchestratorBuilder {
    llm: Option<Arc<dyn llm::LLM + Send + Sync>>,
    search: Option<Arc<dyn WebSearch + Send + Sync>>,
    cache: Option<Arc<FingerprintCache>>,
    config: ResearchConfig,
    callbacks: Callbacks,
    cancel: Option<CancellationToken>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            llm: None,
            search: None,
            cache: None,
            config: ResearchConfig::default(),
            callbacks: Vec::new(),
            cancel: None,
        }
    }

    pub fn llm(mut self, llm: Arc<dyn llm::LLM + Send + Sync>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn web_search(mut self, search: Arc<dyn WebSearch + Send + Sync>) -> Self {
        self.search = Some(search);
        self
    }

    /// Shares an existing cache, e.g. one restored from a snapshot.
    pub fn cache(mut self, cache: Arc<FingerprintCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(mut self, config: ResearchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn callback(mut self, callback: Box<dyn Callback + Send + Sync>) -> Self {
        self.callbacks.push(Arc::from(callback));
        self
    }

    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;

        Ok(Orchestrator {
            steps: Arc::new(Steps::new(
                self.llm
                    .ok_or(Error::MissingArg("llm is required for research".to_string()))?,
                self.search.ok_or(Error::MissingArg(
                    "web search is required for research".to_string(),
                ))?,
                self.cache.unwrap_or_default(),
                self.config,
                self.callbacks,
                self.cancel.unwrap_or_default(),
            )),
        })
    }
}
