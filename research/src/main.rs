mod config;
mod parse;
mod report;
mod research;
mod steps;
#[cfg(test)]
mod testing;

use agent::callbacks::TranscriptLogger;
use agent::llm::OpenAI;
use agent::search::YouSearch;
use agent::{Error, FingerprintCache, Result};
use clap::Parser;
use config::ResearchConfig;
use std::path::PathBuf;
use std::sync::Arc;
use steps::Step;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Break a topic into subtopics, search the web for each and write a
/// critiqued, refined markdown report.
#[derive(Parser)]
#[command(name = "research", version)]
struct Cli {
    /// Research topic
    topic: String,

    /// YAML config file (defaults to config/config.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    subtopics: Option<usize>,

    /// Related search terms per subtopic
    #[arg(long)]
    queries: Option<usize>,

    /// Search results kept per query
    #[arg(long)]
    results: Option<usize>,

    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    max_retries: Option<u32>,

    /// Write the report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Cache snapshot, loaded before the run and saved after it
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Write a markdown transcript of every step
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply(&self, config: &mut ResearchConfig) {
        if let Some(n) = self.subtopics {
            config.subtopic_count = n;
        }
        if let Some(n) = self.queries {
            config.queries_per_subtopic = n;
        }
        if let Some(n) = self.results {
            config.results_per_query = n;
        }
        if let Some(n) = self.concurrency {
            config.concurrency = n;
        }
        if let Some(n) = self.max_retries {
            config.max_retries = n;
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn env_key(names: &[&str]) -> Result<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
        .ok_or(Error::MissingArg(format!("set {} in the environment", names.join(" or "))))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!(error = %e, "no .env file loaded");
    }

    let mut config = ResearchConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    let llm = OpenAI::with_endpoint(
        config.model.clone(),
        &config.api_base,
        &env_key(&["TOGETHER_API_KEY", "OPENAI_API_KEY"])?,
        config.temperature,
        config.request_timeout(),
    )?;
    let search = YouSearch::new(
        config.search_url.clone(),
        env_key(&["YOU_API_KEY"])?,
        config.request_timeout(),
    )?;

    let cache = Arc::new(FingerprintCache::new());
    if let Some(path) = cli.cache.as_deref().filter(|p| p.exists()) {
        let restored = cache.import(path).await?;
        let stale = cache.retain(|key| Step::from_name(&key.step).is_some());
        tracing::info!(
            entries = restored - stale,
            stale,
            path = %path.display(),
            "cache snapshot loaded"
        );
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling research");
                cancel.cancel();
            }
        }
    });

    let mut builder = research::OrchestratorBuilder::new()
        .llm(llm)
        .web_search(search)
        .cache(cache.clone())
        .config(config)
        .cancel_token(cancel);
    if let Some(path) = &cli.transcript {
        builder = builder.callback(TranscriptLogger::new(&cli.topic, std::fs::File::create(path)?)?);
    }

    let result = builder.build()?.run(&cli.topic).await;

    // completed steps are worth keeping even when the run failed
    if let Some(path) = &cli.cache {
        cache.export(path).await?;
        tracing::info!(entries = cache.len(), path = %path.display(), "cache snapshot saved");
    }

    let report = result?;
    match &cli.output {
        Some(path) => tokio::fs::write(path, report.to_string()).await?,
        None => println!("{}", report),
    }

    if !report.is_complete() {
        tracing::warn!(
            topic = report.topic(),
            incomplete = report.incomplete_sections().count(),
            "report has incomplete subtopics"
        );
    }
    Ok(())
}
