use crate::Result;
use async_trait::async_trait;

mod logger;
pub use logger::TranscriptLogger;

/// One finished step of a research pipeline.
pub struct StepEvent<'a> {
    pub step: &'a str,
    pub subject: &'a str,
    pub cached: bool,
    pub artifact: &'a str,
}

#[async_trait]
pub trait Callback {
    async fn call(&self, event: &StepEvent<'_>) -> Result<()>;
}
