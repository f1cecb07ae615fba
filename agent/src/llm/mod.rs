use crate::Result;
use async_trait::async_trait;

mod openai;
pub use openai::OpenAI;

pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub max_tokens: u32,
}

pub struct CompletionResponse {
    pub content: String,
}

/// Stateless text completion: one prompt in, one text out.
#[async_trait]
pub trait LLM {
    async fn completion<'a>(&self, request: CompletionRequest<'a>) -> Result<CompletionResponse>;
}
